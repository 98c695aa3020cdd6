//! API reference endpoints, mounted in development only.

use axum::{extract::State, response::Html, Json};
use serde_json::{json, Value};

use super::server::AppState;

pub const OPENAPI_PATH: &str = "/openapi/v1.json";
pub const REFERENCE_PATH: &str = "/scalar/v1";

/// OpenAPI 3.1 document describing the service's routes.
pub fn openapi_document(state: &AppState) -> Value {
    let mut document = json!({
        "openapi": "3.1.0",
        "info": {
            "title": state.identity.name(),
            "version": state.identity.version(),
        },
        "paths": {
            "/health": {
                "get": {
                    "summary": "Liveness probe",
                    "responses": {
                        "200": {
                            "description": "Service is up",
                            "content": {
                                "application/json": {
                                    "schema": {
                                        "type": "object",
                                        "properties": {
                                            "status": { "type": "string" },
                                            "service": { "type": "string" },
                                            "version": { "type": "string" },
                                        },
                                    },
                                },
                            },
                        },
                    },
                },
            },
            "/health/dependencies": {
                "get": {
                    "summary": "Cache store reachability",
                    "responses": {
                        "200": { "description": "Every dependency answered" },
                        "503": { "description": "The cache store did not answer" },
                    },
                },
            },
        },
    });
    document["paths"][state.metrics_path.as_str()] = json!({
        "get": {
            "summary": "Prometheus scrape endpoint",
            "responses": {
                "200": {
                    "description": "Text exposition format",
                    "content": { "text/plain": {} },
                },
            },
        },
    });
    document
}

pub async fn openapi(State(state): State<AppState>) -> Json<Value> {
    Json(openapi_document(&state))
}

pub async fn reference() -> Html<String> {
    Html(format!(
        r#"<!doctype html>
<html>
  <head>
    <title>API Reference</title>
    <meta charset="utf-8" />
  </head>
  <body>
    <script id="api-reference" data-url="{OPENAPI_PATH}"></script>
    <script src="https://cdn.jsdelivr.net/npm/@scalar/api-reference"></script>
  </body>
</html>"#
    ))
}
