//! OpenTelemetry demo service.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌──────────────────────────────────────────────────────┐
//!                      │                     SERVICE                          │
//!                      │                                                      │
//!   config file,       │  ┌──────────┐   ┌──────────────┐   ┌─────────────┐    │
//!   environment,  ─────┼─▶│  config  │──▶│  lifecycle   │──▶│    http     │◀───┼──── Clients
//!   --set KEY=VALUE    │  │  layers  │   │ orchestrator │   │   server    │    │
//!                      │  └──────────┘   └──────┬───────┘   └──────┬──────┘    │
//!                      │                        │                  │           │
//!                      │                        ▼                  ▼           │
//!                      │  ┌──────────────────────────┐   ┌─────────────────┐   │
//!                      │  │      observability       │   │  cache (redis)  │───┼──── Redis
//!                      │  │ logs · metrics · traces  │   │  security (key) │   │
//!                      │  └────────────┬─────────────┘   └─────────────────┘   │
//!                      └───────────────┼───────────────────────────────────────┘
//!                                      ▼
//!                          OTLP collector  ·  Prometheus scrape
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

#[derive(Parser)]
#[command(name = "otel-demo")]
#[command(about = "Service bootstrap with OpenTelemetry logs, metrics and traces", long_about = None)]
struct Cli {
    /// TOML configuration file (also read from OTEL_DEMO_CONFIG)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Override a setting, e.g. --set Redis:ConnectionString=localhost:6379
    #[arg(long = "set", value_name = "KEY=VALUE")]
    overrides: Vec<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    otel_demo::lifecycle::launch(cli.config, cli.overrides).await
}
