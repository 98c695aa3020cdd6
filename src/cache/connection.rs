//! Cache connection.
//!
//! # Responsibilities
//! - Accept `redis://` URLs and the `host:port,option=value` shorthand
//! - Open one multiplexed connection and prove it with PING
//! - Hand out cheap clones of that connection
//!
//! # Design Decisions
//! - Unreachable at startup is fatal; there is no lazy reconnect path
//! - The connect attempt and the PING share one deadline
//! - Credentials never appear in logs or errors; only host:port does

use std::time::Duration;

use redis::aio::MultiplexedConnection;
use thiserror::Error;
use url::Url;

use crate::config::RedisConfig;

const DEFAULT_PORT: u16 = 6379;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("invalid cache connection string: {reason}")]
    InvalidConnectionString { reason: String },

    #[error("cache store at {address} is unreachable: {source}")]
    Unreachable {
        address: String,
        #[source]
        source: redis::RedisError,
    },

    #[error("timed out after {timeout:?} connecting to cache store at {address}")]
    Timeout { address: String, timeout: Duration },
}

/// Rewrite a connection string into a `redis://` URL.
///
/// `host:port,password=secret,defaultDatabase=2,ssl=true` becomes
/// `rediss://:secret@host:port/2`. URLs with a scheme pass through.
pub fn normalize_connection_string(raw: &str) -> Result<Url, CacheError> {
    let raw = raw.trim();
    let invalid = |reason: String| CacheError::InvalidConnectionString { reason };

    if raw.contains("://") {
        return Url::parse(raw).map_err(|e| invalid(e.to_string()));
    }

    let mut endpoints = Vec::new();
    let mut user = None;
    let mut password = None;
    let mut database = None;
    let mut tls = false;
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match part.split_once('=') {
            None => endpoints.push(part),
            Some((option, value)) => match option.trim().to_ascii_lowercase().as_str() {
                "user" => user = Some(value.trim()),
                "password" => password = Some(value.trim()),
                "defaultdatabase" => {
                    let db: u32 = value
                        .trim()
                        .parse()
                        .map_err(|_| invalid(format!("defaultDatabase {value:?} is not a number")))?;
                    database = Some(db);
                }
                "ssl" => tls = value.trim().eq_ignore_ascii_case("true"),
                other => tracing::debug!(option = other, "Ignoring cache connection option"),
            },
        }
    }

    let endpoint = match endpoints.as_slice() {
        [] => return Err(invalid("no host given".to_string())),
        [single] => *single,
        [first, ..] => {
            tracing::warn!(endpoint = first, count = endpoints.len(), "Using the first of several cache endpoints");
            *first
        }
    };
    let authority = if endpoint.rsplit_once(':').is_some_and(|(_, port)| port.parse::<u16>().is_ok()) {
        endpoint.to_string()
    } else {
        format!("{endpoint}:{DEFAULT_PORT}")
    };

    let scheme = if tls { "rediss" } else { "redis" };
    let mut url = Url::parse(&format!("{scheme}://{authority}")).map_err(|e| invalid(e.to_string()))?;
    if let Some(user) = user {
        url.set_username(user)
            .map_err(|_| invalid("user cannot be set".to_string()))?;
    }
    if let Some(password) = password {
        url.set_password(Some(password))
            .map_err(|_| invalid("password cannot be set".to_string()))?;
    }
    if let Some(db) = database {
        url.set_path(&format!("/{db}"));
    }
    Ok(url)
}

/// `host:port` of a cache URL, safe to log.
fn display_address(url: &Url) -> String {
    match (url.host_str(), url.port()) {
        (Some(host), Some(port)) => format!("{host}:{port}"),
        (Some(host), None) => format!("{host}:{DEFAULT_PORT}"),
        _ => url.scheme().to_string(),
    }
}

/// Open, verified connection to the cache store.
///
/// Cloning is cheap; clones share the multiplexed connection.
#[derive(Clone)]
pub struct CacheConnectionHandle {
    connection: MultiplexedConnection,
    address: String,
}

impl CacheConnectionHandle {
    pub async fn connect(config: &RedisConfig) -> Result<Self, CacheError> {
        let url = normalize_connection_string(&config.connection_string)?;
        let address = display_address(&url);
        let client = redis::Client::open(url.as_str()).map_err(|e| CacheError::InvalidConnectionString {
            reason: e.to_string(),
        })?;

        tracing::debug!(address = %address, timeout = ?config.connect_timeout, "Connecting to cache store");
        let attempt = async {
            let mut connection = client.get_multiplexed_async_connection().await?;
            redis::cmd("PING").query_async::<String>(&mut connection).await?;
            Ok::<_, redis::RedisError>(connection)
        };
        let connection = match tokio::time::timeout(config.connect_timeout, attempt).await {
            Ok(Ok(connection)) => connection,
            Ok(Err(source)) => return Err(CacheError::Unreachable { address, source }),
            Err(_) => {
                return Err(CacheError::Timeout {
                    address,
                    timeout: config.connect_timeout,
                })
            }
        };

        tracing::info!(address = %address, "Cache store connected");
        Ok(Self { connection, address })
    }

    /// Connection clone for issuing commands.
    pub fn connection(&self) -> MultiplexedConnection {
        self.connection.clone()
    }

    /// `host:port` of the store.
    pub fn address(&self) -> &str {
        &self.address
    }
}

impl std::fmt::Debug for CacheConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheConnectionHandle")
            .field("address", &self.address)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_passes_through() {
        let url = normalize_connection_string("redis://cache.internal:6380/1").unwrap();
        assert_eq!(url.as_str(), "redis://cache.internal:6380/1");
    }

    #[test]
    fn test_bare_host_gets_default_port() {
        let url = normalize_connection_string("localhost").unwrap();
        assert_eq!(url.as_str(), "redis://localhost:6379");
    }

    #[test]
    fn test_shorthand_options() {
        let url = normalize_connection_string(
            "cache.internal:6380,password=s3cret,defaultDatabase=2,ssl=True,abortConnect=false",
        )
        .unwrap();
        assert_eq!(url.scheme(), "rediss");
        assert_eq!(url.password(), Some("s3cret"));
        assert_eq!(url.path(), "/2");
        assert_eq!(display_address(&url), "cache.internal:6380");
    }

    #[test]
    fn test_rejects_empty_and_bad_database() {
        assert!(matches!(
            normalize_connection_string(",password=x"),
            Err(CacheError::InvalidConnectionString { .. })
        ));
        assert!(matches!(
            normalize_connection_string("localhost:6379,defaultDatabase=two"),
            Err(CacheError::InvalidConnectionString { .. })
        ));
    }

    #[tokio::test]
    async fn test_unreachable_store_fails_fast() {
        let config = RedisConfig {
            connection_string: "127.0.0.1:1".to_string(),
            verbose_statements: false,
            connect_timeout: Duration::from_secs(2),
        };
        let err = CacheConnectionHandle::connect(&config).await.unwrap_err();
        assert!(matches!(err, CacheError::Unreachable { .. } | CacheError::Timeout { .. }));
        assert!(err.to_string().contains("127.0.0.1:1"));
    }
}
