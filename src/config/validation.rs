//! Configuration validation.
//!
//! # Responsibilities
//! - Turn raw setting strings into typed values
//! - Enforce presence of required settings
//! - Validate value shapes (URLs, socket addresses, ratios, durations)
//!
//! # Design Decisions
//! - Every failure names the offending setting and, where there is one, the
//!   offending value
//! - A missing section and an empty value are separate errors
//! - The sampling ratio is lenient: unparsable means "always sample"

use std::net::SocketAddr;
use std::time::Duration;

use url::Url;

use crate::config::{ConfigError, ConfigSources};
use crate::observability::{ExportProtocol, SamplingPolicy, TelemetryEndpoint};

/// Require a whole section to be present.
pub fn require_section(sources: &ConfigSources, section: &'static str) -> Result<(), ConfigError> {
    if sources.has_section(section) {
        Ok(())
    } else {
        Err(ConfigError::MissingSection { section })
    }
}

/// Require a setting to be present and not blank.
pub fn require_non_empty(sources: &ConfigSources, key: &'static str) -> Result<String, ConfigError> {
    match sources.get(key) {
        None => Err(ConfigError::MissingValue { key }),
        Some(value) if value.trim().is_empty() => Err(ConfigError::EmptyValue { key }),
        Some(value) => Ok(value.trim().to_string()),
    }
}

/// Parse and validate the exporter endpoint.
pub fn parse_endpoint(
    key: &'static str,
    raw: &str,
    protocol: ExportProtocol,
) -> Result<TelemetryEndpoint, ConfigError> {
    let invalid = |reason: String| ConfigError::Invalid {
        key,
        value: raw.to_string(),
        reason,
    };

    let url = Url::parse(raw.trim()).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme `{}`", url.scheme())));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(invalid("missing host".to_string()));
    }

    Ok(TelemetryEndpoint::new(url, protocol))
}

/// Parse the export protocol name.
pub fn parse_protocol(key: &'static str, raw: &str) -> Result<ExportProtocol, ConfigError> {
    ExportProtocol::parse(raw).ok_or_else(|| ConfigError::Invalid {
        key,
        value: raw.to_string(),
        reason: "expected `grpc` or `http/json`".to_string(),
    })
}

/// Parse the trace sampling ratio.
///
/// Returns the policy and, when the raw value had to be corrected, a note
/// describing the correction for the caller to log.
pub fn parse_sampling_ratio(raw: Option<&str>) -> (SamplingPolicy, Option<String>) {
    let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
        return (SamplingPolicy::always(), None);
    };

    match raw.parse::<f64>() {
        Ok(ratio) if ratio.is_finite() => {
            let policy = SamplingPolicy::new(ratio);
            let note = (policy.ratio() != ratio)
                .then(|| format!("sampling ratio {ratio} clamped to {}", policy.ratio()));
            (policy, note)
        }
        _ => (
            SamplingPolicy::always(),
            Some(format!("sampling ratio {raw:?} is not a number, sampling every trace")),
        ),
    }
}

/// Parse a boolean flag. Absent means `default`.
pub fn parse_flag(key: &'static str, raw: Option<&str>, default: bool) -> Result<bool, ConfigError> {
    let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
        return Ok(default);
    };
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            value: raw.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}

/// Parse a positive number of seconds. Absent means `default`.
pub fn parse_secs(key: &'static str, raw: Option<&str>, default: u64) -> Result<Duration, ConfigError> {
    let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
        return Ok(Duration::from_secs(default));
    };
    match raw.parse::<u64>() {
        Ok(0) => Err(ConfigError::Invalid {
            key,
            value: raw.to_string(),
            reason: "must be greater than zero".to_string(),
        }),
        Ok(secs) => Ok(Duration::from_secs(secs)),
        Err(e) => Err(ConfigError::Invalid {
            key,
            value: raw.to_string(),
            reason: e.to_string(),
        }),
    }
}

/// Validate a listener bind address.
pub fn parse_bind_address(key: &'static str, raw: &str) -> Result<String, ConfigError> {
    raw.trim()
        .parse::<SocketAddr>()
        .map(|_| raw.trim().to_string())
        .map_err(|e| ConfigError::Invalid {
            key,
            value: raw.to_string(),
            reason: e.to_string(),
        })
}

/// Validate an HTTP path used for an exposed endpoint.
pub fn parse_path(key: &'static str, raw: &str) -> Result<String, ConfigError> {
    let path = raw.trim();
    if path.starts_with('/') && path.len() > 1 && !path.contains(char::is_whitespace) {
        Ok(path.to_string())
    } else {
        Err(ConfigError::Invalid {
            key,
            value: raw.to_string(),
            reason: "must be an absolute path such as `/metrics`".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_rejects_garbage() {
        let err = parse_endpoint("OTLP_ENDPOINT_URL", "not a url", ExportProtocol::Grpc).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("not a url"), "{message}");
        assert!(message.contains("OTLP_ENDPOINT_URL"), "{message}");
    }

    #[test]
    fn test_endpoint_rejects_non_http_scheme() {
        let err = parse_endpoint("OTLP_ENDPOINT_URL", "ftp://collector:4317", ExportProtocol::Grpc)
            .unwrap_err();
        assert!(err.to_string().contains("unsupported scheme"));
    }

    #[test]
    fn test_endpoint_accepts_default() {
        let endpoint =
            parse_endpoint("OTLP_ENDPOINT_URL", "http://localhost:4317/", ExportProtocol::Grpc).unwrap();
        assert_eq!(endpoint.url().host_str(), Some("localhost"));
        assert_eq!(endpoint.url().port(), Some(4317));
    }

    #[test]
    fn test_sampling_ratio_defaults_and_clamps() {
        assert_eq!(parse_sampling_ratio(None).0.ratio(), 1.0);
        assert_eq!(parse_sampling_ratio(Some("  ")).0.ratio(), 1.0);

        let (policy, note) = parse_sampling_ratio(Some("0.25"));
        assert_eq!(policy.ratio(), 0.25);
        assert!(note.is_none());

        let (policy, note) = parse_sampling_ratio(Some("abc"));
        assert_eq!(policy.ratio(), 1.0);
        assert!(note.is_some());

        let (policy, note) = parse_sampling_ratio(Some("NaN"));
        assert_eq!(policy.ratio(), 1.0);
        assert!(note.is_some());

        let (policy, note) = parse_sampling_ratio(Some("7"));
        assert_eq!(policy.ratio(), 1.0);
        assert!(note.unwrap().contains("clamped"));

        let (policy, _) = parse_sampling_ratio(Some("-0.5"));
        assert_eq!(policy.ratio(), 0.0);
    }

    #[test]
    fn test_flags_and_durations() {
        assert!(parse_flag("k", Some("TRUE"), false).unwrap());
        assert!(!parse_flag("k", None, false).unwrap());
        assert!(parse_flag("k", Some("maybe"), false).is_err());

        assert_eq!(parse_secs("k", None, 5).unwrap(), Duration::from_secs(5));
        assert_eq!(parse_secs("k", Some("12"), 5).unwrap(), Duration::from_secs(12));
        assert!(parse_secs("k", Some("0"), 5).is_err());
        assert!(parse_secs("k", Some("-3"), 5).is_err());
    }

    #[test]
    fn test_bind_address_and_path() {
        assert!(parse_bind_address("k", "127.0.0.1:0").is_ok());
        assert!(parse_bind_address("k", "localhost").is_err());
        assert_eq!(parse_path("k", "/metrics").unwrap(), "/metrics");
        assert!(parse_path("k", "metrics").is_err());
        assert!(parse_path("k", "/").is_err());
    }
}
