//! Configuration management for the log sink

use crate::entry::DefaultAttributes;
use std::env;
use std::fmt;
use std::time::Duration;

pub const DEFAULT_INGEST_DOMAIN: &str = "live.dynatrace.com";
pub const INGEST_PATH: &str = "/api/v2/logs/ingest";

/// Where and how batches are delivered. Export is disabled without one.
#[derive(Clone, PartialEq, Eq)]
pub struct ExportTarget {
    /// Environment id, the first label of the ingest host name
    pub endpoint_id: String,

    /// Credential sent as `Api-Token <token>`
    pub api_token: String,

    /// Provider domain appended to the endpoint id
    pub domain: String,

    /// Full base URL that replaces `https://{endpoint_id}.{domain}`
    pub base_url: Option<String>,
}

impl ExportTarget {
    pub fn new(endpoint_id: impl Into<String>, api_token: impl Into<String>) -> Self {
        Self {
            endpoint_id: endpoint_id.into(),
            api_token: api_token.into(),
            domain: DEFAULT_INGEST_DOMAIN.to_string(),
            base_url: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn ingest_url(&self) -> String {
        match &self.base_url {
            Some(base) => format!("{}{}", base.trim_end_matches('/'), INGEST_PATH),
            None => format!("https://{}.{}{}", self.endpoint_id, self.domain, INGEST_PATH),
        }
    }
}

impl fmt::Debug for ExportTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportTarget")
            .field("endpoint_id", &self.endpoint_id)
            .field("api_token", &"<redacted>")
            .field("domain", &self.domain)
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Ingest destination, `None` when endpoint or token is missing
    pub target: Option<ExportTarget>,

    /// Attribute values stamped on every entry
    pub defaults: DefaultAttributes,

    /// Period of the flush timer
    pub flush_interval: Duration,

    /// Buffer length that triggers an immediate flush, and the batch size cap
    pub max_batch_size: usize,

    /// HTTP timeout for ingest requests
    pub http_timeout: Duration,

    /// Failed export attempts after which an entry is dropped, unbounded if unset
    pub max_export_attempts: Option<u32>,

    /// Buffer capacity with drop-oldest on overflow, unbounded if unset
    pub max_buffer_size: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            target: None,
            defaults: DefaultAttributes::default(),
            flush_interval: Duration::from_millis(5000),
            max_batch_size: 50,
            http_timeout: Duration::from_secs(10),
            max_export_attempts: None,
            max_buffer_size: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let mut config = Config::default();

        if let (Some(endpoint_id), Some(api_token)) = (get("DT_ENDPOINT"), get("DT_API_TOKEN")) {
            let mut target = ExportTarget::new(endpoint_id, api_token);
            if let Some(domain) = get("DT_DOMAIN") {
                target.domain = domain;
            }
            target.base_url = get("DT_INGEST_URL");
            config.target = Some(target);
        }

        if let Some(environment) = get("DT_ENVIRONMENT") {
            config.defaults.environment = environment;
        }

        if let Some(app_name) = get("APP_NAME") {
            config.defaults.app_name = app_name;
        }

        if let Some(service_name) = get("DT_SERVICE_NAME") {
            config.defaults.service_name = service_name;
        }

        if let Some(host_name) = get("HOSTNAME") {
            config.defaults.host_name = host_name;
        }

        if let Some(segment) = get("SEGMENT") {
            config.defaults.segment = segment;
        }

        if let Some(flush_interval) = get("FLUSH_INTERVAL_MS") {
            if let Ok(ms) = flush_interval.parse::<u64>() {
                config.flush_interval = Duration::from_millis(ms);
            }
        }

        if let Some(batch_size) = get("MAX_BATCH_SIZE") {
            if let Ok(size) = batch_size.parse() {
                config.max_batch_size = size;
            }
        }

        if let Some(timeout) = get("HTTP_TIMEOUT_SECONDS") {
            if let Ok(seconds) = timeout.parse::<u64>() {
                config.http_timeout = Duration::from_secs(seconds);
            }
        }

        if let Some(attempts) = get("MAX_EXPORT_ATTEMPTS") {
            if let Ok(attempts) = attempts.parse() {
                config.max_export_attempts = Some(attempts);
            }
        }

        if let Some(buffer_size) = get("MAX_BUFFER_SIZE") {
            if let Ok(size) = buffer_size.parse() {
                config.max_buffer_size = Some(size);
            }
        }

        config
    }

    pub fn with_target(mut self, target: ExportTarget) -> Self {
        self.target = Some(target);
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.max_batch_size == 0 {
            return Err("max_batch_size must be greater than 0".to_string());
        }

        if self.flush_interval.is_zero() {
            return Err("flush_interval must be greater than 0".to_string());
        }

        if self.http_timeout.is_zero() {
            return Err("http_timeout must be greater than 0".to_string());
        }

        if self.max_export_attempts == Some(0) {
            return Err("max_export_attempts must be greater than 0 when set".to_string());
        }

        if let Some(max_buffer_size) = self.max_buffer_size {
            if max_buffer_size < self.max_batch_size {
                return Err("max_buffer_size cannot be smaller than max_batch_size".to_string());
            }
        }

        if let Some(target) = &self.target {
            if target.endpoint_id.is_empty() || target.api_token.is_empty() {
                return Err("export target needs both endpoint id and api token".to_string());
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_environment() {
        let config = Config::from_lookup(|_| None);

        assert!(config.target.is_none());
        assert_eq!(config.flush_interval, Duration::from_millis(5000));
        assert_eq!(config.max_batch_size, 50);
        assert_eq!(config.defaults.app_name, "Express App");
        assert_eq!(config.defaults.service_name, "express-app");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_full_environment() {
        let config = Config::from_lookup(lookup_from(&[
            ("DT_ENDPOINT", "abc12345"),
            ("DT_API_TOKEN", "dt0c01.secret"),
            ("DT_ENVIRONMENT", "prod"),
            ("APP_NAME", "Shop"),
            ("DT_SERVICE_NAME", "shop-api"),
            ("HOSTNAME", "web-1"),
            ("SEGMENT", "eu"),
            ("FLUSH_INTERVAL_MS", "250"),
            ("MAX_BATCH_SIZE", "10"),
            ("MAX_EXPORT_ATTEMPTS", "3"),
            ("MAX_BUFFER_SIZE", "1000"),
        ]));

        let target = config.target.as_ref().unwrap();
        assert_eq!(
            target.ingest_url(),
            "https://abc12345.live.dynatrace.com/api/v2/logs/ingest"
        );
        assert_eq!(config.defaults.environment, "prod");
        assert_eq!(config.defaults.segment, "eu");
        assert_eq!(config.flush_interval, Duration::from_millis(250));
        assert_eq!(config.max_batch_size, 10);
        assert_eq!(config.max_export_attempts, Some(3));
        assert_eq!(config.max_buffer_size, Some(1000));
    }

    #[test]
    fn test_token_without_endpoint_disables_export() {
        let config = Config::from_lookup(lookup_from(&[("DT_API_TOKEN", "dt0c01.secret")]));
        assert!(config.target.is_none());

        let config = Config::from_lookup(lookup_from(&[
            ("DT_ENDPOINT", "abc12345"),
            ("DT_API_TOKEN", "  "),
        ]));
        assert!(config.target.is_none());
    }

    #[test]
    fn test_ingest_url_override() {
        let target = ExportTarget::new("abc", "token").with_base_url("http://127.0.0.1:9000/");
        assert_eq!(target.ingest_url(), "http://127.0.0.1:9000/api/v2/logs/ingest");
    }

    #[test]
    fn test_debug_redacts_token() {
        let target = ExportTarget::new("abc", "dt0c01.secret");
        let rendered = format!("{:?}", target);
        assert!(!rendered.contains("dt0c01.secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.max_batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.max_export_attempts = Some(0);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.max_buffer_size = Some(10);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.flush_interval = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_http_timeout_is_rejected() {
        let config = Config::from_lookup(lookup_from(&[("HTTP_TIMEOUT_SECONDS", "0")]));

        assert_eq!(config.http_timeout, Duration::ZERO);
        assert_eq!(
            config.validate(),
            Err("http_timeout must be greater than 0".to_string())
        );
    }
}
