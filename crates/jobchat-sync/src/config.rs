//! Client configuration from the environment (`.env` honoured).

use std::time::Duration;

use crate::error::ConfigError;

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:3000";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// REST base URL, without trailing slash.
    pub api_url: String,
    /// WebSocket gateway URL.
    pub gateway_url: String,
    pub request_timeout: Duration,
}

impl ClientConfig {
    /// Config for `api_url` with the gateway at its `/gateway` path.
    pub fn new(api_url: &str) -> Self {
        let api_url = api_url.trim_end_matches('/').to_string();
        Self {
            gateway_url: gateway_url_for(&api_url),
            api_url,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }

    /// Reads `JOBCHAT_API_URL`, `JOBCHAT_GATEWAY_URL` and
    /// `JOBCHAT_REQUEST_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_url = lookup("JOBCHAT_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string());
        if !(api_url.starts_with("http://") || api_url.starts_with("https://")) {
            return Err(ConfigError::Invalid {
                var: "JOBCHAT_API_URL",
                reason: format!("expected an http(s) url, got {api_url:?}"),
            });
        }
        let mut config = Self::new(&api_url);

        if let Some(gateway_url) = lookup("JOBCHAT_GATEWAY_URL") {
            if !(gateway_url.starts_with("ws://") || gateway_url.starts_with("wss://")) {
                return Err(ConfigError::Invalid {
                    var: "JOBCHAT_GATEWAY_URL",
                    reason: format!("expected a ws(s) url, got {gateway_url:?}"),
                });
            }
            config.gateway_url = gateway_url;
        }

        if let Some(raw) = lookup("JOBCHAT_REQUEST_TIMEOUT_SECS") {
            let secs: u64 = raw.parse().map_err(|_| ConfigError::Invalid {
                var: "JOBCHAT_REQUEST_TIMEOUT_SECS",
                reason: format!("{raw:?} is not a whole number of seconds"),
            })?;
            config.request_timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_API_URL)
    }
}

/// `http://host/base` becomes `ws://host/base/gateway`.
pub fn gateway_url_for(api_url: &str) -> String {
    let api_url = api_url.trim_end_matches('/');
    let base = if let Some(rest) = api_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = api_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        api_url.to_string()
    };
    format!("{base}/gateway")
}
