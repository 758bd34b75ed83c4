use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    /// Reads `JOBCHAT_JWT_SECRET` (required), `JOBCHAT_DB_PATH`,
    /// `JOBCHAT_HOST` and `JOBCHAT_PORT`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let jwt_secret = lookup("JOBCHAT_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("JOBCHAT_JWT_SECRET is unset or still a placeholder");
        }

        let port = match lookup("JOBCHAT_PORT") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("JOBCHAT_PORT is not a port number: {raw:?}"))?,
            None => 3000,
        };

        Ok(Self {
            jwt_secret,
            db_path: lookup("JOBCHAT_DB_PATH")
                .unwrap_or_else(|| "jobchat.db".into())
                .into(),
            host: lookup("JOBCHAT_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
        })
    }

    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}
