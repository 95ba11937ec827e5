//! Connection configuration for the NSX-T manager.
//!
//! The orchestrator hands this in as the declarative `client_config`
//! property map; it is deserialized fresh on every tick.

use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};

/// How credentials are attached to API calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    /// Basic credentials attached to every request.
    #[default]
    Basic,
    /// One login call exchanges credentials for a session cookie and CSRF
    /// token attached to all subsequent requests.
    Session,
}

/// Declarative connection settings for one NSX-T manager.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub auth_type: AuthType,
    /// Skip TLS certificate verification (lab managers with self-signed
    /// certificates).
    #[serde(default)]
    pub insecure: bool,
    /// Explicit manager URL overriding the `https://{host}:{port}` form,
    /// e.g. when the manager sits behind a plain-HTTP reverse proxy.
    #[serde(default)]
    pub base_url: Option<String>,
}

fn default_port() -> u16 {
    443
}

impl ClientConfig {
    /// Deserialize from the orchestrator's `client_config` property value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the missing or malformed field.
    pub fn from_value(value: &Value) -> Result<Self> {
        let config: ClientConfig = serde_json::from_value(value.clone())
            .map_err(|e| Error::Config(format!("client_config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Check required fields carry usable values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::Config("client_config.host must not be empty".into()));
        }
        if self.username.trim().is_empty() {
            return Err(Error::Config(
                "client_config.username must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// Manager base URL.
    pub fn base_url(&self) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| format!("https://{}:{}", self.host, self.port))
    }
}
