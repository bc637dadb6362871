//! Client configuration

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::errors::{ClientError, ClientResult};

/// HTTP basic-auth credentials
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,

    #[serde(default, skip_serializing)]
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// ArangoDB client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Server endpoint, e.g. `http://localhost:8529`
    pub endpoint: String,

    /// Credentials; `None` sends no Authorization header
    pub credentials: Option<Credentials>,

    /// Request timeout
    pub timeout: Duration,

    /// Maximum number of concurrent requests
    pub conn_limit: u32,

    /// User agent string
    pub user_agent: String,

    /// Whether to verify TLS certificates
    pub verify_ssl: bool,

    /// How long shutdown waits for in-flight requests
    pub shutdown_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8529".to_string(),
            credentials: None,
            timeout: Duration::from_secs(30),
            conn_limit: 32,
            user_agent: concat!("arango-migrate/", env!("CARGO_PKG_VERSION")).to_string(),
            verify_ssl: true,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl ClientConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_conn_limit(mut self, conn_limit: u32) -> Self {
        self.conn_limit = conn_limit;
        self
    }

    pub fn with_verify_ssl(mut self, verify_ssl: bool) -> Self {
        self.verify_ssl = verify_ssl;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> ClientResult<()> {
        let url = url::Url::parse(&self.endpoint)
            .map_err(|e| ClientError::InvalidUrl(format!("{}: {}", self.endpoint, e)))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(ClientError::InvalidUrl(format!(
                "endpoint scheme must be http or https, got '{}'",
                url.scheme()
            )));
        }

        if url.host_str().map_or(true, str::is_empty) {
            return Err(ClientError::InvalidUrl(format!("endpoint has no host: {}", self.endpoint)));
        }

        if self.conn_limit == 0 {
            return Err(ClientError::ConfigError(
                "conn_limit must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
