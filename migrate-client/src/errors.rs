//! Client error types

use serde::Deserialize;
use std::time::Duration;

/// Result type for client operations
pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// ArangoDB error numbers the driver reacts to
pub mod error_num {
    pub const FORBIDDEN: i64 = 11;
    pub const CONFLICT: i64 = 1200;
    pub const DOCUMENT_NOT_FOUND: i64 = 1202;
    pub const DATA_SOURCE_NOT_FOUND: i64 = 1203;
    pub const DUPLICATE_NAME: i64 = 1207;
    pub const UNIQUE_CONSTRAINT_VIOLATED: i64 = 1210;
    pub const DATABASE_NOT_FOUND: i64 = 1228;
    pub const DATABASE_NAME_INVALID: i64 = 1229;
    pub const QUERY_PARSE: i64 = 1501;
    pub const TRANSACTION_NOT_FOUND: i64 = 1655;
}

/// Error type for client operations
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("ArangoDB error (HTTP {status}, errorNum {error_num}): {message}")]
    Server {
        status: u16,
        error_num: i64,
        message: String,
    },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Client is shut down")]
    Closed,

    #[error("Shutdown timed out after {0:?} with requests still in flight")]
    ShutdownTimeout(Duration),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Error body returned by the REST API
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(rename = "errorNum", default)]
    error_num: i64,

    #[serde(rename = "errorMessage")]
    error_message: Option<String>,
}

impl ClientError {
    pub fn server(status: u16, error_num: i64, message: impl Into<String>) -> Self {
        ClientError::Server {
            status,
            error_num,
            message: message.into(),
        }
    }

    /// Build a server error from a non-success response
    pub(crate) fn from_response(status: u16, body: &[u8]) -> Self {
        match serde_json::from_slice::<ErrorBody>(body) {
            Ok(parsed) => ClientError::server(
                status,
                parsed.error_num,
                parsed.error_message.unwrap_or_else(|| format!("HTTP {}", status)),
            ),
            Err(_) => {
                let text = String::from_utf8_lossy(body).trim().to_string();
                let message = if text.is_empty() { format!("HTTP {}", status) } else { text };
                ClientError::server(status, 0, message)
            }
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Server { status, .. } => Some(*status),
            ClientError::Network(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    pub fn error_num(&self) -> Option<i64> {
        match self {
            ClientError::Server { error_num, .. } => Some(*error_num),
            _ => None,
        }
    }

    /// Transport-level failure: the server could not be reached or the client is gone
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            ClientError::Network(_) | ClientError::Closed | ClientError::ShutdownTimeout(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// The document itself is missing; its collection and database exist
    pub fn is_document_not_found(&self) -> bool {
        self.error_num() == Some(error_num::DOCUMENT_NOT_FOUND)
    }

    pub fn is_collection_not_found(&self) -> bool {
        self.error_num() == Some(error_num::DATA_SOURCE_NOT_FOUND)
    }

    pub fn is_duplicate_name(&self) -> bool {
        self.error_num() == Some(error_num::DUPLICATE_NAME)
    }

    /// Unique-key collision or failed revision precondition
    pub fn is_conflict(&self) -> bool {
        matches!(self.status(), Some(409) | Some(412))
            || matches!(
                self.error_num(),
                Some(error_num::CONFLICT) | Some(error_num::UNIQUE_CONSTRAINT_VIOLATED)
            )
    }
}
