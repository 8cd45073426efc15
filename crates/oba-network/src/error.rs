use thiserror::Error;

use crate::operation::OperationState;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("Request to {url} failed: {message}")]
    Transport {
        url: String,
        message: String,
        timeout: bool,
    },

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("Failed to parse response from {url}: {message}")]
    Parse { url: String, message: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Failed to build HTTP client: {0}")]
    Client(String),

    #[error("Operation '{label}' cannot {action} while {state:?}")]
    InvalidState {
        label: &'static str,
        action: &'static str,
        state: OperationState,
    },
}

impl NetworkError {
    pub(crate) fn transport(url: &str, err: reqwest::Error) -> Self {
        NetworkError::Transport {
            url: url.to_string(),
            timeout: err.is_timeout(),
            message: err.to_string(),
        }
    }

    pub(crate) fn parse(url: &str, message: impl Into<String>) -> Self {
        NetworkError::Parse {
            url: url.to_string(),
            message: message.into(),
        }
    }

    /// `true` for connectivity failures, including transport-level timeouts.
    pub fn is_transport(&self) -> bool {
        matches!(self, NetworkError::Transport { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, NetworkError::Transport { timeout: true, .. })
    }
}
