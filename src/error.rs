use reqwest::StatusCode;
use serde_json;
use std::fmt;
use std::io;
use std::time::Duration;
use thiserror::Error;

pub type ModelResult<T> = std::result::Result<T, ModelError>;

/// Main error type for content generation
#[derive(Error, Debug)]
pub enum ModelError {
    /// Provider configuration is invalid
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Non-2xx response or network-level failure
    #[error("{}", transport_message(.status, .body))]
    Transport {
        status: Option<StatusCode>,
        body: String,
    },

    /// The transport was aborted by the configured deadline
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// A provider response could not be mapped to a generation result
    #[error("translation error: {0}")]
    Translation(String),

    /// A single stream event could not be parsed
    #[error("parse error: {0}")]
    Parse(String),

    /// The provider's wire protocol has no equivalent of the invoked operation
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// A failure annotated with the provider and call that produced it
    #[error("{provider} {call} failed: {source}")]
    Call {
        provider: String,
        call: &'static str,
        #[source]
        source: Box<ModelError>,
    },

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Url(#[from] url::ParseError),
}

fn transport_message(status: &Option<StatusCode>, body: &str) -> String {
    match status {
        Some(status) if body.is_empty() => format!("HTTP {}", status),
        Some(status) => format!("HTTP {}: {}", status, body),
        None => format!("transport failure: {}", body),
    }
}

/// A configuration variable that is present but unusable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    /// Name of the offending environment variable
    pub var: String,
    /// What the value must satisfy, e.g. "must be a valid URL"
    pub requirement: String,
}

impl ConfigError {
    pub fn new(var: impl Into<String>, requirement: impl Into<String>) -> Self {
        Self {
            var: var.into(),
            requirement: requirement.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.var, self.requirement)
    }
}

impl std::error::Error for ConfigError {}

impl ModelError {
    /// Build a transport error from a status and body
    pub fn transport(status: Option<StatusCode>, body: impl Into<String>) -> Self {
        ModelError::Transport {
            status,
            body: body.into(),
        }
    }

    /// Map a reqwest failure, keeping deadline expiry distinct from other transport errors
    pub fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            ModelError::Timeout(timeout)
        } else {
            ModelError::transport(err.status(), err.to_string())
        }
    }

    /// Prefix this error with the provider and call that failed
    pub fn in_call(self, provider: impl Into<String>, call: &'static str) -> Self {
        ModelError::Call {
            provider: provider.into(),
            call,
            source: Box::new(self),
        }
    }

    /// The underlying error with any call context stripped
    pub fn root(&self) -> &ModelError {
        match self {
            ModelError::Call { source, .. } => source.root(),
            other => other,
        }
    }

    /// Check if the error is retryable
    pub fn is_retryable(&self) -> bool {
        match self.root() {
            ModelError::Timeout(_) => true,
            ModelError::Transport { status: None, .. } => true,
            ModelError::Transport {
                status: Some(status),
                ..
            } => status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS,
            _ => false,
        }
    }

    /// Get the HTTP status code if available
    pub fn status_code(&self) -> Option<StatusCode> {
        match self.root() {
            ModelError::Transport { status, .. } => *status,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_names_variable_and_bound() {
        let err = ModelError::from(ConfigError::new(
            "CUSTOM_LLM_TOP_P",
            "must be a number between 0 and 1",
        ));
        assert_eq!(
            err.to_string(),
            "configuration error: CUSTOM_LLM_TOP_P must be a number between 0 and 1"
        );
    }

    #[test]
    fn test_call_context_prefixes_message() {
        let err = ModelError::transport(Some(StatusCode::BAD_GATEWAY), "upstream down")
            .in_call("custom-llm", "generate_content");
        assert_eq!(
            err.to_string(),
            "custom-llm generate_content failed: HTTP 502 Bad Gateway: upstream down"
        );
        assert_eq!(err.status_code(), Some(StatusCode::BAD_GATEWAY));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_retryable_classification() {
        assert!(ModelError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(ModelError::transport(None, "connection reset").is_retryable());
        assert!(ModelError::transport(Some(StatusCode::TOO_MANY_REQUESTS), "").is_retryable());
        assert!(!ModelError::transport(Some(StatusCode::UNAUTHORIZED), "").is_retryable());
        assert!(!ModelError::UnsupportedOperation("embed_content".into()).is_retryable());
    }
}
