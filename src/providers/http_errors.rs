use reqwest::StatusCode;
use std::error::Error as StdError;
use std::io::ErrorKind;
use thiserror::Error;

/// A classified failure from a model provider call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error(
        "Model request timed out after {timeout_secs}s while calling '{url}'. \
         Increase MODEL_TIMEOUT_SECS or check model responsiveness."
    )]
    Timeout { url: String, timeout_secs: u64 },

    #[error(
        "Connection refused by model API at '{url}'. \
         Ensure the model server is running and the base URL is correct."
    )]
    ConnectionRefused { url: String },

    #[error(
        "Failed to connect to model API at '{url}'. \
         Check the base URL and network connectivity."
    )]
    Connect { url: String },

    #[error("Model API rejected the request with status {status}. Check {key_hint}.")]
    Unauthorized { status: u16, key_hint: String },

    #[error("Model request failed with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Model stream was interrupted: {0}")]
    Stream(String),

    #[error("Failed to parse model stream event: {0}")]
    Decode(String),

    #[error("Failed to call model API at '{url}': {message}")]
    Request { url: String, message: String },
}

impl ProviderError {
    /// Whether the same request has a fair chance of succeeding later.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. }
            | Self::ConnectionRefused { .. }
            | Self::Connect { .. }
            | Self::Stream(_) => true,
            Self::Status { status, .. } => *status == 408 || *status == 429 || *status >= 500,
            Self::Unauthorized { .. } | Self::Decode(_) | Self::Request { .. } => false,
        }
    }
}

fn error_chain_matches(
    err: &(dyn StdError + 'static),
    kind: ErrorKind,
    needle: &str,
) -> bool {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(source) = current {
        if let Some(io_err) = source.downcast_ref::<std::io::Error>()
            && io_err.kind() == kind
        {
            return true;
        }

        if source.to_string().to_ascii_lowercase().contains(needle) {
            return true;
        }

        current = source.source();
    }

    false
}

pub(crate) fn classify_request_error(
    err: reqwest::Error,
    api_url: &str,
    timeout_secs: u64,
) -> ProviderError {
    if err.is_timeout() || error_chain_matches(&err, ErrorKind::TimedOut, "timed out") {
        return ProviderError::Timeout {
            url: api_url.to_string(),
            timeout_secs,
        };
    }

    if err.is_connect() {
        if error_chain_matches(&err, ErrorKind::ConnectionRefused, "connection refused") {
            return ProviderError::ConnectionRefused {
                url: api_url.to_string(),
            };
        }
        return ProviderError::Connect {
            url: api_url.to_string(),
        };
    }

    ProviderError::Request {
        url: api_url.to_string(),
        message: err.to_string(),
    }
}

pub(crate) fn classify_status(status: StatusCode, body: String, key_hint: &str) -> ProviderError {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return ProviderError::Unauthorized {
            status: status.as_u16(),
            key_hint: key_hint.to_string(),
        };
    }
    ProviderError::Status {
        status: status.as_u16(),
        body,
    }
}
