//! Errors reported by the external services the controller talks to.
//!
//! None of these ever escape a controller operation: they are turned into
//! notifications with [`extract_message`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured error payload a backend may attach to a failed call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{}", remote_display(.status, .body))]
    Remote {
        status: Option<u16>,
        body: Option<ErrorBody>,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Malformed response: {0}")]
    Decode(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ServiceError {
    /// A rejection carrying only a `body.message`.
    pub fn with_message(message: impl Into<String>) -> Self {
        ServiceError::Remote {
            status: None,
            body: Some(ErrorBody {
                message: Some(message.into()),
            }),
        }
    }

    /// The nested `body.message`, if the error has one.
    pub fn body_message(&self) -> Option<&str> {
        match self {
            ServiceError::Remote {
                body: Some(ErrorBody {
                    message: Some(message),
                }),
                ..
            } => Some(message.as_str()),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ServiceError::Decode(err.to_string())
        } else {
            ServiceError::Transport(err.to_string())
        }
    }
}

fn remote_display(status: &Option<u16>, body: &Option<ErrorBody>) -> String {
    let message = body.as_ref().and_then(|b| b.message.as_deref());
    match (*status, message) {
        (Some(status), Some(message)) => format!("Request failed with status {status}: {message}"),
        (Some(status), None) => format!("Request failed with status {status}"),
        (None, Some(message)) => message.to_string(),
        (None, None) => "Request failed".to_string(),
    }
}

/// User-facing text for an error: `body.message` when present, otherwise its display form.
pub fn extract_message(err: &ServiceError) -> String {
    err.body_message()
        .map(str::to_owned)
        .unwrap_or_else(|| err.to_string())
}
