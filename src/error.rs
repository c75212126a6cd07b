use std::time::Duration;
use thiserror::Error;

use crate::model::ItemId;

/// Failures the synchronization core distinguishes. None of them is fatal.
#[derive(Debug, Clone, Error, Eq, PartialEq)]
pub enum SyncError {
    #[error("network failure: {0}")]
    Network(String),
    #[error("decode failure: {0}")]
    Decode(String),
    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },
    #[error("request timed out after {}ms", after.as_millis())]
    Timeout { after: Duration },
    #[error("an action is already running for {item}")]
    ActionConflict { item: ItemId },
}

impl SyncError {
    pub fn server(status: u16, message: impl Into<String>) -> Self {
        Self::Server {
            status,
            message: message.into(),
        }
    }

    /// Message handed to the error sink.
    pub fn user_message(&self) -> String {
        match self {
            Self::Network(_) | Self::Timeout { .. } => {
                format!("Error connecting to cluster: {self}")
            }
            _ => self.to_string(),
        }
    }
}

impl From<kube::Error> for SyncError {
    fn from(error: kube::Error) -> Self {
        match error {
            kube::Error::Api(status) => Self::Server {
                status: status.code,
                message: status.message,
            },
            kube::Error::SerdeError(error) => Self::Decode(error.to_string()),
            other => Self::Network(other.to_string()),
        }
    }
}
