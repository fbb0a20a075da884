//! Report delivery.

pub mod smtp;

use async_trait::async_trait;
use thiserror::Error;

pub use smtp::SmtpNotifier;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("no recipients configured")]
    NoRecipients,

    #[error("failed to connect to relay {relay}: {source}")]
    Connect {
        relay: String,
        #[source]
        source: std::io::Error,
    },

    #[error("relay rejected '{step}': {reply}")]
    Rejected { step: String, reply: String },

    #[error("smtp protocol error: {0}")]
    Protocol(String),

    #[error("smtp exchange timed out")]
    Timeout,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// A rendered report ready to send.
#[derive(Debug, Clone)]
pub struct Notification {
    pub subject: String,
    pub sender: String,
    pub recipients: Vec<String>,
    pub html_body: String,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: &Notification) -> Result<(), NotifyError>;
}
