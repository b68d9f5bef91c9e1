//! Error types for sending and dispatching mail.
//!
//! Failures before a record is durably queued are returned to the caller as
//! [`SendError`]. Failures after queuing never escape the dispatcher: a
//! [`BrokerError`] becomes the record's `remark`, and exhaustion is reported
//! through [`RetriesExhausted`] on the event channel.

use std::time::Duration;

use postal_mailbox::{MailId, MailboxError};
use thiserror::Error;

/// Error returned to the caller of a send
#[derive(Debug, Error)]
pub enum SendError {
    /// The message or its routing was rejected before any I/O.
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// The payload could not be encoded.
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// The mailbox store rejected or could not persist the record.
    #[error("Mailbox store error: {0}")]
    Store(#[from] MailboxError),

    /// A direct send reached the broker and failed.
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    /// No send token became available within the allowed wait.
    #[error("Rate limited, next token in {wait:?}")]
    RateLimited { wait: Duration },

    /// The chosen send path needs a component that was not provided.
    #[error("Not configured: {0}")]
    NotConfigured(&'static str),
}

impl SendError {
    /// Returns `true` when retrying the same send later may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Store(err) => err.is_transient(),
            Self::Broker(err) => err.is_retryable(),
            Self::RateLimited { .. } => true,
            Self::Validation(_) | Self::Serialization(_) | Self::NotConfigured(_) => false,
        }
    }
}

/// A message or routing problem detected before any I/O
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid tag '{0}'")]
    InvalidTag(String),

    #[error("Invalid recipients: {0}")]
    InvalidRecipients(String),

    #[error("Invalid mail id '{0}'")]
    InvalidMailId(String),

    /// Rejected by the message's own validation.
    #[error("{0}")]
    Message(String),
}

/// Failure of a single broker send
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrokerError {
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    #[error("Broker rejected the message: {0}")]
    Rejected(String),

    #[error("Broker timed out after {0:?}")]
    Timeout(Duration),
}

impl BrokerError {
    /// Every broker failure is retried by the dispatcher; this only tells a
    /// direct sender whether an immediate resend is worth it.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout(_))
    }
}

/// A record reached its retry limit and was moved to `DEAD`
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Retries exhausted for {mail_id} after {retries} attempts: {last_error}")]
pub struct RetriesExhausted {
    pub mail_id: MailId,
    pub topic: String,
    pub retries: u32,
    pub last_error: String,
}

/// Dispatcher lifecycle errors
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Dispatcher not initialized: {0}")]
    NotInitialized(String),

    #[error("Mailbox store error: {0}")]
    Store(#[from] MailboxError),
}
