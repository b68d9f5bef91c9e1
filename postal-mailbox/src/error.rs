//! Error types for the postal-mailbox crate.
//!
//! Store unavailability is always surfaced to the caller; the send path and
//! the dispatcher decide what a failure means for them.

use thiserror::Error;

use crate::MailId;

/// Top-level mailbox store error type.
#[derive(Debug, Error)]
pub enum MailboxError {
    /// A record with this mail id is already stored.
    #[error("Mail already exists: {0}")]
    Duplicate(MailId),

    /// The backing store cannot be reached or refused the operation.
    #[error("Mailbox store unavailable: {0}")]
    Unavailable(String),

    /// The store has a capacity limit and it is reached.
    #[error("Mailbox capacity exceeded: {used}/{capacity} records")]
    CapacityExceeded { used: usize, capacity: usize },

    /// Routing address is malformed.
    #[error("Invalid recipients: {0}")]
    InvalidRecipients(String),

    /// Caller-supplied mail id is malformed.
    #[error("Invalid mail id: '{0}'")]
    InvalidMailId(String),
}

impl MailboxError {
    /// Returns `true` for failures that may succeed when retried later.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::CapacityExceeded { .. })
    }

    #[must_use]
    pub const fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate(_))
    }
}

/// Specialized `Result` type for mailbox operations.
pub type Result<T> = std::result::Result<T, MailboxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(MailboxError::Unavailable("down".into()).is_transient());
        assert!(
            MailboxError::CapacityExceeded {
                used: 2,
                capacity: 2
            }
            .is_transient()
        );
        assert!(!MailboxError::Duplicate(MailId::generate()).is_transient());
        assert!(MailboxError::Duplicate(MailId::generate()).is_duplicate());
    }

    #[test]
    fn messages() {
        let err = MailboxError::CapacityExceeded {
            used: 3,
            capacity: 3,
        };
        assert!(err.to_string().contains("3/3"));
    }
}
