//! Send paths for a built mail record
//!
//! - [`SimpleMessenger`] hands the record to the broker now
//! - [`RateLimitedMessenger`] does the same behind a token bucket
//! - [`TransactionalMessenger`] stores it for the retry dispatcher

mod callback;
mod rate_limited;
mod simple;
mod transactional;

use std::fmt;

use async_trait::async_trait;
pub use callback::{Completion, SendCallback};
use postal_mailbox::MailRecord;
pub use rate_limited::RateLimitedMessenger;
use serde::{Deserialize, Serialize};
pub use simple::SimpleMessenger;
pub use transactional::TransactionalMessenger;

use crate::{broker::Ack, error::SendError};

/// Which messenger a send goes through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SendStrategy {
    Simple,
    RateLimited,
    Transactional,
}

impl fmt::Display for SendStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Simple => "simple",
            Self::RateLimited => "rate-limited",
            Self::Transactional => "transactional",
        })
    }
}

/// Result of a successful send call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The broker acknowledged a synchronous direct send
    Delivered(Ack),
    /// An asynchronous direct send was handed off; see the callback
    Dispatched,
    /// The record was stored for the dispatcher
    Queued,
    /// A record with the same mail id was already stored
    AlreadyQueued,
}

#[async_trait]
pub trait Messenger: Send + Sync + fmt::Debug {
    /// # Errors
    /// Failures that happen before the record is durably queued or, for a
    /// synchronous direct send, the broker's failure
    async fn send(
        &self,
        record: MailRecord,
        completion: Completion,
    ) -> Result<SendOutcome, SendError>;
}
