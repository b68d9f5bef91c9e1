//! Delivery of mail records to the message broker
//!
//! This crate provides:
//! - The broker boundary ([`BrokerClient`], [`Envelope`])
//! - Messengers for direct, rate-limited and transactional sends
//! - The [`RetryDispatcher`], which drains the mailbox with claim, backoff and
//!   lease recovery

pub mod broker;
mod dispatcher;
mod error;
pub mod events;
pub mod messenger;
mod metrics;
pub mod policy;
pub mod rate_limiter;

pub use broker::{Ack, BrokerClient, Envelope};
pub use dispatcher::{DrainReport, RetryDispatcher};
pub use error::{BrokerError, DispatchError, RetriesExhausted, SendError, ValidationError};
pub use events::DispatchEvent;
pub use messenger::{
    Completion, Messenger, RateLimitedMessenger, SendCallback, SendOutcome, SendStrategy,
    SimpleMessenger, TransactionalMessenger,
};
pub use metrics::DispatchMetrics;
pub use policy::RetryPolicy;
pub use rate_limiter::{RateLimitConfig, RateLimiter, TopicRateLimit};
