//! Transactional outbox messaging
//!
//! Typed [`Producer`]s send [`Mail`] either straight to the broker or through
//! the mailbox, from where the [`RetryDispatcher`] delivers it with retries.
//! On the consuming side a [`ListenerRegistry`] routes envelopes to handlers.
//!
//! ```ignore
//! let postal: Postal = postal::config::load(&postal::config::find_config_file()?)?;
//! let outbox = postal.init(broker)?;
//!
//! let orders = outbox.producer::<OrderCreated>("orders")?;
//! orders.send(&OrderCreated { order_id: 42 }, Some("created")).await?;
//!
//! outbox.run().await
//! ```

pub mod codec;
pub mod config;
pub mod controller;
pub mod listener;
pub mod mail;
pub mod producer;

pub use codec::{Codec, CodecError};
pub use controller::{Outbox, Postal, SHUTDOWN_BROADCAST};
pub use listener::{Acknowledgement, ListenerRegistry};
pub use mail::Mail;
pub use postal_common::{Signal, tracing};
pub use postal_delivery::{
    Ack, BrokerClient, BrokerError, DispatchEvent, Envelope, RetryDispatcher, SendError,
    SendOutcome, SendStrategy, ValidationError,
};
pub use postal_mailbox::{MailId, MailRecord, MailStatus, MailboxStore, MailboxTransaction};
pub use producer::{Producer, ProducerConfig, SendOptions};
