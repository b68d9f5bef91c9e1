//! Broker client boundary
//!
//! The broker wire format is out of scope; an [`Envelope`] carries exactly
//! what any broker needs: topic/tag/group addressing, an opaque body, string
//! properties, an optional delivery time and the ordering key.

use std::{fmt, sync::Arc};

use ahash::AHashMap;
use async_trait::async_trait;
use postal_mailbox::{MailId, MailRecord};

use crate::error::BrokerError;

/// Property keys owned by the producer
pub mod headers {
    /// Logical payload type, used to route to a listener
    pub const CONTENT_TYPE: &str = "contentType";
    /// Name of the codec the body was encoded with
    pub const CODEC: &str = "codec";
    /// Idempotency key of the originating record
    pub const MAIL_ID: &str = "mailId";
    /// Correlation id of the sending request
    pub const TRACE_ID: &str = "traceId";

    /// Keys callers may not set through default or per-send properties
    pub const RESERVED: [&str; 4] = [CONTENT_TYPE, CODEC, MAIL_ID, TRACE_ID];
}

/// A message as handed to the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub topic: String,
    pub tag: Option<String>,
    pub group: Option<String>,
    pub body: Arc<[u8]>,
    pub properties: AHashMap<String, String>,
    /// Scheduled delivery time in epoch millis
    pub deliver_at: Option<i64>,
    /// Ordering and deduplication key
    pub key: String,
}

impl Envelope {
    #[must_use]
    pub fn from_record(record: &MailRecord) -> Self {
        let recipients = &record.recipients;
        Self {
            topic: recipients.topic().to_string(),
            tag: recipients.tag().map(str::to_string),
            group: recipients.group().map(str::to_string),
            body: Arc::clone(&record.content),
            properties: record.properties.clone(),
            deliver_at: record.post_time,
            key: record.mail_id.to_string(),
        }
    }

    #[must_use]
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.property(headers::CONTENT_TYPE)
    }

    /// The mail id this envelope was built from, when it carries one
    #[must_use]
    pub fn mail_id(&self) -> Option<MailId> {
        self.property(headers::MAIL_ID)
            .and_then(|id| MailId::parse(id).ok())
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.topic)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        write!(f, " [{}]", self.key)
    }
}

/// Broker acknowledgement of an accepted envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    /// Broker-assigned message id
    pub message_id: String,
}

impl Ack {
    #[must_use]
    pub fn new(message_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
        }
    }
}

/// Client for the message broker
///
/// `send` resolves once the broker has accepted (or refused) the envelope.
/// Fire-and-forget sends are built on top by spawning this call.
#[async_trait]
pub trait BrokerClient: Send + Sync + fmt::Debug {
    /// # Errors
    /// Any [`BrokerError`] the broker or transport reports
    async fn send(&self, envelope: &Envelope) -> Result<Ack, BrokerError>;
}
