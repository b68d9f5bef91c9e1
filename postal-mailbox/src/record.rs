use std::{fmt, sync::Arc};

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::{MailId, Recipients};

/// Delivery state of a mail record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MailStatus {
    /// Awaiting its first attempt
    Pending,
    /// Claimed by a dispatcher, attempt in flight (lease-protected)
    Sending,
    /// Confirmed delivered
    Sent,
    /// Last attempt failed, eligible again at `next_retry_at`
    Failed,
    /// Retries exhausted, needs manual intervention
    Dead,
}

impl MailStatus {
    pub const ALL: [Self; 5] = [
        Self::Pending,
        Self::Sending,
        Self::Sent,
        Self::Failed,
        Self::Dead,
    ];

    /// Statuses a dispatcher may claim from
    pub const CLAIMABLE: [Self; 2] = [Self::Pending, Self::Failed];

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Sent | Self::Dead)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Sending => "SENDING",
            Self::Sent => "SENT",
            Self::Failed => "FAILED",
            Self::Dead => "DEAD",
        }
    }
}

impl fmt::Display for MailStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The durable unit of outbound work
///
/// All timestamps are epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailRecord {
    /// Store-assigned surrogate key, `None` until created
    pub id: Option<u64>,
    /// Idempotency key, stable across retries
    pub mail_id: MailId,
    pub recipients: Recipients,
    /// Serialized payload, opaque to the store
    pub content: Arc<[u8]>,
    /// Logical type name of the payload
    pub content_type: String,
    /// Metadata attached to the broker envelope
    #[serde(default)]
    pub properties: AHashMap<String, String>,
    /// Requested delivery time, `None` for immediate delivery
    pub post_time: Option<i64>,
    /// Whether the record went through the outbox
    pub transactional: bool,
    /// Fire-and-forget instead of waiting for the broker ack
    pub asynchronous: bool,
    pub status: MailStatus,
    /// Failed attempts that reached the broker
    pub retries: u32,
    /// Earliest time a dispatcher may attempt the record
    pub next_retry_at: i64,
    /// Last failure reason
    pub remark: Option<String>,
    pub create_time: i64,
    pub update_time: i64,
}

impl MailRecord {
    /// A fresh `PENDING` record due at `now`
    #[must_use]
    pub fn new(
        mail_id: MailId,
        recipients: Recipients,
        content: impl Into<Arc<[u8]>>,
        content_type: impl Into<String>,
        now: i64,
    ) -> Self {
        Self {
            id: None,
            mail_id,
            recipients,
            content: content.into(),
            content_type: content_type.into(),
            properties: AHashMap::default(),
            post_time: None,
            transactional: false,
            asynchronous: false,
            status: MailStatus::Pending,
            retries: 0,
            next_retry_at: now,
            remark: None,
            create_time: now,
            update_time: now,
        }
    }

    #[must_use]
    pub fn with_properties(mut self, properties: AHashMap<String, String>) -> Self {
        self.properties = properties;
        self
    }

    #[must_use]
    pub const fn with_post_time(mut self, post_time: Option<i64>) -> Self {
        self.post_time = post_time;
        self
    }

    #[must_use]
    pub const fn with_transactional(mut self, transactional: bool) -> Self {
        self.transactional = transactional;
        self
    }

    #[must_use]
    pub const fn with_asynchronous(mut self, asynchronous: bool) -> Self {
        self.asynchronous = asynchronous;
        self
    }

    /// Apply a status transition's field updates in place
    ///
    /// `next_retry_at` never moves backwards.
    pub fn apply(&mut self, to: MailStatus, fields: &TransitionFields) {
        self.status = to;
        if let Some(retries) = fields.retries {
            self.retries = retries;
        }
        if let Some(next_retry_at) = fields.next_retry_at {
            self.next_retry_at = self.next_retry_at.max(next_retry_at);
        }
        if let Some(remark) = &fields.remark {
            self.remark.clone_from(remark);
        }
        self.update_time = fields.update_time;
    }
}

/// Field updates carried by a conditional status transition
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransitionFields {
    pub retries: Option<u32>,
    pub next_retry_at: Option<i64>,
    /// `Some(None)` clears the remark
    pub remark: Option<Option<String>>,
    pub update_time: i64,
}

impl TransitionFields {
    /// Only touch `update_time`
    #[must_use]
    pub fn at(update_time: i64) -> Self {
        Self {
            update_time,
            ..Default::default()
        }
    }

    #[must_use]
    pub const fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    #[must_use]
    pub const fn next_retry_at(mut self, next_retry_at: i64) -> Self {
        self.next_retry_at = Some(next_retry_at);
        self
    }

    #[must_use]
    pub fn remark(mut self, remark: impl Into<String>) -> Self {
        self.remark = Some(Some(remark.into()));
        self
    }

    #[must_use]
    pub fn clear_remark(mut self) -> Self {
        self.remark = Some(None);
        self
    }
}
