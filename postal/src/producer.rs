//! Typed send API
//!
//! A [`Producer`] turns a [`Mail`] into a [`MailRecord`] and picks how it
//! leaves the process:
//!
//! | message       | `direct` | `transactional` | path                       |
//! |---------------|----------|-----------------|----------------------------|
//! | synchronous   | any      | `false`         | broker now (rate limited?) |
//! | asynchronous  | `true`   | `false`         | broker now (rate limited?) |
//! | asynchronous  | `false`  | `false`         | mailbox                    |
//! | any           | any      | `true`          | mailbox                    |

use std::sync::Arc;

use ahash::AHashMap;
use postal_common::{Clock, SystemClock, TaskLocalTrace, TraceSource, clock::millis};
use postal_delivery::{
    Ack, BrokerClient, Completion, Messenger, RateLimitConfig, RateLimitedMessenger, RateLimiter,
    SendCallback, SendError, SendOutcome, SendStrategy, SimpleMessenger, TransactionalMessenger,
    ValidationError, broker::headers,
};
use postal_mailbox::{
    MailId, MailRecord, MailboxError, MailboxStore, MailboxTransaction, Recipients,
};
use serde::Deserialize;

use crate::{codec::Codec, mail::Mail};

/// Where and how a producer sends
///
/// ```ron
/// (
///     topic: "orders",
///     group: Some("billing"),
///     transactional: true,
///     mandatory_properties: { "source": "order-service" },
///     optional_properties: { "priority": "normal" },
/// )
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProducerConfig {
    pub topic: String,

    /// Default consumer group carried to the broker
    #[serde(default)]
    pub group: Option<String>,

    /// Send asynchronous mail straight to the broker instead of the mailbox
    #[serde(default)]
    pub direct: bool,

    /// Route every send through the mailbox
    #[serde(default)]
    pub transactional: bool,

    #[serde(default)]
    pub codec: Codec,

    /// Properties set on every send, overriding the caller's
    #[serde(default)]
    pub mandatory_properties: AHashMap<String, String>,

    /// Properties set on every send unless the caller provides them
    #[serde(default)]
    pub optional_properties: AHashMap<String, String>,

    /// Throttle direct sends
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
}

/// Per-send overrides
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub tag: Option<String>,
    pub group: Option<String>,
    pub properties: AHashMap<String, String>,
    /// Caller-chosen idempotency key, generated when absent
    pub mail_id: Option<String>,
}

impl SendOptions {
    #[must_use]
    pub fn tagged(tag: impl Into<String>) -> Self {
        Self {
            tag: Some(tag.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    #[must_use]
    pub fn property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn mail_id(mut self, mail_id: impl Into<String>) -> Self {
        self.mail_id = Some(mail_id.into());
        self
    }
}

/// Merge envelope properties
///
/// Later layers win: optional defaults, then the caller's, then mandatory
/// defaults, then the keys the producer owns. Reserved keys are only ever
/// taken from `owned`.
#[must_use]
pub fn merge_properties(
    optional: &AHashMap<String, String>,
    caller: &AHashMap<String, String>,
    mandatory: &AHashMap<String, String>,
    owned: &[(&str, String)],
) -> AHashMap<String, String> {
    let mut merged = AHashMap::with_capacity(optional.len() + caller.len() + owned.len());
    for (key, value) in optional.iter().chain(caller).chain(mandatory) {
        if headers::RESERVED.contains(&key.as_str()) {
            tracing::debug!(key, "Ignoring reserved property");
            continue;
        }
        merged.insert(key.clone(), value.clone());
    }
    merged.extend(owned.iter().map(|(k, v)| ((*k).to_string(), v.clone())));
    merged
}

type SuccessHook<M> = Arc<dyn Fn(&M) + Send + Sync>;
type ErrorHook<M> = Arc<dyn Fn(&M, &SendError) + Send + Sync>;

/// Adapts typed producer hooks to the record-level [`SendCallback`]
struct Hooks<M> {
    codec: Codec,
    on_success: Option<SuccessHook<M>>,
    on_error: Option<ErrorHook<M>>,
}

impl<M: Mail> Hooks<M> {
    fn decode(&self, record: &MailRecord) -> Option<M> {
        self.codec
            .decode(&record.content)
            .inspect_err(|err| {
                tracing::warn!(
                    mail_id = %record.mail_id,
                    error = %err,
                    "Cannot decode sent mail for its completion hook"
                );
            })
            .ok()
    }
}

impl<M: Mail> SendCallback for Hooks<M> {
    fn on_success(&self, record: &MailRecord, _ack: &Ack) {
        if let Some(hook) = &self.on_success
            && let Some(message) = self.decode(record)
        {
            hook(&message);
        }
    }

    fn on_error(&self, record: &MailRecord, error: &SendError) {
        if let Some(hook) = &self.on_error
            && let Some(message) = self.decode(record)
        {
            hook(&message, error);
        }
    }
}

/// Sends `M` to one topic
pub struct Producer<M> {
    config: ProducerConfig,
    clock: Arc<dyn Clock>,
    trace: Arc<dyn TraceSource>,
    simple: SimpleMessenger,
    rate_limited: Option<RateLimitedMessenger>,
    transactional: Option<TransactionalMessenger>,
    on_success: Option<SuccessHook<M>>,
    on_error: Option<ErrorHook<M>>,
}

impl<M> std::fmt::Debug for Producer<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Producer")
            .field("config", &self.config)
            .field("transactional", &self.transactional.is_some())
            .finish_non_exhaustive()
    }
}

fn invalid_recipients(err: MailboxError) -> ValidationError {
    match err {
        MailboxError::InvalidRecipients(reason) => ValidationError::InvalidRecipients(reason),
        other => ValidationError::InvalidRecipients(other.to_string()),
    }
}

impl<M: Mail> Producer<M> {
    /// Build a producer sending directly through `broker`
    ///
    /// Attach a mailbox with [`with_mailbox`](Self::with_mailbox) before any
    /// send takes the transactional path.
    ///
    /// # Errors
    /// If the configured topic or group is not a valid address component
    pub fn new(
        config: ProducerConfig,
        broker: Arc<dyn BrokerClient>,
    ) -> Result<Self, ValidationError> {
        Recipients::new(config.topic.clone(), None, config.group.clone())
            .map_err(invalid_recipients)?;

        let simple = SimpleMessenger::new(broker);
        let rate_limited = config.rate_limit.clone().map(|rate_limit| {
            RateLimitedMessenger::new(simple.clone(), Arc::new(RateLimiter::new(rate_limit)))
        });

        Ok(Self {
            config,
            clock: Arc::new(SystemClock),
            trace: Arc::new(TaskLocalTrace),
            simple,
            rate_limited,
            transactional: None,
            on_success: None,
            on_error: None,
        })
    }

    #[must_use]
    pub fn with_mailbox(mut self, store: Arc<dyn MailboxStore>) -> Self {
        self.transactional = Some(TransactionalMessenger::new(store));
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_trace_source(mut self, trace: Arc<dyn TraceSource>) -> Self {
        self.trace = trace;
        self
    }

    /// Called with the message after the broker accepted a direct send
    #[must_use]
    pub fn on_success(mut self, hook: impl Fn(&M) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Arc::new(hook));
        self
    }

    /// Called with the message after a direct send failed
    #[must_use]
    pub fn on_error(mut self, hook: impl Fn(&M, &SendError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(hook));
        self
    }

    #[must_use]
    pub const fn config(&self) -> &ProducerConfig {
        &self.config
    }

    /// The path a send of `message` takes
    #[must_use]
    pub fn strategy(&self, message: &M) -> SendStrategy {
        if (!message.is_async() || self.config.direct) && !self.config.transactional {
            if self.rate_limited.is_some() {
                SendStrategy::RateLimited
            } else {
                SendStrategy::Simple
            }
        } else {
            SendStrategy::Transactional
        }
    }

    /// Send `message` with an optional tag
    ///
    /// # Errors
    /// See [`send_with`](Self::send_with)
    pub async fn send(&self, message: &M, tag: Option<&str>) -> Result<SendOutcome, SendError> {
        let options = SendOptions {
            tag: tag.map(str::to_string),
            ..SendOptions::default()
        };
        self.send_with(message, options).await
    }

    /// Send `message` with per-send overrides
    ///
    /// # Errors
    /// Validation and serialization failures, store failures on the
    /// transactional path, and broker failures of synchronous direct sends
    pub async fn send_with(
        &self,
        message: &M,
        options: SendOptions,
    ) -> Result<SendOutcome, SendError> {
        let strategy = self.strategy(message);
        let record = self.build_record(message, options, strategy)?;

        tracing::debug!(
            mail_id = %record.mail_id,
            recipients = %record.recipients,
            %strategy,
            "Sending mail"
        );

        match strategy {
            SendStrategy::Simple => self.simple.send(record, self.completion()).await,
            SendStrategy::RateLimited => match &self.rate_limited {
                Some(messenger) => messenger.send(record, self.completion()).await,
                None => self.simple.send(record, self.completion()).await,
            },
            SendStrategy::Transactional => self.transactional()?.send(record, None).await,
        }
    }

    /// Queue `message` inside the caller's mailbox transaction
    ///
    /// Always takes the transactional path; the record exists only if `tx`
    /// commits.
    ///
    /// # Errors
    /// Validation and serialization failures and store failures
    pub async fn send_in(
        &self,
        tx: &mut dyn MailboxTransaction,
        message: &M,
        options: SendOptions,
    ) -> Result<SendOutcome, SendError> {
        let record = self.build_record(message, options, SendStrategy::Transactional)?;
        self.transactional()?.send_in(tx, record).await
    }

    fn transactional(&self) -> Result<&TransactionalMessenger, SendError> {
        self.transactional
            .as_ref()
            .ok_or(SendError::NotConfigured("mailbox for transactional sends"))
    }

    fn completion(&self) -> Completion {
        if self.on_success.is_none() && self.on_error.is_none() {
            return None;
        }
        Some(Arc::new(Hooks {
            codec: self.config.codec,
            on_success: self.on_success.clone(),
            on_error: self.on_error.clone(),
        }))
    }

    fn build_record(
        &self,
        message: &M,
        options: SendOptions,
        strategy: SendStrategy,
    ) -> Result<MailRecord, SendError> {
        message.validate()?;

        if let Some(tag) = &options.tag
            && (tag.is_empty() || tag.contains(':') || tag.chars().any(char::is_whitespace))
        {
            return Err(ValidationError::InvalidTag(tag.clone()).into());
        }

        let group = options.group.or_else(|| self.config.group.clone());
        let recipients = Recipients::new(self.config.topic.clone(), options.tag, group)
            .map_err(invalid_recipients)?;

        let mail_id = match options.mail_id {
            Some(key) => MailId::parse(key)
                .map_err(|err| ValidationError::InvalidMailId(err.to_string()))?,
            None => MailId::generate(),
        };

        let content = self
            .config
            .codec
            .encode(message)
            .map_err(|err| SendError::Serialization(err.to_string()))?;

        let now = self.clock.now_millis();
        let delay = message.delay();
        let post_time = (!delay.is_zero()).then(|| now.saturating_add(millis(delay)));

        let mut owned = vec![
            (headers::CONTENT_TYPE, M::content_type().to_string()),
            (headers::CODEC, self.config.codec.name().to_string()),
            (headers::MAIL_ID, mail_id.to_string()),
        ];
        if let Some(trace_id) = self.trace.trace_id() {
            owned.push((headers::TRACE_ID, trace_id));
        }

        let properties = merge_properties(
            &self.config.optional_properties,
            &options.properties,
            &self.config.mandatory_properties,
            &owned,
        );

        Ok(MailRecord::new(mail_id, recipients, content, M::content_type(), now)
            .with_properties(properties)
            .with_post_time(post_time)
            .with_asynchronous(message.is_async())
            .with_transactional(strategy == SendStrategy::Transactional))
    }
}
