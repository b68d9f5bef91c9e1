use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use postal_mailbox::MailRecord;

use super::{Messenger, SendOutcome, callback::Completion, simple::SimpleMessenger};
use crate::{error::SendError, rate_limiter::RateLimiter};

/// A [`SimpleMessenger`] gated by a per-topic token bucket
#[derive(Debug, Clone)]
pub struct RateLimitedMessenger {
    inner: SimpleMessenger,
    limiter: Arc<RateLimiter>,
    max_wait: Duration,
}

impl RateLimitedMessenger {
    #[must_use]
    pub fn new(inner: SimpleMessenger, limiter: Arc<RateLimiter>) -> Self {
        let max_wait = limiter.config().max_wait();
        Self {
            inner,
            limiter,
            max_wait,
        }
    }

    #[must_use]
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }
}

#[async_trait]
impl Messenger for RateLimitedMessenger {
    async fn send(
        &self,
        record: MailRecord,
        completion: Completion,
    ) -> Result<SendOutcome, SendError> {
        let topic = record.recipients.topic();
        if let Err(wait) = self.limiter.acquire(topic, self.max_wait).await {
            tracing::warn!(
                mail_id = %record.mail_id,
                topic,
                wait_ms = wait.as_millis(),
                "Send throttled"
            );
            return Err(SendError::RateLimited { wait });
        }

        self.inner.send(record, completion).await
    }
}
