use postal_common::{clock::millis, outgoing};
use postal_mailbox::{MailRecord, MailStatus, MailboxStore, TransitionFields};

use super::RetryDispatcher;
use crate::{
    broker::{Ack, BrokerClient, Envelope},
    error::{BrokerError, RetriesExhausted},
    events::DispatchEvent,
};

/// How a claimed record was settled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Attempt {
    Sent,
    Recovered,
    Retrying,
    Dead,
    Released,
    /// The lease expired and another actor moved the record first
    Expired,
}

impl RetryDispatcher {
    /// Deliver a claimed record and settle its status
    pub(super) async fn attempt(
        &self,
        store: &dyn MailboxStore,
        broker: &dyn BrokerClient,
        record: MailRecord,
    ) -> Attempt {
        let attempt = self.deliver(store, broker, &record).await;
        self.in_flight.remove(&record.mail_id);
        attempt
    }

    async fn deliver(
        &self,
        store: &dyn MailboxStore,
        broker: &dyn BrokerClient,
        record: &MailRecord,
    ) -> Attempt {
        match store.find_sent_by_mail_id(&record.mail_id).await {
            Ok(Some(_)) => return self.settle_recovered(store, record).await,
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(
                    mail_id = %record.mail_id,
                    error = %err,
                    "Sent journal unavailable, releasing claim"
                );
                return self.release(store, record, None).await;
            }
        }

        let topic = record.recipients.topic();
        if let Some(limiter) = &self.rate_limiter
            && let Err(wait) = limiter.acquire(topic, limiter.config().max_wait()).await
        {
            tracing::debug!(
                mail_id = %record.mail_id,
                topic,
                wait_ms = wait.as_millis(),
                "Attempt throttled, releasing claim"
            );
            let due = self.clock.now_millis().saturating_add(millis(wait));
            return self.release(store, record, Some(due)).await;
        }

        let envelope = Envelope::from_record(record);
        outgoing!("Dispatching {envelope}, attempt {}", record.retries + 1);

        let timeout = self.send_timeout();
        let sent = tokio::time::timeout(timeout, broker.send(&envelope))
            .await
            .unwrap_or(Err(BrokerError::Timeout(timeout)));

        match sent {
            Ok(ack) => self.settle_sent(store, record, &ack).await,
            Err(err) => self.settle_failed(store, record, &err).await,
        }
    }

    /// Log a settle that found the record no longer in `SENDING`
    fn expired(&self, record: &MailRecord, outcome: &str) -> Attempt {
        tracing::warn!(
            mail_id = %record.mail_id,
            outcome,
            "Claim expired before the attempt settled, leaving the record to its new owner"
        );
        self.metrics.record_lost_claim();
        Attempt::Expired
    }

    async fn settle_sent(
        &self,
        store: &dyn MailboxStore,
        record: &MailRecord,
        ack: &Ack,
    ) -> Attempt {
        let now = self.clock.now_millis();
        let mail_id = &record.mail_id;

        // Journal first: a crash before the status update must not cause a resend
        if let Err(err) = store.record_sent(record, now).await {
            tracing::error!(
                %mail_id,
                error = %err,
                "Failed to journal delivered mail, a reclaimed lease may resend it"
            );
        }

        match store
            .transition_status(
                mail_id,
                MailStatus::Sending,
                MailStatus::Sent,
                TransitionFields::at(now).clear_remark(),
            )
            .await
        {
            Ok(true) => {}
            Ok(false) => tracing::warn!(
                %mail_id,
                "Claim expired before delivery was recorded, the journal will settle it"
            ),
            Err(err) => tracing::error!(
                %mail_id,
                error = %err,
                "Failed to mark mail as sent"
            ),
        }

        tracing::info!(
            %mail_id,
            topic = record.recipients.topic(),
            retries = record.retries,
            message_id = %ack.message_id,
            "Mail delivered"
        );
        self.metrics.record_attempt("sent", record.recipients.topic());
        self.events.emit(DispatchEvent::Sent {
            mail_id: mail_id.clone(),
            retries: record.retries,
        });

        Attempt::Sent
    }

    async fn settle_recovered(&self, store: &dyn MailboxStore, record: &MailRecord) -> Attempt {
        let now = self.clock.now_millis();
        let mail_id = &record.mail_id;

        match store
            .transition_status(
                mail_id,
                MailStatus::Sending,
                MailStatus::Sent,
                TransitionFields::at(now).clear_remark(),
            )
            .await
        {
            Ok(true) => {
                tracing::info!(%mail_id, "Mail already delivered, skipping broker send");
            }
            Ok(false) => return self.expired(record, "recovered"),
            Err(err) => tracing::error!(
                %mail_id,
                error = %err,
                "Failed to mark journaled mail as sent"
            ),
        }

        self.metrics.record_recovered();
        self.events.emit(DispatchEvent::Recovered {
            mail_id: mail_id.clone(),
        });

        Attempt::Recovered
    }

    async fn settle_failed(
        &self,
        store: &dyn MailboxStore,
        record: &MailRecord,
        error: &BrokerError,
    ) -> Attempt {
        let now = self.clock.now_millis();
        let mail_id = &record.mail_id;
        let topic = record.recipients.topic();
        let retries = record.retries.saturating_add(1);
        let reason = error.to_string();

        if !self.retry.should_retry(retries) {
            let fields = TransitionFields::at(now)
                .retries(retries)
                .remark(reason.clone());
            match store
                .transition_status(mail_id, MailStatus::Sending, MailStatus::Dead, fields)
                .await
            {
                Ok(true) => {}
                Ok(false) => return self.expired(record, "dead"),
                Err(err) => tracing::error!(%mail_id, error = %err, "Failed to mark mail as dead"),
            }

            let exhausted = RetriesExhausted {
                mail_id: mail_id.clone(),
                topic: topic.to_string(),
                retries,
                last_error: reason,
            };
            tracing::error!(
                %mail_id,
                topic,
                retries,
                error = %exhausted,
                "Mail moved to DEAD, manual intervention required"
            );
            self.metrics.record_dead(topic);
            self.events.emit(DispatchEvent::Dead(exhausted));

            return Attempt::Dead;
        }

        let next_retry_at = self.retry.next_retry_at(record.next_retry_at, now, retries);
        let fields = TransitionFields::at(now)
            .retries(retries)
            .next_retry_at(next_retry_at)
            .remark(reason.clone());

        match store
            .transition_status(mail_id, MailStatus::Sending, MailStatus::Failed, fields)
            .await
        {
            Ok(true) => {}
            Ok(false) => return self.expired(record, "retry"),
            Err(err) => tracing::error!(%mail_id, error = %err, "Failed to reschedule mail"),
        }

        tracing::warn!(
            %mail_id,
            topic,
            retries,
            remaining = self.retry.remaining(retries),
            next_retry_at,
            error = %error,
            "Delivery failed, scheduled for retry"
        );
        self.metrics.record_attempt("retry", topic);
        self.events.emit(DispatchEvent::Retrying {
            mail_id: mail_id.clone(),
            retries,
            next_retry_at,
            reason,
        });

        Attempt::Retrying
    }

    /// Hand the claim back without counting an attempt
    async fn release(
        &self,
        store: &dyn MailboxStore,
        record: &MailRecord,
        due: Option<i64>,
    ) -> Attempt {
        let mut fields = TransitionFields::at(self.clock.now_millis());
        if let Some(due) = due {
            fields = fields.next_retry_at(due);
        }

        if let Err(err) = store
            .transition_status(&record.mail_id, MailStatus::Sending, MailStatus::Pending, fields)
            .await
        {
            tracing::warn!(
                mail_id = %record.mail_id,
                error = %err,
                "Failed to release claim, the lease reaper will recover it"
            );
        }

        Attempt::Released
    }
}
