use postal_common::clock::millis;
use postal_mailbox::{MailStatus, MailboxStore, Result, TransitionFields};

use super::RetryDispatcher;
use crate::events::DispatchEvent;

impl RetryDispatcher {
    /// Return `SENDING` records whose lease expired to `PENDING`
    ///
    /// The retry counter is left alone: the attempt may never have reached
    /// the broker, and if it did the sent journal prevents a second send.
    pub(super) async fn reclaim_expired_leases(&self, store: &dyn MailboxStore) -> Result<usize> {
        let now = self.clock.now_millis();
        let cutoff = now.saturating_sub(millis(self.lease()));
        let mut reclaimed = 0;

        while let Some(stale) = store
            .find_stale_for_status(MailStatus::Sending, cutoff)
            .await?
        {
            if self.in_flight.contains(&stale.mail_id) {
                tracing::warn!(
                    mail_id = %stale.mail_id,
                    "Own delivery outlived its lease, deferring reclaim"
                );
                break;
            }

            let moved = store
                .transition_status(
                    &stale.mail_id,
                    MailStatus::Sending,
                    MailStatus::Pending,
                    TransitionFields::at(now),
                )
                .await?;

            if moved {
                tracing::warn!(
                    mail_id = %stale.mail_id,
                    claimed_at = stale.update_time,
                    "Reclaimed expired lease"
                );
                self.metrics.record_reclaimed();
                self.events.emit(DispatchEvent::Reclaimed {
                    mail_id: stale.mail_id,
                });
                reclaimed += 1;
            }
        }

        Ok(reclaimed)
    }

    /// Return every claim still held by this process to `PENDING`
    pub(super) async fn release_abandoned(&self, store: &dyn MailboxStore) {
        let abandoned: Vec<_> = self.in_flight.iter().map(|id| id.key().clone()).collect();
        let now = self.clock.now_millis();

        for mail_id in abandoned {
            match store
                .transition_status(
                    &mail_id,
                    MailStatus::Sending,
                    MailStatus::Pending,
                    TransitionFields::at(now),
                )
                .await
            {
                Ok(true) => tracing::info!(%mail_id, "Released abandoned claim"),
                Ok(false) => {}
                Err(err) => tracing::error!(
                    %mail_id,
                    error = %err,
                    "Failed to release abandoned claim, the lease reaper will recover it"
                ),
            }
            self.in_flight.remove(&mail_id);
        }
    }

    /// Remove `SENT` and `DEAD` records past the retention window
    pub(super) async fn purge_expired(&self, store: &dyn MailboxStore) -> Result<usize> {
        let Some(retention_secs) = self.retention_secs else {
            return Ok(0);
        };

        let retention = std::time::Duration::from_secs(retention_secs);
        let cutoff = self.clock.now_millis().saturating_sub(millis(retention));
        let purged = store
            .purge(&[MailStatus::Sent, MailStatus::Dead], cutoff)
            .await?;

        if purged > 0 {
            tracing::info!(purged, "Purged expired mail");
        }

        Ok(purged)
    }
}
