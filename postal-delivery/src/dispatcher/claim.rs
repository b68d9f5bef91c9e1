use postal_mailbox::{MailRecord, MailStatus, MailboxStore, Result, TransitionFields};

use super::RetryDispatcher;

pub(super) enum Claim {
    /// The record is ours, already in `SENDING`
    Won(MailRecord),
    /// Another dispatcher moved the candidate first
    Lost,
    /// Nothing is due
    Idle,
}

/// Whether `found` is due before `current`, ties broken by store id
fn due_sooner(found: &MailRecord, current: &MailRecord) -> bool {
    (found.next_retry_at, found.id) < (current.next_retry_at, current.id)
}

impl RetryDispatcher {
    /// Claim the oldest-due record across every claimable status
    pub(super) async fn claim_next(&self, store: &dyn MailboxStore) -> Result<Claim> {
        let now = self.clock.now_millis();

        let mut oldest: Option<MailRecord> = None;
        for status in MailStatus::CLAIMABLE {
            if let Some(found) = store.find_due_for_status(status, now).await?
                && oldest.as_ref().is_none_or(|current| due_sooner(&found, current))
            {
                oldest = Some(found);
            }
        }

        let Some(mut candidate) = oldest else {
            return Ok(Claim::Idle);
        };
        let status = candidate.status;

        let fields = TransitionFields::at(now);
        let won = store
            .transition_status(&candidate.mail_id, status, MailStatus::Sending, fields.clone())
            .await?;

        if !won {
            tracing::debug!(
                mail_id = %candidate.mail_id,
                from = %status,
                "Lost claim to another dispatcher"
            );
            self.metrics.record_lost_claim();
            return Ok(Claim::Lost);
        }

        candidate.apply(MailStatus::Sending, &fields);
        self.in_flight.insert(candidate.mail_id.clone());

        tracing::trace!(
            mail_id = %candidate.mail_id,
            from = %status,
            retries = candidate.retries,
            "Claimed mail"
        );

        Ok(Claim::Won(candidate))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use postal_mailbox::{MailId, Recipients};

    use super::*;

    fn due_at(next_retry_at: i64, id: u64) -> MailRecord {
        let mut record = MailRecord::new(
            MailId::generate(),
            Recipients::new("orders", None, None).unwrap(),
            b"".as_slice(),
            "Empty",
            next_retry_at,
        );
        record.id = Some(id);
        record
    }

    #[test]
    fn earlier_due_time_wins_then_lower_id() {
        assert!(due_sooner(&due_at(1_000, 9), &due_at(2_000, 1)));
        assert!(!due_sooner(&due_at(2_000, 1), &due_at(1_000, 9)));
        assert!(due_sooner(&due_at(1_000, 1), &due_at(1_000, 2)));
    }
}
