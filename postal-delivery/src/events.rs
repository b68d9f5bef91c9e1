//! Dispatch outcomes broadcast to interested observers
//!
//! Events are informational. Nothing in the delivery path waits on a
//! subscriber, and a lagging subscriber only loses events.

use postal_mailbox::MailId;
use tokio::sync::broadcast;

use crate::error::RetriesExhausted;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchEvent {
    /// The broker accepted the record
    Sent { mail_id: MailId, retries: u32 },
    /// A journaled delivery was found and the record marked sent without a
    /// second broker call
    Recovered { mail_id: MailId },
    /// The attempt failed and the record was rescheduled
    Retrying {
        mail_id: MailId,
        retries: u32,
        next_retry_at: i64,
        reason: String,
    },
    /// The record ran out of retries
    Dead(RetriesExhausted),
    /// An expired `SENDING` lease was returned to `PENDING`
    Reclaimed { mail_id: MailId },
}

impl DispatchEvent {
    #[must_use]
    pub const fn mail_id(&self) -> &MailId {
        match self {
            Self::Sent { mail_id, .. }
            | Self::Recovered { mail_id }
            | Self::Retrying { mail_id, .. }
            | Self::Reclaimed { mail_id }
            | Self::Dead(RetriesExhausted { mail_id, .. }) => mail_id,
        }
    }
}

/// Sending half of the dispatch event channel
#[derive(Debug, Clone)]
pub struct DispatchEvents {
    sender: broadcast::Sender<DispatchEvent>,
}

impl Default for DispatchEvents {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }
}

impl DispatchEvents {
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.sender.subscribe()
    }

    pub(crate) fn emit(&self, event: DispatchEvent) {
        // No receivers is the common case
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test]
    async fn subscribers_receive_events() {
        let events = DispatchEvents::default();
        events.emit(DispatchEvent::Reclaimed {
            mail_id: MailId::generate(),
        });

        let mut rx = events.subscribe();
        let mail_id = MailId::generate();
        events.emit(DispatchEvent::Sent {
            mail_id: mail_id.clone(),
            retries: 2,
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.mail_id(), &mail_id);
        assert_eq!(
            event,
            DispatchEvent::Sent {
                mail_id,
                retries: 2
            }
        );
    }
}
