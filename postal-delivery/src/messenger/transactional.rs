use std::sync::Arc;

use async_trait::async_trait;
use postal_mailbox::{MailRecord, MailboxError, MailboxStore, MailboxTransaction};

use super::{Messenger, SendOutcome, callback::Completion};
use crate::error::SendError;

/// Queues records in the mailbox for the retry dispatcher
///
/// Never talks to the broker. Completion callbacks are not retained: the
/// outcome of a queued record is only observable through its status and the
/// dispatcher's events.
#[derive(Debug, Clone)]
pub struct TransactionalMessenger {
    store: Arc<dyn MailboxStore>,
}

impl TransactionalMessenger {
    #[must_use]
    pub fn new(store: Arc<dyn MailboxStore>) -> Self {
        Self { store }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn MailboxStore> {
        &self.store
    }

    /// Queue `record` inside the caller's transaction
    ///
    /// The record exists only if `tx` commits.
    ///
    /// # Errors
    /// Any store error other than a duplicate mail id
    pub async fn send_in(
        &self,
        tx: &mut dyn MailboxTransaction,
        record: MailRecord,
    ) -> Result<SendOutcome, SendError> {
        let mail_id = record.mail_id.clone();
        queued(tx.create(record).await, &mail_id)
    }
}

fn queued(
    result: postal_mailbox::Result<bool>,
    mail_id: &postal_mailbox::MailId,
) -> Result<SendOutcome, SendError> {
    match result {
        Ok(_) => {
            tracing::debug!(%mail_id, "Mail queued");
            Ok(SendOutcome::Queued)
        }
        Err(MailboxError::Duplicate(_)) => {
            tracing::debug!(%mail_id, "Mail already queued");
            Ok(SendOutcome::AlreadyQueued)
        }
        Err(err) => {
            tracing::error!(%mail_id, error = %err, "Failed to queue mail");
            Err(SendError::Store(err))
        }
    }
}

#[async_trait]
impl Messenger for TransactionalMessenger {
    async fn send(
        &self,
        record: MailRecord,
        _completion: Completion,
    ) -> Result<SendOutcome, SendError> {
        let mail_id = record.mail_id.clone();
        queued(self.store.create(record).await, &mail_id)
    }
}
