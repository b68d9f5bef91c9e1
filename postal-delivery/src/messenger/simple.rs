use std::sync::Arc;

use async_trait::async_trait;
use postal_common::outgoing;
use postal_mailbox::MailRecord;

use super::{
    Messenger, SendOutcome,
    callback::{Completion, notify_error, notify_success},
};
use crate::{
    broker::{BrokerClient, Envelope},
    error::SendError,
};

/// Sends straight to the broker
///
/// Synchronous records wait for the broker and return its result. Records
/// flagged asynchronous are handed to a spawned task and reported through the
/// completion callback only.
#[derive(Debug, Clone)]
pub struct SimpleMessenger {
    broker: Arc<dyn BrokerClient>,
}

impl SimpleMessenger {
    #[must_use]
    pub fn new(broker: Arc<dyn BrokerClient>) -> Self {
        Self { broker }
    }
}

#[async_trait]
impl Messenger for SimpleMessenger {
    async fn send(
        &self,
        record: MailRecord,
        completion: Completion,
    ) -> Result<SendOutcome, SendError> {
        let envelope = Envelope::from_record(&record);
        outgoing!("Sending {envelope} directly");

        if record.asynchronous {
            let broker = Arc::clone(&self.broker);
            tokio::spawn(async move {
                match broker.send(&envelope).await {
                    Ok(ack) => notify_success(completion.as_deref(), &record, &ack),
                    Err(err) => {
                        tracing::warn!(
                            mail_id = %record.mail_id,
                            topic = %envelope.topic,
                            error = %err,
                            "Asynchronous send failed"
                        );
                        notify_error(completion.as_deref(), &record, &SendError::Broker(err));
                    }
                }
            });
            return Ok(SendOutcome::Dispatched);
        }

        match self.broker.send(&envelope).await {
            Ok(ack) => {
                tracing::debug!(
                    mail_id = %record.mail_id,
                    message_id = %ack.message_id,
                    "Broker accepted direct send"
                );
                notify_success(completion.as_deref(), &record, &ack);
                Ok(SendOutcome::Delivered(ack))
            }
            Err(err) => {
                let err = SendError::Broker(err);
                notify_error(completion.as_deref(), &record, &err);
                Err(err)
            }
        }
    }
}
