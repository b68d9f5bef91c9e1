use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
};

use postal_mailbox::MailRecord;

use crate::{broker::Ack, error::SendError};

/// Completion hooks for a direct send
///
/// Both hooks receive the record that was sent. They run on the task that
/// observed the broker result and must not block.
pub trait SendCallback: Send + Sync {
    fn on_success(&self, record: &MailRecord, ack: &Ack);

    fn on_error(&self, record: &MailRecord, error: &SendError);
}

/// Optional shared callback handed to a messenger
pub type Completion = Option<Arc<dyn SendCallback>>;

/// Run the success hook, containing any panic
pub(crate) fn notify_success(callback: Option<&dyn SendCallback>, record: &MailRecord, ack: &Ack) {
    let Some(callback) = callback else {
        return;
    };

    if catch_unwind(AssertUnwindSafe(|| callback.on_success(record, ack))).is_err() {
        tracing::error!(
            mail_id = %record.mail_id,
            "Send success callback panicked"
        );
    }
}

/// Run the error hook, containing any panic
pub(crate) fn notify_error(
    callback: Option<&dyn SendCallback>,
    record: &MailRecord,
    error: &SendError,
) {
    let Some(callback) = callback else {
        return;
    };

    if catch_unwind(AssertUnwindSafe(|| callback.on_error(record, error))).is_err() {
        tracing::error!(
            mail_id = %record.mail_id,
            %error,
            "Send error callback panicked"
        );
    }
}
