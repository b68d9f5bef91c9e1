use async_trait::async_trait;

use crate::{MailId, MailRecord, MailStatus, Result, TransitionFields};

/// Persistence boundary for mail records
///
/// Implementations must provide `transition_status` as a single atomic
/// compare-and-swap on the record's current status. This is the only
/// concurrency control between dispatcher replicas; an engine without row
/// level conditional updates needs a version column and a compare-and-retry
/// loop to qualify.
#[async_trait]
pub trait MailboxStore: Send + Sync + std::fmt::Debug {
    /// Insert a new record, assigning its surrogate id
    ///
    /// # Errors
    /// [`MailboxError::Duplicate`](crate::MailboxError::Duplicate) when the
    /// mail id is already stored, or any store failure
    async fn create(&self, record: MailRecord) -> Result<bool>;

    /// The oldest-due record in `status` with `next_retry_at <= not_after`
    ///
    /// # Errors
    /// If the store cannot be read
    async fn find_due_for_status(
        &self,
        status: MailStatus,
        not_after: i64,
    ) -> Result<Option<MailRecord>>;

    /// Move a record from `from` to `to` if it is still in `from`
    ///
    /// Returns `Ok(false)` when another actor already moved it (or it no
    /// longer exists).
    ///
    /// # Errors
    /// If the store cannot be written
    async fn transition_status(
        &self,
        mail_id: &MailId,
        from: MailStatus,
        to: MailStatus,
        fields: TransitionFields,
    ) -> Result<bool>;

    /// Journal a broker-confirmed delivery
    ///
    /// # Errors
    /// If the store cannot be written
    async fn record_sent(&self, record: &MailRecord, sent_at: i64) -> Result<()>;

    /// The journaled delivery for `mail_id`, if the broker confirmed one
    ///
    /// # Errors
    /// If the store cannot be read
    async fn find_sent_by_mail_id(&self, mail_id: &MailId) -> Result<Option<MailRecord>>;

    /// A record in `status` last updated before `updated_before`
    ///
    /// # Errors
    /// If the store cannot be read
    async fn find_stale_for_status(
        &self,
        status: MailStatus,
        updated_before: i64,
    ) -> Result<Option<MailRecord>>;

    /// # Errors
    /// If the store cannot be read
    async fn get(&self, mail_id: &MailId) -> Result<Option<MailRecord>>;

    /// # Errors
    /// If the store cannot be written
    async fn remove(&self, mail_id: &MailId) -> Result<bool>;

    /// Remove records in any of `statuses` last updated before `updated_before`
    ///
    /// # Errors
    /// If the store cannot be written
    async fn purge(&self, statuses: &[MailStatus], updated_before: i64) -> Result<usize>;

    /// Number of records per status, for diagnostics
    ///
    /// # Errors
    /// If the store cannot be read
    async fn count_by_status(&self) -> Result<Vec<(MailStatus, usize)>>;

    /// Open a transaction that business code shares with outbox writes
    ///
    /// # Errors
    /// If the store cannot start a transaction
    async fn begin(&self) -> Result<Box<dyn MailboxTransaction>>;
}

/// Unit of work spanning a business mutation and its outbox records
///
/// Records created here are invisible until [`commit`](Self::commit).
/// Dropping the transaction without committing rolls it back.
#[async_trait]
pub trait MailboxTransaction: Send {
    /// Stage a record
    ///
    /// # Errors
    /// [`MailboxError::Duplicate`](crate::MailboxError::Duplicate) when the
    /// mail id is already stored or staged
    async fn create(&mut self, record: MailRecord) -> Result<bool>;

    /// # Errors
    /// If the staged records cannot be persisted; none of them are then
    async fn commit(self: Box<Self>) -> Result<()>;

    /// # Errors
    /// If the backing store reports a rollback failure
    async fn rollback(self: Box<Self>) -> Result<()>;
}
