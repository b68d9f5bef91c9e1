use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::memory::MemoryMailboxStore;
use crate::{
    MailId, MailRecord, MailStatus, MailboxError, Result, TransitionFields,
    store::{MailboxStore, MailboxTransaction},
};

/// Testing utilities for a memory-backed mailbox
///
/// Wraps [`MemoryMailboxStore`] and adds hooks for waiting on state changes,
/// counting claims per mail and simulating an unreachable store.
#[derive(Debug, Clone, Default)]
pub struct TestMailboxStore {
    pub(crate) inner: MemoryMailboxStore,
    notify: Arc<Notify>,
    claims: Arc<Mutex<HashMap<MailId, usize>>>,
    unavailable: Arc<AtomicBool>,
}

impl TestMailboxStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail with [`MailboxError::Unavailable`]
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of times `mail_id` was moved into `SENDING`
    #[must_use]
    pub fn claim_count(&self, mail_id: &MailId) -> usize {
        self.claims.lock().get(mail_id).copied().unwrap_or_default()
    }

    /// Snapshot of every record
    #[must_use]
    pub fn records(&self) -> Vec<MailRecord> {
        self.inner.records()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Number of records currently in `status`
    #[must_use]
    pub fn count(&self, status: MailStatus) -> usize {
        self.inner
            .inner
            .read()
            .records
            .values()
            .filter(|r| r.status == status)
            .count()
    }

    /// Wait until at least `expected` records are in `status`
    ///
    /// # Errors
    /// Returns an error if the timeout is reached first
    pub async fn wait_for_count(
        &self,
        status: MailStatus,
        expected: usize,
        timeout: Duration,
    ) -> Result<()> {
        tokio::time::timeout(timeout, async {
            loop {
                let notified = self.notify.notified();
                if self.count(status) >= expected {
                    return;
                }
                notified.await;
            }
        })
        .await
        .map_err(|e| {
            MailboxError::Unavailable(format!("Timeout waiting for {expected} {status}: {e}"))
        })
    }

    /// Remove every record
    pub fn clear(&self) {
        let mut inner = self.inner.inner.write();
        inner.records.clear();
        inner.sent.clear();
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(MailboxError::Unavailable("simulated outage".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl MailboxStore for TestMailboxStore {
    async fn create(&self, record: MailRecord) -> Result<bool> {
        self.check_available()?;
        let created = self.inner.create(record).await?;
        self.notify.notify_waiters();
        Ok(created)
    }

    async fn find_due_for_status(
        &self,
        status: MailStatus,
        not_after: i64,
    ) -> Result<Option<MailRecord>> {
        self.check_available()?;
        self.inner.find_due_for_status(status, not_after).await
    }

    async fn transition_status(
        &self,
        mail_id: &MailId,
        from: MailStatus,
        to: MailStatus,
        fields: TransitionFields,
    ) -> Result<bool> {
        self.check_available()?;
        let moved = self
            .inner
            .transition_status(mail_id, from, to, fields)
            .await?;
        if moved {
            if to == MailStatus::Sending {
                *self.claims.lock().entry(mail_id.clone()).or_default() += 1;
            }
            self.notify.notify_waiters();
        }
        Ok(moved)
    }

    async fn record_sent(&self, record: &MailRecord, sent_at: i64) -> Result<()> {
        self.check_available()?;
        self.inner.record_sent(record, sent_at).await
    }

    async fn find_sent_by_mail_id(&self, mail_id: &MailId) -> Result<Option<MailRecord>> {
        self.check_available()?;
        self.inner.find_sent_by_mail_id(mail_id).await
    }

    async fn find_stale_for_status(
        &self,
        status: MailStatus,
        updated_before: i64,
    ) -> Result<Option<MailRecord>> {
        self.check_available()?;
        self.inner.find_stale_for_status(status, updated_before).await
    }

    async fn get(&self, mail_id: &MailId) -> Result<Option<MailRecord>> {
        self.check_available()?;
        self.inner.get(mail_id).await
    }

    async fn remove(&self, mail_id: &MailId) -> Result<bool> {
        self.check_available()?;
        let removed = self.inner.remove(mail_id).await?;
        self.notify.notify_waiters();
        Ok(removed)
    }

    async fn purge(&self, statuses: &[MailStatus], updated_before: i64) -> Result<usize> {
        self.check_available()?;
        self.inner.purge(statuses, updated_before).await
    }

    async fn count_by_status(&self) -> Result<Vec<(MailStatus, usize)>> {
        self.check_available()?;
        self.inner.count_by_status().await
    }

    async fn begin(&self) -> Result<Box<dyn MailboxTransaction>> {
        self.check_available()?;
        let tx = self.inner.begin().await?;
        Ok(Box::new(NotifyingTransaction {
            tx,
            notify: Arc::clone(&self.notify),
        }))
    }
}

struct NotifyingTransaction {
    tx: Box<dyn MailboxTransaction>,
    notify: Arc<Notify>,
}

#[async_trait]
impl MailboxTransaction for NotifyingTransaction {
    async fn create(&mut self, record: MailRecord) -> Result<bool> {
        self.tx.create(record).await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let Self { tx, notify } = *self;
        tx.commit().await?;
        notify.notify_waiters();
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await
    }
}
