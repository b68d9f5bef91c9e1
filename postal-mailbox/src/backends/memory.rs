use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::{
    MailId, MailRecord, MailStatus, MailboxError, Result, TransitionFields,
    store::{MailboxStore, MailboxTransaction},
};

#[derive(Debug, Default)]
pub(crate) struct Inner {
    pub(crate) records: HashMap<MailId, MailRecord>,
    pub(crate) sent: HashMap<MailId, MailRecord>,
    next_id: u64,
}

impl Inner {
    fn check_insert(&self, mail_id: &MailId, extra: usize, capacity: Option<usize>) -> Result<()> {
        if self.records.contains_key(mail_id) {
            return Err(MailboxError::Duplicate(mail_id.clone()));
        }
        if let Some(capacity) = capacity {
            let used = self.records.len() + extra;
            if used >= capacity {
                return Err(MailboxError::CapacityExceeded { used, capacity });
            }
        }
        Ok(())
    }

    fn insert(&mut self, mut record: MailRecord) {
        self.next_id += 1;
        record.id = Some(self.next_id);
        self.records.insert(record.mail_id.clone(), record);
    }
}

/// In-memory mailbox store
///
/// Every operation takes the lock once, so `transition_status` is a true
/// compare-and-swap. Queries are linear scans; this store is meant for tests,
/// single-process deployments and as the reference for what a database-backed
/// store has to guarantee.
///
/// # Capacity Management
/// An optional capacity bounds the number of live records. Creates beyond it
/// fail with [`MailboxError::CapacityExceeded`].
#[derive(Debug, Clone, Default)]
pub struct MemoryMailboxStore {
    pub(crate) inner: Arc<RwLock<Inner>>,
    capacity: Option<usize>,
}

impl MemoryMailboxStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::default(),
            capacity: Some(capacity),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub const fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Snapshot of every record, ordered by surrogate id
    #[must_use]
    pub fn records(&self) -> Vec<MailRecord> {
        let mut records: Vec<_> = self.inner.read().records.values().cloned().collect();
        records.sort_by_key(|r| r.id);
        records
    }

    fn oldest_matching(
        &self,
        status: MailStatus,
        mut keep: impl FnMut(&MailRecord) -> bool,
        key: impl Fn(&MailRecord) -> i64,
    ) -> Option<MailRecord> {
        self.inner
            .read()
            .records
            .values()
            .filter(|r| r.status == status && keep(r))
            .min_by_key(|r| (key(r), r.id))
            .cloned()
    }
}

#[async_trait]
impl MailboxStore for MemoryMailboxStore {
    async fn create(&self, record: MailRecord) -> Result<bool> {
        let mut inner = self.inner.write();
        inner.check_insert(&record.mail_id, 0, self.capacity)?;
        inner.insert(record);
        Ok(true)
    }

    async fn find_due_for_status(
        &self,
        status: MailStatus,
        not_after: i64,
    ) -> Result<Option<MailRecord>> {
        Ok(self.oldest_matching(
            status,
            |r| r.next_retry_at <= not_after,
            |r| r.next_retry_at,
        ))
    }

    async fn transition_status(
        &self,
        mail_id: &MailId,
        from: MailStatus,
        to: MailStatus,
        fields: TransitionFields,
    ) -> Result<bool> {
        let mut inner = self.inner.write();
        match inner.records.get_mut(mail_id) {
            Some(record) if record.status == from => {
                record.apply(to, &fields);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_sent(&self, record: &MailRecord, sent_at: i64) -> Result<()> {
        let mut journaled = record.clone();
        journaled.apply(MailStatus::Sent, &TransitionFields::at(sent_at));
        self.inner
            .write()
            .sent
            .insert(journaled.mail_id.clone(), journaled);
        Ok(())
    }

    async fn find_sent_by_mail_id(&self, mail_id: &MailId) -> Result<Option<MailRecord>> {
        Ok(self.inner.read().sent.get(mail_id).cloned())
    }

    async fn find_stale_for_status(
        &self,
        status: MailStatus,
        updated_before: i64,
    ) -> Result<Option<MailRecord>> {
        Ok(self.oldest_matching(
            status,
            |r| r.update_time < updated_before,
            |r| r.update_time,
        ))
    }

    async fn get(&self, mail_id: &MailId) -> Result<Option<MailRecord>> {
        Ok(self.inner.read().records.get(mail_id).cloned())
    }

    async fn remove(&self, mail_id: &MailId) -> Result<bool> {
        let mut inner = self.inner.write();
        inner.sent.remove(mail_id);
        Ok(inner.records.remove(mail_id).is_some())
    }

    async fn purge(&self, statuses: &[MailStatus], updated_before: i64) -> Result<usize> {
        let mut inner = self.inner.write();
        let expired: Vec<MailId> = inner
            .records
            .values()
            .filter(|r| statuses.contains(&r.status) && r.update_time < updated_before)
            .map(|r| r.mail_id.clone())
            .collect();

        for mail_id in &expired {
            inner.records.remove(mail_id);
            inner.sent.remove(mail_id);
        }

        if !expired.is_empty() {
            tracing::debug!(count = expired.len(), ?statuses, "Purged mail records");
        }

        Ok(expired.len())
    }

    async fn count_by_status(&self) -> Result<Vec<(MailStatus, usize)>> {
        let inner = self.inner.read();
        Ok(MailStatus::ALL
            .iter()
            .map(|status| {
                (
                    *status,
                    inner.records.values().filter(|r| r.status == *status).count(),
                )
            })
            .collect())
    }

    async fn begin(&self) -> Result<Box<dyn MailboxTransaction>> {
        Ok(Box::new(MemoryTransaction {
            store: self.clone(),
            staged: Vec::new(),
        }))
    }
}

/// Buffered transaction over a [`MemoryMailboxStore`]
///
/// Staged records are checked against the store when staged and again,
/// atomically, on commit.
#[derive(Debug)]
pub struct MemoryTransaction {
    store: MemoryMailboxStore,
    staged: Vec<MailRecord>,
}

#[async_trait]
impl MailboxTransaction for MemoryTransaction {
    async fn create(&mut self, record: MailRecord) -> Result<bool> {
        if self.staged.iter().any(|r| r.mail_id == record.mail_id) {
            return Err(MailboxError::Duplicate(record.mail_id));
        }
        self.store
            .inner
            .read()
            .check_insert(&record.mail_id, self.staged.len(), self.store.capacity)?;
        self.staged.push(record);
        Ok(true)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut inner = self.store.inner.write();
        for (staged_before, record) in self.staged.iter().enumerate() {
            inner.check_insert(&record.mail_id, staged_before, self.store.capacity)?;
        }
        for record in self.staged {
            inner.insert(record);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
