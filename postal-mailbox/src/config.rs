use std::sync::Arc;

use serde::Deserialize;

use crate::{backends::MemoryMailboxStore, store::MailboxStore};

/// Configuration for the bundled mailbox store
///
/// Unbounded:
/// ```ron
/// Postal (
///     mailbox: (),
/// )
/// ```
///
/// With a capacity limit:
/// ```ron
/// Postal (
///     mailbox: (
///         capacity: Some(10000),
///     ),
/// )
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MailboxConfig {
    /// Maximum number of live records (omit for unlimited)
    #[serde(default)]
    pub capacity: Option<usize>,
}

impl MailboxConfig {
    /// Convert the configuration into a store trait object
    #[must_use]
    pub fn into_store(self) -> Arc<dyn MailboxStore> {
        self.capacity.map_or_else(
            || Arc::new(MemoryMailboxStore::new()) as Arc<dyn MailboxStore>,
            |capacity| Arc::new(MemoryMailboxStore::with_capacity(capacity)),
        )
    }
}
