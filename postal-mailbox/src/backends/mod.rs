//! Mailbox store implementations

mod memory;
mod test;

pub use memory::{MemoryMailboxStore, MemoryTransaction};
pub use test::TestMailboxStore;
