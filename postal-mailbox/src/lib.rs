pub mod backends;
pub mod config;
pub mod error;
pub mod record;
pub mod store;
pub mod types;

pub use backends::{MemoryMailboxStore, TestMailboxStore};
pub use config::MailboxConfig;
pub use error::{MailboxError, Result};
pub use record::{MailRecord, MailStatus, TransitionFields};
pub use store::{MailboxStore, MailboxTransaction};
pub use types::{MailId, Recipients};
