//! Policies applied by the dispatcher

pub mod retry;

pub use retry::RetryPolicy;
