//! Correlation id propagation
//!
//! A trace id is carried in a tokio task-local scope and read through a
//! [`TraceSource`] handed to the producer, so nothing reads global state
//! directly.

use std::future::Future;

tokio::task_local! {
    static TRACE_ID: String;
}

/// Run `future` with `trace_id` as the ambient correlation id
pub async fn with_trace_id<F: Future>(trace_id: impl Into<String>, future: F) -> F::Output {
    TRACE_ID.scope(trace_id.into(), future).await
}

/// The correlation id of the current task, if one is in scope
#[must_use]
pub fn current_trace_id() -> Option<String> {
    TRACE_ID.try_with(Clone::clone).ok()
}

pub trait TraceSource: Send + Sync + std::fmt::Debug {
    fn trace_id(&self) -> Option<String>;
}

/// Reads the id installed by [`with_trace_id`]
#[derive(Debug, Default, Clone, Copy)]
pub struct TaskLocalTrace;

impl TraceSource for TaskLocalTrace {
    fn trace_id(&self) -> Option<String> {
        current_trace_id()
    }
}
