pub mod clock;
pub mod logging;
pub mod trace;

pub use clock::{Clock, ManualClock, SystemClock};
pub use trace::{TaskLocalTrace, TraceSource};
pub use tracing;

/// Lifecycle signal broadcast to long-running workers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
}
