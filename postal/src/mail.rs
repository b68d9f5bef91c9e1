use std::time::Duration;

use postal_delivery::ValidationError;
use serde::{Serialize, de::DeserializeOwned};

/// A typed message that can be sent and received through postal
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct OrderCreated { order_id: u64 }
///
/// impl Mail for OrderCreated {
///     fn content_type() -> &'static str {
///         "OrderCreated"
///     }
/// }
/// ```
pub trait Mail: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Logical type name, used by listeners to pick a handler
    fn content_type() -> &'static str;

    /// Fire-and-forget instead of waiting for the broker
    ///
    /// Asynchronous mail goes through the mailbox unless the producer is
    /// configured for direct sends.
    fn is_async(&self) -> bool {
        false
    }

    /// Postpone delivery by this much
    fn delay(&self) -> Duration {
        Duration::ZERO
    }

    /// Reject the message before anything is sent or stored
    ///
    /// # Errors
    /// A [`ValidationError`] describing what is wrong
    fn validate(&self) -> Result<(), ValidationError> {
        Ok(())
    }
}
