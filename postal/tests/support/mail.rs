//! Message types shared by the integration tests
#![allow(dead_code)]

use std::{collections::HashMap, time::Duration};

use postal::{Mail, ValidationError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCreated {
    pub order_id: u64,
    pub amount_cents: u64,
}

impl Mail for OrderCreated {
    fn content_type() -> &'static str {
        "OrderCreated"
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.amount_cents == 0 {
            return Err(ValidationError::Message(format!(
                "order {} has no amount",
                self.order_id
            )));
        }
        Ok(())
    }
}

/// Fire-and-forget notification, optionally postponed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderDue {
    pub user: String,
    pub delay_secs: u64,
}

impl Mail for ReminderDue {
    fn content_type() -> &'static str {
        "ReminderDue"
    }

    fn is_async(&self) -> bool {
        true
    }

    fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_secs)
    }
}

/// JSON cannot encode maps with non-string keys
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Unencodable {
    pub grid: HashMap<(u8, u8), u8>,
}

impl Mail for Unencodable {
    fn content_type() -> &'static str {
        "Unencodable"
    }
}
