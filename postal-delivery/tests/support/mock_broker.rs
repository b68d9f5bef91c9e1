//! In-process broker double for delivery tests
//!
//! Can be told to fail a number of sends, fail every send, or hold each send
//! for a while. Every envelope it accepts is recorded.
#![allow(dead_code)] // Test utility module - not all methods used in every test

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use postal_delivery::{Ack, BrokerClient, BrokerError, Envelope};

#[derive(Debug, Default)]
pub struct MockBroker {
    calls: AtomicUsize,
    fail_first: AtomicUsize,
    always_fail: bool,
    delay: Option<Duration>,
    accepted: Mutex<Vec<Envelope>>,
}

impl MockBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Refuse the first `n` sends as unavailable, then accept
    pub fn failing_first(n: usize) -> Arc<Self> {
        Arc::new(Self {
            fail_first: AtomicUsize::new(n),
            ..Self::default()
        })
    }

    pub fn always_failing() -> Arc<Self> {
        Arc::new(Self {
            always_fail: true,
            ..Self::default()
        })
    }

    /// Hold every send for `delay` before accepting it
    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay: Some(delay),
            ..Self::default()
        })
    }

    /// Number of sends attempted, accepted or not
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn accepted(&self) -> Vec<Envelope> {
        self.accepted.lock().clone()
    }

    pub fn accepted_keys(&self) -> Vec<String> {
        self.accepted.lock().iter().map(|e| e.key.clone()).collect()
    }
}

#[async_trait]
impl BrokerClient for MockBroker {
    async fn send(&self, envelope: &Envelope) -> Result<Ack, BrokerError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.always_fail {
            return Err(BrokerError::Unavailable("broker is down".to_string()));
        }

        let failing = self
            .fail_first
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(BrokerError::Unavailable(format!("flaky failure #{}", call + 1)));
        }

        self.accepted.lock().push(envelope.clone());
        Ok(Ack::new(format!("msg-{call}")))
    }
}
