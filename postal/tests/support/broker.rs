//! Broker double that records what it is handed
#![allow(dead_code)] // Test utility module - not all methods used in every test

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use postal::{Ack, BrokerClient, BrokerError, Envelope};
use tokio::sync::Notify;

#[derive(Debug, Default)]
pub struct RecordingBroker {
    calls: AtomicUsize,
    down: AtomicBool,
    envelopes: Mutex<Vec<Envelope>>,
    notify: Notify,
}

impl RecordingBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Reject every send until switched back
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn envelopes(&self) -> Vec<Envelope> {
        self.envelopes.lock().clone()
    }

    /// Wait until `expected` envelopes were accepted
    pub async fn wait_for(&self, expected: usize, timeout: Duration) -> Vec<Envelope> {
        tokio::time::timeout(timeout, async {
            loop {
                let notified = self.notify.notified();
                if self.envelopes.lock().len() >= expected {
                    return;
                }
                notified.await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("broker never received {expected} envelope(s)"));

        self.envelopes()
    }
}

#[async_trait]
impl BrokerClient for RecordingBroker {
    async fn send(&self, envelope: &Envelope) -> Result<Ack, BrokerError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);

        if self.down.load(Ordering::SeqCst) {
            return Err(BrokerError::Unavailable("broker is down".to_string()));
        }

        self.envelopes.lock().push(envelope.clone());
        self.notify.notify_waiters();
        Ok(Ack::new(format!("ack-{call}")))
    }
}
