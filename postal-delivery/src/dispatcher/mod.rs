//! Retry dispatcher
//!
//! A periodically ticking worker that moves stored records to the broker.
//! Each tick it returns expired `SENDING` leases to `PENDING`, then claims due
//! records one by one with a conditional status update and delivers them on a
//! bounded set of tasks until nothing is due. Replicas in other processes
//! coordinate only through the store's compare-and-swap.

mod attempt;
mod claim;
mod reaper;

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use dashmap::DashSet;
use postal_common::{Clock, Signal, SystemClock, internal};
use postal_mailbox::{MailId, MailboxStore};
use serde::Deserialize;
use tokio::{sync::broadcast, task::JoinSet};

use self::{attempt::Attempt, claim::Claim};
use crate::{
    broker::BrokerClient,
    error::DispatchError,
    events::{DispatchEvent, DispatchEvents},
    metrics::DispatchMetrics,
    policy::RetryPolicy,
    rate_limiter::{RateLimitConfig, RateLimiter},
};

const fn default_poll_interval_ms() -> u64 {
    1_000
}

const fn default_lease_secs() -> u64 {
    60
}

const fn default_send_timeout_secs() -> u64 {
    30
}

const fn default_max_concurrent_deliveries() -> usize {
    8
}

const fn default_shutdown_timeout_secs() -> u64 {
    30
}

const fn default_purge_interval_secs() -> u64 {
    3_600
}

fn system_clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}

/// Background worker delivering queued mail
///
/// Configuration is deserialized; the store, broker and clock are attached
/// at runtime with [`init`](Self::init) and [`with_clock`](Self::with_clock).
#[derive(Debug, Deserialize)]
pub struct RetryDispatcher {
    /// Time between drains when nothing is due (milliseconds)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// How long a `SENDING` claim is honoured before the reaper returns the
    /// record to `PENDING` (seconds)
    ///
    /// Must comfortably exceed `send_timeout_secs`.
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,

    /// Longest a single broker send may take before it counts as a failed
    /// attempt (seconds)
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,

    /// Upper bound on deliveries in flight at once
    #[serde(default = "default_max_concurrent_deliveries")]
    pub max_concurrent_deliveries: usize,

    /// Time allowed for in-flight deliveries on shutdown (seconds)
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,

    /// Keep `SENT` and `DEAD` records this long before purging them
    /// (seconds, `None` keeps them forever)
    #[serde(default)]
    pub retention_secs: Option<u64>,

    /// Time between retention purges (seconds)
    #[serde(default = "default_purge_interval_secs")]
    pub purge_interval_secs: u64,

    #[serde(default)]
    pub retry: RetryPolicy,

    /// Broker send rate limit applied to dispatcher attempts
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,

    #[serde(skip)]
    store: Option<Arc<dyn MailboxStore>>,

    #[serde(skip)]
    broker: Option<Arc<dyn BrokerClient>>,

    #[serde(skip, default = "system_clock")]
    clock: Arc<dyn Clock>,

    #[serde(skip)]
    rate_limiter: Option<Arc<RateLimiter>>,

    #[serde(skip)]
    events: DispatchEvents,

    #[serde(skip)]
    metrics: DispatchMetrics,

    /// Claims held by this process
    #[serde(skip)]
    in_flight: DashSet<MailId>,

    #[serde(skip)]
    stopping: AtomicBool,
}

impl Default for RetryDispatcher {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            lease_secs: default_lease_secs(),
            send_timeout_secs: default_send_timeout_secs(),
            max_concurrent_deliveries: default_max_concurrent_deliveries(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            retention_secs: None,
            purge_interval_secs: default_purge_interval_secs(),
            retry: RetryPolicy::default(),
            rate_limit: None,
            store: None,
            broker: None,
            clock: system_clock(),
            rate_limiter: None,
            events: DispatchEvents::default(),
            metrics: DispatchMetrics::default(),
            in_flight: DashSet::new(),
            stopping: AtomicBool::new(false),
        }
    }
}

/// What one drain did
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    /// Records moved to `SENDING` by this drain
    pub claimed: usize,
    pub sent: usize,
    /// Claims settled from the sent journal
    pub recovered: usize,
    /// Failed attempts rescheduled
    pub retried: usize,
    pub dead: usize,
    /// Claims handed back without an attempt (throttled or store trouble)
    pub released: usize,
    /// Candidates another dispatcher claimed first
    pub lost_races: usize,
    /// Expired leases returned to `PENDING`
    pub reclaimed: usize,
    /// Attempts whose lease was taken over before they settled
    pub expired: usize,
}

impl DrainReport {
    fn record(&mut self, attempt: Attempt) {
        match attempt {
            Attempt::Sent => self.sent += 1,
            Attempt::Recovered => self.recovered += 1,
            Attempt::Retrying => self.retried += 1,
            Attempt::Dead => self.dead += 1,
            Attempt::Released => self.released += 1,
            Attempt::Expired => self.expired += 1,
        }
    }

    /// Nothing was claimed, contended or reclaimed
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        self.claimed == 0 && self.lost_races == 0 && self.reclaimed == 0
    }
}

impl RetryDispatcher {
    /// Attach the store and broker
    ///
    /// # Errors
    /// If the configuration is unusable
    pub fn init(
        &mut self,
        store: Arc<dyn MailboxStore>,
        broker: Arc<dyn BrokerClient>,
    ) -> Result<(), DispatchError> {
        internal!("Initialising Retry Dispatcher ...");

        if self.max_concurrent_deliveries == 0 {
            return Err(DispatchError::NotInitialized(
                "max_concurrent_deliveries must be at least 1".to_string(),
            ));
        }

        if self.send_timeout_secs == 0 {
            return Err(DispatchError::NotInitialized(
                "send_timeout_secs must be at least 1".to_string(),
            ));
        }

        if self.send_timeout_secs >= self.lease_secs {
            tracing::warn!(
                send_timeout_secs = self.send_timeout_secs,
                lease_secs = self.lease_secs,
                "Send timeout is not shorter than the lease, a slow send may be delivered twice"
            );
        }

        self.store = Some(store);
        self.broker = Some(broker);
        self.rate_limiter = self
            .rate_limit
            .clone()
            .map(|config| Arc::new(RateLimiter::new(config)));

        internal!(
            "Retry dispatcher initialised with poll_interval={}ms, lease={}s, max_retries={}, max_concurrent={}",
            self.poll_interval_ms,
            self.lease_secs,
            self.retry.max_retries,
            self.max_concurrent_deliveries
        );

        Ok(())
    }

    /// Replace the time source
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Receive [`DispatchEvent`]s from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.events.subscribe()
    }

    /// Number of claims this process currently holds
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    const fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }

    const fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }

    fn runtime(&self) -> Result<(&Arc<dyn MailboxStore>, &Arc<dyn BrokerClient>), DispatchError> {
        match (&self.store, &self.broker) {
            (Some(store), Some(broker)) => Ok((store, broker)),
            _ => Err(DispatchError::NotInitialized(
                "Retry dispatcher not initialized. Call init() first.".to_string(),
            )),
        }
    }

    /// Reclaim expired leases, then deliver everything due right now
    ///
    /// Returns once no record is due and every delivery it started has
    /// settled. A store failure while claiming stops further claims; the
    /// deliveries already started still finish before the error is returned.
    ///
    /// # Errors
    /// If the dispatcher is not initialised or the store fails
    pub async fn drain_once(self: &Arc<Self>) -> Result<DrainReport, DispatchError> {
        let (store, broker) = self.runtime()?;

        let mut report = DrainReport {
            reclaimed: self.reclaim_expired_leases(store.as_ref()).await?,
            ..DrainReport::default()
        };

        let mut tasks: JoinSet<Attempt> = JoinSet::new();
        let mut idle = false;
        let mut failure = None;

        loop {
            while !idle && tasks.len() < self.max_concurrent_deliveries {
                if self.stopping.load(Ordering::SeqCst) {
                    idle = true;
                    break;
                }

                match self.claim_next(store.as_ref()).await {
                    Ok(Claim::Won(record)) => {
                        report.claimed += 1;
                        let dispatcher = Arc::clone(self);
                        let store = Arc::clone(store);
                        let broker = Arc::clone(broker);
                        tasks.spawn(async move {
                            dispatcher
                                .attempt(store.as_ref(), broker.as_ref(), record)
                                .await
                        });
                    }
                    Ok(Claim::Lost) => report.lost_races += 1,
                    Ok(Claim::Idle) => idle = true,
                    Err(err) => {
                        tracing::error!(error = %err, "Failed to claim due mail");
                        failure = Some(err);
                        idle = true;
                    }
                }
            }

            match tasks.join_next().await {
                Some(Ok(attempt)) => {
                    report.record(attempt);
                    idle = failure.is_some();
                }
                Some(Err(err)) => tracing::error!(error = %err, "Delivery task failed"),
                None => break,
            }
        }

        if let Some(err) = failure {
            return Err(err.into());
        }

        if !report.is_idle() {
            tracing::info!(
                claimed = report.claimed,
                sent = report.sent,
                retried = report.retried,
                dead = report.dead,
                reclaimed = report.reclaimed,
                "Drained mailbox"
            );
        }

        Ok(report)
    }

    /// Purge `SENT` and `DEAD` records older than `retention_secs` now
    ///
    /// # Errors
    /// If the dispatcher is not initialised or the store fails
    pub async fn purge(&self) -> Result<usize, DispatchError> {
        let (store, _) = self.runtime()?;
        Ok(self.purge_expired(store.as_ref()).await?)
    }

    /// Run until a shutdown signal arrives
    ///
    /// ## Graceful Shutdown
    ///
    /// On [`Signal::Shutdown`] the dispatcher stops claiming, gives in-flight
    /// deliveries up to `shutdown_timeout_secs` to settle, then abandons the
    /// rest and returns their records from `SENDING` to `PENDING`.
    ///
    /// # Errors
    /// If the dispatcher is not initialised
    #[tracing::instrument(level = "trace", skip_all)]
    pub async fn serve(
        self: Arc<Self>,
        mut shutdown: broadcast::Receiver<Signal>,
    ) -> Result<(), DispatchError> {
        internal!("Retry dispatcher starting");

        let (store, _) = self.runtime()?;

        let mut poll_timer =
            tokio::time::interval(Duration::from_millis(self.poll_interval_ms.max(1)));
        poll_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut purge_timer =
            tokio::time::interval(Duration::from_secs(self.purge_interval_secs.max(1)));

        // Purge on the first interval, not at startup
        purge_timer.tick().await;

        loop {
            tokio::select! {
                _ = poll_timer.tick() => {
                    let mut drain = Box::pin(self.drain_once());

                    let stop = tokio::select! {
                        result = &mut drain => {
                            log_drain_failure(result);
                            false
                        }
                        signal = shutdown.recv() => {
                            log_signal(signal);
                            self.stopping.store(true, Ordering::SeqCst);

                            let timeout = Duration::from_secs(self.shutdown_timeout_secs);
                            match tokio::time::timeout(timeout, &mut drain).await {
                                Ok(result) => {
                                    log_drain_failure(result);
                                    internal!("All in-flight deliveries completed");
                                }
                                Err(_) => {
                                    tracing::warn!(
                                        in_flight = self.in_flight.len(),
                                        "Shutdown timeout exceeded, abandoning in-flight deliveries"
                                    );
                                }
                            }
                            true
                        }
                    };

                    drop(drain);

                    if stop {
                        break;
                    }
                }
                _ = purge_timer.tick() => {
                    if let Err(err) = self.purge_expired(store.as_ref()).await {
                        tracing::error!(error = %err, "Failed to purge expired mail");
                    }
                }
                signal = shutdown.recv() => {
                    log_signal(signal);
                    self.stopping.store(true, Ordering::SeqCst);
                    break;
                }
            }
        }

        self.release_abandoned(store.as_ref()).await;
        internal!("Retry dispatcher shutdown complete");

        Ok(())
    }
}

fn log_drain_failure(result: Result<DrainReport, DispatchError>) {
    if let Err(err) = result {
        tracing::error!(error = %err, "Error draining mailbox");
    }
}

fn log_signal(signal: Result<Signal, broadcast::error::RecvError>) {
    match signal {
        Ok(Signal::Shutdown) => {
            internal!("Retry dispatcher received shutdown signal");
        }
        Err(err) => {
            tracing::error!(error = %err, "Retry dispatcher shutdown channel error");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn config_defaults() {
        let dispatcher: RetryDispatcher = ron::from_str("()").expect("empty config");
        assert_eq!(dispatcher.poll_interval_ms, 1_000);
        assert_eq!(dispatcher.lease_secs, 60);
        assert_eq!(dispatcher.send_timeout(), Duration::from_secs(30));
        assert_eq!(dispatcher.max_concurrent_deliveries, 8);
        assert_eq!(dispatcher.retry.max_retries, 16);
        assert!(dispatcher.rate_limit.is_none());
        assert!(dispatcher.retention_secs.is_none());
    }

    #[test]
    fn config_overrides() {
        let dispatcher: RetryDispatcher = ron::from_str(
            r"(
                poll_interval_ms: 250,
                lease_secs: 5,
                send_timeout_secs: 2,
                retention_secs: Some(86400),
                retry: (max_retries: 3, base_delay_ms: 10),
                rate_limit: Some((messages_per_second: 2.0)),
            )",
        )
        .expect("valid config");

        assert_eq!(dispatcher.poll_interval_ms, 250);
        assert_eq!(dispatcher.lease(), Duration::from_secs(5));
        assert_eq!(dispatcher.send_timeout(), Duration::from_secs(2));
        assert_eq!(dispatcher.retention_secs, Some(86_400));
        assert_eq!(dispatcher.retry.max_retries, 3);
        assert_eq!(dispatcher.retry.base_delay_ms, 10);
        assert_eq!(dispatcher.retry.max_delay_ms, 3_600_000);
        assert_eq!(dispatcher.rate_limit.unwrap().burst_size, 100);
    }

    #[tokio::test]
    async fn drain_requires_init() {
        let dispatcher = Arc::new(RetryDispatcher::default());
        let err = dispatcher.drain_once().await.unwrap_err();
        assert!(matches!(err, DispatchError::NotInitialized(_)));
    }

    #[test]
    fn report_counts() {
        let mut report = DrainReport::default();
        assert!(report.is_idle());
        report.claimed = 2;
        report.record(Attempt::Sent);
        report.record(Attempt::Dead);
        assert_eq!(report.sent, 1);
        assert_eq!(report.dead, 1);
        assert!(!report.is_idle());
    }
}
