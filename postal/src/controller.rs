use std::sync::{Arc, LazyLock};

use ahash::AHashMap;
use postal_common::{Clock, Signal, SystemClock, internal, logging};
use postal_delivery::{BrokerClient, RetryDispatcher};
use postal_mailbox::{MailboxConfig, MailboxStore};
use serde::Deserialize;
use tokio::sync::broadcast;

use crate::{
    mail::Mail,
    producer::{Producer, ProducerConfig},
};

pub static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(64);
    sender
});

fn system_clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}

/// Root configuration
///
/// ```ron
/// Postal (
///     dispatcher: (
///         poll_interval_ms: 500,
///         retry: (max_retries: 8),
///     ),
///     producers: {
///         "orders": (topic: "orders", transactional: true),
///         "audit": (topic: "audit", direct: true),
///     },
///     mailbox: (capacity: Some(100000)),
/// )
/// ```
#[derive(Debug, Deserialize)]
pub struct Postal {
    #[serde(default)]
    dispatcher: RetryDispatcher,
    #[serde(alias = "producer", default)]
    producers: AHashMap<String, ProducerConfig>,
    #[serde(default)]
    mailbox: MailboxConfig,
    #[serde(skip, default = "system_clock")]
    clock: Arc<dyn Clock>,
}

impl Default for Postal {
    fn default() -> Self {
        Self {
            dispatcher: RetryDispatcher::default(),
            producers: AHashMap::default(),
            mailbox: MailboxConfig::default(),
            clock: system_clock(),
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!("CTRL+C entered -- Enter it again to force shutdown");
        }
        _ = terminate.recv() => {
            internal!("Terminate Signal received, shutting down");
        }
    };

    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_signal() -> anyhow::Result<()> {
    tokio::signal::ctrl_c().await?;
    internal!("CTRL+C entered -- Enter it again to force shutdown");
    Ok(())
}

#[tracing::instrument(level = "trace")]
async fn shutdown() -> anyhow::Result<()> {
    wait_for_signal().await?;

    let mut receiver = SHUTDOWN_BROADCAST.subscribe();

    SHUTDOWN_BROADCAST
        .send(Signal::Shutdown)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Interrupted, e.to_string()))?;

    loop {
        tokio::select! {
            sig = receiver.recv() => {
                match sig {
                    Ok(s) => tracing::debug!("Received {s:?}"),
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(e) => tracing::debug!("Received: {e:?}"),
                }
            }

            _ = tokio::signal::ctrl_c() => {
                break;
            }
        }
    }

    Ok(())
}

impl Postal {
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub const fn dispatcher(&self) -> &RetryDispatcher {
        &self.dispatcher
    }

    #[must_use]
    pub fn producer_config(&self, name: &str) -> Option<&ProducerConfig> {
        self.producers.get(name)
    }

    #[must_use]
    pub const fn mailbox(&self) -> &MailboxConfig {
        &self.mailbox
    }

    /// Wire the configured mailbox store and dispatcher to `broker`
    ///
    /// # Errors
    /// If the dispatcher configuration is unusable
    pub fn init(self, broker: Arc<dyn BrokerClient>) -> anyhow::Result<Outbox> {
        let store = self.mailbox.clone().into_store();
        self.init_with_store(store, broker)
    }

    /// [`init`](Self::init) with an externally provided store
    ///
    /// # Errors
    /// If the dispatcher configuration is unusable
    pub fn init_with_store(
        self,
        store: Arc<dyn MailboxStore>,
        broker: Arc<dyn BrokerClient>,
    ) -> anyhow::Result<Outbox> {
        let Self {
            mut dispatcher,
            producers,
            clock,
            ..
        } = self;

        dispatcher.init(Arc::clone(&store), Arc::clone(&broker))?;
        let dispatcher = Arc::new(dispatcher.with_clock(Arc::clone(&clock)));

        internal!(
            "Postal initialised with {} producer(s): {:?}",
            producers.len(),
            producers.keys().collect::<Vec<_>>()
        );

        Ok(Outbox {
            store,
            broker,
            dispatcher,
            producers,
            clock,
        })
    }
}

/// An initialised outbox: store, broker, dispatcher and named producers
#[derive(Debug)]
pub struct Outbox {
    store: Arc<dyn MailboxStore>,
    broker: Arc<dyn BrokerClient>,
    dispatcher: Arc<RetryDispatcher>,
    producers: AHashMap<String, ProducerConfig>,
    clock: Arc<dyn Clock>,
}

impl Outbox {
    #[must_use]
    pub const fn store(&self) -> &Arc<dyn MailboxStore> {
        &self.store
    }

    #[must_use]
    pub const fn dispatcher(&self) -> &Arc<RetryDispatcher> {
        &self.dispatcher
    }

    /// A producer for `M` using the configuration registered as `name`
    ///
    /// # Errors
    /// If no producer is configured under `name` or its topic is invalid
    pub fn producer<M: Mail>(&self, name: &str) -> anyhow::Result<Producer<M>> {
        let config = self
            .producers
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("No producer configured as '{name}'"))?;

        Ok(Producer::new(config, Arc::clone(&self.broker))?
            .with_mailbox(Arc::clone(&self.store))
            .with_clock(Arc::clone(&self.clock)))
    }

    /// Run the dispatcher until `shutdown` delivers a signal
    ///
    /// # Errors
    /// If the dispatcher is not initialised
    pub async fn serve(&self, shutdown: broadcast::Receiver<Signal>) -> anyhow::Result<()> {
        Arc::clone(&self.dispatcher).serve(shutdown).await?;
        Ok(())
    }

    /// Run everything until the process receives CTRL+C or SIGTERM
    ///
    /// # Errors
    /// If the dispatcher stops with an error or signal handling fails
    #[tracing::instrument(level = "trace", skip_all, err)]
    pub async fn run(self) -> anyhow::Result<()> {
        logging::init();

        internal!("Controller running");

        let ret = tokio::select! {
            r = self.serve(SHUTDOWN_BROADCAST.subscribe()) => {
                r
            }
            r = shutdown() => {
                r
            }
        };

        internal!("Shutting down...");

        ret
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn defaults_from_empty_config() {
        let postal: Postal = ron::from_str("Postal ()").unwrap();
        assert_eq!(postal.dispatcher().poll_interval_ms, 1_000);
        assert_eq!(postal.dispatcher().retry.max_retries, 16);
        assert!(postal.producer_config("orders").is_none());
        assert_eq!(postal.mailbox().capacity, None);
    }

    #[test]
    fn producer_alias() {
        let postal: Postal = ron::from_str(
            r#"Postal (
                producer: {
                    "audit": (topic: "audit", direct: true, codec: Bincode),
                },
            )"#,
        )
        .unwrap();

        let audit = postal.producer_config("audit").unwrap();
        assert_eq!(audit.topic, "audit");
        assert!(audit.direct);
    }
}
