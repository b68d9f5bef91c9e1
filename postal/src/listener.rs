//! Inbound dispatch
//!
//! Handlers are registered per (message type, tag). Envelopes arriving from
//! the broker are decoded with the codec named in their `codec` property and
//! routed to the exact tag's handler, falling back to the tag-agnostic one.

use std::{future::Future, panic::AssertUnwindSafe, sync::Arc};

use ahash::AHashMap;
use futures_util::{FutureExt, future::BoxFuture};
use postal_common::incoming;
use postal_delivery::{Envelope, broker::headers};

use crate::{codec::Codec, mail::Mail};

/// Consumer verdict handed back to the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acknowledgement {
    /// Consumed, do not redeliver
    Ack,
    /// Not consumed, with the reason
    Nack(String),
}

impl Acknowledgement {
    #[must_use]
    pub const fn is_ack(&self) -> bool {
        matches!(self, Self::Ack)
    }
}

type Handler = Arc<dyn Fn(Arc<[u8]>, Codec) -> BoxFuture<'static, Acknowledgement> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Route {
    content_type: String,
    tag: Option<String>,
}

/// Handlers by message type and tag
#[derive(Default)]
pub struct ListenerRegistry {
    handlers: AHashMap<Route, Handler>,
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("routes", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ListenerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `M` with `tag`, or for any tag when `None`
    ///
    /// The handler returns `Ok(true)` when the message was consumed. A second
    /// registration for the same route replaces the first.
    pub fn register<M, F, Fut>(&mut self, tag: Option<&str>, handler: F)
    where
        M: Mail,
        F: Fn(M) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
    {
        let route = Route {
            content_type: M::content_type().to_string(),
            tag: tag.map(str::to_string),
        };

        let handler = Arc::new(handler);
        let erased: Handler = Arc::new(move |body: Arc<[u8]>, codec: Codec| {
            let handler = Arc::clone(&handler);
            async move {
                let message: M = match codec.decode(&body) {
                    Ok(message) => message,
                    Err(err) => return Acknowledgement::Nack(format!("Cannot decode body: {err}")),
                };

                match handler(message).await {
                    Ok(true) => Acknowledgement::Ack,
                    Ok(false) => Acknowledgement::Nack("Handler declined the message".to_string()),
                    Err(err) => Acknowledgement::Nack(format!("Handler failed: {err:#}")),
                }
            }
            .boxed()
        });

        if self.handlers.insert(route.clone(), erased).is_some() {
            tracing::warn!(
                content_type = %route.content_type,
                tag = ?route.tag,
                "Replacing existing listener"
            );
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    fn lookup(&self, content_type: &str, tag: Option<&str>) -> Option<&Handler> {
        let mut route = Route {
            content_type: content_type.to_string(),
            tag: tag.map(str::to_string),
        };
        if route.tag.is_some()
            && let Some(handler) = self.handlers.get(&route)
        {
            return Some(handler);
        }

        route.tag = None;
        self.handlers.get(&route)
    }

    /// Decode `envelope` and run its handler
    ///
    /// Every failure, including a panicking handler, becomes a
    /// [`Acknowledgement::Nack`].
    pub async fn dispatch(&self, envelope: &Envelope) -> Acknowledgement {
        incoming!("Received {envelope}");

        let Some(content_type) = envelope.content_type() else {
            return nack(envelope, "Missing contentType property".to_string());
        };

        let codec = match envelope.property(headers::CODEC).map(Codec::from_name) {
            None => Codec::default(),
            Some(Ok(codec)) => codec,
            Some(Err(err)) => return nack(envelope, err.to_string()),
        };

        let Some(handler) = self.lookup(content_type, envelope.tag.as_deref()) else {
            return nack(envelope, format!("No listener for {content_type}"));
        };

        let verdict = AssertUnwindSafe(handler(Arc::clone(&envelope.body), codec))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Acknowledgement::Nack("Handler panicked".to_string()));

        match &verdict {
            Acknowledgement::Ack => incoming!(level = DEBUG, "Consumed {envelope}"),
            Acknowledgement::Nack(reason) => {
                tracing::warn!(envelope = %envelope, %reason, "Listener rejected message");
            }
        }

        verdict
    }
}

fn nack(envelope: &Envelope, reason: String) -> Acknowledgement {
    tracing::warn!(envelope = %envelope, %reason, "Cannot dispatch message");
    Acknowledgement::Nack(reason)
}
