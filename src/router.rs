//! Event router: identity-tagged named events over a raw transport.
//!
//! Every frame the router writes is a [`WireMessage`] carrying the pair's
//! identity. Inbound frames that fail to decode or carry another identity
//! are dropped without error. Frames on a reply channel registered in the
//! [`PendingCalls`] table complete that call; everything else goes to the
//! handlers subscribed on the channel, in subscription order.

use crate::error::{Result, WtforkError};
use crate::identity::Identity;
use crate::logging::{LogEvent, LogOptions, StructuredLogger};
use crate::marshal::SerializedError;
use crate::message::{ReplyEnvelope, WireMessage};
use crate::metrics::Metrics;
use crate::transport::{Inbound, Transport};
use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;

/// Event handler. Invoked on the router's task; must not block.
pub type Handler = Arc<dyn Fn(Value) + Send + Sync>;

/// Returned by [`EventRouter::on`] and [`EventRouter::once`]; pass to
/// [`EventRouter::off`] to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    once: bool,
    handler: Handler,
}

#[derive(Default)]
struct PendingTable {
    waiting: HashMap<String, oneshot::Sender<ReplyEnvelope>>,
    closed: bool,
}

/// Calls awaiting a reply, keyed by reply channel.
///
/// An entry is inserted when a call is sent and removed when its reply
/// arrives, when an opt-in timeout expires, or when the transport closes.
/// A call whose reply never comes stays here, which is what
/// [`PendingCalls::len`] makes observable.
#[derive(Clone, Default)]
pub struct PendingCalls {
    inner: Arc<Mutex<PendingTable>>,
}

impl PendingCalls {
    pub(crate) async fn register(
        &self,
        reply_channel: String,
    ) -> Result<oneshot::Receiver<ReplyEnvelope>> {
        let mut table = self.inner.lock().await;
        if table.closed {
            return Err(WtforkError::Disconnected);
        }
        let (tx, rx) = oneshot::channel();
        table.waiting.insert(reply_channel, tx);
        Ok(rx)
    }

    pub(crate) async fn remove(&self, reply_channel: &str) -> bool {
        self.inner.lock().await.waiting.remove(reply_channel).is_some()
    }

    /// Hand `payload` to the call waiting on `channel`. Gives the payload
    /// back if no call is waiting there.
    async fn try_complete(&self, channel: &str, payload: Value) -> std::result::Result<(), Value> {
        let Some(tx) = self.inner.lock().await.waiting.remove(channel) else {
            return Err(payload);
        };
        let reply = serde_json::from_value(payload).unwrap_or_else(|e| {
            ReplyEnvelope::Reject(SerializedError {
                message: format!("Malformed reply: {}", e),
                error_type: "TypeError".to_string(),
                stack: String::new(),
            })
        });
        // The caller may have given up already
        let _ = tx.send(reply);
        Ok(())
    }

    /// Drop every waiting call and refuse new ones.
    async fn close(&self) -> usize {
        let mut table = self.inner.lock().await;
        table.closed = true;
        let dropped = table.waiting.len();
        table.waiting.clear();
        dropped
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.waiting.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn contains(&self, reply_channel: &str) -> bool {
        self.inner.lock().await.waiting.contains_key(reply_channel)
    }
}

/// One side's view of the pair's event bus.
#[derive(Clone)]
pub struct EventRouter {
    inner: Arc<RouterInner>,
}

struct RouterInner {
    identity: Identity,
    transport: Arc<dyn Transport>,
    handlers: RwLock<HashMap<String, Vec<Subscription>>>,
    pending: PendingCalls,
    next_subscription: AtomicU64,
    logger: StructuredLogger,
    metrics: Metrics,
}

impl EventRouter {
    /// Create a router. Nothing is received until [`EventRouter::start`].
    pub fn new(
        identity: Identity,
        transport: Arc<dyn Transport>,
        logger: StructuredLogger,
        metrics: Metrics,
    ) -> Self {
        Self {
            inner: Arc::new(RouterInner {
                identity,
                transport,
                handlers: RwLock::new(HashMap::new()),
                pending: PendingCalls::default(),
                next_subscription: AtomicU64::new(1),
                logger,
                metrics,
            }),
        }
    }

    /// Spawn the task that routes inbound frames. When the inbound stream
    /// ends, every pending call fails with [`WtforkError::Disconnected`].
    pub fn start(&self, mut inbound: Inbound) -> JoinHandle<()> {
        let router = self.clone();
        tokio::spawn(async move {
            router.inner.logger.info(
                LogEvent::RouterStart,
                "Router started",
                LogOptions::default(),
            );
            while let Some(frame) = inbound.recv().await {
                router.route(frame).await;
            }
            let dropped = router.inner.pending.close().await;
            router.inner.logger.info(
                LogEvent::RouterStop,
                "Transport closed",
                LogOptions {
                    metadata: Some(serde_json::json!({ "pending_failed": dropped })),
                    ..Default::default()
                },
            );
        })
    }

    /// Close the transport and fail every pending call with
    /// [`WtforkError::Disconnected`]. The routing task exits once the
    /// inbound stream drains.
    pub async fn close(&self) {
        self.close_transport();
        self.inner.pending.close().await;
    }

    /// Close only the transport. Pending calls fail when the routing task
    /// sees the inbound stream end.
    pub(crate) fn close_transport(&self) {
        self.inner.transport.close();
    }

    pub fn identity(&self) -> &Identity {
        &self.inner.identity
    }

    pub fn logger(&self) -> &StructuredLogger {
        &self.inner.logger
    }

    pub fn metrics(&self) -> &Metrics {
        &self.inner.metrics
    }

    pub fn pending_calls(&self) -> &PendingCalls {
        &self.inner.pending
    }

    /// Send `payload` on `channel`. Fails if the payload cannot be
    /// represented as plain data or the transport is gone.
    pub async fn send<T: Serialize + ?Sized>(&self, channel: &str, payload: &T) -> Result<()> {
        let data = serde_json::to_value(payload)?;
        self.send_value(channel, data).await
    }

    pub async fn send_value(&self, channel: &str, data: Value) -> Result<()> {
        let frame = WireMessage::new(self.inner.identity.clone(), channel, data).pack()?;
        self.inner.transport.send_raw(Bytes::from(frame)).await?;

        self.inner.metrics.record_event_sent().await;
        self.inner.logger.debug(
            LogEvent::EventSent,
            "Sent",
            LogOptions {
                channel: Some(channel.to_string()),
                ..Default::default()
            },
        );
        Ok(())
    }

    /// Subscribe to every message on `channel`.
    pub async fn on<F>(&self, channel: &str, handler: F) -> SubscriptionId
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.subscribe(channel, Arc::new(handler), false).await
    }

    /// Subscribe to the next message on `channel` only.
    pub async fn once<F>(&self, channel: &str, handler: F) -> SubscriptionId
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.subscribe(channel, Arc::new(handler), true).await
    }

    /// Remove a subscription. Returns false if it was already gone.
    pub async fn off(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.inner.handlers.write().await;
        let mut removed = false;
        handlers.retain(|_, subs| {
            let before = subs.len();
            subs.retain(|sub| sub.id != id);
            removed |= subs.len() != before;
            !subs.is_empty()
        });
        removed
    }

    pub async fn listener_count(&self, channel: &str) -> usize {
        self.inner
            .handlers
            .read()
            .await
            .get(channel)
            .map_or(0, Vec::len)
    }

    async fn subscribe(&self, channel: &str, handler: Handler, once: bool) -> SubscriptionId {
        let id = SubscriptionId(self.inner.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.inner
            .handlers
            .write()
            .await
            .entry(channel.to_string())
            .or_default()
            .push(Subscription { id, once, handler });
        id
    }

    async fn route(&self, frame: Bytes) {
        let envelope = match WireMessage::unpack(&frame) {
            Ok(message) => message.wtfork,
            Err(e) => {
                self.drop_frame(&e.to_string()).await;
                return;
            }
        };
        if !envelope.is_for(&self.inner.identity) {
            self.drop_frame("foreign identity").await;
            return;
        }

        let channel = envelope.channel.clone();
        let payload = match self.inner.pending.try_complete(&channel, envelope.into_payload()).await {
            Ok(()) => return,
            Err(payload) => payload,
        };

        let called: Vec<Handler> = {
            let mut handlers = self.inner.handlers.write().await;
            let Some(subs) = handlers.get_mut(&channel) else {
                return;
            };
            let called = subs.iter().map(|sub| Arc::clone(&sub.handler)).collect();
            subs.retain(|sub| !sub.once);
            if subs.is_empty() {
                handlers.remove(&channel);
            }
            called
        };

        self.inner.metrics.record_event_received().await;
        self.inner.logger.debug(
            LogEvent::EventReceived,
            "Received",
            LogOptions {
                channel: Some(channel),
                ..Default::default()
            },
        );
        for handler in called {
            handler(payload.clone());
        }
    }

    async fn drop_frame(&self, reason: &str) {
        self.inner.metrics.record_dropped().await;
        self.inner.logger.message_dropped(reason);
    }
}
