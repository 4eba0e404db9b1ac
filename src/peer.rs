//! One side of a connected pair.
//!
//! A [`Peer`] owns the router for its identity, serves calls against its
//! local registry, keeps stubs for whatever the other side advertises, and
//! tracks the readiness handshake. The parent's view of its child and the
//! child's view of its parent are both peers; only the [`Role`] differs.

use crate::dispatcher::{self, SharedRegistry, UnknownMethodPolicy};
use crate::error::{Result, WtforkError};
use crate::identity::Identity;
use crate::logging::{LogEvent, LogOptions, StructuredLogger};
use crate::message::{Role, READY_CHANNEL};
use crate::metrics::Metrics;
use crate::registry::MethodRegistry;
use crate::router::{EventRouter, SubscriptionId};
use crate::rpc::RemoteMethods;
use crate::transport::Connection;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};

/// Options shared by both roles.
#[derive(Clone, Default)]
pub struct PeerOptions {
    pub logger: StructuredLogger,
    pub metrics: Metrics,
    pub unknown_method_policy: UnknownMethodPolicy,
}

/// Handle to the other process in a pair.
#[derive(Clone)]
pub struct Peer {
    inner: Arc<PeerInner>,
}

struct PeerInner {
    role: Role,
    router: EventRouter,
    local: SharedRegistry,
    remote: RemoteMethods,
    ready: Arc<watch::Sender<bool>>,
}

impl Peer {
    /// Wire up one side of a pair over `connection` and start routing.
    ///
    /// `remote_names` seeds the stub map with methods the other side is
    /// known to expose before it advertises anything itself. As the child,
    /// this announces readiness once routing has started.
    pub async fn connect(
        role: Role,
        identity: Identity,
        connection: Connection,
        registry: MethodRegistry,
        remote_names: Vec<String>,
        options: PeerOptions,
    ) -> Result<Self> {
        let logger = options
            .logger
            .with_context(identity.as_str(), &role.to_string());
        let router = EventRouter::new(identity, connection.outbound, logger, options.metrics);

        let local: SharedRegistry = Arc::new(RwLock::new(Arc::new(registry)));
        dispatcher::install(
            &router,
            role.inbound(),
            Arc::clone(&local),
            options.unknown_method_policy,
        )
        .await;

        let remote = RemoteMethods::new(role.outbound(), router.clone());
        remote.replace(remote_names);
        let stubs = remote.clone();
        let advert_logger = router.logger().clone();
        router
            .on(role.peer().methods_channel(), move |payload| {
                match serde_json::from_value::<Vec<String>>(payload) {
                    Ok(names) => stubs.replace(names),
                    Err(e) => advert_logger.message_dropped(&format!("malformed method list: {}", e)),
                }
            })
            .await;

        let (ready, _) = watch::channel(false);
        let ready = Arc::new(ready);
        if role == Role::Parent {
            let signal = Arc::clone(&ready);
            let ready_logger = router.logger().clone();
            router
                .once(READY_CHANNEL, move |_| {
                    ready_logger.info(LogEvent::ChildReady, "Child is ready", LogOptions::default());
                    signal.send_replace(true);
                })
                .await;
        }

        router.start(connection.inbound);

        let peer = Self {
            inner: Arc::new(PeerInner {
                role,
                router,
                local,
                remote,
                ready,
            }),
        };

        if role == Role::Child {
            // Method list first, so the parent has stubs by the time it sees ready
            if !peer.inner.local.read().await.is_empty() {
                peer.publish_methods().await?;
            }
            let identity = peer.identity().as_str().to_string();
            peer.inner.router.send(READY_CHANNEL, &identity).await?;
            peer.inner.ready.send_replace(true);
        }

        Ok(peer)
    }

    pub fn role(&self) -> Role {
        self.inner.role
    }

    pub fn identity(&self) -> &Identity {
        self.inner.router.identity()
    }

    pub fn router(&self) -> &EventRouter {
        &self.inner.router
    }

    pub fn metrics(&self) -> &Metrics {
        self.inner.router.metrics()
    }

    pub fn logger(&self) -> &StructuredLogger {
        self.inner.router.logger()
    }

    /// Emit an event to the other side.
    pub async fn send<T: Serialize + ?Sized>(&self, channel: &str, payload: &T) -> Result<()> {
        self.inner.router.send(channel, payload).await
    }

    pub async fn on<F>(&self, channel: &str, handler: F) -> SubscriptionId
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.inner.router.on(channel, handler).await
    }

    pub async fn once<F>(&self, channel: &str, handler: F) -> SubscriptionId
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.inner.router.once(channel, handler).await
    }

    pub async fn off(&self, id: SubscriptionId) -> bool {
        self.inner.router.off(id).await
    }

    /// Stubs for the methods the other side exposes.
    pub fn methods(&self) -> &RemoteMethods {
        &self.inner.remote
    }

    /// Methods this side currently serves.
    pub async fn local_methods(&self) -> Arc<MethodRegistry> {
        Arc::clone(&*self.inner.local.read().await)
    }

    /// Serve `registry` from now on and advertise its names to the other side.
    /// Calls already in flight finish against the previous registry.
    pub async fn set_methods(&self, registry: MethodRegistry) -> Result<()> {
        *self.inner.local.write().await = Arc::new(registry);
        self.publish_methods().await
    }

    async fn publish_methods(&self) -> Result<()> {
        let names = self.inner.local.read().await.names().to_vec();
        self.inner
            .router
            .send(self.inner.role.methods_channel(), &names)
            .await?;
        self.logger().info(
            LogEvent::MethodsAdvertised,
            &format!("Advertised {} method(s)", names.len()),
            LogOptions {
                channel: Some(self.inner.role.methods_channel().to_string()),
                metadata: Some(serde_json::json!({ "methods": names })),
                ..Default::default()
            },
        );
        Ok(())
    }

    /// Whether the readiness handshake has completed. Advisory only; nothing
    /// else waits on it.
    pub fn is_ready(&self) -> bool {
        *self.inner.ready.borrow()
    }

    /// Wait for the readiness handshake, up to `timeout`.
    pub async fn wait_ready(&self, timeout: Duration) -> Result<()> {
        let mut rx = self.inner.ready.subscribe();
        let waited = tokio::time::timeout(timeout, rx.wait_for(|ready| *ready))
            .await
            .map(|changed| changed.map(|_| ()));
        match waited {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(WtforkError::Disconnected),
            Err(_) => Err(WtforkError::ReadyTimeout(timeout.as_millis() as u64)),
        }
    }

    /// Shut this side down. The transport closes, every call still waiting
    /// for a reply fails with [`WtforkError::Disconnected`], and later sends
    /// and calls fail the same way.
    pub async fn close(&self) {
        self.inner.router.close().await;
        self.logger().info(LogEvent::RouterStop, "Peer closed", LogOptions::default());
    }

    /// Calls made from this side that are still waiting for a reply.
    pub async fn pending_call_count(&self) -> usize {
        self.inner.router.pending_calls().len().await
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("role", &self.inner.role)
            .field("identity", self.identity())
            .field("ready", &self.is_ready())
            .field("remote", &self.inner.remote)
            .finish()
    }
}
