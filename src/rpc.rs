//! Local stubs for the methods the peer exposes.

use crate::call_macro::CallArgs;
use crate::error::{Result, WtforkError};
use crate::identity::generate_id;
use crate::marshal;
use crate::message::{reply_channel, CallEnvelope, Direction, ReplyEnvelope};
use crate::metrics::CallOutcome;
use crate::registry::is_exposable;
use crate::router::EventRouter;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

/// Callable proxy for one remote method.
///
/// Each call sends a [`CallEnvelope`] with a fresh call id and waits for the
/// reply on the channel derived from `(method, call id)`. Without a timeout
/// the wait is unbounded: a peer that never answers leaves the call pending.
#[derive(Clone)]
pub struct RemoteMethod {
    name: Arc<str>,
    direction: Direction,
    router: EventRouter,
}

impl RemoteMethod {
    pub(crate) fn new(name: &str, direction: Direction, router: EventRouter) -> Self {
        Self {
            name: Arc::from(name),
            direction,
            router,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Call and return the raw JSON result.
    pub async fn call_raw(&self, args: Vec<Value>) -> Result<Value> {
        self.round_trip(args, None).await
    }

    /// Call and deserialize the result.
    pub async fn call<T: DeserializeOwned>(&self, args: Vec<Value>) -> Result<T> {
        let value = self.call_raw(args).await?;
        serde_json::from_value(value).map_err(WtforkError::Json)
    }

    /// Call with a tuple of arguments. An argument with no JSON form fails
    /// with [`WtforkError::Json`] before anything is sent.
    pub async fn invoke<A: CallArgs, T: DeserializeOwned>(&self, args: A) -> Result<T> {
        self.call(args.to_json_args()?).await
    }

    /// Call, giving up after `timeout`. The pending entry is removed on expiry,
    /// so a late reply is ignored.
    pub async fn call_with_timeout(&self, args: Vec<Value>, timeout: Duration) -> Result<Value> {
        self.round_trip(args, Some(timeout)).await
    }

    async fn round_trip(&self, args: Vec<Value>, timeout: Option<Duration>) -> Result<Value> {
        let call_id = generate_id();
        let channel = reply_channel(&self.name, &call_id);
        let pending = self.router.pending_calls();
        let metrics = self.router.metrics();
        let logger = self.router.logger();

        let started = metrics.start_call().await;
        let mut guard = AbandonGuard {
            router: self.router.clone(),
            channel: channel.clone(),
            started,
            armed: true,
        };

        let reply_rx = match pending.register(channel.clone()).await {
            Ok(rx) => rx,
            Err(e) => {
                guard.armed = false;
                metrics.end_call(started, CallOutcome::NotSent).await;
                return Err(e);
            }
        };
        logger.call_start(&call_id, &self.name);

        let call = CallEnvelope::new(&self.name, call_id.clone(), args);
        if let Err(e) = self.router.send(self.direction.call_channel(), &call).await {
            guard.armed = false;
            pending.remove(&channel).await;
            metrics.end_call(started, CallOutcome::NotSent).await;
            return Err(e);
        }

        let reply = match timeout {
            None => reply_rx.await,
            Some(limit) => match tokio::time::timeout(limit, reply_rx).await {
                Ok(reply) => reply,
                Err(_) => {
                    guard.armed = false;
                    pending.remove(&channel).await;
                    metrics.end_call(started, CallOutcome::TimedOut).await;
                    let timeout_ms = limit.as_millis() as u64;
                    logger.call_timeout(&call_id, &self.name, timeout_ms);
                    return Err(WtforkError::Timeout {
                        method: self.name.to_string(),
                        timeout_ms,
                    });
                }
            },
        };
        guard.armed = false;

        match reply {
            Ok(ReplyEnvelope::Resolve(value)) => {
                let latency = metrics.end_call(started, CallOutcome::Resolved).await;
                logger.call_end(&call_id, &self.name, latency, None);
                Ok(value)
            }
            Ok(ReplyEnvelope::Reject(serialized)) => {
                let err = marshal::deserialize(&serialized);
                let latency = metrics.end_call(started, CallOutcome::Rejected).await;
                logger.call_end(
                    &call_id,
                    &self.name,
                    latency,
                    Some((err.message.clone(), err.kind.to_string())),
                );
                Err(WtforkError::Remote(err))
            }
            Err(_) => {
                metrics.end_call(started, CallOutcome::Disconnected).await;
                Err(WtforkError::Disconnected)
            }
        }
    }
}

/// Releases a call's pending entry when the caller drops the call future
/// before it settles, e.g. inside `select!` or an outer timeout.
struct AbandonGuard {
    router: EventRouter,
    channel: String,
    started: Instant,
    armed: bool,
}

impl Drop for AbandonGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        // Cleanup is async; without a runtime there is nothing left to clean
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let router = self.router.clone();
        let channel = std::mem::take(&mut self.channel);
        let started = self.started;
        runtime.spawn(async move {
            router.pending_calls().remove(&channel).await;
            router.metrics().end_call(started, CallOutcome::Abandoned).await;
        });
    }
}

impl std::fmt::Debug for RemoteMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteMethod")
            .field("name", &self.name)
            .field("direction", &self.direction)
            .finish()
    }
}

/// Stubs for every method the peer has advertised.
#[derive(Clone)]
pub struct RemoteMethods {
    direction: Direction,
    router: EventRouter,
    names: Arc<RwLock<Vec<String>>>,
}

impl RemoteMethods {
    pub(crate) fn new(direction: Direction, router: EventRouter) -> Self {
        Self {
            direction,
            router,
            names: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Replace the advertised set. Private names are dropped.
    pub(crate) fn replace<I, S>(&self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut advertised: Vec<String> = Vec::new();
        for name in names.into_iter().map(Into::into) {
            if is_exposable(&name) && !advertised.contains(&name) {
                advertised.push(name);
            }
        }
        *self.names.write().unwrap_or_else(PoisonError::into_inner) = advertised;
    }

    /// Advertised names, in the order the peer listed them.
    pub fn names(&self) -> Vec<String> {
        self.names
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|n| n == name)
    }

    pub fn len(&self) -> usize {
        self.names.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stub for an advertised method.
    pub fn get(&self, name: &str) -> Option<RemoteMethod> {
        self.contains(name).then(|| self.stub(name))
    }

    /// Stub for `name` whether or not the peer advertised it. If the peer has
    /// no such method, calls through this stub never settle unless a timeout
    /// is given or the peer rejects unknown methods.
    pub fn stub(&self, name: &str) -> RemoteMethod {
        RemoteMethod::new(name, self.direction, self.router.clone())
    }

    /// Call an advertised method and deserialize the result.
    pub async fn call<T: DeserializeOwned>(&self, name: &str, args: Vec<Value>) -> Result<T> {
        self.advertised(name)?.call(args).await
    }

    pub async fn call_raw(&self, name: &str, args: Vec<Value>) -> Result<Value> {
        self.advertised(name)?.call_raw(args).await
    }

    fn advertised(&self, name: &str) -> Result<RemoteMethod> {
        self.get(name)
            .ok_or_else(|| WtforkError::InvalidArgument(format!("'{}' is not advertised by the peer", name)))
    }
}

impl std::fmt::Debug for RemoteMethods {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteMethods")
            .field("direction", &self.direction)
            .field("names", &self.names())
            .finish()
    }
}
