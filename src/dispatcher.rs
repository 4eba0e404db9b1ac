//! Serves incoming calls against the local method registry.

use crate::logging::{LogEvent, LogOptions};
use crate::marshal::{self, ErrorKind, RemoteError};
use crate::message::{CallEnvelope, Direction, ReplyEnvelope};
use crate::registry::MethodRegistry;
use crate::router::{EventRouter, SubscriptionId};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::RwLock;

/// What to do with a call naming a method this side does not expose.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnknownMethodPolicy {
    /// Send nothing. The caller's stub stays pending.
    #[default]
    Ignore,
    /// Reply with a `ReferenceError` rejection.
    Reject,
}

/// Registry slot that can be swapped while calls are being served.
pub type SharedRegistry = Arc<RwLock<Arc<MethodRegistry>>>;

/// Subscribe to `direction`'s call channel and serve each call on its own
/// task, so slow methods do not hold up later calls.
pub async fn install(
    router: &EventRouter,
    direction: Direction,
    registry: SharedRegistry,
    policy: UnknownMethodPolicy,
) -> SubscriptionId {
    let server = router.clone();
    router
        .on(direction.call_channel(), move |payload| {
            let call: CallEnvelope = match serde_json::from_value(payload) {
                Ok(call) => call,
                Err(e) => {
                    server
                        .logger()
                        .message_dropped(&format!("malformed call envelope: {}", e));
                    return;
                }
            };
            let router = server.clone();
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                handle_call(&router, &registry, policy, call).await;
            });
        })
        .await
}

async fn handle_call(
    router: &EventRouter,
    registry: &SharedRegistry,
    policy: UnknownMethodPolicy,
    call: CallEnvelope,
) {
    let logger = router.logger();
    let reply_channel = call.reply_channel();

    // Snapshot the registry; a concurrent swap does not affect this call
    let current = Arc::clone(&*registry.read().await);
    if !current.contains(&call.method) {
        logger.unknown_method(&call.call_id, &call.method);
        if policy == UnknownMethodPolicy::Reject {
            let err = RemoteError::new(
                ErrorKind::Reference,
                format!("{} is not a function", call.method),
            );
            send_reply(router, &reply_channel, ReplyEnvelope::Reject(marshal::serialize(&err))).await;
        }
        return;
    }

    router.metrics().record_call_served().await;
    logger.debug(
        LogEvent::CallDispatch,
        &format!("Serving {}", call.method),
        LogOptions {
            call_id: Some(call.call_id.clone()),
            method: Some(call.method.clone()),
            ..Default::default()
        },
    );

    // A panicking method must still produce exactly one reply
    let method = call.method.clone();
    let task = tokio::spawn(async move {
        match current.invoke(&method, call.args) {
            Some(pending) => pending.await,
            None => Err(RemoteError::new(
                ErrorKind::Reference,
                format!("{} is not a function", method),
            )),
        }
    });
    let outcome = match task.await {
        Ok(result) => result,
        Err(_) => Err(RemoteError::msg(format!("{} panicked", call.method))),
    };

    let reply = match outcome {
        Ok(value) => ReplyEnvelope::Resolve(value),
        Err(err) => ReplyEnvelope::Reject(marshal::serialize(&err)),
    };
    send_reply(router, &reply_channel, reply).await;
}

async fn send_reply(router: &EventRouter, channel: &str, reply: ReplyEnvelope) {
    // Results that cannot be represented on the wire are rejected instead
    let value = match serde_json::to_value(&reply) {
        Ok(value) => value,
        Err(e) => unrepresentable(&e),
    };
    if let Err(e) = router.send_value(channel, value).await {
        router.logger().warn(
            LogEvent::CallError,
            &format!("Failed to send reply: {}", e),
            LogOptions {
                channel: Some(channel.to_string()),
                error: Some(e.to_string()),
                ..Default::default()
            },
        );
    }
}

fn unrepresentable(err: &serde_json::Error) -> Value {
    let err = RemoteError::new(ErrorKind::Type, format!("Result is not serializable: {}", err));
    serde_json::to_value(ReplyEnvelope::Reject(marshal::serialize(&err))).unwrap_or(Value::Null)
}
