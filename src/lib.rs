//! wtfork - event bus and RPC between a parent process and its children
//!
//! A parent spawns a child and both sides get a handle to the other: named
//! events flow both ways, and each side can call the methods the other side
//! exposes. Every message carries the pair's identity, so several pairs can
//! share a transport without seeing each other's traffic.
//!
//! # Example
//!
//! ## Child
//! ```rust,no_run
//! use wtfork::{ChildConfig, MethodRegistry, RemoteError};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> wtfork::Result<()> {
//!     let methods = MethodRegistry::builder()
//!         .sync_method("hello", |_| Ok(json!({"some": "data"})))
//!         .sync_method("goodbye", |_| Err(RemoteError::msg("Please don't leave me!")))
//!         .build();
//!
//!     let parent = ChildConfig::from_env()?.connect(methods).await?;
//!     parent.send("hello", &json!({"foo": "bar"})).await?;
//!
//!     let _: serde_json::Value = parent.methods().call("quit", vec![]).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Parent
//! ```rust,no_run
//! use wtfork::{call, fork, MethodRegistry};
//! use serde_json::{json, Value};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let methods = MethodRegistry::builder()
//!         .sync_method("quit", |_| Ok(Value::Null))
//!         .build();
//!
//!     let mut handle = fork("./child", Vec::<String>::new(), methods).await?;
//!     handle.child.on("hello", |payload| println!("child says {}", payload)).await;
//!     handle.wait_ready().await?;
//!
//!     let data: Value = call!(handle.child.methods(), hello("x")).await?;
//!     println!("hello -> {}", data);
//!
//!     handle.wait().await?;
//!     Ok(())
//! }
//! ```

mod error;
mod identity;
mod message;
mod marshal;
mod transport;
mod router;
mod registry;
mod rpc;
mod dispatcher;
mod peer;
mod parent;
mod child;
mod metrics;
mod logging;
mod call_macro;

#[cfg(test)]
mod test_utils;

pub use error::{Result, WtforkError};
pub use identity::{generate_id, Identity};
pub use message::{
    reply_channel, CallEnvelope, Direction, Envelope, ReplyEnvelope, Role, WireMessage,
    CALL_CHILD_TO_PARENT, CALL_PARENT_TO_CHILD, METHODS_CHILD, METHODS_PARENT, READY_CHANNEL,
};
pub use marshal::{deserialize, serialize, ErrorKind, RemoteError, SerializedError};
pub use transport::{
    find_free_port, Connection, Inbound, MemoryBus, MemoryTransport, Transport, ZmqTransport,
    PORT_ENV,
};
pub use router::{EventRouter, Handler, PendingCalls, SubscriptionId};
pub use registry::{
    is_exposable, Method, MethodFuture, MethodProvider, MethodRegistry, MethodResult,
    RegistryBuilder, PRIVATE_PREFIX,
};
pub use rpc::{RemoteMethod, RemoteMethods};
pub use dispatcher::UnknownMethodPolicy;
pub use peer::{Peer, PeerOptions};
pub use parent::{fork, ForkBuilder, ProcessHandle, CHILD_ENV, PARENT_METHODS_ENV};
pub use child::{is_child, parse_method_list, ChildConfig, ParentHandle};
pub use metrics::{CallOutcome, Metrics, MetricsSnapshot};
pub use logging::{
    default_json_handler, default_pretty_handler, LogEntry, LogEvent, LogHandler, LogLevel,
    LogOptions, StructuredLogger,
};
pub use call_macro::{ArgsExtractor, CallArgs, ToJsonArg};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
