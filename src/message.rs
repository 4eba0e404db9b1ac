use crate::error::{Result, WtforkError};
use crate::identity::Identity;
use crate::marshal::SerializedError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Readiness announcement sent by the child once its router is running.
pub const READY_CHANNEL: &str = "wtfork:child_ready";
/// Calls made by the parent and served by the child.
pub const CALL_PARENT_TO_CHILD: &str = "wtfork:call:parent_to_child";
/// Calls made by the child and served by the parent.
pub const CALL_CHILD_TO_PARENT: &str = "wtfork:call:child_to_parent";
/// Method list published by the parent after construction.
pub const METHODS_PARENT: &str = "wtfork:methods:parent";
/// Method list published by the child after construction.
pub const METHODS_CHILD: &str = "wtfork:methods:child";

const REPLY_PREFIX: &str = "wtfork:reply:";

/// Reply channel for one invocation.
pub fn reply_channel(method: &str, call_id: &str) -> String {
    format!("{}{}:{}", REPLY_PREFIX, method, call_id)
}

/// Which end of the pair this process is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Parent,
    Child,
}

impl Role {
    /// Direction of calls this side makes.
    pub fn outbound(self) -> Direction {
        match self {
            Role::Parent => Direction::ParentToChild,
            Role::Child => Direction::ChildToParent,
        }
    }

    /// Direction of calls this side serves.
    pub fn inbound(self) -> Direction {
        match self {
            Role::Parent => Direction::ChildToParent,
            Role::Child => Direction::ParentToChild,
        }
    }

    /// Channel this side publishes its method list on.
    pub fn methods_channel(self) -> &'static str {
        match self {
            Role::Parent => METHODS_PARENT,
            Role::Child => METHODS_CHILD,
        }
    }

    pub fn peer(self) -> Role {
        match self {
            Role::Parent => Role::Child,
            Role::Child => Role::Parent,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Parent => write!(f, "parent"),
            Role::Child => write!(f, "child"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ParentToChild,
    ChildToParent,
}

impl Direction {
    pub fn call_channel(self) -> &'static str {
        match self {
            Direction::ParentToChild => CALL_PARENT_TO_CHILD,
            Direction::ChildToParent => CALL_CHILD_TO_PARENT,
        }
    }
}

/// Tagged wrapper placed on the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "child_id")]
    pub identity: Identity,
    pub channel: String,
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    pub fn new(identity: Identity, channel: &str, data: Value) -> Self {
        Self {
            identity,
            channel: channel.to_string(),
            data,
        }
    }

    pub fn is_for(&self, identity: &Identity) -> bool {
        &self.identity == identity
    }

    /// Payload as handed to subscribers. Missing data becomes an empty object.
    pub fn into_payload(self) -> Value {
        match self.data {
            Value::Null => Value::Object(Default::default()),
            data => data,
        }
    }
}

/// Top-level frame shape: one namespaced field holding the envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    pub wtfork: Envelope,
}

impl WireMessage {
    pub fn new(identity: Identity, channel: &str, data: Value) -> Self {
        Self {
            wtfork: Envelope::new(identity, channel, data),
        }
    }

    pub fn pack(&self) -> Result<Vec<u8>> {
        // Named (map-based) encoding so peers in other languages see field names
        let packed = rmp_serde::to_vec_named(self).map_err(WtforkError::from)?;
        Ok(packed)
    }

    pub fn unpack(data: &[u8]) -> Result<Self> {
        rmp_serde::from_slice(data).map_err(WtforkError::from)
    }
}

/// Payload of a method-call message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallEnvelope {
    pub method: String,
    #[serde(rename = "callId")]
    pub call_id: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

impl CallEnvelope {
    pub fn new(method: &str, call_id: String, args: Vec<Value>) -> Self {
        Self {
            method: method.to_string(),
            call_id,
            args,
        }
    }

    pub fn reply_channel(&self) -> String {
        reply_channel(&self.method, &self.call_id)
    }
}

/// Payload of a reply message. Exactly one of `resolve` or `reject`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyEnvelope {
    Resolve(Value),
    Reject(SerializedError),
}
