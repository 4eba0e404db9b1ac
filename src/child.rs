//! Child side: connect back to the parent that spawned this process.
//!
//! ```rust,no_run
//! use wtfork::{ChildConfig, MethodRegistry};
//! use serde_json::json;
//!
//! # async fn demo() -> wtfork::Result<()> {
//! let methods = MethodRegistry::builder()
//!     .sync_method("hello", |_| Ok(json!({"some": "data"})))
//!     .build();
//!
//! let parent = ChildConfig::from_env()?.connect(methods).await?;
//! parent.send("hello", &json!({"foo": "bar"})).await?;
//! # Ok(())
//! # }
//! ```

use crate::dispatcher::UnknownMethodPolicy;
use crate::error::{Result, WtforkError};
use crate::identity::Identity;
use crate::logging::StructuredLogger;
use crate::message::Role;
use crate::metrics::Metrics;
use crate::parent::{CHILD_ENV, PARENT_METHODS_ENV};
use crate::peer::{Peer, PeerOptions};
use crate::registry::MethodRegistry;
use crate::transport::{Connection, ZmqTransport, PORT_ENV};
use std::env;
use std::ops::Deref;

/// Whether this process was spawned as a child.
pub fn is_child() -> bool {
    env::var_os(CHILD_ENV).is_some()
}

/// Split a comma-separated method list. Empty entries are skipped.
pub fn parse_method_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

/// How the child reaches its parent.
#[derive(Clone)]
pub struct ChildConfig {
    identity: Identity,
    parent_methods: Vec<String>,
    port: Option<u16>,
    options: PeerOptions,
}

impl ChildConfig {
    pub fn new(identity: impl Into<Identity>) -> Self {
        Self {
            identity: identity.into(),
            parent_methods: Vec::new(),
            port: None,
            options: PeerOptions::default(),
        }
    }

    /// Read the identity, parent method list and port the parent passed
    /// through the environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let identity = lookup(CHILD_ENV).ok_or(WtforkError::NotAChild)?;
        if identity.is_empty() {
            return Err(WtforkError::InvalidConfig(format!("{} is empty", CHILD_ENV)));
        }

        let mut config = Self::new(identity);
        if let Some(list) = lookup(PARENT_METHODS_ENV) {
            config.parent_methods = parse_method_list(&list);
        }
        if let Some(port) = lookup(PORT_ENV) {
            let port = port
                .parse()
                .map_err(|_| WtforkError::InvalidConfig(format!("{} is not a port: {}", PORT_ENV, port)))?;
            config.port = Some(port);
        }
        Ok(config)
    }

    pub fn with_parent_methods<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.parent_methods = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.options.logger = logger;
        self
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.options.metrics = metrics;
        self
    }

    pub fn with_unknown_method_policy(mut self, policy: UnknownMethodPolicy) -> Self {
        self.options.unknown_method_policy = policy;
        self
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn parent_methods(&self) -> &[String] {
        &self.parent_methods
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Connect to the parent over ZMQ, serve `methods`, and announce readiness.
    pub async fn connect(self, methods: MethodRegistry) -> Result<ParentHandle> {
        let port = self
            .port
            .ok_or_else(|| WtforkError::InvalidConfig(format!("{} is not set", PORT_ENV)))?;
        let connection = ZmqTransport::connect(port).await?;
        self.connect_with(connection, methods).await
    }

    /// Same as [`ChildConfig::connect`] over an already established connection.
    pub async fn connect_with(self, connection: Connection, methods: MethodRegistry) -> Result<ParentHandle> {
        let peer = Peer::connect(
            Role::Child,
            self.identity,
            connection,
            methods,
            self.parent_methods,
            self.options,
        )
        .await?;
        Ok(ParentHandle { peer })
    }
}

/// The parent as seen from the child.
#[derive(Clone, Debug)]
pub struct ParentHandle {
    peer: Peer,
}

impl ParentHandle {
    /// Replace the methods this child serves and advertise them to the parent.
    pub async fn set_child_methods(&self, methods: MethodRegistry) -> Result<()> {
        self.peer.set_methods(methods).await
    }

    pub fn into_peer(self) -> Peer {
        self.peer
    }
}

impl Deref for ParentHandle {
    type Target = Peer;

    fn deref(&self) -> &Peer {
        &self.peer
    }
}
