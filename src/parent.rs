//! Parent side: spawn a child program and wire it up as a [`Peer`].

use crate::dispatcher::UnknownMethodPolicy;
use crate::error::{Result, WtforkError};
use crate::identity::Identity;
use crate::logging::StructuredLogger;
use crate::message::Role;
use crate::metrics::Metrics;
use crate::peer::{Peer, PeerOptions};
use crate::registry::MethodRegistry;
use crate::transport::{find_free_port, ZmqTransport, PORT_ENV};
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, Command};

/// Role marker. Its presence makes a process a child; its value is the
/// pair's identity.
pub const CHILD_ENV: &str = "WTFORK_CHILD";

/// Comma-separated names of the methods the parent exposes.
pub const PARENT_METHODS_ENV: &str = "WTFORK_PARENT_METHODS";

const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(10);

/// Configures and spawns a child process.
///
/// ```rust,no_run
/// use wtfork::{ForkBuilder, MethodRegistry};
/// use serde_json::json;
/// use std::time::Duration;
///
/// # async fn demo() -> wtfork::Result<()> {
/// let methods = MethodRegistry::builder()
///     .sync_method("ping", |_| Ok(json!("pong")))
///     .build();
///
/// let handle = ForkBuilder::new("./child")
///     .arg("--quiet")
///     .methods(methods)
///     .ready_timeout(Duration::from_secs(5))
///     .spawn()
///     .await?;
///
/// handle.wait_ready().await?;
/// let answer: String = handle.child.methods().call("hello", vec![json!("x")]).await?;
/// # Ok(())
/// # }
/// ```
pub struct ForkBuilder {
    program: OsString,
    args: Vec<OsString>,
    envs: Vec<(OsString, OsString)>,
    current_dir: Option<PathBuf>,
    inherit_stdio: bool,
    methods: MethodRegistry,
    identity: Option<Identity>,
    ready_timeout: Duration,
    options: PeerOptions,
}

impl ForkBuilder {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            current_dir: None,
            inherit_stdio: true,
            methods: MethodRegistry::empty(),
            identity: None,
            ready_timeout: DEFAULT_READY_TIMEOUT,
            options: PeerOptions::default(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Let the child share this process's stdout and stderr (the default).
    /// When off, both are discarded.
    pub fn inherit_stdio(mut self, inherit: bool) -> Self {
        self.inherit_stdio = inherit;
        self
    }

    /// Methods the child may call on this process.
    pub fn methods(mut self, methods: MethodRegistry) -> Self {
        self.methods = methods;
        self
    }

    /// Use a fixed pair identity instead of a random one.
    pub fn identity(mut self, identity: impl Into<Identity>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    /// Upper bound used by [`ProcessHandle::wait_ready`].
    pub fn ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.options.logger = logger;
        self
    }

    pub fn metrics(mut self, metrics: Metrics) -> Self {
        self.options.metrics = metrics;
        self
    }

    pub fn unknown_method_policy(mut self, policy: UnknownMethodPolicy) -> Self {
        self.options.unknown_method_policy = policy;
        self
    }

    /// Bind the transport, start routing, then launch the child.
    ///
    /// Routing starts before the process exists, so the child's ready
    /// announcement cannot be missed.
    pub async fn spawn(self) -> Result<ProcessHandle> {
        if self.program.is_empty() {
            return Err(WtforkError::InvalidConfig("program must not be empty".to_string()));
        }

        let identity = self.identity.unwrap_or_else(Identity::generate);
        let port = find_free_port()?;
        let connection = ZmqTransport::bind(port).await?;
        let parent_methods = self.methods.names().join(",");

        let logger = self
            .options
            .logger
            .with_context(identity.as_str(), &Role::Parent.to_string());
        let child = Peer::connect(
            Role::Parent,
            identity.clone(),
            connection,
            self.methods,
            Vec::new(),
            self.options,
        )
        .await?;

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(self.envs)
            .env(CHILD_ENV, identity.as_str())
            .env(PARENT_METHODS_ENV, parent_methods)
            .env(PORT_ENV, port.to_string())
            .kill_on_drop(true);
        if let Some(dir) = self.current_dir {
            cmd.current_dir(dir);
        }
        if !self.inherit_stdio {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }

        let process = cmd.spawn()?;
        logger.process_spawn(&self.program.to_string_lossy(), process.id());

        Ok(ProcessHandle {
            child,
            process,
            ready_timeout: self.ready_timeout,
            logger,
        })
    }
}

/// Spawn `program` with `args`, exposing `methods` to it.
pub async fn fork<I, S>(program: &str, args: I, methods: MethodRegistry) -> Result<ProcessHandle>
where
    I: IntoIterator<Item = S>,
    S: Into<OsString>,
{
    ForkBuilder::new(program).args(args).methods(methods).spawn().await
}

/// A spawned child process and the peer connected to it.
#[derive(Debug)]
pub struct ProcessHandle {
    /// The child as seen from here: events, stubs, readiness.
    pub child: Peer,
    process: Child,
    ready_timeout: Duration,
    logger: StructuredLogger,
}

impl ProcessHandle {
    /// OS process id. `None` once the process has been reaped.
    pub fn id(&self) -> Option<u32> {
        self.process.id()
    }

    /// Wait for the child's ready announcement, up to the configured timeout.
    pub async fn wait_ready(&self) -> Result<()> {
        self.child.wait_ready(self.ready_timeout).await
    }

    /// Wait for the process to exit.
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        let status = self.process.wait().await?;
        self.logger.process_exit(status.code());
        Ok(status)
    }

    /// Exit status if the process has already exited.
    pub fn try_wait(&mut self) -> Result<Option<ExitStatus>> {
        Ok(self.process.try_wait()?)
    }

    /// Kill the process and wait for it, then close the connection. Calls
    /// still waiting on the child fail with [`WtforkError::Disconnected`].
    pub async fn kill(&mut self) -> Result<()> {
        self.process.kill().await?;
        self.logger.process_exit(None);
        self.child.close().await;
        Ok(())
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        // Releases the bound port even if clones of `child` are still around
        self.child.router().close_transport();
    }
}
