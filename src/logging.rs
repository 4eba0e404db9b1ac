//! Structured logging with call correlation for observability.
//!
//! Provides JSON-formatted logs with pluggable output handlers. No handler
//! is installed by default, so a fresh logger is silent.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Log levels for structured logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

/// Standard log events for the event bus and RPC layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogEvent {
    // Process
    ProcessSpawn,
    ProcessExit,
    ChildReady,

    // Router
    RouterStart,
    RouterStop,
    MessageDropped,
    EventSent,
    EventReceived,

    // Calls
    CallStart,
    CallEnd,
    CallError,
    CallTimeout,
    CallDispatch,
    UnknownMethod,
    MethodsAdvertised,
}

impl fmt::Display for LogEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = serde_json::to_string(self).unwrap_or_default();
        write!(f, "{}", s.trim_matches('"'))
    }
}

/// Structured log entry with all context.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogEntry {
    pub event: String,
    pub level: String,
    pub message: String,
    pub timestamp: f64,

    // Context
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,

    // Correlation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl LogEntry {
    /// Convert to JSON string.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Type alias for log handler function.
pub type LogHandler = Arc<dyn Fn(&LogEntry) + Send + Sync>;

/// Structured logger with pluggable handlers.
///
/// # Example
///
/// ```rust,no_run
/// use wtfork::{StructuredLogger, LogEvent, LogLevel, LogOptions};
/// use std::sync::Arc;
///
/// let logger = StructuredLogger::new(
///     Some(Arc::new(|entry| {
///         println!("{}", entry.to_json());
///     })),
///     LogLevel::Info,
/// );
///
/// logger.info(LogEvent::ProcessSpawn, "Spawned child", LogOptions::default());
/// ```
#[derive(Clone)]
pub struct StructuredLogger {
    handler: Option<LogHandler>,
    level: LogLevel,
    identity: Option<String>,
    role: Option<String>,
}

impl StructuredLogger {
    pub fn new(handler: Option<LogHandler>, level: LogLevel) -> Self {
        Self {
            handler,
            level,
            identity: None,
            role: None,
        }
    }

    /// Logger without a handler. Every call is a no-op.
    pub fn disabled() -> Self {
        Self::new(None, LogLevel::Error)
    }

    pub fn set_handler(&mut self, handler: LogHandler) {
        self.handler = Some(handler);
    }

    /// Copy of this logger tagged with the pair's identity and this side's role.
    pub fn with_context(&self, identity: &str, role: &str) -> Self {
        let mut logger = self.clone();
        logger.identity = Some(identity.to_string());
        logger.role = Some(role.to_string());
        logger
    }

    fn should_log(&self, level: LogLevel) -> bool {
        level as u8 >= self.level as u8
    }

    /// Log an event with structured data.
    pub fn log(&self, event: LogEvent, message: &str, level: LogLevel, options: LogOptions) {
        let Some(ref handler) = self.handler else {
            return;
        };
        if !self.should_log(level) {
            return;
        }

        let entry = LogEntry {
            event: event.to_string(),
            level: level.to_string(),
            message: message.to_string(),
            timestamp: current_timestamp(),
            identity: self.identity.clone(),
            role: self.role.clone(),
            channel: options.channel,
            call_id: options.call_id,
            method: options.method,
            duration_ms: options.duration_ms,
            success: options.success,
            error: options.error,
            error_type: options.error_type,
            metadata: options.metadata,
        };

        handler(&entry);
    }

    pub fn debug(&self, event: LogEvent, message: &str, options: LogOptions) {
        self.log(event, message, LogLevel::Debug, options);
    }

    pub fn info(&self, event: LogEvent, message: &str, options: LogOptions) {
        self.log(event, message, LogLevel::Info, options);
    }

    pub fn warn(&self, event: LogEvent, message: &str, options: LogOptions) {
        self.log(event, message, LogLevel::Warn, options);
    }

    pub fn error(&self, event: LogEvent, message: &str, options: LogOptions) {
        self.log(event, message, LogLevel::Error, options);
    }

    // Convenience methods for common events

    pub fn call_start(&self, call_id: &str, method: &str) {
        self.debug(
            LogEvent::CallStart,
            &format!("Calling {}", method),
            LogOptions {
                call_id: Some(call_id.to_string()),
                method: Some(method.to_string()),
                ..Default::default()
            },
        );
    }

    pub fn call_end(
        &self,
        call_id: &str,
        method: &str,
        duration_ms: f64,
        error: Option<(String, String)>,
    ) {
        let success = error.is_none();
        let (event, level) = if success {
            (LogEvent::CallEnd, LogLevel::Debug)
        } else {
            (LogEvent::CallError, LogLevel::Warn)
        };
        let (error, error_type) = match error {
            Some((message, kind)) => (Some(message), Some(kind)),
            None => (None, None),
        };

        self.log(
            event,
            &format!("{} {}", if success { "Completed" } else { "Failed" }, method),
            level,
            LogOptions {
                call_id: Some(call_id.to_string()),
                method: Some(method.to_string()),
                duration_ms: Some(duration_ms),
                success: Some(success),
                error,
                error_type,
                ..Default::default()
            },
        );
    }

    pub fn call_timeout(&self, call_id: &str, method: &str, timeout_ms: u64) {
        self.warn(
            LogEvent::CallTimeout,
            &format!("Call to {} timed out after {}ms", method, timeout_ms),
            LogOptions {
                call_id: Some(call_id.to_string()),
                method: Some(method.to_string()),
                ..Default::default()
            },
        );
    }

    pub fn message_dropped(&self, reason: &str) {
        self.debug(
            LogEvent::MessageDropped,
            &format!("Dropped inbound message: {}", reason),
            LogOptions::default(),
        );
    }

    pub fn unknown_method(&self, call_id: &str, method: &str) {
        self.warn(
            LogEvent::UnknownMethod,
            &format!("No local method named {}", method),
            LogOptions {
                call_id: Some(call_id.to_string()),
                method: Some(method.to_string()),
                ..Default::default()
            },
        );
    }

    pub fn process_spawn(&self, program: &str, pid: Option<u32>) {
        self.info(
            LogEvent::ProcessSpawn,
            &format!("Spawned {}", program),
            LogOptions {
                metadata: Some(serde_json::json!({ "pid": pid })),
                ..Default::default()
            },
        );
    }

    pub fn process_exit(&self, exit_code: Option<i32>) {
        let level = if exit_code == Some(0) {
            LogLevel::Info
        } else {
            LogLevel::Warn
        };
        self.log(
            LogEvent::ProcessExit,
            &match exit_code {
                Some(code) => format!("Child process exited with code {}", code),
                None => "Child process terminated by signal".to_string(),
            },
            level,
            LogOptions {
                metadata: Some(serde_json::json!({ "exit_code": exit_code })),
                ..Default::default()
            },
        );
    }
}

impl Default for StructuredLogger {
    fn default() -> Self {
        Self::disabled()
    }
}

impl fmt::Debug for StructuredLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StructuredLogger")
            .field("enabled", &self.handler.is_some())
            .field("level", &self.level)
            .field("identity", &self.identity)
            .field("role", &self.role)
            .finish()
    }
}

/// Options for log entries.
#[derive(Default)]
pub struct LogOptions {
    pub channel: Option<String>,
    pub call_id: Option<String>,
    pub method: Option<String>,
    pub duration_ms: Option<f64>,
    pub success: Option<bool>,
    pub error: Option<String>,
    pub error_type: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

/// Default handler that prints JSON to stderr.
///
/// Stdout is left alone because children frequently inherit it.
pub fn default_json_handler(entry: &LogEntry) {
    eprintln!("{}", entry.to_json());
}

/// Default handler that prints human-readable output.
pub fn default_pretty_handler(entry: &LogEntry) {
    eprintln!("{}", format_pretty(entry));
}

fn format_pretty(entry: &LogEntry) -> String {
    let timestamp = entry.timestamp as u64;
    let time_str = format!(
        "{:02}:{:02}:{:02}",
        (timestamp / 3600) % 24,
        (timestamp / 60) % 60,
        timestamp % 60
    );
    let level = format!("{:<5}", entry.level.to_uppercase());
    let mut parts = vec![
        format!("[{}] [{}]", time_str, level),
        entry.event.clone(),
        entry.message.clone(),
    ];

    if let Some(ref role) = entry.role {
        parts.push(format!("role={}", role));
    }
    if let Some(ref call_id) = entry.call_id {
        // Call ids come from the peer and need not be ASCII
        let short: String = call_id.chars().take(8).collect();
        parts.push(format!("call={}", short));
    }
    if let Some(ref method) = entry.method {
        parts.push(format!("fn={}", method));
    }
    if let Some(duration) = entry.duration_ms {
        parts.push(format!("{:.1}ms", duration));
    }
    if let Some(ref err) = entry.error {
        parts.push(format!("error={}", err));
    }

    parts.join(" ")
}

fn current_timestamp() -> f64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
