//! Logging for the service and the module-facing log sink
//!
//! Everything is routed through `tracing`. Modules never talk to the subscriber
//! directly: they receive an `Arc<dyn Logger>` which tags each entry with the
//! module name, so one sink can be shared by every prototype and every clone.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Log sink handed to modules. Implementations must tolerate concurrent use.
pub trait Logger: Send + Sync {
    fn log(&self, level: LogLevel, message: &str);

    fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message);
    }

    fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }
}

/// Forwards module log entries to `tracing` with a `module` field.
#[derive(Debug, Clone)]
pub struct TracingLogger {
    module: Arc<str>,
}

impl TracingLogger {
    pub fn new(module: &str) -> Self {
        Self {
            module: Arc::from(module),
        }
    }

    pub fn shared(module: &str) -> Arc<dyn Logger> {
        Arc::new(Self::new(module))
    }
}

impl Logger for TracingLogger {
    fn log(&self, level: LogLevel, message: &str) {
        let module = &*self.module;
        match level {
            LogLevel::Trace => tracing::trace!(module, "{}", message),
            LogLevel::Debug => tracing::debug!(module, "{}", message),
            LogLevel::Info => tracing::info!(module, "{}", message),
            LogLevel::Warn => tracing::warn!(module, "{}", message),
            LogLevel::Error => tracing::error!(module, "{}", message),
        }
    }
}

/// Install the global subscriber.
///
/// Console output is always on; when `config.directory` is set a daily rolling
/// file is written as well. The returned guard must be held for the lifetime of
/// the program or buffered file output is lost.
pub fn init_tracing(debug: bool, config: &LoggingConfig) -> Option<WorkerGuard> {
    let log_level = if debug { "debug" } else { "info" };
    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = format!("apirate={log_level}").parse() {
        filter = filter.add_directive(directive);
    }

    let (file_layer, guard) = match &config.directory {
        Some(directory) => {
            let appender = tracing_appender::rolling::daily(directory, &config.file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let registry = tracing_subscriber::registry().with(filter).with(file_layer);

    let result = if config.json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };

    if let Err(e) = result {
        eprintln!("Tracing subscriber already installed: {e}");
    }

    guard
}
