use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApirateError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Module error: {0}")]
    Module(#[from] ModuleError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Process not started")]
    NotStarted,

    #[error("Process already started")]
    AlreadyStarted,

    #[error("Process is shutting down")]
    ShuttingDown,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Environment variable error: {0}")]
    EnvVar(String),
}

/// Failures raised by the module contract and the execution process.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModuleError {
    #[error("Module '{name}' failed to start: {reason}")]
    StartupFailure { name: String, reason: String },

    #[error("Port {port} requested by '{name}' is already claimed by '{claimed_by}'")]
    ConfigurationConflict {
        port: u16,
        name: String,
        claimed_by: String,
    },

    #[error("Pipeline aborted by module '{name}' in phase {phase}")]
    PipelineAbort { name: String, phase: String },

    #[error("Module name '{0}' is already registered")]
    DuplicateName(String),

    #[error("Invalid module name: {0:?}")]
    InvalidName(String),

    #[error("No module factory registered under '{0}'")]
    UnknownModule(String),
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Bind failed on port {port}: {reason}")]
    BindFailed { port: u16, reason: String },

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Socket closed")]
    Closed,

    #[error("Frame exceeds {0} bytes")]
    FrameTooLarge(usize),
}

pub type Result<T> = std::result::Result<T, ApirateError>;
