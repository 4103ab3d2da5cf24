//! Error types for the mmvexport metrics writer.

use std::path::PathBuf;

use thiserror::Error;

use crate::value::ValueKind;

/// The main error type for all mmvexport operations.
///
/// Each variant wraps the error enum of one concern so callers can match on
/// the broad category and still reach the details.
#[derive(Error, Debug)]
pub enum MmvError {
    /// A metric or handler could not be registered.
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// An operation was called in the wrong lifecycle phase.
    #[error("lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    /// The backing file could not be created or mapped.
    #[error("mapping error: {0}")]
    Mapping(#[from] MappingError),

    /// A value update could not be applied.
    #[error("update error: {0}")]
    Update(#[from] UpdateError),

    /// A JSON configuration file could not be loaded.
    #[error("config file error: {0}")]
    ConfigFile(#[from] ConfigFileError),
}

/// Errors raised synchronously while registering metrics or handlers.
///
/// These reject only the offending call; the writer stays usable.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    /// No type handler is registered for the value's kind.
    #[error("no type handler registered for value kind {kind:?}")]
    NoHandler {
        /// The kind that had no handler.
        kind: ValueKind,
    },

    /// A metric with this name is already registered.
    #[error("metric '{name}' is already registered")]
    DuplicateMetric {
        /// The conflicting name.
        name: String,
    },

    /// The metric name does not fit the format's name field.
    #[error("metric name '{name}' is {length} bytes, limit is {limit}")]
    NameTooLong {
        /// The rejected name.
        name: String,
        /// Its length in bytes.
        length: usize,
        /// The format's limit in bytes.
        limit: usize,
    },

    /// The metric name contains characters the format cannot carry.
    #[error("invalid metric name '{name}': {reason}")]
    InvalidName {
        /// The rejected name.
        name: String,
        /// Why the name is invalid.
        reason: String,
    },

    /// A value of one kind was handed to a handler for another kind.
    #[error("type mismatch: handler encodes {expected:?}, got {actual:?}")]
    TypeMismatch {
        /// The kind the handler accepts.
        expected: ValueKind,
        /// The kind that was supplied.
        actual: ValueKind,
    },

    /// The slot handed to a handler has the wrong size.
    #[error("slot is {actual} bytes, handler writes {expected}")]
    SlotSize {
        /// The handler's data length.
        expected: usize,
        /// The slot length supplied.
        actual: usize,
    },

    /// A unit string could not be parsed.
    #[error("invalid unit '{unit}': {reason}")]
    InvalidUnit {
        /// The unit text.
        unit: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A configuration value is out of range.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the problem.
        reason: String,
    },
}

/// Programmer misuse of the add → start → update → stop ordering.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleError {
    /// `start()` was called on a writer that is already started.
    #[error("writer is already started")]
    AlreadyStarted,

    /// A metric or handler was added after `start()`.
    #[error("metrics and handlers cannot be added after start")]
    AddAfterStart,

    /// An update or bridge start was attempted before `start()`.
    #[error("writer has not been started")]
    NotStarted,

    /// The writer was stopped and no longer owns a mapping.
    #[error("writer has been stopped")]
    Stopped,

    /// The update bridge thread is already running.
    #[error("update bridge is already running")]
    BridgeRunning,
}

/// Errors creating, sizing or mapping the backing file.
#[derive(Error, Debug)]
pub enum MappingError {
    /// The file could not be created or truncated.
    #[error("failed to create '{}': {source}", path.display())]
    Create {
        /// The file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file could not be resized to the planned length.
    #[error("failed to size '{}' to {length} bytes: {source}", path.display())]
    Resize {
        /// The file path.
        path: PathBuf,
        /// The requested length.
        length: usize,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Memory mapping failed.
    #[error("memory mapping failed for '{}': {source}", path.display())]
    Map {
        /// The file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Flushing the mapping to disk failed.
    #[error("failed to flush '{}': {source}", path.display())]
    Flush {
        /// The file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The text sidecar could not be written.
    #[error("failed to write sidecar '{}': {source}", path.display())]
    Sidecar {
        /// The sidecar path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The planned layout exceeds what the format can address.
    #[error("layout of {length} bytes exceeds the format's {limit} byte address space")]
    TooLarge {
        /// The planned length.
        length: usize,
        /// The largest addressable length.
        limit: usize,
    },

    /// A write would leave the mapped region.
    #[error("access beyond mapping: offset {offset} + length {length} > size {size}")]
    BoundsViolation {
        /// The attempted offset.
        offset: usize,
        /// The attempted length.
        length: usize,
        /// The mapping size.
        size: usize,
    },
}

/// Errors applying a value update to a started writer.
#[derive(Error, Debug)]
pub enum UpdateError {
    /// No metric with this name was registered.
    #[error("unknown metric '{name}'")]
    UnknownMetric {
        /// The requested name.
        name: String,
    },

    /// The update bridge thread stopped after an error.
    #[error("update bridge thread failed: {reason}")]
    BridgeFailed {
        /// What ended the thread.
        reason: String,
    },
}

/// Errors loading a JSON configuration file.
#[derive(Error, Debug)]
pub enum ConfigFileError {
    /// The file could not be read.
    #[error("failed to read config '{}': {source}", path.display())]
    Read {
        /// The config path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid JSON for the expected shape.
    #[error("failed to parse config '{}': {source}", path.display())]
    Parse {
        /// The config path.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
}

/// Type alias for `Result<T, MmvError>`.
pub type Result<T> = std::result::Result<T, MmvError>;
