//! Error handling for the scopestream pipeline
//!
//! This module defines the crate error type and a Result alias used
//! throughout acquisition, expression compilation and export.

use thiserror::Error;

/// Main error type for scopestream operations
#[derive(Error, Debug)]
pub enum ScopeError {
    /// A device driver call returned a non-OK status
    #[error("Driver call {call} failed with status 0x{status:08X}")]
    Driver { call: &'static str, status: u32 },

    /// A device could not be opened
    #[error("Failed to open device '{serial}': {reason}")]
    DeviceOpen { serial: String, reason: String },

    /// A sample buffer could not be allocated
    #[error("Failed to allocate {capacity} samples for device {device} channel {channel}")]
    Allocation {
        device: usize,
        channel: usize,
        capacity: usize,
    },

    /// A math-channel formula failed to compile
    #[error("Expression '{formula}' rejected: {reason}")]
    Expression { formula: String, reason: String },

    /// No active expression with this id
    #[error("Unknown expression id {0}")]
    UnknownExpression(u32),

    /// The expression has no parameter with this name
    #[error("Expression {expression} has no parameter '{name}'")]
    UnknownParameter { expression: u32, name: char },

    /// The channel model cannot be edited while a capture session is active
    #[error("Channel model is locked by an active capture session")]
    ChannelModelLocked,

    /// No such device/channel pair
    #[error("No channel {channel} on device {device}")]
    ChannelNotFound { device: usize, channel: usize },

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors related to channel communication
    #[error("Channel error: {0}")]
    Channel(String),

    /// Timeout errors
    #[error("Timeout: {0}")]
    Timeout(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<ScopeError>,
    },
}

impl ScopeError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        ScopeError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Shorthand for a failed driver call
    pub fn driver(call: &'static str, status: u32) -> Self {
        ScopeError::Driver { call, status }
    }
}

/// Result type alias for scopestream operations
pub type Result<T> = std::result::Result<T, ScopeError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

impl<T> ResultExt<T> for std::io::Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| ScopeError::Io(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| ScopeError::Io(e).with_context(f()))
    }
}
