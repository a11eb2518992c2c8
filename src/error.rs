//! Error types for the register transaction engine
//!
//! Errors are split into two families:
//!
//! - **Transient** bus errors (`TransportOpen`, `BatchRead`, `SingleRead`,
//!   `WriteFailed`). These are absorbed as close to the bus as possible or
//!   retried at cycle level by [`RetryExecutor`](crate::retry::RetryExecutor).
//! - **Fatal** validation errors (`WriteDisallowed`, `ValueOutOfRange`,
//!   `Config`, `UnreachableTarget`). These surface immediately and are never
//!   retried.

use thiserror::Error;

use crate::register::RegisterKind;

/// Result type used throughout the crate.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Engine error taxonomy.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// The serial link could not be established
    #[error("Transport open error: {message}")]
    TransportOpen { message: String },

    /// A batched read transaction failed
    #[error("Batch read error: {kind} {start}+{count}: {message}")]
    BatchRead {
        kind: RegisterKind,
        start: u16,
        count: u16,
        message: String,
    },

    /// A single-register read transaction failed
    #[error("Single read error: {kind} {address}: {message}")]
    SingleRead {
        kind: RegisterKind,
        address: u16,
        message: String,
    },

    /// A single-register write transaction failed
    #[error("Write error: register {address}: {message}")]
    WriteFailed { address: u16, message: String },

    /// A whole cycle failed on every attempt
    #[error("Retry exhausted after {attempts} attempts: {last}")]
    RetryExhausted {
        attempts: u32,
        last: Box<BridgeError>,
    },

    /// Write to a register that does not accept writes
    #[error("Write disallowed: {register}")]
    WriteDisallowed { register: String },

    /// Requested value cannot be written to the register
    #[error("Value {value} out of range for {register}: {message}")]
    ValueOutOfRange {
        register: String,
        value: f64,
        message: String,
    },

    /// Descriptor, resolver or file configuration is invalid
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// A derived register write cannot reach the requested value
    #[error("Unreachable target {target} for {register}: {message}")]
    UnreachableTarget {
        register: String,
        target: f64,
        message: String,
    },

    /// The command queue stopped before the task completed
    #[error("Command queue closed: {message}")]
    QueueClosed { message: String },
}

impl BridgeError {
    /// Create a transport open error
    pub fn transport_open<S: Into<String>>(message: S) -> Self {
        Self::TransportOpen {
            message: message.into(),
        }
    }

    /// Create a batch read error
    pub fn batch_read<S: Into<String>>(kind: RegisterKind, start: u16, count: u16, message: S) -> Self {
        Self::BatchRead {
            kind,
            start,
            count,
            message: message.into(),
        }
    }

    /// Create a single read error
    pub fn single_read<S: Into<String>>(kind: RegisterKind, address: u16, message: S) -> Self {
        Self::SingleRead {
            kind,
            address,
            message: message.into(),
        }
    }

    /// Create a write transaction error
    pub fn write_failed<S: Into<String>>(address: u16, message: S) -> Self {
        Self::WriteFailed {
            address,
            message: message.into(),
        }
    }

    /// Create a write disallowed error
    pub fn write_disallowed<S: Into<String>>(register: S) -> Self {
        Self::WriteDisallowed {
            register: register.into(),
        }
    }

    /// Create a value out of range error
    pub fn out_of_range<R: Into<String>, S: Into<String>>(register: R, value: f64, message: S) -> Self {
        Self::ValueOutOfRange {
            register: register.into(),
            value,
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an unreachable target error
    pub fn unreachable_target<R: Into<String>, S: Into<String>>(
        register: R,
        target: f64,
        message: S,
    ) -> Self {
        Self::UnreachableTarget {
            register: register.into(),
            target,
            message: message.into(),
        }
    }

    /// Create a queue closed error
    pub fn queue_closed<S: Into<String>>(message: S) -> Self {
        Self::QueueClosed {
            message: message.into(),
        }
    }

    /// Whether another attempt of the surrounding cycle may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransportOpen { .. }
                | Self::BatchRead { .. }
                | Self::SingleRead { .. }
                | Self::WriteFailed { .. }
        )
    }
}
