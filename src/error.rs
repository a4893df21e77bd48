//! # Error Handling
//!
//! Error types for the slave core, covering locator validation, value codec
//! failures, frame parsing, and the connection lifecycle.
//!
//! ## Error Categories
//!
//! ### Validation Errors
//! - **InvalidLocator**: illegal range/type/offset/bit combinations, raised at
//!   locator construction time, never at decode time
//! - **UnsupportedType**: decode/encode called with a data type the operation
//!   cannot service — a programming error, surfaced immediately
//!
//! ### Transport Errors
//! - **Io / Connection**: socket and stream failures
//! - **Timeout**: operations exceeding their configured limits
//! - **Init**: fatal failures while binding the listener or wiring a session
//!
//! ### Protocol Errors
//! - **Frame / CrcMismatch / InvalidFunction / InvalidData**: malformed or
//!   unserviceable request frames seen by the default pipeline
//!
//! ## Usage
//!
//! ```rust
//! use modbus_slave::{ModbusError, ModbusResult};
//!
//! fn classify(result: ModbusResult<u16>) {
//!     match result {
//!         Ok(value) => println!("value = {}", value),
//!         Err(error) if error.is_transport_error() => println!("transport: {}", error),
//!         Err(error) => println!("other: {}", error),
//!     }
//! }
//! ```

use thiserror::Error;

/// Result type alias for all slave-core operations.
pub type ModbusResult<T> = Result<T, ModbusError>;

/// Comprehensive error type for the slave core.
///
/// Each variant carries enough context to diagnose the failure without a
/// debugger: validation errors name the offending field, frame errors describe
/// the malformation, and I/O errors preserve the underlying message.
#[derive(Error, Debug, Clone)]
pub enum ModbusError {
    /// I/O related errors (network socket read/write/close failures).
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Connection establishment and maintenance issues distinct from
    /// general I/O errors.
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// Operation exceeded its configured timeout.
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Fatal initialization failure: listener bind, accept-loop I/O, or
    /// transport wiring during session creation.
    #[error("Initialization error: {message}")]
    Init { message: String },

    /// A locator was constructed with an illegal range/type/offset/bit
    /// combination. Raised synchronously at construction.
    #[error("Invalid locator: {message}")]
    InvalidLocator { message: String },

    /// Decode/encode was invoked with a data type it cannot service.
    /// This is a programming error and is never retried.
    #[error("Unsupported data type: {message}")]
    UnsupportedType { message: String },

    /// Unsupported or malformed function code in a request frame.
    #[error("Invalid function code: 0x{code:02X}")]
    InvalidFunction { code: u8 },

    /// Data format or range violation in a request payload.
    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    /// Message frame format violation (incomplete header, bad length, ...).
    #[error("Frame error: {message}")]
    Frame { message: String },

    /// Checksum validation failure on an encapsulated frame.
    #[error("CRC validation failed: expected={expected:04X}, actual={actual:04X}")]
    CrcMismatch { expected: u16, actual: u16 },

    /// Server or session configuration problem.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Library internal error. Should not occur in normal operation.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ModbusError {
    /// Create a new I/O error.
    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io { message: message.into() }
    }

    /// Create a new connection error.
    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection { message: message.into() }
    }

    /// Create a new timeout error.
    pub fn timeout<S: Into<String>>(operation: S, timeout_ms: u64) -> Self {
        Self::Timeout { operation: operation.into(), timeout_ms }
    }

    /// Create a new initialization error.
    pub fn init<S: Into<String>>(message: S) -> Self {
        Self::Init { message: message.into() }
    }

    /// Create a new locator validation error.
    pub fn invalid_locator<S: Into<String>>(message: S) -> Self {
        Self::InvalidLocator { message: message.into() }
    }

    /// Create a new unsupported-data-type error.
    pub fn unsupported_type<S: Into<String>>(message: S) -> Self {
        Self::UnsupportedType { message: message.into() }
    }

    /// Create an invalid function error.
    pub fn invalid_function(code: u8) -> Self {
        Self::InvalidFunction { code }
    }

    /// Create an invalid data error.
    pub fn invalid_data<S: Into<String>>(message: S) -> Self {
        Self::InvalidData { message: message.into() }
    }

    /// Create a frame error.
    pub fn frame<S: Into<String>>(message: S) -> Self {
        Self::Frame { message: message.into() }
    }

    /// Create a CRC mismatch error.
    pub fn crc_mismatch(expected: u16, actual: u16) -> Self {
        Self::CrcMismatch { expected, actual }
    }

    /// Create a configuration error.
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Create an internal error.
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Check if the error is a network/transport issue rather than a
    /// protocol or validation problem.
    pub fn is_transport_error(&self) -> bool {
        matches!(self,
            Self::Io { .. } |
            Self::Connection { .. } |
            Self::Timeout { .. } |
            Self::Init { .. }
        )
    }

    /// Check if the error was raised by eager locator/codec validation.
    ///
    /// Validation errors indicate caller bugs and are never worth retrying.
    pub fn is_validation_error(&self) -> bool {
        matches!(self,
            Self::InvalidLocator { .. } |
            Self::UnsupportedType { .. }
        )
    }

    /// Check if the error is a protocol-level issue in a request frame.
    pub fn is_protocol_error(&self) -> bool {
        matches!(self,
            Self::InvalidFunction { .. } |
            Self::InvalidData { .. } |
            Self::Frame { .. } |
            Self::CrcMismatch { .. }
        )
    }
}

/// Convert from std::io::Error, preserving the original message.
impl From<std::io::Error> for ModbusError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}

/// Convert from tokio timeout errors.
impl From<tokio::time::error::Elapsed> for ModbusError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::timeout("Operation timeout", 0)
    }
}
