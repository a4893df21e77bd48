//! # Modbus Slave - Typed Register Codec and TCP Connection Core
//!
//! A Modbus TCP slave (server) core in pure Rust, built around two concerns:
//!
//! 1. **Value codec**: deterministic, bit-exact conversion between flat
//!    register/coil byte buffers and typed values: booleans (coil bits and
//!    register bits), 1/2/4/8-byte integers with swapped byte orders, IEEE
//!    floats, BCD, base-10000 (MOD10K) groups, and CHAR/VARCHAR strings.
//!    Eagerly-validated locators bind slave id, range, offset, and type.
//! 2. **Connection lifecycle**: an accept loop spawning one session per
//!    connection, per-session request pipelines (standard MBAP or
//!    encapsulated RTU-over-TCP framing), polling-based peer liveness
//!    detection, and strictly ordered shutdown with a bounded drain.
//!
//! ## Supported Function Codes
//!
//! The default bank-backed handler services 0x01-0x06, 0x0F, and 0x10;
//! anything else earns an IllegalFunction exception response.
//!
//! ## Quick Start
//!
//! ### Decoding register values
//!
//! ```rust
//! use modbus_slave::codec::{DataType, RegisterRange, Value};
//! use modbus_slave::locator::NumericLocator;
//!
//! let locator = NumericLocator::new(1, RegisterRange::HoldingRegister, 0,
//!     DataType::FourByteFloat).unwrap();
//! let value = locator.decode(&[0x41, 0x31, 0xC2, 0x8F]).unwrap();
//! assert_eq!(value, Value::F32(11.11));
//! ```
//!
//! ### Running a slave
//!
//! ```rust,no_run
//! use modbus_slave::{ModbusSlave, TcpSlave};
//!
//! #[tokio::main]
//! async fn main() -> modbus_slave::ModbusResult<()> {
//!     let mut slave = TcpSlave::new("127.0.0.1:502")?;
//!     slave.register_bank().write_holding_register(0, 0x1234)?;
//!
//!     slave.start().await?;
//!     // ... serve until shutdown ...
//!     slave.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   accept   ┌──────────────┐
//! │   TcpSlave   │───────────►│  TcpSession  │  one per connection
//! └──────────────┘            └──────────────┘
//!        │                       │        │
//! ┌──────────────┐   ┌──────────────┐  ┌──────────────┐
//! │SessionRegistry│  │MessageControl│  │liveness poll │
//! └──────────────┘   └──────────────┘  └──────────────┘
//!                        │        │
//!               ┌──────────────┐ ┌──────────────┐
//!               │MessageParser │ │RequestHandler│──► ModbusRegisterBank
//!               └──────────────┘ └──────────────┘
//! ```

/// Error types and result handling.
pub mod error;

/// Function and exception codes, request/response structures.
pub mod protocol;

/// Byte-buffer to typed-value codec.
pub mod codec;

/// Eagerly-validated value locators.
pub mod locator;

/// Per-connection socket transport with liveness tracking.
pub mod transport;

/// Message parsers, request handlers, and the per-connection control loop.
pub mod pipeline;

/// Session lifecycle management.
pub mod session;

/// The TCP slave server.
pub mod server;

/// Thread-safe register storage backing the default handlers.
pub mod register_bank;

/// Validation, formatting, and logging helpers.
pub mod utils;

// Re-export main types for convenience
pub use codec::{DataType, RegisterRange, RoundingMode, StringEncoding, Value};
pub use error::{ModbusError, ModbusResult};
pub use locator::{BinaryLocator, NumericLocator, StringLocator};
pub use pipeline::{MessageControl, MessageParser, RequestHandler};
pub use protocol::{ModbusException, ModbusFunction};
pub use register_bank::ModbusRegisterBank;
pub use server::{
    ExceptionSink, LoggingSink, ModbusSlave, ServerStats, SessionRegistry, TcpSlave,
    TcpSlaveConfig, DEFAULT_TCP_PORT, SHUTDOWN_GRACE,
};
pub use session::{SessionConfig, SessionState, TcpSession, LIVENESS_POLL_INTERVAL};
pub use transport::{TcpSlaveTransport, MAX_TCP_FRAME_SIZE};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
