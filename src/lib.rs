//! # Thermobus - Register Transaction Engine for Modbus RTU Heating Appliances
//!
//! Bridges a heating appliance reachable only through a half-duplex Modbus RTU
//! serial bus to consumers that read and write named registers as
//! engineering-unit values.
//!
//! ## Features
//!
//! - **Batched Reads**: contiguous same-kind registers are read in transactions
//!   of at most 20 registers
//! - **Graceful Degradation**: a failed batch falls back to single-register
//!   reads; registers that still fail are dropped from the cycle
//! - **Cycle-Level Retry**: whole poll and write cycles are retried with a
//!   constant delay
//! - **Single-Flight Bus Access**: every cycle runs through one FIFO queue
//! - **Virtual Registers**: custom registers are computed from, and written
//!   through, physical registers by pluggable strategies
//!
//! ## Register Kinds
//!
//! | Code | Kind | Bus access |
//! |------|------|------------|
//! | 1 | Holding | FC03 read, FC06 write |
//! | 2 | Input | FC04 read |
//! | 3 | Custom | resolved by strategy |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use thermobus::{
//!     BridgeResult, EngineConfig, RegisterCatalog, RegisterEngine, ResolverRegistry,
//!     RtuConnector, SerialSettings,
//! };
//!
//! #[tokio::main]
//! async fn main() -> BridgeResult<()> {
//!     let catalog = RegisterCatalog::load([("primary", "assets/primary.json")])?;
//!     let connector = RtuConnector::new(SerialSettings::new("/dev/ttyUSB0"));
//!     let engine = RegisterEngine::new(
//!         connector,
//!         catalog,
//!         &ResolverRegistry::with_builtin(),
//!         EngineConfig::default(),
//!     )?;
//!
//!     for reading in engine.poll_once().await?.iter() {
//!         println!("{} = {} {}", reading.id(), reading.value, reading.unit);
//!     }
//!
//!     engine.write(&"primary-1-70".parse()?, 21.0).await?;
//!     Ok(())
//! }
//! ```

// ============================================================================
// Core modules
// ============================================================================

/// Error taxonomy and result type
pub mod error;

/// Fixed serial and scheduling policy constants
pub mod constants;

/// Engine, retry and serial line configuration
pub mod config;

/// Register descriptors, identifiers and readings
pub mod register;

/// Raw word to engineering value conversion
pub mod codec;

/// Device profiles loaded from register files
pub mod catalog;

// ============================================================================
// Transaction engine
// ============================================================================

/// Contiguous read planning
pub mod planner;

/// Bus transport abstraction and Modbus RTU implementation
pub mod transport;

/// Transaction execution with per-register fallback
pub mod gateway;

/// Cycle-level retry
pub mod retry;

/// FIFO single-flight command queue
pub mod queue;

/// Virtual register strategies
pub mod resolver;

/// Poll and write orchestration
pub mod engine;

#[cfg(test)]
pub(crate) mod testing;

// ============================================================================
// Re-exports for convenience
// ============================================================================

// === Async runtime ===
pub use tokio;

// === Error handling ===
pub use error::{BridgeError, BridgeResult};

// === Data model ===
pub use catalog::{DeviceProfile, RegisterCatalog};
pub use register::{
    Encoding, RawWrite, Reading, ReadingSet, RegisterDescriptor, RegisterId, RegisterKind,
    RegisterRef, WriteCommand,
};

// === Engine ===
pub use config::{EngineConfig, Parity, RetryPolicy, SerialSettings};
pub use engine::{RegisterEngine, WriteRequest};
pub use gateway::BusGateway;
pub use planner::{BatchPlanner, RegisterRun, TransactionPlan};
pub use queue::{SerialCommandQueue, TaskHandle};
pub use resolver::{DerivedRegister, PairedOffsetResolver, ResolveContext, ResolverRegistry};
pub use retry::RetryExecutor;
pub use transport::{Connector, Transport};

#[cfg(feature = "rtu")]
pub use transport::{RtuConnector, RtuTransport};

// === Policy constants ===
pub use constants::{BAUD_RATE, TRANSACTION_LIMIT, UNIT_ID};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
pub fn info() -> String {
    format!("Thermobus v{} - Modbus RTU register transaction engine", VERSION)
}
