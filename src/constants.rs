//! Fixed policy constants
//!
//! The serial parameters must match the appliance exactly. The transaction
//! limit reflects a firmware constraint of the appliance, which rejects reads
//! longer than 20 registers even though Modbus allows 125.

// ============================================================================
// Serial Line
// ============================================================================

/// Serial line speed
pub const BAUD_RATE: u32 = 19_200;

/// Modbus station identifier of the appliance
pub const UNIT_ID: u8 = 41;

/// Default serial device path
pub const DEFAULT_SERIAL_PATH: &str = "/dev/ttyUSB0";

/// Default per-transaction timeout of the RTU transport (milliseconds)
pub const DEFAULT_TRANSACTION_TIMEOUT_MS: u64 = 1_000;

// ============================================================================
// Batching
// ============================================================================

/// Maximum number of registers read in one bus transaction
pub const TRANSACTION_LIMIT: u16 = 20;

// ============================================================================
// Scheduling and Retry
// ============================================================================

/// Default delay between the end of one poll and the start of the next (milliseconds)
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;

/// Default attempts for a read cycle
pub const DEFAULT_READ_ATTEMPTS: u32 = 10;

/// Default attempts for a write cycle
pub const DEFAULT_WRITE_ATTEMPTS: u32 = 3;

/// Floor for the delay between two attempts (milliseconds)
pub const MIN_RETRY_DELAY_MS: u64 = 100;

// ============================================================================
// Derived Registers
// ============================================================================

/// Lower bound of the offset trim when the offset register has no `min`
pub const DEFAULT_OFFSET_MIN: f64 = -3.0;

/// Upper bound of the offset trim when the offset register has no `max`
pub const DEFAULT_OFFSET_MAX: f64 = 3.0;

/// Upper bound on unit steps when decomposing a derived write
pub const MAX_DECOMPOSE_STEPS: u32 = 10_000;

/// Tolerance used when checking that a target is a whole number of steps away
pub const STEP_TOLERANCE: f64 = 1e-6;
