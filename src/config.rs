//! # Engine Configuration
//!
//! Runtime knobs of the register engine: poll cadence, retry policies for the
//! read and write cycles, and the serial line settings of the RTU transport.
//!
//! ## Example
//!
//! ```rust
//! use std::time::Duration;
//! use thermobus::config::{EngineConfig, RetryPolicy};
//!
//! let config = EngineConfig::new()
//!     .with_poll_interval_ms(2_000)
//!     .with_write_retry(RetryPolicy::new(5, Duration::from_millis(250)));
//!
//! assert_eq!(config.poll_interval, Duration::from_secs(2));
//! assert_eq!(config.read_retry.max_attempts, 10);
//! assert_eq!(config.write_retry.max_attempts, 5);
//! ```

use std::time::Duration;

use crate::constants::{
    BAUD_RATE, DEFAULT_POLL_INTERVAL_MS, DEFAULT_READ_ATTEMPTS, DEFAULT_SERIAL_PATH,
    DEFAULT_TRANSACTION_TIMEOUT_MS, DEFAULT_WRITE_ATTEMPTS, MIN_RETRY_DELAY_MS, UNIT_ID,
};

// ============================================================================
// Retry Policy
// ============================================================================

/// Constant-delay retry policy for a whole bus cycle.
///
/// Values are normalized on construction: at least one attempt, and a delay
/// of at least 100 ms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Pause between two attempts.
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay: delay.max(Duration::from_millis(MIN_RETRY_DELAY_MS)),
        }
    }

    /// Policy applied to poll cycles.
    pub fn read_default() -> Self {
        Self::new(DEFAULT_READ_ATTEMPTS, Duration::from_millis(MIN_RETRY_DELAY_MS))
    }

    /// Policy applied to write cycles.
    pub fn write_default() -> Self {
        Self::new(DEFAULT_WRITE_ATTEMPTS, Duration::from_millis(MIN_RETRY_DELAY_MS))
    }

    /// Set the attempt count.
    pub fn with_max_attempts(self, max_attempts: u32) -> Self {
        Self::new(max_attempts, self.delay)
    }

    /// Set the delay in milliseconds.
    pub fn with_delay_ms(self, delay_ms: u64) -> Self {
        Self::new(self.max_attempts, Duration::from_millis(delay_ms))
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Scheduling and retry configuration of [`RegisterEngine`](crate::engine::RegisterEngine).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Delay between the completion of one poll and the start of the next.
    pub poll_interval: Duration,
    pub read_retry: RetryPolicy,
    pub write_retry: RetryPolicy,
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the poll interval in milliseconds.
    pub fn with_poll_interval_ms(mut self, interval_ms: u64) -> Self {
        self.poll_interval = Duration::from_millis(interval_ms);
        self
    }

    pub fn with_read_retry(mut self, policy: RetryPolicy) -> Self {
        self.read_retry = policy;
        self
    }

    pub fn with_write_retry(mut self, policy: RetryPolicy) -> Self {
        self.write_retry = policy;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            read_retry: RetryPolicy::read_default(),
            write_retry: RetryPolicy::write_default(),
        }
    }
}

// ============================================================================
// Serial Line
// ============================================================================

/// Parity setting of the serial line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    None,
    Odd,
    Even,
}

/// Serial line settings of the RTU transport.
///
/// The defaults are the appliance's fixed parameters: 19200 baud, 8 data
/// bits, even parity, 1 stop bit, unit 41.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialSettings {
    pub path: String,
    pub baud_rate: u32,
    pub data_bits: u8,
    pub stop_bits: u8,
    pub parity: Parity,
    pub unit_id: u8,
    /// Upper bound for one request/response exchange.
    pub transaction_timeout: Duration,
}

impl SerialSettings {
    /// Default settings on the given serial device.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Set the per-transaction timeout in milliseconds.
    pub fn with_transaction_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.transaction_timeout = Duration::from_millis(timeout_ms);
        self
    }
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            path: DEFAULT_SERIAL_PATH.to_string(),
            baud_rate: BAUD_RATE,
            data_bits: 8,
            stop_bits: 1,
            parity: Parity::Even,
            unit_id: UNIT_ID,
            transaction_timeout: Duration::from_millis(DEFAULT_TRANSACTION_TIMEOUT_MS),
        }
    }
}
