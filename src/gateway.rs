//! # Bus Gateway
//!
//! Executes the transactions of one cycle over a single open connection.
//!
//! A failed batched read is never surfaced: the gateway falls back to one
//! single-register read per address of the run, within the same attempt, and
//! keeps whatever succeeds. A register whose single read fails is dropped
//! from the result for this cycle. Connection failures and write failures are
//! returned so the surrounding [`RetryExecutor`](crate::retry::RetryExecutor)
//! can retry the whole cycle.

use tracing::warn;

use crate::error::{BridgeError, BridgeResult};
use crate::planner::RegisterRun;
use crate::register::RawWrite;
use crate::transport::{Connector, Transport};

/// One open bus connection plus fallback policy.
#[derive(Debug)]
pub struct BusGateway<T: Transport> {
    transport: T,
    closed: bool,
}

impl<T: Transport> BusGateway<T> {
    /// Open a connection through `connector`.
    ///
    /// Any failure is reported as [`BridgeError::TransportOpen`].
    pub async fn open<C>(connector: &C) -> BridgeResult<Self>
    where
        C: Connector<Transport = T>,
    {
        let transport = connector.open().await.map_err(|e| match e {
            BridgeError::TransportOpen { .. } => e,
            other => BridgeError::transport_open(other.to_string()),
        })?;
        Ok(Self::new(transport))
    }

    /// Wrap an already open transport.
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            closed: false,
        }
    }

    /// Read one run, falling back to single reads when the batch fails.
    ///
    /// Returns `(address, raw)` pairs in address order; addresses whose read
    /// failed are missing.
    pub async fn execute_run(&mut self, run: &RegisterRun) -> Vec<(u16, u16)> {
        match self.transport.read_registers(run.kind, run.start, run.count).await {
            Ok(words) => run.addresses().zip(words).collect(),
            Err(err) => {
                warn!(%run, error = %err, "batch read failed, falling back to single reads");
                self.read_singly(run).await
            }
        }
    }

    async fn read_singly(&mut self, run: &RegisterRun) -> Vec<(u16, u16)> {
        let mut values = Vec::with_capacity(run.count as usize);
        for address in run.addresses() {
            match self.transport.read_registers(run.kind, address, 1).await {
                Ok(words) => match words.first() {
                    Some(&raw) => values.push((address, raw)),
                    None => warn!(kind = %run.kind, address, "empty single read response"),
                },
                Err(err) => {
                    let err = BridgeError::single_read(run.kind, address, err.to_string());
                    warn!(error = %err, "register dropped from this cycle");
                }
            }
        }
        values
    }

    /// Write one register.
    pub async fn write(&mut self, write: RawWrite) -> BridgeResult<()> {
        self.transport
            .write_register(write.address, write.value)
            .await
            .map_err(|e| match e {
                BridgeError::WriteFailed { .. } => e,
                other => BridgeError::write_failed(write.address, other.to_string()),
            })
    }

    /// Write all registers in order, stopping at the first failure.
    pub async fn write_all(&mut self, writes: &[RawWrite]) -> BridgeResult<()> {
        for write in writes {
            self.write(*write).await?;
        }
        Ok(())
    }

    /// Release the connection. Close errors are logged, not returned.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(err) = self.transport.close().await {
            warn!(error = %err, "failed to close bus connection");
        }
    }
}
