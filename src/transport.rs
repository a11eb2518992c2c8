//! # Bus Transport
//!
//! Abstraction over one open connection to the serial bus. A transport
//! performs exactly one request/response transaction per call and knows
//! nothing about batching, fallback or retry; those live in
//! [`BusGateway`](crate::gateway::BusGateway).
//!
//! - [`Connector`] opens a fresh [`Transport`] for each bus cycle
//! - [`RtuConnector`] / [`RtuTransport`] talk Modbus RTU over a serial port
//!   through `tokio-modbus` (requires the `rtu` feature)
//!
//! The Modbus framing itself (function codes, CRC, exception responses) is
//! delegated to `tokio-modbus`.

use std::future::Future;

use crate::error::BridgeResult;
use crate::register::RegisterKind;

/// One open bus connection.
pub trait Transport: Send {
    /// Read `count` consecutive registers of `kind` starting at `start`.
    ///
    /// On success the returned vector holds exactly `count` raw words in
    /// address order.
    fn read_registers(
        &mut self,
        kind: RegisterKind,
        start: u16,
        count: u16,
    ) -> impl Future<Output = BridgeResult<Vec<u16>>> + Send;

    /// Write one holding register (FC06).
    fn write_register(&mut self, address: u16, value: u16) -> impl Future<Output = BridgeResult<()>> + Send;

    /// Release the connection.
    fn close(&mut self) -> impl Future<Output = BridgeResult<()>> + Send;
}

/// Factory for bus connections.
///
/// The engine opens one connection per cycle and closes it when the cycle
/// ends, so a connector must be able to open any number of times.
pub trait Connector: Send + Sync + 'static {
    type Transport: Transport + 'static;

    /// Establish the link.
    fn open(&self) -> impl Future<Output = BridgeResult<Self::Transport>> + Send;
}

#[cfg(feature = "rtu")]
pub use rtu::{RtuConnector, RtuTransport};

#[cfg(feature = "rtu")]
mod rtu {
    use std::time::Duration;

    use tokio_modbus::client::{rtu as modbus_rtu, Client, Context, Reader, Writer};
    use tokio_modbus::Slave;
    use tokio_serial::SerialPortBuilderExt;
    use tracing::debug;

    use super::{Connector, Transport};
    use crate::config::{Parity, SerialSettings};
    use crate::error::{BridgeError, BridgeResult};
    use crate::register::RegisterKind;

    /// Opens Modbus RTU connections on a serial device.
    #[derive(Debug, Clone)]
    pub struct RtuConnector {
        settings: SerialSettings,
    }

    impl RtuConnector {
        pub fn new(settings: SerialSettings) -> Self {
            Self { settings }
        }

        pub fn settings(&self) -> &SerialSettings {
            &self.settings
        }

        fn builder(&self) -> BridgeResult<tokio_serial::SerialPortBuilder> {
            let data_bits = match self.settings.data_bits {
                5 => tokio_serial::DataBits::Five,
                6 => tokio_serial::DataBits::Six,
                7 => tokio_serial::DataBits::Seven,
                8 => tokio_serial::DataBits::Eight,
                other => return Err(BridgeError::config(format!("Unsupported data bits: {}", other))),
            };
            let stop_bits = match self.settings.stop_bits {
                1 => tokio_serial::StopBits::One,
                2 => tokio_serial::StopBits::Two,
                other => return Err(BridgeError::config(format!("Unsupported stop bits: {}", other))),
            };
            let parity = match self.settings.parity {
                Parity::None => tokio_serial::Parity::None,
                Parity::Odd => tokio_serial::Parity::Odd,
                Parity::Even => tokio_serial::Parity::Even,
            };
            Ok(tokio_serial::new(&self.settings.path, self.settings.baud_rate)
                .data_bits(data_bits)
                .stop_bits(stop_bits)
                .parity(parity)
                .timeout(self.settings.transaction_timeout))
        }
    }

    impl Connector for RtuConnector {
        type Transport = RtuTransport;

        async fn open(&self) -> BridgeResult<RtuTransport> {
            let port = self.builder()?.open_native_async().map_err(|e| {
                BridgeError::transport_open(format!("{}: {}", self.settings.path, e))
            })?;
            let ctx = modbus_rtu::attach_slave(port, Slave(self.settings.unit_id));
            debug!(path = %self.settings.path, unit = self.settings.unit_id, "serial link opened");
            Ok(RtuTransport {
                ctx,
                timeout: self.settings.transaction_timeout,
            })
        }
    }

    /// Open Modbus RTU connection bound to one unit id.
    #[derive(Debug)]
    pub struct RtuTransport {
        ctx: Context,
        timeout: Duration,
    }

    /// Flatten the nested `tokio-modbus` result into a message.
    fn flatten<T>(
        outcome: Result<tokio_modbus::Result<T>, tokio::time::error::Elapsed>,
    ) -> Result<T, String> {
        match outcome {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(exception))) => Err(format!("exception response: {}", exception)),
            Ok(Err(err)) => Err(err.to_string()),
            Err(_) => Err("transaction timed out".to_string()),
        }
    }

    impl Transport for RtuTransport {
        async fn read_registers(&mut self, kind: RegisterKind, start: u16, count: u16) -> BridgeResult<Vec<u16>> {
            let outcome = match kind {
                RegisterKind::Holding => {
                    tokio::time::timeout(self.timeout, self.ctx.read_holding_registers(start, count)).await
                }
                RegisterKind::Input => {
                    tokio::time::timeout(self.timeout, self.ctx.read_input_registers(start, count)).await
                }
                RegisterKind::Custom => {
                    return Err(BridgeError::config(format!(
                        "Custom register {} has no bus address",
                        start
                    )))
                }
            };
            let words = flatten(outcome).map_err(|msg| BridgeError::batch_read(kind, start, count, msg))?;
            if words.len() != count as usize {
                return Err(BridgeError::batch_read(
                    kind,
                    start,
                    count,
                    format!("expected {} registers, got {}", count, words.len()),
                ));
            }
            Ok(words)
        }

        async fn write_register(&mut self, address: u16, value: u16) -> BridgeResult<()> {
            let outcome = tokio::time::timeout(self.timeout, self.ctx.write_single_register(address, value)).await;
            flatten(outcome).map_err(|msg| BridgeError::write_failed(address, msg))
        }

        async fn close(&mut self) -> BridgeResult<()> {
            let outcome = self.ctx.disconnect().await;
            debug!(?outcome, "serial link closed");
            Ok(())
        }
    }
}
