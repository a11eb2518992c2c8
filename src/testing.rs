//! Scripted in-memory bus for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{BridgeError, BridgeResult};
use crate::register::RegisterKind;
use crate::transport::{Connector, Transport};

/// Bus operation recorded by the mock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Open,
    Read { kind: RegisterKind, start: u16, count: u16 },
    Write { address: u16, value: u16 },
    Close,
}

#[derive(Debug, Default)]
struct BusState {
    registers: HashMap<(RegisterKind, u16), u16>,
    /// Registers whose every read fails
    dead: HashSet<(RegisterKind, u16)>,
    fail_batches: bool,
    open_failures: u32,
    write_failures: u32,
    latency: Duration,
    log: Vec<Op>,
    open_connections: usize,
    max_open_connections: usize,
}

/// Connector over a shared in-memory register image.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<BusState>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, kind: RegisterKind, address: u16, raw: u16) -> &Self {
        self.state.lock().unwrap().registers.insert((kind, address), raw);
        self
    }

    pub fn get(&self, kind: RegisterKind, address: u16) -> Option<u16> {
        self.state.lock().unwrap().registers.get(&(kind, address)).copied()
    }

    /// Make every read touching this register fail.
    pub fn kill(&self, kind: RegisterKind, address: u16) -> &Self {
        self.state.lock().unwrap().dead.insert((kind, address));
        self
    }

    /// Make every multi-register read fail.
    pub fn fail_batches(&self) -> &Self {
        self.state.lock().unwrap().fail_batches = true;
        self
    }

    /// Fail the next `n` connection attempts.
    pub fn fail_opens(&self, n: u32) -> &Self {
        self.state.lock().unwrap().open_failures = n;
        self
    }

    /// Fail the next `n` register writes.
    pub fn fail_writes(&self, n: u32) -> &Self {
        self.state.lock().unwrap().write_failures = n;
        self
    }

    /// Simulated duration of each transaction.
    pub fn with_latency(&self, latency: Duration) -> &Self {
        self.state.lock().unwrap().latency = latency;
        self
    }

    pub fn log(&self) -> Vec<Op> {
        self.state.lock().unwrap().log.clone()
    }

    pub fn clear_log(&self) {
        self.state.lock().unwrap().log.clear();
    }

    pub fn count(&self, pred: impl Fn(&Op) -> bool) -> usize {
        self.state.lock().unwrap().log.iter().filter(|op| pred(op)).count()
    }

    pub fn open_connections(&self) -> usize {
        self.state.lock().unwrap().open_connections
    }

    pub fn max_open_connections(&self) -> usize {
        self.state.lock().unwrap().max_open_connections
    }
}

impl Connector for MockConnector {
    type Transport = MockTransport;

    async fn open(&self) -> BridgeResult<MockTransport> {
        let mut state = self.state.lock().unwrap();
        state.log.push(Op::Open);
        if state.open_failures > 0 {
            state.open_failures -= 1;
            return Err(BridgeError::transport_open("mock port busy"));
        }
        state.open_connections += 1;
        state.max_open_connections = state.max_open_connections.max(state.open_connections);
        Ok(MockTransport {
            state: Arc::clone(&self.state),
            closed: false,
        })
    }
}

#[derive(Debug)]
pub struct MockTransport {
    state: Arc<Mutex<BusState>>,
    closed: bool,
}

impl MockTransport {
    fn latency(&self) -> Duration {
        self.state.lock().unwrap().latency
    }
}

impl Transport for MockTransport {
    async fn read_registers(&mut self, kind: RegisterKind, start: u16, count: u16) -> BridgeResult<Vec<u16>> {
        let latency = self.latency();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let mut state = self.state.lock().unwrap();
        state.log.push(Op::Read { kind, start, count });
        if count > 1 && state.fail_batches {
            return Err(BridgeError::batch_read(kind, start, count, "mock batch failure"));
        }
        (start..start + count)
            .map(|address| {
                if state.dead.contains(&(kind, address)) {
                    return Err(BridgeError::batch_read(kind, start, count, "mock dead register"));
                }
                Ok(state.registers.get(&(kind, address)).copied().unwrap_or(0))
            })
            .collect()
    }

    async fn write_register(&mut self, address: u16, value: u16) -> BridgeResult<()> {
        let latency = self.latency();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let mut state = self.state.lock().unwrap();
        state.log.push(Op::Write { address, value });
        if state.write_failures > 0 {
            state.write_failures -= 1;
            return Err(BridgeError::write_failed(address, "mock write failure"));
        }
        state.registers.insert((RegisterKind::Holding, address), value);
        Ok(())
    }

    async fn close(&mut self) -> BridgeResult<()> {
        let mut state = self.state.lock().unwrap();
        state.log.push(Op::Close);
        if !self.closed {
            self.closed = true;
            state.open_connections -= 1;
        }
        Ok(())
    }
}
