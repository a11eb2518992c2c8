//! # Register Engine
//!
//! Drives poll and write cycles over the shared bus.
//!
//! ## Poll cycle
//!
//! 1. open one connection
//! 2. execute the transaction plan of every profile (with per-register fallback)
//! 3. close the connection
//! 4. decode raw words into engineering readings and compute custom registers
//! 5. publish the reading set as the latest snapshot
//!
//! Steps 1 to 4 form one retried unit. A cycle that exhausts its attempts
//! leaves the previous snapshot in place.
//!
//! ## Write cycle
//!
//! A write request is resolved to its descriptor (unknown identifiers are
//! ignored), validated, decomposed when the register is virtual, and executed
//! as one retried unit on its own connection.
//!
//! Every cycle, poll or write, runs on the [`SerialCommandQueue`], so no two
//! cycles ever touch the bus at the same time and they complete in the order
//! they were requested.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::catalog::{DeviceProfile, RegisterCatalog};
use crate::config::EngineConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::gateway::BusGateway;
use crate::planner::{BatchPlanner, TransactionPlan};
use crate::queue::{SerialCommandQueue, TaskHandle};
use crate::register::{check_range, RawWrite, Reading, ReadingSet, RegisterId, RegisterKind, WriteCommand};
use crate::resolver::{DerivedRegister, ResolveContext, ResolverRegistry};
use crate::retry::RetryExecutor;
use crate::transport::Connector;

/// Write request from the exposition layer.
#[derive(Debug)]
pub struct WriteRequest {
    pub id: RegisterId,
    pub value: f64,
    /// Receives the outcome once the write cycle finished.
    pub reply: Option<oneshot::Sender<BridgeResult<()>>>,
}

impl WriteRequest {
    /// Fire-and-forget request.
    pub fn new(id: RegisterId, value: f64) -> Self {
        Self { id, value, reply: None }
    }

    /// Request plus the receiver of its outcome.
    pub fn with_reply(id: RegisterId, value: f64) -> (Self, oneshot::Receiver<BridgeResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                id,
                value,
                reply: Some(tx),
            },
            rx,
        )
    }
}

struct EngineInner<C: Connector> {
    connector: C,
    catalog: RegisterCatalog,
    /// One plan per profile, in catalog order
    plans: Vec<TransactionPlan>,
    resolvers: HashMap<RegisterId, Arc<dyn DerivedRegister>>,
    config: EngineConfig,
    latest: ArcSwap<ReadingSet>,
}

/// Register transaction engine.
///
/// Cheap to clone; clones share the queue, the snapshot and the connector.
pub struct RegisterEngine<C: Connector> {
    inner: Arc<EngineInner<C>>,
    queue: SerialCommandQueue,
}

impl<C: Connector> Clone for RegisterEngine<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            queue: self.queue.clone(),
        }
    }
}

impl<C: Connector> RegisterEngine<C> {
    /// Build an engine and spawn its command queue on the current runtime.
    ///
    /// Fails with [`BridgeError::Config`] when a custom register names an
    /// unknown resolver class or carries invalid options.
    pub fn new(
        connector: C,
        catalog: RegisterCatalog,
        registry: &ResolverRegistry,
        config: EngineConfig,
    ) -> BridgeResult<Self> {
        let mut resolvers: HashMap<RegisterId, Arc<dyn DerivedRegister>> = HashMap::new();
        for profile in catalog.profiles() {
            for descriptor in profile.custom() {
                let id = descriptor.id(profile.name());
                let class = descriptor
                    .resolver
                    .as_deref()
                    .ok_or_else(|| BridgeError::config(format!("Custom register {} has no resolver class", id)))?;
                let resolver = registry.create(class)?;
                resolver
                    .validate(descriptor)
                    .map_err(|e| BridgeError::config(format!("Custom register {}: {}", id, e)))?;
                resolvers.insert(id, resolver);
            }
        }

        let plans: Vec<TransactionPlan> = catalog
            .profiles()
            .iter()
            .map(|profile| BatchPlanner::plan(profile.registers()))
            .collect();
        for (profile, plan) in catalog.profiles().iter().zip(&plans) {
            info!(
                profile = profile.name(),
                registers = profile.len(),
                transactions = plan.len(),
                "planned profile"
            );
        }

        Ok(Self {
            inner: Arc::new(EngineInner {
                connector,
                catalog,
                plans,
                resolvers,
                config,
                latest: ArcSwap::from_pointee(ReadingSet::new()),
            }),
            queue: SerialCommandQueue::new(),
        })
    }

    pub fn catalog(&self) -> &RegisterCatalog {
        &self.inner.catalog
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Most recent successful reading set.
    pub fn latest(&self) -> Arc<ReadingSet> {
        self.inner.latest.load_full()
    }

    /// Latest reading of one register.
    pub fn reading(&self, id: &RegisterId) -> Option<Reading> {
        self.inner.latest.load().get(id).cloned()
    }

    /// Queue a poll cycle.
    pub fn enqueue_poll(&self) -> TaskHandle<Arc<ReadingSet>> {
        let inner = Arc::clone(&self.inner);
        self.queue.enqueue(async move { inner.poll().await })
    }

    /// Run one poll cycle and wait for its reading set.
    pub async fn poll_once(&self) -> BridgeResult<Arc<ReadingSet>> {
        self.enqueue_poll().wait().await
    }

    /// Queue a write of `value` to the register identified by `id`.
    ///
    /// Returns `None`, without touching the bus, when no register matches.
    pub fn enqueue_write(&self, id: &RegisterId, value: f64) -> Option<TaskHandle<()>> {
        if self.inner.catalog.find(id).is_none() {
            debug!(register = %id, "write to unknown register ignored");
            return None;
        }
        let inner = Arc::clone(&self.inner);
        let id = id.clone();
        Some(self.queue.enqueue(async move { inner.write(&id, value).await }))
    }

    /// Write `value` and wait for the write cycle. Unknown ids succeed as a no-op.
    pub async fn write(&self, id: &RegisterId, value: f64) -> BridgeResult<()> {
        match self.enqueue_write(id, value) {
            Some(handle) => handle.wait().await,
            None => Ok(()),
        }
    }

    /// Poll forever, delivering every reading set to `sink`.
    ///
    /// The next poll is queued `poll_interval` after the previous one
    /// completed, whether it succeeded or not. Returns once `sink` is closed.
    pub async fn run_polling(&self, sink: mpsc::Sender<Arc<ReadingSet>>) {
        let interval = self.inner.config.poll_interval;
        info!(interval_ms = interval.as_millis() as u64, "polling started");
        loop {
            match self.poll_once().await {
                Ok(readings) => {
                    if sink.send(readings).await.is_err() {
                        break;
                    }
                }
                Err(err) => warn!(error = %err, "poll cycle failed"),
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = sink.closed() => break,
            }
        }
        info!("reading sink closed, polling stopped");
    }

    /// Serve write requests in arrival order until the channel closes.
    pub async fn serve_writes(&self, mut requests: mpsc::Receiver<WriteRequest>) {
        while let Some(request) = requests.recv().await {
            let WriteRequest { id, value, reply } = request;
            let handle = self.enqueue_write(&id, value);
            tokio::spawn(async move {
                let outcome = match handle {
                    Some(handle) => handle.wait().await,
                    None => Ok(()),
                };
                if let Err(err) = &outcome {
                    warn!(register = %id, value, error = %err, "write request failed");
                }
                if let Some(reply) = reply {
                    let _ = reply.send(outcome);
                }
            });
        }
        debug!("write request channel closed");
    }
}

impl<C: Connector> EngineInner<C> {
    async fn poll(&self) -> BridgeResult<Arc<ReadingSet>> {
        let retry = RetryExecutor::new(self.config.read_retry);
        let readings = Arc::new(retry.run(|| self.read_cycle()).await?);
        self.latest.store(Arc::clone(&readings));
        info!(readings = readings.len(), "poll cycle complete");
        Ok(readings)
    }

    async fn read_cycle(&self) -> BridgeResult<ReadingSet> {
        let mut gateway = BusGateway::open(&self.connector).await?;
        let mut readings = ReadingSet::new();
        for (profile, plan) in self.catalog.profiles().iter().zip(&self.plans) {
            for run in plan {
                for (address, raw) in gateway.execute_run(run).await {
                    if let Some(descriptor) = profile.find(run.kind, address) {
                        readings.push(Reading::from_raw(profile.name(), descriptor, raw));
                    }
                }
            }
        }
        gateway.close().await;

        let derived: Vec<Reading> = self
            .catalog
            .profiles()
            .iter()
            .flat_map(|profile| self.derive(profile, &readings))
            .collect();
        readings.extend(derived);
        Ok(readings)
    }

    fn derive(&self, profile: &DeviceProfile, readings: &ReadingSet) -> Vec<Reading> {
        let ctx = ResolveContext::new(profile, readings);
        profile
            .custom()
            .filter_map(|descriptor| {
                let resolver = self.resolvers.get(&descriptor.id(profile.name()))?;
                match resolver.compute_value(descriptor, &ctx) {
                    Ok(value) => Some(Reading::new(profile.name(), descriptor, value)),
                    Err(err) => {
                        warn!(register = %descriptor.id(profile.name()), error = %err, "derived register skipped");
                        None
                    }
                }
            })
            .collect()
    }

    async fn write(&self, id: &RegisterId, value: f64) -> BridgeResult<()> {
        let writes = self.prepare_write(id, value)?;
        let retry = RetryExecutor::new(self.config.write_retry);
        retry.run(|| self.write_cycle(&writes)).await?;
        info!(register = %id, value, "write complete");
        Ok(())
    }

    /// Validate and encode a write without touching the bus.
    fn prepare_write(&self, id: &RegisterId, value: f64) -> BridgeResult<Vec<RawWrite>> {
        let profile = self
            .catalog
            .profile(&id.profile)
            .ok_or_else(|| BridgeError::config(format!("Unknown profile: {}", id.profile)))?;
        let descriptor = profile
            .find(id.kind, id.address)
            .ok_or_else(|| BridgeError::config(format!("Unknown register: {}", id)))?;

        if descriptor.kind != RegisterKind::Custom {
            let command = WriteCommand::new(profile.name(), descriptor.clone(), value);
            return Ok(vec![command.to_raw()?]);
        }

        let register = id.to_string();
        if !descriptor.writable {
            return Err(BridgeError::write_disallowed(register));
        }
        check_range(descriptor, &register, value)?;
        let resolver = self
            .resolvers
            .get(id)
            .ok_or_else(|| BridgeError::config(format!("No resolver for {}", register)))?;
        let snapshot = self.latest.load();
        let ctx = ResolveContext::new(profile, &snapshot);
        resolver
            .decompose_write(descriptor, value, &ctx)?
            .iter()
            .map(WriteCommand::to_raw)
            .collect()
    }

    async fn write_cycle(&self, writes: &[RawWrite]) -> BridgeResult<()> {
        let mut gateway = BusGateway::open(&self.connector).await?;
        let outcome = gateway.write_all(writes).await;
        gateway.close().await;
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use crate::constants::{DEFAULT_READ_ATTEMPTS, MIN_RETRY_DELAY_MS};
    use crate::testing::{MockConnector, Op};
    use std::time::Duration;

    const REGISTER_FILE: &str = r#"[
        { "type": 2, "register": 41, "description": "Outdoor temperature",
          "data": "int16", "scaling": 10, "unit": "°C" },
        { "type": 2, "register": 42, "description": "Supply air",
          "data": "uint16", "scaling": 10, "unit": "°C" },
        { "type": 1, "register": 70, "description": "Panel middle", "write": true,
          "data": "uint16", "min": 10, "max": 30, "scaling": 1, "unit": "°C" },
        { "type": 1, "register": 71, "description": "Panel offset", "write": true,
          "data": "int16", "min": -3, "max": 3, "scaling": 1, "unit": "K" },
        { "type": 1, "register": 100, "description": "Operating mode", "scaling": 1 },
        { "type": 3, "register": 1, "description": "Panel temperature", "write": true,
          "min": 7, "max": 33, "unit": "°C", "class": "TempPanelRegister",
          "options": { "middle": { "type": 1, "register": 70 },
                       "offset": { "type": 1, "register": 71 } } }
    ]"#;

    fn id(kind: RegisterKind, address: u16) -> RegisterId {
        RegisterId::new("primary", kind, address)
    }

    fn bus() -> MockConnector {
        let bus = MockConnector::new();
        bus.set(RegisterKind::Input, 41, 0xFFF6)
            .set(RegisterKind::Input, 42, 215)
            .set(RegisterKind::Holding, 70, 20)
            .set(RegisterKind::Holding, 71, 0xFFFE)
            .set(RegisterKind::Holding, 100, 2);
        bus
    }

    fn engine(bus: &MockConnector) -> RegisterEngine<MockConnector> {
        let profile = DeviceProfile::from_json_str("primary", REGISTER_FILE).unwrap();
        let catalog = RegisterCatalog::new(vec![profile]).unwrap();
        RegisterEngine::new(
            bus.clone(),
            catalog,
            &ResolverRegistry::with_builtin(),
            EngineConfig::new().with_poll_interval_ms(1_000),
        )
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_decodes_and_derives() {
        let bus = bus();
        let engine = engine(&bus);

        let readings = engine.poll_once().await.unwrap();

        assert_eq!(readings.len(), 6);
        assert_eq!(readings.value("primary", RegisterKind::Input, 41), Some(-1.0));
        assert_eq!(readings.value("primary", RegisterKind::Input, 42), Some(21.5));
        assert_eq!(readings.value("primary", RegisterKind::Holding, 71), Some(-2.0));
        assert_eq!(readings.value("primary", RegisterKind::Custom, 1), Some(18.0));
        assert_eq!(engine.reading(&id(RegisterKind::Input, 41)).unwrap().unit, "°C");

        // One connection, three transactions
        assert_eq!(
            bus.log(),
            vec![
                Op::Open,
                Op::Read { kind: RegisterKind::Holding, start: 70, count: 2 },
                Op::Read { kind: RegisterKind::Holding, start: 100, count: 1 },
                Op::Read { kind: RegisterKind::Input, start: 41, count: 2 },
                Op::Close,
            ]
        );
        assert!(Arc::ptr_eq(&readings, &engine.latest()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dead_register_is_dropped_from_cycle() {
        let bus = bus();
        bus.kill(RegisterKind::Holding, 70);
        let engine = engine(&bus);

        let readings = engine.poll_once().await.unwrap();

        assert_eq!(readings.value("primary", RegisterKind::Holding, 70), None);
        assert_eq!(readings.value("primary", RegisterKind::Holding, 71), Some(-2.0));
        // Missing middle counts as zero
        assert_eq!(readings.value("primary", RegisterKind::Custom, 1), Some(-2.0));
        assert_eq!(bus.count(|op| *op == Op::Open), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_retries_whole_cycle() {
        let bus = bus();
        bus.fail_opens(2);
        let engine = engine(&bus);

        let readings = engine.poll_once().await.unwrap();

        assert_eq!(readings.len(), 6);
        assert_eq!(bus.count(|op| *op == Op::Open), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_poll_keeps_previous_snapshot() {
        let bus = bus();
        let engine = engine(&bus);
        let first = engine.poll_once().await.unwrap();

        bus.fail_opens(u32::MAX);
        let err = engine.poll_once().await.unwrap_err();

        assert!(matches!(err, BridgeError::RetryExhausted { attempts: 10, .. }));
        assert!(Arc::ptr_eq(&first, &engine.latest()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_holding_register() {
        let bus = bus();
        let engine = engine(&bus);

        engine.write(&id(RegisterKind::Holding, 71), -3.0).await.unwrap();

        assert_eq!(bus.get(RegisterKind::Holding, 71), Some(0xFFFD));
        assert_eq!(
            bus.log(),
            vec![Op::Open, Op::Write { address: 71, value: 0xFFFD }, Op::Close]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_register_is_a_no_op() {
        let bus = bus();
        let engine = engine(&bus);

        assert!(engine.enqueue_write(&id(RegisterKind::Holding, 999), 1.0).is_none());
        engine
            .write(&RegisterId::new("secondary", RegisterKind::Holding, 70), 21.0)
            .await
            .unwrap();
        assert!(bus.log().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_writes_never_reach_the_bus() {
        let bus = bus();
        let engine = engine(&bus);

        let err = engine.write(&id(RegisterKind::Holding, 100), 1.0).await.unwrap_err();
        assert!(matches!(err, BridgeError::WriteDisallowed { .. }));

        let err = engine.write(&id(RegisterKind::Input, 41), 1.0).await.unwrap_err();
        assert!(matches!(err, BridgeError::WriteDisallowed { .. }));

        let err = engine.write(&id(RegisterKind::Holding, 70), 31.0).await.unwrap_err();
        assert!(matches!(err, BridgeError::ValueOutOfRange { .. }));

        let err = engine.write(&id(RegisterKind::Custom, 1), 40.0).await.unwrap_err();
        assert!(matches!(err, BridgeError::ValueOutOfRange { .. }));

        let err = engine.write(&id(RegisterKind::Custom, 1), 20.5).await.unwrap_err();
        assert!(matches!(err, BridgeError::UnreachableTarget { .. }));

        assert!(bus.log().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_derived_write_is_decomposed() {
        let bus = bus();
        bus.set(RegisterKind::Holding, 71, 0);
        let engine = engine(&bus);
        engine.poll_once().await.unwrap();
        bus.clear_log();

        engine.write(&id(RegisterKind::Custom, 1), 25.0).await.unwrap();

        assert_eq!(
            bus.log(),
            vec![
                Op::Open,
                Op::Write { address: 70, value: 22 },
                Op::Write { address: 71, value: 3 },
                Op::Close,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_write_cycle_is_retried() {
        let bus = bus();
        bus.fail_writes(1);
        let engine = engine(&bus);

        engine.write(&id(RegisterKind::Holding, 70), 21.0).await.unwrap();

        assert_eq!(bus.count(|op| *op == Op::Open), 2);
        assert_eq!(bus.get(RegisterKind::Holding, 70), Some(21));
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_exhaustion_is_surfaced() {
        let bus = bus();
        bus.fail_writes(u32::MAX);
        let engine = engine(&bus);

        let err = engine.write(&id(RegisterKind::Holding, 70), 21.0).await.unwrap_err();

        assert!(matches!(err, BridgeError::RetryExhausted { attempts: 3, .. }));
        assert_eq!(bus.count(|op| *op == Op::Open), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_waits_for_queued_poll() {
        let bus = bus();
        bus.with_latency(Duration::from_millis(50));
        let engine = engine(&bus);

        let poll = engine.enqueue_poll();
        let write = engine.enqueue_write(&id(RegisterKind::Holding, 70), 23.0).unwrap();
        write.wait().await.unwrap();
        poll.wait().await.unwrap();

        let log = bus.log();
        let first_write = log.iter().position(|op| matches!(op, Op::Write { .. })).unwrap();
        let last_read = log.iter().rposition(|op| matches!(op, Op::Read { .. })).unwrap();
        assert!(last_read < first_write);
        assert_eq!(bus.max_open_connections(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_polling_schedules_after_completion() {
        let bus = bus();
        let engine = engine(&bus);
        let (tx, mut rx) = mpsc::channel(1);

        let poller = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.run_polling(tx).await })
        };

        let first = rx.recv().await.unwrap();
        let started = tokio::time::Instant::now();
        let second = rx.recv().await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(1_000));
        assert_eq!(first.len(), second.len());

        drop(rx);
        poller.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_polling_continues_after_exhausted_cycle() {
        let bus = bus();
        bus.fail_opens(DEFAULT_READ_ATTEMPTS);
        let engine = engine(&bus);
        let (tx, mut rx) = mpsc::channel(1);
        let started = tokio::time::Instant::now();

        let poller = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.run_polling(tx).await })
        };

        // Nine retry delays end the failed cycle, then one poll interval
        let readings = rx.recv().await.unwrap();
        let failed_cycle = Duration::from_millis(MIN_RETRY_DELAY_MS * u64::from(DEFAULT_READ_ATTEMPTS - 1));
        assert!(started.elapsed() >= failed_cycle + Duration::from_millis(1_000));
        assert_eq!(readings.len(), 6);
        assert_eq!(bus.count(|op| matches!(op, Op::Open)), DEFAULT_READ_ATTEMPTS as usize + 1);
        assert_eq!(engine.latest().len(), 6);

        drop(rx);
        poller.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_serve_writes_replies_in_order() {
        let bus = bus();
        let engine = engine(&bus);
        let (tx, rx) = mpsc::channel(8);
        let server = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.serve_writes(rx).await })
        };

        let (first, first_done) = WriteRequest::with_reply(id(RegisterKind::Holding, 70), 24.0);
        let (unknown, unknown_done) = WriteRequest::with_reply(id(RegisterKind::Holding, 5), 1.0);
        let (denied, denied_done) = WriteRequest::with_reply(id(RegisterKind::Input, 42), 1.0);
        tx.send(first).await.unwrap();
        tx.send(unknown).await.unwrap();
        tx.send(denied).await.unwrap();
        tx.send(WriteRequest::new(id(RegisterKind::Holding, 71), 1.0)).await.unwrap();
        drop(tx);

        first_done.await.unwrap().unwrap();
        unknown_done.await.unwrap().unwrap();
        assert!(matches!(denied_done.await.unwrap(), Err(BridgeError::WriteDisallowed { .. })));
        server.await.unwrap();
        engine.poll_once().await.unwrap();

        assert_eq!(bus.get(RegisterKind::Holding, 70), Some(24));
        assert_eq!(bus.get(RegisterKind::Holding, 71), Some(1));
    }

    #[tokio::test]
    async fn test_unknown_resolver_class_is_config_error() {
        let json = r#"[{ "type": 3, "register": 1, "class": "Mystery", "options": {} }]"#;
        let profile = DeviceProfile::from_json_str("primary", json).unwrap();
        let catalog = RegisterCatalog::new(vec![profile]).unwrap();
        let result = RegisterEngine::new(
            MockConnector::new(),
            catalog,
            &ResolverRegistry::with_builtin(),
            EngineConfig::default(),
        );
        assert!(matches!(result, Err(BridgeError::Config { .. })));
    }

    #[tokio::test]
    async fn test_invalid_resolver_options_is_config_error() {
        let json = r#"[{ "type": 3, "register": 1, "class": "TempPanelRegister",
                         "options": { "middle": { "type": 1, "register": 70 } } }]"#;
        let profile = DeviceProfile::from_json_str("primary", json).unwrap();
        let catalog = RegisterCatalog::new(vec![profile]).unwrap();
        let result = RegisterEngine::new(
            MockConnector::new(),
            catalog,
            &ResolverRegistry::with_builtin(),
            EngineConfig::default().with_read_retry(RetryPolicy::read_default()),
        );
        assert!(matches!(result, Err(BridgeError::Config { .. })));
    }
}
