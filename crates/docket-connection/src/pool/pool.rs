//! Connection pool implementation

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use docket_core::{
    Clock, Connection, ConnectionFactory, DocketError, ROLLBACK_SQL, Result, SystemClock,
};
use docket_monitor::MemoryMonitor;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use super::config::PoolConfig;
use super::handle::PooledConnection;
use super::info::{ConnectionId, ConnectionInfo, OwnerId};
use super::stats::PoolStatistics;
use crate::leak::{LeakAlert, LeakDetector};
use crate::transaction::TransactionManager;

/// Why a connection cannot be handed out. Never leaves the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
enum ConnectionInvalid {
    #[error("flagged as leaked")]
    Flagged,
    #[error("closed")]
    Closed,
    #[error("exceeded max lifetime")]
    Lifetime,
    #[error("exceeded max idle time")]
    Idle,
    #[error("liveness probe failed")]
    ProbeFailed,
}

impl ConnectionInvalid {
    fn is_expiry(self) -> bool {
        matches!(self, ConnectionInvalid::Lifetime | ConnectionInvalid::Idle)
    }
}

/// Why a released connection is not going back to idle
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
enum Discard {
    #[error("{0}")]
    Invalid(ConnectionInvalid),
    #[error("released with an open transaction")]
    OpenTransaction,
    #[error("transaction state unknown")]
    Broken,
    #[error("pool is closed")]
    PoolClosed,
    #[error("memory pressure")]
    Pressure,
}

impl Discard {
    fn is_expiry(self) -> bool {
        match self {
            Discard::Invalid(reason) => reason.is_expiry(),
            Discard::Pressure | Discard::PoolClosed => true,
            Discard::OpenTransaction | Discard::Broken => false,
        }
    }
}

/// One physical connection and its bookkeeping
pub(crate) struct ConnectionSlot {
    pub(crate) id: ConnectionId,
    pub(crate) connection: Arc<dyn Connection>,
    pub(crate) info: Mutex<ConnectionInfo>,
    revoked: AtomicBool,
}

impl ConnectionSlot {
    fn new(id: ConnectionId, connection: Arc<dyn Connection>, now: Instant) -> Self {
        Self {
            id,
            connection,
            info: Mutex::new(ConnectionInfo::new(id, now)),
            revoked: AtomicBool::new(false),
        }
    }

    /// Whether the pool took this connection away from its holder
    pub(crate) fn is_revoked(&self) -> bool {
        self.revoked.load(Ordering::SeqCst)
    }

    /// Roll back if asked, then close. Errors are logged; the slot is gone either way.
    async fn shut_down(&self, rollback: bool) {
        if rollback && let Err(e) = self.connection.execute(ROLLBACK_SQL, &[]).await {
            tracing::warn!(connection_id = %self.id, error = %e, "rollback before close failed");
        }
        if let Err(e) = self.connection.close().await {
            tracing::debug!(connection_id = %self.id, error = %e, "error closing connection");
        }
        tracing::debug!(connection_id = %self.id, "connection closed");
    }
}

#[derive(Debug, Default)]
struct Counters {
    created: u64,
    reused: u64,
    expired: u64,
    invalidated: u64,
    force_closed: u64,
    exhausted: u64,
}

impl Counters {
    fn record_invalid(&mut self, reason: ConnectionInvalid) {
        if reason.is_expiry() {
            self.expired += 1;
        } else {
            self.invalidated += 1;
        }
    }
}

/// Everything guarded by the pool lock. Nothing awaits while it is held.
#[derive(Default)]
struct PoolState {
    idle: VecDeque<Arc<ConnectionSlot>>,
    in_use: HashMap<ConnectionId, Arc<ConnectionSlot>>,
    opening: usize,
    waiting: usize,
    counters: Counters,
}

impl PoolState {
    fn total(&self) -> usize {
        self.idle.len() + self.in_use.len() + self.opening
    }

    fn find(&self, id: ConnectionId) -> Option<&Arc<ConnectionSlot>> {
        self.in_use
            .get(&id)
            .or_else(|| self.idle.iter().find(|slot| slot.id == id))
    }
}

enum Checkout {
    Reuse(Arc<ConnectionSlot>),
    Open,
    Wait,
}

pub(crate) struct PoolInner {
    config: PoolConfig,
    factory: Arc<dyn ConnectionFactory>,
    clock: Arc<dyn Clock>,
    monitor: Option<Arc<MemoryMonitor>>,
    detector: LeakDetector,
    state: Mutex<PoolState>,
    available: Notify,
    next_id: AtomicU64,
    closed: AtomicBool,
    shutdown: CancellationToken,
}

/// Result of one validation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    /// Idle connections closed for expiry, a leak flag or a failed probe
    pub evicted_idle: usize,
    /// Flagged connections taken away from their holders
    pub force_closed: usize,
}

/// Result of one aggressive cleanup pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    /// Idle connections closed for sitting unused too long
    pub idle_closed: usize,
    /// Checked-out connections whose transaction ran too long
    pub transactions_aborted: usize,
    /// Idle connections closed to shrink toward the low watermark
    pub pressure_closed: usize,
}

impl CleanupReport {
    pub fn total(&self) -> usize {
        self.idle_closed + self.transactions_aborted + self.pressure_closed
    }
}

/// Builder for a [`ConnectionPool`]
pub struct PoolBuilder {
    config: PoolConfig,
    factory: Arc<dyn ConnectionFactory>,
    clock: Arc<dyn Clock>,
    monitor: Option<Arc<MemoryMonitor>>,
    detector: Option<LeakDetector>,
}

impl PoolBuilder {
    /// Read time from `clock` instead of the system clock
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Consult `monitor` for memory pressure
    pub fn with_memory_monitor(mut self, monitor: Arc<MemoryMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Use a detector with custom thresholds
    pub fn with_leak_detector(mut self, detector: LeakDetector) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn build(self) -> ConnectionPool {
        let detector = self
            .detector
            .unwrap_or_else(|| LeakDetector::new(self.config.leak_thresholds()));

        tracing::info!(
            storage_path = %self.config.storage_path(),
            max_connections = self.config.max_connections(),
            "connection pool created"
        );

        ConnectionPool {
            inner: Arc::new(PoolInner {
                config: self.config,
                factory: self.factory,
                clock: self.clock,
                monitor: self.monitor,
                detector,
                state: Mutex::new(PoolState::default()),
                available: Notify::new(),
                next_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
            }),
        }
    }
}

/// A pool of connections to the embedded store
///
/// Cloning is cheap and every clone refers to the same pool. Connections are
/// handed out as [`PooledConnection`] guards that give the connection back
/// when dropped.
#[derive(Clone)]
pub struct ConnectionPool {
    pub(crate) inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Create a pool with the system clock, the default leak detector and no memory monitor
    pub fn new<F: ConnectionFactory>(config: PoolConfig, factory: F) -> Self {
        Self::builder(config, Arc::new(factory)).build()
    }

    pub fn builder(config: PoolConfig, factory: Arc<dyn ConnectionFactory>) -> PoolBuilder {
        PoolBuilder {
            config,
            factory,
            clock: Arc::new(SystemClock),
            monitor: None,
            detector: None,
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn leak_detector(&self) -> &LeakDetector {
        &self.inner.detector
    }

    pub fn memory_monitor(&self) -> Option<&Arc<MemoryMonitor>> {
        self.inner.monitor.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Cancelled when the pool closes
    pub(crate) fn shutdown_token(&self) -> &CancellationToken {
        &self.inner.shutdown
    }

    /// Get a connection bound to the calling thread
    ///
    /// This will:
    /// 1. Take an idle connection, preferring one this thread released last
    /// 2. Probe it, discarding it and starting over if the probe fails
    /// 3. If nothing is idle and there is capacity, open a new connection
    /// 4. Otherwise wait for a release until the connection timeout
    ///
    /// The connection timeout bounds the whole call, probes and opens included.
    /// Returns `PoolExhausted` if it elapses and `PoolClosed` after `close()`.
    pub async fn acquire(&self) -> Result<PooledConnection> {
        let inner = &self.inner;
        let timeout = inner.config.connection_timeout();
        let deadline = tokio::time::Instant::now() + timeout;
        let owner = OwnerId::current();

        loop {
            // Register for wakeups before looking at the state so a release
            // between the check and the wait is not missed.
            let notified = inner.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let mut evicted = Vec::new();
            let checkout = inner.try_checkout(owner, &mut evicted);
            for (slot, reason) in evicted {
                tracing::debug!(connection_id = %slot.id, %reason, "evicting idle connection");
                slot.shut_down(false).await;
            }

            match checkout? {
                Checkout::Reuse(slot) => {
                    if inner.probe_until(&slot, deadline).await {
                        inner.state.lock().counters.reused += 1;
                        return Ok(inner.hand_out(self.inner.clone(), slot, owner));
                    }
                    inner.discard_checked_out(&slot, ConnectionInvalid::ProbeFailed);
                    slot.shut_down(false).await;
                    if tokio::time::Instant::now() >= deadline {
                        return Err(inner.exhausted(timeout));
                    }
                }
                Checkout::Open => {
                    let reservation = OpeningReservation::new(inner);
                    let connection =
                        match tokio::time::timeout_at(deadline, inner.factory.create()).await {
                            Ok(Ok(connection)) => connection,
                            Ok(Err(e)) => {
                                tracing::warn!(error = %e, "failed to open connection");
                                return Err(e);
                            }
                            Err(_) => {
                                tracing::warn!("opening a connection outlasted the acquire timeout");
                                return Err(inner.exhausted(timeout));
                            }
                        };
                    let slot = inner.register(connection, owner, reservation);
                    tracing::debug!(connection_id = %slot.id, "opened new connection");
                    return Ok(inner.hand_out(self.inner.clone(), slot, owner));
                }
                Checkout::Wait => {
                    let _waiter = WaiterGuard::new(inner);
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return Err(inner.exhausted(timeout));
                    }
                }
            }
        }
    }

    /// Give a connection back. Same as dropping it.
    pub fn release(&self, conn: PooledConnection) {
        drop(conn);
    }

    /// Copies of every connection's record, ordered by id
    ///
    /// The pool lock is held only while the connection handles are cloned.
    pub fn snapshot(&self) -> Vec<ConnectionInfo> {
        let slots = self.inner.all_slots();
        let mut infos: Vec<ConnectionInfo> = slots
            .iter()
            .map(|slot| {
                let footprint = slot.connection.memory_footprint();
                let mut info = slot.info.lock();
                info.estimated_memory_bytes = footprint;
                info.clone()
            })
            .collect();
        infos.sort_by_key(|info| info.connection_id);
        infos
    }

    /// Current statistics
    pub fn statistics(&self) -> PoolStatistics {
        let inner = &self.inner;
        let mut stats = {
            let state = inner.state.lock();
            PoolStatistics {
                max_connections: inner.config.max_connections(),
                active: state.in_use.len(),
                idle: state.idle.len(),
                opening: state.opening,
                waiting: state.waiting,
                created: state.counters.created,
                reused: state.counters.reused,
                expired: state.counters.expired,
                invalidated: state.counters.invalidated,
                force_closed: state.counters.force_closed,
                exhausted: state.counters.exhausted,
                ..PoolStatistics::default()
            }
        };
        stats.leaks_detected = inner.detector.total_detected();
        stats.under_pressure = inner.under_pressure();
        stats.memory = inner.monitor.as_ref().and_then(|monitor| monitor.latest());
        stats
    }

    /// Report suspected leaks and flag them so they are never reused
    ///
    /// Does nothing when monitoring is disabled in the configuration.
    pub fn run_leak_scan(&self) -> Vec<LeakAlert> {
        if !self.inner.config.monitoring_enabled() {
            return Vec::new();
        }
        let snapshot = self.snapshot();
        let alerts = self
            .inner
            .detector
            .scan(&snapshot, self.inner.clock.now());

        if !alerts.is_empty() {
            let state = self.inner.state.lock();
            for alert in &alerts {
                if let Some(slot) = state.find(alert.connection_id) {
                    slot.info.lock().flagged_leaked = true;
                }
            }
        }
        alerts
    }

    /// Close invalid idle connections and take flagged ones away from their holders
    pub async fn run_validation_pass(&self) -> ValidationReport {
        let inner = &self.inner;
        let now = inner.clock.now();
        let mut report = ValidationReport::default();

        let (evicted, flagged, candidates) = {
            let mut guard = inner.state.lock();
            let state = &mut *guard;
            let evicted = inner.evict_invalid_idle(state, now);
            let flagged: Vec<Arc<ConnectionSlot>> = state
                .in_use
                .values()
                .filter(|slot| slot.info.lock().flagged_leaked)
                .cloned()
                .collect();
            let candidates: Vec<Arc<ConnectionSlot>> = state.idle.iter().cloned().collect();
            (evicted, flagged, candidates)
        };

        for (slot, reason) in evicted {
            tracing::debug!(connection_id = %slot.id, %reason, "evicting idle connection");
            slot.shut_down(false).await;
            report.evicted_idle += 1;
        }

        // Probe what is left without holding the lock. A connection picked up by
        // a caller in the meantime is no longer idle and is left alone.
        for slot in candidates {
            if inner.probe(&slot).await {
                continue;
            }
            let removed = {
                let mut state = inner.state.lock();
                let position = state.idle.iter().position(|idle| idle.id == slot.id);
                let removed = position.and_then(|position| state.idle.remove(position));
                if removed.is_some() {
                    state.counters.record_invalid(ConnectionInvalid::ProbeFailed);
                }
                removed
            };
            if let Some(slot) = removed {
                tracing::debug!(connection_id = %slot.id, "idle connection failed liveness probe");
                slot.shut_down(false).await;
                report.evicted_idle += 1;
            }
        }

        for slot in flagged {
            if inner.revoke(&slot, "flagged as leaked").await {
                report.force_closed += 1;
            }
        }

        if report != ValidationReport::default() {
            tracing::debug!(
                evicted_idle = report.evicted_idle,
                force_closed = report.force_closed,
                "validation pass finished"
            );
        }
        report
    }

    /// Aggressive cleanup
    ///
    /// Closes connections idle past `aggressive_idle`, force-closes connections
    /// whose transaction is older than `max_transaction_time`, and under memory
    /// pressure closes idle connections, oldest first, until the pool is at or
    /// below its low watermark.
    pub async fn run_cleanup(&self) -> CleanupReport {
        let inner = &self.inner;
        let config = &inner.config;
        let now = inner.clock.now();
        let pressure = inner.under_pressure();

        let (idle_closed, stuck, pressure_closed) = {
            let mut guard = inner.state.lock();
            let state = &mut *guard;

            let mut idle_closed = Vec::new();
            let mut kept = VecDeque::with_capacity(state.idle.len());
            while let Some(slot) = state.idle.pop_front() {
                if slot.info.lock().idle_time(now) > config.aggressive_idle() {
                    state.counters.expired += 1;
                    idle_closed.push(slot);
                } else {
                    kept.push_back(slot);
                }
            }
            state.idle = kept;

            let stuck: Vec<Arc<ConnectionSlot>> = state
                .in_use
                .values()
                .filter(|slot| {
                    slot.info
                        .lock()
                        .transaction_age(now)
                        .is_some_and(|age| age > config.max_transaction_time())
                })
                .cloned()
                .collect();

            let mut pressure_closed = Vec::new();
            if pressure {
                // Stuck connections are about to go, so they no longer count.
                while state.total() - stuck.len() > config.low_watermark() {
                    let Some(slot) = state.idle.pop_front() else {
                        break;
                    };
                    state.counters.expired += 1;
                    pressure_closed.push(slot);
                }
            }

            (idle_closed, stuck, pressure_closed)
        };

        let mut report = CleanupReport {
            idle_closed: idle_closed.len(),
            pressure_closed: pressure_closed.len(),
            ..CleanupReport::default()
        };

        for slot in idle_closed.into_iter().chain(pressure_closed) {
            slot.shut_down(false).await;
        }
        for slot in stuck {
            if inner.revoke(&slot, "transaction exceeded max transaction time").await {
                report.transactions_aborted += 1;
            }
        }

        if report.total() > 0 {
            tracing::info!(
                idle_closed = report.idle_closed,
                transactions_aborted = report.transactions_aborted,
                pressure_closed = report.pressure_closed,
                under_pressure = pressure,
                "cleanup closed connections"
            );
        }
        report
    }

    /// Shut the pool down
    ///
    /// New acquisitions fail with `PoolClosed`, idle connections are closed now
    /// and checked-out connections are closed when they are released.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.shutdown.cancel();

        let idle: Vec<Arc<ConnectionSlot>> = {
            let mut state = self.inner.state.lock();
            state.idle.drain(..).collect()
        };
        self.inner.available.notify_waiters();

        for slot in &idle {
            slot.shut_down(false).await;
        }
        tracing::info!(closed_idle = idle.len(), "connection pool closed");
    }
}

impl PoolInner {
    pub(crate) fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    fn under_pressure(&self) -> bool {
        self.monitor
            .as_ref()
            .is_some_and(|monitor| monitor.under_pressure())
    }

    fn all_slots(&self) -> Vec<Arc<ConnectionSlot>> {
        let state = self.state.lock();
        state
            .idle
            .iter()
            .chain(state.in_use.values())
            .cloned()
            .collect()
    }

    /// Why an idle connection must not be handed out, if it must not
    fn idle_invalid(&self, slot: &ConnectionSlot, now: Instant) -> Option<ConnectionInvalid> {
        let info = slot.info.lock();
        if info.flagged_leaked {
            Some(ConnectionInvalid::Flagged)
        } else if slot.connection.is_closed() {
            Some(ConnectionInvalid::Closed)
        } else if info.age(now) > self.config.max_lifetime() {
            Some(ConnectionInvalid::Lifetime)
        } else if info.idle_time(now) > self.config.max_idle() {
            Some(ConnectionInvalid::Idle)
        } else {
            None
        }
    }

    fn evict_invalid_idle(
        &self,
        state: &mut PoolState,
        now: Instant,
    ) -> Vec<(Arc<ConnectionSlot>, ConnectionInvalid)> {
        let mut evicted = Vec::new();
        let mut kept = VecDeque::with_capacity(state.idle.len());
        while let Some(slot) = state.idle.pop_front() {
            match self.idle_invalid(&slot, now) {
                Some(reason) => {
                    state.counters.record_invalid(reason);
                    evicted.push((slot, reason));
                }
                None => kept.push_back(slot),
            }
        }
        state.idle = kept;
        evicted
    }

    fn try_checkout(
        &self,
        owner: OwnerId,
        evicted: &mut Vec<(Arc<ConnectionSlot>, ConnectionInvalid)>,
    ) -> Result<Checkout> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DocketError::PoolClosed);
        }

        let now = self.clock.now();
        let mut guard = self.state.lock();
        let state = &mut *guard;
        evicted.extend(self.evict_invalid_idle(state, now));

        let position = state
            .idle
            .iter()
            .position(|slot| slot.info.lock().last_owner == Some(owner))
            .or(if state.idle.is_empty() { None } else { Some(0) });

        if let Some(slot) = position.and_then(|position| state.idle.remove(position)) {
            slot.info.lock().claim(owner);
            state.in_use.insert(slot.id, slot.clone());
            return Ok(Checkout::Reuse(slot));
        }

        if state.total() < self.config.max_connections() {
            state.opening += 1;
            return Ok(Checkout::Open);
        }

        Ok(Checkout::Wait)
    }

    async fn probe(&self, slot: &ConnectionSlot) -> bool {
        let deadline = tokio::time::Instant::now() + self.config.probe_timeout();
        self.probe_until(slot, deadline).await
    }

    /// Probe, giving up at whichever comes first of `deadline` and the probe timeout
    async fn probe_until(&self, slot: &ConnectionSlot, deadline: tokio::time::Instant) -> bool {
        let deadline = deadline.min(tokio::time::Instant::now() + self.config.probe_timeout());
        let validate = self.factory.validate(slot.connection.as_ref());
        match tokio::time::timeout_at(deadline, validate).await {
            Ok(valid) => valid,
            Err(_) => {
                tracing::warn!(connection_id = %slot.id, "liveness probe timed out");
                false
            }
        }
    }

    fn exhausted(&self, timeout: Duration) -> DocketError {
        self.state.lock().counters.exhausted += 1;
        tracing::warn!(
            timeout_ms = timeout.as_millis() as u64,
            "connection pool exhausted"
        );
        DocketError::PoolExhausted { timeout }
    }

    /// Take a connection that failed its checkout probe out of circulation
    fn discard_checked_out(&self, slot: &ConnectionSlot, reason: ConnectionInvalid) {
        {
            let mut state = self.state.lock();
            state.in_use.remove(&slot.id);
            state.counters.record_invalid(reason);
        }
        tracing::debug!(connection_id = %slot.id, %reason, "discarding connection at checkout");
        self.available.notify_waiters();
    }

    fn register(
        &self,
        connection: Arc<dyn Connection>,
        owner: OwnerId,
        mut reservation: OpeningReservation<'_>,
    ) -> Arc<ConnectionSlot> {
        let id = ConnectionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let slot = Arc::new(ConnectionSlot::new(id, connection, self.clock.now()));
        slot.info.lock().claim(owner);

        let mut state = self.state.lock();
        reservation.fulfil(&mut state);
        state.in_use.insert(id, slot.clone());
        state.counters.created += 1;
        slot
    }

    fn hand_out(
        &self,
        pool: Arc<PoolInner>,
        slot: Arc<ConnectionSlot>,
        owner: OwnerId,
    ) -> PooledConnection {
        slot.info.lock().check_out(owner, self.clock.now());
        PooledConnection::new(pool, slot)
    }

    /// Take a connection back from its holder. Called from `PooledConnection::drop`.
    pub(crate) fn release(&self, slot: &Arc<ConnectionSlot>, tx: &TransactionManager) {
        if slot.is_revoked() {
            return;
        }

        let now = self.clock.now();
        let pressure = self.under_pressure();

        let discard = {
            let mut state = self.state.lock();
            if state.in_use.remove(&slot.id).is_none() {
                return;
            }
            // Count the returning connection itself.
            let total = state.total() + 1;

            let mut info = slot.info.lock();
            let discard = if tx.is_broken() {
                Some(Discard::Broken)
            } else if tx.depth() > 0 {
                Some(Discard::OpenTransaction)
            } else if info.flagged_leaked {
                Some(Discard::Invalid(ConnectionInvalid::Flagged))
            } else if slot.connection.is_closed() {
                Some(Discard::Invalid(ConnectionInvalid::Closed))
            } else if self.closed.load(Ordering::SeqCst) {
                Some(Discard::PoolClosed)
            } else if info.age(now) > self.config.max_lifetime() {
                Some(Discard::Invalid(ConnectionInvalid::Lifetime))
            } else if pressure && total > self.config.low_watermark() {
                Some(Discard::Pressure)
            } else {
                None
            };

            info.check_in(now);
            drop(info);

            match discard {
                None => state.idle.push_back(slot.clone()),
                Some(reason) if reason.is_expiry() => state.counters.expired += 1,
                Some(_) => state.counters.invalidated += 1,
            }
            discard
        };

        self.available.notify_waiters();

        if let Some(reason) = discard {
            tracing::debug!(connection_id = %slot.id, %reason, "discarding released connection");
            let rollback = matches!(reason, Discard::OpenTransaction | Discard::Broken);
            dispose(slot.clone(), rollback);
        }
    }

    /// Close a checked-out connection under its holder
    ///
    /// Its capacity is reclaimed immediately. The holder's next operation fails
    /// with `TransactionIntegrity`. Returns false if it was no longer checked out.
    async fn revoke(&self, slot: &Arc<ConnectionSlot>, reason: &str) -> bool {
        {
            let mut state = self.state.lock();
            if state.in_use.remove(&slot.id).is_none() {
                return false;
            }
            slot.revoked.store(true, Ordering::SeqCst);
            state.counters.force_closed += 1;
        }
        self.available.notify_waiters();

        let (depth, owner) = {
            let info = slot.info.lock();
            (info.transaction_depth, info.owning_thread)
        };
        tracing::warn!(
            connection_id = %slot.id,
            depth,
            owner = ?owner,
            reason,
            "force-closing checked-out connection"
        );
        slot.shut_down(depth > 0).await;
        true
    }
}

/// Close a connection from synchronous code
fn dispose(slot: Arc<ConnectionSlot>, rollback: bool) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move { slot.shut_down(rollback).await });
        }
        Err(_) => futures::executor::block_on(slot.shut_down(rollback)),
    }
}

/// Capacity held for a connection being opened
///
/// Given back on drop unless the connection was registered, so a failed or
/// cancelled open never leaks capacity.
struct OpeningReservation<'a> {
    pool: &'a PoolInner,
    pending: bool,
}

impl<'a> OpeningReservation<'a> {
    fn new(pool: &'a PoolInner) -> Self {
        Self {
            pool,
            pending: true,
        }
    }

    fn fulfil(&mut self, state: &mut PoolState) {
        if self.pending {
            state.opening -= 1;
            self.pending = false;
        }
    }
}

impl Drop for OpeningReservation<'_> {
    fn drop(&mut self) {
        if self.pending {
            self.pool.state.lock().opening -= 1;
            self.pool.available.notify_waiters();
        }
    }
}

/// Counts a caller blocked in `acquire` for as long as it waits
struct WaiterGuard<'a> {
    pool: &'a PoolInner,
}

impl<'a> WaiterGuard<'a> {
    fn new(pool: &'a PoolInner) -> Self {
        pool.state.lock().waiting += 1;
        Self { pool }
    }
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.pool.state.lock().waiting -= 1;
    }
}
