//! Connection lifecycle and the shared driver state.
//!
//! [`Coupler`] is the entry point of the crate. It owns the connection to a
//! bus coupler, and while connected it keeps:
//!
//! - the discovered module list, published as an immutable snapshot
//! - the process image and poll state, guarded by one mutex
//! - the poll timer thread that drives the poll cycle and keeps the
//!   coupler's watchdog alive
//!
//! # Connecting
//!
//! `connect` waits out any reconnect cooldown, then performs the handshake:
//!
//! 1. open the transport
//! 2. disable the coupler's I/O boundary check (retried once after the boot
//!    delay if the coupler does not answer)
//! 3. read the process-data summary and discover modules
//! 4. read the watchdog threshold and set the watchdog to reset on access
//! 5. allocate the process image and start the poll timer
//!
//! Any failure tears the connection down again. `disconnect` stops the poll
//! timer, closes the transport and starts the reconnect cooldown.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use coupler_io::{Condition, Coupler, CouplerConfig};
//!
//! let config = CouplerConfig::new().with_poll_period(Duration::from_millis(20));
//! let coupler = Coupler::new(config);
//! coupler.set_condition_handler(|condition: &Condition| {
//!     eprintln!("coupler condition: {condition}");
//! });
//!
//! coupler.connect("192.168.100.1", 502)?;
//! for module in coupler.modules().iter() {
//!     println!("{module}");
//! }
//! coupler.disconnect();
//! # Ok::<(), coupler_io::CouplerError>(())
//! ```

use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, info, trace, warn};

use crate::condition::{Condition, ConditionHandler, ConditionKind};
use crate::error::{CouplerError, Result};
use crate::image::{IoKind, ProcessImage, ProcessSummary};
use crate::module::{self, Module, DEFAULT_MAX_SLOTS};
use crate::poll::{self, Completion, PollCycle, PollPhase, PollRequest, PollState, PollTimer, Tick};
use crate::request::Request;
use crate::transport::{Channel, Connector, TcpConnector, Transport, TransportError};
use crate::watchdog::{self, TICK_QUANTUM};

/// I/O boundary check register.
pub const BOUNDARY_CHECK_REGISTER: u16 = 0x1182;

/// Boundary check value that disables the check.
pub const BOUNDARY_CHECK_OFF: u16 = 0xC0;

/// Default wait before retrying a coupler that is still booting.
pub const DEFAULT_BOOT_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Default time `connect` blocks after a disconnect.
pub const DEFAULT_RECONNECT_COOLDOWN: Duration = Duration::from_secs(10);

/// Longest accepted poll period (65535 timer quanta).
pub const MAX_POLL_PERIOD: Duration = Duration::from_millis(65_535 * 5);

/// Configuration for a [`Coupler`].
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use coupler_io::CouplerConfig;
///
/// let config = CouplerConfig::new()
///     .with_unit_id(1)
///     .with_poll_period(Duration::from_millis(20))
///     .with_reconnect_cooldown(Duration::from_secs(2));
///
/// assert_eq!(config.unit_id, 1);
/// assert_eq!(config.boot_retry_delay, Duration::from_secs(10));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CouplerConfig {
    /// Modbus unit ID.
    pub unit_id: u8,
    /// Poll period. Zero selects direct mode: I/O calls go straight to the
    /// device and the timer only keeps the watchdog alive.
    pub poll_period: Duration,
    /// Wait before the second boundary-check attempt during connect.
    pub boot_retry_delay: Duration,
    /// Time `connect` blocks after a disconnect.
    pub reconnect_cooldown: Duration,
    /// Upper bound on probed module slots.
    pub max_slots: usize,
}

impl CouplerConfig {
    /// Creates a configuration with default values: unit 0, direct mode,
    /// 10 s boot retry delay and reconnect cooldown.
    pub fn new() -> Self {
        Self {
            unit_id: 0,
            poll_period: Duration::ZERO,
            boot_retry_delay: DEFAULT_BOOT_RETRY_DELAY,
            reconnect_cooldown: DEFAULT_RECONNECT_COOLDOWN,
            max_slots: DEFAULT_MAX_SLOTS,
        }
    }

    /// Sets the Modbus unit ID.
    pub fn with_unit_id(mut self, unit_id: u8) -> Self {
        self.unit_id = unit_id;
        self
    }

    /// Sets the poll period. It is rounded down to a multiple of 5 ms when
    /// applied.
    pub fn with_poll_period(mut self, period: Duration) -> Self {
        self.poll_period = period;
        self
    }

    /// Sets the boot retry delay.
    pub fn with_boot_retry_delay(mut self, delay: Duration) -> Self {
        self.boot_retry_delay = delay;
        self
    }

    /// Sets the reconnect cooldown.
    pub fn with_reconnect_cooldown(mut self, cooldown: Duration) -> Self {
        self.reconnect_cooldown = cooldown;
        self
    }

    /// Sets the maximum number of probed module slots.
    pub fn with_max_slots(mut self, max_slots: usize) -> Self {
        self.max_slots = max_slots;
        self
    }
}

impl Default for CouplerConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConnectionState {
    /// No connection.
    Disconnected,
    /// `connect` is performing the handshake.
    Connecting,
    /// Connected and polling.
    Connected,
    /// Recently disconnected; `connect` will block until the cooldown ends.
    ReconnectCooldown,
}

/// One live connection.
pub(crate) struct Session {
    pub transport: Arc<dyn Transport>,
    pub modules: Arc<[Module]>,
    pub summary: ProcessSummary,
    /// Watchdog threshold in milliseconds.
    pub threshold: AtomicU16,
    pub generation: u64,
    pub host: String,
    pub port: u16,
}

/// Buffers and poll state, always mutated together.
pub(crate) struct IoState {
    pub image: ProcessImage,
    pub cycle: PollCycle,
    pub generation: u64,
}

pub(crate) struct Shared {
    pub config: CouplerConfig,
    poll_period: Mutex<Duration>,
    connector: Arc<dyn Connector>,
    handler: RwLock<Option<Arc<dyn ConditionHandler>>>,
    connect_lock: Mutex<()>,
    connecting: AtomicBool,
    cooldown: Mutex<Option<Instant>>,
    cooldown_changed: Condvar,
    session: RwLock<Option<Arc<Session>>>,
    pub io: Mutex<Option<IoState>>,
    timer: Mutex<Option<(u64, PollTimer)>>,
    generation: AtomicU64,
}

impl Shared {
    pub fn session(&self) -> Option<Arc<Session>> {
        self.session.read().clone()
    }

    /// The live session, or a reported `ConnectionLost`.
    pub fn require_session(&self) -> Result<Arc<Session>> {
        self.session()
            .ok_or_else(|| self.fail(Condition::new(ConditionKind::ConnectionLost)))
    }

    fn is_current(&self, generation: u64) -> bool {
        self.session
            .read()
            .as_ref()
            .is_some_and(|session| session.generation == generation)
    }

    pub fn is_direct(&self) -> bool {
        self.poll_period.lock().is_zero()
    }

    pub fn emit(&self, condition: &Condition) {
        debug!(
            code = condition.code(),
            kind = %condition.kind,
            module = ?condition.module,
            phase = ?condition.phase,
            "condition raised"
        );
        let handler = self.handler.read().clone();
        if let Some(handler) = handler {
            handler.on_condition(condition);
        }
    }

    /// Reports a condition and turns it into an error.
    pub fn fail(&self, condition: Condition) -> CouplerError {
        self.emit(&condition);
        CouplerError::Condition(condition)
    }

    /// Maps a transport failure, disconnecting first when the mapping says
    /// so, then reports it.
    pub fn transport_failure(
        &self,
        generation: u64,
        channel: Channel,
        error: TransportError,
        module: Option<usize>,
    ) -> CouplerError {
        let kind = ConditionKind::from_transport(channel, &error);
        debug!(%channel, %kind, %error, "request failed");
        if kind.forces_disconnect() {
            self.release(Some(generation), true);
        }
        let mut condition = Condition::new(kind);
        condition.module = module;
        self.fail(condition)
    }

    /// Executes one request on the session's transport, reporting failures.
    pub fn execute(
        &self,
        session: &Session,
        channel: Channel,
        request: &Request,
        module: Option<usize>,
    ) -> Result<Vec<u8>> {
        session
            .transport
            .execute(channel, self.config.unit_id, request)
            .map_err(|error| self.transport_failure(session.generation, channel, error, module))
    }

    fn wait_for_cooldown(&self) {
        let mut cooldown = self.cooldown.lock();
        while let Some(deadline) = *cooldown {
            let now = Instant::now();
            if now >= deadline {
                *cooldown = None;
                break;
            }
            debug!(remaining = ?deadline.saturating_duration_since(now), "waiting for reconnect cooldown");
            self.cooldown_changed.wait_until(&mut cooldown, deadline);
        }
    }

    fn connect(self: &Arc<Self>, host: &str, port: u16) -> Result<()> {
        let mut raised = Vec::new();
        let result = {
            let _serialized = self.connect_lock.lock();
            self.wait_for_cooldown();
            if self.session.read().is_some() {
                return Err(CouplerError::AlreadyConnected);
            }
            self.connecting.store(true, Ordering::SeqCst);
            let result = self.establish(host, port, &mut raised);
            self.connecting.store(false, Ordering::SeqCst);
            result
        };
        for condition in &raised {
            self.emit(condition);
        }
        result
    }

    fn establish(self: &Arc<Self>, host: &str, port: u16, raised: &mut Vec<Condition>) -> Result<()> {
        let unit = self.config.unit_id;
        info!(host, port, "connecting to coupler");

        let transport = self.connector.connect(host, port).map_err(|error| {
            warn!(host, port, %error, "connection failed");
            CouplerError::connection(host, port, Some(error))
        })?;

        if let Err(error) = disable_boundary_check(transport.as_ref(), unit) {
            warn!(
                host,
                port,
                %error,
                delay = ?self.config.boot_retry_delay,
                "coupler not answering, retrying after boot delay"
            );
            thread::sleep(self.config.boot_retry_delay);
            if let Err(error) = disable_boundary_check(transport.as_ref(), unit) {
                warn!(host, port, %error, "coupler unreachable");
                transport.close();
                return Err(CouplerError::connection(host, port, Some(error)));
            }
        }

        let (summary, modules, threshold) = match self.handshake(transport.as_ref()) {
            Ok(handshake) => handshake,
            Err(error) => {
                transport.close();
                let condition = Condition::new(ConditionKind::from_transport(Channel::Parameter, &error));
                warn!(host, port, %error, "coupler handshake failed");
                raised.push(condition.clone());
                return Err(CouplerError::Condition(condition));
            }
        };

        let image = ProcessImage::from_summary(&summary);
        for kind in IoKind::ALL {
            let (len, limit) = (image.len(kind), poll::transfer_limit(kind));
            if len > limit {
                warn!(%kind, len, limit, "buffer exceeds one poll request, its phase will fail");
            }
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let session = Arc::new(Session {
            transport,
            modules: modules.into(),
            summary,
            threshold: AtomicU16::new(threshold),
            generation,
            host: host.to_string(),
            port,
        });
        *self.io.lock() = Some(IoState {
            image,
            cycle: PollCycle::new(),
            generation,
        });
        *self.session.write() = Some(Arc::clone(&session));

        if let Err(error) = self.restart_timer(&session) {
            warn!(%error, "failed to start poll timer");
            self.release(Some(generation), false);
            let condition = Condition::new(ConditionKind::Unhandled);
            raised.push(condition.clone());
            return Err(CouplerError::Condition(condition));
        }

        info!(
            host,
            port,
            modules = session.modules.len(),
            watchdog_ms = threshold,
            "coupler connected"
        );
        Ok(())
    }

    fn handshake(
        &self,
        transport: &dyn Transport,
    ) -> std::result::Result<(ProcessSummary, Vec<Module>, u16), TransportError> {
        let unit = self.config.unit_id;
        let summary = module::read_summary(transport, unit)?;
        let modules = module::discover(transport, unit, self.config.max_slots)?;
        let threshold = watchdog::read_threshold(transport, unit)?;
        watchdog::arm(transport, unit)?;
        Ok((summary, modules, threshold))
    }

    /// Replaces the poll timer with one running at the current refresh
    /// period. No timer runs when the period is zero.
    pub fn restart_timer(self: &Arc<Self>, session: &Session) -> std::io::Result<()> {
        let period = watchdog::refresh_period(
            *self.poll_period.lock(),
            session.threshold.load(Ordering::SeqCst),
        );
        let generation = session.generation;
        let previous = {
            let mut slot = self.timer.lock();
            if !self.is_current(generation) {
                return Ok(());
            }
            let next = if period.is_zero() {
                None
            } else {
                let weak = Arc::downgrade(self);
                let timer = PollTimer::start(period, move || {
                    weak.upgrade()
                        .is_some_and(|shared| shared.poll_tick(generation))
                })?;
                debug!(period = ?timer.period(), generation, "poll timer armed");
                Some((generation, timer))
            };
            std::mem::replace(&mut *slot, next)
        };
        drop(previous);
        Ok(())
    }

    /// [`restart_timer`](Self::restart_timer), reporting a spawn failure.
    pub fn rearm(self: &Arc<Self>, session: &Session) -> Result<()> {
        self.restart_timer(session).map_err(|error| {
            warn!(%error, "failed to start poll timer");
            self.fail(Condition::new(ConditionKind::Unhandled))
        })
    }

    fn stop_timer(&self, generation: u64) {
        let timer = self.take_timer(generation);
        drop(timer);
    }

    fn take_timer(&self, generation: u64) -> Option<(u64, PollTimer)> {
        let mut slot = self.timer.lock();
        if slot.as_ref().is_some_and(|(owner, _)| *owner == generation) {
            slot.take()
        } else {
            None
        }
    }

    /// Runs one poll tick. Returns `false` when the timer should stop.
    pub fn poll_tick(self: &Arc<Self>, generation: u64) -> bool {
        let Some(session) = self.session().filter(|s| s.generation == generation) else {
            return false;
        };
        let continuous = !self.is_direct();
        let tick = {
            let mut io = self.io.lock();
            match io.as_mut() {
                Some(state) if state.generation == generation => {
                    state.cycle.tick(&state.image, continuous)
                }
                _ => return false,
            }
        };

        match tick {
            Tick::Wait => true,
            Tick::Escalate(phase) => {
                warn!(%phase, "poll requests unanswered, dropping connection");
                self.release(Some(generation), true);
                self.emit(&Condition::new(ConditionKind::Timeout).with_phase(phase));
                false
            }
            Tick::Issue(PollRequest {
                ticket,
                phase,
                request,
            }) => {
                debug!(%phase, ticket, "poll request");
                let weak = Arc::downgrade(self);
                session.transport.submit(
                    phase.channel(),
                    self.config.unit_id,
                    request,
                    Box::new(move |result| {
                        if let Some(shared) = weak.upgrade() {
                            shared.on_poll_reply(generation, ticket, phase, result);
                        }
                    }),
                );
                true
            }
        }
    }

    fn on_poll_reply(
        &self,
        generation: u64,
        ticket: u64,
        phase: PollPhase,
        result: std::result::Result<Vec<u8>, TransportError>,
    ) {
        match result {
            Ok(payload) => {
                let completion = {
                    let mut io = self.io.lock();
                    match io.as_mut() {
                        Some(state) if state.generation == generation => {
                            state.cycle.complete(ticket, &payload, &mut state.image)
                        }
                        _ => Completion::Stale,
                    }
                };
                match completion {
                    Completion::WatchdogExpired => {
                        warn!("coupler watchdog expired, polling stopped");
                        self.stop_timer(generation);
                        self.emit(
                            &Condition::new(ConditionKind::WatchdogExpired)
                                .with_phase(PollPhase::WatchdogCheck),
                        );
                    }
                    Completion::Done(phase) => trace!(%phase, ticket, "poll response applied"),
                    Completion::Stale => debug!(%phase, ticket, "stale poll response discarded"),
                }
            }
            Err(error) => {
                let accepted = {
                    let io = self.io.lock();
                    match io.as_ref() {
                        Some(state) if state.generation == generation => state.cycle.fail(ticket),
                        _ => false,
                    }
                };
                if !accepted {
                    debug!(%phase, ticket, %error, "stale poll failure discarded");
                    return;
                }
                let kind = ConditionKind::from_transport(phase.channel(), &error);
                debug!(%phase, %kind, %error, "poll request failed");
                if kind.forces_disconnect() {
                    self.release(Some(generation), true);
                }
                self.emit(&Condition::new(kind).with_phase(phase));
            }
        }
    }

    /// Tears down the live session. With `generation` set, only that
    /// session is released. Returns `false` if there was nothing to release.
    pub fn release(&self, generation: Option<u64>, cooldown: bool) -> bool {
        let session = {
            let mut slot = self.session.write();
            let matches = match (slot.as_ref(), generation) {
                (None, _) => false,
                (Some(live), Some(wanted)) => live.generation == wanted,
                (Some(_), None) => true,
            };
            if !matches {
                return false;
            }
            slot.take()
        };
        let Some(session) = session else {
            return false;
        };

        let timer = self.take_timer(session.generation);
        if let Some((_, timer)) = &timer {
            timer.signal_stop();
        }
        session.transport.close();
        drop(timer);

        {
            let mut io = self.io.lock();
            if io
                .as_ref()
                .is_some_and(|state| state.generation == session.generation)
            {
                *io = None;
            }
        }

        if cooldown {
            *self.cooldown.lock() = Some(Instant::now() + self.config.reconnect_cooldown);
            self.cooldown_changed.notify_all();
        }
        info!(host = %session.host, port = session.port, "coupler disconnected");
        true
    }
}

fn disable_boundary_check(transport: &dyn Transport, unit: u8) -> std::result::Result<(), TransportError> {
    transport
        .execute(
            Channel::Boundary,
            unit,
            &Request::WriteSingleRegister {
                address: BOUNDARY_CHECK_REGISTER,
                value: BOUNDARY_CHECK_OFF,
            },
        )
        .map(drop)
}

/// Driver for one bus coupler.
///
/// All methods take `&self`; a `Coupler` can be shared between threads
/// behind an `Arc`. Dropping it disconnects.
pub struct Coupler {
    pub(crate) shared: Arc<Shared>,
}

impl Coupler {
    /// Creates a driver that connects over Modbus TCP with default timeouts.
    pub fn new(config: CouplerConfig) -> Self {
        Self::with_connector(config, TcpConnector::new())
    }

    /// Creates a driver that opens transports through `connector`.
    pub fn with_connector(config: CouplerConfig, connector: impl Connector + 'static) -> Self {
        let poll_period = watchdog::quantize(config.poll_period.min(MAX_POLL_PERIOD));
        Self {
            shared: Arc::new(Shared {
                config,
                poll_period: Mutex::new(poll_period),
                connector: Arc::new(connector),
                handler: RwLock::new(None),
                connect_lock: Mutex::new(()),
                connecting: AtomicBool::new(false),
                cooldown: Mutex::new(None),
                cooldown_changed: Condvar::new(),
                session: RwLock::new(None),
                io: Mutex::new(None),
                timer: Mutex::new(None),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Installs the condition handler, replacing any previous one.
    pub fn set_condition_handler(&self, handler: impl ConditionHandler + 'static) {
        *self.shared.handler.write() = Some(Arc::new(handler));
    }

    /// Removes the condition handler.
    pub fn clear_condition_handler(&self) {
        *self.shared.handler.write() = None;
    }

    /// Connects to the coupler at `host:port`.
    ///
    /// Blocks while a reconnect cooldown is running. Concurrent calls are
    /// serialized.
    ///
    /// # Errors
    ///
    /// - `CouplerError::AlreadyConnected` if a connection is live
    /// - `CouplerError::Connection` if the host cannot be reached or never
    ///   answers the boundary-check write
    /// - `CouplerError::Condition` if the handshake fails after the coupler
    ///   answered; the condition is also reported to the handler
    pub fn connect(&self, host: &str, port: u16) -> Result<()> {
        self.shared.connect(host, port)
    }

    /// Disconnects and starts the reconnect cooldown.
    ///
    /// Does nothing when already disconnected. Safe to call from the
    /// condition handler.
    pub fn disconnect(&self) {
        self.shared.release(None, true);
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        if self.shared.session.read().is_some() {
            ConnectionState::Connected
        } else if self.shared.connecting.load(Ordering::SeqCst) {
            ConnectionState::Connecting
        } else if self
            .shared
            .cooldown
            .lock()
            .is_some_and(|deadline| Instant::now() < deadline)
        {
            ConnectionState::ReconnectCooldown
        } else {
            ConnectionState::Disconnected
        }
    }

    /// Whether a connection is live.
    pub fn is_connected(&self) -> bool {
        self.shared.session.read().is_some()
    }

    /// Host and port of the live connection.
    pub fn endpoint(&self) -> Option<(String, u16)> {
        self.shared
            .session()
            .map(|session| (session.host.clone(), session.port))
    }

    /// The configuration this driver was created with.
    pub fn config(&self) -> &CouplerConfig {
        &self.shared.config
    }

    /// Modules found by the last discovery; empty when disconnected.
    pub fn modules(&self) -> Arc<[Module]> {
        self.shared
            .session()
            .map(|session| Arc::clone(&session.modules))
            .unwrap_or_else(|| Arc::from(Vec::new()))
    }

    /// Process-data counts read during the handshake.
    pub fn process_summary(&self) -> Option<ProcessSummary> {
        self.shared.session().map(|session| session.summary)
    }

    /// Copy of the live process image.
    pub fn process_image(&self) -> Option<ProcessImage> {
        self.shared.io.lock().as_ref().map(|state| state.image.clone())
    }

    /// Snapshot of the poll cycle.
    pub fn poll_state(&self) -> Option<PollState> {
        self.shared.io.lock().as_ref().map(|state| state.cycle.state())
    }

    /// Current poll period; zero in direct mode.
    pub fn poll_period(&self) -> Duration {
        *self.shared.poll_period.lock()
    }

    /// Changes the poll period, re-arming the watchdog when connected.
    ///
    /// The period is rounded down to a multiple of 5 ms; zero switches to
    /// direct mode.
    ///
    /// # Errors
    ///
    /// `ValueOutOfRange` if `period` exceeds [`MAX_POLL_PERIOD`], plus any
    /// error from [`watchdog_reset`](Self::watchdog_reset).
    pub fn set_poll_period(&self, period: Duration) -> Result<()> {
        if period > MAX_POLL_PERIOD {
            return Err(self.shared.fail(Condition::new(ConditionKind::ValueOutOfRange)));
        }
        let quantized = watchdog::quantize(period);
        *self.shared.poll_period.lock() = quantized;
        info!(period = ?quantized, quantum = ?TICK_QUANTUM, "poll period changed");
        if self.is_connected() {
            self.watchdog_reset()?;
        }
        Ok(())
    }

    /// Sets the coupler watchdog to reset on every access and re-arms the
    /// poll timer with the current refresh period.
    ///
    /// # Errors
    ///
    /// `ConnectionLost` when disconnected, or the mapped condition of a
    /// failed register write.
    pub fn watchdog_reset(&self) -> Result<()> {
        let session = self.shared.require_session()?;
        self.shared.execute(
            &session,
            Channel::Parameter,
            &Request::WriteSingleRegister {
                address: watchdog::MODE_REGISTER,
                value: watchdog::WatchdogMode::ResetOnAccess.to_register(),
            },
            None,
        )?;
        self.shared.rearm(&session)
    }

    #[cfg(test)]
    pub(crate) fn poll_once(&self) -> bool {
        match self.shared.session() {
            Some(session) => self.shared.poll_tick(session.generation),
            None => false,
        }
    }
}

impl Drop for Coupler {
    fn drop(&mut self) {
        self.shared.release(None, false);
    }
}

impl std::fmt::Debug for Coupler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coupler")
            .field("state", &self.state())
            .field("endpoint", &self.endpoint())
            .field("poll_period", &self.poll_period())
            .finish()
    }
}
