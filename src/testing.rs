//! In-memory bus coupler for tests.
//!
//! [`MockDevice`] answers every request from a register map, records the
//! traffic it sees, and can inject failures or hold replies back so tests
//! control exactly when a poll response arrives.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::condition::{Condition, ConditionHandler, ConditionKind};
use crate::image::ProcessSummary;
use crate::module::{slot_address, NO_CHANNEL, PROCESS_SUMMARY_BASE};
use crate::request::Request;
use crate::response::ExceptionCode;
use crate::transport::{Channel, Connector, Reply, Transport, TransportError};
use crate::utils::{pack_bits, unpack_bits, words_to_bytes};

/// Failure a mock request can be made to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    Timeout,
    ConnectionLost,
    Exception(ExceptionCode),
    /// Answers with no data at all.
    Empty,
}

impl MockFailure {
    fn into_error(self) -> Option<TransportError> {
        match self {
            MockFailure::Timeout => Some(TransportError::Timeout),
            MockFailure::ConnectionLost => Some(TransportError::ConnectionLost),
            MockFailure::Exception(code) => Some(TransportError::Exception(code)),
            MockFailure::Empty => None,
        }
    }
}

struct FailureRule {
    channel: Channel,
    failure: MockFailure,
    remaining: usize,
}

#[derive(Default)]
struct State {
    registers: HashMap<u16, u16>,
    inputs: HashMap<u16, u16>,
    coils: HashMap<u16, bool>,
    discrete: HashMap<u16, bool>,
    next_slot: usize,
    failures: Vec<FailureRule>,
    refuse_connections: bool,
    hold_replies: bool,
    held: Vec<(Channel, Request, Reply)>,
    log: Vec<(Channel, Request)>,
    connects: usize,
    sessions: u64,
    closed: HashSet<u64>,
}

/// Scriptable coupler implementing both [`Connector`] and [`Transport`].
///
/// Clones share the same device state.
#[derive(Clone)]
pub struct MockDevice {
    state: Arc<Mutex<State>>,
    session: u64,
}

impl MockDevice {
    pub fn new() -> Self {
        let device = Self {
            state: Arc::new(Mutex::new(State::default())),
            session: 0,
        };
        device.state.lock().registers.insert(0x1040, 1000);
        device
    }

    /// Adds a module in the next slot. Channel indices are raw byte
    /// indices in register order: analog in, analog out, digital in,
    /// digital out.
    pub fn with_module(self, status: u16, hardware_id: u16, indices: [Option<u16>; 4]) -> Self {
        {
            let mut state = self.state.lock();
            let slot = state.next_slot;
            state.next_slot += 1;
            let base = slot_address(slot, 0).unwrap_or(0xA000);
            state.registers.insert(base, status);
            state.registers.insert(base + 1, hardware_id);
            for (offset, index) in (4u16..).zip(indices) {
                state.registers.insert(base + offset, index.unwrap_or(NO_CHANNEL));
            }
        }
        self
    }

    /// Leaves the next slot empty.
    pub fn with_empty_slot(self) -> Self {
        self.state.lock().next_slot += 1;
        self
    }

    pub fn with_summary(self, summary: ProcessSummary) -> Self {
        let words = [
            summary.modules,
            summary.analog_in,
            summary.analog_in * 2,
            summary.analog_out,
            summary.analog_out * 2,
            summary.digital_in,
            summary.digital_in,
            summary.digital_out,
            summary.digital_out,
        ];
        {
            let mut state = self.state.lock();
            for (address, word) in (PROCESS_SUMMARY_BASE..).zip(words) {
                state.registers.insert(address, word);
            }
        }
        self
    }

    pub fn with_register(self, address: u16, value: u16) -> Self {
        self.set_register(address, value);
        self
    }

    pub fn with_failure(self, channel: Channel, failure: MockFailure, times: usize) -> Self {
        self.inject_failure(channel, failure, times);
        self
    }

    pub fn refusing_connections(self) -> Self {
        self.state.lock().refuse_connections = true;
        self
    }

    pub fn set_register(&self, address: u16, value: u16) {
        self.state.lock().registers.insert(address, value);
    }

    pub fn register(&self, address: u16) -> u16 {
        self.state.lock().registers.get(&address).copied().unwrap_or(0)
    }

    pub fn set_input_register(&self, address: u16, value: u16) {
        self.state.lock().inputs.insert(address, value);
    }

    pub fn set_discrete_input(&self, address: u16, value: bool) {
        self.state.lock().discrete.insert(address, value);
    }

    pub fn coil(&self, address: u16) -> bool {
        self.state.lock().coils.get(&address).copied().unwrap_or(false)
    }

    /// The next `times` requests on `channel` fail with `failure`.
    pub fn inject_failure(&self, channel: Channel, failure: MockFailure, times: usize) {
        self.state.lock().failures.push(FailureRule {
            channel,
            failure,
            remaining: times,
        });
    }

    /// Queues submitted requests instead of answering them.
    pub fn hold_replies(&self, hold: bool) {
        self.state.lock().hold_replies = hold;
    }

    pub fn held(&self) -> usize {
        self.state.lock().held.len()
    }

    /// Answers every held request.
    pub fn release_held(&self) {
        let held = std::mem::take(&mut self.state.lock().held);
        for (channel, request, reply) in held {
            reply(self.answer(channel, &request));
        }
    }

    pub fn requests(&self) -> Vec<(Channel, Request)> {
        self.state.lock().log.clone()
    }

    pub fn request_count(&self) -> usize {
        self.state.lock().log.len()
    }

    pub fn requests_on(&self, channel: Channel) -> usize {
        self.state
            .lock()
            .log
            .iter()
            .filter(|(logged, _)| *logged == channel)
            .count()
    }

    pub fn clear_requests(&self) {
        self.state.lock().log.clear();
    }

    pub fn connects(&self) -> usize {
        self.state.lock().connects
    }

    /// Whether every transport handed out by `connect` has been closed.
    pub fn all_closed(&self) -> bool {
        let state = self.state.lock();
        (1..=state.sessions).all(|session| state.closed.contains(&session))
    }

    fn answer(&self, channel: Channel, request: &Request) -> Result<Vec<u8>, TransportError> {
        request.to_pdu()?;
        let mut state = self.state.lock();
        if state.closed.contains(&self.session) {
            return Err(TransportError::NotConnected);
        }
        state.log.push((channel, request.clone()));

        if let Some(rule) = state
            .failures
            .iter_mut()
            .find(|rule| rule.channel == channel && rule.remaining > 0)
        {
            rule.remaining -= 1;
            return match rule.failure.into_error() {
                Some(err) => Err(err),
                None => Ok(Vec::new()),
            };
        }

        Ok(match request {
            Request::ReadCoils { address, count } => {
                let bits: Vec<bool> = (0..*count)
                    .map(|i| state.coils.get(&(address + i)).copied().unwrap_or(false))
                    .collect();
                pack_bits(&bits)
            }
            Request::ReadDiscreteInputs { address, count } => {
                let bits: Vec<bool> = (0..*count)
                    .map(|i| state.discrete.get(&(address + i)).copied().unwrap_or(false))
                    .collect();
                pack_bits(&bits)
            }
            Request::ReadHoldingRegisters { address, count } => {
                read_words(&state.registers, *address, *count)
            }
            Request::ReadInputRegisters { address, count } => {
                read_words(&state.inputs, *address, *count)
            }
            Request::WriteSingleRegister { address, value } => {
                state.registers.insert(*address, *value);
                Vec::new()
            }
            Request::WriteMultipleCoils {
                address,
                count,
                data,
            } => {
                for (i, bit) in unpack_bits(data, usize::from(*count)).into_iter().enumerate() {
                    state.coils.insert(address + i as u16, bit);
                }
                Vec::new()
            }
            Request::WriteMultipleRegisters { address, data } => {
                write_words(&mut state.registers, *address, data);
                Vec::new()
            }
            Request::ReadWriteMultipleRegisters {
                read_address,
                read_count,
                write_address,
                data,
            } => {
                write_words(&mut state.registers, *write_address, data);
                read_words(&state.registers, *read_address, *read_count)
            }
        })
    }
}

fn read_words(map: &HashMap<u16, u16>, address: u16, count: u16) -> Vec<u8> {
    let words: Vec<u16> = (0..count)
        .map(|i| map.get(&(address + i)).copied().unwrap_or(0))
        .collect();
    words_to_bytes(&words)
}

fn write_words(map: &mut HashMap<u16, u16>, address: u16, data: &[u8]) {
    for (i, chunk) in data.chunks_exact(2).enumerate() {
        map.insert(address + i as u16, u16::from_be_bytes([chunk[0], chunk[1]]));
    }
}

impl Transport for MockDevice {
    fn execute(
        &self,
        channel: Channel,
        _unit: u8,
        request: &Request,
    ) -> Result<Vec<u8>, TransportError> {
        self.answer(channel, request)
    }

    fn submit(&self, channel: Channel, _unit: u8, request: Request, reply: Reply) {
        {
            let mut state = self.state.lock();
            if state.hold_replies && !state.closed.contains(&self.session) {
                state.held.push((channel, request, reply));
                return;
            }
        }
        reply(self.answer(channel, &request));
    }

    fn close(&self) {
        self.state.lock().closed.insert(self.session);
    }
}

impl Connector for MockDevice {
    fn connect(&self, _host: &str, _port: u16) -> Result<Arc<dyn Transport>, TransportError> {
        let mut state = self.state.lock();
        state.connects += 1;
        if state.refuse_connections {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "refused",
            )));
        }
        state.sessions += 1;
        Ok(Arc::new(MockDevice {
            state: Arc::clone(&self.state),
            session: state.sessions,
        }))
    }
}

/// Coupler with two modules and a zero watchdog threshold, so no timer runs
/// in direct mode.
///
/// | Module | Digital in | Digital out | Analog in | Analog out |
/// |--------|------------|-------------|-----------|------------|
/// | 0 | bits 0..8 | bits 0..8 | words 0..2 | - |
/// | 1 | bits 8..24 | bits 8..16 | - | word 0 |
pub fn two_module_device() -> MockDevice {
    MockDevice::new()
        .with_register(0x1040, 0)
        .with_summary(ProcessSummary {
            modules: 2,
            digital_in: 3,
            digital_out: 2,
            analog_in: 2,
            analog_out: 1,
        })
        .with_module(1, 0x1111, [Some(0), None, Some(0), Some(0)])
        .with_module(1, 41528, [None, Some(0), Some(1), Some(1)])
}

/// Condition handler that records everything it receives.
#[derive(Clone, Default)]
pub struct Recorder {
    conditions: Arc<Mutex<Vec<Condition>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn conditions(&self) -> Vec<Condition> {
        self.conditions.lock().clone()
    }

    pub fn kinds(&self) -> Vec<ConditionKind> {
        self.conditions.lock().iter().map(|c| c.kind).collect()
    }

    /// Polls until a condition of `kind` has been recorded.
    pub fn wait_for(&self, kind: ConditionKind, timeout: Duration) -> bool {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if self.kinds().contains(&kind) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }
}

impl ConditionHandler for Recorder {
    fn on_condition(&self, condition: &Condition) {
        self.conditions.lock().push(condition.clone());
    }
}

/// Polls `check` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    check()
}
