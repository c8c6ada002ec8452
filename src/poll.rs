//! Five-phase poll cycle and its timer thread.
//!
//! While connected, a periodic timer walks the coupler through
//!
//! ```text
//! WatchdogCheck -> DigitalInRead -> DigitalOutWrite -> AnalogInRead -> AnalogOutWrite -> WatchdogCheck ...
//! ```
//!
//! issuing one request per tick and never more than one at a time. Phases
//! whose buffer is empty are skipped. When the poll period is zero the cycle
//! is pinned to `WatchdogCheck`, which only keeps the watchdog alive.
//!
//! A tick that finds the previous request still outstanding counts a frame
//! error. A request answered with an exception stays outstanding. More than three frame errors in a row drop the request and count
//! a connection error; more than three connection errors escalate to a
//! timeout.

use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use tracing::{debug, trace};

use crate::image::{IoKind, ProcessImage};
use crate::request::{Request, MAX_READ_BITS, MAX_READ_REGISTERS, MAX_WRITE_BITS, MAX_WRITE_REGISTERS};
use crate::transport::Channel;
use crate::watchdog;

/// Frame errors tolerated before a request is abandoned.
pub const MAX_FRAME_ERRORS: u8 = 3;

/// Connection errors tolerated before escalating to a timeout.
pub const MAX_CONNECTION_ERRORS: u8 = 3;

/// Poll cycle phases, in cycle order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PollPhase {
    /// Read the watchdog status register.
    #[default]
    WatchdogCheck,
    /// Read all digital inputs.
    DigitalInRead,
    /// Write all digital outputs.
    DigitalOutWrite,
    /// Read all analog inputs.
    AnalogInRead,
    /// Write all analog outputs.
    AnalogOutWrite,
}

impl PollPhase {
    /// All phases in cycle order.
    pub const ALL: [PollPhase; 5] = [
        PollPhase::WatchdogCheck,
        PollPhase::DigitalInRead,
        PollPhase::DigitalOutWrite,
        PollPhase::AnalogInRead,
        PollPhase::AnalogOutWrite,
    ];

    /// The following phase, wrapping to `WatchdogCheck`.
    pub fn next(self) -> Self {
        match self {
            PollPhase::WatchdogCheck => PollPhase::DigitalInRead,
            PollPhase::DigitalInRead => PollPhase::DigitalOutWrite,
            PollPhase::DigitalOutWrite => PollPhase::AnalogInRead,
            PollPhase::AnalogInRead => PollPhase::AnalogOutWrite,
            PollPhase::AnalogOutWrite => PollPhase::WatchdogCheck,
        }
    }

    /// Buffer the phase transfers, `None` for the watchdog phase.
    pub fn io_kind(self) -> Option<IoKind> {
        match self {
            PollPhase::WatchdogCheck => None,
            PollPhase::DigitalInRead => Some(IoKind::DigitalIn),
            PollPhase::DigitalOutWrite => Some(IoKind::DigitalOut),
            PollPhase::AnalogInRead => Some(IoKind::AnalogIn),
            PollPhase::AnalogOutWrite => Some(IoKind::AnalogOut),
        }
    }

    /// Transport channel used by the phase.
    pub fn channel(self) -> Channel {
        self.io_kind().map_or(Channel::Watchdog, IoKind::channel)
    }
}

impl std::fmt::Display for PollPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PollPhase::WatchdogCheck => "watchdog check",
            PollPhase::DigitalInRead => "digital-in read",
            PollPhase::DigitalOutWrite => "digital-out write",
            PollPhase::AnalogInRead => "analog-in read",
            PollPhase::AnalogOutWrite => "analog-out write",
        };
        f.write_str(name)
    }
}

/// Snapshot of the poll cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PollState {
    /// Phase the next tick starts from.
    pub phase: PollPhase,
    /// A poll request is outstanding.
    pub pending: bool,
    /// Consecutive ticks that found the request still outstanding.
    pub frame_errors: u8,
    /// Requests abandoned since the last answer.
    pub connection_errors: u8,
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    ticket: u64,
    phase: PollPhase,
}

/// One poll request to hand to the transport.
#[derive(Debug)]
pub(crate) struct PollRequest {
    pub ticket: u64,
    pub phase: PollPhase,
    pub request: Request,
}

/// Outcome of a timer tick.
#[derive(Debug)]
pub(crate) enum Tick {
    /// Nothing to send this tick.
    Wait,
    /// Send this request.
    Issue(PollRequest),
    /// Too many unanswered requests.
    Escalate(PollPhase),
}

/// Outcome of a poll response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Completion {
    /// Not the outstanding request; ignored.
    Stale,
    /// Applied to the image.
    Done(PollPhase),
    /// The watchdog status reported expiry.
    WatchdogExpired,
}

/// Poll state machine. Lives under the same lock as the process image.
#[derive(Debug, Default)]
pub(crate) struct PollCycle {
    state: PollState,
    pending: Option<Pending>,
    next_ticket: u64,
}

impl PollCycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    /// Advances the cycle by one timer tick.
    pub fn tick(&mut self, image: &ProcessImage, continuous: bool) -> Tick {
        if let Some(pending) = self.pending {
            self.state.frame_errors += 1;
            trace!(phase = %pending.phase, frame_errors = self.state.frame_errors, "poll request outstanding");
            if self.state.frame_errors > MAX_FRAME_ERRORS {
                self.clear_pending();
                self.state.frame_errors = 0;
                self.state.connection_errors += 1;
                debug!(
                    phase = %pending.phase,
                    connection_errors = self.state.connection_errors,
                    "poll request abandoned"
                );
                if self.state.connection_errors > MAX_CONNECTION_ERRORS {
                    return Tick::Escalate(pending.phase);
                }
            }
            return Tick::Wait;
        }

        let mut phase = self.state.phase;
        while let Some(kind) = phase.io_kind() {
            if image.len(kind) > 0 {
                break;
            }
            phase = phase.next();
        }

        let request = phase_request(phase, image);
        self.next_ticket += 1;
        let ticket = self.next_ticket;
        self.pending = Some(Pending { ticket, phase });
        self.state.pending = true;
        self.state.phase = if continuous {
            phase.next()
        } else {
            PollPhase::WatchdogCheck
        };
        trace!(%phase, ticket, "poll request issued");

        Tick::Issue(PollRequest {
            ticket,
            phase,
            request,
        })
    }

    /// Applies a successful response.
    pub fn complete(&mut self, ticket: u64, payload: &[u8], image: &mut ProcessImage) -> Completion {
        let Some(pending) = self.pending.filter(|p| p.ticket == ticket) else {
            return Completion::Stale;
        };
        self.clear_pending();
        self.state.frame_errors = 0;
        self.state.connection_errors = 0;

        match pending.phase {
            PollPhase::WatchdogCheck if watchdog::is_expired(payload) => Completion::WatchdogExpired,
            PollPhase::DigitalInRead => {
                image.load(IoKind::DigitalIn, payload);
                Completion::Done(pending.phase)
            }
            PollPhase::AnalogInRead => {
                image.load(IoKind::AnalogIn, payload);
                Completion::Done(pending.phase)
            }
            phase => Completion::Done(phase),
        }
    }

    /// Checks a failed response against the outstanding request. The request
    /// stays outstanding, so later ticks count it as unanswered. Returns
    /// `false` if `ticket` is not outstanding.
    pub fn fail(&self, ticket: u64) -> bool {
        self.pending.is_some_and(|p| p.ticket == ticket)
    }

    fn clear_pending(&mut self) {
        self.pending = None;
        self.state.pending = false;
    }
}

/// Largest buffer of `kind` one poll request can carry.
pub(crate) fn transfer_limit(kind: IoKind) -> usize {
    let limit = match kind {
        IoKind::DigitalIn => MAX_READ_BITS,
        IoKind::DigitalOut => MAX_WRITE_BITS,
        IoKind::AnalogIn => MAX_READ_REGISTERS,
        IoKind::AnalogOut => MAX_WRITE_REGISTERS,
    };
    usize::from(limit)
}

fn phase_request(phase: PollPhase, image: &ProcessImage) -> Request {
    let Some(kind) = phase.io_kind() else {
        return watchdog::status_request();
    };
    let len = u16::try_from(image.len(kind)).unwrap_or(u16::MAX);
    let address = kind.base_address();
    match kind {
        IoKind::DigitalIn => Request::ReadDiscreteInputs { address, count: len },
        IoKind::DigitalOut => Request::WriteMultipleCoils {
            address,
            count: len,
            data: image.payload(kind),
        },
        IoKind::AnalogIn => Request::ReadInputRegisters { address, count: len },
        IoKind::AnalogOut => Request::WriteMultipleRegisters {
            address,
            data: image.payload(kind),
        },
    }
}

/// Periodic timer thread driving the poll cycle.
///
/// `tick` runs on the timer thread at a fixed rate until it returns `false`
/// or the timer is dropped. Dropping joins the thread unless the drop
/// happens on the timer thread itself.
pub(crate) struct PollTimer {
    signal: Arc<(Mutex<bool>, Condvar)>,
    handle: Option<JoinHandle<()>>,
    thread_id: ThreadId,
    period: Duration,
}

impl PollTimer {
    pub fn start<F>(period: Duration, mut tick: F) -> std::io::Result<Self>
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let signal = Arc::new((Mutex::new(false), Condvar::new()));
        let thread_signal = Arc::clone(&signal);
        let handle = thread::Builder::new()
            .name("coupler-poll".into())
            .spawn(move || {
                let (stopped, wake) = &*thread_signal;
                let mut next = Instant::now() + period;
                let mut guard = stopped.lock();
                loop {
                    while !*guard {
                        if wake.wait_until(&mut guard, next).timed_out() {
                            break;
                        }
                    }
                    if *guard {
                        return;
                    }
                    let keep_going = parking_lot::MutexGuard::unlocked(&mut guard, &mut tick);
                    if !keep_going {
                        return;
                    }
                    next += period;
                    let now = Instant::now();
                    if next < now {
                        next = now + period;
                    }
                }
            })?;
        let thread_id = handle.thread().id();
        debug!(?period, "poll timer started");
        Ok(Self {
            signal,
            handle: Some(handle),
            thread_id,
            period,
        })
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Asks the thread to stop after its current tick.
    pub fn signal_stop(&self) {
        let (stopped, wake) = &*self.signal;
        *stopped.lock() = true;
        wake.notify_all();
    }
}

impl Drop for PollTimer {
    fn drop(&mut self) {
        self.signal_stop();
        if let Some(handle) = self.handle.take() {
            if thread::current().id() != self.thread_id {
                let _ = handle.join();
            }
        }
        debug!("poll timer stopped");
    }
}

impl std::fmt::Debug for PollTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollTimer")
            .field("period", &self.period)
            .field("stopped", &*self.signal.0.lock())
            .finish()
    }
}
