//! # Bus Coupler I/O Driver
//!
//! A Rust driver for modular Modbus TCP bus couplers: one network-attached
//! coupler with a row of digital and analog I/O modules behind it.
//!
//! The driver connects to the coupler, discovers the attached modules,
//! keeps the coupler's watchdog alive and mirrors the process data in a
//! [`ProcessImage`] that a background poll cycle exchanges with the device.
//!
//! ## Features
//!
//! - **Module discovery**: the module list is read once per connection and
//!   published as an immutable snapshot
//! - **Dual-mode I/O**: direct request per call, or buffered access to a
//!   polled process image
//! - **Watchdog supervision**: refresh timer derived from the coupler's
//!   threshold, expiry detection
//! - **One condition channel**: every failure is reported exactly once
//!   through a [`ConditionHandler`], and synchronous calls also return it
//! - **Register map**: typed accessors for configuration, diagnostics and
//!   module configuration registers
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use coupler_io::{Condition, Coupler, CouplerConfig};
//!
//! fn main() -> coupler_io::Result<()> {
//!     // Poll the process image every 20 ms
//!     let config = CouplerConfig::new().with_poll_period(Duration::from_millis(20));
//!     let coupler = Coupler::new(config);
//!     coupler.set_condition_handler(|condition: &Condition| {
//!         eprintln!("coupler: {condition}");
//!     });
//!
//!     coupler.connect("192.168.100.1", 502)?;
//!     for module in coupler.modules().iter() {
//!         println!("{module}");
//!     }
//!
//!     // Stage output bit 0 of module 1; the next poll cycle writes it
//!     coupler.write_digital_outputs(1, 0, &[true])?;
//!
//!     // Last polled value of the first 8 inputs of module 0
//!     let inputs = coupler.read_digital_inputs(0, 0, 8)?;
//!     println!("inputs: {inputs:?}");
//!
//!     coupler.disconnect();
//!     Ok(())
//! }
//! ```
//!
//! ## Poll Cycle
//!
//! While connected, the poll timer issues one request per tick:
//!
//! | Phase | Request | Channel |
//! |-------|---------|---------|
//! | [`PollPhase::WatchdogCheck`] | read 0x1042 | [`Channel::Watchdog`] |
//! | [`PollPhase::DigitalInRead`] | read discrete inputs | [`Channel::DigitalIn`] |
//! | [`PollPhase::DigitalOutWrite`] | write coils | [`Channel::DigitalOut`] |
//! | [`PollPhase::AnalogInRead`] | read input registers | [`Channel::AnalogIn`] |
//! | [`PollPhase::AnalogOutWrite`] | write holding registers at 0x0800 | [`Channel::AnalogOut`] |
//!
//! With a zero poll period only the watchdog phase runs, at half the
//! watchdog threshold, and I/O calls talk to the coupler directly.
//!
//! ## Conditions
//!
//! | Code | Kind | Disconnects |
//! |------|------|:-----------:|
//! | 1 | [`ConditionKind::WatchdogExpired`] | |
//! | 2 | [`ConditionKind::Timeout`] | ✓ |
//! | 3 | [`ConditionKind::ConnectionLost`] | ✓ |
//! | 10..=14 | module index and missing channel kinds | |
//! | 15 | [`ConditionKind::InvalidRegisterData`] | |
//! | 16 | [`ConditionKind::InvalidDataSize`] | |
//! | 17 | [`ConditionKind::EmptyResponse`] | |
//! | 20 | [`ConditionKind::ValueOutOfRange`] | |
//! | 30 | [`ConditionKind::InvalidAddressFormat`] | |
//! | 40 | [`ConditionKind::Unhandled`] | |
//!
//! ## Logging
//!
//! The crate logs through [`tracing`]; install any subscriber to see
//! connection, discovery and poll activity.

#![warn(clippy::all)]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod condition;
mod coupler;
mod error;
mod header;
pub mod image;
pub mod module;
pub mod poll;
pub mod registers;
pub mod request;
pub mod response;
mod store;
pub mod transport;
pub mod utils;
pub mod watchdog;

#[cfg(test)]
pub(crate) mod testing;

// Public re-exports
pub use condition::{ChannelHandler, Condition, ConditionHandler, ConditionKind};
pub use coupler::{
    ConnectionState, Coupler, CouplerConfig, DEFAULT_BOOT_RETRY_DELAY, DEFAULT_RECONNECT_COOLDOWN,
    MAX_POLL_PERIOD,
};
pub use error::{CouplerError, Result};
pub use header::{MbapHeader, MBAP_HEADER_SIZE, MODBUS_PROTOCOL_ID};
pub use image::{IoKind, ProcessImage, ProcessSummary};
pub use module::Module;
pub use poll::{PollPhase, PollState};
pub use registers::{
    Access, Counter, ModuleParameter, NetworkAddress, Parameter, StatusErrors, UnknownParameter,
};
pub use request::Request;
pub use response::ExceptionCode;
pub use transport::{
    Channel, Connector, Reply, TcpConnector, TcpTransport, Transport, TransportError,
    DEFAULT_MODBUS_PORT,
};
pub use watchdog::WatchdogMode;
