//! Condition taxonomy, delivery and transport-error mapping.
//!
//! Everything that goes wrong inside the driver is reported as a
//! [`Condition`]: a [`ConditionKind`] with its numeric device-family code,
//! plus the module index and poll phase it relates to when known.
//! Conditions reach the application through one [`ConditionHandler`].
//!
//! | Code | Kind |
//! |------|------|
//! | 1 | `WatchdogExpired` |
//! | 2 | `Timeout` |
//! | 3 | `ConnectionLost` |
//! | 10 | `InvalidModuleIndex` |
//! | 11 | `NoDigitalInputData` |
//! | 12 | `NoDigitalOutputData` |
//! | 13 | `NoAnalogInputData` |
//! | 14 | `NoAnalogOutputData` |
//! | 15 | `InvalidRegisterData` |
//! | 16 | `InvalidDataSize` |
//! | 17 | `EmptyResponse` |
//! | 20 | `ValueOutOfRange` |
//! | 30 | `InvalidAddressFormat` |
//! | 40 | `Unhandled` |
//!
//! # Example
//!
//! ```
//! use coupler_io::{Channel, ConditionKind, TransportError};
//!
//! let kind = ConditionKind::from_transport(Channel::Parameter, &TransportError::Timeout);
//! assert_eq!(kind, ConditionKind::Timeout);
//! assert!(kind.forces_disconnect());
//! ```

use std::sync::mpsc::Sender;

use crate::image::IoKind;
use crate::poll::PollPhase;
use crate::response::ExceptionCode;
use crate::transport::{Channel, TransportError};

/// Kinds of condition the driver reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConditionKind {
    /// The coupler reported its watchdog as expired.
    WatchdogExpired,
    /// A request went unanswered.
    Timeout,
    /// The connection dropped or was never up.
    ConnectionLost,
    /// Module index outside the discovered module list.
    InvalidModuleIndex,
    /// The module has no digital inputs.
    NoDigitalInputData,
    /// The module has no digital outputs.
    NoDigitalOutputData,
    /// The module has no analog inputs.
    NoAnalogInputData,
    /// The module has no analog outputs.
    NoAnalogOutputData,
    /// A module configuration register access was rejected.
    InvalidRegisterData,
    /// Requested size is zero or exceeds the module's span.
    InvalidDataSize,
    /// The device answered without the expected payload.
    EmptyResponse,
    /// A value is outside the accepted range.
    ValueOutOfRange,
    /// An address string could not be parsed.
    InvalidAddressFormat,
    /// Anything else.
    Unhandled,
}

impl ConditionKind {
    /// Numeric code used by the device family.
    pub fn code(self) -> u16 {
        match self {
            ConditionKind::WatchdogExpired => 1,
            ConditionKind::Timeout => 2,
            ConditionKind::ConnectionLost => 3,
            ConditionKind::InvalidModuleIndex => 10,
            ConditionKind::NoDigitalInputData => 11,
            ConditionKind::NoDigitalOutputData => 12,
            ConditionKind::NoAnalogInputData => 13,
            ConditionKind::NoAnalogOutputData => 14,
            ConditionKind::InvalidRegisterData => 15,
            ConditionKind::InvalidDataSize => 16,
            ConditionKind::EmptyResponse => 17,
            ConditionKind::ValueOutOfRange => 20,
            ConditionKind::InvalidAddressFormat => 30,
            ConditionKind::Unhandled => 40,
        }
    }

    /// Short human-readable description.
    pub fn description(self) -> &'static str {
        match self {
            ConditionKind::WatchdogExpired => "watchdog expired",
            ConditionKind::Timeout => "timeout",
            ConditionKind::ConnectionLost => "connection lost",
            ConditionKind::InvalidModuleIndex => "invalid module index",
            ConditionKind::NoDigitalInputData => "no digital input data",
            ConditionKind::NoDigitalOutputData => "no digital output data",
            ConditionKind::NoAnalogInputData => "no analog input data",
            ConditionKind::NoAnalogOutputData => "no analog output data",
            ConditionKind::InvalidRegisterData => "invalid register data",
            ConditionKind::InvalidDataSize => "invalid data size",
            ConditionKind::EmptyResponse => "empty response",
            ConditionKind::ValueOutOfRange => "value out of range",
            ConditionKind::InvalidAddressFormat => "invalid address format",
            ConditionKind::Unhandled => "unhandled error",
        }
    }

    /// Whether the driver disconnects before reporting this kind.
    pub fn forces_disconnect(self) -> bool {
        matches!(self, ConditionKind::Timeout | ConditionKind::ConnectionLost)
    }

    /// The "channel kind missing" condition for an I/O kind.
    pub fn missing_channel(kind: IoKind) -> Self {
        match kind {
            IoKind::DigitalIn => ConditionKind::NoDigitalInputData,
            IoKind::DigitalOut => ConditionKind::NoDigitalOutputData,
            IoKind::AnalogIn => ConditionKind::NoAnalogInputData,
            IoKind::AnalogOut => ConditionKind::NoAnalogOutputData,
        }
    }

    /// Translates a transport failure on `channel`.
    ///
    /// Illegal-address and illegal-value exceptions mean bad register data
    /// on the module register channel and a bad size everywhere else.
    pub fn from_transport(channel: Channel, error: &TransportError) -> Self {
        match error {
            TransportError::Timeout => ConditionKind::Timeout,
            TransportError::ConnectionLost | TransportError::NotConnected => {
                ConditionKind::ConnectionLost
            }
            TransportError::Exception(
                ExceptionCode::IllegalDataAddress | ExceptionCode::IllegalDataValue,
            ) => {
                if channel == Channel::Register {
                    ConditionKind::InvalidRegisterData
                } else {
                    ConditionKind::InvalidDataSize
                }
            }
            _ => ConditionKind::Unhandled,
        }
    }
}

impl std::fmt::Display for ConditionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description())
    }
}

/// A reported condition with its context.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Condition {
    /// What happened.
    pub kind: ConditionKind,
    /// Module the condition relates to.
    pub module: Option<usize>,
    /// Poll phase that raised the condition.
    pub phase: Option<PollPhase>,
}

impl Condition {
    /// Creates a condition without context.
    pub fn new(kind: ConditionKind) -> Self {
        Self {
            kind,
            module: None,
            phase: None,
        }
    }

    /// Attaches a module index.
    pub fn with_module(mut self, module: usize) -> Self {
        self.module = Some(module);
        self
    }

    /// Attaches a poll phase.
    pub fn with_phase(mut self, phase: PollPhase) -> Self {
        self.phase = Some(phase);
        self
    }

    /// Numeric code of the condition kind.
    pub fn code(&self) -> u16 {
        self.kind.code()
    }
}

impl std::fmt::Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.kind.code(), self.kind)?;
        if let Some(module) = self.module {
            write!(f, " (module {module})")?;
        }
        if let Some(phase) = self.phase {
            write!(f, " during {phase}")?;
        }
        Ok(())
    }
}

/// Receives conditions raised by the driver.
///
/// Called from whichever thread detected the condition (a caller thread or
/// the poll timer), never while driver locks are held. The handler may call
/// back into the [`Coupler`](crate::Coupler), including `disconnect`.
pub trait ConditionHandler: Send + Sync {
    /// Handles one condition.
    fn on_condition(&self, condition: &Condition);
}

impl<F> ConditionHandler for F
where
    F: Fn(&Condition) + Send + Sync,
{
    fn on_condition(&self, condition: &Condition) {
        self(condition)
    }
}

/// Forwards conditions into an `mpsc` channel.
///
/// # Example
///
/// ```
/// use std::sync::mpsc;
/// use coupler_io::{ChannelHandler, Condition, ConditionHandler, ConditionKind};
///
/// let (tx, rx) = mpsc::channel();
/// let handler = ChannelHandler::new(tx);
/// handler.on_condition(&Condition::new(ConditionKind::WatchdogExpired));
/// assert_eq!(rx.recv().unwrap().kind, ConditionKind::WatchdogExpired);
/// ```
#[derive(Debug, Clone)]
pub struct ChannelHandler {
    sender: Sender<Condition>,
}

impl ChannelHandler {
    /// Wraps the sending half of a channel.
    pub fn new(sender: Sender<Condition>) -> Self {
        Self { sender }
    }
}

impl ConditionHandler for ChannelHandler {
    fn on_condition(&self, condition: &Condition) {
        // receiver gone: nobody is listening
        let _ = self.sender.send(condition.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::mpsc;

    #[test]
    fn test_codes() {
        let expected = [
            (ConditionKind::WatchdogExpired, 1),
            (ConditionKind::Timeout, 2),
            (ConditionKind::ConnectionLost, 3),
            (ConditionKind::InvalidModuleIndex, 10),
            (ConditionKind::NoDigitalInputData, 11),
            (ConditionKind::NoDigitalOutputData, 12),
            (ConditionKind::NoAnalogInputData, 13),
            (ConditionKind::NoAnalogOutputData, 14),
            (ConditionKind::InvalidRegisterData, 15),
            (ConditionKind::InvalidDataSize, 16),
            (ConditionKind::EmptyResponse, 17),
            (ConditionKind::ValueOutOfRange, 20),
            (ConditionKind::InvalidAddressFormat, 30),
            (ConditionKind::Unhandled, 40),
        ];
        for (kind, code) in expected {
            assert_eq!(kind.code(), code, "{kind:?}");
        }
    }

    #[test]
    fn test_mapper_timeout_and_connection() {
        assert_eq!(
            ConditionKind::from_transport(Channel::DigitalIn, &TransportError::Timeout),
            ConditionKind::Timeout
        );
        assert_eq!(
            ConditionKind::from_transport(Channel::Parameter, &TransportError::ConnectionLost),
            ConditionKind::ConnectionLost
        );
        assert_eq!(
            ConditionKind::from_transport(Channel::Parameter, &TransportError::NotConnected),
            ConditionKind::ConnectionLost
        );
    }

    #[test]
    fn test_mapper_illegal_data_by_channel() {
        let address = TransportError::Exception(ExceptionCode::IllegalDataAddress);
        let value = TransportError::Exception(ExceptionCode::IllegalDataValue);
        assert_eq!(
            ConditionKind::from_transport(Channel::Register, &address),
            ConditionKind::InvalidRegisterData
        );
        assert_eq!(
            ConditionKind::from_transport(Channel::Register, &value),
            ConditionKind::InvalidRegisterData
        );
        assert_eq!(
            ConditionKind::from_transport(Channel::AnalogIn, &address),
            ConditionKind::InvalidDataSize
        );
        assert_eq!(
            ConditionKind::from_transport(Channel::Parameter, &value),
            ConditionKind::InvalidDataSize
        );
    }

    #[test]
    fn test_mapper_unhandled() {
        let busy = TransportError::Exception(ExceptionCode::ServerDeviceBusy);
        assert_eq!(
            ConditionKind::from_transport(Channel::Register, &busy),
            ConditionKind::Unhandled
        );
        assert_eq!(
            ConditionKind::from_transport(
                Channel::Value,
                &TransportError::invalid_response("garbage")
            ),
            ConditionKind::Unhandled
        );
    }

    #[test]
    fn test_forces_disconnect() {
        assert!(ConditionKind::Timeout.forces_disconnect());
        assert!(ConditionKind::ConnectionLost.forces_disconnect());
        assert!(!ConditionKind::WatchdogExpired.forces_disconnect());
        assert!(!ConditionKind::InvalidDataSize.forces_disconnect());
    }

    #[test]
    fn test_missing_channel() {
        assert_eq!(
            ConditionKind::missing_channel(IoKind::AnalogOut),
            ConditionKind::NoAnalogOutputData
        );
        assert_eq!(
            ConditionKind::missing_channel(IoKind::DigitalIn),
            ConditionKind::NoDigitalInputData
        );
    }

    #[test]
    fn test_condition_display_with_context() {
        let condition = Condition::new(ConditionKind::NoDigitalInputData)
            .with_module(2)
            .with_phase(PollPhase::DigitalInRead);
        assert_eq!(
            condition.to_string(),
            "[11] no digital input data (module 2) during digital-in read"
        );
    }

    #[test]
    fn test_closure_handler() {
        let seen = Mutex::new(Vec::new());
        let handler = |condition: &Condition| seen.lock().push(condition.kind);
        handler.on_condition(&Condition::new(ConditionKind::Timeout));
        assert_eq!(*seen.lock(), vec![ConditionKind::Timeout]);
    }

    #[test]
    fn test_channel_handler_receiver_dropped() {
        let (tx, rx) = mpsc::channel();
        drop(rx);
        ChannelHandler::new(tx).on_condition(&Condition::new(ConditionKind::Unhandled));
    }
}
