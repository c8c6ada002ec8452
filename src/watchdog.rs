//! Controller-side watchdog supervision.
//!
//! The coupler drops its outputs to a safe state when it sees no Modbus
//! traffic for longer than the watchdog threshold. The driver sets the
//! watchdog to reset on every access and then keeps it alive with the poll
//! timer: every poll phase is an access.
//!
//! | Register | Content |
//! |----------|---------|
//! | 0x1040 | Threshold (ms) |
//! | 0x1041 | Elapsed time (ms) |
//! | 0x1042 | Status |
//! | 0x1043 | Mode |
//!
//! A status read returning `[0x00, 0xC2]` means the watchdog has expired.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use coupler_io::watchdog;
//!
//! // explicit poll period, quantized to 5 ms
//! assert_eq!(
//!     watchdog::refresh_period(Duration::from_millis(23), 1000),
//!     Duration::from_millis(20)
//! );
//! // no poll period: half the threshold
//! assert_eq!(
//!     watchdog::refresh_period(Duration::ZERO, 1000),
//!     Duration::from_millis(500)
//! );
//! ```

use std::time::Duration;

use crate::request::Request;
use crate::transport::{Channel, Transport, TransportError};
use crate::utils::bytes_to_words;

/// Watchdog threshold register (milliseconds).
pub const THRESHOLD_REGISTER: u16 = 0x1040;
/// Elapsed watchdog time register (milliseconds).
pub const ELAPSED_REGISTER: u16 = 0x1041;
/// Watchdog status register.
pub const STATUS_REGISTER: u16 = 0x1042;
/// Watchdog mode register.
pub const MODE_REGISTER: u16 = 0x1043;

/// Status payload of an expired watchdog.
pub const EXPIRED_STATUS: [u8; 2] = [0x00, 0xC2];

/// Poll timer granularity.
pub const TICK_QUANTUM: Duration = Duration::from_millis(5);

/// Largest poll period the coupler accepts, in quanta.
pub const MAX_PERIOD_QUANTA: u32 = u16::MAX as u32;

/// Watchdog operating modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum WatchdogMode {
    /// Watchdog disabled.
    Off,
    /// Any Modbus access resets the watchdog.
    ResetOnAccess,
    /// Only write accesses reset the watchdog.
    ResetOnWrite,
}

impl WatchdogMode {
    /// Register value for the mode.
    pub fn to_register(self) -> u16 {
        match self {
            WatchdogMode::Off => 0xC0,
            WatchdogMode::ResetOnAccess => 0xC1,
            WatchdogMode::ResetOnWrite => 0xC2,
        }
    }

    /// Parses a mode register value.
    pub fn from_register(value: u16) -> Option<Self> {
        match value {
            0xC0 => Some(WatchdogMode::Off),
            0xC1 => Some(WatchdogMode::ResetOnAccess),
            0xC2 => Some(WatchdogMode::ResetOnWrite),
            _ => None,
        }
    }
}

/// Whether a status-register payload reports an expired watchdog.
pub fn is_expired(payload: &[u8]) -> bool {
    payload == EXPIRED_STATUS
}

/// Rounds `period` down to a multiple of [`TICK_QUANTUM`].
pub fn quantize(period: Duration) -> Duration {
    let quanta = period.as_millis() / TICK_QUANTUM.as_millis();
    Duration::from_millis(u64::try_from(quanta).unwrap_or(u64::MAX).saturating_mul(5))
}

/// Poll timer period: the quantized poll period if non-zero, otherwise
/// half of `threshold_ms`.
///
/// A zero result means no timer is armed.
pub fn refresh_period(poll_period: Duration, threshold_ms: u16) -> Duration {
    let quantized = quantize(poll_period);
    if quantized.is_zero() {
        Duration::from_millis(u64::from(threshold_ms / 2))
    } else {
        quantized
    }
}

/// Reads the watchdog threshold in milliseconds.
pub fn read_threshold(transport: &dyn Transport, unit: u8) -> Result<u16, TransportError> {
    let data = transport.execute(
        Channel::Parameter,
        unit,
        &Request::ReadHoldingRegisters {
            address: THRESHOLD_REGISTER,
            count: 1,
        },
    )?;
    bytes_to_words(&data)
        .first()
        .copied()
        .ok_or_else(|| TransportError::invalid_response("empty watchdog threshold"))
}

/// Sets the watchdog to reset on every access.
pub fn arm(transport: &dyn Transport, unit: u8) -> Result<(), TransportError> {
    transport
        .execute(
            Channel::Parameter,
            unit,
            &Request::WriteSingleRegister {
                address: MODE_REGISTER,
                value: WatchdogMode::ResetOnAccess.to_register(),
            },
        )
        .map(drop)
}

/// The status read issued by the watchdog poll phase.
pub fn status_request() -> Request {
    Request::ReadHoldingRegisters {
        address: STATUS_REGISTER,
        count: 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockDevice;

    #[test]
    fn test_is_expired() {
        assert!(is_expired(&[0x00, 0xC2]));
        assert!(!is_expired(&[0x00, 0xC1]));
        assert!(!is_expired(&[0x00]));
        assert!(!is_expired(&[0x00, 0xC2, 0x00]));
    }

    #[test]
    fn test_quantize() {
        assert_eq!(quantize(Duration::from_millis(0)), Duration::ZERO);
        assert_eq!(quantize(Duration::from_millis(4)), Duration::ZERO);
        assert_eq!(quantize(Duration::from_millis(5)), Duration::from_millis(5));
        assert_eq!(quantize(Duration::from_millis(99)), Duration::from_millis(95));
    }

    #[test]
    fn test_refresh_period() {
        assert_eq!(
            refresh_period(Duration::ZERO, 100),
            Duration::from_millis(50)
        );
        assert_eq!(
            refresh_period(Duration::from_millis(3), 100),
            Duration::from_millis(50)
        );
        assert_eq!(
            refresh_period(Duration::from_millis(10), 100),
            Duration::from_millis(10)
        );
        assert_eq!(refresh_period(Duration::ZERO, 1), Duration::ZERO);
    }

    #[test]
    fn test_mode_registers() {
        assert_eq!(WatchdogMode::Off.to_register(), 0xC0);
        assert_eq!(WatchdogMode::ResetOnAccess.to_register(), 0xC1);
        assert_eq!(WatchdogMode::from_register(0xC2), Some(WatchdogMode::ResetOnWrite));
        assert_eq!(WatchdogMode::from_register(0x00), None);
    }

    #[test]
    fn test_arm_writes_mode_register() {
        let device = MockDevice::new();
        arm(&device, 0).unwrap();
        assert_eq!(device.register(MODE_REGISTER), 0xC1);
    }

    #[test]
    fn test_read_threshold() {
        let device = MockDevice::new().with_register(THRESHOLD_REGISTER, 1500);
        assert_eq!(read_threshold(&device, 0).unwrap(), 1500);
    }
}
