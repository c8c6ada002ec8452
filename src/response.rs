//! Modbus response validation and payload extraction.
//!
//! A Modbus response PDU is either:
//!
//! | Form | Layout |
//! |------|--------|
//! | Read reply | function code, byte count, data |
//! | Write reply | function code, echoed address and quantity/value |
//! | Exception | function code \| 0x80, exception code |
//!
//! [`decode`] checks a PDU against the [`Request`] that produced it and
//! returns the data bytes (empty for write acknowledgements).
//!
//! # Example
//!
//! ```
//! use coupler_io::{response, Request};
//!
//! let request = Request::ReadHoldingRegisters { address: 0x1042, count: 1 };
//! let data = response::decode(&request, &[0x03, 0x02, 0x00, 0xC2]).unwrap();
//! assert_eq!(data, vec![0x00, 0xC2]);
//! ```

use crate::request::Request;
use crate::transport::TransportError;

/// Modbus exception codes returned by a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExceptionCode {
    /// 0x01: function code not supported.
    IllegalFunction,
    /// 0x02: address outside the server's range.
    IllegalDataAddress,
    /// 0x03: value or quantity not accepted.
    IllegalDataValue,
    /// 0x04: unrecoverable server error.
    ServerDeviceFailure,
    /// 0x05: request accepted, processing takes longer.
    Acknowledge,
    /// 0x06: server busy with a long-running command.
    ServerDeviceBusy,
    /// 0x08: memory parity error.
    MemoryParityError,
    /// 0x0A: gateway could not allocate a path.
    GatewayPathUnavailable,
    /// 0x0B: no response from the gateway target.
    GatewayTargetFailedToRespond,
    /// Any code not listed above.
    Other(u8),
}

impl ExceptionCode {
    /// Returns the wire value of the exception code.
    pub fn code(self) -> u8 {
        match self {
            ExceptionCode::IllegalFunction => 0x01,
            ExceptionCode::IllegalDataAddress => 0x02,
            ExceptionCode::IllegalDataValue => 0x03,
            ExceptionCode::ServerDeviceFailure => 0x04,
            ExceptionCode::Acknowledge => 0x05,
            ExceptionCode::ServerDeviceBusy => 0x06,
            ExceptionCode::MemoryParityError => 0x08,
            ExceptionCode::GatewayPathUnavailable => 0x0A,
            ExceptionCode::GatewayTargetFailedToRespond => 0x0B,
            ExceptionCode::Other(code) => code,
        }
    }
}

impl From<u8> for ExceptionCode {
    fn from(code: u8) -> Self {
        match code {
            0x01 => ExceptionCode::IllegalFunction,
            0x02 => ExceptionCode::IllegalDataAddress,
            0x03 => ExceptionCode::IllegalDataValue,
            0x04 => ExceptionCode::ServerDeviceFailure,
            0x05 => ExceptionCode::Acknowledge,
            0x06 => ExceptionCode::ServerDeviceBusy,
            0x08 => ExceptionCode::MemoryParityError,
            0x0A => ExceptionCode::GatewayPathUnavailable,
            0x0B => ExceptionCode::GatewayTargetFailedToRespond,
            other => ExceptionCode::Other(other),
        }
    }
}

impl std::fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ExceptionCode::IllegalFunction => "illegal function",
            ExceptionCode::IllegalDataAddress => "illegal data address",
            ExceptionCode::IllegalDataValue => "illegal data value",
            ExceptionCode::ServerDeviceFailure => "server device failure",
            ExceptionCode::Acknowledge => "acknowledge",
            ExceptionCode::ServerDeviceBusy => "server device busy",
            ExceptionCode::MemoryParityError => "memory parity error",
            ExceptionCode::GatewayPathUnavailable => "gateway path unavailable",
            ExceptionCode::GatewayTargetFailedToRespond => "gateway target failed to respond",
            ExceptionCode::Other(_) => "unknown exception",
        };
        write!(f, "{} (0x{:02X})", name, self.code())
    }
}

/// Validates a response PDU against its request and extracts the data bytes.
///
/// For read requests the returned bytes are the payload after the byte
/// count. For write requests the echo is checked and an empty vector is
/// returned.
///
/// # Errors
///
/// - `TransportError::Exception` if the server answered with an exception
/// - `TransportError::InvalidResponse` if the PDU is malformed, echoes a
///   different function, or carries a byte count that disagrees with the
///   request
pub fn decode(request: &Request, pdu: &[u8]) -> Result<Vec<u8>, TransportError> {
    let Some(&function) = pdu.first() else {
        return Err(TransportError::invalid_response("empty PDU"));
    };
    let expected = request.function_code();

    if function == expected | 0x80 {
        let code = pdu
            .get(1)
            .copied()
            .ok_or_else(|| TransportError::invalid_response("exception PDU without code"))?;
        return Err(TransportError::Exception(ExceptionCode::from(code)));
    }
    if function != expected {
        return Err(TransportError::invalid_response(format!(
            "function mismatch: expected 0x{expected:02X}, got 0x{function:02X}"
        )));
    }

    if request.expects_data() {
        let byte_count = pdu
            .get(1)
            .copied()
            .map(usize::from)
            .ok_or_else(|| TransportError::invalid_response("missing byte count"))?;
        let data = &pdu[2..];
        if data.len() != byte_count {
            return Err(TransportError::invalid_response(format!(
                "byte count {} but {} data bytes",
                byte_count,
                data.len()
            )));
        }
        if byte_count != request.expected_data_len() {
            return Err(TransportError::invalid_response(format!(
                "expected {} data bytes, got {}",
                request.expected_data_len(),
                byte_count
            )));
        }
        return Ok(data.to_vec());
    }

    if pdu.len() != 5 {
        return Err(TransportError::invalid_response(format!(
            "write acknowledgement must be 5 bytes, got {}",
            pdu.len()
        )));
    }
    let echoed_address = u16::from_be_bytes([pdu[1], pdu[2]]);
    let request_address = match request {
        Request::WriteSingleRegister { address, .. }
        | Request::WriteMultipleCoils { address, .. }
        | Request::WriteMultipleRegisters { address, .. } => *address,
        _ => echoed_address,
    };
    if echoed_address != request_address {
        return Err(TransportError::invalid_response(format!(
            "address echo mismatch: expected 0x{request_address:04X}, got 0x{echoed_address:04X}"
        )));
    }
    Ok(Vec::new())
}
