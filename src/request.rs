//! Modbus request definitions and PDU serialization.
//!
//! [`Request`] covers the function codes the driver needs to talk to a bus
//! coupler:
//!
//! | Code | Request | Used for |
//! |------|---------|----------|
//! | 0x01 | [`Request::ReadCoils`] | reading back digital outputs |
//! | 0x02 | [`Request::ReadDiscreteInputs`] | digital inputs |
//! | 0x03 | [`Request::ReadHoldingRegisters`] | parameter registers, watchdog status |
//! | 0x04 | [`Request::ReadInputRegisters`] | analog inputs |
//! | 0x06 | [`Request::WriteSingleRegister`] | parameter writes |
//! | 0x0F | [`Request::WriteMultipleCoils`] | digital outputs |
//! | 0x10 | [`Request::WriteMultipleRegisters`] | analog outputs, module registers |
//! | 0x17 | [`Request::ReadWriteMultipleRegisters`] | module register reads |
//!
//! # Example
//!
//! ```
//! use coupler_io::Request;
//!
//! let request = Request::ReadHoldingRegisters { address: 0x1040, count: 1 };
//! assert_eq!(request.to_pdu().unwrap(), vec![0x03, 0x10, 0x40, 0x00, 0x01]);
//! ```

use crate::transport::TransportError;

/// Maximum coils or discrete inputs per read.
pub const MAX_READ_BITS: u16 = 2000;
/// Maximum registers per read.
pub const MAX_READ_REGISTERS: u16 = 125;
/// Maximum coils per write.
pub const MAX_WRITE_BITS: u16 = 1968;
/// Maximum registers per write.
pub const MAX_WRITE_REGISTERS: u16 = 123;
/// Maximum registers written by a read/write-multiple request.
pub const MAX_READ_WRITE_REGISTERS: u16 = 121;

/// A single Modbus request.
///
/// Register payloads (`data`) are already serialized as big-endian words;
/// coil payloads are packed LSB first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Read coils (0x01).
    ReadCoils {
        /// First coil address.
        address: u16,
        /// Number of coils.
        count: u16,
    },
    /// Read discrete inputs (0x02).
    ReadDiscreteInputs {
        /// First input address.
        address: u16,
        /// Number of inputs.
        count: u16,
    },
    /// Read holding registers (0x03).
    ReadHoldingRegisters {
        /// First register address.
        address: u16,
        /// Number of registers.
        count: u16,
    },
    /// Read input registers (0x04).
    ReadInputRegisters {
        /// First register address.
        address: u16,
        /// Number of registers.
        count: u16,
    },
    /// Write single register (0x06).
    WriteSingleRegister {
        /// Register address.
        address: u16,
        /// Value to write.
        value: u16,
    },
    /// Write multiple coils (0x0F).
    WriteMultipleCoils {
        /// First coil address.
        address: u16,
        /// Number of coils.
        count: u16,
        /// Packed coil states.
        data: Vec<u8>,
    },
    /// Write multiple registers (0x10).
    WriteMultipleRegisters {
        /// First register address.
        address: u16,
        /// Big-endian register values.
        data: Vec<u8>,
    },
    /// Read/write multiple registers (0x17). The write is performed first.
    ReadWriteMultipleRegisters {
        /// First register to read.
        read_address: u16,
        /// Number of registers to read.
        read_count: u16,
        /// First register to write.
        write_address: u16,
        /// Big-endian register values.
        data: Vec<u8>,
    },
}

impl Request {
    /// Returns the Modbus function code for this request.
    pub fn function_code(&self) -> u8 {
        match self {
            Request::ReadCoils { .. } => 0x01,
            Request::ReadDiscreteInputs { .. } => 0x02,
            Request::ReadHoldingRegisters { .. } => 0x03,
            Request::ReadInputRegisters { .. } => 0x04,
            Request::WriteSingleRegister { .. } => 0x06,
            Request::WriteMultipleCoils { .. } => 0x0F,
            Request::WriteMultipleRegisters { .. } => 0x10,
            Request::ReadWriteMultipleRegisters { .. } => 0x17,
        }
    }

    /// Returns whether the response to this request carries data bytes.
    pub fn expects_data(&self) -> bool {
        matches!(
            self,
            Request::ReadCoils { .. }
                | Request::ReadDiscreteInputs { .. }
                | Request::ReadHoldingRegisters { .. }
                | Request::ReadInputRegisters { .. }
                | Request::ReadWriteMultipleRegisters { .. }
        )
    }

    /// Number of data bytes a successful response must carry.
    pub fn expected_data_len(&self) -> usize {
        match self {
            Request::ReadCoils { count, .. } | Request::ReadDiscreteInputs { count, .. } => {
                usize::from(*count).div_ceil(8)
            }
            Request::ReadHoldingRegisters { count, .. }
            | Request::ReadInputRegisters { count, .. } => usize::from(*count) * 2,
            Request::ReadWriteMultipleRegisters { read_count, .. } => usize::from(*read_count) * 2,
            _ => 0,
        }
    }

    /// Serializes the request into a Modbus PDU (function code + payload).
    ///
    /// # Errors
    ///
    /// Returns `TransportError::InvalidRequest` if a quantity is zero, exceeds
    /// the protocol limit, or disagrees with the payload length.
    pub fn to_pdu(&self) -> Result<Vec<u8>, TransportError> {
        let fc = self.function_code();
        let mut pdu = Vec::with_capacity(8);
        pdu.push(fc);

        match self {
            Request::ReadCoils { address, count } | Request::ReadDiscreteInputs { address, count } => {
                check_quantity("count", *count, MAX_READ_BITS)?;
                push_word(&mut pdu, *address);
                push_word(&mut pdu, *count);
            }
            Request::ReadHoldingRegisters { address, count }
            | Request::ReadInputRegisters { address, count } => {
                check_quantity("count", *count, MAX_READ_REGISTERS)?;
                push_word(&mut pdu, *address);
                push_word(&mut pdu, *count);
            }
            Request::WriteSingleRegister { address, value } => {
                push_word(&mut pdu, *address);
                push_word(&mut pdu, *value);
            }
            Request::WriteMultipleCoils {
                address,
                count,
                data,
            } => {
                check_quantity("count", *count, MAX_WRITE_BITS)?;
                let byte_count = usize::from(*count).div_ceil(8);
                if data.len() != byte_count {
                    return Err(TransportError::invalid_request(format!(
                        "{} coils need {} bytes, got {}",
                        count,
                        byte_count,
                        data.len()
                    )));
                }
                push_word(&mut pdu, *address);
                push_word(&mut pdu, *count);
                pdu.push(byte_count as u8);
                pdu.extend_from_slice(data);
            }
            Request::WriteMultipleRegisters { address, data } => {
                let count = register_count(data, MAX_WRITE_REGISTERS)?;
                push_word(&mut pdu, *address);
                push_word(&mut pdu, count);
                pdu.push(data.len() as u8);
                pdu.extend_from_slice(data);
            }
            Request::ReadWriteMultipleRegisters {
                read_address,
                read_count,
                write_address,
                data,
            } => {
                check_quantity("read_count", *read_count, MAX_READ_REGISTERS)?;
                let write_count = register_count(data, MAX_READ_WRITE_REGISTERS)?;
                push_word(&mut pdu, *read_address);
                push_word(&mut pdu, *read_count);
                push_word(&mut pdu, *write_address);
                push_word(&mut pdu, write_count);
                pdu.push(data.len() as u8);
                pdu.extend_from_slice(data);
            }
        }

        Ok(pdu)
    }
}

impl std::fmt::Display for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Request::ReadCoils { address, count } => {
                write!(f, "read {count} coils @0x{address:04X}")
            }
            Request::ReadDiscreteInputs { address, count } => {
                write!(f, "read {count} discrete inputs @0x{address:04X}")
            }
            Request::ReadHoldingRegisters { address, count } => {
                write!(f, "read {count} holding registers @0x{address:04X}")
            }
            Request::ReadInputRegisters { address, count } => {
                write!(f, "read {count} input registers @0x{address:04X}")
            }
            Request::WriteSingleRegister { address, value } => {
                write!(f, "write 0x{value:04X} @0x{address:04X}")
            }
            Request::WriteMultipleCoils { address, count, .. } => {
                write!(f, "write {count} coils @0x{address:04X}")
            }
            Request::WriteMultipleRegisters { address, data } => {
                write!(f, "write {} registers @0x{address:04X}", data.len() / 2)
            }
            Request::ReadWriteMultipleRegisters {
                read_address,
                read_count,
                write_address,
                data,
            } => write!(
                f,
                "write {} registers @0x{write_address:04X}, read {read_count} @0x{read_address:04X}",
                data.len() / 2
            ),
        }
    }
}

fn push_word(pdu: &mut Vec<u8>, word: u16) {
    pdu.extend_from_slice(&word.to_be_bytes());
}

fn check_quantity(parameter: &str, quantity: u16, max: u16) -> Result<(), TransportError> {
    if quantity == 0 || quantity > max {
        return Err(TransportError::invalid_request(format!(
            "{parameter} must be 1-{max}, got {quantity}"
        )));
    }
    Ok(())
}

fn register_count(data: &[u8], max: u16) -> Result<u16, TransportError> {
    if data.len() % 2 != 0 {
        return Err(TransportError::invalid_request(
            "register payload must be an even number of bytes",
        ));
    }
    let count = u16::try_from(data.len() / 2).unwrap_or(u16::MAX);
    check_quantity("register count", count, max)?;
    Ok(count)
}
