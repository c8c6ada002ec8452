//! Modbus TCP application header (MBAP).
//!
//! Every Modbus TCP frame starts with a 7-byte MBAP header that precedes the
//! protocol data unit (PDU):
//!
//! | Bytes | Field | Description |
//! |-------|-------|-------------|
//! | 0-1 | Transaction ID | Echoed by the server, used to match responses |
//! | 2-3 | Protocol ID | Always `0x0000` for Modbus |
//! | 4-5 | Length | Number of following bytes (unit ID + PDU) |
//! | 6 | Unit ID | Addressed unit behind the gateway |
//!
//! All fields are big-endian.
//!
//! # Example
//!
//! ```
//! use coupler_io::{MbapHeader, MBAP_HEADER_SIZE};
//!
//! let header = MbapHeader::new(0x0001, 5, 0);
//! let bytes = header.to_bytes();
//! assert_eq!(bytes.len(), MBAP_HEADER_SIZE);
//! assert_eq!(bytes, [0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x00]);
//! ```

use crate::transport::TransportError;

/// MBAP header size in bytes.
pub const MBAP_HEADER_SIZE: usize = 7;

/// Protocol identifier carried by every Modbus frame.
pub const MODBUS_PROTOCOL_ID: u16 = 0x0000;

/// Modbus TCP application header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    /// Transaction identifier, echoed by the server.
    pub transaction_id: u16,
    /// Protocol identifier (0 for Modbus).
    pub protocol_id: u16,
    /// Length of the remaining frame: unit ID plus PDU.
    pub length: u16,
    /// Unit identifier.
    pub unit_id: u8,
}

impl MbapHeader {
    /// Creates a request header for a PDU of `pdu_len` bytes.
    pub fn new(transaction_id: u16, pdu_len: u16, unit_id: u8) -> Self {
        Self {
            transaction_id,
            protocol_id: MODBUS_PROTOCOL_ID,
            length: pdu_len + 1,
            unit_id,
        }
    }

    /// Serializes the header to bytes.
    pub fn to_bytes(self) -> [u8; MBAP_HEADER_SIZE] {
        let tid = self.transaction_id.to_be_bytes();
        let pid = self.protocol_id.to_be_bytes();
        let len = self.length.to_be_bytes();
        [tid[0], tid[1], pid[0], pid[1], len[0], len[1], self.unit_id]
    }

    /// Parses a header from bytes.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::InvalidResponse` if the slice is too short,
    /// the protocol ID is not Modbus, or the length field cannot hold a PDU.
    ///
    /// # Example
    ///
    /// ```
    /// use coupler_io::MbapHeader;
    ///
    /// let header = MbapHeader::from_bytes(&[0x00, 0x2A, 0x00, 0x00, 0x00, 0x05, 0x01]).unwrap();
    /// assert_eq!(header.transaction_id, 42);
    /// assert_eq!(header.pdu_len(), 4);
    /// ```
    pub fn from_bytes(data: &[u8]) -> Result<Self, TransportError> {
        if data.len() < MBAP_HEADER_SIZE {
            return Err(TransportError::invalid_response(format!(
                "MBAP header too short: expected {} bytes, got {}",
                MBAP_HEADER_SIZE,
                data.len()
            )));
        }

        let header = Self {
            transaction_id: u16::from_be_bytes([data[0], data[1]]),
            protocol_id: u16::from_be_bytes([data[2], data[3]]),
            length: u16::from_be_bytes([data[4], data[5]]),
            unit_id: data[6],
        };

        if header.protocol_id != MODBUS_PROTOCOL_ID {
            return Err(TransportError::invalid_response(format!(
                "invalid protocol ID 0x{:04X}",
                header.protocol_id
            )));
        }
        if header.length < 2 {
            return Err(TransportError::invalid_response(format!(
                "MBAP length {} too small for a PDU",
                header.length
            )));
        }

        Ok(header)
    }

    /// Length of the PDU following this header.
    pub fn pdu_len(self) -> usize {
        usize::from(self.length).saturating_sub(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_new() {
        let header = MbapHeader::new(7, 5, 3);
        assert_eq!(header.transaction_id, 7);
        assert_eq!(header.protocol_id, 0);
        assert_eq!(header.length, 6);
        assert_eq!(header.unit_id, 3);
    }

    #[test]
    fn test_header_to_bytes() {
        let header = MbapHeader::new(0x1234, 5, 0x11);
        assert_eq!(header.to_bytes().to_vec(), hex::decode("12340000000611").unwrap());
    }

    #[test]
    fn test_header_from_bytes() {
        let bytes = hex::decode("00010000000700").unwrap();
        let header = MbapHeader::from_bytes(&bytes).unwrap();
        assert_eq!(header.transaction_id, 1);
        assert_eq!(header.length, 7);
        assert_eq!(header.unit_id, 0);
        assert_eq!(header.pdu_len(), 6);
    }

    #[test]
    fn test_header_from_bytes_too_short() {
        assert!(MbapHeader::from_bytes(&[0x00, 0x01, 0x00]).is_err());
    }

    #[test]
    fn test_header_rejects_foreign_protocol() {
        let bytes = hex::decode("00010001000700").unwrap();
        assert!(MbapHeader::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_header_rejects_empty_pdu() {
        let bytes = hex::decode("00010000000100").unwrap();
        assert!(MbapHeader::from_bytes(&bytes).is_err());
    }
}
