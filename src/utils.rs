//! Bit and word conversion helpers for Modbus payloads.
//!
//! Modbus carries digital data packed 8 bits per byte, least-significant bit
//! first, and analog data as big-endian 16-bit words. These helpers convert
//! between those wire layouts and the `bool`/`u16` slices held in the
//! process image.
//!
//! # Example
//!
//! ```
//! use coupler_io::utils::{pack_bits, unpack_bits, words_to_bytes, bytes_to_words};
//!
//! let packed = pack_bits(&[true, false, true]);
//! assert_eq!(packed, vec![0b0000_0101]);
//! assert_eq!(unpack_bits(&packed, 3), vec![true, false, true]);
//!
//! let bytes = words_to_bytes(&[0x1234, 0xABCD]);
//! assert_eq!(bytes, vec![0x12, 0x34, 0xAB, 0xCD]);
//! assert_eq!(bytes_to_words(&bytes), vec![0x1234, 0xABCD]);
//! ```

/// Packs bits into bytes, LSB first.
///
/// The last byte is zero-padded when `bits.len()` is not a multiple of 8.
///
/// # Example
///
/// ```
/// use coupler_io::utils::pack_bits;
///
/// let mut bits = [false; 10];
/// bits[0] = true;
/// bits[9] = true;
/// assert_eq!(pack_bits(&bits), vec![0x01, 0x02]);
/// ```
pub fn pack_bits(bits: &[bool]) -> Vec<u8> {
    let mut bytes = vec![0u8; packed_len(bits.len())];
    for (i, &bit) in bits.iter().enumerate() {
        if bit {
            bytes[i / 8] |= 1 << (i % 8);
        }
    }
    bytes
}

/// Unpacks up to `count` bits from LSB-first packed bytes.
///
/// Returns fewer than `count` bits if `bytes` is too short.
///
/// # Example
///
/// ```
/// use coupler_io::utils::unpack_bits;
///
/// assert_eq!(unpack_bits(&[0b1000_0001], 8)[7], true);
/// assert_eq!(unpack_bits(&[0xFF], 20).len(), 8);
/// ```
pub fn unpack_bits(bytes: &[u8], count: usize) -> Vec<bool> {
    let available = count.min(bytes.len() * 8);
    (0..available)
        .map(|i| (bytes[i / 8] >> (i % 8)) & 0x01 != 0)
        .collect()
}

/// Number of bytes needed to carry `bit_count` packed bits.
#[inline]
pub fn packed_len(bit_count: usize) -> usize {
    bit_count.div_ceil(8)
}

/// Serializes words as big-endian bytes.
pub fn words_to_bytes(words: &[u16]) -> Vec<u8> {
    words.iter().flat_map(|word| word.to_be_bytes()).collect()
}

/// Parses big-endian words; a trailing odd byte is ignored.
pub fn bytes_to_words(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks_exact(2)
        .map(|chunk| u16::from_be_bytes([chunk[0], chunk[1]]))
        .collect()
}

/// Combines a high and a low word into a `u32`.
#[inline]
pub fn words_to_u32(high: u16, low: u16) -> u32 {
    (u32::from(high) << 16) | u32::from(low)
}

/// Splits a `u32` into `(high, low)` words.
#[inline]
pub fn u32_to_words(value: u32) -> (u16, u16) {
    ((value >> 16) as u16, value as u16)
}

/// Parses a dotted-quad IPv4 address into the coupler's register layout.
///
/// The coupler stores each octet in the low byte of its own register, so
/// `"192.168.1.10"` becomes the words `[192, 168, 1, 10]`.
///
/// Returns `None` if the text is not four decimal octets.
pub fn parse_dotted_quad(text: &str) -> Option<[u16; 4]> {
    let mut words = [0u16; 4];
    let mut parts = text.trim().split('.');
    for word in &mut words {
        let octet: u8 = parts.next()?.trim().parse().ok()?;
        *word = u16::from(octet);
    }
    if parts.next().is_some() {
        return None;
    }
    Some(words)
}

/// Formats four address registers (one octet per word) as a dotted quad.
pub fn format_dotted_quad(words: &[u16]) -> Option<String> {
    if words.len() != 4 {
        return None;
    }
    Some(format!(
        "{}.{}.{}.{}",
        words[0] & 0xFF,
        words[1] & 0xFF,
        words[2] & 0xFF,
        words[3] & 0xFF
    ))
}

/// Formats six bytes as an upper-case, dash separated MAC address.
pub fn format_mac(bytes: &[u8]) -> Option<String> {
    if bytes.len() != 6 {
        return None;
    }
    Some(
        bytes
            .iter()
            .map(|byte| format!("{byte:02X}"))
            .collect::<Vec<_>>()
            .join("-"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_bits_lsb_first() {
        let bits = [true, true, false, false, false, false, false, true];
        assert_eq!(pack_bits(&bits), vec![0b1000_0011]);
    }

    #[test]
    fn test_pack_bits_pads_last_byte() {
        let mut bits = vec![false; 9];
        bits[8] = true;
        assert_eq!(pack_bits(&bits), vec![0x00, 0x01]);
        assert!(pack_bits(&[]).is_empty());
    }

    #[test]
    fn test_unpack_bits_truncates_to_count() {
        let bits = unpack_bits(&[0xFF, 0x01], 9);
        assert_eq!(bits.len(), 9);
        assert!(bits.iter().all(|&bit| bit));
    }

    #[test]
    fn test_unpack_bits_short_payload() {
        assert_eq!(unpack_bits(&[], 4), Vec::<bool>::new());
        assert_eq!(unpack_bits(&[0x02], 16).len(), 8);
    }

    #[test]
    fn test_packed_len() {
        assert_eq!(packed_len(0), 0);
        assert_eq!(packed_len(1), 1);
        assert_eq!(packed_len(8), 1);
        assert_eq!(packed_len(9), 2);
    }

    #[test]
    fn test_bytes_to_words_ignores_odd_tail() {
        assert_eq!(bytes_to_words(&[0x00, 0xC2, 0x99]), vec![0x00C2]);
    }

    #[test]
    fn test_u32_words() {
        assert_eq!(words_to_u32(0x1234, 0x5678), 0x1234_5678);
        assert_eq!(u32_to_words(0xDEAD_BEEF), (0xDEAD, 0xBEEF));
    }

    #[test]
    fn test_parse_dotted_quad() {
        assert_eq!(parse_dotted_quad("192.168.1.10"), Some([192, 168, 1, 10]));
        assert_eq!(parse_dotted_quad(" 10.0.0.1 "), Some([10, 0, 0, 1]));
        assert_eq!(parse_dotted_quad("192.168.1"), None);
        assert_eq!(parse_dotted_quad("192.168.1.256"), None);
        assert_eq!(parse_dotted_quad("192.168.1.1.1"), None);
        assert_eq!(parse_dotted_quad("a.b.c.d"), None);
    }

    #[test]
    fn test_format_dotted_quad() {
        assert_eq!(
            format_dotted_quad(&[192, 168, 0x0101, 10]).as_deref(),
            Some("192.168.1.10")
        );
        assert_eq!(format_dotted_quad(&[1, 2, 3]), None);
    }

    #[test]
    fn test_format_mac() {
        let mac = format_mac(&[0x00, 0x60, 0x65, 0x0A, 0xBB, 0xFF]);
        assert_eq!(mac.as_deref(), Some("00-60-65-0A-BB-FF"));
        assert_eq!(format_mac(&[0x00]), None);
    }
}
