//! Process image: the four I/O buffers mirrored from the coupler.
//!
//! The coupler exposes its process data as one flat area per I/O kind:
//!
//! | Kind | Unit | Modbus access | Base address |
//! |------|------|---------------|--------------|
//! | Digital in | bit | read discrete inputs (0x02) | 0x0000 |
//! | Digital out | bit | write/read coils (0x0F/0x01) | 0x0000 |
//! | Analog in | word | read input registers (0x04) | 0x0000 |
//! | Analog out | word | write/read holding registers (0x10/0x03) | 0x0800 |
//!
//! A [`ProcessImage`] is sized once per connection from the counts the
//! coupler reports in its process-data block ([`ProcessSummary`]). Digital
//! counts are reported in bytes and become `count × 8` bits; analog counts
//! are reported in words.
//!
//! # Example
//!
//! ```
//! use coupler_io::{IoKind, ProcessImage, ProcessSummary};
//!
//! let summary = ProcessSummary {
//!     digital_in: 3,
//!     analog_in: 4,
//!     ..Default::default()
//! };
//! let image = ProcessImage::from_summary(&summary);
//! assert_eq!(image.len(IoKind::DigitalIn), 24);
//! assert_eq!(image.len(IoKind::AnalogIn), 4);
//! assert_eq!(image.len(IoKind::AnalogOut), 0);
//! ```

use crate::poll::PollPhase;
use crate::transport::Channel;
use crate::utils::{bytes_to_words, pack_bits, unpack_bits, words_to_bytes};

/// Start of the analog output area.
pub const ANALOG_OUT_BASE: u16 = 0x0800;

/// The four process-data kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum IoKind {
    /// Digital inputs (bits).
    DigitalIn,
    /// Digital outputs (bits).
    DigitalOut,
    /// Analog inputs (words).
    AnalogIn,
    /// Analog outputs (words).
    AnalogOut,
}

impl IoKind {
    /// All kinds in poll order.
    pub const ALL: [IoKind; 4] = [
        IoKind::DigitalIn,
        IoKind::DigitalOut,
        IoKind::AnalogIn,
        IoKind::AnalogOut,
    ];

    /// Whether the kind is bit-addressed.
    pub fn is_digital(self) -> bool {
        matches!(self, IoKind::DigitalIn | IoKind::DigitalOut)
    }

    /// Whether the kind is written by the controller.
    pub fn is_output(self) -> bool {
        matches!(self, IoKind::DigitalOut | IoKind::AnalogOut)
    }

    /// First Modbus address of the kind's area.
    pub fn base_address(self) -> u16 {
        match self {
            IoKind::AnalogOut => ANALOG_OUT_BASE,
            _ => 0x0000,
        }
    }

    /// Channel that poll traffic for this kind uses.
    pub fn channel(self) -> Channel {
        match self {
            IoKind::DigitalIn => Channel::DigitalIn,
            IoKind::DigitalOut => Channel::DigitalOut,
            IoKind::AnalogIn => Channel::AnalogIn,
            IoKind::AnalogOut => Channel::AnalogOut,
        }
    }

    /// Poll phase that transfers this kind.
    pub fn phase(self) -> PollPhase {
        match self {
            IoKind::DigitalIn => PollPhase::DigitalInRead,
            IoKind::DigitalOut => PollPhase::DigitalOutWrite,
            IoKind::AnalogIn => PollPhase::AnalogInRead,
            IoKind::AnalogOut => PollPhase::AnalogOutWrite,
        }
    }
}

impl std::fmt::Display for IoKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            IoKind::DigitalIn => "digital-in",
            IoKind::DigitalOut => "digital-out",
            IoKind::AnalogIn => "analog-in",
            IoKind::AnalogOut => "analog-out",
        };
        f.write_str(name)
    }
}

/// Process-data counts reported by the coupler.
///
/// Digital counts are in bytes, analog counts in words.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProcessSummary {
    /// Number of attached modules.
    pub modules: u16,
    /// Digital input bytes.
    pub digital_in: u16,
    /// Digital output bytes.
    pub digital_out: u16,
    /// Analog input words.
    pub analog_in: u16,
    /// Analog output words.
    pub analog_out: u16,
}

impl ProcessSummary {
    /// Buffer length for `kind`: bits for digital kinds, words for analog.
    pub fn buffer_len(&self, kind: IoKind) -> usize {
        match kind {
            IoKind::DigitalIn => usize::from(self.digital_in) * 8,
            IoKind::DigitalOut => usize::from(self.digital_out) * 8,
            IoKind::AnalogIn => usize::from(self.analog_in),
            IoKind::AnalogOut => usize::from(self.analog_out),
        }
    }
}

/// Live copy of the coupler's process data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProcessImage {
    digital_in: Vec<bool>,
    digital_out: Vec<bool>,
    analog_in: Vec<u16>,
    analog_out: Vec<u16>,
}

impl ProcessImage {
    /// Allocates zeroed buffers sized from a process summary.
    pub fn from_summary(summary: &ProcessSummary) -> Self {
        Self {
            digital_in: vec![false; summary.buffer_len(IoKind::DigitalIn)],
            digital_out: vec![false; summary.buffer_len(IoKind::DigitalOut)],
            analog_in: vec![0; summary.buffer_len(IoKind::AnalogIn)],
            analog_out: vec![0; summary.buffer_len(IoKind::AnalogOut)],
        }
    }

    /// Buffer length for `kind` in bits or words.
    pub fn len(&self, kind: IoKind) -> usize {
        match kind {
            IoKind::DigitalIn => self.digital_in.len(),
            IoKind::DigitalOut => self.digital_out.len(),
            IoKind::AnalogIn => self.analog_in.len(),
            IoKind::AnalogOut => self.analog_out.len(),
        }
    }

    /// Whether every buffer is empty.
    pub fn is_empty(&self) -> bool {
        IoKind::ALL.iter().all(|&kind| self.len(kind) == 0)
    }

    /// Digital input bits.
    pub fn digital_in(&self) -> &[bool] {
        &self.digital_in
    }

    /// Digital output bits.
    pub fn digital_out(&self) -> &[bool] {
        &self.digital_out
    }

    /// Analog input words.
    pub fn analog_in(&self) -> &[u16] {
        &self.analog_in
    }

    /// Analog output words.
    pub fn analog_out(&self) -> &[u16] {
        &self.analog_out
    }

    fn bits_mut(&mut self, kind: IoKind) -> Option<&mut Vec<bool>> {
        match kind {
            IoKind::DigitalIn => Some(&mut self.digital_in),
            IoKind::DigitalOut => Some(&mut self.digital_out),
            _ => None,
        }
    }

    fn words_mut(&mut self, kind: IoKind) -> Option<&mut Vec<u16>> {
        match kind {
            IoKind::AnalogIn => Some(&mut self.analog_in),
            IoKind::AnalogOut => Some(&mut self.analog_out),
            _ => None,
        }
    }

    /// Copies `count` bits starting at `start`. `None` if out of range or
    /// `kind` is analog.
    pub fn read_bits(&self, kind: IoKind, start: usize, count: usize) -> Option<Vec<bool>> {
        let bits = match kind {
            IoKind::DigitalIn => &self.digital_in,
            IoKind::DigitalOut => &self.digital_out,
            _ => return None,
        };
        bits.get(start..start.checked_add(count)?).map(<[bool]>::to_vec)
    }

    /// Copies `count` words starting at `start`. `None` if out of range or
    /// `kind` is digital.
    pub fn read_words(&self, kind: IoKind, start: usize, count: usize) -> Option<Vec<u16>> {
        let words = match kind {
            IoKind::AnalogIn => &self.analog_in,
            IoKind::AnalogOut => &self.analog_out,
            _ => return None,
        };
        words.get(start..start.checked_add(count)?).map(<[u16]>::to_vec)
    }

    /// Stores bits at `start`. Returns `false` without writing if the range
    /// does not fit.
    pub fn write_bits(&mut self, kind: IoKind, start: usize, values: &[bool]) -> bool {
        let Some(bits) = self.bits_mut(kind) else {
            return false;
        };
        match start
            .checked_add(values.len())
            .and_then(|end| bits.get_mut(start..end))
        {
            Some(target) => {
                target.copy_from_slice(values);
                true
            }
            None => false,
        }
    }

    /// Stores words at `start`. Returns `false` without writing if the
    /// range does not fit.
    pub fn write_words(&mut self, kind: IoKind, start: usize, values: &[u16]) -> bool {
        let Some(words) = self.words_mut(kind) else {
            return false;
        };
        match start
            .checked_add(values.len())
            .and_then(|end| words.get_mut(start..end))
        {
            Some(target) => {
                target.copy_from_slice(values);
                true
            }
            None => false,
        }
    }

    /// Loads a poll payload into the buffer for `kind`.
    ///
    /// Digital payloads are packed LSB first, analog payloads are big-endian
    /// words. Data beyond the buffer length is ignored; a short payload
    /// updates only the leading part of the buffer.
    pub fn load(&mut self, kind: IoKind, payload: &[u8]) {
        if kind.is_digital() {
            if let Some(bits) = self.bits_mut(kind) {
                let incoming = unpack_bits(payload, bits.len());
                bits[..incoming.len()].copy_from_slice(&incoming);
            }
        } else if let Some(words) = self.words_mut(kind) {
            let mut incoming = bytes_to_words(payload);
            incoming.truncate(words.len());
            words[..incoming.len()].copy_from_slice(&incoming);
        }
    }

    /// Serializes the whole buffer for `kind` in wire layout.
    pub fn payload(&self, kind: IoKind) -> Vec<u8> {
        match kind {
            IoKind::DigitalIn => pack_bits(&self.digital_in),
            IoKind::DigitalOut => pack_bits(&self.digital_out),
            IoKind::AnalogIn => words_to_bytes(&self.analog_in),
            IoKind::AnalogOut => words_to_bytes(&self.analog_out),
        }
    }
}
