//! Attached I/O modules and slot discovery.
//!
//! Each module slot `n` owns a 16-register block starting at
//! `0xA000 + n × 16`:
//!
//! | Offset | Content |
//! |--------|---------|
//! | +0x0 | Live status (0 = slot empty) |
//! | +0x1 | Hardware ID / serial number (3 words) |
//! | +0x4 | Analog input index (bytes) |
//! | +0x5 | Analog output index (bytes) |
//! | +0x6 | Digital input index (bytes) |
//! | +0x7 | Digital output index (bytes) |
//! | +0x8 | Configured hardware ID |
//! | +0x9 | Function model |
//! | +0xA | Configuration index |
//! | +0xB | Configuration size |
//! | +0xC | Firmware version |
//! | +0xD | Hardware variant |
//!
//! An index of `0xFFFF` means the module has no channel of that kind.
//! Discovery walks the slots in order and stops at the first slot with a
//! zero status.

use std::ops::Range;

use tracing::{debug, info};

use crate::image::{IoKind, ProcessSummary};
use crate::request::Request;
use crate::transport::{Channel, Transport, TransportError};
use crate::utils::bytes_to_words;

/// First register of the module slot table.
pub const MODULE_TABLE_BASE: u16 = 0xA000;

/// Registers per module slot.
pub const MODULE_SLOT_STRIDE: u16 = 16;

/// Channel index meaning "no channel of this kind".
pub const NO_CHANNEL: u16 = 0xFFFF;

/// First register of the process-data summary block.
pub const PROCESS_SUMMARY_BASE: u16 = 0x1100;

const SLOT_HEADER_WORDS: u16 = 8;
const SUMMARY_WORDS: u16 = 9;

/// Default upper bound on probed slots.
pub const DEFAULT_MAX_SLOTS: usize = 253;

/// Hardware IDs with a built-in display name.
const KNOWN_MODULES: &[(u16, &str)] = &[(41528, "X20BT9400"), (41865, "X20PS9402")];

/// A discovered I/O module.
///
/// Channel bases are already converted to buffer positions: bits for
/// digital kinds, words for analog kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Module {
    /// Position on the bus, 0-based.
    pub index: usize,
    /// Hardware ID reported by the module.
    pub hardware_id: u16,
    /// Display name.
    pub name: String,
    /// First digital input bit.
    pub digital_in: Option<usize>,
    /// First digital output bit.
    pub digital_out: Option<usize>,
    /// First analog input word.
    pub analog_in: Option<usize>,
    /// First analog output word.
    pub analog_out: Option<usize>,
}

impl Module {
    /// Builds a module from the first eight registers of its slot.
    ///
    /// Returns `None` for an empty slot (status 0).
    ///
    /// # Example
    ///
    /// ```
    /// use coupler_io::Module;
    ///
    /// let words = [1, 0x1234, 0, 0, 0xFFFF, 0xFFFF, 2, 0xFFFF];
    /// let module = Module::from_slot(0, &words).unwrap();
    /// assert_eq!(module.digital_in, Some(16));
    /// assert_eq!(module.analog_in, None);
    /// ```
    pub fn from_slot(index: usize, words: &[u16; 8]) -> Option<Self> {
        if words[0] == 0 {
            return None;
        }
        let hardware_id = words[1];
        Some(Self {
            index,
            hardware_id,
            name: display_name(index, hardware_id),
            analog_in: word_base(words[4]),
            analog_out: word_base(words[5]),
            digital_in: bit_base(words[6]),
            digital_out: bit_base(words[7]),
        })
    }

    /// Buffer base for `kind`, or `None` if the module has no such channel.
    pub fn base(&self, kind: IoKind) -> Option<usize> {
        match kind {
            IoKind::DigitalIn => self.digital_in,
            IoKind::DigitalOut => self.digital_out,
            IoKind::AnalogIn => self.analog_in,
            IoKind::AnalogOut => self.analog_out,
        }
    }

    /// Whether the module has a channel of `kind`.
    pub fn has(&self, kind: IoKind) -> bool {
        self.base(kind).is_some()
    }
}

impl std::fmt::Display for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{} {} (0x{:04X})", self.index, self.name, self.hardware_id)
    }
}

/// First register of slot `index`.
pub fn slot_address(index: usize, offset: u16) -> Option<u16> {
    let index = u16::try_from(index).ok()?;
    index
        .checked_mul(MODULE_SLOT_STRIDE)?
        .checked_add(MODULE_TABLE_BASE)?
        .checked_add(offset)
}

fn bit_base(raw: u16) -> Option<usize> {
    (raw != NO_CHANNEL).then(|| usize::from(raw) * 8)
}

fn word_base(raw: u16) -> Option<usize> {
    (raw != NO_CHANNEL).then(|| usize::from(raw) / 2)
}

fn display_name(index: usize, hardware_id: u16) -> String {
    KNOWN_MODULES
        .iter()
        .find(|(id, _)| *id == hardware_id)
        .map(|(_, name)| (*name).to_string())
        .unwrap_or_else(|| format!("module-{index}"))
}

/// Range of buffer positions owned by `modules[index]` for `kind`.
///
/// The span starts at the module's base and ends at the next higher base of
/// the same kind among the other modules, or at `buffer_len`. Returns
/// `None` if the module has no channel of that kind.
pub fn span(modules: &[Module], index: usize, kind: IoKind, buffer_len: usize) -> Option<Range<usize>> {
    let start = modules.get(index)?.base(kind)?;
    let end = modules
        .iter()
        .filter(|other| other.index != index)
        .filter_map(|other| other.base(kind))
        .filter(|&base| base > start)
        .min()
        .unwrap_or(buffer_len)
        .min(buffer_len);
    Some(start..end.max(start))
}

/// Reads the process-data summary block (`0x1100..0x1109`).
pub fn read_summary(transport: &dyn Transport, unit: u8) -> Result<ProcessSummary, TransportError> {
    let data = transport.execute(
        Channel::Parameter,
        unit,
        &Request::ReadHoldingRegisters {
            address: PROCESS_SUMMARY_BASE,
            count: SUMMARY_WORDS,
        },
    )?;
    let words = bytes_to_words(&data);
    if words.len() < usize::from(SUMMARY_WORDS) {
        return Err(TransportError::invalid_response(format!(
            "process summary needs {} words, got {}",
            SUMMARY_WORDS,
            words.len()
        )));
    }
    let summary = ProcessSummary {
        modules: words[0],
        analog_in: words[1],
        analog_out: words[3],
        digital_in: words[5],
        digital_out: words[7],
    };
    debug!(?summary, "process summary");
    Ok(summary)
}

/// Probes module slots in order until the first empty one.
///
/// At most `max_slots` slots are probed.
pub fn discover(
    transport: &dyn Transport,
    unit: u8,
    max_slots: usize,
) -> Result<Vec<Module>, TransportError> {
    let mut modules = Vec::new();
    for index in 0..max_slots {
        let Some(address) = slot_address(index, 0) else {
            break;
        };
        let data = transport.execute(
            Channel::Parameter,
            unit,
            &Request::ReadHoldingRegisters {
                address,
                count: SLOT_HEADER_WORDS,
            },
        )?;
        let words: [u16; 8] = bytes_to_words(&data).try_into().map_err(|_| {
            TransportError::invalid_response(format!("module slot {index} header truncated"))
        })?;
        let Some(module) = Module::from_slot(index, &words) else {
            break;
        };
        debug!(module = index, hardware_id = module.hardware_id, name = %module.name, "module found");
        modules.push(module);
    }
    info!(count = modules.len(), "module discovery complete");
    Ok(modules)
}
