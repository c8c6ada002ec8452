//! Coupler register map.
//!
//! Configuration, diagnostics and control live in holding registers on the
//! parameter channel. Single-word registers are listed in [`Parameter`];
//! composite values (addresses, serial numbers, 32-bit counters) have their
//! own accessors on [`Coupler`].
//!
//! | Range | Content |
//! |-------|---------|
//! | 0x1000..0x1018 | Communication: MAC, IP, subnet, gateway, port, x2x |
//! | 0x1040..0x1044 | Watchdog |
//! | 0x1080..0x1090 | Product data |
//! | 0x10C0..0x10D5 | Modbus telegram counters |
//! | 0x1100..0x1109 | Process data counts and sizes |
//! | 0x1140..0x1147 | Control commands |
//! | 0x1180..0x1189 | Miscellaneous settings and status |
//! | 0x11C0..0x11D0 | X2X bus statistics |
//! | 0x1200..0x1207 | Network statistics |
//! | 0x1280..0x1288 | Module configuration register access |
//! | 0xA000.. | Per-module slots |
//!
//! # Example
//!
//! ```no_run
//! use coupler_io::{Coupler, CouplerConfig, Parameter};
//!
//! let coupler = Coupler::new(CouplerConfig::new());
//! coupler.connect("192.168.100.1", 502)?;
//! println!("serial {}", coupler.serial_number()?);
//! println!("ip {}", coupler.ip_address()?);
//! let clients = coupler.read_parameter(Parameter::ModbusClients)?;
//! println!("{clients} modbus clients");
//! # Ok::<(), coupler_io::CouplerError>(())
//! ```

use std::str::FromStr;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use tracing::{debug, info};

use crate::condition::{Condition, ConditionKind};
use crate::coupler::Coupler;
use crate::error::Result;
use crate::module::slot_address;
use crate::request::Request;
use crate::transport::Channel;
use crate::utils::{
    bytes_to_words, format_dotted_quad, format_mac, parse_dotted_quad, u32_to_words, words_to_bytes,
    words_to_u32,
};
use crate::watchdog::{self, WatchdogMode};

/// Value that triggers a control command or enables a flag.
pub const COMMAND_EXECUTE: u16 = 0xC1;
/// Value that clears a flag.
pub const COMMAND_CLEAR: u16 = 0xC0;

/// Write target for module configuration registers.
pub const MODULE_REGISTER_WRITE: u16 = 0x1280;
/// Selector for module configuration register reads.
pub const MODULE_REGISTER_SELECT: u16 = 0x1284;
/// Read-back window for module configuration register reads.
pub const MODULE_REGISTER_VALUE: u16 = 0x1286;

/// Smallest watchdog threshold accepted by [`Coupler::set_watchdog_threshold`].
pub const MIN_WATCHDOG_THRESHOLD: Duration = Duration::from_millis(10);

const MAC_ADDRESS: u16 = 0x1000;
const SERIAL_NUMBER: u16 = 0x1080;
const CONFIG_CHANGED: u16 = 0x1184;
const SAVE_CONFIG: u16 = 0x1140;
const LOAD_CONFIG: u16 = 0x1141;
const ERASE_CONFIG: u16 = 0x1142;
const REBOOT: u16 = 0x1143;
const CLOSE_CONNECTIONS: u16 = 0x1144;
const RESET_COMMUNICATION: u16 = 0x1145;
const RESET_MODULES: u16 = 0x1146;
const RESET_MISC: u16 = 0x1188;

/// Whether a register can be read, written or both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Access {
    /// Read only.
    Read,
    /// Read and write.
    ReadWrite,
}

/// Single-word coupler registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Parameter {
    // communication
    /// Modbus TCP port.
    Port,
    /// Connection idle timeout.
    Duration,
    /// Ethernet MTU.
    Mtu,
    /// X2X bus cycle time.
    X2xCycle,
    /// X2X cable length.
    X2xCableLength,
    // watchdog
    /// Watchdog threshold in milliseconds.
    WatchdogThreshold,
    /// Time since the last access, in milliseconds.
    WatchdogElapsed,
    /// Watchdog status; `0xC2` once expired.
    WatchdogStatus,
    /// Watchdog refresh mode.
    WatchdogMode,
    // product data
    /// Product code.
    ProductCode,
    /// Hardware revision, major part.
    HardwareMajor,
    /// Hardware revision, minor part.
    HardwareMinor,
    /// Running firmware, major part.
    FirmwareMajor,
    /// Running firmware, minor part.
    FirmwareMinor,
    /// Running FPGA version.
    FpgaVersion,
    /// Boot loader version.
    BootVersion,
    /// Factory firmware, major part.
    DefaultFirmwareMajor,
    /// Factory firmware, minor part.
    DefaultFirmwareMinor,
    /// Update firmware, major part.
    UpdateFirmwareMajor,
    /// Update firmware, minor part.
    UpdateFirmwareMinor,
    /// Factory FPGA version.
    DefaultFpgaVersion,
    /// Update FPGA version.
    UpdateFpgaVersion,
    // modbus
    /// Connected Modbus clients.
    ModbusClients,
    // process data
    /// Attached modules.
    ModuleCount,
    /// Modules with analog inputs.
    AnalogInCount,
    /// Analog input words.
    AnalogInSize,
    /// Modules with analog outputs.
    AnalogOutCount,
    /// Analog output words.
    AnalogOutSize,
    /// Modules with digital inputs.
    DigitalInCount,
    /// Digital input bytes.
    DigitalInSize,
    /// Modules with digital outputs.
    DigitalOutCount,
    /// Digital output bytes.
    DigitalOutSize,
    // misc
    /// Node number switch setting.
    NodeNumber,
    /// Start-up delay before the bus is initialized.
    InitDelay,
    /// I/O boundary check control.
    CheckIo,
    /// Telnet password flag.
    TelnetPassword,
    /// Coupler status.
    Status,
    /// Error status bits, see [`StatusErrors`].
    StatusError,
    // x2x statistics
    /// X2X cycles.
    X2xCycles,
    /// X2X bus-off events.
    X2xBusOff,
    /// X2X synchronous errors.
    X2xSyncErrors,
    /// X2X synchronous bus timing errors.
    X2xSyncBusTiming,
    /// X2X synchronous frame timing errors.
    X2xSyncFrameTiming,
    /// X2X synchronous frame CRC errors.
    X2xSyncFrameCrc,
    /// X2X synchronous frames still pending.
    X2xSyncFramePending,
    /// X2X synchronous buffer underruns.
    X2xSyncBufferUnderrun,
    /// X2X synchronous buffer overflows.
    X2xSyncBufferOverflow,
    /// X2X asynchronous errors.
    X2xAsyncErrors,
    /// X2X asynchronous bus timing errors.
    X2xAsyncBusTiming,
    /// X2X asynchronous frame timing errors.
    X2xAsyncFrameTiming,
    /// X2X asynchronous frame CRC errors.
    X2xAsyncFrameCrc,
    /// X2X asynchronous frames still pending.
    X2xAsyncFramePending,
    /// X2X asynchronous buffer underruns.
    X2xAsyncBufferUnderrun,
    /// X2X asynchronous buffer overflows.
    X2xAsyncBufferOverflow,
    // network statistics
    /// Received Ethernet frames.
    NetFrames,
    /// Lost Ethernet frames.
    NetLostFrames,
    /// Oversized Ethernet frames.
    NetOversizeFrames,
    /// Ethernet CRC errors.
    NetCrcErrors,
    /// Ethernet collisions.
    NetCollisions,
}

impl Parameter {
    /// Every parameter in address order.
    pub const ALL: [Parameter; 59] = [
        Parameter::Port,
        Parameter::Duration,
        Parameter::Mtu,
        Parameter::X2xCycle,
        Parameter::X2xCableLength,
        Parameter::WatchdogThreshold,
        Parameter::WatchdogElapsed,
        Parameter::WatchdogStatus,
        Parameter::WatchdogMode,
        Parameter::ProductCode,
        Parameter::HardwareMajor,
        Parameter::HardwareMinor,
        Parameter::FirmwareMajor,
        Parameter::FirmwareMinor,
        Parameter::FpgaVersion,
        Parameter::BootVersion,
        Parameter::DefaultFirmwareMajor,
        Parameter::DefaultFirmwareMinor,
        Parameter::UpdateFirmwareMajor,
        Parameter::UpdateFirmwareMinor,
        Parameter::DefaultFpgaVersion,
        Parameter::UpdateFpgaVersion,
        Parameter::ModbusClients,
        Parameter::ModuleCount,
        Parameter::AnalogInCount,
        Parameter::AnalogInSize,
        Parameter::AnalogOutCount,
        Parameter::AnalogOutSize,
        Parameter::DigitalInCount,
        Parameter::DigitalInSize,
        Parameter::DigitalOutCount,
        Parameter::DigitalOutSize,
        Parameter::NodeNumber,
        Parameter::InitDelay,
        Parameter::CheckIo,
        Parameter::TelnetPassword,
        Parameter::Status,
        Parameter::StatusError,
        Parameter::X2xCycles,
        Parameter::X2xBusOff,
        Parameter::X2xSyncErrors,
        Parameter::X2xSyncBusTiming,
        Parameter::X2xSyncFrameTiming,
        Parameter::X2xSyncFrameCrc,
        Parameter::X2xSyncFramePending,
        Parameter::X2xSyncBufferUnderrun,
        Parameter::X2xSyncBufferOverflow,
        Parameter::X2xAsyncErrors,
        Parameter::X2xAsyncBusTiming,
        Parameter::X2xAsyncFrameTiming,
        Parameter::X2xAsyncFrameCrc,
        Parameter::X2xAsyncFramePending,
        Parameter::X2xAsyncBufferUnderrun,
        Parameter::X2xAsyncBufferOverflow,
        Parameter::NetFrames,
        Parameter::NetLostFrames,
        Parameter::NetOversizeFrames,
        Parameter::NetCrcErrors,
        Parameter::NetCollisions,
    ];

    fn definition(self) -> (&'static str, u16, Access) {
        use Access::{Read, ReadWrite};
        match self {
            Parameter::Port => ("port", 0x100F, ReadWrite),
            Parameter::Duration => ("duration", 0x1010, ReadWrite),
            Parameter::Mtu => ("mtu", 0x1011, ReadWrite),
            Parameter::X2xCycle => ("x2x_cycle", 0x1012, ReadWrite),
            Parameter::X2xCableLength => ("x2x_cable_length", 0x1017, ReadWrite),
            Parameter::WatchdogThreshold => ("watchdog_threshold", 0x1040, ReadWrite),
            Parameter::WatchdogElapsed => ("watchdog_elapsed", 0x1041, Read),
            Parameter::WatchdogStatus => ("watchdog_status", 0x1042, Read),
            Parameter::WatchdogMode => ("watchdog_mode", 0x1043, ReadWrite),
            Parameter::ProductCode => ("product_code", 0x1083, Read),
            Parameter::HardwareMajor => ("hardware_major", 0x1084, Read),
            Parameter::HardwareMinor => ("hardware_minor", 0x1085, Read),
            Parameter::FirmwareMajor => ("firmware_major", 0x1086, Read),
            Parameter::FirmwareMinor => ("firmware_minor", 0x1087, Read),
            Parameter::FpgaVersion => ("fpga_version", 0x1088, Read),
            Parameter::BootVersion => ("boot_version", 0x1089, Read),
            Parameter::DefaultFirmwareMajor => ("default_firmware_major", 0x108A, Read),
            Parameter::DefaultFirmwareMinor => ("default_firmware_minor", 0x108B, Read),
            Parameter::UpdateFirmwareMajor => ("update_firmware_major", 0x108C, Read),
            Parameter::UpdateFirmwareMinor => ("update_firmware_minor", 0x108D, Read),
            Parameter::DefaultFpgaVersion => ("default_fpga_version", 0x108E, Read),
            Parameter::UpdateFpgaVersion => ("update_fpga_version", 0x108F, Read),
            Parameter::ModbusClients => ("modbus_clients", 0x10C0, Read),
            Parameter::ModuleCount => ("module_count", 0x1100, Read),
            Parameter::AnalogInCount => ("analog_in_count", 0x1101, Read),
            Parameter::AnalogInSize => ("analog_in_size", 0x1102, Read),
            Parameter::AnalogOutCount => ("analog_out_count", 0x1103, Read),
            Parameter::AnalogOutSize => ("analog_out_size", 0x1104, Read),
            Parameter::DigitalInCount => ("digital_in_count", 0x1105, Read),
            Parameter::DigitalInSize => ("digital_in_size", 0x1106, Read),
            Parameter::DigitalOutCount => ("digital_out_count", 0x1107, Read),
            Parameter::DigitalOutSize => ("digital_out_size", 0x1108, Read),
            Parameter::NodeNumber => ("node_number", 0x1180, Read),
            Parameter::InitDelay => ("init_delay", 0x1181, ReadWrite),
            Parameter::CheckIo => ("check_io", 0x1182, ReadWrite),
            Parameter::TelnetPassword => ("telnet_password", 0x1183, ReadWrite),
            Parameter::Status => ("status", 0x1186, Read),
            Parameter::StatusError => ("status_error", 0x1187, Read),
            Parameter::X2xCycles => ("x2x_cycles", 0x11C0, Read),
            Parameter::X2xBusOff => ("x2x_bus_off", 0x11C1, Read),
            Parameter::X2xSyncErrors => ("x2x_sync_errors", 0x11C2, Read),
            Parameter::X2xSyncBusTiming => ("x2x_sync_bus_timing", 0x11C3, Read),
            Parameter::X2xSyncFrameTiming => ("x2x_sync_frame_timing", 0x11C4, Read),
            Parameter::X2xSyncFrameCrc => ("x2x_sync_frame_crc", 0x11C5, Read),
            Parameter::X2xSyncFramePending => ("x2x_sync_frame_pending", 0x11C6, Read),
            Parameter::X2xSyncBufferUnderrun => ("x2x_sync_buffer_underrun", 0x11C7, Read),
            Parameter::X2xSyncBufferOverflow => ("x2x_sync_buffer_overflow", 0x11C8, Read),
            Parameter::X2xAsyncErrors => ("x2x_async_errors", 0x11C9, Read),
            Parameter::X2xAsyncBusTiming => ("x2x_async_bus_timing", 0x11CA, Read),
            Parameter::X2xAsyncFrameTiming => ("x2x_async_frame_timing", 0x11CB, Read),
            Parameter::X2xAsyncFrameCrc => ("x2x_async_frame_crc", 0x11CC, Read),
            Parameter::X2xAsyncFramePending => ("x2x_async_frame_pending", 0x11CD, Read),
            Parameter::X2xAsyncBufferUnderrun => ("x2x_async_buffer_underrun", 0x11CE, Read),
            Parameter::X2xAsyncBufferOverflow => ("x2x_async_buffer_overflow", 0x11CF, Read),
            Parameter::NetFrames => ("net_frames", 0x1200, Read),
            Parameter::NetLostFrames => ("net_lost_frames", 0x1201, Read),
            Parameter::NetOversizeFrames => ("net_oversize_frames", 0x1202, Read),
            Parameter::NetCrcErrors => ("net_crc_errors", 0x1203, Read),
            Parameter::NetCollisions => ("net_collisions", 0x1206, Read),
        }
    }

    /// Snake-case name, as accepted by [`FromStr`].
    pub fn name(self) -> &'static str {
        self.definition().0
    }

    /// Register address.
    pub fn address(self) -> u16 {
        self.definition().1
    }

    /// Read or read/write.
    pub fn access(self) -> Access {
        self.definition().2
    }

    /// Whether the register accepts writes.
    pub fn is_writable(self) -> bool {
        self.access() == Access::ReadWrite
    }
}

impl std::fmt::Display for Parameter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (0x{:04X})", self.name(), self.address())
    }
}

/// Error returned when parsing an unknown parameter name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown parameter '{0}'")]
pub struct UnknownParameter(pub String);

impl FromStr for Parameter {
    type Err = UnknownParameter;

    /// Parses a parameter from its snake-case name.
    ///
    /// ```
    /// use coupler_io::Parameter;
    ///
    /// let parameter: Parameter = "watchdog_threshold".parse().unwrap();
    /// assert_eq!(parameter.address(), 0x1040);
    /// assert!("nope".parse::<Parameter>().is_err());
    /// ```
    fn from_str(name: &str) -> std::result::Result<Self, Self::Err> {
        Parameter::ALL
            .into_iter()
            .find(|parameter| parameter.name() == name)
            .ok_or_else(|| UnknownParameter(name.to_string()))
    }
}

/// Four-word network address registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum NetworkAddress {
    /// Address in use (read only).
    Ip,
    /// Address stored in flash, applied after a reboot.
    FlashIp,
    /// Subnet mask.
    SubnetMask,
    /// Default gateway.
    Gateway,
}

impl NetworkAddress {
    /// Address of the first word.
    pub fn address(self) -> u16 {
        match self {
            NetworkAddress::Ip => 0x1013,
            NetworkAddress::FlashIp => 0x1003,
            NetworkAddress::SubnetMask => 0x1007,
            NetworkAddress::Gateway => 0x100B,
        }
    }
}

/// 32-bit Modbus telegram counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Counter {
    /// Telegrams from all clients.
    GlobalTelegrams,
    /// Telegrams on this connection.
    LocalTelegrams,
    /// Protocol telegrams from all clients.
    GlobalProtocolTelegrams,
    /// Protocol telegrams on this connection.
    LocalProtocolTelegrams,
    /// Most commands per telegram, all clients.
    GlobalMaxCommands,
    /// Most commands per telegram, this connection.
    LocalMaxCommands,
    /// Fewest commands per telegram, all clients.
    GlobalMinCommands,
    /// Fewest commands per telegram, this connection.
    LocalMinCommands,
    /// Fragmented protocol telegrams, all clients.
    GlobalProtocolFragments,
    /// Fragmented protocol telegrams, this connection.
    LocalProtocolFragments,
}

impl Counter {
    /// Address of the high word.
    pub fn address(self) -> u16 {
        match self {
            Counter::GlobalTelegrams => 0x10C1,
            Counter::LocalTelegrams => 0x10C3,
            Counter::GlobalProtocolTelegrams => 0x10C5,
            Counter::LocalProtocolTelegrams => 0x10C7,
            Counter::GlobalMaxCommands => 0x10C9,
            Counter::LocalMaxCommands => 0x10CB,
            Counter::GlobalMinCommands => 0x10CD,
            Counter::LocalMinCommands => 0x10CF,
            Counter::GlobalProtocolFragments => 0x10D1,
            Counter::LocalProtocolFragments => 0x10D3,
        }
    }
}

/// Single-word registers in each module slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ModuleParameter {
    /// Live status; zero means the slot is empty.
    Status,
    /// Hardware ID the configuration expects. A module whose ID differs
    /// does not start.
    ConfiguredHardwareId,
    /// Function model.
    FunctionModel,
    /// Configuration register index.
    ConfigIndex,
    /// Configuration register size.
    ConfigSize,
    /// Firmware version.
    Firmware,
    /// Hardware variant.
    Variant,
}

impl ModuleParameter {
    /// Offset inside the module slot.
    pub fn offset(self) -> u16 {
        match self {
            ModuleParameter::Status => 0x0,
            ModuleParameter::ConfiguredHardwareId => 0x8,
            ModuleParameter::FunctionModel => 0x9,
            ModuleParameter::ConfigIndex => 0xA,
            ModuleParameter::ConfigSize => 0xB,
            ModuleParameter::Firmware => 0xC,
            ModuleParameter::Variant => 0xD,
        }
    }

    /// Whether the slot register accepts writes.
    pub fn is_writable(self) -> bool {
        matches!(
            self,
            ModuleParameter::ConfiguredHardwareId
                | ModuleParameter::FunctionModel
                | ModuleParameter::ConfigIndex
                | ModuleParameter::ConfigSize
        )
    }
}

/// Decoded error status register (0x1187).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StatusErrors {
    /// Invalid configuration data.
    pub config_data: bool,
    /// Flash could not be read.
    pub flash_read: bool,
    /// Another device uses the same IP address.
    pub ip_conflict: bool,
    /// A module does not match the configuration.
    pub module_mismatch: bool,
    /// A module reported a runtime error.
    pub module_runtime: bool,
    /// The watchdog expired.
    pub watchdog_expired: bool,
}

impl StatusErrors {
    /// Decodes the register bits 0 to 5.
    ///
    /// ```
    /// use coupler_io::StatusErrors;
    ///
    /// let errors = StatusErrors::from_bits(0b10_0100);
    /// assert!(errors.ip_conflict);
    /// assert!(errors.watchdog_expired);
    /// assert!(!errors.config_data);
    /// ```
    pub fn from_bits(bits: u16) -> Self {
        let bit = |n: u16| bits & (1 << n) != 0;
        Self {
            config_data: bit(0),
            flash_read: bit(1),
            ip_conflict: bit(2),
            module_mismatch: bit(3),
            module_runtime: bit(4),
            watchdog_expired: bit(5),
        }
    }

    /// Whether any error bit is set.
    pub fn any(&self) -> bool {
        self.config_data
            || self.flash_read
            || self.ip_conflict
            || self.module_mismatch
            || self.module_runtime
            || self.watchdog_expired
    }
}

impl Coupler {
    /// Reads `count` raw holding registers on the parameter channel.
    pub fn read_raw(&self, address: u16, count: u16) -> Result<Vec<u16>> {
        self.read_words_on(Channel::Parameter, address, count, None)
    }

    /// Writes one raw holding register on the parameter channel.
    pub fn write_raw(&self, address: u16, value: u16) -> Result<()> {
        self.write_word_on(address, value, None)
    }

    /// Reads a single-word parameter.
    pub fn read_parameter(&self, parameter: Parameter) -> Result<u16> {
        self.read_word(parameter.address(), None)
    }

    /// Writes a single-word parameter.
    ///
    /// # Errors
    ///
    /// `InvalidRegisterData` for read-only parameters, without contacting
    /// the coupler.
    pub fn write_parameter(&self, parameter: Parameter, value: u16) -> Result<()> {
        if !parameter.is_writable() {
            return Err(self.shared.fail(Condition::new(ConditionKind::InvalidRegisterData)));
        }
        debug!(%parameter, value, "parameter write");
        self.write_word_on(parameter.address(), value, None)
    }

    /// Reads a 32-bit telegram counter.
    pub fn read_counter(&self, counter: Counter) -> Result<u32> {
        let words = self.read_raw(counter.address(), 2)?;
        Ok(words_to_u32(words[0], words[1]))
    }

    /// Reads a network address register block as a dotted quad.
    pub fn network_address(&self, which: NetworkAddress) -> Result<String> {
        let words = self.read_raw(which.address(), 4)?;
        format_dotted_quad(&words)
            .ok_or_else(|| self.shared.fail(Condition::new(ConditionKind::EmptyResponse)))
    }

    /// Writes a network address given as a dotted quad.
    ///
    /// # Errors
    ///
    /// `InvalidAddressFormat` if `text` is not four decimal octets, and
    /// `InvalidRegisterData` for the read-only [`NetworkAddress::Ip`].
    pub fn set_network_address(&self, which: NetworkAddress, text: &str) -> Result<()> {
        if which == NetworkAddress::Ip {
            return Err(self.shared.fail(Condition::new(ConditionKind::InvalidRegisterData)));
        }
        let Some(words) = parse_dotted_quad(text) else {
            return Err(self.shared.fail(Condition::new(ConditionKind::InvalidAddressFormat)));
        };
        info!(?which, address = text, "network address written");
        self.write_words_on(Channel::Parameter, which.address(), &words, None)
    }

    /// IP address in use.
    pub fn ip_address(&self) -> Result<String> {
        self.network_address(NetworkAddress::Ip)
    }

    /// IP address stored in flash.
    pub fn flash_ip_address(&self) -> Result<String> {
        self.network_address(NetworkAddress::FlashIp)
    }

    /// Stores a new IP address in flash. It takes effect after
    /// [`save_configuration`](Self::save_configuration) and a reboot.
    pub fn set_flash_ip_address(&self, text: &str) -> Result<()> {
        self.set_network_address(NetworkAddress::FlashIp, text)
    }

    /// Subnet mask.
    pub fn subnet_mask(&self) -> Result<String> {
        self.network_address(NetworkAddress::SubnetMask)
    }

    /// Sets the subnet mask.
    pub fn set_subnet_mask(&self, text: &str) -> Result<()> {
        self.set_network_address(NetworkAddress::SubnetMask, text)
    }

    /// Default gateway.
    pub fn gateway(&self) -> Result<String> {
        self.network_address(NetworkAddress::Gateway)
    }

    /// Sets the default gateway.
    pub fn set_gateway(&self, text: &str) -> Result<()> {
        self.set_network_address(NetworkAddress::Gateway, text)
    }

    /// MAC address, formatted `00-60-65-0A-0B-0C`.
    pub fn mac_address(&self) -> Result<String> {
        let words = self.read_raw(MAC_ADDRESS, 3)?;
        format_mac(&words_to_bytes(&words))
            .ok_or_else(|| self.shared.fail(Condition::new(ConditionKind::EmptyResponse)))
    }

    /// Coupler serial number.
    pub fn serial_number(&self) -> Result<String> {
        let words = self.read_raw(SERIAL_NUMBER, 3)?;
        Ok(format_serial(&words))
    }

    /// Watchdog threshold.
    pub fn watchdog_threshold(&self) -> Result<Duration> {
        self.read_parameter(Parameter::WatchdogThreshold)
            .map(|ms| Duration::from_millis(u64::from(ms)))
    }

    /// Sets the watchdog threshold and re-arms the poll timer, whose period
    /// follows the threshold when no poll period is set.
    ///
    /// # Errors
    ///
    /// `ValueOutOfRange` unless `threshold` is between 10 ms and 65535 ms.
    pub fn set_watchdog_threshold(&self, threshold: Duration) -> Result<()> {
        let millis = u16::try_from(threshold.as_millis())
            .ok()
            .filter(|_| threshold >= MIN_WATCHDOG_THRESHOLD);
        let Some(millis) = millis else {
            return Err(self.shared.fail(Condition::new(ConditionKind::ValueOutOfRange)));
        };
        let session = self.shared.require_session()?;
        self.shared.execute(
            &session,
            Channel::Parameter,
            &Request::WriteSingleRegister {
                address: watchdog::THRESHOLD_REGISTER,
                value: millis,
            },
            None,
        )?;
        session.threshold.store(millis, Ordering::SeqCst);
        info!(threshold_ms = millis, "watchdog threshold changed");
        self.shared.rearm(&session)
    }

    /// Time since the watchdog was last reset.
    pub fn watchdog_elapsed(&self) -> Result<Duration> {
        self.read_parameter(Parameter::WatchdogElapsed)
            .map(|ms| Duration::from_millis(u64::from(ms)))
    }

    /// Whether the coupler reports its watchdog as expired.
    pub fn watchdog_expired(&self) -> Result<bool> {
        let status = self.read_parameter(Parameter::WatchdogStatus)?;
        Ok(watchdog::is_expired(&status.to_be_bytes()))
    }

    /// Current watchdog mode; `None` for a value outside the known modes.
    pub fn watchdog_mode(&self) -> Result<Option<WatchdogMode>> {
        self.read_parameter(Parameter::WatchdogMode)
            .map(WatchdogMode::from_register)
    }

    /// Sets the watchdog mode.
    pub fn set_watchdog_mode(&self, mode: WatchdogMode) -> Result<()> {
        self.write_parameter(Parameter::WatchdogMode, mode.to_register())
    }

    /// Saves the current configuration to flash.
    pub fn save_configuration(&self) -> Result<()> {
        self.command(SAVE_CONFIG, COMMAND_EXECUTE, "save configuration")
    }

    /// Loads the configuration stored in flash.
    pub fn load_configuration(&self) -> Result<()> {
        self.command(LOAD_CONFIG, COMMAND_EXECUTE, "load configuration")
    }

    /// Erases the configuration stored in flash.
    pub fn erase_configuration(&self) -> Result<()> {
        self.command(ERASE_CONFIG, COMMAND_EXECUTE, "erase configuration")
    }

    /// Reboots the coupler. The connection drops shortly afterwards.
    pub fn reboot(&self) -> Result<()> {
        self.command(REBOOT, COMMAND_EXECUTE, "reboot")
    }

    /// Closes every Modbus connection on the coupler, this one included.
    pub fn close_connections(&self) -> Result<()> {
        self.command(CLOSE_CONNECTIONS, COMMAND_EXECUTE, "close connections")
    }

    /// Restores the factory configuration, saves it and reboots.
    ///
    /// Blocks for a little over two seconds while the coupler stores the
    /// configuration.
    pub fn reset_configuration(&self) -> Result<()> {
        let steps: [(u16, u16, Duration); 5] = [
            (RESET_COMMUNICATION, COMMAND_CLEAR, Duration::from_millis(20)),
            (RESET_MODULES, COMMAND_EXECUTE, Duration::from_millis(20)),
            (RESET_MISC, COMMAND_CLEAR, Duration::from_millis(50)),
            (SAVE_CONFIG, COMMAND_EXECUTE, Duration::from_secs(2)),
            (REBOOT, COMMAND_EXECUTE, Duration::ZERO),
        ];
        info!("resetting coupler configuration");
        for (address, value, settle) in steps {
            self.write_word_on(address, value, None)?;
            if !settle.is_zero() {
                thread::sleep(settle);
            }
        }
        Ok(())
    }

    /// Whether the configuration differs from the one in flash.
    pub fn configuration_changed(&self) -> Result<bool> {
        Ok(self.read_word(CONFIG_CHANGED, None)? == COMMAND_EXECUTE)
    }

    /// Sets or clears the configuration-changed flag.
    pub fn set_configuration_changed(&self, changed: bool) -> Result<()> {
        let value = if changed { COMMAND_EXECUTE } else { COMMAND_CLEAR };
        self.write_word_on(CONFIG_CHANGED, value, None)
    }

    /// Decoded error status.
    pub fn status_errors(&self) -> Result<StatusErrors> {
        self.read_parameter(Parameter::StatusError)
            .map(StatusErrors::from_bits)
    }

    /// Reads a single-word register of a discovered module.
    pub fn read_module_parameter(&self, module: usize, parameter: ModuleParameter) -> Result<u16> {
        let address = self.module_address(module, parameter.offset())?;
        self.read_word(address, Some(module))
    }

    /// Writes a single-word register of a discovered module.
    ///
    /// # Errors
    ///
    /// `InvalidRegisterData` for read-only module parameters.
    pub fn write_module_parameter(
        &self,
        module: usize,
        parameter: ModuleParameter,
        value: u16,
    ) -> Result<()> {
        let address = self.module_address(module, parameter.offset())?;
        if !parameter.is_writable() {
            return Err(self
                .shared
                .fail(Condition::new(ConditionKind::InvalidRegisterData).with_module(module)));
        }
        self.write_word_on(address, value, Some(module))
    }

    /// Serial number of a discovered module.
    pub fn module_serial(&self, module: usize) -> Result<String> {
        let address = self.module_address(module, 1)?;
        let words = self.read_words_on(Channel::Parameter, address, 3, Some(module))?;
        Ok(format_serial(&words))
    }

    /// Reads a 32-bit configuration register of a module.
    ///
    /// # Errors
    ///
    /// `InvalidModuleIndex` for an unknown module, `InvalidRegisterData` if
    /// the module rejects the register.
    pub fn read_register(&self, module: usize, register: u16) -> Result<u32> {
        let index = self.module_number(module)?;
        let session = self.shared.require_session()?;
        let request = Request::ReadWriteMultipleRegisters {
            read_address: MODULE_REGISTER_VALUE,
            read_count: 2,
            write_address: MODULE_REGISTER_SELECT,
            data: words_to_bytes(&[index, register]),
        };
        let data = self
            .shared
            .execute(&session, Channel::Register, &request, Some(module))?;
        let words = bytes_to_words(&data);
        match words.as_slice() {
            [high, low, ..] => Ok(words_to_u32(*high, *low)),
            _ => Err(self
                .shared
                .fail(Condition::new(ConditionKind::EmptyResponse).with_module(module))),
        }
    }

    /// Writes a 32-bit configuration register of a module.
    pub fn write_register(&self, module: usize, register: u16, value: u32) -> Result<()> {
        let index = self.module_number(module)?;
        let (high, low) = u32_to_words(value);
        debug!(module, register, value, "module register write");
        self.write_words_on(
            Channel::Register,
            MODULE_REGISTER_WRITE,
            &[index, register, high, low],
            Some(module),
        )
    }

    fn module_number(&self, module: usize) -> Result<u16> {
        let session = self.shared.require_session()?;
        if module >= session.modules.len() {
            return Err(self
                .shared
                .fail(Condition::new(ConditionKind::InvalidModuleIndex).with_module(module)));
        }
        u16::try_from(module).map_err(|_| {
            self.shared
                .fail(Condition::new(ConditionKind::InvalidModuleIndex).with_module(module))
        })
    }

    fn module_address(&self, module: usize, offset: u16) -> Result<u16> {
        self.module_number(module)?;
        slot_address(module, offset).ok_or_else(|| {
            self.shared
                .fail(Condition::new(ConditionKind::InvalidModuleIndex).with_module(module))
        })
    }

    fn command(&self, address: u16, value: u16, name: &str) -> Result<()> {
        info!(command = name, "coupler command");
        self.write_word_on(address, value, None)
    }

    fn read_word(&self, address: u16, module: Option<usize>) -> Result<u16> {
        let words = self.read_words_on(Channel::Parameter, address, 1, module)?;
        Ok(words[0])
    }

    /// Reads exactly `count` words or reports `EmptyResponse`.
    fn read_words_on(
        &self,
        channel: Channel,
        address: u16,
        count: u16,
        module: Option<usize>,
    ) -> Result<Vec<u16>> {
        let session = self.shared.require_session()?;
        let data = self.shared.execute(
            &session,
            channel,
            &Request::ReadHoldingRegisters { address, count },
            module,
        )?;
        let mut words = bytes_to_words(&data);
        if words.len() < usize::from(count) {
            let mut condition = Condition::new(ConditionKind::EmptyResponse);
            condition.module = module;
            return Err(self.shared.fail(condition));
        }
        words.truncate(usize::from(count));
        Ok(words)
    }

    fn write_word_on(&self, address: u16, value: u16, module: Option<usize>) -> Result<()> {
        let session = self.shared.require_session()?;
        self.shared
            .execute(
                &session,
                Channel::Parameter,
                &Request::WriteSingleRegister { address, value },
                module,
            )
            .map(drop)
    }

    fn write_words_on(
        &self,
        channel: Channel,
        address: u16,
        words: &[u16],
        module: Option<usize>,
    ) -> Result<()> {
        let session = self.shared.require_session()?;
        self.shared
            .execute(
                &session,
                channel,
                &Request::WriteMultipleRegisters {
                    address,
                    data: words_to_bytes(words),
                },
                module,
            )
            .map(drop)
    }
}

fn format_serial(words: &[u16]) -> String {
    words.iter().map(|word| format!("{word:03}")).collect()
}
