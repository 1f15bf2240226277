use alloc::vec::Vec;

use bitfield_struct::bitfield;
use onewire_bridge::{ResetOutcome, ResponseError};

/// Length of the fixed part of the status notification.
pub const STATUS_BLOCK_LEN: usize = 16;
/// Result byte the adapter queues when a device attaches to an idle bus.
pub const DEVICE_DETECT: u8 = 0xa5;

/// Pulse enable flags, byte 0 of the [`StatusBlock`].
#[bitfield(u8)]
#[derive(PartialEq, Eq)]
pub struct EnableFlags {
    /// Strong pullup to 5V is enabled.
    pub strong_pullup: bool,
    /// 12V programming pulse is enabled.
    pub program_pulse: bool,
    /// Communication commands may change the bus speed.
    pub speed_change: bool,
    #[bits(5)]
    __: u8,
}

/// Adapter status flags, byte 8 of the [`StatusBlock`].
#[bitfield(u8)]
#[derive(PartialEq, Eq)]
pub struct StatusFlags {
    /// A strong pullup is running.
    pub strong_pullup_active: bool,
    /// A programming pulse is running.
    pub program_pulse_active: bool,
    /// 12V programming voltage is present on VPP.
    pub program_voltage: bool,
    /// The adapter is externally powered.
    pub external_power: bool,
    /// Command execution is halted.
    pub halted: bool,
    /// Command FIFO is empty and the bus is idle.
    pub idle: bool,
    __: bool,
    /// Endpoint 0 FIFO overflowed.
    pub ep0_overflow: bool,
}

/// Result code of a communication command, queued after the status block.
///
/// A command that completes without an error queues no result unless it is a
/// reset, a pulse or a search.
#[bitfield(u8)]
#[derive(PartialEq, Eq)]
pub struct ResultCode {
    /// No presence pulse after a reset.
    pub no_presence: bool,
    /// Short on the bus during a reset.
    pub short: bool,
    /// Alarming presence pulse.
    pub alarm_presence: bool,
    /// 12V programming voltage missing.
    pub no_program_voltage: bool,
    /// Data read back did not match.
    pub compare_error: bool,
    /// CRC error in a protected page read.
    pub crc_error: bool,
    /// Redirected page.
    pub redirected_page: bool,
    /// Search ended before the requested number of devices was found.
    pub end_of_search: bool,
}

/// The 16-byte status notification of the interrupt endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusBlock {
    /// Pulse enable flags.
    pub enable: EnableFlags,
    /// Speed code: 0 regular, 1 flexible, 2 overdrive.
    pub speed: u8,
    /// Strong pullup duration, 16 ms units.
    pub strong_pullup_duration: u8,
    /// Program pulse duration, 8 µs units.
    pub program_pulse_duration: u8,
    /// Pull-down slew rate code.
    pub slew_rate: u8,
    /// Write-one low time code.
    pub write1_low_time: u8,
    /// Data sample offset / write-zero recovery code.
    pub sample_offset: u8,
    /// Adapter status flags.
    pub flags: StatusFlags,
    /// Communication command being executed.
    pub current_command: u16,
    /// Commands waiting in the FIFO.
    pub command_fifo_len: u8,
    /// Bytes waiting in the write buffer.
    pub write_buffer_len: u8,
    /// Bytes waiting in the read buffer.
    pub read_buffer_len: u8,
}

impl StatusBlock {
    /// Split a status notification into the status block and the result codes after
    /// it, dropping device-detect markers.
    pub fn parse(bytes: &[u8]) -> Result<(Self, Vec<ResultCode>), ResponseError> {
        if bytes.len() < STATUS_BLOCK_LEN {
            return Err(ResponseError::MalformedStatus(bytes.len()));
        }
        let status = Self {
            enable: EnableFlags::from_bits(bytes[0]),
            speed: bytes[1],
            strong_pullup_duration: bytes[2],
            program_pulse_duration: bytes[3],
            slew_rate: bytes[4],
            write1_low_time: bytes[5],
            sample_offset: bytes[6],
            flags: StatusFlags::from_bits(bytes[8]),
            current_command: u16::from_le_bytes([bytes[9], bytes[10]]),
            command_fifo_len: bytes[11],
            write_buffer_len: bytes[12],
            read_buffer_len: bytes[13],
        };
        let results = bytes[STATUS_BLOCK_LEN..]
            .iter()
            .filter(|&&byte| byte != DEVICE_DETECT)
            .map(|&byte| ResultCode::from_bits(byte))
            .collect();
        Ok((status, results))
    }

    /// `true` once every queued command has run.
    pub fn is_idle(&self) -> bool {
        self.flags.idle() && self.command_fifo_len == 0
    }
}

/// Bus condition after a reset, from the result codes it queued.
pub fn reset_outcome(results: &[ResultCode]) -> ResetOutcome {
    if results.iter().any(|r| r.short()) {
        ResetOutcome::Short
    } else if results.iter().any(|r| r.no_presence()) {
        ResetOutcome::NoPresence
    } else if results.iter().any(|r| r.alarm_presence()) {
        ResetOutcome::Alarm
    } else {
        ResetOutcome::Presence
    }
}
