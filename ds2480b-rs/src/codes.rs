//! Wire codes of the DS2480B serial 1-Wire line driver.
use bitfield_struct::bitfield;
use onewire_bridge::{ResetOutcome, Speed};

/// Switch to data mode. Only meaningful in command mode.
pub const DATA_MODE: u8 = 0xe1;
/// Switch to command mode. Only meaningful in data mode; a data byte of this value
/// must be sent twice.
pub const COMMAND_MODE: u8 = 0xe3;
/// Terminate a pulse. Only meaningful in command mode.
pub const STOP_PULSE: u8 = 0xf1;
/// Special mode byte of revision 1 chips; a data byte of this value must be sent
/// twice on those.
pub const SPECIAL_MODE: u8 = 0xf3;

/// Number of bytes in a search accelerator block.
pub const SEARCH_BLOCK_LEN: usize = 16;

/// Function select field of a [`CommCommand`].
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    /// Single bit time slot.
    Bit = 0,
    /// Search accelerator control.
    SearchAccelerator = 1,
    /// Reset / presence detect cycle.
    Reset = 2,
    /// Pulse (strong pullup or program voltage).
    Pulse = 3,
}

/// Communication command, sent in command mode.
///
/// | Bit | Field |
/// |-----|-------|
/// | 0 | always 1 |
/// | 1 | arm strong pullup after a bit / pulse |
/// | 2-3 | bus speed |
/// | 4 | bit polarity, accelerator on, or 12V pulse |
/// | 5-6 | function |
/// | 7 | 1 for communication commands |
#[bitfield(u8)]
#[derive(PartialEq, Eq)]
pub struct CommCommand {
    marker: bool,
    /// Arm the strong pullup once the operation completes.
    pub arm: bool,
    /// Speed index, see [`Speed`].
    #[bits(2)]
    pub speed: u8,
    /// Bit value for [`Function::Bit`], on/off for [`Function::SearchAccelerator`],
    /// 12V instead of 5V for [`Function::Pulse`].
    pub polarity: bool,
    /// Function select, see [`Function`].
    #[bits(2)]
    pub function: u8,
    comm: bool,
}

impl CommCommand {
    /// A communication command for `function` at `speed`.
    pub const fn with(function: Function, speed: Speed) -> Self {
        Self::new()
            .with_marker(true)
            .with_comm(true)
            .with_function(function as u8)
            .with_speed(speed as u8)
    }

    /// Reset command byte.
    pub const fn reset(speed: Speed) -> u8 {
        Self::with(Function::Reset, speed).into_bits()
    }

    /// Single bit command byte.
    pub const fn bit(speed: Speed, value: bool, prime: bool) -> u8 {
        Self::with(Function::Bit, speed)
            .with_polarity(value)
            .with_arm(prime)
            .into_bits()
    }

    /// Search accelerator on or off. Accelerator off doubles as a speed change.
    pub const fn accelerator(speed: Speed, on: bool) -> u8 {
        Self::with(Function::SearchAccelerator, speed)
            .with_polarity(on)
            .into_bits()
    }

    /// Pulse command byte. Pulses always run at pulse speed.
    pub const fn pulse(kind: PulseKind) -> u8 {
        Self::with(Function::Pulse, Speed::Pulse)
            .with_polarity(matches!(kind, PulseKind::Program12V))
            .into_bits()
    }
}

/// Pulse generated by [`CommCommand::pulse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PulseKind {
    /// 5V strong pullup, to power parasitic devices.
    StrongPullup5V,
    /// 12V EPROM programming pulse.
    Program12V,
}

/// Configuration parameter of the line driver.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parameter {
    /// Pull-down slew rate control.
    SlewRate = 1,
    /// Programming pulse duration.
    Pulse12V = 2,
    /// Strong pullup duration.
    Pulse5V = 3,
    /// Write-one low time.
    Write1Low = 4,
    /// Data sample offset / write-zero recovery time.
    SampleOffset = 5,
    /// Active pullup on time.
    ActivePullupTime = 6,
    /// RS232 baud rate.
    Baud = 7,
}

/// Serial line speed, value codes of [`Parameter::Baud`].
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BaudRate {
    /// 9600 bps, the power-up rate.
    #[default]
    Baud9600 = 0,
    /// 19200 bps.
    Baud19200 = 1,
    /// 57600 bps.
    Baud57600 = 2,
    /// 115200 bps.
    Baud115200 = 3,
}

impl BaudRate {
    /// Bits per second.
    pub const fn bps(self) -> u32 {
        match self {
            BaudRate::Baud9600 => 9600,
            BaudRate::Baud19200 => 19200,
            BaudRate::Baud57600 => 57600,
            BaudRate::Baud115200 => 115200,
        }
    }
}

/// Configuration command, sent in command mode.
///
/// A write carries the parameter in bits 4-6 and the value code in bits 1-3 and is
/// echoed with bit 0 cleared. A read carries the parameter in bits 1-3 and is
/// answered with the value code in bits 1-3.
#[bitfield(u8)]
#[derive(PartialEq, Eq)]
pub struct ConfigCommand {
    marker: bool,
    /// Value code, or the parameter of a read.
    #[bits(3)]
    pub value: u8,
    /// Parameter of a write, zero for a read.
    #[bits(3)]
    pub parameter: u8,
    #[bits(1)]
    __: u8,
}

impl ConfigCommand {
    /// Write `value` to `parameter`.
    pub const fn write(parameter: Parameter, value: u8) -> u8 {
        Self::new()
            .with_marker(true)
            .with_parameter(parameter as u8)
            .with_value(value & 0x07)
            .into_bits()
    }

    /// Read `parameter`.
    pub const fn read(parameter: Parameter) -> u8 {
        Self::new()
            .with_marker(true)
            .with_value(parameter as u8)
            .into_bits()
    }
}

/// Reply to a reset command.
///
/// | Bit | Field |
/// |-----|-------|
/// | 0-1 | bus condition |
/// | 2-4 | chip revision |
/// | 5 | 12V program voltage present |
/// | 6-7 | always `11` |
#[bitfield(u8)]
#[derive(PartialEq, Eq)]
pub struct ResetResponse {
    #[bits(2)]
    condition: u8,
    /// Chip revision.
    #[bits(3)]
    pub revision: u8,
    /// 12V program voltage is present.
    pub program_voltage: bool,
    #[bits(2)]
    marker: u8,
}

impl ResetResponse {
    /// `true` if the reply carries the `11` marker of a reset response.
    pub const fn is_well_formed(&self) -> bool {
        self.marker() == 0b11
    }

    /// Bus condition reported by the reset.
    pub const fn outcome(&self) -> ResetOutcome {
        match self.condition() {
            0b00 => ResetOutcome::Short,
            0b01 => ResetOutcome::Presence,
            0b10 => ResetOutcome::Alarm,
            _ => ResetOutcome::NoPresence,
        }
    }
}

/// `true` if a bit command reply reports a one. Any pattern but `11` reads as zero.
pub const fn bit_response(byte: u8) -> bool {
    byte & 0x03 == 0x03
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_bytes() {
        assert_eq!(CommCommand::reset(Speed::Regular), 0xc1);
        assert_eq!(CommCommand::reset(Speed::Flex), 0xc5);
        assert_eq!(CommCommand::reset(Speed::Overdrive), 0xc9);
        assert_eq!(CommCommand::bit(Speed::Regular, true, false), 0x91);
        assert_eq!(CommCommand::bit(Speed::Regular, false, false), 0x81);
        assert_eq!(CommCommand::bit(Speed::Flex, true, true), 0x97);
        assert_eq!(CommCommand::accelerator(Speed::Regular, true), 0xb1);
        assert_eq!(CommCommand::accelerator(Speed::Overdrive, false), 0xa9);
        assert_eq!(CommCommand::pulse(PulseKind::StrongPullup5V), 0xed);
        assert_eq!(CommCommand::pulse(PulseKind::Program12V), 0xfd);
    }

    #[test]
    fn config_bytes() {
        assert_eq!(ConfigCommand::write(Parameter::SlewRate, 3), 0x17);
        assert_eq!(ConfigCommand::write(Parameter::Write1Low, 2), 0x45);
        assert_eq!(ConfigCommand::write(Parameter::SampleOffset, 5), 0x5b);
        assert_eq!(ConfigCommand::read(Parameter::Baud), 0x0f);
    }

    #[test]
    fn reset_response_fields() {
        let resp = ResetResponse::from_bits(0xc5);
        assert!(resp.is_well_formed());
        assert_eq!(resp.revision(), 1);
        assert!(!resp.program_voltage());
        assert_eq!(resp.outcome(), ResetOutcome::Presence);
        assert!(ResetResponse::from_bits(0xe9).program_voltage());
        assert!(!ResetResponse::from_bits(0x45).is_well_formed());
    }

    #[test]
    fn bit_patterns() {
        assert!(bit_response(0x93));
        assert!(!bit_response(0x90));
        assert!(!bit_response(0x91));
        assert!(!bit_response(0x92));
    }
}
