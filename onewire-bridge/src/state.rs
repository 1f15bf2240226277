//! Session state of a bridge chip: framing mode, bus speed, timing parameters and
//! what the chip has told us about itself.

/// Framing state of a serial bridge.
///
/// In [`Mode::Command`] every byte is a bridge command; in [`Mode::Data`] every byte
/// is written to the 1-Wire bus, except the escaped mode-switch byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Bytes are interpreted as bridge commands.
    #[default]
    Command,
    /// Bytes are clocked out on the 1-Wire bus.
    Data,
}

/// 1-Wire bus timing profile.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Speed {
    /// Standard speed with power-up timing.
    #[default]
    Regular = 0,
    /// Standard speed with relaxed slew and sampling for long lines.
    Flex = 1,
    /// Overdrive speed.
    Overdrive = 2,
    /// Pulse (strong pullup / program) timing.
    Pulse = 3,
}

impl Speed {
    /// All speeds in index order.
    pub const ALL: [Speed; 4] = [Speed::Regular, Speed::Flex, Speed::Overdrive, Speed::Pulse];

    /// Index of this speed in per-speed tables.
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Pull-down slew rate.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlewRate {
    /// 15 V/µs
    Slew15Vus = 0,
    /// 2.2 V/µs
    Slew2p2Vus = 1,
    /// 1.65 V/µs
    Slew1p65Vus = 2,
    /// 1.37 V/µs
    Slew1p37Vus = 3,
    /// 1.1 V/µs
    Slew1p1Vus = 4,
    /// 0.83 V/µs
    Slew0p83Vus = 5,
    /// 0.7 V/µs
    Slew0p7Vus = 6,
    /// 0.55 V/µs
    Slew0p55Vus = 7,
}

/// Duration of the 12V programming pulse.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pulse12VTime {
    /// 32 µs
    Pulse32us = 0,
    /// 64 µs
    Pulse64us = 1,
    /// 128 µs
    Pulse128us = 2,
    /// 256 µs
    Pulse256us = 3,
    /// 512 µs
    Pulse512us = 4,
    /// 1024 µs
    Pulse1024us = 5,
    /// 2048 µs
    Pulse2048us = 6,
    /// Until terminated.
    Infinite = 7,
}

/// Duration of the 5V strong pullup pulse.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pulse5VTime {
    /// 16.4 ms
    Pulse16p4ms = 0,
    /// 65.5 ms
    Pulse65p5ms = 1,
    /// 131 ms
    Pulse131ms = 2,
    /// 262 ms
    Pulse262ms = 3,
    /// 524 ms
    Pulse524ms = 4,
    /// 1.05 s
    Pulse1p05s = 5,
    /// Dynamic current sense.
    Dynamic = 6,
    /// Until terminated.
    Infinite = 7,
}

/// Low time of a write-one slot.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Write1LowTime {
    /// 8 µs
    Write8us = 0,
    /// 9 µs
    Write9us = 1,
    /// 10 µs
    Write10us = 2,
    /// 11 µs
    Write11us = 3,
    /// 12 µs
    Write12us = 4,
    /// 13 µs
    Write13us = 5,
    /// 14 µs
    Write14us = 6,
    /// 15 µs
    Write15us = 7,
}

/// Data sample offset / write-zero recovery time.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleOffset {
    /// 3 µs
    Offset3us = 0,
    /// 4 µs
    Offset4us = 1,
    /// 5 µs
    Offset5us = 2,
    /// 6 µs
    Offset6us = 3,
    /// 7 µs
    Offset7us = 4,
    /// 8 µs
    Offset8us = 5,
    /// 9 µs
    Offset9us = 6,
    /// 10 µs
    Offset10us = 7,
}

/// Electrical timing for one bus speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParameterSet {
    /// Pull-down slew rate.
    pub slew_rate: SlewRate,
    /// 12V programming pulse duration.
    pub pulse_12v: Pulse12VTime,
    /// 5V strong pullup duration.
    pub pulse_5v: Pulse5VTime,
    /// Write-one low time.
    pub write_one_low: Write1LowTime,
    /// Data sample offset.
    pub sample_offset: SampleOffset,
}

impl ParameterSet {
    /// Default timing for a bus speed.
    ///
    /// Flex speed uses the long-line settings (1.37 V/µs slew, 10 µs write-one low,
    /// 8 µs sample offset), all others the bridge power-up values.
    pub const fn default_for(speed: Speed) -> Self {
        match speed {
            Speed::Flex => Self {
                slew_rate: SlewRate::Slew1p37Vus,
                pulse_12v: Pulse12VTime::Pulse512us,
                pulse_5v: Pulse5VTime::Infinite,
                write_one_low: Write1LowTime::Write10us,
                sample_offset: SampleOffset::Offset8us,
            },
            _ => Self {
                slew_rate: SlewRate::Slew15Vus,
                pulse_12v: Pulse12VTime::Pulse512us,
                pulse_5v: Pulse5VTime::Pulse524ms,
                write_one_low: Write1LowTime::Write8us,
                sample_offset: SampleOffset::Offset3us,
            },
        }
    }
}

/// Which operations may share a packet with the operations that follow them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamingFlags {
    /// Single-bit operations.
    pub bits: bool,
    /// Data bytes.
    pub bytes: bool,
    /// Search sequences.
    pub searches: bool,
    /// Bus resets.
    pub resets: bool,
}

impl Default for StreamingFlags {
    fn default() -> Self {
        Self {
            bits: true,
            bytes: true,
            searches: true,
            resets: true,
        }
    }
}

/// Decoded result of a 1-Wire reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetOutcome {
    /// The bus is shorted.
    Short,
    /// At least one device answered with a presence pulse.
    Presence,
    /// A device answered with an alarming presence pulse.
    Alarm,
    /// Nothing answered.
    NoPresence,
}

impl ResetOutcome {
    /// `true` if a device answered the reset.
    pub fn presence(&self) -> bool {
        matches!(self, ResetOutcome::Presence | ResetOutcome::Alarm)
    }

    /// `true` if the bus is shorted.
    pub fn shortcircuit(&self) -> bool {
        matches!(self, ResetOutcome::Short)
    }
}

/// Consecutive resets without an alarm after which the long alarm check is disarmed.
pub const MAX_ALARM_COUNT: u32 = 3000;

/// Session state of a bridge chip.
///
/// Owned by an encoder, which is the only party that changes mode and speed, because
/// those changes must land in the byte stream at the exact point they take effect.
/// Everyone else sees it through `&AdapterState`.
#[derive(Debug, Clone)]
pub struct AdapterState {
    mode: Mode,
    speed: Speed,
    parameters: [ParameterSet; 4],
    streaming: StreamingFlags,
    revision: u8,
    program_voltage: bool,
    long_alarm_check: bool,
    alarm_count: u32,
}

impl Default for AdapterState {
    fn default() -> Self {
        Self {
            mode: Mode::Command,
            speed: Speed::Regular,
            parameters: Speed::ALL.map(ParameterSet::default_for),
            streaming: StreamingFlags::default(),
            revision: 0,
            program_voltage: false,
            long_alarm_check: false,
            alarm_count: 0,
        }
    }
}

impl AdapterState {
    /// Current framing mode.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Current bus speed.
    pub fn speed(&self) -> Speed {
        self.speed
    }

    /// Timing parameters for a speed.
    pub fn parameters(&self, speed: Speed) -> &ParameterSet {
        &self.parameters[speed.index()]
    }

    /// Timing parameters for the current speed.
    pub fn current_parameters(&self) -> &ParameterSet {
        self.parameters(self.speed)
    }

    /// Streaming capabilities.
    pub fn streaming(&self) -> StreamingFlags {
        self.streaming
    }

    /// Chip revision reported by the last well-formed reset response.
    pub fn revision(&self) -> u8 {
        self.revision
    }

    /// Whether the bridge reported 12V program voltage.
    pub fn program_voltage_available(&self) -> bool {
        self.program_voltage
    }

    /// Whether an alarming presence armed the long alarm check.
    pub fn long_alarm_check(&self) -> bool {
        self.long_alarm_check
    }

    /// Record a mode switch. Returns `false` if already in `mode`.
    pub fn switch_mode(&mut self, mode: Mode) -> bool {
        if self.mode == mode {
            return false;
        }
        log::debug!("bridge mode {:?} -> {:?}", self.mode, mode);
        self.mode = mode;
        true
    }

    /// Record a speed change.
    ///
    /// # Panics
    /// In debug builds, if the bridge is not in [`Mode::Command`].
    pub fn switch_speed(&mut self, speed: Speed) {
        debug_assert_eq!(self.mode, Mode::Command, "speed change outside command mode");
        if self.speed != speed {
            log::debug!("bus speed {:?} -> {:?}", self.speed, speed);
        }
        self.speed = speed;
    }

    /// Replace the timing parameters of a speed.
    pub fn set_parameters(&mut self, speed: Speed, parameters: ParameterSet) {
        self.parameters[speed.index()] = parameters;
    }

    /// Replace the streaming capabilities.
    pub fn set_streaming(&mut self, streaming: StreamingFlags) {
        self.streaming = streaming;
    }

    /// Record the chip identity learned from a reset response.
    pub fn record_identity(&mut self, revision: u8, program_voltage: bool) {
        if self.revision != revision {
            log::debug!("bridge revision {revision}, program voltage {program_voltage}");
        }
        self.revision = revision;
        self.program_voltage = program_voltage;
    }

    /// Record the program-voltage flag alone.
    pub fn record_program_voltage(&mut self, program_voltage: bool) {
        self.program_voltage = program_voltage;
    }

    /// Track alarm presence across resets.
    ///
    /// An alarm arms the long alarm check and restarts the count; every other
    /// outcome counts towards disarming it.
    pub fn record_reset(&mut self, outcome: ResetOutcome) {
        if outcome == ResetOutcome::Alarm {
            if !self.long_alarm_check {
                log::debug!("alarming presence, long alarm check armed");
            }
            self.long_alarm_check = true;
            self.alarm_count = 0;
            return;
        }
        if !self.long_alarm_check {
            return;
        }
        self.alarm_count += 1;
        if self.alarm_count > MAX_ALARM_COUNT {
            log::debug!("long alarm check disarmed");
            self.long_alarm_check = false;
            self.alarm_count = 0;
        }
    }
}
