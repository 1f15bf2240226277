use alloc::vec::Vec;

use onewire_bridge::{
    OneWireError, OneWireResult, ParameterSet, Pulse5VTime, Pulse12VTime,
    ResponseError, RomId, SearchState, Session, Speed, Transport,
};

use crate::{
    Ds2490, StatusBlock, UsbReplies, UsbResponse, UsbSlot,
    commands::{CommandPacket, RequestType, UsbCommand, comm, control, mode, speed_code},
};

/// Pulse generated by [`Ds2490::pulse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PulseKind {
    /// 5V strong pullup, to power parasitic devices.
    StrongPullup5V,
    /// 12V EPROM programming pulse.
    Program12V,
}

/// Strong pullup duration in the adapter's 16 ms units, 0 for unlimited.
const fn strong_pullup_units(time: Pulse5VTime) -> u16 {
    match time {
        Pulse5VTime::Pulse16p4ms => 1,
        Pulse5VTime::Pulse65p5ms => 4,
        Pulse5VTime::Pulse131ms => 8,
        Pulse5VTime::Pulse262ms => 16,
        Pulse5VTime::Pulse524ms => 32,
        Pulse5VTime::Pulse1p05s => 64,
        Pulse5VTime::Dynamic | Pulse5VTime::Infinite => 0,
    }
}

/// Program pulse duration in the adapter's 8 µs units, 0 for unlimited.
const fn program_pulse_units(time: Pulse12VTime) -> u16 {
    match time {
        Pulse12VTime::Pulse32us => 4,
        Pulse12VTime::Pulse64us => 8,
        Pulse12VTime::Pulse128us => 16,
        Pulse12VTime::Pulse256us => 32,
        Pulse12VTime::Pulse512us => 64,
        Pulse12VTime::Pulse1024us => 128,
        Pulse12VTime::Pulse2048us => 255,
        Pulse12VTime::Infinite => 0,
    }
}

impl Ds2490 {
    fn mode(&mut self, command: u16, value: u16) {
        self.append(UsbCommand::new(RequestType::Mode, command, value), 0);
    }

    /// Reset the adapter to its power-up state. Drops anything queued.
    pub fn reset_device(&mut self) -> UsbSlot {
        self.queue.restart();
        self.state.switch_speed(Speed::Regular);
        self.append(UsbCommand::new(RequestType::Control, control::RESET_DEVICE, 0), 0)
    }

    /// Enable or disable the strong pullup and the program pulse.
    pub fn enable_pulses(&mut self, strong_pullup: bool, program: bool) {
        let mut flags = 0;
        if strong_pullup {
            flags |= mode::ENABLE_STRONG_PULLUP;
        }
        if program {
            flags |= mode::ENABLE_PROGRAM;
        }
        self.mode(mode::PULSE_EN, flags);
    }

    /// Set the duration of the next pulses of `kind`, in adapter units.
    pub fn set_duration(&mut self, kind: PulseKind, units: u8) {
        let mut value = comm::SET_DURATION | comm::IM;
        if kind == PulseKind::Program12V {
            value |= comm::TYPE;
        }
        self.append(UsbCommand::new(RequestType::Comm, value, u16::from(units)), 0);
    }

    /// Run a pulse. The packet ends with it, so its result code stands alone.
    pub fn pulse(&mut self, kind: PulseKind) -> UsbSlot {
        let mut value = comm::PULSE | comm::IM | comm::F;
        if kind == PulseKind::Program12V {
            value |= comm::TYPE;
        }
        self.append_closing(UsbCommand::new(RequestType::Comm, value, 0))
    }

    /// Write the timing parameters stored for `speed`.
    pub fn apply_parameters(&mut self, speed: Speed) {
        let set = *self.state.parameters(speed);
        self.mode(mode::PULLDOWN_SLEWRATE, set.slew_rate as u16);
        self.mode(mode::WRITE1_LOWTIME, set.write_one_low as u16);
        self.mode(mode::DSOW0_TREC, set.sample_offset as u16);
        self.mode(mode::STRONG_PU_DURATION, strong_pullup_units(set.pulse_5v));
        self.mode(mode::PROG_PULSE_DURATION, program_pulse_units(set.pulse_12v));
    }

    /// Store and write new timing parameters for `speed`.
    pub fn configure(&mut self, speed: Speed, parameters: ParameterSet) {
        self.state.set_parameters(speed, parameters);
        self.apply_parameters(speed);
    }

    /// Bring a freshly attached adapter into a known state: power-up reset, strong
    /// pullup and speed changes enabled, flex timing, regular speed.
    pub fn initialize(&mut self) -> UsbSlot {
        self.reset_device();
        self.enable_pulses(true, false);
        self.mode(mode::SPEED_CHANGE_EN, 1);
        self.apply_parameters(Speed::Flex);
        let slot = self.append(
            UsbCommand::new(RequestType::Mode, mode::ONEWIRE_SPEED, speed_code(Speed::Regular)),
            0,
        );
        self.queue.close();
        slot
    }

    /// `false` if the adapter reported missing program voltage for the pulse.
    pub fn interpret_pulse(&self, replies: &UsbReplies, slot: UsbSlot) -> Result<bool, ResponseError> {
        let reply = replies.packet(slot.packet)?;
        Ok(!reply.results.iter().any(|r| r.no_program_voltage()))
    }

    /// Adapter status after [`initialize`](Ds2490::initialize), learning whether
    /// program voltage is present.
    pub fn interpret_initialize(
        &mut self,
        replies: &UsbReplies,
        slot: UsbSlot,
    ) -> Result<StatusBlock, ResponseError> {
        let status = replies.packet(slot.packet)?.status;
        self.state.record_program_voltage(status.flags.program_voltage());
        log::debug!(
            "ds2490 status: speed {}, program voltage {}",
            status.speed,
            status.flags.program_voltage()
        );
        Ok(status)
    }
}

/// DS2490 operations beyond the [`OneWire`](onewire_bridge::OneWire) set.
pub trait Ds2490Control {
    /// Error type of the transport.
    type Error;

    /// Reset and set up the adapter, returning its status.
    fn detect(&mut self) -> OneWireResult<StatusBlock, Self::Error>;

    /// Store and write new timing parameters for `speed`.
    fn configure(&mut self, speed: Speed, parameters: ParameterSet) -> OneWireResult<(), Self::Error>;

    /// Run a pulse.
    ///
    /// # Errors
    /// [`OneWireError::ProgramVoltageUnavailable`] for a 12V pulse on an adapter
    /// without program voltage.
    fn pulse(&mut self, kind: PulseKind) -> OneWireResult<bool, Self::Error>;

    /// Discover every remaining device that passes the filters in `state`, using
    /// batched hardware search passes.
    fn search_all(&mut self, state: &mut SearchState) -> OneWireResult<Vec<u64>, Self::Error>;
}

impl<T> Ds2490Control for Session<Ds2490, T>
where
    T: Transport<CommandPacket, Reply = UsbResponse>,
{
    type Error = T::Error;

    fn detect(&mut self) -> OneWireResult<StatusBlock, Self::Error> {
        let slot = self.encoder_mut().initialize();
        let replies = self.transact()?;
        Ok(self.encoder_mut().interpret_initialize(&replies, slot)?)
    }

    fn configure(&mut self, speed: Speed, parameters: ParameterSet) -> OneWireResult<(), Self::Error> {
        self.encoder_mut().configure(speed, parameters);
        self.transact()?;
        Ok(())
    }

    fn pulse(&mut self, kind: PulseKind) -> OneWireResult<bool, Self::Error> {
        if kind == PulseKind::Program12V && !self.state().program_voltage_available() {
            return Err(OneWireError::ProgramVoltageUnavailable);
        }
        let slot = self.encoder_mut().pulse(kind);
        let replies = self.transact()?;
        Ok(self.encoder().interpret_pulse(&replies, slot)?)
    }

    fn search_all(&mut self, state: &mut SearchState) -> OneWireResult<Vec<u64>, Self::Error> {
        let mut found = Vec::new();
        while !state.is_complete() {
            state.prime_family_target();
            let batch = self.encoder().search_batch();
            let slot = self.encoder_mut().search_devices(state, batch);
            let replies = self.transact()?;
            let roms = self.encoder().interpret_search_all(state, &replies, slot)?;
            if roms.is_empty() {
                break;
            }
            found.extend(roms.iter().copied().filter(|rom| state.accepts(rom.family())));
            if !state.accepts(state.rom().family()) {
                state.skip_family();
            }
        }
        Ok(found)
    }
}
