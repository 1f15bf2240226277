use alloc::vec::Vec;

use onewire_bridge::{
    BusCommandEncoder, Mode, OneWireError, OneWireResult, ParameterSet, RawPacket, ResponseError,
    Session, Speed, Transport, response_window,
};

use crate::{
    Ds2480b,
    codes::{BaudRate, CommCommand, ConfigCommand, Parameter, PulseKind, STOP_PULSE, bit_response},
};

/// Location and command byte of a parameter write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParameterSlot {
    offset: usize,
    command: u8,
}

/// Reply locations of the [`Ds2480b::initialize`] sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitializeSlots {
    parameters: [ParameterSlot; 3],
    baud: usize,
    verify: usize,
}

impl Ds2480b {
    /// Write a configuration parameter.
    pub fn set_parameter(&mut self, parameter: Parameter, value: u8) -> ParameterSlot {
        self.make_room(2);
        self.set_mode(Mode::Command);
        let command = ConfigCommand::write(parameter, value);
        self.queue.current_mut().push(command);
        ParameterSlot {
            offset: self.queue.reserve(1),
            command,
        }
    }

    /// Read back a configuration parameter.
    pub fn get_parameter(&mut self, parameter: Parameter) -> usize {
        self.make_room(2);
        self.set_mode(Mode::Command);
        self.queue
            .current_mut()
            .push(ConfigCommand::read(parameter));
        self.queue.reserve(1)
    }

    /// Write the timing parameters stored for `speed`.
    pub fn apply_parameters(&mut self, speed: Speed) -> [ParameterSlot; 5] {
        let set = *self.state.parameters(speed);
        [
            self.set_parameter(Parameter::SlewRate, set.slew_rate as u8),
            self.set_parameter(Parameter::Pulse12V, set.pulse_12v as u8),
            self.set_parameter(Parameter::Pulse5V, set.pulse_5v as u8),
            self.set_parameter(Parameter::Write1Low, set.write_one_low as u8),
            self.set_parameter(Parameter::SampleOffset, set.sample_offset as u8),
        ]
    }

    /// Store and write new timing parameters for `speed`.
    pub fn configure(&mut self, speed: Speed, parameters: ParameterSet) -> [ParameterSlot; 5] {
        self.state.set_parameters(speed, parameters);
        self.apply_parameters(speed)
    }

    /// Synchronize with a chip that just came out of a power-up or a serial break.
    ///
    /// Drops anything queued. The first packet is the lone timing byte the chip
    /// calibrates its baud rate on and does not answer. The second writes the flex
    /// timing, reads back the baud rate and clocks one bit.
    pub fn initialize(&mut self) -> InitializeSlots {
        self.queue.restart();
        self.state.switch_mode(Mode::Command);
        self.state.switch_speed(Speed::Regular);
        self.queue
            .current_mut()
            .push(CommCommand::reset(Speed::Regular));
        self.queue.close();
        let flex = *self.state.parameters(Speed::Flex);
        let parameters = [
            self.set_parameter(Parameter::SlewRate, flex.slew_rate as u8),
            self.set_parameter(Parameter::Write1Low, flex.write_one_low as u8),
            self.set_parameter(Parameter::SampleOffset, flex.sample_offset as u8),
        ];
        let baud = self.get_parameter(Parameter::Baud);
        let verify = self.data_bit(true, false);
        self.queue.close();
        InitializeSlots {
            parameters,
            baud,
            verify,
        }
    }

    /// Start a pulse. The chip answers once the pulse ends.
    pub fn pulse(&mut self, kind: PulseKind) -> usize {
        self.make_room(2);
        self.set_mode(Mode::Command);
        self.queue.current_mut().push(CommCommand::pulse(kind));
        self.queue.reserve(1)
    }

    /// Terminate a running pulse or an armed strong pullup.
    pub fn stop_pulse(&mut self) {
        self.make_room(2);
        self.set_mode(Mode::Command);
        self.queue.current_mut().push(STOP_PULSE);
    }

    /// `true` if the chip echoed the parameter write.
    pub fn interpret_parameter_set(
        &self,
        replies: &[u8],
        slot: ParameterSlot,
    ) -> Result<bool, ResponseError> {
        Ok(response_window(replies, slot.offset, 1)?[0] == slot.command & !0x01)
    }

    /// Value code of a parameter read, or `None` for a malformed reply.
    pub fn interpret_parameter_get(&self, replies: &[u8], slot: usize) -> Result<Option<u8>, ResponseError> {
        let byte = response_window(replies, slot, 1)?[0];
        if byte & 0xf1 != 0 {
            log::debug!("malformed parameter read reply {byte:#04x}");
            return Ok(None);
        }
        Ok(Some(ConfigCommand::from_bits(byte).value()))
    }

    /// `true` if the chip reported the end of a pulse.
    pub fn interpret_pulse(&self, replies: &[u8], slot: usize) -> Result<bool, ResponseError> {
        Ok(response_window(replies, slot, 1)?[0] & 0xe0 == 0xe0)
    }

    /// `true` if the chip answered the initialization sequence like a DS2480B at
    /// 9600 bps.
    pub fn interpret_initialize(
        &self,
        replies: &[u8],
        slots: &InitializeSlots,
    ) -> Result<bool, ResponseError> {
        for slot in slots.parameters {
            if !self.interpret_parameter_set(replies, slot)? {
                return Ok(false);
            }
        }
        if self.interpret_parameter_get(replies, slots.baud)? != Some(BaudRate::Baud9600 as u8) {
            return Ok(false);
        }
        let bit = response_window(replies, slots.verify, 1)?[0];
        Ok(bit & 0xf0 == 0x90 && bit_response(bit))
    }
}

/// DS2480B operations beyond the [`OneWire`](onewire_bridge::OneWire) set, run as one
/// round trip each.
pub trait Ds2480bControl {
    /// Error type of the transport.
    type Error;

    /// Synchronize with the chip and check it answers like a DS2480B.
    fn detect(&mut self) -> OneWireResult<bool, Self::Error>;

    /// Store and write new timing parameters for `speed`. Returns whether every write
    /// was echoed.
    fn configure(&mut self, speed: Speed, parameters: ParameterSet) -> OneWireResult<bool, Self::Error>;

    /// Read a configuration parameter value code.
    fn read_parameter(&mut self, parameter: Parameter) -> OneWireResult<Option<u8>, Self::Error>;

    /// Run a pulse and wait for it to end.
    ///
    /// # Errors
    /// [`OneWireError::ProgramVoltageUnavailable`] for a 12V pulse on a chip that did
    /// not report program voltage at its last reset.
    fn pulse(&mut self, kind: PulseKind) -> OneWireResult<bool, Self::Error>;

    /// Terminate a running strong pullup.
    fn stop_pulse(&mut self) -> OneWireResult<(), Self::Error>;
}

impl<T> Ds2480bControl for Session<Ds2480b, T>
where
    T: Transport<RawPacket, Reply = Vec<u8>>,
{
    type Error = T::Error;

    fn detect(&mut self) -> OneWireResult<bool, Self::Error> {
        let slots = self.encoder_mut().initialize();
        let replies = self.transact()?;
        let found = self.encoder().interpret_initialize(&replies, &slots)?;
        log::debug!("ds2480b detected: {found}");
        Ok(found)
    }

    fn configure(&mut self, speed: Speed, parameters: ParameterSet) -> OneWireResult<bool, Self::Error> {
        let slots = self.encoder_mut().configure(speed, parameters);
        let replies = self.transact()?;
        for slot in slots {
            if !self.encoder().interpret_parameter_set(&replies, slot)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn read_parameter(&mut self, parameter: Parameter) -> OneWireResult<Option<u8>, Self::Error> {
        let slot = self.encoder_mut().get_parameter(parameter);
        let replies = self.transact()?;
        Ok(self.encoder().interpret_parameter_get(&replies, slot)?)
    }

    fn pulse(&mut self, kind: PulseKind) -> OneWireResult<bool, Self::Error> {
        if kind == PulseKind::Program12V && !self.state().program_voltage_available() {
            return Err(OneWireError::ProgramVoltageUnavailable);
        }
        let slot = self.encoder_mut().pulse(kind);
        let replies = self.transact()?;
        Ok(self.encoder().interpret_pulse(&replies, slot)?)
    }

    fn stop_pulse(&mut self) -> OneWireResult<(), Self::Error> {
        self.encoder_mut().stop_pulse();
        self.transact()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use onewire_bridge::Packet;

    #[test]
    fn initialize_sequence() {
        let mut enc = Ds2480b::new();
        enc.data_byte(0x55);
        let slots = enc.initialize();
        let packets = enc.take_packets();
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].buffer(), &[0xc1]);
        assert_eq!(packets[0].expected_response_len(), 0);
        assert_eq!(packets[1].buffer(), &[0x17, 0x45, 0x5b, 0x0f, 0x91]);
        assert_eq!(packets[1].expected_response_len(), 5);

        let replies = [0x16, 0x44, 0x5a, 0x00, 0x93];
        assert!(enc.interpret_initialize(&replies, &slots).unwrap());
        let wrong_baud = [0x16, 0x44, 0x5a, 0x02, 0x93];
        assert!(!enc.interpret_initialize(&wrong_baud, &slots).unwrap());
        let no_echo = [0x17, 0x44, 0x5a, 0x00, 0x93];
        assert!(!enc.interpret_initialize(&no_echo, &slots).unwrap());
    }

    #[test]
    fn pulse_and_stop() {
        let mut enc = Ds2480b::new();
        let slot = enc.pulse(PulseKind::StrongPullup5V);
        enc.stop_pulse();
        let packets = enc.take_packets();
        assert_eq!(packets[0].buffer(), &[0xed, 0xf1]);
        assert_eq!(packets[0].response_len(), 1);
        assert!(enc.interpret_pulse(&[0xec], slot).unwrap());
    }

    #[test]
    fn parameter_writes_follow_speed_set() {
        let mut enc = Ds2480b::new();
        let slots = enc.apply_parameters(Speed::Regular);
        let packets = enc.take_packets();
        assert_eq!(packets[0].buffer(), &[0x11, 0x29, 0x39, 0x41, 0x51]);
        let echoes: Vec<u8> = packets[0].buffer().iter().map(|b| b & !1).collect();
        for slot in slots {
            assert!(enc.interpret_parameter_set(&echoes, slot).unwrap());
        }
    }
}
