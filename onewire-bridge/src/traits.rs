use alloc::vec::Vec;

use crate::{
    AdapterState, OneWireError, OneWireResult, Packet, ResetOutcome, ResponseError,
    RomId, SearchState, Speed, consts,
};

/// Ordered byte sink / byte source in front of a bridge chip.
///
/// One call is one round trip: the whole packet goes out, then exactly the reply to
/// it comes back. How the bytes travel, and how long to wait for them, is up to the
/// implementation.
pub trait Transport<P> {
    /// What the bridge answers a packet with.
    type Reply;
    /// Error type of the underlying link.
    type Error: core::fmt::Debug;

    /// Send `packet` and return the bridge's reply to it.
    fn exchange(&mut self, packet: &P) -> Result<Self::Reply, Self::Error>;
}

/// Turns abstract bus operations into the command stream of one bridge family,
/// and decodes the bridge's replies.
///
/// Append methods never fail and never perform I/O. Each returns a slot that
/// locates the operation's result in the replies to the packets drained by the next
/// [`take_packets`](BusCommandEncoder::take_packets); the slot must be handed back
/// to the matching `interpret_*` method together with those replies.
pub trait BusCommandEncoder {
    /// Transport-bound unit of work.
    type Packet: Packet;
    /// Reply to one packet.
    type Reply;
    /// Replies to every packet of one drain, in order.
    type Replies: Default;
    /// Location of one operation's result within [`Replies`](BusCommandEncoder::Replies).
    type Slot: Copy + core::fmt::Debug;

    /// Session state of the bridge.
    fn state(&self) -> &AdapterState;

    /// Hand over every packet built so far, in append order.
    fn take_packets(&mut self) -> Vec<Self::Packet>;

    /// Drop every packet built so far.
    fn restart(&mut self);

    /// Check `reply` against what `packet` reserved and add it to `replies`.
    fn accept_reply(
        &self,
        replies: &mut Self::Replies,
        packet: &Self::Packet,
        reply: Self::Reply,
    ) -> Result<(), ResponseError>;

    /// Reset the bus.
    fn reset(&mut self) -> Self::Slot;

    /// Write one byte, reading back what the bus carried.
    fn data_byte(&mut self, byte: u8) -> Self::Slot;

    /// Write a block of bytes, reading back what the bus carried.
    fn data_bytes(&mut self, bytes: &[u8]) -> Self::Slot;

    /// Write one bit, optionally arming the strong pullup once it completes.
    fn data_bit(&mut self, bit: bool, prime_strong_pullup: bool) -> Self::Slot;

    /// Write a byte followed by the strong pullup.
    fn primed_byte(&mut self, byte: u8) -> Self::Slot;

    /// Operations a search pass needs ahead of [`search`](BusCommandEncoder::search).
    ///
    /// Returns the slot of the reset, if one was appended.
    fn search_preamble(&mut self, search: &SearchState) -> Option<Self::Slot>;

    /// One search pass steered by `search`.
    fn search(&mut self, search: &SearchState) -> Self::Slot;

    /// Change bus speed without a reset.
    fn set_speed(&mut self, speed: Speed);

    /// Decode a reset result, learning what the bridge reports about itself.
    fn interpret_reset(
        &mut self,
        replies: &Self::Replies,
        slot: Self::Slot,
    ) -> Result<ResetOutcome, ResponseError>;

    /// Decode a bit result.
    fn interpret_bit(&self, replies: &Self::Replies, slot: Self::Slot) -> Result<bool, ResponseError>;

    /// Decode `out.len()` bytes written with [`data_byte`](BusCommandEncoder::data_byte)
    /// or [`data_bytes`](BusCommandEncoder::data_bytes).
    fn interpret_data_bytes(
        &self,
        replies: &Self::Replies,
        slot: Self::Slot,
        out: &mut [u8],
    ) -> Result<(), ResponseError>;

    /// Decode the byte written with [`primed_byte`](BusCommandEncoder::primed_byte).
    fn interpret_primed_byte(&self, replies: &Self::Replies, slot: Self::Slot) -> Result<u8, ResponseError>;

    /// Fold a search pass into `search`. Returns whether a valid device ID was found.
    fn interpret_search(
        &mut self,
        search: &mut SearchState,
        replies: &Self::Replies,
        slot: Self::Slot,
    ) -> Result<bool, ResponseError>;
}

/// Trait for 1-Wire communication.
/// This trait defines the basic operations required for 1-Wire communication, such as resetting the bus,
/// writing and reading bytes, and writing and reading bits.
pub trait OneWire {
    /// The error type returned by the operations of this trait.
    /// This type is used to indicate errors in the underlying hardware or communication.
    type BusError;

    /// Resets the 1-Wire bus and returns what answered.
    ///
    /// # Errors
    /// This method returns an error if the reset operation fails.
    fn reset(&mut self) -> OneWireResult<ResetOutcome, Self::BusError>;

    /// Writes a byte to the 1-Wire bus.
    /// # Arguments
    /// * `byte` - The byte to write to the bus.
    fn write_byte(&mut self, byte: u8) -> OneWireResult<(), Self::BusError>;

    /// Reads a byte from the 1-Wire bus.
    fn read_byte(&mut self) -> OneWireResult<u8, Self::BusError>;

    /// Writes a block of bytes to the 1-Wire bus.
    fn write_bytes(&mut self, bytes: &[u8]) -> OneWireResult<(), Self::BusError> {
        bytes.iter().try_for_each(|&byte| self.write_byte(byte))
    }

    /// Fills `buf` with bytes read from the 1-Wire bus.
    fn read_bytes(&mut self, buf: &mut [u8]) -> OneWireResult<(), Self::BusError> {
        for byte in buf.iter_mut() {
            *byte = self.read_byte()?;
        }
        Ok(())
    }

    /// Writes a single bit to the 1-Wire bus.
    fn write_bit(&mut self, bit: bool) -> OneWireResult<(), Self::BusError>;

    /// Reads a single bit from the 1-Wire bus.
    fn read_bit(&mut self) -> OneWireResult<bool, Self::BusError>;

    /// Writes a byte and leaves the strong pullup on afterwards, returning the byte
    /// the bus carried.
    fn write_primed_byte(&mut self, _byte: u8) -> OneWireResult<u8, Self::BusError> {
        Err(OneWireError::Unimplemented)
    }

    /// Current bus speed.
    fn speed(&self) -> Speed;

    /// Change the bus speed.
    fn set_speed(&mut self, _speed: Speed) -> OneWireResult<(), Self::BusError> {
        Err(OneWireError::Unimplemented)
    }

    /// Runs one [search ROM pass](https://www.analog.com/en/resources/app-notes/1wire-search-algorithm.html)
    /// steered by `state`, and records the result in it.
    ///
    /// The default implementation clocks the 64 bit pairs one slot at a time: a
    /// `(0, 0)` pair is a discrepancy resolved by [`SearchState::direction`], a
    /// `(1, 1)` pair means nothing answered and aborts the pass.
    ///
    /// # Returns
    /// Whether a valid device ID was found.
    fn search_pass(&mut self, state: &mut SearchState) -> OneWireResult<bool, Self::BusError> {
        if !state.skip_reset() && !self.reset()?.presence() {
            return Ok(false);
        }
        self.write_byte(state.rom_command())?;
        let mut rom = [0u8; 8];
        let mut discrepancies = [0u8; 8];
        for bit in 0..64u8 {
            let idx = (bit / 8) as usize;
            let mask = 1 << (bit % 8);
            let id_bit = self.read_bit()?;
            let complement_bit = self.read_bit()?;
            let set = match (id_bit, complement_bit) {
                // nobody answered
                (true, true) => return Ok(false),
                (false, false) => {
                    discrepancies[idx] |= mask;
                    state.direction(bit)
                }
                (id_bit, _) => id_bit,
            };
            if set {
                rom[idx] |= mask;
            }
            self.write_bit(set)?;
        }
        Ok(state.record_pass(rom, discrepancies))
    }

    /// Addresses devices on the 1-Wire bus.
    /// The first [`OneWire::read_byte`], [`OneWire::read_bit`], [`OneWire::write_byte`], [`OneWire::write_bit`] operation should be preceded by this method to address devices on the bus.
    /// Note: A [`OneWire::read_byte`] or [`OneWire::read_bit`] call will return garbage data if this method is called without specifying a ROM address on a bus with multiple devices.
    /// # Arguments
    /// * `rom` - The ROM address of the device to address. Pass [`None`] to skip ROM addressing and address all devices on the bus.
    ///
    /// # Errors
    /// [`OneWireError::InvalidRomCrc`] if `rom` is not a valid ROM code, before anything
    /// goes on the bus.
    /// [`OneWireError::ShortCircuit`] or [`OneWireError::NoDevicePresent`] if the reset
    /// is not answered by a presence pulse.
    fn address(&mut self, rom: Option<u64>) -> OneWireResult<(), Self::BusError> {
        if rom.is_some_and(|rom| !rom.is_valid()) {
            return Err(OneWireError::InvalidRomCrc);
        }
        let od = self.speed() == Speed::Overdrive;
        let cmd = match (rom.is_some(), od) {
            (true, true) => consts::ONEWIRE_MATCH_ROM_CMD_OD,
            (true, false) => consts::ONEWIRE_MATCH_ROM_CMD,
            (false, true) => consts::ONEWIRE_SKIP_ROM_CMD_OD,
            (false, false) => consts::ONEWIRE_SKIP_ROM_CMD,
        };
        match self.reset()? {
            ResetOutcome::Short => return Err(OneWireError::ShortCircuit),
            ResetOutcome::NoPresence => return Err(OneWireError::NoDevicePresent),
            ResetOutcome::Presence | ResetOutcome::Alarm => {}
        }
        self.write_byte(cmd)?;
        if let Some(rom) = rom {
            self.write_bytes(&rom.to_le_bytes())?;
        }
        Ok(())
    }
}
