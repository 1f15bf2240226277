use alloc::vec::Vec;

use onewire_bridge::{
    AdapterState, BusCommandEncoder, Mode, Packet, RawPacket, ResetOutcome, ResponseError,
    SearchState, Speed, response_window,
};

use crate::{
    Ds2480b,
    codes::{
        COMMAND_MODE, CommCommand, DATA_MODE, ResetResponse, SEARCH_BLOCK_LEN, SPECIAL_MODE,
        bit_response,
    },
};

/// Lay out search directions for the accelerator: ROM bit `i` steers through bit
/// `2i + 1` of the block, LSB first.
pub(crate) fn encode_search_block(directions: &[u8; 8]) -> [u8; SEARCH_BLOCK_LEN] {
    let mut block = [0u8; SEARCH_BLOCK_LEN];
    for bit in 0..64usize {
        if directions[bit / 8] & (1 << (bit % 8)) != 0 {
            block[bit / 4] |= 1 << ((bit % 4) * 2 + 1);
        }
    }
    block
}

/// Split an accelerator reply into the ROM taken and the discrepancy flags.
pub(crate) fn decode_search_block(block: &[u8]) -> ([u8; 8], [u8; 8]) {
    let mut rom = [0u8; 8];
    let mut discrepancies = [0u8; 8];
    for bit in 0..64usize {
        let pair = block[bit / 4] >> ((bit % 4) * 2);
        if pair & 0b01 != 0 {
            discrepancies[bit / 8] |= 1 << (bit % 8);
        }
        if pair & 0b10 != 0 {
            rom[bit / 8] |= 1 << (bit % 8);
        }
    }
    (rom, discrepancies)
}

impl Ds2480b {
    /// Bring the chip into `mode`, appending the switch byte only if needed.
    pub(crate) fn set_mode(&mut self, mode: Mode) {
        if self.state.switch_mode(mode) {
            let byte = match mode {
                Mode::Command => COMMAND_MODE,
                Mode::Data => DATA_MODE,
            };
            self.queue.current_mut().push(byte);
        }
    }

    fn switch_len(&self, mode: Mode) -> usize {
        usize::from(self.state.mode() != mode)
    }

    /// Start a new packet if `needed` more bytes would push the open one past the
    /// size limit.
    pub(crate) fn make_room(&mut self, needed: usize) {
        let len = self.queue.current().len();
        if len > 0 && len + needed > self.max_streamed {
            self.queue.close();
        }
    }

    fn close_unless(&mut self, streaming: bool) {
        if !streaming || self.queue.current().len() >= self.max_streamed {
            self.queue.close();
        }
    }

    /// Data bytes the chip would read as a mode switch.
    pub fn needs_escape(&self, byte: u8) -> bool {
        byte == COMMAND_MODE || (self.state.revision() == 1 && byte == SPECIAL_MODE)
    }

    fn assemble_byte(replies: &[u8], offset: usize) -> Result<u8, ResponseError> {
        let bits = response_window(replies, offset, 8)?;
        Ok(bits
            .iter()
            .enumerate()
            .fold(0u8, |byte, (idx, &b)| byte | (u8::from(bit_response(b)) << idx)))
    }
}

impl BusCommandEncoder for Ds2480b {
    type Packet = RawPacket;
    type Reply = Vec<u8>;
    type Replies = Vec<u8>;
    type Slot = usize;

    fn state(&self) -> &AdapterState {
        &self.state
    }

    fn take_packets(&mut self) -> Vec<RawPacket> {
        let packets = self.queue.take();
        for packet in &packets {
            log::trace!("ds2480b tx {:02x?}", packet.buffer());
        }
        packets
    }

    fn restart(&mut self) {
        self.queue.restart();
    }

    fn accept_reply(
        &self,
        replies: &mut Vec<u8>,
        packet: &RawPacket,
        reply: Vec<u8>,
    ) -> Result<(), ResponseError> {
        log::trace!("ds2480b rx {reply:02x?}");
        if reply.len() != packet.expected_response_len() {
            return Err(ResponseError::LengthMismatch {
                expected: packet.expected_response_len(),
                received: reply.len(),
            });
        }
        replies.extend_from_slice(&reply);
        Ok(())
    }

    fn reset(&mut self) -> usize {
        self.make_room(self.switch_len(Mode::Command) + 1);
        self.set_mode(Mode::Command);
        let speed = self.state.speed();
        self.queue.current_mut().push(CommCommand::reset(speed));
        let slot = self.queue.reserve(1);
        if !self.state.streaming().resets {
            self.queue.close();
        }
        if self.state.long_alarm_check() && matches!(speed, Speed::Regular | Speed::Flex) {
            // give the chip time for the extended alarm presence check
            self.queue.close();
        } else if self.queue.current().len() >= self.max_streamed {
            self.queue.close();
        }
        slot
    }

    fn data_byte(&mut self, byte: u8) -> usize {
        if self.bits_only {
            let first = self.data_bit(byte & 1 != 0, false);
            for idx in 1..8 {
                self.data_bit((byte >> idx) & 1 != 0, false);
            }
            return first;
        }
        let escaped = self.needs_escape(byte);
        self.make_room(self.switch_len(Mode::Data) + 1 + usize::from(escaped));
        self.set_mode(Mode::Data);
        let packet = self.queue.current_mut();
        packet.push(byte);
        if escaped {
            packet.push(byte);
        }
        let slot = self.queue.reserve(1);
        self.close_unless(self.state.streaming().bytes);
        slot
    }

    fn data_bytes(&mut self, bytes: &[u8]) -> usize {
        let first = self.queue.total_response_len();
        for &byte in bytes {
            self.data_byte(byte);
        }
        first
    }

    fn data_bit(&mut self, bit: bool, prime_strong_pullup: bool) -> usize {
        self.make_room(self.switch_len(Mode::Command) + 1);
        self.set_mode(Mode::Command);
        let cmd = CommCommand::bit(self.state.speed(), bit, prime_strong_pullup);
        self.queue.current_mut().push(cmd);
        let slot = self.queue.reserve(1);
        self.close_unless(self.state.streaming().bits);
        slot
    }

    fn primed_byte(&mut self, byte: u8) -> usize {
        let first = self.data_bit(byte & 1 != 0, false);
        for idx in 1..8 {
            self.data_bit((byte >> idx) & 1 != 0, idx == 7);
        }
        first
    }

    fn search_preamble(&mut self, search: &SearchState) -> Option<usize> {
        let reset = (!search.skip_reset()).then(|| BusCommandEncoder::reset(self));
        self.data_byte(search.rom_command());
        reset
    }

    fn search(&mut self, search: &SearchState) -> usize {
        // accelerator on, data mode, block, command mode, accelerator off
        self.make_room(self.switch_len(Mode::Command) + SEARCH_BLOCK_LEN + 4);
        let speed = self.state.speed();
        self.set_mode(Mode::Command);
        self.queue
            .current_mut()
            .push(CommCommand::accelerator(speed, true));
        self.set_mode(Mode::Data);
        // direction bits sit at odd positions, so the block never needs escaping
        let block = encode_search_block(&search.direction_bits());
        self.queue.current_mut().extend_from_slice(&block);
        self.set_mode(Mode::Command);
        self.queue
            .current_mut()
            .push(CommCommand::accelerator(speed, false));
        let slot = self.queue.reserve(SEARCH_BLOCK_LEN);
        self.close_unless(self.state.streaming().searches);
        slot
    }

    fn set_speed(&mut self, speed: Speed) {
        self.make_room(self.switch_len(Mode::Command) + 1);
        self.set_mode(Mode::Command);
        self.state.switch_speed(speed);
        self.queue
            .current_mut()
            .push(CommCommand::accelerator(speed, false));
    }

    fn interpret_reset(&mut self, replies: &Vec<u8>, slot: usize) -> Result<ResetOutcome, ResponseError> {
        let byte = response_window(replies, slot, 1)?[0];
        let response = ResetResponse::from_bits(byte);
        let outcome = if response.is_well_formed() {
            self.state
                .record_identity(response.revision(), response.program_voltage());
            response.outcome()
        } else {
            log::debug!("malformed reset response {byte:#04x}");
            ResetOutcome::NoPresence
        };
        self.state.record_reset(outcome);
        Ok(outcome)
    }

    fn interpret_bit(&self, replies: &Vec<u8>, slot: usize) -> Result<bool, ResponseError> {
        Ok(bit_response(response_window(replies, slot, 1)?[0]))
    }

    fn interpret_data_bytes(
        &self,
        replies: &Vec<u8>,
        slot: usize,
        out: &mut [u8],
    ) -> Result<(), ResponseError> {
        if self.bits_only {
            for (idx, byte) in out.iter_mut().enumerate() {
                *byte = Self::assemble_byte(replies, slot + 8 * idx)?;
            }
        } else {
            out.copy_from_slice(response_window(replies, slot, out.len())?);
        }
        Ok(())
    }

    fn interpret_primed_byte(&self, replies: &Vec<u8>, slot: usize) -> Result<u8, ResponseError> {
        Self::assemble_byte(replies, slot)
    }

    fn interpret_search(
        &mut self,
        search: &mut SearchState,
        replies: &Vec<u8>,
        slot: usize,
    ) -> Result<bool, ResponseError> {
        let block = response_window(replies, slot, SEARCH_BLOCK_LEN)?;
        let (rom, discrepancies) = decode_search_block(block);
        Ok(search.record_pass(rom, discrepancies))
    }
}
