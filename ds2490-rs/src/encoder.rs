use alloc::vec::Vec;

use onewire_bridge::{
    AdapterState, BusCommandEncoder, Packet, ResetOutcome, ResponseError, RomId, SearchState,
    Speed, response_window,
};

use crate::{
    Ds2490,
    commands::{
        CommandPacket, DATA_BUFFER_LEN, RequestType, UsbCommand, comm, mode, speed_code,
    },
    registers::{ResultCode, StatusBlock, reset_outcome},
};

/// What the transport collected for one packet: the status notification read from
/// the interrupt endpoint once the adapter went idle, and everything the bulk IN
/// endpoint delivered.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UsbResponse {
    /// Status block followed by result codes.
    pub status: Vec<u8>,
    /// Bus data.
    pub data: Vec<u8>,
}

/// Decoded reply to one packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbReply {
    /// Adapter status once the packet ran.
    pub status: StatusBlock,
    /// Result codes, device-detect markers removed.
    pub results: Vec<ResultCode>,
    /// Search data, for a packet that ended with a search.
    pub search_data: Vec<u8>,
    search_limit: Option<u8>,
}

/// Replies to every packet of one drain.
///
/// Fixed-length bus data is concatenated in `data`; search data stays with its
/// packet because its length is only known once the search ran.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UsbReplies {
    data: Vec<u8>,
    packets: Vec<UsbReply>,
}

impl UsbReplies {
    /// Concatenated fixed-length bus data.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Decoded reply to the packet at `index`.
    pub fn packet(&self, index: usize) -> Result<&UsbReply, ResponseError> {
        self.packets.get(index).ok_or(ResponseError::Truncated {
            offset: index,
            needed: 1,
            len: self.packets.len(),
        })
    }

    /// Decoded reply to the last packet.
    pub fn last(&self) -> Option<&UsbReply> {
        self.packets.last()
    }
}

/// Location of an operation's result: the packet it closed or ran in, and the
/// offset of its bus data in [`UsbReplies::data`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbSlot {
    /// Packet index within one drain.
    pub packet: usize,
    /// Offset into the concatenated bus data.
    pub offset: usize,
}

/// ROM IDs and discrepancy bitmap of a search reply.
fn search_reply(replies: &UsbReplies, slot: UsbSlot) -> Result<Option<(Vec<[u8; 8]>, [u8; 8])>, ResponseError> {
    let reply = replies.packet(slot.packet)?;
    if reply.results.iter().any(|r| r.no_presence() || r.short()) {
        log::debug!("search pass: no presence");
        return Ok(None);
    }
    let limit = usize::from(reply.search_limit.unwrap_or(1));
    let data = &reply.search_data;
    let (roms, bitmap) = if data.len() == 8 * (limit + 1) {
        let (roms, bitmap) = data.split_at(8 * limit);
        let mut map = [0u8; 8];
        map.copy_from_slice(bitmap);
        (roms, map)
    } else {
        // the adapter found every remaining device
        (&data[..], [0u8; 8])
    };
    let roms = roms
        .chunks_exact(8)
        .map(|chunk| {
            let mut rom = [0u8; 8];
            rom.copy_from_slice(chunk);
            rom
        })
        .collect::<Vec<_>>();
    if roms.is_empty() {
        log::debug!("search pass: nothing found");
        return Ok(None);
    }
    Ok(Some((roms, bitmap)))
}

impl Ds2490 {
    /// Close the open packet if a command reading `response` bytes would overflow the
    /// FIFO or the read buffer. An empty packet is never closed.
    pub(crate) fn make_room(&mut self, response: usize) {
        let current = self.queue.current();
        if current.len() == 0 {
            return;
        }
        if current.len() >= self.max_commands || current.response_len() + response > DATA_BUFFER_LEN {
            self.queue.close();
        }
    }

    /// Append a command that reads back `response` bytes of bus data.
    pub(crate) fn append(&mut self, command: UsbCommand, response: usize) -> UsbSlot {
        self.make_room(response);
        self.queue.current_mut().push(command);
        let packet = self.queue.packet_index();
        let offset = self.queue.reserve(response);
        UsbSlot { packet, offset }
    }

    /// Append a command whose result codes must be read on their own.
    pub(crate) fn append_closing(&mut self, command: UsbCommand) -> UsbSlot {
        let slot = self.append(command, 0);
        self.queue.close();
        slot
    }

    /// One hardware search pass returning up to `limit` devices.
    ///
    /// The pass starts from the path in `search`; with a limit above one the adapter
    /// continues the enumeration on its own and reports where it stopped.
    pub fn search_devices(&mut self, search: &SearchState, limit: u8) -> UsbSlot {
        let limit = limit.max(1);
        if !self.queue.current().is_empty() {
            self.queue.close();
        }
        let mut value = comm::SEARCH_ACCESS | comm::IM | comm::TYPE | comm::F | comm::RTS;
        if !search.skip_reset() {
            value |= comm::RST;
        }
        let index = u16::from(search.rom_command()) | (u16::from(limit) << 8);
        let command = UsbCommand::with_payload(RequestType::Comm, value, index, &search.direction_bits());
        let packet = self.queue.packet_index();
        let offset = self.queue.total_response_len();
        let current = self.queue.current_mut();
        current.push(command);
        current.mark_search(limit);
        // not part of the concatenated data stream
        current.reserve_response(8 * (usize::from(limit) + 1));
        self.queue.close();
        UsbSlot { packet, offset }
    }

    /// Fold a batched search pass into `search`, returning every ROM it found.
    ///
    /// The state only moves forward if every ROM is a valid device ID; otherwise the
    /// result is empty and the next pass repeats this one.
    pub fn interpret_search_all(
        &self,
        search: &mut SearchState,
        replies: &UsbReplies,
        slot: UsbSlot,
    ) -> Result<Vec<u64>, ResponseError> {
        let Some((roms, bitmap)) = search_reply(replies, slot)? else {
            return Ok(Vec::new());
        };
        let last = roms[roms.len() - 1];
        if !roms.iter().all(RomId::is_valid) || !search.record_pass(last, bitmap) {
            return Ok(Vec::new());
        }
        Ok(roms.into_iter().map(u64::from_le_bytes).collect())
    }
}

impl BusCommandEncoder for Ds2490 {
    type Packet = CommandPacket;
    type Reply = UsbResponse;
    type Replies = UsbReplies;
    type Slot = UsbSlot;

    fn state(&self) -> &AdapterState {
        &self.state
    }

    fn take_packets(&mut self) -> Vec<CommandPacket> {
        self.queue.take()
    }

    fn restart(&mut self) {
        self.queue.restart();
    }

    fn accept_reply(
        &self,
        replies: &mut UsbReplies,
        packet: &CommandPacket,
        reply: UsbResponse,
    ) -> Result<(), ResponseError> {
        let (status, results) = StatusBlock::parse(&reply.status)?;
        let expected = packet.expected_response_len();
        let received = reply.data.len();
        let search_limit = packet.search_limit();
        let fits = match search_limit {
            Some(_) => received % 8 == 0 && received <= expected,
            None => received == expected,
        };
        if !fits {
            return Err(ResponseError::LengthMismatch { expected, received });
        }
        log::trace!("reply: {received} bytes, {} result codes", results.len());
        let search_data = match search_limit {
            Some(_) => reply.data,
            None => {
                replies.data.extend_from_slice(&reply.data);
                Vec::new()
            }
        };
        replies.packets.push(UsbReply {
            status,
            results,
            search_data,
            search_limit,
        });
        Ok(())
    }

    fn reset(&mut self) -> UsbSlot {
        let value = comm::ONEWIRE_RESET | comm::IM | comm::F | comm::TYPE;
        let command = UsbCommand::new(RequestType::Comm, value, speed_code(self.state.speed()));
        self.append_closing(command)
    }

    fn data_byte(&mut self, byte: u8) -> UsbSlot {
        self.append(
            UsbCommand::new(RequestType::Comm, comm::BYTE_IO | comm::IM, u16::from(byte)),
            1,
        )
    }

    fn data_bytes(&mut self, bytes: &[u8]) -> UsbSlot {
        if bytes.len() == 1 {
            return self.data_byte(bytes[0]);
        }
        let mut first = None;
        for chunk in bytes.chunks(DATA_BUFFER_LEN) {
            let command = UsbCommand::with_payload(
                RequestType::Comm,
                comm::BLOCK_IO | comm::IM,
                chunk.len() as u16,
                chunk,
            );
            let slot = self.append(command, chunk.len());
            if first.is_none() {
                first = Some(slot);
            }
        }
        first.unwrap_or(UsbSlot {
            packet: self.queue.packet_index(),
            offset: self.queue.total_response_len(),
        })
    }

    fn data_bit(&mut self, bit: bool, prime_strong_pullup: bool) -> UsbSlot {
        let mut value = comm::BIT_IO | comm::IM;
        if bit {
            value |= comm::TYPE;
        }
        if prime_strong_pullup {
            value |= comm::SPU;
        }
        self.append(UsbCommand::new(RequestType::Comm, value, 0), 1)
    }

    fn primed_byte(&mut self, byte: u8) -> UsbSlot {
        self.append(
            UsbCommand::new(
                RequestType::Comm,
                comm::BYTE_IO | comm::IM | comm::SPU,
                u16::from(byte),
            ),
            1,
        )
    }

    fn search_preamble(&mut self, _search: &SearchState) -> Option<UsbSlot> {
        // SEARCH_ACCESS resets the bus itself
        None
    }

    fn search(&mut self, search: &SearchState) -> UsbSlot {
        self.search_devices(search, 1)
    }

    fn set_speed(&mut self, speed: Speed) {
        self.state.switch_speed(speed);
        self.append(
            UsbCommand::new(RequestType::Mode, mode::ONEWIRE_SPEED, speed_code(speed)),
            0,
        );
    }

    fn interpret_reset(&mut self, replies: &UsbReplies, slot: UsbSlot) -> Result<ResetOutcome, ResponseError> {
        let reply = replies.packet(slot.packet)?;
        self.state.record_program_voltage(reply.status.flags.program_voltage());
        let outcome = reset_outcome(&reply.results);
        self.state.record_reset(outcome);
        Ok(outcome)
    }

    fn interpret_bit(&self, replies: &UsbReplies, slot: UsbSlot) -> Result<bool, ResponseError> {
        Ok(response_window(&replies.data, slot.offset, 1)?[0] & 0x01 != 0)
    }

    fn interpret_data_bytes(&self, replies: &UsbReplies, slot: UsbSlot, out: &mut [u8]) -> Result<(), ResponseError> {
        out.copy_from_slice(response_window(&replies.data, slot.offset, out.len())?);
        Ok(())
    }

    fn interpret_primed_byte(&self, replies: &UsbReplies, slot: UsbSlot) -> Result<u8, ResponseError> {
        Ok(response_window(&replies.data, slot.offset, 1)?[0])
    }

    fn interpret_search(
        &mut self,
        search: &mut SearchState,
        replies: &UsbReplies,
        slot: UsbSlot,
    ) -> Result<bool, ResponseError> {
        Ok(!self.interpret_search_all(search, replies, slot)?.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use onewire_bridge::OneWireCrc;

    fn status(results: &[u8]) -> Vec<u8> {
        let mut bytes = vec![0u8; 16];
        bytes[8] = 0x20;
        bytes.extend_from_slice(results);
        bytes
    }

    fn rom(family: u8, serial: u8) -> [u8; 8] {
        let mut rom = [family, serial, 0, 0, 0, 0, 0, 0];
        rom[7] = OneWireCrc::compute(&rom[..7]);
        rom
    }

    fn accept_all(enc: &Ds2490, packets: &[CommandPacket], responses: Vec<UsbResponse>) -> UsbReplies {
        let mut replies = UsbReplies::default();
        for (packet, response) in packets.iter().zip(responses) {
            enc.accept_reply(&mut replies, packet, response).unwrap();
        }
        replies
    }

    #[test]
    fn reset_closes_packet_and_carries_speed() {
        let mut enc = Ds2490::new();
        enc.set_speed(Speed::Overdrive);
        let reset = enc.reset();
        let byte = enc.data_byte(0xcc);
        let packets = enc.take_packets();
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].commands().len(), 2);
        let cmd = &packets[0].commands()[1];
        assert_eq!(cmd.request, RequestType::Comm);
        assert_eq!(cmd.value, 0x0842 | 0x0001 | 0x0008);
        assert_eq!(cmd.index, 2);
        assert_eq!(reset, UsbSlot { packet: 0, offset: 0 });
        assert_eq!(byte, UsbSlot { packet: 1, offset: 0 });

        let replies = accept_all(
            &enc,
            &packets,
            vec![
                UsbResponse { status: status(&[0x04]), data: vec![] },
                UsbResponse { status: status(&[]), data: vec![0xcc] },
            ],
        );
        assert_eq!(enc.interpret_reset(&replies, reset).unwrap(), ResetOutcome::Alarm);
        assert!(enc.state().long_alarm_check());
        let mut echo = [0u8];
        enc.interpret_data_bytes(&replies, byte, &mut echo).unwrap();
        assert_eq!(echo, [0xcc]);
    }

    #[test]
    fn fifo_depth_splits_packets() {
        let mut enc = crate::Ds2490Builder::default().with_max_commands(4).build();
        let slots: Vec<_> = (0..10u8).map(|b| enc.data_bit(b % 2 == 0, false)).collect();
        let packets = enc.take_packets();
        assert_eq!(packets.iter().map(|p| p.commands().len()).collect::<Vec<_>>(), [4, 4, 2]);
        assert_eq!(slots[9], UsbSlot { packet: 2, offset: 9 });
        assert_eq!(packets[0].commands()[0].value, 0x0029);
        assert_eq!(packets[0].commands()[1].value, 0x0021);
    }

    #[test]
    fn blocks_split_at_read_buffer() {
        let mut enc = Ds2490::new();
        let data: Vec<u8> = (0..300u16).map(|v| v as u8).collect();
        let slot = enc.data_bytes(&data);
        let packets = enc.take_packets();
        assert_eq!(packets.len(), 3);
        assert_eq!(packets.iter().map(|p| p.expected_response_len()).collect::<Vec<_>>(), [128, 128, 44]);
        let first = &packets[0].commands()[0];
        assert_eq!(first.value, 0x0075);
        assert_eq!(first.index, 128);
        assert_eq!(first.payload.as_deref(), Some(&data[..128]));

        let responses = packets
            .iter()
            .map(|p| UsbResponse {
                status: status(&[]),
                data: p.commands().iter().flat_map(|c| c.payload.clone().unwrap_or_default()).collect(),
            })
            .collect();
        let replies = accept_all(&enc, &packets, responses);
        let mut echo = vec![0u8; 300];
        enc.interpret_data_bytes(&replies, slot, &mut echo).unwrap();
        assert_eq!(echo, data);
    }

    #[test]
    fn wrong_length_is_rejected() {
        let mut enc = Ds2490::new();
        enc.data_bytes(&[1, 2, 3]);
        let packets = enc.take_packets();
        let mut replies = UsbReplies::default();
        let err = enc
            .accept_reply(&mut replies, &packets[0], UsbResponse { status: status(&[]), data: vec![1, 2] })
            .unwrap_err();
        assert_eq!(err, ResponseError::LengthMismatch { expected: 3, received: 2 });
        let err = enc
            .accept_reply(&mut replies, &packets[0], UsbResponse { status: vec![0; 4], data: vec![1, 2, 3] })
            .unwrap_err();
        assert_eq!(err, ResponseError::MalformedStatus(4));
    }

    #[test]
    fn search_command_layout() {
        let mut enc = Ds2490::new();
        enc.data_byte(0x00);
        let mut state = SearchState::new().with_alarm_only(true);
        state.prepare_verify(u64::from_le_bytes(rom(0x28, 7)));
        let slot = enc.search(&state);
        let packets = enc.take_packets();
        assert_eq!(packets.len(), 2);
        assert_eq!(slot, UsbSlot { packet: 1, offset: 1 });
        let cmd = &packets[1].commands()[0];
        assert_eq!(cmd.value, 0x00f4 | 0x0001 | 0x0008 | 0x0800 | 0x4000 | 0x0100);
        assert_eq!(cmd.index, 0x01ec);
        assert_eq!(cmd.payload.as_deref(), Some(&rom(0x28, 7)[..]));
        assert_eq!(packets[1].search_limit(), Some(1));
        assert_eq!(packets[1].expected_response_len(), 16);
    }

    #[test]
    fn search_bitmap_sets_next_branch() {
        let mut enc = Ds2490::new();
        let mut state = SearchState::new();
        let slot = enc.search(&state);
        let packets = enc.take_packets();
        let found = rom(0x10, 0x00);
        let mut data = found.to_vec();
        // discrepancies at bits 3 (family) and 9
        data.extend_from_slice(&[0x08, 0x02, 0, 0, 0, 0, 0, 0]);
        let replies = accept_all(&enc, &packets, vec![UsbResponse { status: status(&[]), data }]);
        assert!(enc.interpret_search(&mut state, &replies, slot).unwrap());
        assert_eq!(state.rom_bytes(), &found);
        assert_eq!(state.last_discrepancy(), Some(9));
        assert_eq!(state.last_family_discrepancy(), Some(3));
        assert!(!state.is_complete());
    }

    #[test]
    fn search_without_bitmap_completes() {
        let mut enc = Ds2490::new();
        let mut state = SearchState::new();
        let slot = enc.search(&state);
        let packets = enc.take_packets();
        let replies = accept_all(&enc, &packets, vec![UsbResponse { status: status(&[]), data: rom(0x28, 1).to_vec() }]);
        assert!(enc.interpret_search(&mut state, &replies, slot).unwrap());
        assert!(state.is_complete());
        assert_eq!(state.last_family_discrepancy(), None);
    }

    #[test]
    fn search_no_presence() {
        let mut enc = Ds2490::new();
        let mut state = SearchState::new();
        let slot = enc.search(&state);
        let packets = enc.take_packets();
        let replies = accept_all(&enc, &packets, vec![UsbResponse { status: status(&[0x01]), data: vec![] }]);
        assert!(!enc.interpret_search(&mut state, &replies, slot).unwrap());
        assert!(state.is_first());
    }

    #[test]
    fn batched_search_returns_every_rom() {
        let mut enc = Ds2490::new();
        let mut state = SearchState::new();
        let slot = enc.search_devices(&state, 3);
        let packets = enc.take_packets();
        assert_eq!(packets[0].commands()[0].index, 0x03f0);
        let roms = [rom(0x10, 1), rom(0x28, 2)];
        let data = roms.concat();
        let replies = accept_all(&enc, &packets, vec![UsbResponse { status: status(&[0x80]), data }]);
        let found = enc.interpret_search_all(&mut state, &replies, slot).unwrap();
        assert_eq!(found, roms.map(u64::from_le_bytes));
        assert!(state.is_complete());
        assert_eq!(state.rom_bytes(), &roms[1]);
    }

    #[test]
    fn batched_search_rejects_invalid_rom() {
        let mut enc = Ds2490::new();
        let mut state = SearchState::new();
        let slot = enc.search_devices(&state, 2);
        let packets = enc.take_packets();
        let mut bad = rom(0x28, 2);
        bad[7] ^= 0xff;
        let data = [rom(0x10, 1), bad].concat();
        let replies = accept_all(&enc, &packets, vec![UsbResponse { status: status(&[]), data }]);
        assert!(enc.interpret_search_all(&mut state, &replies, slot).unwrap().is_empty());
        assert!(state.is_first());
    }
}
