use alloc::{vec, vec::Vec};

use crate::{
    AdapterState, BusCommandEncoder, OneWire, OneWireError, OneWireResult, Packet, ResetOutcome,
    SearchState, Speed, Transport,
};

/// A bridge encoder bound to the transport that reaches the chip.
///
/// Every [`OneWire`] call appends its operations, drains the packets through the
/// transport one round trip at a time, and decodes the replies. A session is one
/// logical owner of the bus: share it between threads through
/// [`ExclusiveBus`](crate::ExclusiveBus).
#[derive(Debug)]
pub struct Session<E, T> {
    encoder: E,
    transport: T,
}

impl<E, T> Session<E, T>
where
    E: BusCommandEncoder,
    T: Transport<E::Packet, Reply = E::Reply>,
{
    /// Bind an encoder to a transport.
    pub fn new(encoder: E, transport: T) -> Self {
        Self { encoder, transport }
    }

    /// The encoder, for appending bridge-specific operations.
    pub fn encoder(&self) -> &E {
        &self.encoder
    }

    /// Mutable access to the encoder.
    pub fn encoder_mut(&mut self) -> &mut E {
        &mut self.encoder
    }

    /// Mutable access to the transport.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Release the encoder and the transport.
    pub fn into_parts(self) -> (E, T) {
        (self.encoder, self.transport)
    }

    /// Session state of the bridge.
    pub fn state(&self) -> &AdapterState {
        self.encoder.state()
    }

    /// Send every pending packet and collect the replies.
    ///
    /// Packets go out strictly in order, each after the reply to the previous one
    /// was received. A transport fault or a reply of the wrong length aborts the
    /// drain; packets not yet sent are dropped.
    pub fn transact(&mut self) -> OneWireResult<E::Replies, T::Error> {
        let packets = self.encoder.take_packets();
        let mut replies = E::Replies::default();
        for (idx, packet) in packets.iter().enumerate() {
            log::trace!(
                "packet {}/{}: {} out, {} reserved",
                idx + 1,
                packets.len(),
                packet.len(),
                packet.response_len()
            );
            let reply = self
                .transport
                .exchange(packet)
                .map_err(OneWireError::Transport)?;
            self.encoder.accept_reply(&mut replies, packet, reply)?;
        }
        Ok(replies)
    }
}

impl<E, T> OneWire for Session<E, T>
where
    E: BusCommandEncoder,
    T: Transport<E::Packet, Reply = E::Reply>,
{
    type BusError = T::Error;

    fn reset(&mut self) -> OneWireResult<ResetOutcome, Self::BusError> {
        let slot = self.encoder.reset();
        let replies = self.transact()?;
        Ok(self.encoder.interpret_reset(&replies, slot)?)
    }

    fn write_byte(&mut self, byte: u8) -> OneWireResult<(), Self::BusError> {
        let slot = self.encoder.data_byte(byte);
        let replies = self.transact()?;
        let mut echo = [0u8];
        self.encoder.interpret_data_bytes(&replies, slot, &mut echo)?;
        Ok(())
    }

    fn read_byte(&mut self) -> OneWireResult<u8, Self::BusError> {
        let slot = self.encoder.data_byte(0xff);
        let replies = self.transact()?;
        let mut byte = [0u8];
        self.encoder.interpret_data_bytes(&replies, slot, &mut byte)?;
        Ok(byte[0])
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> OneWireResult<(), Self::BusError> {
        if bytes.is_empty() {
            return Ok(());
        }
        let slot = self.encoder.data_bytes(bytes);
        let replies = self.transact()?;
        let mut echo: Vec<u8> = vec![0; bytes.len()];
        self.encoder.interpret_data_bytes(&replies, slot, &mut echo)?;
        Ok(())
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> OneWireResult<(), Self::BusError> {
        if buf.is_empty() {
            return Ok(());
        }
        let slot = self.encoder.data_bytes(&vec![0xff; buf.len()]);
        let replies = self.transact()?;
        self.encoder.interpret_data_bytes(&replies, slot, buf)?;
        Ok(())
    }

    fn write_bit(&mut self, bit: bool) -> OneWireResult<(), Self::BusError> {
        let slot = self.encoder.data_bit(bit, false);
        let replies = self.transact()?;
        self.encoder.interpret_bit(&replies, slot)?;
        Ok(())
    }

    fn read_bit(&mut self) -> OneWireResult<bool, Self::BusError> {
        let slot = self.encoder.data_bit(true, false);
        let replies = self.transact()?;
        Ok(self.encoder.interpret_bit(&replies, slot)?)
    }

    fn write_primed_byte(&mut self, byte: u8) -> OneWireResult<u8, Self::BusError> {
        let slot = self.encoder.primed_byte(byte);
        let replies = self.transact()?;
        Ok(self.encoder.interpret_primed_byte(&replies, slot)?)
    }

    fn speed(&self) -> Speed {
        self.encoder.state().speed()
    }

    fn set_speed(&mut self, speed: Speed) -> OneWireResult<(), Self::BusError> {
        self.encoder.set_speed(speed);
        self.transact()?;
        Ok(())
    }

    fn search_pass(&mut self, state: &mut SearchState) -> OneWireResult<bool, Self::BusError> {
        let reset = self.encoder.search_preamble(state);
        let slot = self.encoder.search(state);
        let replies = self.transact()?;
        if let Some(reset) = reset
            && !self.encoder.interpret_reset(&replies, reset)?.presence()
        {
            log::debug!("search pass: no presence");
            return Ok(false);
        }
        Ok(self.encoder.interpret_search(state, &replies, slot)?)
    }
}
