use alloc::vec::Vec;

use crate::ResponseError;

/// Borrow `needed` bytes of a response stream at `offset`.
pub fn response_window(data: &[u8], offset: usize, needed: usize) -> Result<&[u8], ResponseError> {
    data.get(offset..offset + needed)
        .ok_or(ResponseError::Truncated {
            offset,
            needed,
            len: data.len(),
        })
}

/// A unit of work handed to a transport in one round trip.
pub trait Packet: Default {
    /// Size of the outbound payload, in the encoding's own units.
    fn len(&self) -> usize;

    /// Number of response bytes reserved by the operations in this packet.
    fn response_len(&self) -> usize;

    /// Reserve `count` more response bytes.
    fn reserve_response(&mut self, count: usize);

    /// `true` if the packet carries nothing and expects nothing.
    fn is_empty(&self) -> bool {
        self.len() == 0 && self.response_len() == 0
    }
}

/// One transport-bound command buffer for a byte-stream bridge.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RawPacket {
    buffer: Vec<u8>,
    response_len: usize,
}

impl RawPacket {
    /// Bytes to write to the bridge.
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Number of bytes the bridge answers with.
    pub fn expected_response_len(&self) -> usize {
        self.response_len
    }

    /// Append one byte to the outbound buffer.
    pub fn push(&mut self, byte: u8) {
        self.buffer.push(byte);
    }

    /// Append bytes to the outbound buffer.
    pub fn extend_from_slice(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }
}

impl Packet for RawPacket {
    fn len(&self) -> usize {
        self.buffer.len()
    }

    fn response_len(&self) -> usize {
        self.response_len
    }

    fn reserve_response(&mut self, count: usize) {
        self.response_len += count;
    }
}

/// Ordered list of packets under construction.
///
/// Offsets handed out by [`reserve`](PacketQueue::reserve) index into the
/// concatenation of all replies to the packets returned by the next
/// [`take`](PacketQueue::take).
#[derive(Debug, Default)]
pub struct PacketQueue<P> {
    current: P,
    closed: Vec<P>,
    total_response_len: usize,
}

impl<P: Packet> PacketQueue<P> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            current: P::default(),
            closed: Vec::new(),
            total_response_len: 0,
        }
    }

    /// The packet operations are currently appended to.
    pub fn current(&self) -> &P {
        &self.current
    }

    /// Mutable access to the open packet.
    pub fn current_mut(&mut self) -> &mut P {
        &mut self.current
    }

    /// Reserve `count` response bytes in the open packet and return the offset of the
    /// first one in the overall response stream.
    pub fn reserve(&mut self, count: usize) -> usize {
        let offset = self.total_response_len;
        self.current.reserve_response(count);
        self.total_response_len += count;
        offset
    }

    /// Sum of reserved response bytes across every packet since the last take.
    pub fn total_response_len(&self) -> usize {
        self.total_response_len
    }

    /// Index the open packet will have in the list returned by [`take`](PacketQueue::take).
    pub fn packet_index(&self) -> usize {
        self.closed.len()
    }

    /// Close the open packet and start a new one.
    ///
    /// The open packet is closed even when empty, so two consecutive calls leave an
    /// empty packet behind: a round trip boundary with nothing to send.
    pub fn close(&mut self) {
        let packet = core::mem::take(&mut self.current);
        self.closed.push(packet);
    }

    /// Hand every packet over to the caller and start afresh.
    ///
    /// A trailing open packet is only included if it holds anything.
    pub fn take(&mut self) -> Vec<P> {
        if !self.current.is_empty() {
            self.close();
        }
        self.total_response_len = 0;
        core::mem::take(&mut self.closed)
    }

    /// Drop everything built so far.
    pub fn restart(&mut self) {
        self.current = P::default();
        self.closed.clear();
        self.total_response_len = 0;
    }
}
