#![no_std]
#![deny(missing_docs)]

/*! # DS2480B
 *
 * Command stream encoder and response interpreter for the DS2480B serial 1-Wire line
 * driver.
 *
 * The DS2480B multiplexes bridge commands and bus data over one serial line. In
 * command mode every byte is a command; in data mode every byte goes to the bus, and
 * [`COMMAND_MODE`](codes::COMMAND_MODE) switches back unless it is doubled. [`Ds2480b`]
 * tracks that framing, batches operations into [`RawPacket`]s and decodes the echoed
 * replies. Drive it with a [`Session`](onewire_bridge::Session) over any serial
 * [`Transport`](onewire_bridge::Transport).
 */

extern crate alloc;

pub mod codes;
mod control;
mod encoder;

pub use codes::{BaudRate, Parameter, PulseKind};
pub use control::{Ds2480bControl, InitializeSlots, ParameterSlot};
pub use onewire_bridge::{OneWire, OneWireError, OneWireResult, RawPacket};

use onewire_bridge::{AdapterState, PacketQueue, ParameterSet, Speed, StreamingFlags};

/// Default packet size limit, in bytes.
pub const DEFAULT_MAX_STREAMED_BYTES: usize = 256;

/// A DS2480B command stream under construction.
///
/// Owns the bridge's [`AdapterState`]; every append method keeps the framing mode in
/// the state and in the byte stream in lockstep.
#[derive(Debug)]
pub struct Ds2480b {
    pub(crate) queue: PacketQueue<RawPacket>,
    pub(crate) state: AdapterState,
    pub(crate) bits_only: bool,
    pub(crate) max_streamed: usize,
}

impl Default for Ds2480b {
    fn default() -> Self {
        Ds2480bBuilder::default().build()
    }
}

impl Ds2480b {
    /// Creates an encoder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether data bytes are sent as eight single-bit operations.
    pub fn bits_only(&self) -> bool {
        self.bits_only
    }

    /// Packet size limit, in bytes.
    pub fn max_streamed_bytes(&self) -> usize {
        self.max_streamed
    }
}

/// Builder for creating a [`Ds2480b`] instance with custom configuration.
#[derive(Debug, Clone)]
pub struct Ds2480bBuilder {
    bits_only: bool,
    streaming: StreamingFlags,
    max_streamed: usize,
    parameters: [ParameterSet; 4],
    speed: Speed,
}

impl Default for Ds2480bBuilder {
    fn default() -> Self {
        Ds2480bBuilder {
            bits_only: false,
            streaming: StreamingFlags::default(),
            max_streamed: DEFAULT_MAX_STREAMED_BYTES,
            parameters: Speed::ALL.map(ParameterSet::default_for),
            speed: Speed::Regular,
        }
    }
}

impl Ds2480bBuilder {
    /// Send every data byte as eight single-bit operations.
    ///
    /// Slower, but does not depend on the data-mode byte echo, which some adapters
    /// get wrong.
    pub fn with_bits_only(mut self, bits_only: bool) -> Self {
        self.bits_only = bits_only;
        self
    }

    /// Select which operations may share a packet with what follows them.
    pub fn with_streaming(mut self, streaming: StreamingFlags) -> Self {
        self.streaming = streaming;
        self
    }

    /// Sets the packet size limit, in bytes. Values below 3 are raised to 3, so a mode
    /// switch followed by an escaped data byte always fits.
    pub fn with_max_streamed_bytes(mut self, max: usize) -> Self {
        self.max_streamed = max.max(3);
        self
    }

    /// Sets the timing parameters used at `speed`.
    pub fn with_parameters(mut self, speed: Speed, parameters: ParameterSet) -> Self {
        self.parameters[speed.index()] = parameters;
        self
    }

    /// Sets the bus speed the session starts at.
    pub fn with_speed(mut self, speed: Speed) -> Self {
        self.speed = speed;
        self
    }

    /// Builds a new [`Ds2480b`] with the specified configuration.
    ///
    /// The chip powers up in command mode, at regular speed. A different starting
    /// speed is recorded directly; the first reset or search carries it to the chip.
    pub fn build(self) -> Ds2480b {
        let mut state = AdapterState::default();
        state.set_streaming(self.streaming);
        for speed in Speed::ALL {
            state.set_parameters(speed, self.parameters[speed.index()]);
        }
        state.switch_speed(self.speed);
        Ds2480b {
            queue: PacketQueue::new(),
            state,
            bits_only: self.bits_only,
            max_streamed: self.max_streamed,
        }
    }
}
