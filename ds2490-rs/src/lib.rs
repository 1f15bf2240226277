#![no_std]
#![deny(missing_docs)]

/*! # DS2490
 *
 * Command encoder and reply interpreter for the DS2490 USB 1-Wire adapter.
 *
 * The DS2490 takes pre-assembled vendor control transfers instead of a byte stream,
 * so there is no framing mode and nothing to escape. Bus data comes back on a bulk
 * endpoint; resets, pulses and searches report through result codes appended to the
 * status notification. The ROM search runs in hardware: one
 * [`SEARCH_ACCESS`](commands::comm::SEARCH_ACCESS) returns the discovered IDs and a
 * discrepancy bitmap in a single round trip.
 *
 * [`Ds2490`] batches operations into [`CommandPacket`]s. Drive it with a
 * [`Session`](onewire_bridge::Session) over a USB
 * [`Transport`](onewire_bridge::Transport) that runs the commands of a packet, waits
 * for the adapter to go idle and returns a [`UsbResponse`].
 */

extern crate alloc;

pub mod commands;
mod control;
mod encoder;
mod registers;

pub use commands::{CommandPacket, RequestType, UsbCommand};
pub use control::{Ds2490Control, PulseKind};
pub use encoder::{UsbReplies, UsbReply, UsbResponse, UsbSlot};
pub use onewire_bridge::{OneWire, OneWireError, OneWireResult};
pub use registers::{
    DEVICE_DETECT, EnableFlags, ResultCode, STATUS_BLOCK_LEN, StatusBlock, StatusFlags,
    reset_outcome,
};

use onewire_bridge::{AdapterState, PacketQueue, ParameterSet, Speed};

/// Default number of devices one hardware search pass may return.
pub const DEFAULT_SEARCH_BATCH: u8 = 1;

/// A DS2490 command list under construction.
#[derive(Debug)]
pub struct Ds2490 {
    pub(crate) queue: PacketQueue<CommandPacket>,
    pub(crate) state: AdapterState,
    pub(crate) search_batch: u8,
    pub(crate) max_commands: usize,
}

impl Default for Ds2490 {
    fn default() -> Self {
        Ds2490Builder::default().build()
    }
}

impl Ds2490 {
    /// Creates an encoder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Devices requested per batched search pass.
    pub fn search_batch(&self) -> u8 {
        self.search_batch
    }

    /// Commands per packet.
    pub fn max_commands(&self) -> usize {
        self.max_commands
    }
}

/// Builder for creating a [`Ds2490`] instance with custom configuration.
#[derive(Debug, Clone)]
pub struct Ds2490Builder {
    search_batch: u8,
    max_commands: usize,
    parameters: [ParameterSet; 4],
    speed: Speed,
}

impl Default for Ds2490Builder {
    fn default() -> Self {
        Ds2490Builder {
            search_batch: DEFAULT_SEARCH_BATCH,
            max_commands: commands::COMMAND_FIFO_DEPTH,
            parameters: Speed::ALL.map(ParameterSet::default_for),
            speed: Speed::Regular,
        }
    }
}

impl Ds2490Builder {
    /// Maximum number of devices a batched search pass returns. At least 1.
    pub fn with_search_batch(mut self, batch: u8) -> Self {
        self.search_batch = batch.max(1);
        self
    }

    /// Maximum number of commands per packet, between 1 and the FIFO depth.
    pub fn with_max_commands(mut self, max: usize) -> Self {
        self.max_commands = max.clamp(1, commands::COMMAND_FIFO_DEPTH);
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

    /// Builds a new [`Ds2490`] with the specified configuration.
    ///
    /// Every reset carries the speed, so a different starting speed reaches the
    /// adapter with the first reset.
    pub fn build(self) -> Ds2490 {
        let mut state = AdapterState::default();
        for speed in Speed::ALL {
            state.set_parameters(speed, self.parameters[speed.index()]);
        }
        state.switch_speed(self.speed);
        Ds2490 {
            queue: PacketQueue::new(),
            state,
            search_batch: self.search_batch,
            max_commands: self.max_commands,
        }
    }
}
