//! Vendor command set of the DS2490 USB 1-Wire adapter.
use alloc::vec::Vec;

use onewire_bridge::{Packet, Speed};

/// USB vendor ID of the DS2490.
pub const VENDOR_ID: u16 = 0x04fa;
/// USB product ID of the DS2490.
pub const PRODUCT_ID: u16 = 0x2490;
/// Interrupt endpoint carrying the status notification.
pub const EP_STATUS: u8 = 0x81;
/// Bulk OUT endpoint feeding the write buffer.
pub const EP_DATA_OUT: u8 = 0x02;
/// Bulk IN endpoint draining the read buffer.
pub const EP_DATA_IN: u8 = 0x83;

/// Depth of the command FIFO.
pub const COMMAND_FIFO_DEPTH: usize = 16;
/// Size of the read and write buffers.
pub const DATA_BUFFER_LEN: usize = 128;

/// Control request (`bRequest`) of a vendor command.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    /// Adapter control.
    Control = 0x00,
    /// 1-Wire communication.
    Comm = 0x01,
    /// Mode (timing and enable) settings.
    Mode = 0x02,
    /// Factory test.
    Test = 0x03,
}

/// Control command values.
pub mod control {
    /// Reset the adapter to its power-up state.
    pub const RESET_DEVICE: u16 = 0x0000;
    /// Start executing the command FIFO.
    pub const START_EXE: u16 = 0x0001;
    /// Resume after a halt.
    pub const RESUME_EXE: u16 = 0x0002;
    /// Halt once the adapter is idle.
    pub const HALT_EXE_IDLE: u16 = 0x0003;
    /// Halt once the current command is done.
    pub const HALT_EXE_DONE: u16 = 0x0004;
    /// Drop pending communication commands.
    pub const FLUSH_COMM_CMDS: u16 = 0x0007;
    /// Drop the read buffer.
    pub const FLUSH_RCV_BUFFER: u16 = 0x0008;
    /// Drop the write buffer.
    pub const FLUSH_XMT_BUFFER: u16 = 0x0009;
    /// Read back pending communication commands.
    pub const GET_COMM_CMDS: u16 = 0x000a;
}

/// Mode command values.
pub mod mode {
    /// Enable strong pullup / program pulses.
    pub const PULSE_EN: u16 = 0x0000;
    /// Allow communication commands to change speed.
    pub const SPEED_CHANGE_EN: u16 = 0x0001;
    /// Bus speed.
    pub const ONEWIRE_SPEED: u16 = 0x0002;
    /// Strong pullup duration, in 16 ms units. 0 is unlimited.
    pub const STRONG_PU_DURATION: u16 = 0x0003;
    /// Pull-down slew rate code.
    pub const PULLDOWN_SLEWRATE: u16 = 0x0004;
    /// Program pulse duration, in 8 µs units. 0 is unlimited.
    pub const PROG_PULSE_DURATION: u16 = 0x0005;
    /// Write-one low time code.
    pub const WRITE1_LOWTIME: u16 = 0x0006;
    /// Data sample offset / write-zero recovery code.
    pub const DSOW0_TREC: u16 = 0x0007;

    /// [`PULSE_EN`] bit enabling the program pulse.
    pub const ENABLE_PROGRAM: u16 = 0x01;
    /// [`PULSE_EN`] bit enabling the strong pullup.
    pub const ENABLE_STRONG_PULLUP: u16 = 0x02;
}

/// Communication command values and flags.
pub mod comm {
    /// Set the pulse duration.
    pub const SET_DURATION: u16 = 0x0012;
    /// Single bit time slot.
    pub const BIT_IO: u16 = 0x0020;
    /// Strong pullup or program pulse.
    pub const PULSE: u16 = 0x0030;
    /// Reset / presence detect.
    pub const ONEWIRE_RESET: u16 = 0x0042;
    /// Byte time slots.
    pub const BYTE_IO: u16 = 0x0052;
    /// Match ROM, ROM taken from the write buffer.
    pub const MATCH_ACCESS: u16 = 0x0064;
    /// Block of byte time slots through the data buffers.
    pub const BLOCK_IO: u16 = 0x0074;
    /// Hardware ROM search.
    pub const SEARCH_ACCESS: u16 = 0x00f4;

    /// Execute immediately.
    pub const IM: u16 = 0x0001;
    /// Bit value of [`BIT_IO`], 12V selection of [`PULSE`], speed change of
    /// [`ONEWIRE_RESET`], discovery mode of [`SEARCH_ACCESS`].
    pub const TYPE: u16 = 0x0008;
    /// Reset before the command.
    pub const RST: u16 = 0x0100;
    /// Intermediate command: no result unless an error occurs.
    pub const ICP: u16 = 0x0200;
    /// Flush buffers on error.
    pub const F: u16 = 0x0800;
    /// Strong pullup after the command.
    pub const SPU: u16 = 0x1000;
    /// Return discrepancy information ([`SEARCH_ACCESS`]).
    pub const RTS: u16 = 0x4000;
}

/// DS2490 speed code.
pub const fn speed_code(speed: Speed) -> u16 {
    match speed {
        Speed::Regular | Speed::Pulse => 0,
        Speed::Flex => 1,
        Speed::Overdrive => 2,
    }
}

/// One vendor control transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbCommand {
    /// `bRequest`.
    pub request: RequestType,
    /// `wValue`.
    pub value: u16,
    /// `wIndex`.
    pub index: u16,
    /// Bytes to put into the write buffer before the transfer.
    pub payload: Option<Vec<u8>>,
}

impl UsbCommand {
    /// A command without write-buffer payload.
    pub const fn new(request: RequestType, value: u16, index: u16) -> Self {
        Self {
            request,
            value,
            index,
            payload: None,
        }
    }

    /// A command preceded by `payload` on the bulk OUT endpoint.
    pub fn with_payload(request: RequestType, value: u16, index: u16, payload: &[u8]) -> Self {
        Self {
            request,
            value,
            index,
            payload: Some(payload.to_vec()),
        }
    }
}

/// One batch of commands executed before the status is polled.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CommandPacket {
    commands: Vec<UsbCommand>,
    response_len: usize,
    search_limit: Option<u8>,
}

impl CommandPacket {
    /// Commands in execution order.
    pub fn commands(&self) -> &[UsbCommand] {
        &self.commands
    }

    /// Bytes to read from the bulk IN endpoint; the maximum for a search packet.
    pub fn expected_response_len(&self) -> usize {
        self.response_len
    }

    /// Devices requested by the search this packet ends with, if any.
    ///
    /// A search reply has a variable length.
    pub fn search_limit(&self) -> Option<u8> {
        self.search_limit
    }

    pub(crate) fn push(&mut self, command: UsbCommand) {
        self.commands.push(command);
    }

    pub(crate) fn mark_search(&mut self, limit: u8) {
        self.search_limit = Some(limit);
    }
}

impl Packet for CommandPacket {
    fn len(&self) -> usize {
        self.commands.len()
    }

    fn response_len(&self) -> usize {
        self.response_len
    }

    fn reserve_response(&mut self, count: usize) {
        self.response_len += count;
    }
}
