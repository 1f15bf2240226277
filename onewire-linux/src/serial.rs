use std::{
    io::{Read, Write},
    thread,
    time::Duration,
};

use anyhow::{Context, Result};
use ds2480b::{BaudRate, RawPacket};
use onewire_bridge::Transport;
use serialport::{ClearBuffer, SerialPort};

const TIMEOUT: Duration = Duration::from_secs(3);
const BREAK_TIME: Duration = Duration::from_millis(2);

/// Serial line to a DS2480B, at its 9600 bps power-up rate.
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    pub fn open(path: &str) -> Result<Self> {
        let port = serialport::new(path, BaudRate::Baud9600.bps())
            .timeout(TIMEOUT)
            .open()
            .with_context(|| format!("opening serial port {path}"))?;
        Ok(Self { port })
    }

    /// Hold a break on the line, which resets the DS2480B to its power-up state.
    pub fn send_break(&mut self) -> Result<()> {
        self.port.set_break()?;
        thread::sleep(BREAK_TIME);
        self.port.clear_break()?;
        thread::sleep(BREAK_TIME);
        self.port.clear(ClearBuffer::All)?;
        Ok(())
    }
}

impl Transport<RawPacket> for SerialTransport {
    type Reply = Vec<u8>;
    type Error = anyhow::Error;

    fn exchange(&mut self, packet: &RawPacket) -> Result<Vec<u8>> {
        log::trace!("serial out: {:02x?}", packet.buffer());
        self.port.write_all(packet.buffer())?;
        self.port.flush()?;
        let mut reply = vec![0u8; packet.expected_response_len()];
        self.port
            .read_exact(&mut reply)
            .with_context(|| format!("waiting for {} reply bytes", reply.len()))?;
        log::trace!("serial in: {reply:02x?}");
        Ok(reply)
    }
}
