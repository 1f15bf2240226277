use std::time::{Duration, Instant};

use anyhow::{Context as _, Result, anyhow, bail};
use ds2490::{
    CommandPacket, STATUS_BLOCK_LEN, StatusBlock, UsbCommand, UsbResponse,
    commands::{EP_DATA_IN, EP_DATA_OUT, EP_STATUS, PRODUCT_ID, VENDOR_ID},
};
use onewire_bridge::Transport;
use rusb::{Context, Device, DeviceHandle, Direction, Recipient, UsbContext};

const INTERFACE_NR: u8 = 0;
/// 16-byte status packets, polled every millisecond.
const ALT_SETTING: u8 = 3;
const TIMEOUT: Duration = Duration::from_secs(1);
/// Long enough for a strong pullup of about a second.
const IDLE_TIMEOUT: Duration = Duration::from_secs(5);

fn is_ds2490<U: UsbContext>(device: &Device<U>) -> bool {
    device
        .device_descriptor()
        .is_ok_and(|descr| descr.vendor_id() == VENDOR_ID && descr.product_id() == PRODUCT_ID)
}

/// The first DS2490 on the system, claimed for this process.
pub struct UsbTransport {
    handle: DeviceHandle<Context>,
}

impl UsbTransport {
    pub fn open() -> Result<Self> {
        let ctx = Context::new()?;
        let device = ctx
            .devices()?
            .iter()
            .find(is_ds2490)
            .ok_or_else(|| anyhow!("no DS2490 adapter found"))?;
        log::debug!(
            "DS2490 on bus {} address {}",
            device.bus_number(),
            device.address()
        );
        let mut handle = device.open().context("opening DS2490")?;
        // not supported everywhere
        let _ = handle.set_auto_detach_kernel_driver(true);
        handle.claim_interface(INTERFACE_NR)?;
        handle.set_alternate_setting(INTERFACE_NR, ALT_SETTING)?;
        Ok(Self { handle })
    }

    fn send(&self, command: &UsbCommand) -> Result<()> {
        if let Some(payload) = &command.payload {
            self.handle.write_bulk(EP_DATA_OUT, payload, TIMEOUT)?;
        }
        let request_type = rusb::request_type(Direction::Out, rusb::RequestType::Vendor, Recipient::Device);
        self.handle
            .write_control(request_type, command.request as u8, command.value, command.index, &[], TIMEOUT)
            .with_context(|| format!("sending command {:#06x}", command.value))?;
        Ok(())
    }

    /// Poll the status endpoint until the adapter is idle. Returns the last status
    /// block followed by every result code seen on the way.
    fn wait_idle(&self) -> Result<(StatusBlock, Vec<u8>)> {
        let deadline = Instant::now() + IDLE_TIMEOUT;
        let mut results = Vec::new();
        loop {
            let mut buf = [0u8; 32];
            let len = self
                .handle
                .read_interrupt(EP_STATUS, &mut buf, TIMEOUT)
                .context("reading DS2490 status")?;
            let (status, _) = StatusBlock::parse(&buf[..len])?;
            results.extend_from_slice(&buf[STATUS_BLOCK_LEN..len]);
            if status.is_idle() {
                let mut notification = buf[..STATUS_BLOCK_LEN].to_vec();
                notification.extend(results);
                return Ok((status, notification));
            }
            if Instant::now() > deadline {
                bail!("DS2490 still busy with command {:#06x}", status.current_command);
            }
        }
    }

    fn read_data(&self, len: usize) -> Result<Vec<u8>> {
        let mut data = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            let read = self.handle.read_bulk(EP_DATA_IN, &mut data[filled..], TIMEOUT)?;
            if read == 0 {
                break;
            }
            filled += read;
        }
        data.truncate(filled);
        Ok(data)
    }
}

impl Transport<CommandPacket> for UsbTransport {
    type Reply = UsbResponse;
    type Error = anyhow::Error;

    fn exchange(&mut self, packet: &CommandPacket) -> Result<UsbResponse> {
        for command in packet.commands() {
            self.send(command)?;
        }
        let (status, notification) = self.wait_idle()?;
        let available = usize::from(status.read_buffer_len);
        let data = self.read_data(available.min(packet.expected_response_len()))?;
        log::trace!("usb in: {data:02x?}, status {notification:02x?}");
        Ok(UsbResponse {
            status: notification,
            data,
        })
    }
}
