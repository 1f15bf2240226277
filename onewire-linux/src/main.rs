mod serial;
mod usb;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use ds2480b::{Ds2480bBuilder, Ds2480bControl};
use ds2490::{Ds2490Builder, Ds2490Control};
use onewire_bridge::{OneWire, OneWireSearch, OneWireSearchKind, RomId, SearchState, Session, Speed};

use crate::{serial::SerialTransport, usb::UsbTransport};

/// Talk to a 1-Wire bus through a DS2480B serial or DS2490 USB bridge
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Serial port of a DS2480B (e.g., /dev/ttyUSB0)
    #[arg(short, long, required_unless_present = "usb")]
    serial: Option<String>,
    /// Use the first DS2490 USB adapter
    #[arg(short, long, conflicts_with = "serial")]
    usb: bool,
    /// Bus speed
    #[arg(long, value_enum, default_value_t = BusSpeed::Regular)]
    speed: BusSpeed,
    /// Send data bytes as single bit slots (DS2480B only)
    #[arg(long)]
    bits_only: bool,
    /// Devices discovered per hardware search pass (DS2490 only)
    #[arg(long, default_value_t = 1)]
    batch: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Reset the bus and report what answered
    Reset,
    /// List the devices on the bus
    Search {
        /// Only devices in alarm
        #[arg(long)]
        alarm: bool,
        /// Only these families (hex)
        #[arg(long, value_parser = parse_family)]
        family: Vec<u8>,
        /// Skip these families (hex)
        #[arg(long, value_parser = parse_family)]
        exclude: Vec<u8>,
    },
    /// Check whether a device is on the bus
    Verify {
        /// ROM code in hex, family code in the low byte
        #[arg(value_parser = parse_rom)]
        rom: u64,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum BusSpeed {
    Regular,
    Flex,
    Overdrive,
}

impl From<BusSpeed> for Speed {
    fn from(value: BusSpeed) -> Self {
        match value {
            BusSpeed::Regular => Speed::Regular,
            BusSpeed::Flex => Speed::Flex,
            BusSpeed::Overdrive => Speed::Overdrive,
        }
    }
}

fn parse_family(arg: &str) -> Result<u8, String> {
    u8::from_str_radix(arg.trim_start_matches("0x"), 16).map_err(|e| format!("bad family code: {e}"))
}

fn parse_rom(arg: &str) -> Result<u64, String> {
    let rom = u64::from_str_radix(arg.trim_start_matches("0x"), 16).map_err(|e| format!("bad ROM code: {e}"))?;
    if !rom.is_valid() {
        return Err(format!("{rom:016x} fails its CRC"));
    }
    Ok(rom)
}

fn search_state(alarm: bool, family: &[u8], exclude: &[u8]) -> SearchState {
    let mut state = SearchState::new().with_alarm_only(alarm);
    match family {
        [] => {}
        [single] => state.target_family(*single),
        many => state.target_families(many),
    }
    for &code in exclude {
        state.exclude_family(code);
    }
    state
}

fn run<B>(bus: &mut B, command: &Command) -> Result<()>
where
    B: OneWire<BusError = anyhow::Error>,
{
    match command {
        Command::Reset => {
            let outcome = bus.reset().context("resetting the bus")?;
            println!("{outcome:?}");
        }
        Command::Search { alarm, family, exclude } => {
            let kind = if *alarm {
                OneWireSearchKind::Alarmed
            } else {
                OneWireSearchKind::Normal
            };
            let mut search = OneWireSearch::new(bus, kind);
            *search.state_mut() = search_state(*alarm, family, exclude);
            let mut count = 0;
            while let Some(rom) = search.next().context("searching the bus")? {
                println!("{rom:016x}");
                count += 1;
            }
            log::info!("found {count} devices");
        }
        Command::Verify { rom } => {
            let present = OneWireSearch::new(bus, OneWireSearchKind::Normal)
                .verify(*rom)
                .context("verifying the device")?;
            println!("{rom:016x}: {}", if present { "present" } else { "absent" });
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let speed = Speed::from(args.speed);

    if let Some(path) = &args.serial {
        let mut transport = SerialTransport::open(path)?;
        transport.send_break()?;
        let encoder = Ds2480bBuilder::default().with_bits_only(args.bits_only).build();
        let mut bus = Session::new(encoder, transport);
        if !bus.detect().context("detecting the DS2480B")? {
            bail!("no DS2480B answered on {path}");
        }
        log::info!("DS2480B revision {}", bus.state().revision());
        bus.set_speed(speed).context("setting bus speed")?;
        return run(&mut bus, &args.command);
    }

    let transport = UsbTransport::open()?;
    let encoder = Ds2490Builder::default().with_search_batch(args.batch).build();
    let mut bus = Session::new(encoder, transport);
    let status = bus.detect().context("detecting the DS2490")?;
    log::info!(
        "DS2490 ready, program voltage {}",
        status.flags.program_voltage()
    );
    bus.set_speed(speed).context("setting bus speed")?;
    match &args.command {
        Command::Search { alarm, family, exclude } if args.batch > 1 => {
            let mut state = search_state(*alarm, family, exclude);
            let roms = bus.search_all(&mut state).context("searching the bus")?;
            for rom in &roms {
                println!("{rom:016x}");
            }
            log::info!("found {} devices", roms.len());
            Ok(())
        }
        command => run(&mut bus, command),
    }
}
