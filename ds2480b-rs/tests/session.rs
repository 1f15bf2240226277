//! Drives [`Ds2480b`] through a [`Session`] against an emulated line driver.

use std::{collections::BTreeSet, convert::Infallible};

use ds2480b::{Ds2480b, Ds2480bBuilder, Ds2480bControl, OneWire, OneWireError, RawPacket};
use onewire_bridge::{
    OneWireCrc, OneWireSearch, OneWireSearchKind, ResetOutcome, ResponseError, Session,
    StreamingFlags, Transport,
};
use rand::{Rng, SeedableRng, rngs::StdRng};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SimMode {
    Command,
    Data,
}

/// Byte-level model of a DS2480B with a fixed device population.
struct Simulator {
    mode: SimMode,
    escape_pending: Option<u8>,
    calibrated: bool,
    accelerator: bool,
    block: Vec<u8>,
    revision: u8,
    program_voltage: bool,
    parameters: [u8; 8],
    devices: Vec<(u64, bool)>,
    active: Vec<bool>,
    awaiting_rom_command: bool,
    command_bits: Vec<bool>,
    search_blocks: usize,
    exchanges: usize,
}

impl Simulator {
    fn new(devices: Vec<(u64, bool)>) -> Self {
        let active = vec![false; devices.len()];
        Self {
            mode: SimMode::Command,
            escape_pending: None,
            calibrated: true,
            accelerator: false,
            block: Vec::new(),
            revision: 1,
            program_voltage: false,
            parameters: [0; 8],
            devices,
            active,
            awaiting_rom_command: false,
            command_bits: Vec::new(),
            search_blocks: 0,
            exchanges: 0,
        }
    }

    fn rom_command(&mut self, byte: u8) {
        self.awaiting_rom_command = false;
        if byte == 0xec {
            for (active, (_, alarm)) in self.active.iter_mut().zip(&self.devices) {
                *active &= *alarm;
            }
        }
    }

    fn command(&mut self, byte: u8, out: &mut Vec<u8>) {
        if byte & 0x80 == 0 {
            let parameter = (byte >> 4) & 0x07;
            if parameter == 0 {
                let read = ((byte >> 1) & 0x07) as usize;
                out.push(self.parameters[read] << 1);
            } else {
                self.parameters[parameter as usize] = (byte >> 1) & 0x07;
                out.push(byte & 0xfe);
            }
            return;
        }
        match byte {
            0xe1 => self.mode = SimMode::Data,
            0xe3 | 0xf1 => {}
            _ => match (byte >> 5) & 0x03 {
                0 => {
                    let bit = byte & 0x10 != 0;
                    if self.awaiting_rom_command {
                        self.command_bits.push(bit);
                        if self.command_bits.len() == 8 {
                            let cmd = self
                                .command_bits
                                .drain(..)
                                .enumerate()
                                .fold(0u8, |acc, (i, b)| acc | (u8::from(b) << i));
                            self.rom_command(cmd);
                        }
                    }
                    out.push((byte & 0xfc) | if bit { 0x03 } else { 0x00 });
                }
                1 => self.accelerator = byte & 0x10 != 0,
                2 => {
                    self.active.iter_mut().for_each(|a| *a = true);
                    self.awaiting_rom_command = true;
                    self.command_bits.clear();
                    let condition = if self.devices.is_empty() { 0b11 } else { 0b01 };
                    out.push(
                        0xc0 | (u8::from(self.program_voltage) << 5) | (self.revision << 2) | condition,
                    );
                }
                _ => out.push(byte & 0xfc),
            },
        }
    }

    fn data(&mut self, byte: u8, out: &mut Vec<u8>) {
        if self.accelerator {
            self.block.push(byte);
            if self.block.len() == 16 {
                let block = std::mem::take(&mut self.block);
                out.extend(self.search(&block));
            }
            return;
        }
        if self.awaiting_rom_command {
            self.rom_command(byte);
        }
        out.push(byte);
    }

    fn search(&mut self, block: &[u8]) -> [u8; 16] {
        self.search_blocks += 1;
        let mut reply = [0u8; 16];
        for bit in 0..64usize {
            let shift = (bit % 4) * 2;
            let direction = block[bit / 4] & (1 << (shift + 1)) != 0;
            let ones = self
                .devices
                .iter()
                .zip(&self.active)
                .filter(|(_, a)| **a)
                .map(|((rom, _), _)| (rom >> bit) & 1 == 1);
            let (mut any_one, mut any_zero) = (false, false);
            for one in ones {
                any_one |= one;
                any_zero |= !one;
            }
            let (discrepancy, taken) = match (any_zero, any_one) {
                (true, true) => (true, direction),
                (false, true) => (false, true),
                (true, false) => (false, false),
                (false, false) => (true, true),
            };
            for (active, (rom, _)) in self.active.iter_mut().zip(&self.devices) {
                *active &= ((rom >> bit) & 1 == 1) == taken;
            }
            reply[bit / 4] |= (u8::from(discrepancy) | (u8::from(taken) << 1)) << shift;
        }
        reply
    }
}

impl Transport<RawPacket> for Simulator {
    type Reply = Vec<u8>;
    type Error = Infallible;

    fn exchange(&mut self, packet: &RawPacket) -> Result<Vec<u8>, Infallible> {
        self.exchanges += 1;
        let mut out = Vec::new();
        for &byte in packet.buffer() {
            if !self.calibrated {
                // timing byte
                self.calibrated = true;
                continue;
            }
            if let Some(pending) = self.escape_pending.take() {
                if byte == pending {
                    self.data(byte, &mut out);
                } else {
                    assert_eq!(pending, 0xe3, "unescaped special mode byte");
                    self.mode = SimMode::Command;
                    self.command(byte, &mut out);
                }
                continue;
            }
            match self.mode {
                SimMode::Data if byte == 0xe3 => self.escape_pending = Some(byte),
                SimMode::Data if byte == 0xf3 && self.revision == 1 => {
                    self.escape_pending = Some(byte)
                }
                SimMode::Data => self.data(byte, &mut out),
                SimMode::Command => self.command(byte, &mut out),
            }
        }
        Ok(out)
    }
}

fn random_rom(rng: &mut StdRng) -> u64 {
    let mut rom = [0u8; 8];
    rom[0] = [0x10, 0x28, 0x3a][rng.random_range(0..3)];
    rng.fill(&mut rom[1..7]);
    rom[7] = OneWireCrc::compute(&rom[..7]);
    u64::from_le_bytes(rom)
}

fn population(seed: u64, count: usize) -> Vec<u64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut roms = BTreeSet::new();
    while roms.len() < count {
        roms.insert(random_rom(&mut rng));
    }
    roms.into_iter().collect()
}

fn session(encoder: Ds2480b, roms: &[u64]) -> Session<Ds2480b, Simulator> {
    Session::new(
        encoder,
        Simulator::new(roms.iter().map(|&rom| (rom, false)).collect()),
    )
}

fn discover(bus: &mut Session<Ds2480b, Simulator>) -> Vec<u64> {
    let mut search = OneWireSearch::new(bus, OneWireSearchKind::Normal);
    let mut found = Vec::new();
    while let Some(rom) = search.next().unwrap() {
        found.push(rom);
    }
    assert!(search.state().is_complete());
    found
}

#[test]
fn reset_reports_presence_and_revision() {
    let mut bus = session(Ds2480b::new(), &population(1, 1));
    assert_eq!(bus.reset().unwrap(), ResetOutcome::Presence);
    assert_eq!(bus.state().revision(), 1);
    assert!(!bus.state().program_voltage_available());

    let mut empty = session(Ds2480b::new(), &[]);
    assert_eq!(empty.reset().unwrap(), ResetOutcome::NoPresence);
    assert!(matches!(
        empty.address(None),
        Err(OneWireError::NoDevicePresent)
    ));
}

#[test]
fn search_finds_every_device_once() {
    for (seed, count) in [(10, 1), (11, 2), (12, 5), (13, 16), (14, 40)] {
        let roms = population(seed, count);
        let mut bus = session(Ds2480b::new(), &roms);
        let found = discover(&mut bus);
        let unique: BTreeSet<_> = found.iter().copied().collect();
        assert_eq!(unique.len(), found.len());
        assert_eq!(unique, roms.iter().copied().collect());
        assert!(bus.transport_mut().search_blocks <= count);
    }
}

#[test]
fn search_resumes_from_saved_state() {
    let roms = population(20, 9);
    let expected: BTreeSet<_> = roms.iter().copied().collect();
    for split in 0..=roms.len() {
        let mut bus = session(Ds2480b::new(), &roms);
        let mut found = BTreeSet::new();
        let mut search = OneWireSearch::new(&mut bus, OneWireSearchKind::Normal);
        for _ in 0..split {
            found.insert(search.next().unwrap().unwrap());
        }
        let state = search.into_state();
        // an unrelated operation between passes
        bus.reset().unwrap();
        let mut search = OneWireSearch::resume(&mut bus, state);
        while let Some(rom) = search.next().unwrap() {
            assert!(found.insert(rom));
        }
        assert_eq!(found, expected);
    }
}

#[test]
fn bits_only_search() {
    let roms = population(30, 6);
    let mut bus = session(Ds2480bBuilder::default().with_bits_only(true).build(), &roms);
    let found: BTreeSet<_> = discover(&mut bus).into_iter().collect();
    assert_eq!(found, roms.iter().copied().collect());
}

#[test]
fn unstreamed_search_takes_more_round_trips() {
    let roms = population(31, 4);
    let mut streamed = session(Ds2480b::new(), &roms);
    discover(&mut streamed);
    let flags = StreamingFlags {
        bits: false,
        bytes: false,
        searches: false,
        resets: false,
    };
    let mut unstreamed = session(Ds2480bBuilder::default().with_streaming(flags).build(), &roms);
    let found: BTreeSet<_> = discover(&mut unstreamed).into_iter().collect();
    assert_eq!(found, roms.iter().copied().collect());
    assert!(unstreamed.transport_mut().exchanges > streamed.transport_mut().exchanges);
}

#[test]
fn alarm_search() {
    let roms = population(40, 10);
    let devices: Vec<_> = roms.iter().enumerate().map(|(i, &r)| (r, i % 2 == 1)).collect();
    let expected: BTreeSet<_> = devices.iter().filter(|d| d.1).map(|d| d.0).collect();
    let mut bus = Session::new(Ds2480b::new(), Simulator::new(devices));
    let mut search = OneWireSearch::new(&mut bus, OneWireSearchKind::Alarmed);
    let mut found = BTreeSet::new();
    while let Some(rom) = search.next().unwrap() {
        found.insert(rom);
    }
    assert_eq!(found, expected);
}

#[test]
fn family_search() {
    let roms = population(41, 20);
    let mut bus = session(Ds2480b::new(), &roms);
    let mut search = OneWireSearch::with_family(&mut bus, OneWireSearchKind::Normal, 0x3a);
    let mut found = BTreeSet::new();
    while let Some(rom) = search.next().unwrap() {
        found.insert(rom);
    }
    let expected: BTreeSet<_> = roms.iter().copied().filter(|r| r & 0xff == 0x3a).collect();
    assert_eq!(found, expected);
}

#[test]
fn verify_present_and_absent() {
    let roms = population(50, 5);
    let mut bus = session(Ds2480b::new(), &roms);
    let mut search = OneWireSearch::new(&mut bus, OneWireSearchKind::Normal);
    for &rom in &roms {
        assert!(search.verify(rom).unwrap());
    }
    let absent = population(51, 1)[0];
    assert!(!search.verify(absent).unwrap());
}

#[test]
fn escaped_bytes_round_trip() {
    let mut bus = session(Ds2480bBuilder::default().with_max_streamed_bytes(5).build(), &[]);
    // learn the chip revision, which decides whether 0xf3 is escaped
    assert_eq!(bus.reset().unwrap(), ResetOutcome::NoPresence);
    assert_eq!(bus.state().revision(), 1);
    let payload = [0xe3, 0x12, 0xe3, 0xe3, 0xf3, 0x00, 0xff, 0xe1];
    bus.write_bytes(&payload).unwrap();
    let mut echo = [0u8; 4];
    bus.read_bytes(&mut echo).unwrap();
    assert_eq!(echo, [0xff; 4]);
    assert_eq!(bus.read_byte().unwrap(), 0xff);
    assert!(bus.read_bit().unwrap());
    bus.write_bit(false).unwrap();
    assert_eq!(bus.write_primed_byte(0x3c).unwrap(), 0x3c);
}

#[test]
fn detect_initializes_chip() {
    let mut bus = session(Ds2480b::new(), &[]);
    bus.transport_mut().calibrated = false;
    assert!(bus.detect().unwrap());
    assert_eq!(bus.read_parameter(ds2480b::Parameter::SlewRate).unwrap(), Some(3));
    assert_eq!(bus.read_parameter(ds2480b::Parameter::Baud).unwrap(), Some(0));
}

#[test]
fn program_pulse_needs_voltage() {
    let mut bus = session(Ds2480b::new(), &population(60, 1));
    bus.reset().unwrap();
    assert!(matches!(
        bus.pulse(ds2480b::PulseKind::Program12V),
        Err(OneWireError::ProgramVoltageUnavailable)
    ));
    assert!(bus.pulse(ds2480b::PulseKind::StrongPullup5V).unwrap());
}

struct Lossy(Simulator);

impl Transport<RawPacket> for Lossy {
    type Reply = Vec<u8>;
    type Error = Infallible;

    fn exchange(&mut self, packet: &RawPacket) -> Result<Vec<u8>, Infallible> {
        let mut reply = self.0.exchange(packet)?;
        reply.pop();
        Ok(reply)
    }
}

#[test]
fn short_reply_fails_the_operation() {
    let mut bus = Session::new(Ds2480b::new(), Lossy(Simulator::new(Vec::new())));
    assert!(matches!(
        bus.reset(),
        Err(OneWireError::Response(ResponseError::LengthMismatch {
            expected: 1,
            received: 0
        }))
    ));
}
