#![no_std]
#![deny(missing_docs)]
//! # onewire-bridge
//! A no-std protocol engine for 1-Wire bus-master bridge chips.
//!
//! Bridge chips such as the DS2480B (serial) and DS2490 (USB) do not expose the 1-Wire
//! bus directly: every reset, bit, byte and search has to be encoded into the chip's own
//! command stream, and the chip's replies decoded back. This crate holds what every such
//! bridge shares:
//!
//! - [`AdapterState`] and [`ParameterSet`], the session state an encoder threads through
//!   its packets.
//! - [`SearchState`], the resumable discovery context of the ROM search.
//! - [`RawPacket`] and [`PacketQueue`], packet batching with response-offset accounting.
//! - The [`BusCommandEncoder`] trait each bridge crate implements, and the [`Transport`]
//!   trait the platform implements.
//! - [`Session`], which drives an encoder over a transport and implements [`OneWire`].
//! - [`OneWireSearch`], the device discovery loop on top of any [`OneWire`] bus.

extern crate alloc;
#[cfg(feature = "std")]
extern crate std;

pub mod consts;
mod error;
#[cfg(feature = "std")]
mod exclusive;
mod packet;
mod search;
mod session;
mod state;
mod traits;
mod utils;

pub use consts::*;
pub use error::{OneWireError, ResponseError};
#[cfg(feature = "std")]
pub use exclusive::{ExclusiveBus, ExclusiveGuard};
pub use packet::{Packet, PacketQueue, RawPacket, response_window};
pub use search::{OneWireSearch, OneWireSearchKind, REPLAY_ALL, SearchState};
pub use session::Session;
pub use state::{
    AdapterState, MAX_ALARM_COUNT, Mode, ParameterSet, Pulse5VTime, Pulse12VTime, ResetOutcome,
    SampleOffset, SlewRate, Speed, StreamingFlags, Write1LowTime,
};
pub use traits::{BusCommandEncoder, OneWire, Transport};
pub use utils::{OneWireCrc, RomId};

/// Error type for 1-Wire operations.
pub type OneWireResult<T, E> = Result<T, OneWireError<E>>;
