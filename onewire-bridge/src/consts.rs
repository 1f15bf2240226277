//! ROM function commands shared by every 1-Wire device.

/// Match ROM: the 64-bit ROM ID that follows selects one device.
pub const ONEWIRE_MATCH_ROM_CMD: u8 = 0x55;

/// Skip ROM: address every device on the bus at once.
pub const ONEWIRE_SKIP_ROM_CMD: u8 = 0xcc;

/// Overdrive Match ROM. The ROM ID is sent at overdrive speed and the matching
/// device stays in overdrive until the next standard-speed reset.
pub const ONEWIRE_MATCH_ROM_CMD_OD: u8 = 0x69;

/// Overdrive Skip ROM. Puts every overdrive-capable device into overdrive until
/// the next standard-speed reset.
pub const ONEWIRE_SKIP_ROM_CMD_OD: u8 = 0x3c;

/// Search ROM.
pub const ONEWIRE_SEARCH_CMD: u8 = 0xf0;

/// Conditional (alarm) search ROM. Only devices in an alarm condition take part.
pub const ONEWIRE_CONDITIONAL_SEARCH_CMD: u8 = 0xec;
