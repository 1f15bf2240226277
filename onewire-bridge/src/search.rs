use alloc::vec::Vec;

use crate::{
    OneWire, OneWireError, RomId,
    consts::{ONEWIRE_CONDITIONAL_SEARCH_CMD, ONEWIRE_SEARCH_CMD},
};

/// Bit position that makes a pass replay the whole stored ROM.
pub const REPLAY_ALL: u8 = 64;

#[inline]
fn bit_of(bytes: &[u8; 8], bit: u8) -> bool {
    bytes[(bit / 8) as usize] & (1 << (bit % 8)) != 0
}

/// Device-discovery context shared across repeated search passes.
///
/// The state is owned by the caller and handed to each pass by mutable reference, so
/// a discovery run can be interrupted and resumed, and two buses can be searched
/// side by side.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchState {
    rom: [u8; 8],
    last_discrepancy: Option<u8>,
    last_family_discrepancy: Option<u8>,
    complete: bool,
    include_families: Vec<u8>,
    exclude_families: Vec<u8>,
    alarm_only: bool,
    skip_reset: bool,
}

impl SearchState {
    /// Fresh state: no discrepancy recorded yet, all families, every device.
    pub fn new() -> Self {
        Self::default()
    }

    /// Only discover devices in an alarm condition.
    pub fn with_alarm_only(mut self, alarm_only: bool) -> Self {
        self.alarm_only = alarm_only;
        self
    }

    /// Do not reset the bus before each pass.
    pub fn with_skip_reset(mut self, skip_reset: bool) -> Self {
        self.skip_reset = skip_reset;
        self
    }

    /// Restrict discovery to one family.
    pub fn target_family(&mut self, family: u8) {
        self.include_families.clear();
        self.include_families.push(family);
    }

    /// Restrict discovery to a set of families.
    pub fn target_families(&mut self, families: &[u8]) {
        self.include_families.clear();
        self.include_families.extend_from_slice(families);
    }

    /// Skip every device of a family.
    pub fn exclude_family(&mut self, family: u8) {
        if !self.exclude_families.contains(&family) {
            self.exclude_families.push(family);
        }
    }

    /// Drop all family filters.
    pub fn target_all_families(&mut self) {
        self.include_families.clear();
        self.exclude_families.clear();
    }

    /// Forget all progress so the next pass starts a new enumeration.
    pub fn restart(&mut self) {
        self.rom = [0; 8];
        self.last_discrepancy = None;
        self.last_family_discrepancy = None;
        self.complete = false;
    }

    /// ROM function command that starts a pass.
    pub fn rom_command(&self) -> u8 {
        if self.alarm_only {
            ONEWIRE_CONDITIONAL_SEARCH_CMD
        } else {
            ONEWIRE_SEARCH_CMD
        }
    }

    /// Branch to take at `bit` if the bus reports a discrepancy there.
    ///
    /// Replays the stored ROM below the last discrepancy, takes the one branch at it
    /// and the zero branch past it. Before the first pass every branch is zero.
    pub fn direction(&self, bit: u8) -> bool {
        match self.last_discrepancy {
            None => false,
            Some(last) if bit < last => bit_of(&self.rom, bit),
            Some(last) => bit == last,
        }
    }

    /// [`direction`](SearchState::direction) for all 64 bits, LSB first.
    pub fn direction_bits(&self) -> [u8; 8] {
        let mut bits = [0u8; 8];
        for bit in 0..64u8 {
            if self.direction(bit) {
                bits[(bit / 8) as usize] |= 1 << (bit % 8);
            }
        }
        bits
    }

    /// Fold the outcome of one pass into the state.
    ///
    /// `discrepancies` has a bit set wherever both branches answered. Returns `false`
    /// and leaves the state untouched if the ROM is not a valid device ID, including
    /// a discrepancy on the final bit, which two valid ROMs can never produce.
    pub fn record_pass(&mut self, rom: [u8; 8], discrepancies: [u8; 8]) -> bool {
        if !rom.is_valid() || bit_of(&discrepancies, 63) {
            log::debug!("search pass returned invalid ROM {:016x}", u64::from_le_bytes(rom));
            return false;
        }
        let unexplored = |bit: &u8| bit_of(&discrepancies, *bit) && !bit_of(&rom, *bit);
        let last_zero = (0..64u8).rev().find(unexplored);
        let prior = self.last_discrepancy;
        self.rom = rom;
        self.last_family_discrepancy = (0..8u8).rev().find(unexplored);
        self.last_discrepancy = last_zero;
        self.complete = last_zero.is_none() || last_zero == prior;
        log::debug!(
            "search found {:016x}, last discrepancy {:?}, complete {}",
            u64::from_le_bytes(rom),
            last_zero,
            self.complete
        );
        true
    }

    /// Continue past every remaining device of the current family.
    pub fn skip_family(&mut self) {
        match self.last_family_discrepancy.take() {
            Some(bit) => {
                self.last_discrepancy = Some(bit);
                self.complete = false;
            }
            None => {
                self.last_discrepancy = None;
                self.complete = true;
            }
        }
    }

    /// Aim the first pass of a single-family search straight at that family.
    pub fn prime_family_target(&mut self) {
        if self.is_first() && self.include_families.len() == 1 {
            self.rom = [self.include_families[0], 0, 0, 0, 0, 0, 0, 0];
            self.last_discrepancy = Some(REPLAY_ALL);
        }
    }

    /// Set up a pass that follows exactly the path of `rom`.
    pub fn prepare_verify(&mut self, rom: u64) {
        self.restart();
        self.rom = rom.to_le_bytes();
        self.last_discrepancy = Some(REPLAY_ALL);
    }

    /// `true` if `family` passes the include and exclude filters.
    pub fn accepts(&self, family: u8) -> bool {
        (self.include_families.is_empty() || self.include_families.contains(&family))
            && !self.exclude_families.contains(&family)
    }

    /// `true` before any pass has been recorded.
    pub fn is_first(&self) -> bool {
        self.last_discrepancy.is_none() && !self.complete
    }

    /// ROM found by the last successful pass.
    pub fn rom(&self) -> u64 {
        u64::from_le_bytes(self.rom)
    }

    /// ROM found by the last successful pass, wire order.
    pub fn rom_bytes(&self) -> &[u8; 8] {
        &self.rom
    }

    /// Highest unexplored discrepancy of the last pass, zero based.
    pub fn last_discrepancy(&self) -> Option<u8> {
        self.last_discrepancy
    }

    /// Highest unexplored discrepancy inside the family code.
    pub fn last_family_discrepancy(&self) -> Option<u8> {
        self.last_family_discrepancy
    }

    /// No unexplored branch is left.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Whether only alarming devices are discovered.
    pub fn alarm_only(&self) -> bool {
        self.alarm_only
    }

    /// Whether passes go without a leading reset.
    pub fn skip_reset(&self) -> bool {
        self.skip_reset
    }

    /// Families discovery is restricted to. Empty means all.
    pub fn include_families(&self) -> &[u8] {
        &self.include_families
    }

    /// Families discovery skips.
    pub fn exclude_families(&self) -> &[u8] {
        &self.exclude_families
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Type of search performed using [`OneWireSearch`].
pub enum OneWireSearchKind {
    /// Normal search
    Normal = ONEWIRE_SEARCH_CMD,
    /// Search only for devices with alarm
    Alarmed = ONEWIRE_CONDITIONAL_SEARCH_CMD,
}

/// A structure for searching devices on a 1-Wire bus.
/// This structure implements the search algorithm for discovering devices on the 1-Wire bus.
/// It maintains the state of the search.
pub struct OneWireSearch<'a, T> {
    onewire: &'a mut T,
    state: SearchState,
}

impl<T> core::fmt::Debug for OneWireSearch<'_, T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("OneWireSearch")
            .field("state", &self.state)
            .finish()
    }
}

impl<'a, T> OneWireSearch<'a, T> {
    /// Creates a new [`OneWireSearch`] instance.
    ///
    /// # Arguments
    /// * `onewire` - A mutable reference to a type that implements the `OneWire` trait.
    /// * `kind` - Search every device, or only devices in alarm state.
    pub fn new(onewire: &'a mut T, kind: OneWireSearchKind) -> Self {
        Self {
            onewire,
            state: SearchState::new().with_alarm_only(kind == OneWireSearchKind::Alarmed),
        }
    }

    /// Creates a new [`OneWireSearch`] instance with a specific family code.
    /// # Arguments
    /// * `onewire` - A mutable reference to a type that implements the `OneWire` trait.
    /// * `kind` - Search every device, or only devices in alarm state.
    /// * `family` - The family code of the devices to search for.
    pub fn with_family(onewire: &'a mut T, kind: OneWireSearchKind, family: u8) -> Self {
        let mut search = Self::new(onewire, kind);
        search.state.target_family(family);
        search
    }

    /// Continue a discovery run from a state saved with [`into_state`](OneWireSearch::into_state).
    pub fn resume(onewire: &'a mut T, state: SearchState) -> Self {
        Self { onewire, state }
    }

    /// The discovery context.
    pub fn state(&self) -> &SearchState {
        &self.state
    }

    /// Mutable discovery context, e.g. to change family filters between devices.
    pub fn state_mut(&mut self) -> &mut SearchState {
        &mut self.state
    }

    /// Release the bus and keep the discovery context.
    pub fn into_state(self) -> SearchState {
        self.state
    }
}

impl<T: OneWire> OneWireSearch<'_, T> {
    /// Searches for devices on the 1-Wire bus.
    /// This method implements the [1-Wire search algorithm](https://www.analog.com/en/resources/app-notes/1wire-search-algorithm.html) to discover devices connected to the bus.
    /// The [next](OneWireSearch::next) method can be called repeatedly to find all devices on the bus.
    /// At the end of the search, calling this method will return `None` to indicate that no more devices are present.
    /// A pass that yields no valid ROM also returns `None` without marking the search
    /// complete, so calling again retries from the same point.
    ///
    /// # Returns
    /// A result containing the ROM code of the found device as a `u64` value.
    ///
    /// | Bit | Description |
    /// |-----|-------------|
    /// | 0-7 | Family code (e.g., 0x28 for DS18B20) |
    /// | 8-15 | Serial number (first byte) |
    /// | 16-23 | Serial number (second byte) |
    /// | 24-31 | Serial number (third byte) |
    /// | 32-39 | Serial number (fourth byte) |
    /// | 40-47 | Serial number (fifth byte) |
    /// | 48-55 | Serial number (sixth byte) |
    /// | 56-63 | CRC-8 (`0b1_0001_1001` poly) |
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<Option<u64>, OneWireError<T::BusError>> {
        loop {
            if self.state.is_complete() {
                return Ok(None);
            }
            self.state.prime_family_target();
            if !self.onewire.search_pass(&mut self.state)? {
                return Ok(None);
            }
            let rom = self.state.rom();
            if self.state.accepts(rom.family()) {
                return Ok(Some(rom));
            }
            // the rest of this family is unwanted too
            self.state.skip_family();
        }
    }

    /// Verifies if the device with the given ROM code is present on the 1-Wire bus.
    ///
    /// Runs on a scratch state, so an ongoing discovery run is not disturbed.
    pub fn verify(&mut self, rom: u64) -> Result<bool, OneWireError<T::BusError>> {
        let mut probe = SearchState::new()
            .with_alarm_only(self.state.alarm_only())
            .with_skip_reset(self.state.skip_reset());
        probe.prepare_verify(rom);
        Ok(self.onewire.search_pass(&mut probe)? && probe.rom() == rom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::OneWireCrc;

    fn rom(family: u8, serial: [u8; 6]) -> [u8; 8] {
        let mut rom = [family, serial[0], serial[1], serial[2], serial[3], serial[4], serial[5], 0];
        rom[7] = OneWireCrc::compute(&rom[..7]);
        rom
    }

    #[test]
    fn first_pass_takes_zero_branches() {
        let state = SearchState::new();
        assert_eq!(state.direction_bits(), [0; 8]);
        assert!(state.is_first());
    }

    #[test]
    fn directions_replay_then_branch() {
        let mut state = SearchState::new();
        let found = rom(0x28, [0xff; 6]);
        let mut discrepancies = [0u8; 8];
        discrepancies[1] |= 1 << 1; // bit 9
        assert!(state.record_pass(found, discrepancies));
        // bit 9 is set in this ROM, the one branch was taken there
        assert!(state.is_complete());

        let mut state = SearchState::new();
        let found = rom(0x28, [0x00; 6]);
        let mut discrepancies = [0u8; 8];
        discrepancies[1] |= 1 << 1; // bit 9
        discrepancies[2] |= 1 << 4; // bit 20
        assert!(state.record_pass(found, discrepancies));
        assert_eq!(state.last_discrepancy(), Some(20));
        assert!(!state.is_complete());
        for bit in 0..20 {
            assert_eq!(state.direction(bit), bit_of(&found, bit));
        }
        assert!(state.direction(20));
        assert!(!state.direction(21));
    }

    #[test]
    fn invalid_rom_leaves_state_alone() {
        let mut state = SearchState::new();
        let before = state.clone();
        assert!(!state.record_pass([0u8; 8], [0u8; 8]));
        assert!(!state.record_pass([0xff; 8], [0xff; 8]));
        let mut last_bit = [0u8; 8];
        last_bit[7] = 0x80;
        assert!(!state.record_pass(rom(0x10, [1, 2, 3, 4, 5, 6]), last_bit));
        assert_eq!(state, before);
    }

    #[test]
    fn family_discrepancy_tracks_low_byte() {
        let mut state = SearchState::new();
        let found = rom(0x10, [0; 6]);
        let mut discrepancies = [0u8; 8];
        discrepancies[0] = 0b0000_0001; // bit 0, family 0x10 has it clear
        discrepancies[3] = 0b0000_0001; // bit 24
        assert!(state.record_pass(found, discrepancies));
        assert_eq!(state.last_family_discrepancy(), Some(0));
        assert_eq!(state.last_discrepancy(), Some(24));
        state.skip_family();
        assert_eq!(state.last_discrepancy(), Some(0));
        assert!(state.direction(0));
        state.skip_family();
        assert!(state.is_complete());
    }

    #[test]
    fn filters() {
        let mut state = SearchState::new();
        assert!(state.accepts(0x28));
        state.exclude_family(0x28);
        assert!(!state.accepts(0x28));
        state.target_families(&[0x10, 0x28]);
        assert!(state.accepts(0x10));
        assert!(!state.accepts(0x28));
        assert!(!state.accepts(0x42));
        state.target_all_families();
        assert!(state.accepts(0x28));
    }

    #[test]
    fn prime_targets_single_family() {
        let mut state = SearchState::new();
        state.target_family(0x42);
        state.prime_family_target();
        assert_eq!(state.rom_bytes()[0], 0x42);
        assert_eq!(state.last_discrepancy(), Some(REPLAY_ALL));
        // replay every bit of the primed ROM
        assert_eq!(state.direction_bits(), [0x42, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn alarm_only_uses_conditional_search() {
        assert_eq!(SearchState::new().rom_command(), 0xf0);
        assert_eq!(SearchState::new().with_alarm_only(true).rom_command(), 0xec);
    }
}
