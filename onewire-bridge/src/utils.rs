#[derive(Debug, Default)]
/// Calculate CRC-8 used in 1-Wire communications.
pub struct OneWireCrc(u8);

#[cfg(feature = "crc-table")]
const CRC_TABLE: [u8; 256] = {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x1 == 0x1 { (crc >> 1) ^ 0x8c } else { crc >> 1 };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
};

impl OneWireCrc {
    /// Get the current CRC value
    pub fn value(&self) -> u8 {
        self.0
    }

    /// Update the CRC with the incoming byte.
    #[cfg(feature = "crc-table")]
    pub fn update(&mut self, byte: u8) {
        self.0 = CRC_TABLE[(self.0 ^ byte) as usize];
    }

    /// Update the CRC with the incoming byte.
    #[cfg(not(feature = "crc-table"))]
    pub fn update(&mut self, byte: u8) {
        let mut crc = self.0 ^ byte; // XOR the byte with the current CRC value
        for _ in 0..8 {
            if crc & 0x1 == 0x1 {
                crc = (crc >> 1) ^ 0x8c; // Polynomial for CRC-8
            } else {
                crc >>= 1;
            }
        }
        self.0 = crc;
    }

    /// Compute the CRC of a byte sequence.
    pub fn compute(sequence: &[u8]) -> u8 {
        let mut crc = OneWireCrc(0);
        sequence.iter().for_each(|&byte| crc.update(byte));
        crc.0
    }

    /// Validate a sequence of bytes where the last byte is the 1-Wire CRC of
    /// the previous bytes.
    pub fn validate(sequence: &[u8]) -> bool {
        // If the last byte of the ROM is the CRC, the result should be 0
        Self::compute(sequence) == 0x0
    }
}

/// Helpers for 64-bit ROM codes in little-endian wire order.
///
/// | Bit | Description |
/// |-----|-------------|
/// | 0-7 | Family code (e.g., 0x28 for DS18B20) |
/// | 8-55 | Serial number |
/// | 56-63 | CRC-8 (`0b1_0001_1001` poly) |
pub trait RomId {
    /// Family code of the ROM.
    fn family(&self) -> u8;
    /// `true` if the family code is non-zero and the CRC byte matches.
    fn is_valid(&self) -> bool;
}

impl RomId for u64 {
    fn family(&self) -> u8 {
        (*self & 0xff) as u8
    }

    fn is_valid(&self) -> bool {
        self.to_le_bytes().is_valid()
    }
}

impl RomId for [u8; 8] {
    fn family(&self) -> u8 {
        self[0]
    }

    fn is_valid(&self) -> bool {
        self[0] != 0 && OneWireCrc::validate(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc_of_known_rom() {
        // DS18B20 ROM from the Maxim application note 27 worked example.
        let rom = [0x02, 0x1c, 0xb8, 0x01, 0x00, 0x00, 0x00, 0xa2];
        assert_eq!(OneWireCrc::compute(&rom[..7]), 0xa2);
        assert!(OneWireCrc::validate(&rom));
        assert!(rom.is_valid());
        assert!(u64::from_le_bytes(rom).is_valid());
        assert_eq!(u64::from_le_bytes(rom).family(), 0x02);
    }

    #[test]
    fn zero_family_is_invalid() {
        assert!(![0u8; 8].is_valid());
    }

    #[test]
    fn corrupted_rom_fails() {
        let rom = [0x02, 0x1c, 0xb8, 0x01, 0x00, 0x00, 0x01, 0xa2];
        assert!(!rom.is_valid());
    }
}
