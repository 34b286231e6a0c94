//! Frame checksum used by the Nano module.
//!
//! Looks like CRC-16/CCITT but is fed one nibble at a time, so the results
//! differ. Computed over the length byte through the last payload byte.

const CRC_TABLE: [u16; 16] = [
    0x0000, 0x1021, 0x2042, 0x3063, 0x4084, 0x50a5, 0x60c6, 0x70e7, 0x8108, 0x9129, 0xa14a, 0xb16b,
    0xc18c, 0xd1ad, 0xe1ce, 0xf1ef,
];

const CRC_SEED: u16 = 0xFFFF;

/// Calculate the checksum of `data`
pub fn crc16(data: &[u8]) -> u16 {
    data.iter().fold(CRC_SEED, |crc, &byte| {
        let crc = step(crc, byte >> 4);
        step(crc, byte & 0x0F)
    })
}

// The table index comes from the accumulator before it is shifted.
fn step(crc: u16, nibble: u8) -> u16 {
    ((crc << 4) | nibble as u16) ^ CRC_TABLE[(crc >> 12) as usize]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc_set_reader_option_capture() {
        // ff 03 9a 01 08 00 a7 5d
        assert_eq!(crc16(&[0x03, 0x9A, 0x01, 0x08, 0x00]), 0xA75D);
    }

    #[test]
    fn test_crc_read_tag_data_capture() {
        // FF 0A 24 03 E8 00 00 00 00 00 03 00 EE 58 9D
        let data = [0x0A, 0x24, 0x03, 0xE8, 0x00, 0x00, 0x00, 0x00, 0x00, 0x03, 0x00, 0xEE];
        assert_eq!(crc16(&data), 0x589D);
    }

    #[test]
    fn test_crc_tag_report_capture() {
        let frame = [
            0xFF, 0x28, 0x22, 0x00, 0x00, 0x10, 0x00, 0x1B, 0x01, 0xFF, 0x01, 0x01, 0xC4, 0x11,
            0x0E, 0x16, 0x40, 0x00, 0x00, 0x01, 0x27, 0x00, 0x00, 0x05, 0x00, 0x00, 0x0F, 0x00,
            0x80, 0x30, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x15,
            0x45, 0xE9, 0x4A, 0x56, 0x1D,
        ];
        let len = frame.len();
        assert_eq!(crc16(&frame[1..len - 2]), 0x561D);
    }

    #[test]
    fn test_crc_empty_is_seed() {
        assert_eq!(crc16(&[]), 0xFFFF);
    }
}
