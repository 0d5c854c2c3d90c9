use crc::{Crc, CRC_16_XMODEM};

/// Result of checking a frame payload against its trailing checksum.
#[derive(Clone, Debug, PartialEq)]
pub enum Integrity {
    /// Stored and computed checksums agree.
    Ok,
    /// Payload does not match the stored checksum.
    Mismatch { stored: u32, computed: u32 },
}

/// Checksum used to validate ensemble payloads.
pub trait IntegrityAlgorithm: Send + Sync {
    fn compute(&self, payload: &[u8]) -> u32;

    fn perform(&self, payload: &[u8], stored: u32) -> Integrity {
        let computed = self.compute(payload);
        if computed == stored {
            Integrity::Ok
        } else {
            Integrity::Mismatch { stored, computed }
        }
    }
}

/// CRC-16/CCITT with a zero initial value (the XMODEM variant) over the payload bytes
/// only. The 16-bit value is stored in a 4 byte little-endian trailer.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultCrc16;

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

impl IntegrityAlgorithm for DefaultCrc16 {
    fn compute(&self, payload: &[u8]) -> u32 {
        u32::from(CRC16.checksum(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc16_check_value() {
        assert_eq!(DefaultCrc16.compute(b"123456789"), 0x31c3);
    }

    #[test]
    fn crc16_empty_payload_is_zero() {
        assert_eq!(DefaultCrc16.compute(&[]), 0);
    }

    #[test]
    fn perform_reports_mismatch() {
        let dat = b"E000008\0";
        let good = DefaultCrc16.compute(dat);
        assert_eq!(DefaultCrc16.perform(dat, good), Integrity::Ok);
        assert_eq!(
            DefaultCrc16.perform(dat, good ^ 1),
            Integrity::Mismatch {
                stored: good ^ 1,
                computed: good
            }
        );
    }

    #[test]
    fn every_single_bit_flip_is_detected() {
        let dat: Vec<u8> = (0..64u8).collect();
        let good = DefaultCrc16.compute(&dat);
        for byte in 0..dat.len() {
            for bit in 0..8 {
                let mut corrupt = dat.clone();
                corrupt[byte] ^= 1 << bit;
                assert_ne!(
                    DefaultCrc16.compute(&corrupt),
                    good,
                    "flip of bit {bit} in byte {byte} not detected"
                );
            }
        }
    }
}
