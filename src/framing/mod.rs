//! RoweTech binary ensemble framing.
//!
//! An ensemble frame on the wire is
//! ```text
//! [16 x 0x80][ens_num u32][!ens_num u32][payload_size u32][!payload_size u32][payload][checksum u32]
//! ```
//! with all integers little-endian. The checksum covers the payload only.
mod bytes;
mod checksum;
mod reader;
mod synchronizer;

pub use checksum::*;
pub use reader::*;
pub use synchronizer::*;

use serde::{Deserialize, Serialize};

/// Ensemble start marker.
pub const MARKER: [u8; 16] = [0x80; 16];

/// Ensemble header; the ensemble number and payload size both carry their bitwise
/// complement for integrity checking.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnsembleHeader {
    pub ensemble_number: u32,
    pub payload_size: u32,
}

impl EnsembleHeader {
    /// Header length in bytes, including the marker
    pub const LEN: usize = 32;
    /// Length of the header fields following the marker
    pub const FIELDS_LEN: usize = Self::LEN - MARKER.len();
    /// Length of the checksum trailer
    pub const CHECKSUM_LEN: usize = 4;

    /// Decode the header fields that follow the marker, verifying both complements.
    /// Returns `None` if there are not enough bytes or either complement check fails.
    #[must_use]
    pub fn decode(dat: &[u8]) -> Option<Self> {
        if dat.len() < Self::FIELDS_LEN {
            return None;
        }
        let word = |i: usize| u32::from_le_bytes([dat[i], dat[i + 1], dat[i + 2], dat[i + 3]]);
        let (num, num_inv, size, size_inv) = (word(0), word(4), word(8), word(12));
        if num != !num_inv || size != !size_inv {
            return None;
        }
        Some(EnsembleHeader {
            ensemble_number: num,
            payload_size: size,
        })
    }

    /// Encode the full header, including the marker.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::LEN);
        buf.extend_from_slice(&MARKER);
        buf.extend_from_slice(&self.ensemble_number.to_le_bytes());
        buf.extend_from_slice(&(!self.ensemble_number).to_le_bytes());
        buf.extend_from_slice(&self.payload_size.to_le_bytes());
        buf.extend_from_slice(&(!self.payload_size).to_le_bytes());
        buf
    }

    /// Total frame length on the wire.
    #[must_use]
    pub fn frame_len(&self) -> usize {
        Self::LEN + self.payload_size as usize + Self::CHECKSUM_LEN
    }
}

/// A validated ensemble payload and where it came from.
#[derive(Debug, Clone)]
pub struct RawChunk {
    /// Index of the byte source the frame was read from
    pub source_index: usize,
    /// Zero-based offset of the frame marker within its source
    pub offset: usize,
    /// Length of the complete frame, including header and checksum
    pub length: usize,
    pub header: EnsembleHeader,
    /// Payload bytes, header and checksum excluded
    pub payload: Vec<u8>,
}

/// Frame problems that are recovered from locally by resynchronizing.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameFault {
    /// Marker found, but the header complements did not match or the size is not
    /// plausible.
    HeaderDesync { offset: usize },
    /// Payload does not match its checksum.
    ChecksumMismatch {
        offset: usize,
        ensemble_number: u32,
        stored: u32,
        computed: u32,
    },
    /// Stream ended inside a frame.
    Truncated { offset: usize },
}

/// Aggregate counts of [FrameFault]s.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultCounts {
    pub header_desyncs: usize,
    pub checksum_mismatches: usize,
    pub truncated: usize,
}

impl FaultCounts {
    pub fn add(&mut self, fault: &FrameFault) {
        match fault {
            FrameFault::HeaderDesync { .. } => self.header_desyncs += 1,
            FrameFault::ChecksumMismatch { .. } => self.checksum_mismatches += 1,
            FrameFault::Truncated { .. } => self.truncated += 1,
        }
    }

    pub fn merge(&mut self, other: &FaultCounts) {
        self.header_desyncs += other.header_desyncs;
        self.checksum_mismatches += other.checksum_mismatches;
        self.truncated += other.truncated;
    }

    /// Frames that were found but not produced.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.checksum_mismatches + self.truncated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_header() {
        let hdr = EnsembleHeader {
            ensemble_number: 1234,
            payload_size: 4000,
        };
        let dat = hdr.encode();
        assert_eq!(dat.len(), EnsembleHeader::LEN);
        assert_eq!(&dat[..16], &MARKER);

        let decoded = EnsembleHeader::decode(&dat[16..]).unwrap();
        assert_eq!(decoded, hdr);
        assert_eq!(decoded.frame_len(), 4036);
    }

    #[test]
    fn decode_header_rejects_bad_complement() {
        let mut dat = EnsembleHeader {
            ensemble_number: 7,
            payload_size: 100,
        }
        .encode();
        dat[20] ^= 0x01;
        assert!(EnsembleHeader::decode(&dat[16..]).is_none());

        let mut dat = EnsembleHeader {
            ensemble_number: 7,
            payload_size: 100,
        }
        .encode();
        dat[31] ^= 0x80;
        assert!(EnsembleHeader::decode(&dat[16..]).is_none());
    }

    #[test]
    fn decode_header_is_none_when_data_too_short() {
        assert!(EnsembleHeader::decode(&[0u8; 15]).is_none());
    }

    #[test]
    fn fault_counts() {
        let mut counts = FaultCounts::default();
        counts.add(&FrameFault::HeaderDesync { offset: 0 });
        counts.add(&FrameFault::Truncated { offset: 10 });
        counts.add(&FrameFault::ChecksumMismatch {
            offset: 0,
            ensemble_number: 1,
            stored: 1,
            computed: 2,
        });
        assert_eq!(counts.header_desyncs, 1);
        assert_eq!(counts.skipped(), 2);
    }
}
