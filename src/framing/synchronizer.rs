use std::io::Read;

use tracing::debug;

use super::bytes::PushbackReader;
use super::{
    DefaultCrc16, EnsembleHeader, FaultCounts, FrameFault, Integrity, IntegrityAlgorithm,
    RawChunk, MARKER,
};
use crate::prelude::*;

/// Largest payload accepted by default. A header claiming more than this is treated as
/// a desynchronization rather than an allocation request.
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 1024 * 1024;

/// Synchronizer scans a single byte stream for ensemble frames.
///
/// Each candidate marker is validated by its header complements and then by the payload
/// checksum. Any failure puts back every byte after the first marker byte so scanning
/// resumes one byte past the failed candidate, which means a valid frame hidden inside
/// a corrupted one is still found.
pub struct Synchronizer<R>
where
    R: Read + Send,
{
    bytes: PushbackReader<R>,
    source_index: usize,
    max_payload_size: usize,
    integrity: Box<dyn IntegrityAlgorithm>,

    /// Faults recovered from so far.
    pub faults: FaultCounts,
}

impl<R> Synchronizer<R>
where
    R: Read + Send,
{
    pub fn new(reader: R, source_index: usize) -> Self {
        Synchronizer {
            bytes: PushbackReader::new(reader),
            source_index,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            integrity: Box::new(DefaultCrc16),
            faults: FaultCounts::default(),
        }
    }

    #[must_use]
    pub fn with_max_payload_size(mut self, max_payload_size: usize) -> Self {
        self.max_payload_size = max_payload_size;
        self
    }

    #[must_use]
    pub fn with_integrity(mut self, integrity: Box<dyn IntegrityAlgorithm>) -> Self {
        self.integrity = integrity;
        self
    }

    /// Scan until the start of the next marker run and return its offset, leaving the
    /// marker consumed. Returns `Ok(None)` when the stream ends first.
    ///
    /// # Errors
    /// [Error::Io] if reading from the source fails.
    pub fn scan_marker(&mut self) -> Result<Option<usize>> {
        let mut working: Vec<u8> = Vec::with_capacity(MARKER.len());

        'next: loop {
            working.clear();
            let start = self.bytes.position();
            for expected in MARKER {
                let Some(b) = self.bytes.next_byte()? else {
                    return Ok(None);
                };
                working.push(b);
                if b != expected {
                    // An ensemble cannot start at the first byte, but may start at any
                    // of the others.
                    self.bytes.push_back(&working[1..]);
                    continue 'next;
                }
            }
            return Ok(Some(start));
        }
    }

    /// Put back everything consumed for a failed candidate except its first byte.
    fn resync(&mut self, consumed: &[u8], fault: FrameFault) {
        debug!(source = self.source_index, ?fault, "frame fault");
        self.faults.add(&fault);
        self.bytes.push_back(&consumed[1..]);
    }

    /// Read the next valid frame. Returns `Ok(None)` at the end of the stream.
    ///
    /// # Errors
    /// [Error::Io] if reading from the source fails. Invalid or truncated frames are
    /// not errors; they are counted in the fault tally and skipped.
    pub fn next_frame(&mut self) -> Result<Option<RawChunk>> {
        loop {
            let Some(offset) = self.scan_marker()? else {
                return Ok(None);
            };

            let mut consumed = MARKER.to_vec();
            let mut fields = [0u8; EnsembleHeader::FIELDS_LEN];
            if !self.bytes.read_full(&mut fields)? {
                // Nothing after a marker run that short can be a frame.
                self.faults.add(&FrameFault::Truncated { offset });
                debug!(source = self.source_index, offset, "stream ended inside header");
                return Ok(None);
            }
            consumed.extend_from_slice(&fields);

            let header = match EnsembleHeader::decode(&fields) {
                Some(hdr) if (hdr.payload_size as usize) <= self.max_payload_size => hdr,
                _ => {
                    self.resync(&consumed, FrameFault::HeaderDesync { offset });
                    continue;
                }
            };

            let size = header.payload_size as usize;
            let mut body = vec![0u8; size + EnsembleHeader::CHECKSUM_LEN];
            if !self.bytes.read_full(&mut body)? {
                self.resync(&consumed, FrameFault::Truncated { offset });
                continue;
            }
            let stored = u32::from_le_bytes([
                body[size],
                body[size + 1],
                body[size + 2],
                body[size + 3],
            ]);
            let payload = &body[..size];

            match self.integrity.perform(payload, stored) {
                Integrity::Ok => {
                    body.truncate(size);
                    return Ok(Some(RawChunk {
                        source_index: self.source_index,
                        offset,
                        length: header.frame_len(),
                        header,
                        payload: body,
                    }));
                }
                Integrity::Mismatch { stored, computed } => {
                    consumed.extend_from_slice(&body);
                    self.resync(
                        &consumed,
                        FrameFault::ChecksumMismatch {
                            offset,
                            ensemble_number: header.ensemble_number,
                            stored,
                            computed,
                        },
                    );
                }
            }
        }
    }
}

impl<R> Iterator for Synchronizer<R>
where
    R: Read + Send,
{
    type Item = Result<RawChunk>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_frame().transpose()
    }
}
