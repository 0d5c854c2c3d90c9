//! Writes ensembles back to RTB frames. Mostly useful for producing synthetic test data.
use super::dataset::{
    DatasetRecord, DatasetValues, ValueKind, FLOAT_BAD_VELOCITY, INT_BAD_VELOCITY,
};
use super::Ensemble;
use crate::framing::{DefaultCrc16, EnsembleHeader, IntegrityAlgorithm};
use crate::prelude::*;

const NAME_LEN: usize = 8;

fn encode_value(kind: ValueKind, velocity: bool, v: f64, buf: &mut Vec<u8>) {
    match kind {
        ValueKind::Float32 => {
            let v = if velocity && is_bad(v) {
                FLOAT_BAD_VELOCITY
            } else {
                v as f32
            };
            buf.extend_from_slice(&v.to_le_bytes());
        }
        ValueKind::Int32 => {
            let v = match (velocity, is_bad(v)) {
                (true, true) => INT_BAD_VELOCITY,
                (true, false) => (v * 1000.0).round() as i32,
                (false, _) => v as i32,
            };
            buf.extend_from_slice(&v.to_le_bytes());
        }
        ValueKind::Byte => buf.push(v as u8),
    }
}

/// Append one dataset, sub-header included, to `buf`.
pub fn encode_dataset(rec: &DatasetRecord, buf: &mut Vec<u8>) {
    let mut name = [0u8; NAME_LEN];
    for (dst, src) in name.iter_mut().zip(rec.tag.name().bytes().take(NAME_LEN - 1)) {
        *dst = src;
    }
    for v in [
        rec.kind.code(),
        rec.bin_count as i32,
        rec.beam_count as i32,
        rec.imaginary,
        NAME_LEN as i32,
    ] {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    buf.extend_from_slice(&name);

    match &rec.values {
        DatasetValues::Bytes(dat) => buf.extend_from_slice(dat),
        DatasetValues::Numeric(arr) => {
            let velocity = rec.tag.is_velocity();
            for beam in 0..rec.beam_count {
                for bin in 0..rec.bin_count {
                    encode_value(rec.kind, velocity, arr[[bin, beam]], buf);
                }
            }
        }
    }
}

/// Encode all datasets of `ens` as a payload.
#[must_use]
pub fn encode_payload(ens: &Ensemble) -> Vec<u8> {
    let mut buf = Vec::new();
    for rec in ens.datasets.values() {
        encode_dataset(rec, &mut buf);
    }
    buf
}

/// Encode `ens` as a complete frame: marker, header, payload and checksum.
#[must_use]
pub fn encode(ens: &Ensemble) -> Vec<u8> {
    let payload = encode_payload(ens);
    let header = EnsembleHeader {
        ensemble_number: ens.number,
        payload_size: payload.len() as u32,
    };
    let mut frame = header.encode();
    frame.extend_from_slice(&payload);
    frame.extend_from_slice(&DefaultCrc16.compute(&payload).to_le_bytes());
    frame
}
