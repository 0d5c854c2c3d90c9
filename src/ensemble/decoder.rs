use ndarray::Array2;
use tracing::debug;

use super::dataset::{
    DatasetRecord, DatasetTag, DatasetValues, ValueKind, FLOAT_BAD_VELOCITY, INT_BAD_VELOCITY,
};
use crate::prelude::*;

/// Size of the fixed portion of a dataset sub-header: type, elements, multiplier,
/// imaginary and name length.
pub const SUBHEADER_LEN: usize = 20;

/// Datasets parsed from one payload.
#[derive(Debug, Default)]
pub(crate) struct Parsed {
    pub records: Vec<DatasetRecord>,
    /// Names of datasets that were skipped because they are not recognized.
    pub unknown: Vec<String>,
}

fn read_i32(dat: &[u8], offset: usize) -> i32 {
    i32::from_le_bytes([
        dat[offset],
        dat[offset + 1],
        dat[offset + 2],
        dat[offset + 3],
    ])
}

fn count(value: i32, what: &str, name: &str) -> Result<usize> {
    usize::try_from(value)
        .map_err(|_| Error::Decode(format!("dataset {name} has negative {what} {value}")))
}

fn decode_values(
    tag: &DatasetTag,
    kind: ValueKind,
    bins: usize,
    beams: usize,
    dat: &[u8],
) -> DatasetValues {
    if kind == ValueKind::Byte {
        return DatasetValues::Bytes(dat.to_vec());
    }
    let velocity = tag.is_velocity();
    let flat: Vec<f64> = dat
        .chunks_exact(4)
        .map(|c| {
            let raw = [c[0], c[1], c[2], c[3]];
            match kind {
                ValueKind::Float32 => {
                    let v = f32::from_le_bytes(raw);
                    if velocity && v == FLOAT_BAD_VELOCITY {
                        BAD_VALUE
                    } else {
                        f64::from(v)
                    }
                }
                _ => {
                    let v = i32::from_le_bytes(raw);
                    match (velocity, v) {
                        (true, INT_BAD_VELOCITY) => BAD_VALUE,
                        (true, mm) => f64::from(mm) / 1000.0,
                        (false, v) => f64::from(v),
                    }
                }
            }
        })
        .collect();
    // Beam major on the wire
    DatasetValues::Numeric(Array2::from_shape_fn((bins, beams), |(bin, beam)| {
        flat[beam * bins + bin]
    }))
}

/// Walk the datasets of a payload.
///
/// Parsing stops without error at the first sub-header with an empty name or whose data
/// would run past the end of the payload, or after `max_datasets` datasets.
pub(crate) fn parse_payload(payload: &[u8], max_datasets: usize) -> Result<Parsed> {
    let mut parsed = Parsed::default();
    let mut pos = 0usize;

    for _ in 0..max_datasets {
        let remaining = payload.len() - pos;
        if remaining < SUBHEADER_LEN {
            break;
        }
        let type_code = read_i32(payload, pos);
        let elements = read_i32(payload, pos + 4);
        let multiplier = read_i32(payload, pos + 8);
        let imaginary = read_i32(payload, pos + 12);
        let name_len = read_i32(payload, pos + 16);

        let Ok(name_len) = usize::try_from(name_len) else {
            break;
        };
        if name_len == 0 || SUBHEADER_LEN + name_len > remaining {
            break;
        }
        let name_start = pos + SUBHEADER_LEN;
        let name = String::from_utf8_lossy(&payload[name_start..name_start + name_len])
            .trim_end_matches('\0')
            .to_string();
        if name.is_empty() {
            break;
        }

        let kind = ValueKind::from_code(type_code)
            .ok_or_else(|| Error::Decode(format!("dataset {name} has type code {type_code}")))?;
        let bins = count(elements, "element count", &name)?;
        let beams = count(multiplier, "element multiplier", &name)?;
        let data_len = bins
            .checked_mul(beams)
            .and_then(|n| n.checked_mul(kind.width()))
            .ok_or_else(|| Error::Decode(format!("dataset {name} size overflows")))?;
        let data_start = name_start + name_len;
        if data_len > payload.len() - data_start {
            debug!(%name, data_len, "dataset runs past end of payload; stopping");
            break;
        }
        let dat = &payload[data_start..data_start + data_len];
        pos = data_start + data_len;

        let tag = DatasetTag::from_name(&name);
        if let DatasetTag::Unknown(name) = tag {
            debug!(%name, "skipping unknown dataset");
            parsed.unknown.push(name);
            continue;
        }
        if parsed.records.iter().any(|r| r.tag == tag) {
            debug!(%tag, "duplicate dataset ignored");
            continue;
        }

        let values = decode_values(&tag, kind, bins, beams, dat);
        parsed.records.push(DatasetRecord {
            tag,
            kind,
            bin_count: bins,
            beam_count: beams,
            imaginary,
            values,
        });
    }

    if parsed.records.is_empty() && parsed.unknown.is_empty() {
        return Err(Error::Decode("payload contains no datasets".to_string()));
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subheader(code: i32, elements: i32, multiplier: i32, name: &[u8]) -> Vec<u8> {
        let mut dat = Vec::new();
        for v in [code, elements, multiplier, 0, name.len() as i32] {
            dat.extend_from_slice(&v.to_le_bytes());
        }
        dat.extend_from_slice(name);
        dat
    }

    #[test]
    fn beam_major_to_bin_beam() {
        // 3 bins x 2 beams, floats 0..6 beam major
        let mut dat = subheader(10, 3, 2, b"E000004\0");
        for v in 0..6 {
            dat.extend_from_slice(&(v as f32).to_le_bytes());
        }
        let parsed = parse_payload(&dat, 20).unwrap();
        let arr = parsed.records[0].array().unwrap();
        assert_eq!(arr.dim(), (3, 2));
        assert_eq!(arr[[0, 0]], 0.0);
        assert_eq!(arr[[2, 0]], 2.0);
        assert_eq!(arr[[0, 1]], 3.0);
        assert_eq!(arr[[2, 1]], 5.0);
    }

    #[test]
    fn velocity_bad_values_are_mapped() {
        let mut dat = subheader(10, 2, 1, b"E000003\0");
        dat.extend_from_slice(&FLOAT_BAD_VELOCITY.to_le_bytes());
        dat.extend_from_slice(&0.5f32.to_le_bytes());
        dat.extend(subheader(20, 2, 1, b"E000001\0"));
        dat.extend_from_slice(&INT_BAD_VELOCITY.to_le_bytes());
        dat.extend_from_slice(&(-250i32).to_le_bytes());

        let parsed = parse_payload(&dat, 20).unwrap();
        let earth = parsed.records[0].array().unwrap();
        assert!(is_bad(earth[[0, 0]]));
        assert_eq!(earth[[1, 0]], 0.5);
        let beam = parsed.records[1].array().unwrap();
        assert!(is_bad(beam[[0, 0]]));
        assert_eq!(beam[[1, 0]], -0.25);
    }

    #[test]
    fn amplitude_is_not_sentinel_mapped() {
        let mut dat = subheader(10, 1, 1, b"E000004\0");
        dat.extend_from_slice(&FLOAT_BAD_VELOCITY.to_le_bytes());
        let parsed = parse_payload(&dat, 20).unwrap();
        assert!(!is_bad(parsed.records[0].array().unwrap()[[0, 0]]));
    }

    #[test]
    fn stops_when_dataset_overruns_payload() {
        let mut dat = subheader(10, 1, 1, b"E000004\0");
        dat.extend_from_slice(&1f32.to_le_bytes());
        dat.extend(subheader(10, 100, 4, b"E000005\0"));
        dat.extend_from_slice(&[0u8; 16]);

        let parsed = parse_payload(&dat, 20).unwrap();
        assert_eq!(parsed.records.len(), 1);
    }

    #[test]
    fn stops_at_empty_name() {
        let mut dat = subheader(10, 1, 1, b"E000004\0");
        dat.extend_from_slice(&1f32.to_le_bytes());
        dat.extend(subheader(10, 1, 1, b"\0\0\0\0\0\0\0\0"));
        dat.extend_from_slice(&1f32.to_le_bytes());

        let parsed = parse_payload(&dat, 20).unwrap();
        assert_eq!(parsed.records.len(), 1);
    }

    #[test]
    fn max_datasets_bound() {
        let mut dat = Vec::new();
        for name in [b"E000004\0", b"E000005\0", b"E000006\0"] {
            dat.extend(subheader(10, 1, 1, name));
            dat.extend_from_slice(&1f32.to_le_bytes());
        }
        assert_eq!(parse_payload(&dat, 2).unwrap().records.len(), 2);
        assert_eq!(parse_payload(&dat, 20).unwrap().records.len(), 3);
    }

    #[test]
    fn unknown_datasets_are_skipped() {
        let mut dat = subheader(10, 1, 1, b"E000042\0");
        dat.extend_from_slice(&1f32.to_le_bytes());
        dat.extend(subheader(10, 1, 1, b"E000004\0"));
        dat.extend_from_slice(&2f32.to_le_bytes());

        let parsed = parse_payload(&dat, 20).unwrap();
        assert_eq!(parsed.unknown, vec!["E000042".to_string()]);
        assert_eq!(parsed.records.len(), 1);
        assert_eq!(parsed.records[0].tag, DatasetTag::Amplitude);
    }

    #[test]
    fn invalid_type_code_is_error() {
        let mut dat = subheader(11, 1, 1, b"E000004\0");
        dat.extend_from_slice(&1f32.to_le_bytes());
        assert!(matches!(parse_payload(&dat, 20), Err(Error::Decode(_))));
    }

    #[test]
    fn empty_payload_is_error() {
        assert!(matches!(parse_payload(&[], 20), Err(Error::Decode(_))));
    }
}
