use std::fmt;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::prelude::*;

/// Float velocity bad value written by the instrument.
pub const FLOAT_BAD_VELOCITY: f32 = 88.888;
/// Integer velocity bad value, in mm/s.
pub const INT_BAD_VELOCITY: i32 = -32768;

/// Storage type of a dataset's elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    Float32,
    Int32,
    Byte,
}

impl ValueKind {
    #[must_use]
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            10 => Some(ValueKind::Float32),
            20 => Some(ValueKind::Int32),
            50 => Some(ValueKind::Byte),
            _ => None,
        }
    }

    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            ValueKind::Float32 => 10,
            ValueKind::Int32 => 20,
            ValueKind::Byte => 50,
        }
    }

    /// Width of one element in bytes.
    #[must_use]
    pub fn width(&self) -> usize {
        match self {
            ValueKind::Float32 | ValueKind::Int32 => 4,
            ValueKind::Byte => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EngineeringKind {
    Profile,
    BottomTrack,
    SystemSetup,
    RangeTracking,
}

/// Identifies a dataset within an ensemble payload.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DatasetTag {
    BeamVelocity,
    InstrumentVelocity,
    EarthVelocity,
    /// Velocity in ship coordinates. Not produced by the instrument firmware; written by
    /// post-processing tools under the name `E000016`.
    ShipVelocity,
    Amplitude,
    Correlation,
    GoodBeam,
    GoodEarth,
    EnsembleInfo,
    Ancillary,
    BottomTrack,
    Nmea,
    Engineering(EngineeringKind),
    Unknown(String),
}

impl DatasetTag {
    /// Map a dataset name, with or without its trailing NUL, to a tag.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name.trim_end_matches('\0') {
            "E000001" => DatasetTag::BeamVelocity,
            "E000002" => DatasetTag::InstrumentVelocity,
            "E000003" => DatasetTag::EarthVelocity,
            "E000004" => DatasetTag::Amplitude,
            "E000005" => DatasetTag::Correlation,
            "E000006" => DatasetTag::GoodBeam,
            "E000007" => DatasetTag::GoodEarth,
            "E000008" => DatasetTag::EnsembleInfo,
            "E000009" => DatasetTag::Ancillary,
            "E000010" => DatasetTag::BottomTrack,
            "E000011" => DatasetTag::Nmea,
            "E000012" => DatasetTag::Engineering(EngineeringKind::Profile),
            "E000013" => DatasetTag::Engineering(EngineeringKind::BottomTrack),
            "E000014" => DatasetTag::Engineering(EngineeringKind::SystemSetup),
            "E000015" => DatasetTag::Engineering(EngineeringKind::RangeTracking),
            "E000016" => DatasetTag::ShipVelocity,
            other => DatasetTag::Unknown(other.to_string()),
        }
    }

    /// Name as written on the wire, without the trailing NUL.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            DatasetTag::BeamVelocity => "E000001",
            DatasetTag::InstrumentVelocity => "E000002",
            DatasetTag::EarthVelocity => "E000003",
            DatasetTag::Amplitude => "E000004",
            DatasetTag::Correlation => "E000005",
            DatasetTag::GoodBeam => "E000006",
            DatasetTag::GoodEarth => "E000007",
            DatasetTag::EnsembleInfo => "E000008",
            DatasetTag::Ancillary => "E000009",
            DatasetTag::BottomTrack => "E000010",
            DatasetTag::Nmea => "E000011",
            DatasetTag::Engineering(EngineeringKind::Profile) => "E000012",
            DatasetTag::Engineering(EngineeringKind::BottomTrack) => "E000013",
            DatasetTag::Engineering(EngineeringKind::SystemSetup) => "E000014",
            DatasetTag::Engineering(EngineeringKind::RangeTracking) => "E000015",
            DatasetTag::ShipVelocity => "E000016",
            DatasetTag::Unknown(name) => name,
        }
    }

    /// True for the water velocity datasets, whose bad values are mapped to [BAD_VALUE].
    #[must_use]
    pub fn is_velocity(&self) -> bool {
        matches!(
            self,
            DatasetTag::BeamVelocity
                | DatasetTag::InstrumentVelocity
                | DatasetTag::EarthVelocity
                | DatasetTag::ShipVelocity
        )
    }
}

impl fmt::Display for DatasetTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DatasetValues {
    /// Numeric values addressed `[bin][beam]`. Datasets that are not per bin have a
    /// single column.
    Numeric(Array2<f64>),
    Bytes(Vec<u8>),
}

/// One decoded dataset.
///
/// Velocities are in m/s with the instrument bad values replaced by [BAD_VALUE]. All
/// other values are kept in the units the instrument writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetRecord {
    pub tag: DatasetTag,
    pub kind: ValueKind,
    pub bin_count: usize,
    pub beam_count: usize,
    pub imaginary: i32,
    pub values: DatasetValues,
}

impl PartialEq for DatasetRecord {
    /// Records are equal when their layout matches and every value matches, bad values
    /// comparing equal to each other.
    fn eq(&self, other: &Self) -> bool {
        if self.tag != other.tag
            || self.kind != other.kind
            || self.bin_count != other.bin_count
            || self.beam_count != other.beam_count
            || self.imaginary != other.imaginary
        {
            return false;
        }
        match (&self.values, &other.values) {
            (DatasetValues::Numeric(a), DatasetValues::Numeric(b)) => {
                a.shape() == b.shape()
                    && a.iter()
                        .zip(b.iter())
                        .all(|(x, y)| x == y || (is_bad(*x) && is_bad(*y)))
            }
            (DatasetValues::Bytes(a), DatasetValues::Bytes(b)) => a == b,
            _ => false,
        }
    }
}

impl DatasetRecord {
    fn numeric(tag: DatasetTag, kind: ValueKind, values: Array2<f64>) -> Self {
        let (bin_count, beam_count) = values.dim();
        DatasetRecord {
            tag,
            kind,
            bin_count,
            beam_count,
            imaginary: 0,
            values: DatasetValues::Numeric(values),
        }
    }

    /// Float dataset from values addressed `[bin][beam]`.
    #[must_use]
    pub fn float(tag: DatasetTag, values: Array2<f64>) -> Self {
        Self::numeric(tag, ValueKind::Float32, values)
    }

    /// Int dataset from values addressed `[bin][beam]`. Velocities are given in m/s.
    #[must_use]
    pub fn int(tag: DatasetTag, values: Array2<f64>) -> Self {
        Self::numeric(tag, ValueKind::Int32, values)
    }

    /// Single column float dataset.
    #[must_use]
    pub fn float_column(tag: DatasetTag, values: &[f64]) -> Self {
        let arr = Array2::from_shape_fn((values.len(), 1), |(i, _)| values[i]);
        Self::float(tag, arr)
    }

    #[must_use]
    pub fn bytes(tag: DatasetTag, dat: Vec<u8>) -> Self {
        DatasetRecord {
            tag,
            kind: ValueKind::Byte,
            bin_count: dat.len(),
            beam_count: 1,
            imaginary: 0,
            values: DatasetValues::Bytes(dat),
        }
    }

    #[must_use]
    pub fn array(&self) -> Option<&Array2<f64>> {
        match &self.values {
            DatasetValues::Numeric(arr) => Some(arr),
            DatasetValues::Bytes(_) => None,
        }
    }

    #[must_use]
    pub fn raw_bytes(&self) -> Option<&[u8]> {
        match &self.values {
            DatasetValues::Bytes(dat) => Some(dat),
            DatasetValues::Numeric(_) => None,
        }
    }

    /// Values of a single column dataset, in order.
    #[must_use]
    pub fn column(&self) -> Vec<f64> {
        match &self.values {
            DatasetValues::Numeric(arr) => arr.iter().copied().collect(),
            DatasetValues::Bytes(dat) => dat.iter().map(|b| f64::from(*b)).collect(),
        }
    }
}

/// Contents of the `EnsembleInfo` dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleInfo {
    pub ensemble_number: i32,
    pub bin_count: i32,
    pub beam_count: i32,
    pub desired_pings: i32,
    pub actual_pings: i32,
    pub status: i32,
    pub year: i32,
    pub month: i32,
    pub day: i32,
    pub hour: i32,
    pub minute: i32,
    pub second: i32,
    pub hundredths: i32,
    pub serial_number: String,
    /// Firmware revision, minor, major, subsystem code
    pub firmware: [u8; 4],
    pub subsystem_config: u8,
}

const INFO_SCALARS: usize = 13;
const SERIAL_WORDS: usize = 8;
/// Scalars, serial number, firmware and subsystem configuration words.
const INFO_WORDS: usize = INFO_SCALARS + SERIAL_WORDS + 2;

impl EnsembleInfo {
    /// # Errors
    /// [Error::NotEnoughData] if the record is shorter than the fixed scalars.
    pub fn from_record(rec: &DatasetRecord) -> Result<Self> {
        let words: Vec<i32> = rec.column().iter().map(|v| *v as i32).collect();
        if words.len() < INFO_SCALARS {
            return Err(Error::NotEnoughData {
                actual: words.len(),
                minimum: INFO_SCALARS,
            });
        }
        let bytes_at = |range: std::ops::Range<usize>| -> Vec<u8> {
            words
                .get(range)
                .unwrap_or_default()
                .iter()
                .flat_map(|w| w.to_le_bytes())
                .collect()
        };
        let serial = bytes_at(INFO_SCALARS..INFO_SCALARS + SERIAL_WORDS);
        let serial_number = String::from_utf8_lossy(&serial)
            .trim_end_matches('\0')
            .to_string();
        let mut firmware = [0u8; 4];
        let fw = bytes_at(INFO_SCALARS + SERIAL_WORDS..INFO_SCALARS + SERIAL_WORDS + 1);
        if fw.len() == 4 {
            firmware.copy_from_slice(&fw);
        }
        let subsystem_config = bytes_at(INFO_WORDS - 1..INFO_WORDS)
            .get(3)
            .copied()
            .unwrap_or(0);

        Ok(EnsembleInfo {
            ensemble_number: words[0],
            bin_count: words[1],
            beam_count: words[2],
            desired_pings: words[3],
            actual_pings: words[4],
            status: words[5],
            year: words[6],
            month: words[7],
            day: words[8],
            hour: words[9],
            minute: words[10],
            second: words[11],
            hundredths: words[12],
            serial_number,
            firmware,
            subsystem_config,
        })
    }

    #[must_use]
    pub fn to_record(&self) -> DatasetRecord {
        let mut words = vec![
            self.ensemble_number,
            self.bin_count,
            self.beam_count,
            self.desired_pings,
            self.actual_pings,
            self.status,
            self.year,
            self.month,
            self.day,
            self.hour,
            self.minute,
            self.second,
            self.hundredths,
        ];
        let mut serial = [0u8; SERIAL_WORDS * 4];
        for (dst, src) in serial.iter_mut().zip(self.serial_number.bytes()) {
            *dst = src;
        }
        words.extend(
            serial
                .chunks_exact(4)
                .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]])),
        );
        words.push(i32::from_le_bytes(self.firmware));
        words.push(i32::from_le_bytes([0, 0, 0, self.subsystem_config]));

        let arr = Array2::from_shape_fn((words.len(), 1), |(i, _)| f64::from(words[i]));
        DatasetRecord::int(DatasetTag::EnsembleInfo, arr)
    }
}

/// Contents of the `Ancillary` dataset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ancillary {
    /// Range to the center of the first bin, meters
    pub first_bin_range: f64,
    pub bin_size: f64,
    pub first_ping_time: f64,
    pub last_ping_time: f64,
    pub heading: f64,
    pub pitch: f64,
    pub roll: f64,
    pub water_temperature: f64,
    pub system_temperature: f64,
    pub salinity: f64,
    /// Pascal
    pub pressure: f64,
    pub transducer_depth: f64,
    pub speed_of_sound: f64,
}

const ANCILLARY_LEN: usize = 13;

impl Ancillary {
    /// # Errors
    /// [Error::NotEnoughData] if the record is shorter than the ancillary scalars.
    pub fn from_record(rec: &DatasetRecord) -> Result<Self> {
        let v = rec.column();
        if v.len() < ANCILLARY_LEN {
            return Err(Error::NotEnoughData {
                actual: v.len(),
                minimum: ANCILLARY_LEN,
            });
        }
        Ok(Ancillary {
            first_bin_range: v[0],
            bin_size: v[1],
            first_ping_time: v[2],
            last_ping_time: v[3],
            heading: v[4],
            pitch: v[5],
            roll: v[6],
            water_temperature: v[7],
            system_temperature: v[8],
            salinity: v[9],
            pressure: v[10],
            transducer_depth: v[11],
            speed_of_sound: v[12],
        })
    }

    #[must_use]
    pub fn to_record(&self) -> DatasetRecord {
        DatasetRecord::float_column(
            DatasetTag::Ancillary,
            &[
                self.first_bin_range,
                self.bin_size,
                self.first_ping_time,
                self.last_ping_time,
                self.heading,
                self.pitch,
                self.roll,
                self.water_temperature,
                self.system_temperature,
                self.salinity,
                self.pressure,
                self.transducer_depth,
                self.speed_of_sound,
            ],
        )
    }
}

/// Contents of the `BottomTrack` dataset.
///
/// Per-beam velocities are in m/s with bad values replaced by [BAD_VALUE].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BottomTrack {
    pub first_ping_time: f64,
    pub last_ping_time: f64,
    pub heading: f64,
    pub pitch: f64,
    pub roll: f64,
    pub water_temperature: f64,
    pub system_temperature: f64,
    pub salinity: f64,
    pub pressure: f64,
    pub transducer_depth: f64,
    pub speed_of_sound: f64,
    pub status: f64,
    pub actual_pings: f64,
    pub range: Vec<f64>,
    pub snr: Vec<f64>,
    pub amplitude: Vec<f64>,
    pub correlation: Vec<f64>,
    pub beam_velocity: Vec<f64>,
    pub beam_good: Vec<f64>,
    pub instrument_velocity: Vec<f64>,
    pub instrument_good: Vec<f64>,
    pub earth_velocity: Vec<f64>,
    pub earth_good: Vec<f64>,
}

/// Most beams an RTB instrument reports in one dataset.
pub const MAX_BEAMS: usize = 4;

const BT_SCALARS: usize = 14;
const BT_BLOCKS: usize = 10;

fn bad_velocity(v: f64) -> f64 {
    if v as f32 == FLOAT_BAD_VELOCITY {
        BAD_VALUE
    } else {
        v
    }
}

impl BottomTrack {
    /// # Errors
    /// [Error::NotEnoughData] if the record is too short for its scalars or declared
    /// beams, [Error::Decode] if the beam count is outside `0..=MAX_BEAMS`.
    pub fn from_record(rec: &DatasetRecord) -> Result<Self> {
        let v = rec.column();
        if v.len() < BT_SCALARS {
            return Err(Error::NotEnoughData {
                actual: v.len(),
                minimum: BT_SCALARS,
            });
        }
        let declared = v[12];
        if !(0.0..=MAX_BEAMS as f64).contains(&declared) {
            return Err(Error::Decode(format!(
                "bottom track beam count {declared} outside 0..={MAX_BEAMS}"
            )));
        }
        let beams = declared as usize;
        let minimum = BT_SCALARS + BT_BLOCKS * beams;
        if v.len() < minimum {
            return Err(Error::NotEnoughData {
                actual: v.len(),
                minimum,
            });
        }
        let block = |n: usize| -> Vec<f64> {
            let start = BT_SCALARS + n * beams;
            v[start..start + beams].to_vec()
        };
        let velocity = |n: usize| -> Vec<f64> { block(n).into_iter().map(bad_velocity).collect() };

        Ok(BottomTrack {
            first_ping_time: v[0],
            last_ping_time: v[1],
            heading: v[2],
            pitch: v[3],
            roll: v[4],
            water_temperature: v[5],
            system_temperature: v[6],
            salinity: v[7],
            pressure: v[8],
            transducer_depth: v[9],
            speed_of_sound: v[10],
            status: v[11],
            actual_pings: v[13],
            range: block(0),
            snr: block(1),
            amplitude: block(2),
            correlation: block(3),
            beam_velocity: velocity(4),
            beam_good: block(5),
            instrument_velocity: velocity(6),
            instrument_good: block(7),
            earth_velocity: velocity(8),
            earth_good: block(9),
        })
    }

    #[must_use]
    pub fn beam_count(&self) -> usize {
        self.range.len()
    }

    #[must_use]
    pub fn to_record(&self) -> DatasetRecord {
        let wire_velocity = |v: &[f64]| -> Vec<f64> {
            v.iter()
                .map(|x| if is_bad(*x) { f64::from(FLOAT_BAD_VELOCITY) } else { *x })
                .collect()
        };
        let mut values = vec![
            self.first_ping_time,
            self.last_ping_time,
            self.heading,
            self.pitch,
            self.roll,
            self.water_temperature,
            self.system_temperature,
            self.salinity,
            self.pressure,
            self.transducer_depth,
            self.speed_of_sound,
            self.status,
            self.beam_count() as f64,
            self.actual_pings,
        ];
        values.extend_from_slice(&self.range);
        values.extend_from_slice(&self.snr);
        values.extend_from_slice(&self.amplitude);
        values.extend_from_slice(&self.correlation);
        values.extend(wire_velocity(&self.beam_velocity));
        values.extend_from_slice(&self.beam_good);
        values.extend(wire_velocity(&self.instrument_velocity));
        values.extend_from_slice(&self.instrument_good);
        values.extend(wire_velocity(&self.earth_velocity));
        values.extend_from_slice(&self.earth_good);
        DatasetRecord::float_column(DatasetTag::BottomTrack, &values)
    }
}
