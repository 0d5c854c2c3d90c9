//! Ensemble payload decoding.
//!
//! A payload is a sequence of self-describing datasets. [Decoder] turns a validated
//! [RawChunk] into an [Ensemble], which keeps every recognized dataset keyed by its
//! [DatasetTag] and exposes the commonly used scalars directly.
mod dataset;
mod decoder;
pub mod encoder;
pub mod nmea;

pub use dataset::*;

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};
use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;
use typed_builder::TypedBuilder;

use crate::framing::RawChunk;
use crate::prelude::*;
use crate::transform::CoordinateSystem;

/// Maximum number of datasets in a payload.
pub const MAX_DATASETS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Up,
    Down,
}

#[derive(Debug, Clone, TypedBuilder, Serialize, Deserialize)]
pub struct DecoderConfig {
    /// Century used to complete two digit years, e.g., 2000. Defaults to 2000.
    #[builder(default, setter(strip_option))]
    #[serde(default)]
    pub yearbase: Option<i32>,
    #[builder(default = MAX_DATASETS)]
    pub max_datasets: usize,
    /// Orientation assigned to every decoded ensemble. When unset orientation is left
    /// for the profile assembler to infer.
    #[builder(default, setter(strip_option))]
    #[serde(default)]
    pub orientation: Option<Orientation>,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        DecoderConfig::builder().build()
    }
}

/// One decoded ensemble.
///
/// Scalars are `None` when the dataset carrying them is absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ensemble {
    pub number: u32,
    /// Index of the source the ensemble was read from
    pub source_index: usize,
    pub timestamp: Option<NaiveDateTime>,
    pub serial_number: Option<String>,
    pub bin_count: usize,
    pub beam_count: usize,
    pub actual_pings: Option<f64>,
    pub bin_size: Option<f64>,
    pub first_bin_range: Option<f64>,
    pub heading: Option<f64>,
    pub pitch: Option<f64>,
    pub roll: Option<f64>,
    pub temperature: Option<f64>,
    pub salinity: Option<f64>,
    /// Decibar
    pub pressure: Option<f64>,
    pub transducer_depth: Option<f64>,
    pub speed_of_sound: Option<f64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub orientation: Option<Orientation>,
    /// Coordinate system of the highest priority velocity dataset present.
    pub coordinate_system: Option<CoordinateSystem>,
    pub datasets: BTreeMap<DatasetTag, DatasetRecord>,
    /// Names of datasets that were present but not recognized.
    pub unknown_datasets: Vec<String>,
}

impl PartialEq for Ensemble {
    /// Everything else is derived from the datasets.
    fn eq(&self, other: &Self) -> bool {
        self.number == other.number && self.datasets == other.datasets
    }
}

const PASCAL_PER_DECIBAR: f64 = 10_000.0;

/// Datasets, other than velocity, laid out `[bin][beam]`.
const PER_BIN: [DatasetTag; 4] = [
    DatasetTag::Amplitude,
    DatasetTag::Correlation,
    DatasetTag::GoodBeam,
    DatasetTag::GoodEarth,
];

fn timestamp(info: &EnsembleInfo, yearbase: Option<i32>) -> Option<NaiveDateTime> {
    let year = if (0..100).contains(&info.year) {
        let base = yearbase.unwrap_or(2000);
        base - base.rem_euclid(100) + info.year
    } else {
        info.year
    };
    let ts = NaiveDate::from_ymd_opt(year, u32::try_from(info.month).ok()?, u32::try_from(info.day).ok()?)?
        .and_hms_milli_opt(
            u32::try_from(info.hour).ok()?,
            u32::try_from(info.minute).ok()?,
            u32::try_from(info.second).ok()?,
            u32::try_from(info.hundredths).ok()? * 10,
        );
    if ts.is_none() {
        debug!(ensemble = info.ensemble_number, "invalid ensemble time");
    }
    ts
}

impl Ensemble {
    /// Build an ensemble from its datasets, deriving the scalar fields.
    pub fn from_datasets(
        number: u32,
        records: impl IntoIterator<Item = DatasetRecord>,
        config: &DecoderConfig,
    ) -> Self {
        let datasets: BTreeMap<DatasetTag, DatasetRecord> =
            records.into_iter().map(|r| (r.tag.clone(), r)).collect();

        let mut ens = Ensemble {
            number,
            source_index: 0,
            timestamp: None,
            serial_number: None,
            bin_count: 0,
            beam_count: 0,
            actual_pings: None,
            bin_size: None,
            first_bin_range: None,
            heading: None,
            pitch: None,
            roll: None,
            temperature: None,
            salinity: None,
            pressure: None,
            transducer_depth: None,
            speed_of_sound: None,
            latitude: None,
            longitude: None,
            orientation: config.orientation,
            coordinate_system: None,
            datasets,
            unknown_datasets: Vec::default(),
        };

        ens.coordinate_system = CoordinateSystem::PRIORITY
            .into_iter()
            .find(|cs| ens.datasets.contains_key(&cs.velocity_tag()));

        match ens.record(&DatasetTag::EnsembleInfo).map(EnsembleInfo::from_record) {
            Some(Ok(info)) => {
                ens.timestamp = timestamp(&info, config.yearbase);
                ens.bin_count = info.bin_count.max(0) as usize;
                ens.beam_count = info.beam_count.max(0) as usize;
                ens.actual_pings = Some(f64::from(info.actual_pings));
                if !info.serial_number.is_empty() {
                    ens.serial_number = Some(info.serial_number);
                }
            }
            Some(Err(err)) => debug!(number, %err, "bad ensemble info dataset"),
            None => {}
        }
        // The declared layout is bounded by the per-bin data actually present.
        let dims = ens
            .coordinate_system
            .map(|cs| cs.velocity_tag())
            .into_iter()
            .chain(PER_BIN)
            .find_map(|tag| ens.record(&tag))
            .map(|rec| (rec.bin_count, rec.beam_count));
        match dims {
            Some((bins, beams)) => {
                let bound = |declared: usize, actual: usize| {
                    if declared == 0 {
                        actual
                    } else {
                        declared.min(actual)
                    }
                };
                ens.bin_count = bound(ens.bin_count, bins);
                ens.beam_count = bound(ens.beam_count, beams);
            }
            None => ens.bin_count = 0,
        }

        match ens.record(&DatasetTag::Ancillary).map(Ancillary::from_record) {
            Some(Ok(anc)) => {
                ens.first_bin_range = Some(anc.first_bin_range);
                ens.bin_size = Some(anc.bin_size);
                ens.heading = Some(anc.heading);
                ens.pitch = Some(anc.pitch);
                ens.roll = Some(anc.roll);
                ens.temperature = Some(anc.water_temperature);
                ens.salinity = Some(anc.salinity);
                ens.pressure = Some(anc.pressure / PASCAL_PER_DECIBAR);
                ens.transducer_depth = Some(anc.transducer_depth);
                ens.speed_of_sound = Some(anc.speed_of_sound);
            }
            Some(Err(err)) => debug!(number, %err, "bad ancillary dataset"),
            None => {}
        }

        if let Some(fix) = ens
            .record(&DatasetTag::Nmea)
            .and_then(DatasetRecord::raw_bytes)
            .and_then(nmea::last_fix)
        {
            ens.latitude = Some(fix.latitude);
            ens.longitude = Some(fix.longitude);
        }

        ens
    }

    #[must_use]
    pub fn record(&self, tag: &DatasetTag) -> Option<&DatasetRecord> {
        self.datasets.get(tag)
    }

    /// Velocity in `cs` coordinates, m/s addressed `[bin][beam]`.
    #[must_use]
    pub fn velocity(&self, cs: CoordinateSystem) -> Option<&Array2<f64>> {
        self.record(&cs.velocity_tag()).and_then(DatasetRecord::array)
    }

    #[must_use]
    pub fn bottom_track(&self) -> Option<BottomTrack> {
        let rec = self.record(&DatasetTag::BottomTrack)?;
        match BottomTrack::from_record(rec) {
            Ok(bt) => Some(bt),
            Err(err) => {
                debug!(number = self.number, %err, "bad bottom track dataset");
                None
            }
        }
    }

    /// Percent good for `tag` (`GoodBeam` or `GoodEarth`), computed from the good ping
    /// counts and the actual ping count.
    #[must_use]
    pub fn percent_good(&self, tag: &DatasetTag) -> Option<Array2<f64>> {
        let counts = self.record(tag)?.array()?;
        let pings = self.actual_pings.filter(|p| *p > 0.0)?;
        Some(counts.mapv(|c| c / pings * 100.0))
    }
}

/// Decodes validated payloads into [Ensemble]s.
#[derive(Debug, Clone, Default)]
pub struct Decoder {
    config: DecoderConfig,
}

impl Decoder {
    pub fn new(config: DecoderConfig) -> Self {
        Decoder { config }
    }

    /// Decode the datasets of a validated payload.
    ///
    /// # Errors
    /// [Error::Decode] if the payload holds no datasets or a dataset header is
    /// malformed.
    pub fn decode_payload(&self, number: u32, payload: &[u8]) -> Result<Ensemble> {
        let parsed = decoder::parse_payload(payload, self.config.max_datasets)?;
        let mut ens = Ensemble::from_datasets(number, parsed.records, &self.config);
        ens.unknown_datasets = parsed.unknown;
        Ok(ens)
    }

    /// # Errors
    /// See [Decoder::decode_payload].
    pub fn decode(&self, chunk: &RawChunk) -> Result<Ensemble> {
        let mut ens = self.decode_payload(chunk.header.ensemble_number, &chunk.payload)?;
        ens.source_index = chunk.source_index;
        Ok(ens)
    }

    /// Decode a batch in parallel. Results are in the same order as `chunks`.
    pub fn decode_batch(&self, chunks: &[RawChunk]) -> Vec<Result<Ensemble>> {
        chunks.par_iter().map(|c| self.decode(c)).collect()
    }
}
