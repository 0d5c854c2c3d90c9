//! Concatenation of ensembles into time by bin arrays.
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use ndarray::{s, Array1, Array2, Array3};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use typed_builder::TypedBuilder;

use crate::context::ProcessingContext;
use crate::ensemble::{DatasetTag, Ensemble, Orientation};
use crate::prelude::*;
use crate::transform::CoordinateSystem;

/// Number of velocity components in instrument, ship and earth coordinates.
pub const COMPONENTS: usize = 4;

/// Beam counts of the supported heads: vertical beam, 3 and 4 beam Janus.
pub const BEAM_LAYOUTS: [usize; 3] = [1, 3, 4];

/// Circular mean of angles in degrees, ignoring bad values. Result is in (-180, 180].
#[must_use]
pub fn circular_mean(degrees: impl IntoIterator<Item = f64>) -> Option<f64> {
    let (mut s, mut c, mut n) = (0.0, 0.0, 0usize);
    for d in degrees.into_iter().filter(|d| !is_bad(*d)) {
        let r = d.to_radians();
        s += r.sin();
        c += r.cos();
        n += 1;
    }
    if n == 0 {
        return None;
    }
    Some(s.atan2(c).to_degrees())
}

/// Wrap an angle in degrees to (-180, 180].
#[must_use]
pub fn wrap_degrees(d: f64) -> f64 {
    let w = (d + 180.0).rem_euclid(360.0) - 180.0;
    if w == -180.0 {
        180.0
    } else {
        w
    }
}

#[derive(Debug, Clone, TypedBuilder, Serialize, Deserialize)]
pub struct AssemblerConfig {
    /// Use exactly this many bins instead of the smallest bin count observed.
    #[builder(default, setter(strip_option))]
    #[serde(default)]
    pub fixed_bin_count: Option<usize>,
    /// Velocity dataset to use. Defaults to the first one found in the order earth,
    /// ship, instrument, beam.
    #[builder(default, setter(strip_option))]
    #[serde(default)]
    pub velocity_source: Option<CoordinateSystem>,
    /// Correlation is recorded as 0 to 1 and multiplied by this.
    #[builder(default = 255.0)]
    pub correlation_scale: f64,
    /// Year used as the origin for decimal days. Defaults to the year of the first
    /// ensemble.
    #[builder(default, setter(strip_option))]
    #[serde(default)]
    pub yearbase: Option<i32>,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        AssemblerConfig::builder().build()
    }
}

/// Time ordered ensemble data.
///
/// Per-bin arrays are indexed `[time, bin, beam]`, or `[time, bin, component]` for
/// velocity outside of beam coordinates. Missing data is [BAD_VALUE].
///
/// Roll is reported in the RDI convention: near zero for a level down-looking
/// instrument. RoweTech instruments read near zero when level and looking up, so 180
/// degrees is added when assembling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub ensemble_numbers: Vec<u32>,
    pub time: Vec<Option<NaiveDateTime>>,
    /// Source each ensemble was read from
    pub source_index: Vec<usize>,
    pub bin_count: usize,
    pub beam_count: usize,
    pub coordinate_system: CoordinateSystem,
    pub orientation: Orientation,
    pub serial_number: Option<String>,
    pub bin_size: f64,
    /// Range to the center of the first bin
    pub first_bin_range: f64,
    pub yearbase: i32,

    pub velocity: Array3<f64>,
    pub amplitude: Array3<f64>,
    pub correlation: Array3<f64>,
    pub percent_good: Array3<f64>,
    /// Coordinates of the percent good data, if any was found.
    pub percent_good_frame: Option<CoordinateSystem>,

    pub heading: Array1<f64>,
    pub pitch: Array1<f64>,
    pub roll: Array1<f64>,
    pub temperature: Array1<f64>,
    pub salinity: Array1<f64>,
    /// Decibar
    pub pressure: Array1<f64>,
    pub transducer_depth: Array1<f64>,
    pub latitude: Array1<f64>,
    pub longitude: Array1<f64>,

    /// Bottom track velocity in the same coordinates as `velocity`
    pub bt_velocity: Array2<f64>,
    /// Bottom track range along each beam
    pub bt_range: Array2<f64>,

    /// Times whose velocity could not be motion corrected.
    pub uncorrected: Array1<bool>,
    /// Indexes of times that are not after the preceding time.
    pub non_monotonic: Vec<usize>,
}

impl Profile {
    /// A profile of `times` ensembles with every value bad.
    #[must_use]
    pub fn with_shape(
        times: usize,
        bins: usize,
        beams: usize,
        coordinate_system: CoordinateSystem,
    ) -> Self {
        let comps = if coordinate_system == CoordinateSystem::Beam || beams == 1 {
            beams
        } else {
            COMPONENTS
        };
        let series = || Array1::from_elem(times, BAD_VALUE);
        Profile {
            ensemble_numbers: vec![0; times],
            time: vec![None; times],
            source_index: vec![0; times],
            bin_count: bins,
            beam_count: beams,
            coordinate_system,
            orientation: Orientation::Down,
            serial_number: None,
            bin_size: BAD_VALUE,
            first_bin_range: BAD_VALUE,
            yearbase: 2000,
            velocity: Array3::from_elem((times, bins, comps), BAD_VALUE),
            amplitude: Array3::from_elem((times, bins, beams), BAD_VALUE),
            correlation: Array3::from_elem((times, bins, beams), BAD_VALUE),
            percent_good: Array3::from_elem((times, bins, beams), BAD_VALUE),
            percent_good_frame: None,
            heading: series(),
            pitch: series(),
            roll: series(),
            temperature: series(),
            salinity: series(),
            pressure: series(),
            transducer_depth: series(),
            latitude: series(),
            longitude: series(),
            bt_velocity: Array2::from_elem((times, comps), BAD_VALUE),
            bt_range: Array2::from_elem((times, beams), BAD_VALUE),
            uncorrected: Array1::from_elem(times, false),
            non_monotonic: Vec::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.time.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    /// Number of velocity components per bin.
    #[must_use]
    pub fn components(&self) -> usize {
        self.velocity.dim().2
    }

    /// True for single, vertical beam, instruments.
    #[must_use]
    pub fn is_vertical_beam(&self) -> bool {
        self.beam_count == 1
    }

    /// Range from the transducer to the center of each bin.
    #[must_use]
    pub fn bin_ranges(&self) -> Array1<f64> {
        Array1::from_shape_fn(self.bin_count, |i| {
            self.first_bin_range + i as f64 * self.bin_size
        })
    }

    /// Depth of each bin below the surface, from the median transducer depth.
    #[must_use]
    pub fn bin_depths(&self) -> Array1<f64> {
        let mut depths: Vec<f64> = self
            .transducer_depth
            .iter()
            .copied()
            .filter(|d| !is_bad(*d))
            .collect();
        depths.sort_by(f64::total_cmp);
        let median = match depths.len() {
            0 => 0.0,
            n if n % 2 == 1 => depths[n / 2],
            n => (depths[n / 2 - 1] + depths[n / 2]) / 2.0,
        };
        let ranges = self.bin_ranges();
        match self.orientation {
            Orientation::Up => ranges.mapv(|r| median - r),
            Orientation::Down => ranges.mapv(|r| median + r),
        }
    }

    /// Decimal days since the start of `yearbase`; bad where a time is missing.
    #[must_use]
    pub fn dday(&self) -> Array1<f64> {
        let origin = NaiveDate::from_ymd_opt(self.yearbase, 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0));
        Array1::from_iter(self.time.iter().map(|t| match (t, origin) {
            (Some(t), Some(origin)) => {
                (*t - origin).num_milliseconds() as f64 / 86_400_000.0
            }
            _ => BAD_VALUE,
        }))
    }
}

/// Copy the first `bins` rows of `src`, `[bin, beam]`, into `dst`, `[bin, beam]`.
fn copy_bins(mut dst: ndarray::ArrayViewMut2<f64>, src: &Array2<f64>, scale: f64) {
    let bins = dst.dim().0.min(src.dim().0);
    let cols = dst.dim().1.min(src.dim().1);
    dst.slice_mut(s![..bins, ..cols])
        .assign(&src.slice(s![..bins, ..cols]).mapv(|v| v * scale));
}

/// Builds a [Profile] from ensembles.
#[derive(Debug, Clone, Default)]
pub struct Assembler {
    config: AssemblerConfig,
}

impl Assembler {
    pub fn new(config: AssemblerConfig) -> Self {
        Assembler { config }
    }

    fn velocity_source(&self, ensembles: &[&Ensemble]) -> CoordinateSystem {
        if let Some(cs) = self.config.velocity_source {
            return cs;
        }
        ensembles
            .iter()
            .find_map(|e| e.coordinate_system)
            .unwrap_or(CoordinateSystem::Beam)
    }

    fn orientation(
        &self,
        ensembles: &[&Ensemble],
        roll: &Array1<f64>,
        ctx: &mut ProcessingContext,
    ) -> Orientation {
        if let Some(o) = ensembles.iter().find_map(|e| e.orientation) {
            return o;
        }
        match circular_mean(roll.iter().copied()) {
            Some(mean) if mean.abs() > 150.0 => Orientation::Up,
            Some(_) => Orientation::Down,
            None => {
                ctx.warn("no roll data to infer orientation; assuming down-looking");
                Orientation::Down
            }
        }
    }

    /// Concatenate `ensembles` in order.
    ///
    /// # Errors
    /// [Error::NotEnoughData] if `ensembles` is empty, [Error::Decode] if none of them
    /// carries a usable beam layout.
    pub fn assemble(&self, ensembles: &[Ensemble], ctx: &mut ProcessingContext) -> Result<Profile> {
        if ensembles.is_empty() {
            return Err(Error::NotEnoughData {
                actual: 0,
                minimum: 1,
            });
        }
        let Some(beams) = ensembles
            .iter()
            .map(|e| e.beam_count)
            .find(|b| BEAM_LAYOUTS.contains(b))
        else {
            return Err(Error::Decode(format!(
                "none of {} ensembles has a beam count in {BEAM_LAYOUTS:?}",
                ensembles.len()
            )));
        };

        let kept: Vec<&Ensemble> = ensembles
            .iter()
            .filter(|e| {
                if !BEAM_LAYOUTS.contains(&e.beam_count) {
                    ctx.ensembles_without_layout += 1;
                    debug!(number = e.number, beams = e.beam_count, "no beam layout");
                    false
                } else if e.beam_count != beams {
                    ctx.beam_count_mismatches += 1;
                    debug!(number = e.number, beams = e.beam_count, "beam count mismatch");
                    false
                } else {
                    true
                }
            })
            .collect();
        if ctx.ensembles_without_layout > 0 {
            ctx.warn(format!(
                "{} ensembles dropped without a usable beam layout",
                ctx.ensembles_without_layout
            ));
        }
        if ctx.beam_count_mismatches > 0 {
            ctx.warn(format!(
                "{} ensembles dropped with a beam count different from {beams}",
                ctx.beam_count_mismatches
            ));
        }

        let bins = self
            .config
            .fixed_bin_count
            .or_else(|| kept.iter().map(|e| e.bin_count).filter(|b| *b > 0).min())
            .unwrap_or(0);
        let cs = self.velocity_source(&kept);
        let mut p = Profile::with_shape(kept.len(), bins, beams, cs);

        // Velocity components come from the data itself where possible.
        if let Some(comps) = kept.iter().find_map(|e| e.velocity(cs)).map(|v| v.dim().1) {
            if comps != p.components() {
                p.velocity = Array3::from_elem((kept.len(), bins, comps), BAD_VALUE);
                p.bt_velocity = Array2::from_elem((kept.len(), comps), BAD_VALUE);
            }
        } else {
            ctx.warn(format!("no {cs:?} velocity found in any ensemble"));
        }

        let pg_tag = match cs {
            CoordinateSystem::Beam | CoordinateSystem::Instrument => DatasetTag::GoodBeam,
            CoordinateSystem::Ship | CoordinateSystem::Earth => DatasetTag::GoodEarth,
        };
        let pg_tag = if kept.iter().any(|e| e.record(&pg_tag).is_some()) {
            Some(pg_tag)
        } else {
            [DatasetTag::GoodEarth, DatasetTag::GoodBeam]
                .into_iter()
                .find(|tag| kept.iter().any(|e| e.record(tag).is_some()))
        };
        p.percent_good_frame = pg_tag.as_ref().map(|tag| match tag {
            DatasetTag::GoodBeam => CoordinateSystem::Beam,
            _ => CoordinateSystem::Earth,
        });
        if cs == CoordinateSystem::Ship
            && kept
                .iter()
                .any(|e| e.record(&DatasetTag::BottomTrack).is_some())
        {
            ctx.warn("bottom track has no ship coordinate velocity; bottom track velocity left bad");
        }

        let opt = |v: Option<f64>| v.unwrap_or(BAD_VALUE);
        let mut previous: Option<NaiveDateTime> = None;
        for (t, ens) in kept.iter().enumerate() {
            if ens.bin_count > bins {
                ctx.bins_truncated += 1;
            } else if ens.bin_count < bins {
                ctx.bins_padded += 1;
            }

            p.ensemble_numbers[t] = ens.number;
            p.source_index[t] = ens.source_index;
            p.time[t] = ens.timestamp;
            if let (Some(now), Some(prev)) = (ens.timestamp, previous) {
                if now <= prev {
                    p.non_monotonic.push(t);
                }
            }
            previous = ens.timestamp.or(previous);

            if p.serial_number.is_none() {
                p.serial_number.clone_from(&ens.serial_number);
            }
            if is_bad(p.bin_size) {
                p.bin_size = opt(ens.bin_size);
                p.first_bin_range = opt(ens.first_bin_range);
            }

            if let Some(vel) = ens.velocity(cs) {
                copy_bins(p.velocity.slice_mut(s![t, .., ..]), vel, 1.0);
            }
            if let Some(amp) = ens.record(&DatasetTag::Amplitude).and_then(|r| r.array()) {
                copy_bins(p.amplitude.slice_mut(s![t, .., ..]), amp, 1.0);
            }
            if let Some(cor) = ens.record(&DatasetTag::Correlation).and_then(|r| r.array()) {
                copy_bins(
                    p.correlation.slice_mut(s![t, .., ..]),
                    cor,
                    self.config.correlation_scale,
                );
            }
            if let Some(pg) = pg_tag.as_ref().and_then(|tag| ens.percent_good(tag)) {
                copy_bins(p.percent_good.slice_mut(s![t, .., ..]), &pg, 1.0);
            }

            p.heading[t] = opt(ens.heading);
            p.pitch[t] = opt(ens.pitch);
            p.roll[t] = ens.roll.map_or(BAD_VALUE, |r| wrap_degrees(r + 180.0));
            p.temperature[t] = opt(ens.temperature);
            p.salinity[t] = opt(ens.salinity);
            p.pressure[t] = opt(ens.pressure);
            p.transducer_depth[t] = opt(ens.transducer_depth);
            p.latitude[t] = opt(ens.latitude);
            p.longitude[t] = opt(ens.longitude);

            if let Some(bt) = ens.bottom_track() {
                let bt_vel = match cs {
                    CoordinateSystem::Beam => Some(&bt.beam_velocity),
                    CoordinateSystem::Instrument => Some(&bt.instrument_velocity),
                    CoordinateSystem::Earth => Some(&bt.earth_velocity),
                    CoordinateSystem::Ship => None,
                };
                if let Some(bt_vel) = bt_vel {
                    for (dst, src) in p.bt_velocity.row_mut(t).iter_mut().zip(bt_vel) {
                        *dst = *src;
                    }
                }
                for (dst, src) in p.bt_range.row_mut(t).iter_mut().zip(&bt.range) {
                    // Zero range means no bottom detected.
                    *dst = if *src > 0.0 { *src } else { BAD_VALUE };
                }
            }
        }

        p.orientation = self.orientation(&kept, &p.roll, ctx);
        p.yearbase = self
            .config
            .yearbase
            .or_else(|| p.time.iter().flatten().next().map(|t| t.year()))
            .unwrap_or(2000);

        if ctx.bins_truncated > 0 {
            ctx.warn(format!(
                "{} ensembles truncated to {bins} bins",
                ctx.bins_truncated
            ));
        }
        if ctx.bins_padded > 0 {
            ctx.warn(format!("{} ensembles padded to {bins} bins", ctx.bins_padded));
        }
        ctx.non_monotonic_times = p.non_monotonic.len();
        if !p.non_monotonic.is_empty() {
            ctx.warn(format!(
                "{} ensemble times are not increasing",
                p.non_monotonic.len()
            ));
        }
        info!(
            ensembles = p.len(),
            bins,
            beams,
            coordinates = ?cs,
            orientation = ?p.orientation,
            "assembled profile"
        );
        Ok(p)
    }
}
