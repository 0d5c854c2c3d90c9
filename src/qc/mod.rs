//! Threshold based quality control of a [Profile].
//!
//! Each test is independent and only runs when configured. Tests raise flags, they
//! never lower them, so the result does not depend on the order tests run in.
mod config;
mod flag;

use ndarray::{s, Array1, Array3};
use serde::Serialize;
use tracing::{debug, info};

pub use config::{BeamPercentGoodRule, QcConfig, LOOKING_THRESHOLD, PLAUSIBLE_VELOCITY};
pub use flag::QcFlag;

use crate::context::ProcessingContext;
use crate::ensemble::Orientation;
use crate::prelude::*;
use crate::profile::{circular_mean, wrap_degrees, Profile};
use crate::transform::{BeamGeometry, CoordinateSystem};

/// Flags produced for a profile.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QcFlags {
    /// Per time, bin and velocity component; same shape as [Profile::velocity].
    pub velocity: Array3<QcFlag>,
    /// Per time pressure flag.
    pub pressure: Array1<QcFlag>,
}

impl QcFlags {
    fn new(times: usize, bins: usize, comps: usize) -> Self {
        QcFlags {
            velocity: Array3::from_elem((times, bins, comps), QcFlag::NotEvaluated),
            pressure: Array1::from_elem(times, QcFlag::NotEvaluated),
        }
    }

    /// Number of velocity samples carrying `flag`.
    #[must_use]
    pub fn count(&self, flag: QcFlag) -> usize {
        self.velocity.iter().filter(|f| **f == flag).count()
    }

    fn raise_bin(&mut self, t: usize, bin: usize, flag: QcFlag) {
        self.velocity
            .slice_mut(s![t, bin, ..])
            .map_inplace(|f| f.raise(flag));
    }

    fn raise_time(&mut self, t: usize, flag: QcFlag) {
        self.velocity
            .slice_mut(s![t, .., ..])
            .map_inplace(|f| f.raise(flag));
    }
}

#[derive(Debug, Clone, Default)]
pub struct QcEngine {
    config: QcConfig,
    geometry: Option<BeamGeometry>,
}

impl QcEngine {
    /// `geometry` supplies the beam angle for the side lobe test.
    pub fn new(config: QcConfig, geometry: Option<BeamGeometry>) -> Self {
        QcEngine { config, geometry }
    }

    /// Evaluate `profile`.
    ///
    /// The profile is only changed when a fixed transducer depth replaces a missing
    /// pressure sensor, or when implausible velocity is removed.
    pub fn apply(&self, profile: &mut Profile, ctx: &mut ProcessingContext) -> QcFlags {
        let (times, bins, comps) = profile.velocity.dim();
        let mut flags = QcFlags::new(times, bins, comps);
        if self.config.no_quality_control {
            ctx.quality_control_applied = false;
            info!("quality control disabled");
            return flags;
        }
        ctx.quality_control_applied = true;

        self.fixed_depth(profile, ctx);

        if self.config.any_test() {
            flags.velocity.fill(QcFlag::Good);
            let config = &self.config;
            if let Some(range) = config.plausible_velocity {
                plausibility_cut(profile, range, ctx);
            }
            if let Some(th) = config.amplitude_threshold {
                below_threshold(profile, &profile.amplitude, th, &mut flags);
            }
            if let Some(th) = config.correlation_threshold {
                below_threshold(profile, &profile.correlation, th, &mut flags);
            }
            if let Some(th) = config.percent_good_threshold {
                self.percent_good_test(profile, th, &mut flags, ctx);
            }
            self.velocity_tests(profile, &mut flags, ctx);
            if let Some(th) = config.roll_threshold {
                tilt_test(&profile.roll, th, &mut flags);
            }
            if let Some(th) = config.pitch_threshold {
                tilt_test(&profile.pitch, th, &mut flags);
            }
            if let Some(th) = config.looking_threshold {
                tilt_test(&profile.roll, th, &mut flags);
                tilt_test(&profile.pitch, th, &mut flags);
            }
            if let Some(range) = config.pressure_range {
                self.pressure_test(profile, range, &mut flags);
            }
            if config.sidelobe_correction {
                self.sidelobe_test(profile, &mut flags, ctx);
            }
            missing_test(profile, &mut flags);
        } else {
            debug!("no quality control test configured");
        }

        for (t, _) in profile.uncorrected.iter().enumerate().filter(|(_, u)| **u) {
            flags.raise_time(t, QcFlag::ProbablyBad);
        }

        info!(
            good = flags.count(QcFlag::Good),
            probably_bad = flags.count(QcFlag::ProbablyBad),
            bad = flags.count(QcFlag::Bad),
            missing = flags.count(QcFlag::Missing),
            "quality control"
        );
        flags
    }

    fn fixed_depth(&self, profile: &mut Profile, ctx: &mut ProcessingContext) {
        let Some(depth) = self.config.force_fixed_depth else {
            return;
        };
        let has_sensor = profile.pressure.iter().any(|p| !is_bad(*p) && *p != 0.0);
        if has_sensor {
            debug!("pressure sensor present, fixed depth not used");
            return;
        }
        ctx.warn(format!(
            "no pressure sensor data; using a fixed transducer depth of {depth} m"
        ));
        profile.transducer_depth.fill(depth);
    }

    fn percent_good_test(
        &self,
        profile: &Profile,
        th: f64,
        flags: &mut QcFlags,
        ctx: &mut ProcessingContext,
    ) {
        let pg = &profile.percent_good;
        let (times, bins, beams) = pg.dim();
        match profile.percent_good_frame {
            None => ctx.warn("percent good test skipped: no percent good data"),
            Some(CoordinateSystem::Earth | CoordinateSystem::Ship) => {
                // 3 beam plus 4 beam solutions
                for t in 0..times {
                    for bin in 0..bins {
                        let mut sum = pg[[t, bin, 0]];
                        if beams >= 4 {
                            sum += pg[[t, bin, 3]];
                        }
                        if !is_bad(sum) && sum < th {
                            flags.raise_bin(t, bin, QcFlag::Bad);
                        }
                    }
                }
            }
            Some(CoordinateSystem::Beam | CoordinateSystem::Instrument) => {
                match self.config.beam_percent_good_rule {
                    None => ctx.warn(
                        "percent good test skipped: per beam percent good needs a beam percent good rule",
                    ),
                    Some(BeamPercentGoodRule::PerBeam) => below_threshold(profile, pg, th, flags),
                    Some(BeamPercentGoodRule::Summed) => {
                        beam_aggregate(pg, th, flags, |sum, _| sum);
                    }
                    Some(BeamPercentGoodRule::Mean) => {
                        beam_aggregate(pg, th, flags, |sum, n| sum / n as f64);
                    }
                }
            }
        }
    }

    fn velocity_tests(&self, profile: &Profile, flags: &mut QcFlags, ctx: &mut ProcessingContext) {
        let config = &self.config;
        let any = config.horizontal_velocity_threshold.is_some()
            || config.vertical_velocity_threshold.is_some()
            || config.error_velocity_threshold.is_some();
        if !any {
            return;
        }
        let vertical = profile.is_vertical_beam();
        if profile.coordinate_system == CoordinateSystem::Beam && !vertical {
            ctx.warn("velocity magnitude tests skipped: data is in beam coordinates");
            return;
        }
        let (times, bins, comps) = profile.velocity.dim();
        let vel = &profile.velocity;
        for t in 0..times {
            for bin in 0..bins {
                let v = vel.slice(s![t, bin, ..]);
                let mut fail = false;
                if vertical {
                    if let Some(th) = config.vertical_velocity_threshold {
                        fail |= v[0].abs() > th;
                    }
                } else {
                    if let (Some(th), true) = (config.horizontal_velocity_threshold, comps >= 2) {
                        fail |= v[0].hypot(v[1]) > th;
                    }
                    if let (Some(th), true) = (config.vertical_velocity_threshold, comps >= 3) {
                        fail |= v[2].abs() > th;
                    }
                    if let (Some(th), true) = (config.error_velocity_threshold, comps >= 4) {
                        fail |= v[3].abs() > th;
                    }
                }
                if fail {
                    flags.raise_bin(t, bin, QcFlag::Bad);
                }
            }
        }
    }

    fn pressure_test(&self, profile: &Profile, (min, max): (f64, f64), flags: &mut QcFlags) {
        if self.config.force_fixed_depth.is_some()
            && profile.pressure.iter().all(|p| is_bad(*p) || *p == 0.0)
        {
            debug!("pressure test replaced by a fixed depth");
            return;
        }
        for (flag, p) in flags.pressure.iter_mut().zip(profile.pressure.iter()) {
            *flag = if is_bad(*p) || *p < min || *p > max {
                QcFlag::Bad
            } else {
                QcFlag::Good
            };
        }
    }

    /// Distance from the transducer to the reflecting boundary at time `t`.
    fn boundary_distance(&self, profile: &Profile, t: usize) -> Option<f64> {
        let valid = |d: &f64| !is_bad(*d) && *d > 0.0;
        match profile.orientation {
            Orientation::Down => profile
                .bt_range
                .row(t)
                .iter()
                .copied()
                .filter(valid)
                .min_by(f64::total_cmp)
                .or_else(|| {
                    self.config
                        .bottom_depth
                        .map(|bottom| bottom - profile.transducer_depth[t])
                        .filter(valid)
                }),
            Orientation::Up => Some(profile.transducer_depth[t]).filter(valid),
        }
    }

    fn sidelobe_test(&self, profile: &Profile, flags: &mut QcFlags, ctx: &mut ProcessingContext) {
        let Some(geometry) = self.geometry else {
            ctx.warn("side lobe test skipped: beam angle unknown");
            return;
        };
        let cos = geometry.angle.to_radians().cos();
        let ranges = profile.bin_ranges();
        let mut skipped = 0usize;
        for t in 0..profile.len() {
            let Some(distance) = self.boundary_distance(profile, t) else {
                skipped += 1;
                continue;
            };
            let limit = distance * cos;
            for (bin, _) in ranges.iter().enumerate().filter(|(_, r)| **r > limit) {
                flags.raise_bin(t, bin, QcFlag::Bad);
            }
        }
        if skipped > 0 {
            ctx.warn(format!(
                "side lobe test skipped for {skipped} ensembles without a boundary distance"
            ));
        }
    }
}

/// Flag values below `th`. In beam coordinates only the failing beam is flagged,
/// otherwise the whole bin.
fn below_threshold(profile: &Profile, values: &Array3<f64>, th: f64, flags: &mut QcFlags) {
    let per_beam = profile.coordinate_system == CoordinateSystem::Beam
        && values.dim().2 == flags.velocity.dim().2;
    for ((t, bin, beam), v) in values.indexed_iter() {
        if is_bad(*v) || *v >= th {
            continue;
        }
        if per_beam {
            flags.velocity[[t, bin, beam]].raise(QcFlag::Bad);
        } else {
            flags.raise_bin(t, bin, QcFlag::Bad);
        }
    }
}

/// Flag bins where `aggregate(sum, count)` of the valid per beam percent good is below
/// `th`.
fn beam_aggregate(
    pg: &Array3<f64>,
    th: f64,
    flags: &mut QcFlags,
    aggregate: impl Fn(f64, usize) -> f64,
) {
    let (times, bins, _) = pg.dim();
    for t in 0..times {
        for bin in 0..bins {
            let (sum, n) = pg
                .slice(s![t, bin, ..])
                .iter()
                .filter(|v| !is_bad(**v))
                .fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
            if n > 0 && aggregate(sum, n) < th {
                flags.raise_bin(t, bin, QcFlag::Bad);
            }
        }
    }
}

/// Replace implausible velocity with the bad value. Outside beam coordinates one bad
/// east, north or up component removes the whole bin.
fn plausibility_cut(profile: &mut Profile, (min, max): (f64, f64), ctx: &mut ProcessingContext) {
    let implausible = |v: f64| !is_bad(v) && (v <= min || v >= max);
    let beam = profile.coordinate_system == CoordinateSystem::Beam;
    let (times, bins, comps) = profile.velocity.dim();
    let checked = if beam { comps } else { comps.min(3) };
    let mut removed = 0usize;
    for t in 0..times {
        for bin in 0..bins {
            let mut v = profile.velocity.slice_mut(s![t, bin, ..]);
            if beam {
                for x in v.iter_mut().filter(|x| implausible(**x)) {
                    *x = BAD_VALUE;
                    removed += 1;
                }
            } else if v.iter().take(checked).any(|x| implausible(*x)) {
                v.fill(BAD_VALUE);
                removed += 1;
            }
        }
    }
    if removed > 0 {
        ctx.warn(format!(
            "{removed} velocity samples outside {min}..{max} m/s removed"
        ));
    }
}

/// Flag every bin of ensembles whose angle is more than `th` degrees from the
/// deployment mean.
fn tilt_test(angles: &Array1<f64>, th: f64, flags: &mut QcFlags) {
    let Some(mean) = circular_mean(angles.iter().copied()) else {
        return;
    };
    for (t, a) in angles.iter().enumerate() {
        if !is_bad(*a) && wrap_degrees(a - mean).abs() > th {
            flags.raise_time(t, QcFlag::Bad);
        }
    }
}

/// Flag bad velocity. The error velocity alone being bad is not missing data.
fn missing_test(profile: &Profile, flags: &mut QcFlags) {
    let vel = &profile.velocity;
    let (times, bins, comps) = vel.dim();
    if profile.coordinate_system == CoordinateSystem::Beam {
        for ((t, bin, c), v) in vel.indexed_iter() {
            if is_bad(*v) {
                flags.velocity[[t, bin, c]].raise(QcFlag::Missing);
            }
        }
        return;
    }
    for t in 0..times {
        for bin in 0..bins {
            let missing = (0..comps.min(3)).any(|c| is_bad(vel[[t, bin, c]]));
            if missing {
                flags.raise_bin(t, bin, QcFlag::Missing);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::{BeamPattern, TransformConfig, Transformer};

    fn earth(times: usize, bins: usize) -> Profile {
        let mut p = Profile::with_shape(times, bins, 4, CoordinateSystem::Earth);
        p.velocity.fill(0.1);
        p.amplitude.fill(100.0);
        p.correlation.fill(200.0);
        p.percent_good.fill(50.0);
        p.percent_good_frame = Some(CoordinateSystem::Earth);
        p.roll.fill(180.0);
        p.pitch.fill(0.0);
        p.heading.fill(0.0);
        p.pressure.fill(10.0);
        p.transducer_depth.fill(10.0);
        p.first_bin_range = 2.0;
        p.bin_size = 1.0;
        p
    }

    fn geometry() -> Option<BeamGeometry> {
        Some(BeamGeometry {
            angle: 20.0,
            pattern: BeamPattern::Convex,
        })
    }

    fn run(config: QcConfig, p: &mut Profile) -> (QcFlags, ProcessingContext) {
        let mut ctx = ProcessingContext::default();
        let flags = QcEngine::new(config, geometry()).apply(p, &mut ctx);
        (flags, ctx)
    }

    #[test]
    fn amplitude_fails_whole_bin() {
        let mut p = earth(1, 3);
        p.amplitude
            .slice_mut(s![0, 1, ..])
            .assign(&ndarray::arr1(&[60.0, 60.0, 60.0, 5.0]));
        let (flags, _) = run(QcConfig::builder().amplitude_threshold(64.0).build(), &mut p);
        assert!(flags.velocity.slice(s![0, 1, ..]).iter().all(|f| *f == QcFlag::Bad));
        assert!(flags.velocity.slice(s![0, 0, ..]).iter().all(|f| *f == QcFlag::Good));
        assert!(flags.velocity.slice(s![0, 2, ..]).iter().all(|f| *f == QcFlag::Good));
    }

    #[test]
    fn correlation_fails_single_beam_in_beam_coordinates() {
        let mut p = earth(1, 1);
        p.coordinate_system = CoordinateSystem::Beam;
        p.correlation[[0, 0, 2]] = 10.0;
        let (flags, _) = run(QcConfig::builder().correlation_threshold(64.0).build(), &mut p);
        assert_eq!(flags.velocity[[0, 0, 2]], QcFlag::Bad);
        assert_eq!(flags.velocity[[0, 0, 0]], QcFlag::Good);
    }

    #[test]
    fn earth_percent_good_sums_solutions() {
        let mut p = earth(1, 2);
        p.percent_good
            .slice_mut(s![0, 0, ..])
            .assign(&ndarray::arr1(&[20.0, 0.0, 0.0, 60.0]));
        p.percent_good
            .slice_mut(s![0, 1, ..])
            .assign(&ndarray::arr1(&[10.0, 0.0, 0.0, 60.0]));
        let (flags, _) = run(QcConfig::builder().percent_good_threshold(80.0).build(), &mut p);
        assert_eq!(flags.velocity[[0, 0, 0]], QcFlag::Good);
        assert_eq!(flags.velocity[[0, 1, 0]], QcFlag::Bad);
    }

    #[test]
    fn beam_percent_good_needs_a_rule() {
        let mut p = earth(1, 1);
        p.percent_good_frame = Some(CoordinateSystem::Beam);
        p.percent_good.fill(10.0);
        let (flags, ctx) = run(QcConfig::builder().percent_good_threshold(80.0).build(), &mut p);
        assert_eq!(flags.count(QcFlag::Bad), 0);
        assert_eq!(ctx.warnings.len(), 1);
    }

    #[test]
    fn beam_percent_good_rules_differ() {
        let mut p = earth(1, 1);
        p.percent_good_frame = Some(CoordinateSystem::Beam);
        p.percent_good.fill(30.0);

        let per_beam = QcConfig::builder()
            .percent_good_threshold(80.0)
            .beam_percent_good_rule(BeamPercentGoodRule::PerBeam)
            .build();
        let (flags, _) = run(per_beam, &mut p);
        assert_eq!(flags.velocity[[0, 0, 0]], QcFlag::Bad);

        let summed = QcConfig::builder()
            .percent_good_threshold(80.0)
            .beam_percent_good_rule(BeamPercentGoodRule::Summed)
            .build();
        let (flags, _) = run(summed, &mut p);
        assert_eq!(flags.velocity[[0, 0, 0]], QcFlag::Good);
    }

    #[test]
    fn beam_percent_good_mean() {
        let mut p = earth(1, 2);
        p.percent_good_frame = Some(CoordinateSystem::Beam);
        p.percent_good
            .slice_mut(s![0, 0, ..])
            .assign(&ndarray::arr1(&[100.0, 100.0, 60.0, BAD_VALUE]));
        p.percent_good
            .slice_mut(s![0, 1, ..])
            .assign(&ndarray::arr1(&[100.0, 50.0, 60.0, 70.0]));
        let config = QcConfig::builder()
            .percent_good_threshold(80.0)
            .beam_percent_good_rule(BeamPercentGoodRule::Mean)
            .build();
        let (flags, _) = run(config, &mut p);
        // means of the valid beams: 86.7 and 70
        assert_eq!(flags.velocity[[0, 0, 0]], QcFlag::Good);
        assert!(flags.velocity.slice(s![0, 1, ..]).iter().all(|f| *f == QcFlag::Bad));
    }

    #[test]
    fn implausible_velocity_is_removed() {
        let mut p = earth(1, 4);
        p.velocity[[0, 1, 0]] = 10.0;
        p.velocity[[0, 2, 2]] = -12.5;
        // error velocity is not checked
        p.velocity[[0, 3, 3]] = 20.0;
        let (flags, ctx) = run(QcConfig::builder().amplitude_threshold(10.0).build(), &mut p);

        assert!(p.velocity.slice(s![0, 1, ..]).iter().all(|v| is_bad(*v)));
        assert!(p.velocity.slice(s![0, 2, ..]).iter().all(|v| is_bad(*v)));
        assert_eq!(p.velocity[[0, 3, 3]], 20.0);
        assert_eq!(flags.velocity[[0, 1, 0]], QcFlag::Missing);
        assert_eq!(flags.velocity[[0, 2, 3]], QcFlag::Missing);
        assert_eq!(flags.velocity[[0, 0, 0]], QcFlag::Good);
        assert_eq!(flags.velocity[[0, 3, 0]], QcFlag::Good);
        assert_eq!(ctx.warnings.len(), 1);
    }

    #[test]
    fn implausible_beam_velocity_is_removed_per_beam() {
        let mut p = earth(1, 1);
        p.coordinate_system = CoordinateSystem::Beam;
        p.velocity[[0, 0, 1]] = 11.0;
        let config = QcConfig::builder()
            .amplitude_threshold(10.0)
            .plausible_velocity(Some((-5.0, 5.0)))
            .build();
        let (flags, _) = run(config, &mut p);
        assert!(is_bad(p.velocity[[0, 0, 1]]));
        assert_eq!(p.velocity[[0, 0, 0]], 0.1);
        assert_eq!(flags.velocity[[0, 0, 1]], QcFlag::Missing);
        assert_eq!(flags.velocity[[0, 0, 0]], QcFlag::Good);
    }

    #[test]
    fn plausibility_cut_can_be_disabled() {
        let mut p = earth(1, 1);
        p.velocity[[0, 0, 0]] = 50.0;
        let config = QcConfig::builder()
            .amplitude_threshold(10.0)
            .plausible_velocity(None)
            .build();
        let (flags, _) = run(config, &mut p);
        assert_eq!(p.velocity[[0, 0, 0]], 50.0);
        assert_eq!(flags.velocity[[0, 0, 0]], QcFlag::Good);
    }

    #[test]
    fn instrument_not_looking_is_bad() {
        let mut p = earth(4, 2);
        p.pitch.assign(&ndarray::arr1(&[0.0, 1.0, -120.0, 2.0]));
        p.roll.assign(&ndarray::arr1(&[180.0, 179.0, 178.0, 60.0]));
        // no roll or pitch threshold configured
        let (flags, _) = run(QcConfig::builder().amplitude_threshold(10.0).build(), &mut p);
        assert_eq!(flags.velocity[[0, 0, 0]], QcFlag::Good);
        assert_eq!(flags.velocity[[1, 1, 3]], QcFlag::Good);
        assert!(flags.velocity.slice(s![2, .., ..]).iter().all(|f| *f == QcFlag::Bad));
        assert!(flags.velocity.slice(s![3, .., ..]).iter().all(|f| *f == QcFlag::Bad));

        let config = QcConfig::builder()
            .amplitude_threshold(10.0)
            .looking_threshold(None)
            .build();
        let (flags, _) = run(config, &mut p);
        assert_eq!(flags.count(QcFlag::Bad), 0);
    }

    #[test]
    fn velocity_magnitudes() {
        let mut p = earth(1, 4);
        p.velocity
            .slice_mut(s![0, 1, ..])
            .assign(&ndarray::arr1(&[3.0, 4.0, 0.0, 0.0]));
        p.velocity[[0, 2, 2]] = -0.6;
        p.velocity[[0, 3, 3]] = 0.9;
        let config = QcConfig::builder()
            .horizontal_velocity_threshold(4.5)
            .vertical_velocity_threshold(0.5)
            .error_velocity_threshold(0.8)
            .build();
        let (flags, _) = run(config, &mut p);
        assert_eq!(flags.velocity[[0, 0, 0]], QcFlag::Good);
        assert_eq!(flags.velocity[[0, 1, 0]], QcFlag::Bad);
        assert_eq!(flags.velocity[[0, 2, 0]], QcFlag::Bad);
        assert_eq!(flags.velocity[[0, 3, 0]], QcFlag::Bad);
    }

    #[test]
    fn vertical_beam_vertical_velocity() {
        let mut p = Profile::with_shape(1, 2, 1, CoordinateSystem::Beam);
        p.velocity.fill(0.1);
        p.velocity[[0, 1, 0]] = 1.0;
        let (flags, ctx) = run(
            QcConfig::builder()
                .vertical_velocity_threshold(0.5)
                .horizontal_velocity_threshold(0.5)
                .build(),
            &mut p,
        );
        assert_eq!(flags.velocity[[0, 0, 0]], QcFlag::Good);
        assert_eq!(flags.velocity[[0, 1, 0]], QcFlag::Bad);
        assert!(ctx.warnings.is_empty());
    }

    #[test]
    fn roll_from_upward_mean() {
        let mut p = earth(4, 1);
        p.roll.assign(&ndarray::arr1(&[179.0, -178.0, 150.0, 180.0]));
        let (flags, _) = run(QcConfig::builder().roll_threshold(20.0).build(), &mut p);
        assert_eq!(flags.velocity[[0, 0, 0]], QcFlag::Good);
        assert_eq!(flags.velocity[[1, 0, 0]], QcFlag::Good);
        assert_eq!(flags.velocity[[2, 0, 0]], QcFlag::Bad);
        assert_eq!(flags.velocity[[3, 0, 0]], QcFlag::Good);
    }

    #[test]
    fn pressure_range() {
        let mut p = earth(3, 1);
        p.pressure.assign(&ndarray::arr1(&[10.0, BAD_VALUE, 900.0]));
        let (flags, _) = run(QcConfig::builder().pressure_range((0.0, 500.0)).build(), &mut p);
        assert_eq!(
            flags.pressure.to_vec(),
            vec![QcFlag::Good, QcFlag::Bad, QcFlag::Bad]
        );
    }

    #[test]
    fn fixed_depth_without_pressure_sensor() {
        let mut p = earth(2, 1);
        p.pressure.fill(0.0);
        p.transducer_depth.fill(BAD_VALUE);
        let config = QcConfig::builder()
            .pressure_range((1.0, 500.0))
            .force_fixed_depth(3.0)
            .build();
        let (flags, ctx) = run(config, &mut p);
        assert_eq!(p.transducer_depth.to_vec(), vec![3.0, 3.0]);
        assert!(flags.pressure.iter().all(|f| *f == QcFlag::NotEvaluated));
        assert_eq!(ctx.warnings.len(), 1);
    }

    #[test]
    fn sidelobe_from_bottom_track() {
        // cos(20) * 10 = 9.40; bins at 2..=11 m
        let mut p = earth(1, 10);
        p.bt_range
            .row_mut(0)
            .assign(&ndarray::arr1(&[10.5, 10.0, BAD_VALUE, 11.0]));
        let (flags, _) = run(QcConfig::builder().sidelobe_correction(true).build(), &mut p);
        let bad: Vec<usize> = (0..10)
            .filter(|b| flags.velocity[[0, *b, 0]] == QcFlag::Bad)
            .collect();
        assert_eq!(bad, vec![8, 9]);
    }

    #[test]
    fn sidelobe_from_bottom_depth() {
        let mut p = earth(2, 10);
        p.bt_range.row_mut(1).fill(20.0);
        let config = QcConfig::builder()
            .sidelobe_correction(true)
            .bottom_depth(20.0)
            .build();
        let (flags, _) = run(config, &mut p);
        // 20 m bottom, 10 m transducer depth
        assert_eq!(flags.velocity[[0, 7, 0]], QcFlag::Good);
        assert_eq!(flags.velocity[[0, 8, 0]], QcFlag::Bad);
        assert_eq!(flags.velocity[[1, 9, 0]], QcFlag::Good);
    }

    #[test]
    fn sidelobe_upward_uses_transducer_depth() {
        let mut p = earth(1, 10);
        p.orientation = Orientation::Up;
        p.transducer_depth.fill(5.0);
        let (flags, _) = run(QcConfig::builder().sidelobe_correction(true).build(), &mut p);
        // 5 * cos(20) = 4.70
        assert_eq!(flags.velocity[[0, 2, 0]], QcFlag::Good);
        assert_eq!(flags.velocity[[0, 3, 0]], QcFlag::Bad);
    }

    #[test]
    fn sidelobe_mask_is_the_same_in_beam_and_earth_coordinates() {
        let mut p = Profile::with_shape(2, 12, 4, CoordinateSystem::Beam);
        p.velocity.fill(0.2);
        p.heading.fill(30.0);
        p.pitch.fill(2.0);
        p.roll.fill(1.0);
        p.first_bin_range = 2.0;
        p.bin_size = 1.0;
        p.bt_range.row_mut(0).fill(9.0);
        p.bt_range.row_mut(1).fill(11.0);
        let config = QcConfig::builder().sidelobe_correction(true).build();

        let (beam_flags, _) = run(config.clone(), &mut p);
        Transformer::new(TransformConfig::default(), geometry())
            .transform(&mut p)
            .unwrap();
        assert_eq!(p.coordinate_system, CoordinateSystem::Earth);
        let (earth_flags, _) = run(config, &mut p);

        assert!(beam_flags.count(QcFlag::Bad) > 0);
        assert_eq!(beam_flags, earth_flags);
    }

    #[test]
    fn uncorrected_is_at_least_probably_bad() {
        let mut p = earth(2, 2);
        p.uncorrected[1] = true;
        p.amplitude[[1, 0, 0]] = 1.0;
        let (flags, _) = run(QcConfig::builder().amplitude_threshold(10.0).build(), &mut p);
        assert_eq!(flags.velocity[[0, 0, 0]], QcFlag::Good);
        assert_eq!(flags.velocity[[1, 0, 0]], QcFlag::Bad);
        assert_eq!(flags.velocity[[1, 1, 0]], QcFlag::ProbablyBad);
    }

    #[test]
    fn missing_velocity() {
        let mut p = earth(1, 3);
        p.velocity[[0, 0, 1]] = BAD_VALUE;
        p.velocity[[0, 1, 3]] = BAD_VALUE;
        let (flags, _) = run(QcConfig::builder().amplitude_threshold(10.0).build(), &mut p);
        assert!(flags.velocity.slice(s![0, 0, ..]).iter().all(|f| *f == QcFlag::Missing));
        assert_eq!(flags.velocity[[0, 1, 3]], QcFlag::Good);
    }

    #[test]
    fn disabled_versus_no_thresholds() {
        let mut p = earth(2, 2);
        let mut disabled_ctx = ProcessingContext::default();
        let disabled = QcEngine::new(QcConfig::builder().no_quality_control(true).build(), None)
            .apply(&mut p, &mut disabled_ctx);
        let mut empty_ctx = ProcessingContext::default();
        let empty = QcEngine::new(QcConfig::default(), None).apply(&mut p, &mut empty_ctx);

        assert_eq!(disabled.count(QcFlag::NotEvaluated), 16);
        assert_eq!(disabled, empty);
        assert!(!disabled_ctx.quality_control_applied);
        assert!(empty_ctx.quality_control_applied);
    }

    #[test]
    fn test_order_does_not_matter() {
        let mut p = earth(3, 4);
        p.amplitude[[0, 1, 2]] = 1.0;
        p.velocity[[1, 2, 0]] = 9.0;
        p.velocity[[2, 3, 1]] = BAD_VALUE;
        p.roll[2] = 120.0;
        let config = QcConfig::builder()
            .amplitude_threshold(10.0)
            .horizontal_velocity_threshold(2.0)
            .roll_threshold(20.0)
            .build();
        let (all, _) = run(config, &mut p);

        let mut merged = QcFlags::new(3, 4, 4);
        merged.velocity.fill(QcFlag::Good);
        for single in [
            QcConfig::builder().roll_threshold(20.0).build(),
            QcConfig::builder().horizontal_velocity_threshold(2.0).build(),
            QcConfig::builder().amplitude_threshold(10.0).build(),
        ] {
            let (flags, _) = run(single, &mut p);
            ndarray::Zip::from(&mut merged.velocity)
                .and(&flags.velocity)
                .for_each(|m, f| m.raise(*f));
        }
        assert_eq!(all, merged);
        assert_eq!(all.velocity[[2, 3, 0]], QcFlag::Missing);
        assert_eq!(all.velocity[[2, 0, 0]], QcFlag::Bad);
    }
}
