//! Removal of platform motion from water velocity.
use chrono::NaiveDateTime;
use ndarray::s;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::context::ProcessingContext;
use crate::prelude::*;
use crate::profile::Profile;
use crate::transform::CoordinateSystem;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionMode {
    #[default]
    Off,
    /// Subtract the bottom track velocity.
    BottomTrack,
    /// Add the platform velocity from a [NavigationSource].
    Navigation,
}

/// Provides platform velocity over ground.
pub trait NavigationSource {
    /// East and north platform velocity in m/s at `timestamp`, if it is known and finite.
    fn finite_velocity_or_position(&self, timestamp: NaiveDateTime) -> Option<(f64, f64)>;
}

fn seconds(t: NaiveDateTime) -> f64 {
    t.and_utc().timestamp_millis() as f64 / 1000.0
}

/// Platform velocity samples, linearly interpolated between samples.
#[derive(Debug, Clone, Default)]
pub struct VelocityTrack {
    samples: Vec<(f64, f64, f64)>,
}

impl VelocityTrack {
    /// Samples with a non-finite component are dropped. Samples must be in time order.
    pub fn new(samples: impl IntoIterator<Item = (NaiveDateTime, f64, f64)>) -> Self {
        VelocityTrack {
            samples: samples
                .into_iter()
                .filter(|(_, u, v)| u.is_finite() && v.is_finite())
                .map(|(t, u, v)| (seconds(t), u, v))
                .collect(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Interpolated velocity at `t` seconds.
    fn at(&self, t: f64) -> Option<(f64, f64)> {
        let idx = self.samples.partition_point(|(st, _, _)| *st < t);
        if let Some((st, u, v)) = self.samples.get(idx) {
            if *st == t {
                return Some((*u, *v));
            }
        }
        if idx == 0 || idx >= self.samples.len() {
            return None;
        }
        let (t0, u0, v0) = self.samples[idx - 1];
        let (t1, u1, v1) = self.samples[idx];
        let w = (t - t0) / (t1 - t0);
        Some((u0 + w * (u1 - u0), v0 + w * (v1 - v0)))
    }
}

impl NavigationSource for VelocityTrack {
    fn finite_velocity_or_position(&self, timestamp: NaiveDateTime) -> Option<(f64, f64)> {
        self.at(seconds(timestamp))
    }
}

/// WGS84 semi-major axis, meters.
pub const WGS84_A: f64 = 6_378_137.0;
/// WGS84 flattening.
pub const WGS84_F: f64 = 1.0 / 298.257_223_563;
/// Default number of segment velocities averaged by [PositionTrack].
pub const NAVIGATION_WINDOW: usize = 60;

const VINCENTY_ITERATIONS: usize = 200;

/// Geodesic distance in meters and initial bearing in degrees from north between two
/// positions in decimal degrees, on the WGS84 ellipsoid (Vincenty inverse).
///
/// Returns `None` for nearly antipodal points where the iteration does not converge.
#[must_use]
pub fn distance_bearing(lon0: f64, lat0: f64, lon1: f64, lat1: f64) -> Option<(f64, f64)> {
    let b = WGS84_A * (1.0 - WGS84_F);
    let l = (lon1 - lon0).to_radians();
    let (sin_u1, cos_u1) = ((1.0 - WGS84_F) * lat0.to_radians().tan()).atan().sin_cos();
    let (sin_u2, cos_u2) = ((1.0 - WGS84_F) * lat1.to_radians().tan()).atan().sin_cos();

    let mut lambda = l;
    for _ in 0..VINCENTY_ITERATIONS {
        let (sin_l, cos_l) = lambda.sin_cos();
        let sin_sigma =
            (cos_u2 * sin_l).hypot(cos_u1 * sin_u2 - sin_u1 * cos_u2 * cos_l);
        if sin_sigma == 0.0 {
            return Some((0.0, 0.0));
        }
        let cos_sigma = sin_u1 * sin_u2 + cos_u1 * cos_u2 * cos_l;
        let sigma = sin_sigma.atan2(cos_sigma);
        let sin_alpha = cos_u1 * cos_u2 * sin_l / sin_sigma;
        let cos2_alpha = 1.0 - sin_alpha * sin_alpha;
        // Equatorial lines have cos2_alpha == 0
        let cos_2sm = if cos2_alpha == 0.0 {
            0.0
        } else {
            cos_sigma - 2.0 * sin_u1 * sin_u2 / cos2_alpha
        };
        let c = WGS84_F / 16.0 * cos2_alpha * (4.0 + WGS84_F * (4.0 - 3.0 * cos2_alpha));
        let previous = lambda;
        lambda = l
            + (1.0 - c)
                * WGS84_F
                * sin_alpha
                * (sigma
                    + c * sin_sigma
                        * (cos_2sm + c * cos_sigma * (-1.0 + 2.0 * cos_2sm * cos_2sm)));
        if (lambda - previous).abs() > 1e-12 {
            continue;
        }

        let u_sq = cos2_alpha * (WGS84_A * WGS84_A - b * b) / (b * b);
        let big_a = 1.0 + u_sq / 16384.0 * (4096.0 + u_sq * (-768.0 + u_sq * (320.0 - 175.0 * u_sq)));
        let big_b = u_sq / 1024.0 * (256.0 + u_sq * (-128.0 + u_sq * (74.0 - 47.0 * u_sq)));
        let delta_sigma = big_b
            * sin_sigma
            * (cos_2sm
                + big_b / 4.0
                    * (cos_sigma * (-1.0 + 2.0 * cos_2sm * cos_2sm)
                        - big_b / 6.0
                            * cos_2sm
                            * (-3.0 + 4.0 * sin_sigma * sin_sigma)
                            * (-3.0 + 4.0 * cos_2sm * cos_2sm)));
        let distance = b * big_a * (sigma - delta_sigma);

        let (sin_l, cos_l) = lambda.sin_cos();
        let bearing = (cos_u2 * sin_l)
            .atan2(cos_u1 * sin_u2 - sin_u1 * cos_u2 * cos_l)
            .to_degrees()
            .rem_euclid(360.0);
        return Some((distance, bearing));
    }
    None
}

/// Centered rolling mean over `window` samples, ignoring non-finite values. Windows are
/// cut short at either end of the series.
fn centered_mean(values: &[f64], window: usize) -> Vec<f64> {
    let before = window / 2;
    let after = window.saturating_sub(1) / 2;
    (0..values.len())
        .map(|i| {
            let lo = i.saturating_sub(before);
            let hi = (i + after).min(values.len() - 1);
            let (sum, n) = values[lo..=hi]
                .iter()
                .filter(|v| v.is_finite())
                .fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
            if n == 0 {
                f64::NAN
            } else {
                sum / n as f64
            }
        })
        .collect()
}

/// Platform velocity derived from successive position fixes.
///
/// Each pair of consecutive fixes gives a velocity at the time halfway between them.
/// These are smoothed with a centered rolling mean of `window` samples and then
/// interpolated to the requested time. Between the first fix and the first centered
/// time, and likewise at the end, the nearest smoothed velocity is used. There is no
/// velocity outside the time span of the fixes.
#[derive(Debug, Clone, Default)]
pub struct PositionTrack {
    /// First and last fix time
    span: Option<(f64, f64)>,
    velocity: VelocityTrack,
}

impl PositionTrack {
    /// Track with the default [NAVIGATION_WINDOW].
    pub fn new(fixes: impl IntoIterator<Item = (NaiveDateTime, f64, f64)>) -> Self {
        Self::with_window(fixes, NAVIGATION_WINDOW)
    }

    /// Fixes with non-finite coordinates are dropped. Fixes must be in time order. A
    /// `window` of 0 or 1 disables smoothing.
    pub fn with_window(
        fixes: impl IntoIterator<Item = (NaiveDateTime, f64, f64)>,
        window: usize,
    ) -> Self {
        let fixes: Vec<(f64, f64, f64)> = fixes
            .into_iter()
            .filter(|(_, lon, lat)| lon.is_finite() && lat.is_finite())
            .map(|(t, lon, lat)| (seconds(t), lon, lat))
            .collect();
        let mut centered = Vec::with_capacity(fixes.len());
        let (mut u, mut v) = (Vec::new(), Vec::new());
        for w in fixes.windows(2).filter(|w| w[1].0 > w[0].0) {
            let (t0, lon0, lat0) = w[0];
            let (t1, lon1, lat1) = w[1];
            let dt = t1 - t0;
            let (us, vs) = match distance_bearing(lon0, lat0, lon1, lat1) {
                Some((distance, bearing)) => {
                    let speed = distance / dt;
                    let b = bearing.to_radians();
                    (speed * b.sin(), speed * b.cos())
                }
                None => {
                    debug!(t0, t1, "geodesic between fixes did not converge");
                    (f64::NAN, f64::NAN)
                }
            };
            centered.push(t0 + dt / 2.0);
            u.push(us);
            v.push(vs);
        }
        let u = centered_mean(&u, window.max(1));
        let v = centered_mean(&v, window.max(1));
        let samples = centered
            .into_iter()
            .zip(u.into_iter().zip(v))
            .filter(|(_, (u, v))| u.is_finite() && v.is_finite())
            .map(|(t, (u, v))| (t, u, v))
            .collect();

        let span = match (fixes.first(), fixes.last()) {
            (Some(first), Some(last)) if last.0 > first.0 => Some((first.0, last.0)),
            _ => None,
        };
        PositionTrack {
            span,
            velocity: VelocityTrack { samples },
        }
    }

    /// Track built from the GGA positions decoded with the profile's ensembles.
    #[must_use]
    pub fn from_profile(profile: &Profile, window: usize) -> Self {
        PositionTrack::with_window(
            profile
                .time
                .iter()
                .zip(profile.longitude.iter().zip(profile.latitude.iter()))
                .filter_map(|(t, (lon, lat))| t.map(|t| (t, *lon, *lat))),
            window,
        )
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.velocity.is_empty()
    }
}

impl NavigationSource for PositionTrack {
    fn finite_velocity_or_position(&self, timestamp: NaiveDateTime) -> Option<(f64, f64)> {
        let (start, end) = self.span?;
        let t = seconds(timestamp);
        if t < start || t > end {
            return None;
        }
        let (first, last) = (self.velocity.samples.first()?, self.velocity.samples.last()?);
        self.velocity.at(t.clamp(first.0, last.0))
    }
}

/// Applies a [MotionMode] to a profile.
#[derive(Debug, Clone, Copy, Default)]
pub struct MotionCorrector {
    mode: MotionMode,
}

impl MotionCorrector {
    pub fn new(mode: MotionMode) -> Self {
        MotionCorrector { mode }
    }

    #[must_use]
    pub fn mode(&self) -> MotionMode {
        self.mode
    }

    /// Correct `profile` in place.
    ///
    /// In [MotionMode::Navigation] every sample is checked against `nav` before any
    /// velocity is changed; the first sample without a finite platform velocity fails
    /// the whole correction with [Error::MissingNavigationField].
    ///
    /// # Errors
    /// [Error::Config] if the data is not in earth or ship coordinates, or navigation
    /// correction is requested without `nav`. [Error::MissingNavigationField] as above.
    pub fn correct(
        &self,
        profile: &mut Profile,
        nav: Option<&dyn NavigationSource>,
        ctx: &mut ProcessingContext,
    ) -> Result<()> {
        if self.mode == MotionMode::Off {
            return Ok(());
        }
        if !matches!(
            profile.coordinate_system,
            CoordinateSystem::Earth | CoordinateSystem::Ship
        ) {
            return Err(Error::Config(format!(
                "motion correction requires earth or ship coordinates, data is in {:?} coordinates",
                profile.coordinate_system
            )));
        }
        match self.mode {
            MotionMode::Off => Ok(()),
            MotionMode::BottomTrack => {
                Self::bottom_track(profile, ctx);
                Ok(())
            }
            MotionMode::Navigation => {
                let nav = nav.ok_or_else(|| {
                    Error::Config("navigation motion correction without navigation".to_string())
                })?;
                Self::navigation(profile, nav)
            }
        }
    }

    fn bottom_track(profile: &mut Profile, ctx: &mut ProcessingContext) {
        let comps = profile.components().min(3);
        let mut uncorrected = 0usize;
        for t in 0..profile.len() {
            let bt: Vec<f64> = profile.bt_velocity.row(t).iter().take(comps).copied().collect();
            if bt.len() < comps || bt.iter().any(|v| is_bad(*v)) {
                profile.uncorrected[t] = true;
                uncorrected += 1;
                continue;
            }
            for (c, btv) in bt.iter().enumerate() {
                profile
                    .velocity
                    .slice_mut(s![t, .., c])
                    .mapv_inplace(|v| v - btv);
            }
        }
        ctx.samples_uncorrected += uncorrected;
        if uncorrected > 0 {
            ctx.warn(format!(
                "{uncorrected} of {} ensembles have no bottom track and were not motion corrected",
                profile.len()
            ));
        }
        info!(uncorrected, "bottom track motion correction");
    }

    fn navigation(profile: &mut Profile, nav: &dyn NavigationSource) -> Result<()> {
        let mut ship = Vec::with_capacity(profile.len());
        for (index, t) in profile.time.iter().enumerate() {
            let t = t.ok_or(Error::MissingNavigationField {
                field: "time",
                index,
            })?;
            let (u, v) = nav
                .finite_velocity_or_position(t)
                .filter(|(u, v)| u.is_finite() && v.is_finite())
                .ok_or(Error::MissingNavigationField {
                    field: "platform velocity",
                    index,
                })?;
            ship.push((u, v));
        }
        debug!(samples = ship.len(), "navigation precheck passed");

        for (t, (u, v)) in ship.into_iter().enumerate() {
            profile.velocity.slice_mut(s![t, .., 0]).mapv_inplace(|x| x + u);
            profile.velocity.slice_mut(s![t, .., 1]).mapv_inplace(|x| x + v);
        }
        info!("navigation motion correction");
        Ok(())
    }
}
