//! Velocity coordinate transforms.
//!
//! Transforms only go forward: beam to instrument to ship to earth. Instrument to
//! earth uses the RDI rotation, where pitch is first corrected for roll and the
//! result rotated by heading plus magnetic declination.
use std::f64::consts::SQRT_2;

use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use typed_builder::TypedBuilder;

use crate::ensemble::{DatasetTag, Orientation};
use crate::prelude::*;
use crate::profile::{Profile, COMPONENTS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordinateSystem {
    Beam,
    Instrument,
    Ship,
    Earth,
}

impl CoordinateSystem {
    /// Order in which velocity datasets are preferred when several are present.
    pub const PRIORITY: [CoordinateSystem; 4] = [
        CoordinateSystem::Earth,
        CoordinateSystem::Ship,
        CoordinateSystem::Instrument,
        CoordinateSystem::Beam,
    ];

    #[must_use]
    pub fn velocity_tag(&self) -> DatasetTag {
        match self {
            CoordinateSystem::Beam => DatasetTag::BeamVelocity,
            CoordinateSystem::Instrument => DatasetTag::InstrumentVelocity,
            CoordinateSystem::Ship => DatasetTag::ShipVelocity,
            CoordinateSystem::Earth => DatasetTag::EarthVelocity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BeamPattern {
    Convex,
    Concave,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SonarType {
    /// RoweTech instrument; the beam angle is read from the serial number.
    Rtb,
    Custom {
        beam_angle: f64,
        beam_pattern: BeamPattern,
    },
}

/// Beam angle in degrees from a RoweTech serial number. The second character encodes
/// the transducer; vertical beam only systems report zero.
#[must_use]
pub fn beam_angle_from_serial(serial: &str) -> Option<f64> {
    let code = serial.chars().nth(1)?;
    if "12345678DEFGbcdefghi".contains(code) {
        Some(20.0)
    } else if "OPQRST".contains(code) {
        Some(15.0)
    } else if "IJKLMNjklmnopqrstuvwxy".contains(code) {
        Some(30.0)
    } else if "9ABCUVWXYZ".contains(code) {
        Some(0.0)
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BeamGeometry {
    /// Beam angle from vertical, degrees
    pub angle: f64,
    pub pattern: BeamPattern,
}

impl BeamGeometry {
    /// Geometry for `sonar` given the instrument serial number, if it can be determined.
    #[must_use]
    pub fn resolve(sonar: SonarType, serial: Option<&str>) -> Option<Self> {
        match sonar {
            SonarType::Custom {
                beam_angle,
                beam_pattern,
            } => Some(BeamGeometry {
                angle: beam_angle,
                pattern: beam_pattern,
            }),
            SonarType::Rtb => serial.and_then(beam_angle_from_serial).map(|angle| BeamGeometry {
                angle,
                pattern: BeamPattern::Convex,
            }),
        }
    }
}

#[derive(Debug, Clone, TypedBuilder, Serialize, Deserialize)]
pub struct TransformConfig {
    /// Coordinates velocities are transformed to. Data already in these coordinates
    /// is left alone.
    #[builder(default = CoordinateSystem::Earth)]
    pub target: CoordinateSystem,
    #[builder(default = SonarType::Rtb)]
    pub sonar_type: SonarType,
    /// Degrees east, added to the compass heading.
    #[builder(default)]
    #[serde(default)]
    pub magnetic_declination: f64,
    /// Compute a solution from three beams when exactly one of four is bad.
    #[builder(default)]
    #[serde(default)]
    pub three_beam_solution: bool,
}

impl Default for TransformConfig {
    fn default() -> Self {
        TransformConfig::builder().build()
    }
}

/// Beam to instrument transform for one beam geometry.
#[derive(Debug, Clone, Copy)]
pub struct BeamTransform {
    a: f64,
    b: f64,
    d: f64,
    /// -1 for concave
    c: f64,
    three_beam_solution: bool,
    /// Inverse of the three beam direction matrix
    inverse3: Option<[[f64; 3]; 3]>,
}

fn invert3(m: [[f64; 3]; 3]) -> Option<[[f64; 3]; 3]> {
    let det = m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0]);
    if det.abs() < 1e-12 {
        return None;
    }
    let cof = |r0: usize, r1: usize, c0: usize, c1: usize| m[r0][c0] * m[r1][c1] - m[r0][c1] * m[r1][c0];
    Some([
        [cof(1, 2, 1, 2) / det, -cof(0, 2, 1, 2) / det, cof(0, 1, 1, 2) / det],
        [-cof(1, 2, 0, 2) / det, cof(0, 2, 0, 2) / det, -cof(0, 1, 0, 2) / det],
        [cof(1, 2, 0, 1) / det, -cof(0, 2, 0, 1) / det, cof(0, 1, 0, 1) / det],
    ])
}

impl BeamTransform {
    #[must_use]
    pub fn new(geometry: BeamGeometry, three_beam_solution: bool) -> Self {
        let theta = geometry.angle.to_radians();
        let c = match geometry.pattern {
            BeamPattern::Convex => 1.0,
            BeamPattern::Concave => -1.0,
        };
        let a = 1.0 / (2.0 * theta.sin());
        // Three beam heads have beams 120 degrees apart starting at beam 1 on +x.
        let rows: Vec<[f64; 3]> = (0..3)
            .map(|i| {
                let az = (120.0 * i as f64).to_radians();
                [c * theta.sin() * az.cos(), c * theta.sin() * az.sin(), theta.cos()]
            })
            .collect();
        BeamTransform {
            a,
            b: 1.0 / (4.0 * theta.cos()),
            d: a / SQRT_2,
            c,
            three_beam_solution,
            inverse3: invert3([rows[0], rows[1], rows[2]]),
        }
    }

    /// Instrument velocity `[x, y, z, error]` from along beam velocities. With three
    /// beams the error velocity is not available and is bad.
    #[must_use]
    pub fn to_instrument(&self, beams: &[f64]) -> [f64; 4] {
        let bad = [BAD_VALUE; 4];
        match beams.len() {
            4 => {
                let mut b = [beams[0], beams[1], beams[2], beams[3]];
                let nbad = b.iter().filter(|v| is_bad(**v)).count();
                if nbad == 1 && self.three_beam_solution {
                    // Zero error velocity determines the missing beam.
                    let i = b.iter().position(|v| is_bad(*v)).unwrap_or(0);
                    b[i] = match i {
                        0 => b[2] + b[3] - b[1],
                        1 => b[2] + b[3] - b[0],
                        2 => b[0] + b[1] - b[3],
                        _ => b[0] + b[1] - b[2],
                    };
                    let [x, y, z, _] = self.solve4(b);
                    return [x, y, z, BAD_VALUE];
                }
                if nbad > 0 {
                    return bad;
                }
                self.solve4(b)
            }
            3 => {
                let Some(inv) = self.inverse3 else {
                    return bad;
                };
                if beams.iter().any(|v| is_bad(*v)) {
                    return bad;
                }
                let mut out = [0.0; 4];
                for (r, row) in inv.iter().enumerate() {
                    out[r] = row.iter().zip(beams).map(|(m, v)| m * v).sum();
                }
                out[3] = BAD_VALUE;
                out
            }
            _ => bad,
        }
    }

    fn solve4(&self, b: [f64; 4]) -> [f64; 4] {
        [
            self.c * self.a * (b[0] - b[1]),
            self.c * self.a * (b[3] - b[2]),
            self.b * (b[0] + b[1] + b[2] + b[3]),
            self.d * (b[0] + b[1] - b[2] - b[3]),
        ]
    }
}

/// Rotate instrument velocity into level coordinates: ship coordinates when `heading`
/// is zero, earth coordinates otherwise. Angles in degrees.
#[must_use]
pub fn instrument_to_level(
    v: [f64; 4],
    heading: f64,
    pitch: f64,
    roll: f64,
    orientation: Orientation,
) -> [f64; 4] {
    if v[..3].iter().any(|x| is_bad(*x)) || is_bad(heading) || is_bad(pitch) || is_bad(roll) {
        return [BAD_VALUE; 4];
    }
    let r = match orientation {
        Orientation::Up => (roll + 180.0).to_radians(),
        Orientation::Down => roll.to_radians(),
    };
    let p = (pitch.to_radians().tan() * r.cos()).atan();
    let (sh, ch) = heading.to_radians().sin_cos();
    let (sp, cp) = p.sin_cos();
    let (sr, cr) = r.sin_cos();
    let [x, y, z, e] = v;

    let xs = cr * x + sr * z;
    let ys = sp * sr * x + cp * y - sp * cr * z;
    let zs = -cp * sr * x + sp * y + cp * cr * z;
    [ch * xs + sh * ys, -sh * xs + ch * ys, zs, e]
}

/// Rotate ship coordinates by `heading` degrees to earth coordinates.
#[must_use]
pub fn ship_to_earth(v: [f64; 4], heading: f64) -> [f64; 4] {
    if v[..2].iter().any(|x| is_bad(*x)) || is_bad(heading) {
        return [BAD_VALUE; 4];
    }
    let (sh, ch) = heading.to_radians().sin_cos();
    [ch * v[0] + sh * v[1], -sh * v[0] + ch * v[1], v[2], v[3]]
}

/// Transforms the velocities of a [Profile].
#[derive(Debug, Clone)]
pub struct Transformer {
    config: TransformConfig,
    geometry: Option<BeamGeometry>,
}

impl Transformer {
    pub fn new(config: TransformConfig, geometry: Option<BeamGeometry>) -> Self {
        Transformer { config, geometry }
    }

    fn beam_transform(&self) -> Result<BeamTransform> {
        match self.geometry {
            Some(g) if g.angle > 0.0 => Ok(BeamTransform::new(g, self.config.three_beam_solution)),
            _ => Err(Error::Config(
                "beam angle unknown; cannot transform from beam coordinates".to_string(),
            )),
        }
    }

    fn apply(
        &self,
        profile: &mut Profile,
        to: CoordinateSystem,
        f: impl Fn(usize, &[f64]) -> [f64; 4],
    ) {
        let (times, bins, _) = profile.velocity.dim();
        let mut vel = Array3::from_elem((times, bins, COMPONENTS), BAD_VALUE);
        let mut bt = Array2::from_elem((times, COMPONENTS), BAD_VALUE);
        for t in 0..times {
            for bin in 0..bins {
                let src: Vec<f64> = profile.velocity.slice(ndarray::s![t, bin, ..]).to_vec();
                for (dst, v) in vel.slice_mut(ndarray::s![t, bin, ..]).iter_mut().zip(f(t, &src)) {
                    *dst = v;
                }
            }
            let src = profile.bt_velocity.row(t).to_vec();
            for (dst, v) in bt.row_mut(t).iter_mut().zip(f(t, &src)) {
                *dst = v;
            }
        }
        profile.velocity = vel;
        profile.bt_velocity = bt;
        profile.coordinate_system = to;
    }

    /// Pad instrument/ship/earth velocity with fewer than 4 components.
    fn components(src: &[f64]) -> [f64; 4] {
        let mut v = [BAD_VALUE; 4];
        for (dst, s) in v.iter_mut().zip(src) {
            *dst = *s;
        }
        v
    }

    /// Transform `profile` velocities, water and bottom track, to the target
    /// coordinates.
    ///
    /// # Errors
    /// [Error::UnsupportedTransform] if the target precedes the data's coordinates,
    /// [Error::Config] if beam data must be transformed without a known beam angle.
    pub fn transform(&self, profile: &mut Profile) -> Result<()> {
        let target = self.config.target;
        let from = profile.coordinate_system;
        if profile.is_vertical_beam() {
            debug!("vertical beam data stays in beam coordinates");
            return Ok(());
        }
        if target < from {
            return Err(Error::UnsupportedTransform { from, to: target });
        }
        if target == from {
            return Ok(());
        }

        if from == CoordinateSystem::Beam {
            let bt = self.beam_transform()?;
            self.apply(profile, CoordinateSystem::Instrument, |_, v| bt.to_instrument(v));
        }
        let orientation = profile.orientation;
        let declination = self.config.magnetic_declination;
        let heading = profile.heading.clone();
        let pitch = profile.pitch.clone();
        let roll = profile.roll.clone();

        match (profile.coordinate_system, target) {
            (CoordinateSystem::Instrument, CoordinateSystem::Ship) => {
                self.apply(profile, target, |t, v| {
                    instrument_to_level(Self::components(v), 0.0, pitch[t], roll[t], orientation)
                });
            }
            (CoordinateSystem::Instrument, CoordinateSystem::Earth) => {
                self.apply(profile, target, |t, v| {
                    instrument_to_level(
                        Self::components(v),
                        heading[t] + declination,
                        pitch[t],
                        roll[t],
                        orientation,
                    )
                });
            }
            (CoordinateSystem::Ship, CoordinateSystem::Earth) => {
                self.apply(profile, target, |t, v| {
                    ship_to_earth(Self::components(v), heading[t] + declination)
                });
            }
            _ => {}
        }
        info!(?from, to = ?profile.coordinate_system, "transformed velocities");
        Ok(())
    }
}
