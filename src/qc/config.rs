use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

/// How percent good is tested when it is reported per beam.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BeamPercentGoodRule {
    /// Every beam must reach the threshold on its own.
    PerBeam,
    /// The sum over all beams must reach the threshold.
    Summed,
    /// The mean over all beams must reach the threshold.
    Mean,
}

/// Roll or pitch further than this from the deployment mean, degrees, means the
/// instrument is not looking where it should.
pub const LOOKING_THRESHOLD: f64 = 90.0;
/// Velocities outside this range, m/s, are not physical and are removed.
pub const PLAUSIBLE_VELOCITY: (f64, f64) = (-10.0, 10.0);

/// Quality control thresholds. A test runs only when its threshold is set.
///
/// `looking_threshold` and `plausible_velocity` are set by default and apply
/// whenever at least one other test runs.
#[derive(Debug, Clone, TypedBuilder, Serialize, Deserialize)]
#[serde(default)]
pub struct QcConfig {
    /// Minimum echo amplitude, counts.
    #[builder(default, setter(strip_option))]
    pub amplitude_threshold: Option<f64>,
    /// Minimum correlation, counts (0-255).
    #[builder(default, setter(strip_option))]
    pub correlation_threshold: Option<f64>,
    /// Minimum percent good.
    #[builder(default, setter(strip_option))]
    pub percent_good_threshold: Option<f64>,
    /// Maximum horizontal speed, m/s.
    #[builder(default, setter(strip_option))]
    pub horizontal_velocity_threshold: Option<f64>,
    /// Maximum absolute vertical velocity, m/s.
    #[builder(default, setter(strip_option))]
    pub vertical_velocity_threshold: Option<f64>,
    /// Maximum absolute error velocity, m/s.
    #[builder(default, setter(strip_option))]
    pub error_velocity_threshold: Option<f64>,
    /// Maximum roll away from the deployment mean, degrees.
    #[builder(default, setter(strip_option))]
    pub roll_threshold: Option<f64>,
    /// Maximum pitch away from the deployment mean, degrees.
    #[builder(default, setter(strip_option))]
    pub pitch_threshold: Option<f64>,
    /// Plausible pressure, dbar, as `(min, max)`.
    #[builder(default, setter(strip_option))]
    pub pressure_range: Option<(f64, f64)>,
    /// Flag bins contaminated by the side lobe reflection off the bottom or surface.
    #[builder(default)]
    pub sidelobe_correction: bool,
    /// Bottom depth, m, used for side lobes when there is no bottom track range.
    #[builder(default, setter(strip_option))]
    pub bottom_depth: Option<f64>,
    /// Transducer depth, m, to use when the instrument has no pressure sensor.
    #[builder(default, setter(strip_option))]
    pub force_fixed_depth: Option<f64>,
    #[builder(default, setter(strip_option))]
    pub beam_percent_good_rule: Option<BeamPercentGoodRule>,
    /// Flag every bin of ensembles tilted further than this from the mean, degrees.
    #[builder(default = Some(LOOKING_THRESHOLD))]
    pub looking_threshold: Option<f64>,
    /// Velocity outside `(min, max)`, m/s, is replaced by the bad value.
    #[builder(default = Some(PLAUSIBLE_VELOCITY))]
    pub plausible_velocity: Option<(f64, f64)>,
    /// Skip quality control entirely.
    #[builder(default)]
    pub no_quality_control: bool,
}

impl Default for QcConfig {
    fn default() -> Self {
        QcConfig::builder().build()
    }
}

impl QcConfig {
    /// True if at least one flagging test is configured.
    #[must_use]
    pub fn any_test(&self) -> bool {
        self.amplitude_threshold.is_some()
            || self.correlation_threshold.is_some()
            || self.percent_good_threshold.is_some()
            || self.horizontal_velocity_threshold.is_some()
            || self.vertical_velocity_threshold.is_some()
            || self.error_velocity_threshold.is_some()
            || self.roll_threshold.is_some()
            || self.pitch_threshold.is_some()
            || self.pressure_range.is_some()
            || self.sidelobe_correction
    }
}
