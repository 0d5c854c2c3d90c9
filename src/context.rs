use std::collections::BTreeMap;

use serde::Serialize;
use tracing::warn;

use crate::ensemble::Ensemble;
use crate::framing::ReadSummary;

/// Counters and warnings collected over one processing run.
///
/// Every recovered problem ends up here so the caller can report it, e.g., in a
/// processing log written next to the output.
#[derive(Debug, Default, Clone, Serialize)]
pub struct ProcessingContext {
    /// Sources, frame faults and per-source ensemble spans.
    pub read: ReadSummary,
    /// Valid frames whose payload could not be decoded.
    pub decode_failures: usize,
    /// Unrecognized dataset names and how many ensembles carried them.
    pub unknown_datasets: BTreeMap<String, usize>,
    /// Ensembles with more bins than the profile that were truncated.
    pub bins_truncated: usize,
    /// Ensembles with fewer bins than the profile, padded with bad values.
    pub bins_padded: usize,
    /// Ensembles dropped because their beam count differs from the deployment's.
    pub beam_count_mismatches: usize,
    /// Ensembles dropped because they carry no 1, 3 or 4 beam layout.
    pub ensembles_without_layout: usize,
    /// Ensembles whose time is not after the preceding ensemble's.
    pub non_monotonic_times: usize,
    /// Time samples whose velocity could not be motion corrected.
    pub samples_uncorrected: usize,
    /// False when quality control was disabled, in which case every flag is
    /// `NotEvaluated` because nothing was evaluated.
    pub quality_control_applied: bool,
    pub warnings: Vec<String>,
}

impl ProcessingContext {
    /// Log `msg` and keep it.
    pub fn warn(&mut self, msg: impl Into<String>) {
        let msg = msg.into();
        warn!("{msg}");
        self.warnings.push(msg);
    }

    /// Account for a decoded ensemble.
    pub fn add(&mut self, ens: &Ensemble) {
        for name in &ens.unknown_datasets {
            *self.unknown_datasets.entry(name.clone()).or_default() += 1;
        }
    }

    /// Frames that were found but failed validation or were cut short.
    #[must_use]
    pub fn frames_skipped(&self) -> usize {
        self.read.faults.skipped()
    }
}
