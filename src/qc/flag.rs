use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// SeaDataNet quality flag.
///
/// Variants are declared in severity order; the derived `Ord` is the merge order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QcFlag {
    #[default]
    NotEvaluated,
    Good,
    ProbablyGood,
    ProbablyBad,
    Bad,
    Missing,
    Interpolated,
}

impl QcFlag {
    pub const ALL: [QcFlag; 7] = [
        QcFlag::NotEvaluated,
        QcFlag::Good,
        QcFlag::ProbablyGood,
        QcFlag::ProbablyBad,
        QcFlag::Bad,
        QcFlag::Missing,
        QcFlag::Interpolated,
    ];

    /// Numeric flag code written to output files.
    #[must_use]
    pub fn code(&self) -> u8 {
        match self {
            QcFlag::NotEvaluated => 0,
            QcFlag::Good => 1,
            QcFlag::ProbablyGood => 2,
            QcFlag::ProbablyBad => 3,
            QcFlag::Bad => 4,
            QcFlag::Interpolated => 8,
            QcFlag::Missing => 9,
        }
    }

    #[must_use]
    pub fn from_code(code: u8) -> Option<Self> {
        QcFlag::ALL.into_iter().find(|f| f.code() == code)
    }

    /// The more severe of the two flags.
    #[must_use]
    pub fn merge(self, other: QcFlag) -> QcFlag {
        self.max(other)
    }

    /// Merge `other` into `self`.
    pub fn raise(&mut self, other: QcFlag) {
        *self = self.merge(other);
    }
}

impl Display for QcFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            QcFlag::NotEvaluated => "not_evaluated",
            QcFlag::Good => "good",
            QcFlag::ProbablyGood => "probably_good",
            QcFlag::ProbablyBad => "probably_bad",
            QcFlag::Bad => "bad",
            QcFlag::Missing => "missing",
            QcFlag::Interpolated => "interpolated",
        };
        write!(f, "{name}")
    }
}
