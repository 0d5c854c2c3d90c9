use crate::transform::CoordinateSystem;

#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Not enough bytes")]
    NotEnoughData { actual: usize, minimum: usize },

    /// A validated payload could not be turned into an ensemble.
    #[error("ensemble decode failed: {0}")]
    Decode(String),

    /// None of the input sources produced a single valid ensemble frame.
    #[error("no valid ensembles found in {sources} input source(s)")]
    AllSourcesEmpty { sources: usize },

    /// Navigation based motion correction requested but the navigation source cannot
    /// provide finite values for a sample.
    #[error("navigation field `{field}` missing or not finite for sample {index}")]
    MissingNavigationField { field: &'static str, index: usize },

    #[error("transform from {from:?} to {to:?} coordinates is not supported")]
    UnsupportedTransform {
        from: CoordinateSystem,
        to: CoordinateSystem,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("processing cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, Error>;
