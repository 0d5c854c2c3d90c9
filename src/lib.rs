#![doc = include_str!("../README.md")]

mod error;

pub mod context;
pub mod ensemble;
pub mod framing;
pub mod motion;
pub mod pipeline;
pub mod profile;
pub mod qc;
pub mod transform;

pub use error::{Error, Result};

/// Internal bad-value sentinel. Every instrument specific bad value is mapped to this
/// when decoded.
pub const BAD_VALUE: f64 = f64::NAN;

/// True if `v` is the bad-value sentinel (or otherwise not a usable number).
#[must_use]
pub fn is_bad(v: f64) -> bool {
    !v.is_finite()
}

pub(crate) mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::{is_bad, BAD_VALUE};
}
