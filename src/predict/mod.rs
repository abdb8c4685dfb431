//! Forward-looking side channels: trend forecast and remaining useful life.

pub mod rul;
pub mod trend;
pub mod weibull;

pub use rul::{Degradation, RulEstimate, RulStatus};
pub use trend::Forecast;
pub use weibull::{FailureMode, Weibull, WeibullEstimate};
