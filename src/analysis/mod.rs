//! Numeric primitives shared by the estimators and predictors.

pub mod linalg;
pub mod stats;
