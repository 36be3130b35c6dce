//! Core elevator balance computation library implemented in Rust.
//!
//! Estimates the counterweight balance coefficient (K) from paired upward and
//! downward motor-current readings, turns a K estimate into a counterweight
//! block recommendation, and computes maximum overtravel from shaft geometry.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod estimator;
mod fit;
mod matching;
pub mod overtravel;
pub mod recommend;
mod regression;
pub mod samples;
pub mod settings;
mod two_point;

pub use estimator::{list_estimators, BalanceEstimator, EstimatorInfo, EstimatorKind};
pub use fit::LineFit;
pub use matching::{match_points, MATCH_TOLERANCE};
pub use overtravel::{max_overtravel, min_pit_vertical_distance, OvertravelResult, ShaftGeometry};
pub use recommend::{recommend, BestGrade, BlockOption, KStatus, RecommendationReport};
pub use regression::LinearRegression;
pub use samples::{
    load_table, samples_from_blocks, BlockReading, LoadTableRow, DEFAULT_TEST_PERCENTAGES,
};
pub use settings::{BalanceSettings, BalanceTargets};
pub use two_point::TwoPointIntersection;

/// Lowest physically admissible balance coefficient, in percent.
pub const K_MIN: f64 = -50.0;
/// Highest physically admissible balance coefficient, in percent.
pub const K_MAX: f64 = 200.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BalanceError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("cannot compute recommendation: {0} is missing")]
    MissingInput(&'static str),
    #[error("cannot compute recommendation: rated load must be positive (got {0})")]
    NonPositiveRatedLoad(f64),
    #[error("cannot compute recommendation: block weight must not be negative (got {0})")]
    NegativeBlockWeight(f64),
    #[error("invalid balance targets: min {min}, max {max}, ideal {ideal}")]
    InvalidTargets { min: f64, max: f64, ideal: f64 },
}

/// One current reading taken at a given load percentage.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct CurrentSample {
    pub load_pct: f64,
    pub current_a: f32,
}

impl CurrentSample {
    pub fn new(load_pct: f64, current_a: f32) -> Self {
        Self {
            load_pct,
            current_a,
        }
    }
}

/// Upward and downward readings paired at (approximately) the same load.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct MatchedPoint {
    pub load_pct: f64,
    pub upward_a: f32,
    pub downward_a: f32,
}

impl MatchedPoint {
    /// Upward minus downward current, computed at reading precision.
    pub fn difference(&self) -> f32 {
        self.upward_a - self.downward_a
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum EstimateStatus {
    InsufficientData,
    Extrapolated,
    Actual,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct EstimationResult {
    pub k_value: Option<f64>,
    pub has_actual_intersection: bool,
    pub r_squared: Option<f64>,
}

impl EstimationResult {
    pub fn insufficient() -> Self {
        Self::default()
    }

    /// Builds a result, keeping the flag consistent with the value: an absent
    /// K never reports an actual intersection.
    pub fn new(
        k_value: Option<f64>,
        has_actual_intersection: bool,
        r_squared: Option<f64>,
    ) -> Self {
        Self {
            k_value,
            has_actual_intersection: k_value.is_some() && has_actual_intersection,
            r_squared,
        }
    }

    pub fn status(&self) -> EstimateStatus {
        match (self.k_value, self.has_actual_intersection) {
            (None, _) => EstimateStatus::InsufficientData,
            (Some(_), true) => EstimateStatus::Actual,
            (Some(_), false) => EstimateStatus::Extrapolated,
        }
    }
}

pub(crate) fn in_k_domain(x: f64) -> bool {
    (K_MIN..=K_MAX).contains(&x)
}

pub(crate) fn clamp_k(x: f64) -> f64 {
    x.max(K_MIN).min(K_MAX)
}

/// Clamp that tolerates an inverted interval by collapsing onto `lo`.
pub(crate) fn clamp_between(x: f64, lo: f64, hi: f64) -> f64 {
    if lo > hi {
        return lo;
    }
    x.max(lo).min(hi)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_k_never_actual() {
        let result = EstimationResult::new(None, true, Some(0.5));
        assert!(!result.has_actual_intersection);
        assert_eq!(result.status(), EstimateStatus::InsufficientData);
    }

    #[test]
    fn test_status_classification() {
        assert_eq!(
            EstimationResult::new(Some(47.0), true, None).status(),
            EstimateStatus::Actual
        );
        assert_eq!(
            EstimationResult::new(Some(12.0), false, None).status(),
            EstimateStatus::Extrapolated
        );
    }

    #[test]
    fn test_clamp_between_inverted_interval() {
        assert_eq!(clamp_between(5.0, 10.0, 0.0), 10.0);
        assert_eq!(clamp_between(5.0, 0.0, 10.0), 5.0);
        assert_eq!(clamp_k(250.0), K_MAX);
        assert_eq!(clamp_k(-80.0), K_MIN);
    }
}
