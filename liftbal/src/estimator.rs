use serde::{Deserialize, Serialize};

use crate::{CurrentSample, EstimationResult, LinearRegression, TwoPointIntersection};

/// Strategy turning upward/downward current samples into a balance estimate.
///
/// Implementations are pure: no state is kept between calls and inputs are
/// never modified.
pub trait BalanceEstimator {
    fn estimate(&self, upward: &[CurrentSample], downward: &[CurrentSample]) -> EstimationResult;
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EstimatorInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    pub reports_r_squared: bool,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum EstimatorKind {
    #[default]
    #[serde(rename = "two_point_intersection")]
    TwoPointIntersection,
    #[serde(rename = "linear_regression")]
    LinearRegression,
}

impl EstimatorKind {
    pub const ALL: [EstimatorKind; 2] = [
        EstimatorKind::TwoPointIntersection,
        EstimatorKind::LinearRegression,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            EstimatorKind::TwoPointIntersection => "two_point_intersection",
            EstimatorKind::LinearRegression => "linear_regression",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            EstimatorKind::TwoPointIntersection => "Two-point intersection",
            EstimatorKind::LinearRegression => "Linear regression",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            EstimatorKind::TwoPointIntersection => {
                "Crossings of the up/down segments between consecutive readings; trend extrapolation when the curves never cross."
            }
            EstimatorKind::LinearRegression => {
                "Least-squares line per direction, reconciled with local crossings by R\u{b2}-weighted confidence."
            }
        }
    }

    pub fn reports_r_squared(&self) -> bool {
        matches!(self, EstimatorKind::LinearRegression)
    }

    pub fn from_id(id: &str) -> Option<Self> {
        let normalized = id.trim().to_ascii_lowercase().replace('-', "_");
        match normalized.as_str() {
            "two_point_intersection" | "two_point" => Some(EstimatorKind::TwoPointIntersection),
            "linear_regression" | "regression" => Some(EstimatorKind::LinearRegression),
            _ => None,
        }
    }

    pub fn estimate(
        &self,
        upward: &[CurrentSample],
        downward: &[CurrentSample],
    ) -> EstimationResult {
        match self {
            EstimatorKind::TwoPointIntersection => TwoPointIntersection.estimate(upward, downward),
            EstimatorKind::LinearRegression => LinearRegression.estimate(upward, downward),
        }
    }
}

pub fn list_estimators() -> Vec<EstimatorInfo> {
    EstimatorKind::ALL
        .iter()
        .map(|kind| EstimatorInfo {
            id: kind.id().to_string(),
            name: kind.name().to_string(),
            description: kind.description().to_string(),
            reports_r_squared: kind.reports_r_squared(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_round_trip_through_serde() {
        for kind in EstimatorKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.id()));
            assert_eq!(EstimatorKind::from_id(kind.id()), Some(kind));
        }
    }

    #[test]
    fn test_from_id_accepts_aliases() {
        assert_eq!(
            EstimatorKind::from_id(" Linear-Regression "),
            Some(EstimatorKind::LinearRegression)
        );
        assert_eq!(
            EstimatorKind::from_id("two_point"),
            Some(EstimatorKind::TwoPointIntersection)
        );
        assert!(EstimatorKind::from_id("spline").is_none());
    }

    #[test]
    fn test_only_regression_reports_r_squared() {
        let up = [
            CurrentSample::new(30.0, 4.0),
            CurrentSample::new(40.0, 5.0),
            CurrentSample::new(50.0, 6.0),
        ];
        let down = [
            CurrentSample::new(30.0, 6.0),
            CurrentSample::new(40.0, 5.5),
            CurrentSample::new(50.0, 5.0),
        ];
        for info in list_estimators() {
            let kind = EstimatorKind::from_id(&info.id).unwrap();
            let result = kind.estimate(&up, &down);
            assert_eq!(result.r_squared.is_some(), info.reports_r_squared);
        }
    }
}
