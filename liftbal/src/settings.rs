use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{BalanceError, EstimatorKind};

/// Target band and ideal value for the balance coefficient, in percent.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BalanceTargets {
    pub k_min: f64,
    pub k_max: f64,
    pub ideal_k: f64,
}

impl Default for BalanceTargets {
    fn default() -> Self {
        Self {
            k_min: 45.0,
            k_max: 50.0,
            ideal_k: 47.5,
        }
    }
}

impl BalanceTargets {
    pub fn validate(&self) -> Result<(), BalanceError> {
        let finite = self.k_min.is_finite() && self.k_max.is_finite() && self.ideal_k.is_finite();
        if !finite
            || self.k_min > self.k_max
            || self.ideal_k < self.k_min
            || self.ideal_k > self.k_max
        {
            return Err(BalanceError::InvalidTargets {
                min: self.k_min,
                max: self.k_max,
                ideal: self.ideal_k,
            });
        }
        Ok(())
    }

    pub fn contains(&self, k: f64) -> bool {
        k >= self.k_min && k <= self.k_max
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct BalanceSettings {
    pub estimator: EstimatorKind,
    pub targets: BalanceTargets,
}

impl BalanceSettings {
    pub fn from_json(text: &str) -> Result<Self, BalanceError> {
        let settings: BalanceSettings =
            serde_json::from_str(text).map_err(|e| BalanceError::InvalidParameter(e.to_string()))?;
        settings.targets.validate()?;
        Ok(settings)
    }

    /// SHA-256 of the canonical JSON encoding, for stamping reports.
    pub fn fingerprint(&self) -> Result<String, BalanceError> {
        let bytes =
            serde_json::to_vec(self).map_err(|e| BalanceError::InvalidParameter(e.to_string()))?;
        Ok(sha256_hex(&bytes))
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        use std::fmt::Write;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let text = r#"{"estimator": "linear_regression", "targets": {"k_max": 52.0}}"#;
        let settings = BalanceSettings::from_json(text).unwrap();
        assert_eq!(settings.estimator, EstimatorKind::LinearRegression);
        assert_eq!(settings.targets.k_min, 45.0);
        assert_eq!(settings.targets.k_max, 52.0);
        assert_eq!(settings.targets.ideal_k, 47.5);
    }

    #[test]
    fn test_rejects_inverted_targets() {
        let err = BalanceSettings::from_json(r#"{"targets": {"k_min": 55.0}}"#).unwrap_err();
        assert!(matches!(err, BalanceError::InvalidTargets { .. }));
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let a = BalanceSettings::default();
        let mut b = BalanceSettings::default();
        assert_eq!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
        b.targets.ideal_k = 48.0;
        assert_ne!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
        assert_eq!(a.fingerprint().unwrap().len(), 64);
    }
}
