//! Counterweight block recommendation from a balance coefficient estimate.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{in_k_domain, BalanceError, BalanceTargets};

const SEARCH_BLOCKS: i32 = 100;
/// Distance from the ideal K within which the best option counts as recommended.
const RECOMMENDED_BAND: f64 = 1.0;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct BlockOption {
    pub delta_blocks: i32,
    pub resulting_k: f64,
}

/// Qualitative label for the current K.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum KStatus {
    /// Inside the target band.
    Ideal,
    /// Outside the target band but physically plausible.
    Acceptable,
    /// Outside the physical range.
    OutOfRange,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum BestGrade {
    Recommended,
    Acceptable,
    AlreadyBest,
    Closest,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RecommendationReport {
    pub current_k: f64,
    pub status: KStatus,
    /// Signed block count that would roughly reach the ideal K, when adjustable
    /// and the current K is acceptable but not ideal.
    pub rough_blocks: Option<i64>,
    pub k_change_per_block: f64,
    pub adjustable: bool,
    /// Options landing in the target band, ascending by delta.
    pub feasible: Vec<BlockOption>,
    pub best: Option<BlockOption>,
    pub best_grade: Option<BestGrade>,
    pub targets: BalanceTargets,
}

/// Search block-count adjustments that bring K into the target band.
///
/// Deltas from -100 to +100 blocks are tried; options leaving a negative
/// counterweight or a K outside the physical range are skipped. The best
/// option minimises the distance to the ideal K, earliest delta first.
pub fn recommend(
    current_k: Option<f64>,
    rated_load: Option<f64>,
    block_weight: Option<f64>,
    targets: &BalanceTargets,
) -> Result<RecommendationReport, BalanceError> {
    let rated_load = rated_load.ok_or(BalanceError::MissingInput("rated load"))?;
    let block_weight = block_weight.ok_or(BalanceError::MissingInput("block weight"))?;
    let current_k = current_k.ok_or(BalanceError::MissingInput("balance coefficient"))?;
    if !(rated_load > 0.0) {
        return Err(BalanceError::NonPositiveRatedLoad(rated_load));
    }
    if !(block_weight >= 0.0) {
        return Err(BalanceError::NegativeBlockWeight(block_weight));
    }
    targets.validate()?;

    let status = if targets.contains(current_k) {
        KStatus::Ideal
    } else if in_k_domain(current_k) {
        KStatus::Acceptable
    } else {
        KStatus::OutOfRange
    };

    let k_change_per_block = block_weight / rated_load * 100.0;
    if k_change_per_block.abs() < f64::EPSILON {
        return Ok(RecommendationReport {
            current_k,
            status,
            rough_blocks: None,
            k_change_per_block,
            adjustable: false,
            feasible: Vec::new(),
            best: None,
            best_grade: None,
            targets: *targets,
        });
    }

    let current_total = current_k * rated_load / 100.0;
    let mut feasible = Vec::new();
    let mut best: Option<BlockOption> = None;
    let mut best_distance = f64::MAX;

    for delta in -SEARCH_BLOCKS..=SEARCH_BLOCKS {
        let new_total = current_total + f64::from(delta) * block_weight;
        if new_total < 0.0 {
            continue;
        }
        let resulting_k = new_total / rated_load * 100.0;
        if !in_k_domain(resulting_k) {
            continue;
        }
        let option = BlockOption {
            delta_blocks: delta,
            resulting_k,
        };
        if targets.contains(resulting_k) {
            feasible.push(option);
        }
        let distance = (resulting_k - targets.ideal_k).abs();
        if distance < best_distance {
            best_distance = distance;
            best = Some(option);
        }
    }

    let best_grade = best.map(|option| {
        if (option.resulting_k - targets.ideal_k).abs() <= RECOMMENDED_BAND {
            BestGrade::Recommended
        } else if targets.contains(option.resulting_k) {
            BestGrade::Acceptable
        } else if option.delta_blocks == 0 {
            BestGrade::AlreadyBest
        } else {
            BestGrade::Closest
        }
    });

    let rough_blocks = (status == KStatus::Acceptable)
        .then(|| ((targets.ideal_k - current_k) / k_change_per_block).round() as i64);

    Ok(RecommendationReport {
        current_k,
        status,
        rough_blocks,
        k_change_per_block,
        adjustable: true,
        feasible,
        best,
        best_grade,
        targets: *targets,
    })
}

fn describe_delta(delta: i64) -> String {
    match delta {
        0 => "keep as is".to_string(),
        1 => "add 1 block".to_string(),
        -1 => "remove 1 block".to_string(),
        d if d > 0 => format!("add {} blocks", d),
        d => format!("remove {} blocks", -d),
    }
}

impl fmt::Display for RecommendationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.adjustable {
            writeln!(f, "Current: {:.1}%", self.current_k)?;
            return write!(
                f,
                "* Recommendation: cannot adjust via blocks (block weight is zero or negligible against rated load)"
            );
        }

        if self.feasible.is_empty() {
            writeln!(
                f,
                "No option reaches the target range ({:.1}-{:.1}%)",
                self.targets.k_min, self.targets.k_max
            )?;
        } else {
            writeln!(f, "Feasible options:")?;
            for option in &self.feasible {
                writeln!(
                    f,
                    "  {} -> {:.1}%",
                    describe_delta(i64::from(option.delta_blocks)),
                    option.resulting_k
                )?;
            }
        }

        write!(f, "\nCurrent: {:.1}%", self.current_k)?;
        match self.status {
            KStatus::Ideal => write!(f, " (within target range)")?,
            KStatus::Acceptable => match self.rough_blocks {
                Some(0) | None => write!(f, " (check the readings)")?,
                Some(blocks) => write!(f, " (roughly {})", describe_delta(blocks))?,
            },
            KStatus::OutOfRange => write!(f, " (coefficient outside -50% ~ 200%)")?,
        }

        write!(f, "\n* Recommendation: ")?;
        match (self.best, self.best_grade) {
            (Some(best), Some(grade)) => {
                write!(
                    f,
                    "{} -> {:.1}%",
                    describe_delta(i64::from(best.delta_blocks)),
                    best.resulting_k
                )?;
                match grade {
                    BestGrade::Recommended => write!(f, " (recommended)"),
                    BestGrade::Acceptable => write!(f, " (acceptable)"),
                    BestGrade::AlreadyBest => write!(f, " (already near the best range)"),
                    BestGrade::Closest => {
                        write!(f, " (closest to {:.1}%)", self.targets.ideal_k)
                    }
                }
            }
            _ => write!(f, "no suitable option found"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_finds_boundary_and_best() {
        let report = recommend(Some(40.0), Some(1000.0), Some(25.0), &BalanceTargets::default())
            .unwrap();
        let deltas: Vec<i32> = report.feasible.iter().map(|o| o.delta_blocks).collect();
        assert_eq!(deltas, vec![2, 3, 4]);
        assert!((report.feasible[0].resulting_k - 45.0).abs() < 1e-9);
        let best = report.best.unwrap();
        assert_eq!(best.delta_blocks, 3);
        assert!((best.resulting_k - 47.5).abs() < 1e-9);
        assert_eq!(report.best_grade, Some(BestGrade::Recommended));
        assert_eq!(report.status, KStatus::Acceptable);
        assert_eq!(report.rough_blocks, Some(3));
    }

    #[test]
    fn test_zero_block_weight_cannot_adjust() {
        let report =
            recommend(Some(40.0), Some(1000.0), Some(0.0), &BalanceTargets::default()).unwrap();
        assert!(!report.adjustable);
        assert!(report.best.is_none());
        assert!(report.to_string().contains("cannot adjust via blocks"));
    }

    #[test]
    fn test_invalid_inputs_are_errors() {
        let targets = BalanceTargets::default();
        assert_eq!(
            recommend(None, Some(1000.0), Some(25.0), &targets),
            Err(BalanceError::MissingInput("balance coefficient"))
        );
        assert_eq!(
            recommend(Some(40.0), Some(0.0), Some(25.0), &targets),
            Err(BalanceError::NonPositiveRatedLoad(0.0))
        );
        assert_eq!(
            recommend(Some(40.0), Some(1000.0), Some(-5.0), &targets),
            Err(BalanceError::NegativeBlockWeight(-5.0))
        );
        let err = recommend(Some(40.0), Some(-1.0), Some(25.0), &targets).unwrap_err();
        assert!(err.to_string().starts_with("cannot compute recommendation"));
    }

    #[test]
    fn test_never_leaves_negative_counterweight() {
        let report =
            recommend(Some(5.0), Some(1000.0), Some(25.0), &BalanceTargets::default()).unwrap();
        assert!(report
            .feasible
            .iter()
            .chain(report.best.iter())
            .all(|o| o.resulting_k >= 0.0));
    }

    #[test]
    fn test_ideal_current_keeps_as_is() {
        let report =
            recommend(Some(47.5), Some(1000.0), Some(25.0), &BalanceTargets::default()).unwrap();
        assert_eq!(report.status, KStatus::Ideal);
        assert_eq!(report.best.unwrap().delta_blocks, 0);
        assert!(report.rough_blocks.is_none());
        let text = report.to_string();
        assert!(text.contains("keep as is -> 47.5% (recommended)"));
    }

    #[test]
    fn test_no_feasible_option_when_blocks_too_coarse() {
        let report =
            recommend(Some(40.0), Some(1000.0), Some(120.0), &BalanceTargets::default()).unwrap();
        assert!(report.feasible.is_empty());
        assert_eq!(report.best.unwrap().delta_blocks, 1);
        assert_eq!(report.best_grade, Some(BestGrade::Closest));
        assert!(report.to_string().starts_with("No option reaches the target range"));
    }
}
