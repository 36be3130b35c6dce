//! Balance point from intersections of the piecewise-linear current curves.
//!
//! Every pair of consecutive matched points defines an upward and a downward
//! segment; their crossing is a candidate balance point. Crossings inside the
//! segment are "actual", crossings on the extended lines are extrapolated and
//! weighted down. When every point sits on the same side, the difference trend
//! is extrapolated to zero instead.

use ordered_float::OrderedFloat;
use tracing::debug;

use crate::estimator::BalanceEstimator;
use crate::fit::{difference_trend, segment_intersect};
use crate::matching::{match_points, MATCH_TOLERANCE};
use crate::{in_k_domain, CurrentSample, EstimationResult, MatchedPoint};

#[derive(Clone, Copy, Debug, Default)]
pub struct TwoPointIntersection;

#[derive(Clone, Copy, Debug, PartialEq)]
struct Candidate {
    x: f64,
    actual: bool,
    weight: f64,
}

/// Which side of the data the balance point is expected on when all points
/// are one-sided.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Lean {
    Left,
    Right,
}

impl BalanceEstimator for TwoPointIntersection {
    fn estimate(&self, upward: &[CurrentSample], downward: &[CurrentSample]) -> EstimationResult {
        let points = match_points(upward, downward, MATCH_TOLERANCE);
        if points.len() < 2 {
            return EstimationResult::insufficient();
        }

        let mut candidates = segment_candidates(&points);

        let all_less = points.iter().all(|p| p.upward_a < p.downward_a);
        let all_greater = points.iter().all(|p| p.upward_a > p.downward_a);
        let has_actual = candidates.iter().any(|c| c.actual);

        if (all_less || all_greater) && !has_actual {
            candidates.extend(sign_change_candidates(&points));

            let min_x = points[0].load_pct;
            let max_x = points[points.len() - 1].load_pct;
            let needs_extrapolation = if difference_change(&points) == 0.0 {
                candidates.is_empty()
            } else {
                match lean(&points, all_less) {
                    Lean::Left => candidates.iter().all(|c| c.x > min_x),
                    Lean::Right => candidates.iter().all(|c| c.x < max_x),
                }
            };
            if needs_extrapolation {
                if let Some(candidate) = trend_candidate(&points) {
                    candidates.push(candidate);
                } else {
                    debug!("difference trend is flat; no extrapolated balance point");
                }
            }
        }

        if candidates.is_empty() {
            return EstimationResult::insufficient();
        }

        let actual: Vec<Candidate> = candidates.iter().copied().filter(|c| c.actual).collect();
        let pool = if actual.is_empty() { &candidates } else { &actual };

        match select_best(pool, &points, all_less, all_greater) {
            Some(best) => EstimationResult::new(Some(best.x), best.actual, None),
            None => EstimationResult::insufficient(),
        }
    }
}

fn segment_candidates(points: &[MatchedPoint]) -> Vec<Candidate> {
    points
        .windows(2)
        .filter_map(|pair| {
            let (p1, p2) = (pair[0], pair[1]);
            let x = segment_intersect(
                (p1.load_pct, p1.upward_a),
                (p2.load_pct, p2.upward_a),
                (p1.load_pct, p1.downward_a),
                (p2.load_pct, p2.downward_a),
            )?;
            if !in_k_domain(x) {
                return None;
            }
            let min_x = p1.load_pct.min(p2.load_pct);
            let max_x = p1.load_pct.max(p2.load_pct);
            let actual = x >= min_x && x <= max_x;

            let center = (min_x + max_x) / 2.0;
            let length = max_x - min_x;
            let normalized = if length > 1e-10 {
                (x - center).abs() / length
            } else {
                1.0
            };
            let weight = if actual {
                1.0 - normalized * 0.5
            } else {
                0.3 * (1.0 - (normalized / 2.0).min(1.0))
            };
            Some(Candidate { x, actual, weight })
        })
        .collect()
}

fn sign_change_candidates(points: &[MatchedPoint]) -> Vec<Candidate> {
    points
        .windows(2)
        .filter(|pair| pair[0].difference() * pair[1].difference() < 0.0)
        .filter_map(|pair| {
            let (p1, p2) = (pair[0], pair[1]);
            let dx = p2.load_pct - p1.load_pct;
            let k_up = f64::from(p2.upward_a - p1.upward_a) / dx;
            let b_up = f64::from(p1.upward_a) - k_up * p1.load_pct;
            let k_down = f64::from(p2.downward_a - p1.downward_a) / dx;
            let b_down = f64::from(p1.downward_a) - k_down * p1.load_pct;
            if (k_up - k_down).abs() <= 1e-10 {
                return None;
            }
            let x = (b_down - b_up) / (k_up - k_down);
            in_k_domain(x).then_some(Candidate {
                x,
                actual: true,
                weight: 1.0,
            })
        })
        .collect()
}

/// Last minus first upward-minus-downward difference.
fn difference_change(points: &[MatchedPoint]) -> f32 {
    points[points.len() - 1].difference() - points[0].difference()
}

fn lean(points: &[MatchedPoint], all_less: bool) -> Lean {
    match (all_less, difference_change(points) > 0.0) {
        (true, true) => Lean::Right,
        (true, false) => Lean::Left,
        (false, true) => Lean::Left,
        (false, false) => Lean::Right,
    }
}

/// Extrapolate the fitted difference trend to its zero crossing.
fn trend_candidate(points: &[MatchedPoint]) -> Option<Candidate> {
    let x = difference_trend(points)?.root()?;
    let min_x = points[0].load_pct;
    let max_x = points[points.len() - 1].load_pct;
    let range = max_x - min_x;
    let cap = (if points.len() <= 3 { 1.0 } else { 2.0 }) * range;

    let distance = if x > max_x {
        x - max_x
    } else if x < min_x {
        min_x - x
    } else {
        0.0
    };
    if distance > cap || !in_k_domain(x) {
        debug!(x, distance, cap, "trend extrapolation rejected");
        return None;
    }

    let normalized = if range > 1e-10 { distance / range } else { 1.0 };
    let weight = (0.5 * (1.0 - (normalized / 2.0).min(1.0))).max(0.2);
    Some(Candidate {
        x,
        actual: false,
        weight,
    })
}

fn select_best(
    candidates: &[Candidate],
    points: &[MatchedPoint],
    all_less: bool,
    all_greater: bool,
) -> Option<Candidate> {
    if !(all_less || all_greater) {
        return heaviest(candidates);
    }
    let min_x = points[0].load_pct;
    let max_x = points[points.len() - 1].load_pct;

    match lean(points, all_less) {
        Lean::Right => candidates
            .iter()
            .filter(|c| c.x >= max_x)
            .min_by_key(|c| OrderedFloat((c.x - max_x).abs()))
            .or_else(|| {
                candidates
                    .iter()
                    .min_by_key(|c| OrderedFloat((c.x - max_x).abs()))
            })
            .copied()
            .or_else(|| heaviest(candidates)),
        Lean::Left => select_left(candidates, min_x)
            .or_else(|| {
                candidates
                    .iter()
                    .min_by_key(|c| OrderedFloat((c.x - min_x).abs()))
                    .copied()
            })
            .or_else(|| heaviest(candidates)),
    }
}

/// Among candidates at or below the data, prefer the heaviest, then the lowest X.
/// Candidates hugging zero load are only used when nothing else is on the left.
fn select_left(candidates: &[Candidate], min_x: f64) -> Option<Candidate> {
    let left: Vec<Candidate> = candidates.iter().copied().filter(|c| c.x <= min_x).collect();
    if left.is_empty() {
        return None;
    }
    let has_near_zero = left.iter().any(|c| c.x.abs() <= 1.0);
    let has_other = left.iter().any(|c| c.x.abs() > 1.0);
    let considered: Vec<Candidate> = if has_near_zero && has_other {
        left.into_iter().filter(|c| c.x.abs() > 1.0).collect()
    } else {
        left
    };

    let max_weight = considered
        .iter()
        .map(|c| c.weight)
        .fold(f64::NEG_INFINITY, f64::max);
    let top: Vec<Candidate> = considered
        .into_iter()
        .filter(|c| c.weight >= max_weight - 0.01)
        .collect();

    if top.len() > 1 {
        top.iter().min_by_key(|c| OrderedFloat(c.x)).copied()
    } else {
        top.first().copied()
    }
}

fn heaviest(candidates: &[Candidate]) -> Option<Candidate> {
    // `max_by_key` keeps the last of equal weights; reverse so the first wins.
    candidates
        .iter()
        .rev()
        .max_by_key(|c| OrderedFloat(c.weight))
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples(raw: &[(f64, f32)]) -> Vec<CurrentSample> {
        raw.iter().map(|&(x, y)| CurrentSample::new(x, y)).collect()
    }

    #[test]
    fn test_crossing_between_two_points() {
        let up = samples(&[(10.0, 5.0), (20.0, 9.0)]);
        let down = samples(&[(10.0, 8.0), (20.0, 7.0)]);
        let result = TwoPointIntersection.estimate(&up, &down);
        assert!(result.has_actual_intersection);
        assert!(result.r_squared.is_none());
        // up - down = -3 at 10 and +2 at 20; zero at 10 + 3/5 * 10.
        assert!((result.k_value.unwrap() - 16.0).abs() < 1e-6);
    }

    #[test]
    fn test_three_point_crossing_in_last_segment() {
        let up = samples(&[(30.0, 4.0), (40.0, 5.0), (50.0, 6.0)]);
        let down = samples(&[(30.0, 6.0), (40.0, 5.5), (50.0, 5.0)]);
        let result = TwoPointIntersection.estimate(&up, &down);
        assert!(result.has_actual_intersection);
        let k = result.k_value.unwrap();
        assert!((k - (40.0 + 0.5 / 1.5 * 10.0)).abs() < 1e-4);
    }

    #[test]
    fn test_one_sided_extrapolates_right() {
        // Upward below downward, gap closing with load: balance above the data.
        let up = samples(&[(30.0, 4.0), (40.0, 5.0), (50.0, 6.0)]);
        let down = samples(&[(30.0, 8.0), (40.0, 8.0), (50.0, 8.0)]);
        let result = TwoPointIntersection.estimate(&up, &down);
        assert!(!result.has_actual_intersection);
        let k = result.k_value.unwrap();
        assert!((k - 70.0).abs() < 1e-4);
    }

    #[test]
    fn test_one_sided_extrapolates_left() {
        // Upward above downward, gap widening with load: balance below the data.
        let up = samples(&[(40.0, 7.0), (50.0, 8.0)]);
        let down = samples(&[(40.0, 6.0), (50.0, 6.0)]);
        let result = TwoPointIntersection.estimate(&up, &down);
        assert!(!result.has_actual_intersection);
        assert!((result.k_value.unwrap() - 30.0).abs() < 1e-4);
    }

    #[test]
    fn test_parallel_curves_yield_nothing() {
        let up = samples(&[(30.0, 4.0), (50.0, 6.0)]);
        let down = samples(&[(30.0, 6.0), (50.0, 8.0)]);
        let result = TwoPointIntersection.estimate(&up, &down);
        assert_eq!(result, EstimationResult::insufficient());
    }

    #[test]
    fn test_single_match_is_insufficient() {
        let up = samples(&[(30.0, 4.0), (40.0, 5.0)]);
        let down = samples(&[(30.0, 6.0), (45.0, 5.5)]);
        let result = TwoPointIntersection.estimate(&up, &down);
        assert_eq!(result, EstimationResult::insufficient());
    }

    #[test]
    fn test_select_left_prefers_lowest_among_heaviest() {
        let candidates = [
            Candidate { x: 20.0, actual: false, weight: 0.4 },
            Candidate { x: 10.0, actual: false, weight: 0.405 },
            Candidate { x: 0.5, actual: false, weight: 0.9 },
        ];
        let best = select_left(&candidates, 30.0).unwrap();
        assert_eq!(best.x, 10.0);
    }

    fn matched(loads: &[f64], upward: &[f32], downward: f32) -> Vec<MatchedPoint> {
        loads
            .iter()
            .zip(upward)
            .map(|(&load_pct, &upward_a)| MatchedPoint {
                load_pct,
                upward_a,
                downward_a: downward,
            })
            .collect()
    }

    #[test]
    fn test_trend_extrapolation_capped_at_one_range_for_three_points() {
        let loads = [40.0, 50.0, 60.0];
        // Root at 90: one and a half ranges beyond the data.
        assert!(trend_candidate(&matched(&loads, &[3.0, 4.0, 5.0], 8.0)).is_none());

        // Root at 70: half a range out.
        let candidate = trend_candidate(&matched(&loads, &[4.0, 5.0, 6.0], 7.0)).unwrap();
        assert!((candidate.x - 70.0).abs() < 1e-6);
        assert!(!candidate.actual);
        assert!((candidate.weight - 0.375).abs() < 1e-9);
    }

    #[test]
    fn test_trend_extrapolation_capped_at_two_ranges_for_more_points() {
        let loads = [40.0, 50.0, 60.0, 70.0];
        // Root at 115: 1.5 ranges out is allowed, at the minimum weight.
        let candidate = trend_candidate(&matched(&loads, &[2.5, 3.5, 4.5, 5.5], 10.0)).unwrap();
        assert!((candidate.x - 115.0).abs() < 1e-6);
        assert!((candidate.weight - 0.2).abs() < 1e-9);

        // Root at 145: 2.5 ranges out.
        assert!(trend_candidate(&matched(&loads, &[1.5, 2.5, 3.5, 4.5], 12.0)).is_none());
    }
}
