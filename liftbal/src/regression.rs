//! Balance point from least-squares lines fitted to each current series.
//!
//! The fitted-lines crossing is reconciled with local interpolation candidates
//! (sign changes between consecutive matched points, or the extrapolated
//! difference trend) by confidence weighting. Per-point constraints bound the
//! answer: a point with upward below downward current means balance lies at or
//! above that load, and the reverse.

use tracing::debug;

use crate::estimator::BalanceEstimator;
use crate::fit::{
    difference_trend, extrapolation_ratio, fit_series, mean_difference, LineFit,
};
use crate::matching::{match_points, MATCH_TOLERANCE};
use crate::{
    clamp_between, clamp_k, in_k_domain, CurrentSample, EstimationResult, MatchedPoint, K_MAX,
    K_MIN,
};

const BALANCED_DIFF_A: f32 = 0.01;
const MIN_R2: f64 = 0.3;
const GOOD_R2: f64 = 0.7;
const EXCELLENT_R2: f64 = 0.9;
const CONFLICT_EXPANSION: f64 = 0.3;

#[derive(Clone, Copy, Debug, Default)]
pub struct LinearRegression;

/// Edge offsets as fractions of the data range. `scaled` is indexed by the
/// magnitude of the mean current difference (<2 A, <5 A, otherwise).
struct EdgeOffsets {
    scaled: [f64; 3],
    flat: f64,
}

const CONSERVATIVE_OFFSETS: EdgeOffsets = EdgeOffsets {
    scaled: [0.2, 0.3, 0.4],
    flat: 0.3,
};

const FINAL_OFFSETS: EdgeOffsets = EdgeOffsets {
    scaled: [0.15, 0.25, 0.35],
    flat: 0.2,
};

impl EdgeOffsets {
    fn for_mean_difference(&self, mean_diff: f64) -> f64 {
        let magnitude = mean_diff.abs();
        if magnitude < 2.0 {
            self.scaled[0]
        } else if magnitude < 5.0 {
            self.scaled[1]
        } else {
            self.scaled[2]
        }
    }
}

/// Where the difference trend places the balance point relative to the data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Edge {
    /// Below the data, offset scaled by the mean difference.
    BelowScaled,
    Below,
    Above,
}

/// Matched data plus the admissible K interval derived from it.
struct Frame<'a> {
    points: &'a [MatchedPoint],
    min_x: f64,
    max_x: f64,
    range: f64,
    lower: f64,
    upper: f64,
    conflict: bool,
    all_less: bool,
    all_greater: bool,
}

impl<'a> Frame<'a> {
    fn new(points: &'a [MatchedPoint], lower: f64, upper: f64) -> Self {
        let min_x = points.first().map_or(0.0, |p| p.load_pct);
        let max_x = points.last().map_or(0.0, |p| p.load_pct);
        Frame {
            points,
            min_x,
            max_x,
            range: max_x - min_x,
            lower,
            upper,
            conflict: lower >= upper,
            all_less: points.iter().all(|p| p.upward_a < p.downward_a),
            all_greater: points.iter().all(|p| p.upward_a > p.downward_a),
        }
    }

    fn len(&self) -> usize {
        self.points.len()
    }

    fn contains(&self, x: f64) -> bool {
        x >= self.min_x && x <= self.max_x
    }

    fn final_bounds(&self) -> (f64, f64) {
        if self.conflict {
            (0.0, K_MAX)
        } else {
            (self.lower, self.upper)
        }
    }

    fn edge(&self, slope: f64) -> Option<Edge> {
        if slope < 0.0 && self.all_less {
            Some(Edge::BelowScaled)
        } else if slope > 0.0 && self.all_less {
            Some(Edge::Above)
        } else if slope > 0.0 && self.all_greater {
            Some(Edge::Below)
        } else if slope < 0.0 && self.all_greater {
            Some(Edge::Above)
        } else {
            None
        }
    }

    /// Raw estimate offset from the nearer data edge in the trend's direction.
    fn edge_estimate(&self, edge: Edge, offsets: &EdgeOffsets) -> f64 {
        match edge {
            Edge::BelowScaled => {
                let ratio = offsets.for_mean_difference(mean_difference(self.points));
                self.min_x - self.range * ratio
            }
            Edge::Below => self.min_x - self.range * offsets.flat,
            Edge::Above => self.max_x + self.range * offsets.flat,
        }
    }

    /// Edge estimate used when extrapolation overshoots; `None` outside the K domain.
    fn conservative_estimate(&self, slope: f64) -> Option<(f64, f64)> {
        let edge = self.edge(slope)?;
        let x = self.edge_estimate(edge, &CONSERVATIVE_OFFSETS);
        let weight = if edge == Edge::BelowScaled { 0.25 } else { 0.2 };
        in_k_domain(x).then_some((x, weight))
    }

    fn settle(&self, k: f64, r_squared: Option<f64>) -> EstimationResult {
        let (lo, hi) = self.final_bounds();
        let k = clamp_k(clamp_between(k, lo, hi));
        EstimationResult::new(Some(k), self.contains(k), r_squared)
    }
}

impl BalanceEstimator for LinearRegression {
    fn estimate(&self, upward: &[CurrentSample], downward: &[CurrentSample]) -> EstimationResult {
        let points = match_points(upward, downward, MATCH_TOLERANCE);
        if points.len() < 2 {
            return EstimationResult::insufficient();
        }

        let mut lower = 0.0_f64;
        let mut upper = K_MAX;
        for point in &points {
            let diff = point.difference();
            if diff.abs() < BALANCED_DIFF_A {
                return EstimationResult::new(Some(clamp_k(point.load_pct)), true, None);
            } else if diff < 0.0 {
                lower = lower.max(point.load_pct);
            } else {
                upper = upper.min(point.load_pct);
            }
        }

        let mut frame = Frame::new(&points, lower, upper);

        let mut left_estimate = None;
        if (frame.all_less || frame.all_greater) && !frame.conflict {
            left_estimate = trend_left_estimate(&frame);
            if let Some(estimate) = left_estimate {
                frame.lower = estimate;
                frame.upper = frame.max_x + frame.range * CONFLICT_EXPANSION;
            }
        }

        if frame.conflict {
            debug!(lower, upper, "conflicting per-point constraints; widening interval");
            frame.lower = (frame.min_x - frame.range * CONFLICT_EXPANSION).max(0.0);
            frame.upper = (frame.max_x + frame.range * CONFLICT_EXPANSION).min(K_MAX);
            if frame.lower >= frame.upper {
                frame.lower = 0.0;
                frame.upper = K_MAX;
            }
        }

        let mut candidates = interpolation_candidates(&frame);
        if (frame.all_less || frame.all_greater) && candidates.is_empty() {
            candidates.extend(trend_extrapolation(&frame));
        }

        let (up_fit, down_fit) = match (fit_series(upward), fit_series(downward)) {
            (Some(up), Some(down)) => (up, down),
            _ => {
                debug!("degenerate series fit; using local candidates only");
                return local_only(&frame, &candidates, None);
            }
        };
        let r2 = (up_fit.r_squared + down_fit.r_squared) / 2.0;

        let Some(fitted_x) = up_fit.intersect(&down_fit) else {
            debug!(r2, "fitted lines are parallel; using local candidates only");
            return local_only(&frame, &candidates, Some(r2));
        };

        let fit = FittedCrossing::new(&frame, fitted_x, r2);

        let admissible = if frame.conflict {
            (0.0..=K_MAX).contains(&fit.x)
        } else {
            fit.x >= frame.lower && fit.x <= frame.upper
        };
        let reject = r2 < MIN_R2 && frame.len() <= 2;

        if admissible && fit.ratio <= fit.max_ratio && !reject {
            accept_fit(&frame, candidates, &fit, left_estimate)
        } else {
            debug!(
                x = fit.x,
                ratio = fit.ratio,
                r2,
                "fitted intersection rejected"
            );
            reject_fit(&frame, &candidates, &fit)
        }
    }
}

struct FittedCrossing {
    x: f64,
    in_data: bool,
    ratio: f64,
    max_ratio: f64,
    r2: f64,
}

impl FittedCrossing {
    /// Extrapolation beyond 1.5 (up to three points) or 2.5 data ranges is
    /// not trusted.
    fn new(frame: &Frame<'_>, x: f64, r2: f64) -> Self {
        FittedCrossing {
            x,
            in_data: frame.contains(x),
            ratio: extrapolation_ratio(x, frame.min_x, frame.max_x),
            max_ratio: if frame.len() <= 3 { 1.5 } else { 2.5 },
            r2,
        }
    }
}

/// Lower-side estimate when the difference trend says balance lies below the data.
fn trend_left_estimate(frame: &Frame<'_>) -> Option<f64> {
    let trend = difference_trend(frame.points)?;
    let leans_left =
        (trend.slope < 0.0 && frame.all_less) || (trend.slope > 0.0 && frame.all_greater);
    if !leans_left {
        return None;
    }
    let ratio = CONSERVATIVE_OFFSETS.for_mean_difference(mean_difference(frame.points));
    Some((frame.min_x - frame.range * ratio).max(K_MIN))
}

fn interpolation_candidates(frame: &Frame<'_>) -> Vec<(f64, f64)> {
    frame
        .points
        .windows(2)
        .filter(|pair| pair[0].difference() * pair[1].difference() < 0.0)
        .filter_map(|pair| {
            let (x1, x2) = (pair[0].load_pct, pair[1].load_pct);
            let y1 = f64::from(pair[0].difference());
            let y2 = f64::from(pair[1].difference());
            if (y2 - y1).abs() < 1e-10 {
                return None;
            }
            let x = x1 - y1 * (x2 - x1) / (y2 - y1);
            if !in_k_domain(x) {
                return None;
            }

            let t = (x - x1) / (x2 - x1);
            let mut weight = (1.0 - (t - 0.5).abs() * 1.5).clamp(0.3, 1.0);
            if frame.conflict {
                weight *= 0.8;
            }

            let admissible = if frame.conflict {
                (0.0..=K_MAX).contains(&x)
            } else {
                x >= frame.lower && x <= frame.upper
            };
            admissible.then_some((x, weight))
        })
        .collect()
}

fn trend_extrapolation(frame: &Frame<'_>) -> Option<(f64, f64)> {
    let trend = difference_trend(frame.points)?;
    let x = trend.root()?;
    let ratio = extrapolation_ratio(x, frame.min_x, frame.max_x);
    let max_ratio = if frame.len() <= 3 { 1.0 } else { 2.0 };

    let valid = frame.contains(x) || (ratio <= max_ratio && in_k_domain(x));
    if valid {
        let mut weight = 0.6 * (1.0 - (ratio / max_ratio).min(1.0) * 0.6);
        if frame.len() <= 3 {
            weight *= 0.7;
        }
        if frame.conflict {
            weight *= 0.8;
        }
        Some((x, weight.clamp(0.15, 0.6)))
    } else if ratio > max_ratio {
        frame.conservative_estimate(trend.slope)
    } else {
        None
    }
}

fn weighted_average(candidates: &[(f64, f64)]) -> f64 {
    let total: f64 = candidates.iter().map(|(_, w)| w).sum();
    candidates.iter().map(|(x, w)| x * w).sum::<f64>() / total
}

/// Result from local candidates alone, for degenerate or parallel fits.
fn local_only(frame: &Frame<'_>, candidates: &[(f64, f64)], r2: Option<f64>) -> EstimationResult {
    if candidates.is_empty() {
        if frame.conflict {
            let mid = (frame.min_x + frame.max_x) / 2.0;
            return EstimationResult::new(Some(clamp_k(mid)), false, r2);
        }
        return EstimationResult::new(None, false, r2);
    }
    frame.settle(weighted_average(candidates), r2)
}

fn fitted_weight(frame: &Frame<'_>, candidates: &[(f64, f64)], fit: &FittedCrossing) -> f64 {
    let multiplier = if fit.r2 >= EXCELLENT_R2 {
        1.3
    } else if fit.r2 >= GOOD_R2 {
        1.0
    } else if fit.r2 >= MIN_R2 {
        0.7
    } else {
        0.4
    };
    let n = frame.len();
    let base = if n >= 3 { 1.0 + (n as f64 - 3.0) * 0.2 } else { 1.0 };
    let mut weight = (base * multiplier).clamp(0.3, 1.5);

    if !fit.in_data {
        let penalty = (fit.ratio / fit.max_ratio).min(1.0);
        weight *= 1.0 - penalty * 0.4;
    }

    let nearest = candidates
        .iter()
        .map(|(x, _)| (x - fit.x).abs())
        .fold(f64::MAX, f64::min);
    if nearest < 0.1 {
        weight *= 0.6;
    } else if nearest > 1.0 {
        weight *= 0.8;
    }

    if frame.conflict {
        weight *= 0.7;
    }
    weight.clamp(0.2, 1.5)
}

fn accept_fit(
    frame: &Frame<'_>,
    mut candidates: Vec<(f64, f64)>,
    fit: &FittedCrossing,
    left_estimate: Option<f64>,
) -> EstimationResult {
    let r2 = Some(fit.r2);
    if !candidates.is_empty() {
        let weight = fitted_weight(frame, &candidates, fit);
        candidates.push((fit.x, weight));
        let average = weighted_average(&candidates);
        let k = if !fit.in_data && fit.r2 < GOOD_R2 && average > frame.lower {
            (frame.lower + average) / 2.0
        } else {
            average
        };
        return frame.settle(k, r2);
    }

    let (lo, hi) = frame.final_bounds();
    if let Some(estimate) = left_estimate {
        if fit.r2 < GOOD_R2 {
            let trend_weight = if fit.ratio > 0.5 { 0.8 } else { 0.6 };
            let k = estimate * trend_weight + fit.x * (1.0 - trend_weight);
            return EstimationResult::new(Some(clamp_k(clamp_between(k, lo, hi))), false, r2);
        }
        if fit.x > frame.max_x && fit.ratio > 0.5 {
            return EstimationResult::new(Some(clamp_k(estimate)), false, r2);
        }
    }

    let k = if !fit.in_data && fit.r2 < GOOD_R2 && fit.x > lo {
        (lo + fit.x) / 2.0
    } else {
        fit.x
    };
    EstimationResult::new(Some(clamp_k(clamp_between(k, lo, hi))), fit.in_data, r2)
}

fn reject_fit(
    frame: &Frame<'_>,
    candidates: &[(f64, f64)],
    fit: &FittedCrossing,
) -> EstimationResult {
    let r2 = Some(fit.r2);
    if !candidates.is_empty() {
        return frame.settle(weighted_average(candidates), r2);
    }

    if fit.ratio > fit.max_ratio {
        let conservative = difference_trend(frame.points)
            .and_then(|trend| frame.conservative_estimate(trend.slope));
        if let Some((k, _)) = conservative {
            return EstimationResult::new(Some(clamp_k(k)), false, r2);
        }
    }

    if frame.conflict && (0.0..=K_MAX).contains(&fit.x) && fit.ratio <= 2.0 {
        return EstimationResult::new(Some(fit.x), false, r2);
    }

    let (lo, hi) = if frame.conflict {
        (frame.min_x, frame.max_x * 1.1)
    } else {
        (frame.lower, frame.upper)
    };
    let estimate = if frame.conflict {
        (frame.min_x + frame.max_x) / 2.0
    } else {
        final_estimate(frame, difference_trend(frame.points), lo, hi)
    };
    let k = clamp_between(estimate, lo.max(K_MIN), hi.min(K_MAX));
    EstimationResult::new(Some(clamp_k(k)), false, r2)
}

/// Last-resort estimate when neither local candidates nor the fit are usable.
fn final_estimate(frame: &Frame<'_>, trend: Option<LineFit>, lo: f64, hi: f64) -> f64 {
    let midpoint = (lo + hi.min(frame.max_x * 1.1)) / 2.0;
    match trend {
        Some(trend) => match frame.edge(trend.slope) {
            Some(edge) => frame
                .edge_estimate(edge, &FINAL_OFFSETS)
                .max(K_MIN)
                .min(K_MAX),
            None => midpoint,
        },
        None if frame.all_less => (frame.min_x - frame.range * 0.2).max(K_MIN),
        None if frame.all_greater => (frame.max_x + frame.range * 0.2).min(K_MAX),
        None => midpoint,
    }
}
