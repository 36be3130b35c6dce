use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::{CurrentSample, MatchedPoint};

const DEGENERATE_EPS: f64 = 1e-10;

/// Ordinary least-squares line `y = slope * x + intercept`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct LineFit {
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
}

impl LineFit {
    /// X where the two lines cross, `None` when (nearly) parallel.
    pub fn intersect(&self, other: &LineFit) -> Option<f64> {
        let dk = self.slope - other.slope;
        if dk.abs() < DEGENERATE_EPS {
            return None;
        }
        Some((other.intercept - self.intercept) / dk)
    }

    /// X where the line crosses zero, `None` for a flat line.
    pub fn root(&self) -> Option<f64> {
        if self.slope.abs() > DEGENERATE_EPS {
            Some(-self.intercept / self.slope)
        } else {
            None
        }
    }
}

pub(crate) fn least_squares(xs: &Array1<f64>, ys: &Array1<f64>) -> Option<LineFit> {
    if xs.len() < 2 || xs.len() != ys.len() {
        return None;
    }
    let n = xs.len() as f64;
    let sum_x = xs.sum();
    let sum_y = ys.sum();
    let sum_xy = xs.dot(ys);
    let sum_xx = xs.dot(xs);
    let denominator = n * sum_xx - sum_x * sum_x;
    if denominator.abs() < DEGENERATE_EPS {
        return None;
    }
    let slope = (n * sum_xy - sum_x * sum_y) / denominator;
    let intercept = (sum_y - slope * sum_x) / n;

    let mean_y = sum_y / n;
    let mut total_ss = 0.0;
    let mut residual_ss = 0.0;
    for (&x, &y) in xs.iter().zip(ys.iter()) {
        let predicted = slope * x + intercept;
        total_ss += (y - mean_y) * (y - mean_y);
        residual_ss += (y - predicted) * (y - predicted);
    }
    let r_squared = if total_ss < DEGENERATE_EPS {
        1.0
    } else {
        (1.0 - residual_ss / total_ss).clamp(0.0, 1.0)
    };

    Some(LineFit {
        slope,
        intercept,
        r_squared,
    })
}

/// Fit one current series (load percentage against amps).
pub(crate) fn fit_series(samples: &[CurrentSample]) -> Option<LineFit> {
    let xs = Array1::from_iter(samples.iter().map(|s| s.load_pct));
    let ys = Array1::from_iter(samples.iter().map(|s| f64::from(s.current_a)));
    least_squares(&xs, &ys)
}

/// Linear trend of the upward-minus-downward difference across matched points.
pub(crate) fn difference_trend(points: &[MatchedPoint]) -> Option<LineFit> {
    let xs = Array1::from_iter(points.iter().map(|p| p.load_pct));
    let ys = Array1::from_iter(points.iter().map(|p| f64::from(p.difference())));
    least_squares(&xs, &ys)
}

/// Mean upward-minus-downward difference.
pub(crate) fn mean_difference(points: &[MatchedPoint]) -> f64 {
    if points.is_empty() {
        return 0.0;
    }
    points.iter().map(|p| f64::from(p.difference())).sum::<f64>() / points.len() as f64
}

/// Intersection X of the lines through `a`-`b` and `c`-`d`.
///
/// A vertical first line yields its own X; a vertical second line yields its X.
pub(crate) fn segment_intersect(
    a: (f64, f32),
    b: (f64, f32),
    c: (f64, f32),
    d: (f64, f32),
) -> Option<f64> {
    let (x1, y1) = a;
    let (x2, y2) = b;
    let (x3, y3) = c;
    let (x4, y4) = d;

    let dx1 = x2 - x1;
    if dx1.abs() < DEGENERATE_EPS {
        if (x3 - x4).abs() < DEGENERATE_EPS {
            return ((x1 - x3).abs() < DEGENERATE_EPS).then_some(x1);
        }
        return Some(x1);
    }
    let k1 = f64::from(y2 - y1) / dx1;
    let b1 = f64::from(y1) - k1 * x1;

    let dx2 = x4 - x3;
    if dx2.abs() < DEGENERATE_EPS {
        return Some(x3);
    }
    let k2 = f64::from(y4 - y3) / dx2;
    let b2 = f64::from(y3) - k2 * x3;

    if (k1 - k2).abs() < DEGENERATE_EPS {
        return None;
    }
    Some((b2 - b1) / (k1 - k2))
}

/// Distance of `x` outside `[min_x, max_x]` in units of the data range.
pub(crate) fn extrapolation_ratio(x: f64, min_x: f64, max_x: f64) -> f64 {
    let range = (max_x - min_x).max(0.01);
    if x > max_x {
        (x - max_x) / range
    } else if x < min_x {
        (min_x - x) / range
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_line_has_unit_r_squared() {
        let xs = Array1::from_vec(vec![30.0, 40.0, 50.0, 60.0]);
        let ys = xs.mapv(|x| 0.1 * x + 1.0);
        let fit = least_squares(&xs, &ys).unwrap();
        assert!((fit.slope - 0.1).abs() < 1e-9);
        assert!((fit.intercept - 1.0).abs() < 1e-9);
        assert!((fit.r_squared - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_flat_series_defined_as_perfect_fit() {
        let xs = Array1::from_vec(vec![30.0, 40.0, 50.0]);
        let ys = Array1::from_vec(vec![5.0, 5.0, 5.0]);
        let fit = least_squares(&xs, &ys).unwrap();
        assert_eq!(fit.r_squared, 1.0);
        assert!(fit.root().is_none());
    }

    #[test]
    fn test_identical_loads_are_degenerate() {
        let xs = Array1::from_vec(vec![40.0, 40.0]);
        let ys = Array1::from_vec(vec![5.0, 6.0]);
        assert!(least_squares(&xs, &ys).is_none());
    }

    #[test]
    fn test_segment_intersect_crossing() {
        let x = segment_intersect((10.0, 5.0), (20.0, 9.0), (10.0, 8.0), (20.0, 7.0)).unwrap();
        assert!((x - 16.0).abs() < 1e-6);
    }

    #[test]
    fn test_segment_intersect_parallel() {
        assert!(segment_intersect((10.0, 5.0), (20.0, 6.0), (10.0, 7.0), (20.0, 8.0)).is_none());
    }

    #[test]
    fn test_extrapolation_ratio() {
        assert_eq!(extrapolation_ratio(45.0, 40.0, 50.0), 0.0);
        assert!((extrapolation_ratio(65.0, 40.0, 50.0) - 1.5).abs() < 1e-12);
        assert!((extrapolation_ratio(30.0, 40.0, 50.0) - 1.0).abs() < 1e-12);
    }
}
