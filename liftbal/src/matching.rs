use std::cmp::Ordering;

use crate::{CurrentSample, MatchedPoint};

/// Maximum load-percentage distance for an upward and a downward reading to pair.
pub const MATCH_TOLERANCE: f64 = 0.01;

/// Pair each upward sample with the downward sample nearest in load percentage.
///
/// Pairs further apart than `tolerance` are dropped, as are unmatched upward
/// samples. The result is sorted ascending by load. Either side holding fewer
/// than two samples yields an empty list.
pub fn match_points(
    upward: &[CurrentSample],
    downward: &[CurrentSample],
    tolerance: f64,
) -> Vec<MatchedPoint> {
    if upward.len() < 2 || downward.len() < 2 {
        return Vec::new();
    }

    let mut matched: Vec<MatchedPoint> = upward
        .iter()
        .filter_map(|up| {
            let nearest = downward.iter().min_by(|a, b| {
                let da = (a.load_pct - up.load_pct).abs();
                let db = (b.load_pct - up.load_pct).abs();
                da.partial_cmp(&db).unwrap_or(Ordering::Equal)
            })?;
            ((nearest.load_pct - up.load_pct).abs() < tolerance).then(|| MatchedPoint {
                load_pct: up.load_pct,
                upward_a: up.current_a,
                downward_a: nearest.current_a,
            })
        })
        .collect();

    matched.sort_by(|a, b| a.load_pct.partial_cmp(&b.load_pct).unwrap_or(Ordering::Equal));
    matched
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples(raw: &[(f64, f32)]) -> Vec<CurrentSample> {
        raw.iter().map(|&(x, y)| CurrentSample::new(x, y)).collect()
    }

    #[test]
    fn test_pairs_sorted_and_drops_unmatched() {
        let up = samples(&[(50.0, 6.0), (30.0, 4.0), (41.0, 5.0)]);
        let down = samples(&[(30.005, 6.0), (40.0, 5.5), (50.0, 5.0)]);
        let matched = match_points(&up, &down, MATCH_TOLERANCE);
        assert_eq!(matched.len(), 2);
        assert_eq!(matched[0].load_pct, 30.0);
        assert_eq!(matched[0].downward_a, 6.0);
        assert_eq!(matched[1].load_pct, 50.0);
        assert!((matched[1].difference() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_short_series_yield_nothing() {
        let up = samples(&[(30.0, 4.0)]);
        let down = samples(&[(30.0, 6.0), (40.0, 5.5)]);
        assert!(match_points(&up, &down, MATCH_TOLERANCE).is_empty());
        assert!(match_points(&down, &up, MATCH_TOLERANCE).is_empty());
    }

    #[test]
    fn test_inputs_left_untouched() {
        let up = samples(&[(50.0, 6.0), (30.0, 4.0)]);
        let down = samples(&[(50.0, 5.0), (30.0, 6.0)]);
        let before = up.clone();
        let _ = match_points(&up, &down, MATCH_TOLERANCE);
        assert_eq!(up, before);
    }
}
