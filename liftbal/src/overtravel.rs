//! Maximum overtravel and pit clearance from shaft geometry.
//!
//! Values stay in `f32`, the precision they are measured and entered in.

use serde::{Deserialize, Serialize};

/// Shaft measurements in metres; speed in m/s. Zero means "not entered".
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ShaftGeometry {
    pub speed: f32,
    /// Counterweight buffer compression (h).
    pub buffer_compression: f32,
    /// Car buffer compression (k).
    pub car_buffer_compression: f32,
    pub car_guide_travel: f32,
    pub standing_height_travel: f32,
    pub highest_component_travel_a: f32,
    pub highest_component_travel_b: f32,
    pub counterweight_guide_travel: f32,
}

impl Default for ShaftGeometry {
    fn default() -> Self {
        Self {
            speed: 1.0,
            buffer_compression: 0.0,
            car_buffer_compression: 0.0,
            car_guide_travel: 0.0,
            standing_height_travel: 0.0,
            highest_component_travel_a: 0.0,
            highest_component_travel_b: 0.0,
            counterweight_guide_travel: 0.0,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    CarGuide,
    StandingHeight,
    HighestComponentA,
    HighestComponentB,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LimitStatus {
    Limited(Condition),
    PartialInput,
    AwaitingGeometry,
    AwaitingSpeed,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct OvertravelResult {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
    pub e: f32,
    pub max_overtravel: f32,
    pub limit: LimitStatus,
    pub complete: bool,
}

pub fn max_overtravel(geometry: &ShaftGeometry) -> OvertravelResult {
    let v = geometry.speed;
    let h = geometry.buffer_compression;
    let k = geometry.car_buffer_compression;
    let speed_term = 0.035 * v * v;
    let safety = 0.1 + speed_term;

    let condition =
        |travel: f32, margin: f32| (travel > 0.0 && h > 0.0).then(|| travel - h - margin);
    let conditions = [
        (Condition::CarGuide, condition(geometry.car_guide_travel, safety)),
        (
            Condition::StandingHeight,
            condition(geometry.standing_height_travel, 1.0 + speed_term),
        ),
        (
            Condition::HighestComponentA,
            condition(geometry.highest_component_travel_a, 0.3 + speed_term),
        ),
        (
            Condition::HighestComponentB,
            condition(geometry.highest_component_travel_b, safety),
        ),
    ];

    let e = if geometry.counterweight_guide_travel > 0.0 && k > 0.0 {
        geometry.counterweight_guide_travel - k - safety
    } else {
        0.0
    };

    // First smallest non-negative value wins ties.
    let mut limiting: Option<(Condition, f32)> = None;
    for (cond, value) in conditions
        .iter()
        .filter_map(|(cond, value)| value.map(|value| (*cond, value)))
    {
        if value >= 0.0 && limiting.map_or(true, |(_, best)| value < best) {
            limiting = Some((cond, value));
        }
    }

    let complete = [
        geometry.car_guide_travel,
        geometry.standing_height_travel,
        geometry.highest_component_travel_a,
        geometry.highest_component_travel_b,
        geometry.counterweight_guide_travel,
        h,
        k,
    ]
    .iter()
    .all(|value| *value > 0.0);

    let limit = match limiting {
        Some((cond, _)) if complete => LimitStatus::Limited(cond),
        Some(_) => LimitStatus::PartialInput,
        None if v > 0.0 => LimitStatus::AwaitingGeometry,
        None => LimitStatus::AwaitingSpeed,
    };
    let max_overtravel = match limiting {
        Some((_, value)) if complete => value,
        _ => 0.0,
    };
    let value_of = |index: usize| conditions[index].1.unwrap_or(0.0);

    OvertravelResult {
        a: value_of(0),
        b: value_of(1),
        c: value_of(2),
        d: value_of(3),
        e,
        max_overtravel,
        limit,
        complete,
    }
}

/// Minimum vertical pit distance for a given horizontal distance, in metres.
pub fn min_pit_vertical_distance(horizontal: f32) -> f32 {
    if horizontal < 0.15 {
        0.15
    } else if horizontal <= 0.50 {
        0.10 + (horizontal - 0.15) * (8.0 / 7.0)
    } else {
        0.50
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_geometry() -> ShaftGeometry {
        ShaftGeometry {
            speed: 1.0,
            buffer_compression: 0.1,
            car_buffer_compression: 0.1,
            car_guide_travel: 1.0,
            standing_height_travel: 2.0,
            highest_component_travel_a: 1.5,
            highest_component_travel_b: 1.2,
            counterweight_guide_travel: 1.0,
        }
    }

    #[test]
    fn test_complete_geometry_picks_smallest_condition() {
        let result = max_overtravel(&full_geometry());
        assert!(result.complete);
        // a = 1.0 - 0.1 - 0.135
        assert!((result.a - 0.765).abs() < 1e-5);
        assert!((result.b - 0.865).abs() < 1e-5);
        assert!((result.c - 1.065).abs() < 1e-5);
        assert!((result.d - 0.965).abs() < 1e-5);
        assert!((result.e - 0.765).abs() < 1e-5);
        assert_eq!(result.limit, LimitStatus::Limited(Condition::CarGuide));
        assert!((result.max_overtravel - 0.765).abs() < 1e-5);
    }

    #[test]
    fn test_partial_input_reports_no_maximum() {
        let geometry = ShaftGeometry {
            car_buffer_compression: 0.0,
            counterweight_guide_travel: 0.0,
            ..full_geometry()
        };
        let result = max_overtravel(&geometry);
        assert!(!result.complete);
        assert_eq!(result.limit, LimitStatus::PartialInput);
        assert_eq!(result.max_overtravel, 0.0);
        assert_eq!(result.e, 0.0);
    }

    #[test]
    fn test_waiting_states() {
        assert_eq!(
            max_overtravel(&ShaftGeometry::default()).limit,
            LimitStatus::AwaitingGeometry
        );
        let no_speed = ShaftGeometry {
            speed: 0.0,
            ..ShaftGeometry::default()
        };
        assert_eq!(max_overtravel(&no_speed).limit, LimitStatus::AwaitingSpeed);
    }

    #[test]
    fn test_pit_distance_piecewise() {
        assert_eq!(min_pit_vertical_distance(0.1), 0.15);
        assert!((min_pit_vertical_distance(0.15) - 0.10).abs() < 1e-6);
        assert!((min_pit_vertical_distance(0.50) - 0.50).abs() < 1e-5);
        assert_eq!(min_pit_vertical_distance(0.8), 0.50);
    }
}
