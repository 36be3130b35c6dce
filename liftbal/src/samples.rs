//! Conversions between counterweight block counts and load percentages.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::{BalanceError, CurrentSample};

/// Nominal test loads used when no custom block counts are entered.
pub const DEFAULT_TEST_PERCENTAGES: [u32; 5] = [30, 40, 45, 50, 60];

/// One measurement slot: test weights loaded as a block count, plus readings.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct BlockReading {
    pub blocks: Option<i64>,
    pub upward_a: Option<f32>,
    pub downward_a: Option<f32>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct LoadTableRow {
    pub nominal_pct: u32,
    pub theoretical_load: f64,
    pub blocks: i64,
    pub actual_load: f64,
    pub actual_pct: f64,
}

fn check_base(rated_load: f64, block_weight: f64) -> Result<(), BalanceError> {
    if !(rated_load > 0.0) {
        return Err(BalanceError::InvalidParameter(format!(
            "rated load must be positive (got {})",
            rated_load
        )));
    }
    if !(block_weight > 0.0) {
        return Err(BalanceError::InvalidParameter(format!(
            "block weight must be positive (got {})",
            block_weight
        )));
    }
    Ok(())
}

pub fn block_load_pct(blocks: i64, rated_load: f64, block_weight: f64) -> f64 {
    blocks as f64 * block_weight / rated_load * 100.0
}

/// Build upward and downward sample lists from block-count slots.
///
/// Slots missing the block count or either reading are skipped. Both lists
/// come back sorted by load percentage.
pub fn samples_from_blocks(
    rated_load: f64,
    block_weight: f64,
    readings: &[BlockReading],
) -> Result<(Vec<CurrentSample>, Vec<CurrentSample>), BalanceError> {
    check_base(rated_load, block_weight)?;

    let mut upward = Vec::with_capacity(readings.len());
    let mut downward = Vec::with_capacity(readings.len());
    for reading in readings {
        if let (Some(blocks), Some(up), Some(down)) =
            (reading.blocks, reading.upward_a, reading.downward_a)
        {
            let load_pct = block_load_pct(blocks, rated_load, block_weight);
            upward.push(CurrentSample::new(load_pct, up));
            downward.push(CurrentSample::new(load_pct, down));
        }
    }
    let by_load = |a: &CurrentSample, b: &CurrentSample| {
        a.load_pct.partial_cmp(&b.load_pct).unwrap_or(Ordering::Equal)
    };
    upward.sort_by(by_load);
    downward.sort_by(by_load);
    Ok((upward, downward))
}

/// Whole-block test loads closest to each nominal percentage.
pub fn load_table(
    rated_load: f64,
    block_weight: f64,
    percentages: &[u32],
) -> Result<Vec<LoadTableRow>, BalanceError> {
    check_base(rated_load, block_weight)?;
    Ok(percentages
        .iter()
        .map(|&pct| {
            let theoretical_load = rated_load * f64::from(pct) / 100.0;
            let blocks = (theoretical_load / block_weight).round() as i64;
            let actual_load = blocks as f64 * block_weight;
            LoadTableRow {
                nominal_pct: pct,
                theoretical_load,
                blocks,
                actual_load,
                actual_pct: actual_load / rated_load * 100.0,
            }
        })
        .collect())
}
