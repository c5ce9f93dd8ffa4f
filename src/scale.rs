// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

//! The percentile schedule every artifact is keyed by, and the ways a
//! percentile becomes a distance threshold.

use crate::errors::ConfigError;
use crate::graph_formats::PercentileRow;
use std::collections::BTreeMap;
use std::str::FromStr;

/// Distance (km) reached at percentile 100 under [`ScaleMode::Log`].
pub const LOG_SCALE_MAX_DISTANCE: f64 = 100.0;

/// `intervals` evenly spaced percentiles in (0, 100], always ending at 100.
pub fn percentile_range(intervals: u32) -> Result<Vec<u32>, ConfigError> {
    // past 100 steps integer percentiles would repeat
    if intervals == 0 || intervals > 100 {
        return Err(ConfigError::InvalidIntervals(intervals));
    }

    let step = 100.0 / intervals as f64;
    Ok((1..=intervals)
        .map(|i| (i as f64 * step).round() as u32)
        .collect())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScaleMode {
    /// Empirical percentiles of the edge distance sample.
    Percentiles,
    /// `(p / 100)^2 * LOG_SCALE_MAX_DISTANCE`, no I/O.
    Log,
}

impl FromStr for ScaleMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "percentiles" => Ok(ScaleMode::Percentiles),
            "log" => Ok(ScaleMode::Log),
            _ => Err(ConfigError::UnknownScaleMode(s.to_string())),
        }
    }
}

impl std::fmt::Display for ScaleMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScaleMode::Percentiles => write!(f, "percentiles"),
            ScaleMode::Log => write!(f, "log"),
        }
    }
}

pub fn abs_log_scale(percentile: u32) -> f64 {
    (percentile as f64 / 100.0).powi(2) * LOG_SCALE_MAX_DISTANCE
}

/// Percentile -> distance threshold for one distance sample.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PercentileTable {
    table: BTreeMap<u32, f64>,
}

impl PercentileTable {
    /// Linear interpolation between closest ranks, so percentile 0 is the
    /// minimum and percentile 100 the maximum of the sample. Zero-length
    /// edges are not part of the distribution.
    pub fn compute(sample: &[f64], percentiles: &[u32]) -> Option<Self> {
        let mut sorted: Vec<f64> = sample.iter().copied().filter(|&d| d > 0.0).collect();
        if sorted.is_empty() {
            return None;
        }
        sorted.sort_by(|a, b| a.total_cmp(b));

        let table = percentiles
            .iter()
            .map(|&per| (per, interpolate(&sorted, per as f64)))
            .collect();
        Some(Self { table })
    }

    pub fn get(&self, percentile: u32) -> Result<f64, ConfigError> {
        self.table
            .get(&percentile)
            .copied()
            .ok_or(ConfigError::MissingPercentile(percentile))
    }

    pub fn rows(&self) -> Vec<PercentileRow> {
        self.table
            .iter()
            .map(|(&percentile, &distance)| PercentileRow {
                percentile,
                distance,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

fn interpolate(sorted: &[f64], percentile: f64) -> f64 {
    let rank = (percentile / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_four_intervals() {
        assert_eq!(percentile_range(4).unwrap(), vec![25, 50, 75, 100]);
    }

    #[test]
    fn test_range_shape_for_every_interval_count() {
        for intervals in 1..=100 {
            let range = percentile_range(intervals).unwrap();
            assert_eq!(range.len(), intervals as usize);
            assert_eq!(*range.last().unwrap(), 100);
            assert!(range[0] > 0);
            assert!(
                range.windows(2).all(|w| w[0] < w[1]),
                "not ascending for {}: {:?}",
                intervals,
                range
            );
        }
    }

    #[test]
    fn test_range_rounds() {
        assert_eq!(percentile_range(3).unwrap(), vec![33, 67, 100]);
        assert_eq!(percentile_range(1).unwrap(), vec![100]);
    }

    #[test]
    fn test_invalid_intervals() {
        assert!(percentile_range(0).is_err());
        assert!(percentile_range(101).is_err());
    }

    #[test]
    fn test_log_scale() {
        assert_eq!(abs_log_scale(50), 25.0);
        assert_eq!(abs_log_scale(100), 100.0);
        assert!(abs_log_scale(10) < abs_log_scale(20));
    }

    #[test]
    fn test_scale_mode_parsing() {
        assert_eq!("percentiles".parse::<ScaleMode>().unwrap(), ScaleMode::Percentiles);
        assert_eq!("LOG".parse::<ScaleMode>().unwrap(), ScaleMode::Log);
        assert!(matches!(
            "linear".parse::<ScaleMode>(),
            Err(ConfigError::UnknownScaleMode(_))
        ));
    }

    #[test]
    fn test_percentile_table_interpolates() {
        let sample = vec![4.0, 1.0, 3.0, 2.0, 5.0];
        let table = PercentileTable::compute(&sample, &[25, 50, 75, 100]).unwrap();
        assert_eq!(table.get(25).unwrap(), 2.0);
        assert_eq!(table.get(50).unwrap(), 3.0);
        assert_eq!(table.get(100).unwrap(), 5.0);

        let table = PercentileTable::compute(&[1.0, 11.0], &[33]).unwrap();
        assert!((table.get(33).unwrap() - 4.3).abs() < 1e-12);
    }

    #[test]
    fn test_unknown_percentile_is_an_error() {
        let table = PercentileTable::compute(&[1.0, 2.0], &[50, 100]).unwrap();
        assert!(matches!(table.get(42), Err(ConfigError::MissingPercentile(42))));
    }

    #[test]
    fn test_empty_sample() {
        assert!(PercentileTable::compute(&[], &[100]).is_none());
        assert!(PercentileTable::compute(&[0.0, 0.0], &[100]).is_none());
    }

    #[test]
    fn test_zero_distances_do_not_shift_percentiles() {
        let per = [25, 50, 75, 100];
        let with_zeros = PercentileTable::compute(&[0.0, 0.0, 0.0, 10.0, 20.0], &per).unwrap();
        let without = PercentileTable::compute(&[10.0, 20.0], &per).unwrap();
        assert_eq!(with_zeros, without);
        assert_eq!(with_zeros.get(25).unwrap(), 12.5);
        assert_eq!(with_zeros.get(50).unwrap(), 15.0);
    }
}
