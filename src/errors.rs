// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

use crate::LocationId;
use thiserror::Error;

/// Configuration mistakes. These end the run; nothing catches them.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unknown scale type: {0}. Valid options: percentiles, log")]
    UnknownScaleMode(String),
    #[error("percentile {0} is not part of the percentile table")]
    MissingPercentile(u32),
    #[error("no coordinates for location {0}; the location map must cover the table")]
    MissingCoordinates(LocationId),
    #[error("Unknown metric: {0}. Valid options: ncomms, entropy, giant")]
    UnknownMetric(String),
    #[error("Unknown region: {0}")]
    UnknownRegion(String),
    #[error("invalid table name: '{0}'")]
    InvalidTable(String),
    #[error("scale mode 'percentiles' needs a distance sample file")]
    MissingDistanceSample,
    #[error("distance sample {0} has no rows")]
    EmptyDistanceSample(String),
    #[error("intervals must be at least 1, got {0}")]
    InvalidIntervals(u32),
    #[error("no partition files found in {0}")]
    NoPartitions(String),
}
