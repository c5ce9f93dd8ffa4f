// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

//! Community labels for every known location at one scale.

use crate::LocationId;
use crate::errors::ConfigError;
use crate::graph_formats::{PartitionRow, read_rows, write_rows};
use crate::voronoi::Voronoi;
use ahash::AHashMap;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

/// Summary statistics of a partition, selectable by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartitionMetric {
    /// Number of distinct communities.
    Ncomms,
    /// Shannon entropy (nats) of the community size distribution.
    Entropy,
    /// Share of locations in the largest community.
    Giant,
}

impl FromStr for PartitionMetric {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ncomms" => Ok(PartitionMetric::Ncomms),
            "entropy" => Ok(PartitionMetric::Entropy),
            "giant" => Ok(PartitionMetric::Giant),
            _ => Err(ConfigError::UnknownMetric(s.to_string())),
        }
    }
}

pub struct Partition<'a> {
    vor: &'a Voronoi,
    /// Indexed like `vor.ids()`; empty when the partition has no seeds.
    labels: Vec<u32>,
}

impl<'a> Partition<'a> {
    /// Extends `seeds` to every location through their Voronoi cells.
    pub fn from_seeds(vor: &'a Voronoi, seeds: &[(LocationId, u32)]) -> Result<Self> {
        Ok(Self {
            vor,
            labels: vor.assign(seeds)?,
        })
    }

    pub fn read(path: &Path, vor: &'a Voronoi) -> Result<Self> {
        let rows: Vec<PartitionRow> = read_rows(path)?;
        let seeds: Vec<(LocationId, u32)> = rows.iter().map(|r| (r.id, r.comm)).collect();
        Self::from_seeds(vor, &seeds)
    }

    /// Writes the label of every location, so reading the file back with the
    /// same Voronoi reproduces this partition exactly.
    pub fn write(&self, path: &Path) -> Result<()> {
        let rows: Vec<PartitionRow> = self
            .vor
            .ids()
            .iter()
            .zip(&self.labels)
            .map(|(&id, &comm)| PartitionRow { id, comm })
            .collect();
        write_rows(path, &rows)
    }

    pub fn labels(&self) -> &[u32] {
        &self.labels
    }

    pub fn label(&self, id: LocationId) -> Option<u32> {
        self.vor
            .index_of(id)
            .and_then(|i| self.labels.get(i).copied())
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Most common label among the locations of `site`, smallest on ties.
    pub fn site_label(&self, site: usize) -> Option<u32> {
        if self.labels.is_empty() {
            return None;
        }
        majority(self.vor.members(site).iter().map(|&i| self.labels[i]))
            .map(|(label, _)| label)
    }

    /// One sweep in index order. A location switches only to a label held by
    /// strictly more of its neighbours than its current one. Returns the
    /// number of switches.
    pub fn smooth(&mut self) -> usize {
        let mut changed = 0;
        for i in 0..self.labels.len() {
            let current = self.labels[i];
            let neighbour_labels = self.vor.neighbours(i).map(|j| self.labels[j]);
            let mut counts: AHashMap<u32, usize> = AHashMap::new();
            for label in neighbour_labels {
                *counts.entry(label).or_default() += 1;
            }
            let current_count = counts.get(&current).copied().unwrap_or(0);
            let best = counts
                .iter()
                .map(|(&label, &count)| (label, count))
                .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)));

            if let Some((label, count)) = best {
                if count > current_count {
                    self.labels[i] = label;
                    changed += 1;
                }
            }
        }
        changed
    }

    /// Sweeps until nothing changes.
    ///
    /// Every switch strictly lowers the number of neighbouring pairs with
    /// different labels, so this reaches a fixed point.
    pub fn smooth_until_stable(&mut self) -> usize {
        let mut sweeps = 0;
        loop {
            let changed = self.smooth();
            sweeps += 1;
            debug!("smoothing sweep {}: {} changes", sweeps, changed);
            if changed == 0 {
                return sweeps;
            }
        }
    }

    /// `1 - RandIndex` between two partitions over the same locations.
    /// Zero for identical partitions. A partition with no seeds against one
    /// with seeds is maximal change, 1.
    pub fn distance(&self, other: &Partition<'_>) -> f64 {
        if self.is_empty() != other.is_empty() {
            return 1.0;
        }
        let n = self.labels.len().min(other.labels.len());
        if n < 2 {
            return 0.0;
        }

        let mut joint: AHashMap<(u32, u32), u64> = AHashMap::new();
        let mut left: AHashMap<u32, u64> = AHashMap::new();
        let mut right: AHashMap<u32, u64> = AHashMap::new();
        for i in 0..n {
            let (a, b) = (self.labels[i], other.labels[i]);
            *joint.entry((a, b)).or_default() += 1;
            *left.entry(a).or_default() += 1;
            *right.entry(b).or_default() += 1;
        }

        let pairs = |x: u64| (x as f64) * (x as f64 - 1.0) / 2.0;
        let total = pairs(n as u64);
        let same_both: f64 = joint.values().map(|&x| pairs(x)).sum();
        let same_left: f64 = left.values().map(|&x| pairs(x)).sum();
        let same_right: f64 = right.values().map(|&x| pairs(x)).sum();

        let agreements = total + 2.0 * same_both - same_left - same_right;
        (1.0 - agreements / total).max(0.0)
    }

    pub fn metric(&self, metric: PartitionMetric) -> f64 {
        if self.labels.is_empty() {
            return 0.0;
        }

        let mut sizes: AHashMap<u32, usize> = AHashMap::new();
        for &label in &self.labels {
            *sizes.entry(label).or_default() += 1;
        }
        let n = self.labels.len() as f64;

        match metric {
            PartitionMetric::Ncomms => sizes.len() as f64,
            PartitionMetric::Entropy => sizes
                .values()
                .map(|&s| {
                    let p = s as f64 / n;
                    -p * p.ln()
                })
                .sum(),
            PartitionMetric::Giant => {
                sizes.values().copied().max().unwrap_or_default() as f64 / n
            }
        }
    }
}

/// The `.csv` partition files of a run directory, in name order.
pub fn run_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to read {:?}", dir))? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "csv") {
            files.push(path);
        }
    }
    if files.is_empty() {
        return Err(ConfigError::NoPartitions(dir.display().to_string()).into());
    }
    files.sort();
    Ok(files)
}

/// (label, count) of the most frequent label, smallest label on ties.
fn majority(labels: impl Iterator<Item = u32>) -> Option<(u32, usize)> {
    let mut counts: AHashMap<u32, usize> = AHashMap::new();
    for label in labels {
        *counts.entry(label).or_default() += 1;
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
}
