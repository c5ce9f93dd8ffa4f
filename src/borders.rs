// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

//! Border segments between communities.
//!
//! A Voronoi cell edge is a border when the sites on either side carry
//! different labels. Over several partitions, its weight is the share of
//! partitions in which it is a border.

use crate::combine_borders::CombineBorders;
use crate::graph_formats::{SegmentRow, write_rows};
use crate::partition::{Partition, run_files};
use crate::voronoi::Voronoi;
use anyhow::Result;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Where the partitions of one scale are read from.
#[derive(Debug, Clone, Copy)]
pub enum BorderSource<'p> {
    /// A single best-partition file.
    Best(&'p Path),
    /// A directory of repeated-run partition files.
    Runs(&'p Path),
}

pub struct Borders<'a> {
    vor: &'a Voronoi,
    smooth: bool,
}

impl<'a> Borders<'a> {
    pub fn new(vor: &'a Voronoi, smooth: bool) -> Self {
        Self { vor, smooth }
    }

    fn load(&self, path: &Path) -> Result<Partition<'a>> {
        let mut par = Partition::read(path, self.vor)?;
        if self.smooth {
            let sweeps = par.smooth_until_stable();
            debug!("{:?} stable after {} sweeps", path, sweeps);
        }
        Ok(par)
    }

    pub fn partitions(&self, source: BorderSource<'_>) -> Result<Vec<Partition<'a>>> {
        let files: Vec<PathBuf> = match source {
            BorderSource::Best(file) => vec![file.to_path_buf()],
            BorderSource::Runs(dir) => run_files(dir)?,
        };
        files.iter().map(|f| self.load(f)).collect()
    }

    /// Segments drawn by at least one partition, in cell edge order.
    pub fn segments(&self, partitions: &[Partition<'_>]) -> Vec<SegmentRow> {
        let partitions: Vec<&Partition<'_>> =
            partitions.iter().filter(|p| !p.is_empty()).collect();
        if partitions.is_empty() {
            return Vec::new();
        }
        let total = partitions.len() as f64;

        // majority label of every site, once per partition
        let site_labels: Vec<Vec<Option<u32>>> = partitions
            .iter()
            .map(|p| (0..self.vor.num_sites()).map(|s| p.site_label(s)).collect())
            .collect();

        self.vor
            .cell_edges()
            .iter()
            .filter_map(|edge| {
                let count = site_labels
                    .iter()
                    .filter(|labels| labels[edge.site_a] != labels[edge.site_b])
                    .count();
                (count > 0).then(|| SegmentRow {
                    x1: edge.from[0],
                    y1: edge.from[1],
                    x2: edge.to[0],
                    y2: edge.to[1],
                    weight: count as f64 / total,
                })
            })
            .collect()
    }

    /// Writes the border file of one scale. Returns the number of segments.
    pub fn process(&self, source: BorderSource<'_>, out: &Path) -> Result<usize> {
        let partitions = self.partitions(source)?;
        let segments = self.segments(&partitions);
        write_rows(out, &segments)?;
        info!("{:?}: {} border segments", out, segments.len());
        Ok(segments.len())
    }

    /// Builds the atlas straight from each scale's best partition, without
    /// intermediate border files. `files` pairs each scale with its
    /// partition file, ascending by scale.
    pub fn process_multi(&self, files: &[(u32, PathBuf)], out: &Path) -> Result<CombineBorders> {
        let mut atlas = CombineBorders::new();
        for (scale, file) in files {
            let partitions = self.partitions(BorderSource::Best(file))?;
            let segments = self.segments(&partitions);
            debug!("scale {}: {} border segments", scale, segments.len());
            atlas.add_segments(&segments, *scale);
        }
        atlas.write(out)?;
        Ok(atlas)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LocationId;
    use crate::graph_formats::{AtlasRow, PartitionRow, read_rows};
    use crate::voronoi::tests::grid;

    fn scratch_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(uuid::Uuid::new_v4().to_string());
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_partition(path: &Path, labels: &[(LocationId, u32)]) {
        let rows: Vec<PartitionRow> = labels
            .iter()
            .map(|&(id, comm)| PartitionRow { id, comm })
            .collect();
        write_rows(path, &rows).unwrap();
    }

    /// Left column vs the rest of the grid.
    fn left_column() -> Vec<(LocationId, u32)> {
        (1..=9)
            .map(|id| (id, if (id - 1) % 3 == 0 { 1 } else { 0 }))
            .collect()
    }

    #[test]
    fn test_single_community_has_no_borders() {
        let dir = scratch_dir();
        let vor = Voronoi::new(&grid()).unwrap();
        let file = dir.join("comm-d100.csv");
        write_partition(&file, &(1..=9).map(|id| (id, 0)).collect::<Vec<_>>());

        let out = dir.join("bord-d100.csv");
        let n = Borders::new(&vor, false)
            .process(BorderSource::Best(&file), &out)
            .unwrap();
        assert_eq!(n, 0);
        assert!(read_rows::<SegmentRow>(&out).unwrap().is_empty());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_column_split_draws_a_vertical_border() {
        let dir = scratch_dir();
        let vor = Voronoi::new(&grid()).unwrap();
        let file = dir.join("comm-d100.csv");
        write_partition(&file, &left_column());

        let out = dir.join("bord-d100.csv");
        let n = Borders::new(&vor, false)
            .process(BorderSource::Best(&file), &out)
            .unwrap();
        assert!(n > 0);

        let rows: Vec<SegmentRow> = read_rows(&out).unwrap();
        for row in &rows {
            assert_eq!(row.weight, 1.0);
            // halfway between the first and second columns
            assert!((row.x1 - 4.05).abs() < 1e-9, "{:?}", row);
            assert!((row.x2 - 4.05).abs() < 1e-9, "{:?}", row);
        }

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_run_weights_are_fractions() {
        let dir = scratch_dir();
        let vor = Voronoi::new(&grid()).unwrap();
        let runs = dir.join("comm-d100");
        std::fs::create_dir_all(&runs).unwrap();
        write_partition(&runs.join("run-0.csv"), &left_column());
        write_partition(&runs.join("run-1.csv"), &(1..=9).map(|id| (id, 0)).collect::<Vec<_>>());

        let borders = Borders::new(&vor, false);
        let partitions = borders.partitions(BorderSource::Runs(&runs)).unwrap();
        assert_eq!(partitions.len(), 2);
        let segments = borders.segments(&partitions);
        assert!(!segments.is_empty());
        assert!(segments.iter().all(|s| s.weight == 0.5));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_smoothing_removes_island_borders() {
        let dir = scratch_dir();
        let vor = Voronoi::new(&grid()).unwrap();
        let file = dir.join("comm-d100.csv");
        let mut labels: Vec<(LocationId, u32)> = (1..=9).map(|id| (id, 0)).collect();
        labels[4].1 = 1;
        write_partition(&file, &labels);

        let raw = Borders::new(&vor, false)
            .partitions(BorderSource::Best(&file))
            .unwrap();
        assert!(!Borders::new(&vor, false).segments(&raw).is_empty());

        let smoothed = Borders::new(&vor, true)
            .partitions(BorderSource::Best(&file))
            .unwrap();
        assert!(Borders::new(&vor, true).segments(&smoothed).is_empty());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_multi_matches_per_scale_then_combine() {
        let dir = scratch_dir();
        let vor = Voronoi::new(&grid()).unwrap();
        let low = dir.join("comm-d50.csv");
        let high = dir.join("comm-d100.csv");
        write_partition(&low, &left_column());
        write_partition(&high, &[(1, 0), (9, 1)]);
        let files = vec![(50, low.clone()), (100, high.clone())];

        let borders = Borders::new(&vor, false);
        let multi = dir.join("multi.csv");
        borders.process_multi(&files, &multi).unwrap();

        let mut combined = CombineBorders::new();
        for (scale, file) in &files {
            let bord = dir.join(format!("bord-d{}.csv", scale));
            borders.process(BorderSource::Best(file), &bord).unwrap();
            combined.add_file(&bord, *scale).unwrap();
        }
        let separate = dir.join("atlas.csv");
        combined.write(&separate).unwrap();

        let a: Vec<AtlasRow> = read_rows(&multi).unwrap();
        let b: Vec<AtlasRow> = read_rows(&separate).unwrap();
        assert!(!a.is_empty());
        assert_eq!(a, b);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
