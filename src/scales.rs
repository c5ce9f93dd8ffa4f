// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

//! The multi-scale pipeline.
//!
//! Every artifact lives under `outdir`, named `{name}-d{percentile}.csv`
//! (or a `{name}-d{percentile}/` directory for repeated runs). Each stage
//! reads only what earlier stages left on disk, so any stage can be re-run
//! on its own.

use crate::borders::{BorderSource, Borders};
use crate::combine_borders::CombineBorders;
use crate::communities::{CommunityDetection, Communities, Louvain};
use crate::confmodel::normalize_with_confmodel;
use crate::crop_borders::CropBorders;
use crate::draw_map::MapRenderer;
use crate::errors::ConfigError;
use crate::event_source::EventSource;
use crate::filter_dists::FilterDists;
use crate::gen_graph::{GenGraph, GenStats};
use crate::graph_formats::{GraphFile, MetricsRow, RowWriter, read_distance_sample, write_rows};
use crate::locmap::LocationMap;
use crate::partition::{Partition, PartitionMetric, run_files};
use crate::regions::Region;
use crate::scale::{PercentileTable, ScaleMode, abs_log_scale, percentile_range};
use crate::voronoi::Voronoi;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// How `generate_communities` runs detection at each scale.
#[derive(Debug, Clone, Copy)]
pub struct CommunitySettings {
    pub two_level: bool,
    pub runs: u32,
    /// Keep the best of `runs` runs instead of a single one.
    pub best: bool,
    pub seed: u64,
}

impl Default for CommunitySettings {
    fn default() -> Self {
        Self {
            two_level: false,
            runs: 1,
            best: false,
            seed: 0,
        }
    }
}

pub struct Scales {
    outdir: PathBuf,
    percentiles: Vec<u32>,
    /// Filled on first use, lives as long as this `Scales`.
    per_table: Option<PercentileTable>,
}

impl Scales {
    pub fn new(outdir: impl Into<PathBuf>, intervals: u32) -> Result<Self> {
        let percentiles = percentile_range(intervals)?;
        let outdir = outdir.into();
        fs::create_dir_all(&outdir)
            .with_context(|| format!("Failed to create output dir {:?}", outdir))?;
        Ok(Self {
            outdir,
            percentiles,
            per_table: None,
        })
    }

    pub fn outdir(&self) -> &Path {
        &self.outdir
    }

    pub fn percent_range(&self) -> &[u32] {
        &self.percentiles
    }

    pub fn make_path(&self, name: &str, per_dist: u32) -> PathBuf {
        self.outdir.join(format!("{}-d{}.csv", name, per_dist))
    }

    /// Creates the directory if it does not exist yet.
    pub fn make_dir(&self, name: &str, per_dist: u32) -> Result<PathBuf> {
        let path = self.outdir.join(format!("{}-d{}", name, per_dist));
        fs::create_dir_all(&path).with_context(|| format!("Failed to create {:?}", path))?;
        Ok(path)
    }

    pub fn graph_path(&self, per_dist: u32) -> PathBuf {
        self.make_path("graph", per_dist)
    }

    pub fn comm_path(&self, per_dist: u32) -> PathBuf {
        self.make_path("comm", per_dist)
    }

    pub fn comm_dir(&self, per_dist: u32) -> Result<PathBuf> {
        self.make_dir("comm", per_dist)
    }

    pub fn bord_path(&self, per_dist: u32) -> PathBuf {
        self.make_path("bord", per_dist)
    }

    pub fn map_path(&self, per_dist: u32, extension: &str) -> PathBuf {
        self.outdir.join(format!("map-d{}.{}", per_dist, extension))
    }

    pub fn metrics_path(&self) -> PathBuf {
        self.outdir.join("metrics.csv")
    }

    pub fn percentiles_path(&self) -> PathBuf {
        self.outdir.join("percentiles.csv")
    }

    pub fn write_percentiles(&self, per_table: &PercentileTable) -> Result<()> {
        write_rows(&self.percentiles_path(), &per_table.rows())
    }

    /// Reads the distance sample once and persists its percentile table.
    pub fn compute_percentiles(&self, infile: &Path) -> Result<PercentileTable> {
        info!("loading file: {:?}", infile);
        let sample = read_distance_sample(infile)?;
        let per_table = PercentileTable::compute(&sample, &self.percentiles)
            .ok_or_else(|| ConfigError::EmptyDistanceSample(infile.display().to_string()))?;
        self.write_percentiles(&per_table)?;
        Ok(per_table)
    }

    fn percentile_to_dist(&mut self, infile: &Path, per: u32) -> Result<f64> {
        if self.per_table.is_none() {
            self.per_table = Some(self.compute_percentiles(infile)?);
        }
        match &self.per_table {
            Some(table) => Ok(table.get(per)?),
            None => Err(ConfigError::MissingPercentile(per).into()),
        }
    }

    /// Distance threshold (km) of a scale.
    pub fn dist(&mut self, per: u32, mode: ScaleMode, infile: Option<&Path>) -> Result<f64> {
        match mode {
            ScaleMode::Percentiles => {
                let infile = infile.ok_or(ConfigError::MissingDistanceSample)?;
                self.percentile_to_dist(infile, per)
            }
            ScaleMode::Log => Ok(abs_log_scale(per)),
        }
    }

    /// Builds the full graph once, then projects it onto every lower scale.
    pub fn generate_graphs<S: EventSource + ?Sized>(
        &mut self,
        source: &mut S,
        locmap: &LocationMap,
        infile: Option<&Path>,
        mode: ScaleMode,
        table: &str,
    ) -> Result<()> {
        let graph_file = self.graph_path(100);
        info!("generating: {:?}", graph_file);
        GenGraph::new(table)
            .with_graph_file(&graph_file)
            .generate(source)?;

        let fd = FilterDists::new(locmap);
        let full = GraphFile::read(&graph_file)?;
        for per in self.percentiles.clone() {
            if per < 100 {
                let filtered_file = self.graph_path(per);
                info!("generating: {:?}", filtered_file);
                let max_dist = self.dist(per, mode, infile)?;
                fd.filter_graph(&full, max_dist)?.write(&filtered_file)?;
            }
        }

        info!("done.");
        Ok(())
    }

    /// Writes the edge distance sample the percentile scale is built from.
    pub fn generate_distances<S: EventSource + ?Sized>(
        &self,
        source: &mut S,
        locmap: &LocationMap,
        table: &str,
        outfile: &Path,
        keep_zero: bool,
    ) -> Result<GenStats> {
        info!("generating: {:?}", outfile);
        GenGraph::new(table)
            .with_distance_file(outfile, locmap, keep_zero)?
            .generate(source)
    }

    /// Rewrites every scale's graph in place.
    pub fn normalize(&self) -> Result<()> {
        for &per_dist in &self.percentiles {
            let graph_file = self.graph_path(per_dist);
            normalize_with_confmodel(&graph_file, &graph_file)?;
        }
        Ok(())
    }

    pub fn generate_communities(&self, settings: &CommunitySettings) -> Result<Vec<MetricsRow>> {
        self.generate_communities_with(&Louvain::new(settings.two_level), settings)
    }

    /// Community detection at every scale, summarized in `metrics.csv`.
    pub fn generate_communities_with<D: CommunityDetection>(
        &self,
        detector: &D,
        settings: &CommunitySettings,
    ) -> Result<Vec<MetricsRow>> {
        let mut metrics = RowWriter::create(&self.metrics_path())?;
        let mut rows = Vec::with_capacity(self.percentiles.len());
        for &per_dist in &self.percentiles {
            let comm = Communities::new(&self.graph_path(per_dist))?;
            let comm_file = self.comm_path(per_dist);
            let comm_dir = self.comm_dir(per_dist)?;
            let (modularity, ncomms) = comm.compute_n_times(
                detector,
                &comm_dir,
                &comm_file,
                settings.runs,
                settings.best,
                settings.seed,
            )?;
            let row = MetricsRow {
                per_distance: per_dist,
                modularity,
                ncomms,
            };
            metrics.append(&row)?;
            rows.push(row);
        }
        metrics.finish()?;
        Ok(rows)
    }

    /// One border file per scale, from the best partition or from every run.
    pub fn generate_borders(&self, vor: &Voronoi, best: bool, smooth: bool) -> Result<()> {
        let bord = Borders::new(vor, smooth);
        for &per_dist in &self.percentiles {
            let bord_file = self.bord_path(per_dist);
            if best {
                let comm_file = self.comm_path(per_dist);
                bord.process(BorderSource::Best(&comm_file), &bord_file)?;
            } else {
                let comm_dir = self.comm_dir(per_dist)?;
                bord.process(BorderSource::Runs(&comm_dir), &bord_file)?;
            }
        }
        Ok(())
    }

    /// Distance between each scale's smoothed partition and the `window`
    /// scales before it, averaged. One row per scale from index `window` on.
    pub fn rand_index_seq(&self, vor: &Voronoi, window: usize) -> Result<Vec<(u32, f64)>> {
        let window = window.max(1);

        let mut pars = Vec::with_capacity(self.percentiles.len());
        for &per in &self.percentiles {
            let mut par = Partition::read(&self.comm_path(per), vor)?;
            par.smooth_until_stable();
            pars.push(par);
        }

        let mut rows = Vec::new();
        for i in window..pars.len() {
            let per1 = self.percentiles[i];
            let dist = (0..window)
                .map(|j| pars[i].distance(&pars[i - j - 1]))
                .sum::<f64>()
                / window as f64;
            println!("{},{}", per1, dist);
            rows.push((per1, dist));
        }
        Ok(rows)
    }

    /// A partition metric averaged over every run of each scale, as
    /// `(scale, distance, metric)` rows.
    pub fn metric(
        &mut self,
        metric: PartitionMetric,
        vor: &Voronoi,
        smooth: bool,
        mode: ScaleMode,
        infile: Option<&Path>,
    ) -> Result<Vec<(u32, f64, f64)>> {
        let mut rows = Vec::with_capacity(self.percentiles.len());
        for per in self.percentiles.clone() {
            let files = run_files(&self.comm_dir(per)?)?;
            let mut m = 0.0;
            for file in &files {
                let mut par = Partition::read(file, vor)?;
                if smooth {
                    par.smooth_until_stable();
                }
                m += par.metric(metric);
            }
            m /= files.len() as f64;

            let dist = self.dist(per, mode, infile)?;
            println!("{},{},{}", per, dist, m);
            rows.push((per, dist, m));
        }
        Ok(rows)
    }

    /// The atlas straight from every scale's best partition.
    pub fn generate_multi_borders(&self, vor: &Voronoi, out_file: &Path, smooth: bool) -> Result<()> {
        let files: Vec<(u32, PathBuf)> = self
            .percentiles
            .iter()
            .map(|&per| (per, self.comm_path(per)))
            .collect();
        Borders::new(vor, smooth).process_multi(&files, out_file)?;
        Ok(())
    }

    pub fn crop_borders(&self, region_file: &Path) -> Result<()> {
        for &per_dist in &self.percentiles {
            let bord_file = self.bord_path(per_dist);
            info!("cropping: {:?}", bord_file);
            let mut cropper = CropBorders::new(&bord_file, region_file)?;
            cropper.crop();
            cropper.write(&bord_file)?;
        }
        Ok(())
    }

    pub fn combine_borders(&self, out_file: &Path) -> Result<()> {
        let mut cb = CombineBorders::new();
        for &per_dist in &self.percentiles {
            cb.add_file(&self.bord_path(per_dist), per_dist)?;
        }
        cb.write(out_file)
    }

    pub fn generate_maps<R: MapRenderer + ?Sized>(&self, renderer: &R, region: Region) -> Result<()> {
        for &per_dist in &self.percentiles {
            let bord_file = self.bord_path(per_dist);
            let map_file = self.map_path(per_dist, renderer.extension());
            info!("drawing map: {:?}", map_file);
            renderer.render(&bord_file, &map_file, region)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LocationId;
    use crate::draw_map::SvgMapRenderer;
    use crate::event_source::MemoryEventSource;
    use crate::graph_formats::{AtlasRow, PartitionRow, PercentileRow, read_rows};
    use crate::voronoi::tests::grid;

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(uuid::Uuid::new_v4().to_string())
    }

    /// The 3x3 grid, with users moving inside the left column or inside
    /// the two right columns, plus one user crossing between them.
    fn grid_source() -> MemoryEventSource {
        let mut source = MemoryEventSource::new();
        for (id, (lat, lng)) in grid().sorted() {
            source.add_location(id, lat, lng);
        }
        let groups: [&[LocationId]; 6] = [
            &[1, 4, 7],
            &[1, 4],
            &[4, 7],
            &[2, 3, 5, 6, 8, 9],
            &[2, 5, 8],
            &[3, 6, 9],
        ];
        let mut user = 0;
        for group in groups {
            for _ in 0..3 {
                user += 1;
                for &loc in group {
                    source.add_event("tweet", user, loc);
                }
            }
        }
        source.add_event("tweet", user + 1, 4);
        source.add_event("tweet", user + 1, 5);
        source
    }

    fn write_partition(path: &Path, labels: &[(LocationId, u32)]) {
        let rows: Vec<PartitionRow> = labels
            .iter()
            .map(|&(id, comm)| PartitionRow { id, comm })
            .collect();
        write_rows(path, &rows).unwrap();
    }

    #[test]
    fn test_paths() {
        let dir = scratch_dir();
        let scales = Scales::new(&dir, 4).unwrap();
        assert_eq!(scales.percent_range(), &[25, 50, 75, 100]);
        assert_eq!(scales.graph_path(50), dir.join("graph-d50.csv"));
        assert_eq!(scales.bord_path(100), dir.join("bord-d100.csv"));
        assert_eq!(scales.map_path(25, "pdf"), dir.join("map-d25.pdf"));

        let comm_dir = scales.comm_dir(75).unwrap();
        assert_eq!(comm_dir, dir.join("comm-d75"));
        assert!(comm_dir.is_dir());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_invalid_intervals() {
        assert!(Scales::new(scratch_dir(), 0).is_err());
    }

    #[test]
    fn test_log_scale_needs_no_sample() {
        let dir = scratch_dir();
        let mut scales = Scales::new(&dir, 4).unwrap();
        assert_eq!(scales.dist(50, ScaleMode::Log, None).unwrap(), 25.0);
        assert_eq!(scales.dist(100, ScaleMode::Log, None).unwrap(), 100.0);
        assert!(scales.dist(50, ScaleMode::Percentiles, None).is_err());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_percentile_table_is_loaded_once() {
        let dir = scratch_dir();
        let mut scales = Scales::new(&dir, 4).unwrap();
        let sample = dir.join("dists.csv");
        std::fs::write(&sample, "distance\n4\n1\n3\n2\n5\n").unwrap();

        let d50 = scales.dist(50, ScaleMode::Percentiles, Some(&sample)).unwrap();
        assert_eq!(d50, 3.0);

        // later lookups must not touch the sample again
        std::fs::remove_file(&sample).unwrap();
        assert_eq!(scales.dist(50, ScaleMode::Percentiles, Some(&sample)).unwrap(), d50);
        assert_eq!(scales.dist(100, ScaleMode::Percentiles, Some(&sample)).unwrap(), 5.0);
        assert!(scales.dist(42, ScaleMode::Percentiles, Some(&sample)).is_err());

        let written: Vec<PercentileRow> = read_rows(&scales.percentiles_path()).unwrap();
        assert_eq!(written.len(), 4);
        assert_eq!(written[0].percentile, 25);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_empty_sample_is_an_error() {
        let dir = scratch_dir();
        let mut scales = Scales::new(&dir, 4).unwrap();
        let sample = dir.join("dists.csv");
        std::fs::write(&sample, "distance\n").unwrap();
        assert!(scales.dist(50, ScaleMode::Percentiles, Some(&sample)).is_err());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_rand_index_seq_window_one() {
        let dir = scratch_dir();
        let scales = Scales::new(&dir, 4).unwrap();

        // 6x6 grid split into west and east halves, which smoothing keeps
        let mut locs = Vec::new();
        for row in 0..6 {
            for col in 0..6 {
                let id = (row * 6 + col + 1) as LocationId;
                locs.push((id, 50.0 + row as f64 * 0.1, 4.0 + col as f64 * 0.1));
            }
        }
        let locmap: LocationMap = locs.into_iter().collect();
        let vor = Voronoi::new(&locmap).unwrap();

        let all: Vec<(LocationId, u32)> = (1..=36).map(|id| (id, 0)).collect();
        let halves: Vec<(LocationId, u32)> = (1..=36)
            .map(|id| (id, if (id - 1) % 6 < 3 { 0 } else { 1 }))
            .collect();
        write_partition(&scales.comm_path(25), &halves);
        write_partition(&scales.comm_path(50), &halves);
        write_partition(&scales.comm_path(75), &all);
        write_partition(&scales.comm_path(100), &all);

        let rows = scales.rand_index_seq(&vor, 1).unwrap();
        assert_eq!(
            rows.iter().map(|r| r.0).collect::<Vec<_>>(),
            vec![50, 75, 100]
        );
        assert_eq!(rows[0].1, 0.0);
        // 18 * 18 pairs split across halves, out of 36 * 35 / 2
        assert!((rows[1].1 - 324.0 / 630.0).abs() < 1e-12, "{:?}", rows);
        assert_eq!(rows[2].1, 0.0);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_metric_averages_runs() {
        let dir = scratch_dir();
        let mut scales = Scales::new(&dir, 1).unwrap();
        let vor = Voronoi::new(&grid()).unwrap();

        let runs = scales.comm_dir(100).unwrap();
        write_partition(&runs.join("run-0.csv"), &[(1, 0), (9, 1)]);
        write_partition(&runs.join("run-1.csv"), &[(1, 0)]);

        let rows = scales
            .metric(PartitionMetric::Ncomms, &vor, false, ScaleMode::Log, None)
            .unwrap();
        assert_eq!(rows, vec![(100, 100.0, 1.5)]);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_metric_without_runs_is_an_error() {
        let dir = scratch_dir();
        let mut scales = Scales::new(&dir, 1).unwrap();
        let vor = Voronoi::new(&grid()).unwrap();
        assert!(
            scales
                .metric(PartitionMetric::Giant, &vor, false, ScaleMode::Log, None)
                .is_err()
        );
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_full_pipeline() {
        let dir = scratch_dir();
        let mut scales = Scales::new(&dir, 4).unwrap();
        let mut source = grid_source();
        let locmap = LocationMap::load(&mut source).unwrap();

        let sample = dir.join("dists.csv");
        let stats = scales
            .generate_distances(&mut source, &locmap, "tweet", &sample, true)
            .unwrap();
        assert!(stats.candidate_edges > 0);
        assert_eq!(stats.zero_distances, 0);

        scales
            .generate_graphs(&mut source, &locmap, Some(&sample), ScaleMode::Percentiles, "tweet")
            .unwrap();
        let sizes: Vec<usize> = scales
            .percent_range()
            .iter()
            .map(|&p| GraphFile::read(&scales.graph_path(p)).unwrap().len())
            .collect();
        assert!(sizes.windows(2).all(|w| w[0] <= w[1]), "{:?}", sizes);

        let metrics = scales
            .generate_communities(&CommunitySettings {
                runs: 3,
                best: true,
                ..CommunitySettings::default()
            })
            .unwrap();
        assert_eq!(metrics.len(), 4);
        let written: Vec<MetricsRow> = read_rows(&scales.metrics_path()).unwrap();
        assert_eq!(written, metrics);
        assert_eq!(run_files(&scales.comm_dir(100).unwrap()).unwrap().len(), 3);

        let vor = Voronoi::new(&locmap).unwrap();
        scales.generate_borders(&vor, true, false).unwrap();
        let atlas = dir.join("atlas.csv");
        scales.combine_borders(&atlas).unwrap();
        let multi = dir.join("multi.csv");
        scales.generate_multi_borders(&vor, &multi, false).unwrap();

        let combined: Vec<AtlasRow> = read_rows(&atlas).unwrap();
        let one_pass: Vec<AtlasRow> = read_rows(&multi).unwrap();
        assert_eq!(combined, one_pass);
        assert!(combined.windows(2).all(|w| w[0].scale <= w[1].scale));

        scales.generate_borders(&vor, false, true).unwrap();
        scales
            .generate_maps(&SvgMapRenderer::default(), Region::Belgium)
            .unwrap();
        for &per in scales.percent_range() {
            assert!(scales.map_path(per, "svg").is_file());
        }

        let rows = scales.rand_index_seq(&vor, 1).unwrap();
        assert_eq!(rows.len(), 3);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_zero_distances_are_left_out_of_the_scale() {
        let dir = scratch_dir();
        let mut scales = Scales::new(&dir, 4).unwrap();
        let sample = dir.join("dists.csv");
        std::fs::write(&sample, "distance\n0\n0\n0\n10\n20\n").unwrap();

        assert_eq!(scales.dist(25, ScaleMode::Percentiles, Some(&sample)).unwrap(), 12.5);
        assert_eq!(scales.dist(50, ScaleMode::Percentiles, Some(&sample)).unwrap(), 15.0);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_interrupted_detection_keeps_finished_metrics() {
        let dir = scratch_dir();
        let mut scales = Scales::new(&dir, 4).unwrap();
        let mut source = grid_source();
        let locmap = LocationMap::load(&mut source).unwrap();
        scales
            .generate_graphs(&mut source, &locmap, None, ScaleMode::Log, "tweet")
            .unwrap();
        std::fs::remove_file(scales.graph_path(75)).unwrap();

        assert!(scales.generate_communities(&CommunitySettings::default()).is_err());
        let written: Vec<MetricsRow> = read_rows(&scales.metrics_path()).unwrap();
        assert_eq!(
            written.iter().map(|r| r.per_distance).collect::<Vec<_>>(),
            vec![25, 50]
        );
        assert!(scales.comm_path(50).is_file());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_rerun_communities_drops_stale_runs() {
        let dir = scratch_dir();
        let mut scales = Scales::new(&dir, 1).unwrap();
        let mut source = grid_source();
        let locmap = LocationMap::load(&mut source).unwrap();
        scales
            .generate_graphs(&mut source, &locmap, None, ScaleMode::Log, "tweet")
            .unwrap();

        for runs in [5, 2] {
            scales
                .generate_communities(&CommunitySettings {
                    runs,
                    best: true,
                    ..CommunitySettings::default()
                })
                .unwrap();
            let files = run_files(&scales.comm_dir(100).unwrap()).unwrap();
            assert_eq!(files.len(), runs as usize);
        }

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_normalize_rewrites_every_scale() {
        let dir = scratch_dir();
        let mut scales = Scales::new(&dir, 2).unwrap();
        let mut source = grid_source();
        let locmap = LocationMap::load(&mut source).unwrap();
        scales
            .generate_graphs(&mut source, &locmap, None, ScaleMode::Log, "tweet")
            .unwrap();

        let before = GraphFile::read(&scales.graph_path(100)).unwrap();
        scales.normalize().unwrap();
        let after = GraphFile::read(&scales.graph_path(100)).unwrap();
        assert_eq!(before.len(), after.len());
        assert_ne!(before, after);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
