// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

//! Builds the co-location graph: every pair of distinct locations a user
//! posted from is an edge, weighted by the number of such users.

use crate::event_source::{DEFAULT_PAGE_SIZE, EventSource, PageCursor};
use crate::geo_utils;
use crate::graph_formats::{DistanceRow, EdgeRow, Header, write_rows};
use crate::locmap::LocationMap;
use crate::{LocationId, UserId};
use ahash::AHashMap;
use anyhow::{Context, Result};
use csv::WriterBuilder;
use itertools::Itertools;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Orders an undirected pair so `(a, b)` and `(b, a)` share one key.
#[inline]
pub fn canonical(a: LocationId, b: LocationId) -> (LocationId, LocationId) {
    if a <= b { (a, b) } else { (b, a) }
}

/// Undirected co-location graph keyed by canonical pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoLocationGraph {
    weights: AHashMap<(LocationId, LocationId), u64>,
}

impl CoLocationGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, a: LocationId, b: LocationId) {
        *self.weights.entry(canonical(a, b)).or_default() += 1;
    }

    /// Weight of the edge between `a` and `b`, in either order.
    pub fn weight(&self, a: LocationId, b: LocationId) -> Option<u64> {
        self.weights.get(&canonical(a, b)).copied()
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = ((LocationId, LocationId), u64)> + '_ {
        self.weights.iter().map(|(&k, &w)| (k, w))
    }

    /// Sorted by pair so the artifact is stable between runs.
    pub fn write(&self, path: &Path) -> Result<()> {
        let mut rows: Vec<EdgeRow<u64>> = self
            .weights
            .iter()
            .map(|(&(orig, targ), &weight)| EdgeRow { orig, targ, weight })
            .collect();
        rows.sort_by_key(|r| (r.orig, r.targ));
        write_rows(path, &rows)
    }
}

struct DistanceSink<'a> {
    locmap: &'a LocationMap,
    writer: csv::Writer<BufWriter<File>>,
    keep_zero: bool,
}

/// Counters reported at the end of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GenStats {
    pub users: u64,
    pub candidate_edges: u64,
    pub zero_distances: u64,
}

pub struct GenGraph<'a> {
    table: String,
    page_size: u64,
    graph_file: Option<PathBuf>,
    graph: Option<CoLocationGraph>,
    dist: Option<DistanceSink<'a>>,
    stats: GenStats,
}

impl<'a> GenGraph<'a> {
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            graph_file: None,
            graph: None,
            dist: None,
            stats: GenStats::default(),
        }
    }

    pub fn with_page_size(mut self, page_size: u64) -> Self {
        self.page_size = page_size;
        self
    }

    /// Accumulate edge weights, and write them to `graph_file` when done.
    pub fn with_graph_file(mut self, graph_file: &Path) -> Self {
        self.graph_file = Some(graph_file.to_path_buf());
        self.graph = Some(CoLocationGraph::new());
        self
    }

    /// Accumulate edge weights without writing them anywhere.
    pub fn with_graph(mut self) -> Self {
        self.graph = Some(CoLocationGraph::new());
        self
    }

    /// Stream the geographic length of every candidate edge to `dist_file`.
    ///
    /// Zero-length edges are always reported; `keep_zero` decides whether
    /// they are written as well.
    pub fn with_distance_file(
        mut self,
        dist_file: &Path,
        locmap: &'a LocationMap,
        keep_zero: bool,
    ) -> Result<Self> {
        let file = File::create(dist_file)
            .with_context(|| format!("Failed to create distance file {:?}", dist_file))?;
        let mut writer = WriterBuilder::new()
            .has_headers(false)
            .from_writer(BufWriter::new(file));
        writer.write_record(DistanceRow::COLUMNS)?;

        self.dist = Some(DistanceSink {
            locmap,
            writer,
            keep_zero,
        });
        Ok(self)
    }

    pub fn graph(&self) -> Option<&CoLocationGraph> {
        self.graph.as_ref()
    }

    pub fn into_graph(self) -> Option<CoLocationGraph> {
        self.graph
    }

    pub fn stats(&self) -> GenStats {
        self.stats
    }

    fn process_link(&mut self, a: LocationId, b: LocationId) -> Result<()> {
        let (v1, v2) = canonical(a, b);
        self.stats.candidate_edges += 1;

        if let Some(graph) = self.graph.as_mut() {
            graph.add(v1, v2);
        }

        if let Some(sink) = self.dist.as_mut() {
            let loc1 = sink.locmap.coords(v1)?;
            let loc2 = sink.locmap.coords(v2)?;
            let distance = geo_utils::distance(loc1, loc2);
            if distance > 0.0 {
                sink.writer.serialize(DistanceRow { distance })?;
            } else {
                self.stats.zero_distances += 1;
                warn!(
                    "zero distance found between {} {:?} and {} {:?}",
                    v1, loc1, v2, loc2
                );
                if sink.keep_zero {
                    sink.writer.serialize(DistanceRow { distance })?;
                }
            }
        }

        Ok(())
    }

    fn process_user<S: EventSource + ?Sized>(&mut self, source: &mut S, user: UserId) -> Result<()> {
        // repeat visits to one place count once
        let locations: BTreeSet<LocationId> = source
            .user_locations(user, &self.table)?
            .into_iter()
            .collect();

        for (a, b) in locations.iter().copied().tuple_combinations() {
            self.process_link(a, b)?;
        }
        self.stats.users += 1;
        Ok(())
    }

    pub fn generate<S: EventSource + ?Sized>(&mut self, source: &mut S) -> Result<GenStats> {
        if self.graph.is_some() {
            info!("generating graph.");
        }
        if self.dist.is_some() {
            info!("generating link distance distribution.");
        }
        info!("using table: {}", self.table);

        let nusers = source.user_count()?;
        info!("{} users to process", nusers);

        let mut cursor = PageCursor::new(self.page_size);
        while let Some(users) = cursor.next_page(source)? {
            for user in users {
                self.process_user(source, user)?;
            }
            let n = cursor.offset();
            let percent = if nusers > 0 {
                (n as f64 / nusers as f64) * 100.0
            } else {
                100.0
            };
            info!("{}/{} ({:.1}%) processed", n, nusers, percent);
        }

        if let (Some(graph), Some(path)) = (self.graph.as_ref(), self.graph_file.as_ref()) {
            graph.write(path)?;
            info!("wrote {} edges to {:?}", graph.len(), path);
        }
        if let Some(sink) = self.dist.as_mut() {
            sink.writer.flush()?;
        }
        if self.stats.zero_distances > 0 {
            warn!("{} zero-distance links found", self.stats.zero_distances);
        }

        info!("done.");
        Ok(self.stats)
    }
}
