// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

//! Community detection over a graph artifact.
//!
//! Communities are found by maximising modularity
//!
//! ```text
//! Q = (1/2m) * sum_ij [A_ij - gamma * k_i * k_j / 2m] * delta(c_i, c_j)
//! ```
//!
//! with the Louvain method: greedy local moving in random order, then
//! contraction of every community into one node, repeated until no move
//! improves Q. Runs differ only by the seed of the node order.

use crate::LocationId;
use crate::graph_formats::{GraphFile, PartitionRow, write_rows};
use ahash::AHashMap;
use anyhow::{Context, Result};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

const GAIN_EPSILON: f64 = 1e-12;

/// Undirected weighted graph over dense node indices.
#[derive(Debug, Clone, Default)]
pub struct IndexedGraph {
    /// Location id of each node, ascending.
    pub nodes: Vec<LocationId>,
    adjacency: Vec<Vec<(usize, f64)>>,
    self_loops: Vec<f64>,
    degree: Vec<f64>,
}

impl IndexedGraph {
    pub fn from_file(graph: &GraphFile) -> Self {
        let mut nodes: Vec<LocationId> = graph
            .edges
            .iter()
            .flat_map(|e| [e.orig, e.targ])
            .collect();
        nodes.sort_unstable();
        nodes.dedup();

        let index: AHashMap<LocationId, usize> =
            nodes.iter().enumerate().map(|(i, &id)| (id, i)).collect();

        let mut weights: AHashMap<(usize, usize), f64> = AHashMap::new();
        let mut self_loops = vec![0.0; nodes.len()];
        for edge in &graph.edges {
            let u = index[&edge.orig];
            let v = index[&edge.targ];
            if u == v {
                self_loops[u] += edge.weight;
            } else {
                let key = if u < v { (u, v) } else { (v, u) };
                *weights.entry(key).or_default() += edge.weight;
            }
        }

        Self::from_parts(nodes, weights, self_loops)
    }

    fn from_parts(
        nodes: Vec<LocationId>,
        weights: AHashMap<(usize, usize), f64>,
        self_loops: Vec<f64>,
    ) -> Self {
        let n = self_loops.len();
        let mut adjacency = vec![Vec::new(); n];
        for (&(u, v), &w) in &weights {
            adjacency[u].push((v, w));
            adjacency[v].push((u, w));
        }
        for list in &mut adjacency {
            list.sort_by_key(|&(j, _)| j);
        }

        let degree = (0..n)
            .map(|i| adjacency[i].iter().map(|&(_, w)| w).sum::<f64>() + 2.0 * self_loops[i])
            .collect();

        Self {
            nodes,
            adjacency,
            self_loops,
            degree,
        }
    }

    pub fn len(&self) -> usize {
        self.self_loops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.self_loops.is_empty()
    }

    /// Twice the total edge weight.
    fn two_m(&self) -> f64 {
        self.degree.iter().sum()
    }
}

/// Modularity of `labels` (one per node) at resolution `gamma`.
pub fn modularity(graph: &IndexedGraph, labels: &[usize], gamma: f64) -> f64 {
    let two_m = graph.two_m();
    if two_m <= 0.0 {
        return 0.0;
    }

    let ncomms = labels.iter().copied().max().map_or(0, |m| m + 1);
    let mut inner = vec![0.0; ncomms];
    let mut total = vec![0.0; ncomms];
    for i in 0..graph.len() {
        let c = labels[i];
        total[c] += graph.degree[i];
        inner[c] += 2.0 * graph.self_loops[i];
        for &(j, w) in &graph.adjacency[i] {
            if labels[j] == c {
                inner[c] += w;
            }
        }
    }

    (0..ncomms)
        .map(|c| inner[c] / two_m - gamma * (total[c] / two_m).powi(2))
        .sum()
}

/// Relabels to 0..n in order of first appearance.
fn compact(labels: &mut [usize]) -> usize {
    let mut mapping: AHashMap<usize, usize> = AHashMap::new();
    for label in labels.iter_mut() {
        let next = mapping.len();
        *label = *mapping.entry(*label).or_insert(next);
    }
    mapping.len()
}

pub trait CommunityDetection {
    /// One community label per node of `graph`, compacted to 0..n.
    fn detect(&self, graph: &IndexedGraph, rng: &mut StdRng) -> Vec<usize>;
}

#[derive(Debug, Clone, Copy)]
pub struct Louvain {
    /// Stop after the first local-moving pass instead of contracting.
    pub two_level: bool,
    pub resolution: f64,
}

impl Default for Louvain {
    fn default() -> Self {
        Self {
            two_level: false,
            resolution: 1.0,
        }
    }
}

impl Louvain {
    pub fn new(two_level: bool) -> Self {
        Self {
            two_level,
            ..Self::default()
        }
    }

    /// Moves nodes between communities until no single move helps.
    /// Returns the labels and whether anything moved.
    fn local_moving(&self, graph: &IndexedGraph, rng: &mut StdRng) -> (Vec<usize>, bool) {
        let n = graph.len();
        let two_m = graph.two_m();
        let mut labels: Vec<usize> = (0..n).collect();
        if two_m <= 0.0 {
            return (labels, false);
        }

        let mut total = graph.degree.clone();
        let mut order: Vec<usize> = (0..n).collect();
        order.shuffle(rng);

        let mut neighbour_weight = vec![0.0; n];
        let mut neighbour_comms: Vec<usize> = Vec::new();
        let mut moved_any = false;

        loop {
            let mut moved = false;
            for &i in &order {
                let current = labels[i];
                let k_i = graph.degree[i];

                for &(j, w) in &graph.adjacency[i] {
                    let c = labels[j];
                    if neighbour_weight[c] == 0.0 {
                        neighbour_comms.push(c);
                    }
                    neighbour_weight[c] += w;
                }

                total[current] -= k_i;
                let scale = self.resolution * k_i / two_m;
                let mut best = current;
                let mut best_gain = neighbour_weight[current] - scale * total[current];
                for &c in &neighbour_comms {
                    let gain = neighbour_weight[c] - scale * total[c];
                    if gain > best_gain + GAIN_EPSILON {
                        best = c;
                        best_gain = gain;
                    }
                }
                total[best] += k_i;
                labels[i] = best;

                if best != current {
                    moved = true;
                    moved_any = true;
                }

                for &c in &neighbour_comms {
                    neighbour_weight[c] = 0.0;
                }
                neighbour_comms.clear();
            }
            if !moved {
                break;
            }
        }

        (labels, moved_any)
    }
}

/// Contracts every community of `labels` (compacted) into one node.
fn aggregate(graph: &IndexedGraph, labels: &[usize], ncomms: usize) -> IndexedGraph {
    let mut weights: AHashMap<(usize, usize), f64> = AHashMap::new();
    let mut self_loops = vec![0.0; ncomms];

    for i in 0..graph.len() {
        let ci = labels[i];
        self_loops[ci] += graph.self_loops[i];
        for &(j, w) in &graph.adjacency[i] {
            // every undirected edge shows up from both ends
            if j < i {
                continue;
            }
            let cj = labels[j];
            if ci == cj {
                self_loops[ci] += w;
            } else {
                let key = if ci < cj { (ci, cj) } else { (cj, ci) };
                *weights.entry(key).or_default() += w;
            }
        }
    }

    IndexedGraph::from_parts(Vec::new(), weights, self_loops)
}

impl CommunityDetection for Louvain {
    fn detect(&self, graph: &IndexedGraph, rng: &mut StdRng) -> Vec<usize> {
        let mut membership: Vec<usize> = (0..graph.len()).collect();
        let mut level_graph = graph.clone();
        let mut level = 0;

        loop {
            let (mut labels, moved) = self.local_moving(&level_graph, rng);
            if !moved {
                break;
            }
            let ncomms = compact(&mut labels);
            for m in membership.iter_mut() {
                *m = labels[*m];
            }
            level += 1;
            debug!("louvain level {}: {} communities", level, ncomms);

            if self.two_level || ncomms == level_graph.len() {
                break;
            }
            level_graph = aggregate(&level_graph, &labels, ncomms);
        }

        compact(&mut membership);
        membership
    }
}

/// Community detection driver for one graph artifact.
pub struct Communities {
    graph: IndexedGraph,
}

impl Communities {
    pub fn new(graph_file: &Path) -> Result<Self> {
        let graph = GraphFile::read(graph_file)?;
        Ok(Self {
            graph: IndexedGraph::from_file(&graph),
        })
    }

    pub fn from_graph(graph: &GraphFile) -> Self {
        Self {
            graph: IndexedGraph::from_file(graph),
        }
    }

    /// One run: labels with their modularity.
    pub fn compute<D: CommunityDetection>(&self, detector: &D, seed: u64) -> (Vec<usize>, f64) {
        let mut rng = StdRng::seed_from_u64(seed);
        let labels = detector.detect(&self.graph, &mut rng);
        let q = modularity(&self.graph, &labels, 1.0);
        (labels, q)
    }

    pub fn write(&self, labels: &[usize], path: &Path) -> Result<()> {
        let rows: Vec<PartitionRow> = self
            .graph
            .nodes
            .iter()
            .zip(labels)
            .map(|(&id, &comm)| PartitionRow {
                id,
                comm: comm as u32,
            })
            .collect();
        write_rows(path, &rows)
    }

    /// Runs detection and persists the result.
    ///
    /// With `best`, `runs` seeded runs are written to `comm_dir/run-{i}.csv`
    /// and the highest-modularity one also to `comm_file`. Without it a
    /// single run goes to both places. Returns (modularity, ncomms) of the
    /// run kept in `comm_file`.
    pub fn compute_n_times<D: CommunityDetection>(
        &self,
        detector: &D,
        comm_dir: &Path,
        comm_file: &Path,
        runs: u32,
        best: bool,
        seed: u64,
    ) -> Result<(f64, usize)> {
        fs::create_dir_all(comm_dir)
            .with_context(|| format!("Failed to create community dir {:?}", comm_dir))?;
        clear_runs(comm_dir)?;

        let runs = if best { runs.max(1) } else { 1 };
        let mut kept: Option<(Vec<usize>, f64)> = None;

        for run in 0..runs {
            let (labels, q) = self.compute(detector, seed.wrapping_add(run as u64));
            self.write(&labels, &comm_dir.join(format!("run-{}.csv", run)))?;
            debug!("run {}: modularity {:.6}", run, q);

            let better = kept.as_ref().is_none_or(|(_, best_q)| q > *best_q);
            if better {
                kept = Some((labels, q));
            }
        }

        let (labels, q) = kept.unwrap_or_default();
        self.write(&labels, comm_file)?;

        let ncomms = labels.iter().copied().max().map_or(0, |m| m + 1);
        info!(
            "{:?}: modularity {:.6}, {} communities",
            comm_file, q, ncomms
        );
        Ok((q, ncomms))
    }
}

/// Removes the partitions an earlier detection left in `comm_dir`.
fn clear_runs(comm_dir: &Path) -> Result<()> {
    for entry in fs::read_dir(comm_dir).with_context(|| format!("Failed to read {:?}", comm_dir))? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "csv") {
            debug!("removing stale run {:?}", path);
            fs::remove_file(&path).with_context(|| format!("Failed to remove {:?}", path))?;
        }
    }
    Ok(())
}
