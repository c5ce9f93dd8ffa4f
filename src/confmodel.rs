// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

//! Configuration-model normalization: each edge weight is divided by the
//! weight expected between its endpoints in a degree-preserving random graph.

use crate::LocationId;
use crate::graph_formats::{EdgeRow, GraphFile};
use ahash::AHashMap;
use anyhow::Result;
use std::path::Path;
use tracing::info;

pub fn normalize_graph(graph: &GraphFile) -> GraphFile {
    let mut degree: AHashMap<LocationId, f64> = AHashMap::new();
    let mut total = 0.0;
    for edge in &graph.edges {
        *degree.entry(edge.orig).or_default() += edge.weight;
        *degree.entry(edge.targ).or_default() += edge.weight;
        total += edge.weight;
    }

    if total <= 0.0 {
        return graph.clone();
    }

    let two_m = 2.0 * total;
    let edges = graph
        .edges
        .iter()
        .map(|edge| {
            let expected = degree[&edge.orig] * degree[&edge.targ] / two_m;
            EdgeRow {
                orig: edge.orig,
                targ: edge.targ,
                weight: if expected > 0.0 {
                    edge.weight / expected
                } else {
                    edge.weight
                },
            }
        })
        .collect();

    GraphFile { edges }
}

/// `infile` is read completely before `outfile` is opened, so both may name
/// the same file.
pub fn normalize_with_confmodel(infile: &Path, outfile: &Path) -> Result<()> {
    let graph = GraphFile::read(infile)?;
    let normalized = normalize_graph(&graph);
    info!("normalized {} edges of {:?}", normalized.len(), infile);
    normalized.write(outfile)
}
