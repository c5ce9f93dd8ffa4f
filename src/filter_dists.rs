// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

use crate::geo_utils;
use crate::graph_formats::GraphFile;
use crate::locmap::LocationMap;
use anyhow::Result;
use std::path::Path;
use tracing::info;

/// Projects a graph artifact onto the edges no longer than a distance.
pub struct FilterDists<'a> {
    locmap: &'a LocationMap,
}

impl<'a> FilterDists<'a> {
    pub fn new(locmap: &'a LocationMap) -> Self {
        Self { locmap }
    }

    /// Edges of `graph` whose endpoints are at most `max_dist` km apart.
    pub fn filter_graph(&self, graph: &GraphFile, max_dist: f64) -> Result<GraphFile> {
        let mut edges = Vec::with_capacity(graph.len());
        for edge in &graph.edges {
            let orig = self.locmap.coords(edge.orig)?;
            let targ = self.locmap.coords(edge.targ)?;
            if geo_utils::distance(orig, targ) <= max_dist {
                edges.push(*edge);
            }
        }
        Ok(GraphFile { edges })
    }

    pub fn filter(&self, infile: &Path, outfile: &Path, max_dist: f64) -> Result<()> {
        let graph = GraphFile::read(infile)?;
        let filtered = self.filter_graph(&graph, max_dist)?;
        info!(
            "kept {}/{} edges at max distance {:.3} km",
            filtered.len(),
            graph.len(),
            max_dist
        );
        filtered.write(outfile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph_formats::EdgeRow;

    fn locmap() -> LocationMap {
        // 1 and 2 are ~11 km apart, 3 is ~111 km from 1
        vec![(1, 50.0, 4.0), (2, 50.1, 4.0), (3, 51.0, 4.0)]
            .into_iter()
            .collect()
    }

    fn graph() -> GraphFile {
        GraphFile {
            edges: vec![
                EdgeRow { orig: 1, targ: 2, weight: 3.0 },
                EdgeRow { orig: 1, targ: 3, weight: 1.0 },
                EdgeRow { orig: 2, targ: 3, weight: 2.0 },
            ],
        }
    }

    #[test]
    fn test_keeps_short_edges() {
        let locmap = locmap();
        let fd = FilterDists::new(&locmap);
        let out = fd.filter_graph(&graph(), 50.0).unwrap();
        assert_eq!(out.edges, vec![EdgeRow { orig: 1, targ: 2, weight: 3.0 }]);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let locmap = locmap();
        let fd = FilterDists::new(&locmap);
        let exact = geo_utils::distance((50.0, 4.0), (50.1, 4.0));
        let out = fd.filter_graph(&graph(), exact).unwrap();
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_large_threshold_keeps_everything() {
        let locmap = locmap();
        let fd = FilterDists::new(&locmap);
        assert_eq!(fd.filter_graph(&graph(), 1e6).unwrap(), graph());
    }

    #[test]
    fn test_unknown_location_fails() {
        let locmap: LocationMap = vec![(1, 50.0, 4.0)].into_iter().collect();
        let fd = FilterDists::new(&locmap);
        assert!(fd.filter_graph(&graph(), 10.0).is_err());
    }
}
