// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

//! Spatial structure over every known location.
//!
//! Locations sharing a coordinate collapse into one site. Sites are
//! triangulated in the (lng, lat) plane; Delaunay neighbours of a site are
//! exactly the sites whose Voronoi cells touch it, and each finite Voronoi
//! edge runs between the circumcentres of the two triangles on either side
//! of the Delaunay edge.

use crate::LocationId;
use crate::errors::ConfigError;
use crate::locmap::LocationMap;
use ahash::AHashMap;
use anyhow::{Context, Result};
use rstar::RTree;
use rstar::primitives::GeomWithData;
use spade::{DelaunayTriangulation, HasPosition, Point2, Triangulation};
use tracing::info;

struct Site {
    position: Point2<f64>,
    index: usize,
}

impl HasPosition for Site {
    type Scalar = f64;

    fn position(&self) -> Point2<f64> {
        self.position
    }
}

/// The boundary between the cells of two neighbouring sites.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellEdge {
    pub site_a: usize,
    pub site_b: usize,
    /// (lng, lat)
    pub from: [f64; 2],
    pub to: [f64; 2],
}

pub struct Voronoi {
    ids: Vec<LocationId>,
    index: AHashMap<LocationId, usize>,
    positions: Vec<[f64; 2]>,
    site_of: Vec<usize>,
    members: Vec<Vec<usize>>,
    site_neighbours: Vec<Vec<usize>>,
    edges: Vec<CellEdge>,
}

impl Voronoi {
    pub fn new(locmap: &LocationMap) -> Result<Self> {
        let sorted = locmap.sorted();
        let ids: Vec<LocationId> = sorted.iter().map(|(id, _)| *id).collect();
        let positions: Vec<[f64; 2]> = sorted
            .iter()
            .map(|(_, (lat, lng))| [*lng, *lat])
            .collect();
        let index = ids.iter().enumerate().map(|(i, &id)| (id, i)).collect();

        // one site per distinct coordinate
        let mut site_by_position: AHashMap<(u64, u64), usize> = AHashMap::new();
        let mut site_of = Vec::with_capacity(ids.len());
        let mut members: Vec<Vec<usize>> = Vec::new();
        for (i, p) in positions.iter().enumerate() {
            let key = (p[0].to_bits(), p[1].to_bits());
            let site = *site_by_position.entry(key).or_insert_with(|| {
                members.push(Vec::new());
                members.len() - 1
            });
            members[site].push(i);
            site_of.push(site);
        }

        let mut triangulation: DelaunayTriangulation<Site> = DelaunayTriangulation::new();
        for (site, locs) in members.iter().enumerate() {
            let p = positions[locs[0]];
            triangulation
                .insert(Site {
                    position: Point2::new(p[0], p[1]),
                    index: site,
                })
                .with_context(|| format!("Failed to triangulate location {}", ids[locs[0]]))?;
        }

        let mut site_neighbours = vec![Vec::new(); members.len()];
        let mut edges = Vec::new();
        for edge in triangulation.undirected_edges() {
            let [a, b] = edge.vertices();
            let (site_a, site_b) = (a.data().index, b.data().index);
            site_neighbours[site_a].push(site_b);
            site_neighbours[site_b].push(site_a);

            // hull edges border the unbounded outer face and have no finite cell edge
            let directed = edge.as_directed();
            if let (Some(left), Some(right)) =
                (directed.face().as_inner(), directed.rev().face().as_inner())
            {
                let from = left.circumcenter();
                let to = right.circumcenter();
                edges.push(CellEdge {
                    site_a: site_a.min(site_b),
                    site_b: site_a.max(site_b),
                    from: [from.x, from.y],
                    to: [to.x, to.y],
                });
            }
        }
        for list in &mut site_neighbours {
            list.sort_unstable();
            list.dedup();
        }

        info!(
            "voronoi: {} locations, {} sites, {} cell edges",
            ids.len(),
            members.len(),
            edges.len()
        );

        Ok(Self {
            ids,
            index,
            positions,
            site_of,
            members,
            site_neighbours,
            edges,
        })
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Location ids, ascending; position `i` is location index `i`.
    pub fn ids(&self) -> &[LocationId] {
        &self.ids
    }

    pub fn index_of(&self, id: LocationId) -> Option<usize> {
        self.index.get(&id).copied()
    }

    pub fn site_of(&self, location: usize) -> usize {
        self.site_of[location]
    }

    /// Location indices sharing site `site`, ascending.
    pub fn members(&self, site: usize) -> &[usize] {
        &self.members[site]
    }

    pub fn num_sites(&self) -> usize {
        self.members.len()
    }

    pub fn cell_edges(&self) -> &[CellEdge] {
        &self.edges
    }

    /// Locations whose cells touch the cell of `location`, including the
    /// other locations at the same coordinate. Symmetric.
    pub fn neighbours(&self, location: usize) -> impl Iterator<Item = usize> + '_ {
        let site = self.site_of[location];
        let same_site = self.members[site]
            .iter()
            .copied()
            .filter(move |&j| j != location);
        let adjacent = self.site_neighbours[site]
            .iter()
            .flat_map(move |&s| self.members[s].iter().copied());
        same_site.chain(adjacent)
    }

    /// Labels every location with the label of its nearest seed. Seeds keep
    /// their own label. Returns an empty vector when there are no seeds.
    pub fn assign(&self, seeds: &[(LocationId, u32)]) -> Result<Vec<u32>, ConfigError> {
        if seeds.is_empty() {
            return Ok(Vec::new());
        }

        let mut labels: Vec<Option<u32>> = vec![None; self.len()];
        let mut items = Vec::with_capacity(seeds.len());
        for &(id, label) in seeds {
            let i = self
                .index_of(id)
                .ok_or(ConfigError::MissingCoordinates(id))?;
            labels[i] = Some(label);
            items.push(GeomWithData::new(self.positions[i], label));
        }
        let tree = RTree::bulk_load(items);

        Ok(labels
            .into_iter()
            .enumerate()
            .map(|(i, label)| {
                label.unwrap_or_else(|| {
                    tree.nearest_neighbor(&self.positions[i])
                        .map(|seed| seed.data)
                        .unwrap_or_default()
                })
            })
            .collect())
    }
}
