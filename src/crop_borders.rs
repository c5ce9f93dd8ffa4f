// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

use crate::graph_formats::{SegmentRow, read_rows, write_rows};
use anyhow::{Context, Result};
use geo::BooleanOps;
use geo_types::{
    Geometry, GeometryCollection, LineString, MultiLineString, MultiPolygon, Polygon,
};
use geojson::GeoJson;
use std::path::Path;
use tracing::{info, warn};

/// Reads every Polygon and MultiPolygon of a GeoJSON document into one
/// region. Other geometry kinds are ignored.
pub fn read_region(region_file: &Path) -> Result<MultiPolygon<f64>> {
    let text = std::fs::read_to_string(region_file)
        .with_context(|| format!("Failed to read region {:?}", region_file))?;
    let geojson: GeoJson = text
        .parse()
        .with_context(|| format!("Invalid GeoJSON in {:?}", region_file))?;
    let collection = GeometryCollection::<f64>::try_from(&geojson)
        .with_context(|| format!("Unsupported geometry in {:?}", region_file))?;

    let mut polygons = Vec::new();
    for geometry in collection {
        collect_polygons(geometry, &mut polygons);
    }
    if polygons.is_empty() {
        warn!("{:?} has no polygons, everything will be cropped", region_file);
    }
    Ok(MultiPolygon::new(polygons))
}

fn collect_polygons(geometry: Geometry<f64>, out: &mut Vec<Polygon<f64>>) {
    match geometry {
        Geometry::Polygon(p) => out.push(p),
        Geometry::MultiPolygon(mp) => out.extend(mp),
        Geometry::GeometryCollection(gc) => {
            for g in gc {
                collect_polygons(g, out);
            }
        }
        _ => {}
    }
}

pub struct CropBorders {
    segments: Vec<SegmentRow>,
    region: MultiPolygon<f64>,
}

impl CropBorders {
    pub fn new(border_file: &Path, region_file: &Path) -> Result<Self> {
        Ok(Self {
            segments: read_rows(border_file)?,
            region: read_region(region_file)?,
        })
    }

    pub fn from_parts(segments: Vec<SegmentRow>, region: MultiPolygon<f64>) -> Self {
        Self { segments, region }
    }

    pub fn segments(&self) -> &[SegmentRow] {
        &self.segments
    }

    /// Keeps the parts of each segment inside the region. Pieces inherit
    /// the weight of the segment they were cut from.
    pub fn crop(&mut self) -> usize {
        let before = self.segments.len();
        let mut cropped = Vec::with_capacity(before);

        for segment in &self.segments {
            let line = MultiLineString::new(vec![LineString::from(vec![
                (segment.x1, segment.y1),
                (segment.x2, segment.y2),
            ])]);
            for piece in self.region.clip(&line, false) {
                for part in piece.lines() {
                    if part.start == part.end {
                        continue;
                    }
                    cropped.push(SegmentRow {
                        x1: part.start.x,
                        y1: part.start.y,
                        x2: part.end.x,
                        y2: part.end.y,
                        weight: segment.weight,
                    });
                }
            }
        }

        info!("crop: {} segments in, {} out", before, cropped.len());
        self.segments = cropped;
        self.segments.len()
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        write_rows(path, &self.segments)
    }
}
