// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

use crate::graph_formats::{AtlasRow, SegmentRow, read_rows, write_rows};
use anyhow::{Context, Result};
use geojson::{Feature, FeatureCollection, Geometry, JsonObject, Value};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::info;

/// The multi-scale border atlas, built one scale at a time in ascending order.
#[derive(Debug, Clone, Default)]
pub struct CombineBorders {
    rows: Vec<AtlasRow>,
}

impl CombineBorders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_segments(&mut self, segments: &[SegmentRow], scale: u32) {
        self.rows.extend(segments.iter().map(|s| AtlasRow {
            x1: s.x1,
            y1: s.y1,
            x2: s.x2,
            y2: s.y2,
            weight: s.weight,
            scale,
        }));
    }

    pub fn add_file(&mut self, border_file: &Path, scale: u32) -> Result<usize> {
        let segments: Vec<SegmentRow> = read_rows(border_file)?;
        self.add_segments(&segments, scale);
        Ok(segments.len())
    }

    pub fn rows(&self) -> &[AtlasRow] {
        &self.rows
    }

    /// CSV unless `out` ends in `.geojson`.
    pub fn write(&self, out: &Path) -> Result<()> {
        let is_geojson = out
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("geojson"));

        if is_geojson {
            self.write_geojson(out)?;
        } else {
            write_rows(out, &self.rows)?;
        }
        info!("atlas: {} segments written to {:?}", self.rows.len(), out);
        Ok(())
    }

    fn write_geojson(&self, out: &Path) -> Result<()> {
        let features = self
            .rows
            .iter()
            .map(|row| {
                let mut properties = JsonObject::new();
                properties.insert("weight".to_string(), row.weight.into());
                properties.insert("scale".to_string(), row.scale.into());

                Feature {
                    bbox: None,
                    geometry: Some(Geometry::new(Value::LineString(vec![
                        vec![row.x1, row.y1],
                        vec![row.x2, row.y2],
                    ]))),
                    id: None,
                    properties: Some(properties),
                    foreign_members: None,
                }
            })
            .collect();

        let geojson = geojson::GeoJson::FeatureCollection(FeatureCollection {
            bbox: None,
            features,
            foreign_members: None,
        });

        let file = File::create(out).with_context(|| format!("Failed to create {:?}", out))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, &geojson)
            .with_context(|| format!("Failed to write {:?}", out))?;
        writer
            .flush()
            .with_context(|| format!("Failed to flush {:?}", out))?;
        Ok(())
    }
}
