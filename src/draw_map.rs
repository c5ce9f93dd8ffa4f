// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

use crate::graph_formats::{SegmentRow, read_rows};
use crate::regions::Region;
use anyhow::{Context, Result};
use std::fmt::Write as _;
use std::path::Path;

/// Draws one border file onto a map of a region.
pub trait MapRenderer {
    /// File extension of the maps this renderer produces.
    fn extension(&self) -> &str;

    fn render(&self, border_file: &Path, map_file: &Path, region: Region) -> Result<()>;
}

/// Equirectangular SVG. Each segment is a line whose opacity is its weight.
/// Segments with no end inside the region's bounding box are left out.
#[derive(Debug, Clone)]
pub struct SvgMapRenderer {
    pub width: f64,
    pub stroke_width: f64,
    pub color: String,
}

impl Default for SvgMapRenderer {
    fn default() -> Self {
        Self {
            width: 1000.0,
            stroke_width: 1.5,
            color: "#b2182b".to_string(),
        }
    }
}

impl SvgMapRenderer {
    pub fn svg(&self, segments: &[SegmentRow], region: Region) -> String {
        let config = region.config();
        let (min_lat, min_lng, max_lat, _) = config.bbox;

        // shrink longitude by the cosine of the mid latitude
        let mid_lat = ((min_lat + max_lat) / 2.0).to_radians();
        let aspect = config.height() / (config.width() * mid_lat.cos());
        let width = self.width;
        let height = (width * aspect).round();

        let x = |lng: f64| (lng - min_lng) / config.width() * width;
        let y = |lat: f64| (max_lat - lat) / config.height() * height;

        let mut lines = String::new();
        for s in segments {
            if !config.contains_point(s.x1, s.y1) && !config.contains_point(s.x2, s.y2) {
                continue;
            }
            let _ = writeln!(
                lines,
                r#"  <line x1="{:.2}" y1="{:.2}" x2="{:.2}" y2="{:.2}" stroke-opacity="{:.3}"/>"#,
                x(s.x1),
                y(s.y1),
                x(s.x2),
                y(s.y2),
                s.weight.clamp(0.0, 1.0)
            );
        }

        format!(
            r##"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">
<title>{name}</title>
<rect width="{w}" height="{h}" fill="white"/>
<g stroke="{color}" stroke-width="{sw}" stroke-linecap="round">
{lines}</g>
</svg>
"##,
            w = width,
            h = height,
            name = config.name,
            color = self.color,
            sw = self.stroke_width,
            lines = lines
        )
    }
}

impl MapRenderer for SvgMapRenderer {
    fn extension(&self) -> &str {
        "svg"
    }

    fn render(&self, border_file: &Path, map_file: &Path, region: Region) -> Result<()> {
        let segments: Vec<SegmentRow> = read_rows(border_file)?;
        std::fs::write(map_file, self.svg(&segments, region))
            .with_context(|| format!("Failed to write map {:?}", map_file))
    }
}
