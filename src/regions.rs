// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

// Study regions the pipeline has been run on. The bounding box frames the
// rendered maps.

use crate::errors::ConfigError;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Region {
    Israel,
    Belgium,
    /// Belgium with its neighbours
    Belgium2,
    Poland,
    Portugal,
    Romania,
    Ukraine,
    Berlin,
}

impl Region {
    pub const ALL: &'static [Region] = &[
        Region::Israel,
        Region::Belgium,
        Region::Belgium2,
        Region::Poland,
        Region::Portugal,
        Region::Romania,
        Region::Ukraine,
        Region::Berlin,
    ];

    pub fn config(&self) -> RegionConfig {
        match self {
            Region::Israel => RegionConfig {
                name: "israel",
                bbox: (29.340105, 33.736538, 33.446167, 36.098598),
            },
            Region::Belgium => RegionConfig {
                name: "belgium",
                bbox: (49.4, 2.420480, 51.726419, 6.589545),
            },
            Region::Belgium2 => RegionConfig {
                name: "belgium2",
                bbox: (48.5, 1.51, 53.0, 8.5),
            },
            Region::Poland => RegionConfig {
                name: "poland",
                bbox: (48.54, 13.95, 55.20, 24.94),
            },
            Region::Portugal => RegionConfig {
                name: "portugal",
                bbox: (36.76, -9.93, 42.21, -5.64),
            },
            Region::Romania => RegionConfig {
                name: "romania",
                bbox: (43.45, 20.10, 48.72, 30.62),
            },
            Region::Ukraine => RegionConfig {
                name: "ukraine",
                bbox: (44.00, 21.00, 53.00, 42.00),
            },
            Region::Berlin => RegionConfig {
                name: "berlin",
                bbox: (52.31, 13.05, 52.69, 13.77),
            },
        }
    }
}

impl FromStr for Region {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_lowercase();
        Region::ALL
            .iter()
            .copied()
            .find(|r| r.config().name == lower)
            .ok_or_else(|| ConfigError::UnknownRegion(s.to_string()))
    }
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.config().name)
    }
}

#[derive(Debug, Clone)]
pub struct RegionConfig {
    pub name: &'static str,
    /// (min_lat, min_lng, max_lat, max_lng)
    pub bbox: (f64, f64, f64, f64),
}

impl RegionConfig {
    pub fn contains_point(&self, lng: f64, lat: f64) -> bool {
        let (min_lat, min_lng, max_lat, max_lng) = self.bbox;
        lng >= min_lng && lng <= max_lng && lat >= min_lat && lat <= max_lat
    }

    pub fn width(&self) -> f64 {
        self.bbox.3 - self.bbox.1
    }

    pub fn height(&self) -> f64 {
        self.bbox.2 - self.bbox.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_from_str() {
        assert_eq!(Region::from_str("belgium").unwrap(), Region::Belgium);
        assert_eq!(Region::from_str("Belgium2").unwrap(), Region::Belgium2);
        assert!(matches!(
            Region::from_str("atlantis"),
            Err(ConfigError::UnknownRegion(_))
        ));
    }

    #[test]
    fn test_names_roundtrip() {
        for region in Region::ALL {
            assert_eq!(region.to_string().parse::<Region>().unwrap(), *region);
        }
    }

    #[test]
    fn test_contains_point() {
        let berlin = Region::Berlin.config();
        // Alexanderplatz
        assert!(berlin.contains_point(13.41, 52.52));
        // Brussels
        assert!(!berlin.contains_point(4.35, 50.85));
        assert!(Region::Belgium.config().contains_point(4.35, 50.85));
    }

    #[test]
    fn test_bboxes_are_well_formed() {
        for region in Region::ALL {
            let config = region.config();
            assert!(config.width() > 0.0, "{}", region);
            assert!(config.height() > 0.0, "{}", region);
        }
    }
}
