// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

use crate::LocationId;
use crate::errors::ConfigError;
use crate::event_source::EventSource;
use ahash::AHashMap;
use anyhow::Result;
use tracing::info;

/// Location id -> (lat, lng), loaded once and read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct LocationMap {
    coords: AHashMap<LocationId, (f64, f64)>,
}

impl LocationMap {
    pub fn load<S: EventSource + ?Sized>(source: &mut S) -> Result<Self> {
        let map: LocationMap = source.locations()?.into_iter().collect();
        info!("loaded {} locations", map.len());
        Ok(map)
    }

    pub fn get(&self, id: LocationId) -> Option<(f64, f64)> {
        self.coords.get(&id).copied()
    }

    /// Like [`get`](Self::get), but a missing entry is a configuration error.
    pub fn coords(&self, id: LocationId) -> Result<(f64, f64), ConfigError> {
        self.get(id).ok_or(ConfigError::MissingCoordinates(id))
    }

    pub fn len(&self) -> usize {
        self.coords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coords.is_empty()
    }

    /// Entries sorted by id, so downstream indices are deterministic.
    pub fn sorted(&self) -> Vec<(LocationId, (f64, f64))> {
        let mut entries: Vec<_> = self.coords.iter().map(|(&id, &c)| (id, c)).collect();
        entries.sort_by_key(|(id, _)| *id);
        entries
    }
}

impl FromIterator<(LocationId, f64, f64)> for LocationMap {
    fn from_iter<I: IntoIterator<Item = (LocationId, f64, f64)>>(iter: I) -> Self {
        Self {
            coords: iter
                .into_iter()
                .map(|(id, lat, lng)| (id, (lat, lng)))
                .collect(),
        }
    }
}
