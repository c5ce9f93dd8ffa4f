// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

//! Read-only access to the raw location events.
//!
//! Two sources ship with the crate: [`PgEventSource`] queries the event store
//! directly, [`MemoryEventSource`] holds CSV exports in memory. Both page users
//! in ascending id order.

use crate::errors::ConfigError;
use crate::{LocationId, UserId};
use ahash::AHashMap;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

pub const DEFAULT_PAGE_SIZE: u64 = 1000;

/// The queries the pipeline issues against the event store. No writes.
pub trait EventSource {
    /// Number of users in the store.
    fn user_count(&mut self) -> Result<u64>;

    /// Ids of at most `limit` users, skipping the first `offset`.
    fn user_page(&mut self, offset: u64, limit: u64) -> Result<Vec<UserId>>;

    /// Every location event of `user` recorded in `table`, duplicates included.
    fn user_locations(&mut self, user: UserId, table: &str) -> Result<Vec<LocationId>>;

    /// All known locations as (id, lat, lng).
    fn locations(&mut self) -> Result<Vec<(LocationId, f64, f64)>>;
}

/// Walks the user population one page at a time.
///
/// The cursor only remembers where it is; the source is handed in on every
/// call so the consumer can keep querying it between pages.
#[derive(Debug, Clone)]
pub struct PageCursor {
    offset: u64,
    page_size: u64,
    exhausted: bool,
}

impl PageCursor {
    pub fn new(page_size: u64) -> Self {
        Self {
            offset: 0,
            page_size: page_size.max(1),
            exhausted: false,
        }
    }

    /// Users consumed so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Start again from the first user.
    pub fn reset(&mut self) {
        self.offset = 0;
        self.exhausted = false;
    }

    pub fn next_page<S: EventSource + ?Sized>(
        &mut self,
        source: &mut S,
    ) -> Result<Option<Vec<UserId>>> {
        if self.exhausted {
            return Ok(None);
        }

        let users = source.user_page(self.offset, self.page_size)?;
        if users.is_empty() {
            self.exhausted = true;
            return Ok(None);
        }

        self.offset += users.len() as u64;
        Ok(Some(users))
    }
}

/// Table names are interpolated into SQL, so only plain identifiers pass.
pub fn validate_table(table: &str) -> Result<(), ConfigError> {
    let valid = !table.is_empty()
        && table
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !table.starts_with(|c: char| c.is_ascii_digit());

    if valid {
        Ok(())
    } else {
        Err(ConfigError::InvalidTable(table.to_string()))
    }
}

pub struct PgEventSource {
    client: postgres::Client,
}

impl PgEventSource {
    pub fn new(client: postgres::Client) -> Self {
        Self { client }
    }
}

impl EventSource for PgEventSource {
    fn user_count(&mut self) -> Result<u64> {
        let row = self
            .client
            .query_one("SELECT count(id) FROM \"user\"", &[])
            .context("Failed to count users")?;
        let count: i64 = row.get(0);
        Ok(count.max(0) as u64)
    }

    fn user_page(&mut self, offset: u64, limit: u64) -> Result<Vec<UserId>> {
        let offset = offset as i64;
        let limit = limit as i64;
        let rows = self
            .client
            .query(
                "SELECT id FROM \"user\" ORDER BY id LIMIT $1 OFFSET $2",
                &[&limit, &offset],
            )
            .with_context(|| format!("Failed to fetch users at offset {}", offset))?;
        Ok(rows.iter().map(|row| row.get::<_, i64>(0)).collect())
    }

    fn user_locations(&mut self, user: UserId, table: &str) -> Result<Vec<LocationId>> {
        validate_table(table)?;
        let sql = format!("SELECT location FROM {} WHERE \"user\" = $1", table);
        let rows = self
            .client
            .query(sql.as_str(), &[&user])
            .with_context(|| format!("Failed to fetch locations of user {}", user))?;
        Ok(rows.iter().map(|row| row.get::<_, i64>(0)).collect())
    }

    fn locations(&mut self) -> Result<Vec<(LocationId, f64, f64)>> {
        let rows = self
            .client
            .query("SELECT id, lat, lng FROM location", &[])
            .context("Failed to load locations")?;
        Ok(rows
            .iter()
            .map(|row| (row.get::<_, i64>(0), row.get::<_, f64>(1), row.get::<_, f64>(2)))
            .collect())
    }
}

#[derive(Deserialize)]
struct RawEvent {
    user: UserId,
    location: LocationId,
}

#[derive(Deserialize)]
struct RawLocation {
    id: LocationId,
    lat: f64,
    lng: f64,
}

/// Events held in memory, keyed by table then user.
#[derive(Debug, Default, Clone)]
pub struct MemoryEventSource {
    users: Vec<UserId>,
    events: AHashMap<String, AHashMap<UserId, Vec<LocationId>>>,
    locations: Vec<(LocationId, f64, f64)>,
}

impl MemoryEventSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_event(&mut self, table: &str, user: UserId, location: LocationId) {
        self.events
            .entry(table.to_string())
            .or_default()
            .entry(user)
            .or_default()
            .push(location);
        if let Err(pos) = self.users.binary_search(&user) {
            self.users.insert(pos, user);
        }
    }

    pub fn add_location(&mut self, id: LocationId, lat: f64, lng: f64) {
        self.locations.push((id, lat, lng));
    }

    /// Loads `user,location` rows into `table` and `id,lat,lng` rows as locations.
    pub fn from_csv(table: &str, events_file: &Path, locations_file: &Path) -> Result<Self> {
        let mut source = Self::new();

        let file = File::open(events_file)
            .with_context(|| format!("Failed to open events file {:?}", events_file))?;
        let mut rdr = csv::Reader::from_reader(BufReader::new(file));
        for result in rdr.deserialize() {
            let event: RawEvent =
                result.with_context(|| format!("Bad event row in {:?}", events_file))?;
            source.add_event(table, event.user, event.location);
        }

        let file = File::open(locations_file)
            .with_context(|| format!("Failed to open locations file {:?}", locations_file))?;
        let mut rdr = csv::Reader::from_reader(BufReader::new(file));
        for result in rdr.deserialize() {
            let loc: RawLocation =
                result.with_context(|| format!("Bad location row in {:?}", locations_file))?;
            source.add_location(loc.id, loc.lat, loc.lng);
        }

        Ok(source)
    }
}

impl EventSource for MemoryEventSource {
    fn user_count(&mut self) -> Result<u64> {
        Ok(self.users.len() as u64)
    }

    fn user_page(&mut self, offset: u64, limit: u64) -> Result<Vec<UserId>> {
        Ok(self
            .users
            .iter()
            .skip(offset as usize)
            .take(limit as usize)
            .copied()
            .collect())
    }

    fn user_locations(&mut self, user: UserId, table: &str) -> Result<Vec<LocationId>> {
        validate_table(table)?;
        Ok(self
            .events
            .get(table)
            .and_then(|users| users.get(&user))
            .cloned()
            .unwrap_or_default())
    }

    fn locations(&mut self) -> Result<Vec<(LocationId, f64, f64)>> {
        Ok(self.locations.clone())
    }
}
