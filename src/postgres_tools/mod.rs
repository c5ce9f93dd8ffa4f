// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license
use anyhow::{Context, Result};
use postgres::{Client, NoTls};
use std::env;

/// Opens a blocking connection to the event store.
/// The pipeline is single threaded, so one client is shared by every stage.
pub fn make_client(database_url: &str) -> Result<Client> {
    Client::connect(database_url, NoTls).context("Failed to connect to the event store")
}

pub fn database_url_for_env() -> Result<String> {
    env::var("DATABASE_URL").context("DATABASE_URL must be set")
}
