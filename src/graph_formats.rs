// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

//! Row types and readers/writers for every delimited artifact the pipeline
//! leaves on disk. Stages talk to each other only through these files.

use crate::LocationId;
use anyhow::{Context, Result};
use csv::{ReaderBuilder, WriterBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

/// One undirected edge of a graph artifact, `orig <= targ`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EdgeRow<W> {
    pub orig: LocationId,
    pub targ: LocationId,
    pub weight: W,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PercentileRow {
    pub percentile: u32,
    pub distance: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricsRow {
    pub per_distance: u32,
    pub modularity: f64,
    pub ncomms: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionRow {
    pub id: LocationId,
    pub comm: u32,
}

/// A border segment in (lng, lat) with the share of partitions that drew it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SegmentRow {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
    pub weight: f64,
}

/// A segment of the combined atlas, attributed to the scale it came from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AtlasRow {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
    pub weight: f64,
    pub scale: u32,
}

/// A graph artifact loaded in full. Weights are read as floats so normalized
/// graphs load through the same path as raw co-visit counts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphFile {
    pub edges: Vec<EdgeRow<f64>>,
}

impl GraphFile {
    pub fn read(path: &Path) -> Result<Self> {
        Ok(Self {
            edges: read_rows(path)?,
        })
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        write_rows(path, &self.edges)
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

pub fn read_rows<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    let mut rdr = ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(BufReader::new(file));

    let mut rows = Vec::new();
    for result in rdr.deserialize() {
        let row: T = result.with_context(|| format!("Bad row in {:?}", path))?;
        rows.push(row);
    }
    Ok(rows)
}

/// Writes `rows` with a header line, even when there are no rows.
pub fn write_rows<T: Serialize + Header>(path: &Path, rows: &[T]) -> Result<()> {
    let mut writer = RowWriter::create(path)?;
    for row in rows {
        writer.write(row)?;
    }
    writer.finish()
}

/// An artifact written one row at a time. Every row is flushed, so an
/// interrupted stage leaves the rows it finished on disk.
pub struct RowWriter<T> {
    path: PathBuf,
    writer: csv::Writer<BufWriter<File>>,
    _row: PhantomData<T>,
}

impl<T: Serialize + Header> RowWriter<T> {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
        let mut writer = WriterBuilder::new()
            .has_headers(false)
            .from_writer(BufWriter::new(file));
        writer
            .write_record(T::COLUMNS)
            .with_context(|| format!("Failed to write header to {:?}", path))?;
        Ok(Self {
            path: path.to_path_buf(),
            writer,
            _row: PhantomData,
        })
    }

    /// Buffered; call [`RowWriter::flush`] or [`RowWriter::finish`] to persist.
    pub fn write(&mut self, row: &T) -> Result<()> {
        self.writer
            .serialize(row)
            .with_context(|| format!("Failed to write row to {:?}", self.path))
    }

    pub fn append(&mut self, row: &T) -> Result<()> {
        self.write(row)?;
        self.flush()
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer
            .flush()
            .with_context(|| format!("Failed to flush {:?}", self.path))
    }

    pub fn finish(mut self) -> Result<()> {
        self.flush()
    }
}

/// Column names of a row type, written explicitly so empty artifacts still
/// carry their header.
pub trait Header {
    const COLUMNS: &'static [&'static str];
}

impl<W> Header for EdgeRow<W> {
    const COLUMNS: &'static [&'static str] = &["orig", "targ", "weight"];
}
impl Header for PercentileRow {
    const COLUMNS: &'static [&'static str] = &["percentile", "distance"];
}
impl Header for MetricsRow {
    const COLUMNS: &'static [&'static str] = &["per_distance", "modularity", "ncomms"];
}
impl Header for PartitionRow {
    const COLUMNS: &'static [&'static str] = &["id", "comm"];
}
impl Header for SegmentRow {
    const COLUMNS: &'static [&'static str] = &["x1", "y1", "x2", "y2", "weight"];
}
impl Header for AtlasRow {
    const COLUMNS: &'static [&'static str] = &["x1", "y1", "x2", "y2", "weight", "scale"];
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DistanceRow {
    pub distance: f64,
}

impl Header for DistanceRow {
    const COLUMNS: &'static [&'static str] = &["distance"];
}

/// Reads the first column of a distance sample, skipping its header.
/// Extra columns are tolerated.
pub fn read_distance_sample(path: &Path) -> Result<Vec<f64>> {
    let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    let mut rdr = ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(BufReader::new(file));

    let mut sample = Vec::new();
    for (line, result) in rdr.records().enumerate() {
        let record = result.with_context(|| format!("Bad row in {:?}", path))?;
        let Some(field) = record.get(0) else {
            continue;
        };
        if field.is_empty() {
            continue;
        }
        let value: f64 = field
            .parse()
            .with_context(|| format!("Bad distance '{}' at row {} of {:?}", field, line + 2, path))?;
        sample.push(value);
    }
    Ok(sample)
}
