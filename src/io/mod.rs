//! Reader and writer implementations for the geospatial file formats the pipeline exchanges:
//! GeoJSON building tiles and FlatGeobuf reference and output datasets.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use crate::error::{ClipError, Result};
use crate::table::GeoTable;

pub mod flatgeobuf;
pub mod geojson;
pub mod wkb;

/// Rows per Arrow batch when a reader has to choose.
pub const DEFAULT_BATCH_SIZE: usize = 10_000;

/// File formats recognized by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    GeoJson,
    FlatGeobuf,
}

impl Format {
    pub fn from_path(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase());
        match extension.as_deref() {
            Some("geojson") | Some("json") => Ok(Format::GeoJson),
            Some("fgb") => Ok(Format::FlatGeobuf),
            _ => Err(ClipError::UnsupportedFormat(path.to_path_buf())),
        }
    }
}

/// Read a whole dataset, choosing the reader from the file extension.
pub fn read_path(path: &Path, batch_size: usize) -> Result<GeoTable> {
    match Format::from_path(path)? {
        Format::GeoJson => geojson::read_geojson_path(path, batch_size),
        Format::FlatGeobuf => {
            let mut reader = BufReader::new(File::open(path)?);
            flatgeobuf::read_flatgeobuf(&mut reader, batch_size)
        }
    }
}

/// Write a dataset, choosing the writer from the file extension.
///
/// `name` becomes the layer name of the file.
pub fn write_path(table: &GeoTable, path: &Path, name: &str) -> Result<()> {
    let format = Format::from_path(path)?;
    let mut writer = BufWriter::new(File::create(path)?);
    match format {
        Format::GeoJson => geojson::write_geojson(table, &mut writer, name)?,
        Format::FlatGeobuf => flatgeobuf::write_flatgeobuf(table, &mut writer, name)?,
    }
    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(())
}
