//! Read from and write to [GeoJSON](https://geojson.org/) files.

pub use reader::{read_geojson, read_geojson_path};
pub use writer::write_geojson;

mod reader;
mod writer;
