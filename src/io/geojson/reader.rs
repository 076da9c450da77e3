use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use std::sync::Arc;

use arrow_array::{ArrayRef, BinaryArray, RecordBatch};
use arrow_json::reader::infer_json_schema_from_iterator;
use arrow_json::ReaderBuilder;
use arrow_schema::{ArrowError, FieldRef, Schema};
use geojson::{Feature, FeatureReader};
use serde_json::{Map, Value};

use crate::crs::sniff_geojson_crs;
use crate::error::{ClipError, Result};
use crate::io::wkb::geometry_to_wkb;
use crate::table::{wkb_field, GeoTable};

/// Read a GeoJSON file, taking its CRS from the document's `"crs"` member when it has one.
pub fn read_geojson_path(path: &Path, batch_size: usize) -> Result<GeoTable> {
    let declaration = sniff_geojson_crs(BufReader::new(File::open(path)?))?;
    let reader = BufReader::new(File::open(path)?);
    read_geojson(reader, declaration.epsg(), batch_size)
}

/// Stream the features of a GeoJSON FeatureCollection into a [`GeoTable`].
///
/// Features are converted `batch_size` at a time. Each chunk infers its own property schema and
/// the chunks are unioned at the end, so a key that first shows up late in the file still
/// becomes a column.
///
/// A collection where no feature carries a geometry produces
/// [`ClipError::MissingGeometryColumn`]; an empty collection produces an empty table.
pub fn read_geojson<R: Read>(reader: R, srid: Option<i32>, batch_size: usize) -> Result<GeoTable> {
    let mut builder = GeoJsonTableBuilder::new(srid, batch_size);
    let mut reader = RecordingReader::new(reader, EMPTY_COLLECTION_BYTES);
    match push_features(&mut reader, &mut builder) {
        Ok(()) => builder.finish(),
        Err(err) if builder.features_seen == 0 && reader.is_empty_collection() => {
            log::debug!("Feature stream stopped on an empty collection: {err}");
            builder.finish()
        }
        Err(err) => Err(err),
    }
}

/// How much of a document is kept to recognise an empty `"features": []`.
const EMPTY_COLLECTION_BYTES: usize = 64 * 1024;

fn push_features<R: Read>(reader: R, builder: &mut GeoJsonTableBuilder) -> Result<()> {
    for feature in FeatureReader::from_reader(reader).features() {
        builder.push(feature?)?;
    }
    Ok(())
}

/// Passes reads through while keeping a copy of the first `limit` bytes.
struct RecordingReader<R> {
    inner: R,
    prefix: Vec<u8>,
    limit: usize,
    overflowed: bool,
}

impl<R: Read> RecordingReader<R> {
    fn new(inner: R, limit: usize) -> Self {
        Self {
            inner,
            prefix: vec![],
            limit,
            overflowed: false,
        }
    }

    /// Whether the whole input is a FeatureCollection with an empty `features` array.
    ///
    /// The streaming reader cannot tell `[]` from a broken array, so the rest of a short document
    /// is read and parsed in full.
    fn is_empty_collection(&mut self) -> bool {
        let limit = (self.limit + 1) as u64;
        if io::copy(&mut self.by_ref().take(limit), &mut io::sink()).is_err() || self.overflowed {
            return false;
        }
        let Ok(Value::Object(document)) = serde_json::from_slice::<Value>(&self.prefix) else {
            return false;
        };
        document.get("type").and_then(Value::as_str) == Some("FeatureCollection")
            && document
                .get("features")
                .and_then(Value::as_array)
                .is_some_and(|features| features.is_empty())
    }
}

impl<R: Read> Read for RecordingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if !self.overflowed {
            if self.prefix.len() + n <= self.limit {
                self.prefix.extend_from_slice(&buf[..n]);
            } else {
                self.overflowed = true;
                self.prefix = vec![];
            }
        }
        Ok(n)
    }
}

struct GeoJsonTableBuilder {
    srid: Option<i32>,
    batch_size: usize,
    properties: Vec<Value>,
    geometries: Vec<Option<Vec<u8>>>,
    chunks: Vec<GeoTable>,
    features_seen: usize,
    geometries_seen: usize,
}

impl GeoJsonTableBuilder {
    fn new(srid: Option<i32>, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            srid,
            batch_size,
            properties: Vec::with_capacity(batch_size),
            geometries: Vec::with_capacity(batch_size),
            chunks: vec![],
            features_seen: 0,
            geometries_seen: 0,
        }
    }

    fn push(&mut self, feature: Feature) -> Result<()> {
        let geometry = match feature.geometry {
            Some(geometry) => {
                let geometry = geo::Geometry::<f64>::try_from(&geometry.value)?;
                self.geometries_seen += 1;
                Some(geometry_to_wkb(&geometry)?)
            }
            None => None,
        };

        self.properties
            .push(Value::Object(flatten_properties(feature.properties)));
        self.geometries.push(geometry);
        self.features_seen += 1;

        if self.properties.len() >= self.batch_size {
            self.flush_chunk()?;
        }
        Ok(())
    }

    fn flush_chunk(&mut self) -> Result<()> {
        if self.properties.is_empty() {
            return Ok(());
        }

        let num_rows = self.properties.len();
        let (mut fields, mut columns) = decode_properties(&self.properties)?;
        self.properties.clear();

        let geometry = BinaryArray::from_iter(self.geometries.drain(..));
        fields.push(Arc::new(wkb_field("geometry", self.srid)));
        columns.push(Arc::new(geometry));

        let schema = Arc::new(Schema::new(fields));
        let batch = RecordBatch::try_new(schema.clone(), columns)?;
        debug_assert_eq!(batch.num_rows(), num_rows);
        self.chunks.push(GeoTable::try_new(schema, vec![batch])?);
        Ok(())
    }

    fn finish(mut self) -> Result<GeoTable> {
        self.flush_chunk()?;

        if self.features_seen > 0 && self.geometries_seen == 0 {
            return Err(ClipError::MissingGeometryColumn);
        }

        if self.chunks.is_empty() {
            let schema = Arc::new(Schema::new(vec![wkb_field("geometry", self.srid)]));
            return GeoTable::try_new(schema, vec![]);
        }

        GeoTable::concat(&self.chunks)
    }
}

/// Nested arrays and objects are kept as JSON text so every property maps to a flat column.
fn flatten_properties(properties: Option<Map<String, Value>>) -> Map<String, Value> {
    let mut properties = properties.unwrap_or_default();
    for value in properties.values_mut() {
        if value.is_array() || value.is_object() {
            *value = Value::String(value.to_string());
        }
    }
    properties
}

fn decode_properties(rows: &[Value]) -> Result<(Vec<FieldRef>, Vec<ArrayRef>)> {
    let schema = infer_json_schema_from_iterator(rows.iter().map(Ok::<_, ArrowError>))?;
    if schema.fields().is_empty() {
        return Ok((vec![], vec![]));
    }

    let mut decoder = ReaderBuilder::new(Arc::new(schema))
        .with_batch_size(rows.len())
        .with_coerce_primitive(true)
        .build_decoder()?;
    decoder.serialize(rows)?;
    let batch = decoder
        .flush()?
        .ok_or_else(|| ClipError::General("GeoJSON properties decoded to no rows".to_string()))?;

    let fields = batch.schema().fields().iter().cloned().collect();
    Ok((fields, batch.columns().to_vec()))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test::{feature_collection, square, write_tile};
    use arrow_array::cast::AsArray;
    use arrow_array::types::{Float64Type, Int64Type};
    use arrow_schema::DataType;
    use serde_json::json;

    #[test]
    fn reads_properties_and_geometry() {
        let doc = feature_collection(
            &[
                (json!({"id": 1, "height": 7.5, "type": "house"}), Some(square(-75., 45., 0.5))),
                (json!({"id": 2, "height": 3, "tags": ["a", "b"]}), Some(square(-75.5, 45., 0.5))),
            ],
            None,
        );
        let table = read_geojson(doc.as_bytes(), Some(4326), 10).unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.srid(), Some(4326));
        let schema = table.schema();
        assert_eq!(
            schema.field_with_name("height").unwrap().data_type(),
            &DataType::Float64
        );
        assert_eq!(
            schema.field_with_name("tags").unwrap().data_type(),
            &DataType::Utf8
        );

        let batch = &table.batches()[0];
        let id = batch.column(schema.index_of("id").unwrap());
        assert_eq!(id.as_primitive::<Int64Type>().value(1), 2);
        let height = batch.column(schema.index_of("height").unwrap());
        assert_eq!(height.as_primitive::<Float64Type>().value(0), 7.5);

        let geometries = table.geometries().unwrap();
        assert_eq!(geometries[0], Some(square(-75., 45., 0.5)));
    }

    #[test]
    fn late_keys_become_columns() {
        let doc = feature_collection(
            &[
                (json!({"a": 1}), Some(square(0., 0., 1.))),
                (json!({"a": 2}), Some(square(0., 0., 1.))),
                (json!({"a": 3, "b": "late"}), None),
            ],
            None,
        );
        let table = read_geojson(doc.as_bytes(), None, 2).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.batches().len(), 2);
        assert!(table.schema().field_with_name("b").is_ok());
        assert_eq!(table.geometries().unwrap()[2], None);
    }

    #[test]
    fn empty_collection_has_geometry_column() {
        let doc = feature_collection(&[], None);
        let table = read_geojson(doc.as_bytes(), None, 10).unwrap();
        assert!(table.is_empty());
        assert_eq!(table.geometry_field().name(), "geometry");
    }

    #[test]
    fn empty_collection_with_crs_and_spacing() {
        let doc = r#"{
            "type": "FeatureCollection",
            "crs": {"type": "name", "properties": {"name": "urn:ogc:def:crs:OGC:1.3:CRS84"}},
            "features" : [ ]
        }"#;
        let table = read_geojson(doc.as_bytes(), Some(4326), 10).unwrap();
        assert!(table.is_empty());
        assert_eq!(table.srid(), Some(4326));
    }

    #[test]
    fn truncated_empty_collection_is_an_error() {
        let doc = r#"{"type": "FeatureCollection", "features": ["#;
        assert!(read_geojson(doc.as_bytes(), None, 10).is_err());
    }

    #[test]
    fn no_geometries_at_all() {
        let doc = feature_collection(&[(json!({"a": 1}), None), (json!({"a": 2}), None)], None);
        assert!(matches!(
            read_geojson(doc.as_bytes(), None, 10),
            Err(ClipError::MissingGeometryColumn)
        ));
    }

    #[test]
    fn truncated_download_is_an_error() {
        let doc = feature_collection(&[(json!({"a": 1}), Some(square(0., 0., 1.)))], None);
        let truncated = &doc[..doc.len() / 2];
        assert!(read_geojson(truncated.as_bytes(), None, 10).is_err());
    }

    #[test]
    fn path_reader_uses_declared_crs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tile.geojson");
        write_tile(
            &path,
            &[(json!({}), Some(square(-8_400_000., 5_600_000., 10.)))],
            Some("urn:ogc:def:crs:EPSG::3857"),
        );
        let table = read_geojson_path(&path, 10).unwrap();
        assert_eq!(table.srid(), Some(3857));

        let path = dir.path().join("plain.geojson");
        write_tile(&path, &[(json!({}), Some(square(0., 0., 1.)))], None);
        assert_eq!(read_geojson_path(&path, 10).unwrap().srid(), None);
    }
}
