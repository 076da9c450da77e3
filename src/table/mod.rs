//! Abstractions for Arrow tables. Useful for dataset IO where data will have geometries and
//! attributes.
//!
//! Geometries are held as ISO WKB in a binary column tagged with the `geoarrow.wkb` extension
//! name. The CRS travels in the extension metadata of that field, e.g. `{"crs": "EPSG:4326"}`.

use std::collections::HashMap;
use std::sync::Arc;

use arrow::compute::cast;
use arrow_array::cast::AsArray;
use arrow_array::{new_null_array, Array, ArrayRef, RecordBatch};
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use geo::Geometry;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::crs::srid_from_name;
use crate::error::{ClipError, Result};
use crate::io::wkb::wkb_to_geometry;

/// Known names of geometry columns, in the order they are looked up.
pub const GEOMETRY_COLUMN_ALIASES: [&str; 5] =
    ["geometry", "geom", "wkb_geometry", "geom_wkb", "shape"];

pub const EXTENSION_NAME_KEY: &str = "ARROW:extension:name";
pub const EXTENSION_METADATA_KEY: &str = "ARROW:extension:metadata";
pub const WKB_EXTENSION_NAME: &str = "geoarrow.wkb";

/// The JSON payload stored under [`EXTENSION_METADATA_KEY`].
#[derive(Debug, Default, Serialize, Deserialize)]
struct GeometryMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    crs: Option<String>,
}

/// Find the geometry column of a schema.
///
/// Aliases are tried in the order of [`GEOMETRY_COLUMN_ALIASES`], comparing names
/// case-insensitively; only binary fields qualify.
pub fn geometry_column_alias(schema: &Schema) -> Option<usize> {
    GEOMETRY_COLUMN_ALIASES.iter().find_map(|alias| {
        schema.fields().iter().position(|field| {
            field.name().eq_ignore_ascii_case(alias)
                && matches!(field.data_type(), DataType::Binary | DataType::LargeBinary)
        })
    })
}

/// Construct a WKB geometry field, optionally tagged with an EPSG code.
pub fn wkb_field(name: &str, srid: Option<i32>) -> Field {
    let geo_metadata = GeometryMetadata {
        crs: srid.map(|code| format!("EPSG:{code}")),
    };
    let mut metadata = HashMap::with_capacity(2);
    metadata.insert(EXTENSION_NAME_KEY.to_string(), WKB_EXTENSION_NAME.to_string());
    // Serializing a struct of one optional string can't fail
    if let Ok(json) = serde_json::to_string(&geo_metadata) {
        metadata.insert(EXTENSION_METADATA_KEY.to_string(), json);
    }
    Field::new(name, DataType::Binary, true).with_metadata(metadata)
}

/// The name given to an attribute that collides with the geometry column: `geometry_1`, or the
/// next suffix for which `taken` is false.
pub fn rename_shadowing(name: &str, taken: impl Fn(&str) -> bool) -> String {
    (1..)
        .map(|n| format!("{name}_{n}"))
        .find(|candidate| !taken(candidate))
        .unwrap_or_else(|| name.to_string())
}

/// Decode every value of a WKB column. Nulls and zero-length values decode to `None`.
pub fn decode_geometries(column: &dyn Array) -> Result<Vec<Option<Geometry>>> {
    let decode = |wkb: Option<&[u8]>| match wkb {
        Some(bytes) if !bytes.is_empty() => wkb_to_geometry(bytes).map(Some),
        _ => Ok(None),
    };

    if let Some(array) = column.as_binary_opt::<i32>() {
        array.iter().map(decode).collect()
    } else if let Some(array) = column.as_binary_opt::<i64>() {
        array.iter().map(decode).collect()
    } else {
        Err(ClipError::General(format!(
            "Geometry column must be binary, found {}",
            column.data_type()
        )))
    }
}

/// A set of record batches sharing one schema, with one WKB geometry column.
#[derive(Debug, Clone)]
pub struct GeoTable {
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
    geometry_column_index: usize,
}

impl GeoTable {
    /// Wrap batches, locating the geometry column by alias.
    pub fn try_new(schema: SchemaRef, batches: Vec<RecordBatch>) -> Result<Self> {
        let geometry_column_index =
            geometry_column_alias(&schema).ok_or(ClipError::MissingGeometryColumn)?;

        for batch in &batches {
            if batch.num_columns() != schema.fields().len() {
                return Err(ClipError::General(format!(
                    "Batch has {} columns but the schema has {}",
                    batch.num_columns(),
                    schema.fields().len()
                )));
            }
        }

        Ok(Self {
            schema,
            batches,
            geometry_column_index,
        })
    }

    pub fn len(&self) -> usize {
        self.batches.iter().fold(0, |sum, val| sum + val.num_rows())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_inner(self) -> (SchemaRef, Vec<RecordBatch>, usize) {
        (self.schema, self.batches, self.geometry_column_index)
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    pub fn batches(&self) -> &Vec<RecordBatch> {
        &self.batches
    }

    pub fn geometry_column_index(&self) -> usize {
        self.geometry_column_index
    }

    pub fn geometry_field(&self) -> &Field {
        self.schema.field(self.geometry_column_index)
    }

    /// The EPSG code recorded on the geometry field, if any.
    pub fn srid(&self) -> Option<i32> {
        let json = self.geometry_field().metadata().get(EXTENSION_METADATA_KEY)?;
        let metadata: GeometryMetadata = serde_json::from_str(json).ok()?;
        srid_from_name(metadata.crs.as_deref()?)
    }

    /// Replace the CRS recorded on the geometry field. Coordinates are left untouched.
    pub fn with_srid(self, srid: Option<i32>) -> Result<Self> {
        let geometry_field = wkb_field(self.geometry_field().name(), srid);
        let fields = self
            .schema
            .fields()
            .iter()
            .enumerate()
            .map(|(idx, field)| {
                if idx == self.geometry_column_index {
                    Arc::new(geometry_field.clone())
                } else {
                    field.clone()
                }
            })
            .collect::<Vec<_>>();
        let schema = Arc::new(Schema::new_with_metadata(
            fields,
            self.schema.metadata().clone(),
        ));

        let batches = self
            .batches
            .into_iter()
            .map(|batch| RecordBatch::try_new(schema.clone(), batch.columns().to_vec()))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Self {
            schema,
            batches,
            geometry_column_index: self.geometry_column_index,
        })
    }

    /// Decode the geometries of one batch of this table.
    pub fn batch_geometries(&self, batch: &RecordBatch) -> Result<Vec<Option<Geometry>>> {
        decode_geometries(batch.column(self.geometry_column_index).as_ref())
    }

    /// Decode every geometry of the table, in row order.
    pub fn geometries(&self) -> Result<Vec<Option<Geometry>>> {
        let mut out = Vec::with_capacity(self.len());
        for batch in &self.batches {
            out.extend(self.batch_geometries(batch)?);
        }
        Ok(out)
    }

    /// Stack tables vertically.
    ///
    /// Schemas are unioned by column name in first-seen order; columns a table lacks are filled
    /// with nulls and conflicting types are widened (see [`widen`]). The geometry column keeps
    /// the name, position and CRS of the first table. An attribute sharing the geometry column's
    /// name is renamed with [`rename_shadowing`].
    pub fn concat(tables: &[GeoTable]) -> Result<GeoTable> {
        let first = tables
            .first()
            .ok_or_else(|| ClipError::General("Cannot concatenate zero tables".to_string()))?;
        let geometry_field = first.geometry_field().clone();
        let geometry_name = geometry_field.name().clone();

        let mut fields: IndexMap<String, Field> = IndexMap::new();
        // Per table, the output column name of each input column
        let mut targets: Vec<Vec<String>> = Vec::with_capacity(tables.len());
        for table in tables {
            if let (Some(expected), Some(found)) = (first.srid(), table.srid()) {
                if expected != found {
                    return Err(ClipError::General(format!(
                        "Cannot concatenate EPSG:{found} geometries onto EPSG:{expected}"
                    )));
                }
            }

            let mut names = Vec::with_capacity(table.schema.fields().len());
            for (idx, field) in table.schema.fields().iter().enumerate() {
                if idx == table.geometry_column_index {
                    fields
                        .entry(geometry_name.clone())
                        .or_insert_with(|| geometry_field.clone());
                    names.push(geometry_name.clone());
                    continue;
                }
                let name = if field.name() == &geometry_name {
                    let renamed = rename_shadowing(&geometry_name, |candidate| {
                        table.schema.field_with_name(candidate).is_ok()
                    });
                    log::debug!("Renaming attribute {geometry_name} to {renamed}");
                    renamed
                } else {
                    field.name().clone()
                };
                match fields.get_mut(&name) {
                    Some(existing) => {
                        let widened = widen(existing.data_type(), field.data_type());
                        if &widened != existing.data_type() {
                            *existing = existing.clone().with_data_type(widened);
                        }
                    }
                    None => {
                        fields.insert(
                            name.clone(),
                            Field::clone(field).with_name(name.clone()).with_nullable(true),
                        );
                    }
                }
                names.push(name);
            }
            targets.push(names);
        }

        let schema = Arc::new(Schema::new(fields.into_values().collect::<Vec<_>>()));

        let mut batches = Vec::new();
        for (table, names) in tables.iter().zip(&targets) {
            for batch in &table.batches {
                let columns = schema
                    .fields()
                    .iter()
                    .map(|field| {
                        let source = names.iter().position(|name| name == field.name());
                        align_column(source.map(|idx| batch.column(idx)), field, batch.num_rows())
                    })
                    .collect::<Result<Vec<_>>>()?;
                batches.push(RecordBatch::try_new(schema.clone(), columns)?);
            }
        }

        GeoTable::try_new(schema, batches)
    }
}

fn align_column(column: Option<&ArrayRef>, field: &Field, num_rows: usize) -> Result<ArrayRef> {
    match column {
        Some(column) if column.data_type() == field.data_type() => Ok(column.clone()),
        Some(column) => Ok(cast(column, field.data_type())?),
        None => Ok(new_null_array(field.data_type(), num_rows)),
    }
}

/// The narrowest type both `left` and `right` can be cast to without failing.
///
/// `Null` yields to the other side, integers widen to `Int64`, mixed numerics to `Float64`, and
/// everything else falls back to `Utf8`.
pub fn widen(left: &DataType, right: &DataType) -> DataType {
    match (left, right) {
        (l, r) if l == r => l.clone(),
        (DataType::Null, other) | (other, DataType::Null) => other.clone(),
        (l, r) if l.is_integer() && r.is_integer() => DataType::Int64,
        (l, r) if l.is_numeric() && r.is_numeric() => DataType::Float64,
        (DataType::Binary, DataType::LargeBinary) | (DataType::LargeBinary, DataType::Binary) => {
            DataType::LargeBinary
        }
        _ => DataType::Utf8,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test::{buildings_table, square};
    use arrow_array::cast::AsArray;
    use arrow_array::types::Float64Type;
    use arrow_array::{Int64Array, StringArray};

    #[test]
    fn alias_lookup_is_ordered_and_typed() {
        let schema = Schema::new(vec![
            Field::new("Shape", DataType::Binary, true),
            Field::new("geom", DataType::Utf8, true),
            Field::new("WKB_GEOMETRY", DataType::Binary, true),
        ]);
        // "geom" is text, so the first binary alias in lookup order wins
        assert_eq!(geometry_column_alias(&schema), Some(2));

        let schema = Schema::new(vec![Field::new("name", DataType::Utf8, true)]);
        assert_eq!(geometry_column_alias(&schema), None);
    }

    #[test]
    fn missing_geometry_column() {
        let schema = Arc::new(Schema::new(vec![Field::new("id", DataType::Int64, true)]));
        let batch =
            RecordBatch::try_new(schema.clone(), vec![Arc::new(Int64Array::from(vec![1, 2]))])
                .unwrap();
        assert!(matches!(
            GeoTable::try_new(schema, vec![batch]),
            Err(ClipError::MissingGeometryColumn)
        ));
    }

    #[test]
    fn srid_metadata() {
        let table = buildings_table(&[square(0., 0., 1.)], Some(5070));
        assert_eq!(table.srid(), Some(5070));
        let table = table.with_srid(Some(4326)).unwrap();
        assert_eq!(table.srid(), Some(4326));
        assert_eq!(table.geometries().unwrap().len(), 1);
    }

    #[test]
    fn concat_unions_schemas() {
        let left = buildings_table(&[square(0., 0., 1.), square(2., 2., 1.)], Some(4326));

        let schema = Arc::new(Schema::new(vec![
            Field::new("height", DataType::Int64, true),
            Field::new("source", DataType::Utf8, true),
            wkb_field("geometry", Some(4326)),
        ]));
        let wkb = crate::io::wkb::geometry_to_wkb(&square(5., 5., 1.)).unwrap();
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(Int64Array::from(vec![12])),
                Arc::new(StringArray::from(vec!["osm"])),
                Arc::new(arrow_array::BinaryArray::from(vec![wkb.as_slice()])),
            ],
        )
        .unwrap();
        let right = GeoTable::try_new(schema, vec![batch]).unwrap();

        let combined = GeoTable::concat(&[left, right]).unwrap();
        assert_eq!(combined.len(), 3);
        assert_eq!(combined.srid(), Some(4326));

        let names: Vec<_> = combined
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().as_str())
            .collect();
        assert_eq!(names, vec!["name", "height", "geometry", "source"]);

        // Float64 height from the fixture widened against Int64
        let height = combined.schema().field_with_name("height").unwrap();
        assert_eq!(height.data_type(), &DataType::Float64);
        let last = &combined.batches()[1];
        assert_eq!(last.column(1).as_primitive::<Float64Type>().value(0), 12.0);
        assert!(last.column(0).is_null(0));
        assert_eq!(combined.batches()[0].column(3).null_count(), 2);
        assert_eq!(combined.geometries().unwrap().len(), 3);
    }

    #[test]
    fn concat_renames_attribute_named_geometry() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("geometry", DataType::Utf8, true),
            wkb_field("geometry", Some(4326)),
        ]));
        let wkb = crate::io::wkb::geometry_to_wkb(&square(5., 5., 1.)).unwrap();
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(StringArray::from(vec!["flat roof"])),
                Arc::new(arrow_array::BinaryArray::from(vec![wkb.as_slice()])),
            ],
        )
        .unwrap();
        let table = GeoTable::try_new(schema, vec![batch]).unwrap();
        assert_eq!(table.geometry_column_index(), 1);

        let combined = GeoTable::concat(&[table.clone(), table]).unwrap();
        let names: Vec<_> = combined
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().as_str())
            .collect();
        assert_eq!(names, vec!["geometry_1", "geometry"]);
        assert_eq!(combined.len(), 2);
        let roof = combined.batches()[1].column(0).as_string::<i32>();
        assert_eq!(roof.value(0), "flat roof");
        assert_eq!(combined.geometries().unwrap()[1], Some(square(5., 5., 1.)));
    }

    #[test]
    fn concat_rejects_mixed_crs() {
        let left = buildings_table(&[square(0., 0., 1.)], Some(4326));
        let right = buildings_table(&[square(0., 0., 1.)], Some(3857));
        assert!(GeoTable::concat(&[left, right]).is_err());
    }

    #[test]
    fn widening_rules() {
        assert_eq!(widen(&DataType::Null, &DataType::Utf8), DataType::Utf8);
        assert_eq!(widen(&DataType::Int32, &DataType::Int64), DataType::Int64);
        assert_eq!(widen(&DataType::Int64, &DataType::Float32), DataType::Float64);
        assert_eq!(widen(&DataType::Boolean, &DataType::Int64), DataType::Utf8);
    }
}
