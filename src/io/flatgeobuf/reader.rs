//! Reader for converting FlatGeobuf to [`GeoTable`]s
//!
//! The header tells us the property columns and their types up front, so one Arrow builder per
//! column is created before any feature is read. Geometries are re-encoded as WKB through
//! geozero; the CRS code in the header lands in the geometry field metadata.

use std::io::{Read, Seek};
use std::sync::Arc;

use arrow_array::builder::BinaryBuilder;
use arrow_array::{ArrayRef, RecordBatch};
use arrow_schema::{Field, Schema, SchemaRef};
use flatgeobuf::{FallibleStreamingIterator, FgbReader};
use geozero::{ColumnValue, CoordDimensions, FeatureProperties, PropertyProcessor, ToWkb};

use crate::crs::srid_from_name;
use crate::error::Result;
use crate::io::flatgeobuf::anyvalue::AnyBuilder;
use crate::table::{rename_shadowing, wkb_field, GeoTable};

/// Read a FlatGeobuf file to a [`GeoTable`], `batch_size` features per record batch.
pub fn read_flatgeobuf<R: Read + Seek>(reader: &mut R, batch_size: usize) -> Result<GeoTable> {
    let fgb = FgbReader::open(reader)?;
    let header = fgb.header();
    if header.has_z() | header.has_m() | header.has_t() | header.has_tm() {
        log::debug!("Dropping Z/M dimensions from FlatGeobuf geometries");
    }

    let srid = match header.crs() {
        Some(crs) if crs.code() > 0 => Some(crs.code()),
        Some(crs) => crs.wkt().and_then(srid_from_name),
        None => None,
    };

    // Header column index → property column
    let mut columns: Vec<Option<PropertyColumn>> = Vec::new();
    if let Some(header_columns) = header.columns() {
        let header_names: Vec<&str> = header_columns.iter().map(|column| column.name()).collect();
        for column in header_columns.iter() {
            let mut name = column.name().to_string();
            if name.eq_ignore_ascii_case("geometry") {
                let renamed = rename_shadowing(&name, |candidate| {
                    header_names
                        .iter()
                        .any(|other| other.eq_ignore_ascii_case(candidate))
                });
                log::debug!("Renaming FlatGeobuf property column {name} to {renamed}");
                name = renamed;
            }
            match AnyBuilder::for_column_type(column.type_(), batch_size) {
                Some(builder) => columns.push(Some(PropertyColumn {
                    name,
                    builder,
                    filled: false,
                })),
                None => {
                    log::warn!("Skipping FlatGeobuf column {name} of unsupported type");
                    columns.push(None);
                }
            }
        }
    }

    let mut builder = FlatGeobufTableBuilder {
        columns,
        geometry: BinaryBuilder::new(),
        batches: vec![],
        rows: 0,
        batch_size: batch_size.max(1),
    };
    let schema = builder.schema(srid);

    let mut selection = fgb.select_all()?;
    while let Some(feature) = selection.next()? {
        let wkb = match feature.geometry() {
            Some(_) => Some(feature.to_wkb(CoordDimensions::xy())?),
            None => None,
        };
        feature.process_properties(&mut builder)?;
        builder.push_row(wkb.as_deref());
        if builder.rows >= builder.batch_size {
            builder.flush(&schema)?;
        }
    }
    builder.flush(&schema)?;

    GeoTable::try_new(schema, builder.batches)
}

struct PropertyColumn {
    name: String,
    builder: AnyBuilder,
    /// Whether the current feature set this column.
    filled: bool,
}

struct FlatGeobufTableBuilder {
    columns: Vec<Option<PropertyColumn>>,
    geometry: BinaryBuilder,
    batches: Vec<RecordBatch>,
    rows: usize,
    batch_size: usize,
}

impl FlatGeobufTableBuilder {
    fn schema(&self, srid: Option<i32>) -> SchemaRef {
        let mut fields: Vec<Field> = self
            .columns
            .iter()
            .flatten()
            .map(|column| Field::new(&column.name, column.builder.data_type(), true))
            .collect();
        fields.push(wkb_field("geometry", srid));
        Arc::new(Schema::new(fields))
    }

    /// Finish the current feature. Columns the feature didn't set become null.
    fn push_row(&mut self, wkb: Option<&[u8]>) {
        for column in self.columns.iter_mut().flatten() {
            if !column.filled {
                column.builder.append_null();
            }
            column.filled = false;
        }
        self.geometry.append_option(wkb);
        self.rows += 1;
    }

    fn flush(&mut self, schema: &SchemaRef) -> Result<()> {
        if self.rows == 0 {
            return Ok(());
        }
        let mut arrays: Vec<ArrayRef> = self
            .columns
            .iter_mut()
            .flatten()
            .map(|column| column.builder.finish())
            .collect();
        arrays.push(Arc::new(self.geometry.finish()));
        self.batches
            .push(RecordBatch::try_new(schema.clone(), arrays)?);
        self.rows = 0;
        Ok(())
    }
}

impl PropertyProcessor for FlatGeobufTableBuilder {
    fn property(
        &mut self,
        idx: usize,
        name: &str,
        value: &ColumnValue,
    ) -> geozero::error::Result<bool> {
        if let Some(Some(column)) = self.columns.get_mut(idx) {
            if column.filled {
                return Ok(false);
            }
            if !column.builder.add_value(value) {
                log::debug!("Unexpected value type for FlatGeobuf column {name}; stored null");
            }
            column.filled = true;
        }
        Ok(false)
    }
}
