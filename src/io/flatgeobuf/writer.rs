use std::io::Write;

use arrow::compute::cast;
use arrow_array::cast::AsArray;
use arrow_array::types::*;
use arrow_array::{Array, ArrayRef};
use arrow_schema::DataType;
use flatgeobuf::{FgbCrs, FgbWriter, FgbWriterOptions, GeometryType};
use geozero::wkb::Wkb;
use geozero::{ColumnValue, PropertyProcessor};

use crate::error::{ClipError, Result};
use crate::io::flatgeobuf::anyvalue::column_type_for;
use crate::table::GeoTable;

/// Write a table to a FlatGeobuf file.
///
/// Note: this `name` argument is what OGR observes as the layer name of the file.
///
/// Property columns FlatGeobuf has no type for are written as text. Rows without a geometry
/// can't be represented and are skipped.
pub fn write_flatgeobuf<W: Write>(table: &GeoTable, writer: W, name: &str) -> Result<()> {
    let options = FgbWriterOptions {
        write_index: !table.is_empty(),
        detect_type: false,
        promote_to_multi: false,
        crs: FgbCrs {
            code: table.srid().unwrap_or(0),
            ..Default::default()
        },
        ..Default::default()
    };
    let mut fgb = FgbWriter::create_with_options(name, GeometryType::Unknown, options)?;

    let geometry_idx = table.geometry_column_index();
    // (table column index, type the column is written as)
    let mut columns = Vec::new();
    for (idx, field) in table.schema().fields().iter().enumerate() {
        if idx == geometry_idx {
            continue;
        }
        let target = match field.data_type() {
            DataType::LargeBinary => DataType::Binary,
            data_type if column_type_for(data_type).is_some() => data_type.clone(),
            _ => DataType::Utf8,
        };
        let column_type = column_type_for(&target).ok_or_else(|| {
            ClipError::General(format!("No FlatGeobuf column type for {target}"))
        })?;
        fgb.add_column(field.name(), column_type, |_, col| {
            col.nullable = true;
        });
        columns.push((idx, target));
    }

    let mut skipped = 0;
    for batch in table.batches() {
        let arrays = columns
            .iter()
            .map(|(idx, target)| {
                let column = batch.column(*idx);
                if column.data_type() == target {
                    Ok(column.clone())
                } else {
                    Ok(cast(column, target)?)
                }
            })
            .collect::<Result<Vec<ArrayRef>>>()?;

        let geometries = batch.column(geometry_idx);
        let wkb_at = |row: usize| -> Option<&[u8]> {
            if geometries.is_null(row) {
                return None;
            }
            if let Some(array) = geometries.as_binary_opt::<i32>() {
                Some(array.value(row))
            } else {
                geometries.as_binary_opt::<i64>().map(|array| array.value(row))
            }
        };

        for row in 0..batch.num_rows() {
            let Some(wkb) = wkb_at(row).filter(|wkb| !wkb.is_empty()) else {
                skipped += 1;
                continue;
            };

            let mut property_error = None;
            fgb.add_feature_geom(Wkb(wkb.to_vec()), |feature| {
                for (fgb_idx, array) in arrays.iter().enumerate() {
                    let Some(value) = column_value(array.as_ref(), row) else {
                        continue;
                    };
                    let name = table.schema().field(columns[fgb_idx].0).name();
                    if let Err(err) = feature.property(fgb_idx, name, &value) {
                        property_error = Some(err);
                        return;
                    }
                }
            })?;
            if let Some(err) = property_error {
                return Err(err.into());
            }
        }
    }

    if skipped > 0 {
        log::warn!("Skipped {skipped} rows without geometry while writing FlatGeobuf layer {name}");
    }

    fgb.write(writer)?;
    Ok(())
}

/// The value at `row`, or `None` when it is null.
fn column_value(array: &dyn Array, row: usize) -> Option<ColumnValue<'_>> {
    if array.is_null(row) {
        return None;
    }
    let value = match array.data_type() {
        DataType::Boolean => ColumnValue::Bool(array.as_boolean().value(row)),
        DataType::Int8 => ColumnValue::Byte(array.as_primitive::<Int8Type>().value(row)),
        DataType::UInt8 => ColumnValue::UByte(array.as_primitive::<UInt8Type>().value(row)),
        DataType::Int16 => ColumnValue::Short(array.as_primitive::<Int16Type>().value(row)),
        DataType::UInt16 => ColumnValue::UShort(array.as_primitive::<UInt16Type>().value(row)),
        DataType::Int32 => ColumnValue::Int(array.as_primitive::<Int32Type>().value(row)),
        DataType::UInt32 => ColumnValue::UInt(array.as_primitive::<UInt32Type>().value(row)),
        DataType::Int64 => ColumnValue::Long(array.as_primitive::<Int64Type>().value(row)),
        DataType::UInt64 => ColumnValue::ULong(array.as_primitive::<UInt64Type>().value(row)),
        DataType::Float32 => ColumnValue::Float(array.as_primitive::<Float32Type>().value(row)),
        DataType::Float64 => ColumnValue::Double(array.as_primitive::<Float64Type>().value(row)),
        DataType::Utf8 => ColumnValue::String(array.as_string::<i32>().value(row)),
        DataType::Binary => ColumnValue::Binary(array.as_binary::<i32>().value(row)),
        _ => return None,
    };
    Some(value)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::io::flatgeobuf::read_flatgeobuf;
    use crate::io::wkb::geometry_to_wkb;
    use crate::table::wkb_field;
    use crate::test::square;
    use arrow_array::{BinaryArray, BooleanArray, Date32Array, RecordBatch};
    use arrow_schema::{Field, Schema};
    use std::io::Cursor;
    use std::sync::Arc;

    #[test]
    fn writes_properties_and_crs() {
        let polygon = square(-1_000_000., 2_000_000., 50.);
        let wkb = geometry_to_wkb(&polygon).unwrap();
        let schema = Arc::new(Schema::new(vec![
            Field::new("in_school_zone", DataType::Boolean, true),
            Field::new("surveyed", DataType::Date32, true),
            wkb_field("geom", Some(5070)),
        ]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(BooleanArray::from(vec![Some(true), None])),
                Arc::new(Date32Array::from(vec![Some(19_000), Some(19_001)])),
                Arc::new(BinaryArray::from(vec![Some(wkb.as_slice()), None])),
            ],
        )
        .unwrap();
        let table = GeoTable::try_new(schema, vec![batch]).unwrap();

        let mut buffer = Vec::new();
        write_flatgeobuf(&table, &mut buffer, "buildings").unwrap();
        let read = read_flatgeobuf(&mut Cursor::new(buffer), 100).unwrap();

        // The row without a geometry is dropped
        assert_eq!(read.len(), 1);
        assert_eq!(read.srid(), Some(5070));
        assert_eq!(read.geometries().unwrap(), vec![Some(polygon)]);

        let batch = &read.batches()[0];
        let flag = batch.column(read.schema().index_of("in_school_zone").unwrap());
        assert!(flag.as_boolean().value(0));
        // Dates have no FlatGeobuf type of their own and are stored as text
        let date = read.schema().field_with_name("surveyed").unwrap();
        assert_eq!(date.data_type(), &DataType::Utf8);
    }
}
