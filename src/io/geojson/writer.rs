use std::io::Write;

use arrow::util::display::{ArrayFormatter, FormatOptions};
use arrow_array::cast::AsArray;
use arrow_array::types::*;
use arrow_array::Array;
use arrow_schema::DataType;
use geojson::Feature;
use serde_json::{Map, Number, Value};

use crate::error::Result;
use crate::table::GeoTable;

/// Write a table as a GeoJSON FeatureCollection named `name`.
///
/// A table with a known CRS gets a `"crs"` member so the file reads back with the same SRID.
/// Note: does not reproject to WGS84 for you.
pub fn write_geojson<W: Write>(table: &GeoTable, mut writer: W, name: &str) -> Result<()> {
    write!(
        writer,
        r#"{{"type":"FeatureCollection","name":{}"#,
        serde_json::to_string(name)?
    )?;
    if let Some(srid) = table.srid() {
        write!(
            writer,
            r#","crs":{{"type":"name","properties":{{"name":"urn:ogc:def:crs:EPSG::{srid}"}}}}"#
        )?;
    }
    write!(writer, r#","features":["#)?;

    let schema = table.schema();
    let geometry_idx = table.geometry_column_index();
    let mut first = true;
    for batch in table.batches() {
        let geometries = table.batch_geometries(batch)?;
        for (row, geometry) in geometries.into_iter().enumerate() {
            let mut properties = Map::new();
            for (col_idx, field) in schema.fields().iter().enumerate() {
                if col_idx == geometry_idx {
                    continue;
                }
                let value = json_value(batch.column(col_idx).as_ref(), row)?;
                properties.insert(field.name().clone(), value);
            }

            let feature = Feature {
                bbox: None,
                geometry: geometry.map(|g| geojson::Geometry::new(geojson::Value::from(&g))),
                id: None,
                properties: Some(properties),
                foreign_members: None,
            };

            if !first {
                writer.write_all(b",")?;
            }
            first = false;
            serde_json::to_writer(&mut writer, &feature)?;
        }
    }

    writer.write_all(b"]}")?;
    Ok(())
}

fn json_value(array: &dyn Array, row: usize) -> Result<Value> {
    if array.is_null(row) {
        return Ok(Value::Null);
    }

    let value = match array.data_type() {
        DataType::Boolean => Value::Bool(array.as_boolean().value(row)),
        DataType::Int8 => array.as_primitive::<Int8Type>().value(row).into(),
        DataType::Int16 => array.as_primitive::<Int16Type>().value(row).into(),
        DataType::Int32 => array.as_primitive::<Int32Type>().value(row).into(),
        DataType::Int64 => array.as_primitive::<Int64Type>().value(row).into(),
        DataType::UInt8 => array.as_primitive::<UInt8Type>().value(row).into(),
        DataType::UInt16 => array.as_primitive::<UInt16Type>().value(row).into(),
        DataType::UInt32 => array.as_primitive::<UInt32Type>().value(row).into(),
        DataType::UInt64 => array.as_primitive::<UInt64Type>().value(row).into(),
        DataType::Float32 => float(array.as_primitive::<Float32Type>().value(row) as f64),
        DataType::Float64 => float(array.as_primitive::<Float64Type>().value(row)),
        DataType::Utf8 => Value::String(array.as_string::<i32>().value(row).to_string()),
        DataType::LargeUtf8 => Value::String(array.as_string::<i64>().value(row).to_string()),
        _ => {
            let formatter = ArrayFormatter::try_new(array, &FormatOptions::default())?;
            Value::String(formatter.value(row).to_string())
        }
    };
    Ok(value)
}

fn float(value: f64) -> Value {
    Number::from_f64(value).map_or(Value::Null, Value::Number)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::io::geojson::read_geojson;
    use crate::test::{buildings_table, square};

    #[test]
    fn test_write() {
        let table = buildings_table(&[square(-75., 45., 0.5), square(-74., 45., 0.5)], Some(4326));

        let mut output_buffer = Vec::new();
        write_geojson(&table, &mut output_buffer, "buildings").unwrap();
        let output_string = String::from_utf8(output_buffer).unwrap();
        assert!(output_string.contains(r#""name":"buildings""#));
        assert!(output_string.contains("urn:ogc:def:crs:EPSG::4326"));

        let parsed: Value = serde_json::from_str(&output_string).unwrap();
        let features = parsed["features"].as_array().unwrap();
        assert_eq!(features.len(), 2);
        assert_eq!(features[1]["properties"]["name"], "building-1");

        let round_trip = read_geojson(output_string.as_bytes(), Some(4326), 100).unwrap();
        assert_eq!(round_trip.len(), 2);
        assert_eq!(round_trip.geometries().unwrap(), table.geometries().unwrap());
    }
}
