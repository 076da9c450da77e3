use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::Arc;

use arrow_array::{BinaryArray, Float64Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema};
use geo::{polygon, Densify, Geometry};
use serde_json::Value;

use crate::algorithm::{Reproject, Transformer};
use crate::io::flatgeobuf::write_flatgeobuf;
use crate::io::wkb::geometry_to_wkb;
use crate::table::{wkb_field, GeoTable};

pub(crate) fn square(x: f64, y: f64, size: f64) -> Geometry {
    Geometry::Polygon(polygon![
        (x: x, y: y),
        (x: x + size, y: y),
        (x: x + size, y: y + size),
        (x: x, y: y + size),
        (x: x, y: y),
    ])
}

/// A lon/lat rectangle, densified and projected into `srid` so its edges follow the graticule.
pub(crate) fn lonlat_block(west: f64, south: f64, east: f64, north: f64, srid: i32) -> Geometry {
    let polygon = polygon![
        (x: west, y: south),
        (x: east, y: south),
        (x: east, y: north),
        (x: west, y: north),
        (x: west, y: south),
    ];
    let transformer = Transformer::new(4326, srid).unwrap();
    Geometry::Polygon(polygon.densify(0.05))
        .reproject(&transformer)
        .unwrap()
}

/// Buildings with a `name` (`building-<i>`) and a `height` column.
pub(crate) fn buildings_table(geometries: &[Geometry], srid: Option<i32>) -> GeoTable {
    let names: Vec<String> = (0..geometries.len())
        .map(|i| format!("building-{i}"))
        .collect();
    let heights: Vec<f64> = (0..geometries.len()).map(|i| 3.0 + i as f64).collect();
    let wkb: Vec<Vec<u8>> = geometries
        .iter()
        .map(|geometry| geometry_to_wkb(geometry).unwrap())
        .collect();

    let schema = Arc::new(Schema::new(vec![
        Field::new("name", DataType::Utf8, true),
        Field::new("height", DataType::Float64, true),
        wkb_field("geometry", srid),
    ]));
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(StringArray::from(names)),
            Arc::new(Float64Array::from(heights)),
            Arc::new(BinaryArray::from_iter_values(wkb.iter())),
        ],
    )
    .unwrap();
    GeoTable::try_new(schema, vec![batch]).unwrap()
}

/// A GeoJSON FeatureCollection document with an optional named CRS member.
pub(crate) fn feature_collection(
    features: &[(Value, Option<Geometry>)],
    crs: Option<&str>,
) -> String {
    let features: Vec<String> = features
        .iter()
        .map(|(properties, geometry)| {
            let geometry = match geometry {
                Some(geometry) => {
                    serde_json::to_string(&geojson::Geometry::new(geojson::Value::from(geometry)))
                        .unwrap()
                }
                None => "null".to_string(),
            };
            format!(r#"{{"type":"Feature","properties":{properties},"geometry":{geometry}}}"#)
        })
        .collect();

    let crs = match crs {
        Some(name) => format!(
            r#""crs":{{"type":"name","properties":{{"name":{}}}}},"#,
            Value::from(name)
        ),
        None => String::new(),
    };
    format!(
        r#"{{"type":"FeatureCollection","name":"tile",{crs}"features":[{}]}}"#,
        features.join(",")
    )
}

pub(crate) fn write_tile(path: &Path, features: &[(Value, Option<Geometry>)], crs: Option<&str>) {
    std::fs::write(path, feature_collection(features, crs)).unwrap();
}

/// Write census blocks to a FlatGeobuf reference file, each with a `GEOID` column.
pub(crate) fn write_blocks(path: &Path, blocks: &[Geometry], srid: i32) {
    let geoids: Vec<String> = (0..blocks.len()).map(|i| format!("{i:015}")).collect();
    let wkb: Vec<Vec<u8>> = blocks
        .iter()
        .map(|geometry| geometry_to_wkb(geometry).unwrap())
        .collect();
    let schema = Arc::new(Schema::new(vec![
        Field::new("GEOID", DataType::Utf8, true),
        wkb_field("geom", Some(srid)),
    ]));
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(StringArray::from(geoids)),
            Arc::new(BinaryArray::from_iter_values(wkb.iter())),
        ],
    )
    .unwrap();
    let table = GeoTable::try_new(schema, vec![batch]).unwrap();
    let writer = BufWriter::new(File::create(path).unwrap());
    write_flatgeobuf(&table, writer, "blocks").unwrap();
}
