//! Clip one building tile against the reference blocks of every loaded region.

use std::path::Path;
use std::sync::Arc;

use arrow::compute::filter;
use arrow_array::{ArrayRef, BinaryArray, BooleanArray, RecordBatch};
use arrow_schema::{Field, FieldRef, Schema, SchemaRef};

use crate::algorithm::{Reproject, Transformer};
use crate::crs::detect_file_srid;
use crate::error::{ClipError, Result};
use crate::io::read_path;
use crate::io::wkb::geometry_to_wkb;
use crate::store::{GeometryStore, ReferenceBlockSet, Region};
use crate::table::{rename_shadowing, wkb_field, GeoTable};

/// What processing a tile produced.
#[derive(Debug)]
pub enum TileOutcome {
    /// Buildings inside at least one region's blocks, in the output CRS.
    Matched(GeoTable),
    /// The tile was read but no building intersects any block.
    Empty,
    /// The tile couldn't be read, has no geometry column or has no detectable CRS.
    GeometryError(String),
}

/// A join that failed for one region. The other regions are unaffected.
#[derive(Debug)]
pub struct RegionJoinError {
    pub region: Region,
    pub error: ClipError,
}

#[derive(Debug)]
pub struct TileReport {
    pub outcome: TileOutcome,
    pub join_errors: Vec<RegionJoinError>,
    /// Buildings read from the tile.
    pub total_buildings: usize,
    /// The CRS the tile was detected to be in.
    pub srid: Option<i32>,
}

impl TileReport {
    fn geometry_error(message: impl Into<String>) -> Self {
        Self {
            outcome: TileOutcome::GeometryError(message.into()),
            join_errors: vec![],
            total_buildings: 0,
            srid: None,
        }
    }
}

/// Joins tiles against a [`GeometryStore`] and reprojects matches to the output CRS.
#[derive(Debug)]
pub struct TileProcessor<'a> {
    store: &'a GeometryStore,
    output_srid: i32,
    batch_size: usize,
}

impl<'a> TileProcessor<'a> {
    pub fn new(store: &'a GeometryStore, output_srid: i32, batch_size: usize) -> Self {
        Self {
            store,
            output_srid,
            batch_size,
        }
    }

    /// Read a tile and keep the buildings that intersect a block of any region.
    ///
    /// A building intersecting blocks of both regions is returned once per region. Output rows
    /// carry every attribute of the tile followed by a `geometry` column in the output CRS.
    pub fn process(&self, path: &Path) -> TileReport {
        let tile = match read_path(path, self.batch_size) {
            Ok(tile) => tile,
            Err(ClipError::MissingGeometryColumn) => {
                log::error!("No geometry column in {}", path.display());
                return TileReport::geometry_error("no geometry column");
            }
            Err(err) => {
                log::error!("Error reading {}: {err}", path.display());
                return TileReport::geometry_error(err.to_string());
            }
        };

        let Some(srid) = tile.srid().or_else(|| detect_file_srid(path)) else {
            log::error!("Could not detect the SRID of {}", path.display());
            return TileReport::geometry_error(
                ClipError::UnknownCrs(path.to_path_buf()).to_string(),
            );
        };

        let total_buildings = tile.len();
        log::info!("Buildings in tile: {total_buildings} (SRID: {srid})");

        let to_output = match Transformer::new(srid, self.output_srid) {
            Ok(transformer) => transformer,
            Err(err) => {
                log::error!("Cannot reproject {}: {err}", path.display());
                return TileReport {
                    outcome: TileOutcome::GeometryError(err.to_string()),
                    join_errors: vec![],
                    total_buildings,
                    srid: Some(srid),
                };
            }
        };

        let mut results = vec![];
        let mut join_errors = vec![];
        let mut regions = 0;
        for set in self.store.sets() {
            let region = set.region();
            regions += 1;
            log::info!("Checking {region} census blocks");
            match self.join_region(&tile, srid, set, &to_output) {
                Ok(Some(matched)) => {
                    log::info!("Found {} buildings in {region} school areas", matched.len());
                    results.push(matched);
                }
                Ok(None) => log::info!("No {region} matches"),
                Err(error) => {
                    log::warn!("{region} join failed: {error}");
                    join_errors.push(RegionJoinError { region, error });
                }
            }
        }

        let outcome = if regions > 0 && join_errors.len() == regions {
            log::error!("No region could be joined with {}", path.display());
            TileOutcome::GeometryError(format!("all {regions} region joins failed"))
        } else if results.is_empty() {
            log::info!("No buildings in school areas");
            TileOutcome::Empty
        } else {
            match GeoTable::concat(&results) {
                Ok(combined) => {
                    log::info!("Total filtered buildings: {}", combined.len());
                    TileOutcome::Matched(combined)
                }
                Err(err) => {
                    log::error!("Could not combine region results: {err}");
                    TileOutcome::GeometryError(err.to_string())
                }
            }
        };

        TileReport {
            outcome,
            join_errors,
            total_buildings,
            srid: Some(srid),
        }
    }

    /// Semi-join `tile` (in `tile_srid`) against one region's blocks.
    fn join_region(
        &self,
        tile: &GeoTable,
        tile_srid: i32,
        set: &ReferenceBlockSet,
        to_output: &Transformer,
    ) -> Result<Option<GeoTable>> {
        let to_region = Transformer::new(tile_srid, set.srid())?;

        let geometry_idx = tile.geometry_column_index();
        let schema = output_schema(tile.schema(), geometry_idx, self.output_srid);

        let mut batches = vec![];
        for batch in tile.batches() {
            let mut mask = Vec::with_capacity(batch.num_rows());
            let mut matched_wkb = vec![];
            for geometry in tile.batch_geometries(batch)? {
                let Some(geometry) = geometry else {
                    mask.push(false);
                    continue;
                };
                let hit = set.intersects_any(&geometry.reproject(&to_region)?);
                if hit {
                    matched_wkb.push(geometry_to_wkb(&geometry.reproject(to_output)?)?);
                }
                mask.push(hit);
            }

            if matched_wkb.is_empty() {
                continue;
            }

            let mask = BooleanArray::from(mask);
            let mut columns = batch
                .columns()
                .iter()
                .enumerate()
                .filter(|(idx, _)| *idx != geometry_idx)
                .map(|(_, column)| Ok(filter(column.as_ref(), &mask)?))
                .collect::<Result<Vec<ArrayRef>>>()?;
            columns.push(Arc::new(BinaryArray::from_iter_values(matched_wkb.iter())));
            batches.push(RecordBatch::try_new(schema.clone(), columns)?);
        }

        if batches.is_empty() {
            return Ok(None);
        }
        Ok(Some(GeoTable::try_new(schema, batches)?))
    }
}

/// The tile's attributes followed by a `geometry` column in `srid`.
///
/// An attribute already called `geometry` is renamed with [`rename_shadowing`].
fn output_schema(schema: &Schema, geometry_idx: usize, srid: i32) -> SchemaRef {
    let attributes: Vec<&FieldRef> = schema
        .fields()
        .iter()
        .enumerate()
        .filter(|(idx, _)| *idx != geometry_idx)
        .map(|(_, field)| field)
        .collect();

    let mut fields: Vec<Field> = Vec::with_capacity(attributes.len() + 1);
    for field in &attributes {
        if !field.name().eq_ignore_ascii_case("geometry") {
            fields.push(Field::clone(field));
            continue;
        }
        let renamed = rename_shadowing(field.name(), |name| {
            attributes
                .iter()
                .any(|other| other.name().eq_ignore_ascii_case(name))
                || fields.iter().any(|other| other.name().eq_ignore_ascii_case(name))
        });
        log::debug!("Renaming attribute {} to {renamed}", field.name());
        fields.push(Field::clone(field).with_name(renamed));
    }
    fields.push(wkb_field("geometry", Some(srid)));
    Arc::new(Schema::new(fields))
}
