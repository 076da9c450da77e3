use std::sync::Arc;

use arrow_array::{BinaryArray, RecordBatch};
use geo::{Coord, Geometry, MapCoords};
#[cfg(not(feature = "proj"))]
use geodesy::prelude::*;
#[cfg(not(feature = "proj"))]
use geodesy::{Coor4D, Direction};

#[cfg(not(feature = "proj"))]
use crate::algorithm::epsg::Projection;
use crate::error::{ClipError, Result};
use crate::io::wkb::geometry_to_wkb;
use crate::table::{wkb_field, GeoTable};

/// Converts coordinates from one EPSG code to another.
pub struct Transformer {
    source: i32,
    target: i32,
    kind: TransformerKind,
}

enum TransformerKind {
    Identity,
    /// Source to geographic, then geographic to target.
    #[cfg(not(feature = "proj"))]
    Staged {
        context: Minimal,
        from: Stage,
        to: Stage,
    },
    #[cfg(feature = "proj")]
    Proj(proj::Proj),
}

#[cfg(not(feature = "proj"))]
enum Stage {
    Geographic,
    Geodesy(OpHandle),
    Albers(crate::algorithm::albers::AlbersEqualArea),
}

#[cfg(not(feature = "proj"))]
impl Stage {
    fn new(context: &mut Minimal, projection: Projection) -> Result<Self> {
        Ok(match projection {
            Projection::Geographic => Stage::Geographic,
            Projection::Geodesy(definition) => Stage::Geodesy(context.op(&definition)?),
            Projection::Albers(albers) => Stage::Albers(albers),
        })
    }

    /// Projected coordinates to longitude/latitude in degrees.
    fn inverse(&self, context: &Minimal, coord: Coord) -> Result<Coord> {
        match self {
            Stage::Geographic => Ok(coord),
            Stage::Albers(albers) => {
                let (x, y) = albers.inverse(coord.x, coord.y);
                Ok(Coord { x, y })
            }
            Stage::Geodesy(op) => {
                let mut coords = [coord];
                context.apply(*op, Direction::Inv, &mut CoordsGeodesy(&mut coords))?;
                Ok(Coord {
                    x: coords[0].x.to_degrees(),
                    y: coords[0].y.to_degrees(),
                })
            }
        }
    }

    /// Longitude/latitude in degrees to projected coordinates.
    fn forward(&self, context: &Minimal, coord: Coord) -> Result<Coord> {
        match self {
            Stage::Geographic => Ok(coord),
            Stage::Albers(albers) => {
                let (x, y) = albers.forward(coord.x, coord.y);
                Ok(Coord { x, y })
            }
            Stage::Geodesy(op) => {
                let mut coords = [Coord {
                    x: coord.x.to_radians(),
                    y: coord.y.to_radians(),
                }];
                context.apply(*op, Direction::Fwd, &mut CoordsGeodesy(&mut coords))?;
                Ok(coords[0])
            }
        }
    }
}

/// Wrapper object for applying coordinate operations to geo coordinates
#[cfg(not(feature = "proj"))]
struct CoordsGeodesy<'a>(&'a mut [Coord]);

#[cfg(not(feature = "proj"))]
impl CoordinateSet for CoordsGeodesy<'_> {
    fn len(&self) -> usize {
        self.0.len()
    }

    fn dim(&self) -> usize {
        2
    }

    fn get_coord(&self, index: usize) -> Coor4D {
        Coor4D([self.0[index].x, self.0[index].y, 0., 0.])
    }

    fn set_coord(&mut self, index: usize, value: &Coor4D) {
        self.0[index].x = value[0];
        self.0[index].y = value[1];
    }
}

impl std::fmt::Debug for Transformer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transformer")
            .field("source", &self.source)
            .field("target", &self.target)
            .finish()
    }
}

impl Transformer {
    /// Create a transformer between two EPSG codes.
    ///
    /// With the `proj` feature enabled any pair PROJ knows is accepted. Otherwise both codes must
    /// be in the catalogue of [`epsg`](crate::algorithm::epsg).
    pub fn new(source: i32, target: i32) -> Result<Self> {
        if source == target {
            return Ok(Self {
                source,
                target,
                kind: TransformerKind::Identity,
            });
        }

        #[cfg(feature = "proj")]
        let kind = TransformerKind::Proj(proj::Proj::new_known_crs(
            &format!("EPSG:{source}"),
            &format!("EPSG:{target}"),
            None,
        )?);

        #[cfg(not(feature = "proj"))]
        let kind = {
            let from = Projection::from_epsg(source)?;
            let to = Projection::from_epsg(target)?;
            if from.is_geographic() && to.is_geographic() {
                TransformerKind::Identity
            } else {
                let mut context = Minimal::new();
                let from = Stage::new(&mut context, from)?;
                let to = Stage::new(&mut context, to)?;
                TransformerKind::Staged { context, from, to }
            }
        };

        Ok(Self {
            source,
            target,
            kind,
        })
    }

    pub fn source(&self) -> i32 {
        self.source
    }

    pub fn target(&self) -> i32 {
        self.target
    }

    pub fn transform_coord(&self, coord: Coord) -> Result<Coord> {
        let (x, y) = match &self.kind {
            TransformerKind::Identity => return Ok(coord),
            #[cfg(not(feature = "proj"))]
            TransformerKind::Staged { context, from, to } => {
                let lonlat = from.inverse(context, coord)?;
                let projected = to.forward(context, lonlat)?;
                (projected.x, projected.y)
            }
            #[cfg(feature = "proj")]
            TransformerKind::Proj(proj) => proj.convert((coord.x, coord.y))?,
        };

        if !x.is_finite() || !y.is_finite() {
            return Err(ClipError::General(format!(
                "Coordinate ({}, {}) has no finite position in EPSG:{} from EPSG:{}",
                coord.x, coord.y, self.target, self.source
            )));
        }
        Ok(Coord { x, y })
    }
}

/// Reproject geometries with a [`Transformer`].
pub trait Reproject {
    fn reproject(&self, transformer: &Transformer) -> Result<Self>
    where
        Self: Sized;
}

impl Reproject for Geometry {
    fn reproject(&self, transformer: &Transformer) -> Result<Self> {
        self.try_map_coords(|coord| transformer.transform_coord(coord))
    }
}

impl Reproject for GeoTable {
    /// Reproject the geometry column, keeping every attribute column and null geometry as is.
    ///
    /// The geometry field is re-tagged with the transformer's target EPSG code.
    fn reproject(&self, transformer: &Transformer) -> Result<Self> {
        let geometry_idx = self.geometry_column_index();
        let geometry_field = wkb_field(self.geometry_field().name(), Some(transformer.target()));

        let mut fields = self.schema().fields().to_vec();
        fields[geometry_idx] = Arc::new(geometry_field);
        let schema = Arc::new(arrow_schema::Schema::new_with_metadata(
            fields,
            self.schema().metadata().clone(),
        ));

        let mut batches = Vec::with_capacity(self.batches().len());
        for batch in self.batches() {
            let wkb = self
                .batch_geometries(batch)?
                .into_iter()
                .map(|geometry| {
                    geometry
                        .map(|geometry| geometry_to_wkb(&geometry.reproject(transformer)?))
                        .transpose()
                })
                .collect::<Result<Vec<_>>>()?;

            let mut columns = batch.columns().to_vec();
            columns[geometry_idx] = Arc::new(BinaryArray::from_iter(wkb));
            batches.push(RecordBatch::try_new(schema.clone(), columns)?);
        }

        GeoTable::try_new(schema, batches)
    }
}
