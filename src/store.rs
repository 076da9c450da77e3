//! The reference census blocks every tile is joined against.
//!
//! Blocks are loaded once at startup and never change afterwards, so tiles borrow them
//! read-only for the lifetime of the process.

use std::fmt;
use std::path::Path;

use geo::{BoundingRect, Geometry, Intersects};
use indexmap::IndexMap;
use rstar::primitives::{GeomWithData, Rectangle};
use rstar::{RTree, AABB};

use crate::crs::detect_file_srid;
use crate::error::Result;
use crate::io::{read_path, DEFAULT_BATCH_SIZE};
use crate::table::GeoTable;

/// The regions reference blocks are loaded for, in join order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Region {
    UnitedStates,
    Canada,
}

impl Region {
    pub const ALL: [Region; 2] = [Region::UnitedStates, Region::Canada];

    pub fn name(&self) -> &'static str {
        match self {
            Region::UnitedStates => "US",
            Region::Canada => "Canada",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

type BlockEnvelope = GeomWithData<Rectangle<[f64; 2]>, usize>;

/// The census blocks of one region, in that region's native CRS.
#[derive(Debug)]
pub struct ReferenceBlockSet {
    region: Region,
    srid: i32,
    blocks: Vec<Geometry>,
    index: RTree<BlockEnvelope>,
}

impl ReferenceBlockSet {
    /// Index `blocks`, which must be in `srid` coordinates. Empty geometries are dropped.
    pub fn new(region: Region, srid: i32, blocks: Vec<Geometry>) -> Self {
        let mut kept = Vec::with_capacity(blocks.len());
        let mut envelopes = Vec::with_capacity(blocks.len());
        for block in blocks {
            let Some(rect) = block.bounding_rect() else {
                continue;
            };
            let (min, max) = (rect.min(), rect.max());
            envelopes.push(GeomWithData::new(
                Rectangle::from_corners([min.x, min.y], [max.x, max.y]),
                kept.len(),
            ));
            kept.push(block);
        }

        Self {
            region,
            srid,
            blocks: kept,
            index: RTree::bulk_load(envelopes),
        }
    }

    /// Collect the non-null geometries of a loaded table.
    pub fn from_table(region: Region, srid: i32, table: &GeoTable) -> Result<Self> {
        let blocks = table.geometries()?.into_iter().flatten().collect();
        Ok(Self::new(region, srid, blocks))
    }

    pub fn region(&self) -> Region {
        self.region
    }

    pub fn srid(&self) -> i32 {
        self.srid
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn blocks(&self) -> &[Geometry] {
        &self.blocks
    }

    /// Whether `geometry`, given in this set's CRS, intersects any block. Touching boundaries
    /// count.
    pub fn intersects_any(&self, geometry: &Geometry) -> bool {
        let Some(rect) = geometry.bounding_rect() else {
            return false;
        };
        let envelope = AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]);
        self.index
            .locate_in_envelope_intersecting(&envelope)
            .any(|candidate| self.blocks[candidate.data].intersects(geometry))
    }
}

/// Reference block sets by region.
#[derive(Debug, Default)]
pub struct GeometryStore {
    sets: IndexMap<Region, ReferenceBlockSet>,
}

impl GeometryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the reference blocks of `region` from a FlatGeobuf or GeoJSON file.
    ///
    /// Returns the detected SRID. A missing or unreadable file, a file without a geometry column
    /// or one whose CRS can't be determined leaves the region unloaded and returns `None`; the
    /// region is then skipped by every join.
    pub fn load(&mut self, region: Region, path: &Path) -> Option<i32> {
        if !path.exists() {
            log::warn!("{region} reference {} not found", path.display());
            return None;
        }

        log::info!("Loading {region} reference blocks from {}", path.display());
        let table = match read_path(path, DEFAULT_BATCH_SIZE) {
            Ok(table) => table,
            Err(err) => {
                log::error!("Failed to load {}: {err}", path.display());
                return None;
            }
        };

        let Some(srid) = table.srid().or_else(|| detect_file_srid(path)) else {
            log::error!("Could not detect the CRS of {}", path.display());
            return None;
        };

        let set = match ReferenceBlockSet::from_table(region, srid, &table) {
            Ok(set) => set,
            Err(err) => {
                log::error!("Failed to decode blocks of {}: {err}", path.display());
                return None;
            }
        };
        log::info!("Loaded {} {region} census blocks (SRID: {srid})", set.len());
        self.insert(set);
        Some(srid)
    }

    /// Register a block set, replacing any previous set of the same region.
    pub fn insert(&mut self, set: ReferenceBlockSet) {
        self.sets.insert(set.region(), set);
        self.sets.sort_keys();
    }

    pub fn get(&self, region: Region) -> Option<&ReferenceBlockSet> {
        self.sets.get(&region)
    }

    /// Loaded sets in join order.
    pub fn sets(&self) -> impl Iterator<Item = &ReferenceBlockSet> {
        self.sets.values()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}
