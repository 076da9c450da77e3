//! Names of the 5° building tiles that overlap the reference blocks, and the download plan
//! derived from them.

use std::collections::BTreeSet;
use std::fmt;
use std::io::Write;
use std::path::Path;

use geo::BoundingRect;

use crate::algorithm::{Reproject, Transformer};
use crate::crs::WGS84;
use crate::error::Result;
use crate::store::GeometryStore;

/// Edge length of a tile, in degrees.
pub const TILE_SIZE: i32 = 5;

/// A tile, identified by its south-west corner in whole degrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileName {
    pub lat: i32,
    pub lon: i32,
}

impl TileName {
    /// The tile containing the point at `lat`, `lon` (degrees).
    pub fn containing(lat: i32, lon: i32) -> Self {
        Self {
            lat: lat.div_euclid(TILE_SIZE) * TILE_SIZE,
            lon: lon.div_euclid(TILE_SIZE) * TILE_SIZE,
        }
    }

    /// Stem of the file holding this tile on the building server, e.g. `w075_n50_w070_n45`
    /// for `N45_W075`: west edge, north edge, east edge, south edge.
    pub fn server_file_stem(&self) -> String {
        format!(
            "{}_{}_{}_{}",
            lon_label(self.lon),
            lat_label(self.lat + TILE_SIZE),
            lon_label(self.lon + TILE_SIZE),
            lat_label(self.lat),
        )
    }

    pub fn server_file_name(&self) -> String {
        format!("{}.geojson", self.server_file_stem())
    }
}

impl fmt::Display for TileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ns = if self.lat < 0 { 'S' } else { 'N' };
        let ew = if self.lon < 0 { 'W' } else { 'E' };
        write!(
            f,
            "{ns}{:02}_{ew}{:03}",
            self.lat.unsigned_abs(),
            self.lon.unsigned_abs()
        )
    }
}

fn lat_label(lat: i32) -> String {
    let prefix = if lat < 0 { 's' } else { 'n' };
    format!("{prefix}{:02}", lat.unsigned_abs())
}

fn lon_label(lon: i32) -> String {
    let prefix = if lon < 0 { 'w' } else { 'e' };
    format!("{prefix}{:03}", lon.unsigned_abs())
}

/// Tiles touched by a lon/lat bounding box, padded by a degree on the north and east.
///
/// Bounds that are not finite or fall outside the lon/lat range touch no tile.
pub fn tiles_for_bounds(minx: f64, miny: f64, maxx: f64, maxy: f64) -> BTreeSet<TileName> {
    let mut tiles = BTreeSet::new();
    let valid_lon = |x: f64| x.is_finite() && (-180.0..=180.0).contains(&x);
    let valid_lat = |y: f64| y.is_finite() && (-90.0..=90.0).contains(&y);
    if !(valid_lon(minx) && valid_lon(maxx) && valid_lat(miny) && valid_lat(maxy)) {
        log::debug!("Ignoring bounds ({minx}, {miny}, {maxx}, {maxy}) outside lon/lat");
        return tiles;
    }

    for lat in (miny as i32)..=(maxy as i32).saturating_add(1) {
        for lon in (minx as i32)..=(maxx as i32).saturating_add(1) {
            tiles.insert(TileName::containing(lat, lon));
        }
    }
    tiles
}

/// Tiles of dense metropolitan areas, each one to eight gigabytes on the server.
pub const MAJOR_URBAN_TILES: [&str; 6] = [
    "N45_W075", // Ottawa/Montreal
    "N40_W075", // New York/Philadelphia
    "N40_W080", // Pittsburgh/Cleveland
    "N45_W080", // Toronto
    "N45_W085", // Detroit/Chicago
    "N40_W085", // Indianapolis
];

/// The rsync module the LoD1 tiles are published under.
pub const RSYNC_SOURCE: &str = "rsync://m1782307@dataserv.ub.tum.de/m1782307/";

/// A rough size range for downloading a [`TilePlan`], in gigabytes.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadEstimate {
    /// Planned tiles listed in [`MAJOR_URBAN_TILES`], in name order.
    pub urban: Vec<String>,
    /// Every other planned tile.
    pub other: usize,
}

impl DownloadEstimate {
    pub fn min_gb(&self) -> f64 {
        self.urban.len() as f64 + self.other as f64 * 0.01
    }

    pub fn average_gb(&self) -> f64 {
        self.urban.len() as f64 * 4.0 + self.other as f64 * 0.2
    }

    pub fn max_gb(&self) -> f64 {
        self.urban.len() as f64 * 8.0 + self.other as f64
    }
}

impl fmt::Display for DownloadEstimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Major urban tiles (~1-8 GB each): {}", self.urban.len())?;
        if !self.urban.is_empty() {
            writeln!(f, "  {}", self.urban.join(", "))?;
        }
        writeln!(f, "Other tiles (~10 MB - 1 GB each): {}", self.other)?;
        writeln!(f, "Estimated total download size:")?;
        writeln!(f, "  Minimum: {:.1} GB", self.min_gb())?;
        writeln!(f, "  Average: {:.1} GB", self.average_gb())?;
        write!(f, "  Maximum: {:.1} GB", self.max_gb())
    }
}

/// Tiles needed to cover every loaded reference block.
///
/// Blocks that fail to reproject are skipped. An unsupported reference CRS is an error.
pub fn required_tiles(store: &GeometryStore) -> Result<BTreeSet<TileName>> {
    let mut tiles = BTreeSet::new();
    for set in store.sets() {
        let transformer = Transformer::new(set.srid(), WGS84)?;
        let mut skipped = 0;
        for block in set.blocks() {
            let rect = match block.reproject(&transformer) {
                Ok(lonlat) => lonlat.bounding_rect(),
                Err(err) => {
                    log::debug!("Skipping {} block: {err}", set.region());
                    skipped += 1;
                    continue;
                }
            };
            if let Some(rect) = rect {
                tiles.extend(tiles_for_bounds(
                    rect.min().x,
                    rect.min().y,
                    rect.max().x,
                    rect.max().y,
                ));
            }
        }
        if skipped > 0 {
            log::warn!("Skipped {skipped} {} blocks that could not be reprojected", set.region());
        }
        log::info!(
            "{} blocks of {} checked, {} tiles so far",
            set.len(),
            set.region(),
            tiles.len()
        );
    }
    Ok(tiles)
}

/// The tiles to download, and the files describing them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TilePlan {
    tiles: BTreeSet<TileName>,
}

impl TilePlan {
    pub fn new(tiles: BTreeSet<TileName>) -> Self {
        Self { tiles }
    }

    pub fn from_store(store: &GeometryStore) -> Result<Self> {
        Ok(Self::new(required_tiles(store)?))
    }

    pub fn tiles(&self) -> &BTreeSet<TileName> {
        &self.tiles
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Tiles in the order of their names, e.g. `N40_W075` before `N40_W080` before `N45_W075`.
    pub fn by_name(&self) -> Vec<(String, TileName)> {
        let mut named: Vec<(String, TileName)> =
            self.tiles.iter().map(|tile| (tile.to_string(), *tile)).collect();
        named.sort();
        named
    }

    pub fn estimate(&self) -> DownloadEstimate {
        let urban: Vec<String> = self
            .by_name()
            .into_iter()
            .map(|(name, _)| name)
            .filter(|name| MAJOR_URBAN_TILES.contains(&name.as_str()))
            .collect();
        DownloadEstimate {
            other: self.len() - urban.len(),
            urban,
        }
    }

    /// The command that downloads the tiles selected by the include file at `pattern`.
    pub fn rsync_command(pattern: &Path) -> String {
        format!(
            "rsync -avP --include-from={} {RSYNC_SOURCE} ./building_data/",
            pattern.display()
        )
    }

    pub fn write_tile_list<W: Write>(&self, mut writer: W) -> Result<()> {
        writeln!(writer, "Required GlobalBuildingAtlas Tiles")?;
        writeln!(writer, "{}", "=".repeat(60))?;
        writeln!(writer)?;
        writeln!(writer, "Total tiles: {}", self.len())?;
        writeln!(writer)?;
        for (name, _) in self.by_name() {
            writeln!(writer, "{name}")?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn write_mapping<W: Write>(&self, mut writer: W) -> Result<()> {
        writeln!(writer, "Tile Name -> Server Filename Mapping")?;
        writeln!(writer, "{}", "=".repeat(60))?;
        writeln!(writer)?;
        for (name, tile) in self.by_name() {
            writeln!(writer, "{name:15} -> {}", tile.server_file_name())?;
        }
        writer.flush()?;
        Ok(())
    }

    /// An `rsync --include-from` file selecting exactly the planned LoD1 tiles.
    pub fn write_rsync_pattern<W: Write>(&self, mut writer: W) -> Result<()> {
        writeln!(writer, "# rsync include pattern for GlobalBuildingAtlas")?;
        writeln!(writer, "# LoD1 building models ONLY")?;
        writeln!(writer, "# Total tiles: {}", self.len())?;
        writeln!(writer)?;
        writeln!(writer, "# Include directory structure")?;
        writeln!(writer, "+ LoD1/")?;
        writeln!(writer, "+ LoD1/northamerica/")?;
        writeln!(writer)?;
        writeln!(writer, "# Include specific LoD1 tile files")?;
        for (_, tile) in self.by_name() {
            writeln!(writer, "+ LoD1/northamerica/{}", tile.server_file_name())?;
        }
        writeln!(writer)?;
        writeln!(writer, "# Exclude everything else")?;
        writeln!(writer, "- *")?;
        writer.flush()?;
        Ok(())
    }
}
