//! Detect EPSG codes from the CRS descriptions embedded in geospatial files.
//!
//! GeoJSON files written by GDAL carry a `"crs"` member ahead of their features, FlatGeobuf files
//! store the code in their header. Both are mapped to a plain EPSG integer here; anything that
//! can't be mapped is reported as [`CrsDeclaration::Unrecognized`] rather than guessed.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use flatgeobuf::FgbReader;
use serde_json::Value;

use crate::error::Result;
use crate::io::Format;

/// EPSG code of WGS 84, the implicit CRS of RFC 7946 GeoJSON.
pub const WGS84: i32 = 4326;

/// How many bytes of a GeoJSON file are searched for a top-level `"crs"` member.
const GEOJSON_HEADER_BYTES: u64 = 1 << 20;

/// What a file says about its coordinate reference system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrsDeclaration {
    /// The file carries no CRS information at all.
    Absent,
    /// The file names a CRS we mapped to an EPSG code.
    Epsg(i32),
    /// The file names a CRS we could not map.
    Unrecognized(String),
}

impl CrsDeclaration {
    /// The EPSG code, if one was recognized.
    pub fn epsg(&self) -> Option<i32> {
        match self {
            CrsDeclaration::Epsg(code) => Some(*code),
            _ => None,
        }
    }
}

/// Parse a CRS name such as `EPSG:3347`, `urn:ogc:def:crs:EPSG::5070` or `CRS84`.
///
/// WKT definitions are accepted too: the last `AUTHORITY["EPSG", ...]` or `ID["EPSG", ...]` in
/// the string names the CRS as a whole.
pub fn srid_from_name(name: &str) -> Option<i32> {
    let name = name.trim();
    let upper = name.to_ascii_uppercase();

    if upper.ends_with("CRS84") {
        return Some(WGS84);
    }

    if let Some(code) = upper.strip_prefix("EPSG:") {
        return code.trim().parse().ok();
    }

    if upper.starts_with("URN:OGC:DEF:CRS:EPSG:") {
        // urn:ogc:def:crs:EPSG::<code> or urn:ogc:def:crs:EPSG:<version>:<code>
        return upper.rsplit(':').next().and_then(|code| code.parse().ok());
    }

    if upper.contains('[') {
        return srid_from_wkt(&upper);
    }

    None
}

fn srid_from_wkt(wkt: &str) -> Option<i32> {
    let mut found = None;
    for keyword in ["AUTHORITY[\"EPSG\",", "ID[\"EPSG\","] {
        if let Some(pos) = wkt.rfind(keyword) {
            let rest = &wkt[pos + keyword.len()..];
            let code: String = rest
                .trim_start_matches(|c: char| c == '"' || c.is_whitespace())
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect();
            if let Ok(code) = code.parse::<i32>() {
                // Prefer whichever keyword appears last in the definition
                match found {
                    Some((prev_pos, _)) if prev_pos > pos => {}
                    _ => found = Some((pos, code)),
                }
            }
        }
    }
    found.map(|(_, code)| code)
}

/// Interpret the value of a GeoJSON `"crs"` member.
///
/// Both the named form (`{"type": "name", "properties": {"name": ...}}`) and the legacy
/// `{"type": "EPSG", "properties": {"code": ...}}` form of the 2008 GeoJSON format are handled.
pub fn srid_from_geojson_crs(crs: &Value) -> CrsDeclaration {
    if crs.is_null() {
        return CrsDeclaration::Absent;
    }

    let properties = crs.get("properties");
    if let Some(name) = properties.and_then(|p| p.get("name")).and_then(Value::as_str) {
        return match srid_from_name(name) {
            Some(code) => CrsDeclaration::Epsg(code),
            None => CrsDeclaration::Unrecognized(name.to_string()),
        };
    }

    if let Some(code) = properties.and_then(|p| p.get("code")) {
        let code = code
            .as_i64()
            .or_else(|| code.as_str().and_then(|s| s.parse().ok()));
        if let Some(code) = code.and_then(|c| i32::try_from(c).ok()) {
            return CrsDeclaration::Epsg(code);
        }
    }

    CrsDeclaration::Unrecognized(crs.to_string())
}

/// Look for a top-level `"crs"` member ahead of the `"features"` array of a GeoJSON document.
///
/// Only the document header is inspected so multi-gigabyte tiles are never read in full.
pub fn sniff_geojson_crs<R: Read>(reader: R) -> Result<CrsDeclaration> {
    let mut header = Vec::new();
    reader.take(GEOJSON_HEADER_BYTES).read_to_end(&mut header)?;

    let text = String::from_utf8_lossy(&header);
    let search_end = text.find("\"features\"").unwrap_or(text.len());
    let Some(key_pos) = text[..search_end].find("\"crs\"") else {
        return Ok(CrsDeclaration::Absent);
    };

    let after_key = text[key_pos + "\"crs\"".len()..].trim_start();
    let Some(value_text) = after_key.strip_prefix(':') else {
        return Ok(CrsDeclaration::Absent);
    };

    let mut stream = serde_json::Deserializer::from_str(value_text).into_iter::<Value>();
    match stream.next() {
        Some(Ok(value)) => Ok(srid_from_geojson_crs(&value)),
        Some(Err(err)) => Ok(CrsDeclaration::Unrecognized(err.to_string())),
        None => Ok(CrsDeclaration::Absent),
    }
}

/// Read the CRS code out of a FlatGeobuf header.
pub fn flatgeobuf_crs<R: Read + std::io::Seek>(reader: &mut R) -> Result<CrsDeclaration> {
    let fgb = FgbReader::open(reader)?;
    let header = fgb.header();
    let declaration = match header.crs() {
        None => CrsDeclaration::Absent,
        Some(crs) if crs.code() > 0 => CrsDeclaration::Epsg(crs.code()),
        Some(crs) => match crs.wkt() {
            None => CrsDeclaration::Absent,
            Some(wkt) => match srid_from_name(wkt) {
                Some(code) => CrsDeclaration::Epsg(code),
                None => CrsDeclaration::Unrecognized(wkt.to_string()),
            },
        },
    };
    Ok(declaration)
}

/// Determine a file's SRID from its embedded metadata alone.
///
/// GeoJSON without a CRS member is WGS 84 by definition. Returns `None` when the file can't be
/// read or names a CRS we don't recognize.
pub fn detect_file_srid(path: &Path) -> Option<i32> {
    let detect = || -> Result<Option<i32>> {
        let mut reader = BufReader::new(File::open(path)?);
        let declaration = match Format::from_path(path)? {
            Format::GeoJson => match sniff_geojson_crs(&mut reader)? {
                CrsDeclaration::Absent => CrsDeclaration::Epsg(WGS84),
                other => other,
            },
            Format::FlatGeobuf => flatgeobuf_crs(&mut reader)?,
        };
        Ok(declaration.epsg())
    };

    match detect() {
        Ok(srid) => srid,
        Err(err) => {
            log::debug!("CRS detection failed for {}: {err}", path.display());
            None
        }
    }
}
