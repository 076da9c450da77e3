//! The EPSG codes reprojection understands without PROJ, and how each is reached from
//! geographic longitude/latitude.
//!
//! Conic, Mercator and UTM systems are [`geodesy`] operator definitions. Datum shifts are not
//! modelled, so NAD83 and WGS 84 coordinates are treated as interchangeable.

use crate::algorithm::albers::AlbersEqualArea;
use crate::error::{ClipError, Result};

/// How a coordinate system relates to geographic longitude/latitude.
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    /// Longitude/latitude in degrees.
    Geographic,
    /// A [`geodesy`] operator taking geographic radians forward to metres.
    Geodesy(String),
    Albers(AlbersEqualArea),
}

impl Projection {
    /// Look up the projection of an EPSG code.
    pub fn from_epsg(srid: i32) -> Result<Self> {
        let projection = match srid {
            // WGS 84, NAD83, NAD83(CSRS)
            4326 | 4269 | 4617 => Projection::Geographic,
            3857 | 900913 => Projection::Geodesy("webmerc ellps=WGS84".to_string()),
            // NAD83 / Conus Albers
            5070 => Projection::Albers(AlbersEqualArea::conus()),
            // NAD83 / Statistics Canada Lambert
            3347 => Projection::Geodesy(
                "lcc ellps=GRS80 lat_1=49 lat_2=77 lat_0=63.390675 lon_0=-91.86666666666667 \
                 x_0=6200000 y_0=3000000"
                    .to_string(),
            ),
            // NAD83 / Canada Atlas Lambert
            3978 => Projection::Geodesy(
                "lcc ellps=GRS80 lat_1=49 lat_2=77 lat_0=49 lon_0=-95 x_0=0 y_0=0".to_string(),
            ),
            // NAD83 / UTM zones 1N to 23N
            26901..=26923 => Projection::Geodesy(format!("utm zone={} ellps=GRS80", srid - 26900)),
            // WGS 84 / UTM northern zones
            32601..=32660 => Projection::Geodesy(format!("utm zone={} ellps=WGS84", srid - 32600)),
            other => return Err(ClipError::UnsupportedCrs(other)),
        };
        Ok(projection)
    }

    pub fn is_geographic(&self) -> bool {
        matches!(self, Projection::Geographic)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn catalogue() {
        assert!(Projection::from_epsg(4269).unwrap().is_geographic());
        assert_eq!(
            Projection::from_epsg(32617).unwrap(),
            Projection::Geodesy("utm zone=17 ellps=WGS84".to_string())
        );
        assert_eq!(
            Projection::from_epsg(26918).unwrap(),
            Projection::Geodesy("utm zone=18 ellps=GRS80".to_string())
        );
        assert!(matches!(
            Projection::from_epsg(5070),
            Ok(Projection::Albers(_))
        ));
    }

    #[test]
    fn unknown_code() {
        for code in [2154, 27700, 32717] {
            assert!(matches!(
                Projection::from_epsg(code),
                Err(ClipError::UnsupportedCrs(c)) if c == code
            ));
        }
    }
}
