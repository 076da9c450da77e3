//! Conversion between [`geo`] geometries and ISO well-known binary.

use geo::Geometry;
use geozero::wkb::Wkb;
use geozero::{CoordDimensions, ToGeo, ToWkb};

use crate::error::Result;

/// Encode a geometry as 2D ISO WKB.
pub fn geometry_to_wkb(geometry: &Geometry) -> Result<Vec<u8>> {
    Ok(geometry.to_wkb(CoordDimensions::xy())?)
}

/// Decode ISO WKB (or EWKB; the SRID is ignored) into a geometry.
pub fn wkb_to_geometry(wkb: &[u8]) -> Result<Geometry> {
    Ok(Wkb(wkb.to_vec()).to_geo()?)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test::square;

    #[test]
    fn polygon_through_wkb() {
        let polygon = square(-75.5, 45.25, 0.5);
        let wkb = geometry_to_wkb(&polygon).unwrap();
        // Little-endian ISO polygon header
        assert_eq!(&wkb[..5], &[1, 3, 0, 0, 0]);
        assert_eq!(wkb_to_geometry(&wkb).unwrap(), polygon);
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(wkb_to_geometry(&[1, 2, 3]).is_err());
    }
}
