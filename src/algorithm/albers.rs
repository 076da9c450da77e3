//! Albers equal-area conic on an ellipsoid, the one projection stage not expressed as a
//! [`geodesy`] operator definition.
//!
//! Formulas follow Snyder, "Map Projections: A Working Manual" (USGS PP 1395), chapter 14.

use std::f64::consts::PI;

const MAX_ITERATIONS: usize = 15;
const TOLERANCE: f64 = 1e-12;

/// GRS 80 semi-major axis and flattening.
pub const GRS80: (f64, f64) = (6_378_137.0, 1.0 / 298.257_222_101);

/// Albers equal-area conic with two standard parallels. Angles are in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlbersEqualArea {
    a: f64,
    e: f64,
    lon_0: f64,
    false_easting: f64,
    false_northing: f64,
    n: f64,
    c: f64,
    rho_0: f64,
}

impl AlbersEqualArea {
    /// NAD83 / Conus Albers (EPSG:5070).
    pub fn conus() -> Self {
        Self::new(GRS80, [29.5, 45.5], 23.0, -96.0, 0.0, 0.0)
    }

    pub fn new(
        (a, f): (f64, f64),
        [lat_1, lat_2]: [f64; 2],
        lat_0: f64,
        lon_0: f64,
        false_easting: f64,
        false_northing: f64,
    ) -> Self {
        let e = (f * (2.0 - f)).sqrt();
        let (phi_1, phi_2, phi_0) = (lat_1.to_radians(), lat_2.to_radians(), lat_0.to_radians());

        let m_1 = msfn(phi_1, e);
        let m_2 = msfn(phi_2, e);
        let q_1 = qsfn(phi_1, e);
        let q_2 = qsfn(phi_2, e);
        let q_0 = qsfn(phi_0, e);

        let n = if (phi_1 - phi_2).abs() > TOLERANCE {
            (m_1 * m_1 - m_2 * m_2) / (q_2 - q_1)
        } else {
            phi_1.sin()
        };
        let c = m_1 * m_1 + n * q_1;
        let rho_0 = a * (c - n * q_0).sqrt() / n;

        Self {
            a,
            e,
            lon_0: lon_0.to_radians(),
            false_easting,
            false_northing,
            n,
            c,
            rho_0,
        }
    }

    /// Project longitude/latitude in degrees to metres.
    pub fn forward(&self, lon: f64, lat: f64) -> (f64, f64) {
        let q = qsfn(lat.to_radians(), self.e);
        let rho = self.a * (self.c - self.n * q).max(0.0).sqrt() / self.n;
        let theta = self.n * adjust_lon(lon.to_radians() - self.lon_0);
        (
            self.false_easting + rho * theta.sin(),
            self.false_northing + self.rho_0 - rho * theta.cos(),
        )
    }

    /// Unproject metres to longitude/latitude in degrees.
    pub fn inverse(&self, x: f64, y: f64) -> (f64, f64) {
        let x = x - self.false_easting;
        let y = self.rho_0 - (y - self.false_northing);
        let (rho, theta) = if self.n >= 0.0 {
            (x.hypot(y), x.atan2(y))
        } else {
            (-x.hypot(y), (-x).atan2(-y))
        };

        let q = (self.c - (rho * self.n / self.a).powi(2)) / self.n;
        let lat = authalic_inverse(q, self.e);
        let lon = adjust_lon(theta / self.n + self.lon_0);
        (lon.to_degrees(), lat.to_degrees())
    }
}

/// Snyder (14-15)
fn msfn(phi: f64, e: f64) -> f64 {
    let sin_phi = phi.sin();
    phi.cos() / (1.0 - e * e * sin_phi * sin_phi).sqrt()
}

/// Snyder (3-12)
fn qsfn(phi: f64, e: f64) -> f64 {
    let sin_phi = phi.sin();
    let e_sin = e * sin_phi;
    (1.0 - e * e)
        * (sin_phi / (1.0 - e_sin * e_sin) - (1.0 / (2.0 * e)) * ((1.0 - e_sin) / (1.0 + e_sin)).ln())
}

/// Latitude from the authalic `q`, Snyder (3-16).
fn authalic_inverse(q: f64, e: f64) -> f64 {
    let mut phi = (q / 2.0).clamp(-1.0, 1.0).asin();
    for _ in 0..MAX_ITERATIONS {
        let sin_phi = phi.sin();
        let cos_phi = phi.cos();
        if cos_phi.abs() < TOLERANCE {
            break;
        }
        let e_sin = e * sin_phi;
        let one_minus = 1.0 - e_sin * e_sin;
        let delta = one_minus * one_minus / (2.0 * cos_phi)
            * (q / (1.0 - e * e) - sin_phi / one_minus
                + (1.0 / (2.0 * e)) * ((1.0 - e_sin) / (1.0 + e_sin)).ln());
        phi += delta;
        if delta.abs() < TOLERANCE {
            break;
        }
    }
    phi
}

/// Wrap a longitude in radians to [-π, π].
fn adjust_lon(lon: f64) -> f64 {
    if lon.abs() <= PI {
        lon
    } else {
        lon - (2.0 * PI) * ((lon + PI) / (2.0 * PI)).floor()
    }
}
