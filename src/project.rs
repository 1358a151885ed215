//! WGS84 to UTM forward projection for the exported lines.
//!
//! Only the forward direction is needed (mapped lines are stored in lon/lat
//! and exported once in the site's projected CRS), so this carries the
//! standard transverse-mercator series instead of a native PROJ dependency.
//! The series is good to well under a metre at coastal latitudes.

use anyhow::{anyhow, Result};

use crate::geometry::Coord;

const A: f64 = 6_378_137.0;
const F: f64 = 1.0 / 298.257_223_563;
const K0: f64 = 0.9996;
const FALSE_EASTING: f64 = 500_000.0;
const FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

/// UTM zone for a longitude, 1..=60.
pub fn utm_zone(lon: f64) -> u8 {
    let zone = ((lon + 180.0) / 6.0).floor() as i32 + 1;
    zone.clamp(1, 60) as u8
}

/// EPSG code of the UTM zone covering a point (326xx north, 327xx south).
pub fn utm_epsg_for(lon: f64, lat: f64) -> u32 {
    let base = if lat >= 0.0 { 32_600 } else { 32_700 };
    base + u32::from(utm_zone(lon))
}

/// Decode an EPSG UTM code into (zone, southern hemisphere).
pub fn epsg_to_zone(epsg: u32) -> Option<(u8, bool)> {
    match epsg {
        32_601..=32_660 => Some(((epsg - 32_600) as u8, false)),
        32_701..=32_760 => Some(((epsg - 32_700) as u8, true)),
        _ => None,
    }
}

/// Meridian arc length from the equator (Snyder 3-21).
fn meridian_arc(phi: f64) -> f64 {
    let e2 = F * (2.0 - F);
    let e4 = e2 * e2;
    let e6 = e4 * e2;
    A * ((1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * phi
        - (3.0 * e2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * phi).sin()
        + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * phi).sin()
        - (35.0 * e6 / 3072.0) * (6.0 * phi).sin())
}

/// Forward transverse-mercator projection of one lon/lat point into the
/// given UTM zone. Returns `(easting, northing)` in metres.
pub fn utm_forward(lon: f64, lat: f64, zone: u8, south: bool) -> (f64, f64) {
    let e2 = F * (2.0 - F);
    let ep2 = e2 / (1.0 - e2);
    let lam0 = (f64::from(zone) - 1.0) * 6.0 - 180.0 + 3.0;

    let phi = lat.to_radians();
    let dlam = (lon - lam0).to_radians();
    let sin_phi = phi.sin();
    let cos_phi = phi.cos();
    let tan_phi = phi.tan();

    let n = A / (1.0 - e2 * sin_phi * sin_phi).sqrt();
    let t = tan_phi * tan_phi;
    let c = ep2 * cos_phi * cos_phi;
    let a = dlam * cos_phi;

    let easting = K0
        * n
        * (a + (1.0 - t + c) * a.powi(3) / 6.0
            + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * ep2) * a.powi(5) / 120.0)
        + FALSE_EASTING;

    let mut northing = K0
        * (meridian_arc(phi)
            + n * tan_phi
                * (a * a / 2.0
                    + (5.0 - t + 9.0 * c + 4.0 * c * c) * a.powi(4) / 24.0
                    + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * ep2) * a.powi(6) / 720.0));
    if south {
        northing += FALSE_NORTHING_SOUTH;
    }
    (easting, northing)
}

/// Project a lon/lat polyline into the CRS named by a UTM EPSG code.
pub fn project_line(line: &[Coord], epsg: u32) -> Result<Vec<Coord>> {
    let (zone, south) =
        epsg_to_zone(epsg).ok_or(anyhow!("EPSG:{epsg} is not a UTM code"))?;
    Ok(line
        .iter()
        .map(|c| {
            let (e, n) = utm_forward(c[0], c[1], zone, south);
            [e, n]
        })
        .collect())
}
