//! Geodetic utilities consumed by the residual builder and state manager:
//! `ecef2pos`, `pos2ecef`, `ecef2enu`, `cov2ecef`.

use map_3d::Ellipsoid;
use nalgebra::{Matrix3, Vector3};

/// Geodetic coordinates, latitude/longitude in radians, altitude in meters.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GeodeticPos {
    pub lat_rad: f64,
    pub lon_rad: f64,
    pub alt_m: f64,
}

/// ECEF -> geodetic (WGS84), grounded on `apriori.rs`'s `AprioriPosition::from_ecef`.
pub fn ecef2pos(ecef: Vector3<f64>) -> GeodeticPos {
    let (lat, lon, alt) = map_3d::ecef2geodetic(ecef.x, ecef.y, ecef.z, Ellipsoid::WGS84);
    GeodeticPos {
        lat_rad: lat,
        lon_rad: lon,
        alt_m: alt,
    }
}

/// Geodetic (WGS84) -> ECEF, grounded on `apriori.rs`'s `AprioriPosition::from_geo`.
pub fn pos2ecef(pos: GeodeticPos) -> Vector3<f64> {
    let (x, y, z) = map_3d::geodetic2ecef(pos.lat_rad, pos.lon_rad, pos.alt_m, Ellipsoid::WGS84);
    Vector3::new(x, y, z)
}

/// Rotation matrix from ECEF to local ENU axes at `pos`. Row 0 = East,
/// row 1 = North, row 2 = Up: `enu = R * ecef_delta`.
pub fn ecef2enu_rotation(pos: GeodeticPos) -> Matrix3<f64> {
    let (sin_lat, cos_lat) = pos.lat_rad.sin_cos();
    let (sin_lon, cos_lon) = pos.lon_rad.sin_cos();
    Matrix3::new(
        -sin_lon,
        cos_lon,
        0.0,
        -sin_lat * cos_lon,
        -sin_lat * sin_lon,
        cos_lat,
        cos_lat * cos_lon,
        cos_lat * sin_lon,
        sin_lat,
    )
}

/// Converts an ECEF position delta into local ENU components at `origin`.
pub fn ecef2enu(origin: GeodeticPos, delta_ecef: Vector3<f64>) -> Vector3<f64> {
    ecef2enu_rotation(origin) * delta_ecef
}

/// Rotates a 3x3 ENU covariance block into ECEF, at `pos`. Used when adding
/// horizontal/vertical process noise to the acceleration block.
pub fn cov2ecef(pos: GeodeticPos, enu_cov: Matrix3<f64>) -> Matrix3<f64> {
    let r = ecef2enu_rotation(pos);
    let r_t = r.transpose();
    r_t * enu_cov * r
}

/// Azimuth/elevation of `other` as seen from `origin`, both ECEF, in radians.
pub fn azimuth_elevation(origin: Vector3<f64>, other: Vector3<f64>) -> (f64, f64) {
    let pos = ecef2pos(origin);
    let enu = ecef2enu(pos, other - origin);
    let (e, n, u) = (enu.x, enu.y, enu.z);
    let horiz = (e * e + n * n).sqrt();
    let az = e.atan2(n);
    let az = if az < 0.0 { az + std::f64::consts::TAU } else { az };
    let el = u.atan2(horiz);
    (az, el)
}
