//! Geodetic to local tangent-plane (East-North-Up) projection.
//!
//! WGS-84 ellipsoid, anchored at an origin that is either fixed at
//! construction or latched to the first fix projected. The origin is set at
//! most once per process lifetime; re-anchoring is not supported.

use log::warn;
use nalgebra::Vector3;

const WGS84_A: f64 = 6_378_137.0;
const WGS84_F: f64 = 1.0 / 298.257_223_563;

#[derive(Clone, Copy, Debug)]
struct Origin {
    ecef: Vector3<f64>,
    east: Vector3<f64>,
    north: Vector3<f64>,
    up: Vector3<f64>,
}

#[derive(Clone, Debug, Default)]
pub struct EnuProjector {
    origin: Option<Origin>,
}

impl EnuProjector {
    /// Projector that latches its origin to the first fix projected.
    pub fn new() -> Self {
        Self { origin: None }
    }

    /// Projector with a fixed origin.
    pub fn with_origin(latitude: f64, longitude: f64, altitude: f64) -> Self {
        let mut p = Self::new();
        p.set_origin(latitude, longitude, altitude);
        p
    }

    pub fn has_origin(&self) -> bool {
        self.origin.is_some()
    }

    /// Anchors the tangent plane. A second call is ignored; the origin never
    /// moves once set.
    pub fn set_origin(&mut self, latitude: f64, longitude: f64, altitude: f64) {
        if self.origin.is_some() {
            warn!("ENU origin already set; ignoring re-anchor request");
            return;
        }
        let lat = latitude.to_radians();
        let lon = longitude.to_radians();
        let (sin_lat, cos_lat) = lat.sin_cos();
        let (sin_lon, cos_lon) = lon.sin_cos();
        self.origin = Some(Origin {
            ecef: geodetic_to_ecef(latitude, longitude, altitude),
            east: Vector3::new(-sin_lon, cos_lon, 0.0),
            north: Vector3::new(-sin_lat * cos_lon, -sin_lat * sin_lon, cos_lat),
            up: Vector3::new(cos_lat * cos_lon, cos_lat * sin_lon, sin_lat),
        });
    }

    /// Projects a geodetic point into the local tangent plane. The first call
    /// on an un-anchored projector sets the origin and returns zero.
    pub fn forward(&mut self, latitude: f64, longitude: f64, altitude: f64) -> Vector3<f64> {
        if self.origin.is_none() {
            self.set_origin(latitude, longitude, altitude);
        }
        let origin = self.origin.expect("origin set above");
        let d = geodetic_to_ecef(latitude, longitude, altitude) - origin.ecef;
        Vector3::new(origin.east.dot(&d), origin.north.dot(&d), origin.up.dot(&d))
    }
}

fn geodetic_to_ecef(latitude: f64, longitude: f64, altitude: f64) -> Vector3<f64> {
    let e2 = WGS84_F * (2.0 - WGS84_F);
    let lat = latitude.to_radians();
    let lon = longitude.to_radians();
    let (sin_lat, cos_lat) = lat.sin_cos();
    let (sin_lon, cos_lon) = lon.sin_cos();
    let n = WGS84_A / (1.0 - e2 * sin_lat * sin_lat).sqrt();
    Vector3::new(
        (n + altitude) * cos_lat * cos_lon,
        (n + altitude) * cos_lat * sin_lon,
        (n * (1.0 - e2) + altitude) * sin_lat,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_forward_at_fixed_origin_is_zero() {
        let mut p = EnuProjector::with_origin(33.7756, -84.3963, 290.0);
        let enu = p.forward(33.7756, -84.3963, 290.0);
        assert_eq!(enu, Vector3::zeros());
    }

    #[test]
    fn test_first_fix_latches_origin_and_is_zero() {
        let mut p = EnuProjector::new();
        assert!(!p.has_origin());
        let enu = p.forward(48.8566, 2.3522, 35.0);
        assert!(p.has_origin());
        assert_eq!(enu, Vector3::zeros());
        // Same point again still projects to zero.
        assert_eq!(p.forward(48.8566, 2.3522, 35.0), Vector3::zeros());
    }

    #[test]
    fn test_reanchor_is_ignored() {
        let mut p = EnuProjector::with_origin(33.0, -84.0, 0.0);
        p.set_origin(34.0, -85.0, 100.0);
        assert_eq!(p.forward(33.0, -84.0, 0.0), Vector3::zeros());
    }

    #[test]
    fn test_axes_point_east_north_up() {
        let mut p = EnuProjector::with_origin(33.7756, -84.3963, 290.0);
        // ~1e-4 deg of latitude is ~11.1 m north.
        let north = p.forward(33.7757, -84.3963, 290.0);
        assert!(north.y > 10.0 && north.y < 12.5);
        assert!(north.x.abs() < 0.1);

        let east = p.forward(33.7756, -84.3962, 290.0);
        assert!(east.x > 8.0 && east.x < 10.5);
        assert!(east.y.abs() < 0.1);

        let up = p.forward(33.7756, -84.3963, 300.0);
        assert_relative_eq!(up.z, 10.0, epsilon = 1e-3);
        assert!(up.x.abs() < 1e-6 && up.y.abs() < 1e-6);
    }
}
