//! Geographic and geomagnetic coordinate types.
use serde::{Deserialize, Serialize};

use crate::errors::AnalysisError;

/// Mean Earth radius, in kilometers.
pub const EARTH_RADIUS_KM: f64 = 6371.2;

/// Kilometers per degree of great circle arc at the surface.
pub const KM_PER_DEGREE: f64 = 111.0;

/// Geographic position in the geodetic (rotational) frame.
/// Construction validates physical bounds.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeographicCoordinates {
    /// Longitude in decimal degrees, [-180, +180]
    pub longitude: f64,
    /// Latitude in decimal degrees, [-90, +90]
    pub latitude: f64,
    /// Altitude above mean sea level, in km (non negative)
    pub altitude: f64,
}

impl GeographicCoordinates {
    /// Builds new [GeographicCoordinates], validating physical bounds.
    pub fn new(longitude: f64, latitude: f64, altitude: f64) -> Result<Self, AnalysisError> {
        if !(-180.0..=180.0).contains(&longitude) || longitude.is_nan() {
            return Err(AnalysisError::validation(format!(
                "invalid longitude: {} (expecting [-180, +180])",
                longitude
            )));
        }
        if !(-90.0..=90.0).contains(&latitude) || latitude.is_nan() {
            return Err(AnalysisError::validation(format!(
                "invalid latitude: {} (expecting [-90, +90])",
                latitude
            )));
        }
        if !(altitude >= 0.0) {
            return Err(AnalysisError::validation(format!(
                "invalid altitude: {} (expecting >= 0 km)",
                altitude
            )));
        }
        Ok(Self {
            longitude,
            latitude,
            altitude,
        })
    }
    /// Great circle distance to another position (haversine), in km.
    /// Altitude is not accounted for.
    pub fn great_circle_km(&self, rhs: &Self) -> f64 {
        let (lat1, lon1) = (self.latitude.to_radians(), self.longitude.to_radians());
        let (lat2, lon2) = (rhs.latitude.to_radians(), rhs.longitude.to_radians());
        let (dlat, dlon) = (lat2 - lat1, lon2 - lon1);
        let a = (dlat / 2.0).sin().powi(2)
            + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        EARTH_RADIUS_KM * 2.0 * a.sqrt().asin()
    }
    /// Geocentric radius of this position, in km.
    pub fn geocentric_radius_km(&self) -> f64 {
        EARTH_RADIUS_KM + self.altitude
    }
}

impl std::fmt::Display for GeographicCoordinates {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "(lon={:.4}°, lat={:.4}°, alt={:.1} km)",
            self.longitude, self.latitude, self.altitude
        )
    }
}

/// Position in the tilted dipole (geomagnetic) frame.
/// Never built directly: always derived by the
/// [crate::igrf::CoordinateTransformer].
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeomagneticCoordinates {
    /// Magnetic longitude in decimal degrees, [-180, +180]
    pub magnetic_longitude: f64,
    /// Magnetic latitude in decimal degrees, [-90, +90]
    pub magnetic_latitude: f64,
    /// L-shell: field line label, in Earth radii (>= 1)
    pub l_shell: f64,
    /// Magnetic local time, in hours [0, 24)
    pub magnetic_local_time: f64,
    /// Altitude carried through the transformation, in km.
    /// Preserved so the inverse rotation is exact.
    pub altitude: f64,
}

/// Geographic bounding box, the analysis request domain.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeographicRegion {
    pub longitude_min: f64,
    pub longitude_max: f64,
    pub latitude_min: f64,
    pub latitude_max: f64,
    /// Low altitude bound, in km
    pub altitude_min: f64,
    /// High altitude bound, in km
    pub altitude_max: f64,
}

impl GeographicRegion {
    /// Builds a new [GeographicRegion], validating both individual
    /// bounds and min < max per axis.
    pub fn new(
        longitude_min: f64,
        longitude_max: f64,
        latitude_min: f64,
        latitude_max: f64,
        altitude_min: f64,
        altitude_max: f64,
    ) -> Result<Self, AnalysisError> {
        // corner validation catches all individual bound errors
        let _ = GeographicCoordinates::new(longitude_min, latitude_min, altitude_min)?;
        let _ = GeographicCoordinates::new(longitude_max, latitude_max, altitude_max)?;
        if longitude_max <= longitude_min {
            return Err(AnalysisError::validation(
                "longitude_max must be greater than longitude_min",
            ));
        }
        if latitude_max <= latitude_min {
            return Err(AnalysisError::validation(
                "latitude_max must be greater than latitude_min",
            ));
        }
        if altitude_max <= altitude_min {
            return Err(AnalysisError::validation(
                "altitude_max must be greater than altitude_min",
            ));
        }
        Ok(Self {
            longitude_min,
            longitude_max,
            latitude_min,
            latitude_max,
            altitude_min,
            altitude_max,
        })
    }
    /// Returns true if given position lies inside this region (inclusive).
    pub fn contains(&self, c: &GeographicCoordinates) -> bool {
        self.longitude_min <= c.longitude
            && c.longitude <= self.longitude_max
            && self.latitude_min <= c.latitude
            && c.latitude <= self.latitude_max
            && self.altitude_min <= c.altitude
            && c.altitude <= self.altitude_max
    }
    /// Approximate horizontal area, in km².
    pub fn area_km2(&self) -> f64 {
        let lat_span = (self.latitude_max - self.latitude_min).to_radians();
        let lon_span = (self.longitude_max - self.longitude_min).to_radians();
        let mid_lat = ((self.latitude_max + self.latitude_min) / 2.0).to_radians();
        EARTH_RADIUS_KM.powi(2) * lat_span * lon_span * mid_lat.cos()
    }
    /// Region center.
    pub fn center(&self) -> GeographicCoordinates {
        GeographicCoordinates {
            longitude: (self.longitude_min + self.longitude_max) / 2.0,
            latitude: (self.latitude_min + self.latitude_max) / 2.0,
            altitude: (self.altitude_min + self.altitude_max) / 2.0,
        }
    }
}

impl std::fmt::Display for GeographicRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "[{:.2}..{:.2}°E x {:.2}..{:.2}°N x {:.0}..{:.0} km]",
            self.longitude_min,
            self.longitude_max,
            self.latitude_min,
            self.latitude_max,
            self.altitude_min,
            self.altitude_max
        )
    }
}

/// Spatial extent of a detected phenomenon.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialBounds {
    /// East-west span, in decimal degrees
    pub longitude_span: f64,
    /// North-south span, in decimal degrees
    pub latitude_span: f64,
    /// Vertical span, in km
    pub altitude_span: f64,
    /// Characteristic (half diagonal) length, in km
    pub characteristic_length: f64,
}

impl SpatialBounds {
    /// Builds [SpatialBounds] from per-axis spans, in degrees and km.
    pub fn from_spans(lon_span: f64, lat_span: f64, alt_span: f64) -> Self {
        let characteristic_length =
            (lon_span.powi(2) + lat_span.powi(2)).sqrt() / 2.0 * KM_PER_DEGREE;
        Self {
            longitude_span: lon_span,
            latitude_span: lat_span,
            altitude_span: alt_span,
            characteristic_length,
        }
    }
    /// Builds [SpatialBounds] covering an entire [GeographicRegion].
    pub fn from_region(region: &GeographicRegion) -> Self {
        Self::from_spans(
            region.longitude_max - region.longitude_min,
            region.latitude_max - region.latitude_min,
            region.altitude_max - region.altitude_min,
        )
    }
}
