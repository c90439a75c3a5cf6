//! IGRF-13 geomagnetic model: coefficient table and the
//! geographic <-> geomagnetic coordinate transformer.
use hifitime::Epoch;
use lazy_static::lazy_static;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    coords::{GeographicCoordinates, GeomagneticCoordinates, EARTH_RADIUS_KM},
    epoch::{decimal_year, utc_hours},
    errors::AnalysisError,
};

/// Highest spherical harmonic degree the coefficient storage supports.
pub const MAX_DEGREE: usize = 13;

/// Altitude ceiling of the trapped particle model coverage, in km.
pub const MAX_ALTITUDE_KM: f64 = 60_000.0;

/// One spherical harmonic coefficient pair (Gauss, in nT)
/// with its secular variation (nT/year).
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarmonicCoefficient {
    /// Degree, 1..=13
    pub n: u8,
    /// Order, 0..=n
    pub m: u8,
    /// g_n^m at the base epoch, in nT
    pub g: f64,
    /// h_n^m at the base epoch, in nT
    pub h: f64,
    /// dg/dt, in nT/year
    pub g_sv: f64,
    /// dh/dt, in nT/year
    pub h_sv: f64,
}

/// Immutable spherical harmonic coefficient table with its validity
/// window. Loaded once, never mutated: a pure read-only configuration
/// injected into every transformer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IgrfModel {
    /// Model name, e.g. "IGRF-13"
    pub name: String,
    /// Base epoch of the main field coefficients, as a decimal year
    pub base_year: f64,
    /// Validity window start
    pub valid_from: Epoch,
    /// Validity window end
    pub valid_until: Epoch,
    /// Main field + secular variation coefficients, degree <= [MAX_DEGREE]
    pub coefficients: Vec<HarmonicCoefficient>,
}

impl IgrfModel {
    /// Builds a model from a coefficient set, rejecting degrees
    /// beyond [MAX_DEGREE].
    pub fn new(
        name: &str,
        base_year: f64,
        valid_from: Epoch,
        valid_until: Epoch,
        coefficients: Vec<HarmonicCoefficient>,
    ) -> Result<Self, AnalysisError> {
        for c in &coefficients {
            if c.n == 0 || c.n as usize > MAX_DEGREE || c.m > c.n {
                return Err(AnalysisError::validation(format!(
                    "invalid harmonic coefficient (n={}, m={})",
                    c.n, c.m
                )));
            }
        }
        Ok(Self {
            name: name.to_string(),
            base_year,
            valid_from,
            valid_until,
            coefficients,
        })
    }
    /// Built-in IGRF-13 dipole terms (g1^0, g1^1, h1^1) with their
    /// secular variation, base epoch 2020.0.
    pub fn igrf13() -> Self {
        Self {
            name: "IGRF-13".to_string(),
            base_year: 2020.0,
            valid_from: Epoch::from_gregorian_utc_at_midnight(1900, 1, 1),
            valid_until: Epoch::from_gregorian_utc(2030, 12, 31, 23, 59, 59, 0),
            coefficients: vec![
                HarmonicCoefficient {
                    n: 1,
                    m: 0,
                    g: -29442.0,
                    h: 0.0,
                    g_sv: 7.7,
                    h_sv: 0.0,
                },
                HarmonicCoefficient {
                    n: 1,
                    m: 1,
                    g: -1450.7,
                    h: 4652.9,
                    g_sv: 7.4,
                    h_sv: -25.1,
                },
            ],
        }
    }
    /// Returns true if given epoch falls inside the validity window.
    pub fn covers(&self, epoch: Epoch) -> bool {
        self.valid_from <= epoch && epoch <= self.valid_until
    }
    /// (g_n^m, h_n^m) propagated to the requested epoch by linear
    /// secular variation, in nT.
    pub fn coefficients_at(&self, n: u8, m: u8, epoch: Epoch) -> Option<(f64, f64)> {
        let dt = decimal_year(epoch) - self.base_year;
        self.coefficients
            .iter()
            .find(|c| c.n == n && c.m == m)
            .map(|c| (c.g + c.g_sv * dt, c.h + c.h_sv * dt))
    }
    fn validate_epoch(&self, epoch: Epoch) -> Result<(), AnalysisError> {
        if !self.covers(epoch) {
            return Err(AnalysisError::OutOfRange {
                what: "epoch",
                value: decimal_year(epoch),
                min: decimal_year(self.valid_from),
                max: decimal_year(self.valid_until),
            });
        }
        Ok(())
    }
}

/// Versioned coefficient supplier: maps an epoch to the coefficient
/// set covering it. External providers implement this to serve
/// several model generations side by side.
pub trait GeomagneticModelPort: Send + Sync {
    /// Returns the coefficient set covering given epoch,
    /// [AnalysisError::OutOfRange] when none does.
    fn coefficient_set(&self, epoch: Epoch) -> Result<&IgrfModel, AnalysisError>;
}

impl GeomagneticModelPort for IgrfModel {
    fn coefficient_set(&self, epoch: Epoch) -> Result<&IgrfModel, AnalysisError> {
        self.validate_epoch(epoch)?;
        Ok(self)
    }
}

lazy_static! {
    /// Process wide read-only IGRF-13 table.
    pub static ref IGRF13: IgrfModel = IgrfModel::igrf13();
}

/// Geomagnetic field vector at a position, dipole approximation.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldComponents {
    /// Northward component, in nT
    pub b_north: f64,
    /// Eastward component, in nT
    pub b_east: f64,
    /// Downward component, in nT
    pub b_down: f64,
    /// Total field strength, in nT
    pub b_total: f64,
    /// Magnetic inclination (dip), in degrees
    pub inclination: f64,
    /// Magnetic declination, in degrees
    pub declination: f64,
}

/// Geographic <-> geomagnetic transformer around an immutable
/// coefficient table. Pure: identical inputs always produce
/// identical outputs.
#[derive(Debug, Clone)]
pub struct CoordinateTransformer<'a> {
    model: &'a IgrfModel,
}

impl Default for CoordinateTransformer<'static> {
    fn default() -> Self {
        Self { model: &IGRF13 }
    }
}

impl<'a> CoordinateTransformer<'a> {
    /// Builds a transformer around given coefficient table.
    pub fn new(model: &'a IgrfModel) -> Self {
        Self { model }
    }
    /// Dipole axis (pole colatitude and east longitude, radians)
    /// derived from the g1^0, g1^1, h1^1 terms at given epoch.
    fn dipole_axis(&self, epoch: Epoch) -> Result<(f64, f64), AnalysisError> {
        let (g10, _) = self
            .model
            .coefficients_at(1, 0, epoch)
            .ok_or_else(|| AnalysisError::validation("coefficient table misses g1^0"))?;
        let (g11, h11) = self
            .model
            .coefficients_at(1, 1, epoch)
            .ok_or_else(|| AnalysisError::validation("coefficient table misses g1^1/h1^1"))?;
        let b0 = (g10.powi(2) + g11.powi(2) + h11.powi(2)).sqrt();
        let colat = (-g10 / b0).clamp(-1.0, 1.0).acos();
        let lon = (-h11).atan2(-g11);
        Ok((colat, lon))
    }
    /// Geographic position of the boreal dipole pole at given epoch.
    pub fn dipole_pole(&self, epoch: Epoch) -> Result<GeographicCoordinates, AnalysisError> {
        self.model.validate_epoch(epoch)?;
        let (colat, lon) = self.dipole_axis(epoch)?;
        GeographicCoordinates::new(lon.to_degrees(), 90.0 - colat.to_degrees(), 0.0)
    }
    /// Converts geographic coordinates into the tilted dipole frame.
    /// Fails with [AnalysisError::OutOfRange] when the epoch or the
    /// altitude lies outside the model coverage.
    pub fn to_geomagnetic(
        &self,
        coords: &GeographicCoordinates,
        epoch: Epoch,
    ) -> Result<GeomagneticCoordinates, AnalysisError> {
        self.model.validate_epoch(epoch)?;
        if coords.altitude > MAX_ALTITUDE_KM {
            return Err(AnalysisError::OutOfRange {
                what: "altitude",
                value: coords.altitude,
                min: 0.0,
                max: MAX_ALTITUDE_KM,
            });
        }
        let (pole_colat, pole_lon) = self.dipole_axis(epoch)?;
        let (x, y, z) = unit_vector(coords.latitude.to_radians(), coords.longitude.to_radians());
        let (x, y, z) = rotate_into_dipole(x, y, z, pole_colat, pole_lon);
        let magnetic_latitude = z.clamp(-1.0, 1.0).asin().to_degrees();
        let magnetic_longitude = y.atan2(x).to_degrees();
        let l_shell = l_shell(coords.geocentric_radius_km(), magnetic_latitude);
        let magnetic_local_time =
            self.magnetic_local_time_from(magnetic_longitude, epoch, pole_colat, pole_lon);
        debug!(
            "{} -> maglat {:.3}°, maglon {:.3}°, L={:.2}",
            coords, magnetic_latitude, magnetic_longitude, l_shell
        );
        Ok(GeomagneticCoordinates {
            magnetic_longitude,
            magnetic_latitude,
            l_shell,
            magnetic_local_time,
            altitude: coords.altitude,
        })
    }
    /// Inverse transformation: recovers geographic coordinates from
    /// the tilted dipole frame. Exact inverse of [Self::to_geomagnetic]
    /// (the rotation is orthonormal and altitude is carried through).
    pub fn to_geographic(
        &self,
        coords: &GeomagneticCoordinates,
        epoch: Epoch,
    ) -> Result<GeographicCoordinates, AnalysisError> {
        self.model.validate_epoch(epoch)?;
        let (pole_colat, pole_lon) = self.dipole_axis(epoch)?;
        let (x, y, z) = unit_vector(
            coords.magnetic_latitude.to_radians(),
            coords.magnetic_longitude.to_radians(),
        );
        let (x, y, z) = rotate_from_dipole(x, y, z, pole_colat, pole_lon);
        let latitude = z.clamp(-1.0, 1.0).asin().to_degrees();
        let longitude = y.atan2(x).to_degrees();
        GeographicCoordinates::new(longitude, latitude, coords.altitude)
    }
    /// Magnetic local time at given position, in hours [0, 24).
    pub fn magnetic_local_time(
        &self,
        coords: &GeographicCoordinates,
        epoch: Epoch,
    ) -> Result<f64, AnalysisError> {
        Ok(self.to_geomagnetic(coords, epoch)?.magnetic_local_time)
    }
    /// MLT from the hour angle between given magnetic longitude and
    /// the subsolar point's magnetic longitude.
    fn magnetic_local_time_from(
        &self,
        magnetic_longitude: f64,
        epoch: Epoch,
        pole_colat: f64,
        pole_lon: f64,
    ) -> f64 {
        // subsolar point: noon meridian, on the equator
        let subsolar_lon = (180.0 - 15.0 * utc_hours(epoch)).to_radians();
        let (x, y, z) = unit_vector(0.0, subsolar_lon);
        let (x, y, _) = rotate_into_dipole(x, y, z, pole_colat, pole_lon);
        let subsolar_maglon = y.atan2(x).to_degrees();
        ((magnetic_longitude - subsolar_maglon) / 15.0 + 12.0).rem_euclid(24.0)
    }
    /// Tilted dipole approximation of the local field vector: the
    /// centered dipole built from g1^0, g1^1, h1^1, evaluated in the
    /// dipole frame and rotated back into local north/east/down.
    pub fn field_components(
        &self,
        coords: &GeographicCoordinates,
        epoch: Epoch,
    ) -> Result<FieldComponents, AnalysisError> {
        self.model.validate_epoch(epoch)?;
        let (g10, _) = self
            .model
            .coefficients_at(1, 0, epoch)
            .ok_or_else(|| AnalysisError::validation("coefficient table misses g1^0"))?;
        let (g11, h11) = self
            .model
            .coefficients_at(1, 1, epoch)
            .ok_or_else(|| AnalysisError::validation("coefficient table misses g1^1/h1^1"))?;
        let b0 = (g10.powi(2) + g11.powi(2) + h11.powi(2)).sqrt();
        let (pole_colat, pole_lon) = self.dipole_axis(epoch)?;
        let r = coords.geocentric_radius_km();
        let ratio = (EARTH_RADIUS_KM / r).powi(3);

        let (lat, lon) = (coords.latitude.to_radians(), coords.longitude.to_radians());
        let (ux, uy, uz) = unit_vector(lat, lon);
        let (dx, dy, dz) = rotate_into_dipole(ux, uy, uz, pole_colat, pole_lon);
        let theta_m = dz.clamp(-1.0, 1.0).acos();
        let phi_m = dy.atan2(dx);

        // dipole field in the dipole frame; B0 points along -z
        let b_r = -2.0 * b0 * ratio * theta_m.cos();
        let b_theta = -b0 * ratio * theta_m.sin();
        let (sin_t, cos_t) = theta_m.sin_cos();
        let (sin_p, cos_p) = phi_m.sin_cos();
        let bx = b_r * sin_t * cos_p + b_theta * cos_t * cos_p;
        let by = b_r * sin_t * sin_p + b_theta * cos_t * sin_p;
        let bz = b_r * cos_t - b_theta * sin_t;
        let (bx, by, bz) = rotate_from_dipole(bx, by, bz, pole_colat, pole_lon);

        // project onto the local geographic axes
        let (sin_lat, cos_lat) = lat.sin_cos();
        let (sin_lon, cos_lon) = lon.sin_cos();
        let b_north = -sin_lat * cos_lon * bx - sin_lat * sin_lon * by + cos_lat * bz;
        let b_east = -sin_lon * bx + cos_lon * by;
        let b_down = -(cos_lat * cos_lon * bx + cos_lat * sin_lon * by + sin_lat * bz);
        let b_total = (b_north.powi(2) + b_east.powi(2) + b_down.powi(2)).sqrt();
        Ok(FieldComponents {
            b_north,
            b_east,
            b_down,
            b_total,
            inclination: b_down.atan2((b_north.powi(2) + b_east.powi(2)).sqrt()).to_degrees(),
            declination: b_east.atan2(b_north).to_degrees(),
        })
    }
}

/// Unit vector from (latitude, longitude), both in radians.
fn unit_vector(lat: f64, lon: f64) -> (f64, f64, f64) {
    (lat.cos() * lon.cos(), lat.cos() * lon.sin(), lat.sin())
}

/*
 * Frame rotation: Rz(pole_lon) brings the pole meridian to x-z,
 * then Ry(pole_colat) brings the dipole axis onto +z.
 */
fn rotate_into_dipole(
    x: f64,
    y: f64,
    z: f64,
    pole_colat: f64,
    pole_lon: f64,
) -> (f64, f64, f64) {
    let (sin_l, cos_l) = pole_lon.sin_cos();
    let (x1, y1, z1) = (cos_l * x + sin_l * y, -sin_l * x + cos_l * y, z);
    let (sin_t, cos_t) = pole_colat.sin_cos();
    (cos_t * x1 - sin_t * z1, y1, sin_t * x1 + cos_t * z1)
}

/// Exact inverse of [rotate_into_dipole].
fn rotate_from_dipole(
    x: f64,
    y: f64,
    z: f64,
    pole_colat: f64,
    pole_lon: f64,
) -> (f64, f64, f64) {
    let (sin_t, cos_t) = pole_colat.sin_cos();
    let (x1, y1, z1) = (cos_t * x + sin_t * z, y, -sin_t * x + cos_t * z);
    let (sin_l, cos_l) = pole_lon.sin_cos();
    (cos_l * x1 - sin_l * y1, sin_l * x1 + cos_l * y1, z1)
}

/// Dipole L-shell from geocentric radius and magnetic latitude.
/// Clamped to >= 1 and capped near the poles where cos² diverges.
fn l_shell(radius_km: f64, magnetic_latitude: f64) -> f64 {
    let cos_maglat = magnetic_latitude.to_radians().cos();
    if cos_maglat.abs() < 0.01 {
        return 100.0;
    }
    ((radius_km / EARTH_RADIUS_KM) / cos_maglat.powi(2)).max(1.0)
}

#[cfg(test)]
mod test {
    use super::*;
    use hifitime::Epoch;

    fn t0() -> Epoch {
        Epoch::from_gregorian_utc_at_midnight(2024, 6, 1)
    }

    #[test]
    fn dipole_pole_position() {
        let transformer = CoordinateTransformer::default();
        let pole = transformer.dipole_pole(t0()).unwrap();
        // geomagnetic (dipole) north pole, roughly 80.7°N 72.7°W
        assert!(pole.latitude > 78.0 && pole.latitude < 84.0);
        assert!(pole.longitude > -80.0 && pole.longitude < -65.0);
    }
    #[test]
    fn roundtrip_recovery() {
        let transformer = CoordinateTransformer::default();
        let epoch = t0();
        for (lon, lat, alt) in [
            (-45.0, -20.0, 500.0),
            (0.0, 0.0, 0.0),
            (120.0, 65.0, 850.0),
            (-170.0, -75.0, 100.0),
        ] {
            let geo = GeographicCoordinates::new(lon, lat, alt).unwrap();
            let mag = transformer.to_geomagnetic(&geo, epoch).unwrap();
            let back = transformer.to_geographic(&mag, epoch).unwrap();
            assert!(
                (back.longitude - lon).abs() < 1e-6,
                "longitude drift: {} vs {}",
                back.longitude,
                lon
            );
            assert!((back.latitude - lat).abs() < 1e-6);
            assert!((back.altitude - alt).abs() < 1e-9);
        }
    }
    #[test]
    fn determinism() {
        let transformer = CoordinateTransformer::default();
        let geo = GeographicCoordinates::new(-45.0, -20.0, 500.0).unwrap();
        let a = transformer.to_geomagnetic(&geo, t0()).unwrap();
        let b = transformer.to_geomagnetic(&geo, t0()).unwrap();
        assert_eq!(a, b);
    }
    #[test]
    fn epoch_window() {
        let transformer = CoordinateTransformer::default();
        let geo = GeographicCoordinates::new(-45.0, -20.0, 500.0).unwrap();
        let too_late = Epoch::from_gregorian_utc_at_midnight(2031, 6, 1);
        let err = transformer.to_geomagnetic(&geo, too_late).unwrap_err();
        assert_eq!(err.code(), "OUT_OF_RANGE");
        let too_early = Epoch::from_gregorian_utc_at_midnight(1899, 6, 1);
        assert!(transformer.to_geomagnetic(&geo, too_early).is_err());
    }
    #[test]
    fn altitude_ceiling() {
        let transformer = CoordinateTransformer::default();
        let geo = GeographicCoordinates::new(0.0, 0.0, 100_000.0).unwrap();
        let err = transformer.to_geomagnetic(&geo, t0()).unwrap_err();
        assert_eq!(err.code(), "OUT_OF_RANGE");
    }
    #[test]
    fn l_shell_sanity() {
        let transformer = CoordinateTransformer::default();
        let equator = GeographicCoordinates::new(-45.0, -20.0, 500.0).unwrap();
        let mag = transformer.to_geomagnetic(&equator, t0()).unwrap();
        assert!(mag.l_shell >= 1.0);
        assert!(mag.l_shell < 3.0, "low altitude L was {}", mag.l_shell);
        assert!(mag.magnetic_local_time >= 0.0 && mag.magnetic_local_time < 24.0);
    }
    #[test]
    fn field_strength_sanity() {
        let transformer = CoordinateTransformer::default();
        let surface = GeographicCoordinates::new(0.0, 45.0, 0.0).unwrap();
        let field = transformer.field_components(&surface, t0()).unwrap();
        // tens of thousands of nT at the surface
        assert!(field.b_total > 20_000.0 && field.b_total < 70_000.0);
    }
    #[test]
    fn field_tilts_with_the_dipole_axis() {
        let transformer = CoordinateTransformer::default();
        // far from the pole meridian the tilt shows as declination
        let site = GeographicCoordinates::new(120.0, 45.0, 0.0).unwrap();
        let field = transformer.field_components(&site, t0()).unwrap();
        assert!(
            field.declination.abs() > 1.0,
            "declination {} stayed axis aligned",
            field.declination
        );
        assert!(field.b_east.abs() > 0.0);
        // at the boreal dipole pole the field points straight down
        let pole = transformer.dipole_pole(t0()).unwrap();
        let at_pole = transformer.field_components(&pole, t0()).unwrap();
        assert!(at_pole.b_down > 0.0);
        assert!(at_pole.inclination > 85.0, "dip {}", at_pole.inclination);
    }
}
