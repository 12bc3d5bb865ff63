/// Conversion from the source survey projection into a local East-North-Up
/// frame anchored at a geodetic origin.
///
/// The chain is: survey projection -> geodetic lon/lat -> normalized
/// web-Mercator plane -> offset from the origin's Mercator coordinate ->
/// meters, using the Mercator scale at the origin latitude. Heights pass
/// through unchanged.
use crate::error::{Result, TilerError};
use constants::coordinate_system::{
    MAX_MERCATOR_LATITUDE, MAX_TMERC_LONGITUDE_OFFSET, MERCATOR_EARTH_RADIUS, WGS84_A, WGS84_E2,
    WGS84_F,
};
use glam::{DMat4, DVec3};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

pub fn mercator_x_from_lng(lng: f64) -> f64 {
    (180.0 + lng) / 360.0
}

pub fn mercator_y_from_lat(lat: f64) -> f64 {
    (180.0 - (180.0 / PI) * (PI / 4.0 + lat * PI / 360.0).tan().ln()) / 360.0
}

pub fn lng_from_mercator_x(x: f64) -> f64 {
    x * 360.0 - 180.0
}

pub fn lat_from_mercator_y(y: f64) -> f64 {
    let y2 = 180.0 - y * 360.0;
    360.0 / PI * (y2 * PI / 180.0).exp().atan() - 90.0
}

pub fn circumference_at_latitude(lat: f64) -> f64 {
    2.0 * PI * MERCATOR_EARTH_RADIUS * lat.to_radians().cos()
}

/// Mercator units spanned by `altitude` meters at `lat`.
pub fn mercator_z_from_altitude(altitude: f64, lat: f64) -> f64 {
    altitude / circumference_at_latitude(lat)
}

/// Geodetic (radians, meters) to Earth-centered Earth-fixed on WGS84.
pub fn geodetic_to_ecef(lon_rad: f64, lat_rad: f64, height: f64) -> DVec3 {
    let (sin_lat, cos_lat) = lat_rad.sin_cos();
    let (sin_lon, cos_lon) = lon_rad.sin_cos();
    let n = WGS84_A / (1.0 - WGS84_E2 * sin_lat * sin_lat).sqrt();
    DVec3::new(
        (n + height) * cos_lat * cos_lon,
        (n + height) * cos_lat * sin_lon,
        (n * (1.0 - WGS84_E2) + height) * sin_lat,
    )
}

fn check_geodetic(lon: f64, lat: f64) -> Result<()> {
    if !lon.is_finite() || !lat.is_finite() {
        return Err(TilerError::Projection(format!(
            "non-finite geodetic coordinate ({lon}, {lat})"
        )));
    }
    if lat.abs() > MAX_MERCATOR_LATITUDE || lon.abs() > 180.0 {
        return Err(TilerError::Projection(format!(
            "geodetic coordinate ({lon:.9}, {lat:.9}) outside the Mercator domain"
        )));
    }
    Ok(())
}

/// Local tangent frame shared by the coordinate adapter, tile addressing and
/// the tileset anchor. Built once per run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReferenceFrame {
    origin_lon: f64,
    origin_lat: f64,
    reference_x: f64,
    reference_y: f64,
    /// Mercator units per meter at the origin latitude.
    mercator_scale: f64,
}

impl ReferenceFrame {
    pub fn new(origin_lon: f64, origin_lat: f64) -> Result<Self> {
        check_geodetic(origin_lon, origin_lat)?;
        Ok(Self {
            origin_lon,
            origin_lat,
            reference_x: mercator_x_from_lng(origin_lon),
            reference_y: mercator_y_from_lat(origin_lat),
            mercator_scale: mercator_z_from_altitude(1.0, origin_lat),
        })
    }

    pub fn origin(&self) -> (f64, f64) {
        (self.origin_lon, self.origin_lat)
    }

    pub fn reference_mercator(&self) -> (f64, f64) {
        (self.reference_x, self.reference_y)
    }

    pub fn mercator_scale(&self) -> f64 {
        self.mercator_scale
    }

    pub fn enu_to_mercator(&self, east: f64, north: f64) -> (f64, f64) {
        (
            self.reference_x + east * self.mercator_scale,
            self.reference_y - north * self.mercator_scale,
        )
    }

    pub fn mercator_to_enu(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - self.reference_x) / self.mercator_scale,
            -(y - self.reference_y) / self.mercator_scale,
        )
    }

    pub fn geodetic_to_enu(&self, lon: f64, lat: f64, height: f64) -> Result<[f64; 3]> {
        check_geodetic(lon, lat)?;
        let (east, north) = self.mercator_to_enu(mercator_x_from_lng(lon), mercator_y_from_lat(lat));
        Ok([east, north, height])
    }

    /// Inverse of `geodetic_to_enu`: (lon, lat, height)
    pub fn enu_to_geodetic(&self, east: f64, north: f64, up: f64) -> (f64, f64, f64) {
        let (x, y) = self.enu_to_mercator(east, north);
        (lng_from_mercator_x(x), lat_from_mercator_y(y), up)
    }

    /// Column-major 4x4 placing the local ENU axes at the origin on the
    /// WGS84 ellipsoid (height 0).
    pub fn enu_to_ecef_transform(&self) -> [f64; 16] {
        let lon = self.origin_lon.to_radians();
        let lat = self.origin_lat.to_radians();
        let (sin_lat, cos_lat) = lat.sin_cos();
        let (sin_lon, cos_lon) = lon.sin_cos();

        let east = DVec3::new(-sin_lon, cos_lon, 0.0);
        let north = DVec3::new(-sin_lat * cos_lon, -sin_lat * sin_lon, cos_lat);
        let up = DVec3::new(cos_lat * cos_lon, cos_lat * sin_lon, sin_lat);
        let origin = geodetic_to_ecef(lon, lat, 0.0);

        DMat4::from_cols(
            east.extend(0.0),
            north.extend(0.0),
            up.extend(0.0),
            origin.extend(1.0),
        )
        .to_cols_array()
    }
}

/// Transverse Mercator on WGS84 (Gauss-Krüger).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransverseMercator {
    pub central_meridian: f64,
    pub latitude_of_origin: f64,
    pub scale_factor: f64,
    pub false_easting: f64,
    pub false_northing: f64,
}

impl Default for TransverseMercator {
    fn default() -> Self {
        Self {
            central_meridian: 120.0,
            latitude_of_origin: 0.0,
            scale_factor: 1.0,
            false_easting: 500_000.0,
            false_northing: 0.0,
        }
    }
}

/// Krüger series coefficients to fourth order in the third flattening.
#[derive(Debug, Clone, Copy)]
struct KrugerSeries {
    radius: f64,
    eccentricity: f64,
    alpha: [f64; 4],
    beta: [f64; 4],
    delta: [f64; 4],
}

impl KrugerSeries {
    fn wgs84() -> Self {
        let n = WGS84_F / (2.0 - WGS84_F);
        let (n2, n3, n4) = (n * n, n * n * n, n * n * n * n);
        Self {
            radius: WGS84_A / (1.0 + n) * (1.0 + n2 / 4.0 + n4 / 64.0),
            eccentricity: 2.0 * n.sqrt() / (1.0 + n),
            alpha: [
                n / 2.0 - 2.0 * n2 / 3.0 + 5.0 * n3 / 16.0 + 41.0 * n4 / 180.0,
                13.0 * n2 / 48.0 - 3.0 * n3 / 5.0 + 557.0 * n4 / 1440.0,
                61.0 * n3 / 240.0 - 103.0 * n4 / 140.0,
                49561.0 * n4 / 161280.0,
            ],
            beta: [
                n / 2.0 - 2.0 * n2 / 3.0 + 37.0 * n3 / 96.0 - n4 / 360.0,
                n2 / 48.0 + n3 / 15.0 - 437.0 * n4 / 1440.0,
                17.0 * n3 / 480.0 - 37.0 * n4 / 840.0,
                4397.0 * n4 / 161280.0,
            ],
            delta: [
                2.0 * n - 2.0 * n2 / 3.0 - 2.0 * n3 + 116.0 * n4 / 45.0,
                7.0 * n2 / 3.0 - 8.0 * n3 / 5.0 - 227.0 * n4 / 45.0,
                56.0 * n3 / 15.0 - 136.0 * n4 / 35.0,
                4279.0 * n4 / 630.0,
            ],
        }
    }

    /// Conformal sphere coordinates (xi', eta') for a longitude offset.
    fn conformal(&self, lat_rad: f64, dlon_rad: f64) -> (f64, f64) {
        let s = lat_rad.sin();
        let e = self.eccentricity;
        let t = (s.atanh() - e * (e * s).atanh()).sinh();
        let xi = t.atan2(dlon_rad.cos());
        let eta = (dlon_rad.sin() / (1.0 + t * t).sqrt()).atanh();
        (xi, eta)
    }

    /// Unscaled (xi, eta) on the rectifying plane.
    fn forward(&self, lat_rad: f64, dlon_rad: f64) -> (f64, f64) {
        let (xi_p, eta_p) = self.conformal(lat_rad, dlon_rad);
        let mut xi = xi_p;
        let mut eta = eta_p;
        for (j, a) in self.alpha.iter().enumerate() {
            let k = 2.0 * (j + 1) as f64;
            xi += a * (k * xi_p).sin() * (k * eta_p).cosh();
            eta += a * (k * xi_p).cos() * (k * eta_p).sinh();
        }
        (xi, eta)
    }

    /// (lat, dlon) in radians from rectifying-plane (xi, eta).
    fn inverse(&self, xi: f64, eta: f64) -> (f64, f64) {
        let mut xi_p = xi;
        let mut eta_p = eta;
        for (j, b) in self.beta.iter().enumerate() {
            let k = 2.0 * (j + 1) as f64;
            xi_p -= b * (k * xi).sin() * (k * eta).cosh();
            eta_p -= b * (k * xi).cos() * (k * eta).sinh();
        }
        let chi = (xi_p.sin() / eta_p.cosh()).asin();
        let mut lat = chi;
        for (j, d) in self.delta.iter().enumerate() {
            lat += d * (2.0 * (j + 1) as f64 * chi).sin();
        }
        let dlon = eta_p.sinh().atan2(xi_p.cos());
        (lat, dlon)
    }
}

/// Projection the raw splat positions are expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceProjection {
    /// x = longitude, y = latitude in degrees
    Geographic,
    TransverseMercator(TransverseMercator),
}

impl Default for SourceProjection {
    fn default() -> Self {
        Self::TransverseMercator(TransverseMercator::default())
    }
}

/// Converts raw survey positions into local ENU meters.
#[derive(Debug, Clone, Copy)]
pub struct CoordinateAdapter {
    frame: ReferenceFrame,
    projection: SourceProjection,
    series: KrugerSeries,
    /// Rectifying-plane northing of the latitude of origin.
    xi_origin: f64,
}

impl CoordinateAdapter {
    pub fn new(frame: ReferenceFrame, projection: SourceProjection) -> Self {
        let series = KrugerSeries::wgs84();
        let xi_origin = match projection {
            SourceProjection::TransverseMercator(tm) => {
                series.forward(tm.latitude_of_origin.to_radians(), 0.0).0
            }
            SourceProjection::Geographic => 0.0,
        };
        Self {
            frame,
            projection,
            series,
            xi_origin,
        }
    }

    pub fn frame(&self) -> &ReferenceFrame {
        &self.frame
    }

    /// Survey (x, y) to geodetic (lon, lat) in degrees.
    pub fn unproject(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        if !x.is_finite() || !y.is_finite() {
            return Err(TilerError::Projection(format!(
                "non-finite source coordinate ({x}, {y})"
            )));
        }
        let (lon, lat) = match self.projection {
            SourceProjection::Geographic => (x, y),
            SourceProjection::TransverseMercator(tm) => {
                let k = tm.scale_factor * self.series.radius;
                let xi = (y - tm.false_northing) / k + self.xi_origin;
                let eta = (x - tm.false_easting) / k;
                let (lat, dlon) = self.series.inverse(xi, eta);
                let dlon = dlon.to_degrees();
                if !lat.is_finite() || !dlon.is_finite() || dlon.abs() > MAX_TMERC_LONGITUDE_OFFSET
                {
                    return Err(TilerError::Projection(format!(
                        "({x:.3}, {y:.3}) is outside the transverse Mercator domain"
                    )));
                }
                (tm.central_meridian + dlon, lat.to_degrees())
            }
        };
        check_geodetic(lon, lat)?;
        Ok((lon, lat))
    }

    /// Geodetic (lon, lat) in degrees to survey (x, y).
    pub fn project(&self, lon: f64, lat: f64) -> Result<(f64, f64)> {
        check_geodetic(lon, lat)?;
        match self.projection {
            SourceProjection::Geographic => Ok((lon, lat)),
            SourceProjection::TransverseMercator(tm) => {
                let dlon = lon - tm.central_meridian;
                if dlon.abs() > MAX_TMERC_LONGITUDE_OFFSET {
                    return Err(TilerError::Projection(format!(
                        "longitude {lon} is {dlon:.3} degrees from the central meridian"
                    )));
                }
                let (xi, eta) = self.series.forward(lat.to_radians(), dlon.to_radians());
                let k = tm.scale_factor * self.series.radius;
                Ok((
                    tm.false_easting + k * eta,
                    tm.false_northing + k * (xi - self.xi_origin),
                ))
            }
        }
    }

    /// Raw survey position to local (east, north, up) meters.
    pub fn to_local_enu(&self, raw: [f64; 3]) -> Result<[f64; 3]> {
        let (lon, lat) = self.unproject(raw[0], raw[1])?;
        self.frame.geodetic_to_enu(lon, lat, raw[2])
    }

    /// Local ENU back to geodetic (lon, lat, height).
    pub fn from_local_enu(&self, enu: [f64; 3]) -> (f64, f64, f64) {
        self.frame.enu_to_geodetic(enu[0], enu[1], enu[2])
    }
}
