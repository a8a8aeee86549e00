//! Lambert Conformal Conic projection.
//!
//! The National Blend of Models CONUS grid is defined on a tangent cone
//! (single standard parallel) over a spherical earth. Projected coordinates
//! are metres relative to the projection origin (`lat0`, `lon0`), which is
//! what the store publishes as its `x`/`y` coordinate arrays.
//!
//! The projection parameters include:
//! - Latitude of origin (lat0) and central meridian (lon0, LoV in GRIB2)
//! - Standard parallel(s): Latin1 and Latin2 (equal for a tangent cone)
//! - First grid point (lat1, lon1) and grid spacing (dx, dy) in metres
//! - Earth radius of the sphere

use std::f64::consts::PI;

const DEG_TO_RAD: f64 = PI / 180.0;
const RAD_TO_DEG: f64 = 180.0 / PI;

/// Lambert Conformal Conic projection with its grid definition.
#[derive(Debug, Clone)]
pub struct LambertConformal {
    /// Central meridian (LoV) in degrees
    pub lon0_deg: f64,
    /// Latitude of projection origin in degrees
    pub lat0_deg: f64,
    /// First standard parallel in degrees
    pub latin1_deg: f64,
    /// Second standard parallel in degrees
    pub latin2_deg: f64,
    /// Latitude of first grid point in degrees
    pub lat1_deg: f64,
    /// Longitude of first grid point in degrees (-180..180)
    pub lon1_deg: f64,
    /// Grid spacing in X direction (meters)
    pub dx: f64,
    /// Grid spacing in Y direction (meters)
    pub dy: f64,
    /// Number of grid points in X (i) direction
    pub nx: usize,
    /// Number of grid points in Y (j) direction
    pub ny: usize,
    /// Earth radius (meters)
    pub earth_radius: f64,
    /// Cone constant (n)
    n: f64,
    /// F constant
    f: f64,
    /// Rho at the latitude of origin
    rho0: f64,
}

impl LambertConformal {
    /// Create a projection from GRIB2-style grid parameters (degrees, metres).
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        lat0_deg: f64,
        lon0_deg: f64,
        latin1_deg: f64,
        latin2_deg: f64,
        lat1_deg: f64,
        lon1_deg: f64,
        dx: f64,
        dy: f64,
        nx: usize,
        ny: usize,
        earth_radius: f64,
    ) -> Self {
        let latin1 = latin1_deg * DEG_TO_RAD;
        let latin2 = latin2_deg * DEG_TO_RAD;
        let lat0 = lat0_deg * DEG_TO_RAD;

        let n = if (latin1 - latin2).abs() < 1e-10 {
            // Tangent cone
            latin1.sin()
        } else {
            // Secant cone
            let ln_ratio = (latin1.cos() / latin2.cos()).ln();
            let tan_ratio =
                ((PI / 4.0 + latin2 / 2.0).tan() / (PI / 4.0 + latin1 / 2.0).tan()).ln();
            ln_ratio / tan_ratio
        };

        let f = (latin1.cos() * (PI / 4.0 + latin1 / 2.0).tan().powf(n)) / n;
        let rho0 = earth_radius * f / (PI / 4.0 + lat0 / 2.0).tan().powf(n);

        Self {
            lon0_deg: normalize_lon(lon0_deg),
            lat0_deg,
            latin1_deg,
            latin2_deg,
            lat1_deg,
            lon1_deg: normalize_lon(lon1_deg),
            dx,
            dy,
            nx,
            ny,
            earth_radius,
            n,
            f,
            rho0,
        }
    }

    /// NBM CONUS 2.5 km grid.
    ///
    /// - First point: 19.229°N, 233.723448°E (= -126.276552°)
    /// - LoV: 265°E (= -95°), origin and standard parallel 25°N
    /// - Grid: 2345 x 1597, 2539.703 m spacing, sphere of radius 6 371 200 m
    pub fn nbm_conus() -> Self {
        Self::new(
            25.0,        // lat0
            -95.0,       // LoV
            25.0,        // latin1
            25.0,        // latin2
            19.229,      // lat1
            -126.276552, // lon1
            2539.703,    // dx
            2539.703,    // dy
            2345,        // nx
            1597,        // ny
            6_371_200.0, // earth radius
        )
    }

    /// Project geographic coordinates (degrees) to projection metres.
    pub fn project(&self, lat_deg: f64, lon_deg: f64) -> (f64, f64) {
        let lat = lat_deg * DEG_TO_RAD;
        let dlon = normalize_lon(lon_deg - self.lon0_deg) * DEG_TO_RAD;

        let rho = self.earth_radius * self.f / (PI / 4.0 + lat / 2.0).tan().powf(self.n);
        let theta = self.n * dlon;

        let x = rho * theta.sin();
        let y = self.rho0 - rho * theta.cos();
        (x, y)
    }

    /// Inverse projection: projection metres to (lat, lon) in degrees.
    pub fn unproject(&self, x: f64, y: f64) -> (f64, f64) {
        let dy = self.rho0 - y;
        let mut rho = (x * x + dy * dy).sqrt();
        let theta = if self.n < 0.0 {
            rho = -rho;
            (-x).atan2(-dy)
        } else {
            x.atan2(dy)
        };

        let lat = 2.0 * (self.earth_radius * self.f / rho).powf(1.0 / self.n).atan() - PI / 2.0;
        let lon = self.lon0_deg + theta / self.n * RAD_TO_DEG;

        (lat * RAD_TO_DEG, normalize_lon(lon))
    }

    /// Projected coordinates of the first grid point.
    pub fn first_point(&self) -> (f64, f64) {
        self.project(self.lat1_deg, self.lon1_deg)
    }

    /// Cell-centre x coordinates in metres, west to east.
    pub fn x_coords(&self) -> Vec<f64> {
        let (x0, _) = self.first_point();
        (0..self.nx).map(|i| x0 + i as f64 * self.dx).collect()
    }

    /// Cell-centre y coordinates in metres, south to north.
    pub fn y_coords(&self) -> Vec<f64> {
        let (_, y0) = self.first_point();
        (0..self.ny).map(|j| y0 + j as f64 * self.dy).collect()
    }

    /// Convert grid indices (i, j) to geographic coordinates (lat, lon).
    pub fn grid_to_geo(&self, i: f64, j: f64) -> (f64, f64) {
        let (x0, y0) = self.first_point();
        self.unproject(x0 + i * self.dx, y0 + j * self.dy)
    }

    /// Approximate geographic bounding box enclosing every grid point.
    ///
    /// Returns (min_lon, min_lat, max_lon, max_lat) in degrees. The grid edges
    /// are curved in geographic space, so all four edges are sampled.
    pub fn geographic_bounds(&self) -> (f64, f64, f64, f64) {
        let mut min_lat = f64::MAX;
        let mut max_lat = f64::MIN;
        let mut min_lon = f64::MAX;
        let mut max_lon = f64::MIN;

        let last_i = self.nx.saturating_sub(1) as f64;
        let last_j = self.ny.saturating_sub(1) as f64;

        for t in 0..=20 {
            let frac = t as f64 / 20.0;
            for (i, j) in [
                (frac * last_i, 0.0),
                (frac * last_i, last_j),
                (0.0, frac * last_j),
                (last_i, frac * last_j),
            ] {
                let (lat, lon) = self.grid_to_geo(i, j);
                min_lat = min_lat.min(lat);
                max_lat = max_lat.max(lat);
                min_lon = min_lon.min(lon);
                max_lon = max_lon.max(lon);
            }
        }

        (min_lon, min_lat, max_lon, max_lat)
    }

    /// PROJ.4 definition string.
    pub fn proj4(&self) -> String {
        format!(
            "+proj=lcc +lat_1={} +lat_2={} +lat_0={} +lon_0={} +x_0=0 +y_0=0 +R={} +units=m +no_defs",
            self.latin1_deg, self.latin2_deg, self.lat0_deg, self.lon0_deg, self.earth_radius
        )
    }
}

/// Wrap a longitude into [-180, 180).
fn normalize_lon(lon: f64) -> f64 {
    let mut lon = lon;
    while lon >= 180.0 {
        lon -= 360.0;
    }
    while lon < -180.0 {
        lon += 360.0;
    }
    lon
}
