//! Great-circle geometry and the haversine matrix provider.
//!
//! The provider is the offline fallback when no routing service answers: it
//! estimates travel time from straight-line distance and an assumed speed.

use crate::matrix::{MatrixResponse, MatrixSource};
use crate::traits::DurationMatrixProvider;

/// Average driving speed assumption for time estimation.
pub const DEFAULT_SPEED_KMH: f64 = 40.0;

/// Earth radius in kilometers.
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Haversine distance between two (lat, lng) points in kilometers.
pub fn haversine_km(from: (f64, f64), to: (f64, f64)) -> f64 {
    let (lat1, lng1) = from;
    let (lat2, lng2) = to;

    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lng = (lng2 - lng1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();

    EARTH_RADIUS_KM * c
}

/// Mean coordinate of a set of points, or `None` for an empty set.
pub fn centroid<I>(points: I) -> Option<(f64, f64)>
where
    I: IntoIterator<Item = (f64, f64)>,
{
    let mut count = 0usize;
    let (mut lat_sum, mut lng_sum) = (0.0, 0.0);
    for (lat, lng) in points {
        lat_sum += lat;
        lng_sum += lng;
        count += 1;
    }
    if count == 0 {
        return None;
    }
    let n = count as f64;
    Some((lat_sum / n, lng_sum / n))
}

/// Latitude in [-90, 90], longitude in [-180, 180], both finite.
pub fn is_valid_coordinate((lat, lng): (f64, f64)) -> bool {
    lat.is_finite() && lng.is_finite() && (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lng)
}

/// Minutes needed to cover `km` at `speed_kmh`.
pub fn km_to_minutes(km: f64, speed_kmh: f64) -> f64 {
    if speed_kmh <= 0.0 {
        return 0.0;
    }
    km / speed_kmh * 60.0
}

/// Haversine-based duration matrix provider.
#[derive(Debug, Clone)]
pub struct HaversineMatrix {
    /// Assumed average driving speed in km/h.
    pub speed_kmh: f64,
}

impl Default for HaversineMatrix {
    fn default() -> Self {
        Self {
            speed_kmh: DEFAULT_SPEED_KMH,
        }
    }
}

impl HaversineMatrix {
    pub fn new(speed_kmh: f64) -> Self {
        Self { speed_kmh }
    }

    fn km_to_seconds(&self, km: f64) -> f64 {
        (km_to_minutes(km, self.speed_kmh) * 60.0).round()
    }
}

impl DurationMatrixProvider for HaversineMatrix {
    fn matrix_for(&self, locations: &[(f64, f64)]) -> MatrixResponse {
        let n = locations.len();
        let mut seconds = vec![vec![0.0; n]; n];

        for (i, from) in locations.iter().enumerate() {
            for (j, to) in locations.iter().enumerate() {
                if i != j {
                    seconds[i][j] = self.km_to_seconds(haversine_km(*from, *to));
                }
            }
        }

        MatrixResponse::new(seconds, MatrixSource::Haversine)
    }
}
