//! OSRM HTTP adapter: `table` for duration matrices, `trip` for waypoint
//! ordering.
//!
//! Failures never propagate. A failed table request yields an empty
//! response so the caller can fall back to an offline provider; a failed
//! trip request yields `None` so the sequencer falls back to nearest
//! neighbor.

use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::matrix::{FailedPair, MatrixResponse, MatrixSource, UNROUTABLE_PENALTY_SECONDS};
use crate::traits::{DurationMatrixProvider, RouteOptimizer};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OsrmConfig {
    pub base_url: String,
    pub profile: String,
    pub timeout_secs: u64,
    /// Extra attempts after a retryable status (429, 5xx).
    pub max_retries: u32,
    pub retry_backoff_millis: u64,
    /// Largest stop count handed to the trip service.
    pub max_trip_waypoints: usize,
}

impl Default for OsrmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            profile: "car".to_string(),
            timeout_secs: 10,
            max_retries: 2,
            retry_backoff_millis: 250,
            max_trip_waypoints: 10,
        }
    }
}

impl OsrmConfig {
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct OsrmClient {
    config: OsrmConfig,
    client: reqwest::blocking::Client,
}

impl OsrmClient {
    pub fn new(config: OsrmConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { config, client })
    }

    pub fn config(&self) -> &OsrmConfig {
        &self.config
    }

    /// Table request, falling back to `fallback` when OSRM gives nothing.
    pub fn matrix_or_else(
        &self,
        locations: &[(f64, f64)],
        fallback: &dyn DurationMatrixProvider,
    ) -> MatrixResponse {
        let response = self.matrix_for(locations);
        if response.is_empty() && !locations.is_empty() {
            warn!(locations = locations.len(), "OSRM table unavailable, using fallback matrix");
            return fallback.matrix_for(locations);
        }
        response
    }

    fn url(&self, service: &str, locations: &[(f64, f64)], query: &str) -> String {
        let coords = locations
            .iter()
            .map(|(lat, lng)| format!("{:.6},{:.6}", lng, lat))
            .collect::<Vec<_>>()
            .join(";");
        format!(
            "{}/{}/v1/{}/{}?{}",
            self.config.base_url.trim_end_matches('/'),
            service,
            self.config.profile,
            coords,
            query
        )
    }

    /// GET with retries on throttling and server errors.
    fn get_json<T>(&self, url: &str) -> Result<T, reqwest::Error>
    where
        T: serde::de::DeserializeOwned,
    {
        let mut attempt = 0;
        loop {
            let result = self.client.get(url).send().and_then(|resp| resp.error_for_status());
            match result {
                Ok(resp) => return resp.json::<T>(),
                Err(err) if attempt < self.config.max_retries && is_retryable(&err) => {
                    attempt += 1;
                    debug!(attempt, error = %err, "retrying OSRM request");
                    thread::sleep(Duration::from_millis(
                        self.config.retry_backoff_millis * u64::from(attempt),
                    ));
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn is_retryable(err: &reqwest::Error) -> bool {
    err.is_timeout()
        || err
            .status()
            .is_some_and(|status| status.as_u16() == 429 || status.is_server_error())
}

impl DurationMatrixProvider for OsrmClient {
    fn matrix_for(&self, locations: &[(f64, f64)]) -> MatrixResponse {
        if locations.is_empty() {
            return MatrixResponse::new(Vec::new(), MatrixSource::Provider);
        }

        let url = self.url("table", locations, "annotations=duration");
        match self.get_json::<OsrmTableResponse>(&url) {
            Ok(body) if body.code == "Ok" => table_to_response(body.durations.unwrap_or_default(), locations.len()),
            Ok(body) => {
                warn!(code = %body.code, "OSRM table request rejected");
                MatrixResponse::new(Vec::new(), MatrixSource::Provider)
            }
            Err(err) => {
                warn!(error = %err, "OSRM table request failed");
                MatrixResponse::new(Vec::new(), MatrixSource::Provider)
            }
        }
    }
}

/// Fill unroutable (null) cells with the penalty and record them.
fn table_to_response(durations: Vec<Vec<Option<f64>>>, n: usize) -> MatrixResponse {
    if durations.len() != n {
        warn!(expected = n, rows = durations.len(), "OSRM table has the wrong shape");
        return MatrixResponse::new(Vec::new(), MatrixSource::Provider);
    }

    let mut failed_pairs = Vec::new();
    let seconds = durations
        .into_iter()
        .enumerate()
        .map(|(origin, row)| {
            row.into_iter()
                .enumerate()
                .map(|(destination, cell)| match cell {
                    Some(value) if value.is_finite() => value,
                    _ if origin == destination => 0.0,
                    _ => {
                        failed_pairs.push(FailedPair {
                            origin,
                            destination,
                            status: Some("NoRoute".to_string()),
                        });
                        UNROUTABLE_PENALTY_SECONDS
                    }
                })
                .collect()
        })
        .collect();

    if !failed_pairs.is_empty() {
        warn!(failed = failed_pairs.len(), "OSRM could not route some pairs");
    }
    MatrixResponse {
        seconds,
        source: MatrixSource::Provider,
        failed_pairs,
    }
}

impl RouteOptimizer for OsrmClient {
    fn max_waypoints(&self) -> usize {
        self.config.max_trip_waypoints
    }

    fn optimize(&self, depot: (f64, f64), waypoints: &[(f64, f64)]) -> Option<Vec<usize>> {
        if waypoints.is_empty() {
            return Some(Vec::new());
        }

        let mut locations = Vec::with_capacity(waypoints.len() + 1);
        locations.push(depot);
        locations.extend_from_slice(waypoints);
        let url = self.url("trip", &locations, "roundtrip=true&source=first");

        match self.get_json::<OsrmTripResponse>(&url) {
            Ok(body) if body.code == "Ok" => trip_order(&body.waypoints),
            Ok(body) => {
                warn!(code = %body.code, "OSRM trip request rejected");
                None
            }
            Err(err) => {
                warn!(error = %err, "OSRM trip request failed");
                None
            }
        }
    }
}

/// Visiting order of the stops (depot excluded) from trip waypoints given
/// in input order, depot first.
fn trip_order(waypoints: &[OsrmTripWaypoint]) -> Option<Vec<usize>> {
    if waypoints.len() < 2 {
        return None;
    }
    let mut stops: Vec<(usize, usize)> = waypoints[1..]
        .iter()
        .enumerate()
        .map(|(index, waypoint)| (waypoint.waypoint_index, index))
        .collect();
    stops.sort_unstable();
    Some(stops.into_iter().map(|(_, index)| index).collect())
}

#[derive(Debug, Deserialize)]
struct OsrmTableResponse {
    code: String,
    durations: Option<Vec<Vec<Option<f64>>>>,
}

#[derive(Debug, Deserialize)]
struct OsrmTripResponse {
    code: String,
    #[serde(default)]
    waypoints: Vec<OsrmTripWaypoint>,
}

#[derive(Debug, Deserialize)]
struct OsrmTripWaypoint {
    waypoint_index: usize,
}
