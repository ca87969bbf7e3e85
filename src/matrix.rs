//! Duration matrices in solver units.
//!
//! Providers speak seconds; the solver works in whole minutes. Conversion
//! happens once per request here, with sentinel handling so unroutable pairs
//! stay effectively infinite without overflowing route arithmetic.

use serde::{Deserialize, Serialize};

use crate::error::PlanError;
use crate::traits::DurationMatrixProvider;

/// Value a provider writes for pairs it could not route (6 hours).
pub const UNROUTABLE_PENALTY_SECONDS: f64 = 6.0 * 60.0 * 60.0;

/// Cells above this many seconds are already penalty values and are kept as-is.
pub const SENTINEL_THRESHOLD_SECONDS: f64 = 1e8;

/// Minutes used for cells that carry no usable number at all.
pub const MISSING_CELL_MINUTES: i64 = 1_000_000_000;

/// Where a matrix came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatrixSource {
    /// A routing service answered.
    Provider,
    /// Great-circle estimate.
    Haversine,
    /// Deterministic placeholder used when no provider is configured.
    Synthetic,
}

/// A node pair the provider failed to resolve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedPair {
    pub origin: usize,
    pub destination: usize,
    pub status: Option<String>,
}

/// Raw provider output, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixResponse {
    pub seconds: Vec<Vec<f64>>,
    pub source: MatrixSource,
    pub failed_pairs: Vec<FailedPair>,
}

impl MatrixResponse {
    pub fn new(seconds: Vec<Vec<f64>>, source: MatrixSource) -> Self {
        Self {
            seconds,
            source,
            failed_pairs: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.seconds.is_empty()
    }
}

/// Square matrix of integer travel minutes between nodes (depot first).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurationMatrix {
    minutes: Vec<Vec<i64>>,
}

impl DurationMatrix {
    /// Convert a seconds matrix to minutes. Rows are kept as given so a
    /// ragged input is still reported by [`DurationMatrix::validate`].
    pub fn from_seconds(seconds: &[Vec<f64>]) -> Self {
        let minutes = seconds
            .iter()
            .map(|row| row.iter().map(|&value| seconds_to_minutes(value)).collect())
            .collect();
        Self { minutes }
    }

    /// Take minutes as given, clamped to `0..=MISSING_CELL_MINUTES`.
    pub fn from_minutes(mut minutes: Vec<Vec<i64>>) -> Self {
        minutes
            .iter_mut()
            .flatten()
            .for_each(|cell| *cell = (*cell).clamp(0, MISSING_CELL_MINUTES));
        Self { minutes }
    }

    pub fn from_response(response: &MatrixResponse) -> Self {
        Self::from_seconds(&response.seconds)
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.minutes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.minutes.is_empty()
    }

    /// Check the matrix is exactly `nodes × nodes`.
    pub fn validate(&self, nodes: usize) -> Result<(), PlanError> {
        let rows = self.minutes.len();
        let bad_row = self.minutes.iter().find(|row| row.len() != nodes);
        if rows != nodes || bad_row.is_some() {
            let cols = bad_row
                .or(self.minutes.first())
                .map(Vec::len)
                .unwrap_or(0);
            return Err(PlanError::MatrixDimension {
                expected: nodes,
                rows,
                cols,
            });
        }
        Ok(())
    }

    pub fn rows(&self) -> &[Vec<i64>] {
        &self.minutes
    }

    pub fn get(&self, from: usize, to: usize) -> i64 {
        self.minutes[from][to]
    }

    /// Count of cells at or above the unroutable penalty, for diagnostics.
    pub fn penalty_cells(&self) -> usize {
        let threshold = seconds_to_minutes(UNROUTABLE_PENALTY_SECONDS);
        self.minutes
            .iter()
            .flatten()
            .filter(|&&value| value >= threshold)
            .count()
    }
}

/// Seconds to whole minutes, leaving sentinel magnitudes untouched.
pub fn seconds_to_minutes(seconds: f64) -> i64 {
    if !seconds.is_finite() {
        return MISSING_CELL_MINUTES;
    }
    if seconds > SENTINEL_THRESHOLD_SECONDS {
        return (seconds as i64).min(MISSING_CELL_MINUTES);
    }
    ((seconds / 60.0).round() as i64).max(0)
}

/// Deterministic travel times for running without any routing service.
///
/// Base 6 minutes plus 4 minutes per index step between the two nodes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyntheticMatrix;

impl DurationMatrixProvider for SyntheticMatrix {
    fn matrix_for(&self, locations: &[(f64, f64)]) -> MatrixResponse {
        let n = locations.len();
        let mut seconds = vec![vec![0.0; n]; n];
        for (i, row) in seconds.iter_mut().enumerate() {
            for (j, cell) in row.iter_mut().enumerate() {
                if i != j {
                    let steps = i.abs_diff(j) as f64;
                    *cell = 6.0 * 60.0 + steps * 4.0 * 60.0;
                }
            }
        }
        MatrixResponse::new(seconds, MatrixSource::Synthetic)
    }
}
