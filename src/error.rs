//! Input validation errors.
//!
//! Infeasibility is not an error: solvers report it through their outcome
//! types. Everything here is rejected before any solve attempt.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlanError {
    /// The request declared no vehicles.
    #[error("at least one vehicle is required")]
    EmptyFleet,

    /// Per-vehicle stop ceiling of zero can never serve anything.
    #[error("max stops per vehicle must be positive")]
    ZeroStopCeiling,

    /// Clustering needs depot coordinates and none could be resolved.
    #[error("depot has no coordinates and could not be geocoded")]
    UnlocatedDepot,

    #[error("stop {id} has invalid coordinates ({lat}, {lon})")]
    InvalidCoordinates { id: String, lat: f64, lon: f64 },

    #[error("matrix size mismatch: expected {expected}x{expected}, got {rows}x{cols}")]
    MatrixDimension {
        expected: usize,
        rows: usize,
        cols: usize,
    },

    /// A wall-clock string could not be parsed as `HH:MM`.
    #[error("invalid time of day: {0:?}")]
    InvalidTime(String),

    #[error("stop {id} has an empty time window ({start}..{end})")]
    InvalidWindow { id: String, start: i64, end: i64 },
}
