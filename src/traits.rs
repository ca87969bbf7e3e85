//! Core seams between the planner and its collaborators.
//!
//! The planner never talks to a map service, geocoder or database directly.
//! Callers plug those in through the traits below; the crate ships an OSRM
//! adapter and offline fallbacks for the matrix and ordering seams.

use crate::matrix::MatrixResponse;
use crate::solver::MultiPlan;

/// Anything the clustering and sequencing stages can place on a map.
pub trait DeliveryStop {
    /// Location coordinates (lat, lng).
    fn location(&self) -> (f64, f64);

    /// Quantity delivered at this stop (e.g. gallons).
    fn demand(&self) -> f64 {
        0.0
    }
}

/// Provides a travel-duration matrix for a set of locations.
///
/// The matrix is indexed by the provided location order and expressed in
/// seconds. Pairs the provider could not resolve carry
/// [`crate::matrix::UNROUTABLE_PENALTY_SECONDS`] and are listed in
/// `failed_pairs`.
pub trait DurationMatrixProvider {
    fn matrix_for(&self, locations: &[(f64, f64)]) -> MatrixResponse;
}

/// External waypoint optimizer (exact or near-optimal ordering service).
///
/// Returns the visiting order as indices into `waypoints`, or `None` when the
/// service is unavailable or declined the request.
pub trait RouteOptimizer: Sync {
    /// Largest waypoint count the service handles in practice.
    fn max_waypoints(&self) -> usize {
        10
    }

    fn optimize(&self, depot: (f64, f64), waypoints: &[(f64, f64)]) -> Option<Vec<usize>>;
}

/// Resolves a free-text address into coordinates.
pub trait Geocoder {
    fn geocode(&self, address: &str) -> Option<(f64, f64)>;
}

/// Receives finalized multi-vehicle plans for storage or driver notification.
///
/// The planner does not depend on the sink succeeding.
pub trait PlanSink {
    type Error: std::fmt::Display;

    fn accept(&self, plan: &MultiPlan) -> Result<(), Self::Error>;
}
