//! Delivery route planning.
//!
//! Two ways to plan a delivery day:
//!
//! - [`pipeline::plan_deliveries`] clusters geolocated stops into vehicle
//!   groups and orders each group, without needing a travel-time matrix;
//! - [`solver::solve`] takes a full duration matrix and jointly assigns and
//!   schedules stops under time windows, stop ceilings and payload capacity.
//!
//! [`planner::plan_route`] plans a single vehicle's day with an optional
//! break. Map services plug in through the traits in [`traits`].

pub mod traits;
pub mod error;
pub mod config;
pub mod geo;
pub mod clock;
pub mod matrix;
pub mod model;
pub mod cluster;
pub mod sequence;
pub mod routing;
pub mod solver;
pub mod planner;
pub mod pipeline;
pub mod osrm;

pub use error::PlanError;
pub use matrix::DurationMatrix;
pub use model::{Depot, Stop, VehicleLimits};
