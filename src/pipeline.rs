//! Cluster-then-sequence planning for callers without a full matrix.
//!
//! Resolve coordinates, partition stops into vehicle groups, trim groups
//! that still break the vehicle limits, then order each group and estimate
//! arrivals. Stops that cannot be placed are reported, never lost.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clock;
use crate::cluster::{ClusterBalancer, truncate_to_capacity};
use crate::config::{ClusterOptions, PlannerDefaults};
use crate::error::PlanError;
use crate::geo::{self, DEFAULT_SPEED_KMH};
use crate::model::{Depot, LocatedStop, Stop, VehicleLimits};
use crate::sequence::{RouteMetrics, RouteSequencer, estimate_arrivals, route_metrics_at};
use crate::solver::validate_stops;
use crate::traits::Geocoder;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryRequest {
    pub depot: Depot,
    pub stops: Vec<Stop>,
    pub num_vehicles: usize,
    pub limits: VehicleLimits,
    pub departure_time: String,
    pub default_service_minutes: i64,
    /// Consult the external optimizer for small groups.
    pub use_external_optimizer: bool,
    pub speed_kmh: f64,
}

impl DeliveryRequest {
    pub fn new(depot: Depot, stops: Vec<Stop>, num_vehicles: usize) -> Self {
        Self::with_defaults(depot, stops, num_vehicles, &PlannerDefaults::default())
    }

    pub fn with_defaults(depot: Depot, stops: Vec<Stop>, num_vehicles: usize, defaults: &PlannerDefaults) -> Self {
        Self {
            depot,
            stops,
            num_vehicles,
            limits: VehicleLimits::default(),
            departure_time: defaults.departure_time.clone(),
            default_service_minutes: defaults.service_minutes,
            use_external_optimizer: true,
            speed_kmh: DEFAULT_SPEED_KMH,
        }
    }

    pub fn limits(mut self, max_stops: usize, max_capacity: f64) -> Self {
        self.limits = VehicleLimits {
            max_stops,
            max_capacity,
        };
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnassignedReason {
    /// No coordinates given and the address could not be geocoded.
    NotGeocoded,
    /// Removed from a group that still broke the vehicle limits.
    OverCapacity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnassignedStop {
    pub stop_id: String,
    pub reason: UnassignedReason,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EstimatedArrival {
    pub stop_id: String,
    pub arrival_minute: i64,
    pub eta: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TruckRoute {
    /// `Truck_<slot + 1>`.
    pub label: String,
    pub slot: usize,
    pub stops: Vec<LocatedStop>,
    pub arrivals: Vec<EstimatedArrival>,
    pub metrics: RouteMetrics,
    pub total_demand: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub total_distance_km: f64,
    pub total_duration_min: f64,
    pub num_trucks: usize,
    pub total_stops: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryPlan {
    pub trucks: Vec<TruckRoute>,
    pub summary: PlanSummary,
    pub unassigned: Vec<UnassignedStop>,
    /// Balancing ran out of iterations before every group fit.
    pub overloaded: bool,
}

pub fn plan_deliveries(
    request: &DeliveryRequest,
    options: &ClusterOptions,
    sequencer: &RouteSequencer<'_>,
    geocoder: Option<&dyn Geocoder>,
) -> Result<DeliveryPlan, PlanError> {
    if request.num_vehicles == 0 {
        return Err(PlanError::EmptyFleet);
    }
    if request.limits.max_stops == 0 {
        return Err(PlanError::ZeroStopCeiling);
    }
    let departure = clock::parse_hhmm(&request.departure_time)?;
    validate_stops(&request.stops)?;

    let depot = resolve(request.depot.location, request.depot.address.as_deref(), geocoder)
        .ok_or(PlanError::UnlocatedDepot)?;
    if !geo::is_valid_coordinate(depot) {
        return Err(PlanError::InvalidCoordinates {
            id: "depot".to_string(),
            lat: depot.0,
            lon: depot.1,
        });
    }

    let mut unassigned = Vec::new();
    let mut located = Vec::with_capacity(request.stops.len());
    for stop in &request.stops {
        match resolve(stop.location, stop.address.as_deref(), geocoder).filter(|&p| geo::is_valid_coordinate(p)) {
            Some(location) => located.push(LocatedStop {
                stop: stop.clone(),
                location,
            }),
            None => {
                warn!(stop = %stop.id, "stop has no usable coordinates");
                unassigned.push(UnassignedStop {
                    stop_id: stop.id.clone(),
                    reason: UnassignedReason::NotGeocoded,
                });
            }
        }
    }

    let clustering = ClusterBalancer::new(depot, request.num_vehicles, request.limits)
        .with_options(options.clone())
        .cluster(&located);

    let mut groups = Vec::with_capacity(clustering.clusters.len());
    for (slot, stops) in clustering.clusters {
        let (kept, removed) = truncate_to_capacity(stops, &request.limits);
        if !removed.is_empty() {
            warn!(slot, removed = removed.len(), "group over vehicle limits, trimming");
        }
        unassigned.extend(removed.into_iter().map(|located| UnassignedStop {
            stop_id: located.stop.id,
            reason: UnassignedReason::OverCapacity,
        }));
        groups.push((slot, kept));
    }

    let trucks: Vec<TruckRoute> = groups
        .into_par_iter()
        .map(|(slot, stops)| build_truck(request, depot, departure, sequencer, slot, &stops))
        .collect();

    let summary = PlanSummary {
        total_distance_km: trucks.iter().map(|t| t.metrics.distance_km).sum(),
        total_duration_min: trucks.iter().map(|t| t.metrics.duration_min).sum(),
        num_trucks: trucks.len(),
        total_stops: request.stops.len(),
    };
    info!(
        trucks = summary.num_trucks,
        stops = summary.total_stops,
        unassigned = unassigned.len(),
        overloaded = clustering.overloaded,
        "delivery plan ready"
    );

    Ok(DeliveryPlan {
        trucks,
        summary,
        unassigned,
        overloaded: clustering.overloaded,
    })
}

fn resolve(location: Option<(f64, f64)>, address: Option<&str>, geocoder: Option<&dyn Geocoder>) -> Option<(f64, f64)> {
    location.or_else(|| {
        let address = address?.trim();
        if address.is_empty() {
            return None;
        }
        geocoder?.geocode(address)
    })
}

fn build_truck(
    request: &DeliveryRequest,
    depot: (f64, f64),
    departure: i64,
    sequencer: &RouteSequencer<'_>,
    slot: usize,
    stops: &[LocatedStop],
) -> TruckRoute {
    let ordered = sequencer.sequence(depot, stops, request.use_external_optimizer);
    let metrics = route_metrics_at(depot, &ordered, request.speed_kmh);
    let minutes = estimate_arrivals(depot, &ordered, departure, request.speed_kmh, |located| {
        located.stop.service_minutes.unwrap_or(request.default_service_minutes)
    });
    debug!(slot, stops = ordered.len(), km = metrics.distance_km, "truck sequenced");

    let arrivals = ordered
        .iter()
        .zip(minutes)
        .map(|(located, minute)| EstimatedArrival {
            stop_id: located.stop.id.clone(),
            arrival_minute: minute,
            eta: clock::format_eta(minute),
        })
        .collect();

    TruckRoute {
        label: format!("Truck_{}", slot + 1),
        slot,
        total_demand: ordered.iter().map(|located| located.stop.demand.max(0.0)).sum(),
        stops: ordered,
        arrivals,
        metrics,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_prefers_coordinates() {
        struct Never;
        impl Geocoder for Never {
            fn geocode(&self, _address: &str) -> Option<(f64, f64)> {
                panic!("should not geocode");
            }
        }
        let never: Option<&dyn Geocoder> = Some(&Never);
        assert_eq!(resolve(Some((1.0, 2.0)), Some("x"), never), Some((1.0, 2.0)));
        assert_eq!(resolve(None, Some("   "), never), None);
        assert_eq!(resolve(None, Some("x"), None), None);
    }

    #[test]
    fn test_unlocated_depot_rejected() {
        let request = DeliveryRequest::new(Depot::address("Yard"), vec![Stop::new("a").at(1.0, 1.0)], 1);
        let err = plan_deliveries(&request, &ClusterOptions::default(), &RouteSequencer::new(), None).unwrap_err();
        assert_eq!(err, PlanError::UnlocatedDepot);
    }
}
