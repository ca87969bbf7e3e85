//! Visiting order within one vehicle group.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::geo::{DEFAULT_SPEED_KMH, haversine_km, km_to_minutes};
use crate::traits::{DeliveryStop, RouteOptimizer};

/// Orders a group of stops, preferring an external optimizer when one is
/// configured and the group is small enough for it.
#[derive(Clone, Copy, Default)]
pub struct RouteSequencer<'a> {
    optimizer: Option<&'a dyn RouteOptimizer>,
}

impl<'a> RouteSequencer<'a> {
    pub fn new() -> Self {
        Self { optimizer: None }
    }

    pub fn with_optimizer(optimizer: &'a dyn RouteOptimizer) -> Self {
        Self {
            optimizer: Some(optimizer),
        }
    }

    pub fn has_optimizer(&self) -> bool {
        self.optimizer.is_some()
    }

    /// Return `stops` in visiting order starting from `depot`.
    ///
    /// Groups of zero or one stop come back unchanged. Any optimizer failure,
    /// or an answer that is not a permutation, falls back to nearest
    /// neighbor.
    pub fn sequence<S>(&self, depot: (f64, f64), stops: &[S], use_external: bool) -> Vec<S>
    where
        S: DeliveryStop + Clone,
    {
        if stops.len() <= 1 {
            return stops.to_vec();
        }

        if use_external {
            if let Some(optimizer) = self.optimizer.filter(|opt| stops.len() <= opt.max_waypoints()) {
                let waypoints: Vec<(f64, f64)> = stops.iter().map(DeliveryStop::location).collect();
                match optimizer.optimize(depot, &waypoints) {
                    Some(order) if is_permutation(&order, stops.len()) => {
                        debug!(stops = stops.len(), "using external waypoint order");
                        return order.into_iter().map(|index| stops[index].clone()).collect();
                    }
                    Some(order) => {
                        warn!(returned = order.len(), expected = stops.len(), "optimizer returned an invalid order");
                    }
                    None => debug!("optimizer unavailable, using nearest neighbor"),
                }
            }
        }

        nearest_neighbor(depot, stops)
    }
}

fn is_permutation(order: &[usize], len: usize) -> bool {
    if order.len() != len {
        return false;
    }
    let mut seen = vec![false; len];
    order.iter().all(|&index| index < len && !std::mem::replace(&mut seen[index], true))
}

/// Greedy tour from the depot, always visiting the closest unvisited stop.
pub fn nearest_neighbor<S>(depot: (f64, f64), stops: &[S]) -> Vec<S>
where
    S: DeliveryStop + Clone,
{
    let mut remaining: Vec<&S> = stops.iter().collect();
    let mut route = Vec::with_capacity(stops.len());
    let mut current = depot;

    while !remaining.is_empty() {
        let mut best = 0;
        let mut best_km = f64::INFINITY;
        for (index, stop) in remaining.iter().enumerate() {
            let km = haversine_km(current, stop.location());
            if km < best_km {
                best_km = km;
                best = index;
            }
        }
        let stop = remaining.remove(best);
        current = stop.location();
        route.push(stop.clone());
    }
    route
}

/// Straight-line totals for a depot round trip.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RouteMetrics {
    pub distance_km: f64,
    pub duration_min: f64,
    pub num_stops: usize,
}

/// Round-trip distance and driving time at [`DEFAULT_SPEED_KMH`], both
/// rounded to two decimals.
pub fn route_metrics<S: DeliveryStop>(depot: (f64, f64), route: &[S]) -> RouteMetrics {
    route_metrics_at(depot, route, DEFAULT_SPEED_KMH)
}

pub fn route_metrics_at<S: DeliveryStop>(depot: (f64, f64), route: &[S], speed_kmh: f64) -> RouteMetrics {
    if route.is_empty() {
        return RouteMetrics {
            distance_km: 0.0,
            duration_min: 0.0,
            num_stops: 0,
        };
    }

    let mut total_km = 0.0;
    let mut previous = depot;
    for stop in route {
        total_km += haversine_km(previous, stop.location());
        previous = stop.location();
    }
    total_km += haversine_km(previous, depot);

    RouteMetrics {
        distance_km: round2(total_km),
        duration_min: round2(km_to_minutes(total_km, speed_kmh)),
        num_stops: route.len(),
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Arrival minute at each stop for a vehicle leaving the depot at
/// `departure_minute`, spending `service(stop)` minutes at each.
pub fn estimate_arrivals<S, F>(
    depot: (f64, f64),
    route: &[S],
    departure_minute: i64,
    speed_kmh: f64,
    service: F,
) -> Vec<i64>
where
    S: DeliveryStop,
    F: Fn(&S) -> i64,
{
    let mut clock = departure_minute as f64;
    let mut previous = depot;
    route
        .iter()
        .map(|stop| {
            clock += km_to_minutes(haversine_km(previous, stop.location()), speed_kmh);
            previous = stop.location();
            let arrival = clock.round() as i64;
            clock += service(stop).max(0) as f64;
            arrival
        })
        .collect()
}
