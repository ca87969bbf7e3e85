//! Spatial clustering of stops into vehicle groups.
//!
//! Stops are partitioned with seeded k-means (k-means++ initialization, a
//! fixed number of restarts, lowest inertia wins) and the partition is then
//! rebalanced so that every group respects the per-vehicle stop ceiling and
//! payload capacity. Rebalancing is bounded; when the bound runs out the
//! caller gets the assignment with `overloaded` set.

use std::collections::BTreeMap;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ClusterOptions;
use crate::geo::{centroid, haversine_km};
use crate::model::VehicleLimits;
use crate::traits::DeliveryStop;

/// Stops grouped by vehicle slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clustering<S> {
    pub clusters: BTreeMap<usize, Vec<S>>,
    /// Some cluster still breaks a limit after the rebalancing bound.
    pub overloaded: bool,
    pub balance_iterations: usize,
}

impl<S> Clustering<S> {
    fn empty() -> Self {
        Self {
            clusters: BTreeMap::new(),
            overloaded: false,
            balance_iterations: 0,
        }
    }

    pub fn stop_count(&self) -> usize {
        self.clusters.values().map(Vec::len).sum()
    }
}

#[derive(Debug, Clone)]
pub struct ClusterBalancer {
    pub depot: (f64, f64),
    pub num_vehicles: usize,
    pub limits: VehicleLimits,
    pub options: ClusterOptions,
}

impl ClusterBalancer {
    pub fn new(depot: (f64, f64), num_vehicles: usize, limits: VehicleLimits) -> Self {
        Self {
            depot,
            num_vehicles,
            limits,
            options: ClusterOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ClusterOptions) -> Self {
        self.options = options;
        self
    }

    /// Partition `stops` into at most `num_vehicles` groups.
    ///
    /// Every input stop ends up in exactly one group. Groups are ordered by
    /// distance from the depot, nearest first.
    pub fn cluster<S>(&self, stops: &[S]) -> Clustering<S>
    where
        S: DeliveryStop + Clone,
    {
        if stops.is_empty() || self.num_vehicles == 0 {
            return Clustering::empty();
        }

        let points: Vec<(f64, f64)> = stops.iter().map(DeliveryStop::location).collect();
        let k = self.num_vehicles.min(stops.len());
        let run = best_kmeans(&points, k, &self.options);
        debug!(stops = stops.len(), k, inertia = run.inertia, "k-means partition ready");

        let mut clusters: BTreeMap<usize, Vec<S>> = (0..k).map(|slot| (slot, Vec::new())).collect();
        for (stop, &label) in stops.iter().zip(&run.labels) {
            clusters.entry(label).or_default().push(stop.clone());
        }
        for members in clusters.values_mut() {
            self.sort_from_depot(members);
        }

        let (overloaded, balance_iterations) = self.rebalance(&mut clusters);
        for members in clusters.values_mut() {
            self.sort_from_depot(members);
        }
        if overloaded {
            warn!(
                iterations = balance_iterations,
                max_stops = self.limits.max_stops,
                max_capacity = self.limits.max_capacity,
                "clusters still exceed vehicle limits after rebalancing"
            );
        }

        Clustering {
            clusters,
            overloaded,
            balance_iterations,
        }
    }

    fn sort_from_depot<S: DeliveryStop>(&self, stops: &mut [S]) {
        let depot = self.depot;
        stops.sort_by(|a, b| haversine_km(depot, a.location()).total_cmp(&haversine_km(depot, b.location())));
    }

    /// Combined relative excess over both limits; zero when within limits.
    fn excess_ratio<S: DeliveryStop>(&self, stops: &[S]) -> f64 {
        let count_ratio = stops.len() as f64 / self.limits.max_stops.max(1) as f64 - 1.0;
        let demand = total_demand(stops);
        let capacity_ratio = if self.limits.max_capacity > 0.0 {
            demand / self.limits.max_capacity - 1.0
        } else if demand > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };
        count_ratio.max(0.0) + capacity_ratio.max(0.0)
    }

    /// Move stops out of overloaded clusters. Returns the overloaded flag and
    /// the number of moves made.
    fn rebalance<S: DeliveryStop>(&self, clusters: &mut BTreeMap<usize, Vec<S>>) -> (bool, usize) {
        let max_iterations = self.options.max_balance_iterations;
        for iteration in 0..max_iterations {
            let worst = clusters
                .iter()
                .map(|(&slot, stops)| (slot, self.excess_ratio(stops)))
                .filter(|(_, ratio)| *ratio > 0.0)
                .fold(None, |best: Option<(usize, f64)>, (slot, ratio)| match best {
                    Some((_, best_ratio)) if best_ratio >= ratio => best,
                    _ => Some((slot, ratio)),
                });
            let Some((source, _)) = worst else {
                return (false, iteration);
            };
            if clusters.len() < 2 {
                return (true, iteration);
            }

            let Some(stop) = clusters.get_mut(&source).and_then(|stops| self.take_excess_stop(stops)) else {
                return (true, iteration);
            };
            let target = self.pick_target(clusters, source, &stop);
            clusters.entry(target).or_default().push(stop);
        }

        let overloaded = clusters.values().any(|stops| self.excess_ratio(stops) > 0.0);
        (overloaded, max_iterations)
    }

    /// Remove the stop whose move best relieves `stops`.
    fn take_excess_stop<S: DeliveryStop>(&self, stops: &mut Vec<S>) -> Option<S> {
        let capacity_binding = total_demand(stops) > self.limits.max_capacity;
        let index = if capacity_binding {
            argmax(stops.iter().map(|stop| stop.demand()))
        } else {
            let center = centroid(stops.iter().map(|stop| stop.location())).unwrap_or(self.depot);
            argmax(stops.iter().map(|stop| haversine_km(center, stop.location())))
        };
        let index = index?;
        Some(stops.remove(index))
    }

    /// Nearest-centroid cluster that can legally take `stop`, else the least
    /// loaded other cluster.
    fn pick_target<S: DeliveryStop>(&self, clusters: &BTreeMap<usize, Vec<S>>, source: usize, stop: &S) -> usize {
        let demand = stop.demand();
        let location = stop.location();

        let legal = clusters
            .iter()
            .filter(|(slot, stops)| {
                **slot != source
                    && stops.len() < self.limits.max_stops
                    && total_demand(stops.as_slice()) + demand <= self.limits.max_capacity
            })
            .map(|(&slot, stops)| {
                let center = centroid(stops.iter().map(|s| s.location())).unwrap_or(self.depot);
                let load = total_demand(stops.as_slice()) + stops.len() as f64;
                (slot, haversine_km(center, location), load)
            })
            .min_by(|a, b| a.1.total_cmp(&b.1).then(a.2.total_cmp(&b.2)));
        if let Some((slot, _, _)) = legal {
            return slot;
        }

        clusters
            .iter()
            .filter(|(slot, _)| **slot != source)
            .min_by(|(_, a), (_, b)| {
                total_demand(a.as_slice())
                    .total_cmp(&total_demand(b.as_slice()))
                    .then(a.len().cmp(&b.len()))
            })
            .map(|(&slot, _)| slot)
            .unwrap_or(source)
    }
}

/// Drop stops from an overloaded group until it fits the limits.
///
/// Stops are kept greedily by descending demand; kept stops retain their
/// input order. Returns `(kept, removed)`.
pub fn truncate_to_capacity<S>(stops: Vec<S>, limits: &VehicleLimits) -> (Vec<S>, Vec<S>)
where
    S: DeliveryStop,
{
    if stops.len() <= limits.max_stops && total_demand(&stops) <= limits.max_capacity {
        return (stops, Vec::new());
    }

    let mut order: Vec<usize> = (0..stops.len()).collect();
    order.sort_by(|&a, &b| stops[b].demand().total_cmp(&stops[a].demand()));

    let mut keep = vec![false; stops.len()];
    let mut load = 0.0;
    let mut count = 0;
    for index in order {
        let demand = stops[index].demand();
        if count < limits.max_stops && load + demand <= limits.max_capacity {
            keep[index] = true;
            load += demand;
            count += 1;
        }
    }

    let (kept, removed): (Vec<_>, Vec<_>) = stops.into_iter().zip(keep).partition(|(_, kept)| *kept);
    (
        kept.into_iter().map(|(stop, _)| stop).collect(),
        removed.into_iter().map(|(stop, _)| stop).collect(),
    )
}

fn total_demand<S: DeliveryStop>(stops: &[S]) -> f64 {
    stops.iter().map(DeliveryStop::demand).sum()
}

/// Index of the first maximum.
fn argmax<I: Iterator<Item = f64>>(values: I) -> Option<usize> {
    values
        .enumerate()
        .fold(None, |best: Option<(usize, f64)>, (index, value)| match best {
            Some((_, current)) if current >= value => best,
            _ => Some((index, value)),
        })
        .map(|(index, _)| index)
}

// ----------------------------------------------------------------------
// k-means
// ----------------------------------------------------------------------

#[derive(Debug, Clone)]
struct KMeansRun {
    labels: Vec<usize>,
    inertia: f64,
}

fn squared_distance(a: (f64, f64), b: (f64, f64)) -> f64 {
    (a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)
}

fn nearest_center(centers: &[(f64, f64)], point: (f64, f64)) -> usize {
    centers
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| squared_distance(**a, point).total_cmp(&squared_distance(**b, point)))
        .map(|(index, _)| index)
        .unwrap_or(0)
}

/// Seed of restart `restart`; restart 0 uses the caller's seed.
fn restart_seed(seed: u64, restart: usize) -> u64 {
    seed ^ (restart as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

/// Run every restart in parallel and keep the lowest inertia, ties going to
/// the lowest restart index.
fn best_kmeans(points: &[(f64, f64)], k: usize, options: &ClusterOptions) -> KMeansRun {
    (0..options.restarts.max(1))
        .into_par_iter()
        .map(|restart| {
            let seed = restart_seed(options.seed, restart);
            (restart, kmeans(points, k, seed, options.max_kmeans_iterations))
        })
        .min_by(|(ra, a), (rb, b)| a.inertia.total_cmp(&b.inertia).then(ra.cmp(rb)))
        .map(|(_, run)| run)
        .unwrap_or_else(|| KMeansRun {
            labels: vec![0; points.len()],
            inertia: 0.0,
        })
}

/// k-means++ initialization.
fn seed_centers(points: &[(f64, f64)], k: usize, rng: &mut SmallRng) -> Vec<(f64, f64)> {
    let n = points.len();
    let mut centers = Vec::with_capacity(k);
    centers.push(points[rng.gen_range(0..n)]);
    let mut weights: Vec<f64> = points.iter().map(|&p| squared_distance(p, centers[0])).collect();

    while centers.len() < k {
        let total: f64 = weights.iter().sum();
        let next = if total > 0.0 {
            let mut target = rng.r#gen::<f64>() * total;
            let mut chosen = n - 1;
            for (index, weight) in weights.iter().enumerate() {
                if target < *weight {
                    chosen = index;
                    break;
                }
                target -= weight;
            }
            chosen
        } else {
            rng.gen_range(0..n)
        };
        let center = points[next];
        centers.push(center);
        for (weight, &point) in weights.iter_mut().zip(points) {
            *weight = weight.min(squared_distance(point, center));
        }
    }
    centers
}

fn kmeans(points: &[(f64, f64)], k: usize, seed: u64, max_iterations: usize) -> KMeansRun {
    let n = points.len();
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut centers = seed_centers(points, k, &mut rng);
    let mut labels = vec![usize::MAX; n];

    for _ in 0..max_iterations.max(1) {
        let mut changed = false;
        for (label, &point) in labels.iter_mut().zip(points) {
            let nearest = nearest_center(&centers, point);
            if *label != nearest {
                *label = nearest;
                changed = true;
            }
        }

        let mut sums = vec![(0.0, 0.0, 0usize); k];
        for (&label, &(lat, lng)) in labels.iter().zip(points) {
            let entry = &mut sums[label];
            entry.0 += lat;
            entry.1 += lng;
            entry.2 += 1;
        }
        for cluster in 0..k {
            let (lat_sum, lng_sum, count) = sums[cluster];
            if count > 0 {
                centers[cluster] = (lat_sum / count as f64, lng_sum / count as f64);
                continue;
            }
            // Empty cluster: steal the point farthest from its own center.
            let Some(far) = (0..n)
                .filter(|&i| sums[labels[i]].2 > 1)
                .max_by(|&a, &b| {
                    squared_distance(points[a], centers[labels[a]])
                        .total_cmp(&squared_distance(points[b], centers[labels[b]]))
                })
            else {
                continue;
            };
            sums[labels[far]].2 -= 1;
            sums[cluster].2 = 1;
            centers[cluster] = points[far];
            labels[far] = cluster;
            changed = true;
        }

        if !changed {
            break;
        }
    }

    let inertia = labels
        .iter()
        .zip(points)
        .map(|(&label, &point)| squared_distance(point, centers[label]))
        .sum();
    KMeansRun { labels, inertia }
}
