//! Tunable planner settings.
//!
//! Every penalty, budget and bound the heuristics rely on lives here so
//! callers can adjust them without touching the algorithms. All structs
//! deserialize with defaults for missing fields.

use std::env;

use serde::{Deserialize, Serialize};

use crate::routing::FirstSolutionStrategy;

/// Settings for the k-means partition and the rebalancing loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterOptions {
    /// Seed for k-means++ initialization.
    pub seed: u64,
    /// Independent k-means runs; the lowest-inertia run wins.
    pub restarts: usize,
    /// Lloyd iterations per run.
    pub max_kmeans_iterations: usize,
    /// Rebalancing moves before giving up with an overloaded assignment.
    pub max_balance_iterations: usize,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            seed: 42,
            restarts: 10,
            max_kmeans_iterations: 300,
            max_balance_iterations: 100,
        }
    }
}

/// One entry of the solve strategy chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyAttempt {
    pub strategy: FirstSolutionStrategy,
    pub time_limit_secs: u64,
}

impl StrategyAttempt {
    pub const fn new(strategy: FirstSolutionStrategy, time_limit_secs: u64) -> Self {
        Self {
            strategy,
            time_limit_secs,
        }
    }
}

/// Fixed cost charged to a used vehicle while the stop count is at most
/// `max_stops`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedCostTier {
    pub max_stops: usize,
    pub cost: i64,
}

/// Settings for the multi-vehicle schedule solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverOptions {
    /// Longest a vehicle may idle before a window opens.
    pub waiting_slack_minutes: i64,
    pub horizon_minutes: i64,
    /// Added to every stop's window end (capped below the horizon).
    pub window_end_grace_minutes: i64,
    /// Drop penalty when the fleet could hold every stop.
    pub drop_penalty_when_sufficient: i64,
    /// Drop penalty when stops exceed total fleet stop capacity.
    pub drop_penalty_when_overloaded: i64,
    pub fixed_cost_tiers: Vec<FixedCostTier>,
    /// Fixed cost above the last tier.
    pub fixed_cost_default: i64,
    /// Tried in order until one serves every stop the fleet can hold.
    pub strategies: Vec<StrategyAttempt>,
    /// Final attempt with every time window opened to the full day.
    pub relaxed_attempt: Option<StrategyAttempt>,
    /// Improvement passes per attempt.
    pub local_search_iterations: usize,
    /// Width of the delivery window shown next to each ETA.
    pub eta_window_minutes: i64,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            waiting_slack_minutes: 90,
            horizon_minutes: 24 * 60,
            window_end_grace_minutes: 0,
            drop_penalty_when_sufficient: 50_000,
            drop_penalty_when_overloaded: 10_000,
            fixed_cost_tiers: vec![
                FixedCostTier { max_stops: 10, cost: 30 },
                FixedCostTier { max_stops: 20, cost: 45 },
            ],
            fixed_cost_default: 60,
            strategies: vec![
                StrategyAttempt::new(FirstSolutionStrategy::ParallelCheapestInsertion, 30),
                StrategyAttempt::new(FirstSolutionStrategy::PathCheapestArc, 20),
                StrategyAttempt::new(FirstSolutionStrategy::PathMostConstrainedArc, 15),
                StrategyAttempt::new(FirstSolutionStrategy::Savings, 20),
            ],
            relaxed_attempt: Some(StrategyAttempt::new(FirstSolutionStrategy::PathCheapestArc, 20)),
            local_search_iterations: 1000,
            eta_window_minutes: 30,
        }
    }
}

impl SolverOptions {
    /// Fixed vehicle cost for a problem of `stops` stops.
    pub fn fixed_cost_for(&self, stops: usize) -> i64 {
        self.fixed_cost_tiers
            .iter()
            .find(|tier| stops <= tier.max_stops)
            .map(|tier| tier.cost)
            .unwrap_or(self.fixed_cost_default)
    }

    /// Drop penalty given whether the fleet can hold every stop.
    pub fn drop_penalty(&self, capacity_sufficient: bool) -> i64 {
        if capacity_sufficient {
            self.drop_penalty_when_sufficient
        } else {
            self.drop_penalty_when_overloaded
        }
    }
}

/// Settings for the single-vehicle planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerOptions {
    pub waiting_slack_minutes: i64,
    pub horizon_minutes: i64,
    /// How long after the work window closes the vehicle may still return.
    pub return_grace_minutes: i64,
    pub strategies: Vec<StrategyAttempt>,
    pub local_search_iterations: usize,
    pub eta_window_minutes: i64,
}

impl Default for PlannerOptions {
    fn default() -> Self {
        Self {
            waiting_slack_minutes: 60,
            horizon_minutes: 24 * 60,
            return_grace_minutes: 180,
            strategies: vec![
                StrategyAttempt::new(FirstSolutionStrategy::PathCheapestArc, 5),
                StrategyAttempt::new(FirstSolutionStrategy::ParallelCheapestInsertion, 5),
            ],
            local_search_iterations: 1000,
            eta_window_minutes: 30,
        }
    }
}

/// Request defaults, overridable from the environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerDefaults {
    pub departure_time: String,
    pub service_minutes: i64,
    pub work_window_start: String,
    pub work_window_end: String,
    pub osrm_base_url: Option<String>,
}

impl Default for PlannerDefaults {
    fn default() -> Self {
        Self {
            departure_time: "07:00".to_string(),
            service_minutes: 20,
            work_window_start: "08:00".to_string(),
            work_window_end: "18:00".to_string(),
            osrm_base_url: None,
        }
    }
}

impl PlannerDefaults {
    /// Read `DEFAULT_DEPARTURE_TIME`, `DEFAULT_SERVICE_MINUTES` and
    /// `OSRM_BASE_URL`, keeping defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut defaults = Self::default();
        if let Some(departure) = lookup("DEFAULT_DEPARTURE_TIME") {
            let departure = departure.trim();
            if !departure.is_empty() {
                defaults.departure_time = departure.to_string();
            }
        }
        if let Some(minutes) = lookup("DEFAULT_SERVICE_MINUTES") {
            match minutes.trim().parse::<i64>() {
                Ok(value) => defaults.service_minutes = value.max(0),
                Err(_) => tracing::warn!(value = %minutes, "ignoring unparsable DEFAULT_SERVICE_MINUTES"),
            }
        }
        defaults.osrm_base_url = lookup("OSRM_BASE_URL")
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty());
        defaults
    }
}
