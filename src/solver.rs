//! Multi-vehicle delivery schedule solver.
//!
//! Takes every stop plus a full duration matrix and jointly assigns stops to
//! vehicles and sequences them, minimizing vehicles used. When the first
//! strategy leaves stops unserved that the fleet could hold, simpler
//! strategies are tried, and finally one attempt with all time windows
//! opened to the full day.

use std::sync::atomic::AtomicBool;
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clock;
use crate::config::{PlannerDefaults, SolverOptions, StrategyAttempt};
use crate::error::PlanError;
use crate::geo;
use crate::matrix::DurationMatrix;
use crate::model::{Depot, Stop};
use crate::routing::{Budget, FirstSolutionStrategy, RouteSchedule, RoutingModel, Solution, DEPOT};
use crate::traits::PlanSink;

/// Everything the solver needs besides the matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRequest {
    pub depot: Depot,
    pub stops: Vec<Stop>,
    pub date: NaiveDate,
    /// `HH:MM`; no vehicle leaves earlier.
    pub departure_time: String,
    pub work_window_start: String,
    pub work_window_end: String,
    pub default_service_minutes: i64,
    pub max_vehicles: usize,
    pub max_stops_per_vehicle: usize,
    /// Payload ceiling per vehicle; `None` leaves demand unconstrained.
    pub max_capacity: Option<f64>,
}

impl ScheduleRequest {
    pub fn new(depot: Depot, stops: Vec<Stop>, date: NaiveDate) -> Self {
        Self::with_defaults(depot, stops, date, &PlannerDefaults::default())
    }

    pub fn with_defaults(depot: Depot, stops: Vec<Stop>, date: NaiveDate, defaults: &PlannerDefaults) -> Self {
        Self {
            depot,
            stops,
            date,
            departure_time: defaults.departure_time.clone(),
            work_window_start: defaults.work_window_start.clone(),
            work_window_end: defaults.work_window_end.clone(),
            default_service_minutes: defaults.service_minutes,
            max_vehicles: 5,
            max_stops_per_vehicle: 8,
            max_capacity: None,
        }
    }

    pub fn departure(mut self, hhmm: &str) -> Self {
        self.departure_time = hhmm.to_string();
        self
    }

    pub fn work_window(mut self, start: &str, end: &str) -> Self {
        self.work_window_start = start.to_string();
        self.work_window_end = end.to_string();
        self
    }

    pub fn fleet(mut self, vehicles: usize, max_stops_per_vehicle: usize) -> Self {
        self.max_vehicles = vehicles;
        self.max_stops_per_vehicle = max_stops_per_vehicle;
        self
    }

    pub fn capacity(mut self, max_capacity: f64) -> Self {
        self.max_capacity = Some(max_capacity);
        self
    }

    pub fn service_minutes(mut self, minutes: i64) -> Self {
        self.default_service_minutes = minutes;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    DepotStart,
    Delivery,
    DepotReturn,
}

/// One line of a driver's schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub kind: EntryKind,
    pub node: usize,
    pub stop_id: Option<String>,
    pub address: String,
    pub arrival_minute: i64,
    pub eta: String,
    /// Delivery window shown to the customer; deliveries only.
    pub window: Option<String>,
    pub notes: Vec<String>,
}

/// Route of one used vehicle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleSchedule {
    /// 1-based vehicle slot.
    pub driver_index: usize,
    /// Stop ids in visiting order.
    pub stops: Vec<String>,
    pub schedule: Vec<ScheduleEntry>,
    /// Travel plus service minutes.
    pub route_minutes: i64,
    pub total_demand: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiPlan {
    pub date: NaiveDate,
    pub drivers_used: usize,
    pub drivers_max: usize,
    /// Largest route first.
    pub routes: Vec<VehicleSchedule>,
    /// Ids of stops no vehicle serves.
    pub unassigned: Vec<String>,
    pub strategy: Option<FirstSolutionStrategy>,
    /// Arrival times were computed with every window opened to the full day.
    pub relaxed_time_windows: bool,
}

/// Why no plan came out, with the sizes needed to diagnose it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfeasibleReport {
    pub stops: usize,
    pub vehicles: usize,
    pub max_stops_per_vehicle: usize,
    pub relaxed_attempted: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PlanOutcome {
    Feasible(MultiPlan),
    Infeasible(InfeasibleReport),
}

impl PlanOutcome {
    pub fn is_feasible(&self) -> bool {
        matches!(self, PlanOutcome::Feasible(_))
    }

    pub fn plan(&self) -> Option<&MultiPlan> {
        match self {
            PlanOutcome::Feasible(plan) => Some(plan),
            PlanOutcome::Infeasible(_) => None,
        }
    }
}

/// Departure and work window of a request, in minutes since midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TimeFrame {
    pub departure: i64,
    pub open: i64,
    pub close: i64,
}

impl TimeFrame {
    pub(crate) fn parse(departure: &str, open: &str, close: &str) -> Result<Self, PlanError> {
        Ok(Self {
            departure: clock::parse_hhmm(departure)?,
            open: clock::parse_hhmm(open)?,
            close: clock::parse_hhmm(close)?,
        })
    }

    /// Window of a stop: its own, else the work window, never opening before
    /// the departure.
    pub(crate) fn stop_window(&self, stop: &Stop, grace: i64, horizon: i64) -> (i64, i64) {
        let open = stop
            .window_start
            .map(|start| start.max(self.departure))
            .unwrap_or_else(|| self.open.max(self.departure));
        let mut close = stop.window_end.unwrap_or(self.close);
        if grace > 0 {
            close = (close + grace).min(horizon - 1);
        }
        (open, close)
    }
}

pub(crate) fn validate_stops(stops: &[Stop]) -> Result<(), PlanError> {
    for stop in stops {
        if let Some((lat, lon)) = stop.location {
            if !geo::is_valid_coordinate((lat, lon)) {
                return Err(PlanError::InvalidCoordinates {
                    id: stop.id.clone(),
                    lat,
                    lon,
                });
            }
        }
        stop.validate_window()?;
    }
    Ok(())
}

pub(crate) fn service_minutes(stops: &[Stop], default: i64) -> Vec<i64> {
    std::iter::once(0)
        .chain(stops.iter().map(|stop| stop.service_minutes.unwrap_or(default).max(0)))
        .collect()
}

pub(crate) fn demands(stops: &[Stop]) -> Vec<f64> {
    std::iter::once(0.0)
        .chain(stops.iter().map(|stop| stop.demand.max(0.0)))
        .collect()
}

/// Turn an evaluated route into driver-facing schedule lines.
pub(crate) fn schedule_entries(
    depot: &Depot,
    stops: &[Stop],
    route: &[usize],
    schedule: &RouteSchedule,
    eta_window_minutes: i64,
) -> Vec<ScheduleEntry> {
    let depot_label = depot.label();
    let depot_entry = |kind, minute: i64| ScheduleEntry {
        kind,
        node: DEPOT,
        stop_id: None,
        address: depot_label.clone(),
        arrival_minute: minute,
        eta: clock::format_eta(minute),
        window: None,
        notes: Vec::new(),
    };

    let mut entries = Vec::with_capacity(route.len() + 2);
    entries.push(depot_entry(EntryKind::DepotStart, schedule.arrivals[0]));
    for (position, &node) in route.iter().enumerate() {
        let stop = &stops[node - 1];
        let minute = schedule.arrivals[position + 1];
        entries.push(ScheduleEntry {
            kind: EntryKind::Delivery,
            node,
            stop_id: Some(stop.id.clone()),
            address: stop.label(),
            arrival_minute: minute,
            eta: clock::format_eta(minute),
            window: Some(clock::format_window(minute, eta_window_minutes)),
            notes: stop.notes.clone(),
        });
    }
    entries.push(depot_entry(EntryKind::DepotReturn, schedule.return_minute()));
    entries
}

fn build_model(request: &ScheduleRequest, frame: TimeFrame, matrix: &DurationMatrix, options: &SolverOptions) -> RoutingModel {
    let n = request.stops.len();
    let horizon = options.horizon_minutes;
    let capacity_sufficient = request.max_vehicles * request.max_stops_per_vehicle >= n;

    let mut windows = Vec::with_capacity(n + 1);
    windows.push((frame.departure, horizon));
    windows.extend(
        request
            .stops
            .iter()
            .map(|stop| frame.stop_window(stop, options.window_end_grace_minutes, horizon)),
    );

    RoutingModel {
        travel: matrix.rows().to_vec(),
        service: service_minutes(&request.stops, request.default_service_minutes),
        demand: demands(&request.stops),
        windows,
        return_window: (frame.departure, horizon),
        num_vehicles: request.max_vehicles,
        max_stops: request.max_stops_per_vehicle,
        max_capacity: request.max_capacity,
        waiting_slack: options.waiting_slack_minutes,
        horizon,
        drop_penalty: Some(options.drop_penalty(capacity_sufficient)),
        fixed_vehicle_cost: options.fixed_cost_for(n),
        break_rule: None,
    }
}

fn run_attempt(
    model: &RoutingModel,
    attempt: &StrategyAttempt,
    iterations: usize,
    cancel: Option<&AtomicBool>,
) -> Solution {
    let budget = Budget::new(Duration::from_secs(attempt.time_limit_secs), cancel);
    model.solve(attempt.strategy, iterations, &budget)
}

/// Solve a multi-vehicle schedule.
///
/// Validation problems are errors; an unsolvable instance is an
/// [`PlanOutcome::Infeasible`] value.
pub fn solve(
    request: &ScheduleRequest,
    matrix: &DurationMatrix,
    options: &SolverOptions,
) -> Result<PlanOutcome, PlanError> {
    solve_cancellable(request, matrix, options, None)
}

/// [`solve`] with a caller-owned cancel flag checked throughout the search.
///
/// Setting the flag ends the current attempt with the best solution so far.
pub fn solve_cancellable(
    request: &ScheduleRequest,
    matrix: &DurationMatrix,
    options: &SolverOptions,
    cancel: Option<&AtomicBool>,
) -> Result<PlanOutcome, PlanError> {
    if request.max_vehicles == 0 {
        return Err(PlanError::EmptyFleet);
    }
    if request.max_stops_per_vehicle == 0 {
        return Err(PlanError::ZeroStopCeiling);
    }
    validate_stops(&request.stops)?;
    let frame = TimeFrame::parse(
        &request.departure_time,
        &request.work_window_start,
        &request.work_window_end,
    )?;

    let n = request.stops.len();
    if n == 0 {
        info!("no stops to schedule");
        return Ok(PlanOutcome::Feasible(MultiPlan {
            date: request.date,
            drivers_used: 0,
            drivers_max: request.max_vehicles,
            routes: Vec::new(),
            unassigned: Vec::new(),
            strategy: None,
            relaxed_time_windows: false,
        }));
    }
    matrix.validate(n + 1)?;

    let model = build_model(request, frame, matrix, options);
    let vehicles = request.max_vehicles;
    let ceiling = request.max_stops_per_vehicle;
    let structural_drops = n.saturating_sub(vehicles * ceiling);
    debug!(
        stops = n,
        vehicles,
        ceiling,
        departure = frame.departure,
        penalty_cells = matrix.penalty_cells(),
        fixed_cost = model.fixed_vehicle_cost,
        "solving delivery schedule"
    );
    if structural_drops > 0 {
        warn!(stops = n, capacity = vehicles * ceiling, "more stops than the fleet can hold; excess will be dropped");
    }

    let acceptable = |solution: &Solution| solution.served() > 0 && solution.dropped.len() <= structural_drops;
    let mut best: Option<(Solution, FirstSolutionStrategy)> = None;

    for attempt in &options.strategies {
        let solution = run_attempt(&model, attempt, options.local_search_iterations, cancel);
        debug!(
            strategy = ?attempt.strategy,
            served = solution.served(),
            dropped = solution.dropped.len(),
            vehicles_used = solution.used_vehicles(),
            "strategy finished"
        );
        let done = acceptable(&solution);
        let better = best.as_ref().is_none_or(|(current, _)| {
            (solution.dropped.len(), model.objective(&solution)) < (current.dropped.len(), model.objective(current))
        });
        if better {
            best = Some((solution, attempt.strategy));
        }
        if done {
            break;
        }
        warn!(strategy = ?attempt.strategy, "strategy left servable stops unassigned, trying next");
    }

    let mut relaxed = false;
    let mut relaxed_attempted = false;
    let relaxed_model = model.relaxed();
    if !best.as_ref().is_some_and(|(solution, _)| acceptable(solution)) {
        if let Some(attempt) = options.relaxed_attempt {
            relaxed_attempted = true;
            let solution = run_attempt(&relaxed_model, &attempt, options.local_search_iterations, cancel);
            let served_before = best.as_ref().map_or(0, |(current, _)| current.served());
            if solution.served() > served_before {
                info!(
                    served = solution.served(),
                    served_before, "plan found only after relaxing time windows"
                );
                best = Some((solution, attempt.strategy));
                relaxed = true;
            }
        }
    }

    let infeasible = |message: String| {
        PlanOutcome::Infeasible(InfeasibleReport {
            stops: n,
            vehicles,
            max_stops_per_vehicle: ceiling,
            relaxed_attempted,
            message,
        })
    };

    let Some((solution, strategy)) = best.filter(|(solution, _)| solution.served() > 0) else {
        warn!(stops = n, vehicles, ceiling, "no feasible plan after all strategies");
        return Ok(infeasible(format!(
            "No feasible plan found. Received: {n} stops, {vehicles} drivers, max {ceiling} stops/driver. \
             Even with relaxed time windows no stop could be served; check the matrix for unrealistic travel times."
        )));
    };

    let model = if relaxed { &relaxed_model } else { &model };
    let plan = extract(request, model, &solution, strategy, relaxed, options);
    if plan.drivers_used == 0 {
        return Ok(infeasible(format!(
            "Solver served stops but no route could be extracted ({n} stops, {vehicles} vehicles)."
        )));
    }
    info!(
        drivers_used = plan.drivers_used,
        unassigned = plan.unassigned.len(),
        relaxed,
        "delivery schedule ready"
    );
    Ok(PlanOutcome::Feasible(plan))
}

fn extract(
    request: &ScheduleRequest,
    model: &RoutingModel,
    solution: &Solution,
    strategy: FirstSolutionStrategy,
    relaxed: bool,
    options: &SolverOptions,
) -> MultiPlan {
    let mut unassigned_nodes = solution.dropped.clone();
    let mut routes = Vec::new();

    for (vehicle, route) in solution.routes.iter().enumerate() {
        if route.is_empty() {
            continue;
        }
        let Some(schedule) = model.evaluate(route) else {
            warn!(vehicle, "route no longer evaluates; reporting its stops as unassigned");
            unassigned_nodes.extend_from_slice(route);
            continue;
        };
        routes.push(VehicleSchedule {
            driver_index: vehicle + 1,
            stops: route.iter().map(|&node| request.stops[node - 1].id.clone()).collect(),
            schedule: schedule_entries(&request.depot, &request.stops, route, &schedule, options.eta_window_minutes),
            route_minutes: schedule.cost,
            total_demand: schedule.demand,
        });
    }

    routes.sort_by(|a, b| b.stops.len().cmp(&a.stops.len()));
    unassigned_nodes.sort_unstable();

    MultiPlan {
        date: request.date,
        drivers_used: routes.len(),
        drivers_max: request.max_vehicles,
        routes,
        unassigned: unassigned_nodes
            .into_iter()
            .map(|node| request.stops[node - 1].id.clone())
            .collect(),
        strategy: Some(strategy),
        relaxed_time_windows: relaxed,
    }
}

/// Hand a feasible plan to a sink, logging rather than failing on errors.
pub fn publish<S: PlanSink>(outcome: &PlanOutcome, sink: &S) {
    if let Some(plan) = outcome.plan() {
        if let Err(err) = sink.accept(plan) {
            warn!(error = %err, "plan sink rejected the plan");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> TimeFrame {
        TimeFrame::parse("07:00", "08:00", "18:00").unwrap()
    }

    #[test]
    fn test_stop_window_defaults_to_work_window() {
        let window = frame().stop_window(&Stop::new("a"), 0, 1440);
        assert_eq!(window, (480, 1080));
    }

    #[test]
    fn test_stop_window_floored_at_departure() {
        let stop = Stop::new("a").window(360, 600);
        assert_eq!(frame().stop_window(&stop, 0, 1440), (420, 600));
    }

    #[test]
    fn test_work_window_before_departure() {
        let frame = TimeFrame::parse("09:00", "08:00", "18:00").unwrap();
        assert_eq!(frame.stop_window(&Stop::new("a"), 0, 1440), (540, 1080));
    }

    #[test]
    fn test_grace_capped_below_horizon() {
        let stop = Stop::new("a").window(600, 1400);
        assert_eq!(frame().stop_window(&stop, 180, 1440), (600, 1439));
    }

    #[test]
    fn test_service_defaults() {
        let stops = vec![Stop::new("a"), Stop::new("b").service(5), Stop::new("c").service(-3)];
        assert_eq!(service_minutes(&stops, 20), vec![0, 20, 5, 0]);
    }

    #[test]
    fn test_validate_stops_rejects_bad_coordinates() {
        let stops = vec![Stop::new("a").at(120.0, 0.0)];
        assert!(matches!(
            validate_stops(&stops),
            Err(PlanError::InvalidCoordinates { .. })
        ));
    }
}
