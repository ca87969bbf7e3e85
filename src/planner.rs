//! Single-vehicle day planner with an optional break.
//!
//! Every stop is mandatory. The break is tried first; when the day cannot
//! be planned with it and the break is skippable, the planner retries
//! without it.

use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clock;
use crate::config::{PlannerDefaults, PlannerOptions};
use crate::error::PlanError;
use crate::matrix::DurationMatrix;
use crate::model::{Depot, Stop};
use crate::routing::{BreakRule, Budget, FirstSolutionStrategy, RouteSchedule, RoutingModel};
use crate::solver::{self, ScheduleEntry, TimeFrame};

/// A break the driver should take, e.g. lunch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakRequest {
    /// `HH:MM`; the break may not start earlier.
    pub window_start: String,
    /// `HH:MM`; the break must be over by then.
    pub window_end: String,
    pub minutes: i64,
    pub skippable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteRequest {
    pub depot: Depot,
    pub stops: Vec<Stop>,
    pub date: NaiveDate,
    pub departure_time: String,
    pub work_window_start: String,
    pub work_window_end: String,
    pub default_service_minutes: i64,
    pub lunch: Option<BreakRequest>,
}

impl RouteRequest {
    pub fn new(depot: Depot, stops: Vec<Stop>, date: NaiveDate) -> Self {
        let defaults = PlannerDefaults::default();
        Self {
            depot,
            stops,
            date,
            departure_time: defaults.departure_time,
            work_window_start: defaults.work_window_start,
            work_window_end: defaults.work_window_end,
            default_service_minutes: defaults.service_minutes,
            lunch: None,
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

    pub fn service_minutes(mut self, minutes: i64) -> Self {
        self.default_service_minutes = minutes;
        self
    }

    pub fn lunch(mut self, start: &str, end: &str, minutes: i64, skippable: bool) -> Self {
        self.lunch = Some(BreakRequest {
            window_start: start.to_string(),
            window_end: end.to_string(),
            minutes,
            skippable,
        });
        self
    }
}

/// What happened to the requested break.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BreakOutcome {
    Scheduled,
    /// Dropped because the day only works without it.
    SkippedForFeasibility,
    /// The break is required and the day does not work with it.
    InfeasibleWithRequiredBreak,
    /// Skipped, and the day still does not work.
    InfeasibleWithoutBreak,
    NotRequested,
}

impl BreakOutcome {
    /// Driver-facing description.
    pub fn describe(self) -> &'static str {
        match self {
            BreakOutcome::Scheduled => "Scheduled",
            BreakOutcome::SkippedForFeasibility => "Skipped (needed for feasibility)",
            BreakOutcome::InfeasibleWithRequiredBreak => "No feasible route with required lunch",
            BreakOutcome::InfeasibleWithoutBreak => "No feasible route even without lunch",
            BreakOutcome::NotRequested => "Not requested",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakPlacement {
    pub start_minute: i64,
    pub end_minute: i64,
    pub eta: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedRoute {
    pub date: NaiveDate,
    /// Stop ids in visiting order.
    pub ordered_stops: Vec<String>,
    pub schedule: Vec<ScheduleEntry>,
    pub return_eta: String,
    pub route_minutes: i64,
    pub total_demand: f64,
    pub break_placement: Option<BreakPlacement>,
    pub strategy: Option<FirstSolutionStrategy>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutePlan {
    pub route: Option<PlannedRoute>,
    pub break_outcome: BreakOutcome,
}

impl RoutePlan {
    pub fn is_feasible(&self) -> bool {
        self.route.is_some()
    }
}

/// Plan one vehicle's day over all stops.
///
/// Validation problems are errors; a day that cannot be planned comes back
/// with `route == None`.
pub fn plan_route(
    request: &RouteRequest,
    matrix: &DurationMatrix,
    options: &PlannerOptions,
) -> Result<RoutePlan, PlanError> {
    solver::validate_stops(&request.stops)?;
    let frame = TimeFrame::parse(
        &request.departure_time,
        &request.work_window_start,
        &request.work_window_end,
    )?;
    matrix.validate(request.stops.len() + 1)?;

    let break_rule = match &request.lunch {
        Some(lunch) if lunch.minutes > 0 => Some((
            BreakRule {
                window_start: clock::parse_hhmm(&lunch.window_start)?,
                window_end: clock::parse_hhmm(&lunch.window_end)?,
                duration: lunch.minutes,
            },
            lunch.skippable,
        )),
        _ => None,
    };

    let base = build_model(request, frame, matrix, options);

    let Some((rule, skippable)) = break_rule else {
        let route = solve_once(request, &base, options);
        if route.is_none() {
            warn!(stops = request.stops.len(), "no feasible single-vehicle route");
        }
        return Ok(RoutePlan {
            route,
            break_outcome: BreakOutcome::NotRequested,
        });
    };

    let with_break = RoutingModel {
        break_rule: Some(rule),
        ..base.clone()
    };
    if let Some(route) = solve_once(request, &with_break, options) {
        return Ok(RoutePlan {
            route: Some(route),
            break_outcome: BreakOutcome::Scheduled,
        });
    }

    if !skippable {
        warn!(?rule, "no feasible route with the required break");
        return Ok(RoutePlan {
            route: None,
            break_outcome: BreakOutcome::InfeasibleWithRequiredBreak,
        });
    }

    info!(?rule, "break does not fit, retrying without it");
    let route = solve_once(request, &base, options);
    let break_outcome = if route.is_some() {
        BreakOutcome::SkippedForFeasibility
    } else {
        warn!(stops = request.stops.len(), "no feasible route even without the break");
        BreakOutcome::InfeasibleWithoutBreak
    };
    Ok(RoutePlan { route, break_outcome })
}

fn build_model(
    request: &RouteRequest,
    frame: TimeFrame,
    matrix: &DurationMatrix,
    options: &PlannerOptions,
) -> RoutingModel {
    let horizon = options.horizon_minutes;
    let mut windows = Vec::with_capacity(request.stops.len() + 1);
    windows.push((frame.departure, frame.close));
    windows.extend(request.stops.iter().map(|stop| frame.stop_window(stop, 0, horizon)));
    let latest_return = (frame.close + options.return_grace_minutes).min(horizon - 1);

    RoutingModel {
        travel: matrix.rows().to_vec(),
        service: solver::service_minutes(&request.stops, request.default_service_minutes),
        demand: solver::demands(&request.stops),
        windows,
        return_window: (frame.departure, latest_return),
        num_vehicles: 1,
        max_stops: request.stops.len(),
        max_capacity: None,
        waiting_slack: options.waiting_slack_minutes,
        horizon,
        drop_penalty: None,
        fixed_vehicle_cost: 0,
        break_rule: None,
    }
}

/// Run the strategies until one serves every stop.
fn solve_once(request: &RouteRequest, model: &RoutingModel, options: &PlannerOptions) -> Option<PlannedRoute> {
    if request.stops.is_empty() {
        let schedule = model.evaluate(&[])?;
        return Some(materialize(request, model, &[], schedule, None, options));
    }

    for attempt in &options.strategies {
        let budget = Budget::new(Duration::from_secs(attempt.time_limit_secs), None);
        let solution = model.solve(attempt.strategy, options.local_search_iterations, &budget);
        debug!(
            strategy = ?attempt.strategy,
            served = solution.served(),
            dropped = solution.dropped.len(),
            with_break = model.break_rule.is_some(),
            "single-vehicle attempt finished"
        );
        if !solution.dropped.is_empty() {
            continue;
        }
        let Some(route) = solution.routes.into_iter().next() else {
            continue;
        };
        let Some(schedule) = model.evaluate(&route) else {
            continue;
        };
        return Some(materialize(request, model, &route, schedule, Some(attempt.strategy), options));
    }
    None
}

fn materialize(
    request: &RouteRequest,
    model: &RoutingModel,
    route: &[usize],
    schedule: RouteSchedule,
    strategy: Option<FirstSolutionStrategy>,
    options: &PlannerOptions,
) -> PlannedRoute {
    let entries = solver::schedule_entries(&request.depot, &request.stops, route, &schedule, options.eta_window_minutes);
    let break_placement = schedule
        .break_start
        .zip(model.break_rule)
        .map(|(start, rule)| BreakPlacement {
            start_minute: start,
            end_minute: start + rule.duration,
            eta: clock::format_eta(start),
        });

    PlannedRoute {
        date: request.date,
        ordered_stops: route.iter().map(|&node| request.stops[node - 1].id.clone()).collect(),
        return_eta: clock::format_eta(schedule.return_minute()),
        schedule: entries,
        route_minutes: schedule.cost,
        total_demand: schedule.demand,
        break_placement,
        strategy,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 14).unwrap()
    }

    /// Node i sits i*10 minutes from the depot.
    fn line_matrix(stops: usize) -> DurationMatrix {
        let n = stops + 1;
        DurationMatrix::from_minutes(
            (0..n)
                .map(|i| (0..n).map(|j| (i as i64 - j as i64).abs() * 10).collect())
                .collect(),
        )
    }

    fn quick_options() -> PlannerOptions {
        PlannerOptions {
            local_search_iterations: 50,
            ..PlannerOptions::default()
        }
    }

    #[test]
    fn test_no_break_requested() {
        let request = RouteRequest::new(Depot::address("Yard"), vec![Stop::new("a"), Stop::new("b")], date());
        let plan = plan_route(&request, &line_matrix(2), &quick_options()).unwrap();
        assert!(plan.is_feasible());
        assert_eq!(plan.break_outcome, BreakOutcome::NotRequested);
        let route = plan.route.unwrap();
        assert_eq!(route.ordered_stops, vec!["a", "b"]);
        assert!(route.break_placement.is_none());
    }

    #[test]
    fn test_zero_minute_break_is_not_requested() {
        let request = RouteRequest::new(Depot::address("Yard"), vec![Stop::new("a")], date())
            .lunch("12:00", "13:00", 0, false);
        let plan = plan_route(&request, &line_matrix(1), &quick_options()).unwrap();
        assert_eq!(plan.break_outcome, BreakOutcome::NotRequested);
    }

    #[test]
    fn test_break_scheduled_inside_window() {
        let request = RouteRequest::new(Depot::address("Yard"), vec![Stop::new("a"), Stop::new("b")], date())
            .lunch("11:00", "13:00", 30, false);
        let plan = plan_route(&request, &line_matrix(2), &quick_options()).unwrap();
        assert_eq!(plan.break_outcome, BreakOutcome::Scheduled);
        let placement = plan.route.unwrap().break_placement.unwrap();
        assert!(placement.start_minute >= 660);
        assert!(placement.end_minute <= 780);
    }

    #[test]
    fn test_required_break_that_cannot_fit() {
        let request = RouteRequest::new(Depot::address("Yard"), vec![Stop::new("a")], date())
            .lunch("12:00", "12:10", 30, false);
        let plan = plan_route(&request, &line_matrix(1), &quick_options()).unwrap();
        assert!(!plan.is_feasible());
        assert_eq!(plan.break_outcome, BreakOutcome::InfeasibleWithRequiredBreak);
    }

    #[test]
    fn test_matrix_mismatch_rejected() {
        let request = RouteRequest::new(Depot::address("Yard"), vec![Stop::new("a")], date());
        let err = plan_route(&request, &line_matrix(3), &quick_options()).unwrap_err();
        assert!(matches!(err, PlanError::MatrixDimension { expected: 2, .. }));
    }
}
