//! Multi-vehicle schedule solver tests.
//!
//! Ordering, fleet usage, time windows, capacity, degradation and
//! validation, all on hand-checkable line matrices.

mod fixtures;

use std::cell::RefCell;
use std::sync::atomic::AtomicBool;

use delivery_planner::config::{SolverOptions, StrategyAttempt};
use delivery_planner::error::PlanError;
use delivery_planner::matrix::DurationMatrix;
use delivery_planner::model::{Depot, Stop};
use delivery_planner::routing::FirstSolutionStrategy;
use delivery_planner::solver::{
    EntryKind, MultiPlan, PlanOutcome, ScheduleRequest, publish, solve, solve_cancellable,
};
use delivery_planner::traits::PlanSink;

use fixtures::*;

fn request(stops: Vec<Stop>) -> ScheduleRequest {
    ScheduleRequest::new(Depot::address("Fuel Yard"), stops, plan_date())
}

fn feasible(outcome: PlanOutcome) -> MultiPlan {
    match outcome {
        PlanOutcome::Feasible(plan) => plan,
        PlanOutcome::Infeasible(report) => panic!("expected a plan: {}", report.message),
    }
}

fn assert_schedule_shape(plan: &MultiPlan) {
    for route in &plan.routes {
        let kinds: Vec<EntryKind> = route.schedule.iter().map(|entry| entry.kind).collect();
        assert_eq!(kinds.first(), Some(&EntryKind::DepotStart));
        assert_eq!(kinds.last(), Some(&EntryKind::DepotReturn));
        assert!(kinds[1..kinds.len() - 1].iter().all(|kind| *kind == EntryKind::Delivery));
        let minutes: Vec<i64> = route.schedule.iter().map(|entry| entry.arrival_minute).collect();
        assert!(minutes.windows(2).all(|pair| pair[0] <= pair[1]), "arrivals go backwards: {minutes:?}");
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn test_one_vehicle_visits_nearest_first() {
    let request = request(line_stops(5))
        .departure("07:00")
        .work_window("07:00", "18:00")
        .fleet(1, 5);
    let plan = feasible(solve(&request, &line_matrix(5, 10), &quick_solver_options()).unwrap());

    assert_eq!(plan.drivers_used, 1);
    assert!(plan.unassigned.is_empty());
    let route = &plan.routes[0];
    assert_eq!(ids(&route.stops), vec!["s1", "s2", "s3", "s4", "s5"]);

    let minutes: Vec<i64> = route.schedule.iter().map(|entry| entry.arrival_minute).collect();
    // 10 minutes between neighbours, 20 minutes of service at each stop.
    assert_eq!(minutes, vec![420, 430, 460, 490, 520, 550, 620]);
    assert!(minutes.windows(2).all(|pair| pair[0] < pair[1]));
    assert_eq!(route.schedule[1].eta, "7:10 AM");
    assert_eq!(route.schedule[1].window.as_deref(), Some("7:10 AM – 7:40 AM"));
    assert_eq!(route.schedule[0].address, "Fuel Yard");
}

#[test]
fn test_ceiling_of_one_uses_a_vehicle_per_stop() {
    let request = request(line_stops(3)).fleet(3, 1);
    let plan = feasible(solve(&request, &line_matrix(3, 10), &quick_solver_options()).unwrap());

    assert_eq!(plan.drivers_used, 3);
    assert_eq!(plan.drivers_max, 3);
    assert!(plan.routes.iter().all(|route| route.stops.len() == 1));
    let mut served: Vec<&str> = plan.routes.iter().flat_map(|route| ids(&route.stops)).collect();
    served.sort_unstable();
    assert_eq!(served, vec!["s1", "s2", "s3"]);
    assert_schedule_shape(&plan);
}

#[test]
fn test_routes_sorted_by_stop_count() {
    let request = request(line_stops(5)).fleet(2, 3);
    let plan = feasible(solve(&request, &line_matrix(5, 10), &quick_solver_options()).unwrap());

    assert_eq!(plan.drivers_used, 2);
    assert!(plan.routes.windows(2).all(|pair| pair[0].stops.len() >= pair[1].stops.len()));
    assert!(plan.routes.iter().all(|route| route.stops.len() <= 3));
    assert!(plan.unassigned.is_empty());
}

#[test]
fn test_declared_window_is_respected() {
    let stops = vec![
        Stop::new("a").address("A"),
        Stop::new("b").address("B").window_hhmm("10:00", "10:30").unwrap(),
        Stop::new("c").address("C"),
    ];
    let request = request(stops).fleet(1, 5);
    let plan = feasible(solve(&request, &line_matrix(3, 10), &quick_solver_options()).unwrap());

    let entry = plan.routes[0]
        .schedule
        .iter()
        .find(|entry| entry.stop_id.as_deref() == Some("b"))
        .unwrap();
    assert!((600..=630).contains(&entry.arrival_minute), "arrived {}", entry.arrival_minute);
    assert_schedule_shape(&plan);
}

#[test]
fn test_capacity_splits_heavy_stops() {
    let stops = (1..=4)
        .map(|i| Stop::new(format!("s{i}")).demand(600.0))
        .collect();
    let request = request(stops).fleet(4, 4).capacity(1000.0);
    let plan = feasible(solve(&request, &line_matrix(4, 10), &quick_solver_options()).unwrap());

    assert_eq!(plan.drivers_used, 4);
    assert!(plan.routes.iter().all(|route| route.total_demand <= 1000.0));
    assert!(plan.unassigned.is_empty());
}

#[test]
fn test_excess_stops_are_reported_unassigned() {
    let request = request(line_stops(5)).fleet(1, 3);
    let plan = feasible(solve(&request, &line_matrix(5, 10), &quick_solver_options()).unwrap());

    assert_eq!(plan.routes[0].stops.len(), 3);
    assert_eq!(plan.unassigned.len(), 2);
}

// ============================================================================
// Degradation
// ============================================================================

#[test]
fn test_unreachable_window_solved_with_relaxation() {
    // 70 minutes out: the earliest arrival is 08:10, the window closes 08:05.
    let stops = vec![Stop::new("far").address("Far").window(480, 485)];
    let matrix = DurationMatrix::from_minutes(vec![vec![0, 70], vec![70, 0]]);
    let request = request(stops).departure("07:00").fleet(1, 1);
    let plan = feasible(solve(&request, &matrix, &quick_solver_options()).unwrap());

    assert!(plan.relaxed_time_windows);
    assert_eq!(plan.drivers_used, 1);
    assert_eq!(plan.routes[0].schedule[1].arrival_minute, 490);
}

#[test]
fn test_sentinel_matrix_over_capacity_is_infeasible_or_drops() {
    let request = request(line_stops(4)).fleet(1, 2);
    let outcome = solve(&request, &sentinel_matrix(4), &quick_solver_options()).unwrap();

    match outcome {
        PlanOutcome::Infeasible(report) => {
            assert_eq!(report.stops, 4);
            assert_eq!(report.vehicles, 1);
            assert_eq!(report.max_stops_per_vehicle, 2);
            assert!(report.relaxed_attempted);
        }
        PlanOutcome::Feasible(plan) => assert!(!plan.unassigned.is_empty()),
    }
}

#[test]
fn test_failed_strategy_falls_through_to_next() {
    // A zero-second budget ends the first attempt before it inserts anything.
    let options = SolverOptions {
        strategies: vec![
            StrategyAttempt::new(FirstSolutionStrategy::ParallelCheapestInsertion, 0),
            StrategyAttempt::new(FirstSolutionStrategy::Savings, 20),
        ],
        ..quick_solver_options()
    };
    let request = request(line_stops(3)).fleet(2, 5);
    let plan = feasible(solve(&request, &line_matrix(3, 10), &options).unwrap());

    assert_eq!(plan.strategy, Some(FirstSolutionStrategy::Savings));
    assert!(!plan.relaxed_time_windows);
    assert!(plan.unassigned.is_empty());
    assert_schedule_shape(&plan);
}

#[test]
fn test_first_successful_strategy_is_recorded() {
    let request = request(line_stops(3)).fleet(2, 5);
    let plan = feasible(solve(&request, &line_matrix(3, 10), &quick_solver_options()).unwrap());
    assert_eq!(plan.strategy, Some(FirstSolutionStrategy::ParallelCheapestInsertion));
}

#[test]
fn test_overflowing_minutes_are_unroutable() {
    let n = 3;
    let minutes = (0..n)
        .map(|i| (0..n).map(|j| if i == j { 0 } else { i64::MAX }).collect())
        .collect();
    let request = request(line_stops(2)).fleet(1, 5);
    let outcome = solve(&request, &DurationMatrix::from_minutes(minutes), &quick_solver_options()).unwrap();
    assert!(!outcome.is_feasible());
}

#[test]
fn test_negative_minutes_never_run_time_backwards() {
    let matrix = DurationMatrix::from_minutes(vec![vec![0, 10, 20], vec![10, 0, -200], vec![20, -200, 0]]);
    let request = request(line_stops(2)).fleet(1, 5);
    let plan = feasible(solve(&request, &matrix, &quick_solver_options()).unwrap());

    assert_eq!(plan.routes[0].stops.len(), 2);
    assert_schedule_shape(&plan);
}

#[test]
fn test_cancelled_solve_reports_infeasible() {
    let cancel = AtomicBool::new(true);
    let request = request(line_stops(3)).fleet(1, 5);
    let outcome = solve_cancellable(&request, &line_matrix(3, 10), &quick_solver_options(), Some(&cancel)).unwrap();
    assert!(!outcome.is_feasible());
}

// ============================================================================
// Validation
// ============================================================================

#[test]
fn test_zero_stops_is_an_empty_plan() {
    let request = request(Vec::new());
    // The matrix is not consulted at all.
    let plan = feasible(solve(&request, &line_matrix(3, 10), &quick_solver_options()).unwrap());
    assert_eq!(plan.drivers_used, 0);
    assert!(plan.routes.is_empty());
    assert!(plan.strategy.is_none());
}

#[test]
fn test_matrix_size_mismatch_rejected() {
    let request = request(line_stops(3));
    let err = solve(&request, &line_matrix(2, 10), &quick_solver_options()).unwrap_err();
    assert_eq!(
        err,
        PlanError::MatrixDimension {
            expected: 4,
            rows: 3,
            cols: 3
        }
    );
}

#[test]
fn test_empty_fleet_and_zero_ceiling_rejected() {
    let matrix = line_matrix(2, 10);
    let options = quick_solver_options();
    assert_eq!(
        solve(&request(line_stops(2)).fleet(0, 5), &matrix, &options).unwrap_err(),
        PlanError::EmptyFleet
    );
    assert_eq!(
        solve(&request(line_stops(2)).fleet(2, 0), &matrix, &options).unwrap_err(),
        PlanError::ZeroStopCeiling
    );
}

#[test]
fn test_bad_times_and_windows_rejected() {
    let matrix = line_matrix(1, 10);
    let options = quick_solver_options();
    let err = solve(&request(line_stops(1)).departure("7am"), &matrix, &options).unwrap_err();
    assert!(matches!(err, PlanError::InvalidTime(_)));

    let inverted = vec![Stop::new("x").window(700, 600)];
    let err = solve(&request(inverted), &matrix, &options).unwrap_err();
    assert!(matches!(err, PlanError::InvalidWindow { .. }));
}

#[test]
fn test_identical_input_identical_outcome() {
    let request = request(line_stops(6)).fleet(2, 4);
    let matrix = line_matrix(6, 10);
    let options = quick_solver_options();
    let first = solve(&request, &matrix, &options).unwrap();
    let second = solve(&request, &matrix, &options).unwrap();
    assert_eq!(first, second);
}

// ============================================================================
// Sink
// ============================================================================

#[derive(Default)]
struct RecordingSink {
    plans: RefCell<Vec<usize>>,
    fail: bool,
}

impl PlanSink for RecordingSink {
    type Error = String;

    fn accept(&self, plan: &MultiPlan) -> Result<(), Self::Error> {
        if self.fail {
            return Err("storage offline".to_string());
        }
        self.plans.borrow_mut().push(plan.drivers_used);
        Ok(())
    }
}

#[test]
fn test_publish_hands_feasible_plans_to_sink() {
    let request = request(line_stops(2)).fleet(1, 5);
    let outcome = solve(&request, &line_matrix(2, 10), &quick_solver_options()).unwrap();

    let sink = RecordingSink::default();
    publish(&outcome, &sink);
    assert_eq!(*sink.plans.borrow(), vec![1]);

    let failing = RecordingSink {
        fail: true,
        ..RecordingSink::default()
    };
    publish(&outcome, &failing);
    assert!(failing.plans.borrow().is_empty());
}
