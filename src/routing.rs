//! Routing engine shared by the multi-vehicle solver and the single-vehicle
//! planner.
//!
//! The model is a node graph where node 0 is the depot (start and end of
//! every vehicle) and nodes 1..N are stops. Each vehicle path carries three
//! cumulative dimensions:
//!
//! - time: arrival minute at each node, bounded by the node's window, with a
//!   capped waiting slack and a day horizon;
//! - load: one unit per stop, bounded by the stop ceiling;
//! - payload: stop demand, bounded by an optional capacity.
//!
//! Stops are optional visits: leaving one out costs a fixed penalty, so the
//! search drops a stop only when serving it is impossible or dearer than the
//! penalty. A used vehicle pays a fixed cost, which biases the search toward
//! fewer vehicles.

use std::ops::{Add, Sub};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Node index of the depot.
pub const DEPOT: usize = 0;

/// Drop penalty used when every stop is mandatory.
const MANDATORY_DROP_PENALTY: i64 = 1_000_000_000;

/// Construction heuristic used for the first solution of an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FirstSolutionStrategy {
    /// Repeatedly insert the globally cheapest (stop, vehicle, position).
    ParallelCheapestInsertion,
    /// Grow one route at a time along the cheapest outgoing arc.
    PathCheapestArc,
    /// Grow one route at a time toward the tightest-window stop.
    PathMostConstrainedArc,
    /// Clarke-Wright savings merge of single-stop routes.
    Savings,
}

/// A fixed-duration break that must lie entirely inside a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakRule {
    pub window_start: i64,
    pub window_end: i64,
    pub duration: i64,
}

/// Lexicographic objective: route cost first, then the sum of stop arrival
/// minutes so that among equal-cost plans customers are served earlier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Score {
    pub cost: i64,
    pub arrivals: i64,
}

impl Score {
    pub const fn new(cost: i64, arrivals: i64) -> Self {
        Self { cost, arrivals }
    }
}

impl Add for Score {
    type Output = Score;

    fn add(self, rhs: Score) -> Score {
        Score::new(self.cost + rhs.cost, self.arrivals + rhs.arrivals)
    }
}

impl Sub for Score {
    type Output = Score;

    fn sub(self, rhs: Score) -> Score {
        Score::new(self.cost - rhs.cost, self.arrivals - rhs.arrivals)
    }
}

/// Timing of one evaluated vehicle path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteSchedule {
    /// Depot departure, one arrival per stop, depot return.
    pub arrivals: Vec<i64>,
    /// Travel plus service minutes along the path.
    pub cost: i64,
    pub demand: f64,
    pub break_start: Option<i64>,
}

impl RouteSchedule {
    pub fn score(&self) -> Score {
        let len = self.arrivals.len();
        let stops = if len >= 2 { &self.arrivals[1..len - 1] } else { &[][..] };
        Score::new(self.cost, stops.iter().sum())
    }

    pub fn return_minute(&self) -> i64 {
        self.arrivals.last().copied().unwrap_or_default()
    }
}

/// Wall-clock budget for one solve attempt, optionally cancellable.
#[derive(Debug, Clone, Copy)]
pub struct Budget<'a> {
    deadline: Instant,
    cancel: Option<&'a AtomicBool>,
}

impl<'a> Budget<'a> {
    pub fn new(limit: Duration, cancel: Option<&'a AtomicBool>) -> Self {
        Self {
            deadline: Instant::now() + limit,
            cancel,
        }
    }

    pub fn exhausted(&self) -> bool {
        Instant::now() >= self.deadline
            || self.cancel.is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

/// Assignment of stops to vehicles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Solution {
    pub routes: Vec<Vec<usize>>,
    pub scores: Vec<Score>,
    pub dropped: Vec<usize>,
}

impl Solution {
    pub fn used_vehicles(&self) -> usize {
        self.routes.iter().filter(|route| !route.is_empty()).count()
    }

    pub fn served(&self) -> usize {
        self.routes.iter().map(Vec::len).sum()
    }
}

#[derive(Debug, Clone)]
pub struct RoutingModel {
    /// Travel minutes between nodes.
    pub travel: Vec<Vec<i64>>,
    /// Service minutes per node, paid on departure.
    pub service: Vec<i64>,
    pub demand: Vec<f64>,
    /// Arrival window per node; the depot entry bounds the start time.
    pub windows: Vec<(i64, i64)>,
    /// Window for arriving back at the depot.
    pub return_window: (i64, i64),
    pub num_vehicles: usize,
    pub max_stops: usize,
    pub max_capacity: Option<f64>,
    pub waiting_slack: i64,
    pub horizon: i64,
    /// `None` makes every stop mandatory.
    pub drop_penalty: Option<i64>,
    pub fixed_vehicle_cost: i64,
    pub break_rule: Option<BreakRule>,
}

impl RoutingModel {
    pub fn num_nodes(&self) -> usize {
        self.travel.len()
    }

    /// Copy of the model with every window opened from the earliest
    /// departure to the last minute of the horizon.
    pub fn relaxed(&self) -> RoutingModel {
        let open = self.windows[DEPOT].0;
        let close = self.horizon - 1;
        let mut relaxed = self.clone();
        relaxed.windows = vec![(open, close); self.windows.len()];
        relaxed.return_window = (open, close);
        relaxed
    }

    fn penalty(&self) -> i64 {
        self.drop_penalty.unwrap_or(MANDATORY_DROP_PENALTY)
    }

    /// Full objective of a solution.
    pub fn objective(&self, solution: &Solution) -> Score {
        let routes = solution
            .scores
            .iter()
            .fold(Score::default(), |acc, score| acc + *score);
        routes + Score::new(self.penalty() * solution.dropped.len() as i64, 0)
    }

    /// Build the first solution with `strategy`, then improve it.
    pub fn solve(&self, strategy: FirstSolutionStrategy, iterations: usize, budget: &Budget<'_>) -> Solution {
        let mut solution = match strategy {
            FirstSolutionStrategy::ParallelCheapestInsertion => self.parallel_cheapest_insertion(budget),
            FirstSolutionStrategy::PathCheapestArc => self.path_construction(false, budget),
            FirstSolutionStrategy::PathMostConstrainedArc => self.path_construction(true, budget),
            FirstSolutionStrategy::Savings => self.savings(budget),
        };
        self.local_search(&mut solution, iterations, budget);
        solution
    }

    /// Evaluate a path; `None` if it breaks any dimension.
    pub fn evaluate(&self, route: &[usize]) -> Option<RouteSchedule> {
        if route.len() > self.max_stops {
            return None;
        }
        let demand: f64 = route.iter().map(|&node| self.demand[node]).sum();
        if let Some(capacity) = self.max_capacity {
            if demand > capacity + 1e-9 {
                return None;
            }
        }

        let (arrivals, cost, break_start) = match self.break_rule {
            None => self.forward_pass(route, None)?,
            Some(rule) => (0..=route.len() + 1)
                .filter_map(|gap| self.forward_pass(route, Some((rule, gap))))
                .min_by_key(|(arrivals, _, _)| arrivals.last().copied().unwrap_or_default())?,
        };

        Some(RouteSchedule {
            arrivals,
            cost,
            demand,
            break_start,
        })
    }

    /// Score of a path including the fixed vehicle cost. Empty paths are free.
    fn route_score(&self, route: &[usize]) -> Option<Score> {
        if route.is_empty() {
            return Some(Score::default());
        }
        let schedule = self.evaluate(route)?;
        Some(schedule.score() + Score::new(self.fixed_vehicle_cost, 0))
    }

    /// Travel minutes, never negative.
    fn arc(&self, from: usize, to: usize) -> i64 {
        self.travel[from][to].max(0)
    }

    /// Earliest-arrival pass along `route`.
    ///
    /// When a wait would exceed the slack, the whole prefix is pushed later
    /// by the excess; `room` tracks how far it can move before some earlier
    /// window (or the break) closes. With a break, `gap` is the position it
    /// follows: 0 is the depot start, `route.len() + 1` is after the return.
    fn forward_pass(
        &self,
        route: &[usize],
        brk: Option<(BreakRule, usize)>,
    ) -> Option<(Vec<i64>, i64, Option<i64>)> {
        let (start_open, start_close) = self.windows[DEPOT];
        let mut room = start_close.min(self.horizon) - start_open;
        if room < 0 {
            return None;
        }

        let mut times = Vec::with_capacity(route.len() + 2);
        times.push(start_open);
        let mut break_start: Option<i64> = None;
        let mut cost: i64 = 0;
        let mut prev = DEPOT;

        for (position, &node) in route.iter().enumerate() {
            let mut ready = times[position].saturating_add(self.service[prev]);
            if let Some((rule, gap)) = brk {
                if gap == position {
                    let start = place_break(rule, ready, &mut room)?;
                    break_start = Some(start);
                    ready = start + rule.duration;
                }
            }

            let arc = self.arc(prev, node);
            cost = cost.saturating_add(arc.saturating_add(self.service[prev]));
            let (open, close) = self.windows[node];
            let mut arrival = ready.saturating_add(arc);
            if arrival < open {
                let excess = open - arrival - self.waiting_slack;
                if excess > 0 {
                    if excess > room {
                        return None;
                    }
                    times.iter_mut().for_each(|time| *time += excess);
                    if let Some(start) = break_start.as_mut() {
                        *start += excess;
                    }
                    room -= excess;
                }
                arrival = open;
            }
            if arrival > close || arrival > self.horizon {
                return None;
            }
            room = room.min(close - arrival);
            times.push(arrival);
            prev = node;
        }

        let last = times.len() - 1;
        let mut ready = times[last].saturating_add(self.service[prev]);
        if let Some((rule, gap)) = brk {
            if gap == route.len() {
                let start = place_break(rule, ready, &mut room)?;
                break_start = Some(start);
                ready = start + rule.duration;
            }
        }
        let arc = self.arc(prev, DEPOT);
        cost = cost.saturating_add(arc.saturating_add(self.service[prev]));
        let (return_open, return_close) = self.return_window;
        let back = ready.saturating_add(arc).max(return_open);
        if back > return_close.min(self.horizon) {
            return None;
        }
        times.push(back);

        if let Some((rule, gap)) = brk {
            if gap == route.len() + 1 {
                let start = back.max(rule.window_start);
                if start + rule.duration > rule.window_end.min(self.horizon) {
                    return None;
                }
                break_start = Some(start);
            }
        }

        Some((times, cost, break_start))
    }

    // ------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------

    fn empty_solution(&self) -> Solution {
        Solution {
            routes: vec![Vec::new(); self.num_vehicles],
            scores: vec![Score::default(); self.num_vehicles],
            dropped: Vec::new(),
        }
    }

    fn parallel_cheapest_insertion(&self, budget: &Budget<'_>) -> Solution {
        let mut solution = self.empty_solution();
        let mut pending: Vec<usize> = (1..self.num_nodes()).collect();
        self.insert_pending(&mut solution, &mut pending, budget);
        solution.dropped = pending;
        solution
    }

    /// Cheapest feasible position for `node` in `route`.
    fn best_insertion(&self, route: &[usize], node: usize) -> Option<(usize, Score)> {
        let mut best: Option<(usize, Score)> = None;
        let mut candidate = Vec::with_capacity(route.len() + 1);
        for position in 0..=route.len() {
            candidate.clear();
            candidate.extend_from_slice(&route[..position]);
            candidate.push(node);
            candidate.extend_from_slice(&route[position..]);
            if let Some(score) = self.route_score(&candidate) {
                if best.is_none_or(|(_, current)| score < current) {
                    best = Some((position, score));
                }
            }
        }
        best
    }

    /// Cheapest (vehicle, position, new score) for `node`, skipping `exclude`.
    ///
    /// Vehicles are interchangeable, so only the first empty one is tried.
    fn best_vehicle_insertion(
        &self,
        solution: &Solution,
        node: usize,
        exclude: Option<usize>,
        allow_empty: bool,
    ) -> Option<(Score, usize, usize, Score)> {
        let mut best: Option<(Score, usize, usize, Score)> = None;
        let mut tried_empty = false;
        for (vehicle, route) in solution.routes.iter().enumerate() {
            if Some(vehicle) == exclude {
                continue;
            }
            if route.is_empty() {
                if tried_empty || !allow_empty {
                    continue;
                }
                tried_empty = true;
            }
            if let Some((position, score)) = self.best_insertion(route, node) {
                let delta = score - solution.scores[vehicle];
                if best.is_none_or(|(current, ..)| delta < current) {
                    best = Some((delta, vehicle, position, score));
                }
            }
        }
        best
    }

    /// Insert pending stops greedily until none fits or dropping is cheaper.
    fn insert_pending(&self, solution: &mut Solution, pending: &mut Vec<usize>, budget: &Budget<'_>) {
        let penalty = self.penalty();
        while !pending.is_empty() && !budget.exhausted() {
            let mut best: Option<(Score, usize, usize, usize, Score)> = None;
            for (index, &node) in pending.iter().enumerate() {
                if let Some((delta, vehicle, position, score)) =
                    self.best_vehicle_insertion(solution, node, None, true)
                {
                    if delta.cost >= penalty {
                        continue;
                    }
                    if best.is_none_or(|(current, ..)| delta < current) {
                        best = Some((delta, index, vehicle, position, score));
                    }
                }
            }

            let Some((_, index, vehicle, position, score)) = best else {
                break;
            };
            let node = pending.remove(index);
            solution.routes[vehicle].insert(position, node);
            solution.scores[vehicle] = score;
        }
    }

    /// Build routes one vehicle at a time by appending stops.
    fn path_construction(&self, most_constrained: bool, budget: &Budget<'_>) -> Solution {
        let penalty = self.penalty();
        let mut solution = self.empty_solution();
        let mut pending: Vec<usize> = (1..self.num_nodes()).collect();

        for vehicle in 0..self.num_vehicles {
            if pending.is_empty() || budget.exhausted() {
                break;
            }
            let mut route: Vec<usize> = Vec::new();
            let mut current_score = Score::default();

            loop {
                let current = route.last().copied().unwrap_or(DEPOT);
                let mut best: Option<((i64, i64, i64), usize, Score)> = None;
                for (index, &node) in pending.iter().enumerate() {
                    route.push(node);
                    let score = self.route_score(&route);
                    route.pop();
                    let Some(score) = score else {
                        continue;
                    };
                    if (score - current_score).cost >= penalty {
                        continue;
                    }
                    let arc = self.arc(current, node);
                    let key = if most_constrained {
                        let (open, close) = self.windows[node];
                        (close, close - open, arc)
                    } else {
                        (arc, 0, 0)
                    };
                    if best.is_none_or(|(current_key, ..)| key < current_key) {
                        best = Some((key, index, score));
                    }
                }

                let Some((_, index, score)) = best else {
                    break;
                };
                route.push(pending.remove(index));
                current_score = score;
                if budget.exhausted() {
                    break;
                }
            }

            solution.routes[vehicle] = route;
            solution.scores[vehicle] = current_score;
        }

        solution.dropped = pending;
        solution
    }

    /// Clarke-Wright savings, then cheapest insertion for whatever the kept
    /// routes leave over.
    fn savings(&self, budget: &Budget<'_>) -> Solution {
        let mut routes: Vec<Vec<usize>> = Vec::new();
        let mut pending: Vec<usize> = Vec::new();
        let mut route_of = vec![usize::MAX; self.num_nodes()];

        for node in 1..self.num_nodes() {
            if self.route_score(&[node]).is_some() {
                route_of[node] = routes.len();
                routes.push(vec![node]);
            } else {
                pending.push(node);
            }
        }

        let singles: Vec<usize> = routes.iter().map(|route| route[0]).collect();
        let mut savings: Vec<(i64, usize, usize)> = Vec::new();
        for &i in &singles {
            for &j in &singles {
                if i != j {
                    let saving = self
                        .arc(i, DEPOT)
                        .saturating_add(self.arc(DEPOT, j))
                        .saturating_sub(self.arc(i, j));
                    savings.push((saving, i, j));
                }
            }
        }
        savings.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));

        for (saving, i, j) in savings {
            if budget.exhausted() {
                break;
            }
            if saving.saturating_add(self.fixed_vehicle_cost) <= 0 {
                continue;
            }
            let (left, right) = (route_of[i], route_of[j]);
            if left == right || routes[left].last() != Some(&i) || routes[right].first() != Some(&j) {
                continue;
            }
            let mut merged = routes[left].clone();
            merged.extend_from_slice(&routes[right]);
            if self.route_score(&merged).is_none() {
                continue;
            }
            for &node in &routes[right] {
                route_of[node] = left;
            }
            routes[left] = merged;
            routes[right].clear();
        }

        routes.retain(|route| !route.is_empty());
        routes.sort_by(|a, b| b.len().cmp(&a.len()));
        for extra in routes.split_off(routes.len().min(self.num_vehicles)) {
            pending.extend(extra);
        }
        pending.sort_unstable();

        let mut solution = self.empty_solution();
        for (vehicle, route) in routes.into_iter().enumerate() {
            solution.scores[vehicle] = self.route_score(&route).unwrap_or_default();
            solution.routes[vehicle] = route;
        }
        self.insert_pending(&mut solution, &mut pending, budget);
        solution.dropped = pending;
        solution
    }

    // ------------------------------------------------------------------
    // Local search
    // ------------------------------------------------------------------

    /// Run improvement moves until none applies, the iteration cap is hit or
    /// the budget runs out.
    pub fn local_search(&self, solution: &mut Solution, iterations: usize, budget: &Budget<'_>) {
        for _ in 0..iterations {
            if budget.exhausted() {
                break;
            }
            let mut improved = false;
            improved |= self.insert_dropped(solution, budget);
            improved |= self.two_opt(solution, budget);
            improved |= self.relocate(solution, budget);
            improved |= self.exchange(solution, budget);
            improved |= self.eliminate_route(solution, budget);
            if !improved {
                break;
            }
        }
    }

    /// Re-insert dropped stops wherever that beats paying the penalty.
    fn insert_dropped(&self, solution: &mut Solution, budget: &Budget<'_>) -> bool {
        if solution.dropped.is_empty() {
            return false;
        }
        let before = solution.dropped.len();
        let mut pending = std::mem::take(&mut solution.dropped);
        self.insert_pending(solution, &mut pending, budget);
        solution.dropped = pending;
        solution.dropped.len() < before
    }

    /// Reverse a segment within a route. First improvement per route.
    fn two_opt(&self, solution: &mut Solution, budget: &Budget<'_>) -> bool {
        let mut improved = false;
        for vehicle in 0..solution.routes.len() {
            let n = solution.routes[vehicle].len();
            if n < 2 {
                continue;
            }
            'route: for i in 0..n - 1 {
                for j in i + 1..n {
                    if budget.exhausted() {
                        return improved;
                    }
                    let mut candidate = solution.routes[vehicle].clone();
                    candidate[i..=j].reverse();
                    if let Some(score) = self.route_score(&candidate) {
                        if score < solution.scores[vehicle] {
                            solution.routes[vehicle] = candidate;
                            solution.scores[vehicle] = score;
                            improved = true;
                            break 'route;
                        }
                    }
                }
            }
        }
        improved
    }

    /// Move one stop to another position, in the same or another route.
    fn relocate(&self, solution: &mut Solution, budget: &Budget<'_>) -> bool {
        let vehicles = solution.routes.len();
        for from in 0..vehicles {
            for index in 0..solution.routes[from].len() {
                if budget.exhausted() {
                    return false;
                }
                let node = solution.routes[from][index];
                let mut shrunk = solution.routes[from].clone();
                shrunk.remove(index);

                // Same route: best other position.
                if let Some((position, score)) = self.best_insertion(&shrunk, node) {
                    if position != index && score < solution.scores[from] {
                        shrunk.insert(position, node);
                        solution.routes[from] = shrunk;
                        solution.scores[from] = score;
                        return true;
                    }
                }

                let Some(shrunk_score) = self.route_score(&shrunk) else {
                    continue;
                };
                let mut probe = solution.clone();
                probe.routes[from] = shrunk;
                probe.scores[from] = shrunk_score;
                let Some((_, to, position, to_score)) =
                    self.best_vehicle_insertion(&probe, node, Some(from), true)
                else {
                    continue;
                };
                let before = solution.scores[from] + solution.scores[to];
                let after = shrunk_score + to_score;
                if after < before {
                    probe.routes[to].insert(position, node);
                    probe.scores[to] = to_score;
                    *solution = probe;
                    return true;
                }
            }
        }
        false
    }

    /// Swap two stops between different routes.
    fn exchange(&self, solution: &mut Solution, budget: &Budget<'_>) -> bool {
        let vehicles = solution.routes.len();
        for first in 0..vehicles {
            for second in first + 1..vehicles {
                for i in 0..solution.routes[first].len() {
                    for j in 0..solution.routes[second].len() {
                        if budget.exhausted() {
                            return false;
                        }
                        let mut left = solution.routes[first].clone();
                        let mut right = solution.routes[second].clone();
                        std::mem::swap(&mut left[i], &mut right[j]);
                        let (Some(left_score), Some(right_score)) =
                            (self.route_score(&left), self.route_score(&right))
                        else {
                            continue;
                        };
                        let before = solution.scores[first] + solution.scores[second];
                        if left_score + right_score < before {
                            solution.routes[first] = left;
                            solution.routes[second] = right;
                            solution.scores[first] = left_score;
                            solution.scores[second] = right_score;
                            return true;
                        }
                    }
                }
            }
        }
        false
    }

    /// Try to empty the smallest used route into the other used routes.
    fn eliminate_route(&self, solution: &mut Solution, budget: &Budget<'_>) -> bool {
        if solution.used_vehicles() < 2 || budget.exhausted() {
            return false;
        }
        let Some(victim) = solution
            .routes
            .iter()
            .enumerate()
            .filter(|(_, route)| !route.is_empty())
            .min_by_key(|(vehicle, route)| (route.len(), std::cmp::Reverse(*vehicle)))
            .map(|(vehicle, _)| vehicle)
        else {
            return false;
        };

        let mut probe = solution.clone();
        let nodes = std::mem::take(&mut probe.routes[victim]);
        probe.scores[victim] = Score::default();
        for node in nodes {
            let Some((_, vehicle, position, score)) =
                self.best_vehicle_insertion(&probe, node, Some(victim), false)
            else {
                return false;
            };
            probe.routes[vehicle].insert(position, node);
            probe.scores[vehicle] = score;
        }

        if self.objective(&probe) < self.objective(solution) {
            *solution = probe;
            return true;
        }
        false
    }
}

/// Start the break as early as possible at or after `ready`.
fn place_break(rule: BreakRule, ready: i64, room: &mut i64) -> Option<i64> {
    let start = ready.max(rule.window_start);
    let latest_start = rule.window_end - rule.duration;
    if start > latest_start {
        return None;
    }
    *room = (*room).min(latest_start - start);
    Some(start)
}
