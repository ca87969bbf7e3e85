//! Shared fixtures for the delivery-planner integration tests.
//!
//! Provides:
//! - exact-minute "line" matrices, where node i sits `step * i` minutes from
//!   the depot, so expected orders and times can be worked out by hand
//! - a handful of Henderson, NV delivery addresses with coordinates
//! - option sets with short budgets for fast test runs

#![allow(dead_code)]

use std::collections::HashMap;

use chrono::NaiveDate;

use delivery_planner::config::{PlannerOptions, SolverOptions};
use delivery_planner::matrix::DurationMatrix;
use delivery_planner::model::{Depot, Stop};
use delivery_planner::traits::Geocoder;

pub fn plan_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, 14).expect("valid date")
}

/// Depot plus `stops` nodes on a line, `step` minutes apart.
pub fn line_matrix(stops: usize, step: i64) -> DurationMatrix {
    let n = stops + 1;
    DurationMatrix::from_minutes(
        (0..n)
            .map(|i| (0..n).map(|j| (i as i64 - j as i64).abs() * step).collect())
            .collect(),
    )
}

/// Every off-diagonal cell carries a seconds value far beyond the sentinel
/// threshold.
pub fn sentinel_matrix(stops: usize) -> DurationMatrix {
    let n = stops + 1;
    let seconds: Vec<Vec<f64>> = (0..n)
        .map(|i| (0..n).map(|j| if i == j { 0.0 } else { 1e9 }).collect())
        .collect();
    DurationMatrix::from_seconds(&seconds)
}

/// Stops `s1..=sN` with addresses but no coordinates.
pub fn line_stops(count: usize) -> Vec<Stop> {
    (1..=count)
        .map(|i| Stop::new(format!("s{i}")).address(format!("{i}00 Line Ave")))
        .collect()
}

pub fn ids(stops: &[String]) -> Vec<&str> {
    stops.iter().map(String::as_str).collect()
}

pub fn quick_solver_options() -> SolverOptions {
    SolverOptions {
        local_search_iterations: 200,
        ..SolverOptions::default()
    }
}

pub fn quick_planner_options() -> PlannerOptions {
    PlannerOptions {
        local_search_iterations: 200,
        ..PlannerOptions::default()
    }
}

// ============================================================================
// Henderson, NV
// ============================================================================

pub const YARD: (&str, f64, f64) = ("2380 Fuel Yard Rd, Henderson, NV", 36.0395, -114.9817);

/// (id, address, lat, lng, gallons)
pub const HENDERSON_STOPS: &[(&str, &str, f64, f64, f64)] = &[
    ("h1", "1 Water St, Henderson, NV", 36.0305, -114.9825, 250.0),
    ("h2", "240 S Water St, Henderson, NV", 36.0282, -114.9810, 180.0),
    ("h3", "2580 Anthem Village Dr, Henderson, NV", 35.9757, -115.1012, 300.0),
    ("h4", "2300 Paseo Verde Pkwy, Henderson, NV", 36.0139, -115.0853, 120.0),
    ("h5", "1800 W Horizon Ridge Pkwy, Henderson, NV", 36.0122, -115.0551, 400.0),
    ("h6", "555 N Stephanie St, Henderson, NV", 36.0537, -115.0461, 220.0),
    ("h7", "1 Galleria Dr, Henderson, NV", 36.0616, -115.0387, 310.0),
    ("h8", "2275 Sunset Rd, Henderson, NV", 36.0714, -115.0553, 150.0),
    ("h9", "3011 N Green Valley Pkwy, Henderson, NV", 36.0425, -115.0829, 275.0),
    ("h10", "8800 S Eastern Ave, Henderson, NV", 36.0276, -115.1181, 190.0),
];

pub fn yard() -> Depot {
    let (address, lat, lng) = YARD;
    let mut depot = Depot::at(lat, lng);
    depot.address = Some(address.to_string());
    depot
}

pub fn henderson_stops() -> Vec<Stop> {
    HENDERSON_STOPS
        .iter()
        .map(|&(id, address, lat, lng, gallons)| Stop::new(id).address(address).at(lat, lng).demand(gallons))
        .collect()
}

/// Same stops, address only.
pub fn henderson_addresses() -> Vec<Stop> {
    HENDERSON_STOPS
        .iter()
        .map(|&(id, address, _, _, gallons)| Stop::new(id).address(address).demand(gallons))
        .collect()
}

/// Geocoder backed by a fixed address book.
pub struct AddressBook(pub HashMap<String, (f64, f64)>);

impl AddressBook {
    pub fn henderson() -> Self {
        let mut book: HashMap<String, (f64, f64)> = HENDERSON_STOPS
            .iter()
            .map(|&(_, address, lat, lng, _)| (address.to_string(), (lat, lng)))
            .collect();
        book.insert(YARD.0.to_string(), (YARD.1, YARD.2));
        Self(book)
    }
}

impl Geocoder for AddressBook {
    fn geocode(&self, address: &str) -> Option<(f64, f64)> {
        self.0.get(address).copied()
    }
}
