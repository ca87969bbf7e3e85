//! Request-scoped planning data.

use serde::{Deserialize, Serialize};

use crate::clock;
use crate::error::PlanError;
use crate::traits::DeliveryStop;

/// A delivery stop as supplied by the caller.
///
/// Either `location` or `address` identifies where the stop is; the schedule
/// solvers only need an address-like label, clustering needs coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stop {
    pub id: String,
    pub address: Option<String>,
    pub location: Option<(f64, f64)>,
    /// Service duration; the request default applies when unset.
    pub service_minutes: Option<i64>,
    /// Delivered quantity (gallons).
    pub demand: f64,
    /// Earliest arrival, minutes since midnight.
    pub window_start: Option<i64>,
    /// Latest arrival, minutes since midnight.
    pub window_end: Option<i64>,
    pub notes: Vec<String>,
}

impl Stop {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: None,
            location: None,
            service_minutes: None,
            demand: 0.0,
            window_start: None,
            window_end: None,
            notes: Vec::new(),
        }
    }

    pub fn at(mut self, lat: f64, lng: f64) -> Self {
        self.location = Some((lat, lng));
        self
    }

    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn service(mut self, minutes: i64) -> Self {
        self.service_minutes = Some(minutes);
        self
    }

    pub fn demand(mut self, quantity: f64) -> Self {
        self.demand = quantity;
        self
    }

    /// Arrival window in minutes since midnight.
    pub fn window(mut self, start: i64, end: i64) -> Self {
        self.window_start = Some(start);
        self.window_end = Some(end);
        self
    }

    /// Arrival window given as `HH:MM` strings.
    pub fn window_hhmm(self, start: &str, end: &str) -> Result<Self, PlanError> {
        let start = clock::parse_hhmm(start)?;
        let end = clock::parse_hhmm(end)?;
        Ok(self.window(start, end))
    }

    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    /// Address if known, else the formatted coordinates, else the id.
    pub fn label(&self) -> String {
        label_for(self.address.as_deref(), self.location, &self.id)
    }

    /// Reject windows whose declared start lies after their end.
    pub fn validate_window(&self) -> Result<(), PlanError> {
        if let (Some(start), Some(end)) = (self.window_start, self.window_end) {
            if start > end {
                return Err(PlanError::InvalidWindow {
                    id: self.id.clone(),
                    start,
                    end,
                });
            }
        }
        Ok(())
    }
}

/// The common start and end point of every vehicle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Depot {
    pub address: Option<String>,
    pub location: Option<(f64, f64)>,
}

impl Depot {
    pub fn at(lat: f64, lng: f64) -> Self {
        Self {
            address: None,
            location: Some((lat, lng)),
        }
    }

    pub fn address(address: impl Into<String>) -> Self {
        Self {
            address: Some(address.into()),
            location: None,
        }
    }

    pub fn label(&self) -> String {
        label_for(self.address.as_deref(), self.location, "depot")
    }
}

/// Per-vehicle ceilings shared by every slot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VehicleLimits {
    pub max_stops: usize,
    pub max_capacity: f64,
}

impl Default for VehicleLimits {
    fn default() -> Self {
        Self {
            max_stops: 7,
            max_capacity: 2000.0,
        }
    }
}

/// A stop whose coordinates have been resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocatedStop {
    pub stop: Stop,
    pub location: (f64, f64),
}

impl DeliveryStop for LocatedStop {
    fn location(&self) -> (f64, f64) {
        self.location
    }

    fn demand(&self) -> f64 {
        self.stop.demand.max(0.0)
    }
}

fn label_for(address: Option<&str>, location: Option<(f64, f64)>, fallback: &str) -> String {
    match (address, location) {
        (Some(address), _) => address.to_string(),
        (None, Some((lat, lng))) => format!("{:.6},{:.6}", lat, lng),
        (None, None) => fallback.to_string(),
    }
}
