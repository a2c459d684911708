/*!
 * Fleet kernel contract.
 *
 * The fleet kernel owns the plant model (vehicles, points, paths and
 * locations) and the vehicle state reported upstream. TeleGate only looks
 * things up by name through [`FleetKernel`]; [`KernelLookup`] adds the name
 * validation and the "kernel not wired" check on top.
 */
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// State of a vehicle as the kernel sees it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VehicleState {
    /// Available for orders
    Idle,
    /// Processing an order
    Executing,
    /// Charging
    Charging,
    /// Reporting an error
    Error,
    /// Anything else
    Unknown,
}

/// Operating state reported by a vehicle adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperatingState {
    /// Standing still without a task
    Idle,
    /// Driving
    Moving,
    /// Executing a station operation
    Acting,
    /// Charging
    Charging,
    /// Failed
    Error,
    /// Any state not listed above
    Unknown,
}

impl OperatingState {
    /// Parse an adapter state name; unknown names map to [`OperatingState::Unknown`]
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_ascii_uppercase().as_str() {
            "IDLE" => OperatingState::Idle,
            "MOVING" => OperatingState::Moving,
            "ACTING" => OperatingState::Acting,
            "CHARGING" => OperatingState::Charging,
            "ERROR" => OperatingState::Error,
            _ => OperatingState::Unknown,
        }
    }
}

impl From<OperatingState> for VehicleState {
    fn from(state: OperatingState) -> Self {
        match state {
            OperatingState::Idle => VehicleState::Idle,
            OperatingState::Moving | OperatingState::Acting => VehicleState::Executing,
            OperatingState::Charging => VehicleState::Charging,
            OperatingState::Error => VehicleState::Error,
            OperatingState::Unknown => VehicleState::Unknown,
        }
    }
}

/// Translate an adapter operating state into the kernel vehicle state
pub fn translate_vehicle_state(state: OperatingState) -> VehicleState {
    state.into()
}

/// A vehicle known to the kernel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vehicle {
    /// Vehicle name
    pub name: String,
    /// Current state
    pub state: VehicleState,
    /// Point the vehicle currently stands on
    pub current_position: Option<String>,
}

/// A point in the plant model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    /// Point name
    pub name: String,
}

/// A path between two points
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Path {
    /// Path name
    pub name: String,
    /// Point the path starts at
    pub source_point: String,
    /// Point the path ends at
    pub destination_point: String,
}

/// A location (station) in the plant model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// Location name
    pub name: String,
    /// Location type name
    pub location_type: String,
}

/// One step of a vehicle route
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteStep {
    /// Point the step starts at; absent for the first step of a fresh route
    pub source_point: Option<String>,
    /// Point the step ends at
    pub destination_point: String,
}

/// A movement command handed to a vehicle adapter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementCommand {
    /// Step to execute
    pub step: RouteStep,
    /// Final destination of the whole order
    pub final_destination: String,
    /// Operation to execute at the destination
    pub operation: String,
}

impl MovementCommand {
    /// Create a command for one step
    pub fn new<S, D, F>(source: Option<S>, destination: D, final_destination: F) -> Self
    where
        S: Into<String>,
        D: Into<String>,
        F: Into<String>,
    {
        Self {
            step: RouteStep {
                source_point: source.map(Into::into),
                destination_point: destination.into(),
            },
            final_destination: final_destination.into(),
            operation: String::new(),
        }
    }

    /// Set the destination operation
    pub fn with_operation<S: Into<String>>(mut self, operation: S) -> Self {
        self.operation = operation.into();
        self
    }
}

/// Name-based lookups into the fleet kernel
pub trait FleetKernel: fmt::Debug + Send + Sync {
    /// Look up a vehicle
    fn fetch_vehicle(&self, name: &str) -> Option<Vehicle>;

    /// Look up a point
    fn fetch_point(&self, name: &str) -> Option<Point>;

    /// Look up a path
    fn fetch_path(&self, name: &str) -> Option<Path>;

    /// Look up a location
    fn fetch_location(&self, name: &str) -> Option<Location>;

    /// Names of every vehicle in the plant model
    fn vehicle_names(&self) -> Vec<String>;
}

/// Validating front of an optional kernel
#[derive(Debug, Clone, Default)]
pub struct KernelLookup {
    kernel: Option<Arc<dyn FleetKernel>>,
}

impl KernelLookup {
    /// Create a lookup over the kernel, if one is wired
    pub fn new(kernel: Option<Arc<dyn FleetKernel>>) -> Self {
        Self { kernel }
    }

    fn kernel(&self) -> Result<&Arc<dyn FleetKernel>> {
        self.kernel
            .as_ref()
            .ok_or_else(|| Error::not_initialized("fleet kernel"))
    }

    fn fetch<T>(&self, what: &str, name: &str, f: impl FnOnce(&dyn FleetKernel, &str) -> Option<T>) -> Result<T> {
        if name.trim().is_empty() {
            return Err(Error::not_found(format!("{} name must not be empty", what)));
        }
        let kernel = self.kernel()?;
        f(kernel.as_ref(), name).ok_or_else(|| Error::not_found(format!("{} [{}]", what, name)))
    }

    /// Look up a vehicle by name
    pub fn fetch_vehicle(&self, name: &str) -> Result<Vehicle> {
        self.fetch("vehicle", name, |k, n| k.fetch_vehicle(n))
    }

    /// Look up a point by name
    pub fn fetch_point(&self, name: &str) -> Result<Point> {
        self.fetch("point", name, |k, n| k.fetch_point(n))
    }

    /// Look up a path by name
    pub fn fetch_path(&self, name: &str) -> Result<Path> {
        self.fetch("path", name, |k, n| k.fetch_path(n))
    }

    /// Look up a location by name
    pub fn fetch_location(&self, name: &str) -> Result<Location> {
        self.fetch("location", name, |k, n| k.fetch_location(n))
    }

    /// Names of every vehicle; empty when no kernel is wired
    pub fn vehicle_names(&self) -> Vec<String> {
        self.kernel
            .as_ref()
            .map(|k| k.vehicle_names())
            .unwrap_or_default()
    }

    /// Whether a kernel is wired
    pub fn is_attached(&self) -> bool {
        self.kernel.is_some()
    }
}

/// In-memory kernel for tests and standalone operation
#[derive(Debug, Default)]
pub struct StaticKernel {
    vehicles: RwLock<HashMap<String, Vehicle>>,
    points: RwLock<HashMap<String, Point>>,
    paths: RwLock<HashMap<String, Path>>,
    locations: RwLock<HashMap<String, Location>>,
}

impl StaticKernel {
    /// Create an empty kernel
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a vehicle whose state is not reported yet
    pub fn add_vehicle<S: Into<String>>(&self, name: S) -> &Self {
        let name = name.into();
        self.vehicles.write().insert(
            name.clone(),
            Vehicle {
                name,
                state: VehicleState::Unknown,
                current_position: None,
            },
        );
        self
    }

    /// Add a point
    pub fn add_point<S: Into<String>>(&self, name: S) -> &Self {
        let name = name.into();
        self.points.write().insert(name.clone(), Point { name });
        self
    }

    /// Add a path and its two end points
    pub fn add_path(&self, name: &str, source: &str, destination: &str) -> &Self {
        self.add_point(source).add_point(destination);
        self.paths.write().insert(
            name.to_string(),
            Path {
                name: name.to_string(),
                source_point: source.to_string(),
                destination_point: destination.to_string(),
            },
        );
        self
    }

    /// Add a location
    pub fn add_location(&self, name: &str, location_type: &str) -> &Self {
        self.locations.write().insert(
            name.to_string(),
            Location {
                name: name.to_string(),
                location_type: location_type.to_string(),
            },
        );
        self
    }

    /// Record a state reported by a vehicle adapter; `false` for unknown vehicles
    pub fn report_state(&self, name: &str, state: OperatingState, position: Option<&str>) -> bool {
        match self.vehicles.write().get_mut(name) {
            Some(vehicle) => {
                vehicle.state = state.into();
                if let Some(position) = position {
                    vehicle.current_position = Some(position.to_string());
                }
                true
            }
            None => false,
        }
    }
}

impl FleetKernel for StaticKernel {
    fn fetch_vehicle(&self, name: &str) -> Option<Vehicle> {
        self.vehicles.read().get(name).cloned()
    }

    fn fetch_point(&self, name: &str) -> Option<Point> {
        self.points.read().get(name).cloned()
    }

    fn fetch_path(&self, name: &str) -> Option<Path> {
        self.paths.read().get(name).cloned()
    }

    fn fetch_location(&self, name: &str) -> Option<Location> {
        self.locations.read().get(name).cloned()
    }

    fn vehicle_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.vehicles.read().keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_translation_table() {
        use OperatingState::*;
        assert_eq!(translate_vehicle_state(Idle), VehicleState::Idle);
        assert_eq!(translate_vehicle_state(Moving), VehicleState::Executing);
        assert_eq!(translate_vehicle_state(Acting), VehicleState::Executing);
        assert_eq!(translate_vehicle_state(Charging), VehicleState::Charging);
        assert_eq!(translate_vehicle_state(Error), VehicleState::Error);
        assert_eq!(translate_vehicle_state(Unknown), VehicleState::Unknown);
        assert_eq!(
            translate_vehicle_state(OperatingState::parse_lenient("sleeping")),
            VehicleState::Unknown
        );
    }

    #[test]
    fn test_lookup_validates_names() {
        let kernel = Arc::new(StaticKernel::new());
        kernel
            .add_vehicle("V1")
            .add_path("P1--P2", "P1", "P2")
            .add_location("Charger-01", "Charger");
        let lookup = KernelLookup::new(Some(kernel.clone() as Arc<dyn FleetKernel>));

        assert_eq!(lookup.fetch_vehicle("V1").unwrap().name, "V1");
        assert_eq!(lookup.fetch_point("P2").unwrap().name, "P2");
        assert_eq!(lookup.fetch_path("P1--P2").unwrap().source_point, "P1");
        assert_eq!(lookup.fetch_location("Charger-01").unwrap().location_type, "Charger");

        assert!(lookup.fetch_vehicle("").unwrap_err().is_not_found());
        assert!(lookup.fetch_point("P9").unwrap_err().is_not_found());
        assert_eq!(lookup.vehicle_names(), vec!["V1".to_string()]);
    }

    #[test]
    fn test_missing_kernel_is_not_initialized() {
        let lookup = KernelLookup::default();
        assert!(matches!(lookup.fetch_vehicle("V1"), Err(Error::NotInitialized(_))));
        assert!(lookup.fetch_vehicle("").unwrap_err().is_not_found());
        assert!(lookup.vehicle_names().is_empty());
    }

    #[test]
    fn test_report_state() {
        let kernel = StaticKernel::new();
        kernel.add_vehicle("V1");

        assert!(kernel.report_state("V1", OperatingState::Moving, Some("P3")));
        let vehicle = kernel.fetch_vehicle("V1").unwrap();
        assert_eq!(vehicle.state, VehicleState::Executing);
        assert_eq!(vehicle.current_position.as_deref(), Some("P3"));
        assert!(!kernel.report_state("V9", OperatingState::Idle, None));
    }
}
