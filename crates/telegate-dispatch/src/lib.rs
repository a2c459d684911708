/*!
 * TeleGate Dispatch
 *
 * Routes decoded telegrams to registered action handlers, keeps the identity
 * mapping between vehicles, devices and actions, builds outbound requests and
 * re-sends commands until the vehicle acknowledges them.
 */

#![warn(missing_docs)]

pub use telegate_core::prelude;

pub mod context;
pub mod dispatch;
pub mod error;
pub mod identity;
pub mod kernel;
pub mod repeat;
pub mod request;
pub mod route;

#[cfg(test)]
mod test_support;

pub use context::{GatewayContext, GatewayContextBuilder};
pub use dispatch::{DispatchEngine, DispatchReport, SkipReason};
pub use error::{Error, Result};
pub use identity::IdentityResolver;
pub use kernel::{
    translate_vehicle_state, FleetKernel, KernelLookup, Location, MovementCommand, OperatingState, Path,
    Point, RouteStep, StaticKernel, Vehicle, VehicleState,
};
pub use repeat::{CorrelationId, DeliveryEvent, DeliveryHandle, DeliveryOutcome, RepeatPolicy, RepeatSendManager};
pub use request::{ActionRequest, BusinessRequest, MoveRequest, Request, StateRequest};
pub use route::{ActionCapability, ActionHandler, ActionRoute, ActionRouteRegistry};

/// TeleGate dispatch crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the dispatch layer
pub fn init() -> Result<()> {
    tracing::info!("TeleGate Dispatch {} initialized", VERSION);
    Ok(())
}
