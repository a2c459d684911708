/*!
 * Action route registry.
 *
 * An action route binds an action key to the handler serving it, together
 * with the device id and vehicle id the handler belongs to. Routes are added
 * at startup or when a plugin registers, and are never mutated afterwards.
 */
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info};

use telegate_transport::Protocol;

use crate::error::{Error, Result};

/// Receiver of decoded protocol records
#[async_trait]
pub trait ActionHandler: fmt::Debug + Send + Sync {
    /// Handle one record. Errors are logged by the caller.
    async fn handle(&self, protocol: Protocol) -> Result<()>;
}

/// An action handler that declares its own identity
pub trait ActionCapability: ActionHandler {
    /// Device the action is executed on
    fn device_id(&self) -> &str;

    /// Vehicle the device belongs to
    fn vehicle_id(&self) -> &str;

    /// Key the action is registered under
    fn action_key(&self) -> &str;
}

/// One registered route
#[derive(Clone)]
pub struct ActionRoute {
    action_key: String,
    device_id: String,
    vehicle_id: String,
    handler: Arc<dyn ActionHandler>,
}

impl ActionRoute {
    /// Action key
    pub fn action_key(&self) -> &str {
        &self.action_key
    }

    /// Device id
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Vehicle id
    pub fn vehicle_id(&self) -> &str {
        &self.vehicle_id
    }

    /// Handler serving the route
    pub fn handler(&self) -> &Arc<dyn ActionHandler> {
        &self.handler
    }
}

impl fmt::Debug for ActionRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionRoute")
            .field("action_key", &self.action_key)
            .field("device_id", &self.device_id)
            .field("vehicle_id", &self.vehicle_id)
            .finish()
    }
}

/// Registry of action routes keyed by action key.
///
/// Duplicate keys are rejected. Every successful registration bumps
/// [`version`](Self::version), which the identity resolver uses to tell
/// whether its maps are stale.
#[derive(Debug, Default)]
pub struct ActionRouteRegistry {
    routes: RwLock<HashMap<String, ActionRoute>>,
    version: AtomicU64,
}

impl ActionRouteRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a route
    pub fn register<A, D, V>(
        &self,
        action_key: A,
        device_id: D,
        vehicle_id: V,
        handler: Arc<dyn ActionHandler>,
    ) -> Result<()>
    where
        A: Into<String>,
        D: Into<String>,
        V: Into<String>,
    {
        let route = ActionRoute {
            action_key: action_key.into(),
            device_id: device_id.into(),
            vehicle_id: vehicle_id.into(),
            handler,
        };

        for (what, value) in [
            ("action key", &route.action_key),
            ("device id", &route.device_id),
            ("vehicle id", &route.vehicle_id),
        ] {
            if value.trim().is_empty() {
                return Err(Error::validation(format!("Route {} must not be empty", what)));
            }
        }

        let mut routes = self.routes.write();
        if routes.contains_key(&route.action_key) {
            return Err(Error::already_exists(format!(
                "Action key [{}] is already registered",
                route.action_key
            )));
        }

        info!(
            "Registered action [{}] for device [{}] on vehicle [{}]",
            route.action_key, route.device_id, route.vehicle_id
        );
        routes.insert(route.action_key.clone(), route);
        self.version.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Register a handler under the identity it declares
    pub fn register_handler<H>(&self, handler: Arc<H>) -> Result<()>
    where
        H: ActionCapability + 'static,
    {
        let action_key = handler.action_key().to_string();
        let device_id = handler.device_id().to_string();
        let vehicle_id = handler.vehicle_id().to_string();
        self.register(action_key, device_id, vehicle_id, handler)
    }

    /// Look up the route of an action key
    pub fn lookup(&self, action_key: &str) -> Option<ActionRoute> {
        self.routes.read().get(action_key).cloned()
    }

    /// Whether an action key is registered
    pub fn contains_key(&self, action_key: &str) -> bool {
        self.routes.read().contains_key(action_key)
    }

    /// Snapshot of every route
    pub fn routes(&self) -> Vec<ActionRoute> {
        self.routes.read().values().cloned().collect()
    }

    /// Number of successful registrations and clears so far
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    /// Number of routes
    pub fn len(&self) -> usize {
        self.routes.read().len()
    }

    /// Whether no route is registered
    pub fn is_empty(&self) -> bool {
        self.routes.read().is_empty()
    }

    /// Remove every route
    pub fn clear(&self) {
        self.routes.write().clear();
        self.version.fetch_add(1, Ordering::SeqCst);
        debug!("Action route registry cleared");
    }
}
