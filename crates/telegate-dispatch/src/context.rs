/*!
 * Gateway context.
 *
 * Owns every registry and component of a running gateway: settings, client
 * registry, action routes, identity resolver, protocol matcher, repeat-send
 * manager and dispatch engine. Nothing here is process-global; tests build a
 * context per case and [`GatewayContext::reset`] clears it in place.
 */
use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::info;

use telegate_core::config::Settings;
use telegate_transport::{
    ClientRegistry, CodecRegistry, Protocol, ProtocolMatcher, TransportHandle,
};

use crate::dispatch::DispatchEngine;
use crate::error::{Error, Result};
use crate::identity::IdentityResolver;
use crate::kernel::{FleetKernel, KernelLookup, Location, MovementCommand, Path, Point, Vehicle};
use crate::repeat::{DeliveryHandle, RepeatPolicy, RepeatSendManager};
use crate::request::{ActionRequest, MoveRequest, Request, StateRequest};
use crate::route::{ActionCapability, ActionHandler, ActionRouteRegistry};

/// Builder for [`GatewayContext`]
#[derive(Debug)]
pub struct GatewayContextBuilder {
    settings: Settings,
    codecs: Option<CodecRegistry>,
    matcher: Option<Arc<dyn ProtocolMatcher>>,
    repeat: Option<RepeatPolicy>,
    kernel: Option<Arc<dyn FleetKernel>>,
    fallback: Option<Arc<dyn ActionHandler>>,
}

impl GatewayContextBuilder {
    /// Resolve the protocol matcher named by `codec.name` from a codec registry
    pub fn codecs(mut self, codecs: CodecRegistry) -> Self {
        self.codecs = Some(codecs);
        self
    }

    /// Use a specific protocol matcher
    pub fn matcher(mut self, matcher: Arc<dyn ProtocolMatcher>) -> Self {
        self.matcher = Some(matcher);
        self
    }

    /// Enable repeat-send with the policy from the `repeat.*` settings
    pub fn repeat_send(mut self) -> Self {
        self.repeat = Some(RepeatPolicy::from_settings(&self.settings));
        self
    }

    /// Enable repeat-send with an explicit policy
    pub fn repeat_policy(mut self, policy: RepeatPolicy) -> Self {
        self.repeat = Some(policy);
        self
    }

    /// Attach the fleet kernel
    pub fn kernel(mut self, kernel: Arc<dyn FleetKernel>) -> Self {
        self.kernel = Some(kernel);
        self
    }

    /// Handler for records no action route claims
    pub fn fallback(mut self, handler: Arc<dyn ActionHandler>) -> Self {
        self.fallback = Some(handler);
        self
    }

    /// Build the context
    pub fn build(self) -> Result<GatewayContext> {
        let matcher = match (self.matcher, &self.codecs) {
            (Some(matcher), _) => Some(matcher),
            (None, Some(codecs)) => Some(codecs.create_from_settings(&self.settings)?),
            (None, None) => None,
        };

        let clients = Arc::new(ClientRegistry::new());
        let routes = Arc::new(ActionRouteRegistry::new());
        let identity = Arc::new(IdentityResolver::new(routes.clone()));
        let kernel = KernelLookup::new(self.kernel);
        if kernel.is_attached() {
            identity.attach_kernel(kernel.clone());
        }

        let repeat = self
            .repeat
            .map(|policy| RepeatSendManager::new(clients.clone(), policy));

        let engine = match (&matcher, &repeat) {
            (Some(matcher), Some(repeat)) => {
                let mut engine = DispatchEngine::new(matcher.clone(), clients.clone(), routes.clone(), identity.clone())
                    .with_repeat_send(repeat.clone());
                if let Some(fallback) = self.fallback {
                    engine = engine.with_fallback(fallback);
                }
                Some(Arc::new(engine))
            }
            _ => None,
        };

        info!(
            "Gateway context ready (matcher: {}, repeat-send: {}, kernel: {})",
            matcher.as_ref().map_or("none", |m| m.name()),
            repeat.is_some(),
            kernel.is_attached()
        );

        Ok(GatewayContext {
            settings: self.settings,
            clients,
            routes,
            identity,
            kernel,
            matcher,
            repeat,
            engine,
        })
    }
}

/// Lifecycle-scoped owner of the gateway's state
#[derive(Debug)]
pub struct GatewayContext {
    settings: Settings,
    clients: Arc<ClientRegistry>,
    routes: Arc<ActionRouteRegistry>,
    identity: Arc<IdentityResolver>,
    kernel: KernelLookup,
    matcher: Option<Arc<dyn ProtocolMatcher>>,
    repeat: Option<RepeatSendManager>,
    engine: Option<Arc<DispatchEngine>>,
}

impl GatewayContext {
    /// Start building a context
    pub fn builder(settings: Settings) -> GatewayContextBuilder {
        GatewayContextBuilder {
            settings,
            codecs: None,
            matcher: None,
            repeat: None,
            kernel: None,
            fallback: None,
        }
    }

    /// Context with the built-in codecs and repeat-send from settings
    pub fn from_settings(settings: Settings) -> Result<Self> {
        Self::builder(settings)
            .codecs(CodecRegistry::with_builtin())
            .repeat_send()
            .build()
    }

    /// Settings the context was built from
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Client registry
    pub fn clients(&self) -> &Arc<ClientRegistry> {
        &self.clients
    }

    /// Action route registry
    pub fn routes(&self) -> &Arc<ActionRouteRegistry> {
        &self.routes
    }

    /// Identity resolver
    pub fn identity(&self) -> &Arc<IdentityResolver> {
        &self.identity
    }

    /// Fleet kernel lookups
    pub fn kernel(&self) -> &KernelLookup {
        &self.kernel
    }

    /// Whether development mode is enabled
    pub fn is_dev_mode(&self) -> bool {
        self.settings.is_dev_mode()
    }

    /// The protocol matcher
    pub fn protocol_matcher(&self) -> Result<Arc<dyn ProtocolMatcher>> {
        self.matcher
            .clone()
            .ok_or_else(|| Error::not_initialized("protocol matcher"))
    }

    /// The repeat-send manager
    pub fn repeat_send(&self) -> Result<&RepeatSendManager> {
        self.repeat
            .as_ref()
            .ok_or_else(|| Error::not_initialized("repeat-send manager"))
    }

    /// The dispatch engine; needs both the matcher and repeat-send
    pub fn dispatch_engine(&self) -> Result<Arc<DispatchEngine>> {
        self.protocol_matcher()?;
        self.repeat_send()?;
        self.engine
            .clone()
            .ok_or_else(|| Error::not_initialized("dispatch engine"))
    }

    /// Register an action handler under the identity it declares
    pub fn register_action<H>(&self, handler: Arc<H>) -> Result<()>
    where
        H: ActionCapability + 'static,
    {
        self.routes.register_handler(handler)
    }

    /// Register an action route
    pub fn register_route(
        &self,
        action_key: &str,
        device_id: &str,
        vehicle_id: &str,
        handler: Arc<dyn ActionHandler>,
    ) -> Result<()> {
        self.routes.register(action_key, device_id, vehicle_id, handler)
    }

    /// Whether an action key is registered; the key must not be empty
    pub fn contains_action_key(&self, action_key: &str) -> Result<bool> {
        if action_key.trim().is_empty() {
            return Err(Error::validation("Action name must not be empty"));
        }
        Ok(self.routes.contains_key(action_key))
    }

    /// Handler of a station action; the name must not be empty
    pub fn location_action(&self, action_key: &str) -> Result<Option<Arc<dyn ActionHandler>>> {
        if action_key.trim().is_empty() {
            return Err(Error::validation("Action name must not be empty"));
        }
        Ok(self.routes.lookup(action_key).map(|r| r.handler().clone()))
    }

    /// Action request for a registered station action, targeted per `action.request.target`
    pub fn action_request(&self, action_key: &str) -> Result<ActionRequest> {
        if action_key.trim().is_empty() {
            return Err(Error::validation("Action name must not be empty"));
        }
        let route = self
            .routes
            .lookup(action_key)
            .ok_or_else(|| Error::not_found(format!("action route [{}]", action_key)))?;
        Ok(ActionRequest::for_route(&route).with_settings(&self.settings))
    }

    /// Vehicle id for any known identifier
    pub fn vehicle_id(&self, key: &str) -> Option<String> {
        self.identity.resolve_vehicle_id(key)
    }

    /// Device id for any known identifier
    pub fn device_id(&self, key: &str) -> Option<String> {
        self.identity.resolve_device_id(key)
    }

    /// Action keys for any known identifier
    pub fn action_keys(&self, key: &str) -> Result<Option<BTreeSet<String>>> {
        self.identity.resolve_action_keys(key)
    }

    /// Register the endpoint of a vehicle or device and alias it to `name`
    pub fn bind_client(&self, name: &str, host: &str, port: u32) -> String {
        self.clients.bind_name(name, host, port)
    }

    /// Decode a telegram with the configured matcher
    pub fn decode(&self, telegram: &[u8]) -> Result<Vec<Protocol>> {
        Ok(self.protocol_matcher()?.decode(telegram))
    }

    /// Client entry key of the device that sent a telegram.
    ///
    /// For batched telegrams the last record decides.
    pub fn client_entry_key(&self, telegram: &[u8]) -> Result<String> {
        let records = self.decode(telegram)?;
        let last = records
            .last()
            .ok_or_else(|| Error::validation("Telegram decoded to no records"))?;
        self.clients
            .resolve_key(last.device_id())
            .ok_or_else(|| Error::not_found(format!("client entry for [{}]", last.device_id())))
    }

    /// Look up a vehicle in the kernel
    pub fn fetch_vehicle(&self, name: &str) -> Result<Vehicle> {
        self.kernel.fetch_vehicle(name)
    }

    /// Look up a point in the kernel
    pub fn fetch_point(&self, name: &str) -> Result<Point> {
        self.kernel.fetch_point(name)
    }

    /// Look up a path in the kernel
    pub fn fetch_path(&self, name: &str) -> Result<Path> {
        self.kernel.fetch_path(name)
    }

    /// Look up a location in the kernel
    pub fn fetch_location(&self, name: &str) -> Result<Location> {
        self.kernel.fetch_location(name)
    }

    /// State request for a vehicle, targeted per `state.request.target`
    pub fn state_request(&self, vehicle_name: &str, command: &MovementCommand) -> Result<StateRequest> {
        StateRequest::builder()
            .vehicle_name(vehicle_name)
            .command(command)
            .settings(&self.settings)
            .build()
    }

    /// Move request for a vehicle, keyed per `move.request.cmd`
    pub fn move_request(&self, vehicle_name: &str, commands: Vec<MovementCommand>) -> Result<MoveRequest> {
        MoveRequest::builder()
            .vehicle_name(vehicle_name)
            .commands(commands)
            .build(&self.settings)
    }

    /// Encode a request and hand it to repeat-send
    pub fn send_request(&self, client: &str, request: &dyn Request) -> Result<DeliveryHandle> {
        let matcher = self.protocol_matcher()?;
        self.repeat_send()?
            .send_request(client, request, matcher.as_ref())
    }

    /// Start the configured transport with the dispatch engine as handler
    pub async fn start_transport(&self) -> Result<TransportHandle> {
        let engine = self.dispatch_engine()?;
        let handle = telegate_transport::start(&self.settings, engine, self.clients.clone()).await?;
        Ok(handle)
    }

    /// Drop routes, clients, pending commands and cached identities
    pub fn reset(&self) {
        if let Some(repeat) = &self.repeat {
            repeat.shutdown();
        }
        if let Some(engine) = &self.engine {
            engine.shutdown();
        }
        self.routes.clear();
        self.clients.clear();
        self.identity.reset();
        info!("Gateway context reset");
    }
}
