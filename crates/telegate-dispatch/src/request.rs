/*!
 * Outbound requests.
 *
 * Requests translate kernel intents (move along a route, execute a station
 * action, report state) into what a codec encodes. They are discriminated
 * only by [`RequestKind`]; the `is_*_request` helpers compare that tag.
 */
use std::fmt;

use telegate_core::config::Settings;
use telegate_core::types::{Fields, RequestKind, Value};
use telegate_transport::RequestFrame;

use crate::error::{Error, Result};
use crate::kernel::MovementCommand;
use crate::route::ActionRoute;

/// An outbound request
pub trait Request: fmt::Debug + Send + Sync {
    /// Request kind discriminant
    fn kind(&self) -> RequestKind;

    /// Routing target
    fn target(&self) -> &str;

    /// Device or vehicle the request is addressed to
    fn device_id(&self) -> &str;

    /// Command keyword
    fn cmd_key(&self) -> &str;

    /// Kind-specific fields
    fn fields(&self) -> Fields;

    /// Flatten the request for encoding
    fn to_frame(&self, correlation_id: Option<String>) -> RequestFrame {
        RequestFrame {
            kind: self.kind(),
            target: self.target().to_string(),
            device_id: self.device_id().to_string(),
            cmd_key: self.cmd_key().to_string(),
            correlation_id,
            fields: self.fields(),
        }
    }
}

/// Whether the request is a move request
pub fn is_move_request(request: &dyn Request) -> bool {
    request.kind() == RequestKind::Move
}

/// Whether the request is an action request
pub fn is_action_request(request: &dyn Request) -> bool {
    request.kind() == RequestKind::Action
}

/// Whether the request is a business request
pub fn is_business_request(request: &dyn Request) -> bool {
    request.kind() == RequestKind::Business
}

/// Whether the request is a state request
pub fn is_state_request(request: &dyn Request) -> bool {
    request.kind() == RequestKind::State
}

/// Position report request built from a movement command
#[derive(Debug, Clone, PartialEq)]
pub struct StateRequest {
    vehicle_name: String,
    current_point_name: String,
    next_point_name: String,
    end_point_name: String,
    target: String,
}

impl StateRequest {
    /// Start building a state request
    pub fn builder() -> StateRequestBuilder {
        StateRequestBuilder::default()
    }

    /// Vehicle the request concerns
    pub fn vehicle_name(&self) -> &str {
        &self.vehicle_name
    }

    /// Point the current step starts at
    pub fn current_point_name(&self) -> &str {
        &self.current_point_name
    }

    /// Point the current step ends at
    pub fn next_point_name(&self) -> &str {
        &self.next_point_name
    }

    /// Final destination of the order
    pub fn end_point_name(&self) -> &str {
        &self.end_point_name
    }
}

impl Request for StateRequest {
    fn kind(&self) -> RequestKind {
        RequestKind::State
    }

    fn target(&self) -> &str {
        &self.target
    }

    fn device_id(&self) -> &str {
        &self.vehicle_name
    }

    fn cmd_key(&self) -> &str {
        &self.target
    }

    fn fields(&self) -> Fields {
        let mut fields = Fields::new();
        fields.insert("vehicleName".to_string(), Value::from(self.vehicle_name.as_str()));
        fields.insert("currentPointName".to_string(), Value::from(self.current_point_name.as_str()));
        fields.insert("nextPointName".to_string(), Value::from(self.next_point_name.as_str()));
        fields.insert("endPointName".to_string(), Value::from(self.end_point_name.as_str()));
        fields
    }
}

/// Builder for [`StateRequest`]
#[derive(Debug, Default)]
pub struct StateRequestBuilder {
    vehicle_name: Option<String>,
    command: Option<MovementCommand>,
    target: Option<String>,
}

impl StateRequestBuilder {
    /// Vehicle the request concerns
    pub fn vehicle_name<S: Into<String>>(mut self, name: S) -> Self {
        self.vehicle_name = Some(name.into());
        self
    }

    /// Movement command the points are taken from
    pub fn command(mut self, command: &MovementCommand) -> Self {
        self.command = Some(command.clone());
        self
    }

    /// Explicit routing target
    pub fn target<S: Into<String>>(mut self, target: S) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Take the routing target from `state.request.target`
    pub fn settings(self, settings: &Settings) -> Self {
        self.target(settings.state_request_target())
    }

    /// Build the request
    pub fn build(self) -> Result<StateRequest> {
        let vehicle_name = self
            .vehicle_name
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| Error::validation("State request needs a vehicle name"))?;
        let command = self
            .command
            .ok_or_else(|| Error::validation("State request needs a movement command"))?;
        let current_point_name = command.step.source_point.clone().ok_or_else(|| {
            Error::not_found(format!(
                "Route step to [{}] of vehicle [{}] has no source point",
                command.step.destination_point, vehicle_name
            ))
        })?;

        Ok(StateRequest {
            vehicle_name,
            current_point_name,
            next_point_name: command.step.destination_point,
            end_point_name: command.final_destination,
            target: self.target.unwrap_or_else(|| "state".to_string()),
        })
    }
}

/// Drive order for one vehicle
#[derive(Debug, Clone, PartialEq)]
pub struct MoveRequest {
    vehicle_name: String,
    cmd_key: String,
    target: String,
    commands: Vec<MovementCommand>,
}

impl MoveRequest {
    /// Start building a move request
    pub fn builder() -> MoveRequestBuilder {
        MoveRequestBuilder::default()
    }

    /// Vehicle the request is addressed to
    pub fn vehicle_name(&self) -> &str {
        &self.vehicle_name
    }

    /// Movement commands in driving order
    pub fn commands(&self) -> &[MovementCommand] {
        &self.commands
    }
}

impl Request for MoveRequest {
    fn kind(&self) -> RequestKind {
        RequestKind::Move
    }

    fn target(&self) -> &str {
        &self.target
    }

    fn device_id(&self) -> &str {
        &self.vehicle_name
    }

    fn cmd_key(&self) -> &str {
        &self.cmd_key
    }

    fn fields(&self) -> Fields {
        let points: Vec<Value> = self
            .commands
            .iter()
            .map(|c| Value::from(c.step.destination_point.as_str()))
            .collect();
        let last = self.commands.last();

        let mut fields = Fields::new();
        fields.insert("vehicleName".to_string(), Value::from(self.vehicle_name.as_str()));
        fields.insert("points".to_string(), Value::Array(points));
        if let Some(last) = last {
            fields.insert("finalDestination".to_string(), Value::from(last.final_destination.as_str()));
            if !last.operation.is_empty() {
                fields.insert("operation".to_string(), Value::from(last.operation.as_str()));
            }
        }
        fields
    }
}

/// Builder for [`MoveRequest`]
#[derive(Debug, Default)]
pub struct MoveRequestBuilder {
    vehicle_name: Option<String>,
    commands: Vec<MovementCommand>,
}

impl MoveRequestBuilder {
    /// Vehicle the request is addressed to
    pub fn vehicle_name<S: Into<String>>(mut self, name: S) -> Self {
        self.vehicle_name = Some(name.into());
        self
    }

    /// Append a movement command
    pub fn command(mut self, command: MovementCommand) -> Self {
        self.commands.push(command);
        self
    }

    /// Append several movement commands
    pub fn commands<I: IntoIterator<Item = MovementCommand>>(mut self, commands: I) -> Self {
        self.commands.extend(commands);
        self
    }

    /// Build the request; the command keyword comes from `move.request.cmd`
    pub fn build(self, settings: &Settings) -> Result<MoveRequest> {
        let cmd_key = settings.move_request_cmd()?;
        let vehicle_name = self
            .vehicle_name
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| Error::validation("Move request needs a vehicle name"))?;
        if self.commands.is_empty() {
            return Err(Error::validation(format!(
                "Move request for [{}] has no movement commands",
                vehicle_name
            )));
        }
        let target = settings.move_request_target().unwrap_or_else(|| cmd_key.clone());

        Ok(MoveRequest {
            vehicle_name,
            cmd_key,
            target,
            commands: self.commands,
        })
    }
}

/// Station action to execute on a device
#[derive(Debug, Clone, PartialEq)]
pub struct ActionRequest {
    action_key: String,
    device_id: String,
    vehicle_id: String,
    operation: String,
    target: String,
    params: Fields,
}

impl ActionRequest {
    /// Create an action request; the target defaults to the action key
    pub fn new<A, D, V>(action_key: A, device_id: D, vehicle_id: V) -> Self
    where
        A: Into<String>,
        D: Into<String>,
        V: Into<String>,
    {
        let action_key = action_key.into();
        Self {
            target: action_key.clone(),
            action_key,
            device_id: device_id.into(),
            vehicle_id: vehicle_id.into(),
            operation: String::new(),
            params: Fields::new(),
        }
    }

    /// Create a request for a registered route
    pub fn for_route(route: &ActionRoute) -> Self {
        Self::new(route.action_key(), route.device_id(), route.vehicle_id())
    }

    /// Set the operation name
    pub fn with_operation<S: Into<String>>(mut self, operation: S) -> Self {
        self.operation = operation.into();
        self
    }

    /// Add a parameter
    pub fn with_param<K: Into<String>, V: Into<Value>>(mut self, key: K, value: V) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Apply `action.request.target`, if configured
    pub fn with_settings(mut self, settings: &Settings) -> Self {
        if let Some(target) = settings.action_request_target() {
            self.target = target;
        }
        self
    }

    /// Action key
    pub fn action_key(&self) -> &str {
        &self.action_key
    }

    /// Vehicle the device belongs to
    pub fn vehicle_id(&self) -> &str {
        &self.vehicle_id
    }
}

impl Request for ActionRequest {
    fn kind(&self) -> RequestKind {
        RequestKind::Action
    }

    fn target(&self) -> &str {
        &self.target
    }

    fn device_id(&self) -> &str {
        &self.device_id
    }

    fn cmd_key(&self) -> &str {
        &self.action_key
    }

    fn fields(&self) -> Fields {
        let mut fields = self.params.clone();
        fields.insert("vehicleId".to_string(), Value::from(self.vehicle_id.as_str()));
        if !self.operation.is_empty() {
            fields.insert("operation".to_string(), Value::from(self.operation.as_str()));
        }
        fields
    }
}

/// Free-form request carrying a command keyword and parameters
#[derive(Debug, Clone, PartialEq)]
pub struct BusinessRequest {
    device_id: String,
    cmd_key: String,
    target: String,
    params: Fields,
}

impl BusinessRequest {
    /// Create a business request; the target defaults to the command keyword
    pub fn new<D: Into<String>, C: Into<String>>(device_id: D, cmd_key: C) -> Self {
        let cmd_key = cmd_key.into();
        Self {
            device_id: device_id.into(),
            target: cmd_key.clone(),
            cmd_key,
            params: Fields::new(),
        }
    }

    /// Add a parameter
    pub fn with_param<K: Into<String>, V: Into<Value>>(mut self, key: K, value: V) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Override the routing target
    pub fn with_target<S: Into<String>>(mut self, target: S) -> Self {
        self.target = target.into();
        self
    }
}

impl Request for BusinessRequest {
    fn kind(&self) -> RequestKind {
        RequestKind::Business
    }

    fn target(&self) -> &str {
        &self.target
    }

    fn device_id(&self) -> &str {
        &self.device_id
    }

    fn cmd_key(&self) -> &str {
        &self.cmd_key
    }

    fn fields(&self) -> Fields {
        self.params.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use telegate_core::config::{ACTION_REQUEST_TARGET, MOVE_REQUEST_CMD, STATE_REQUEST_TARGET};

    fn command() -> MovementCommand {
        MovementCommand::new(Some("P1"), "P2", "P3")
    }

    #[test]
    fn test_state_request_from_movement_command() {
        let request = StateRequest::builder()
            .vehicle_name("V1")
            .command(&command())
            .build()
            .unwrap();

        assert_eq!(request.current_point_name(), "P1");
        assert_eq!(request.next_point_name(), "P2");
        assert_eq!(request.end_point_name(), "P3");
        assert_eq!(request.vehicle_name(), "V1");
        assert_eq!(request.target(), "state");
        assert!(is_state_request(&request));
        assert!(!is_move_request(&request));

        let frame = request.to_frame(None);
        assert_eq!(frame.fields["nextPointName"].as_str(), Some("P2"));
    }

    #[test]
    fn test_state_request_target_from_settings() {
        let settings = Settings::from_pairs(&[(STATE_REQUEST_TARGET, "plc-state")]).unwrap();
        let request = StateRequest::builder()
            .vehicle_name("V1")
            .command(&command())
            .settings(&settings)
            .build()
            .unwrap();
        assert_eq!(request.target(), "plc-state");
    }

    #[test]
    fn test_state_request_errors() {
        let err = StateRequest::builder().command(&command()).build().unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let err = StateRequest::builder().vehicle_name("V1").build().unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let first_step = MovementCommand::new(None::<String>, "P2", "P3");
        let err = StateRequest::builder()
            .vehicle_name("V1")
            .command(&first_step)
            .build()
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_move_request_requires_command_keyword() {
        let settings = Settings::defaults().unwrap();
        let err = MoveRequest::builder()
            .vehicle_name("V1")
            .command(command())
            .build(&settings)
            .unwrap_err();
        assert!(err.is_config());

        let settings = Settings::from_pairs(&[(MOVE_REQUEST_CMD, "  ")]).unwrap();
        let err = MoveRequest::builder()
            .vehicle_name("V1")
            .command(command())
            .build(&settings)
            .unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_move_request_fields() {
        let settings = Settings::from_pairs(&[(MOVE_REQUEST_CMD, "move")]).unwrap();
        let request = MoveRequest::builder()
            .vehicle_name("V1")
            .command(MovementCommand::new(Some("P1"), "P2", "P4"))
            .command(MovementCommand::new(Some("P2"), "P4", "P4").with_operation("Load"))
            .build(&settings)
            .unwrap();

        assert!(is_move_request(&request));
        assert_eq!(request.cmd_key(), "move");
        assert_eq!(request.target(), "move");
        let fields = request.fields();
        assert_eq!(fields["points"], Value::Array(vec![Value::from("P2"), Value::from("P4")]));
        assert_eq!(fields["operation"].as_str(), Some("Load"));

        let err = MoveRequest::builder().vehicle_name("V1").build(&settings).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_action_and_business_requests() {
        let settings = Settings::from_pairs(&[(ACTION_REQUEST_TARGET, "station")]).unwrap();
        let action = ActionRequest::new("lift", "D1", "V1")
            .with_operation("up")
            .with_param("height", 120)
            .with_settings(&settings);
        assert!(is_action_request(&action));
        assert_eq!(action.target(), "station");
        assert_eq!(action.cmd_key(), "lift");
        assert_eq!(action.fields()["height"].as_integer(), Some(120));

        let business = BusinessRequest::new("D1", "report").with_param("shift", "night");
        assert!(is_business_request(&business));
        assert!(!is_action_request(&business));
        assert_eq!(business.target(), "report");
    }
}
