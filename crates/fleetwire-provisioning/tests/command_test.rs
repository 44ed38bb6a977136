mod common;

use std::collections::HashMap;
use std::sync::Arc;

use common::*;
use fleetwire_core::model::*;
use fleetwire_core::{
    DeviceCommandInvocationCreateRequest, DeviceCreateRequest, DeviceManagement, Error,
    LifecycleComponent,
};
use fleetwire_provisioning::{CommandDispatcher, DefaultCommandProcessingStrategy, SingleChoiceCommandRouter};
use tokio::sync::mpsc::UnboundedReceiver;

struct CommandContext {
    fixture: Fixture,
    dispatcher: CommandDispatcher,
    deliveries: UnboundedReceiver<Delivery>,
    command: DeviceCommand,
}

impl CommandContext {
    async fn new() -> Self {
        let fixture = Fixture::new().await;
        let command = fixture.create_command().await;
        let (destination, deliveries) = channel_destination("default");
        let dispatcher = CommandDispatcher::new(
            Arc::new(DefaultCommandProcessingStrategy::new(fixture.dyn_management())),
            Arc::new(SingleChoiceCommandRouter::new()),
            vec![destination],
        );
        dispatcher.start().await.unwrap();
        Self {
            fixture,
            dispatcher,
            deliveries,
            command,
        }
    }

    async fn invoke(&self, assignment: &DeviceAssignment, values: &[(&str, &str)]) -> DeviceCommandInvocation {
        let parameter_values: HashMap<String, String> = values
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.fixture
            .management
            .add_device_command_invocation(
                &ctx(),
                &assignment.token,
                &self.command,
                DeviceCommandInvocationCreateRequest {
                    command_token: self.command.token.clone(),
                    initiator: CommandInitiator::Rest,
                    initiator_id: Some("operator".into()),
                    target: CommandTarget::Assignment,
                    target_id: assignment.token.clone(),
                    parameter_values,
                    status: None,
                    metadata: HashMap::new(),
                },
            )
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn test_standalone_device_receives_typed_parameters() {
    let mut ctx = CommandContext::new().await;
    ctx.fixture.create_device("dev-1").await;
    let assignment = ctx.fixture.assign("dev-1").await;

    let invocation = ctx.invoke(&assignment, &[("level", "42"), ("label", "high")]).await;
    ctx.dispatcher.deliver_command(&invocation).await.unwrap();

    let delivery = next_delivery(&mut ctx.deliveries).await;
    assert_eq!(delivery.gateway_hardware_id(), "dev-1");
    assert_eq!(delivery.assignment_token.as_deref(), Some(assignment.token.as_str()));
    let execution = delivery.execution.expect("command execution");
    assert_eq!(execution.parameters.get("level").and_then(|v| v.as_i64()), Some(42));
    assert_eq!(execution.parameters.get("label").and_then(|v| v.as_str()), Some("high"));

    let payload: serde_json::Value = serde_json::from_slice(&delivery.encoded).unwrap();
    assert_eq!(payload["hardwareId"], "dev-1");
    assert_eq!(payload["command"]["name"], "set_level");
    assert_eq!(payload["command"]["invocationId"], invocation.id.as_str());
}

#[tokio::test]
async fn test_nested_device_is_addressed_through_gateway() {
    let mut ctx = CommandContext::new().await;
    ctx.fixture
        .create_device_with(DeviceCreateRequest {
            hardware_id: "gw-1".into(),
            site_token: ctx.fixture.site.token.clone(),
            specification_token: ctx.fixture.specification.token.clone(),
            element_mappings: vec![DeviceElementMapping::new("/bus/1", "child-1")],
            ..Default::default()
        })
        .await;
    ctx.fixture
        .create_device_with(DeviceCreateRequest {
            hardware_id: "child-1".into(),
            site_token: ctx.fixture.site.token.clone(),
            specification_token: ctx.fixture.specification.token.clone(),
            parent_hardware_id: Some("gw-1".into()),
            ..Default::default()
        })
        .await;
    let assignment = ctx.fixture.assign("child-1").await;

    let invocation = ctx.invoke(&assignment, &[("level", "1")]).await;
    ctx.dispatcher.deliver_command(&invocation).await.unwrap();

    let delivery = next_delivery(&mut ctx.deliveries).await;
    assert_eq!(delivery.gateway_hardware_id(), "gw-1");
    assert_eq!(delivery.nesting.path.as_deref(), Some("/bus/1"));
    assert_eq!(
        delivery.nesting.nested.as_ref().map(|d| d.hardware_id.as_str()),
        Some("child-1")
    );

    let payload: serde_json::Value = serde_json::from_slice(&delivery.encoded).unwrap();
    assert_eq!(payload["hardwareId"], "gw-1");
    assert_eq!(payload["nestedHardwareId"], "child-1");
    assert_eq!(payload["nestedPath"], "/bus/1");
}

#[tokio::test]
async fn test_missing_parent_fails_delivery() {
    let ctx = CommandContext::new().await;
    ctx.fixture
        .create_device_with(DeviceCreateRequest {
            hardware_id: "orphan".into(),
            site_token: ctx.fixture.site.token.clone(),
            specification_token: ctx.fixture.specification.token.clone(),
            parent_hardware_id: Some("gone".into()),
            ..Default::default()
        })
        .await;
    let assignment = ctx.fixture.assign("orphan").await;

    let invocation = ctx.invoke(&assignment, &[("level", "1")]).await;
    let err = ctx.dispatcher.deliver_command(&invocation).await.unwrap_err();
    assert!(matches!(err, Error::ParentDeviceNotFound(id) if id == "gone"));
}

#[tokio::test]
async fn test_parameter_errors_propagate() {
    let mut ctx = CommandContext::new().await;
    ctx.fixture.create_device("dev-1").await;
    let assignment = ctx.fixture.assign("dev-1").await;

    let missing = ctx.invoke(&assignment, &[("label", "x")]).await;
    let err = ctx.dispatcher.deliver_command(&missing).await.unwrap_err();
    assert!(matches!(err, Error::RequiredParameterMissing(name) if name == "level"));

    let malformed = ctx.invoke(&assignment, &[("level", "lots")]).await;
    let err = ctx.dispatcher.deliver_command(&malformed).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "Field 'level' contains a value that can not be parsed as a integer"
    );

    assert!(ctx.deliveries.try_recv().is_err());
}

#[tokio::test]
async fn test_system_command_to_registered_device() {
    let mut ctx = CommandContext::new().await;
    ctx.fixture.create_device("dev-1").await;

    let command = SystemCommand::ack(RegistrationSuccessReason::AlreadyRegistered);
    ctx.dispatcher.deliver_system_command("dev-1", &command).await.unwrap();

    let delivery = next_delivery(&mut ctx.deliveries).await;
    assert_eq!(delivery.system_command, Some(command));
    assert!(delivery.assignment_token.is_none());

    let err = ctx
        .dispatcher
        .deliver_system_command("nobody", &SystemCommand::ack(RegistrationSuccessReason::NewRegistration))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DeviceNotFound(_)));
}

#[tokio::test]
async fn test_dispatcher_requires_destinations() {
    let fixture = Fixture::new().await;
    let dispatcher = CommandDispatcher::new(
        Arc::new(DefaultCommandProcessingStrategy::new(fixture.dyn_management())),
        Arc::new(SingleChoiceCommandRouter::new()),
        vec![],
    );
    let err = dispatcher.start().await.unwrap_err();
    assert!(err.is_configuration());
}
