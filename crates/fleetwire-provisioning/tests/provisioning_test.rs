mod common;

use std::collections::HashMap;
use std::sync::Arc;

use common::*;
use fleetwire_core::model::*;
use fleetwire_core::{
    BatchOperationCreateRequest, DeviceCommandInvocationCreateRequest, DeviceManagement,
    LifecycleComponent, LifecycleStatus,
};
use fleetwire_provisioning::config::{BatchConfig, InboundConfig, OutboundConfig, ProvisioningProcessorConfig};
use fleetwire_provisioning::{
    ChannelEventReceiver, DeviceProvisioning, InboundEventSource, JsonBatchEventDecoder,
    ProvisioningConfig,
};
use tokio::sync::mpsc::{Sender, UnboundedReceiver};

fn small_config() -> ProvisioningConfig {
    ProvisioningConfig {
        inbound: InboundConfig {
            queue_capacity: 100,
            worker_count: 2,
            ..Default::default()
        },
        outbound: OutboundConfig {
            queue_capacity: 100,
            worker_count: 2,
        },
        provisioning_processor: ProvisioningProcessorConfig { worker_count: 2 },
        batch: BatchConfig {
            worker_count: 1,
            throttle_delay_ms: 0,
        },
        ..Default::default()
    }
}

struct PipelineContext {
    fixture: Fixture,
    provisioning: DeviceProvisioning,
    payloads: Sender<Vec<u8>>,
    deliveries: UnboundedReceiver<Delivery>,
    observer: Arc<RecordingOutboundProcessor>,
}

impl PipelineContext {
    async fn new() -> Self {
        let fixture = Fixture::new().await;
        let (destination, deliveries) = channel_destination("default");
        let (receiver, payloads) = ChannelEventReceiver::<Vec<u8>>::new("json", 64);
        let source = InboundEventSource::<Vec<u8>>::new("json", Arc::new(JsonBatchEventDecoder))
            .with_receiver(Arc::new(receiver))
            .with_update_assignment_state(true);

        let provisioning =
            DeviceProvisioning::from_config(small_config(), fixture.dyn_management(), vec![destination])
                .unwrap()
                .with_event_source(Arc::new(source));
        let observer = Arc::new(RecordingOutboundProcessor::new("observer", Behavior::Record));
        provisioning.outbound_chain().add_processor(observer.clone());

        provisioning.start().await.unwrap();
        assert_eq!(provisioning.lifecycle_status(), LifecycleStatus::Started);
        assert!(provisioning.outbound_chain().is_processing_enabled());
        Self {
            fixture,
            provisioning,
            payloads,
            deliveries,
            observer,
        }
    }

    async fn send(&self, json: &str) {
        self.payloads.send(json.as_bytes().to_vec()).await.unwrap();
    }

    async fn register(&mut self, hardware_id: &str) -> DeviceAssignment {
        self.send(&format!(
            r#"{{"hardwareId": "{0}", "registration": {{"hardware_id": "{0}", "specification_token": "spec-1"}}}}"#,
            hardware_id
        ))
        .await;
        let delivery = next_delivery(&mut self.deliveries).await;
        assert_eq!(
            delivery.system_command,
            Some(SystemCommand::ack(RegistrationSuccessReason::NewRegistration))
        );
        self.fixture
            .management
            .assignments_for_device(hardware_id)
            .pop()
            .expect("assignment created")
    }
}

#[tokio::test]
async fn test_registration_then_events_are_stored() {
    let mut t = PipelineContext::new().await;
    let assignment = t.register("dev-1").await;

    t.send(r#"{"hardwareId": "dev-1", "measurements": [{"measurements": {"temp": 22.0}}]}"#)
        .await;

    let management = t.fixture.management.clone();
    let token = assignment.token.clone();
    eventually(move || management.list_measurements(&token).len() == 1).await;
    let stored = t.fixture.management.list_measurements(&assignment.token);
    assert_eq!(stored[0].measurements.get("temp"), Some(&22.0));

    // Stored events reach outbound processors.
    let observer = t.observer.clone();
    eventually(move || observer.kinds().contains(&"measurements".to_string())).await;

    t.provisioning.stop().await.unwrap();
    assert_eq!(t.provisioning.lifecycle_status(), LifecycleStatus::Stopped);
}

#[tokio::test]
async fn test_invocation_is_delivered_through_outbound_path() {
    let mut t = PipelineContext::new().await;
    let command = t.fixture.create_command().await;
    let assignment = t.register("dev-1").await;

    let invocation = t
        .provisioning
        .management()
        .add_device_command_invocation(
            &ctx(),
            &assignment.token,
            &command,
            DeviceCommandInvocationCreateRequest {
                command_token: command.token.clone(),
                initiator: CommandInitiator::Rest,
                initiator_id: None,
                target: CommandTarget::Assignment,
                target_id: assignment.token.clone(),
                parameter_values: HashMap::from([("level".to_string(), "7".to_string())]),
                status: None,
                metadata: HashMap::new(),
            },
        )
        .await
        .unwrap();

    let delivery = next_delivery(&mut t.deliveries).await;
    assert_eq!(delivery.gateway_hardware_id(), "dev-1");
    let execution = delivery.execution.expect("command execution");
    assert_eq!(execution.invocation.id, invocation.id);
    assert_eq!(execution.parameters.get("level").and_then(|v| v.as_i64()), Some(7));

    t.provisioning.stop().await.unwrap();
}

#[tokio::test]
async fn test_batch_operation_invokes_and_delivers_commands() {
    let mut t = PipelineContext::new().await;
    let command = t.fixture.create_command().await;
    t.register("dev-1").await;
    t.register("dev-2").await;

    let operation = t
        .provisioning
        .management()
        .create_batch_operation(
            &ctx(),
            BatchOperationCreateRequest {
                token: Some("batch-1".into()),
                operation_type: BatchOperationType::InvokeCommand,
                parameters: HashMap::from([(PARAM_COMMAND_TOKEN.to_string(), command.token.clone())]),
                metadata: HashMap::from([("level".to_string(), "2".to_string())]),
                hardware_ids: vec!["dev-1".into(), "dev-2".into()],
            },
        )
        .await
        .unwrap();

    let mut delivered = vec![
        next_delivery(&mut t.deliveries).await.gateway_hardware_id().to_string(),
        next_delivery(&mut t.deliveries).await.gateway_hardware_id().to_string(),
    ];
    delivered.sort();
    assert_eq!(delivered, vec!["dev-1", "dev-2"]);

    let management = t.fixture.management.clone();
    let token = operation.token.clone();
    tokio::time::timeout(std::time::Duration::from_secs(2), async move {
        loop {
            let current = management.get_batch_operation(&token).await.unwrap().unwrap();
            if current.processing_status == BatchOperationStatus::FinishedSuccessfully {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("batch operation did not finish");

    t.provisioning.stop().await.unwrap();
}

#[tokio::test]
async fn test_start_requires_components() {
    let fixture = Fixture::new().await;
    let provisioning = DeviceProvisioning::new(fixture.dyn_management());

    let err = provisioning.start().await.unwrap_err();
    assert!(err.is_configuration());
    assert_eq!(
        err.to_string(),
        "Configuration error: No command dispatcher configured for provisioning"
    );
    assert_eq!(provisioning.lifecycle_status(), LifecycleStatus::Error);

    let err = provisioning
        .deliver_system_command("dev-1", &SystemCommand::ack(RegistrationSuccessReason::NewRegistration))
        .await
        .unwrap_err();
    assert!(err.is_configuration());
}

#[tokio::test]
async fn test_from_config_rejects_invalid_configuration() {
    let fixture = Fixture::new().await;
    let (destination, _deliveries) = channel_destination("default");
    let mut config = small_config();
    config.inbound.worker_count = 0;

    let result = DeviceProvisioning::from_config(config, fixture.dyn_management(), vec![destination]);
    assert!(result.err().map(|e| e.is_configuration()).unwrap_or(false));
}
