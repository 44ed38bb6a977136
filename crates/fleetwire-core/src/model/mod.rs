//! Domain model for devices, commands and events.

pub mod batch;
pub mod command;
pub mod device;
pub mod event;

pub use batch::{
    BatchElement, BatchOperation, BatchOperationStatus, BatchOperationType,
    ElementProcessingStatus, META_BATCH_OPERATION_ID, META_INVOCATION_EVENT_ID,
    PARAM_COMMAND_TOKEN,
};
pub use command::{
    CommandInitiator, CommandParameter, CommandStatus, CommandTarget, DeviceCommand,
    DeviceCommandExecution, DeviceCommandInvocation, ParameterType, ParameterValue,
    RegistrationFailureReason, RegistrationSuccessReason, SystemCommand,
};
pub use device::{
    Device, DeviceAssignment, DeviceAssignmentState, DeviceAssignmentStatus, DeviceAssignmentType,
    DeviceElementMapping, DeviceSpecification, Site,
};
pub use event::{
    AlertCreateRequest, AlertLevel, AlertSource, CommandResponseCreateRequest,
    DecodedDeviceEventRequest, DeviceAlert, DeviceCommandResponse, DeviceEventInfo,
    DeviceEventRequest, DeviceLocation, DeviceMeasurements, LocationCreateRequest,
    MeasurementsCreateRequest, OutboundEvent, RegistrationRequest,
};
