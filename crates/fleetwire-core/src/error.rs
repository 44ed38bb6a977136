//! Error types shared by the provisioning pipeline.

use thiserror::Error;

/// Result alias used throughout fleetwire.
pub type Result<T> = std::result::Result<T, Error>;

/// Broad grouping of errors, used when logging and counting failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Missing or invalid collaborator/configuration. Fatal at startup.
    Configuration,
    /// Bad input detected by the operation that received it.
    Validation,
    /// A referenced entity or destination could not be resolved.
    Resolution,
    /// Queue capacity or cancellation.
    Queue,
    /// Payload encoding, decoding or delivery.
    Transport,
    /// Anything else.
    Internal,
}

/// Pipeline errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or invalid configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Required command parameter not present in the invocation
    #[error("Required command parameter missing: {0}")]
    RequiredParameterMissing(String),

    /// Parameter value could not be coerced to its declared type
    #[error("Field '{name}' contains a value that can not be parsed as a {expected}")]
    InvalidParameterValue { name: String, expected: String },

    /// Command name and namespace already used within the specification
    #[error("Duplicate command '{name}' in specification {specification_token}")]
    DuplicateCommand {
        specification_token: String,
        name: String,
    },

    /// Device already has an active assignment
    #[error("Device is already assigned: {0}")]
    DeviceAlreadyAssigned(String),

    /// No destination mapped for a specification and no default configured
    #[error("No command destination mapping for specification: {0}")]
    NoDestinationMapping(String),

    /// Destination id not present in the router index
    #[error("No destination found for destination id: {0}")]
    DestinationNotFound(String),

    /// Parent hardware id does not resolve to a device
    #[error("Parent device reference points to device that does not exist: {0}")]
    ParentDeviceNotFound(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Invalid command referenced from invocation: {0}")]
    CommandNotFound(String),

    #[error("Device assignment not found: {0}")]
    AssignmentNotFound(String),

    #[error("Site not found: {0}")]
    SiteNotFound(String),

    #[error("Device specification not found: {0}")]
    SpecificationNotFound(String),

    /// Event referenced a hardware id with no device
    #[error("Invalid hardware id: {0}")]
    InvalidHardwareId(String),

    /// Event arrived for a device without a current assignment
    #[error("Device is not assigned: {0}")]
    DeviceNotAssigned(String),

    /// Batch operation or element could not be found
    #[error("Batch operation not found: {0}")]
    BatchOperationNotFound(String),

    /// Queue at capacity (non-blocking submission only)
    #[error("Queue is full (capacity {0})")]
    QueueFull(usize),

    /// Queue closed or worker cancelled
    #[error("Interrupted: {0}")]
    Interrupted(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Delivery error: {0}")]
    Delivery(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Category of this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Configuration(_) => ErrorCategory::Configuration,
            Error::RequiredParameterMissing(_)
            | Error::InvalidParameterValue { .. }
            | Error::DuplicateCommand { .. }
            | Error::DeviceAlreadyAssigned(_) => ErrorCategory::Validation,
            Error::NoDestinationMapping(_)
            | Error::DestinationNotFound(_)
            | Error::ParentDeviceNotFound(_)
            | Error::DeviceNotFound(_)
            | Error::CommandNotFound(_)
            | Error::AssignmentNotFound(_)
            | Error::SiteNotFound(_)
            | Error::SpecificationNotFound(_)
            | Error::InvalidHardwareId(_)
            | Error::DeviceNotAssigned(_)
            | Error::BatchOperationNotFound(_) => ErrorCategory::Resolution,
            Error::QueueFull(_) | Error::Interrupted(_) => ErrorCategory::Queue,
            Error::Decode(_) | Error::Encode(_) | Error::Delivery(_) | Error::Serialization(_) => {
                ErrorCategory::Transport
            }
            Error::Other(_) => ErrorCategory::Internal,
        }
    }

    /// Shorthand for an invalid parameter value error.
    pub fn invalid_parameter(name: impl Into<String>, expected: impl Into<String>) -> Self {
        Error::InvalidParameterValue {
            name: name.into(),
            expected: expected.into(),
        }
    }

    /// Whether this error is fatal at startup.
    pub fn is_configuration(&self) -> bool {
        self.category() == ErrorCategory::Configuration
    }
}
