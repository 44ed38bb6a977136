//! Fleetwire core
//!
//! Shared building blocks for the device provisioning pipeline:
//!
//! - **Model**: devices, assignments, commands, events and batch operations
//! - **Management**: the [`DeviceManagement`] trait the pipeline reads and writes through
//! - **Lifecycle**: start/stop contract for pipeline components
//! - **Context**: explicit execution identity for pipeline workers
//! - **Errors**: a single error type with categories

pub mod context;
pub mod error;
pub mod lifecycle;
pub mod management;
pub mod memory;
pub mod model;
pub mod telemetry;

pub use context::{ExecutionContext, SYSTEM_PRINCIPAL};
pub use error::{Error, ErrorCategory, Result};
pub use lifecycle::{LifecycleComponent, LifecycleState, LifecycleStatus};
pub use management::{
    BatchOperationCreateRequest, DeviceAssignmentCreateRequest, DeviceCommandCreateRequest,
    DeviceCommandInvocationCreateRequest, DeviceCreateRequest, DeviceManagement,
    DeviceSpecificationCreateRequest, SiteCreateRequest,
};
pub use memory::InMemoryDeviceManagement;

/// Re-exports commonly used types.
pub mod prelude {
    pub use crate::context::ExecutionContext;
    pub use crate::error::{Error, Result};
    pub use crate::lifecycle::{LifecycleComponent, LifecycleStatus};
    pub use crate::management::DeviceManagement;
    pub use crate::model::*;
}
