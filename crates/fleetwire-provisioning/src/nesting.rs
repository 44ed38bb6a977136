//! Gateway/nested device addressing.
//!
//! A nested device is only reachable through its gateway, so commands for
//! it are addressed to the gateway along with the schema path that leads
//! to the nested device.

use fleetwire_core::model::Device;
use fleetwire_core::{DeviceManagement, Error, Result};
use serde::Serialize;
use tracing::warn;

/// Addressing information for a device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NestingContext {
    /// Device that is addressable on the transport
    pub gateway: Device,
    /// Device embedded behind the gateway, if any
    pub nested: Option<Device>,
    /// Schema path from the gateway to the nested device
    pub path: Option<String>,
}

impl NestingContext {
    /// Context for a device that is its own gateway.
    pub fn standalone(device: Device) -> Self {
        Self {
            gateway: device,
            nested: None,
            path: None,
        }
    }

    /// True when commands for the target travel through a gateway.
    pub fn is_nested(&self) -> bool {
        self.nested.is_some()
    }
}

/// Resolves the nesting context for a device.
pub struct NestedDeviceSupport;

impl NestedDeviceSupport {
    /// Standalone devices target themselves. A nested device is addressed
    /// through its parent using the parent's element mapping path; a parent
    /// without a mapping for the child falls back to standalone.
    ///
    /// Fails with `ParentDeviceNotFound` if the parent is not registered.
    pub async fn resolve(device: &Device, management: &dyn DeviceManagement) -> Result<NestingContext> {
        let Some(parent_id) = device.parent_hardware_id.as_deref() else {
            return Ok(NestingContext::standalone(device.clone()));
        };

        let parent = management
            .get_device_by_hardware_id(parent_id)
            .await?
            .ok_or_else(|| Error::ParentDeviceNotFound(parent_id.to_string()))?;

        match parent.mapping_for_child(&device.hardware_id) {
            Some(mapping) => {
                let path = mapping.device_element_schema_path.clone();
                Ok(NestingContext {
                    gateway: parent,
                    nested: Some(device.clone()),
                    path: Some(path),
                })
            }
            None => {
                warn!(
                    hardware_id = %device.hardware_id,
                    parent = %parent_id,
                    "Parent has no element mapping for nested device, addressing it directly"
                );
                Ok(NestingContext::standalone(device.clone()))
            }
        }
    }
}
