//! Sites, specifications, devices and assignments.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::event::{DeviceAlert, DeviceLocation};

/// A physical or logical location devices are assigned to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    /// Unique token
    pub token: String,
    /// Display name
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub created_date: DateTime<Utc>,
}

/// Describes a type of device and the commands it understands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSpecification {
    /// Unique token
    pub token: String,
    /// Display name
    pub name: String,
    pub created_date: DateTime<Utc>,
}

/// Maps a schema path on a gateway device to an embedded child device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceElementMapping {
    /// Path within the parent's element schema
    pub device_element_schema_path: String,
    /// Hardware id of the nested device
    pub hardware_id: String,
}

impl DeviceElementMapping {
    pub fn new(path: impl Into<String>, hardware_id: impl Into<String>) -> Self {
        Self {
            device_element_schema_path: path.into(),
            hardware_id: hardware_id.into(),
        }
    }
}

/// A registered device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    /// Unique hardware identifier
    pub hardware_id: String,
    /// Site the device belongs to
    pub site_token: String,
    /// Specification describing the device type
    pub specification_token: String,
    /// Set when the device is nested inside a gateway
    #[serde(default)]
    pub parent_hardware_id: Option<String>,
    /// Ordered mappings to nested devices
    #[serde(default)]
    pub element_mappings: Vec<DeviceElementMapping>,
    /// Token of the active assignment, if any
    #[serde(default)]
    pub assignment_token: Option<String>,
    #[serde(default)]
    pub comments: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub created_date: DateTime<Utc>,
    #[serde(default)]
    pub created_by: Option<String>,
}

impl Device {
    pub fn new(
        hardware_id: impl Into<String>,
        site_token: impl Into<String>,
        specification_token: impl Into<String>,
    ) -> Self {
        Self {
            hardware_id: hardware_id.into(),
            site_token: site_token.into(),
            specification_token: specification_token.into(),
            parent_hardware_id: None,
            element_mappings: Vec::new(),
            assignment_token: None,
            comments: None,
            metadata: HashMap::new(),
            created_date: Utc::now(),
            created_by: None,
        }
    }

    /// Transient device for addressing hardware that is not registered yet.
    ///
    /// Used when a registration is rejected and the rejection has to be
    /// routed back to the hardware that sent it.
    pub fn unregistered(hardware_id: impl Into<String>, specification_token: impl Into<String>) -> Self {
        Self::new(hardware_id, String::new(), specification_token)
    }

    /// Marks the device as nested behind a gateway.
    pub fn with_parent(mut self, parent_hardware_id: impl Into<String>) -> Self {
        self.parent_hardware_id = Some(parent_hardware_id.into());
        self
    }

    pub fn with_element_mapping(mut self, mapping: DeviceElementMapping) -> Self {
        self.element_mappings.push(mapping);
        self
    }

    /// Whether the device is embedded inside a gateway.
    pub fn is_nested(&self) -> bool {
        self.parent_hardware_id.is_some()
    }

    /// Mapping on this device that points at the given child.
    pub fn mapping_for_child(&self, child_hardware_id: &str) -> Option<&DeviceElementMapping> {
        self.element_mappings
            .iter()
            .find(|m| m.hardware_id == child_hardware_id)
    }
}

/// Kind of device assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceAssignmentType {
    /// Bound to an asset
    Associated,
    /// Bound to a site only
    Unassociated,
}

/// Status of a device assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceAssignmentStatus {
    Active,
    Missing,
    Released,
}

/// Most recent state recorded on an assignment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceAssignmentState {
    #[serde(default)]
    pub last_location: Option<DeviceLocation>,
    /// Latest value per measurement name
    #[serde(default)]
    pub latest_measurements: BTreeMap<String, f64>,
    /// Latest alert per alert type
    #[serde(default)]
    pub latest_alerts: BTreeMap<String, DeviceAlert>,
    #[serde(default)]
    pub last_interaction_date: Option<DateTime<Utc>>,
}

/// Binding of a device to a site for a period of time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceAssignment {
    /// Unique token
    pub token: String,
    pub device_hardware_id: String,
    pub site_token: String,
    pub assignment_type: DeviceAssignmentType,
    /// Asset reference for associated assignments
    #[serde(default)]
    pub asset_reference: Option<String>,
    pub status: DeviceAssignmentStatus,
    pub active_date: DateTime<Utc>,
    #[serde(default)]
    pub released_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub state: DeviceAssignmentState,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub created_by: Option<String>,
}

impl DeviceAssignment {
    pub fn is_active(&self) -> bool {
        self.status == DeviceAssignmentStatus::Active
    }
}
