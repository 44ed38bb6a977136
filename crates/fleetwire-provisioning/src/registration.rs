//! Device registration.
//!
//! Devices announce themselves with a registration request. The manager
//! creates unknown devices (when allowed), ensures every registered device
//! has an assignment and answers with a registration system command.
//! Business failures are reported to the device, never to the caller.

use std::sync::Arc;

use async_trait::async_trait;
use fleetwire_core::model::{
    Device, DeviceAssignmentType, RegistrationFailureReason, RegistrationRequest,
    RegistrationSuccessReason, SystemCommand,
};
use fleetwire_core::{
    DeviceAssignmentCreateRequest, DeviceCreateRequest, DeviceManagement, Error,
    ExecutionContext, LifecycleComponent, LifecycleState, LifecycleStatus, Result,
};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::command::CommandDispatcher;
use crate::config::RegistrationConfig;

pub const MSG_NEW_DEVICES_NOT_ALLOWED: &str =
    "Registration manager does not allow new devices to be created.";
pub const MSG_INVALID_SPECIFICATION: &str =
    "Specification token passed in registration was invalid.";
pub const MSG_SITE_TOKEN_REQUIRED: &str =
    "Automatic site assignment disabled. Site token required.";

const ON_DEMAND_COMMENT: &str = "Device created by on-demand registration.";

/// Handles device registration requests.
#[async_trait]
pub trait RegistrationManager: LifecycleComponent {
    async fn handle_device_registration(
        &self,
        ctx: &ExecutionContext,
        hardware_id: &str,
        request: &RegistrationRequest,
    ) -> Result<()>;
}

/// Registration backed by device management.
pub struct DefaultRegistrationManager {
    management: Arc<dyn DeviceManagement>,
    dispatcher: Arc<CommandDispatcher>,
    config: RegistrationConfig,
    auto_assign_site_token: RwLock<Option<String>>,
    state: LifecycleState,
}

impl DefaultRegistrationManager {
    /// Registration acks and failures are sent as system commands through `dispatcher`.
    pub fn new(
        management: Arc<dyn DeviceManagement>,
        dispatcher: Arc<CommandDispatcher>,
        config: RegistrationConfig,
    ) -> Self {
        let token = config.auto_assign_site_token.clone();
        Self {
            management,
            dispatcher,
            config,
            auto_assign_site_token: RwLock::new(token),
            state: LifecycleState::new(),
        }
    }

    /// Site used for devices registered without one.
    pub fn auto_assign_site_token(&self) -> Option<String> {
        self.auto_assign_site_token.read().clone()
    }

    async fn first_site_token(&self) -> Result<String> {
        let sites = self.management.list_sites().await?;
        sites.into_iter().next().map(|s| s.token).ok_or_else(|| {
            Error::Configuration(
                "Registration manager auto assignment site token not set and no sites exist"
                    .to_string(),
            )
        })
    }

    async fn resolve_auto_assign_site(&self) -> Result<String> {
        if let Some(token) = self.auto_assign_site_token() {
            return Ok(token);
        }
        let token = self.first_site_token().await?;
        info!(site_token = %token, "Auto-assigning devices to first site");
        *self.auto_assign_site_token.write() = Some(token.clone());
        Ok(token)
    }

    async fn send_failure(
        &self,
        device: &Device,
        reason: RegistrationFailureReason,
        message: &str,
    ) -> Result<()> {
        warn!(hardware_id = %device.hardware_id, ?reason, "{}", message);
        self.dispatcher
            .deliver_system_command_to_device(device, &SystemCommand::failure(reason, message))
            .await
    }

    /// Create a device for an unknown hardware id. `Ok(None)` means a
    /// failure was already sent to the device.
    async fn create_device(
        &self,
        ctx: &ExecutionContext,
        hardware_id: &str,
        request: &RegistrationRequest,
    ) -> Result<Option<Device>> {
        let transient = Device::unregistered(hardware_id, request.specification_token.as_str());

        if !self.config.allow_new_devices {
            self.send_failure(
                &transient,
                RegistrationFailureReason::NewDevicesNotAllowed,
                MSG_NEW_DEVICES_NOT_ALLOWED,
            )
            .await?;
            return Ok(None);
        }

        let specification = self
            .management
            .get_device_specification_by_token(&request.specification_token)
            .await?;
        if specification.is_none() {
            self.send_failure(
                &transient,
                RegistrationFailureReason::InvalidSpecificationToken,
                MSG_INVALID_SPECIFICATION,
            )
            .await?;
            return Ok(None);
        }

        let site_token = match &request.site_token {
            Some(token) => token.clone(),
            None if self.config.auto_assign_site => self.resolve_auto_assign_site().await?,
            None => {
                self.send_failure(
                    &transient,
                    RegistrationFailureReason::SiteTokenRequired,
                    MSG_SITE_TOKEN_REQUIRED,
                )
                .await?;
                return Ok(None);
            }
        };

        let device = self
            .management
            .create_device(
                ctx,
                DeviceCreateRequest {
                    hardware_id: hardware_id.to_string(),
                    site_token,
                    specification_token: request.specification_token.clone(),
                    comments: Some(ON_DEMAND_COMMENT.to_string()),
                    metadata: request.metadata.clone(),
                    ..Default::default()
                },
            )
            .await?;
        info!(hardware_id, site_token = %device.site_token, "Registered new device");
        Ok(Some(device))
    }
}

#[async_trait]
impl LifecycleComponent for DefaultRegistrationManager {
    fn component_name(&self) -> String {
        "Default registration manager".to_string()
    }

    async fn start(&self) -> Result<()> {
        self.state.set(LifecycleStatus::Starting);
        if self.config.auto_assign_site {
            match self.config.auto_assign_site_token.clone() {
                Some(token) => {
                    if self.management.get_site_by_token(&token).await?.is_none() {
                        self.state.set(LifecycleStatus::Error);
                        return Err(Error::Configuration(format!(
                            "Registration manager auto assignment site token is invalid: {}",
                            token
                        )));
                    }
                }
                // No sites yet is tolerated here; registration retries the lookup.
                None => match self.first_site_token().await {
                    Ok(token) => {
                        info!(site_token = %token, "Registration manager using auto-assign site");
                        *self.auto_assign_site_token.write() = Some(token);
                    }
                    Err(_) => warn!("Registration manager configured for auto-assign site, but no sites were found"),
                },
            }
        }
        self.state.set(LifecycleStatus::Started);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.state.set(LifecycleStatus::Stopped);
        Ok(())
    }

    fn lifecycle_status(&self) -> LifecycleStatus {
        self.state.get()
    }
}

#[async_trait]
impl RegistrationManager for DefaultRegistrationManager {
    async fn handle_device_registration(
        &self,
        ctx: &ExecutionContext,
        hardware_id: &str,
        request: &RegistrationRequest,
    ) -> Result<()> {
        if let Some(site_token) = &request.site_token {
            if self.management.get_site_by_token(site_token).await?.is_none() {
                warn!(hardware_id, site_token = %site_token, "Ignoring device registration with invalid site token");
                return Ok(());
            }
        }

        let (device, created) = match self.management.get_device_by_hardware_id(hardware_id).await? {
            Some(device) => {
                if device.specification_token != request.specification_token {
                    return self
                        .send_failure(
                            &device,
                            RegistrationFailureReason::InvalidSpecificationToken,
                            MSG_INVALID_SPECIFICATION,
                        )
                        .await;
                }
                debug!(hardware_id, "Device already registered");
                (device, false)
            }
            None => match self.create_device(ctx, hardware_id, request).await? {
                Some(device) => (device, true),
                None => return Ok(()),
            },
        };

        if device.assignment_token.is_none() {
            let assignment = self
                .management
                .create_device_assignment(
                    ctx,
                    DeviceAssignmentCreateRequest {
                        device_hardware_id: device.hardware_id.clone(),
                        assignment_type: DeviceAssignmentType::Unassociated,
                        asset_reference: None,
                        metadata: Default::default(),
                    },
                )
                .await?;
            debug!(hardware_id, assignment_token = %assignment.token, "Created unassociated assignment");
        }

        let reason = if created {
            RegistrationSuccessReason::NewRegistration
        } else {
            RegistrationSuccessReason::AlreadyRegistered
        };
        self.dispatcher
            .deliver_system_command(&device.hardware_id, &SystemCommand::ack(reason))
            .await
    }
}
