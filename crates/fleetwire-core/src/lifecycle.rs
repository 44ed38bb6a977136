//! Component lifecycle.
//!
//! Every pipeline component exposes `start`/`stop`. Parents start children
//! before themselves and stop them in reverse order.

use std::sync::atomic::{AtomicU8, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Lifecycle state of a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStatus {
    Stopped,
    Starting,
    Started,
    Stopping,
    Error,
}

impl LifecycleStatus {
    fn as_u8(self) -> u8 {
        match self {
            LifecycleStatus::Stopped => 0,
            LifecycleStatus::Starting => 1,
            LifecycleStatus::Started => 2,
            LifecycleStatus::Stopping => 3,
            LifecycleStatus::Error => 4,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => LifecycleStatus::Starting,
            2 => LifecycleStatus::Started,
            3 => LifecycleStatus::Stopping,
            4 => LifecycleStatus::Error,
            _ => LifecycleStatus::Stopped,
        }
    }
}

/// Atomic holder for a component's [`LifecycleStatus`].
#[derive(Debug)]
pub struct LifecycleState(AtomicU8);

impl LifecycleState {
    /// Starts out Stopped.
    pub fn new() -> Self {
        Self(AtomicU8::new(LifecycleStatus::Stopped.as_u8()))
    }

    pub fn get(&self) -> LifecycleStatus {
        LifecycleStatus::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, status: LifecycleStatus) {
        self.0.store(status.as_u8(), Ordering::Release);
    }

    pub fn is_started(&self) -> bool {
        self.get() == LifecycleStatus::Started
    }
}

impl Default for LifecycleState {
    fn default() -> Self {
        Self::new()
    }
}

/// A component with explicit start/stop.
///
/// Stateless components (encoders, extractors) can rely on the default
/// no-op implementations.
#[async_trait]
pub trait LifecycleComponent: Send + Sync {
    /// Human readable name used in logs.
    fn component_name(&self) -> String;

    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        Ok(())
    }

    /// Current status. Components without state report `Started`.
    fn lifecycle_status(&self) -> LifecycleStatus {
        LifecycleStatus::Started
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        let state = LifecycleState::new();
        assert_eq!(state.get(), LifecycleStatus::Stopped);
        state.set(LifecycleStatus::Starting);
        assert!(!state.is_started());
        state.set(LifecycleStatus::Started);
        assert!(state.is_started());
        state.set(LifecycleStatus::Error);
        assert_eq!(state.get(), LifecycleStatus::Error);
    }
}
