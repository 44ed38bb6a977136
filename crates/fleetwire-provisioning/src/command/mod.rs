//! Outbound command processing.

pub mod dispatcher;
pub mod execution;
pub mod resolver;
pub mod strategy;

pub use dispatcher::CommandDispatcher;
pub use execution::{coerce_parameter, CommandExecutionBuilder, DefaultCommandExecutionBuilder};
pub use resolver::{CommandTargetResolver, DefaultCommandTargetResolver};
pub use strategy::{CommandProcessingStrategy, DefaultCommandProcessingStrategy};
