//! The lifecycle contract shared by every scenario component.

use crate::scenario::Scenario;
use async_trait::async_trait;
use std::sync::Arc;
use troupe_core::error::Result;
use troupe_core::message::Message;

/// Priority of the conversation controller.
///
/// The controller must step before the stage manager so the stage manager
/// observes the speaker chosen for the current message.
pub const CONTROLLER_PRIORITY: i32 = 0;

/// Priority of every other built-in component.
pub const DEFAULT_PRIORITY: i32 = 100;

/// A stateful part of a scenario driven by the [`ComponentManager`].
///
/// Components never store the scenario. Each hook receives it as a parameter,
/// so a component cannot outlive the scenario that owns it.
///
/// [`ComponentManager`]: crate::component_manager::ComponentManager
#[async_trait]
pub trait ScenarioComponent: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Lower runs first within every phase.
    fn priority(&self) -> i32 {
        DEFAULT_PRIORITY
    }

    /// Called after the connection handshake, before the client is told the
    /// scenario is ready. Used to materialize derived data.
    async fn awake(&self, _scenario: &Arc<Scenario>) -> Result<()> {
        Ok(())
    }

    /// Called once the client knows the scenario is ready.
    async fn start(&self, _scenario: &Arc<Scenario>) -> Result<()> {
        Ok(())
    }

    /// Called once per message on the main channel.
    async fn step(&self, _scenario: &Arc<Scenario>, _message: &Message) -> Result<()> {
        Ok(())
    }

    /// Called once per message on the mentor channel.
    async fn step_mentor(&self, _scenario: &Arc<Scenario>, _message: &Message) -> Result<()> {
        Ok(())
    }

    /// Called after every component's `step` for the same message.
    async fn late_step(&self, _scenario: &Arc<Scenario>, _message: &Message) -> Result<()> {
        Ok(())
    }

    /// Called after every component's `step_mentor` for the same message.
    async fn late_step_mentor(&self, _scenario: &Arc<Scenario>, _message: &Message) -> Result<()> {
        Ok(())
    }

    /// Called once per frame of the update loop.
    async fn update(&self, _scenario: &Arc<Scenario>, _frame: u64) -> Result<()> {
        Ok(())
    }

    /// Releases owned buffers on teardown.
    fn cleanup(&self) {}
}
