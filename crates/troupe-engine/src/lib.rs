//! Scenario orchestration engine.
//!
//! A [`Scenario`] owns a fixed set of components driven through the
//! awake/start/step/late_step/update lifecycle. The [`ScenarioManager`]
//! creates scenarios from registered scenario types, attaches client
//! connections, and tears scenarios down.

pub mod agent;
pub mod agent_builder;
pub mod analysis;
pub mod component;
pub mod component_manager;
pub mod conversation;
pub mod event_manager;
pub mod lifecycle;
pub mod manager;
pub mod scenario;
pub mod scenarios;
pub mod stage;
pub mod task_scope;

#[cfg(test)]
mod testing;

pub use agent::{AgentRoster, ScenarioAgent};
pub use component::ScenarioComponent;
pub use component_manager::ComponentManager;
pub use conversation::{ConversationController, FirstSpeakerMode, TurnPolicy};
pub use event_manager::{EventManager, ScenarioEvent, ScenarioEventKind};
pub use manager::{HookKind, ScenarioManager, ScenarioRegistry};
pub use scenario::{Scenario, ScenarioBlueprint, ScenarioServices};
pub use stage::{StageManager, StagePolicy};
