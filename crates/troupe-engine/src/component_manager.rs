//! Ordered fan-out of lifecycle calls to the components of a scenario.
//!
//! Failure isolation differs per phase:
//!
//! - `awake`/`start`: every component runs. Failures are collected and
//!   reported together.
//! - `step`/`late_step`: the first failure ends that pass. The late pass
//!   always runs, even when the step pass failed.
//! - `update`: the first failure ends that frame. The loop keeps ticking.

use crate::agent_builder::AgentBuilder;
use crate::analysis::AnalysisEngine;
use crate::component::ScenarioComponent;
use crate::conversation::ConversationController;
use crate::scenario::Scenario;
use crate::stage::StageManager;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use troupe_core::error::{LifecyclePhase, Result, TroupeError};
use troupe_core::message::Message;

/// Shortest accepted frame period.
const MIN_FRAME_PERIOD: Duration = Duration::from_millis(50);

pub struct ComponentManager {
    components: Vec<Arc<dyn ScenarioComponent>>,
    controller: Arc<ConversationController>,
    stages: Arc<StageManager>,
    agent_builder: Arc<AgentBuilder>,
    analysis: Arc<AnalysisEngine>,
    frame: AtomicU64,
}

impl ComponentManager {
    pub fn new(
        controller: ConversationController,
        stages: StageManager,
        agent_builder: AgentBuilder,
        analysis: AnalysisEngine,
        extra: Vec<Arc<dyn ScenarioComponent>>,
    ) -> Self {
        let controller = Arc::new(controller);
        let stages = Arc::new(stages);
        let agent_builder = Arc::new(agent_builder);
        let analysis = Arc::new(analysis);

        let mut components: Vec<Arc<dyn ScenarioComponent>> = vec![
            controller.clone(),
            stages.clone(),
            agent_builder.clone(),
            analysis.clone(),
        ];
        components.extend(extra);
        // Stable: equal priorities keep insertion order.
        components.sort_by_key(|c| c.priority());

        Self {
            components,
            controller,
            stages,
            agent_builder,
            analysis,
            frame: AtomicU64::new(0),
        }
    }

    pub fn controller(&self) -> &Arc<ConversationController> {
        &self.controller
    }

    pub fn stages(&self) -> &Arc<StageManager> {
        &self.stages
    }

    pub fn agent_builder(&self) -> &Arc<AgentBuilder> {
        &self.agent_builder
    }

    pub fn analysis(&self) -> &Arc<AnalysisEngine> {
        &self.analysis
    }

    /// Component names in execution order.
    pub fn names(&self) -> Vec<&'static str> {
        self.components.iter().map(|c| c.name()).collect()
    }

    pub fn frame(&self) -> u64 {
        self.frame.load(Ordering::Relaxed)
    }

    fn fail(scenario: &Scenario, phase: LifecyclePhase, component: &dyn ScenarioComponent, cause: TroupeError) -> TroupeError {
        tracing::debug!(target: "troupe::system", component = component.name(), %phase, "Component failed");
        let error = TroupeError::lifecycle(phase, cause);
        scenario.handle_error(&error);
        error
    }

    pub async fn awake(&self, scenario: &Arc<Scenario>) -> Result<()> {
        let mut errors = Vec::new();
        for component in &self.components {
            if let Err(e) = component.awake(scenario).await {
                errors.push(Self::fail(scenario, LifecyclePhase::Awake, component.as_ref(), e));
            }
        }
        TroupeError::from_many(errors)
    }

    pub async fn start(&self, scenario: &Arc<Scenario>) -> Result<()> {
        let mut errors = Vec::new();
        for component in &self.components {
            if let Err(e) = component.start(scenario).await {
                errors.push(Self::fail(scenario, LifecyclePhase::Start, component.as_ref(), e));
            }
        }
        TroupeError::from_many(errors)
    }

    /// Runs one step round for `message`.
    ///
    /// Errors are reported through the scenario's error channel.
    pub async fn step(&self, scenario: &Arc<Scenario>, message: &Message, mentor_step: bool) {
        for component in &self.components {
            let result = if mentor_step {
                component.step_mentor(scenario, message).await
            } else {
                component.step(scenario, message).await
            };
            if let Err(e) = result {
                Self::fail(scenario, LifecyclePhase::Step, component.as_ref(), e);
                break;
            }
        }

        for component in &self.components {
            let result = if mentor_step {
                component.late_step_mentor(scenario, message).await
            } else {
                component.late_step(scenario, message).await
            };
            if let Err(e) = result {
                Self::fail(scenario, LifecyclePhase::LateStep, component.as_ref(), e);
                break;
            }
        }
    }

    /// Advances the frame counter and runs one update pass.
    pub async fn update(&self, scenario: &Arc<Scenario>) {
        let frame = self.frame.fetch_add(1, Ordering::Relaxed) + 1;
        for component in &self.components {
            if let Err(e) = component.update(scenario, frame).await {
                Self::fail(scenario, LifecyclePhase::Update, component.as_ref(), e);
                break;
            }
        }
    }

    pub fn cleanup(&self) {
        for component in &self.components {
            component.cleanup();
        }
    }

    /// Calls `update` once per frame period until the scenario is dropped.
    ///
    /// A panicking frame is reported as an update failure and the loop goes on.
    pub async fn run_update_loop(scenario: Weak<Scenario>, period: Duration) {
        let mut ticker = tokio::time::interval(period.max(MIN_FRAME_PERIOD));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let Some(scenario) = scenario.upgrade() else {
                break;
            };

            let frame = AssertUnwindSafe(scenario.components().update(&scenario))
                .catch_unwind()
                .await;
            if let Err(panic) = frame {
                scenario.handle_error(&TroupeError::Update(panic_message(panic.as_ref())));
            }
        }
        tracing::debug!(target: "troupe::system", "Update loop stopped");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "update frame panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::DEFAULT_PRIORITY;
    use crate::conversation::RoundRobin;
    use crate::scenario::ScenarioBlueprint;
    use crate::scenarios::pitch::PitchStages;
    use crate::testing::{Faulty, Harness, Recorder, agent_message};

    #[tokio::test]
    async fn test_controller_picks_speaker_before_later_components_step() {
        let harness = Harness::new();
        let before = Recorder::new("before", -10);
        let after = Recorder::new("after", DEFAULT_PRIORITY);
        let scenario = harness.scenario(
            "pitch_to_investors",
            &["alex", "blair", "casey"],
            ScenarioBlueprint::new(RoundRobin, PitchStages)
                .with_component(before.clone())
                .with_component(after.clone()),
        );

        assert_eq!(
            scenario.components().names(),
            vec!["before", "conversation_controller", "stage_manager", "agent_builder", "analysis_engine", "after"]
        );

        for (author, text) in [("alex", "one"), ("alex", "two"), ("blair", "three")] {
            let message = agent_message(&scenario, author, text);
            scenario.components().step(&scenario, &message, false).await;
        }

        let some = |id: &str| Some(id.to_string());
        assert_eq!(*before.speakers.lock().unwrap(), vec![None, some("alex"), some("blair")]);
        assert_eq!(*after.speakers.lock().unwrap(), vec![some("alex"), some("blair"), some("casey")]);
    }

    #[tokio::test]
    async fn test_awake_and_start_continue_past_failed_component() {
        let harness = Harness::new();
        let recorder = Recorder::new("recorder", DEFAULT_PRIORITY);
        let scenario = harness.scenario(
            "pitch_to_investors",
            &["alex"],
            ScenarioBlueprint::new(RoundRobin, PitchStages)
                .with_component(Arc::new(Faulty {
                    priority: -1,
                    panic_on_update: false,
                }))
                .with_component(recorder.clone()),
        );
        assert_eq!(scenario.components().names()[0], "faulty");

        let err = scenario.components().awake(&scenario).await.unwrap_err();
        assert_eq!(err.phase(), Some(LifecyclePhase::Awake));
        assert_eq!(Recorder::count(&recorder.awakes), 1);
        assert_eq!(scenario.components().stages().stages().await.len(), 1);

        let err = scenario.components().start(&scenario).await.unwrap_err();
        assert_eq!(err.phase(), Some(LifecyclePhase::Start));
        assert_eq!(Recorder::count(&recorder.starts), 1);
        assert_eq!(scenario.error_count(), 2);
        scenario.tasks().cancel_all().await;
    }

    #[tokio::test]
    async fn test_late_pass_runs_after_failed_step() {
        let harness = Harness::new();
        let recorder = Recorder::new("recorder", 200);
        let scenario = harness.scenario(
            "pitch_to_investors",
            &["alex"],
            ScenarioBlueprint::new(RoundRobin, PitchStages)
                .with_component(Arc::new(Faulty {
                    priority: 50,
                    panic_on_update: false,
                }))
                .with_component(recorder.clone()),
        );

        let message = agent_message(&scenario, "alex", "hello");
        scenario.components().step(&scenario, &message, false).await;
        scenario.components().step(&scenario, &message, false).await;

        assert_eq!(Recorder::count(&recorder.steps), 0);
        assert_eq!(Recorder::count(&recorder.late_steps), 2);
        assert_eq!(scenario.error_count(), 2);
    }

    #[tokio::test]
    async fn test_failed_update_ends_frame_only() {
        let harness = Harness::new();
        let recorder = Recorder::new("recorder", 200);
        let scenario = harness.scenario(
            "pitch_to_investors",
            &["alex"],
            ScenarioBlueprint::new(RoundRobin, PitchStages)
                .with_component(Arc::new(Faulty {
                    priority: 50,
                    panic_on_update: false,
                }))
                .with_component(recorder.clone()),
        );

        scenario.components().update(&scenario).await;
        scenario.components().update(&scenario).await;

        assert_eq!(scenario.components().frame(), 2);
        assert_eq!(Recorder::count(&recorder.updates), 0);
        assert_eq!(scenario.error_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_loop_survives_panicking_frames() {
        let harness = Harness::new();
        let scenario = harness.scenario(
            "pitch_to_investors",
            &["alex"],
            ScenarioBlueprint::new(RoundRobin, PitchStages).with_component(Arc::new(Faulty {
                priority: 50,
                panic_on_update: true,
            })),
        );

        scenario.tasks().spawn(
            "update_loop",
            ComponentManager::run_update_loop(Arc::downgrade(&scenario), Duration::from_millis(100)),
        );
        tokio::time::sleep(Duration::from_millis(350)).await;

        assert!(scenario.components().frame() >= 3);
        assert!(scenario.error_count() >= 3);
        scenario.tasks().cancel_all().await;
    }
}
