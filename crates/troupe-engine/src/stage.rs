//! Stage progression: the ordered phases of a scenario and the rules that
//! move the scenario from one to the next.
//!
//! Two independent signals report completion. Limits checked by
//! [`StagePolicy::check_advance`] drive the state machine, while
//! [`StagePolicy::assess`] only informs the client. They are allowed to
//! disagree and both are sent.

use crate::component::ScenarioComponent;
use crate::event_manager::ScenarioEvent;
use crate::scenario::Scenario;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use minijinja::context;
use std::sync::Arc;
use tokio::sync::Mutex;
use troupe_core::error::Result;
use troupe_core::generation::{GenerationParams, prompt_messages};
use troupe_core::message::{Conversation, Message};
use troupe_core::stage::{
    ScenarioAssessment, ScenarioStage, StageFirstSpeakerMode, next_stage_speaker,
};
use troupe_core::transport::{ClientEvent, Notification};
use troupe_interaction::{parse_assessment, prompts};

/// Outcome of a limit check.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageCheck {
    pub advance: bool,
    /// Advisor warnings to send before any advance.
    pub warnings: Vec<String>,
}

impl StageCheck {
    pub fn advance(advance: bool) -> Self {
        Self {
            advance,
            warnings: Vec::new(),
        }
    }
}

/// A consistent view of stage progress handed to assessments.
#[derive(Debug, Clone)]
pub struct StageSnapshot {
    pub stage: ScenarioStage,
    pub stage_count: usize,
    pub completed_all_stages: bool,
}

/// Scenario-specific stage rules.
#[async_trait]
pub trait StagePolicy: Send + Sync {
    /// Who opens every stage after the first.
    fn first_speaker_mode(&self) -> StageFirstSpeakerMode {
        StageFirstSpeakerMode::UserAlwaysFirst
    }

    /// `false` waits for an explicit advance request after a stage ends.
    fn auto_advance(&self) -> bool {
        true
    }

    /// Produces the stage list. An empty list falls back to one default stage.
    async fn generate_stages(&self, scenario: &Arc<Scenario>) -> Result<Vec<ScenarioStage>>;

    /// Decides whether the active stage is over. May flag warnings on `stage`.
    async fn check_advance(&self, stage: &mut ScenarioStage, now: DateTime<Utc>) -> Result<StageCheck> {
        Ok(StageCheck::advance(stage.is_over_limit(now)))
    }

    /// Judges completion for the client's progress display. `None` skips the
    /// update.
    async fn assess(
        &self,
        scenario: &Arc<Scenario>,
        snapshot: &StageSnapshot,
        conversation: &Conversation,
    ) -> Result<Option<ScenarioAssessment>> {
        llm_assessment(scenario, snapshot, conversation).await
    }
}

/// Asks the generation backend whether the scenario is done.
///
/// An unparsable answer is logged and skipped. A failed call is an error.
pub async fn llm_assessment(
    scenario: &Arc<Scenario>,
    snapshot: &StageSnapshot,
    conversation: &Conversation,
) -> Result<Option<ScenarioAssessment>> {
    let prompt = scenario.prompts().render(
        prompts::ASSESSMENT,
        context! {
            scenario_name => &scenario.template().name,
            stage_name => snapshot.stage.name(),
            stage_index => snapshot.stage.index,
            stage_count => snapshot.stage_count,
            transcript => conversation.transcript(),
        },
    )?;
    let params = GenerationParams::default().with_temperature(0.0);
    let text = scenario
        .services()
        .generator
        .generate(&prompt_messages(prompt, scenario.id()), &params)
        .await?;

    match parse_assessment(&text) {
        Ok(assessment) => Ok(Some(assessment)),
        Err(e) => {
            tracing::warn!(target: "troupe::llm", scenario_id = %scenario.id(), error = %e, "Discarding unparsable assessment");
            Ok(None)
        }
    }
}

/// Assessment derived from limits alone: complete once every stage is done,
/// otherwise the furthest of time and message progress through the stages.
pub fn rule_based_assessment(snapshot: &StageSnapshot, now: DateTime<Utc>) -> ScenarioAssessment {
    if snapshot.completed_all_stages {
        return ScenarioAssessment {
            complete: true,
            progress: 1.0,
            confidence: 1.0,
            reasoning: "All stages are complete.".to_string(),
        };
    }

    let stage = &snapshot.stage;
    let within = stage.message_progress().max(stage.time_progress(now));
    let count = snapshot.stage_count.max(1) as f32;
    ScenarioAssessment {
        complete: false,
        progress: ((stage.index as f32 + within) / count).min(1.0),
        confidence: 1.0,
        reasoning: format!("{} of {} stages in progress.", stage.index + 1, snapshot.stage_count),
    }
}

/// Flags at most one message warning and one time warning per stage.
pub fn limit_warnings(
    stage: &mut ScenarioStage,
    now: DateTime<Utc>,
    messages_before: u32,
    seconds_before: i64,
) -> Vec<String> {
    let mut warnings = Vec::new();

    if let Some(remaining) = stage.messages_remaining() {
        if remaining > 0 && remaining <= messages_before && !stage.message_warning_sent {
            stage.message_warning_sent = true;
            warnings.push(format!(
                "Only {remaining} message(s) left in {}.",
                stage.name()
            ));
        }
    }

    if let Some(remaining) = stage.seconds_remaining(now) {
        if remaining > 0 && remaining <= seconds_before && !stage.time_warning_sent {
            stage.time_warning_sent = true;
            warnings.push(format!("{} ends in {remaining} seconds.", stage.name()));
        }
    }

    warnings
}

/// Falls back to one default stage spanning every agent and renumbers.
pub fn with_default_stage(stages: Vec<ScenarioStage>, agent_ids: Vec<String>) -> Vec<ScenarioStage> {
    let mut stages = if stages.is_empty() {
        vec![ScenarioStage::default_stage(agent_ids)]
    } else {
        stages
    };
    for (index, stage) in stages.iter_mut().enumerate() {
        stage.index = index;
    }
    stages
}

enum Advance {
    AlreadyComplete,
    Finish,
    Next(ScenarioStage, usize),
}

#[derive(Default)]
struct StageState {
    stages: Vec<ScenarioStage>,
    current: usize,
    completed_all_stages: bool,
    awaiting_advance: bool,
}

impl StageState {
    fn snapshot(&self) -> Option<StageSnapshot> {
        self.stages.get(self.current).map(|stage| StageSnapshot {
            stage: stage.clone(),
            stage_count: self.stages.len(),
            completed_all_stages: self.completed_all_stages,
        })
    }

    fn is_last(&self) -> bool {
        self.current + 1 >= self.stages.len()
    }
}

/// Drives a scenario through its stages.
///
/// The state lock is never held across a client send or an event emit.
pub struct StageManager {
    policy: Box<dyn StagePolicy>,
    state: Mutex<StageState>,
}

impl StageManager {
    pub fn new(policy: Box<dyn StagePolicy>) -> Self {
        Self {
            policy,
            state: Mutex::new(StageState::default()),
        }
    }

    /// Asks the policy for stages, never returning an empty list.
    pub async fn generate_stages(&self, scenario: &Arc<Scenario>) -> Result<Vec<ScenarioStage>> {
        let stages = self.policy.generate_stages(scenario).await?;
        if stages.is_empty() {
            tracing::info!(target: "troupe::stage", scenario_id = %scenario.id(), "No stages generated, using the default stage");
        }
        Ok(with_default_stage(stages, scenario.roster().agent_ids()))
    }

    pub async fn stages(&self) -> Vec<ScenarioStage> {
        self.state.lock().await.stages.clone()
    }

    pub async fn current_stage(&self) -> Option<ScenarioStage> {
        let state = self.state.lock().await;
        state.stages.get(state.current).cloned()
    }

    pub async fn current_index(&self) -> usize {
        self.state.lock().await.current
    }

    pub async fn is_complete(&self) -> bool {
        self.state.lock().await.completed_all_stages
    }

    pub async fn snapshot(&self) -> Option<StageSnapshot> {
        self.state.lock().await.snapshot()
    }

    async fn send_progress(&self, scenario: &Scenario) {
        let Some(snapshot) = self.snapshot().await else {
            return;
        };
        let event = ClientEvent::StageProgress {
            stage_index: snapshot.stage.index,
            stage_count: snapshot.stage_count,
            stage_name: snapshot.stage.name().to_string(),
            progress: snapshot.stage.progress_label(),
        };
        if let Err(e) = scenario.send(event).await {
            tracing::warn!(target: "troupe::stage", scenario_id = %scenario.id(), error = %e, "Failed to send stage progress");
        }
    }

    async fn send_warnings(&self, scenario: &Scenario, warnings: Vec<String>) -> Result<()> {
        for text in warnings {
            scenario
                .send(ClientEvent::Notification(Notification::AdvisorWarning { text }))
                .await?;
        }
        Ok(())
    }

    async fn complete_all(&self, scenario: &Scenario) -> Result<()> {
        self.state.lock().await.completed_all_stages = true;
        tracing::info!(target: "troupe::stage", scenario_id = %scenario.id(), "All stages complete");
        scenario
            .send(ClientEvent::Notification(Notification::ScenarioComplete))
            .await?;
        scenario.events().emit(ScenarioEvent::ScenarioCompleted).await;
        Ok(())
    }

    /// Ends the active stage: completes the scenario after the last stage,
    /// advances when automatic, or asks the client for an advance otherwise.
    async fn try_advance(&self, scenario: &Arc<Scenario>) -> Result<()> {
        let (last, index) = {
            let state = self.state.lock().await;
            (state.is_last(), state.current)
        };

        if last {
            return self.complete_all(scenario).await;
        }
        if self.policy.auto_advance() {
            self.advance_stage(scenario).await?;
            return Ok(());
        }

        self.state.lock().await.awaiting_advance = true;
        scenario
            .send(ClientEvent::Notification(Notification::StageComplete { stage_index: index }))
            .await
    }

    /// Activates the next stage.
    ///
    /// Returns `false` without changing anything once every stage is done.
    /// Called internally when a stage ends and externally for manual advances.
    pub async fn advance_stage(&self, scenario: &Arc<Scenario>) -> Result<bool> {
        let next = {
            let mut state = self.state.lock().await;
            if state.completed_all_stages {
                Advance::AlreadyComplete
            } else if state.is_last() {
                Advance::Finish
            } else {
                let previous = &state.stages[state.current];
                let previous_speaker = previous
                    .first_speaker
                    .unwrap_or_else(|| scenario.components().controller().first_speaker());
                let (speaker, agent_index) = next_stage_speaker(
                    self.policy.first_speaker_mode(),
                    previous_speaker,
                    previous.first_speaker_agent_index,
                    scenario.agents().len(),
                    &mut rand::thread_rng(),
                );

                state.current += 1;
                state.awaiting_advance = false;
                let stage_count = state.stages.len();
                let current = state.current;
                let stage = &mut state.stages[current];
                stage.initialize(speaker, agent_index, Utc::now());
                Advance::Next(stage.clone(), stage_count)
            }
        };

        let (stage, stage_count) = match next {
            Advance::AlreadyComplete => {
                scenario
                    .send(ClientEvent::Notification(Notification::ScenarioComplete))
                    .await?;
                return Ok(false);
            }
            Advance::Finish => {
                self.complete_all(scenario).await?;
                return Ok(false);
            }
            Advance::Next(stage, stage_count) => (stage, stage_count),
        };

        tracing::info!(
            target: "troupe::stage",
            scenario_id = %scenario.id(),
            stage = stage.index,
            name = stage.name(),
            first_speaker = ?stage.first_speaker,
            "Stage advanced"
        );

        let announcement = scenario.prompts().render(
            prompts::STAGE_ANNOUNCEMENT,
            context! {
                stage_name => stage.name(),
                stage_index => stage.index,
                stage_count => stage_count,
            },
        )?;
        scenario
            .send(ClientEvent::Message(Message::system(announcement, scenario.id())))
            .await?;
        scenario
            .events()
            .emit(ScenarioEvent::StageChanged { stage })
            .await;
        self.send_progress(scenario).await;
        Ok(true)
    }

    /// Runs an assessment in the background and forwards it to the client.
    fn spawn_assessment(&self, scenario: &Arc<Scenario>) {
        let task_scenario = scenario.clone();
        scenario.spawn("assessment", async move {
            let scenario = task_scenario;
            let stages = scenario.components().stages();
            let Some(snapshot) = stages.snapshot().await else {
                return Ok(());
            };
            let conversation = scenario
                .components()
                .controller()
                .current_conversation(&scenario)
                .await;

            let Some(assessment) = stages.policy.assess(&scenario, &snapshot, &conversation).await? else {
                return Ok(());
            };
            let complete = assessment.complete;
            scenario.send(ClientEvent::Assessment(assessment)).await?;
            if complete {
                scenario
                    .send(ClientEvent::Notification(Notification::ScenarioComplete))
                    .await?;
            }
            Ok(())
        });
    }
}

#[async_trait]
impl ScenarioComponent for StageManager {
    fn name(&self) -> &'static str {
        "stage_manager"
    }

    async fn awake(&self, scenario: &Arc<Scenario>) -> Result<()> {
        let stages = self.generate_stages(scenario).await?;
        tracing::info!(target: "troupe::stage", scenario_id = %scenario.id(), count = stages.len(), "Stages generated");
        self.state.lock().await.stages = stages;
        Ok(())
    }

    async fn start(&self, scenario: &Arc<Scenario>) -> Result<()> {
        let first_speaker = scenario.components().controller().first_speaker();
        {
            let mut state = self.state.lock().await;
            state.current = 0;
            if let Some(stage) = state.stages.first_mut() {
                stage.initialize(first_speaker, 0, Utc::now());
            }
        }
        self.send_progress(scenario).await;
        Ok(())
    }

    async fn step(&self, scenario: &Arc<Scenario>, message: &Message) -> Result<()> {
        if !(message.is_user() || message.is_ai()) {
            return Ok(());
        }

        let check = {
            let mut state = self.state.lock().await;
            if state.completed_all_stages {
                return Ok(());
            }
            let awaiting = state.awaiting_advance;
            let current = state.current;
            let Some(stage) = state.stages.get_mut(current) else {
                return Ok(());
            };
            stage.record(message);
            if awaiting {
                StageCheck::default()
            } else {
                self.policy.check_advance(stage, Utc::now()).await?
            }
        };

        self.send_warnings(scenario, check.warnings).await?;
        if check.advance {
            self.try_advance(scenario).await?;
        }
        if message.is_ai() {
            self.spawn_assessment(scenario);
        }
        self.send_progress(scenario).await;
        Ok(())
    }

    async fn update(&self, scenario: &Arc<Scenario>, _frame: u64) -> Result<()> {
        let check = {
            let mut state = self.state.lock().await;
            if state.completed_all_stages || state.awaiting_advance {
                return Ok(());
            }
            let current = state.current;
            let Some(stage) = state.stages.get_mut(current) else {
                return Ok(());
            };
            if stage.time_limit_secs.is_none() || !stage.is_initialized() {
                return Ok(());
            }
            self.policy.check_advance(stage, Utc::now()).await?
        };

        self.send_warnings(scenario, check.warnings).await?;
        if check.advance {
            self.try_advance(scenario).await?;
        }
        Ok(())
    }

    fn cleanup(&self) {
        if let Ok(mut state) = self.state.try_lock() {
            state.stages.clear();
        }
    }
}
