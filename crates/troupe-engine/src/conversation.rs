//! Turn order and transcript distribution.

use crate::agent::ScenarioAgent;
use crate::component::{CONTROLLER_PRIORITY, ScenarioComponent};
use crate::event_manager::{ScenarioEvent, ScenarioEventKind};
use crate::scenario::Scenario;
use async_trait::async_trait;
use futures::FutureExt;
use futures::future::join_all;
use std::sync::{Arc, PoisonError, RwLock};
use troupe_core::agent::AgentType;
use troupe_core::config::MessageMode;
use troupe_core::error::Result;
use troupe_core::message::{Conversation, Message, MessageRole};
use troupe_core::stage::{ScenarioStage, SpeakerType};
use troupe_core::transport::{ClientEvent, Notification};

/// Seed turn for backends that reject a conversation without a user turn.
const LEADING_USER_TURN: &str = "Start the Conversation";

/// Who opens the scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirstSpeakerMode {
    User,
    Ai,
    /// Resolved once, when the controller is built.
    Random,
}

impl FirstSpeakerMode {
    fn resolve(self) -> SpeakerType {
        match self {
            Self::User => SpeakerType::User,
            Self::Ai => SpeakerType::Ai,
            Self::Random => SpeakerType::random(&mut rand::thread_rng()),
        }
    }
}

/// Scenario-specific turn-order algorithm.
#[async_trait]
pub trait TurnPolicy: Send + Sync {
    /// Picks the agent that speaks after `message`, or `None` to keep the
    /// current speaker. `message` is `None` when computing the opener.
    async fn next_speaker(
        &self,
        scenario: &Arc<Scenario>,
        current: Option<&str>,
        message: Option<&Message>,
    ) -> Result<Option<String>>;

    /// The agent that opens `stage` when an AI speaks first.
    fn stage_opener(&self, scenario: &Scenario, stage: &ScenarioStage) -> Option<String> {
        let agents = scenario.agents();
        if agents.is_empty() {
            return None;
        }
        let index = stage.first_speaker_agent_index % agents.len();
        Some(agents[index].id().to_string())
    }

    /// Runs before the opening turn.
    async fn on_opening(&self, _scenario: &Arc<Scenario>) -> Result<()> {
        Ok(())
    }

    /// Runs when a new stage becomes active, before its opener is chosen.
    async fn on_stage_change(&self, _scenario: &Arc<Scenario>, _stage: &ScenarioStage) -> Result<()> {
        Ok(())
    }
}

/// Always the agent at `index`.
pub struct FixedSpeaker {
    pub index: usize,
}

#[async_trait]
impl TurnPolicy for FixedSpeaker {
    async fn next_speaker(
        &self,
        scenario: &Arc<Scenario>,
        _current: Option<&str>,
        _message: Option<&Message>,
    ) -> Result<Option<String>> {
        Ok(scenario.agents().get(self.index).map(|a| a.id().to_string()))
    }
}

/// Passes the turn to the next agent after each agent reply, wrapping to the
/// first agent after the last.
pub struct RoundRobin;

impl RoundRobin {
    pub fn next_after(ids: &[String], current: Option<&str>) -> Option<String> {
        let position = current.and_then(|id| ids.iter().position(|candidate| candidate == id));
        match position {
            Some(position) => ids.get((position + 1) % ids.len()).cloned(),
            None => ids.first().cloned(),
        }
    }
}

#[async_trait]
impl TurnPolicy for RoundRobin {
    async fn next_speaker(
        &self,
        scenario: &Arc<Scenario>,
        current: Option<&str>,
        message: Option<&Message>,
    ) -> Result<Option<String>> {
        match message {
            Some(message) if message.role == MessageRole::Ai => {
                Ok(Self::next_after(&scenario.roster().agent_ids(), current))
            }
            Some(_) => Ok(None),
            None => Ok(scenario.agents().first().map(|a| a.id().to_string())),
        }
    }
}

/// Every agent bids for the next turn after a user message. The first
/// strictly highest bid wins, so ties keep the earliest agent.
pub struct BidAuction;

impl BidAuction {
    /// Index of the winning bid. Failed bids never win.
    pub fn winner(bids: &[Option<f32>]) -> Option<usize> {
        let mut best: Option<(usize, f32)> = None;
        for (index, bid) in bids.iter().enumerate() {
            let Some(bid) = *bid else { continue };
            if best.is_none_or(|(_, top)| bid > top) {
                best = Some((index, bid));
            }
        }
        best.map(|(index, _)| index)
    }

    pub async fn run(scenario: &Arc<Scenario>) -> Option<String> {
        let transcript = scenario
            .components()
            .controller()
            .current_conversation(scenario)
            .await
            .transcript();
        let agents = scenario.agents();
        let bids = join_all(agents.iter().map(|agent| agent.bid(scenario, &transcript))).await;

        let bids: Vec<Option<f32>> = agents
            .iter()
            .zip(bids)
            .map(|(agent, bid)| match bid {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::warn!(target: "troupe::llm", agent = agent.name(), error = %e, "Bid failed");
                    None
                }
            })
            .collect();

        Self::winner(&bids).map(|index| agents[index].id().to_string())
    }
}

#[async_trait]
impl TurnPolicy for BidAuction {
    async fn next_speaker(
        &self,
        scenario: &Arc<Scenario>,
        _current: Option<&str>,
        message: Option<&Message>,
    ) -> Result<Option<String>> {
        match message {
            Some(message) if message.is_user() => Ok(Self::run(scenario).await),
            Some(_) => Ok(None),
            None => Ok(scenario.agents().first().map(|a| a.id().to_string())),
        }
    }
}

/// The single participant of the active stage speaks.
pub struct StageParticipant;

#[async_trait]
impl TurnPolicy for StageParticipant {
    async fn next_speaker(
        &self,
        scenario: &Arc<Scenario>,
        _current: Option<&str>,
        _message: Option<&Message>,
    ) -> Result<Option<String>> {
        Ok(scenario
            .components()
            .stages()
            .current_stage()
            .await
            .and_then(|stage| stage.agent_ids.first().cloned()))
    }

    fn stage_opener(&self, _scenario: &Scenario, stage: &ScenarioStage) -> Option<String> {
        stage.agent_ids.first().cloned()
    }
}

/// Decides who speaks and keeps every agent's transcript up to date.
pub struct ConversationController {
    first_speaker: SpeakerType,
    policy: Box<dyn TurnPolicy>,
    current_agent_id: RwLock<Option<String>>,
}

impl ConversationController {
    pub fn new(first_speaker: FirstSpeakerMode, policy: Box<dyn TurnPolicy>) -> Self {
        Self {
            first_speaker: first_speaker.resolve(),
            policy,
            current_agent_id: RwLock::new(None),
        }
    }

    /// The opener of the scenario, resolved at construction.
    pub fn first_speaker(&self) -> SpeakerType {
        self.first_speaker
    }

    pub fn current_agent_id(&self) -> Option<String> {
        self.current_agent_id
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_current(&self, id: String) {
        *self
            .current_agent_id
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(id);
    }

    pub fn current_agent(&self, scenario: &Scenario) -> Option<Arc<ScenarioAgent>> {
        let id = self.current_agent_id()?;
        scenario.roster().find(&id).cloned()
    }

    /// The transcript of the current speaker, or of the first agent before
    /// anyone was chosen.
    pub async fn current_conversation(&self, scenario: &Scenario) -> Conversation {
        let agent = self
            .current_agent(scenario)
            .or_else(|| scenario.agents().first().cloned());
        match agent {
            Some(agent) => agent.conversation().await,
            None => Conversation::default(),
        }
    }

    /// Snapshots of every participant's transcript.
    pub async fn conversations(&self, scenario: &Scenario) -> Vec<Conversation> {
        join_all(scenario.roster().participants().map(|agent| agent.conversation())).await
    }

    /// Adds a message to every participant except its author.
    pub async fn broadcast(&self, scenario: &Scenario, message: &Message) {
        for agent in scenario.roster().participants() {
            if agent.id() != message.author_id {
                agent.add_message(message.clone()).await;
            }
        }
    }

    async fn update_speaker(&self, scenario: &Arc<Scenario>, message: Option<&Message>) -> Result<()> {
        let current = self.current_agent_id();
        let next = match self.policy.next_speaker(scenario, current.as_deref(), message).await {
            Ok(Some(next)) => next,
            Ok(None) => return Ok(()),
            Err(e) => {
                tracing::error!(
                    target: "troupe::stage",
                    scenario_id = %scenario.id(),
                    current = ?current,
                    error = %e,
                    "Turn policy failed, keeping the current speaker"
                );
                return Ok(());
            }
        };

        if scenario.roster().find(&next).is_some() {
            self.set_current(next);
        } else {
            tracing::error!(
                target: "troupe::stage",
                scenario_id = %scenario.id(),
                agent_id = %next,
                current = ?current,
                "Next speaker does not match a live agent, keeping the current speaker"
            );
        }
        Ok(())
    }

    /// Spawns generation of the next reply by `agent`.
    ///
    /// The reply re-enters the step pipeline as an agent or advisor message.
    pub fn spawn_reply(&self, scenario: &Arc<Scenario>, agent: Arc<ScenarioAgent>) {
        let task_scenario = scenario.clone();
        scenario.spawn("agent_reply", async move {
            let scenario = task_scenario;
            let streamed = scenario.settings().message_mode == MessageMode::Stream
                && agent.kind() != AgentType::Mentor;
            let message = if streamed {
                agent.run_stream(&scenario).await?
            } else {
                agent.run(&scenario).await?
            };

            match agent.kind() {
                AgentType::Mentor => scenario.lifecycle().on_advisor_message(&scenario, message),
                AgentType::Agent | AgentType::SpecialAgent => {
                    scenario.lifecycle().on_agent_message(&scenario, message)
                }
            }
            Ok(())
        });
    }

    async fn replay_debug_transcript(&self, scenario: &Arc<Scenario>) {
        let entries = &scenario.settings().debug_transcript;
        if entries.is_empty() {
            return;
        }

        let account = &scenario.instance().account;
        let first_agent = scenario.agents().first();
        for entry in entries {
            let (author_id, author_name) = match (entry.role, first_agent) {
                (MessageRole::Ai, Some(agent)) => (agent.id().to_string(), agent.name().to_string()),
                _ => (account.id.clone(), account.first_name.clone()),
            };
            let message = Message::new(entry.role, &entry.content, author_id, author_name, scenario.id());
            self.broadcast(scenario, &message).await;
            if entry.role == MessageRole::Ai {
                if let Some(agent) = first_agent {
                    agent.add_message(message).await;
                }
            }
        }
        tracing::info!(target: "troupe::stage", count = entries.len(), "Replayed debug transcript");
    }

    async fn on_stage_changed(&self, scenario: &Arc<Scenario>, stage: &ScenarioStage) -> Result<()> {
        self.policy.on_stage_change(scenario, stage).await?;

        if let Some(opener) = self.policy.stage_opener(scenario, stage) {
            self.set_current(opener);
        }

        match stage.first_speaker {
            Some(SpeakerType::Ai) => {
                if let Some(agent) = self.current_agent(scenario) {
                    self.spawn_reply(scenario, agent);
                }
            }
            _ => {
                scenario
                    .send(ClientEvent::Notification(Notification::AwaitUserMessage))
                    .await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ScenarioComponent for ConversationController {
    fn name(&self) -> &'static str {
        "conversation_controller"
    }

    fn priority(&self) -> i32 {
        CONTROLLER_PRIORITY
    }

    async fn awake(&self, scenario: &Arc<Scenario>) -> Result<()> {
        let weak = Arc::downgrade(scenario);
        scenario.events().subscribe(
            ScenarioEventKind::StageChanged,
            Arc::new(move |event: ScenarioEvent| {
                let weak = weak.clone();
                async move {
                    let (Some(scenario), ScenarioEvent::StageChanged { stage }) = (weak.upgrade(), event)
                    else {
                        return Ok(());
                    };
                    scenario
                        .components()
                        .controller()
                        .on_stage_changed(&scenario, &stage)
                        .await
                }
                .boxed()
            }),
        );
        Ok(())
    }

    async fn start(&self, scenario: &Arc<Scenario>) -> Result<()> {
        if let Some(first) = scenario.agents().first() {
            self.set_current(first.id().to_string());
        }

        if scenario.services().generator.requires_leading_user_turn() {
            let account = &scenario.instance().account;
            let seed = Message::new(
                MessageRole::User,
                LEADING_USER_TURN,
                &account.id,
                &account.first_name,
                scenario.id(),
            );
            for agent in scenario.roster().all() {
                agent.add_message(seed.clone()).await;
            }
        }

        self.replay_debug_transcript(scenario).await;
        self.policy.on_opening(scenario).await?;
        self.update_speaker(scenario, None).await?;

        match self.first_speaker {
            SpeakerType::User => {
                scenario
                    .send(ClientEvent::Notification(Notification::AwaitUserMessage))
                    .await
            }
            SpeakerType::Ai => {
                if let Some(agent) = self.current_agent(scenario) {
                    self.spawn_reply(scenario, agent);
                }
                Ok(())
            }
        }
    }

    async fn step(&self, scenario: &Arc<Scenario>, message: &Message) -> Result<()> {
        self.update_speaker(scenario, Some(message)).await?;

        if scenario.settings().separate_agent_conversations {
            if message.is_user() {
                if let Some(agent) = self.current_agent(scenario) {
                    agent.add_message(message.clone()).await;
                }
            }
        } else {
            self.broadcast(scenario, message).await;
        }
        Ok(())
    }

    async fn step_mentor(&self, scenario: &Arc<Scenario>, message: &Message) -> Result<()> {
        if let (true, Some(mentor)) = (message.is_user(), &scenario.roster().mentor) {
            mentor.add_message(message.clone()).await;
        }
        Ok(())
    }

    async fn late_step(&self, scenario: &Arc<Scenario>, message: &Message) -> Result<()> {
        if !message.is_user() {
            return Ok(());
        }
        if let Some(agent) = self.current_agent(scenario) {
            self.spawn_reply(scenario, agent);
        }
        Ok(())
    }

    async fn late_step_mentor(&self, scenario: &Arc<Scenario>, message: &Message) -> Result<()> {
        let Some(mentor) = scenario.roster().mentor.clone() else {
            return Ok(());
        };
        if !message.is_user() {
            return Ok(());
        }
        scenario
            .components()
            .agent_builder()
            .refresh_mentor(scenario, &mentor)
            .await?;
        self.spawn_reply(scenario, mentor);
        Ok(())
    }

    fn cleanup(&self) {
        *self
            .current_agent_id
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::ScenarioBlueprint;
    use crate::scenarios::pitch::PitchStages;
    use crate::testing::{Harness, user_message};
    use troupe_core::error::TroupeError;

    /// Opens with `alex`, then fails on every message.
    struct BrokenAfterOpening;

    #[async_trait]
    impl TurnPolicy for BrokenAfterOpening {
        async fn next_speaker(
            &self,
            _scenario: &Arc<Scenario>,
            _current: Option<&str>,
            message: Option<&Message>,
        ) -> Result<Option<String>> {
            match message {
                None => Ok(Some("alex".to_string())),
                Some(_) => Err(TroupeError::internal("bidding backend unavailable")),
            }
        }
    }

    #[test]
    fn test_round_robin_wraps_to_first() {
        let ids = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        assert_eq!(RoundRobin::next_after(&ids, None).as_deref(), Some("a"));
        assert_eq!(RoundRobin::next_after(&ids, Some("a")).as_deref(), Some("b"));
        assert_eq!(RoundRobin::next_after(&ids, Some("c")).as_deref(), Some("a"));
        assert_eq!(RoundRobin::next_after(&ids, Some("gone")).as_deref(), Some("a"));
    }

    #[test]
    fn test_bid_ties_keep_earliest_agent() {
        assert_eq!(BidAuction::winner(&[Some(3.0), Some(7.0), Some(7.0)]), Some(1));
        assert_eq!(BidAuction::winner(&[Some(5.0), Some(5.0)]), Some(0));
        assert_eq!(BidAuction::winner(&[None, Some(1.0)]), Some(1));
        assert_eq!(BidAuction::winner(&[None, None]), None);
    }

    #[test]
    fn test_first_speaker_resolved_once() {
        assert_eq!(FirstSpeakerMode::User.resolve(), SpeakerType::User);
        assert_eq!(FirstSpeakerMode::Ai.resolve(), SpeakerType::Ai);

        let controller = ConversationController::new(FirstSpeakerMode::Random, Box::new(RoundRobin));
        let resolved = controller.first_speaker();
        for _ in 0..10 {
            assert_eq!(controller.first_speaker(), resolved);
        }
    }

    #[tokio::test]
    async fn test_failed_turn_policy_keeps_current_speaker() {
        let harness = Harness::new();
        let scenario = harness.scenario(
            "pitch_to_investors",
            &["alex"],
            ScenarioBlueprint::new(BrokenAfterOpening, PitchStages),
        );
        let components = scenario.components();
        components.awake(&scenario).await.unwrap();
        components.start(&scenario).await.unwrap();
        let controller = components.controller();
        assert_eq!(controller.current_agent_id().as_deref(), Some("alex"));

        let message = user_message(&scenario, "Who wants to go first?");
        controller.step(&scenario, &message).await.unwrap();
        assert_eq!(controller.current_agent_id().as_deref(), Some("alex"));
        assert_eq!(scenario.error_count(), 0);
        scenario.tasks().cancel_all().await;
    }
}
