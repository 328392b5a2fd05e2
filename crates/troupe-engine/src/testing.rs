//! Test doubles shared by the engine's unit tests.

use crate::component::ScenarioComponent;
use crate::manager::{ScenarioManager, ScenarioRegistry};
use crate::scenario::{Scenario, ScenarioBlueprint, ScenarioServices};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use troupe_core::config::{MessageMode, ScenarioSettings, TroupeConfig};
use troupe_core::error::{Result, TroupeError};
use troupe_core::generation::{AllowAllModeration, GenerationParams, TextGenerator};
use troupe_core::message::{Message, MessageRole};
use troupe_core::repository::TemplateRepository;
use troupe_core::scenario::{AccountData, ScenarioConfig, ScenarioInstance};
use troupe_core::template::ScenarioTemplate;
use troupe_infrastructure::{InMemoryResultRepository, TomlTemplateRepository};

pub(crate) const CATALOG: &str = r#"
[[actor]]
id = "alex"
name = "Alex"
profile = "A sharp analyst."

[[actor]]
id = "blair"
name = "Blair"
profile = "A warm storyteller."

[[actor]]
id = "casey"
name = "Casey"
profile = "A blunt engineer."

[[actor]]
id = "mod"
name = "Morgan"
role = "Moderate the debate."

[[scenario]]
id = "debate"
name = "Debate Night"
skills = ["rebuttal"]

[[scenario]]
id = "speed_dating"
name = "Speed Dating"

[[scenario]]
id = "interview"
name = "Job Interview"

[[scenario]]
id = "pitch_to_investors"
name = "Pitch Night"
skills = ["clarity"]
"#;

pub(crate) const SOCIAL_JSON: &str = r#"{
  "overall_score": 7.0,
  "overall_impression": "Engaged",
  "areas_for_improvement": ["pacing"],
  "areas_of_excellence": ["listening"],
  "growth_strategies": ["pause more"],
  "emotional_intelligence": { "score": 7.0, "notes": "" },
  "active_listening": { "score": 8.0, "notes": "" },
  "effective_communication": { "score": 7.0, "notes": "" },
  "social_awareness": { "score": 6.0, "notes": "" },
  "confidence": { "score": 7.0, "notes": "" },
  "conflict_resolution": { "score": 6.0, "notes": "" },
  "adaptability": { "score": 7.0, "notes": "" },
  "persuasion_and_influence": { "score": 6.0, "notes": "" }
}"#;

pub(crate) const SKILLS_JSON: &str =
    r#"{ "summary": "Solid pitch", "metrics": { "clarity": { "score": 8.0, "notes": "" } } }"#;

enum Reply {
    Text(String),
    Fail(String),
}

/// Answers with the first rule whose needle occurs in the last prompt
/// message, or with `"ok"`.
#[derive(Default)]
pub(crate) struct ScriptedGenerator {
    rules: Mutex<Vec<(String, Reply)>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on(&self, needle: &str, reply: &str) -> &Self {
        self.rules
            .lock()
            .unwrap()
            .push((needle.to_string(), Reply::Text(reply.to_string())));
        self
    }

    pub fn fail_on(&self, needle: &str, message: &str) -> &Self {
        self.rules
            .lock()
            .unwrap()
            .push((needle.to_string(), Reply::Fail(message.to_string())));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, messages: &[Message], _params: &GenerationParams) -> Result<String> {
        let prompt = messages.last().map(|m| m.content.clone()).unwrap_or_default();
        self.calls.lock().unwrap().push(prompt.clone());

        let rules = self.rules.lock().unwrap();
        match rules.iter().find(|(needle, _)| prompt.contains(needle.as_str())) {
            Some((_, Reply::Text(text))) => Ok(text.clone()),
            Some((_, Reply::Fail(message))) => Err(TroupeError::generation(message.clone())),
            None => Ok("ok".to_string()),
        }
    }
}

/// Counts lifecycle calls and remembers who the controller had chosen when
/// this component stepped.
pub(crate) struct Recorder {
    name: &'static str,
    priority: i32,
    pub awakes: AtomicUsize,
    pub starts: AtomicUsize,
    pub steps: AtomicUsize,
    pub late_steps: AtomicUsize,
    pub updates: AtomicUsize,
    pub speakers: Mutex<Vec<Option<String>>>,
}

impl Recorder {
    pub fn new(name: &'static str, priority: i32) -> Arc<Self> {
        Arc::new(Self {
            name,
            priority,
            awakes: AtomicUsize::new(0),
            starts: AtomicUsize::new(0),
            steps: AtomicUsize::new(0),
            late_steps: AtomicUsize::new(0),
            updates: AtomicUsize::new(0),
            speakers: Mutex::new(Vec::new()),
        })
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScenarioComponent for Recorder {
    fn name(&self) -> &'static str {
        self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    async fn awake(&self, _scenario: &Arc<Scenario>) -> Result<()> {
        self.awakes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn start(&self, _scenario: &Arc<Scenario>) -> Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn step(&self, scenario: &Arc<Scenario>, _message: &Message) -> Result<()> {
        self.steps.fetch_add(1, Ordering::SeqCst);
        self.speakers
            .lock()
            .unwrap()
            .push(scenario.components().controller().current_agent_id());
        Ok(())
    }

    async fn late_step(&self, _scenario: &Arc<Scenario>, _message: &Message) -> Result<()> {
        self.late_steps.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn update(&self, _scenario: &Arc<Scenario>, _frame: u64) -> Result<()> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Fails every hook it implements.
pub(crate) struct Faulty {
    pub priority: i32,
    pub panic_on_update: bool,
}

#[async_trait]
impl ScenarioComponent for Faulty {
    fn name(&self) -> &'static str {
        "faulty"
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    async fn awake(&self, _scenario: &Arc<Scenario>) -> Result<()> {
        Err(TroupeError::internal("awake exploded"))
    }

    async fn start(&self, _scenario: &Arc<Scenario>) -> Result<()> {
        Err(TroupeError::internal("start exploded"))
    }

    async fn step(&self, _scenario: &Arc<Scenario>, _message: &Message) -> Result<()> {
        Err(TroupeError::internal("step exploded"))
    }

    async fn update(&self, _scenario: &Arc<Scenario>, _frame: u64) -> Result<()> {
        if self.panic_on_update {
            panic!("update exploded");
        }
        Err(TroupeError::internal("update exploded"))
    }
}

pub(crate) struct Harness {
    pub generator: Arc<ScriptedGenerator>,
    pub results: Arc<InMemoryResultRepository>,
    pub services: ScenarioServices,
}

impl Harness {
    pub fn new() -> Self {
        let generator = ScriptedGenerator::new();
        let results = Arc::new(InMemoryResultRepository::new());
        let templates: Arc<dyn TemplateRepository> =
            Arc::new(TomlTemplateRepository::from_toml_str(CATALOG).unwrap());
        let services = ScenarioServices {
            generator: generator.clone(),
            templates,
            results: results.clone(),
            moderation: Arc::new(AllowAllModeration),
        };
        Self {
            generator,
            results,
            services,
        }
    }

    pub fn settings() -> ScenarioSettings {
        ScenarioSettings {
            message_mode: MessageMode::Async,
            frame_rate_secs: 60.0,
            validate_user_messages: false,
            ..ScenarioSettings::default()
        }
    }

    /// Builds a scenario for `scenario_id` with the given primary actors,
    /// bypassing the manager.
    pub fn scenario(&self, scenario_id: &str, actor_ids: &[&str], blueprint: ScenarioBlueprint) -> Arc<Scenario> {
        self.scenario_with(config(scenario_id, actor_ids), blueprint)
    }

    pub fn scenario_with(&self, config: ScenarioConfig, blueprint: ScenarioBlueprint) -> Arc<Scenario> {
        let (instance, template) = self.instance(config);
        self.assemble(instance, template, blueprint)
    }

    /// Builds a scenario through the factory registered for its type.
    pub fn builtin(&self, config: ScenarioConfig) -> Arc<Scenario> {
        let (instance, template) = self.instance(config);
        let factory = ScenarioRegistry::builtin()
            .get(template.scenario_type())
            .unwrap();
        let blueprint = factory(&instance, &template).unwrap();
        self.assemble(instance, template, blueprint)
    }

    fn instance(&self, config: ScenarioConfig) -> (ScenarioInstance, ScenarioTemplate) {
        let template = self
            .services
            .templates
            .get_scenario_template(&config.scenario_id)
            .unwrap();
        let instance = ScenarioInstance::new(AccountData::new("acc-1", "Sam"), config);
        (instance, template)
    }

    fn assemble(
        &self,
        instance: ScenarioInstance,
        template: ScenarioTemplate,
        blueprint: ScenarioBlueprint,
    ) -> Arc<Scenario> {
        let settings = Self::settings().merged(blueprint.settings.as_ref()).unwrap();
        Scenario::build(instance, template, blueprint, self.services.clone(), settings).unwrap()
    }

    pub fn manager(&self) -> ScenarioManager {
        let config = TroupeConfig {
            scenario: Self::settings(),
            ..TroupeConfig::default()
        };
        ScenarioManager::new(self.services.clone(), config)
    }
}

pub(crate) fn config(scenario_id: &str, actor_ids: &[&str]) -> ScenarioConfig {
    ScenarioConfig {
        scenario_id: scenario_id.to_string(),
        actor_ids: actor_ids.iter().map(|id| id.to_string()).collect(),
        ..ScenarioConfig::default()
    }
}

pub(crate) fn user_message(scenario: &Scenario, content: &str) -> Message {
    Message::new(MessageRole::User, content, "acc-1", "Sam", scenario.id())
}

pub(crate) fn agent_message(scenario: &Scenario, agent_id: &str, content: &str) -> Message {
    let agent = scenario.roster().find(agent_id).unwrap();
    agent.message(content)
}
