use anyhow::{Context, Result};
use std::fmt::Write;
use std::path::Path;
use troupe_core::repository::TemplateRepository;
use troupe_engine::ScenarioRegistry;
use troupe_infrastructure::TomlTemplateRepository;

/// Renders the catalog at `path`. Scenario templates whose type has no
/// registered factory are marked, since creating them would fail.
pub fn list(path: &Path) -> Result<String> {
    let repository = TomlTemplateRepository::load(path)
        .with_context(|| format!("Failed to load template catalog {}", path.display()))?;
    let registry = ScenarioRegistry::builtin();

    let mut out = String::new();
    writeln!(out, "Actors:")?;
    for actor in repository.list_actor_templates() {
        writeln!(out, "  {:<16} {}", actor.id, actor.name)?;
    }
    writeln!(out, "Scenarios:")?;
    for scenario in repository.list_scenario_templates() {
        let kind = scenario.scenario_type();
        let marker = if registry.get(kind).is_some() { "" } else { " (unregistered type)" };
        writeln!(out, "  {:<16} {} [{kind}]{marker}", scenario.id, scenario.name)?;
    }
    Ok(out)
}
