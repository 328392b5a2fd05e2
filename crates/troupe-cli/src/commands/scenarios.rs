use troupe_engine::ScenarioRegistry;

pub fn list() -> String {
    ScenarioRegistry::builtin()
        .ids()
        .into_iter()
        .map(|id| format!("{id}\n"))
        .collect()
}
