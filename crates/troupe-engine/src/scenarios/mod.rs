//! Built-in scenario types.
//!
//! Each module exposes its registry id and a factory producing the
//! [`ScenarioBlueprint`](crate::scenario::ScenarioBlueprint).

pub mod debate;
pub mod interview;
pub mod pitch;
pub mod speed_dating;

use troupe_core::scenario::ScenarioConfig;

/// Reads an integer field, falling back to `default` when absent or invalid.
pub(crate) fn numeric_field<T: std::str::FromStr>(config: &ScenarioConfig, key: &str, default: T) -> T {
    match config.field(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(target: "troupe::stage", field = key, value = raw, "Ignoring non-numeric scenario field");
            default
        }),
        None => default,
    }
}
