//! Agent identity types.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// The closed set of participant kinds. Each kind has its own system prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AgentType {
    /// A primary character the user talks to.
    Agent,
    /// A character with a distinct role, such as a debate moderator.
    SpecialAgent,
    /// The advisor, stepped through the mentor channel.
    Mentor,
}
