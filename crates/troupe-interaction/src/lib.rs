//! Prompt rendering and model-output parsing.

pub mod parsing;
pub mod prompts;

pub use parsing::{parse_assessment, parse_bid, parse_numbered_list, parse_structured};
pub use prompts::PromptLibrary;
