pub mod agent;
pub mod analysis;
pub mod config;
pub mod error;
pub mod generation;
pub mod message;
pub mod repository;
pub mod scenario;
pub mod stage;
pub mod template;
pub mod transport;

// Re-export common error type
pub use error::{Result, TroupeError};
