pub mod config;
pub mod scenarios;
pub mod templates;
