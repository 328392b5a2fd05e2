pub mod channel_transport;
pub mod dto;
pub mod in_memory_result_repository;
pub mod json_dir_result_repository;
pub mod toml_template_repository;

pub use crate::channel_transport::{ChannelClient, ChannelTransport, CloseStatus, channel_transport};
pub use crate::in_memory_result_repository::InMemoryResultRepository;
pub use crate::json_dir_result_repository::JsonDirResultRepository;
pub use crate::toml_template_repository::TomlTemplateRepository;
