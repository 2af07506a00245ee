//! Infrastructure layer: file locations and TOML persistence.

pub mod config_service;
pub mod paths;
pub mod storage;
pub mod toml_recent_item_repository;

pub use config_service::ConfigService;
pub use paths::StrudelPaths;
pub use toml_recent_item_repository::TomlRecentItemRepository;
