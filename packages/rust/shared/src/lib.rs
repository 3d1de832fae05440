//! Shared types, error model, and configuration for the ABM pipeline.
//!
//! This crate is the foundation depended on by all other ABM crates.
//! It provides:
//! - [`AbmError`]: the unified error type
//! - Domain types ([`Contact`], [`EnrichedContact`], [`Account`], [`TargetingDecision`], [`StageResult`])
//! - Configuration ([`AppConfig`], [`RetryPolicy`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CrewConfig, HubSpotConfig, OpenAiConfig, RetryPolicy, ScraperConfig, ScraperMode,
    StorageConfig, TargetingConfig, config_dir, config_file_path, init_config, load_config,
    load_config_from, resolve_api_key, resolve_db_path,
};
pub use error::{AbmError, Result};
pub use types::{
    Account, Contact, EnrichedContact, StageResult, SyncAction, TargetingDecision,
    TargetingStatus,
};
