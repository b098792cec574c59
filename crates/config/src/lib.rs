//! Configuration loading and env substitution.
//!
//! Config files: `antares.toml`, `antares.yaml`, or `antares.json`
//! Searched in `./` then `~/.config/antares/`.
//!
//! Supports `${ENV_VAR}` substitution in all string values.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{config_dir, discover_and_load, load_config},
    schema::{
        AntaresConfig, LanguageConfig, ModulesConfig, RetryConfig, TelegramSection,
    },
};
