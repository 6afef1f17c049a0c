//! Configuration loading and env substitution.
//!
//! Config files: `ferry.toml`, `ferry.yaml`, `ferry.yml` or `ferry.json`,
//! searched in `./` then `~/.config/ferry/`.
//!
//! Supports `${ENV_VAR}` and `${ENV_VAR:-default}` substitution in the raw
//! file before parsing.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{config_dir, discover_and_load, find_config_file, load_config},
    schema::{FerryConfig, GeneralConfig},
};
