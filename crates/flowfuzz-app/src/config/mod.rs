//! Configuration file parsing for flowfuzz
//!
//! Supports `.flowfuzz/config.toml` with the `[bridge]`, `[detector]`,
//! `[runner]`, `[bus]` and `[output]` sections.

pub mod settings;
pub mod types;

pub use settings::{config_path, init_config_dir, load_settings};
pub use types::*;
