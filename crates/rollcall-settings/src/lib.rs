//! # rollcall-settings
//!
//! Configuration for the rollcall dashboard client.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`RollcallSettings::default()`]
//! 2. **User file**: `~/.rollcall/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `ROLLCALL_*` overrides (highest priority)
//!
//! There is no global instance: the binary loads settings once and passes
//! the pieces each component needs.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, deep_merge, load_file_layer, load_settings, load_settings_from_path,
    settings_path,
};
pub use types::*;
