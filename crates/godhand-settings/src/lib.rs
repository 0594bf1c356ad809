//! # godhand-settings
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`GodHandSettings::default()`]
//! 2. **User file**: `~/.godhand/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `GODHAND_*` overrides
//!
//! The binary applies its command-line flags on top of the result.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, resolve_path, settings_path};
pub use types::*;
