//! # shopdesk-settings
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** - [`AppSettings::default()`]
//! 2. **Settings file** - JSON, deep-merged over defaults
//! 3. **Environment variables** - highest priority
//!
//! ```no_run
//! let settings = shopdesk_settings::load_settings(None).unwrap_or_default();
//! println!("listening on {}:{}", settings.server.host, settings.server.port);
//! ```

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
