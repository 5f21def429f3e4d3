//! Layered settings: compiled defaults, then the JSON file merged over them,
//! then environment variables.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::{home_dir, AppSettings};

/// Env var naming an explicit settings file.
pub const CONFIG_ENV: &str = "SHOPDESK_CONFIG";

/// `$SHOPDESK_CONFIG` if set, else `~/.shopdesk/settings.json`.
pub fn settings_path() -> PathBuf {
    std::env::var_os(CONFIG_ENV)
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| home_dir().join(".shopdesk").join("settings.json"))
}

pub fn load_settings(path: Option<&Path>) -> Result<AppSettings> {
    let path = path.map_or_else(settings_path, Path::to_path_buf);
    load_settings_from_path(&path)
}

/// A missing file yields defaults; unreadable or invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<AppSettings> {
    let mut settings = read_file_layer(path)?;
    apply_env_overrides(&mut settings, |name| std::env::var(name).ok());
    Ok(settings)
}

fn read_file_layer(path: &Path) -> Result<AppSettings> {
    let mut doc = serde_json::to_value(AppSettings::default())?;
    match std::fs::read_to_string(path) {
        Ok(text) => {
            let overlay: Value = serde_json::from_str(&text).map_err(|source| SettingsError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
            debug!(path = %path.display(), "merging settings file");
            doc = deep_merge(doc, overlay);
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no settings file");
        }
        Err(source) => {
            return Err(SettingsError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    }
    Ok(serde_json::from_value(doc)?)
}

/// Merge `overlay` into `base`. Objects merge key by key; any other overlay
/// value replaces the base value, except `null`, which leaves it alone.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    let mut base = base;
    merge_into(&mut base, overlay);
    base
}

fn merge_into(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (_, Value::Null) => {}
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(slot) => merge_into(slot, value),
                    None if !value.is_null() => {
                        base.insert(key, value);
                    }
                    None => {}
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

/// Apply environment overrides read through `lookup`. Empty and invalid
/// values are ignored.
pub fn apply_env_overrides<F>(settings: &mut AppSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let var = |name: &str| lookup(name).filter(|v| !v.is_empty());
    let invalid = |name: &str, value: &str| warn!(var = name, value, "ignoring invalid env override");

    if let Some(v) = var("ENV") {
        match v.parse() {
            Ok(env) => settings.env = env,
            Err(_) => invalid("ENV", &v),
        }
    }

    if let Some(v) = var("HOST") {
        settings.server.host = v;
    }
    if let Some(v) = var("PORT") {
        match parse_u64_range(&v, 1, u64::from(u16::MAX)) {
            Some(port) => settings.server.port = port as u16,
            None => invalid("PORT", &v),
        }
    }
    if let Some(v) = var("DATABASE_PATH") {
        settings.database.path = v;
    }

    let messenger = &mut settings.messenger;
    for (name, slot) in [
        ("MY_VERIFY_TOKEN", &mut messenger.verify_token),
        ("PAGE_ACCESS_TOKEN", &mut messenger.page_access_token),
        ("FACEBOOK_URL", &mut messenger.graph_url),
        ("AI_URL", &mut messenger.agent_url),
        ("STORE_ID", &mut messenger.store_id),
    ] {
        if let Some(v) = var(name) {
            *slot = v;
        }
    }
    if let Some(v) = var("DEBOUNCE_MS") {
        match parse_u64_range(&v, 0, 3_600_000) {
            Some(ms) => messenger.debounce_ms = ms,
            None => invalid("DEBOUNCE_MS", &v),
        }
    }

    if let Some(v) = var("LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = var("LOG_JSON") {
        match parse_bool(&v) {
            Some(json) => settings.logging.json = json,
            None => invalid("LOG_JSON", &v),
        }
    }
}

/// `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`, any case.
pub fn parse_bool(val: &str) -> Option<bool> {
    const TRUE: [&str; 4] = ["true", "1", "yes", "on"];
    const FALSE: [&str; 4] = ["false", "0", "no", "off"];
    let val = val.trim();
    if TRUE.iter().any(|t| t.eq_ignore_ascii_case(val)) {
        Some(true)
    } else if FALSE.iter().any(|f| f.eq_ignore_ascii_case(val)) {
        Some(false)
    } else {
        None
    }
}

pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    val.trim().parse().ok().filter(|n| (min..=max).contains(n))
}
