//! Option payload sent with `start`.
//!
//! The backend advertises its settings and workaround toggles through
//! `preferences.json`. [`OptionPayload`] starts from those defaults and takes
//! caller overrides; it never reads any UI state.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::api::{Preferences, SettingEntry, StartRequest, TestCatalog};
use crate::error::{DashError, DashResult};

/// Setting chosen through a dedicated selector rather than the settings list
pub const BROWSER_SETTING: &str = "browser";

/// A workaround toggle with its `W<n>` code split off
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkaroundOption {
    pub key: String,
    pub code: Option<String>,
    pub text: String,
    pub enabled: bool,
}

fn workaround_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(W[0-9]+) (.+)").expect("static regex"))
}

/// Split `"W12 Retry login"` into `(Some("W12"), "Retry login")`
pub fn split_workaround(description: &str) -> (Option<String>, String) {
    match workaround_pattern().captures(description) {
        Some(caps) => (Some(caps[1].to_string()), caps[2].to_string()),
        None => (None, description.to_string()),
    }
}

pub fn workaround_options(preferences: &Preferences) -> Vec<WorkaroundOption> {
    preferences
        .workarounds
        .iter()
        .map(|w| {
            let (code, text) = split_workaround(&w.description);
            WorkaroundOption {
                key: w.key.clone(),
                code,
                text,
                enabled: w.value,
            }
        })
        .collect()
}

/// Settings shown in the general list (everything but the browser)
pub fn listed_settings(preferences: &Preferences) -> impl Iterator<Item = &SettingEntry> {
    preferences.settings.iter().filter(|s| s.key != BROWSER_SETTING)
}

/// Render a setting value the way it is edited: as plain text
pub fn setting_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Workaround and setting values passed to `start`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OptionPayload {
    pub workarounds: BTreeMap<String, bool>,
    pub settings: BTreeMap<String, String>,
}

impl OptionPayload {
    /// The backend's current defaults
    pub fn from_preferences(preferences: &Preferences) -> Self {
        Self {
            workarounds: preferences
                .workarounds
                .iter()
                .map(|w| (w.key.clone(), w.value))
                .collect(),
            settings: preferences
                .settings
                .iter()
                .map(|s| (s.key.clone(), setting_text(&s.value)))
                .collect(),
        }
    }

    pub fn set_workaround(&mut self, key: impl Into<String>, enabled: bool) -> &mut Self {
        self.workarounds.insert(key.into(), enabled);
        self
    }

    pub fn set_setting(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    pub fn set_browser(&mut self, browser: impl Into<String>) -> &mut Self {
        self.set_setting(BROWSER_SETTING, browser)
    }

    pub fn to_request(&self, test: impl Into<String>) -> StartRequest {
        StartRequest {
            test: test.into(),
            workarounds: self.workarounds.clone(),
            settings: self.settings.clone(),
        }
    }
}

/// Resolve a test by display name or by identifier
pub fn resolve_test(catalog: &TestCatalog, selector: &str) -> Option<String> {
    catalog
        .get(selector)
        .cloned()
        .or_else(|| catalog.values().find(|id| id.as_str() == selector).cloned())
}

/// Parse `KEY=VALUE`
pub fn parse_assignment(raw: &str) -> DashResult<(String, String)> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim().to_string(), value.to_string())),
        _ => Err(DashError::InvalidOption(format!("expected KEY=VALUE, got '{}'", raw))),
    }
}

/// Parse `on`/`off` style toggles
pub fn parse_toggle(raw: &str) -> DashResult<bool> {
    match raw.trim().to_lowercase().as_str() {
        "on" | "true" | "yes" | "1" => Ok(true),
        "off" | "false" | "no" | "0" => Ok(false),
        other => Err(DashError::InvalidOption(format!("expected on/off, got '{}'", other))),
    }
}
