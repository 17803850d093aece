//! Source formats
//!
//! Raw serde shapes of the remote privacy configuration, the tracker data
//! set (TDS) and the HTTPS upgrade host list. Nothing here is normalized;
//! see `optimizer` and `builder`.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

use crate::ConfigError;

// =============================================================================
// Privacy Configuration
// =============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivacyConfig {
    #[serde(default)]
    pub features: HashMap<String, FeatureConfig>,
    #[serde(default)]
    pub unprotected_temporary: Vec<DomainEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureConfig {
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub exceptions: Vec<DomainEntry>,
    #[serde(default)]
    pub settings: Value,
}

impl FeatureConfig {
    pub fn is_enabled(&self) -> bool {
        self.state == "enabled"
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DomainEntry {
    pub domain: String,
}

/// `adClickAttribution.settings`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdClickSettings {
    #[serde(default)]
    pub link_formats: Vec<LinkFormatEntry>,
    #[serde(default)]
    pub allowlist: Vec<AllowlistItem>,
    /// Seconds
    #[serde(default)]
    pub navigation_expiration: Option<u64>,
    /// Seconds
    #[serde(default)]
    pub total_expiration: Option<u64>,
    #[serde(default = "enabled_state")]
    pub heuristic_detection: String,
    #[serde(default = "enabled_state")]
    pub domain_detection: String,
}

fn enabled_state() -> String {
    "enabled".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkFormatEntry {
    pub url: String,
    #[serde(default)]
    pub ad_domain_parameter_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllowlistItem {
    pub blocklist_entry: String,
    pub host: String,
}

/// `cookie.settings`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CookieSettings {
    #[serde(default)]
    pub excluded_cookie_domains: Vec<DomainEntry>,
}

pub fn parse_privacy_config(text: &str) -> Result<PrivacyConfig, ConfigError> {
    serde_json::from_str(text).map_err(|source| ConfigError::Json {
        input: "privacy config",
        source,
    })
}

/// Decode a feature's `settings` object, treating a missing one as defaults.
pub fn feature_settings<T>(feature: &FeatureConfig, name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: for<'de> Deserialize<'de>,
{
    if feature.settings.is_null() {
        return Ok(None);
    }
    T::deserialize(&feature.settings)
        .map(Some)
        .map_err(|source| ConfigError::Json { input: name, source })
}

// =============================================================================
// Tracker Data Set
// =============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrackerData {
    #[serde(default)]
    pub trackers: HashMap<String, TrackerRecord>,
    #[serde(default)]
    pub entities: HashMap<String, EntityRecord>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackerRecord {
    pub domain: String,
    #[serde(default)]
    pub owner: Option<OwnerRecord>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default = "block_action")]
    pub default: String,
}

fn block_action() -> String {
    "block".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct OwnerRecord {
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EntityRecord {
    #[serde(default)]
    pub domains: Vec<String>,
}

pub fn parse_tracker_data(text: &str) -> Result<TrackerData, ConfigError> {
    serde_json::from_str(text).map_err(|source| ConfigError::Json {
        input: "tracker data",
        source,
    })
}

// =============================================================================
// HTTPS Upgrade List
// =============================================================================

/// One host per line; `#` starts a comment.
pub fn parse_https_hosts(text: &str) -> Vec<String> {
    text.lines()
        .map(|line| match line.find('#') {
            Some(pos) => &line[..pos],
            None => line,
        })
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
