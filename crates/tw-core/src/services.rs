//! Collaborator interfaces
//!
//! The engine talks to the rest of the extension through these traits:
//! the settings store, the list-quality counters, and the declarative
//! session-rule engine used by the stricter host mode. In-memory
//! implementations are provided for tests and the CLI.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::ServiceError;
use crate::types::TabId;

// =============================================================================
// Settings
// =============================================================================

/// Persistent settings store.
pub trait SettingsStore: Send {
    /// Whether settings have finished loading.
    fn is_ready(&self) -> bool;

    fn get_setting(&self, key: &str) -> Option<Value>;

    fn update_setting(&mut self, key: &str, value: Value) -> Result<(), ServiceError>;

    fn remove_setting(&mut self, key: &str) -> Result<(), ServiceError>;

    /// Finish loading with the values read from storage.
    fn load(&mut self, values: Map<String, Value>);
}

/// Settings kept in a map.
#[derive(Debug, Clone, Default)]
pub struct MemorySettings {
    ready: bool,
    values: HashMap<String, Value>,
}

impl MemorySettings {
    /// Empty, ready store.
    pub fn new() -> Self {
        Self {
            ready: true,
            values: HashMap::new(),
        }
    }

    /// Store that has not finished loading yet.
    pub fn not_ready() -> Self {
        Self::default()
    }

    pub fn with_values<K: Into<String>>(values: impl IntoIterator<Item = (K, Value)>) -> Self {
        Self {
            ready: true,
            values: values.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

impl SettingsStore for MemorySettings {
    fn is_ready(&self) -> bool {
        self.ready
    }

    fn get_setting(&self, key: &str) -> Option<Value> {
        if !self.ready {
            return None;
        }
        self.values.get(key).cloned()
    }

    fn update_setting(&mut self, key: &str, value: Value) -> Result<(), ServiceError> {
        if !self.ready {
            return Err(ServiceError::SettingsNotReady);
        }
        if key.is_empty() {
            return Err(ServiceError::SettingsWrite("empty key".to_string()));
        }
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    fn remove_setting(&mut self, key: &str) -> Result<(), ServiceError> {
        if !self.ready {
            return Err(ServiceError::SettingsNotReady);
        }
        self.values.remove(key);
        Ok(())
    }

    fn load(&mut self, values: Map<String, Value>) {
        self.values.extend(values);
        self.ready = true;
    }
}

// =============================================================================
// List-quality Counters
// =============================================================================

/// HTTPS upgrade outcomes reported to the list-quality collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum UpgradeCounter {
    TotalUpgrades,
    FailedUpgrades,
}

pub trait UpgradeCounters: Send {
    fn increment_upgrade_count(&mut self, kind: UpgradeCounter);

    fn upgrade_count(&self, kind: UpgradeCounter) -> u64;
}

#[derive(Debug, Clone, Default)]
pub struct MemoryCounters {
    counts: HashMap<UpgradeCounter, u64>,
}

impl UpgradeCounters for MemoryCounters {
    fn increment_upgrade_count(&mut self, kind: UpgradeCounter) {
        *self.counts.entry(kind).or_insert(0) += 1;
    }

    fn upgrade_count(&self, kind: UpgradeCounter) -> u64 {
        self.counts.get(&kind).copied().unwrap_or(0)
    }
}

// =============================================================================
// Session Rules
// =============================================================================

/// What a tab-scoped session rule exempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SessionRuleKind {
    /// Allow allowlisted ad-attribution hosts while on the advertiser site
    #[serde(rename_all = "camelCase")]
    AdAttribution {
        ad_base_domain: String,
        allowed_hosts: Vec<String>,
    },
    /// Temporarily allow embedded content the user asked to load
    #[serde(rename_all = "camelCase")]
    ClickToLoad { domain: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRule {
    pub tab_id: TabId,
    #[serde(flatten)]
    pub kind: SessionRuleKind,
}

/// Declarative rule engine of the stricter host mode.
pub trait SessionRules: Send {
    fn add_tab_rule(&mut self, rule: SessionRule) -> Result<(), ServiceError>;

    /// Drop every rule scoped to a tab.
    fn remove_tab_rules(&mut self, tab_id: TabId) -> Result<(), ServiceError>;

    /// Drop all session rules (orphans survive extension restarts).
    fn flush(&mut self) -> Result<(), ServiceError>;

    fn tab_rules(&self, tab_id: TabId) -> Vec<SessionRule>;
}

#[derive(Debug, Clone, Default)]
pub struct MemorySessionRules {
    rules: Vec<SessionRule>,
}

impl MemorySessionRules {
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl SessionRules for MemorySessionRules {
    fn add_tab_rule(&mut self, rule: SessionRule) -> Result<(), ServiceError> {
        if !rule.tab_id.is_tab() {
            return Err(ServiceError::RuleRejected(format!("rule for non-tab id {}", rule.tab_id)));
        }
        if !self.rules.contains(&rule) {
            self.rules.push(rule);
        }
        Ok(())
    }

    fn remove_tab_rules(&mut self, tab_id: TabId) -> Result<(), ServiceError> {
        self.rules.retain(|r| r.tab_id != tab_id);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), ServiceError> {
        self.rules.clear();
        Ok(())
    }

    fn tab_rules(&self, tab_id: TabId) -> Vec<SessionRule> {
        self.rules.iter().filter(|r| r.tab_id == tab_id).cloned().collect()
    }
}

// =============================================================================
// Bundle
// =============================================================================

/// The collaborators an engine is constructed with.
pub struct Services {
    pub settings: Box<dyn SettingsStore>,
    pub counters: Box<dyn UpgradeCounters>,
    pub rules: Box<dyn SessionRules>,
}

impl Services {
    /// All-in-memory collaborators with ready settings.
    pub fn in_memory() -> Self {
        Self::with_settings(MemorySettings::new())
    }

    pub fn with_settings(settings: impl SettingsStore + 'static) -> Self {
        Self {
            settings: Box::new(settings),
            counters: Box::new(MemoryCounters::default()),
            rules: Box::new(MemorySessionRules::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_settings_not_ready_rejects_writes() {
        let mut settings = MemorySettings::not_ready();
        assert!(settings.get_setting("GPC").is_none());
        assert!(matches!(
            settings.update_setting("GPC", json!(false)),
            Err(ServiceError::SettingsNotReady)
        ));

        let mut values = Map::new();
        values.insert("GPC".to_string(), json!(false));
        settings.load(values);
        assert_eq!(settings.get_setting("GPC"), Some(json!(false)));
        settings.remove_setting("GPC").unwrap();
        assert!(settings.get_setting("GPC").is_none());
        assert!(matches!(
            settings.update_setting("", json!(true)),
            Err(ServiceError::SettingsWrite(_))
        ));
    }

    #[test]
    fn test_counters() {
        let mut counters = MemoryCounters::default();
        counters.increment_upgrade_count(UpgradeCounter::FailedUpgrades);
        counters.increment_upgrade_count(UpgradeCounter::FailedUpgrades);
        assert_eq!(counters.upgrade_count(UpgradeCounter::FailedUpgrades), 2);
        assert_eq!(counters.upgrade_count(UpgradeCounter::TotalUpgrades), 0);
    }

    #[test]
    fn test_session_rules_scoped_by_tab() {
        let mut rules = MemorySessionRules::default();
        let rule = |tab| SessionRule {
            tab_id: TabId(tab),
            kind: SessionRuleKind::ClickToLoad { domain: "facebook.com".into() },
        };
        rules.add_tab_rule(rule(1)).unwrap();
        rules.add_tab_rule(rule(1)).unwrap();
        rules.add_tab_rule(rule(2)).unwrap();
        assert_eq!(rules.len(), 2);

        assert!(matches!(
            rules.add_tab_rule(rule(-1)),
            Err(ServiceError::RuleRejected(_))
        ));

        rules.remove_tab_rules(TabId(1)).unwrap();
        assert!(rules.tab_rules(TabId(1)).is_empty());
        assert_eq!(rules.tab_rules(TabId(2)).len(), 1);
    }
}
