//! Compiled engine configuration

use serde::{Deserialize, Serialize};

use crate::ad_click::AdClickPolicy;
use crate::https::UpgradeList;
use crate::site::SiteResolver;
use crate::trackers::{CookiePolicy, TrackerIndex};

/// How the host applies request decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostMode {
    /// The host waits for the engine's blocking response on every request
    #[default]
    Blocking,
    /// The host applies declarative rules; per-tab exceptions are installed
    /// as session rules
    Declarative,
}

impl HostMode {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "blocking" => Some(Self::Blocking),
            "declarative" => Some(Self::Declarative),
            _ => None,
        }
    }

    pub fn is_declarative(self) -> bool {
        self == Self::Declarative
    }
}

/// Everything the engine needs besides its collaborators.
#[derive(Debug, Default)]
pub struct EngineConfig {
    pub resolver: SiteResolver,
    pub trackers: TrackerIndex,
    pub ad_click: AdClickPolicy,
    pub cookies: CookiePolicy,
    pub upgrade_hosts: UpgradeList,
    pub host_mode: HostMode,
    /// The browser exposes the Topics API, so the opt-out header matters
    pub topics_available: bool,
}

impl EngineConfig {
    pub fn new(resolver: SiteResolver) -> Self {
        Self {
            resolver,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_mode_names() {
        assert_eq!(HostMode::from_name("Declarative"), Some(HostMode::Declarative));
        assert_eq!(HostMode::from_name("blocking"), Some(HostMode::Blocking));
        assert_eq!(HostMode::from_name("mv4"), None);
        assert!(!HostMode::default().is_declarative());
    }
}
