//! Site Context resolution
//!
//! A [`SiteContext`] is derived from a URL: its host, base domain, which
//! privacy features apply there, and whether it is a browser-internal page.
//! It is never stored on its own; every tab state carries the context for
//! its current URL.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use serde_json::Value;

use crate::psl::{walk_host_suffixes, PublicSuffixes};
use crate::services::SettingsStore;
use crate::url::{extract_host, get_scheme_end};

/// Settings key holding the user allowlist (`{ "domain": true }`).
pub const ALLOWLIST_SETTING: &str = "allowlisted";

// =============================================================================
// Feature Flags
// =============================================================================

bitflags::bitflags! {
    /// Privacy features that can be enabled per site.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FeatureFlags: u16 {
        /// Global Privacy Control header
        const GPC = 1 << 0;
        /// Ad-click attribution exceptions
        const AD_CLICK_ATTRIBUTION = 1 << 1;
        /// Third-party tracking cookie stripping
        const COOKIE = 1 << 2;
        /// Referrer trimming
        const REFERRER = 1 << 3;
        /// Topics API opt-out
        const TOPICS = 1 << 4;
        /// HTTPS upgrades
        const HTTPS = 1 << 5;
        /// Tracker blocking
        const CONTENT_BLOCKING = 1 << 6;
        /// Click-to-load placeholders
        const CLICK_TO_LOAD = 1 << 7;
    }
}

impl FeatureFlags {
    /// Map a remote-config feature name onto its flag.
    pub fn from_feature_name(name: &str) -> Option<Self> {
        match name {
            "gpc" => Some(Self::GPC),
            "adClickAttribution" => Some(Self::AD_CLICK_ATTRIBUTION),
            "cookie" => Some(Self::COOKIE),
            "referrer" => Some(Self::REFERRER),
            "googleRejected" => Some(Self::TOPICS),
            "https" => Some(Self::HTTPS),
            "contentBlocking" => Some(Self::CONTENT_BLOCKING),
            "clickToPlay" | "clickToLoad" => Some(Self::CLICK_TO_LOAD),
            _ => None,
        }
    }
}

// =============================================================================
// Site Features
// =============================================================================

/// Per-domain feature enablement compiled from the remote configuration.
#[derive(Debug, Clone, Default)]
pub struct SiteFeatures {
    enabled: FeatureFlags,
    exceptions: HashMap<String, FeatureFlags>,
    unprotected: HashSet<String>,
}

impl SiteFeatures {
    pub fn new(enabled: FeatureFlags) -> Self {
        Self {
            enabled,
            ..Default::default()
        }
    }

    /// Globally enabled features.
    pub fn enabled(&self) -> FeatureFlags {
        self.enabled
    }

    /// Disable `features` on `domain` and its subdomains.
    pub fn add_exception(&mut self, domain: &str, features: FeatureFlags) {
        *self.exceptions.entry(domain.to_ascii_lowercase()).or_default() |= features;
    }

    /// Mark a domain as temporarily unprotected (known broken).
    pub fn add_unprotected(&mut self, domain: &str) {
        self.unprotected.insert(domain.to_ascii_lowercase());
    }

    pub fn exception_count(&self) -> usize {
        self.exceptions.len()
    }

    pub fn unprotected_count(&self) -> usize {
        self.unprotected.len()
    }

    fn is_unprotected(&self, host: &str, base_domain: &str) -> bool {
        walk_host_suffixes(host, base_domain).any(|d| self.unprotected.contains(d))
    }

    fn flags_for(&self, host: &str, base_domain: &str) -> FeatureFlags {
        let mut flags = self.enabled;
        for suffix in walk_host_suffixes(host, base_domain) {
            if let Some(disabled) = self.exceptions.get(suffix) {
                flags.remove(*disabled);
            }
        }
        flags
    }
}

// =============================================================================
// Site Context
// =============================================================================

/// Identity and feature state of the site a tab is showing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteContext {
    pub url: String,
    pub host: String,
    pub base_domain: String,
    /// Browser-internal page name (new tab, extensions, ...)
    pub special_domain_name: Option<&'static str>,
    /// Listed as temporarily unprotected
    pub is_broken: bool,
    /// On the user's allowlist
    pub allowlisted: bool,
    features: FeatureFlags,
    valid: bool,
}

impl SiteContext {
    /// Context for a URL that could not be parsed: every feature disabled.
    pub fn unknown(url: &str) -> Self {
        Self {
            url: url.to_string(),
            host: String::new(),
            base_domain: String::new(),
            special_domain_name: None,
            is_broken: false,
            allowlisted: false,
            features: FeatureFlags::empty(),
            valid: false,
        }
    }

    /// Whether the URL was understood.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn is_feature_enabled(&self, feature: FeatureFlags) -> bool {
        self.features.contains(feature)
    }

    pub fn features(&self) -> FeatureFlags {
        self.features
    }
}

/// Serialized site summary for devtools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ts_rs::TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct SiteSummary {
    pub domain: String,
    pub base_domain: String,
    pub special_domain_name: Option<String>,
    pub is_broken: bool,
    pub allowlisted: bool,
}

impl From<&SiteContext> for SiteSummary {
    fn from(site: &SiteContext) -> Self {
        Self {
            domain: site.host.clone(),
            base_domain: site.base_domain.clone(),
            special_domain_name: site.special_domain_name.map(str::to_string),
            is_broken: site.is_broken,
            allowlisted: site.allowlisted,
        }
    }
}

// =============================================================================
// Resolver
// =============================================================================

/// Derives [`SiteContext`]s from URLs.
#[derive(Debug, Default)]
pub struct SiteResolver {
    psl: PublicSuffixes,
    features: SiteFeatures,
}

impl SiteResolver {
    pub fn new(psl: PublicSuffixes, features: SiteFeatures) -> Self {
        Self { psl, features }
    }

    pub fn psl(&self) -> &PublicSuffixes {
        &self.psl
    }

    pub fn features(&self) -> &SiteFeatures {
        &self.features
    }

    /// Base domain of a host.
    pub fn base_domain(&self, host: &str) -> String {
        self.psl.base_domain(host)
    }

    /// Resolve the site context for a URL.
    ///
    /// The user allowlist is read from `settings`; when the store is not
    /// ready the site is treated as not allowlisted, keeping protections on.
    pub fn resolve(&self, url: &str, settings: &dyn SettingsStore) -> SiteContext {
        if let Some(name) = special_domain(url) {
            return SiteContext {
                url: url.to_string(),
                host: extract_host(url).unwrap_or_default().to_ascii_lowercase(),
                base_domain: String::new(),
                special_domain_name: Some(name),
                is_broken: false,
                allowlisted: false,
                features: FeatureFlags::empty(),
                valid: true,
            };
        }

        let host = match extract_host(url) {
            Some(host) if crate::url::extract_scheme(url).is_some() => host.to_ascii_lowercase(),
            _ => {
                log::debug!("unparseable site url {url:?}; protections disabled for it");
                return SiteContext::unknown(url);
            }
        };
        let host = host.trim_end_matches('.').to_string();
        let base_domain = self.psl.base_domain(&host);

        let is_broken = self.features.is_unprotected(&host, &base_domain);
        let allowlisted = is_allowlisted(settings, &host, &base_domain);

        let features = if is_broken || allowlisted {
            FeatureFlags::empty()
        } else {
            self.features.flags_for(&host, &base_domain)
        };

        SiteContext {
            url: url.to_string(),
            host,
            base_domain,
            special_domain_name: None,
            is_broken,
            allowlisted,
            features,
            valid: true,
        }
    }
}

fn is_allowlisted(settings: &dyn SettingsStore, host: &str, base_domain: &str) -> bool {
    if !settings.is_ready() {
        log::debug!("settings not ready; assuming {host} is not allowlisted");
        return false;
    }
    match settings.get_setting(ALLOWLIST_SETTING) {
        Some(Value::Object(map)) => [host, base_domain]
            .iter()
            .any(|d| map.get(*d).and_then(Value::as_bool).unwrap_or(false)),
        _ => false,
    }
}

/// Name browser-internal pages, which never get content substitution.
fn special_domain(url: &str) -> Option<&'static str> {
    let lower = url.to_ascii_lowercase();
    if lower == "about:blank" || lower == "about:newtab" || lower == "about:home" {
        return Some("new tab");
    }
    if lower.starts_with("about:preferences") {
        return Some("preferences");
    }
    if lower.starts_with("about:") {
        return Some("about");
    }
    if lower.starts_with("chrome://newtab")
        || lower.starts_with("chrome-search://")
        || lower.starts_with("edge://newtab")
    {
        return Some("new tab");
    }
    if lower.starts_with("chrome://extensions") || lower.starts_with("edge://extensions") {
        return Some("extensions");
    }
    if lower.starts_with("chrome-extension://")
        || lower.starts_with("moz-extension://")
        || lower.starts_with("safari-web-extension://")
    {
        return Some("extension page");
    }
    if lower.starts_with("file://") {
        return Some("local file");
    }
    if lower.starts_with("view-source:") {
        return Some("view source");
    }
    match get_scheme_end(&lower) {
        Some(end) if matches!(&lower[..end], "chrome://" | "edge://" | "brave://" | "vivaldi://" | "opera://") => {
            Some("browser page")
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::MemorySettings;
    use serde_json::json;

    fn resolver() -> SiteResolver {
        let mut features = SiteFeatures::new(FeatureFlags::all());
        features.add_exception("nogpc.com", FeatureFlags::GPC);
        features.add_unprotected("broken.org");
        SiteResolver::new(PublicSuffixes::heuristic(), features)
    }

    #[test]
    fn test_feature_flags_from_config_names() {
        assert_eq!(FeatureFlags::from_feature_name("gpc"), Some(FeatureFlags::GPC));
        assert_eq!(FeatureFlags::from_feature_name("googleRejected"), Some(FeatureFlags::TOPICS));
        assert_eq!(FeatureFlags::from_feature_name("clickToPlay"), Some(FeatureFlags::CLICK_TO_LOAD));
        assert_eq!(FeatureFlags::from_feature_name("GPC"), None);
        assert_eq!(FeatureFlags::from_feature_name("fingerprinting"), None);
    }

    #[test]
    fn test_resolve_regular_site() {
        let site = resolver().resolve("https://www.Example.com/page", &MemorySettings::new());
        assert!(site.is_valid());
        assert_eq!(site.host, "www.example.com");
        assert_eq!(site.base_domain, "example.com");
        assert!(site.is_feature_enabled(FeatureFlags::GPC));
        assert!(site.special_domain_name.is_none());
    }

    #[test]
    fn test_feature_exception_covers_subdomains() {
        let site = resolver().resolve("https://shop.nogpc.com/", &MemorySettings::new());
        assert!(!site.is_feature_enabled(FeatureFlags::GPC));
        assert!(site.is_feature_enabled(FeatureFlags::COOKIE));
    }

    #[test]
    fn test_broken_site_disables_everything() {
        let site = resolver().resolve("https://a.broken.org/", &MemorySettings::new());
        assert!(site.is_broken);
        assert_eq!(site.features(), FeatureFlags::empty());
    }

    #[test]
    fn test_malformed_url_fails_closed_on_detection() {
        let site = resolver().resolve("not a url", &MemorySettings::new());
        assert!(!site.is_valid());
        assert_eq!(site.features(), FeatureFlags::empty());
    }

    #[test]
    fn test_special_domains() {
        let settings = MemorySettings::new();
        let r = resolver();
        assert_eq!(r.resolve("about:blank", &settings).special_domain_name, Some("new tab"));
        assert_eq!(r.resolve("chrome://extensions/", &settings).special_domain_name, Some("extensions"));
        assert_eq!(r.resolve("chrome://settings/", &settings).special_domain_name, Some("browser page"));
        assert_eq!(r.resolve("file:///tmp/a.html", &settings).special_domain_name, Some("local file"));
        assert!(r.resolve("chrome://newtab/", &settings).features().is_empty());
    }

    #[test]
    fn test_user_allowlist() {
        let settings = MemorySettings::with_values([(ALLOWLIST_SETTING, json!({ "example.com": true }))]);
        let site = resolver().resolve("https://www.example.com/", &settings);
        assert!(site.allowlisted);
        assert!(site.features().is_empty());

        let pending = MemorySettings::not_ready();
        assert!(!resolver().resolve("https://www.example.com/", &pending).allowlisted);
    }
}
