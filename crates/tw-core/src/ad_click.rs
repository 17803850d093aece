//! Ad-click attribution
//!
//! A tab whose navigation started from a search ad click gets an
//! [`AdClick`] record. While the record is live and the tab is on the
//! advertiser's site, allowlisted ad-conversion hosts are not blocked.
//!
//! The advertiser is learned in one of two ways:
//! - the ad URL names it in a query parameter (domain detection), or
//! - the redirect chain that follows the click is watched and the site of
//!   the first non-redirect response is taken (heuristic detection).

use serde::Serialize;

use crate::psl::PublicSuffixes;
use crate::services::{SessionRule, SessionRuleKind};
use crate::types::TabId;
use crate::url::{extract_host, extract_path, query_param};

/// Default navigation window after a click, in milliseconds.
pub const DEFAULT_NAVIGATION_EXPIRATION_MS: u64 = 1_800 * 1000;
/// Default lifetime of an attribution, in milliseconds.
pub const DEFAULT_TOTAL_EXPIRATION_MS: u64 = 604_800 * 1000;

/// URL shape of a search ad click.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkFormat {
    /// Host and path, e.g. `duckduckgo.com/y.js`
    pub url: String,
    /// Query parameter carrying the advertiser domain
    pub ad_domain_parameter_name: Option<String>,
}

/// Host allowed to load while an attribution is active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowlistEntry {
    /// Tracker entry this exception lifts
    pub blocklist_entry: String,
    pub host: String,
}

impl AllowlistEntry {
    fn matches(&self, host: &str) -> bool {
        host == self.host || host.ends_with(&format!(".{}", self.host))
    }
}

// =============================================================================
// Policy
// =============================================================================

/// Detection rules and budgets for ad-click attribution.
#[derive(Debug, Clone)]
pub struct AdClickPolicy {
    pub enabled: bool,
    pub link_formats: Vec<LinkFormat>,
    pub allowlist: Vec<AllowlistEntry>,
    pub navigation_expiration_ms: u64,
    pub total_expiration_ms: u64,
    pub heuristic_detection: bool,
    pub domain_detection: bool,
}

impl Default for AdClickPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            link_formats: Vec::new(),
            allowlist: Vec::new(),
            navigation_expiration_ms: DEFAULT_NAVIGATION_EXPIRATION_MS,
            total_expiration_ms: DEFAULT_TOTAL_EXPIRATION_MS,
            heuristic_detection: true,
            domain_detection: true,
        }
    }
}

impl AdClickPolicy {
    fn matching_format(&self, url: &str) -> Option<&LinkFormat> {
        let host = extract_host(url)?.to_ascii_lowercase();
        let host = host.strip_prefix("www.").unwrap_or(&host);
        let candidate = format!("{}{}", host, extract_path(url).to_ascii_lowercase());
        self.link_formats
            .iter()
            .find(|f| f.url.eq_ignore_ascii_case(&candidate))
    }

    /// Whether a URL is a search ad click.
    pub fn is_ad_click(&self, url: &str) -> bool {
        self.enabled && self.matching_format(url).is_some()
    }

    /// Build the attribution for an ad click on `tab_id`.
    pub fn create_ad_click(&self, url: &str, tab_id: TabId, now_ms: u64, psl: &PublicSuffixes) -> AdClick {
        let mut ad_click = AdClick {
            tab_id,
            ad_base_domain: None,
            ad_click_redirect: false,
            expires_at: now_ms.saturating_add(self.total_expiration_ms),
            click_expires_at: now_ms.saturating_add(self.navigation_expiration_ms),
            allowlist: self.allowlist.clone(),
        };

        if self.domain_detection {
            let param_domain = self
                .matching_format(url)
                .and_then(|f| f.ad_domain_parameter_name.as_deref())
                .and_then(|param| query_param(url, param))
                .map(|value| value.trim().to_ascii_lowercase())
                .filter(|value| value.contains('.') && !value.contains('/'));
            if let Some(domain) = param_domain {
                ad_click.ad_base_domain = Some(psl.base_domain(&domain));
            }
        }

        if ad_click.ad_base_domain.is_none() && self.heuristic_detection {
            ad_click.ad_click_redirect = true;
        }

        ad_click
    }
}

// =============================================================================
// Attribution Record
// =============================================================================

/// Attribution of a tab's navigation to an ad click.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdClick {
    tab_id: TabId,
    /// Advertiser base domain, once known
    pub ad_base_domain: Option<String>,
    /// Waiting for the redirect chain to settle
    pub ad_click_redirect: bool,
    expires_at: u64,
    click_expires_at: u64,
    allowlist: Vec<AllowlistEntry>,
}

impl AdClick {
    pub fn tab_id(&self) -> TabId {
        self.tab_id
    }

    /// Finish the redirect chain with the advertiser's base domain.
    pub fn set_ad_base_domain(&mut self, base_domain: &str) {
        self.ad_base_domain = Some(base_domain.to_string());
        self.ad_click_redirect = false;
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at
    }

    fn is_advertiser(&self, base_domain: &str) -> bool {
        !base_domain.is_empty() && self.ad_base_domain.as_deref() == Some(base_domain)
    }

    /// Gate for copying the attribution into a tab opened from this one.
    pub fn should_propagate_for_new_tab(&self, new_base_domain: &str, now_ms: u64) -> bool {
        if self.is_expired(now_ms) {
            return false;
        }
        self.ad_click_redirect || now_ms < self.click_expires_at || self.is_advertiser(new_base_domain)
    }

    /// Gate for keeping the attribution across a same-tab navigation.
    pub fn should_propagate_for_navigation(&self, new_base_domain: &str, now_ms: u64) -> bool {
        !self.is_expired(now_ms) && (self.ad_click_redirect || self.is_advertiser(new_base_domain))
    }

    /// Independent copy scoped to another tab.
    pub fn propagate(&self, tab_id: TabId) -> AdClick {
        AdClick {
            tab_id,
            ..self.clone()
        }
    }

    /// Whether a request to `request_host` may load on a page of
    /// `site_base_domain` because of this attribution.
    pub fn allow_ad_attribution(&self, site_base_domain: &str, request_host: &str, now_ms: u64) -> bool {
        if self.is_expired(now_ms) || !self.is_advertiser(site_base_domain) {
            return false;
        }
        self.allowlist.iter().any(|entry| entry.matches(request_host))
    }

    /// Session rule mirroring this attribution for declarative hosts.
    pub fn session_rule(&self) -> Option<SessionRule> {
        let ad_base_domain = self.ad_base_domain.clone()?;
        Some(SessionRule {
            tab_id: self.tab_id,
            kind: SessionRuleKind::AdAttribution {
                ad_base_domain,
                allowed_hosts: self.allowlist.iter().map(|e| e.host.clone()).collect(),
            },
        })
    }
}

/// Serialized attribution for devtools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ts_rs::TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct AdClickSummary {
    pub tab_id: i32,
    pub ad_base_domain: Option<String>,
    pub ad_click_redirect: bool,
}

impl From<&AdClick> for AdClickSummary {
    fn from(ad_click: &AdClick) -> Self {
        Self {
            tab_id: ad_click.tab_id.0,
            ad_base_domain: ad_click.ad_base_domain.clone(),
            ad_click_redirect: ad_click.ad_click_redirect,
        }
    }
}
