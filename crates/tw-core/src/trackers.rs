//! Tracker and entity lookups
//!
//! Built by the config compiler from tracker data. Lookups walk the
//! request host from most specific to its base domain, so
//! `pixel.ads.tracker.com` hits an entry registered for `tracker.com`.

use std::collections::{HashMap, HashSet};

use crate::psl::{walk_host_suffixes, PublicSuffixes};

/// What to do with a tracker when nothing else applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackerAction {
    #[default]
    Block,
    Ignore,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerEntry {
    pub domain: String,
    pub owner: Option<String>,
    pub categories: Vec<String>,
    pub default_action: TrackerAction,
}

/// Tracker and entity index keyed by lowercase domain.
#[derive(Debug, Clone, Default)]
pub struct TrackerIndex {
    trackers: HashMap<String, TrackerEntry>,
    entities: HashMap<String, String>,
}

impl TrackerIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_tracker(&mut self, entry: TrackerEntry) {
        self.trackers.insert(entry.domain.to_ascii_lowercase(), entry);
    }

    /// Record that `domain` belongs to the entity `owner`.
    pub fn insert_entity_domain(&mut self, domain: &str, owner: &str) {
        self.entities.insert(domain.to_ascii_lowercase(), owner.to_string());
    }

    pub fn tracker_count(&self) -> usize {
        self.trackers.len()
    }

    pub fn entity_domain_count(&self) -> usize {
        self.entities.len()
    }

    /// Find the tracker entry covering a host.
    pub fn lookup(&self, host: &str, psl: &PublicSuffixes) -> Option<&TrackerEntry> {
        let base = psl.base_domain(host);
        walk_host_suffixes(host, &base).find_map(|d| self.trackers.get(d))
    }

    /// Entity owning a host, if known.
    pub fn entity_of(&self, host: &str, psl: &PublicSuffixes) -> Option<&str> {
        let base = psl.base_domain(host);
        walk_host_suffixes(host, &base)
            .find_map(|d| self.entities.get(d))
            .map(String::as_str)
    }

    /// Whether two hosts are owned by the same entity.
    pub fn is_same_entity(&self, a: &str, b: &str, psl: &PublicSuffixes) -> bool {
        match (self.entity_of(a, psl), self.entity_of(b, psl)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        }
    }
}

/// Third-party tracking cookie settings.
#[derive(Debug, Clone, Default)]
pub struct CookiePolicy {
    excluded: HashSet<String>,
}

impl CookiePolicy {
    /// Never strip cookies for `domain` or its subdomains.
    pub fn exclude(&mut self, domain: &str) {
        self.excluded.insert(domain.to_ascii_lowercase());
    }

    pub fn excluded_count(&self) -> usize {
        self.excluded.len()
    }

    pub fn is_excluded(&self, host: &str, psl: &PublicSuffixes) -> bool {
        let base = psl.base_domain(host);
        walk_host_suffixes(host, &base).any(|d| self.excluded.contains(d))
    }
}
