//! Tab Registry
//!
//! Owns every [`TabState`]. Each create hands out a fresh generation number,
//! and deltas are only applied to the generation they were computed
//! against, so an update that raced with a removal or a re-navigation of
//! the same tab becomes a no-op.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use crate::site::SiteContext;
use crate::tab::{TabDelta, TabSnapshot, TabState};
use crate::types::TabId;

#[derive(Debug, Default)]
pub struct TabRegistry {
    tabs: HashMap<TabId, TabState>,
    next_generation: u64,
}

impl TabRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, tab_id: TabId) -> Option<&TabState> {
        self.tabs.get(&tab_id)
    }

    pub fn len(&self) -> usize {
        self.tabs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tabs.is_empty()
    }

    fn bump_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    /// Start a new generation for `tab_id`, replacing any existing state.
    ///
    /// The previous generation's main-frame redirect is carried forward so
    /// an upgrade loop spanning a same-tab redirect is still detected.
    pub fn create(&mut self, tab_id: TabId, url: &str, site: SiteContext, now_ms: u64) -> &TabState {
        let generation = self.bump_generation();
        let mut state = TabState::new(tab_id, generation, url, site);
        if let Some(previous) = self.tabs.get(&tab_id) {
            state
                .https_redirects
                .persist_main_frame_redirect(previous.https_redirects.get_main_frame_redirect(), now_ms);
        }
        match self.tabs.entry(tab_id) {
            Entry::Occupied(mut entry) => {
                entry.insert(state);
                entry.into_mut()
            }
            Entry::Vacant(entry) => entry.insert(state),
        }
    }

    /// Upsert from tab lifecycle info. Existing state only has its status
    /// refreshed; `site` is resolved only when a new state is needed.
    pub fn create_or_update_tab(
        &mut self,
        tab_id: TabId,
        url: &str,
        status: Option<&str>,
        site: impl FnOnce() -> SiteContext,
    ) -> &TabState {
        let next_generation = &mut self.next_generation;
        let state = self.tabs.entry(tab_id).or_insert_with(|| {
            *next_generation += 1;
            TabState::new(tab_id, *next_generation, url, site())
        });
        if let Some(status) = status {
            state.status = Some(status.to_string());
        }
        state
    }

    pub fn delete(&mut self, tab_id: TabId) -> Option<TabState> {
        self.tabs.remove(&tab_id)
    }

    /// Apply a delta computed against `generation` of `tab_id`.
    ///
    /// Returns false when the tab is gone, has been re-created since, or
    /// the delta changed nothing.
    pub fn apply(&mut self, tab_id: TabId, generation: u64, delta: TabDelta) -> bool {
        match self.tabs.get_mut(&tab_id) {
            Some(state) if state.generation == generation => state.apply(delta),
            Some(_) => {
                log::debug!("dropping stale delta for tab {tab_id}");
                false
            }
            None => {
                log::debug!("dropping delta for removed tab {tab_id}");
                false
            }
        }
    }

    pub fn snapshot(&self, tab_id: TabId) -> Option<TabSnapshot> {
        self.get(tab_id).map(TabState::snapshot)
    }

    /// Snapshots of every live tab, ordered by id.
    pub fn snapshots(&self) -> Vec<TabSnapshot> {
        let mut snapshots: Vec<_> = self.tabs.values().map(TabState::snapshot).collect();
        snapshots.sort_by_key(|s| s.id);
        snapshots
    }

    pub fn clear(&mut self) {
        self.tabs.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site(url: &str) -> SiteContext {
        SiteContext::unknown(url)
    }

    #[test]
    fn test_get_after_delete_is_none() {
        let mut registry = TabRegistry::new();
        registry.create(TabId(1), "https://a.com/", site("https://a.com/"), 0);
        assert!(registry.get(TabId(1)).is_some());

        registry.delete(TabId(1));
        assert!(registry.get(TabId(1)).is_none());

        registry.create(TabId(1), "https://b.com/", site("https://b.com/"), 0);
        assert_eq!(registry.get(TabId(1)).map(TabState::url), Some("https://b.com/"));
    }

    #[test]
    fn test_create_replaces_and_carries_main_frame_redirect() {
        let mut registry = TabRegistry::new();
        let generation = registry.create(TabId(1), "http://a.com/", site("http://a.com/"), 0).generation();
        registry.apply(
            TabId(1),
            generation,
            TabDelta::RecordUpgrade {
                url: "http://a.com/".into(),
                request_id: "1".into(),
                main_frame: true,
                now_ms: 0,
            },
        );
        registry.apply(TabId(1), generation, TabDelta::HttpsError);

        let state = registry.create(TabId(1), "https://a.com/", site("https://a.com/"), 100);
        assert_ne!(state.generation(), generation);
        assert!(!state.has_https_error());
        assert!(!state.main_frame_upgraded());
        assert!(state.https_redirects().get_main_frame_redirect().is_some());
    }

    #[test]
    fn test_stale_delta_is_rejected() {
        let mut registry = TabRegistry::new();
        let old = registry.create(TabId(1), "https://a.com/", site("https://a.com/"), 0).generation();
        registry.create(TabId(1), "https://b.com/", site("https://b.com/"), 0);

        assert!(!registry.apply(TabId(1), old, TabDelta::HttpsError));
        assert!(!registry.get(TabId(1)).map_or(true, TabState::has_https_error));

        registry.delete(TabId(1));
        assert!(!registry.apply(TabId(1), old, TabDelta::HttpsError));
        assert!(registry.get(TabId(1)).is_none());
    }

    #[test]
    fn test_create_or_update_tab_is_idempotent() {
        let mut registry = TabRegistry::new();
        let generation = registry
            .create_or_update_tab(TabId(4), "https://a.com/", Some("loading"), || site("https://a.com/"))
            .generation();

        let state = registry.create_or_update_tab(TabId(4), "https://a.com/", Some("complete"), || {
            panic!("existing tab must not be re-resolved")
        });
        assert_eq!(state.generation(), generation);
        assert_eq!(state.status(), Some("complete"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_snapshots_sorted() {
        let mut registry = TabRegistry::new();
        registry.create(TabId(9), "https://a.com/", site("https://a.com/"), 0);
        registry.create(TabId(2), "https://b.com/", site("https://b.com/"), 0);
        let ids: Vec<_> = registry.snapshots().iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![2, 9]);
    }
}
