//! Pending cross-tab links
//!
//! Bridges "a tab was opened as a navigation target of another tab" and
//! "that new tab started its first navigation". Entries are read once.

use std::collections::HashMap;

use crate::types::TabId;

#[derive(Debug, Default)]
pub struct PendingLinks {
    /// new tab -> source tab
    links: HashMap<TabId, TabId>,
}

impl PendingLinks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, new_tab: TabId, source_tab: TabId) {
        if let Some(previous) = self.links.insert(new_tab, source_tab) {
            log::debug!("tab {new_tab} re-linked from {previous} to {source_tab}");
        }
    }

    /// Resolve and remove the link for `new_tab`.
    pub fn take(&mut self, new_tab: TabId) -> Option<TabId> {
        self.links.remove(&new_tab)
    }

    /// Drop every link that mentions `tab`, either side.
    pub fn forget(&mut self, tab: TabId) {
        self.links.retain(|new_tab, source| *new_tab != tab && *source != tab);
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn clear(&mut self) {
        self.links.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_is_read_once() {
        let mut links = PendingLinks::new();
        links.record(TabId(2), TabId(1));
        assert_eq!(links.take(TabId(2)), Some(TabId(1)));
        assert_eq!(links.take(TabId(2)), None);
    }

    #[test]
    fn test_forget_removes_both_directions() {
        let mut links = PendingLinks::new();
        links.record(TabId(2), TabId(1));
        links.record(TabId(3), TabId(1));
        links.record(TabId(5), TabId(4));

        links.forget(TabId(1));
        assert_eq!(links.len(), 1);
        links.forget(TabId(5));
        assert!(links.is_empty());
    }
}
