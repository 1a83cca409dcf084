//! Per-panel state: current path, listing, selection, focus, history.

use std::{
    collections::VecDeque,
    time::SystemTime,
};

use ahash::AHashSet;
use compact_str::CompactString;

use crate::{
    fs::listing::{EntrySort, Listing},
    path::{engine_path::EnginePath, mask::MaskGroup},
    vfs::provider::FsInstanceId,
};

const HISTORY_CAPACITY: usize = 32;

/// The two navigation surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum PanelSide {
    Left,
    Right,
}

impl PanelSide {
    pub fn index(self) -> usize {
        match self {
            PanelSide::Left => 0,
            PanelSide::Right => 1,
        }
    }

    pub fn other(self) -> PanelSide {
        match self {
            PanelSide::Left => PanelSide::Right,
            PanelSide::Right => PanelSide::Left,
        }
    }
}

/// State of one panel. Selection is by name, not index, and survives
/// listing rebuilds as long as the name still exists.
#[derive(Debug)]
pub struct PanelState {
    pub path: EnginePath,
    pub listing: Listing,
    /// Lowercased selected names.
    selection: AHashSet<String>,
    /// Most recent pre-clearing selection, for Restore Selection.
    stored_selection: Vec<CompactString>,
    pub focused: Option<CompactString>,
    pub top_index: usize,
    pub sort: EntrySort,
    pub filter: Option<MaskGroup>,
    pub history: VecDeque<EnginePath>,
    /// Whether the user interacted with the current path enough to record
    /// it in history when leaving.
    pub working_dir_used: bool,
    /// Weak handle into the plugin-FS registry, present in PluginFs state.
    pub fs_instance: Option<FsInstanceId>,
    /// Container stamp captured when an archive was opened.
    pub archive_stamp: Option<(SystemTime, u64)>,
    /// Last directory known to list successfully, next stop of the rescue
    /// chain.
    pub last_known_good: Option<EnginePath>,
    /// Transient: a path change is resolving; user transitions are
    /// suppressed.
    pub changing: bool,
}

impl PanelState {
    pub fn new(path: EnginePath) -> Self {
        Self {
            path,
            listing: Listing::default(),
            selection: AHashSet::new(),
            stored_selection: Vec::new(),
            focused: None,
            top_index: 0,
            sort: EntrySort::default(),
            filter: None,
            history: VecDeque::with_capacity(HISTORY_CAPACITY),
            working_dir_used: false,
            fs_instance: None,
            archive_stamp: None,
            last_known_good: None,
            changing: false,
        }
    }

    pub fn select(&mut self, name: &str) {
        if self.listing.contains(name) {
            self.selection.insert(name.to_lowercase());
        }
    }

    pub fn deselect(&mut self, name: &str) {
        self.selection.remove(&name.to_lowercase());
    }

    pub fn toggle(&mut self, name: &str) {
        let key = name.to_lowercase();
        if !self.selection.remove(&key) && self.listing.contains(name) {
            self.selection.insert(key);
        }
    }

    pub fn is_selected(&self, name: &str) -> bool {
        self.selection.contains(&name.to_lowercase())
    }

    /// Selected names in listing order.
    pub fn selected_names(&self) -> Vec<CompactString> {
        self.listing
            .entries
            .iter()
            .filter(|e| self.selection.contains(&e.name.as_str().to_lowercase()))
            .map(|e| e.name.clone())
            .collect()
    }

    pub fn selection_count(&self) -> usize {
        self.selected_names().len()
    }

    /// Clear the selection, storing it for Restore Selection.
    pub fn clear_selection(&mut self) {
        let stored = self.selected_names();
        if !stored.is_empty() {
            self.stored_selection = stored;
        }
        self.selection.clear();
    }

    /// Replay the most recent stored selection.
    pub fn restore_selection(&mut self) {
        let names: Vec<CompactString> = self.stored_selection.clone();
        for name in names {
            self.select(&name);
        }
    }

    /// Install a rebuilt listing, transferring selection and focus by
    /// case-insensitive name match.
    pub fn install_listing(&mut self, listing: Listing) {
        let kept: AHashSet<String> = listing
            .entries
            .iter()
            .map(|e| e.name.as_str().to_lowercase())
            .filter(|k| self.selection.contains(k))
            .collect();
        self.selection = kept;
        if let Some(focused) = &self.focused {
            if !listing.contains(focused) {
                self.focused = None;
            }
        }
        self.listing = listing;
        if self.focused.is_none() {
            self.focused = self.listing.entries.first().map(|e| e.name.clone());
        }
        self.clamp_top();
    }

    pub fn focus(&mut self, name: &str) {
        if let Some(idx) = self.listing.position_of(name) {
            self.focused = Some(self.listing.entries[idx].name.clone());
        }
    }

    pub fn focused_index(&self) -> Option<usize> {
        self.focused
            .as_ref()
            .and_then(|f| self.listing.position_of(f))
    }

    fn clamp_top(&mut self) {
        let max = self.listing.len().saturating_sub(1);
        if self.top_index > max {
            self.top_index = max;
        }
    }

    /// Record a path in history, most recent first, de-duplicated.
    pub fn push_history(&mut self, path: EnginePath) {
        self.history.retain(|p| !p.same_path(&path));
        self.history.push_front(path);
        while self.history.len() > HISTORY_CAPACITY {
            self.history.pop_back();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::listing::ListingEntry;
    use crate::path::engine_path::{ArchiveAssoc, ParseContext};

    fn panel() -> PanelState {
        let archives = ArchiveAssoc::default();
        let path = EnginePath::parse("C:\\", &ParseContext::bare(&archives)).unwrap();
        let mut p = PanelState::new(path);
        p.install_listing(Listing::build(
            vec![
                ListingEntry::dir("docs"),
                ListingEntry::file("a.txt", 1),
                ListingEntry::file("b.txt", 2),
            ],
            EntrySort::NameAsc,
            None,
        ));
        p
    }

    #[test]
    fn selection_survives_rebuild_by_name() {
        let mut p = panel();
        p.select("A.TXT");
        p.select("b.txt");
        assert_eq!(p.selection_count(), 2);

        // Rebuild without b.txt: only a.txt survives.
        p.install_listing(Listing::build(
            vec![ListingEntry::file("a.txt", 1), ListingEntry::file("c.txt", 3)],
            EntrySort::NameAsc,
            None,
        ));
        assert!(p.is_selected("a.txt"));
        assert!(!p.is_selected("b.txt"));
    }

    #[test]
    fn stored_selection_replays() {
        let mut p = panel();
        p.select("a.txt");
        p.select("b.txt");
        p.clear_selection();
        assert_eq!(p.selection_count(), 0);
        p.restore_selection();
        assert_eq!(p.selection_count(), 2);
    }

    #[test]
    fn focus_defaults_to_first_entry() {
        let p = panel();
        assert_eq!(p.focused.as_deref(), Some("docs"));
    }

    #[test]
    fn history_dedupes_and_orders() {
        let archives = ArchiveAssoc::default();
        let a = EnginePath::parse("C:\\a", &ParseContext::bare(&archives)).unwrap();
        let b = EnginePath::parse("C:\\b", &ParseContext::bare(&archives)).unwrap();
        let mut p = panel();
        p.push_history(a.clone());
        p.push_history(b.clone());
        p.push_history(a.clone());
        assert_eq!(p.history.len(), 2);
        assert!(p.history[0].same_path(&a));
        assert!(p.history[1].same_path(&b));
    }
}
