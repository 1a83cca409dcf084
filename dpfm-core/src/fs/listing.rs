//! Listing entries and ordering.
//!
//! A listing is rebuilt, never mutated in place; the panel transfers
//! selection and focus from the old listing to the new by name.

use chrono::{DateTime, Local};
use compact_str::CompactString;
use serde::{Deserialize, Serialize};

use crate::path::{engine_path::eq_ci, mask::MaskGroup};

/// Basic attributes carried by disk listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAttrs {
    pub read_only: bool,
    pub hidden: bool,
    pub system: bool,
    pub directory: bool,
    pub reparse_point: bool,
}

/// One row of a panel listing. Optional fields are supplied by the source.
#[derive(Debug, Clone, PartialEq)]
pub struct ListingEntry {
    pub name: CompactString,
    pub is_dir: bool,
    pub size: Option<u64>,
    pub modified: Option<DateTime<Local>>,
    pub attrs: Option<FileAttrs>,
    pub icon_index: Option<u16>,
    /// Opaque per-entry value owned by the plugin that produced the listing.
    pub plugin_data: Option<u64>,
}

impl ListingEntry {
    pub fn dir(name: impl Into<CompactString>) -> Self {
        Self {
            name: name.into(),
            is_dir: true,
            size: None,
            modified: None,
            attrs: None,
            icon_index: None,
            plugin_data: None,
        }
    }

    pub fn file(name: impl Into<CompactString>, size: u64) -> Self {
        Self {
            name: name.into(),
            is_dir: false,
            size: Some(size),
            modified: None,
            attrs: None,
            icon_index: None,
            plugin_data: None,
        }
    }

    fn extension(&self) -> &str {
        if self.is_dir {
            return "";
        }
        self.name.rsplit_once('.').map_or("", |(_, e)| e)
    }
}

/// Sort criteria; directories always order before files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum EntrySort {
    #[default]
    NameAsc = 0,
    NameDesc = 1,
    SizeAsc = 2,
    SizeDesc = 3,
    ModifiedAsc = 4,
    ModifiedDesc = 5,
    ExtensionAsc = 6,
    ExtensionDesc = 7,
}

pub fn sort_entries(entries: &mut [ListingEntry], sort: EntrySort) {
    use std::cmp::Ordering;

    let dirs_first = |a: &ListingEntry, b: &ListingEntry| match (a.is_dir, b.is_dir) {
        (true, false) => Some(Ordering::Less),
        (false, true) => Some(Ordering::Greater),
        _ => None,
    };
    let by_name = |a: &ListingEntry, b: &ListingEntry| {
        a.name.to_lowercase().cmp(&b.name.to_lowercase())
    };

    entries.sort_unstable_by(|a, b| {
        if let Some(ord) = dirs_first(a, b) {
            return ord;
        }
        match sort {
            EntrySort::NameAsc => by_name(a, b),
            EntrySort::NameDesc => by_name(b, a),
            EntrySort::SizeAsc => a.size.cmp(&b.size).then_with(|| by_name(a, b)),
            EntrySort::SizeDesc => b.size.cmp(&a.size).then_with(|| by_name(a, b)),
            EntrySort::ModifiedAsc => a.modified.cmp(&b.modified).then_with(|| by_name(a, b)),
            EntrySort::ModifiedDesc => b.modified.cmp(&a.modified).then_with(|| by_name(a, b)),
            EntrySort::ExtensionAsc => a
                .extension()
                .to_lowercase()
                .cmp(&b.extension().to_lowercase())
                .then_with(|| by_name(a, b)),
            EntrySort::ExtensionDesc => b
                .extension()
                .to_lowercase()
                .cmp(&a.extension().to_lowercase())
                .then_with(|| by_name(a, b)),
        }
    });
}

/// An ordered sequence of entries, already sorted and filtered.
#[derive(Debug, Clone, Default)]
pub struct Listing {
    pub entries: Vec<ListingEntry>,
}

impl Listing {
    /// Build a listing: apply the name filter to files, then sort.
    pub fn build(
        mut entries: Vec<ListingEntry>,
        sort: EntrySort,
        filter: Option<&MaskGroup>,
    ) -> Self {
        if let Some(filter) = filter {
            entries.retain(|e| e.is_dir || filter.matches(&e.name));
        }
        sort_entries(&mut entries, sort);
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Case-insensitive lookup by name.
    pub fn position_of(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| eq_ci(&e.name, name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position_of(name).is_some()
    }

    /// Names present here but absent from `older`.
    pub fn new_names<'a>(&'a self, older: &Listing) -> Vec<&'a str> {
        self.entries
            .iter()
            .filter(|e| !older.contains(&e.name))
            .map(|e| e.name.as_str())
            .collect()
    }
}
