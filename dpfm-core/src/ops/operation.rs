//! Bulk-operation model. An operation owns its source list by value; once
//! enqueued, its view of the filesystem is independent of panel state.

use std::{io, path::Path, path::PathBuf, sync::Arc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Copy,
    Move,
    Delete,
    Attr,
    Pack,
    Unpack,
}

/// Attribute changes applied by an Attr operation. `None` leaves the
/// attribute alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct AttrChange {
    pub read_only: Option<bool>,
    pub hidden: Option<bool>,
    pub system: Option<bool>,
}

/// Packing/unpacking seam used by workers; adapters bridge plugin archive
/// handlers onto it.
pub trait OpArchiver: Send + Sync {
    fn pack(&self, archive: &Path, interior: &str, source: &Path) -> io::Result<()>;
    fn unpack(&self, archive: &Path, dest: &Path) -> io::Result<()>;
}

#[derive(Clone)]
pub struct OperationOptions {
    /// Target-name mask applied when composing target names.
    pub mask: String,
    /// Ask before clobbering an existing target.
    pub overwrite_prompts: bool,
    /// Separate prompt before overwriting system or hidden files.
    pub confirm_system_hidden: bool,
    pub attr: Option<AttrChange>,
    pub archiver: Option<Arc<dyn OpArchiver>>,
}

impl Default for OperationOptions {
    fn default() -> Self {
        Self {
            mask: "*.*".to_string(),
            overwrite_prompts: true,
            confirm_system_hidden: true,
            attr: None,
            archiver: None,
        }
    }
}

impl std::fmt::Debug for OperationOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationOptions")
            .field("mask", &self.mask)
            .field("overwrite_prompts", &self.overwrite_prompts)
            .field("confirm_system_hidden", &self.confirm_system_hidden)
            .field("attr", &self.attr)
            .field("has_archiver", &self.archiver.is_some())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Operation {
    pub kind: OpKind,
    pub sources: Vec<PathBuf>,
    /// Target directory for Copy/Move/Unpack, archive file for Pack, absent
    /// for Delete/Attr.
    pub target: Option<PathBuf>,
    pub options: OperationOptions,
}

impl Operation {
    pub fn copy(sources: Vec<PathBuf>, target: PathBuf) -> Self {
        Self {
            kind: OpKind::Copy,
            sources,
            target: Some(target),
            options: OperationOptions::default(),
        }
    }

    pub fn move_to(sources: Vec<PathBuf>, target: PathBuf) -> Self {
        Self {
            kind: OpKind::Move,
            sources,
            target: Some(target),
            options: OperationOptions::default(),
        }
    }

    pub fn delete(sources: Vec<PathBuf>) -> Self {
        Self {
            kind: OpKind::Delete,
            sources,
            target: None,
            options: OperationOptions::default(),
        }
    }
}

/// Published by workers at bounded intervals.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperationProgress {
    pub bytes_done: u64,
    pub bytes_total: u64,
    pub current_name: String,
    pub eta_seconds: Option<u64>,
}

/// Terminal accounting for one operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationOutcome {
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub aborted: bool,
    pub bytes_done: u64,
    /// Source the user asked to focus from a name-too-long dialog.
    pub focus_request: Option<PathBuf>,
}

impl OperationOutcome {
    /// `CompletedWithSkips { count }` verdict: ran to the end, some entries
    /// skipped.
    pub fn completed_with_skips(&self) -> Option<usize> {
        (!self.aborted && self.skipped > 0).then_some(self.skipped)
    }
}
