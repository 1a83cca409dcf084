//! Filesystem change notifications for panels.
//!
//! One watcher serves both panels; raw notifications are posted to the
//! engine loop, which debounces them into refreshes (see
//! [`crate::util::debounce::RefreshDebounce`]).

use std::path::PathBuf;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use crate::{panel::state::PanelSide, path::engine_path::EnginePath};

/// Notification posted to the engine loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PanelChangeNotice {
    pub side: PanelSide,
}

/// Watches at most one directory per panel. Only Disk and UNC paths support
/// OS-level change notification; other kinds simply unwatch.
pub struct PanelWatcher {
    watcher: RecommendedWatcher,
    watched: Arc<Mutex<[Option<PathBuf>; 2]>>,
}

impl PanelWatcher {
    pub fn new(tx: UnboundedSender<PanelChangeNotice>) -> notify::Result<Self> {
        let watched: Arc<Mutex<[Option<PathBuf>; 2]>> = Arc::new(Mutex::new([None, None]));
        let roots = Arc::clone(&watched);
        let watcher = notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
            let Ok(event) = event else { return };
            let roots = roots.lock();
            for side in [PanelSide::Left, PanelSide::Right] {
                let Some(root) = &roots[side.index()] else {
                    continue;
                };
                if event.paths.iter().any(|p| p.starts_with(root)) {
                    let _ = tx.send(PanelChangeNotice { side });
                }
            }
        })?;
        Ok(Self { watcher, watched })
    }

    /// Point the panel's watch at a new path; non-watchable kinds clear it.
    pub fn watch(&mut self, side: PanelSide, path: &EnginePath) {
        self.unwatch(side);
        let native = match path {
            EnginePath::Disk { .. } | EnginePath::Unc { .. } => match path.to_native() {
                Some(p) => p,
                None => return,
            },
            _ => return,
        };
        match self.watcher.watch(&native, RecursiveMode::NonRecursive) {
            Ok(()) => {
                debug!(side = ?side, path = %native.display(), "watching");
                self.watched.lock()[side.index()] = Some(native);
            }
            Err(e) => warn!(side = ?side, path = %native.display(), error = %e, "watch failed"),
        }
    }

    pub fn unwatch(&mut self, side: PanelSide) {
        if let Some(old) = self.watched.lock()[side.index()].take() {
            let _ = self.watcher.unwatch(&old);
        }
    }
}
