//! Listing source for disk and UNC paths.

use std::time::SystemTime;

use chrono::{DateTime, Local};
use tracing::warn;

use crate::{
    error::FsError,
    fs::listing::{FileAttrs, ListingEntry},
    path::{
        engine_path::EnginePath,
        probe::{PathProbe, Probe},
    },
};

/// Everything the panel engine needs from the real filesystem.
pub trait DiskSource: PathProbe {
    fn list_dir(&self, path: &EnginePath) -> Result<Vec<ListingEntry>, FsError>;

    /// Modification stamp of an archive container file, for staleness checks.
    fn container_stamp(&self, container: &EnginePath) -> Option<(SystemTime, u64)>;

    /// First local fixed drive, the final fallback of the rescue chain.
    fn first_fixed_drive(&self) -> Option<char>;

    /// Attempt to re-establish a network connection to a server. Default:
    /// nothing to do.
    fn reconnect_network(&self, _server: &str) -> bool {
        false
    }
}

/// Live-filesystem source.
#[derive(Debug, Default)]
pub struct StdDiskSource;

impl PathProbe for StdDiskSource {
    fn probe(&self, path: &EnginePath) -> Probe {
        let Some(native) = path.to_native() else {
            return Probe::Missing;
        };
        match std::fs::metadata(&native) {
            Ok(meta) if meta.is_dir() => Probe::Dir,
            Ok(_) => Probe::File,
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => Probe::Denied,
            Err(_) => Probe::Missing,
        }
    }
}

impl DiskSource for StdDiskSource {
    fn list_dir(&self, path: &EnginePath) -> Result<Vec<ListingEntry>, FsError> {
        let native = path
            .to_native()
            .ok_or_else(|| FsError::not_accessible(path.to_string()))?;
        let read = std::fs::read_dir(&native)
            .map_err(|e| FsError::not_accessible_io(path.to_string(), e))?;

        let mut entries = Vec::with_capacity(256);
        for dirent in read {
            let dirent = match dirent {
                Ok(d) => d,
                Err(e) => {
                    warn!(path = %path, error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            let name = dirent.file_name().to_string_lossy().into_owned();
            let meta = dirent.metadata().ok();
            let is_dir = meta.as_ref().is_some_and(|m| m.is_dir());
            let modified: Option<DateTime<Local>> = meta
                .as_ref()
                .and_then(|m| m.modified().ok())
                .map(DateTime::<Local>::from);
            entries.push(ListingEntry {
                name: name.into(),
                is_dir,
                size: meta.as_ref().map(|m| if is_dir { 0 } else { m.len() }),
                modified,
                attrs: meta.as_ref().map(|m| FileAttrs {
                    read_only: m.permissions().readonly(),
                    hidden: false,
                    system: false,
                    directory: is_dir,
                    reparse_point: m.file_type().is_symlink(),
                }),
                icon_index: None,
                plugin_data: None,
            });
        }
        Ok(entries)
    }

    fn container_stamp(&self, container: &EnginePath) -> Option<(SystemTime, u64)> {
        let native = container.to_native()?;
        let meta = std::fs::metadata(&native).ok()?;
        Some((meta.modified().ok()?, meta.len()))
    }

    fn first_fixed_drive(&self) -> Option<char> {
        ('C'..='Z').find(|l| std::path::Path::new(&format!("{l}:\\")).is_dir())
    }
}

#[cfg(test)]
mod mem_source {
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    use super::DiskSource;
    use crate::{
        error::FsError,
        fs::listing::ListingEntry,
        path::{engine_path::EnginePath, probe::mem::MemTree, probe::Probe},
    };

    impl DiskSource for MemTree {
        fn list_dir(&self, path: &EnginePath) -> Result<Vec<ListingEntry>, FsError> {
            match self.probe_str(&path.to_string()) {
                Probe::Dir => Ok(self
                    .children(&path.to_string())
                    .into_iter()
                    .map(|n| {
                        if n.is_dir {
                            ListingEntry::dir(n.name)
                        } else {
                            ListingEntry::file(n.name, n.size)
                        }
                    })
                    .collect()),
                Probe::Denied => Err(FsError::not_accessible(path.to_string())),
                _ => Err(FsError::not_accessible(path.to_string())),
            }
        }

        fn container_stamp(&self, container: &EnginePath) -> Option<(SystemTime, u64)> {
            match self.probe_str(&container.to_string()) {
                Probe::File => {
                    // Stamp derived from size so tests can dirty a container
                    // by rewriting it with a different size.
                    let size = self.file_size(&container.to_string()).unwrap_or_default();
                    Some((UNIX_EPOCH + Duration::from_secs(size), size))
                }
                _ => None,
            }
        }

        fn first_fixed_drive(&self) -> Option<char> {
            ('C'..='Z').find(|l| self.probe_str(&format!("{l}:\\")) == Probe::Dir)
        }
    }
}
