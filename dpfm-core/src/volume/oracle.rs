//! OS seam for volume-identity questions: subst tables, reparse points and
//! volume GUIDs. The resolver logic never touches OS primitives directly.

use crate::path::engine_path::EnginePath;

/// Kind of an on-disk redirection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    MountPoint,
    Junction,
    Symlink,
    Unknown,
}

/// A reparse point discovered at some path prefix.
#[derive(Debug, Clone)]
pub struct ReparseInfo {
    pub kind: LinkKind,
    /// Raw target path as stored in the reparse data.
    pub target: String,
}

pub trait VolumeOracle: Send + Sync {
    /// True target of a mapped (substituted) drive, if any.
    fn subst_target(&self, drive: char) -> Option<String>;

    /// Reparse data if `path` itself is a reparse point.
    fn reparse_point(&self, path: &EnginePath) -> Option<ReparseInfo>;

    /// Volume GUID path for a mount point.
    fn volume_guid(&self, mount_point: &EnginePath) -> Option<String>;

    /// Nearest mount point covering `path`.
    fn mount_point(&self, path: &EnginePath) -> Option<EnginePath>;
}

/// Best-effort oracle over the live filesystem. Symlinks are visible through
/// std; subst tables and volume GUIDs need platform facilities that are not
/// portably available, so those probes return `None` and callers degrade to
/// uncertain answers.
#[derive(Debug, Default)]
pub struct OsVolumeOracle;

impl VolumeOracle for OsVolumeOracle {
    fn subst_target(&self, _drive: char) -> Option<String> {
        None
    }

    fn reparse_point(&self, path: &EnginePath) -> Option<ReparseInfo> {
        let native = path.to_native()?;
        let meta = std::fs::symlink_metadata(&native).ok()?;
        if meta.file_type().is_symlink() {
            let target = std::fs::read_link(&native).ok()?;
            return Some(ReparseInfo {
                kind: LinkKind::Symlink,
                target: target.to_string_lossy().into_owned(),
            });
        }
        None
    }

    fn volume_guid(&self, _mount_point: &EnginePath) -> Option<String> {
        None
    }

    fn mount_point(&self, path: &EnginePath) -> Option<EnginePath> {
        match path {
            EnginePath::Disk { .. } | EnginePath::Unc { .. } => Some(path.root_of()),
            _ => None,
        }
    }
}

/// Table-driven oracle for tests.
#[cfg(test)]
pub mod map {
    use dashmap::DashMap;

    use super::{LinkKind, ReparseInfo, VolumeOracle};
    use crate::path::engine_path::EnginePath;

    #[derive(Debug, Default)]
    pub struct MapOracle {
        substs: DashMap<char, String>,
        reparses: DashMap<String, ReparseInfo>,
        guids: DashMap<String, String>,
        mounts: DashMap<String, String>,
    }

    fn key(path: &EnginePath) -> String {
        path.to_string().to_lowercase()
    }

    impl MapOracle {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn add_subst(&self, drive: char, target: &str) {
            self.substs.insert(drive.to_ascii_uppercase(), target.to_string());
        }

        pub fn add_reparse(&self, path: &str, kind: LinkKind, target: &str) {
            self.reparses.insert(
                path.to_lowercase(),
                ReparseInfo {
                    kind,
                    target: target.to_string(),
                },
            );
        }

        pub fn add_guid(&self, mount_point: &str, guid: &str) {
            self.guids
                .insert(mount_point.to_lowercase(), guid.to_string());
        }

        /// Override the nearest mount point for a path prefix.
        pub fn add_mount(&self, prefix: &str, mount_point: &str) {
            self.mounts
                .insert(prefix.to_lowercase(), mount_point.to_string());
        }
    }

    impl VolumeOracle for MapOracle {
        fn subst_target(&self, drive: char) -> Option<String> {
            self.substs
                .get(&drive.to_ascii_uppercase())
                .map(|t| t.clone())
        }

        fn reparse_point(&self, path: &EnginePath) -> Option<ReparseInfo> {
            self.reparses.get(&key(path)).map(|r| r.clone())
        }

        fn volume_guid(&self, mount_point: &EnginePath) -> Option<String> {
            self.guids.get(&key(mount_point)).map(|g| g.clone())
        }

        fn mount_point(&self, path: &EnginePath) -> Option<EnginePath> {
            let k = key(path);
            let best = self
                .mounts
                .iter()
                .filter(|e| k.starts_with(e.key().as_str()))
                .max_by_key(|e| e.key().len())
                .map(|e| e.value().clone());
            match best {
                Some(mp) => {
                    let archives = crate::path::engine_path::ArchiveAssoc::new(Vec::new());
                    EnginePath::parse(
                        &mp,
                        &crate::path::engine_path::ParseContext::bare(&archives),
                    )
                    .ok()
                }
                None => match path {
                    EnginePath::Disk { .. } | EnginePath::Unc { .. } => Some(path.root_of()),
                    _ => None,
                },
            }
        }
    }
}
