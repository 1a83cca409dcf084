//! Persistent configuration: a hierarchical TOML store under a
//! product-versioned root, probed newest to oldest with in-place migration.
//!
//! Plugins keep opaque blobs under `[plugins.<name>]`; the core never
//! interprets them.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use bytesize::ByteSize;
use directories::ProjectDirs;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::path::engine_path::{ArchiveAssoc, DriveDirs};

/// Known configuration roots, newest first. An older root found on load is
/// migrated in place and then deleted.
pub const CONFIG_VERSIONS: &[&str] = &["3.0", "2.5", "2.0"];

const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Total-bytes ceiling of the disk-cache workspace.
    pub ceiling_bytes: u64,
    /// Workspace directory; the OS temp directory when unset.
    pub workspace: Option<PathBuf>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ceiling_bytes: ByteSize::mib(512).as_u64(),
            workspace: None,
        }
    }
}

/// A user-assigned shortcut path addressable by index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HotPath {
    pub index: u8,
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub left_path: String,
    pub right_path: String,
    /// 0 = last used, 1 = left, 2 = right.
    pub active_panel: u8,
    pub drive_dirs: DriveDirs,
    pub single_instance: bool,
    pub show_splash: bool,
    pub rescue_path: String,
    pub archive_extensions: Vec<String>,
    pub hot_paths: Vec<HotPath>,
    pub icon_overlay_disabled: Vec<String>,
    /// Per-plugin password-manager opt-in.
    pub password_manager: FxHashMap<String, bool>,
    /// Window for collapsing change notifications into one panel refresh.
    #[serde(with = "humantime_serde")]
    pub refresh_debounce: Duration,
    pub cache: CacheSettings,
    /// Opaque per-plugin configuration blobs.
    pub plugins: toml::Table,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            left_path: "C:\\".to_string(),
            right_path: "C:\\".to_string(),
            active_panel: 0,
            drive_dirs: DriveDirs::default(),
            single_instance: false,
            show_splash: true,
            rescue_path: "C:\\".to_string(),
            archive_extensions: ["zip", "7z", "rar", "tar", "gz", "tgz", "cab", "jar", "iso"]
                .iter()
                .map(|e| (*e).to_string())
                .collect(),
            hot_paths: Vec::new(),
            icon_overlay_disabled: Vec::new(),
            password_manager: FxHashMap::default(),
            refresh_debounce: Duration::from_millis(200),
            cache: CacheSettings::default(),
            plugins: toml::Table::new(),
        }
    }
}

impl Config {
    pub fn archive_assoc(&self) -> ArchiveAssoc {
        ArchiveAssoc::new(self.archive_extensions.iter().cloned())
    }

    pub fn hot_path(&self, index: u8) -> Option<&str> {
        self.hot_paths
            .iter()
            .find(|h| h.index == index)
            .map(|h| h.path.as_str())
    }

    fn base_dir() -> anyhow::Result<PathBuf> {
        let dirs = ProjectDirs::from("", "", "dpfm")
            .ok_or_else(|| anyhow::anyhow!("no usable configuration directory"))?;
        Ok(dirs.config_dir().to_path_buf())
    }

    fn root_for(base: &Path, version: &str) -> PathBuf {
        base.join(version)
    }

    /// Load from the default base directory.
    pub async fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::base_dir()?).await
    }

    /// Probe versioned roots newest to oldest; migrate an older root in
    /// place and delete it. Parse failures merge with defaults like a
    /// missing file.
    pub async fn load_from(base: &Path) -> anyhow::Result<Self> {
        let newest = Self::root_for(base, CONFIG_VERSIONS[0]);
        let newest_file = newest.join(CONFIG_FILE);
        if newest_file.exists() {
            return Self::read_file(&newest_file).await;
        }

        for version in &CONFIG_VERSIONS[1..] {
            let old_root = Self::root_for(base, version);
            let old_file = old_root.join(CONFIG_FILE);
            if !old_file.exists() {
                continue;
            }
            info!(from = version, to = CONFIG_VERSIONS[0], "migrating configuration");
            let config = Self::read_file(&old_file).await?;
            config.save_to(base).await?;
            if let Err(e) = tokio::fs::remove_dir_all(&old_root).await {
                warn!(root = %old_root.display(), error = %e, "old configuration root not removed");
            }
            return Ok(config);
        }

        info!("no configuration found, writing defaults");
        let config = Config::default();
        config.save_to(base).await?;
        Ok(config)
    }

    /// Load a specific configuration file, bypassing the versioned roots.
    pub async fn load_file(path: &Path) -> anyhow::Result<Self> {
        Self::read_file(path).await
    }

    async fn read_file(path: &Path) -> anyhow::Result<Self> {
        let text = tokio::fs::read_to_string(path).await?;
        match toml::from_str::<Config>(&text) {
            Ok(config) => Ok(config),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "configuration unreadable, using defaults");
                Ok(Config::default())
            }
        }
    }

    pub async fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::base_dir()?).await
    }

    /// Durable save: write a sibling temp file, then swap it in.
    pub async fn save_to(&self, base: &Path) -> anyhow::Result<()> {
        let root = Self::root_for(base, CONFIG_VERSIONS[0]);
        tokio::fs::create_dir_all(&root).await?;
        let file = root.join(CONFIG_FILE);
        let tmp = root.join(format!("{CONFIG_FILE}.tmp"));
        let text = toml::to_string_pretty(self)?;
        tokio::fs::write(&tmp, &text).await?;
        tokio::fs::rename(&tmp, &file).await?;
        Ok(())
    }

    /// Critical-shutdown save: single direct write, no swap dance.
    pub fn save_abbreviated(&self, base: &Path) -> std::io::Result<()> {
        let root = Self::root_for(base, CONFIG_VERSIONS[0]);
        std::fs::create_dir_all(&root)?;
        let text = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(root.join(CONFIG_FILE), text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn save_load_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.left_path = "D:\\data".to_string();
        config.single_instance = true;
        config.drive_dirs.remember('D', "data\\sub");
        config
            .plugins
            .insert("ftp".to_string(), toml::Value::String("blob".to_string()));
        config.save_to(tmp.path()).await.unwrap();

        let loaded = Config::load_from(tmp.path()).await.unwrap();
        assert_eq!(loaded.left_path, "D:\\data");
        assert!(loaded.single_instance);
        assert_eq!(loaded.drive_dirs.get('d'), Some("data\\sub"));
        assert_eq!(
            loaded.plugins.get("ftp").and_then(|v| v.as_str()),
            Some("blob")
        );
    }

    #[tokio::test]
    async fn older_root_is_migrated_and_deleted() {
        let tmp = TempDir::new().unwrap();
        let old_root = tmp.path().join("2.0");
        std::fs::create_dir_all(&old_root).unwrap();
        let mut old = Config::default();
        old.rescue_path = "E:\\safe".to_string();
        std::fs::write(
            old_root.join(CONFIG_FILE),
            toml::to_string_pretty(&old).unwrap(),
        )
        .unwrap();

        let loaded = Config::load_from(tmp.path()).await.unwrap();
        assert_eq!(loaded.rescue_path, "E:\\safe");
        assert!(tmp.path().join("3.0").join(CONFIG_FILE).exists());
        assert!(!old_root.exists());
    }

    #[tokio::test]
    async fn unreadable_file_degrades_to_defaults() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("3.0");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join(CONFIG_FILE), "not = [valid").unwrap();
        let loaded = Config::load_from(tmp.path()).await.unwrap();
        assert_eq!(loaded.left_path, Config::default().left_path);
    }
}
