//! The contract between the core and virtual file systems.
//!
//! Providers sit behind a capability-set interface; instances are owned by
//! the registry and addressed by id, so a provider keeps its per-instance
//! state keyed by [`FsInstanceId`]. Every callback runs on the engine loop
//! and must not block beyond short intervals.

use crate::{error::FsError, fs::listing::ListingEntry};

/// Registry-issued instance handle. Panels hold these weakly and resolve
/// them through the registry at each use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FsInstanceId(pub(crate) u64);

/// Events delivered to a provider for one of its instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsEvent {
    PathChanged,
    ActivateRefresh,
    /// One-shot timer firing; carries the user data it was armed with.
    Timer(u64),
    ClosedInPanel,
    Detached,
    Attached,
}

/// Why a path change is being requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangePathMode {
    UserEntry,
    Refresh,
    Shorten,
}

/// Outcome of a provider path change.
#[derive(Debug, Clone, Default)]
pub struct FsChangeOutcome {
    pub ok: bool,
    /// Path the provider actually reached, when it stripped trailing
    /// components of an inaccessible target.
    pub shortened: Option<String>,
    pub error: Option<String>,
}

impl FsChangeOutcome {
    pub fn ok() -> Self {
        Self {
            ok: true,
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            shortened: None,
            error: Some(error.into()),
        }
    }
}

/// A virtual file system provider.
pub trait PluginFsProvider: Send {
    /// FS names this provider owns.
    fn fs_names(&self) -> Vec<String>;

    /// Called when the registry creates an instance for this provider.
    fn open(&mut self, _instance: FsInstanceId, _fs_name: &str) {}

    /// Whether `fs_name:user_part` is reachable — on the given open
    /// instance when one is passed, or by this provider at all otherwise.
    fn is_our_path(&self, instance: Option<FsInstanceId>, fs_name: &str, user_part: &str) -> bool;

    /// Canonicalize a user-typed path into the provider's internal form.
    fn convert_path_to_internal(&self, _fs_name: &str, user_part: &str) -> String {
        user_part.to_string()
    }

    fn change_path(
        &mut self,
        instance: FsInstanceId,
        new_user_part: &str,
        mode: ChangePathMode,
    ) -> FsChangeOutcome;

    fn list_current(&mut self, instance: FsInstanceId) -> Result<Vec<ListingEntry>, FsError>;

    fn event(&mut self, _instance: FsInstanceId, _event: FsEvent) {}

    /// Closure probe. With `force` the instance must release its resources;
    /// without it the provider may refuse (unsaved state).
    fn try_close(&mut self, instance: FsInstanceId, force: bool) -> bool;
}

/// Archive-format handler contributed by a plugin.
pub trait ArchiverProvider: Send {
    /// Extensions handled, lowercase without the dot.
    fn extensions(&self) -> Vec<String>;

    fn list(
        &self,
        container: &std::path::Path,
        interior: &str,
    ) -> Result<Vec<ListingEntry>, FsError>;
}

/// Menu item contributed by a plugin, dispatched by id at idle.
#[derive(Debug, Clone)]
pub struct MenuExtension {
    pub id: u32,
    pub title: String,
}

/// Configuration callbacks: a plugin's opaque blob lives under its subkey
/// of the store; the core never interprets it.
pub trait PluginConfigIo: Send {
    fn load(&mut self, blob: &toml::Table);
    fn save(&self) -> toml::Table;
}

/// Everything a plugin registers with the core.
pub struct PluginRecord {
    pub plugin_name: String,
    pub load_on_start: bool,
    pub fs_provider: Option<Box<dyn PluginFsProvider>>,
    pub archiver: Option<Box<dyn ArchiverProvider>>,
    pub menu_extensions: Vec<MenuExtension>,
    pub icon_overlays: bool,
    pub config_io: Option<Box<dyn PluginConfigIo>>,
}

impl PluginRecord {
    pub fn named(plugin_name: impl Into<String>) -> Self {
        Self {
            plugin_name: plugin_name.into(),
            load_on_start: false,
            fs_provider: None,
            archiver: None,
            menu_extensions: Vec::new(),
            icon_overlays: false,
            config_io: None,
        }
    }

    pub fn with_fs(mut self, provider: Box<dyn PluginFsProvider>) -> Self {
        self.fs_provider = Some(provider);
        self
    }

    pub fn with_archiver(mut self, archiver: Box<dyn ArchiverProvider>) -> Self {
        self.archiver = Some(archiver);
        self
    }
}
