//! Registry of loaded plugin providers and the lifecycle of their FS
//! instances: creation, detach/attach, one-shot timers, and closure.
//!
//! The registry lives on the engine loop and has no internal locking.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::{
    error::FsError,
    fs::listing::ListingEntry,
    path::engine_path::eq_ci,
    vfs::provider::{
        ArchiverProvider, ChangePathMode, FsChangeOutcome, FsEvent, FsInstanceId, PluginRecord,
    },
};

/// A live plugin-FS instance. Exclusively owned by the registry; panels hold
/// the id only.
#[derive(Debug)]
pub struct FsInstance {
    pub id: FsInstanceId,
    pub fs_name: String,
    pub current_path: String,
    pub opened_at: Instant,
    /// Detached instances live on here until explicitly closed.
    pub attached: bool,
    plugin_index: usize,
}

struct FsTimer {
    instance: FsInstanceId,
    due: Instant,
    user_data: u64,
}

#[derive(Default)]
pub struct PluginFsRegistry {
    plugins: Vec<PluginRecord>,
    instances: Vec<FsInstance>,
    timers: Vec<FsTimer>,
    next_id: u64,
}

impl PluginFsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, record: PluginRecord) {
        info!(plugin = %record.plugin_name, "plugin registered");
        self.plugins.push(record);
    }

    pub fn plugin_names(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.plugin_name.as_str()).collect()
    }

    fn plugin_index_for(&self, fs_name: &str) -> Option<usize> {
        self.plugins.iter().position(|p| {
            p.fs_provider
                .as_ref()
                .is_some_and(|f| f.fs_names().iter().any(|n| eq_ci(n, fs_name)))
        })
    }

    pub fn has_provider(&self, fs_name: &str) -> bool {
        self.plugin_index_for(fs_name).is_some()
    }

    /// Run a user-typed path through the owning provider's canonicalizer.
    pub fn convert_path_to_internal(&self, fs_name: &str, user_part: &str) -> String {
        match self.plugin_index_for(fs_name) {
            Some(i) => self.plugins[i]
                .fs_provider
                .as_ref()
                .map(|p| p.convert_path_to_internal(fs_name, user_part))
                .unwrap_or_else(|| user_part.to_string()),
            None => user_part.to_string(),
        }
    }

    /// Archive handler for an extension, searched across plugins.
    pub fn archiver_for(&self, extension: &str) -> Option<&dyn ArchiverProvider> {
        self.plugins
            .iter()
            .filter_map(|p| p.archiver.as_deref())
            .find(|a| a.extensions().iter().any(|e| eq_ci(e, extension)))
    }

    pub fn instance(&self, id: FsInstanceId) -> Option<&FsInstance> {
        self.instances.iter().find(|i| i.id == id)
    }

    fn instance_mut(&mut self, id: FsInstanceId) -> Option<&mut FsInstance> {
        self.instances.iter_mut().find(|i| i.id == id)
    }

    /// Create a fresh instance for `fs_name`.
    pub fn open_instance(&mut self, fs_name: &str) -> Result<FsInstanceId, FsError> {
        let plugin_index = self
            .plugin_index_for(fs_name)
            .ok_or_else(|| FsError::NoSuchPlugin(fs_name.to_string()))?;
        self.next_id += 1;
        let id = FsInstanceId(self.next_id);
        self.instances.push(FsInstance {
            id,
            fs_name: fs_name.to_string(),
            current_path: String::new(),
            opened_at: Instant::now(),
            attached: true,
            plugin_index,
        });
        if let Some(provider) = self.plugins[plugin_index].fs_provider.as_mut() {
            provider.open(id, fs_name);
        }
        debug!(fs = fs_name, id = ?id, "plugin-fs instance opened");
        Ok(id)
    }

    /// `is_our_path` probe on a specific open instance.
    pub fn is_our_path(&self, id: FsInstanceId, fs_name: &str, user_part: &str) -> bool {
        let Some(instance) = self.instance(id) else {
            return false;
        };
        if !eq_ci(&instance.fs_name, fs_name) {
            return false;
        }
        self.plugins[instance.plugin_index]
            .fs_provider
            .as_ref()
            .is_some_and(|p| p.is_our_path(Some(id), fs_name, user_part))
    }

    pub fn change_path(
        &mut self,
        id: FsInstanceId,
        new_user_part: &str,
        mode: ChangePathMode,
    ) -> FsChangeOutcome {
        let Some(plugin_index) = self.instance(id).map(|i| i.plugin_index) else {
            return FsChangeOutcome::failed("instance is gone");
        };
        let Some(provider) = self.plugins[plugin_index].fs_provider.as_mut() else {
            return FsChangeOutcome::failed("provider is gone");
        };
        let outcome = provider.change_path(id, new_user_part, mode);
        if outcome.ok {
            let reached = outcome
                .shortened
                .clone()
                .unwrap_or_else(|| new_user_part.to_string());
            if let Some(instance) = self.instance_mut(id) {
                instance.current_path = reached;
            }
            self.send_event(id, FsEvent::PathChanged);
        }
        outcome
    }

    pub fn list_current(&mut self, id: FsInstanceId) -> Result<Vec<ListingEntry>, FsError> {
        let plugin_index = self
            .instance(id)
            .map(|i| i.plugin_index)
            .ok_or_else(|| FsError::Listing("instance is gone".to_string()))?;
        let provider = self.plugins[plugin_index]
            .fs_provider
            .as_mut()
            .ok_or_else(|| FsError::Listing("provider is gone".to_string()))?;
        provider.list_current(id)
    }

    pub fn send_event(&mut self, id: FsInstanceId, event: FsEvent) {
        let Some(plugin_index) = self.instance(id).map(|i| i.plugin_index) else {
            return;
        };
        if let Some(provider) = self.plugins[plugin_index].fs_provider.as_mut() {
            provider.event(id, event);
        }
    }

    /// Release an instance from its panel without closing it.
    pub fn detach(&mut self, id: FsInstanceId) {
        if let Some(instance) = self.instance_mut(id) {
            instance.attached = false;
        }
        self.send_event(id, FsEvent::Detached);
    }

    /// Hand a detached instance back to a panel.
    pub fn attach(&mut self, id: FsInstanceId) {
        if let Some(instance) = self.instance_mut(id) {
            instance.attached = true;
        }
        self.send_event(id, FsEvent::Attached);
    }

    /// Look for a detached instance of the same provider that can reach
    /// `fs_name:user_part`.
    pub fn find_detached(&self, fs_name: &str, user_part: &str) -> Option<FsInstanceId> {
        self.instances
            .iter()
            .filter(|i| !i.attached && eq_ci(&i.fs_name, fs_name))
            .map(|i| i.id)
            .find(|id| self.is_our_path(*id, fs_name, user_part))
    }

    pub fn detached_ids(&self) -> Vec<FsInstanceId> {
        self.instances
            .iter()
            .filter(|i| !i.attached)
            .map(|i| i.id)
            .collect()
    }

    /// Closure probe. On success the instance and all its timers are gone.
    pub fn close_instance(&mut self, id: FsInstanceId, force: bool) -> bool {
        let Some(plugin_index) = self.instance(id).map(|i| i.plugin_index) else {
            return true;
        };
        let closed = match self.plugins[plugin_index].fs_provider.as_mut() {
            Some(provider) => provider.try_close(id, force),
            None => true,
        };
        if closed || force {
            self.timers.retain(|t| t.instance != id);
            self.instances.retain(|i| i.id != id);
            debug!(id = ?id, "plugin-fs instance closed");
        } else {
            warn!(id = ?id, "plugin refused close");
        }
        closed || force
    }

    /// Hand every plugin its opaque configuration blob.
    pub fn load_plugin_configs(&mut self, blobs: &toml::Table) {
        for record in &mut self.plugins {
            if let (Some(io), Some(toml::Value::Table(blob))) =
                (record.config_io.as_mut(), blobs.get(&record.plugin_name))
            {
                io.load(blob);
            }
        }
    }

    /// Collect every plugin's blob for persistence.
    pub fn save_plugin_configs(&self, blobs: &mut toml::Table) {
        for record in &self.plugins {
            if let Some(io) = &record.config_io {
                blobs.insert(
                    record.plugin_name.clone(),
                    toml::Value::Table(io.save()),
                );
            }
        }
    }

    /// Unload a plugin's capabilities. Refused while any of its instances
    /// is alive; the record itself stays so instance indices remain valid.
    pub fn unload_plugin(&mut self, plugin_name: &str) -> bool {
        let Some(index) = self
            .plugins
            .iter()
            .position(|p| eq_ci(&p.plugin_name, plugin_name))
        else {
            return false;
        };
        if self.instances.iter().any(|i| i.plugin_index == index) {
            warn!(plugin = plugin_name, "unload refused, instances alive");
            return false;
        }
        let record = &mut self.plugins[index];
        record.fs_provider = None;
        record.archiver = None;
        record.menu_extensions.clear();
        record.config_io = None;
        info!(plugin = plugin_name, "plugin unloaded");
        true
    }

    /// Cache key of an instance's current path: `fsname:userpart`.
    pub fn fingerprint(&self, id: FsInstanceId) -> Option<String> {
        self.instance(id)
            .map(|i| format!("{}:{}", i.fs_name, i.current_path))
    }

    /// Arm a one-shot timer with integer user data.
    pub fn add_timer(&mut self, id: FsInstanceId, delay: Duration, user_data: u64) {
        if self.instance(id).is_none() {
            return;
        }
        self.timers.push(FsTimer {
            instance: id,
            due: Instant::now() + delay,
            user_data,
        });
    }

    /// Earliest pending timer deadline, for the engine loop's sleep.
    pub fn next_timer_due(&self) -> Option<Instant> {
        self.timers.iter().map(|t| t.due).min()
    }

    /// Fire every due timer exactly once and remove it.
    pub fn fire_due_timers(&mut self, now: Instant) -> usize {
        let mut fired = Vec::new();
        self.timers.retain(|t| {
            if t.due <= now {
                fired.push((t.instance, t.user_data));
                false
            } else {
                true
            }
        });
        let count = fired.len();
        for (id, user_data) in fired {
            self.send_event(id, FsEvent::Timer(user_data));
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::provider::PluginFsProvider;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    /// Provider that reaches any path under a fixed host prefix and records
    /// the events it sees.
    struct EchoFs {
        name: String,
        paths: HashMap<u64, String>,
        refuse_close: bool,
        events: Arc<Mutex<Vec<(u64, FsEvent)>>>,
    }

    impl EchoFs {
        fn new(name: &str, events: Arc<Mutex<Vec<(u64, FsEvent)>>>) -> Self {
            Self {
                name: name.to_string(),
                paths: HashMap::new(),
                refuse_close: false,
                events,
            }
        }
    }

    impl PluginFsProvider for EchoFs {
        fn fs_names(&self) -> Vec<String> {
            vec![self.name.clone()]
        }

        fn open(&mut self, instance: FsInstanceId, _fs_name: &str) {
            self.paths.insert(instance.0, String::new());
        }

        fn is_our_path(
            &self,
            _instance: Option<FsInstanceId>,
            fs_name: &str,
            _user_part: &str,
        ) -> bool {
            fs_name.eq_ignore_ascii_case(&self.name)
        }

        fn change_path(
            &mut self,
            instance: FsInstanceId,
            new_user_part: &str,
            _mode: ChangePathMode,
        ) -> FsChangeOutcome {
            self.paths.insert(instance.0, new_user_part.to_string());
            FsChangeOutcome::ok()
        }

        fn list_current(&mut self, instance: FsInstanceId) -> Result<Vec<ListingEntry>, FsError> {
            let _ = instance;
            Ok(vec![ListingEntry::dir("remote")])
        }

        fn event(&mut self, instance: FsInstanceId, event: FsEvent) {
            self.events.lock().unwrap().push((instance.0, event));
        }

        fn try_close(&mut self, instance: FsInstanceId, force: bool) -> bool {
            if self.refuse_close && !force {
                return false;
            }
            self.paths.remove(&instance.0);
            true
        }
    }

    fn registry_with_echo(events: Arc<Mutex<Vec<(u64, FsEvent)>>>) -> PluginFsRegistry {
        let mut registry = PluginFsRegistry::new();
        registry.register(
            PluginRecord::named("echo-plugin").with_fs(Box::new(EchoFs::new("ftp", events))),
        );
        registry
    }

    #[test]
    fn open_change_list_close() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut registry = registry_with_echo(events.clone());

        assert!(registry.has_provider("FTP"));
        assert!(matches!(
            registry.open_instance("sftp"),
            Err(FsError::NoSuchPlugin(_))
        ));

        let id = registry.open_instance("ftp").unwrap();
        let out = registry.change_path(id, "host/a", ChangePathMode::UserEntry);
        assert!(out.ok);
        assert_eq!(registry.instance(id).unwrap().current_path, "host/a");
        assert_eq!(registry.fingerprint(id).unwrap(), "ftp:host/a");
        assert_eq!(registry.list_current(id).unwrap().len(), 1);

        assert!(registry.close_instance(id, false));
        assert!(registry.instance(id).is_none());
    }

    #[test]
    fn detached_instances_are_found_and_reattached() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut registry = registry_with_echo(events.clone());
        let id = registry.open_instance("ftp").unwrap();
        registry.change_path(id, "host/a", ChangePathMode::UserEntry);

        registry.detach(id);
        assert_eq!(registry.detached_ids(), vec![id]);
        assert_eq!(registry.find_detached("ftp", "host/b"), Some(id));
        assert_eq!(registry.find_detached("sky", "x"), None);

        registry.attach(id);
        assert!(registry.find_detached("ftp", "host/b").is_none());

        let seen = events.lock().unwrap();
        assert!(seen.iter().any(|(_, e)| *e == FsEvent::Detached));
        assert!(seen.iter().any(|(_, e)| *e == FsEvent::Attached));
    }

    #[test]
    fn refused_close_keeps_instance_until_forced() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut registry = PluginFsRegistry::new();
        let mut fs = EchoFs::new("ftp", events);
        fs.refuse_close = true;
        registry.register(PluginRecord::named("echo-plugin").with_fs(Box::new(fs)));

        let id = registry.open_instance("ftp").unwrap();
        assert!(!registry.close_instance(id, false));
        assert!(registry.instance(id).is_some());
        assert!(registry.close_instance(id, true));
        assert!(registry.instance(id).is_none());
    }

    #[test]
    fn timers_fire_once_and_die_with_instance() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut registry = registry_with_echo(events.clone());
        let id = registry.open_instance("ftp").unwrap();

        registry.add_timer(id, Duration::from_millis(0), 7);
        registry.add_timer(id, Duration::from_secs(3600), 8);
        assert!(registry.next_timer_due().is_some());

        let fired = registry.fire_due_timers(Instant::now() + Duration::from_millis(1));
        assert_eq!(fired, 1);
        assert_eq!(
            registry.fire_due_timers(Instant::now() + Duration::from_millis(1)),
            0,
            "a timer fires at most once"
        );
        assert!(events
            .lock()
            .unwrap()
            .iter()
            .any(|(_, e)| *e == FsEvent::Timer(7)));

        // Closing cancels the remaining timer.
        registry.close_instance(id, true);
        assert!(registry.next_timer_due().is_none());
    }
}
