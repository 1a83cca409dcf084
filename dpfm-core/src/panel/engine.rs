//! The two panels' path-change protocol: classification, state closing,
//! accessibility fallback, archive and plugin-FS entry, refresh.

use smallvec::SmallVec;
use tracing::{debug, info, warn};

use crate::{
    cache::disk_cache::DiskCache,
    fs::{
        disk_source::DiskSource,
        listing::{Listing, ListingEntry},
    },
    panel::state::{PanelSide, PanelState},
    path::{
        engine_path::{eq_ci, ArchiveAssoc, DriveDirs, EnginePath, ParseContext},
        probe::Probe,
    },
    vfs::{
        provider::{ChangePathMode, FsEvent, FsInstanceId},
        registry::PluginFsRegistry,
    },
};

/// Outcome of a panel path change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangePathOutcome {
    /// The requested path is listed.
    Success,
    /// Parse or access failure with no shortened alternative.
    InvalidPath,
    /// Parsed to Archive but the container cannot be opened.
    InvalidArchive,
    /// The previous path refused to release.
    CannotClosePath,
    /// A prefix (or fallback) of the requested path is listed; suggested
    /// focus and top index do not apply.
    ShorterPath,
    /// The requested path was a file; its directory is listed and the file
    /// focused.
    FilenameFocused,
}

#[derive(Debug, Clone, Default)]
pub struct ChangePathOptions {
    pub suggested_top: Option<usize>,
    pub suggested_focus: Option<String>,
    /// Close archives unconditionally before re-entering.
    pub force_update: bool,
    /// Run plugin paths through the provider's canonicalizer.
    pub convert_to_internal: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RefreshOptions {
    pub force_refresh: bool,
    pub focus_first_new_item: bool,
}

/// Collaborators a path change needs, borrowed from the engine loop.
pub struct PanelEnv<'a> {
    pub disk: &'a dyn DiskSource,
    pub registry: &'a mut PluginFsRegistry,
    pub archives: &'a ArchiveAssoc,
    pub cache: Option<&'a DiskCache>,
    pub rescue_path: Option<&'a str>,
}

/// Both panels plus the cross-panel navigation memory.
pub struct PanelEngine {
    panels: [PanelState; 2],
    pub active: PanelSide,
    pub drive_dirs: DriveDirs,
}

impl PanelEngine {
    pub fn new(left: EnginePath, right: EnginePath) -> Self {
        Self {
            panels: [PanelState::new(left), PanelState::new(right)],
            active: PanelSide::Left,
            drive_dirs: DriveDirs::default(),
        }
    }

    pub fn panel(&self, side: PanelSide) -> &PanelState {
        &self.panels[side.index()]
    }

    pub fn panel_mut(&mut self, side: PanelSide) -> &mut PanelState {
        &mut self.panels[side.index()]
    }

    pub fn active_panel(&self) -> &PanelState {
        self.panel(self.active)
    }

    pub fn mark_working_dir_used(&mut self, side: PanelSide) {
        self.panels[side.index()].working_dir_used = true;
    }

    /// Change a panel's path. See [`ChangePathOutcome`] for the verdicts.
    pub fn change_path(
        &mut self,
        side: PanelSide,
        input: &str,
        opts: &ChangePathOptions,
        env: &mut PanelEnv<'_>,
    ) -> ChangePathOutcome {
        if self.panels[side.index()].changing {
            warn!(side = ?side, "path change while another is resolving");
            return ChangePathOutcome::InvalidPath;
        }
        self.panels[side.index()].changing = true;
        let outcome = self.change_path_inner(side, input, opts, env);
        self.panels[side.index()].changing = false;
        debug!(side = ?side, input, outcome = ?outcome, "path change finished");
        outcome
    }

    fn change_path_inner(
        &mut self,
        side: PanelSide,
        input: &str,
        opts: &ChangePathOptions,
        env: &mut PanelEnv<'_>,
    ) -> ChangePathOutcome {
        let parsed = {
            let panel = &self.panels[side.index()];
            let ctx = ParseContext {
                current: Some(&panel.path),
                drive_dirs: Some(&self.drive_dirs),
                archives: env.archives,
            };
            match EnginePath::parse(input, &ctx) {
                Ok(p) => p,
                Err(e) => {
                    info!(input, error = %e, "path rejected");
                    return ChangePathOutcome::InvalidPath;
                }
            }
        };

        let parsed = match parsed {
            EnginePath::PluginFs { fs_name, user_part } if opts.convert_to_internal => {
                let converted = env.registry.convert_path_to_internal(&fs_name, &user_part);
                EnginePath::PluginFs {
                    fs_name,
                    user_part: converted,
                }
            }
            other => other,
        };

        // Leaving a plugin-FS path for another kind needs the provider's
        // consent first.
        if !matches!(parsed, EnginePath::PluginFs { .. }) {
            if let Err(outcome) = self.close_plugin_state(side, env) {
                return outcome;
            }
        }
        self.close_archive_state(side, &parsed, opts.force_update, env);

        match parsed {
            EnginePath::Disk { .. } | EnginePath::Unc { .. } => {
                self.change_to_disk(side, parsed, opts, env, false)
            }
            EnginePath::Archive { .. } => self.change_to_archive(side, parsed, opts, env, false),
            EnginePath::PluginFs { fs_name, user_part } => {
                self.change_to_plugin(side, &fs_name, &user_part, opts, env, false)
            }
        }
    }

    /// Close the panel's plugin-FS instance, if any. Refusal wins.
    fn close_plugin_state(
        &mut self,
        side: PanelSide,
        env: &mut PanelEnv<'_>,
    ) -> Result<(), ChangePathOutcome> {
        let panel = &mut self.panels[side.index()];
        let Some(id) = panel.fs_instance else {
            return Ok(());
        };
        let fs_name = match &panel.path {
            EnginePath::PluginFs { fs_name, .. } => fs_name.clone(),
            _ => String::new(),
        };
        env.registry.send_event(id, FsEvent::ClosedInPanel);
        if !env.registry.close_instance(id, false) {
            warn!(side = ?side, "plugin refused to release the panel path");
            return Err(ChangePathOutcome::CannotClosePath);
        }
        panel.fs_instance = None;
        if let Some(cache) = env.cache {
            if !fs_name.is_empty() {
                cache.mark_root_out_of_date(&format!("{fs_name}:"));
            }
        }
        Ok(())
    }

    /// An archive closes when the target leaves it, when the container
    /// changed on disk (to pick up editor modifications), or on force.
    fn close_archive_state(
        &mut self,
        side: PanelSide,
        target: &EnginePath,
        force_update: bool,
        env: &PanelEnv<'_>,
    ) {
        let panel = &mut self.panels[side.index()];
        let EnginePath::Archive { container, .. } = &panel.path else {
            return;
        };
        let staying = matches!(
            target,
            EnginePath::Archive { container: c, .. } if c.same_path(container)
        );
        let stamp_changed = panel.archive_stamp != env.disk.container_stamp(container);
        if !staying || stamp_changed || force_update {
            panel.archive_stamp = None;
        }
    }

    fn change_to_disk(
        &mut self,
        side: PanelSide,
        target: EnginePath,
        opts: &ChangePathOptions,
        env: &mut PanelEnv<'_>,
        keep_focus: bool,
    ) -> ChangePathOutcome {
        let mut shortened = false;
        let mut filename_focus: Option<String> = None;
        let mut tried_reconnect = false;

        // Starting points of the fallback chain, in order: the target, the
        // last known-good directory, the rescue path, the first fixed drive.
        let mut starts: SmallVec<[(EnginePath, bool); 4]> = SmallVec::new();
        starts.push((target.clone(), false));
        if let Some(lg) = self.panels[side.index()].last_known_good.clone() {
            starts.push((lg, true));
        }
        if let Some(rescue) = env.rescue_path {
            if let Ok(p) = EnginePath::parse(rescue, &ParseContext::bare(env.archives)) {
                starts.push((p, true));
            }
        }
        if let Some(drive) = env.disk.first_fixed_drive() {
            starts.push((
                EnginePath::Disk {
                    root: drive,
                    tail: String::new(),
                },
                true,
            ));
        }

        for (start, counts_as_shortened) in starts {
            let mut cur = start;
            loop {
                let mut probe = env.disk.probe(&cur);
                if probe != Probe::Dir && !tried_reconnect {
                    if let EnginePath::Unc { server, .. } = &cur {
                        tried_reconnect = true;
                        if env.disk.reconnect_network(server) {
                            probe = env.disk.probe(&cur);
                        }
                    }
                }
                match probe {
                    Probe::Dir => {
                        match env.disk.list_dir(&cur) {
                            Ok(entries) => {
                                if counts_as_shortened {
                                    shortened = true;
                                }
                                return self.finish_disk(
                                    side,
                                    cur,
                                    entries,
                                    shortened,
                                    filename_focus,
                                    opts,
                                    keep_focus,
                                );
                            }
                            Err(e) => {
                                info!(path = %cur, error = %e, "listing failed, shortening");
                            }
                        }
                    }
                    Probe::File if cur.same_path(&target) => {
                        // The input named a file: list its directory and
                        // focus the file.
                        if let Ok((parent, name)) = cur.cut_last_segment() {
                            filename_focus = Some(name);
                            cur = parent;
                            continue;
                        }
                    }
                    _ => {}
                }
                match cur.cut_last_segment() {
                    Ok((parent, _)) => {
                        shortened = true;
                        cur = parent;
                    }
                    Err(_) => break,
                }
            }
        }
        ChangePathOutcome::InvalidPath
    }

    fn change_to_archive(
        &mut self,
        side: PanelSide,
        target: EnginePath,
        opts: &ChangePathOptions,
        env: &mut PanelEnv<'_>,
        keep_focus: bool,
    ) -> ChangePathOutcome {
        let EnginePath::Archive {
            container,
            interior,
        } = target
        else {
            return ChangePathOutcome::InvalidPath;
        };

        if env.disk.probe(&container) != Probe::File {
            return ChangePathOutcome::InvalidArchive;
        }
        let extension = container
            .segments()
            .last()
            .and_then(|s| s.rsplit_once('.'))
            .map(|(_, e)| e.to_string())
            .unwrap_or_default();
        let Some(native) = container.to_native() else {
            return ChangePathOutcome::InvalidArchive;
        };
        let stamp = env.disk.container_stamp(&container);

        let mut interior_cur = interior;
        let mut shortened = false;
        loop {
            let listed = match env.registry.archiver_for(&extension) {
                Some(archiver) => archiver.list(&native, &interior_cur),
                None => return ChangePathOutcome::InvalidArchive,
            };
            match listed {
                Ok(entries) => {
                    let path = EnginePath::Archive {
                        container: Box::new((*container).clone()),
                        interior: interior_cur,
                    };
                    let outcome =
                        self.finish_disk(side, path, entries, shortened, None, opts, keep_focus);
                    self.panels[side.index()].archive_stamp = stamp;
                    return outcome;
                }
                Err(e) => {
                    if interior_cur.is_empty() {
                        info!(container = %container, error = %e, "archive root unlistable");
                        return ChangePathOutcome::InvalidArchive;
                    }
                    shortened = true;
                    interior_cur = match interior_cur.rsplit_once('\\') {
                        Some((parent, _)) => parent.to_string(),
                        None => String::new(),
                    };
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn change_to_plugin(
        &mut self,
        side: PanelSide,
        fs_name: &str,
        requested: &str,
        opts: &ChangePathOptions,
        env: &mut PanelEnv<'_>,
        keep_focus: bool,
    ) -> ChangePathOutcome {
        // Step 1: reuse the current instance when the provider can reach
        // the new path on it.
        let mut reuse = false;
        let mut instance: Option<FsInstanceId> = None;
        let mut previous_path: Option<String> = None;
        {
            let panel = &self.panels[side.index()];
            if let (EnginePath::PluginFs { fs_name: cur_fs, user_part }, Some(id)) =
                (&panel.path, panel.fs_instance)
            {
                previous_path = Some(user_part.clone());
                if eq_ci(cur_fs, fs_name) && env.registry.is_our_path(id, fs_name, requested) {
                    reuse = true;
                    instance = Some(id);
                }
            }
        }
        if !reuse {
            if let Err(outcome) = self.close_plugin_state(side, env) {
                return outcome;
            }
        }

        // Step 2: a detached instance of the same provider.
        if instance.is_none() {
            if let Some(id) = env.registry.find_detached(fs_name, requested) {
                env.registry.attach(id);
                instance = Some(id);
            }
        }

        // Step 3: a fresh instance.
        let id = match instance {
            Some(id) => id,
            None => match env.registry.open_instance(fs_name) {
                Ok(id) => id,
                Err(e) => {
                    info!(fs = fs_name, error = %e, "no provider");
                    return ChangePathOutcome::InvalidPath;
                }
            },
        };

        // Step 4: change path, then list; shorten on listing failure until
        // the root is reached.
        let out = env
            .registry
            .change_path(id, requested, ChangePathMode::UserEntry);
        if !out.ok {
            if !reuse {
                env.registry.close_instance(id, true);
            }
            return ChangePathOutcome::InvalidPath;
        }
        let mut current = out.shortened.clone().unwrap_or_else(|| requested.to_string());
        let mut shortened = out.shortened.is_some();

        loop {
            match env.registry.list_current(id) {
                Ok(entries) => {
                    return self.finish_plugin(
                        side, fs_name, current, id, entries, shortened, opts, keep_focus,
                    );
                }
                Err(e) => {
                    debug!(fs = fs_name, path = %current, error = %e, "plugin listing failed");
                    let Some(parent) = cut_user_part(&current) else {
                        break;
                    };
                    shortened = true;
                    let out = env
                        .registry
                        .change_path(id, &parent, ChangePathMode::Shorten);
                    if !out.ok {
                        break;
                    }
                    current = out.shortened.unwrap_or(parent);
                }
            }
        }

        // Step 5: restore the previous path before declaring failure, when
        // the original instance was reused.
        if reuse {
            if let Some(prev) = previous_path {
                let out = env
                    .registry
                    .change_path(id, &prev, ChangePathMode::UserEntry);
                if out.ok {
                    if let Ok(entries) = env.registry.list_current(id) {
                        info!(fs = fs_name, path = %prev, "restored previous plugin path");
                        return self
                            .finish_plugin(side, fs_name, prev, id, entries, true, opts, keep_focus);
                    }
                }
            }
        }

        env.registry.close_instance(id, true);
        self.panels[side.index()].fs_instance = None;
        if let Some(cache) = env.cache {
            cache.mark_root_out_of_date(&format!("{fs_name}:"));
        }
        // Even the root failed: fall back through the rescue chain.
        self.rescue_chain(side, opts, env, keep_focus)
    }

    /// Rescue path, then first fixed drive. Anything reached this way is a
    /// `ShorterPath` verdict.
    fn rescue_chain(
        &mut self,
        side: PanelSide,
        opts: &ChangePathOptions,
        env: &mut PanelEnv<'_>,
        keep_focus: bool,
    ) -> ChangePathOutcome {
        if let Some(rescue) = env.rescue_path {
            if let Ok(p) = EnginePath::parse(rescue, &ParseContext::bare(env.archives)) {
                if env.disk.probe(&p) == Probe::Dir {
                    if let Ok(entries) = env.disk.list_dir(&p) {
                        return self.finish_disk(side, p, entries, true, None, opts, keep_focus);
                    }
                }
            }
        }
        if let Some(drive) = env.disk.first_fixed_drive() {
            let p = EnginePath::Disk {
                root: drive,
                tail: String::new(),
            };
            if let Ok(entries) = env.disk.list_dir(&p) {
                return self.finish_disk(side, p, entries, true, None, opts, keep_focus);
            }
        }
        ChangePathOutcome::InvalidPath
    }

    #[allow(clippy::too_many_arguments)]
    fn finish_disk(
        &mut self,
        side: PanelSide,
        path: EnginePath,
        entries: Vec<ListingEntry>,
        shortened: bool,
        filename_focus: Option<String>,
        opts: &ChangePathOptions,
        keep_focus: bool,
    ) -> ChangePathOutcome {
        let panel = &mut self.panels[side.index()];
        let listing = Listing::build(entries, panel.sort, panel.filter.as_ref());

        let leaving = !panel.path.same_path(&path);
        if panel.working_dir_used && leaving {
            let old = panel.path.clone();
            panel.push_history(old);
            panel.working_dir_used = false;
        }

        panel.path = path.clone();
        if !matches!(path, EnginePath::Archive { .. }) {
            panel.archive_stamp = None;
        }
        panel.fs_instance = None;
        if !keep_focus {
            // Focus defaults to the first entry after a path change; only a
            // refresh keeps it, by name.
            panel.focused = None;
        }
        panel.install_listing(listing);

        if !shortened {
            if let Some(focus) = &opts.suggested_focus {
                panel.focus(focus);
            }
            if let Some(name) = &filename_focus {
                panel.focus(name);
            }
            if let Some(top) = opts.suggested_top {
                panel.top_index = top.min(panel.listing.len().saturating_sub(1));
            }
        }

        match &path {
            EnginePath::Disk { root, tail } => {
                self.drive_dirs.remember(*root, tail);
                self.panels[side.index()].last_known_good = Some(path.clone());
            }
            EnginePath::Unc { .. } => {
                self.panels[side.index()].last_known_good = Some(path.clone());
            }
            _ => {}
        }

        if shortened {
            ChangePathOutcome::ShorterPath
        } else if filename_focus.is_some() {
            ChangePathOutcome::FilenameFocused
        } else {
            ChangePathOutcome::Success
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn finish_plugin(
        &mut self,
        side: PanelSide,
        fs_name: &str,
        user_part: String,
        id: FsInstanceId,
        entries: Vec<ListingEntry>,
        shortened: bool,
        opts: &ChangePathOptions,
        keep_focus: bool,
    ) -> ChangePathOutcome {
        let panel = &mut self.panels[side.index()];
        let listing = Listing::build(entries, panel.sort, panel.filter.as_ref());

        let path = EnginePath::PluginFs {
            fs_name: fs_name.to_string(),
            user_part,
        };
        let leaving = !panel.path.same_path(&path);
        if panel.working_dir_used && leaving {
            let old = panel.path.clone();
            panel.push_history(old);
            panel.working_dir_used = false;
        }
        panel.path = path;
        panel.fs_instance = Some(id);
        panel.archive_stamp = None;
        if !keep_focus {
            panel.focused = None;
        }
        panel.install_listing(listing);

        if !shortened {
            if let Some(focus) = &opts.suggested_focus {
                panel.focus(focus);
            }
            if let Some(top) = opts.suggested_top {
                panel.top_index = top.min(panel.listing.len().saturating_sub(1));
            }
        }

        if shortened {
            ChangePathOutcome::ShorterPath
        } else {
            ChangePathOutcome::Success
        }
    }

    /// Re-list the panel. Disk and UNC always re-list; archives only when
    /// the container changed or on force; plugin FS unconditionally.
    pub fn refresh(
        &mut self,
        side: PanelSide,
        opts: RefreshOptions,
        env: &mut PanelEnv<'_>,
    ) -> ChangePathOutcome {
        let old_listing = self.panels[side.index()].listing.clone();
        let path = self.panels[side.index()].path.clone();

        let outcome = match &path {
            EnginePath::Disk { .. } | EnginePath::Unc { .. } => match env.disk.list_dir(&path) {
                Ok(entries) => self.finish_disk(
                    side,
                    path,
                    entries,
                    false,
                    None,
                    &ChangePathOptions::default(),
                    true,
                ),
                Err(_) => {
                    // Degrade through the normal fallback chain.
                    self.change_to_disk(side, path, &ChangePathOptions::default(), env, true)
                }
            },
            EnginePath::Archive { container, .. } => {
                let stamp = env.disk.container_stamp(container);
                if opts.force_refresh || stamp != self.panels[side.index()].archive_stamp {
                    self.change_to_archive(side, path, &ChangePathOptions::default(), env, true)
                } else {
                    ChangePathOutcome::Success
                }
            }
            EnginePath::PluginFs { fs_name, user_part } => {
                if let Some(id) = self.panels[side.index()].fs_instance {
                    env.registry.send_event(id, FsEvent::ActivateRefresh);
                }
                let fs_name = fs_name.clone();
                let user_part = user_part.clone();
                self.change_to_plugin(
                    side,
                    &fs_name,
                    &user_part,
                    &ChangePathOptions::default(),
                    env,
                    true,
                )
            }
        };

        if opts.focus_first_new_item && outcome == ChangePathOutcome::Success {
            let fresh: Vec<String> = self.panels[side.index()]
                .listing
                .new_names(&old_listing)
                .into_iter()
                .map(String::from)
                .collect();
            if let [only] = fresh.as_slice() {
                self.panels[side.index()].focus(only);
            }
        }
        outcome
    }
}

/// Cut the last `/`- or `\`-separated segment of a plugin user part.
/// `None` once a single segment (the FS root) remains.
fn cut_user_part(user_part: &str) -> Option<String> {
    let trimmed = user_part.trim_end_matches(['/', '\\']);
    trimmed
        .rsplit_once(['/', '\\'])
        .map(|(parent, _)| parent.trim_end_matches(['/', '\\']).to_string())
        .filter(|p| !p.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use crate::{
        path::probe::mem::MemTree,
        vfs::provider::{
            ArchiverProvider, FsChangeOutcome, PluginFsProvider, PluginRecord,
        },
    };

    fn parse(s: &str, archives: &ArchiveAssoc) -> EnginePath {
        EnginePath::parse(s, &ParseContext::bare(archives)).unwrap()
    }

    struct Fixture {
        tree: MemTree,
        registry: PluginFsRegistry,
        archives: ArchiveAssoc,
        rescue: Option<String>,
    }

    impl Fixture {
        fn new() -> Self {
            let mut tree = MemTree::new();
            tree.add_dir("C:\\proj\\src");
            tree.add_dir("C:\\rescue");
            Self {
                tree,
                registry: PluginFsRegistry::new(),
                archives: ArchiveAssoc::default(),
                rescue: Some("C:\\rescue".to_string()),
            }
        }

        fn env(&mut self) -> PanelEnv<'_> {
            PanelEnv {
                disk: &self.tree,
                registry: &mut self.registry,
                archives: &self.archives,
                cache: None,
                rescue_path: self.rescue.as_deref(),
            }
        }

        fn engine(&self) -> PanelEngine {
            let root = parse("C:\\", &self.archives);
            PanelEngine::new(root.clone(), root)
        }
    }

    #[test]
    fn change_to_existing_directory_succeeds() {
        let mut fx = Fixture::new();
        let mut engine = fx.engine();
        let mut env = fx.env();
        let out = engine.change_path(
            PanelSide::Left,
            "C:\\proj\\src",
            &ChangePathOptions::default(),
            &mut env,
        );
        assert_eq!(out, ChangePathOutcome::Success);
        assert_eq!(engine.panel(PanelSide::Left).path.to_string(), "C:\\proj\\src");
    }

    #[test]
    fn shortening_preserves_selection_of_surviving_names() {
        let mut fx = Fixture::new();
        fx.tree.add_dir("C:\\proj\\docs");
        let mut engine = fx.engine();
        let mut env = fx.env();

        engine.change_path(
            PanelSide::Left,
            "C:\\proj",
            &ChangePathOptions::default(),
            &mut env,
        );
        engine.panel_mut(PanelSide::Left).select("src");
        engine.panel_mut(PanelSide::Left).select("docs");

        // The deep path fails; the walk lands back on C:\proj.
        let out = engine.change_path(
            PanelSide::Left,
            "C:\\proj\\no\\such\\dir",
            &ChangePathOptions::default(),
            &mut env,
        );
        assert_eq!(out, ChangePathOutcome::ShorterPath);
        let panel = engine.panel(PanelSide::Left);
        assert_eq!(panel.path.to_string(), "C:\\proj");
        assert!(panel.is_selected("src"));
        assert!(panel.is_selected("docs"));
    }

    #[test]
    fn dead_volume_falls_back_to_rescue_path() {
        let mut fx = Fixture::new();
        let mut engine = fx.engine();
        let mut env = fx.env();
        let out = engine.change_path(
            PanelSide::Left,
            "D:\\gone\\away",
            &ChangePathOptions::default(),
            &mut env,
        );
        assert_eq!(out, ChangePathOutcome::ShorterPath);
        assert_eq!(engine.panel(PanelSide::Left).path.to_string(), "C:\\rescue");
    }

    #[test]
    fn file_input_lists_parent_and_focuses_file() {
        let mut fx = Fixture::new();
        fx.tree.add_file("C:\\proj\\src\\main.rs", 64);
        let mut engine = fx.engine();
        let mut env = fx.env();
        let out = engine.change_path(
            PanelSide::Left,
            "C:\\proj\\src\\main.rs",
            &ChangePathOptions::default(),
            &mut env,
        );
        assert_eq!(out, ChangePathOutcome::FilenameFocused);
        let panel = engine.panel(PanelSide::Left);
        assert_eq!(panel.path.to_string(), "C:\\proj\\src");
        assert_eq!(panel.focused.as_deref(), Some("main.rs"));
    }

    #[test]
    fn suggested_focus_applies_only_on_success() {
        let mut fx = Fixture::new();
        fx.tree.add_dir("C:\\proj\\a");
        fx.tree.add_dir("C:\\proj\\b");
        let mut engine = fx.engine();
        let mut env = fx.env();
        let opts = ChangePathOptions {
            suggested_focus: Some("b".to_string()),
            ..Default::default()
        };
        engine.change_path(PanelSide::Left, "C:\\proj", &opts, &mut env);
        assert_eq!(engine.panel(PanelSide::Left).focused.as_deref(), Some("b"));

        let out = engine.change_path(PanelSide::Left, "C:\\proj\\missing\\x", &opts, &mut env);
        assert_eq!(out, ChangePathOutcome::ShorterPath);
        // Suggested focus does not apply on a shortened result.
        assert_ne!(engine.panel(PanelSide::Left).focused.as_deref(), Some("b"));
    }

    // --- archive handling ------------------------------------------------

    struct MapArchiver {
        /// interior dir -> entries
        layout: HashMap<String, Vec<ListingEntry>>,
    }

    impl ArchiverProvider for MapArchiver {
        fn extensions(&self) -> Vec<String> {
            vec!["zip".to_string()]
        }

        fn list(
            &self,
            _container: &std::path::Path,
            interior: &str,
        ) -> Result<Vec<ListingEntry>, crate::error::FsError> {
            self.layout
                .get(interior)
                .cloned()
                .ok_or_else(|| crate::error::FsError::Listing(interior.to_string()))
        }
    }

    fn register_zip(fx: &mut Fixture) {
        let mut layout = HashMap::new();
        layout.insert(
            String::new(),
            vec![ListingEntry::dir("inner"), ListingEntry::file("top.txt", 1)],
        );
        layout.insert("inner".to_string(), vec![ListingEntry::file("deep.txt", 2)]);
        fx.registry
            .register(PluginRecord::named("ziplike").with_archiver(Box::new(MapArchiver { layout })));
    }

    #[test]
    fn archive_entry_and_interior_shortening() {
        let mut fx = Fixture::new();
        fx.tree.add_file("C:\\proj\\pack.zip", 500);
        register_zip(&mut fx);
        let mut engine = fx.engine();
        let mut env = fx.env();

        let out = engine.change_path(
            PanelSide::Left,
            "C:\\proj\\pack.zip\\inner",
            &ChangePathOptions::default(),
            &mut env,
        );
        assert_eq!(out, ChangePathOutcome::Success);
        assert!(engine.panel(PanelSide::Left).listing.contains("deep.txt"));

        // A missing interior shortens to the nearest listable level.
        let out = engine.change_path(
            PanelSide::Left,
            "C:\\proj\\pack.zip\\inner\\nope",
            &ChangePathOptions::default(),
            &mut env,
        );
        assert_eq!(out, ChangePathOutcome::ShorterPath);
        assert_eq!(
            engine.panel(PanelSide::Left).path.to_string(),
            "C:\\proj\\pack.zip\\inner"
        );
    }

    #[test]
    fn missing_container_is_invalid_archive() {
        let mut fx = Fixture::new();
        register_zip(&mut fx);
        let mut engine = fx.engine();
        let mut env = fx.env();
        let out = engine.change_path(
            PanelSide::Left,
            "C:\\proj\\absent.zip\\x",
            &ChangePathOptions::default(),
            &mut env,
        );
        assert_eq!(out, ChangePathOutcome::InvalidArchive);
    }

    // --- plugin-FS handling ----------------------------------------------

    /// Provider whose listable paths are an explicit set; everything else
    /// accepts `change_path` but fails `list_current`.
    struct PartialFs {
        listable: Arc<Mutex<HashMap<String, Vec<ListingEntry>>>>,
        current: HashMap<u64, String>,
        refuse_close: bool,
    }

    impl PartialFs {
        fn new(listable: Arc<Mutex<HashMap<String, Vec<ListingEntry>>>>) -> Self {
            Self {
                listable,
                current: HashMap::new(),
                refuse_close: false,
            }
        }
    }

    impl PluginFsProvider for PartialFs {
        fn fs_names(&self) -> Vec<String> {
            vec!["ftp".to_string()]
        }

        fn is_our_path(&self, _id: Option<FsInstanceId>, fs_name: &str, _up: &str) -> bool {
            fs_name.eq_ignore_ascii_case("ftp")
        }

        fn change_path(
            &mut self,
            instance: FsInstanceId,
            new_user_part: &str,
            _mode: ChangePathMode,
        ) -> FsChangeOutcome {
            self.current.insert(instance.0, new_user_part.to_string());
            FsChangeOutcome::ok()
        }

        fn list_current(
            &mut self,
            instance: FsInstanceId,
        ) -> Result<Vec<ListingEntry>, crate::error::FsError> {
            let path = self.current.get(&instance.0).cloned().unwrap_or_default();
            self.listable
                .lock()
                .unwrap()
                .get(&path)
                .cloned()
                .ok_or_else(|| crate::error::FsError::Listing(path))
        }

        fn try_close(&mut self, instance: FsInstanceId, force: bool) -> bool {
            if self.refuse_close && !force {
                return false;
            }
            self.current.remove(&instance.0);
            true
        }
    }

    fn listable_map(paths: &[&str]) -> Arc<Mutex<HashMap<String, Vec<ListingEntry>>>> {
        let mut map = HashMap::new();
        for p in paths {
            map.insert(p.to_string(), vec![ListingEntry::dir("entry")]);
        }
        Arc::new(Mutex::new(map))
    }

    #[test]
    fn plugin_entry_success() {
        let mut fx = Fixture::new();
        let listable = listable_map(&["host/a"]);
        fx.registry.register(
            PluginRecord::named("ftp-plugin").with_fs(Box::new(PartialFs::new(listable))),
        );
        let mut engine = fx.engine();
        let mut env = fx.env();
        let out = engine.change_path(
            PanelSide::Left,
            "ftp:host/a",
            &ChangePathOptions::default(),
            &mut env,
        );
        assert_eq!(out, ChangePathOutcome::Success);
        assert_eq!(engine.panel(PanelSide::Left).path.to_string(), "ftp:host/a");
        assert!(engine.panel(PanelSide::Left).fs_instance.is_some());
    }

    #[test]
    fn plugin_shortening_with_restore_to_previous_path() {
        let mut fx = Fixture::new();
        // Only the deep original path is listable; the new target and every
        // prefix of it fails, so the engine restores the original.
        let listable = listable_map(&["host/a/b/c"]);
        fx.registry.register(
            PluginRecord::named("ftp-plugin").with_fs(Box::new(PartialFs::new(listable))),
        );
        let mut engine = fx.engine();
        let mut env = fx.env();

        let out = engine.change_path(
            PanelSide::Left,
            "ftp:host/a/b/c",
            &ChangePathOptions::default(),
            &mut env,
        );
        assert_eq!(out, ChangePathOutcome::Success);

        let out = engine.change_path(
            PanelSide::Left,
            "ftp:host/a/x/y",
            &ChangePathOptions::default(),
            &mut env,
        );
        assert_eq!(out, ChangePathOutcome::ShorterPath);
        assert_eq!(
            engine.panel(PanelSide::Left).path.to_string(),
            "ftp:host/a/b/c"
        );
    }

    #[test]
    fn plugin_refusing_close_blocks_the_change() {
        let mut fx = Fixture::new();
        let listable = listable_map(&["host/a"]);
        let mut provider = PartialFs::new(listable);
        provider.refuse_close = true;
        fx.registry
            .register(PluginRecord::named("ftp-plugin").with_fs(Box::new(provider)));
        let mut engine = fx.engine();
        let mut env = fx.env();

        engine.change_path(
            PanelSide::Left,
            "ftp:host/a",
            &ChangePathOptions::default(),
            &mut env,
        );
        let out = engine.change_path(
            PanelSide::Left,
            "C:\\proj",
            &ChangePathOptions::default(),
            &mut env,
        );
        assert_eq!(out, ChangePathOutcome::CannotClosePath);
        assert_eq!(engine.panel(PanelSide::Left).path.to_string(), "ftp:host/a");
    }

    #[test]
    fn plugin_total_failure_falls_back_to_rescue() {
        let mut fx = Fixture::new();
        let listable = listable_map(&[]);
        fx.registry.register(
            PluginRecord::named("ftp-plugin").with_fs(Box::new(PartialFs::new(listable))),
        );
        let mut engine = fx.engine();
        let mut env = fx.env();
        let out = engine.change_path(
            PanelSide::Left,
            "ftp:host/a",
            &ChangePathOptions::default(),
            &mut env,
        );
        assert_eq!(out, ChangePathOutcome::ShorterPath);
        assert_eq!(engine.panel(PanelSide::Left).path.to_string(), "C:\\rescue");
    }

    // --- refresh ----------------------------------------------------------

    #[test]
    fn refresh_focuses_single_new_entry() {
        let mut fx = Fixture::new();
        fx.tree.add_file("C:\\proj\\src\\a.rs", 1);
        let mut engine = fx.engine();
        {
            let mut env = fx.env();
            engine.change_path(
                PanelSide::Left,
                "C:\\proj\\src",
                &ChangePathOptions::default(),
                &mut env,
            );
        }

        fx.tree.add_file("C:\\proj\\src\\b.rs", 1);
        let mut env = fx.env();
        let out = engine.refresh(
            PanelSide::Left,
            RefreshOptions {
                force_refresh: false,
                focus_first_new_item: true,
            },
            &mut env,
        );
        assert_eq!(out, ChangePathOutcome::Success);
        assert_eq!(engine.panel(PanelSide::Left).focused.as_deref(), Some("b.rs"));
    }

    #[test]
    fn refresh_of_vanished_directory_degrades() {
        let mut fx = Fixture::new();
        fx.tree.add_dir("C:\\proj\\src\\deep");
        let mut engine = fx.engine();
        {
            let mut env = fx.env();
            engine.change_path(
                PanelSide::Left,
                "C:\\proj\\src\\deep",
                &ChangePathOptions::default(),
                &mut env,
            );
        }

        fx.tree.remove("C:\\proj\\src\\deep");
        let mut env = fx.env();
        let out = engine.refresh(PanelSide::Left, RefreshOptions::default(), &mut env);
        assert_eq!(out, ChangePathOutcome::ShorterPath);
        assert_eq!(engine.panel(PanelSide::Left).path.to_string(), "C:\\proj\\src");
    }

    #[test]
    fn history_records_left_path_when_working_dir_used() {
        let mut fx = Fixture::new();
        fx.tree.add_dir("C:\\proj\\docs");
        let mut engine = fx.engine();
        let mut env = fx.env();

        engine.change_path(
            PanelSide::Left,
            "C:\\proj\\src",
            &ChangePathOptions::default(),
            &mut env,
        );
        engine.mark_working_dir_used(PanelSide::Left);
        engine.change_path(
            PanelSide::Left,
            "C:\\proj\\docs",
            &ChangePathOptions::default(),
            &mut env,
        );
        let panel = engine.panel(PanelSide::Left);
        assert!(panel.history[0].to_string() == "C:\\proj\\src");
    }
}
