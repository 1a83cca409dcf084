//! The engine request loop: the privileged task that owns panel, registry,
//! and idle-dispatcher state. Requests arrive over a channel; worker
//! prompts are serialized here; idle work runs only between requests when
//! the busy flag is clear.

use std::{
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant, SystemTime},
};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::{
    cache::disk_cache::DiskCache,
    cli::CliOptions,
    config::Config,
    context::EngineContext,
    error::{EngineError, EngineResult, FsError},
    fs::disk_source::DiskSource,
    idle::dispatcher::{
        ActivationRequest, CommandStates, IdleDispatcher, IdleWork, PluginCommand,
    },
    instance::take_activation,
    ops::{
        operation::{OpArchiver, OpKind, Operation, OperationOptions},
        prompt::{
            ChannelPromptSink, ErrorDecision, ErrorPrompt, OverwriteDecision, OverwritePrompt,
            PromptRequest,
        },
        scheduler::{OperationHandle, OperationScheduler},
    },
    panel::{
        engine::{ChangePathOptions, ChangePathOutcome, PanelEngine, PanelEnv, RefreshOptions},
        state::PanelSide,
        watcher::{PanelChangeNotice, PanelWatcher},
    },
    path::{
        engine_path::{ArchiveAssoc, EnginePath, ParseContext},
        split::split_for_operation,
    },
    vfs::registry::PluginFsRegistry,
    volume::{oracle::VolumeOracle, resolver::VolumeResolver},
};

const IDLE_TICK: Duration = Duration::from_millis(200);
const ACTIVATION_POLL: Duration = Duration::from_millis(500);

/// Requests accepted by the engine loop.
#[derive(Debug)]
pub enum EngineRequest {
    ChangePath {
        side: PanelSide,
        input: String,
        opts: ChangePathOptions,
        reply: Option<oneshot::Sender<ChangePathOutcome>>,
    },
    Refresh {
        side: PanelSide,
        opts: RefreshOptions,
    },
    PostPluginCommand(PluginCommand),
    RequestUnload(String),
    /// Whitelisted: does not mark the engine busy.
    Activation(ActivationRequest),
    /// Whitelisted: does not mark the engine busy.
    Shutdown {
        critical: bool,
    },
}

/// Blocking dialog surface installed by the binary; headless contexts
/// cancel everything.
pub trait DialogSurface: Send {
    fn error_choice(&mut self, prompt: &ErrorPrompt) -> ErrorDecision;
    fn overwrite_choice(&mut self, prompt: &OverwritePrompt) -> OverwriteDecision;
}

pub struct HeadlessDialogs;

impl DialogSurface for HeadlessDialogs {
    fn error_choice(&mut self, _prompt: &ErrorPrompt) -> ErrorDecision {
        ErrorDecision::Cancel
    }

    fn overwrite_choice(&mut self, _prompt: &OverwritePrompt) -> OverwriteDecision {
        OverwriteDecision::Cancel
    }
}

/// Cheap cloneable front door to the engine loop.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::UnboundedSender<EngineRequest>,
}

impl EngineHandle {
    pub async fn change_path(
        &self,
        side: PanelSide,
        input: &str,
        opts: ChangePathOptions,
    ) -> Option<ChangePathOutcome> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::ChangePath {
                side,
                input: input.to_string(),
                opts,
                reply: Some(reply),
            })
            .ok()?;
        rx.await.ok()
    }

    pub fn refresh(&self, side: PanelSide, opts: RefreshOptions) {
        let _ = self.tx.send(EngineRequest::Refresh { side, opts });
    }

    pub fn post_plugin_command(&self, command: PluginCommand) {
        let _ = self.tx.send(EngineRequest::PostPluginCommand(command));
    }

    pub fn request_unload(&self, plugin: impl Into<String>) {
        let _ = self.tx.send(EngineRequest::RequestUnload(plugin.into()));
    }

    pub fn post_activation(&self, request: ActivationRequest) {
        let _ = self.tx.send(EngineRequest::Activation(request));
    }

    pub fn shutdown(&self, critical: bool) {
        let _ = self.tx.send(EngineRequest::Shutdown { critical });
    }
}

/// Everything `Engine::new` needs; defaults give a headless engine over the
/// live filesystem.
pub struct EngineParams {
    pub config: Config,
    /// Versioned-config base directory; `None` saves to the OS default.
    pub config_base: Option<PathBuf>,
    /// Where the single-instance channel deposits activation requests.
    pub activation_dir: Option<PathBuf>,
    pub disk: Box<dyn DiskSource>,
    pub registry: PluginFsRegistry,
    pub cache: Option<Arc<DiskCache>>,
    pub dialogs: Box<dyn DialogSurface>,
    pub oracle: Arc<dyn VolumeOracle>,
    /// Arm filesystem watchers for panel auto-refresh.
    pub watch: bool,
}

impl Default for EngineParams {
    fn default() -> Self {
        Self {
            config: Config::default(),
            config_base: None,
            activation_dir: None,
            disk: Box::new(crate::fs::disk_source::StdDiskSource),
            registry: PluginFsRegistry::new(),
            cache: None,
            dialogs: Box::new(HeadlessDialogs),
            oracle: Arc::new(crate::volume::oracle::OsVolumeOracle),
            watch: false,
        }
    }
}

pub struct Engine {
    pub ctx: EngineContext,
    pub config: Config,
    pub panels: PanelEngine,
    pub registry: PluginFsRegistry,
    pub resolver: VolumeResolver,
    pub scheduler: OperationScheduler,
    pub dispatcher: IdleDispatcher,
    pub states: CommandStates,
    cache: Option<Arc<DiskCache>>,
    disk: Box<dyn DiskSource>,
    archives: ArchiveAssoc,
    dialogs: Box<dyn DialogSurface>,
    config_base: Option<PathBuf>,
    activation_dir: Option<PathBuf>,
    last_activation_poll: Instant,
    refresh_debounce: crate::util::debounce::RefreshDebounce,
    watcher: Option<PanelWatcher>,
    rx: mpsc::UnboundedReceiver<EngineRequest>,
    prompt_rx: mpsc::UnboundedReceiver<PromptRequest>,
    notice_rx: mpsc::UnboundedReceiver<PanelChangeNotice>,
    critical_exit: bool,
    /// Hook the GUI surface installs to execute posted plugin commands.
    pub plugin_command_handler: Option<Box<dyn FnMut(&PluginCommand) + Send>>,
    /// Hook probing whether the clipboard holds paths.
    pub clipboard_probe: Option<Box<dyn Fn() -> bool + Send>>,
}

impl Engine {
    pub fn new(params: EngineParams) -> (Engine, EngineHandle) {
        let EngineParams {
            config,
            config_base,
            activation_dir,
            disk,
            registry,
            cache,
            dialogs,
            oracle,
            watch,
        } = params;

        let archives = config.archive_assoc();
        let bare = ParseContext::bare(&archives);
        let fallback = EnginePath::Disk {
            root: 'C',
            tail: String::new(),
        };
        let left = EnginePath::parse(&config.left_path, &bare).unwrap_or_else(|_| fallback.clone());
        let right =
            EnginePath::parse(&config.right_path, &bare).unwrap_or_else(|_| fallback.clone());
        let mut panels = PanelEngine::new(left, right);
        panels.drive_dirs = config.drive_dirs.clone();
        if config.active_panel == 2 {
            panels.active = PanelSide::Right;
        }

        let ctx = EngineContext::new();
        let (prompt_tx, prompt_rx) = mpsc::unbounded_channel();
        let scheduler = OperationScheduler::new(
            Arc::new(ChannelPromptSink::new(prompt_tx)),
            ctx.critical_shutdown.clone(),
        );

        let (notice_tx, notice_rx) = mpsc::unbounded_channel();
        let watcher = if watch {
            match PanelWatcher::new(notice_tx) {
                Ok(w) => Some(w),
                Err(e) => {
                    warn!(error = %e, "change notifications unavailable");
                    None
                }
            }
        } else {
            None
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let mut registry = registry;
        registry.load_plugin_configs(&config.plugins);
        let debounce_window = config.refresh_debounce;
        let engine = Engine {
            ctx,
            config,
            panels,
            registry,
            resolver: VolumeResolver::new(oracle),
            scheduler,
            dispatcher: IdleDispatcher::new(),
            states: CommandStates::default(),
            cache,
            disk,
            archives,
            dialogs,
            config_base,
            activation_dir,
            last_activation_poll: Instant::now(),
            refresh_debounce: crate::util::debounce::RefreshDebounce::new(debounce_window),
            watcher,
            rx,
            prompt_rx,
            notice_rx,
            critical_exit: false,
            plugin_command_handler: None,
            clipboard_probe: None,
        };
        (engine, EngineHandle { tx })
    }

    /// Apply command-line panel options before the loop starts.
    pub fn apply_cli(&mut self, cli: &CliOptions) {
        self.ctx.title_prefix = cli.title_prefix.clone();
        if let Some(icon) = cli.icon_index {
            self.ctx.icon_index = icon;
        }
        if let Some(p) = cli.activate_panel {
            match p {
                1 => self.panels.active = PanelSide::Left,
                2 => self.panels.active = PanelSide::Right,
                _ => {}
            }
        }
        if let Some(left) = &cli.left {
            self.do_change_path(PanelSide::Left, left, &ChangePathOptions::default());
        }
        if let Some(right) = &cli.right {
            self.do_change_path(PanelSide::Right, right, &ChangePathOptions::default());
        }
        let active = self.panels.active;
        if let Some(path) = &cli.active {
            self.do_change_path(active, path, &ChangePathOptions::default());
        }
        if let Some(hot) = &cli.active_hot {
            let resolved = self.resolve_hot_path(hot);
            self.do_change_path(active, &resolved, &ChangePathOptions::default());
        }
    }

    /// User-hot-path syntax: a hot-path index, else a literal path.
    fn resolve_hot_path(&self, hot: &str) -> String {
        hot.parse::<u8>()
            .ok()
            .and_then(|i| self.config.hot_path(i))
            .map(str::to_string)
            .unwrap_or_else(|| hot.to_string())
    }

    /// Run until shutdown; returns the engine for post-mortem inspection.
    pub async fn run(mut self) -> Engine {
        self.ctx.initialized = true;
        self.ctx.set_busy(false);
        info!("engine loop running");

        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                biased;
                maybe = self.rx.recv() => {
                    match maybe {
                        Some(request) => {
                            if !self.handle_request(request) {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                Some(prompt) = self.prompt_rx.recv() => self.handle_prompt(prompt),
                Some(notice) = self.notice_rx.recv() => {
                    self.refresh_debounce.request(notice.side, Instant::now());
                }
                _ = tokio::time::sleep_until(deadline.into()) => {}
            }
            self.idle_pass();
        }

        self.finish().await;
        self
    }

    fn next_deadline(&self) -> Instant {
        let mut deadline = Instant::now() + IDLE_TICK;
        if let Some(due) = self.refresh_debounce.next_due() {
            deadline = deadline.min(due);
        }
        if let Some(due) = self.registry.next_timer_due() {
            deadline = deadline.min(due);
        }
        deadline
    }

    fn handle_request(&mut self, request: EngineRequest) -> bool {
        let whitelisted = matches!(
            request,
            EngineRequest::Activation(_) | EngineRequest::Shutdown { .. }
        );
        if !whitelisted {
            self.ctx.set_busy(true);
        }
        let keep_running = match request {
            EngineRequest::ChangePath {
                side,
                input,
                opts,
                reply,
            } => {
                let outcome = self.do_change_path(side, &input, &opts);
                if let Some(reply) = reply {
                    let _ = reply.send(outcome);
                }
                true
            }
            EngineRequest::Refresh { side, opts } => {
                self.do_refresh(side, opts);
                true
            }
            EngineRequest::PostPluginCommand(command) => {
                self.dispatcher.post_plugin_command(command);
                true
            }
            EngineRequest::RequestUnload(plugin) => {
                self.dispatcher.request_unload(plugin);
                true
            }
            EngineRequest::Activation(request) => {
                self.dispatcher.post_activation(request);
                true
            }
            EngineRequest::Shutdown { critical } => {
                if critical {
                    info!("critical shutdown signalled");
                    self.ctx.critical_shutdown.cancel();
                    self.scheduler.critical_shutdown();
                    self.critical_exit = true;
                }
                false
            }
        };
        if !whitelisted {
            self.ctx.set_busy(false);
            self.ctx.idle_refresh_states = true;
        }
        keep_running
    }

    /// Dialogs run here so workers stay blocked on their reply channel; in
    /// critical shutdown everything cancels without a dialog.
    fn handle_prompt(&mut self, prompt: PromptRequest) {
        self.ctx.set_busy(true);
        match prompt {
            PromptRequest::Error { prompt, reply } => {
                let decision = if self.ctx.is_critical() {
                    ErrorDecision::Cancel
                } else {
                    self.dialogs.error_choice(&prompt)
                };
                let _ = reply.send(decision);
            }
            PromptRequest::Overwrite { prompt, reply } => {
                let decision = if self.ctx.is_critical() {
                    OverwriteDecision::Cancel
                } else {
                    self.dialogs.overwrite_choice(&prompt)
                };
                let _ = reply.send(decision);
            }
        }
        self.ctx.set_busy(false);
    }

    fn panel_env<'a>(
        disk: &'a dyn DiskSource,
        registry: &'a mut PluginFsRegistry,
        archives: &'a ArchiveAssoc,
        cache: Option<&'a DiskCache>,
        config: &'a Config,
    ) -> PanelEnv<'a> {
        PanelEnv {
            disk,
            registry,
            archives,
            cache,
            rescue_path: (!config.rescue_path.is_empty()).then_some(config.rescue_path.as_str()),
        }
    }

    fn do_change_path(
        &mut self,
        side: PanelSide,
        input: &str,
        opts: &ChangePathOptions,
    ) -> ChangePathOutcome {
        let mut env = Self::panel_env(
            self.disk.as_ref(),
            &mut self.registry,
            &self.archives,
            self.cache.as_deref(),
            &self.config,
        );
        let outcome = self.panels.change_path(side, input, opts, &mut env);
        self.rearm_watch(side);
        outcome
    }

    fn do_refresh(&mut self, side: PanelSide, opts: RefreshOptions) {
        let mut env = Self::panel_env(
            self.disk.as_ref(),
            &mut self.registry,
            &self.archives,
            self.cache.as_deref(),
            &self.config,
        );
        let outcome = self.panels.refresh(side, opts, &mut env);
        if outcome != ChangePathOutcome::Success {
            debug!(side = ?side, outcome = ?outcome, "refresh degraded");
        }
        self.rearm_watch(side);
    }

    fn rearm_watch(&mut self, side: PanelSide) {
        if let Some(watcher) = &mut self.watcher {
            watcher.watch(side, &self.panels.panel(side).path);
        }
    }

    fn idle_pass(&mut self) {
        let now = Instant::now();
        for side in self.refresh_debounce.take_due(now) {
            self.ctx.set_busy(true);
            self.do_refresh(side, RefreshOptions::default());
            self.ctx.set_busy(false);
        }

        self.registry.fire_due_timers(now);

        if let Some(dir) = self.activation_dir.clone() {
            if now.duration_since(self.last_activation_poll) >= ACTIVATION_POLL {
                self.last_activation_poll = now;
                if let Some(request) = take_activation(&dir) {
                    self.dispatcher.post_activation(request);
                }
            }
        }

        if let Some(work) = self.dispatcher.next(&mut self.ctx, SystemTime::now()) {
            self.run_idle_work(work);
        }
    }

    fn run_idle_work(&mut self, work: IdleWork) {
        match work {
            IdleWork::Activation(request) => {
                info!("honoring external activation request");
                if let Some(p) = request.active_panel {
                    self.panels.active = p;
                }
                if let Some(left) = &request.left {
                    self.do_change_path(PanelSide::Left, left, &ChangePathOptions::default());
                }
                if let Some(right) = &request.right {
                    self.do_change_path(PanelSide::Right, right, &ChangePathOptions::default());
                }
                if let Some(active) = &request.active {
                    let side = self.panels.active;
                    self.do_change_path(side, active, &ChangePathOptions::default());
                }
                if let Some(hot) = &request.active_hot {
                    // Hot-path indices resolve against this instance's own
                    // list, not the requester's.
                    let resolved = self.resolve_hot_path(hot);
                    let side = self.panels.active;
                    self.do_change_path(side, &resolved, &ChangePathOptions::default());
                }
                // The GUI surface brings the main window forward.
            }
            IdleWork::RescuePanel(side) => {
                let rescue = self.config.rescue_path.clone();
                if !rescue.is_empty() {
                    self.do_change_path(side, &rescue, &ChangePathOptions::default());
                }
            }
            IdleWork::PluginCommand(command) => match &mut self.plugin_command_handler {
                Some(handler) => handler(&command),
                None => debug!(?command, "no plugin-command handler installed"),
            },
            IdleWork::UnloadPlugin(name) => {
                // Persist the plugin's blob before its callbacks go away.
                self.registry.save_plugin_configs(&mut self.config.plugins);
                if !self.registry.unload_plugin(&name) {
                    // Instances still alive; try again at a later idle.
                    self.dispatcher.request_unload(name);
                }
            }
            IdleWork::RecomputeStates { check_clipboard } => {
                self.recompute_states(check_clipboard);
            }
        }
    }

    fn recompute_states(&mut self, check_clipboard: bool) {
        let panel = self.panels.active_panel();
        let has_items = panel.focused.is_some() || panel.selection_count() > 0;
        let on_disk = matches!(
            panel.path,
            EnginePath::Disk { .. } | EnginePath::Unc { .. }
        );
        let can_paste = if check_clipboard {
            self.clipboard_probe.as_ref().is_some_and(|probe| probe())
        } else {
            self.states.can_paste
        };
        self.states = CommandStates {
            can_copy: has_items,
            can_move: has_items && on_disk,
            can_delete: has_items && on_disk,
            can_pack: has_items && on_disk,
            can_unpack: has_items,
            can_change_attrs: has_items && on_disk,
            can_paste: can_paste && on_disk,
        };
    }

    /// Compose a bulk operation from the panel's selection and a target
    /// input, without starting it.
    pub fn build_operation(
        &self,
        kind: OpKind,
        side: PanelSide,
        target_input: Option<&str>,
        archiver: Option<Arc<dyn OpArchiver>>,
    ) -> EngineResult<Operation> {
        let panel = self.panels.panel(side);
        let mut names = panel.selected_names();
        if names.is_empty() {
            names.extend(panel.focused.clone());
        }
        if names.is_empty() {
            return Err(EngineError::Config("nothing selected".to_string()));
        }

        let mut sources = Vec::with_capacity(names.len());
        for name in &names {
            let path = panel.path.append(name.as_str())?;
            let native = path
                .to_native()
                .ok_or_else(|| FsError::not_accessible(path.to_string()))?;
            sources.push(native);
        }

        let mut options = OperationOptions {
            archiver,
            ..Default::default()
        };
        let mut kind = kind;
        let target = match target_input {
            Some(input) => {
                let ctx = ParseContext {
                    current: Some(&panel.path),
                    drive_dirs: Some(&self.panels.drive_dirs),
                    archives: &self.archives,
                };
                let split = split_for_operation(input, &ctx, self.disk.as_ref(), names.len())?;
                options.mask = split.mask.clone();
                if split.into_archive {
                    if options.archiver.is_none() {
                        return Err(EngineError::Config(
                            "no packer available for the target archive".to_string(),
                        ));
                    }
                    kind = OpKind::Pack;
                }
                let base = split
                    .existing_prefix
                    .to_native()
                    .ok_or_else(|| FsError::not_accessible(split.existing_prefix.to_string()))?;
                let full = if split.to_create.is_empty() {
                    base
                } else {
                    base.join(split.to_create.replace('\\', std::path::MAIN_SEPARATOR_STR))
                };

                if kind == OpKind::Move {
                    let answer = self.resolver.same_volume(
                        &panel.path,
                        &split.existing_prefix,
                    );
                    debug!(
                        same = answer.same,
                        certain = answer.certain,
                        "move volume identity"
                    );
                }
                Some(full)
            }
            None => None,
        };

        Ok(Operation {
            kind,
            sources,
            target,
            options,
        })
    }

    /// Compose and enqueue in one step.
    pub fn start_operation(
        &mut self,
        kind: OpKind,
        side: PanelSide,
        target_input: Option<&str>,
        archiver: Option<Arc<dyn OpArchiver>>,
    ) -> EngineResult<OperationHandle> {
        let op = self.build_operation(kind, side, target_input, archiver)?;
        Ok(self.scheduler.enqueue(op))
    }

    async fn finish(&mut self) {
        self.registry.save_plugin_configs(&mut self.config.plugins);
        // Remember panel paths and per-drive directories.
        self.config.left_path = self.panels.panel(PanelSide::Left).path.to_string();
        self.config.right_path = self.panels.panel(PanelSide::Right).path.to_string();
        self.config.active_panel = match self.panels.active {
            PanelSide::Left => 1,
            PanelSide::Right => 2,
        };
        self.config.drive_dirs = self.panels.drive_dirs.clone();

        if self.critical_exit {
            // Abbreviated save: no consistency dance, no waiting.
            if let Some(base) = &self.config_base {
                if let Err(e) = self.config.save_abbreviated(base) {
                    warn!(error = %e, "abbreviated configuration save failed");
                }
            }
            return;
        }
        let result = match &self.config_base {
            Some(base) => self.config.save_to(base).await,
            None => self.config.save().await,
        };
        if let Err(e) = result {
            warn!(error = %e, "configuration save failed");
        }
    }
}
