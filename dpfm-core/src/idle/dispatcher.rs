//! Serialization of deferred actions onto the engine loop during quiescent
//! intervals.
//!
//! Within one idle interval at most one category runs per pass, so control
//! returns to the request pump between categories and input stays
//! responsive. Categories have fixed priority: external activation >
//! rescue path > plugin commands > plugin unload > state recomputation.

use std::{
    collections::VecDeque,
    time::{Duration, SystemTime},
};

use tracing::{debug, info};

use crate::{context::EngineContext, panel::state::PanelSide};

/// How long a cross-process activation request stays honorable, measured
/// from the requester's stamp.
pub const ACTIVATION_TTL: Duration = Duration::from_secs(10);

/// A command a plugin posted through the public API; dispatched exactly
/// once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginCommand {
    pub plugin: String,
    pub command: PluginCommandId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginCommandId {
    /// An internal engine command id.
    Internal(u32),
    /// A plugin menu-extension id.
    MenuExtension(u32),
}

/// Parameters another instance deposited through the single-instance
/// channel.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ActivationRequest {
    pub left: Option<String>,
    pub right: Option<String>,
    pub active: Option<String>,
    /// Active-panel path in user-hot-path syntax; the receiving instance
    /// resolves it against its own hot-path list.
    pub active_hot: Option<String>,
    pub active_panel: Option<PanelSide>,
    /// Requester's wall-clock stamp; expired requests are discarded.
    pub stamp: SystemTime,
}

/// Enablement booleans driving UI commands, recomputed lazily.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandStates {
    pub can_copy: bool,
    pub can_move: bool,
    pub can_delete: bool,
    pub can_pack: bool,
    pub can_unpack: bool,
    pub can_change_attrs: bool,
    pub can_paste: bool,
}

/// One unit of idle work handed back to the engine loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdleWork {
    Activation(ActivationRequest),
    /// Swap a panel onto the rescue path after media ejection.
    RescuePanel(PanelSide),
    PluginCommand(PluginCommand),
    UnloadPlugin(String),
    RecomputeStates { check_clipboard: bool },
}

#[derive(Debug, Default)]
pub struct IdleDispatcher {
    activation: Option<ActivationRequest>,
    rescue: VecDeque<PanelSide>,
    plugin_commands: VecDeque<PluginCommand>,
    unloads: VecDeque<String>,
}

impl IdleDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deposit an external-activation request; a newer one replaces an
    /// unconsumed older one.
    pub fn post_activation(&mut self, request: ActivationRequest) {
        self.activation = Some(request);
    }

    pub fn request_rescue(&mut self, side: PanelSide) {
        if !self.rescue.contains(&side) {
            self.rescue.push_back(side);
        }
    }

    pub fn post_plugin_command(&mut self, command: PluginCommand) {
        self.plugin_commands.push_back(command);
    }

    pub fn request_unload(&mut self, plugin: impl Into<String>) {
        let plugin = plugin.into();
        if !self.unloads.contains(&plugin) {
            self.unloads.push_back(plugin);
        }
    }

    pub fn has_work(&self) -> bool {
        self.activation.is_some()
            || !self.rescue.is_empty()
            || !self.plugin_commands.is_empty()
            || !self.unloads.is_empty()
    }

    /// Take at most one category of work. Runs only when the context is
    /// not busy.
    pub fn next(&mut self, ctx: &mut EngineContext, now: SystemTime) -> Option<IdleWork> {
        if ctx.busy {
            return None;
        }

        if let Some(request) = self.activation.take() {
            match now.duration_since(request.stamp) {
                Ok(age) if age < ACTIVATION_TTL => {
                    return Some(IdleWork::Activation(request));
                }
                _ => {
                    info!("discarding stale activation request");
                }
            }
        }

        if let Some(side) = self.rescue.pop_front() {
            return Some(IdleWork::RescuePanel(side));
        }

        if let Some(command) = self.plugin_commands.pop_front() {
            return Some(IdleWork::PluginCommand(command));
        }

        // A plugin unloads only once no posted command of its own remains.
        if let Some(name) = self.unloads.front() {
            if !self.plugin_commands.iter().any(|c| &c.plugin == name) {
                let name = self.unloads.pop_front().expect("front checked");
                return Some(IdleWork::UnloadPlugin(name));
            }
        }

        if ctx.idle_refresh_states {
            ctx.idle_refresh_states = false;
            let check_clipboard = ctx.idle_check_clipboard;
            ctx.idle_check_clipboard = false;
            debug!(check_clipboard, "recomputing command states");
            return Some(IdleWork::RecomputeStates { check_clipboard });
        }

        None
    }
}
