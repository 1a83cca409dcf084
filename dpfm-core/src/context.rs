//! Process-wide engine state, threaded through the core as a value instead
//! of globals. Mutated only from the engine loop.

use std::time::Instant;

use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub struct EngineContext {
    /// True while a non-whitelisted request handler runs; idle work is
    /// dispatched only when clear.
    pub busy: bool,
    /// When `busy` last changed.
    pub last_busy_change: Instant,
    /// Set once startup wiring finished; the busy flag is only cleared
    /// after that.
    pub initialized: bool,
    /// Roughly five seconds to finish once this fires: no dialogs,
    /// abbreviated configuration save.
    pub critical_shutdown: CancellationToken,
    /// Lazily recompute command-enablement states at the next idle pass.
    pub idle_refresh_states: bool,
    /// Include the expensive clipboard probe in the next recomputation.
    pub idle_check_clipboard: bool,
    /// Title-bar prefix requested on the command line, for the GUI surface.
    pub title_prefix: Option<String>,
    /// Main-window icon index requested on the command line.
    pub icon_index: u8,
}

impl EngineContext {
    pub fn new() -> Self {
        Self {
            busy: true,
            last_busy_change: Instant::now(),
            initialized: false,
            critical_shutdown: CancellationToken::new(),
            idle_refresh_states: true,
            idle_check_clipboard: true,
            title_prefix: None,
            icon_index: 0,
        }
    }

    pub fn set_busy(&mut self, busy: bool) {
        if busy != self.busy && (self.initialized || busy) {
            self.busy = busy;
            self.last_busy_change = Instant::now();
        }
    }

    pub fn is_critical(&self) -> bool {
        self.critical_shutdown.is_cancelled()
    }
}

impl Default for EngineContext {
    fn default() -> Self {
        Self::new()
    }
}
