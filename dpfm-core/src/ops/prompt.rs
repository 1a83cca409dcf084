//! The user-interactive error surface of bulk operations.
//!
//! Workers never let an I/O error escape: every failure is translated into
//! a decision through a [`PromptSink`]. The engine loop installs a sink that
//! forwards to the UI over a request channel; tests script answers.

use std::{collections::VecDeque, path::PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use tokio::sync::{mpsc::UnboundedSender, oneshot};

use crate::error::OpErrorKind;

/// Choice offered on a failed primitive. `Ignore`/`IgnoreAll` replace
/// `Skip`/`SkipAll` for recoverable read errors; `Focus` is offered for
/// name-too-long errors so the user can jump to the offending source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDecision {
    Retry,
    Skip,
    SkipAll,
    Ignore,
    IgnoreAll,
    Focus,
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverwriteDecision {
    Yes,
    YesAll,
    Skip,
    SkipAll,
    Cancel,
}

/// What a failed primitive looked like, for dialog wording.
#[derive(Debug, Clone)]
pub struct ErrorPrompt {
    /// Object title: file path or operation description.
    pub title: String,
    /// Verb of the failing primitive ("copy", "delete", ...).
    pub verb: &'static str,
    pub detail: String,
    pub kind: OpErrorKind,
    pub offers_ignore: bool,
    pub offers_focus: bool,
}

#[derive(Debug, Clone)]
pub struct OverwritePrompt {
    pub target: PathBuf,
    pub source: Option<PathBuf>,
    /// Raises the separate system/hidden confirmation wording.
    pub system_or_hidden: bool,
}

#[async_trait]
pub trait PromptSink: Send + Sync {
    async fn error_choice(&self, prompt: ErrorPrompt) -> ErrorDecision;
    async fn overwrite_choice(&self, prompt: OverwritePrompt) -> OverwriteDecision;
}

/// Per-operation mutable policy state.
#[derive(Debug, Default)]
pub struct ErrorPolicy {
    pub skip_all: bool,
    pub ignore_all: FxHashSet<OpErrorKind>,
    pub overwrite_all: bool,
    pub overwrite_skip_all: bool,
}

impl ErrorPolicy {
    /// True when the kind is already handled without a dialog.
    pub fn pre_handled(&self, kind: OpErrorKind) -> bool {
        self.skip_all || self.ignore_all.contains(&kind)
    }
}

/// Request forwarded to the engine loop; the worker blocks on the reply.
#[derive(Debug)]
pub enum PromptRequest {
    Error {
        prompt: ErrorPrompt,
        reply: oneshot::Sender<ErrorDecision>,
    },
    Overwrite {
        prompt: OverwritePrompt,
        reply: oneshot::Sender<OverwriteDecision>,
    },
}

/// Sink that serializes prompts onto the engine loop through a channel.
pub struct ChannelPromptSink {
    tx: UnboundedSender<PromptRequest>,
}

impl ChannelPromptSink {
    pub fn new(tx: UnboundedSender<PromptRequest>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl PromptSink for ChannelPromptSink {
    async fn error_choice(&self, prompt: ErrorPrompt) -> ErrorDecision {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(PromptRequest::Error { prompt, reply }).is_err() {
            return ErrorDecision::Cancel;
        }
        rx.await.unwrap_or(ErrorDecision::Cancel)
    }

    async fn overwrite_choice(&self, prompt: OverwritePrompt) -> OverwriteDecision {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(PromptRequest::Overwrite { prompt, reply })
            .is_err()
        {
            return OverwriteDecision::Cancel;
        }
        rx.await.unwrap_or(OverwriteDecision::Cancel)
    }
}

/// Scripted sink: answers are consumed in order, then the fallback applies.
/// Also records the prompts it saw.
pub struct AutoPromptSink {
    errors: Mutex<VecDeque<ErrorDecision>>,
    overwrites: Mutex<VecDeque<OverwriteDecision>>,
    error_fallback: ErrorDecision,
    overwrite_fallback: OverwriteDecision,
    pub seen_errors: Mutex<Vec<ErrorPrompt>>,
    pub seen_overwrites: Mutex<Vec<OverwritePrompt>>,
}

impl AutoPromptSink {
    pub fn new(error_fallback: ErrorDecision, overwrite_fallback: OverwriteDecision) -> Self {
        Self {
            errors: Mutex::new(VecDeque::new()),
            overwrites: Mutex::new(VecDeque::new()),
            error_fallback,
            overwrite_fallback,
            seen_errors: Mutex::new(Vec::new()),
            seen_overwrites: Mutex::new(Vec::new()),
        }
    }

    pub fn script_errors(&self, decisions: impl IntoIterator<Item = ErrorDecision>) {
        self.errors.lock().extend(decisions);
    }

    pub fn script_overwrites(&self, decisions: impl IntoIterator<Item = OverwriteDecision>) {
        self.overwrites.lock().extend(decisions);
    }
}

#[async_trait]
impl PromptSink for AutoPromptSink {
    async fn error_choice(&self, prompt: ErrorPrompt) -> ErrorDecision {
        self.seen_errors.lock().push(prompt);
        self.errors
            .lock()
            .pop_front()
            .unwrap_or(self.error_fallback)
    }

    async fn overwrite_choice(&self, prompt: OverwritePrompt) -> OverwriteDecision {
        self.seen_overwrites.lock().push(prompt);
        self.overwrites
            .lock()
            .pop_front()
            .unwrap_or(self.overwrite_fallback)
    }
}
