//! Per-operation worker: executes plan entries in order, translating every
//! primitive failure into a decision through the error-policy machine.

use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
    time::Instant,
};

use tokio::{
    fs as TokioFs,
    io::{AsyncReadExt, AsyncWriteExt},
    sync::watch,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    error::{OpError, OpErrorKind},
    ops::{
        operation::{AttrChange, Operation, OperationOutcome, OperationProgress, OperationOptions},
        plan::{build_plan, OperationPlan, PlanAction},
        prompt::{
            ErrorDecision, ErrorPrompt, ErrorPolicy, OverwriteDecision, OverwritePrompt,
            PromptSink,
        },
    },
    path::engine_path::PLATFORM_MAX_PATH,
    util::debounce::Throttler,
};

const COPY_CHUNK: usize = 64 * 1024;
const PROGRESS_INTERVAL_MS: u64 = 100;

pub struct WorkerContext {
    pub prompts: Arc<dyn PromptSink>,
    pub cancel: CancellationToken,
    /// Critical-shutdown flag: no dialogs, finish fast.
    pub critical: CancellationToken,
    pub progress: watch::Sender<OperationProgress>,
}

impl WorkerContext {
    fn interrupted(&self) -> bool {
        self.cancel.is_cancelled() || self.critical.is_cancelled()
    }
}

struct ProgressPublisher {
    tx: watch::Sender<OperationProgress>,
    throttle: Throttler,
    started: Instant,
    bytes_done: u64,
    bytes_total: u64,
    current: String,
}

impl ProgressPublisher {
    fn new(tx: watch::Sender<OperationProgress>, bytes_total: u64) -> Self {
        Self {
            tx,
            throttle: Throttler::new(std::time::Duration::from_millis(PROGRESS_INTERVAL_MS)),
            started: Instant::now(),
            bytes_done: 0,
            bytes_total,
            current: String::new(),
        }
    }

    fn set_current(&mut self, path: &Path) {
        self.current = path.display().to_string();
    }

    fn add_bytes(&mut self, n: u64) {
        self.bytes_done += n;
    }

    fn publish(&mut self, force: bool) {
        let now = Instant::now();
        if !force && !self.throttle.should_trigger(now) {
            return;
        }
        let eta_seconds = {
            let elapsed = now.duration_since(self.started).as_secs_f64();
            let remaining = self.bytes_total.saturating_sub(self.bytes_done);
            if self.bytes_done > 0 && elapsed > 0.5 && remaining > 0 {
                Some((remaining as f64 * elapsed / self.bytes_done as f64) as u64)
            } else {
                None
            }
        };
        let _ = self.tx.send_replace(OperationProgress {
            bytes_done: self.bytes_done,
            bytes_total: self.bytes_total,
            current_name: self.current.clone(),
            eta_seconds,
        });
    }
}

enum ExecResult {
    Done { bytes: u64 },
    SkippedByUser,
}

/// Run one operation to completion. Returns partial accounting on abort.
pub async fn run_operation(op: Operation, ctx: WorkerContext) -> OperationOutcome {
    let plan = {
        let op_for_plan = op.clone();
        match tokio::task::spawn_blocking(move || build_plan(&op_for_plan)).await {
            Ok(Ok(plan)) => plan,
            Ok(Err(e)) => {
                warn!(error = %e, "plan enumeration failed");
                return OperationOutcome {
                    failed: 1,
                    aborted: true,
                    ..Default::default()
                };
            }
            Err(e) => {
                warn!(error = %e, "plan task failed");
                return OperationOutcome {
                    failed: 1,
                    aborted: true,
                    ..Default::default()
                };
            }
        }
    };
    run_plan(op, plan, ctx).await
}

async fn run_plan(op: Operation, plan: OperationPlan, ctx: WorkerContext) -> OperationOutcome {
    let mut progress = ProgressPublisher::new(ctx.progress.clone(), plan.bytes_total);
    let mut policy = ErrorPolicy::default();
    let mut outcome = OperationOutcome::default();
    debug!(entries = plan.entries.len(), bytes = plan.bytes_total, "operation plan ready");

    'entries: for action in &plan.entries {
        if ctx.interrupted() {
            outcome.aborted = true;
            break;
        }
        progress.set_current(action.display_path());
        progress.publish(false);

        loop {
            match execute(action, &op.options, &mut policy, &ctx, &mut progress).await {
                Ok(ExecResult::Done { bytes: _ }) => {
                    outcome.completed += 1;
                    break;
                }
                Ok(ExecResult::SkippedByUser) => {
                    outcome.skipped += 1;
                    break;
                }
                Err(OpError::Interrupted) | Err(OpError::UserCancel) => {
                    outcome.aborted = true;
                    break 'entries;
                }
                Err(err) => {
                    let kind = err.kind();
                    if policy.pre_handled(kind) {
                        outcome.skipped += 1;
                        break;
                    }
                    if ctx.critical.is_cancelled() {
                        // No dialogs during critical shutdown.
                        outcome.aborted = true;
                        break 'entries;
                    }
                    let decision = ctx
                        .prompts
                        .error_choice(ErrorPrompt {
                            title: action.display_path().display().to_string(),
                            verb: action.verb(),
                            detail: err.to_string(),
                            kind,
                            offers_ignore: kind == OpErrorKind::Read,
                            offers_focus: kind == OpErrorKind::NameTooLong,
                        })
                        .await;
                    match decision {
                        ErrorDecision::Retry => continue,
                        ErrorDecision::Skip | ErrorDecision::Ignore => {
                            outcome.skipped += 1;
                            break;
                        }
                        ErrorDecision::SkipAll => {
                            policy.skip_all = true;
                            outcome.skipped += 1;
                            break;
                        }
                        ErrorDecision::IgnoreAll => {
                            policy.ignore_all.insert(kind);
                            outcome.skipped += 1;
                            break;
                        }
                        ErrorDecision::Focus => {
                            outcome.focus_request =
                                Some(action.display_path().to_path_buf());
                            outcome.skipped += 1;
                            break;
                        }
                        ErrorDecision::Cancel => {
                            outcome.aborted = true;
                            break 'entries;
                        }
                    }
                }
            }
        }
    }

    outcome.bytes_done = progress.bytes_done;
    progress.publish(true);
    info!(
        completed = outcome.completed,
        skipped = outcome.skipped,
        aborted = outcome.aborted,
        "operation finished"
    );
    outcome
}

async fn execute(
    action: &PlanAction,
    options: &OperationOptions,
    policy: &mut ErrorPolicy,
    ctx: &WorkerContext,
    progress: &mut ProgressPublisher,
) -> Result<ExecResult, OpError> {
    match action {
        PlanAction::CreateDir { target } => {
            TokioFs::create_dir_all(target)
                .await
                .map_err(|e| OpError::io(target, e))?;
            Ok(ExecResult::Done { bytes: 0 })
        }
        PlanAction::CopyFile {
            source,
            target,
            size: _,
        } => {
            let target = compose_target(source, target)?;
            match clearance(&target, source, options, policy, ctx).await? {
                Clearance::Skip => return Ok(ExecResult::SkippedByUser),
                Clearance::Proceed => {}
            }
            let bytes = copy_file(source, &target, ctx, progress).await?;
            Ok(ExecResult::Done { bytes })
        }
        PlanAction::MoveFile {
            source,
            target,
            size,
        } => {
            let target = compose_target(source, target)?;
            match clearance(&target, source, options, policy, ctx).await? {
                Clearance::Skip => return Ok(ExecResult::SkippedByUser),
                Clearance::Proceed => {}
            }
            // Rename is the fast path on one volume; cross-volume falls
            // back to copy plus delete.
            match TokioFs::rename(source, &target).await {
                Ok(()) => {
                    progress.add_bytes(*size);
                    Ok(ExecResult::Done { bytes: *size })
                }
                Err(_) => {
                    let bytes = copy_file(source, &target, ctx, progress).await?;
                    TokioFs::remove_file(source)
                        .await
                        .map_err(|e| OpError::io(source, e))?;
                    Ok(ExecResult::Done { bytes })
                }
            }
        }
        PlanAction::RemoveFile { path } => {
            TokioFs::remove_file(path)
                .await
                .map_err(|e| OpError::io(path, e))?;
            Ok(ExecResult::Done { bytes: 0 })
        }
        PlanAction::RemoveDir { path } => {
            TokioFs::remove_dir(path)
                .await
                .map_err(|e| OpError::io(path, e))?;
            Ok(ExecResult::Done { bytes: 0 })
        }
        PlanAction::SetAttrs { path, attr } => {
            set_attrs(path, attr).await?;
            Ok(ExecResult::Done { bytes: 0 })
        }
        PlanAction::PackFile {
            archive,
            interior,
            source,
            size,
        } => {
            let archiver = options
                .archiver
                .clone()
                .ok_or_else(|| OpError::io(archive, unsupported("no packer registered")))?;
            let (archive, interior, source_path) =
                (archive.clone(), interior.clone(), source.clone());
            tokio::task::spawn_blocking(move || archiver.pack(&archive, &interior, &source_path))
                .await
                .map_err(|e| OpError::io(source, io::Error::other(e)))?
                .map_err(|e| OpError::io(source, e))?;
            progress.add_bytes(*size);
            Ok(ExecResult::Done { bytes: *size })
        }
        PlanAction::UnpackAll { archive, dest } => {
            let archiver = options
                .archiver
                .clone()
                .ok_or_else(|| OpError::io(archive, unsupported("no unpacker registered")))?;
            let (archive_path, dest) = (archive.clone(), dest.clone());
            tokio::task::spawn_blocking(move || archiver.unpack(&archive_path, &dest))
                .await
                .map_err(|e| OpError::io(archive, io::Error::other(e)))?
                .map_err(|e| OpError::io(archive, e))?;
            Ok(ExecResult::Done { bytes: 0 })
        }
    }
}

fn unsupported(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::Unsupported, msg.to_string())
}

/// 8.3 alias of a source file, when the platform provides one. Short names
/// are a Windows volume facility; elsewhere there is never an alternative
/// and the long-name error stands.
fn short_name_alternative(_source: &Path) -> Option<String> {
    None
}

/// Length-check the composed target, attempting the source's short-name
/// alias before giving up.
fn compose_target(source: &Path, target: &Path) -> Result<PathBuf, OpError> {
    if target.as_os_str().len() <= PLATFORM_MAX_PATH {
        return Ok(target.to_path_buf());
    }
    if let (Some(short), Some(parent)) = (short_name_alternative(source), target.parent()) {
        let alt = parent.join(short);
        if alt.as_os_str().len() <= PLATFORM_MAX_PATH {
            return Ok(alt);
        }
    }
    Err(OpError::NameTooLong(target.to_path_buf()))
}

enum Clearance {
    Proceed,
    Skip,
}

/// Overwrite gate in front of clobbering primitives.
async fn clearance(
    target: &Path,
    source: &Path,
    options: &OperationOptions,
    policy: &mut ErrorPolicy,
    ctx: &WorkerContext,
) -> Result<Clearance, OpError> {
    let meta = match TokioFs::symlink_metadata(target).await {
        Ok(m) => m,
        Err(_) => return Ok(Clearance::Proceed),
    };
    if !options.overwrite_prompts || policy.overwrite_all {
        return Ok(Clearance::Proceed);
    }
    if policy.overwrite_skip_all {
        return Ok(Clearance::Skip);
    }
    if ctx.critical.is_cancelled() {
        return Err(OpError::Interrupted);
    }
    let system_or_hidden = options.confirm_system_hidden && is_system_or_hidden(&meta);
    let decision = ctx
        .prompts
        .overwrite_choice(OverwritePrompt {
            target: target.to_path_buf(),
            source: Some(source.to_path_buf()),
            system_or_hidden,
        })
        .await;
    match decision {
        OverwriteDecision::Yes => Ok(Clearance::Proceed),
        OverwriteDecision::YesAll => {
            policy.overwrite_all = true;
            Ok(Clearance::Proceed)
        }
        OverwriteDecision::Skip => Ok(Clearance::Skip),
        OverwriteDecision::SkipAll => {
            policy.overwrite_skip_all = true;
            Ok(Clearance::Skip)
        }
        OverwriteDecision::Cancel => Err(OpError::UserCancel),
    }
}

#[cfg(windows)]
fn is_system_or_hidden(meta: &std::fs::Metadata) -> bool {
    use std::os::windows::fs::MetadataExt;
    const HIDDEN: u32 = 0x2;
    const SYSTEM: u32 = 0x4;
    meta.file_attributes() & (HIDDEN | SYSTEM) != 0
}

#[cfg(not(windows))]
fn is_system_or_hidden(_meta: &std::fs::Metadata) -> bool {
    false
}

/// Streamed copy in 64 KiB chunks; the cancel events are polled between
/// chunks, so cancellation lands within one chunk of request.
async fn copy_file(
    source: &Path,
    target: &Path,
    ctx: &WorkerContext,
    progress: &mut ProgressPublisher,
) -> Result<u64, OpError> {
    if let Some(parent) = target.parent() {
        TokioFs::create_dir_all(parent)
            .await
            .map_err(|e| OpError::io(parent, e))?;
    }
    let mut src = TokioFs::File::open(source)
        .await
        .map_err(|e| OpError::io(source, e))?;
    let mut dst = TokioFs::File::create(target)
        .await
        .map_err(|e| OpError::io(target, e))?;

    let mut buffer = vec![0u8; COPY_CHUNK];
    let mut copied = 0u64;
    loop {
        if ctx.interrupted() {
            // Roll forward: handles close on drop, the operation is marked
            // aborted by the caller.
            return Err(OpError::Interrupted);
        }
        let n = src
            .read(&mut buffer)
            .await
            .map_err(|e| OpError::io(source, e))?;
        if n == 0 {
            break;
        }
        dst.write_all(&buffer[..n])
            .await
            .map_err(|e| OpError::io(target, e))?;
        copied += n as u64;
        progress.add_bytes(n as u64);
        progress.publish(false);
    }
    dst.flush().await.map_err(|e| OpError::io(target, e))?;
    Ok(copied)
}

async fn set_attrs(path: &Path, attr: &AttrChange) -> Result<(), OpError> {
    if let Some(read_only) = attr.read_only {
        let meta = TokioFs::symlink_metadata(path)
            .await
            .map_err(|e| OpError::io(path, e))?;
        let mut perms = meta.permissions();
        perms.set_readonly(read_only);
        TokioFs::set_permissions(path, perms)
            .await
            .map_err(|e| OpError::io(path, e))?;
    }
    // Hidden and system bits exist only on Windows volumes; elsewhere the
    // request is a no-op.
    #[cfg(windows)]
    {
        let _ = (attr.hidden, attr.system);
    }
    Ok(())
}
