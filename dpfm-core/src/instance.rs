//! Single-instance coordination through the configuration directory: a
//! lock file marks the running instance, and a second process deposits its
//! parsed parameters plus a stamp for the first one to consume at idle.
//! The request is honored only while younger than the activation TTL.

use std::{
    fs,
    io,
    path::{Path, PathBuf},
};

use tracing::{debug, info, warn};

use crate::idle::dispatcher::ActivationRequest;

const LOCK_FILE: &str = "instance.lock";
const ACTIVATION_FILE: &str = "activation.json";

/// Holder of the single-instance lock; releases it on drop.
#[derive(Debug)]
pub struct InstanceGuard {
    lock_path: PathBuf,
}

#[derive(Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// This process is the first instance.
    Acquired,
    /// Another instance holds the lock.
    AlreadyRunning,
}

impl InstanceGuard {
    /// Try to become the single instance rooted at `dir`.
    pub fn acquire(dir: &Path) -> io::Result<(AcquireOutcome, Option<InstanceGuard>)> {
        fs::create_dir_all(dir)?;
        let lock_path = dir.join(LOCK_FILE);
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
        {
            Ok(_) => {
                let _ = fs::write(&lock_path, std::process::id().to_string());
                debug!(path = %lock_path.display(), "instance lock acquired");
                Ok((AcquireOutcome::Acquired, Some(InstanceGuard { lock_path })))
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                info!("another instance is running");
                Ok((AcquireOutcome::AlreadyRunning, None))
            }
            Err(e) => Err(e),
        }
    }
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.lock_path) {
            warn!(path = %self.lock_path.display(), error = %e, "instance lock not removed");
        }
    }
}

/// Deposit parameters for the running instance, overwriting any unconsumed
/// request.
pub fn post_activation(dir: &Path, request: &ActivationRequest) -> io::Result<()> {
    fs::create_dir_all(dir)?;
    let tmp = dir.join(format!("{ACTIVATION_FILE}.tmp"));
    let text = serde_json::to_string(request)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    fs::write(&tmp, text)?;
    fs::rename(&tmp, dir.join(ACTIVATION_FILE))
}

/// Consume a deposited request, if any. Freshness is the idle dispatcher's
/// business.
pub fn take_activation(dir: &Path) -> Option<ActivationRequest> {
    let path = dir.join(ACTIVATION_FILE);
    let text = fs::read_to_string(&path).ok()?;
    let _ = fs::remove_file(&path);
    match serde_json::from_str(&text) {
        Ok(request) => Some(request),
        Err(e) => {
            warn!(error = %e, "discarding malformed activation request");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;
    use tempfile::TempDir;

    fn request() -> ActivationRequest {
        ActivationRequest {
            left: None,
            right: Some("D:\\music".to_string()),
            active: None,
            active_hot: None,
            active_panel: None,
            stamp: SystemTime::now(),
        }
    }

    #[test]
    fn second_acquire_sees_running_instance() {
        let tmp = TempDir::new().unwrap();
        let (first, guard) = InstanceGuard::acquire(tmp.path()).unwrap();
        assert_eq!(first, AcquireOutcome::Acquired);
        let (second, _) = InstanceGuard::acquire(tmp.path()).unwrap();
        assert_eq!(second, AcquireOutcome::AlreadyRunning);

        drop(guard);
        let (third, _) = InstanceGuard::acquire(tmp.path()).unwrap();
        assert_eq!(third, AcquireOutcome::Acquired);
    }

    #[test]
    fn activation_roundtrip_consumes_the_file() {
        let tmp = TempDir::new().unwrap();
        let req = request();
        post_activation(tmp.path(), &req).unwrap();
        assert_eq!(take_activation(tmp.path()), Some(req));
        assert_eq!(take_activation(tmp.path()), None);
    }
}
