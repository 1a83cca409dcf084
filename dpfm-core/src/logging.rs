//! Tracing setup: stderr by default, optional rolling file log. The guard
//! must stay alive for the life of the process so buffered lines flush.

use std::{io, path::Path};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry,
};

pub struct Logger {
    _guards: Vec<WorkerGuard>,
}

impl Logger {
    /// Stderr logging only, filtered by `RUST_LOG` (default `info`).
    pub fn init() -> io::Result<Logger> {
        Self::init_with_dir(None)
    }

    /// Stderr plus a daily-rolling file under `log_dir` when given.
    pub fn init_with_dir(log_dir: Option<&Path>) -> io::Result<Logger> {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info"));

        let mut guards = Vec::new();

        let (stderr_writer, stderr_guard) = tracing_appender::non_blocking(io::stderr());
        guards.push(stderr_guard);
        let stderr_layer = fmt::layer()
            .with_writer(stderr_writer)
            .with_target(true)
            .with_ansi(false);

        let file_layer = match log_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                let appender = tracing_appender::rolling::daily(dir, "dpfm.log");
                let (writer, guard) = tracing_appender::non_blocking(appender);
                guards.push(guard);
                Some(fmt::layer().with_writer(writer).with_ansi(false))
            }
            None => None,
        };

        // A second init (tests, embedding) is not an error worth failing
        // startup for.
        let _ = Registry::default()
            .with(filter)
            .with(stderr_layer)
            .with(file_layer)
            .try_init();

        Ok(Logger { _guards: guards })
    }
}
