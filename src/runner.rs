/// The event loop: owns the registry, feeds it samples, publishes status and
/// carries out committed restarts.
use crate::checkpoint::CheckpointStore;
use crate::config::AppConfig;
use crate::data_dir::DataDir;
use crate::notify::{Notification, NotificationLog, NotificationSink, NotificationState};
use crate::registry::{PluginStatus, Registry, RestartRequest};
use crate::sampler::SampleReader;
use crate::serve;
use crate::status::{StatusFile, StatusSnapshot};
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::AsyncBufRead;
use tokio::sync::watch;

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// No valid watchdogs were configured; nothing was watched.
    Disabled,
    /// Input ended or a shutdown signal arrived.
    Shutdown { checkpoint_saved: bool },
    /// A restart was committed and the checkpoint written. The caller must
    /// end the process so the supervisor can start a fresh one.
    Restart(RestartRequest),
}

struct Publisher {
    status_file: StatusFile,
    tx: watch::Sender<StatusSnapshot>,
}

impl Publisher {
    fn publish(&self, registry: &Registry, notifications: &NotificationLog) {
        let snapshot = StatusSnapshot::capture(registry, notifications);
        if let Err(e) = self.status_file.write(&snapshot) {
            tracing::warn!(error = %e, "failed to write status file");
        }
        self.tx.send_replace(snapshot);
    }
}

/// Run the watchdogs until input ends, `shutdown` resolves, or a restart is
/// committed.
pub async fn run<R, S>(config: &AppConfig, input: R, shutdown: S) -> Result<RunOutcome, RunError>
where
    R: AsyncBufRead + Unpin,
    S: Future<Output = ()>,
{
    let data_dir = DataDir::new(&config.storage.data_dir);
    data_dir.init().map_err(|e| RunError::DataDir {
        path: data_dir.root().to_path_buf(),
        source: e,
    })?;
    let _lock = data_dir.acquire_lock().map_err(|e| RunError::Lock {
        path: data_dir.lock(),
        source: e,
    })?;

    let mut store = CheckpointStore::new(data_dir.checkpoint());
    let checkpoint = store.load();
    let mut registry = Registry::build(&config.watchdogs, &config.plugin.id, &checkpoint);
    let mut notifications = NotificationLog::new();

    let (tx, rx) = watch::channel(StatusSnapshot::default());
    let publisher = Publisher {
        status_file: StatusFile::new(data_dir.status()),
        tx,
    };

    let status = registry.start(&mut notifications);
    publisher.publish(&registry, &notifications);
    if status == PluginStatus::Disabled {
        return Ok(RunOutcome::Disabled);
    }

    if config.serve.enabled {
        let serve_config = config.serve.clone();
        tokio::spawn(async move {
            if let Err(e) = serve::run(&serve_config, rx).await {
                tracing::warn!(error = %e, "status server stopped");
            }
        });
    }

    let mut samples = SampleReader::new(input);
    tokio::pin!(shutdown);

    loop {
        let next = tokio::select! {
            _ = &mut shutdown => break,
            next = samples.next_sample() => next,
        };
        let sample = match next {
            Ok(Some(sample)) => sample,
            Ok(None) => {
                tracing::info!("sample input closed");
                break;
            }
            Err(e) => {
                tracing::error!(error = %e, "sample input failed");
                break;
            }
        };

        let restart = registry.on_sample(&sample.throughputs, &mut notifications);

        if let Some(request) = restart {
            match store.save(registry.watchdogs()) {
                Ok(()) => {
                    tracing::warn!(
                        watchdog = %request.watchdog,
                        interface = %request.interface,
                        attempt = request.attempt,
                        limit = request.limit,
                        delay_ms = config.restart.delay_ms,
                        "checkpoint written, restarting"
                    );
                    publisher.publish(&registry, &notifications);
                    tokio::time::sleep(Duration::from_millis(config.restart.delay_ms)).await;
                    return Ok(RunOutcome::Restart(request));
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        watchdog = %request.watchdog,
                        "restart aborted: checkpoint could not be written"
                    );
                    notifications.notify(
                        &request.notification_path,
                        Notification::new(
                            NotificationState::Alarm,
                            "Restart aborted: checkpoint could not be written",
                        ),
                    );
                }
            }
        }

        publisher.publish(&registry, &notifications);
    }

    let checkpoint_saved = match store.save(registry.watchdogs()) {
        Ok(()) => true,
        Err(e) => {
            tracing::error!(error = %e, "failed to write checkpoint on shutdown");
            false
        }
    };
    Ok(RunOutcome::Shutdown { checkpoint_saved })
}

/// Errors that prevent the runner from starting.
#[derive(Debug)]
pub enum RunError {
    DataDir {
        path: PathBuf,
        source: std::io::Error,
    },
    Lock {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunError::DataDir { path, source } => {
                write!(f, "failed to create data directory {}: {source}", path.display())
            }
            RunError::Lock { path, source } => write!(
                f,
                "data directory is in use by another process (lock {}): {source}",
                path.display()
            ),
        }
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RunError::DataDir { source, .. } => Some(source),
            RunError::Lock { source, .. } => Some(source),
        }
    }
}
