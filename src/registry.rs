/// The authoritative set of configured watchdogs.
///
/// Construction merges user configuration, schema defaults and recovered
/// checkpoint counters into one `Watchdog` per valid entry. Afterwards the
/// registry advances every active watchdog once per sample.
use crate::checkpoint::Checkpoint;
use crate::config::WatchdogEntry;
use crate::notify::{Notification, NotificationSink, NotificationState};
use crate::watchdog::{Action, TickOutcome, Watchdog, WatchdogSpec, WatchdogState};
use std::collections::{BTreeSet, HashMap, HashSet};

pub const DEFAULT_THRESHOLD: f64 = 0.0;
pub const DEFAULT_START_ACTION_THRESHOLD: i64 = 3;
pub const STOP_ACTION_THRESHOLD_OFFSET: u32 = 3;

/// Overall status line reported to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginStatus {
    /// Watching the listed interfaces (sorted, de-duplicated).
    Watching(Vec<String>),
    Disabled,
}

impl std::fmt::Display for PluginStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PluginStatus::Watching(interfaces) => write!(
                f,
                "watching interface{} {}",
                if interfaces.len() == 1 { "" } else { "s" },
                interfaces.join(", ")
            ),
            PluginStatus::Disabled => write!(f, "stopped: no watchdogs are configured"),
        }
    }
}

/// A restart committed by one watchdog during a sample cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartRequest {
    pub watchdog: String,
    pub interface: String,
    pub notification_path: String,
    pub attempt: u32,
    pub limit: u32,
}

pub struct Registry {
    watchdogs: Vec<Watchdog>,
    rejected: usize,
    heartbeat: u64,
}

impl Registry {
    /// Build the registry from raw configuration entries and a recovered
    /// checkpoint. Invalid entries are dropped and logged.
    pub fn build(entries: &[WatchdogEntry], plugin_id: &str, checkpoint: &Checkpoint) -> Self {
        let mut ordinals: HashMap<&str, u32> = HashMap::new();
        let mut names: HashSet<String> = HashSet::new();
        let mut watchdogs = Vec::new();
        let mut rejected = 0;

        for (index, entry) in entries.iter().enumerate() {
            let resolved = resolve_spec(entry, plugin_id, &mut ordinals).and_then(|spec| {
                if names.contains(&spec.name) {
                    Err(format!("duplicate watchdog name '{}'", spec.name))
                } else {
                    Ok(spec)
                }
            });

            match resolved {
                Ok(spec) => {
                    names.insert(spec.name.clone());
                    let recovered = checkpoint.entry(&spec.name);
                    if let Some(r) = recovered {
                        tracing::debug!(
                            watchdog = %spec.name,
                            restart_count = ?r.restart_count,
                            problems_since_file_creation = r.problems_since_file_creation,
                            "recovered checkpoint state"
                        );
                    }
                    watchdogs.push(Watchdog::new(spec, recovered));
                }
                Err(reason) => {
                    tracing::warn!(
                        index,
                        name = entry.name.as_deref().unwrap_or("(unnamed)"),
                        "dropping watchdog ({reason})"
                    );
                    rejected += 1;
                }
            }
        }

        Self {
            watchdogs,
            rejected,
            heartbeat: 0,
        }
    }

    /// Announce every watchdog as waiting for activity and report the
    /// plugin status. A registry with no watchdogs is disabled.
    pub fn start(&self, sink: &mut dyn NotificationSink) -> PluginStatus {
        if self.watchdogs.is_empty() {
            tracing::warn!("stopped: no watchdogs are configured");
            return PluginStatus::Disabled;
        }
        for watchdog in &self.watchdogs {
            tracing::debug!(
                watchdog = %watchdog.name,
                interface = %watchdog.interface,
                "waiting for interface to become active"
            );
            sink.notify(
                &watchdog.notification_path,
                Notification::new(
                    NotificationState::Alert,
                    "Waiting for interface to become active",
                ),
            );
        }
        let status = self.status();
        tracing::info!("{status}");
        status
    }

    pub fn status(&self) -> PluginStatus {
        if self.watchdogs.is_empty() {
            return PluginStatus::Disabled;
        }
        let interfaces: BTreeSet<&str> =
            self.watchdogs.iter().map(|w| w.interface.as_str()).collect();
        PluginStatus::Watching(interfaces.into_iter().map(str::to_string).collect())
    }

    /// Advance every active watchdog by one tick.
    ///
    /// Watchdogs are visited in reverse registration order. Interfaces absent
    /// from `throughputs` count as zero throughput. Returns the first restart
    /// committed this cycle; the remaining watchdogs still tick.
    pub fn on_sample(
        &mut self,
        throughputs: &HashMap<String, f64>,
        sink: &mut dyn NotificationSink,
    ) -> Option<RestartRequest> {
        self.heartbeat += 1;
        let heartbeat = self.heartbeat;
        let mut restart = None;

        for watchdog in self
            .watchdogs
            .iter_mut()
            .rev()
            .filter(|w| w.state != WatchdogState::Stopped)
        {
            let throughput = throughputs.get(&watchdog.interface).copied().unwrap_or(0.0);
            if let TickOutcome::RestartRequested { attempt, limit } =
                watchdog.tick(throughput, heartbeat, sink)
            {
                if restart.is_none() {
                    restart = Some(RestartRequest {
                        watchdog: watchdog.name.clone(),
                        interface: watchdog.interface.clone(),
                        notification_path: watchdog.notification_path.clone(),
                        attempt,
                        limit,
                    });
                }
            }
        }
        restart
    }

    /// Current watchdogs in registration order, including stopped ones.
    pub fn watchdogs(&self) -> &[Watchdog] {
        &self.watchdogs
    }

    /// Number of entries dropped during construction.
    pub fn rejected(&self) -> usize {
        self.rejected
    }

    /// Number of samples processed so far.
    pub fn heartbeat(&self) -> u64 {
        self.heartbeat
    }
}

/// Resolve one raw entry into a validated spec, assigning an ordinal name
/// when none was given.
///
/// Each field resolves independently as `user value ?? default`; counters
/// recovered from the checkpoint are applied later by `Watchdog::new`.
fn resolve_spec<'a>(
    entry: &'a WatchdogEntry,
    plugin_id: &str,
    ordinals: &mut HashMap<&'a str, u32>,
) -> Result<WatchdogSpec, String> {
    let interface = match entry.interface.as_deref() {
        Some(i) if !i.trim().is_empty() => i,
        _ => return Err("required property 'interface' is missing".to_string()),
    };

    // Ordinals are consumed before validation; rejected entries still use one.
    let name = match entry.name.as_deref() {
        Some(n) if !n.trim().is_empty() => n.to_string(),
        _ => {
            let ordinal = ordinals.entry(interface).or_insert(0);
            let name = format!("{interface}-{ordinal}");
            *ordinal += 1;
            name
        }
    };

    let action = match entry.action.as_deref() {
        None => Action::default(),
        Some(raw) => raw
            .parse::<Action>()
            .map_err(|e| format!("property 'action' is invalid: {e}"))?,
    };

    let threshold = entry.threshold.unwrap_or(DEFAULT_THRESHOLD);
    if !threshold.is_finite() {
        return Err("property 'threshold' must be a finite number".to_string());
    }

    let start = entry
        .start_action_threshold
        .unwrap_or(DEFAULT_START_ACTION_THRESHOLD);
    if start <= 0 {
        return Err(format!("startActionThreshold must be positive (got {start})"));
    }
    let start = u32::try_from(start).map_err(|_| format!("startActionThreshold {start} is too large"))?;

    let stop = resolve_stop_threshold(entry.stop_action_threshold, start);

    let notification_path = match entry.notification_path.as_deref() {
        Some(p) if !p.trim().is_empty() => p.to_string(),
        _ => format!("notifications.plugins.{plugin_id}.watchdogs.{name}"),
    };

    Ok(WatchdogSpec {
        name,
        interface: interface.to_string(),
        threshold,
        start_action_threshold: start,
        stop_action_threshold: stop,
        action,
        notification_path,
    })
}

/// The configured stop threshold, or `start + 3` when it is unset, not
/// positive, or below `start`.
fn resolve_stop_threshold(configured: Option<i64>, start: u32) -> u32 {
    let fallback = start.saturating_add(STOP_ACTION_THRESHOLD_OFFSET);
    match configured {
        None => fallback,
        Some(stop) => match u32::try_from(stop) {
            Ok(stop) if stop >= start && stop > 0 => stop,
            _ => {
                tracing::warn!(
                    stop_action_threshold = stop,
                    start_action_threshold = start,
                    "invalid stopActionThreshold, using {fallback}"
                );
                fallback
            }
        },
    }
}
