/// Per-interface throughput watchdog state machine.
///
/// Each watchdog consumes one throughput sample per tick, counts consecutive
/// failure ticks, and walks the state machine that raises notifications and
/// escalates from restart requests to suspension or termination.
use crate::checkpoint::CheckpointEntry;
use crate::notify::{Notification, NotificationSink, NotificationState};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Policy executed while a watchdog is in the `problem` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    #[default]
    None,
    RestartServer,
    SuspendWatchdog,
    StopWatchdog,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::None => "none",
            Action::RestartServer => "restart-server",
            Action::SuspendWatchdog => "suspend-watchdog",
            Action::StopWatchdog => "stop-watchdog",
        }
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Action::None),
            "restart-server" => Ok(Action::RestartServer),
            "suspend-watchdog" => Ok(Action::SuspendWatchdog),
            "stop-watchdog" => Ok(Action::StopWatchdog),
            other => Err(format!("unknown action '{other}'")),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Watchdog machine states.
///
/// `Suspend` and `Stop` are transient: they settle into `Suspended` and
/// `Stopped` within the tick that entered them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum WatchdogState {
    Starting,
    Normal,
    NewlyNormal,
    Problem,
    Suspend,
    Suspended,
    Stop,
    Stopped,
}

impl WatchdogState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WatchdogState::Starting => "starting",
            WatchdogState::Normal => "normal",
            WatchdogState::NewlyNormal => "newly-normal",
            WatchdogState::Problem => "problem",
            WatchdogState::Suspend => "suspend",
            WatchdogState::Suspended => "suspended",
            WatchdogState::Stop => "stop",
            WatchdogState::Stopped => "stopped",
        }
    }

    /// True for the states of a stopping sequence.
    pub fn is_stopping(&self) -> bool {
        matches!(self, WatchdogState::Stop | WatchdogState::Stopped)
    }

    /// True once no further ticks have any effect.
    pub fn is_terminal(&self) -> bool {
        matches!(self, WatchdogState::Suspended | WatchdogState::Stopped)
    }
}

impl fmt::Display for WatchdogState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One state-history record, written on every transition.
#[derive(Debug, Clone, PartialEq)]
pub struct StateHistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub tick: u64,
    pub exception_count: u32,
    pub state: WatchdogState,
}

impl fmt::Display for StateHistoryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.timestamp.format("%Y-%m-%dT%H:%M:%S"),
            self.tick,
            self.exception_count,
            self.state
        )
    }
}

/// Fully resolved, validated watchdog configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchdogSpec {
    pub name: String,
    pub interface: String,
    pub threshold: f64,
    pub start_action_threshold: u32,
    pub stop_action_threshold: u32,
    pub action: Action,
    pub notification_path: String,
}

/// What the caller must do after a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing further; the tick's side effects are complete.
    Continue,
    /// The watchdog committed restart attempt `attempt` of `limit`. The caller
    /// must checkpoint state and end the process.
    RestartRequested { attempt: u32, limit: u32 },
}

#[derive(Debug, Clone)]
pub struct Watchdog {
    pub name: String,
    pub interface: String,
    pub threshold: f64,
    pub start_action_threshold: u32,
    pub stop_action_threshold: u32,
    pub action: Action,
    pub notification_path: String,

    pub state: WatchdogState,
    pub state_history: Vec<StateHistoryEntry>,

    pub exception_count: u32,
    pub problem_count: u32,
    /// `None` while no restart escalation is in progress.
    pub restart_count: Option<u32>,
    pub problems_since_last_restart: u32,
    pub problems_since_file_creation: u32,
    pub problems_in_last_session: u32,
}

impl Watchdog {
    /// Build a watchdog for a new session, seeding the long-term counters
    /// from a recovered checkpoint entry when one matches.
    pub fn new(spec: WatchdogSpec, recovered: Option<&CheckpointEntry>) -> Self {
        let mut watchdog = Self {
            name: spec.name,
            interface: spec.interface,
            threshold: spec.threshold,
            start_action_threshold: spec.start_action_threshold,
            stop_action_threshold: spec.stop_action_threshold,
            action: spec.action,
            notification_path: spec.notification_path,
            state: WatchdogState::Starting,
            state_history: Vec::new(),
            exception_count: 0,
            problem_count: 0,
            restart_count: recovered.and_then(|c| c.restart_count),
            problems_since_last_restart: 0,
            problems_since_file_creation: recovered
                .map(|c| c.problems_since_file_creation)
                .unwrap_or(0),
            problems_in_last_session: recovered
                .map(|c| c.problems_in_last_session)
                .unwrap_or(0),
        };
        watchdog.record(WatchdogState::Starting, 0);
        watchdog
    }

    /// Number of restarts permitted before the watchdog gives up.
    pub fn restart_limit(&self) -> u32 {
        self.stop_action_threshold
            .saturating_sub(self.start_action_threshold)
    }

    /// Advance the machine by one sample.
    ///
    /// `heartbeat` is the registry's sample counter and is only used to stamp
    /// history entries.
    pub fn tick(
        &mut self,
        throughput: f64,
        heartbeat: u64,
        sink: &mut dyn NotificationSink,
    ) -> TickOutcome {
        if self.state.is_terminal() {
            return TickOutcome::Continue;
        }

        if throughput <= self.threshold {
            self.exception_count = self.exception_count.saturating_add(1);
            if self.exception_count == self.start_action_threshold && !self.state.is_stopping() {
                self.problem_count = 0;
                self.change_state(WatchdogState::Problem, heartbeat);
            }
        } else {
            self.exception_count = 0;
            if self.state != WatchdogState::Normal {
                self.change_state(WatchdogState::NewlyNormal, heartbeat);
            }
        }

        let outcome = match self.state {
            WatchdogState::Starting | WatchdogState::Normal => TickOutcome::Continue,
            WatchdogState::NewlyNormal => {
                tracing::debug!(
                    watchdog = %self.name,
                    interface = %self.interface,
                    "throughput moved above threshold"
                );
                self.send(
                    sink,
                    NotificationState::Normal,
                    format!("Throughput on {} moved above threshold", self.interface),
                );
                self.change_state(WatchdogState::Normal, heartbeat);
                self.restart_count = None;
                TickOutcome::Continue
            }
            WatchdogState::Problem => self.on_problem(heartbeat, sink),
            _ => TickOutcome::Continue,
        };

        self.settle(heartbeat, sink);
        outcome
    }

    fn on_problem(&mut self, heartbeat: u64, sink: &mut dyn NotificationSink) -> TickOutcome {
        self.problem_count = self.problem_count.saturating_add(1);
        self.problems_since_last_restart = self.problems_since_last_restart.saturating_add(1);
        self.problems_since_file_creation = self.problems_since_file_creation.saturating_add(1);

        match self.action {
            Action::RestartServer => {
                let limit = self.restart_limit();
                // A recovered count of 0 means no restart is in progress.
                let attempt = match self.restart_count {
                    None | Some(0) => 1,
                    Some(n) if n < limit => n + 1,
                    Some(_) => {
                        self.change_state(WatchdogState::Suspend, heartbeat);
                        return TickOutcome::Continue;
                    }
                };
                // A zero limit still allows the first attempt.
                self.restart_count = Some(attempt);
                let severity = if attempt >= limit {
                    NotificationState::Alarm
                } else {
                    NotificationState::Alert
                };
                tracing::debug!(
                    watchdog = %self.name,
                    interface = %self.interface,
                    attempt,
                    limit,
                    "throughput persistently below threshold, requesting restart"
                );
                self.send(
                    sink,
                    severity,
                    format!(
                        "Throughput on {} persistently below threshold: triggering restart {attempt} of {limit}",
                        self.interface
                    ),
                );
                TickOutcome::RestartRequested { attempt, limit }
            }
            Action::StopWatchdog => {
                self.change_state(WatchdogState::Stop, heartbeat);
                TickOutcome::Continue
            }
            Action::SuspendWatchdog => {
                self.change_state(WatchdogState::Suspend, heartbeat);
                TickOutcome::Continue
            }
            Action::None => TickOutcome::Continue,
        }
    }

    /// Resolve the transient `suspend` and `stop` states.
    fn settle(&mut self, heartbeat: u64, sink: &mut dyn NotificationSink) {
        match self.state {
            WatchdogState::Suspend => {
                tracing::warn!(watchdog = %self.name, interface = %self.interface, "suspending watchdog");
                self.send(
                    sink,
                    NotificationState::Warn,
                    format!("Suspending watchdog on {}", self.interface),
                );
                self.change_state(WatchdogState::Suspended, heartbeat);
            }
            WatchdogState::Stop => {
                tracing::warn!(watchdog = %self.name, interface = %self.interface, "terminating watchdog");
                self.send(
                    sink,
                    NotificationState::Warn,
                    format!("Terminating watchdog on {}", self.interface),
                );
                self.restart_count = None;
                self.change_state(WatchdogState::Stopped, heartbeat);
            }
            _ => {}
        }
    }

    fn send(&self, sink: &mut dyn NotificationSink, state: NotificationState, message: String) {
        sink.notify(&self.notification_path, Notification::new(state, message));
    }

    fn change_state(&mut self, state: WatchdogState, heartbeat: u64) {
        tracing::debug!(
            watchdog = %self.name,
            from = %self.state,
            to = %state,
            exception_count = self.exception_count,
            "state transition"
        );
        self.state = state;
        self.record(state, heartbeat);
    }

    fn record(&mut self, state: WatchdogState, heartbeat: u64) {
        self.state_history.push(StateHistoryEntry {
            timestamp: Utc::now(),
            tick: heartbeat,
            exception_count: self.exception_count,
            state,
        });
    }
}
