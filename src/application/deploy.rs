//! Site rebuild trigger modelled as a single-instance state machine.
//!
//! ```text
//! idle ──trigger──▶ pushing ──ok──▶ synced ──display──▶ idle
//!                      │                │
//!                      └──err──▶ failed ┴──trigger──▶ pushing
//!                                  │
//!                                  ├──retry──▶ pushing
//!                                  └──display──▶ idle
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::sync::watch;
use tracing::{error, info};

use super::error::{FailureCause, Operation, OperationError};
use super::repos::DeployHook;

const SOURCE: &str = "application::deploy";
const DEFAULT_SYNCED_DISPLAY_MS: u64 = 1_500;
const DEFAULT_FAILED_DISPLAY_MS: u64 = 2_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeployState {
    #[default]
    Idle,
    Pushing,
    Synced,
    Failed,
}

impl DeployState {
    pub fn as_str(self) -> &'static str {
        match self {
            DeployState::Idle => "idle",
            DeployState::Pushing => "pushing",
            DeployState::Synced => "synced",
            DeployState::Failed => "failed",
        }
    }

    /// Next state for `event`, or `None` when the event does not apply.
    pub fn on(self, event: DeployEvent) -> Option<DeployState> {
        match (self, event) {
            (DeployState::Idle | DeployState::Synced | DeployState::Failed, DeployEvent::Trigger) => {
                Some(DeployState::Pushing)
            }
            (DeployState::Failed, DeployEvent::Retry) => Some(DeployState::Pushing),
            (DeployState::Pushing, DeployEvent::Succeeded) => Some(DeployState::Synced),
            (DeployState::Pushing, DeployEvent::Failed) => Some(DeployState::Failed),
            (DeployState::Synced | DeployState::Failed, DeployEvent::DisplayElapsed) => {
                Some(DeployState::Idle)
            }
            _ => None,
        }
    }
}

impl fmt::Display for DeployState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployEvent {
    Trigger,
    Retry,
    Succeeded,
    Failed,
    DisplayElapsed,
}

/// Snapshot published to subscribers on every transition.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeployStatus {
    pub state: DeployState,
    /// Incremented on every transition.
    pub generation: u64,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployOutcome {
    Deployed,
    /// A deploy was already in flight; no new hook call was made.
    AlreadyPushing,
    /// The request does not apply in the current state.
    Skipped { state: DeployState },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeployConfig {
    pub synced_display: Duration,
    pub failed_display: Duration,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            synced_display: Duration::from_millis(DEFAULT_SYNCED_DISPLAY_MS),
            failed_display: Duration::from_millis(DEFAULT_FAILED_DISPLAY_MS),
        }
    }
}

impl From<&crate::config::DeploySettings> for DeployConfig {
    fn from(settings: &crate::config::DeploySettings) -> Self {
        Self {
            synced_display: settings.synced_display,
            failed_display: settings.failed_display,
        }
    }
}

pub struct DeployTrigger {
    hook: Arc<dyn DeployHook>,
    config: DeployConfig,
    status: Arc<watch::Sender<DeployStatus>>,
}

impl DeployTrigger {
    pub fn new(hook: Arc<dyn DeployHook>, config: DeployConfig) -> Self {
        let (status, _) = watch::channel(DeployStatus::default());
        Self {
            hook,
            config,
            status: Arc::new(status),
        }
    }

    pub fn status(&self) -> DeployStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<DeployStatus> {
        self.status.subscribe()
    }

    /// Start a rebuild unless one is already in flight.
    pub async fn trigger_deploy(&self) -> Result<DeployOutcome, OperationError> {
        self.run(DeployEvent::Trigger).await
    }

    /// Start a rebuild after a failure, without waiting for the failure
    /// display to elapse.
    pub async fn retry_deploy(&self) -> Result<DeployOutcome, OperationError> {
        self.run(DeployEvent::Retry).await
    }

    async fn run(&self, event: DeployEvent) -> Result<DeployOutcome, OperationError> {
        let mut from = DeployState::Idle;
        let mut generation = 0;
        let started = self.status.send_if_modified(|status| {
            from = status.state;
            match status.state.on(event) {
                Some(next) => {
                    status.state = next;
                    status.generation += 1;
                    status.last_error = None;
                    generation = status.generation;
                    true
                }
                None => false,
            }
        });

        if !started {
            return Ok(match from {
                DeployState::Pushing => DeployOutcome::AlreadyPushing,
                state => DeployOutcome::Skipped { state },
            });
        }

        counter!("folio_deploy_total").increment(1);
        info!(target = SOURCE, from = %from, ?event, "Deploy started");

        // The hook call and its settlement run detached, so a caller that
        // stops waiting cannot leave the state stuck in `pushing`.
        let hook = Arc::clone(&self.hook);
        let status = Arc::clone(&self.status);
        let config = self.config;
        let handle = tokio::spawn(async move {
            let result = hook.trigger().await;
            let last_error = result.as_ref().err().map(ToString::to_string);
            let outcome = match last_error {
                None => DeployEvent::Succeeded,
                Some(_) => DeployEvent::Failed,
            };
            finish(&status, config, generation, outcome, last_error);
            result
        });

        let cause = match handle.await {
            Ok(Ok(())) => {
                info!(target = SOURCE, "Deploy hook accepted");
                return Ok(DeployOutcome::Deployed);
            }
            Ok(Err(err)) => FailureCause::from(err),
            Err(join) => {
                finish(
                    &self.status,
                    self.config,
                    generation,
                    DeployEvent::Failed,
                    Some(join.to_string()),
                );
                FailureCause::Interrupted(join.to_string())
            }
        };
        error!(target = SOURCE, error = %cause, "Deploy hook failed");
        Err(OperationError::new(
            Operation::TriggerDeploy,
            None,
            1,
            cause,
        ))
    }
}

/// Apply a hook result to push `generation`, unless a newer transition
/// already owns the state.
fn finish(
    status: &Arc<watch::Sender<DeployStatus>>,
    config: DeployConfig,
    generation: u64,
    event: DeployEvent,
    last_error: Option<String>,
) {
    let mut settled = None;
    status.send_if_modified(|status| {
        if status.generation != generation {
            return false;
        }
        match status.state.on(event) {
            Some(next) => {
                status.state = next;
                status.generation += 1;
                status.last_error = last_error;
                settled = Some((next, status.generation));
                true
            }
            None => false,
        }
    });

    if let Some((state, generation)) = settled {
        schedule_reset(status, config, state, generation);
    }
}

fn schedule_reset(
    status: &Arc<watch::Sender<DeployStatus>>,
    config: DeployConfig,
    state: DeployState,
    generation: u64,
) {
    let delay = match state {
        DeployState::Synced => config.synced_display,
        DeployState::Failed => config.failed_display,
        DeployState::Idle | DeployState::Pushing => return,
    };
    let status = Arc::clone(status);
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        // Skip when a newer transition owns the state.
        status.send_if_modified(|status| {
            if status.generation != generation {
                return false;
            }
            match status.state.on(DeployEvent::DisplayElapsed) {
                Some(next) => {
                    status.state = next;
                    status.generation += 1;
                    true
                }
                None => false,
            }
        });
    });
}
