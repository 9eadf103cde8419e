//! Worker lifecycle state.
//!
//! ```text
//! Parsed ──► Installing ──► Installed ──► Activating ──► Activated
//!                 │                            │
//!                 └──────────► Redundant ◄─────┘
//! ```

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::{Result, ServiceWorkerError};

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    /// Initial state, handlers registered.
    #[default]
    Parsed,
    /// Installing (install event).
    Installing,
    /// Installed but waiting for activation.
    Installed,
    /// Activating (activate event).
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Install or activation failed.
    Redundant,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Parsed => "parsed",
            WorkerState::Installing => "installing",
            WorkerState::Installed => "installed",
            WorkerState::Activating => "activating",
            WorkerState::Activated => "activated",
            WorkerState::Redundant => "redundant",
        }
    }

    fn can_transition_to(self, next: WorkerState) -> bool {
        use WorkerState::*;
        matches!(
            (self, next),
            (Parsed, Installing)
                | (Installing, Installed)
                | (Installed, Activating)
                | (Activating, Activated)
                | (Installing, Redundant)
                | (Installed, Redundant)
                | (Activating, Redundant)
        )
    }
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle notifications for the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    StateChange {
        version: String,
        state: WorkerState,
    },
    /// Activation may proceed without waiting for old clients.
    SkipWaiting { version: String },
}

/// Lifecycle of one worker version.
#[derive(Debug)]
pub struct Lifecycle {
    version: String,
    state: WorkerState,
    skip_waiting: bool,
    events: mpsc::UnboundedSender<LifecycleEvent>,
}

impl Lifecycle {
    pub fn new(version: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<LifecycleEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (
            Self {
                version: version.into(),
                state: WorkerState::Parsed,
                skip_waiting: false,
                events,
            },
            rx,
        )
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == WorkerState::Activated
    }

    pub fn is_redundant(&self) -> bool {
        self.state == WorkerState::Redundant
    }

    pub fn skip_waiting_requested(&self) -> bool {
        self.skip_waiting
    }

    /// Move to `next`, rejecting transitions the lifecycle does not allow.
    pub fn transition(&mut self, next: WorkerState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(ServiceWorkerError::state(format!(
                "cannot move from {} to {}",
                self.state, next
            )));
        }

        info!(version = %self.version, from = %self.state, to = %next, "Worker state change");
        self.state = next;
        // Nobody listening is fine.
        let _ = self.events.send(LifecycleEvent::StateChange {
            version: self.version.clone(),
            state: next,
        });
        Ok(())
    }

    /// Record a skip-waiting request. Ignored once the worker is active or redundant.
    pub fn skip_waiting(&mut self) -> bool {
        if matches!(self.state, WorkerState::Activated | WorkerState::Redundant) {
            debug!(version = %self.version, state = %self.state, "Skip waiting has no effect");
            return false;
        }
        if !self.skip_waiting {
            self.skip_waiting = true;
            let _ = self.events.send(LifecycleEvent::SkipWaiting {
                version: self.version.clone(),
            });
        }
        true
    }
}
