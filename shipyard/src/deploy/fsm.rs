//! Finite state machine of a single deployment attempt

use crate::models::deployment::DeploymentStatus;

/// Deployment event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeploymentEvent {
    /// Start fetching upstream changes (pull or clone)
    Fetch,

    /// Upstream had nothing new
    NoChanges,

    /// New commits are checked out
    Fetched,

    /// Containers were restarted
    Restarted,

    /// Any stage failed
    Fail(String),
}

/// Deployment FSM
///
/// `pending -> pulling -> restarting -> success`, with `pulling -> success`
/// when there is nothing to deploy and `failed` reachable from every
/// non-terminal state.
#[derive(Debug, Clone)]
pub struct DeploymentFsm {
    state: DeploymentStatus,
    error: Option<String>,
}

impl DeploymentFsm {
    /// Create a new FSM in pending state
    pub fn new() -> Self {
        Self {
            state: DeploymentStatus::Pending,
            error: None,
        }
    }

    /// Get current state
    pub fn state(&self) -> DeploymentStatus {
        self.state
    }

    /// Get error message if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: DeploymentEvent) -> Result<DeploymentStatus, String> {
        let new_state = match (self.state, &event) {
            (DeploymentStatus::Pending, DeploymentEvent::Fetch) => DeploymentStatus::Pulling,

            (DeploymentStatus::Pulling, DeploymentEvent::NoChanges) => DeploymentStatus::Success,
            (DeploymentStatus::Pulling, DeploymentEvent::Fetched) => DeploymentStatus::Restarting,

            (DeploymentStatus::Restarting, DeploymentEvent::Restarted) => DeploymentStatus::Success,

            (state, DeploymentEvent::Fail(err)) if !state.is_terminal() => {
                self.error = Some(err.clone());
                DeploymentStatus::Failed
            }

            // Invalid transitions
            (state, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", state, event));
            }
        };

        self.state = new_state;
        Ok(new_state)
    }
}

impl Default for DeploymentFsm {
    fn default() -> Self {
        Self::new()
    }
}
