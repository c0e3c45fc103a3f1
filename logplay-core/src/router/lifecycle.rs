//! Task lifecycle inferred from replayed status samples
//!
//! The status port of a recorded task carries an integer state code. Replaying
//! it updates the task's advisory [`LifecycleState`] and asks the live task
//! handle to follow along.
//!
//! | code | status          | request   |
//! |------|-----------------|-----------|
//! | 0    | Init            | configure |
//! | 1    | PreOperational  | -         |
//! | 2    | FatalError      | -         |
//! | 3    | Exception       | -         |
//! | 4    | Stopped         | stop      |
//! | 5    | Running         | start     |
//! | 6    | RuntimeError    | -         |

use crate::transport::TaskHandle;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Advisory state of a replayed task
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// No status seen yet, or the task reported Init
    #[default]
    Unconfigured,
    /// Configured but not running
    Configured,
    /// Running
    Running,
    /// Stopped
    Stopped,
    /// Any error status
    Error,
}

/// Request forwarded to a task handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleAction {
    /// Configure the task
    Configure,
    /// Start the task
    Start,
    /// Stop the task
    Stop,
}

impl LifecycleAction {
    /// Send the request to `handle`, logging failures
    pub fn apply(self, handle: &dyn TaskHandle) {
        let result = match self {
            LifecycleAction::Configure => handle.configure(),
            LifecycleAction::Start => handle.start(),
            LifecycleAction::Stop => handle.stop(),
        };

        match result {
            Ok(()) => debug!(task = handle.name(), action = ?self, "Lifecycle request sent"),
            Err(e) => warn!(task = handle.name(), action = ?self, "Lifecycle request failed: {}", e),
        }
    }
}

/// Decoded status code of a recorded task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// Code 0, freshly created
    Init,
    /// Code 1, configured and waiting for start
    PreOperational,
    /// Code 2
    FatalError,
    /// Code 3
    Exception,
    /// Code 4
    Stopped,
    /// Code 5
    Running,
    /// Code 6
    RuntimeError,
    /// A code outside the table
    Unrecognized(i64),
}

impl From<i64> for TaskStatus {
    fn from(code: i64) -> Self {
        match code {
            0 => TaskStatus::Init,
            1 => TaskStatus::PreOperational,
            2 => TaskStatus::FatalError,
            3 => TaskStatus::Exception,
            4 => TaskStatus::Stopped,
            5 => TaskStatus::Running,
            6 => TaskStatus::RuntimeError,
            other => TaskStatus::Unrecognized(other),
        }
    }
}

impl TaskStatus {
    /// Wire code of the status
    pub fn code(&self) -> i64 {
        match self {
            TaskStatus::Init => 0,
            TaskStatus::PreOperational => 1,
            TaskStatus::FatalError => 2,
            TaskStatus::Exception => 3,
            TaskStatus::Stopped => 4,
            TaskStatus::Running => 5,
            TaskStatus::RuntimeError => 6,
            TaskStatus::Unrecognized(code) => *code,
        }
    }

    /// Request to forward to the task handle.
    ///
    /// Unrecognized codes only map to a start request when
    /// `unknown_starts_task` is set.
    pub fn action(&self, unknown_starts_task: bool) -> Option<LifecycleAction> {
        match self {
            TaskStatus::Init => Some(LifecycleAction::Configure),
            TaskStatus::Stopped => Some(LifecycleAction::Stop),
            TaskStatus::Running => Some(LifecycleAction::Start),
            TaskStatus::Unrecognized(_) if unknown_starts_task => Some(LifecycleAction::Start),
            TaskStatus::PreOperational
            | TaskStatus::FatalError
            | TaskStatus::Exception
            | TaskStatus::RuntimeError
            | TaskStatus::Unrecognized(_) => None,
        }
    }

    /// Advisory state implied by the status, `None` for unrecognized codes
    pub fn lifecycle_state(&self) -> Option<LifecycleState> {
        match self {
            TaskStatus::Init => Some(LifecycleState::Unconfigured),
            TaskStatus::PreOperational => Some(LifecycleState::Configured),
            TaskStatus::Stopped => Some(LifecycleState::Stopped),
            TaskStatus::Running => Some(LifecycleState::Running),
            TaskStatus::FatalError | TaskStatus::Exception | TaskStatus::RuntimeError => {
                Some(LifecycleState::Error)
            }
            TaskStatus::Unrecognized(_) => None,
        }
    }
}
