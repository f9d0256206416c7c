//! Service control for stackward
//!
//! The `ServiceController` trait is the only seam between the tool and the
//! container runtime. Raw status strings are decoded into [`RunState`] and
//! [`HealthState`] once, inside the implementation; everything downstream
//! matches on the enums.

pub mod compose;

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::error::StackResult;

pub use compose::ComposeController;

/// Whether the service's process is up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunState {
    Running,
    Starting,
    Stopped,
    Unknown,
}

/// Result of the service's own health check, if it has one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HealthState {
    Healthy,
    Unhealthy,
    None,
}

/// Typed state of one service at one poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceState {
    pub run: RunState,
    pub health: HealthState,
}

impl ServiceState {
    pub const fn new(run: RunState, health: HealthState) -> Self {
        Self { run, health }
    }

    pub const fn stopped() -> Self {
        Self::new(RunState::Stopped, HealthState::None)
    }

    pub const fn healthy() -> Self {
        Self::new(RunState::Running, HealthState::Healthy)
    }

    /// Running and either passing its health check or having none
    pub fn is_healthy(&self) -> bool {
        self.run == RunState::Running && self.health != HealthState::Unhealthy
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Starting => "starting",
            Self::Stopped => "stopped",
            Self::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Healthy => "healthy",
            Self::Unhealthy => "unhealthy",
            Self::None => "-",
        };
        write!(f, "{}", s)
    }
}

/// Queries and drives the services of the stack
pub trait ServiceController {
    /// Current typed state of one service
    fn query_state(&self, name: &str) -> StackResult<ServiceState>;

    fn start(&self, names: &[String]) -> StackResult<()>;

    fn stop(&self, names: &[String]) -> StackResult<()>;

    fn restart(&self, names: &[String]) -> StackResult<()>;

    /// Tear down and recreate the containers
    fn recreate(&self, names: &[String]) -> StackResult<()>;

    /// Run a command inside a running service and return its stdout
    fn exec_in_service(&self, name: &str, command: &[String]) -> StackResult<String>;

    /// Delay between polls in [`wait_until_healthy`](Self::wait_until_healthy)
    fn poll_interval(&self) -> Duration {
        Duration::from_secs(1)
    }

    /// Poll until the service is healthy, at most `timeout_secs` times
    ///
    /// Query failures count as "not yet healthy"; the loop never runs longer
    /// than its iteration cap.
    fn wait_until_healthy(&self, name: &str, timeout_secs: u64) -> bool {
        let attempts = timeout_secs.max(1);
        for attempt in 1..=attempts {
            match self.query_state(name) {
                Ok(state) if state.is_healthy() => return true,
                Ok(state) => {
                    tracing::debug!(service = name, attempt, run = %state.run, health = %state.health, "waiting for service");
                }
                Err(e) => {
                    tracing::debug!(service = name, attempt, error = %e, "state query failed while waiting");
                }
            }
            if attempt < attempts {
                std::thread::sleep(self.poll_interval());
            }
        }
        false
    }
}
