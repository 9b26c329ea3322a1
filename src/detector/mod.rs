use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

mod tcp;

pub use tcp::{CONNECT_TIMEOUT, REQUEST_TIMEOUT, TcpDetector};

/// State word reported by the detector control server on each status poll.
///
/// The recognized members drive the poll loop; anything else the server says
/// passes through as `Other` so a diagnostic run can still print the exact
/// word the server used. A value is a transient read, never cached beyond
/// the poll that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectorState {
    Idle,
    Busy,
    Fault,
    Other(String),
}

impl DetectorState {
    /// Parse a status word as the server reports it. `Acquiring` is the
    /// server's word for an exposure in progress.
    pub fn parse(word: &str) -> Self {
        match word {
            "Idle" => DetectorState::Idle,
            "Acquiring" | "Busy" | "Running" => DetectorState::Busy,
            "Fault" | "Error" => DetectorState::Fault,
            other => DetectorState::Other(other.to_string()),
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, DetectorState::Idle)
    }

    /// True while the poll loop should keep waiting: the detector is either
    /// acquiring or passing through a transient state (`Resetting`, ...).
    /// `Idle` and `Fault` are terminal for a cycle.
    pub fn is_settling(&self) -> bool {
        matches!(self, DetectorState::Busy | DetectorState::Other(_))
    }
}

impl fmt::Display for DetectorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectorState::Idle => f.write_str("Idle"),
            DetectorState::Busy => f.write_str("Busy"),
            DetectorState::Fault => f.write_str("Fault"),
            DetectorState::Other(word) => f.write_str(word),
        }
    }
}

/// Failure talking to the detector control server.
///
/// A non-idle detector state is not an error; it is reported through
/// `PollResult`. Only transport problems and rejected commands cross this
/// boundary as failures.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("detector connection failed: {0}")]
    Transport(#[from] std::io::Error),
    #[error("detector rejected `{command}`: {reply}")]
    Rejected { command: String, reply: String },
}

/// Command surface of the remote detector control server.
///
/// One caller per handle; status polls are strictly sequential, each poll
/// happening after the previous read returns.
#[async_trait]
pub trait DetectorControl: Send {
    async fn state(&mut self) -> Result<DetectorState, ControlError>;
    async fn set_exposure_time(&mut self, exposure: Duration) -> Result<(), ControlError>;
    async fn set_latency_time(&mut self, latency: Duration) -> Result<(), ControlError>;
    async fn start(&mut self) -> Result<(), ControlError>;
    async fn stop(&mut self) -> Result<(), ControlError>;
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
