use std::time::Duration;

use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

use crate::detector::{ControlError, DetectorControl, DetectorState};

/// Timing knobs for the state poll loop.
///
/// `max_wait` bounds how long `run_to_idle` waits for the detector to
/// settle; `None` waits indefinitely. Set a bound when a server stuck in
/// `Acquiring` is a real possibility.
#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub poll_interval: Duration,
    pub max_wait: Option<Duration>,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1),
            max_wait: None,
        }
    }
}

/// Outcome of one acquisition cycle.
///
/// A `final_state` other than `Idle` means the cycle ended on a fault or on
/// the `max_wait` guard; the caller decides whether to keep cycling.
#[derive(Debug, Clone)]
pub struct PollResult {
    pub final_state: DetectorState,
    pub started_at: Instant,
    pub completed_at: Instant,
    pub forced_stop: bool,
}

impl PollResult {
    /// Time from the start command to the final state observation. The
    /// trailing dead-time sleep is not included.
    pub fn duration(&self) -> Duration {
        self.completed_at.duration_since(self.started_at)
    }
}

/// Drives one remote acquisition at a time and waits for the detector to
/// report idle again.
///
/// The server exposes no completion notification, so the wait is a sleep-poll
/// of `state()`: read immediately after start, then once per
/// `poll_interval` until the detector leaves its settling states.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatePoller {
    settings: PollSettings,
}

impl StatePoller {
    pub fn new(settings: PollSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> PollSettings {
        self.settings
    }

    /// Start an acquisition and poll until the detector settles.
    ///
    /// Transient states between busy and idle are polled through; `Idle` and
    /// `Fault` end the wait, as does an expired `max_wait` guard. After
    /// completion the call sleeps `dead_time` (the detector needs settling
    /// time between acquisitions) and returns with `forced_stop = false`.
    pub async fn run_to_idle<C>(
        &self,
        control: &mut C,
        exposure: Duration,
        dead_time: Duration,
    ) -> Result<PollResult, ControlError>
    where
        C: DetectorControl + ?Sized,
    {
        control.set_exposure_time(exposure).await?;
        let started_at = Instant::now();
        control.start().await?;
        let deadline = self.settings.max_wait.map(|limit| started_at + limit);

        let mut final_state = control.state().await?;
        while final_state.is_settling() {
            if let Some(deadline) = deadline
                && Instant::now() >= deadline
            {
                warn!(state = %final_state, "gave up waiting for idle after max_wait");
                break;
            }
            sleep(self.settings.poll_interval).await;
            final_state = control.state().await?;
        }
        let completed_at = Instant::now();
        debug!(
            state = %final_state,
            elapsed_ms = completed_at.duration_since(started_at).as_millis() as u64,
            "acquisition settled"
        );
        sleep(dead_time).await;

        Ok(PollResult {
            final_state,
            started_at,
            completed_at,
            forced_stop: false,
        })
    }

    /// Start an acquisition and cut it short with an explicit stop.
    ///
    /// Sleeps exactly `stop_after`, stops the detector whatever state it is
    /// in, and records the state observed immediately after the stop
    /// command. The trailing `latency` sleep mirrors the latency configured
    /// on the detector. Returns with `forced_stop = true`.
    pub async fn run_with_forced_stop<C>(
        &self,
        control: &mut C,
        exposure: Duration,
        latency: Duration,
        stop_after: Duration,
    ) -> Result<PollResult, ControlError>
    where
        C: DetectorControl + ?Sized,
    {
        control.set_exposure_time(exposure).await?;
        control.set_latency_time(latency).await?;
        let started_at = Instant::now();
        control.start().await?;

        sleep(stop_after).await;
        control.stop().await?;
        let final_state = control.state().await?;
        let completed_at = Instant::now();
        if !final_state.is_idle() {
            debug!(state = %final_state, "detector not idle after forced stop");
        }
        sleep(latency).await;

        Ok(PollResult {
            final_state,
            started_at,
            completed_at,
            forced_stop: true,
        })
    }
}

#[cfg(test)]
#[path = "poll_tests.rs"]
mod tests;
