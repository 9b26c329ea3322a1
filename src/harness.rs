use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::detector::DetectorControl;
use crate::poll::{PollResult, StatePoller};

/// Parameters of one acquisition cycle.
#[derive(Debug, Clone, Copy)]
pub struct CyclePlan {
    pub exposure: Duration,
    /// Settling sleep after natural completion, or the detector latency for
    /// forced-stop cycles (configured on the device and slept after stop).
    pub latency: Duration,
    /// When set, force a stop this long after start instead of waiting for
    /// natural completion.
    pub stop_after: Option<Duration>,
}

/// Outcome of a harness loop, serializable for `--json` output.
#[derive(Debug, Clone, Serialize)]
pub struct LoopSummary {
    pub cycles: u32,
    pub faults: u32,
    pub elapsed_ms: u64,
}

impl LoopSummary {
    pub fn all_idle(&self) -> bool {
        self.faults == 0
    }
}

/// Run `cycles` acquisition cycles against one detector.
///
/// A cycle that ends with the detector not idle is counted and the loop
/// continues; on a long soak run a fault is an observation, not a reason
/// to stop. Only communication failures abort the loop. Cancellation is
/// honored between cycles; a cycle in flight finishes on its own timeouts.
pub async fn run_cycles<C>(
    control: &mut C,
    poller: &StatePoller,
    plan: CyclePlan,
    cycles: u32,
    cancel: &CancellationToken,
) -> Result<LoopSummary>
where
    C: DetectorControl + ?Sized,
{
    // Reach a known state before the first cycle.
    control
        .stop()
        .await
        .context("initial stop before cycling failed")?;

    let begin = Instant::now();
    let mut completed = 0u32;
    let mut faults = 0u32;
    for cycle in 0..cycles {
        if cancel.is_cancelled() {
            info!(cycle, "cancelled; stopping between cycles");
            break;
        }
        println!("[{}] cycle {cycle} start", timestamp());
        let result = match plan.stop_after {
            Some(stop_after) => poller
                .run_with_forced_stop(control, plan.exposure, plan.latency, stop_after)
                .await
                .with_context(|| format!("cycle {cycle} failed"))?,
            None => poller
                .run_to_idle(control, plan.exposure, plan.latency)
                .await
                .with_context(|| format!("cycle {cycle} failed"))?,
        };
        completed += 1;
        println!("{}", render_cycle_line(cycle, &result));
        if !result.final_state.is_idle() {
            faults += 1;
            warn!(cycle, state = %result.final_state, "cycle ended with detector not idle");
        }
    }

    Ok(LoopSummary {
        cycles: completed,
        faults,
        elapsed_ms: begin.elapsed().as_millis() as u64,
    })
}

/// One human-readable line per finished cycle.
pub fn render_cycle_line(cycle: u32, result: &PollResult) -> String {
    format!(
        "[{}] cycle {cycle}: {} after {:.1} ms{}",
        timestamp(),
        result.final_state,
        result.duration().as_secs_f64() * 1e3,
        if result.forced_stop {
            " (forced stop)"
        } else {
            ""
        },
    )
}

/// Millisecond wall-clock stamp for probe output lines.
pub fn timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

#[cfg(test)]
#[path = "harness_tests.rs"]
mod tests;
