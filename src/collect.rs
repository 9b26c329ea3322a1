use std::io::{self, ErrorKind};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::{Instant, timeout};
use tracing::{debug, trace};

/// Timing knobs for idle-gap reply collection.
///
/// `idle_gap` is the quiet period after which a reply that has started is
/// considered complete; a peer that never sends anything is given twice
/// that. `empty_backoff` paces the re-checks while nothing has arrived yet;
/// it is deliberately independent of `idle_gap`.
#[derive(Debug, Clone, Copy)]
pub struct CollectSettings {
    pub idle_gap: Duration,
    pub empty_backoff: Duration,
    pub read_chunk: usize,
}

impl Default for CollectSettings {
    fn default() -> Self {
        Self {
            idle_gap: Duration::from_millis(200),
            empty_backoff: Duration::from_millis(100),
            read_chunk: 8192,
        }
    }
}

/// Reply bytes gathered from a peer that signals completion only by going
/// quiet. Fragments are concatenated in arrival order; arrival order is
/// message order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatedResponse {
    pub bytes: Vec<u8>,
    pub fragments: usize,
    pub elapsed: Duration,
}

impl AggregatedResponse {
    fn empty(elapsed: Duration) -> Self {
        Self {
            bytes: Vec::new(),
            fragments: 0,
            elapsed,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fragments == 0
    }

    /// Reply rendered for human output; undecodable bytes are replaced.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// Instant at which collection gives up, given what has arrived so far:
/// one idle gap after the last fragment, or twice the gap from the start
/// when the peer has said nothing at all.
fn quiet_deadline(begin: Instant, last_progress: Option<Instant>, idle_gap: Duration) -> Instant {
    match last_progress {
        Some(at) => at + idle_gap,
        None => begin + idle_gap * 2,
    }
}

/// Send `payload` and collect the unframed reply by idle-gap timeout.
///
/// The wire format has no length prefix or terminator; completion is
/// inferred from a `settings.idle_gap` pause in arrival. A silent peer
/// yields an empty response after `2 × idle_gap`, and a peer that closes
/// the connection ends collection immediately. The socket's blocking mode
/// is never touched; reads are opportunistic `try_read`s between bounded
/// readiness waits. The caller keeps ownership of the connection.
pub async fn send_and_collect(
    stream: &mut TcpStream,
    payload: &[u8],
    settings: &CollectSettings,
) -> io::Result<AggregatedResponse> {
    stream.write_all(payload).await?;

    let begin = Instant::now();
    let mut bytes = Vec::new();
    let mut fragments = 0usize;
    let mut last_progress: Option<Instant> = None;
    let mut chunk = vec![0u8; settings.read_chunk.max(1)];

    loop {
        let deadline = quiet_deadline(begin, last_progress, settings.idle_gap);
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        // While nothing has arrived, re-check at the backoff pace; once the
        // reply has started, wait out the rest of the gap in one go.
        let mut wait = deadline - now;
        if last_progress.is_none() {
            wait = wait.min(settings.empty_backoff);
        }

        match timeout(wait, stream.readable()).await {
            Err(_elapsed) => continue,
            Ok(Err(err)) if err.kind() == ErrorKind::TimedOut => {
                // A receive timeout configured on the connection itself is
                // lenient-diagnostic territory: no reply is an answer.
                return Ok(AggregatedResponse::empty(begin.elapsed()));
            }
            Ok(Err(err)) => return Err(err),
            Ok(Ok(())) => match stream.try_read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    bytes.extend_from_slice(&chunk[..n]);
                    fragments += 1;
                    last_progress = Some(Instant::now());
                    trace!(n, total = bytes.len(), "reply fragment");
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) if err.kind() == ErrorKind::TimedOut => {
                    return Ok(AggregatedResponse::empty(begin.elapsed()));
                }
                Err(err) => return Err(err),
            },
        }
    }

    let elapsed = begin.elapsed();
    debug!(
        fragments,
        total = bytes.len(),
        elapsed_ms = elapsed.as_millis() as u64,
        "reply collection finished"
    );
    Ok(AggregatedResponse {
        bytes,
        fragments,
        elapsed,
    })
}

#[cfg(test)]
#[path = "collect_tests.rs"]
mod tests;
