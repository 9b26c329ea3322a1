//! End-to-end tests against an in-process detector control server.
//!
//! These exercise the full client stack (TCP connect ↔ line protocol ↔
//! poll loop) plus the idle-gap reply collector against real sockets, with
//! real timers, so they run for a few hundred milliseconds each.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use detprobe::collect::{CollectSettings, send_and_collect};
use detprobe::detector::{DetectorControl, DetectorState, TcpDetector};
use detprobe::harness::{CyclePlan, run_cycles};
use detprobe::poll::{PollSettings, StatePoller};

mod acquire;

/// In-process detector control server.
///
/// Speaks the line protocol: commands in, `0`/`-1` acks out, dot-terminated
/// status words for `GetDetectorStatus`. An exposure runs for the configured
/// exposure time and completes on its own, or earlier on
/// `AbortCurrentProcess`.
pub struct SimDetector {
    addr: SocketAddr,
}

impl SimDetector {
    pub async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(handle_connection(stream));
            }
        });
        Self { addr }
    }

    pub fn addr(&self) -> String {
        self.addr.to_string()
    }
}

async fn handle_connection(stream: TcpStream) {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    let mut exposure = Duration::from_millis(100);
    let mut busy_until: Option<Instant> = None;

    while let Ok(Some(line)) = lines.next_line().await {
        let mut parts = line.split_whitespace();
        let verb = parts.next().unwrap_or("");
        let reply = match verb {
            "AskReady" => "0\n".to_string(),
            "GetDetectorStatus" => {
                if busy_until.is_some_and(|until| Instant::now() < until) {
                    "Acquiring.\n".to_string()
                } else {
                    busy_until = None;
                    "Idle.\n".to_string()
                }
            }
            "SetExposureTime" => match parts.next().and_then(|v| v.parse::<u64>().ok()) {
                Some(micros) => {
                    exposure = Duration::from_micros(micros);
                    "0\n".to_string()
                }
                None => "-1\n".to_string(),
            },
            "SetLatencyTime" => match parts.next().and_then(|v| v.parse::<u64>().ok()) {
                Some(_) => "0\n".to_string(),
                None => "-1\n".to_string(),
            },
            "StartExposure" => {
                busy_until = Some(Instant::now() + exposure);
                "0\n".to_string()
            }
            "AbortCurrentProcess" => {
                busy_until = None;
                "0\n".to_string()
            }
            _ => "-1\n".to_string(),
        };
        if write_half.write_all(reply.as_bytes()).await.is_err() {
            break;
        }
    }
}

/// Poller tuned for test-sized exposures.
pub fn quick_poller() -> StatePoller {
    StatePoller::new(PollSettings {
        poll_interval: Duration::from_millis(5),
        max_wait: Some(Duration::from_secs(5)),
    })
}
