use std::io::{self, ErrorKind};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::time::timeout;
use tracing::debug;

use super::{ControlError, DetectorControl, DetectorState};

/// Timeout for the initial TCP connect to the control server.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Timeout for a single command/reply round trip.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Line-oriented client for the detector control server.
///
/// Commands go out as single lines. The server answers a status query with
/// a dot-terminated state word (`"Idle."`, `"Acquiring."`) and every other
/// command with an integer return code, `0` meaning accepted. Exposure and
/// latency times travel in microseconds on the wire.
#[derive(Debug)]
pub struct TcpDetector {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    request_timeout: Duration,
}

impl TcpDetector {
    pub async fn connect(addr: &str) -> Result<Self, ControlError> {
        Self::connect_with_timeouts(addr, CONNECT_TIMEOUT, REQUEST_TIMEOUT).await
    }

    /// Connect within `connect_timeout` and verify the server answers the
    /// ready probe before handing the client out.
    pub async fn connect_with_timeouts(
        addr: &str,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, ControlError> {
        let stream = timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_elapsed| {
                io::Error::new(
                    ErrorKind::TimedOut,
                    format!("connect to {addr} timed out after {connect_timeout:?}"),
                )
            })??;
        // Command/ack round trips are latency measurements; don't batch them.
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();
        let mut detector = Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            request_timeout,
        };
        detector.command_ok("AskReady").await?;
        debug!(addr, "control server ready");
        Ok(detector)
    }

    /// Send one command line and read one reply line.
    async fn round_trip(&mut self, command: &str) -> Result<String, ControlError> {
        self.writer.write_all(command.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;

        let mut reply = String::new();
        let bytes = timeout(self.request_timeout, self.reader.read_line(&mut reply))
            .await
            .map_err(|_elapsed| {
                io::Error::new(
                    ErrorKind::TimedOut,
                    format!("no reply to `{command}` within {:?}", self.request_timeout),
                )
            })??;
        if bytes == 0 {
            return Err(ControlError::Transport(io::Error::new(
                ErrorKind::UnexpectedEof,
                "control server closed the connection",
            )));
        }
        Ok(reply.trim().to_string())
    }

    /// Round trip for commands acknowledged with a return code.
    async fn command_ok(&mut self, command: &str) -> Result<(), ControlError> {
        let reply = self.round_trip(command).await?;
        if reply == "0" {
            Ok(())
        } else {
            let name = command.split_whitespace().next().unwrap_or(command);
            Err(ControlError::Rejected {
                command: name.to_string(),
                reply,
            })
        }
    }
}

#[async_trait]
impl DetectorControl for TcpDetector {
    async fn state(&mut self) -> Result<DetectorState, ControlError> {
        let reply = self.round_trip("GetDetectorStatus").await?;
        // The status word is terminated by a period; anything after it is
        // server-side detail the poll loop doesn't need.
        let word = match reply.find('.') {
            Some(pos) => &reply[..pos],
            None => reply.as_str(),
        };
        Ok(DetectorState::parse(word))
    }

    async fn set_exposure_time(&mut self, exposure: Duration) -> Result<(), ControlError> {
        self.command_ok(&format!("SetExposureTime {}", exposure.as_micros()))
            .await
    }

    async fn set_latency_time(&mut self, latency: Duration) -> Result<(), ControlError> {
        self.command_ok(&format!("SetLatencyTime {}", latency.as_micros()))
            .await
    }

    async fn start(&mut self) -> Result<(), ControlError> {
        self.command_ok("StartExposure").await
    }

    async fn stop(&mut self) -> Result<(), ControlError> {
        self.command_ok("AbortCurrentProcess").await
    }
}

#[cfg(test)]
#[path = "tcp_tests.rs"]
mod tests;
