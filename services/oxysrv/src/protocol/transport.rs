//! One-shot PLC transport
//!
//! The PLC accepts exactly one transaction per TCP connection, so every
//! exchange opens a fresh connection, writes the request, waits for a
//! single inbound read and closes. The response wait is a short-interval
//! poll of a slot filled by a reader task; the 250 ms connect bound, the
//! 1 s response bound and the 50 ms poll step match the latency profile
//! observed on the real hardware and are deliberately kept.

use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, RwLock};
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, warn};

use crate::error::{OxySrvError, Result};

/// Connect-phase timeout
pub const CONNECT_TIMEOUT: Duration = Duration::from_millis(250);
/// Response-wait timeout
pub const RESPONSE_TIMEOUT: Duration = Duration::from_millis(1000);
/// Interval at which the response slot is polled
const RESPONSE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Read buffer size; the largest sensor-block response is far smaller
const READ_BUFFER_SIZE: usize = 512;

/// Connection status exposed to health checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    Connected,
    Error,
}

/// PLC transport client
///
/// Owns no persistent connection; only the endpoint and the status of
/// the most recent exchange.
#[derive(Debug)]
pub struct PlcTransport {
    host: String,
    port: u16,
    status: Arc<RwLock<ConnectionStatus>>,
}

impl PlcTransport {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            status: Arc::new(RwLock::new(ConnectionStatus::Disconnected)),
        }
    }

    /// Status of the most recent exchange attempt
    pub async fn status(&self) -> ConnectionStatus {
        *self.status.read().await
    }

    async fn set_status(&self, status: ConnectionStatus) {
        *self.status.write().await = status;
    }

    /// Perform one request/response exchange
    ///
    /// Opens a new connection, writes the request, waits for exactly one
    /// inbound data event and closes the connection regardless of
    /// outcome. No retry happens here; the next poll cycle is the retry.
    pub async fn exchange(&self, request: &[u8]) -> Result<Vec<u8>> {
        let addr = format!("{}:{}", self.host, self.port);

        let stream = match timeout(CONNECT_TIMEOUT, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                self.set_status(ConnectionStatus::Error).await;
                return Err(OxySrvError::connection(format!(
                    "Failed to connect to PLC at {addr}: {e}"
                )));
            },
            Err(_) => {
                self.set_status(ConnectionStatus::Error).await;
                return Err(OxySrvError::timeout(format!(
                    "Connection to PLC at {addr} timed out after {CONNECT_TIMEOUT:?}"
                )));
            },
        };
        self.set_status(ConnectionStatus::Connected).await;
        debug!("Connected to PLC at {addr}");

        let (mut reader, mut writer) = stream.into_split();
        if let Err(e) = writer.write_all(request).await {
            self.set_status(ConnectionStatus::Error).await;
            return Err(OxySrvError::connection(format!(
                "Failed to send request to PLC: {e}"
            )));
        }
        debug!("Sent {} bytes to PLC", request.len());

        // Reader task fills the slot with the first inbound chunk; the
        // loop below polls until it arrives or the deadline passes.
        let slot: Arc<Mutex<Option<Vec<u8>>>> = Arc::new(Mutex::new(None));
        let reader_slot = slot.clone();
        let reader_task = tokio::spawn(async move {
            let mut buffer = vec![0u8; READ_BUFFER_SIZE];
            match reader.read(&mut buffer).await {
                Ok(n) if n > 0 => {
                    buffer.truncate(n);
                    *reader_slot.lock().await = Some(buffer);
                },
                Ok(_) => debug!("PLC closed connection without responding"),
                Err(e) => warn!("Error reading PLC response: {e}"),
            }
        });

        let deadline = Instant::now() + RESPONSE_TIMEOUT;
        loop {
            sleep(RESPONSE_POLL_INTERVAL).await;

            if let Some(response) = slot.lock().await.take() {
                debug!("Received {} bytes from PLC", response.len());
                return Ok(response);
            }
            if Instant::now() >= deadline {
                reader_task.abort();
                self.set_status(ConnectionStatus::Error).await;
                return Err(OxySrvError::timeout(format!(
                    "No response from PLC within {RESPONSE_TIMEOUT:?}"
                )));
            }
        }
        // Dropping the split halves closes the connection on every path.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn spawn_plc_stub(response: Option<Vec<u8>>) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let _ = stream.read(&mut buf).await;
            if let Some(data) = response {
                let _ = stream.write_all(&data).await;
            } else {
                // Hold the connection open without answering
                sleep(Duration::from_secs(3)).await;
            }
        });
        port
    }

    #[tokio::test]
    async fn exchange_returns_one_response() {
        let port = spawn_plc_stub(Some(b"\x02014 reply\x03".to_vec())).await;
        let transport = PlcTransport::new("127.0.0.1", port);

        let response = transport.exchange(b"request").await.unwrap();
        assert_eq!(response, b"\x02014 reply\x03");
        assert_eq!(transport.status().await, ConnectionStatus::Connected);
    }

    #[tokio::test]
    async fn exchange_times_out_when_plc_stays_silent() {
        let port = spawn_plc_stub(None).await;
        let transport = PlcTransport::new("127.0.0.1", port);

        let err = transport.exchange(b"request").await.unwrap_err();
        assert!(matches!(err, OxySrvError::TimeoutError(_)));
        assert_eq!(transport.status().await, ConnectionStatus::Error);
    }

    #[tokio::test]
    async fn exchange_fails_fast_when_nothing_listens() {
        // Bind-then-drop guarantees the port is closed
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let transport = PlcTransport::new("127.0.0.1", port);
        let err = transport.exchange(b"request").await.unwrap_err();
        assert!(matches!(
            err,
            OxySrvError::ConnectionError(_) | OxySrvError::TimeoutError(_)
        ));
        assert_eq!(transport.status().await, ConnectionStatus::Error);
    }
}
