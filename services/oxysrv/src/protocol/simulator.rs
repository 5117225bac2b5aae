//! In-process PLC simulator for testing
//!
//! Speaks the same ASCII/LRC register protocol as the chamber PLC over a
//! real socket, one transaction per connection, so integration tests can
//! exercise codec, transport and register service end to end.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tracing::{debug, error};

use super::codec::{lrc, ETX, STX};

/// Simulated chamber PLC
pub struct PlcSimulator {
    /// Raw values served for sensor-block reads
    sensor_block: Arc<RwLock<Vec<u16>>>,
    /// Registers written by the service (alarm bits and friends)
    registers: Arc<RwLock<HashMap<String, u16>>>,
}

impl PlcSimulator {
    pub fn new(sensor_block: Vec<u16>) -> Self {
        Self {
            sensor_block: Arc::new(RwLock::new(sensor_block)),
            registers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Bind to an ephemeral local port and start serving
    ///
    /// Returns the bound address and a handle for inspecting simulator
    /// state from tests.
    pub async fn start(self) -> std::io::Result<(SocketAddr, Arc<Self>)> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        debug!("PLC simulator listening on {addr}");

        let sim = Arc::new(self);
        let server = sim.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        debug!("PLC simulator connection from {peer}");
                        let sim = server.clone();
                        tokio::spawn(async move {
                            if let Err(e) = sim.handle_connection(stream).await {
                                error!("PLC simulator connection error: {e}");
                            }
                        });
                    },
                    Err(e) => {
                        error!("PLC simulator accept error: {e}");
                        break;
                    },
                }
            }
        });

        Ok((addr, sim))
    }

    /// Replace the served sensor-block values
    pub async fn set_sensor_block(&self, values: Vec<u16>) {
        *self.sensor_block.write().await = values;
    }

    /// Value last written to a register, if any
    pub async fn register_value(&self, address: &str) -> Option<u16> {
        self.registers.read().await.get(address).copied()
    }

    // One transaction per connection, like the real device.
    async fn handle_connection(&self, mut stream: TcpStream) -> std::io::Result<()> {
        let mut buffer = [0u8; 64];
        let n = stream.read(&mut buffer).await?;
        if n == 0 {
            return Ok(());
        }
        let request = &buffer[..n];

        if request.len() < 13 || request[0] != STX {
            debug!("PLC simulator ignoring malformed request");
            return Ok(());
        }

        let response = match request[4] {
            b'6' => {
                let samples = self.sensor_block.read().await.clone();
                build_response(&samples)
            },
            b'7' if request.len() >= 17 => {
                let address = String::from_utf8_lossy(&request[7..13]).to_string();
                let value = std::str::from_utf8(&request[13..17])
                    .ok()
                    .and_then(|s| u16::from_str_radix(s, 16).ok())
                    .unwrap_or(0);
                self.registers.write().await.insert(address, value);
                build_response(&[])
            },
            _ => {
                debug!("PLC simulator ignoring unknown function code");
                return Ok(());
            },
        };

        stream.write_all(&response).await?;
        Ok(())
    }
}

/// Build a response frame carrying the given samples
fn build_response(samples: &[u16]) -> Vec<u8> {
    let mut frame = vec![STX, b'0', b'1', b'4', b'6', b'2'];
    for sample in samples {
        frame.extend_from_slice(format!("{sample:04x}").as_bytes());
    }
    let check = lrc(&frame);
    frame.extend_from_slice(check.as_bytes());
    frame.push(ETX);
    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::codec::decode_response;

    #[test]
    fn response_frames_decode_back_to_samples() {
        let frame = build_response(&[4660, 0, 23809]);
        assert_eq!(decode_response(&frame), vec![4660, 0, 23809]);
    }
}
