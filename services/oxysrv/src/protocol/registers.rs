//! PLC register service
//!
//! The one place that turns register-level intents (read the sensor
//! block, set an alarm bit) into codec frames and exchanges. A single
//! "operation in progress" flag serializes access to the PLC: overlapping
//! reads are rejected so the poller skips a cycle instead of piling up,
//! while writes wait their turn because alarm feedback must not be
//! dropped.

use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use super::codec;
use super::transport::{ConnectionStatus, PlcTransport};
use crate::error::{OxySrvError, Result};

/// Base address of the sensor raw-value block
pub const SENSOR_BLOCK_ADDRESS: &str = "002000";

/// Number of register slots in the sensor block
pub const DEFAULT_SENSOR_COUNT: usize = 8;

/// Demo mode keeps the last slot at zero to exercise the sensor-error path
const DEMO_DEAD_SLOT: usize = 7;

// Demo raw counts hover around ambient air (~21% with the default
// calibration curve).
const DEMO_RAW_MIN: u16 = 4500;
const DEMO_RAW_MAX: u16 = 5500;

/// Poll step while a write waits for the busy flag to clear
const WRITE_WAIT_POLL: Duration = Duration::from_millis(25);
/// Upper bound on the write wait; a read exchange finishes well within this
const WRITE_WAIT_TIMEOUT: Duration = Duration::from_secs(3);

/// Register-level access to the chamber PLC
#[derive(Debug)]
pub struct RegisterService {
    transport: PlcTransport,
    demo_mode: bool,
    busy: AtomicBool,
}

impl RegisterService {
    pub fn new(transport: PlcTransport, demo_mode: bool) -> Self {
        if demo_mode {
            info!("Register service running in demo mode, PLC transport bypassed");
        }
        Self {
            transport,
            demo_mode,
            busy: AtomicBool::new(false),
        }
    }

    /// Connection status for health checks
    ///
    /// Demo mode reports connected since there is no transport to fail.
    pub async fn status(&self) -> ConnectionStatus {
        if self.demo_mode {
            ConnectionStatus::Connected
        } else {
            self.transport.status().await
        }
    }

    /// Read the first `count` raw values from the sensor block
    ///
    /// Fails immediately with [`OxySrvError::BusyError`] when another
    /// operation is in flight; callers are expected to skip a cycle.
    pub async fn read_raw_values(&self, count: usize) -> Result<Vec<u16>> {
        if self.busy.swap(true, Ordering::SeqCst) {
            return Err(OxySrvError::busy(
                "Another PLC operation is in progress".to_string(),
            ));
        }

        let result = self.read_inner(count).await;
        self.busy.store(false, Ordering::SeqCst);
        result
    }

    async fn read_inner(&self, count: usize) -> Result<Vec<u16>> {
        if self.demo_mode {
            return Ok(self.demo_samples(count));
        }

        let request = codec::encode_read_command(SENSOR_BLOCK_ADDRESS)?;
        let response = self.transport.exchange(&request).await?;
        let mut samples = codec::decode_response(&response);
        samples.truncate(count);
        debug!("Read {} raw values from sensor block", samples.len());
        Ok(samples)
    }

    /// Write a 16-bit value to an arbitrary register
    ///
    /// Unlike reads, waits for an outstanding operation to finish before
    /// proceeding. Alarm feedback writes go through here and must not be
    /// silently dropped.
    pub async fn write_register(&self, address: &str, value: u16) -> Result<()> {
        let deadline = Instant::now() + WRITE_WAIT_TIMEOUT;
        while self.busy.swap(true, Ordering::SeqCst) {
            if Instant::now() >= deadline {
                return Err(OxySrvError::busy(format!(
                    "Timed out waiting to write register {address}"
                )));
            }
            sleep(WRITE_WAIT_POLL).await;
        }

        let result = self.write_inner(address, value).await;
        self.busy.store(false, Ordering::SeqCst);
        result
    }

    async fn write_inner(&self, address: &str, value: u16) -> Result<()> {
        if self.demo_mode {
            info!("Demo mode: skipping PLC write of {value} to register {address}");
            return Ok(());
        }

        let request = codec::encode_write_command(address, value)?;
        self.transport.exchange(&request).await?;
        debug!("Wrote {value} to register {address}");
        Ok(())
    }

    fn demo_samples(&self, count: usize) -> Vec<u16> {
        let mut rng = rand::thread_rng();
        (0..count)
            .map(|slot| {
                if slot == DEMO_DEAD_SLOT {
                    0
                } else {
                    rng.gen_range(DEMO_RAW_MIN..=DEMO_RAW_MAX)
                }
            })
            .collect()
    }
}
