//! Fixed-interval polling scheduler
//!
//! One timer drives the whole acquisition path: read the sensor block,
//! fan the samples out to the mapped chambers, run each reading through
//! calibration and the alarm machine, and publish the updates. Cycles
//! are serialized; an overrunning cycle delays the next tick instead of
//! overlapping it. A failed cycle only bumps a counter — the next tick
//! is the retry.

use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::alarms::AlarmEngine;
use crate::calibration::CalibrationEngine;
use crate::model::{Chamber, SensorStatus};
use crate::protocol::{RegisterService, DEFAULT_SENSOR_COUNT};
use crate::publish::{Event, EventPublisher};
use crate::store::RecordStore;

/// Enforced lower bound on the poll period
pub const MIN_POLL_INTERVAL_MS: u64 = 100;

/// Cycle counters
#[derive(Debug, Default)]
struct PollingCounters {
    successful: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time view of the cycle counters
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct PollingStats {
    pub successful_cycles: u64,
    pub failed_cycles: u64,
    /// Percentage of cycles that succeeded; 100 when nothing ran yet
    pub success_rate: f64,
}

/// Fixed-interval polling scheduler
pub struct PollingScheduler {
    registers: Arc<RegisterService>,
    calibration: Arc<CalibrationEngine>,
    alarms: Arc<AlarmEngine>,
    store: Arc<dyn RecordStore>,
    publisher: Arc<dyn EventPublisher>,
    interval_ms: AtomicU64,
    /// Some while running; cancelling stops the cycle loop
    cancel: Mutex<Option<CancellationToken>>,
    counters: PollingCounters,
    sensor_count: usize,
}

impl PollingScheduler {
    pub fn new(
        registers: Arc<RegisterService>,
        calibration: Arc<CalibrationEngine>,
        alarms: Arc<AlarmEngine>,
        store: Arc<dyn RecordStore>,
        publisher: Arc<dyn EventPublisher>,
        interval_ms: u64,
    ) -> Self {
        Self {
            registers,
            calibration,
            alarms,
            store,
            publisher,
            interval_ms: AtomicU64::new(interval_ms.max(MIN_POLL_INTERVAL_MS)),
            cancel: Mutex::new(None),
            counters: PollingCounters::default(),
            sensor_count: DEFAULT_SENSOR_COUNT,
        }
    }

    /// Start the poll loop; the first cycle fires immediately
    ///
    /// Idempotent: calling while running logs a warning and does nothing.
    pub async fn start(self: &Arc<Self>) {
        let mut slot = self.cancel.lock().await;
        if slot.is_some() {
            warn!("Polling scheduler already running, ignoring start request");
            return;
        }

        let token = CancellationToken::new();
        *slot = Some(token.clone());
        drop(slot);

        let period = self.interval_ms.load(Ordering::SeqCst);
        info!("Polling scheduler started with {period} ms interval");

        let scheduler = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_millis(period));
            // An overrunning cycle delays the next tick; cycles never overlap
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => scheduler.run_cycle().await,
                }
            }
            debug!("Polling scheduler loop exited");
        });
    }

    /// Stop the poll loop
    ///
    /// Prevents any further cycle from starting; an in-flight exchange
    /// runs to its own timeout. Idempotent.
    pub async fn stop(&self) {
        if let Some(token) = self.cancel.lock().await.take() {
            token.cancel();
            info!("Polling scheduler stopped");
        }
    }

    /// Change the poll period, restarting the timer when running
    pub async fn set_interval(self: &Arc<Self>, interval_ms: u64) {
        let clamped = interval_ms.max(MIN_POLL_INTERVAL_MS);
        if clamped != interval_ms {
            warn!("Poll interval {interval_ms} ms below floor, using {clamped} ms");
        }
        self.interval_ms.store(clamped, Ordering::SeqCst);

        if self.cancel.lock().await.is_some() {
            self.stop().await;
            self.start().await;
        }
    }

    /// Current cycle counters and derived success rate
    pub fn stats(&self) -> PollingStats {
        let successful = self.counters.successful.load(Ordering::SeqCst);
        let failed = self.counters.failed.load(Ordering::SeqCst);
        let total = successful + failed;
        let success_rate = if total == 0 {
            100.0
        } else {
            successful as f64 / total as f64 * 100.0
        };
        PollingStats {
            successful_cycles: successful,
            failed_cycles: failed,
            success_rate,
        }
    }

    // One poll cycle. Never lets an error escape; the counters are the
    // only surface poll failures show up on.
    async fn run_cycle(&self) {
        let samples = match self.registers.read_raw_values(self.sensor_count).await {
            Ok(samples) => samples,
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::SeqCst);
                warn!("Poll cycle failed to read sensor block: {e}");
                return;
            },
        };

        let chambers = match self.store.list_active_chambers().await {
            Ok(chambers) => chambers,
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::SeqCst);
                warn!("Poll cycle failed to list chambers: {e}");
                return;
            },
        };

        // Fan out; ordering between chambers is not guaranteed
        let updates = chambers
            .into_iter()
            .map(|chamber| self.process_chamber(chamber, &samples));
        futures::future::join_all(updates).await;

        self.counters.successful.fetch_add(1, Ordering::SeqCst);
    }

    async fn process_chamber(&self, chamber: Chamber, samples: &[u16]) {
        let Some(index) = chamber.sensor_index else {
            debug!("Chamber {} has no sensor mapping, skipping", chamber.id);
            return;
        };
        let Some(&raw) = samples.get(index) else {
            debug!(
                "Chamber {} sensor index {index} outside sample range, skipping",
                chamber.id
            );
            return;
        };

        if let Err(e) = self.store.update_chamber_raw_value(chamber.id, raw).await {
            warn!("Failed to store raw value for chamber {}: {e}", chamber.id);
            return;
        }

        let now = Utc::now();
        self.publish(Event::ChamberRawValueChanged {
            chamber_id: chamber.id,
            name: chamber.name.clone(),
            raw_value: raw,
            sensor_index: index,
            timestamp: now,
        })
        .await;

        let o2_level = self.calibration.calibrate_reading(chamber.id, raw).await;
        // Zero counts means the probe is dead or unplugged
        let sensor_status = if raw == 0 {
            SensorStatus::Error
        } else {
            SensorStatus::Normal
        };

        self.publish(Event::ChamberSnapshot {
            chamber_id: chamber.id,
            raw_value: raw,
            o2_level,
            sensor_status,
            timestamp: now,
        })
        .await;

        if let Err(e) = self.alarms.evaluate(&chamber, o2_level, sensor_status).await {
            warn!("Alarm evaluation failed for chamber {}: {e}", chamber.id);
        }
    }

    async fn publish(&self, event: Event) {
        if let Err(e) = self.publisher.publish(event).await {
            warn!("Failed to publish poll event: {e}");
        }
    }
}
