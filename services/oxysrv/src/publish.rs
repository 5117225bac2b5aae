//! Event fan-out
//!
//! Core state changes are announced as fire-and-forget events. The
//! publisher trait is injected into the poller, the calibration engine
//! and the alarm machine; [`RedisPublisher`] ships events to Redis
//! pub/sub channels via a buffered background task so a slow broker
//! never stalls a poll cycle.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::error::Result;
use crate::model::{AlarmKind, SensorStatus};

/// Notifications produced by the core
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    ChamberRawValueChanged {
        chamber_id: i64,
        name: String,
        raw_value: u16,
        sensor_index: usize,
        timestamp: DateTime<Utc>,
    },
    AlarmTriggered {
        alarm_id: i64,
        chamber_id: i64,
        kind: AlarmKind,
        o2_level: Option<f64>,
        timestamp: DateTime<Utc>,
    },
    AlarmResolved {
        alarm_id: i64,
        chamber_id: i64,
        kind: AlarmKind,
        timestamp: DateTime<Utc>,
    },
    CalibrationPerformed {
        chamber_id: i64,
        calibration_id: i64,
        slope: f64,
        offset: f64,
        timestamp: DateTime<Utc>,
    },
    ChamberSnapshot {
        chamber_id: i64,
        raw_value: u16,
        o2_level: f64,
        sensor_status: SensorStatus,
        timestamp: DateTime<Utc>,
    },
}

impl Event {
    /// Pub/sub topic the event is delivered on
    pub fn topic(&self) -> &'static str {
        match self {
            Event::ChamberRawValueChanged { .. } => "chamber_raw_value",
            Event::AlarmTriggered { .. } => "alarm_triggered",
            Event::AlarmResolved { .. } => "alarm_resolved",
            Event::CalibrationPerformed { .. } => "calibration_performed",
            Event::ChamberSnapshot { .. } => "chamber_snapshot",
        }
    }
}

/// Fire-and-forget event sink
///
/// Delivery is best-effort; implementations must not block the caller on
/// broker acknowledgment.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: Event) -> Result<()>;
}

/// Redis pub/sub publisher
pub struct RedisPublisher {
    tx: mpsc::Sender<Event>,
}

impl RedisPublisher {
    /// Channel capacity before events are dropped
    const BUFFER: usize = 1024;

    pub fn new(redis_url: String) -> Self {
        let (tx, rx) = mpsc::channel(Self::BUFFER);
        tokio::spawn(Self::publish_task(redis_url, rx));
        Self { tx }
    }

    async fn publish_task(redis_url: String, mut rx: mpsc::Receiver<Event>) {
        let client = match redis::Client::open(redis_url.as_str()) {
            Ok(client) => client,
            Err(e) => {
                error!("Invalid Redis URL '{redis_url}': {e}");
                return;
            },
        };
        let mut conn = None;

        while let Some(event) = rx.recv().await {
            let payload = match serde_json::to_string(&event) {
                Ok(payload) => payload,
                Err(e) => {
                    error!("Failed to serialize event: {e}");
                    continue;
                },
            };
            let channel = format!("oxysrv:{}", event.topic());

            if conn.is_none() {
                match redis::aio::ConnectionManager::new(client.clone()).await {
                    Ok(manager) => conn = Some(manager),
                    Err(e) => {
                        warn!("Failed to connect to Redis, dropping event: {e}");
                        continue;
                    },
                }
            }
            if let Some(manager) = conn.as_mut() {
                let result: redis::RedisResult<()> = redis::cmd("PUBLISH")
                    .arg(&channel)
                    .arg(&payload)
                    .query_async(manager)
                    .await;
                if let Err(e) = result {
                    warn!("Failed to publish to {channel}: {e}");
                    conn = None;
                } else {
                    debug!("Published event to {channel}");
                }
            }
        }
    }
}

#[async_trait]
impl EventPublisher for RedisPublisher {
    async fn publish(&self, event: Event) -> Result<()> {
        // try_send keeps this non-blocking; a full buffer means the
        // broker is unreachable and the event is sacrificed.
        if let Err(e) = self.tx.try_send(event) {
            warn!("Event buffer full, dropping event: {e}");
        }
        Ok(())
    }
}

/// Publisher that only logs; used when no broker is wired up
#[derive(Debug, Default)]
pub struct NullPublisher;

#[async_trait]
impl EventPublisher for NullPublisher {
    async fn publish(&self, event: Event) -> Result<()> {
        debug!("Event (unpublished): {}", event.topic());
        Ok(())
    }
}

/// Publisher capturing events for assertions
#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    #[derive(Default)]
    pub struct RecordingPublisher {
        events: Arc<Mutex<Vec<Event>>>,
    }

    impl RecordingPublisher {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn events(&self) -> Vec<Event> {
            self.events.lock().await.clone()
        }

        pub async fn topics(&self) -> Vec<&'static str> {
            self.events.lock().await.iter().map(Event::topic).collect()
        }
    }

    #[async_trait]
    impl EventPublisher for RecordingPublisher {
        async fn publish(&self, event: Event) -> Result<()> {
            self.events.lock().await.push(event);
            Ok(())
        }
    }
}
