//! Alarm state machine
//!
//! Evaluates each calibrated reading against the chamber's thresholds
//! and keeps alarm rows, subscribers and the PLC's alarm bits in step.
//! The record store is the source of truth; PLC feedback writes are
//! best-effort and a failed write never rolls back a record mutation.
//!
//! Muting carries a hardware asymmetry inherited from the deployed
//! installations: a muted alarm stays logically active but the PLC bit
//! is cleared, exactly as if it had been resolved.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{OxySrvError, Result};
use crate::model::{Alarm, AlarmKind, Chamber, NewAlarm, SensorStatus};
use crate::protocol::RegisterService;
use crate::publish::{Event, EventPublisher};
use crate::store::RecordStore;

/// PLC value for an asserted alarm bit
const ALARM_SET: u16 = 1;
/// PLC value for a cleared alarm bit
const ALARM_CLEAR: u16 = 0;

/// Mute duration applied when the caller does not provide one
const DEFAULT_MUTE_HOURS: i64 = 1;

/// Dedicated PLC alarm register per chamber
///
/// Only the first two chambers are wired to hardware indicators;
/// the rest get no feedback write.
fn alarm_register(chamber_id: i64) -> Option<&'static str> {
    match chamber_id {
        1 => Some("001701"),
        2 => Some("001702"),
        _ => None,
    }
}

/// Threshold evaluation and alarm lifecycle
pub struct AlarmEngine {
    store: Arc<dyn RecordStore>,
    registers: Arc<RegisterService>,
    publisher: Arc<dyn EventPublisher>,
}

impl AlarmEngine {
    pub fn new(
        store: Arc<dyn RecordStore>,
        registers: Arc<RegisterService>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            store,
            registers,
            publisher,
        }
    }

    /// Evaluate one calibrated reading for a chamber
    ///
    /// Runs all four alarm kinds; at most one active alarm exists per
    /// (chamber, kind) at any time.
    pub async fn evaluate(
        &self,
        chamber: &Chamber,
        o2_level: f64,
        sensor_status: SensorStatus,
    ) -> Result<()> {
        self.check_condition(
            chamber,
            AlarmKind::HighO2,
            o2_level > chamber.alarm_level_high,
            Some(o2_level),
            true,
        )
        .await?;
        self.check_condition(
            chamber,
            AlarmKind::LowO2,
            o2_level < chamber.alarm_level_low,
            Some(o2_level),
            true,
        )
        .await?;
        self.check_condition(
            chamber,
            AlarmKind::SensorError,
            sensor_status == SensorStatus::Error,
            None,
            false,
        )
        .await?;
        self.check_condition(
            chamber,
            AlarmKind::CalibrationDue,
            chamber.calibration_required,
            None,
            false,
        )
        .await?;
        Ok(())
    }

    async fn check_condition(
        &self,
        chamber: &Chamber,
        kind: AlarmKind,
        breached: bool,
        o2_level: Option<f64>,
        plc_feedback: bool,
    ) -> Result<()> {
        let existing = self.store.find_active_alarm(chamber.id, kind).await?;

        match (breached, existing) {
            (true, None) => {
                let alarm = self
                    .store
                    .create_alarm(NewAlarm {
                        chamber_id: chamber.id,
                        kind,
                        o2_level,
                    })
                    .await?;
                info!(
                    "Alarm {} triggered for chamber {} ({})",
                    alarm.id,
                    chamber.id,
                    kind.as_str()
                );
                self.publish(Event::AlarmTriggered {
                    alarm_id: alarm.id,
                    chamber_id: chamber.id,
                    kind,
                    o2_level,
                    timestamp: Utc::now(),
                })
                .await;
                if plc_feedback {
                    self.write_feedback(chamber.id, ALARM_SET).await;
                }
            },
            (false, Some(mut alarm)) => {
                alarm.active = false;
                alarm.resolved_at = Some(Utc::now());
                self.store.update_alarm(&alarm).await?;
                info!(
                    "Alarm {} resolved for chamber {} ({})",
                    alarm.id,
                    chamber.id,
                    kind.as_str()
                );
                self.publish(Event::AlarmResolved {
                    alarm_id: alarm.id,
                    chamber_id: chamber.id,
                    kind,
                    timestamp: Utc::now(),
                })
                .await;
                if plc_feedback {
                    self.write_feedback(chamber.id, ALARM_CLEAR).await;
                }
            },
            // Already in the right state; nothing to do
            _ => {},
        }
        Ok(())
    }

    /// Mute an alarm
    ///
    /// The row stays active but the PLC bit is cleared like a
    /// resolution, so the hardware indicator goes quiet immediately.
    pub async fn mute_alarm(
        &self,
        alarm_id: i64,
        muted_until: Option<DateTime<Utc>>,
    ) -> Result<Alarm> {
        let mut alarm = self
            .store
            .find_alarm(alarm_id)
            .await?
            .ok_or_else(|| OxySrvError::not_found(format!("Alarm {alarm_id}")))?;

        alarm.muted = true;
        alarm.muted_until =
            Some(muted_until.unwrap_or_else(|| Utc::now() + Duration::hours(DEFAULT_MUTE_HOURS)));
        self.store.update_alarm(&alarm).await?;
        info!("Alarm {alarm_id} muted until {:?}", alarm.muted_until);

        self.write_feedback(alarm.chamber_id, ALARM_CLEAR).await;
        Ok(alarm)
    }

    /// Manually resolve an alarm
    pub async fn resolve_alarm(&self, alarm_id: i64) -> Result<Alarm> {
        let mut alarm = self
            .store
            .find_alarm(alarm_id)
            .await?
            .ok_or_else(|| OxySrvError::not_found(format!("Alarm {alarm_id}")))?;

        alarm.active = false;
        alarm.resolved_at = Some(Utc::now());
        self.store.update_alarm(&alarm).await?;
        info!("Alarm {alarm_id} resolved manually");

        self.publish(Event::AlarmResolved {
            alarm_id: alarm.id,
            chamber_id: alarm.chamber_id,
            kind: alarm.kind,
            timestamp: Utc::now(),
        })
        .await;
        self.write_feedback(alarm.chamber_id, ALARM_CLEAR).await;
        Ok(alarm)
    }

    // Best-effort; the record store already holds the truth by the time
    // this runs.
    async fn write_feedback(&self, chamber_id: i64, value: u16) {
        let Some(address) = alarm_register(chamber_id) else {
            debug!("Chamber {chamber_id} has no PLC alarm register, skipping feedback");
            return;
        };
        if let Err(e) = self.registers.write_register(address, value).await {
            warn!("PLC feedback write for chamber {chamber_id} failed: {e}");
        }
    }

    async fn publish(&self, event: Event) {
        if let Err(e) = self.publisher.publish(event).await {
            warn!("Failed to publish alarm event: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_chamber;
    use crate::protocol::simulator::PlcSimulator;
    use crate::protocol::PlcTransport;
    use crate::publish::testing::RecordingPublisher;
    use crate::store::MemoryStore;

    struct Fixture {
        engine: AlarmEngine,
        store: Arc<MemoryStore>,
        publisher: Arc<RecordingPublisher>,
        simulator: Arc<PlcSimulator>,
    }

    async fn fixture() -> Fixture {
        let (addr, simulator) = PlcSimulator::new(vec![]).start().await.unwrap();
        let registers = Arc::new(RegisterService::new(
            PlcTransport::new("127.0.0.1", addr.port()),
            false,
        ));
        let store = Arc::new(MemoryStore::new());
        let publisher = Arc::new(RecordingPublisher::new());
        let engine = AlarmEngine::new(store.clone(), registers, publisher.clone());
        Fixture {
            engine,
            store,
            publisher,
            simulator,
        }
    }

    #[tokio::test]
    async fn high_o2_threshold_scenario() {
        let f = fixture().await;
        let chamber = test_chamber(1, Some(0));
        f.store.insert_chamber(chamber.clone()).await;

        // 20.0: inside the band, nothing happens
        f.engine
            .evaluate(&chamber, 20.0, SensorStatus::Normal)
            .await
            .unwrap();
        assert!(f
            .store
            .find_active_alarm(1, AlarmKind::HighO2)
            .await
            .unwrap()
            .is_none());

        // 25.0: one active high alarm, PLC bit set
        f.engine
            .evaluate(&chamber, 25.0, SensorStatus::Normal)
            .await
            .unwrap();
        let alarm = f
            .store
            .find_active_alarm(1, AlarmKind::HighO2)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(alarm.o2_level, Some(25.0));
        assert_eq!(f.simulator.register_value("001701").await, Some(1));

        // 23.0: resolved, PLC bit cleared
        f.engine
            .evaluate(&chamber, 23.0, SensorStatus::Normal)
            .await
            .unwrap();
        assert!(f
            .store
            .find_active_alarm(1, AlarmKind::HighO2)
            .await
            .unwrap()
            .is_none());
        assert_eq!(f.simulator.register_value("001701").await, Some(0));
        assert_eq!(
            f.publisher.topics().await,
            vec!["alarm_triggered", "alarm_resolved"]
        );
    }

    #[tokio::test]
    async fn repeated_breach_keeps_a_single_active_alarm() {
        let f = fixture().await;
        let chamber = test_chamber(1, Some(0));
        f.store.insert_chamber(chamber.clone()).await;

        f.engine
            .evaluate(&chamber, 25.0, SensorStatus::Normal)
            .await
            .unwrap();
        f.engine
            .evaluate(&chamber, 26.0, SensorStatus::Normal)
            .await
            .unwrap();

        assert_eq!(f.publisher.topics().await, vec!["alarm_triggered"]);
    }

    #[tokio::test]
    async fn low_o2_uses_strict_less_than() {
        let f = fixture().await;
        let chamber = test_chamber(2, Some(1));
        f.store.insert_chamber(chamber.clone()).await;

        f.engine
            .evaluate(&chamber, 16.0, SensorStatus::Normal)
            .await
            .unwrap();
        assert!(f
            .store
            .find_active_alarm(2, AlarmKind::LowO2)
            .await
            .unwrap()
            .is_none());

        f.engine
            .evaluate(&chamber, 15.9, SensorStatus::Normal)
            .await
            .unwrap();
        assert!(f
            .store
            .find_active_alarm(2, AlarmKind::LowO2)
            .await
            .unwrap()
            .is_some());
        assert_eq!(f.simulator.register_value("001702").await, Some(1));
    }

    #[tokio::test]
    async fn sensor_error_and_calibration_due_skip_plc_writes() {
        let f = fixture().await;
        let mut chamber = test_chamber(1, Some(0));
        chamber.calibration_required = true;
        f.store.insert_chamber(chamber.clone()).await;

        f.engine
            .evaluate(&chamber, 20.0, SensorStatus::Error)
            .await
            .unwrap();
        assert!(f
            .store
            .find_active_alarm(1, AlarmKind::SensorError)
            .await
            .unwrap()
            .is_some());
        assert!(f
            .store
            .find_active_alarm(1, AlarmKind::CalibrationDue)
            .await
            .unwrap()
            .is_some());
        assert_eq!(f.simulator.register_value("001701").await, None);

        // Conditions clear
        chamber.calibration_required = false;
        f.engine
            .evaluate(&chamber, 20.0, SensorStatus::Normal)
            .await
            .unwrap();
        assert!(f
            .store
            .find_active_alarm(1, AlarmKind::SensorError)
            .await
            .unwrap()
            .is_none());
        assert!(f
            .store
            .find_active_alarm(1, AlarmKind::CalibrationDue)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn mute_clears_plc_bit_but_leaves_alarm_active() {
        let f = fixture().await;
        let chamber = test_chamber(1, Some(0));
        f.store.insert_chamber(chamber.clone()).await;

        f.engine
            .evaluate(&chamber, 25.0, SensorStatus::Normal)
            .await
            .unwrap();
        let alarm = f
            .store
            .find_active_alarm(1, AlarmKind::HighO2)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(f.simulator.register_value("001701").await, Some(1));

        let muted = f.engine.mute_alarm(alarm.id, None).await.unwrap();
        assert!(muted.active);
        assert!(muted.muted);
        assert!(muted.muted_until.unwrap() > Utc::now());
        assert_eq!(f.simulator.register_value("001701").await, Some(0));
    }

    #[tokio::test]
    async fn manual_resolve_clears_state_and_bit() {
        let f = fixture().await;
        let chamber = test_chamber(1, Some(0));
        f.store.insert_chamber(chamber.clone()).await;

        f.engine
            .evaluate(&chamber, 25.0, SensorStatus::Normal)
            .await
            .unwrap();
        let alarm = f
            .store
            .find_active_alarm(1, AlarmKind::HighO2)
            .await
            .unwrap()
            .unwrap();

        let resolved = f.engine.resolve_alarm(alarm.id).await.unwrap();
        assert!(!resolved.active);
        assert!(resolved.resolved_at.is_some());
        assert_eq!(f.simulator.register_value("001701").await, Some(0));
    }

    #[tokio::test]
    async fn manual_operations_require_an_existing_alarm() {
        let f = fixture().await;
        assert!(matches!(
            f.engine.mute_alarm(999, None).await.unwrap_err(),
            OxySrvError::NotFound(_)
        ));
        assert!(matches!(
            f.engine.resolve_alarm(999).await.unwrap_err(),
            OxySrvError::NotFound(_)
        ));
    }
}
