//! Record store interface
//!
//! The durable home of chambers, alarms and calibration rows lives
//! outside this service; the core only calls named operations and treats
//! a lookup miss on read paths as a valid `None`. [`MemoryStore`] is the
//! in-process implementation backing the binary and the test suite.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::{OxySrvError, Result};
use crate::model::{Alarm, AlarmKind, CalibrationHistory, CalibrationPoints, Chamber, NewAlarm, NewCalibration};

/// Named record operations the core depends on
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn find_chamber(&self, id: i64) -> Result<Option<Chamber>>;
    async fn list_active_chambers(&self) -> Result<Vec<Chamber>>;
    async fn update_chamber_raw_value(&self, id: i64, raw: u16) -> Result<()>;
    async fn set_calibration_required(&self, chamber_id: i64, required: bool) -> Result<()>;

    async fn find_active_alarm(&self, chamber_id: i64, kind: AlarmKind) -> Result<Option<Alarm>>;
    async fn find_alarm(&self, id: i64) -> Result<Option<Alarm>>;
    async fn create_alarm(&self, new: NewAlarm) -> Result<Alarm>;
    async fn update_alarm(&self, alarm: &Alarm) -> Result<()>;

    async fn active_calibration(&self, chamber_id: i64) -> Result<Option<CalibrationPoints>>;
    async fn deactivate_calibrations(&self, chamber_id: i64) -> Result<()>;
    async fn create_calibration(&self, new: NewCalibration) -> Result<CalibrationPoints>;
    async fn append_calibration_history(&self, entry: CalibrationHistory) -> Result<()>;
}

#[derive(Default)]
struct Inner {
    chambers: HashMap<i64, Chamber>,
    alarms: HashMap<i64, Alarm>,
    calibrations: HashMap<i64, CalibrationPoints>,
    history: Vec<CalibrationHistory>,
    next_alarm_id: i64,
    next_calibration_id: i64,
}

/// In-memory record store
#[derive(Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a chamber row; used by bootstrap and tests
    pub async fn insert_chamber(&self, chamber: Chamber) {
        self.inner.lock().await.chambers.insert(chamber.id, chamber);
    }

    /// Number of appended calibration history entries
    pub async fn history_len(&self) -> usize {
        self.inner.lock().await.history.len()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn find_chamber(&self, id: i64) -> Result<Option<Chamber>> {
        Ok(self.inner.lock().await.chambers.get(&id).cloned())
    }

    async fn list_active_chambers(&self) -> Result<Vec<Chamber>> {
        let mut chambers: Vec<Chamber> = self
            .inner
            .lock()
            .await
            .chambers
            .values()
            .filter(|c| c.active)
            .cloned()
            .collect();
        chambers.sort_by_key(|c| c.id);
        Ok(chambers)
    }

    async fn update_chamber_raw_value(&self, id: i64, raw: u16) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let chamber = inner
            .chambers
            .get_mut(&id)
            .ok_or_else(|| OxySrvError::not_found(format!("Chamber {id}")))?;
        chamber.last_raw_value = Some(raw);
        Ok(())
    }

    async fn set_calibration_required(&self, chamber_id: i64, required: bool) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let chamber = inner
            .chambers
            .get_mut(&chamber_id)
            .ok_or_else(|| OxySrvError::not_found(format!("Chamber {chamber_id}")))?;
        chamber.calibration_required = required;
        Ok(())
    }

    async fn find_active_alarm(&self, chamber_id: i64, kind: AlarmKind) -> Result<Option<Alarm>> {
        Ok(self
            .inner
            .lock()
            .await
            .alarms
            .values()
            .find(|a| a.chamber_id == chamber_id && a.kind == kind && a.active)
            .cloned())
    }

    async fn find_alarm(&self, id: i64) -> Result<Option<Alarm>> {
        Ok(self.inner.lock().await.alarms.get(&id).cloned())
    }

    async fn create_alarm(&self, new: NewAlarm) -> Result<Alarm> {
        let mut inner = self.inner.lock().await;
        inner.next_alarm_id += 1;
        let alarm = Alarm {
            id: inner.next_alarm_id,
            chamber_id: new.chamber_id,
            kind: new.kind,
            active: true,
            muted: false,
            muted_until: None,
            triggered_at: Utc::now(),
            resolved_at: None,
            o2_level: new.o2_level,
        };
        inner.alarms.insert(alarm.id, alarm.clone());
        Ok(alarm)
    }

    async fn update_alarm(&self, alarm: &Alarm) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if !inner.alarms.contains_key(&alarm.id) {
            return Err(OxySrvError::not_found(format!("Alarm {}", alarm.id)));
        }
        inner.alarms.insert(alarm.id, alarm.clone());
        Ok(())
    }

    async fn active_calibration(&self, chamber_id: i64) -> Result<Option<CalibrationPoints>> {
        Ok(self
            .inner
            .lock()
            .await
            .calibrations
            .values()
            .find(|c| c.chamber_id == chamber_id && c.active)
            .cloned())
    }

    async fn deactivate_calibrations(&self, chamber_id: i64) -> Result<()> {
        let mut inner = self.inner.lock().await;
        for calibration in inner.calibrations.values_mut() {
            if calibration.chamber_id == chamber_id {
                calibration.active = false;
            }
        }
        Ok(())
    }

    async fn create_calibration(&self, new: NewCalibration) -> Result<CalibrationPoints> {
        let mut inner = self.inner.lock().await;
        inner.next_calibration_id += 1;
        let row = CalibrationPoints {
            id: inner.next_calibration_id,
            chamber_id: new.chamber_id,
            zero_point_raw: new.zero_point_raw,
            mid_point_raw: new.mid_point_raw,
            hundred_point_raw: new.hundred_point_raw,
            mid_point_calibrated: new.mid_point_calibrated,
            slope: new.slope,
            offset: new.offset,
            active: true,
            created_at: Utc::now(),
        };
        inner.calibrations.insert(row.id, row.clone());
        Ok(row)
    }

    async fn append_calibration_history(&self, entry: CalibrationHistory) -> Result<()> {
        self.inner.lock().await.history.push(entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_chamber;

    #[tokio::test]
    async fn missing_chamber_reads_as_none() {
        let store = MemoryStore::new();
        assert!(store.find_chamber(42).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_on_missing_chamber_is_not_found() {
        let store = MemoryStore::new();
        let err = store.update_chamber_raw_value(42, 5000).await.unwrap_err();
        assert!(matches!(err, OxySrvError::NotFound(_)));
    }

    #[tokio::test]
    async fn active_alarm_lookup_filters_by_kind_and_state() {
        let store = MemoryStore::new();
        let mut alarm = store
            .create_alarm(NewAlarm {
                chamber_id: 1,
                kind: AlarmKind::HighO2,
                o2_level: Some(25.0),
            })
            .await
            .unwrap();

        assert!(store
            .find_active_alarm(1, AlarmKind::HighO2)
            .await
            .unwrap()
            .is_some());
        assert!(store
            .find_active_alarm(1, AlarmKind::LowO2)
            .await
            .unwrap()
            .is_none());

        alarm.active = false;
        store.update_alarm(&alarm).await.unwrap();
        assert!(store
            .find_active_alarm(1, AlarmKind::HighO2)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn deactivate_keeps_calibration_history_rows() {
        let store = MemoryStore::new();
        let first = store
            .create_calibration(NewCalibration {
                chamber_id: 1,
                zero_point_raw: 0.0,
                mid_point_raw: 5000.0,
                hundred_point_raw: 23809.52,
                mid_point_calibrated: 21.0,
                slope: 0.0042,
                offset: 0.0,
            })
            .await
            .unwrap();
        store.deactivate_calibrations(1).await.unwrap();
        let second = store
            .create_calibration(NewCalibration {
                chamber_id: 1,
                zero_point_raw: 10.0,
                mid_point_raw: 5100.0,
                hundred_point_raw: 23900.0,
                mid_point_calibrated: 21.0,
                slope: 0.0041,
                offset: -0.04,
            })
            .await
            .unwrap();

        let active = store.active_calibration(1).await.unwrap().unwrap();
        assert_eq!(active.id, second.id);
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn listed_chambers_are_active_only() {
        let store = MemoryStore::new();
        store.insert_chamber(test_chamber(1, Some(0))).await;
        let mut inactive = test_chamber(2, Some(1));
        inactive.active = false;
        store.insert_chamber(inactive).await;

        let listed = store.list_active_chambers().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, 1);
    }
}
