//! Domain model for chambers, alarms and calibration
//!
//! These are the transient in-memory views the service works with per
//! poll cycle; the record store owns the durable rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A monitored chamber
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chamber {
    /// Chamber identifier
    pub id: i64,
    /// Human-readable name
    pub name: String,
    /// Whether the chamber is part of the poll cycle
    pub active: bool,
    /// Which slot of the sensor block feeds this chamber; `None` means
    /// the chamber is not wired to a sensor yet
    pub sensor_index: Option<usize>,
    /// Last raw count seen by the poller
    pub last_raw_value: Option<u16>,
    /// High-O2 alarm threshold in percent
    pub alarm_level_high: f64,
    /// Low-O2 alarm threshold in percent
    pub alarm_level_low: f64,
    /// Set when the chamber needs a fresh three-point calibration
    pub calibration_required: bool,
}

/// Sensor health derived from the raw reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorStatus {
    Normal,
    /// Probe disconnected or failed; raw reads as zero counts
    Error,
}

/// Alarm categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmKind {
    HighO2,
    LowO2,
    SensorError,
    CalibrationDue,
}

impl AlarmKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlarmKind::HighO2 => "high_o2",
            AlarmKind::LowO2 => "low_o2",
            AlarmKind::SensorError => "sensor_error",
            AlarmKind::CalibrationDue => "calibration_due",
        }
    }
}

/// An alarm row
///
/// At most one *active* alarm exists per (chamber, kind) pair; the store
/// keeps resolved rows as history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alarm {
    /// Alarm identifier
    pub id: i64,
    /// Chamber this alarm belongs to
    pub chamber_id: i64,
    /// Alarm category
    pub kind: AlarmKind,
    /// True until the condition clears or an operator resolves it
    pub active: bool,
    /// Mute overlay; does not change `active`
    pub muted: bool,
    /// When the mute expires
    pub muted_until: Option<DateTime<Utc>>,
    /// When the condition was first detected
    pub triggered_at: DateTime<Utc>,
    /// When the alarm was resolved
    pub resolved_at: Option<DateTime<Utc>>,
    /// Calibrated O2 level at trigger time, for the O2 kinds
    pub o2_level: Option<f64>,
}

/// Fields needed to create an alarm row
#[derive(Debug, Clone)]
pub struct NewAlarm {
    pub chamber_id: i64,
    pub kind: AlarmKind,
    pub o2_level: Option<f64>,
}

/// An active or historical three-point calibration row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationPoints {
    /// Row identifier
    pub id: i64,
    /// Chamber this calibration belongs to
    pub chamber_id: i64,
    /// Raw counts at 0% O2
    pub zero_point_raw: f64,
    /// Raw counts at the mid reference (ambient air by default)
    pub mid_point_raw: f64,
    /// Raw counts at 100% O2, observed or derived from the mid point
    pub hundred_point_raw: f64,
    /// Calibrated value assigned to the mid point
    pub mid_point_calibrated: f64,
    /// Derived effective slope
    pub slope: f64,
    /// Derived offset
    pub offset: f64,
    /// Only one row per chamber is active at a time
    pub active: bool,
    /// When the calibration was performed
    pub created_at: DateTime<Utc>,
}

/// Fields needed to create a calibration row; the store assigns the id
/// and marks the row active
#[derive(Debug, Clone)]
pub struct NewCalibration {
    pub chamber_id: i64,
    pub zero_point_raw: f64,
    pub mid_point_raw: f64,
    pub hundred_point_raw: f64,
    pub mid_point_calibrated: f64,
    pub slope: f64,
    pub offset: f64,
}

/// Audit entry appended for every performed calibration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationHistory {
    pub chamber_id: i64,
    pub calibration_id: i64,
    pub slope: f64,
    pub offset: f64,
    pub performed_at: DateTime<Utc>,
}

/// Chamber fixture shared by the unit tests
#[cfg(test)]
pub fn test_chamber(id: i64, sensor_index: Option<usize>) -> Chamber {
    Chamber {
        id,
        name: format!("Chamber {id}"),
        active: true,
        sensor_index,
        last_raw_value: None,
        alarm_level_high: 24.0,
        alarm_level_low: 16.0,
        calibration_required: false,
    }
}
