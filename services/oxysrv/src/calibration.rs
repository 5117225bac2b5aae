//! Three-point calibration engine
//!
//! Turns raw sensor counts into oxygen percentages. The curve is fit
//! from three reference points (0%, a mid reference, 100%) but collapsed
//! into a single line: the two segment slopes are averaged and the
//! offset anchors the zero point. The averaging is part of the device's
//! established behavior and is kept bit-for-bit; do not swap in true
//! piecewise interpolation without revisiting deployed thresholds.

use chrono::Utc;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::{OxySrvError, Result};
use crate::model::{CalibrationHistory, CalibrationPoints, NewCalibration};
use crate::publish::{Event, EventPublisher};
use crate::store::RecordStore;

/// Calibrated value assigned to the mid reference point by default
/// (ambient air)
pub const DEFAULT_MID_CALIBRATED: f64 = 21.0;

/// Effective linear coefficients for one chamber
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coefficients {
    pub slope: f64,
    pub offset: f64,
}

/// A three-point calibration request, validated before anything persists
#[derive(Debug, Clone, Deserialize)]
pub struct CalibrationRequest {
    pub chamber_id: i64,
    pub zero_point_raw: f64,
    pub mid_point_raw: f64,
    pub hundred_point_raw: f64,
    /// Defaults to [`DEFAULT_MID_CALIBRATED`] when omitted
    pub mid_point_calibrated: Option<f64>,
}

/// Fit the averaged single slope from the three reference points
///
/// Fails with a validation error unless the raw points are strictly
/// increasing.
pub fn compute_coefficients(
    zero_raw: f64,
    mid_raw: f64,
    hundred_raw: f64,
    mid_calibrated: f64,
) -> Result<Coefficients> {
    if !(zero_raw < mid_raw && mid_raw < hundred_raw) {
        return Err(OxySrvError::validation(format!(
            "Calibration points must be strictly increasing: zero={zero_raw}, mid={mid_raw}, hundred={hundred_raw}"
        )));
    }

    let low_slope = mid_calibrated / (mid_raw - zero_raw);
    let high_slope = (100.0 - mid_calibrated) / (hundred_raw - mid_raw);
    let slope = (low_slope + high_slope) / 2.0;
    let offset = 0.0 - slope * zero_raw;

    Ok(Coefficients { slope, offset })
}

/// Apply coefficients to a raw count, clamped to the displayable range
pub fn apply(raw: f64, slope: f64, offset: f64) -> f64 {
    (raw * slope + offset).clamp(0.0, 100.0)
}

/// Calibration engine: pure math above, plus a per-chamber coefficient
/// cache and the persistence choreography for new calibrations
pub struct CalibrationEngine {
    store: Arc<dyn RecordStore>,
    publisher: Arc<dyn EventPublisher>,
    cache: RwLock<HashMap<i64, Coefficients>>,
}

impl CalibrationEngine {
    pub fn new(store: Arc<dyn RecordStore>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            store,
            publisher,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Calibrate one raw reading for a chamber
    ///
    /// Falls back to the raw value (with a warning, never an error) when
    /// the chamber has no active calibration, so downstream consumers
    /// always receive a number.
    pub async fn calibrate_reading(&self, chamber_id: i64, raw: u16) -> f64 {
        if let Some(coefficients) = self.coefficients_for(chamber_id).await {
            apply(f64::from(raw), coefficients.slope, coefficients.offset)
        } else {
            warn!("Chamber {chamber_id} has no active calibration, passing raw value through");
            f64::from(raw)
        }
    }

    async fn coefficients_for(&self, chamber_id: i64) -> Option<Coefficients> {
        if let Some(cached) = self.cache.read().await.get(&chamber_id) {
            return Some(*cached);
        }

        let row = match self.store.active_calibration(chamber_id).await {
            Ok(row) => row?,
            Err(e) => {
                warn!("Failed to load calibration for chamber {chamber_id}: {e}");
                return None;
            },
        };
        let coefficients = Coefficients {
            slope: row.slope,
            offset: row.offset,
        };
        self.cache.write().await.insert(chamber_id, coefficients);
        Some(coefficients)
    }

    /// Perform a three-point calibration for a chamber
    ///
    /// Deactivates the prior active row, persists the new one, appends a
    /// history entry and clears the chamber's calibration-required flag.
    /// Any failing persistence step propagates; success is reported only
    /// once every step completed.
    pub async fn perform_three_point_calibration(
        &self,
        request: CalibrationRequest,
    ) -> Result<CalibrationPoints> {
        let mid_calibrated = request.mid_point_calibrated.unwrap_or(DEFAULT_MID_CALIBRATED);
        let coefficients = compute_coefficients(
            request.zero_point_raw,
            request.mid_point_raw,
            request.hundred_point_raw,
            mid_calibrated,
        )?;

        self.store
            .deactivate_calibrations(request.chamber_id)
            .await?;
        let row = self
            .store
            .create_calibration(NewCalibration {
                chamber_id: request.chamber_id,
                zero_point_raw: request.zero_point_raw,
                mid_point_raw: request.mid_point_raw,
                hundred_point_raw: request.hundred_point_raw,
                mid_point_calibrated: mid_calibrated,
                slope: coefficients.slope,
                offset: coefficients.offset,
            })
            .await?;
        self.store
            .append_calibration_history(CalibrationHistory {
                chamber_id: row.chamber_id,
                calibration_id: row.id,
                slope: row.slope,
                offset: row.offset,
                performed_at: Utc::now(),
            })
            .await?;
        self.store
            .set_calibration_required(request.chamber_id, false)
            .await?;

        self.cache
            .write()
            .await
            .insert(request.chamber_id, coefficients);

        let event = Event::CalibrationPerformed {
            chamber_id: row.chamber_id,
            calibration_id: row.id,
            slope: row.slope,
            offset: row.offset,
            timestamp: Utc::now(),
        };
        if let Err(e) = self.publisher.publish(event).await {
            warn!("Failed to publish calibration event: {e}");
        }

        info!(
            "Calibrated chamber {}: slope={:.6}, offset={:.4}",
            row.chamber_id, row.slope, row.offset
        );
        Ok(row)
    }

    /// Drop a chamber's cached coefficients; the next reading reloads
    /// from the record store
    pub async fn invalidate(&self, chamber_id: i64) {
        self.cache.write().await.remove(&chamber_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_chamber;
    use crate::publish::testing::RecordingPublisher;
    use crate::store::MemoryStore;

    fn engine_with_store() -> (CalibrationEngine, Arc<MemoryStore>, Arc<RecordingPublisher>) {
        let store = Arc::new(MemoryStore::new());
        let publisher = Arc::new(RecordingPublisher::new());
        let engine = CalibrationEngine::new(store.clone(), publisher.clone());
        (engine, store, publisher)
    }

    #[test]
    fn documented_example_yields_expected_coefficients() {
        let c = compute_coefficients(0.0, 5000.0, 23809.52, 21.0).unwrap();
        assert!((c.slope - 0.0042).abs() < 0.0005, "slope was {}", c.slope);
        assert!(c.offset.abs() < 0.0005, "offset was {}", c.offset);
    }

    #[test]
    fn reference_points_are_reproduced_within_tolerance() {
        let c = compute_coefficients(0.0, 5000.0, 23809.52, 21.0).unwrap();
        assert!((apply(5000.0, c.slope, c.offset) - 21.0).abs() < 0.01);
        assert!((apply(23809.52, c.slope, c.offset) - 100.0).abs() < 0.01);
        assert!(apply(0.0, c.slope, c.offset).abs() < 0.01);
    }

    #[test]
    fn slope_is_the_mean_of_both_segments() {
        // Skewed triple: the two segments disagree and the averaged
        // slope follows the documented formula, not true interpolation
        let c = compute_coefficients(0.0, 5000.0, 20000.0, 21.0).unwrap();
        let low = 21.0 / 5000.0;
        let high = 79.0 / 15000.0;
        let expected = (low + high) / 2.0;
        assert!((c.slope - expected).abs() < 1e-12);
        assert!((c.offset - (0.0 - expected * 0.0)).abs() < 1e-12);
    }

    #[test]
    fn out_of_order_points_are_rejected() {
        for (zero, mid, hundred) in [
            (5000.0, 5000.0, 23810.0),
            (6000.0, 5000.0, 23810.0),
            (0.0, 23810.0, 23810.0),
            (0.0, 23811.0, 23810.0),
        ] {
            let err = compute_coefficients(zero, mid, hundred, 21.0).unwrap_err();
            assert!(matches!(err, OxySrvError::ValidationError(_)));
        }
    }

    #[test]
    fn apply_clamps_to_displayable_range() {
        // Positive slope with a negative offset would go below zero
        assert_eq!(apply(0.0, 0.0042, -2.0), 0.0);
        assert_eq!(apply(60000.0, 0.0042, 0.0), 100.0);
    }

    #[tokio::test]
    async fn uncalibrated_chamber_passes_raw_through() {
        let (engine, store, _) = engine_with_store();
        store.insert_chamber(test_chamber(1, Some(0))).await;

        let value = engine.calibrate_reading(1, 5000).await;
        assert_eq!(value, 5000.0);
    }

    #[tokio::test]
    async fn calibration_persists_and_takes_effect() {
        let (engine, store, publisher) = engine_with_store();
        let mut chamber = test_chamber(1, Some(0));
        chamber.calibration_required = true;
        store.insert_chamber(chamber).await;

        let row = engine
            .perform_three_point_calibration(CalibrationRequest {
                chamber_id: 1,
                zero_point_raw: 0.0,
                mid_point_raw: 5000.0,
                hundred_point_raw: 23809.52,
                mid_point_calibrated: None,
            })
            .await
            .unwrap();
        assert!(row.active);
        assert_eq!(row.mid_point_calibrated, 21.0);

        // Flag cleared, history appended, event published
        let chamber = store.find_chamber(1).await.unwrap().unwrap();
        assert!(!chamber.calibration_required);
        assert_eq!(store.history_len().await, 1);
        assert_eq!(publisher.topics().await, vec!["calibration_performed"]);

        let value = engine.calibrate_reading(1, 5000).await;
        assert!((value - 21.0).abs() < 0.01);
    }

    #[tokio::test]
    async fn recalibration_deactivates_prior_row() {
        let (engine, store, _) = engine_with_store();
        store.insert_chamber(test_chamber(1, Some(0))).await;

        let request = CalibrationRequest {
            chamber_id: 1,
            zero_point_raw: 0.0,
            mid_point_raw: 5000.0,
            hundred_point_raw: 23809.52,
            mid_point_calibrated: None,
        };
        let first = engine
            .perform_three_point_calibration(request.clone())
            .await
            .unwrap();
        let second = engine
            .perform_three_point_calibration(CalibrationRequest {
                mid_point_raw: 5200.0,
                ..request
            })
            .await
            .unwrap();

        let active = store.active_calibration(1).await.unwrap().unwrap();
        assert_eq!(active.id, second.id);
        assert_ne!(active.id, first.id);
    }

    #[tokio::test]
    async fn invalid_request_persists_nothing() {
        let (engine, store, publisher) = engine_with_store();
        store.insert_chamber(test_chamber(1, Some(0))).await;

        let err = engine
            .perform_three_point_calibration(CalibrationRequest {
                chamber_id: 1,
                zero_point_raw: 6000.0,
                mid_point_raw: 5000.0,
                hundred_point_raw: 23810.0,
                mid_point_calibrated: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, OxySrvError::ValidationError(_)));
        assert!(store.active_calibration(1).await.unwrap().is_none());
        assert!(publisher.events().await.is_empty());
    }
}
