//! Oxygen Chamber Monitoring Service (oxysrv)
//!
//! An async service that keeps oxygen readings for physical chambers
//! fresh and safe: it polls a hardwired PLC over TCP, converts raw
//! sensor counts into calibrated percentages and drives a
//! threshold-based alarm loop that writes state back to the PLC.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   raw values   ┌──────────────┐   percentages   ┌──────────────┐
//! │   Polling    │───────────────►│ Calibration  │────────────────►│    Alarm     │
//! │  Scheduler   │                │   Engine     │                 │State Machine │
//! └──────┬───────┘                └──────────────┘                 └──────┬───────┘
//!        │ read sensor block                            feedback writes  │
//!        ▼                                                               ▼
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │        Register Service ── one-shot TCP Transport ── ASCII/LRC Codec        │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Chambers, alarms and calibration rows live behind the
//! [`store::RecordStore`] trait; state changes fan out through the
//! [`publish::EventPublisher`] trait as fire-and-forget events.

pub mod alarms;
pub mod calibration;
pub mod config;
pub mod error;
pub mod model;
pub mod polling;
pub mod protocol;
pub mod publish;
pub mod store;

pub use error::{OxySrvError, Result};
