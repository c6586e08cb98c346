//! High-level facade for the `garment-qc-*` workspace.
//!
//! This crate wires the measurement engine to the outside world: reference
//! image decoding (with corruption recovery), session configuration, the
//! single-threaded live measurement loop, and overlay rendering.
//!
//! ## Quickstart
//!
//! ```no_run
//! use garment_qc::config::SessionConfig;
//! use garment_qc::session::{ImageDirSource, LiveSession, SessionParams};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SessionConfig::load("measurement_config.json".as_ref())?;
//! let source = ImageDirSource::from_dir("frames/".as_ref())?;
//! let mut session = LiveSession::from_config(&config, source, SessionParams::default())?;
//! while let Some(report) = session.step()? {
//!     for m in &report.measurements {
//!         println!("pair {}: {:.1} px", m.pair_id, m.pixel_distance);
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - [`garment_qc_core`] (re-exported as `core`): image buffers, sampling,
//!   homography estimation, logger.
//! - [`garment_qc_features`] (re-exported as `features`): FAST/BRIEF
//!   detection and Hamming matching.
//! - [`garment_qc_track`] (re-exported as `track`): annotation/calibration
//!   stores, transfer engine, fusion/stabilization, QC evaluation,
//!   snapshots.
//! - [`config`] / [`session`] / [`io`] / [`render`]: this crate.

pub use garment_qc_core as core;
pub use garment_qc_features as features;
pub use garment_qc_track as track;

pub use garment_qc_track::{
    AnnotationSet, Calibration, GarmentColor, KeypointTracker, LiveMeasurement, LiveSnapshot,
    MeasurementSpec, Role, Side, TrackerParams, TrackingState,
};

pub mod config;
pub mod io;
pub mod render;
pub mod session;
