//! Core library for the BRDF goniometer.
//!
//! This library converts measurement angles into arm poses, drives the light
//! source, both robot arms and the spectrometer through uniform device
//! traits, and sequences complete scans with calibration. It is used by the
//! `brdf_scan` binary and by real hardware bindings that implement the
//! device traits.
//!
//! # Modules
//!
//! - [`geometry`]: pure angle/pose conversions
//! - [`recipe`]: scan definition and validation
//! - [`devices`]: device traits and simulated implementations
//! - [`clock`]: injectable time source
//! - [`motion`]: point-to-point moves with a pluggable joint-space fallback
//! - [`calibration`]: dark-current and white-reference acquisition
//! - [`sequencer`]: scan state machine and progress channel
//! - [`results`]: result aggregation
//! - [`config`], [`logging`], [`error`]: process plumbing

pub mod calibration;
pub mod clock;
pub mod config;
pub mod devices;
pub mod error;
pub mod geometry;
pub mod logging;
pub mod motion;
pub mod recipe;
pub mod results;
pub mod sequencer;

pub use clock::{Clock, SimulatedClock, SystemClock};
pub use error::{AppResult, DeviceError, DeviceResult, GonioError, ScanError};
pub use recipe::{MeasurementPoint, Recipe, RecipeBuilder};
pub use results::{MeasurementRecord, ResultAggregator, ScanResult, ScanStatus};
pub use sequencer::{ScanDevices, ScanProgress, ScanState, Sequencer};
