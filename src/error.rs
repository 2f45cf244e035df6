//! Error types for the goniometer control stack.
//!
//! Errors are split by the boundary at which they occur:
//!
//! - **[`DeviceError`]**: returned by every fallible driver operation. It is a
//!   plain value (`Clone`, `PartialEq`, serializable) so the sequencer can
//!   inspect the specific kind and react without unwinding, and so failed
//!   points can carry their error inside a [`MeasurementRecord`].
//! - **[`ScanError`]**: the reason a scan could not start or was aborted. A
//!   scan that was aborted still yields a partial [`ScanResult`] tagged with
//!   the triggering `ScanError`.
//! - **[`GonioError`]**: application-level error used by configuration
//!   loading and the CLI. Lower-level errors convert into it with `?`.
//!
//! ## Propagation policy
//!
//! | Error | Effect on a running scan |
//! |---|---|
//! | `InvalidParameter`, `MotionFailure` on a point move | point recorded as failed, scan continues |
//! | `NotConnected` from an arm or the light source | fatal, [`ScanError::DeviceFault`] |
//! | any spectrometer failure during `measure()` | fatal, [`ScanError::MeasurementFailure`] |
//! | any failure during calibration | fatal, [`ScanError::CalibrationFailed`] |
//!
//! No retries happen at this layer; retry policy belongs to the drivers.
//!
//! [`MeasurementRecord`]: crate::results::MeasurementRecord
//! [`ScanResult`]: crate::results::ScanResult

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::calibration::CalibrationStep;
use crate::devices::DeviceRole;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, GonioError>;

/// Result of a driver operation.
pub type DeviceResult<T> = std::result::Result<T, DeviceError>;

/// Why an arm could not complete a motion command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionFaultKind {
    /// The target is reachable, but not along a straight Cartesian path.
    LinearPathUnreachable,
    /// The target lies outside the arm's workspace.
    Unreachable,
    /// Motion was halted by `stop()` before the target was reached.
    Interrupted,
    /// Controller-reported fault.
    Fault,
}

impl fmt::Display for MotionFaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MotionFaultKind::LinearPathUnreachable => write!(f, "linear path unreachable"),
            MotionFaultKind::Unreachable => write!(f, "unreachable"),
            MotionFaultKind::Interrupted => write!(f, "interrupted"),
            MotionFaultKind::Fault => write!(f, "fault"),
        }
    }
}

/// Error returned by light source, robot arm and spectrometer drivers.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeviceError {
    /// The device has no open session, or an e-stop dropped it.
    #[error("Device not connected")]
    NotConnected,

    /// A command argument was out of range. Nothing was changed.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// The arm could not complete a move.
    #[error("Motion failure ({kind}): {message}")]
    MotionFailure {
        /// Failure category.
        kind: MotionFaultKind,
        /// Driver detail.
        message: String,
    },

    /// The detector delivered no usable spectrum.
    #[error("Measurement failure: {0}")]
    MeasurementFailure(String),

    /// The driver could not reach or talk to the hardware.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
}

impl DeviceError {
    /// Shorthand for a [`DeviceError::MotionFailure`].
    pub fn motion(kind: MotionFaultKind, message: impl Into<String>) -> Self {
        DeviceError::MotionFailure {
            kind,
            message: message.into(),
        }
    }
}

/// Why a scan was rejected or aborted.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScanError {
    /// Recipe failed validation; the scan never started.
    #[error("Invalid recipe: {0}")]
    InvalidRecipe(String),

    /// Pre-flight check failed for a device.
    #[error("{device} not ready: {source}")]
    DeviceNotReady {
        /// Device that failed the check.
        device: DeviceRole,
        /// Driver error behind it.
        source: DeviceError,
    },

    /// Dark-current or white-reference acquisition failed.
    #[error("Calibration failed during {step}: {source}")]
    CalibrationFailed {
        /// Step that was running.
        step: CalibrationStep,
        /// Driver error behind it.
        source: DeviceError,
    },

    /// The spectrometer failed or was lost during the scan.
    #[error("Measurement failure: {0}")]
    MeasurementFailure(#[source] DeviceError),

    /// A lamp or arm fault that ends the scan.
    #[error("{device} fault: {source}")]
    DeviceFault {
        /// Device that faulted.
        device: DeviceRole,
        /// Driver error behind it.
        source: DeviceError,
    },
}

impl ScanError {
    /// The device error underneath this scan error, if any.
    pub fn device_error(&self) -> Option<&DeviceError> {
        match self {
            ScanError::InvalidRecipe(_) => None,
            ScanError::DeviceNotReady { source, .. }
            | ScanError::CalibrationFailed { source, .. }
            | ScanError::DeviceFault { source, .. } => Some(source),
            ScanError::MeasurementFailure(source) => Some(source),
        }
    }
}

/// Application-level error.
#[derive(Error, Debug)]
pub enum GonioError {
    /// Config or recipe file could not be read or parsed.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Config parsed but holds unusable values.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Driver error outside a scan, e.g. while connecting.
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    /// Scan could not start.
    #[error("Scan error: {0}")]
    Scan(#[from] ScanError),
}

impl From<figment::Error> for GonioError {
    fn from(err: figment::Error) -> Self {
        GonioError::Config(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DeviceError::motion(MotionFaultKind::Unreachable, "pose outside workspace");
        assert_eq!(
            err.to_string(),
            "Motion failure (unreachable): pose outside workspace"
        );
        assert_eq!(DeviceError::NotConnected.to_string(), "Device not connected");
    }

    #[test]
    fn test_scan_error_exposes_device_error() {
        let err = ScanError::CalibrationFailed {
            step: CalibrationStep::WhiteReference,
            source: DeviceError::NotConnected,
        };
        assert_eq!(err.device_error(), Some(&DeviceError::NotConnected));
        assert!(err.to_string().contains("white reference"));

        let err = ScanError::InvalidRecipe("no points".into());
        assert!(err.device_error().is_none());
    }

    #[test]
    fn test_device_error_roundtrips_through_json() {
        let err = ScanError::MeasurementFailure(DeviceError::NotConnected);
        let json = serde_json::to_string(&err).unwrap();
        let back: ScanError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, err);
    }

    #[test]
    fn test_app_error_from_scan_error() {
        let err: GonioError = ScanError::InvalidRecipe("empty".into()).into();
        assert!(err.to_string().starts_with("Scan error"));
    }
}
