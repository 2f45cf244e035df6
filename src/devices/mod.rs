//! Device abstraction layer.
//!
//! Three capability traits describe the hardware a scan needs:
//!
//! - [`LightSource`]: lamp on/off and intensity
//! - [`RobotArm`]: joint-space (`move_j`) and Cartesian (`move_l`) motion, stop, e-stop
//! - [`Spectrometer`]: integration time and blocking spectral measurement
//!
//! All of them extend [`Device`], which carries the shared connection
//! lifecycle. Every commanding or querying operation fails with
//! [`DeviceError::NotConnected`] while the device is disconnected and leaves
//! the driver state untouched.
//!
//! # Thread Safety
//!
//! Traits require `Send + Sync` and take `&self`, so a driver can be shared
//! with an operator task that issues `emergency_stop()` while the sequencer
//! is mid-command. Drivers keep their mutable state behind a lock and
//! perform the connection check and the state commit under the same guard.
//!
//! Simulated implementations live in [`mock`]. Real hardware bindings
//! implement the same traits outside this crate.
//!
//! [`DeviceError::NotConnected`]: crate::error::DeviceError::NotConnected

use async_trait::async_trait;
use nalgebra::{DVector, Rotation3, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{DeviceError, DeviceResult};

pub mod light_source;
pub mod mock;
pub mod robot_arm;
pub mod spectrometer;

pub use light_source::{LightSource, LightState, ManualLightSource};
pub use robot_arm::RobotArm;
pub use spectrometer::Spectrometer;

/// Connection lifecycle shared by every device role.
#[async_trait]
pub trait Device: Send + Sync {
    /// Human-readable identifier used in logs.
    fn name(&self) -> &str;

    /// Open the device session. May block for a noticeable time.
    async fn connect(&self) -> DeviceResult<()>;

    /// Close the session. Idempotent, never fails.
    async fn disconnect(&self);

    /// True while commands are accepted.
    async fn is_connected(&self) -> bool;
}

/// The four devices a scan drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceRole {
    /// Illumination lamp.
    LightSource,
    /// Arm carrying the lamp.
    LightSourceArm,
    /// Arm carrying the collection optics.
    SensorArm,
    /// Detector.
    Spectrometer,
}

impl DeviceRole {
    /// Every role, in pre-flight check order.
    pub const ALL: [DeviceRole; 4] = [
        DeviceRole::LightSource,
        DeviceRole::LightSourceArm,
        DeviceRole::SensorArm,
        DeviceRole::Spectrometer,
    ];
}

impl fmt::Display for DeviceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceRole::LightSource => write!(f, "light source"),
            DeviceRole::LightSourceArm => write!(f, "light-source arm"),
            DeviceRole::SensorArm => write!(f, "sensor arm"),
            DeviceRole::Spectrometer => write!(f, "spectrometer"),
        }
    }
}

/// Cartesian end-effector pose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotPose {
    /// Tool point position, mm.
    pub position: Vector3<f64>,
    /// Roll, pitch, yaw, rad.
    pub orientation: Vector3<f64>,
}

impl RobotPose {
    /// Pose from a tool position (mm) and roll/pitch/yaw (rad).
    pub fn new(position: Vector3<f64>, orientation: Vector3<f64>) -> Self {
        Self {
            position,
            orientation,
        }
    }

    /// Pose at the base-frame origin with identity orientation.
    pub fn zero() -> Self {
        Self::new(Vector3::zeros(), Vector3::zeros())
    }

    /// Orientation as a rotation matrix (`Rz(yaw) · Ry(pitch) · Rx(roll)`).
    pub fn rotation(&self) -> Rotation3<f64> {
        Rotation3::from_euler_angles(self.orientation.x, self.orientation.y, self.orientation.z)
    }

    /// Straight-line distance between tool points, mm.
    pub fn distance_to(&self, other: &RobotPose) -> f64 {
        (other.position - self.position).norm()
    }
}

impl Default for RobotPose {
    fn default() -> Self {
        Self::zero()
    }
}

/// Joint-space arm configuration, rad. Length depends on the arm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointAngles {
    /// One angle per joint, base first.
    pub angles: DVector<f64>,
}

impl JointAngles {
    /// Wrap a list of joint angles, rad.
    pub fn new(angles: Vec<f64>) -> Self {
        Self {
            angles: DVector::from_vec(angles),
        }
    }

    /// `n` joints at zero.
    pub fn zeros(n: usize) -> Self {
        Self {
            angles: DVector::zeros(n),
        }
    }

    /// Number of joints.
    pub fn len(&self) -> usize {
        self.angles.len()
    }

    /// True for a zero-joint configuration.
    pub fn is_empty(&self) -> bool {
        self.angles.is_empty()
    }

    /// Largest single-joint travel to `other`, rad. Joint counts must match.
    pub fn max_travel_to(&self, other: &JointAngles) -> DeviceResult<f64> {
        if self.len() != other.len() {
            return Err(DeviceError::InvalidParameter(format!(
                "expected {} joint angles, got {}",
                self.len(),
                other.len()
            )));
        }
        if self.is_empty() {
            return Ok(0.0);
        }
        Ok((&other.angles - &self.angles).amax())
    }
}

/// One spectral acquisition.
///
/// Wavelengths and intensities always have equal length. The value is
/// immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Spectrum {
    wavelengths: Vec<f64>,
    intensities: Vec<f64>,
    integration_time_ms: f64,
}

impl Spectrum {
    /// Build a spectrum, rejecting mismatched lengths.
    pub fn new(
        wavelengths: Vec<f64>,
        intensities: Vec<f64>,
        integration_time_ms: f64,
    ) -> DeviceResult<Self> {
        if wavelengths.len() != intensities.len() {
            return Err(DeviceError::MeasurementFailure(format!(
                "spectrum has {} wavelengths but {} intensities",
                wavelengths.len(),
                intensities.len()
            )));
        }
        Ok(Self {
            wavelengths,
            intensities,
            integration_time_ms,
        })
    }

    /// Wavelength grid, nm, ascending.
    pub fn wavelengths(&self) -> &[f64] {
        &self.wavelengths
    }

    /// Radiometric intensities, one per wavelength.
    pub fn intensities(&self) -> &[f64] {
        &self.intensities
    }

    /// Exposure the spectrum was taken with.
    pub fn integration_time_ms(&self) -> f64 {
        self.integration_time_ms
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.wavelengths.len()
    }

    /// True when the spectrum holds no samples.
    pub fn is_empty(&self) -> bool {
        self.wavelengths.is_empty()
    }

    /// `(wavelength, intensity)` of the strongest sample.
    pub fn peak(&self) -> Option<(f64, f64)> {
        self.wavelengths
            .iter()
            .copied()
            .zip(self.intensities.iter().copied())
            .max_by(|a, b| a.1.total_cmp(&b.1))
    }
}
