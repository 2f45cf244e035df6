//! Angle ↔ pose conversions for the two goniometer arms.
//!
//! # Conventions
//!
//! - Specimen frame is Z-up: +Z is the surface normal, θ (zenith) is the
//!   polar angle from +Z and φ (azimuth) is measured around +Z from +X.
//! - Each arm's tool point sits on a sphere of radius
//!   [`Geometry::standoff_radius_mm`] centred on the specimen, which is raised
//!   by [`Geometry::sample_height_offset`] along +Z.
//! - The light-source arm's base frame shares the specimen azimuth. The
//!   sensor arm follows [`Geometry::sensor_arm_azimuth`]: with
//!   [`AzimuthConvention::Mirrored`] it is mounted on the opposite side of
//!   the rig, so its base frame is rotated 180° about +Z and poses are
//!   computed with φ + 180°.
//! - Orientation is roll/pitch/yaw in radians, composed as
//!   `Rz(yaw) · Ry(pitch) · Rx(roll)`. Poses use `(π, θ, φ_arm)`, which
//!   points the tool +Z axis at the specimen centre.
//!
//! All functions here are pure. Range checking belongs to
//! [`Recipe::validate`](crate::recipe::Recipe::validate).

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;

use crate::devices::RobotPose;
use crate::recipe::{Geometry, MeasurementPoint};

/// 2π, one full turn in radians.
pub const TWO_PI: f64 = 2.0 * PI;

/// Which arm a pose is computed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArmRole {
    /// Arm carrying the light source (θi, φi).
    LightSource,
    /// Arm carrying the specimen-facing sensor optics (θo, φo).
    Sensor,
}

impl fmt::Display for ArmRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArmRole::LightSource => write!(f, "light-source arm"),
            ArmRole::Sensor => write!(f, "sensor arm"),
        }
    }
}

/// Mounting of the sensor arm relative to the light-source arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AzimuthConvention {
    /// Both arms share one base-frame azimuth.
    Shared,
    /// The sensor arm is mounted opposite the light-source arm.
    #[default]
    Mirrored,
}

impl AzimuthConvention {
    /// Azimuth offset, degrees, applied to poses for `role`.
    pub fn offset_deg(self, role: ArmRole) -> f64 {
        match (self, role) {
            (AzimuthConvention::Mirrored, ArmRole::Sensor) => 180.0,
            _ => 0.0,
        }
    }
}

/// Degrees to radians.
pub fn to_radians(deg: f64) -> f64 {
    deg * (PI / 180.0)
}

/// Radians to degrees.
pub fn to_degrees(rad: f64) -> f64 {
    rad * (180.0 / PI)
}

/// Wrap an azimuth into `[0, 360)` degrees.
pub fn wrap_degrees(deg: f64) -> f64 {
    let wrapped = deg.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negative inputs.
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// True if a zenith angle (degrees) keeps an arm strictly above the
/// specimen plane.
pub fn is_above_specimen(theta_deg: f64) -> bool {
    (0.0..90.0).contains(&theta_deg)
}

/// Unit direction for polar angle `theta` and azimuth `phi` (radians).
///
/// `theta = 0` yields +Z for any `phi`.
pub fn spherical_to_cartesian(theta: f64, phi: f64) -> Vector3<f64> {
    let sin_theta = theta.sin();
    Vector3::new(sin_theta * phi.cos(), sin_theta * phi.sin(), theta.cos())
}

/// Inverse of [`spherical_to_cartesian`]: `(theta, phi)` in radians with
/// `phi` in `[0, 2π)`. `phi` is 0 along the Z axis, where it is undefined.
pub fn cartesian_to_spherical(v: &Vector3<f64>) -> (f64, f64) {
    let r = v.norm();
    if r == 0.0 {
        return (0.0, 0.0);
    }
    let theta = (v.z / r).clamp(-1.0, 1.0).acos();
    let phi = if v.x == 0.0 && v.y == 0.0 {
        0.0
    } else {
        v.y.atan2(v.x).rem_euclid(TWO_PI)
    };
    (theta, phi)
}

/// End-effector pose for `role` at `point`.
pub fn point_to_arm_pose(point: &MeasurementPoint, role: ArmRole, geometry: &Geometry) -> RobotPose {
    let (theta_deg, phi_deg) = point.angles_for(role);
    let phi_arm_deg = wrap_degrees(phi_deg + geometry.sensor_arm_azimuth.offset_deg(role));

    let theta = to_radians(theta_deg);
    let phi = to_radians(phi_arm_deg);
    let direction = spherical_to_cartesian(theta, phi);

    let position =
        direction * geometry.standoff_radius_mm + Vector3::z() * geometry.sample_height_offset;
    RobotPose {
        position,
        orientation: Vector3::new(PI, theta, phi),
    }
}

/// Recover `(zenith, azimuth)` in specimen degrees from a pose produced by
/// [`point_to_arm_pose`]. Only the position is used.
pub fn arm_pose_to_angles(pose: &RobotPose, role: ArmRole, geometry: &Geometry) -> (f64, f64) {
    let relative = pose.position - Vector3::z() * geometry.sample_height_offset;
    let (theta, phi) = cartesian_to_spherical(&relative);
    let phi_deg = wrap_degrees(to_degrees(phi) - geometry.sensor_arm_azimuth.offset_deg(role));
    (to_degrees(theta), phi_deg)
}

/// Tool +Z axis of a pose, expressed in the arm's base frame.
pub fn tool_axis(pose: &RobotPose) -> Vector3<f64> {
    pose.rotation() * Vector3::z()
}
