//! Robot arm capability.

use async_trait::async_trait;

use super::{Device, JointAngles, RobotPose};
use crate::error::{DeviceError, DeviceResult};

/// Point-to-point arm motion.
///
/// ## Motion semantics
/// - `move_j` / `move_l` block until the arm reaches the target and update
///   the last-known joints/pose only on success.
/// - `speed` is a fraction of the arm's maximum speed in `(0, 1]`.
/// - `stop()` halts gracefully. A move it interrupts fails with
///   `MotionFailure(Interrupted)` and the connection stays up.
/// - `emergency_stop()` halts immediately and drops the session. Every later
///   command fails with `NotConnected` until `connect()` succeeds again.
///
/// ## Reachability
/// - A target that cannot be reached along a straight line fails `move_l`
///   with `MotionFailure(LinearPathUnreachable)`. Arms that can solve inverse
///   kinematics may then offer a joint-space alternative via
///   [`RobotArm::joint_solution`].
#[async_trait]
pub trait RobotArm: Device {
    /// Joint-space move.
    async fn move_j(&self, target: &JointAngles, speed: f64) -> DeviceResult<()>;

    /// Cartesian straight-line move.
    async fn move_l(&self, target: &RobotPose, speed: f64) -> DeviceResult<()>;

    /// Last-known pose.
    async fn current_pose(&self) -> DeviceResult<RobotPose>;

    /// Last-known joint configuration.
    async fn current_joints(&self) -> DeviceResult<JointAngles>;

    /// Graceful halt.
    async fn stop(&self) -> DeviceResult<()>;

    /// Immediate halt; forces the arm into a disconnected state. Safe to call
    /// from any task at any time.
    async fn emergency_stop(&self);

    /// Joint configuration that reaches `target`, if the arm can compute one.
    ///
    /// The default reports no solution, which disables joint-space fallback.
    async fn joint_solution(&self, _target: &RobotPose) -> DeviceResult<Option<JointAngles>> {
        if !self.is_connected().await {
            return Err(DeviceError::NotConnected);
        }
        Ok(None)
    }
}

/// Reject speeds outside `(0, 1]`.
pub fn validate_speed(speed: f64) -> DeviceResult<()> {
    if speed > 0.0 && speed <= 1.0 {
        Ok(())
    } else {
        Err(DeviceError::InvalidParameter(format!(
            "speed {speed} is outside (0, 1]"
        )))
    }
}
