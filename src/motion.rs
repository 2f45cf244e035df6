//! Point-to-point arm motion.
//!
//! A scan point is approached with a Cartesian `move_l`. Whether a failed
//! linear move may be retried in joint space is a [`MotionPolicy`]; the
//! reachability decision itself stays with the arm driver, which signals it
//! through [`MotionFaultKind::LinearPathUnreachable`] and offers joints via
//! [`RobotArm::joint_solution`].

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

use crate::devices::{RobotArm, RobotPose};
use crate::error::{DeviceError, DeviceResult, MotionFaultKind};

/// How to reach a pose when a straight-line move is not possible.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionPolicy {
    /// Only `move_l`. A linear-path failure fails the move.
    LinearOnly,
    /// Retry with `move_j` when the driver reports the linear path
    /// unreachable and can solve joints for the target.
    #[default]
    LinearThenJoint,
}

impl fmt::Display for MotionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MotionPolicy::LinearOnly => write!(f, "linear_only"),
            MotionPolicy::LinearThenJoint => write!(f, "linear_then_joint"),
        }
    }
}

/// Which command actually moved the arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionPath {
    /// Straight-line `move_l`.
    Linear,
    /// `move_j` after the linear path was reported unreachable.
    JointFallback,
}

/// Move `arm` to `target`, applying `policy` on a linear-path failure.
///
/// # Errors
///
/// Returns the driver's error unchanged, except that a fallback attempt
/// reports the `move_j` error instead of the original linear failure.
pub async fn move_to_pose(
    arm: &dyn RobotArm,
    target: &RobotPose,
    speed: f64,
    policy: MotionPolicy,
) -> DeviceResult<MotionPath> {
    let linear = arm.move_l(target, speed).await;
    let failure = match linear {
        Ok(()) => return Ok(MotionPath::Linear),
        Err(err) => err,
    };

    let fallback_allowed = policy == MotionPolicy::LinearThenJoint
        && matches!(
            failure,
            DeviceError::MotionFailure {
                kind: MotionFaultKind::LinearPathUnreachable,
                ..
            }
        );
    if !fallback_allowed {
        return Err(failure);
    }

    match arm.joint_solution(target).await? {
        Some(joints) => {
            warn!(arm = %arm.name(), "Linear path unreachable, falling back to joint move");
            arm.move_j(&joints, speed).await?;
            Ok(MotionPath::JointFallback)
        }
        None => {
            debug!(arm = %arm.name(), "No joint solution for target");
            Err(failure)
        }
    }
}

/// Move both arms concurrently and wait for both results.
pub async fn move_pair(
    light_arm: &dyn RobotArm,
    light_pose: &RobotPose,
    sensor_arm: &dyn RobotArm,
    sensor_pose: &RobotPose,
    speed: f64,
    policy: MotionPolicy,
) -> (DeviceResult<MotionPath>, DeviceResult<MotionPath>) {
    tokio::join!(
        move_to_pose(light_arm, light_pose, speed, policy),
        move_to_pose(sensor_arm, sensor_pose, speed, policy),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SimulatedClock;
    use crate::devices::mock::MockRobotArm;
    use crate::devices::{Device, JointAngles};
    use nalgebra::Vector3;
    use std::sync::Arc;
    use std::time::Duration;

    fn below_table_arm() -> MockRobotArm {
        MockRobotArm::new("SampleArm", Arc::new(SimulatedClock::new())).with_reachability(
            |target| {
                if target.position.z < 0.0 {
                    Err(DeviceError::motion(
                        MotionFaultKind::LinearPathUnreachable,
                        "wrist flip required",
                    ))
                } else {
                    Ok(())
                }
            },
        )
    }

    fn low_pose() -> RobotPose {
        RobotPose::new(Vector3::new(100.0, 0.0, -50.0), Vector3::zeros())
    }

    #[tokio::test]
    async fn test_linear_move_preferred() {
        let arm = below_table_arm();
        arm.connect().await.unwrap();
        let target = RobotPose::new(Vector3::new(0.0, 0.0, 10.0), Vector3::zeros());

        let path = move_to_pose(&arm, &target, 0.5, MotionPolicy::LinearThenJoint).await;
        assert_eq!(path, Ok(MotionPath::Linear));
    }

    #[tokio::test]
    async fn test_fallback_uses_joint_solution() {
        let solved = JointAngles::new(vec![0.2, -0.4, 0.1, 0.0, 0.5, 0.0]);
        let arm = {
            let solved = solved.clone();
            below_table_arm().with_joint_solver(move |_| Some(solved.clone()))
        };
        arm.connect().await.unwrap();

        let path = move_to_pose(&arm, &low_pose(), 0.5, MotionPolicy::LinearThenJoint).await;
        assert_eq!(path, Ok(MotionPath::JointFallback));
        assert_eq!(arm.current_joints().await.unwrap(), solved);
    }

    #[tokio::test]
    async fn test_linear_only_never_falls_back() {
        let arm = below_table_arm().with_joint_solver(|_| Some(JointAngles::zeros(6)));
        arm.connect().await.unwrap();

        let result = move_to_pose(&arm, &low_pose(), 0.5, MotionPolicy::LinearOnly).await;
        assert!(matches!(
            result,
            Err(DeviceError::MotionFailure {
                kind: MotionFaultKind::LinearPathUnreachable,
                ..
            })
        ));
        assert_eq!(arm.moves_started().await, 0);
    }

    #[tokio::test]
    async fn test_no_solution_keeps_linear_error() {
        let arm = below_table_arm();
        arm.connect().await.unwrap();

        let result = move_to_pose(&arm, &low_pose(), 0.5, MotionPolicy::LinearThenJoint).await;
        assert!(matches!(
            result,
            Err(DeviceError::MotionFailure {
                kind: MotionFaultKind::LinearPathUnreachable,
                ..
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pair_moves_run_concurrently() {
        let clock = Arc::new(crate::clock::SystemClock);
        let light = MockRobotArm::new("SourceArm", clock.clone()).with_speed(100.0);
        let sensor = MockRobotArm::new("SampleArm", clock).with_speed(100.0);
        light.connect().await.unwrap();
        sensor.connect().await.unwrap();

        let a = RobotPose::new(Vector3::new(300.0, 0.0, 0.0), Vector3::zeros());
        let b = RobotPose::new(Vector3::new(0.0, 300.0, 0.0), Vector3::zeros());
        let started = tokio::time::Instant::now();
        let (ra, rb) = move_pair(&light, &a, &sensor, &b, 1.0, MotionPolicy::LinearOnly).await;

        assert_eq!(ra, Ok(MotionPath::Linear));
        assert_eq!(rb, Ok(MotionPath::Linear));
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(3));
        assert!(elapsed < Duration::from_secs(6));
    }
}
