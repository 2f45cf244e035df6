//! Dark-current and white-reference acquisition.
//!
//! Calibration runs once, before the first scan point, and leaves the lamp in
//! the state it found it. Any failure is fatal for the scan and is reported
//! as [`ScanError::CalibrationFailed`] naming the step; there is no retry.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

use crate::devices::Spectrum;
use crate::error::{DeviceError, DeviceResult, ScanError};
use crate::geometry::{point_to_arm_pose, ArmRole};
use crate::motion::{move_pair, MotionPolicy};
use crate::recipe::Recipe;
use crate::results::ResultAggregator;
use crate::sequencer::ScanDevices;

/// One calibration acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationStep {
    /// Lamp off, detector baseline.
    DarkCurrent,
    /// Lamp on, arms at the reference geometry.
    WhiteReference,
}

impl fmt::Display for CalibrationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalibrationStep::DarkCurrent => write!(f, "dark current"),
            CalibrationStep::WhiteReference => write!(f, "white reference"),
        }
    }
}

/// Runs the calibration steps a recipe asks for.
pub struct Calibrator<'a> {
    devices: ScanDevices<'a>,
    policy: MotionPolicy,
}

impl<'a> Calibrator<'a> {
    /// Calibrator moving arms with `policy`.
    pub fn new(devices: ScanDevices<'a>, policy: MotionPolicy) -> Self {
        Self { devices, policy }
    }

    /// Acquire the enabled baselines into `results`.
    ///
    /// The lamp state captured on entry is restored before returning,
    /// including after a failed step.
    ///
    /// # Errors
    ///
    /// [`ScanError::CalibrationFailed`] with the step that failed.
    pub async fn run(&self, recipe: &Recipe, results: &mut ResultAggregator) -> Result<(), ScanError> {
        let calibration = &recipe.calibration;
        if !calibration.any_enabled() {
            return Ok(());
        }

        let first_step = if calibration.do_dark_current {
            CalibrationStep::DarkCurrent
        } else {
            CalibrationStep::WhiteReference
        };
        let saved = self
            .devices
            .light
            .state()
            .await
            .map_err(|source| failed(first_step, source))?;

        let outcome = self.acquire(recipe, results).await;
        let restored = self.devices.light.restore(saved).await;

        match (outcome, restored) {
            (Err(err), restored) => {
                if let Err(restore_err) = restored {
                    warn!(error = %restore_err, "Could not restore lamp after failed calibration");
                }
                Err(err)
            }
            (Ok(last_step), Err(source)) => Err(failed(last_step, source)),
            (Ok(_), Ok(())) => Ok(()),
        }
    }

    /// Run the enabled steps, returning the last one performed.
    async fn acquire(
        &self,
        recipe: &Recipe,
        results: &mut ResultAggregator,
    ) -> Result<CalibrationStep, ScanError> {
        let calibration = &recipe.calibration;
        let mut last = CalibrationStep::DarkCurrent;

        if calibration.do_dark_current {
            let spectrum = self
                .dark_current()
                .await
                .map_err(|source| failed(CalibrationStep::DarkCurrent, source))?;
            let record = results.record_dark_current(spectrum);
            info!(sequence = record.sequence(), "Dark current captured");
        }

        if calibration.do_white_reference {
            let spectrum = self
                .white_reference(recipe)
                .await
                .map_err(|source| failed(CalibrationStep::WhiteReference, source))?;
            let record = results.record_white_reference(calibration.white_ref_angle, spectrum);
            info!(sequence = record.sequence(), "White reference captured");
            last = CalibrationStep::WhiteReference;
        }

        Ok(last)
    }

    async fn dark_current(&self) -> DeviceResult<Spectrum> {
        info!("Calibrating: dark current");
        self.devices.light.turn_off().await?;
        self.measure().await
    }

    async fn white_reference(&self, recipe: &Recipe) -> DeviceResult<Spectrum> {
        let point = &recipe.calibration.white_ref_angle;
        info!(
            theta_i = point.theta_i,
            phi_i = point.phi_i,
            theta_o = point.theta_o,
            phi_o = point.phi_o,
            "Calibrating: white reference"
        );

        let light_pose = point_to_arm_pose(point, ArmRole::LightSource, &recipe.geometry);
        let sensor_pose = point_to_arm_pose(point, ArmRole::Sensor, &recipe.geometry);
        let (light_move, sensor_move) = move_pair(
            self.devices.light_arm,
            &light_pose,
            self.devices.sensor_arm,
            &sensor_pose,
            recipe.config.arm_speed,
            self.policy,
        )
        .await;
        light_move?;
        sensor_move?;
        if let Some(device) = self.devices.first_disconnected().await {
            warn!(%device, "Device lost after white-reference move");
            return Err(DeviceError::NotConnected);
        }

        if let Some(percent) = recipe.config.light_intensity_percent {
            self.devices.light.set_intensity(percent).await?;
        }
        self.devices.light.turn_on().await?;
        self.measure().await
    }

    async fn measure(&self) -> DeviceResult<Spectrum> {
        if !self.devices.spectrometer.is_connected().await {
            return Err(DeviceError::NotConnected);
        }
        self.devices.spectrometer.measure().await
    }
}

fn failed(step: CalibrationStep, source: DeviceError) -> ScanError {
    ScanError::CalibrationFailed { step, source }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SimulatedClock;
    use crate::devices::mock::{MockRobotArm, MockSpectrometer, SimulatedRig};
    use crate::devices::{Device, LightSource, RobotArm};
    use crate::config::SimulationConfig;
    use crate::recipe::{CalibrationConfig, MeasurementPoint, RecipeBuilder};
    use crate::results::RecordKind;
    use std::sync::Arc;

    fn recipe(calibration: CalibrationConfig) -> Recipe {
        RecipeBuilder::new()
            .project_name("calibration")
            .calibration(calibration)
            .point(MeasurementPoint::new(30.0, 0.0, 30.0, 180.0))
            .build()
    }

    #[tokio::test]
    async fn test_both_steps_recorded_and_lamp_restored() {
        let clock = Arc::new(SimulatedClock::new());
        let rig = SimulatedRig::new(&SimulationConfig::default(), clock.clone());
        rig.connect_all().await.unwrap();
        rig.light.set_intensity(40.0).await.unwrap();

        let recipe = recipe(CalibrationConfig::default());
        let mut results = ResultAggregator::new(recipe.meta.clone(), clock);
        Calibrator::new(rig.devices(), MotionPolicy::LinearOnly)
            .run(&recipe, &mut results)
            .await
            .unwrap();

        let result = results.complete();
        assert_eq!(result.dark_current().unwrap().kind(), RecordKind::DarkCurrent);
        assert_eq!(result.dark_current().unwrap().sequence(), 0);
        assert_eq!(result.white_reference().unwrap().sequence(), 1);
        assert_eq!(
            result.white_reference().unwrap().point(),
            Some(&recipe.calibration.white_ref_angle)
        );

        let expected = point_to_arm_pose(
            &recipe.calibration.white_ref_angle,
            ArmRole::LightSource,
            &recipe.geometry,
        );
        assert_eq!(rig.light_arm.current_pose().await.unwrap(), expected);

        let lamp = rig.light.state().await.unwrap();
        assert!(!lamp.on);
        assert_eq!(lamp.intensity_percent, 40.0);
    }

    #[tokio::test]
    async fn test_disabled_calibration_is_a_no_op() {
        let clock = Arc::new(SimulatedClock::new());
        let rig = SimulatedRig::new(&SimulationConfig::default(), clock.clone());
        rig.connect_all().await.unwrap();

        let recipe = recipe(CalibrationConfig::disabled());
        let mut results = ResultAggregator::new(recipe.meta.clone(), clock);
        Calibrator::new(rig.devices(), MotionPolicy::default())
            .run(&recipe, &mut results)
            .await
            .unwrap();

        let result = results.complete();
        assert_eq!(result.calibration_records().count(), 0);
        assert_eq!(rig.spectrometer.measurements_started().await, 0);
    }

    #[tokio::test]
    async fn test_dark_current_failure_names_step() {
        let clock = Arc::new(SimulatedClock::new());
        let mut rig = SimulatedRig::new(&SimulationConfig::default(), clock.clone());
        rig.spectrometer = MockSpectrometer::new("Spec", clock.clone()).fail_measurement(1);
        rig.connect_all().await.unwrap();
        rig.light.turn_on().await.unwrap();

        let recipe = recipe(CalibrationConfig::default());
        let mut results = ResultAggregator::new(recipe.meta.clone(), clock);
        let err = Calibrator::new(rig.devices(), MotionPolicy::default())
            .run(&recipe, &mut results)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ScanError::CalibrationFailed {
                step: CalibrationStep::DarkCurrent,
                source: DeviceError::MeasurementFailure(_),
            }
        ));
        assert!(rig.light.state().await.unwrap().on);
        assert_eq!(rig.spectrometer.measurements_started().await, 1);
    }

    #[tokio::test]
    async fn test_white_reference_arm_loss_fails_calibration() {
        let clock = Arc::new(SimulatedClock::new());
        let rig = SimulatedRig::new(&SimulationConfig::default(), clock.clone());
        rig.connect_all().await.unwrap();
        rig.sensor_arm.emergency_stop().await;

        let calibration = CalibrationConfig {
            do_dark_current: false,
            ..CalibrationConfig::default()
        };
        let recipe = recipe(calibration);
        let mut results = ResultAggregator::new(recipe.meta.clone(), clock);
        let err = Calibrator::new(rig.devices(), MotionPolicy::default())
            .run(&recipe, &mut results)
            .await
            .unwrap_err();

        assert_eq!(
            err,
            ScanError::CalibrationFailed {
                step: CalibrationStep::WhiteReference,
                source: DeviceError::NotConnected,
            }
        );
        assert!(!rig.sensor_arm.is_connected().await);
    }

    #[tokio::test]
    async fn test_arm_estopped_after_white_reference_move_fails_calibration() {
        let clock = Arc::new(SimulatedClock::new());
        let mut rig = SimulatedRig::new(&SimulationConfig::default(), clock.clone());
        rig.light_arm =
            MockRobotArm::new("SourceArm", clock.clone()).with_emergency_stop_after_move(1);
        rig.connect_all().await.unwrap();

        let recipe = recipe(CalibrationConfig::default());
        let mut results = ResultAggregator::new(recipe.meta.clone(), clock);
        let err = Calibrator::new(rig.devices(), MotionPolicy::LinearOnly)
            .run(&recipe, &mut results)
            .await
            .unwrap_err();

        assert_eq!(
            err,
            ScanError::CalibrationFailed {
                step: CalibrationStep::WhiteReference,
                source: DeviceError::NotConnected,
            }
        );
        // Only the dark-current spectrum was taken.
        assert_eq!(rig.spectrometer.measurements_started().await, 1);
        let result = results.complete();
        assert!(result.dark_current().is_some());
        assert!(result.white_reference().is_none());
        assert!(!rig.light.state().await.unwrap().on);
    }

    #[test]
    fn test_step_display() {
        assert_eq!(CalibrationStep::DarkCurrent.to_string(), "dark current");
        assert_eq!(CalibrationStep::WhiteReference.to_string(), "white reference");
    }
}
