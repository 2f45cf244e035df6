//! Measurement sequencer.
//!
//! Drives one complete scan: pre-flight checks, calibration, then every
//! recipe point in order. Per point both arms move concurrently, and the
//! spectrometer is triggered only after both move results are in.
//!
//! # State Machine
//!
//! ```text
//! Idle ──run()──> Calibrating ──> Scanning ──> Completed
//!                      │              │
//!                      └──────┬───────┘
//!                             ▼
//!                          Aborted
//! ```
//!
//! A point whose move fails is recorded as failed and the scan goes on. Loss
//! of any device, or any spectrometer failure, aborts the scan. Either way
//! the caller gets a [`ScanResult`] holding everything captured so far.
//!
//! Progress is published on a `tokio::sync::watch` channel; see
//! [`Sequencer::subscribe`].

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::calibration::Calibrator;
use crate::clock::Clock;
use crate::devices::{DeviceRole, LightSource, LightState, RobotArm, Spectrometer};
use crate::error::{DeviceError, ScanError};
use crate::geometry::{point_to_arm_pose, ArmRole};
use crate::motion::{move_pair, MotionPath, MotionPolicy};
use crate::recipe::{MeasurementPoint, Recipe};
use crate::results::{ResultAggregator, ScanResult};

/// The drivers a scan borrows for its duration.
#[derive(Clone, Copy)]
pub struct ScanDevices<'a> {
    /// Illumination lamp.
    pub light: &'a dyn LightSource,
    /// Arm carrying the light source.
    pub light_arm: &'a dyn RobotArm,
    /// Arm carrying the collection optics.
    pub sensor_arm: &'a dyn RobotArm,
    /// Detector read at every point.
    pub spectrometer: &'a dyn Spectrometer,
}

impl ScanDevices<'_> {
    /// Connection status of the device filling `role`.
    pub async fn is_connected(&self, role: DeviceRole) -> bool {
        match role {
            DeviceRole::LightSource => self.light.is_connected().await,
            DeviceRole::LightSourceArm => self.light_arm.is_connected().await,
            DeviceRole::SensorArm => self.sensor_arm.is_connected().await,
            DeviceRole::Spectrometer => self.spectrometer.is_connected().await,
        }
    }

    /// First role that reports disconnected.
    pub async fn first_disconnected(&self) -> Option<DeviceRole> {
        for role in DeviceRole::ALL {
            if !self.is_connected(role).await {
                return Some(role);
            }
        }
        None
    }
}

/// Sequencer lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanState {
    /// No scan has started yet.
    #[default]
    Idle,
    /// Taking dark-current and white-reference spectra.
    Calibrating,
    /// Visiting recipe points.
    Scanning,
    /// Every point was processed.
    Completed,
    /// Stopped early by a fatal error.
    Aborted,
}

impl fmt::Display for ScanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanState::Idle => write!(f, "Idle"),
            ScanState::Calibrating => write!(f, "Calibrating"),
            ScanState::Scanning => write!(f, "Scanning"),
            ScanState::Completed => write!(f, "Completed"),
            ScanState::Aborted => write!(f, "Aborted"),
        }
    }
}

/// What happened at the current point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PointStatus {
    /// Arms are travelling to the point.
    Moving,
    /// Spectrometer acquisition in progress.
    Measuring,
    /// Spectrum recorded.
    Measured,
    /// A move failed; the point was skipped.
    Failed,
}

/// Snapshot published to observers.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ScanProgress {
    /// Current lifecycle state.
    pub state: ScanState,
    /// Zero-based index of the point being processed.
    pub point_index: Option<usize>,
    /// Number of points in the recipe.
    pub total_points: usize,
    /// Points with a recorded spectrum.
    pub measured_points: usize,
    /// Points skipped after a motion failure.
    pub failed_points: usize,
    /// Status of the most recent point.
    pub last_status: Option<PointStatus>,
}

impl ScanProgress {
    /// Points fully processed, successful or not.
    pub fn processed_points(&self) -> usize {
        self.measured_points + self.failed_points
    }
}

/// Runs scans against a fixed set of devices.
///
/// # Example
///
/// ```rust,ignore
/// let rig = SimulatedRig::new(&config.simulation, clock.clone());
/// rig.connect_all().await?;
/// let mut sequencer = Sequencer::new(rig.devices(), clock);
/// let result = sequencer.run(&recipe).await?;
/// ```
pub struct Sequencer<'a> {
    devices: ScanDevices<'a>,
    clock: Arc<dyn Clock>,
    policy: MotionPolicy,
    progress: watch::Sender<ScanProgress>,
}

impl<'a> Sequencer<'a> {
    /// Sequencer in [`ScanState::Idle`] using the default motion policy.
    pub fn new(devices: ScanDevices<'a>, clock: Arc<dyn Clock>) -> Self {
        let (progress, _) = watch::channel(ScanProgress::default());
        Self {
            devices,
            clock,
            policy: MotionPolicy::default(),
            progress,
        }
    }

    /// Override how arm moves fall back to joint motion.
    pub fn with_motion_policy(mut self, policy: MotionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Receive progress updates.
    pub fn subscribe(&self) -> watch::Receiver<ScanProgress> {
        self.progress.subscribe()
    }

    /// Latest published state.
    pub fn state(&self) -> ScanState {
        self.progress.borrow().state
    }

    /// Run one complete scan.
    ///
    /// # Errors
    ///
    /// Returns `Err` only when the scan cannot start: the recipe is invalid
    /// ([`ScanError::InvalidRecipe`]), a device is not connected, or the
    /// spectrometer rejects the integration time ([`ScanError::DeviceNotReady`]).
    /// The sequencer stays in its previous state. Once calibration begins,
    /// every outcome, including an abort, is returned as `Ok(ScanResult)`.
    /// A lamp that cannot be put back to its pre-scan state afterwards is
    /// logged and leaves the scan status unchanged.
    pub async fn run(&mut self, recipe: &Recipe) -> Result<ScanResult, ScanError> {
        self.preflight(recipe).await?;

        let mut results = ResultAggregator::new(recipe.meta.clone(), self.clock.clone());
        info!(
            run_id = %results.run_id(),
            project = %recipe.meta.project_name,
            points = recipe.points.len(),
            "Scan started"
        );
        self.progress.send_replace(ScanProgress {
            state: ScanState::Calibrating,
            total_points: recipe.points.len(),
            ..ScanProgress::default()
        });

        let mut saved_lamp = None;
        let outcome = self.execute(recipe, &mut results, &mut saved_lamp).await;
        let outcome = match (outcome, saved_lamp) {
            (Ok(()), Some(lamp)) => {
                if let Err(restore_err) = self.devices.light.restore(lamp).await {
                    warn!(error = %restore_err, "Could not restore lamp after scan");
                }
                Ok(())
            }
            (Err(err), Some(lamp)) => {
                if let Err(restore_err) = self.devices.light.restore(lamp).await {
                    warn!(error = %restore_err, "Could not restore lamp after abort");
                }
                Err(err)
            }
            (outcome, None) => outcome,
        };

        match outcome {
            Ok(()) => {
                self.set_state(ScanState::Completed);
                let result = results.complete();
                info!(
                    run_id = %result.run_id(),
                    measured = result.successful_points(),
                    failed = result.failed_points(),
                    "Scan completed"
                );
                Ok(result)
            }
            Err(err) => Ok(self.abort(results, err).await),
        }
    }

    async fn preflight(&self, recipe: &Recipe) -> Result<(), ScanError> {
        recipe.validate().map_err(ScanError::InvalidRecipe)?;

        if let Some(device) = self.devices.first_disconnected().await {
            return Err(ScanError::DeviceNotReady {
                device,
                source: DeviceError::NotConnected,
            });
        }

        self.devices
            .spectrometer
            .set_integration_time(recipe.config.integration_time_ms)
            .await
            .map_err(|source| ScanError::DeviceNotReady {
                device: DeviceRole::Spectrometer,
                source,
            })
    }

    async fn execute(
        &self,
        recipe: &Recipe,
        results: &mut ResultAggregator,
        saved_lamp: &mut Option<LightState>,
    ) -> Result<(), ScanError> {
        Calibrator::new(self.devices, self.policy)
            .run(recipe, results)
            .await?;

        self.set_state(ScanState::Scanning);
        *saved_lamp = Some(self.light_on(recipe).await?);

        for (index, point) in recipe.points.iter().enumerate() {
            self.scan_point(index, point, recipe, results).await?;
        }
        Ok(())
    }

    /// Switch the lamp on for the scan, returning the state to restore.
    async fn light_on(&self, recipe: &Recipe) -> Result<LightState, ScanError> {
        let light_fault = |source: DeviceError| ScanError::DeviceFault {
            device: DeviceRole::LightSource,
            source,
        };
        let light = self.devices.light;
        let saved = light.state().await.map_err(light_fault)?;
        if let Some(percent) = recipe.config.light_intensity_percent {
            light.set_intensity(percent).await.map_err(light_fault)?;
        }
        light.turn_on().await.map_err(light_fault)?;
        Ok(saved)
    }

    async fn scan_point(
        &self,
        index: usize,
        point: &MeasurementPoint,
        recipe: &Recipe,
        results: &mut ResultAggregator,
    ) -> Result<(), ScanError> {
        info!(
            point = index + 1,
            of = recipe.points.len(),
            theta_i = point.theta_i,
            phi_i = point.phi_i,
            theta_o = point.theta_o,
            phi_o = point.phi_o,
            "Moving to point"
        );
        self.progress.send_modify(|p| {
            p.point_index = Some(index);
            p.last_status = Some(PointStatus::Moving);
        });
        self.ensure_connected().await?;

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

        let light_move = classify_move(DeviceRole::LightSourceArm, light_move)?;
        let sensor_move = classify_move(DeviceRole::SensorArm, sensor_move)?;
        if let Some(err) = light_move.err().or(sensor_move.err()) {
            warn!(point = index + 1, error = %err, "Point skipped: motion failed");
            results.record_point_failure(*point, err);
            self.progress.send_modify(|p| {
                p.failed_points += 1;
                p.last_status = Some(PointStatus::Failed);
            });
            return Ok(());
        }

        self.ensure_connected().await?;
        self.progress
            .send_modify(|p| p.last_status = Some(PointStatus::Measuring));
        let spectrum = self
            .devices
            .spectrometer
            .measure()
            .await
            .map_err(ScanError::MeasurementFailure)?;

        let record = results.record_point(*point, spectrum);
        debug!(point = index + 1, sequence = record.sequence(), "Point measured");
        self.progress.send_modify(|p| {
            p.measured_points += 1;
            p.last_status = Some(PointStatus::Measured);
        });
        Ok(())
    }

    /// Abort on any device that dropped its connection.
    async fn ensure_connected(&self) -> Result<(), ScanError> {
        match self.devices.first_disconnected().await {
            None => Ok(()),
            Some(DeviceRole::Spectrometer) => {
                Err(ScanError::MeasurementFailure(DeviceError::NotConnected))
            }
            Some(device) => Err(ScanError::DeviceFault {
                device,
                source: DeviceError::NotConnected,
            }),
        }
    }

    async fn abort(&self, results: ResultAggregator, err: ScanError) -> ScanResult {
        error!(run_id = %results.run_id(), error = %err, "Scan aborted");
        for arm in [self.devices.light_arm, self.devices.sensor_arm] {
            if arm.is_connected().await {
                if let Err(stop_err) = arm.stop().await {
                    warn!(arm = %arm.name(), error = %stop_err, "Stop after abort failed");
                }
            }
        }
        self.set_state(ScanState::Aborted);
        results.abort(err)
    }

    fn set_state(&self, state: ScanState) {
        debug!(%state, "Sequencer state");
        self.progress.send_modify(|p| p.state = state);
    }
}

/// Split a move result into fatal (outer `Err`) and point-level (inner `Err`).
fn classify_move(
    device: DeviceRole,
    result: Result<MotionPath, DeviceError>,
) -> Result<Result<MotionPath, DeviceError>, ScanError> {
    match result {
        Ok(path) => Ok(Ok(path)),
        Err(err @ (DeviceError::MotionFailure { .. } | DeviceError::InvalidParameter(_))) => {
            Ok(Err(err))
        }
        Err(source) => Err(ScanError::DeviceFault { device, source }),
    }
}
