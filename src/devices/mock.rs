//! Mock Hardware Implementations
//!
//! Provides simulated goniometer devices for testing without physical hardware.
//! All timing goes through an injected [`Clock`], so the same mocks give
//! realistic durations with [`SystemClock`](crate::clock::SystemClock) and
//! instant runs with [`SimulatedClock`](crate::clock::SimulatedClock).
//!
//! # Available Mocks
//!
//! - `MockLightSource` - Switchable, dimmable lamp with optional warm-up time
//! - `MockRobotArm` - Six-axis arm with distance-based motion time, stop, e-stop
//! - `MockSpectrometer` - Gaussian test spectrum, blocks for the integration time
//! - `SimulatedRig` - All four devices wired together from a [`SimulationConfig`]
//!
//! # Fault Injection
//!
//! Arms accept a reachability predicate, a joint solver and a scripted
//! e-stop, either mid-move or right after a move lands. The spectrometer can
//! drop its connection or fail a specific measurement, and the lamp can fail
//! a specific intensity command. These drive the failure-handling scenarios
//! in the tests.

use async_trait::async_trait;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::futures::Notified;
use tokio::sync::{Notify, RwLock};
use tracing::{debug, error, info, warn};

use super::light_source::validate_intensity;
use super::robot_arm::validate_speed;
use super::spectrometer::validate_integration_time;
use super::{
    Device, JointAngles, LightSource, LightState, RobotArm, RobotPose, Spectrometer, Spectrum,
};
use crate::clock::Clock;
use crate::config::SimulationConfig;
use crate::error::{DeviceError, DeviceResult, MotionFaultKind};
use crate::sequencer::ScanDevices;

// =============================================================================
// MockLightSource - Simulated Lamp
// =============================================================================

#[derive(Debug, Default)]
struct LampState {
    connected: bool,
    light: LightState,
    intensity_commands: usize,
}

/// Mock lamp.
///
/// `turn_on` waits for the configured warm-up time before returning.
pub struct MockLightSource {
    name: String,
    clock: Arc<dyn Clock>,
    warm_up: Duration,
    fail_intensity_on: Option<usize>,
    state: RwLock<LampState>,
}

impl MockLightSource {
    /// Create a disconnected lamp, off at full intensity.
    pub fn new(name: &str, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.to_string(),
            clock,
            warm_up: Duration::ZERO,
            fail_intensity_on: None,
            state: RwLock::new(LampState::default()),
        }
    }

    /// Fail the `n`-th intensity command (1-based) with a driver error.
    pub fn fail_set_intensity(mut self, n: usize) -> Self {
        self.fail_intensity_on = Some(n);
        self
    }

    /// Time the lamp needs to stabilise after switching on.
    pub fn with_warm_up(mut self, warm_up: Duration) -> Self {
        self.warm_up = warm_up;
        self
    }
}

#[async_trait]
impl Device for MockLightSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> DeviceResult<()> {
        self.state.write().await.connected = true;
        info!(device = %self.name, "Lamp connected");
        Ok(())
    }

    async fn disconnect(&self) {
        self.state.write().await.connected = false;
        info!(device = %self.name, "Lamp disconnected");
    }

    async fn is_connected(&self) -> bool {
        self.state.read().await.connected
    }
}

#[async_trait]
impl LightSource for MockLightSource {
    async fn turn_on(&self) -> DeviceResult<()> {
        let was_on = {
            let mut state = self.state.write().await;
            if !state.connected {
                return Err(DeviceError::NotConnected);
            }
            std::mem::replace(&mut state.light.on, true)
        };
        if !was_on {
            debug!(device = %self.name, warm_up_ms = self.warm_up.as_millis() as u64, "Lamp on");
            self.clock.sleep(self.warm_up).await;
        }
        Ok(())
    }

    async fn turn_off(&self) -> DeviceResult<()> {
        let mut state = self.state.write().await;
        if !state.connected {
            return Err(DeviceError::NotConnected);
        }
        state.light.on = false;
        debug!(device = %self.name, "Lamp off");
        Ok(())
    }

    async fn set_intensity(&self, percent: f64) -> DeviceResult<()> {
        let mut state = self.state.write().await;
        if !state.connected {
            return Err(DeviceError::NotConnected);
        }
        validate_intensity(percent)?;
        state.intensity_commands += 1;
        if self.fail_intensity_on == Some(state.intensity_commands) {
            warn!(device = %self.name, "Injected intensity command failure");
            return Err(DeviceError::ConnectionFailed(format!(
                "{}: intensity command not acknowledged",
                self.name
            )));
        }
        state.light.intensity_percent = percent;
        debug!(device = %self.name, percent, "Lamp intensity set");
        Ok(())
    }

    async fn state(&self) -> DeviceResult<LightState> {
        let state = self.state.read().await;
        if !state.connected {
            return Err(DeviceError::NotConnected);
        }
        Ok(state.light)
    }
}

// =============================================================================
// MockRobotArm - Simulated Arm
// =============================================================================

type ReachCheck = Box<dyn Fn(&RobotPose) -> DeviceResult<()> + Send + Sync>;
type JointSolver = Box<dyn Fn(&RobotPose) -> Option<JointAngles> + Send + Sync>;

const MOCK_ARM_JOINTS: usize = 6;

/// Travel time for `amount` units at `rate` units per second.
fn travel_time(amount: f64, rate: f64) -> Duration {
    Duration::try_from_secs_f64(amount / rate).unwrap_or(Duration::MAX)
}

#[derive(Debug)]
struct ArmState {
    connected: bool,
    /// Bumped by every stop/e-stop; a move that sees it change was halted.
    halt_epoch: u64,
    pose: RobotPose,
    joints: JointAngles,
    moves_started: usize,
}

/// Mock six-axis arm.
///
/// Simulates:
/// - Cartesian travel at `speed × max_speed_mm_per_sec` (default 250 mm/s)
/// - Joint travel at `speed × max_joint_speed_rad_per_sec` (default 1 rad/s)
/// - Graceful stop and destructive e-stop that preempt a move in flight
///
/// # Example
///
/// ```rust,ignore
/// let arm = MockRobotArm::new("SampleArm", Arc::new(SimulatedClock::new()));
/// arm.connect().await?;
/// arm.move_l(&pose, 0.5).await?;
/// assert_eq!(arm.current_pose().await?, pose);
/// ```
pub struct MockRobotArm {
    name: String,
    clock: Arc<dyn Clock>,
    state: RwLock<ArmState>,
    halted: Notify,
    connect_delay: Duration,
    max_speed_mm_per_sec: f64,
    max_joint_speed_rad_per_sec: f64,
    reach: Option<ReachCheck>,
    joint_solver: Option<JointSolver>,
    estop_on_move: Option<usize>,
    estop_after_move: Option<usize>,
}

impl MockRobotArm {
    /// Create a disconnected arm at the zero pose with six zero joints.
    pub fn new(name: &str, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.to_string(),
            clock,
            state: RwLock::new(ArmState {
                connected: false,
                halt_epoch: 0,
                pose: RobotPose::zero(),
                joints: JointAngles::zeros(MOCK_ARM_JOINTS),
                moves_started: 0,
            }),
            halted: Notify::new(),
            connect_delay: Duration::ZERO,
            max_speed_mm_per_sec: 250.0,
            max_joint_speed_rad_per_sec: 1.0,
            reach: None,
            joint_solver: None,
            estop_on_move: None,
            estop_after_move: None,
        }
    }

    /// Maximum Cartesian speed at `speed = 1.0`.
    pub fn with_speed(mut self, mm_per_sec: f64) -> Self {
        self.max_speed_mm_per_sec = mm_per_sec;
        self
    }

    /// Maximum joint speed at `speed = 1.0`.
    pub fn with_joint_speed(mut self, rad_per_sec: f64) -> Self {
        self.max_joint_speed_rad_per_sec = rad_per_sec;
        self
    }

    /// Time `connect` takes before the arm reports connected.
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    /// Reject `move_l` targets for which `check` returns an error.
    pub fn with_reachability<F>(mut self, check: F) -> Self
    where
        F: Fn(&RobotPose) -> DeviceResult<()> + Send + Sync + 'static,
    {
        self.reach = Some(Box::new(check));
        self
    }

    /// Inverse kinematics used by [`RobotArm::joint_solution`].
    pub fn with_joint_solver<F>(mut self, solver: F) -> Self
    where
        F: Fn(&RobotPose) -> Option<JointAngles> + Send + Sync + 'static,
    {
        self.joint_solver = Some(Box::new(solver));
        self
    }

    /// Simulate an operator e-stop halfway through the `n`-th move (1-based).
    pub fn with_emergency_stop_on_move(mut self, n: usize) -> Self {
        self.estop_on_move = Some(n);
        self
    }

    /// Simulate an operator e-stop right after the `n`-th move (1-based)
    /// reaches its target.
    pub fn with_emergency_stop_after_move(mut self, n: usize) -> Self {
        self.estop_after_move = Some(n);
        self
    }

    /// Number of move commands accepted so far.
    pub async fn moves_started(&self) -> usize {
        self.state.read().await.moves_started
    }

    /// Register a motion and return `(halt_epoch, move_number)`.
    fn start_motion(state: &mut ArmState) -> (u64, usize) {
        state.moves_started += 1;
        (state.halt_epoch, state.moves_started)
    }

    /// Wait out the motion, returning early if halted.
    ///
    /// `halted` must already be enabled, while the state lock that sampled
    /// the halt epoch was still held.
    async fn travel(
        &self,
        move_number: usize,
        duration: Duration,
        mut halted: Pin<&mut Notified<'_>>,
    ) {
        if self.estop_on_move == Some(move_number) {
            self.clock.sleep(duration / 2).await;
            self.emergency_stop().await;
        }

        tokio::select! {
            _ = self.clock.sleep(duration) => {}
            _ = halted.as_mut() => {}
        }
    }

    async fn finish_move(&self, move_number: usize) {
        if self.estop_after_move == Some(move_number) {
            self.emergency_stop().await;
        }
    }

    /// Check a finished motion can commit: still connected, not halted.
    fn check_commit(&self, state: &ArmState, epoch: u64) -> DeviceResult<()> {
        if !state.connected {
            return Err(DeviceError::NotConnected);
        }
        if state.halt_epoch != epoch {
            return Err(DeviceError::motion(
                MotionFaultKind::Interrupted,
                format!("{} halted before reaching target", self.name),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Device for MockRobotArm {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> DeviceResult<()> {
        info!(arm = %self.name, "Connecting...");
        self.clock.sleep(self.connect_delay).await;
        self.state.write().await.connected = true;
        info!(arm = %self.name, "Connected successfully.");
        Ok(())
    }

    async fn disconnect(&self) {
        let mut state = self.state.write().await;
        if state.connected {
            info!(arm = %self.name, "Disconnecting...");
        }
        state.connected = false;
    }

    async fn is_connected(&self) -> bool {
        self.state.read().await.connected
    }
}

#[async_trait]
impl RobotArm for MockRobotArm {
    async fn move_j(&self, target: &JointAngles, speed: f64) -> DeviceResult<()> {
        let halted = self.halted.notified();
        tokio::pin!(halted);
        let (epoch, number, travel) = {
            let mut state = self.state.write().await;
            if !state.connected {
                return Err(DeviceError::NotConnected);
            }
            validate_speed(speed)?;
            let travel = state.joints.max_travel_to(target)?;
            let (epoch, number) = Self::start_motion(&mut state);
            halted.as_mut().enable();
            (epoch, number, travel)
        };

        let duration = travel_time(travel, self.max_joint_speed_rad_per_sec * speed);
        info!(arm = %self.name, speed, travel_rad = travel, "Moving J");
        self.travel(number, duration, halted.as_mut()).await;

        {
            let mut state = self.state.write().await;
            self.check_commit(&state, epoch)?;
            state.joints = target.clone();
        }
        self.finish_move(number).await;
        Ok(())
    }

    async fn move_l(&self, target: &RobotPose, speed: f64) -> DeviceResult<()> {
        let halted = self.halted.notified();
        tokio::pin!(halted);
        let (epoch, number, distance) = {
            let mut state = self.state.write().await;
            if !state.connected {
                return Err(DeviceError::NotConnected);
            }
            validate_speed(speed)?;
            if let Some(reach) = &self.reach {
                reach(target)?;
            }
            let distance = state.pose.distance_to(target);
            let (epoch, number) = Self::start_motion(&mut state);
            halted.as_mut().enable();
            (epoch, number, distance)
        };

        let duration = travel_time(distance, self.max_speed_mm_per_sec * speed);
        info!(
            arm = %self.name,
            speed,
            x = target.position.x,
            y = target.position.y,
            z = target.position.z,
            "Moving L"
        );
        self.travel(number, duration, halted.as_mut()).await;

        {
            let mut state = self.state.write().await;
            self.check_commit(&state, epoch)?;
            state.pose = target.clone();
        }
        self.finish_move(number).await;
        Ok(())
    }

    async fn current_pose(&self) -> DeviceResult<RobotPose> {
        let state = self.state.read().await;
        if !state.connected {
            return Err(DeviceError::NotConnected);
        }
        Ok(state.pose.clone())
    }

    async fn current_joints(&self) -> DeviceResult<JointAngles> {
        let state = self.state.read().await;
        if !state.connected {
            return Err(DeviceError::NotConnected);
        }
        Ok(state.joints.clone())
    }

    async fn stop(&self) -> DeviceResult<()> {
        {
            let mut state = self.state.write().await;
            if !state.connected {
                return Err(DeviceError::NotConnected);
            }
            state.halt_epoch += 1;
        }
        self.halted.notify_waiters();
        info!(arm = %self.name, "STOP command received.");
        Ok(())
    }

    async fn emergency_stop(&self) {
        {
            let mut state = self.state.write().await;
            state.connected = false;
            state.halt_epoch += 1;
        }
        self.halted.notify_waiters();
        error!(arm = %self.name, "EMERGENCY STOP triggered!");
    }

    async fn joint_solution(&self, target: &RobotPose) -> DeviceResult<Option<JointAngles>> {
        if !self.is_connected().await {
            return Err(DeviceError::NotConnected);
        }
        Ok(self.joint_solver.as_ref().and_then(|solve| solve(target)))
    }
}

// =============================================================================
// MockSpectrometer - Simulated Spectrometer
// =============================================================================

/// Shape of the synthetic spectrum.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticSpectrum {
    /// First wavelength sample.
    pub start_nm: f64,
    /// Last wavelength sample, inclusive.
    pub end_nm: f64,
    /// Sample spacing.
    pub step_nm: f64,
    /// Centre of the Gaussian peak.
    pub peak_nm: f64,
    /// Standard deviation of the peak.
    pub peak_width_nm: f64,
}

impl Default for SyntheticSpectrum {
    fn default() -> Self {
        Self {
            start_nm: 380.0,
            end_nm: 780.0,
            step_nm: 1.0,
            peak_nm: 550.0,
            peak_width_nm: 50.0,
        }
    }
}

impl SyntheticSpectrum {
    /// Gaussian peak scaled so that 100 ms integration gives unit height.
    fn render(&self, integration_time_ms: f64) -> DeviceResult<Spectrum> {
        let steps = ((self.end_nm - self.start_nm) / self.step_nm).round() as usize + 1;
        let scale = integration_time_ms / 100.0;
        let two_sigma_sq = 2.0 * self.peak_width_nm * self.peak_width_nm;

        let wavelengths: Vec<f64> = (0..steps)
            .map(|i| self.start_nm + self.step_nm * i as f64)
            .collect();
        let intensities = wavelengths
            .iter()
            .map(|wl| (-(wl - self.peak_nm).powi(2) / two_sigma_sq).exp() * scale)
            .collect();
        Spectrum::new(wavelengths, intensities, integration_time_ms)
    }
}

#[derive(Debug)]
struct SpectrometerState {
    connected: bool,
    integration_time_ms: f64,
    measurements_started: usize,
}

/// Mock spectrometer.
///
/// Simulates:
/// - ~500 ms connect time
/// - `measure()` blocking for the integration time (default 100 ms)
/// - A 380–780 nm / 1 nm Gaussian spectrum peaking at 550 nm
pub struct MockSpectrometer {
    name: String,
    clock: Arc<dyn Clock>,
    spectrum: SyntheticSpectrum,
    connect_delay: Duration,
    state: RwLock<SpectrometerState>,
    disconnect_after: Option<usize>,
    fail_on: Option<usize>,
}

impl MockSpectrometer {
    /// Create a disconnected spectrometer with 100 ms integration time.
    pub fn new(name: &str, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.to_string(),
            clock,
            spectrum: SyntheticSpectrum::default(),
            connect_delay: Duration::from_millis(500),
            state: RwLock::new(SpectrometerState {
                connected: false,
                integration_time_ms: 100.0,
                measurements_started: 0,
            }),
            disconnect_after: None,
            fail_on: None,
        }
    }

    /// Shape of every rendered spectrum.
    pub fn with_spectrum(mut self, spectrum: SyntheticSpectrum) -> Self {
        self.spectrum = spectrum;
        self
    }

    /// Time `connect` takes before the spectrometer reports connected.
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    /// Drop the connection right after the `n`-th successful measurement.
    pub fn disconnect_after(mut self, n: usize) -> Self {
        self.disconnect_after = Some(n);
        self
    }

    /// Fail the `n`-th measurement (1-based) with a detector fault.
    pub fn fail_measurement(mut self, n: usize) -> Self {
        self.fail_on = Some(n);
        self
    }

    /// Number of `measure()` calls accepted so far.
    pub async fn measurements_started(&self) -> usize {
        self.state.read().await.measurements_started
    }
}

#[async_trait]
impl Device for MockSpectrometer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> DeviceResult<()> {
        info!(device = %self.name, "Connecting (Mock)...");
        self.clock.sleep(self.connect_delay).await;
        self.state.write().await.connected = true;
        info!(device = %self.name, "Connected.");
        Ok(())
    }

    async fn disconnect(&self) {
        let mut state = self.state.write().await;
        if state.connected {
            info!(device = %self.name, "Disconnecting...");
        }
        state.connected = false;
    }

    async fn is_connected(&self) -> bool {
        self.state.read().await.connected
    }
}

#[async_trait]
impl Spectrometer for MockSpectrometer {
    async fn set_integration_time(&self, ms: f64) -> DeviceResult<()> {
        let mut state = self.state.write().await;
        if !state.connected {
            return Err(DeviceError::NotConnected);
        }
        validate_integration_time(ms)?;
        state.integration_time_ms = ms;
        info!(device = %self.name, ms, "Integration time set");
        Ok(())
    }

    async fn integration_time(&self) -> DeviceResult<f64> {
        let state = self.state.read().await;
        if !state.connected {
            return Err(DeviceError::NotConnected);
        }
        Ok(state.integration_time_ms)
    }

    async fn measure(&self) -> DeviceResult<Spectrum> {
        let (integration_time_ms, number) = {
            let mut state = self.state.write().await;
            if !state.connected {
                return Err(DeviceError::NotConnected);
            }
            state.measurements_started += 1;
            (state.integration_time_ms, state.measurements_started)
        };

        info!(device = %self.name, integration_time_ms, "Measuring...");
        let exposure = Duration::from_nanos((integration_time_ms * 1e6).round() as u64);
        self.clock.sleep(exposure).await;

        if self.fail_on == Some(number) {
            warn!(device = %self.name, measurement = number, "Simulated detector fault");
            return Err(DeviceError::MeasurementFailure(format!(
                "{}: detector readout failed",
                self.name
            )));
        }

        let mut state = self.state.write().await;
        if !state.connected {
            return Err(DeviceError::NotConnected);
        }
        let spectrum = self.spectrum.render(integration_time_ms)?;
        if self.disconnect_after == Some(number) {
            warn!(device = %self.name, "Simulated cable loss");
            state.connected = false;
        }
        debug!(device = %self.name, points = spectrum.len(), "Measurement done.");
        Ok(spectrum)
    }
}

// =============================================================================
// SimulatedRig - Complete Mock Goniometer
// =============================================================================

/// All four simulated devices built from one [`SimulationConfig`].
pub struct SimulatedRig {
    /// Lamp.
    pub light: MockLightSource,
    /// Arm carrying the lamp.
    pub light_arm: MockRobotArm,
    /// Arm carrying the collection optics.
    pub sensor_arm: MockRobotArm,
    /// Spectrometer.
    pub spectrometer: MockSpectrometer,
}

impl SimulatedRig {
    /// Build a disconnected rig.
    pub fn new(config: &SimulationConfig, clock: Arc<dyn Clock>) -> Self {
        let connect_delay = Duration::from_millis(config.connect_delay_ms);
        let arm = |name: &str| {
            MockRobotArm::new(name, clock.clone())
                .with_speed(config.arm_speed_mm_per_sec)
                .with_joint_speed(config.joint_speed_rad_per_sec)
                .with_connect_delay(connect_delay)
        };
        Self {
            light: MockLightSource::new("MockLamp", clock.clone())
                .with_warm_up(Duration::from_millis(config.lamp_warm_up_ms)),
            light_arm: arm("SourceArm"),
            sensor_arm: arm("SampleArm"),
            spectrometer: MockSpectrometer::new("MockSpectrometer", clock.clone())
                .with_connect_delay(connect_delay)
                .with_spectrum(SyntheticSpectrum {
                    start_nm: config.wavelength_start_nm,
                    end_nm: config.wavelength_end_nm,
                    step_nm: config.wavelength_step_nm,
                    peak_nm: config.peak_nm,
                    peak_width_nm: config.peak_width_nm,
                }),
        }
    }

    /// Connect every device.
    pub async fn connect_all(&self) -> DeviceResult<()> {
        self.light.connect().await?;
        self.light_arm.connect().await?;
        self.sensor_arm.connect().await?;
        self.spectrometer.connect().await
    }

    /// Disconnect every device.
    pub async fn disconnect_all(&self) {
        self.spectrometer.disconnect().await;
        self.sensor_arm.disconnect().await;
        self.light_arm.disconnect().await;
        self.light.disconnect().await;
    }

    /// Borrow the devices for a scan.
    pub fn devices(&self) -> ScanDevices<'_> {
        ScanDevices {
            light: &self.light,
            light_arm: &self.light_arm,
            sensor_arm: &self.sensor_arm,
            spectrometer: &self.spectrometer,
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{SimulatedClock, SystemClock};
    use nalgebra::Vector3;

    fn sim_clock() -> Arc<SimulatedClock> {
        Arc::new(SimulatedClock::new())
    }

    fn pose(x: f64, y: f64, z: f64) -> RobotPose {
        RobotPose::new(Vector3::new(x, y, z), Vector3::zeros())
    }

    #[tokio::test]
    async fn test_mock_arm_moves_update_state() {
        let clock = sim_clock();
        let arm = MockRobotArm::new("SourceArm", clock.clone());
        arm.connect().await.unwrap();

        let target = JointAngles::new(vec![1.57, 0.0, 0.0, 0.0, 0.0, 0.0]);
        arm.move_j(&target, 0.5).await.unwrap();
        assert_eq!(arm.current_joints().await.unwrap(), target);

        let target = pose(100.0, 200.0, 300.0);
        arm.move_l(&target, 1.0).await.unwrap();
        assert_eq!(arm.current_pose().await.unwrap(), target);
        assert_eq!(arm.moves_started().await, 2);
    }

    #[tokio::test]
    async fn test_mock_arm_motion_time_scales_with_speed() {
        let clock = sim_clock();
        let arm = MockRobotArm::new("SampleArm", clock.clone()).with_speed(100.0);
        arm.connect().await.unwrap();

        arm.move_l(&pose(0.0, 0.0, 100.0), 0.5).await.unwrap();
        assert_eq!(clock.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_disconnected_arm_rejects_everything() {
        let arm = MockRobotArm::new("SampleArm", sim_clock());

        assert_eq!(arm.move_l(&pose(1.0, 0.0, 0.0), 0.5).await, Err(DeviceError::NotConnected));
        assert_eq!(arm.move_j(&JointAngles::zeros(6), 0.5).await, Err(DeviceError::NotConnected));
        assert_eq!(arm.current_pose().await, Err(DeviceError::NotConnected));
        assert_eq!(arm.current_joints().await, Err(DeviceError::NotConnected));
        assert_eq!(arm.stop().await, Err(DeviceError::NotConnected));
        assert_eq!(arm.moves_started().await, 0);

        arm.connect().await.unwrap();
        assert_eq!(arm.current_pose().await.unwrap(), RobotPose::zero());
    }

    #[tokio::test]
    async fn test_invalid_speed_rejected_without_mutation() {
        let arm = MockRobotArm::new("SampleArm", sim_clock());
        arm.connect().await.unwrap();

        for speed in [0.0, -0.1, 1.01] {
            assert!(matches!(
                arm.move_l(&pose(10.0, 0.0, 0.0), speed).await,
                Err(DeviceError::InvalidParameter(_))
            ));
        }
        assert_eq!(arm.current_pose().await.unwrap(), RobotPose::zero());
        assert_eq!(arm.moves_started().await, 0);
    }

    #[tokio::test]
    async fn test_emergency_stop_forces_disconnect() {
        let arm = MockRobotArm::new("SampleArm", sim_clock());
        arm.connect().await.unwrap();

        arm.emergency_stop().await;
        assert!(!arm.is_connected().await);
        assert_eq!(arm.move_l(&pose(5.0, 0.0, 0.0), 0.5).await, Err(DeviceError::NotConnected));
        let joints = JointAngles::new(vec![0.5; 6]);
        assert_eq!(arm.move_j(&joints, 0.5).await, Err(DeviceError::NotConnected));
        assert_eq!(arm.moves_started().await, 0);

        arm.connect().await.unwrap();
        arm.move_l(&pose(5.0, 0.0, 0.0), 0.5).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_emergency_stop_preempts_motion_in_flight() {
        let arm = Arc::new(MockRobotArm::new("SampleArm", Arc::new(SystemClock)).with_speed(10.0));
        arm.connect().await.unwrap();

        // 1000 mm at 10 mm/s takes 100 s; the operator hits e-stop after 1 s.
        let operator = {
            let arm = arm.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                arm.emergency_stop().await;
            })
        };

        let started = tokio::time::Instant::now();
        let result = arm.move_l(&pose(1000.0, 0.0, 0.0), 1.0).await;
        operator.await.unwrap();

        assert_eq!(result, Err(DeviceError::NotConnected));
        assert!(started.elapsed() < Duration::from_secs(100));
        arm.connect().await.unwrap();
        assert_eq!(arm.current_pose().await.unwrap(), RobotPose::zero());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_interrupts_motion_but_keeps_connection() {
        let arm = Arc::new(MockRobotArm::new("SampleArm", Arc::new(SystemClock)).with_speed(10.0));
        arm.connect().await.unwrap();

        let operator = {
            let arm = arm.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(2)).await;
                arm.stop().await
            })
        };

        let result = arm.move_l(&pose(0.0, 500.0, 0.0), 1.0).await;
        operator.await.unwrap().unwrap();

        assert!(matches!(
            result,
            Err(DeviceError::MotionFailure {
                kind: MotionFaultKind::Interrupted,
                ..
            })
        ));
        assert!(arm.is_connected().await);
        assert_eq!(arm.current_pose().await.unwrap(), RobotPose::zero());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_right_after_move_accepted_is_not_missed() {
        let arm = Arc::new(MockRobotArm::new("SampleArm", Arc::new(SystemClock)).with_speed(10.0));
        arm.connect().await.unwrap();

        let mover = {
            let arm = arm.clone();
            tokio::spawn(async move { arm.move_l(&pose(0.0, 0.0, 1000.0), 1.0).await })
        };
        while arm.moves_started().await == 0 {
            tokio::task::yield_now().await;
        }
        let started = tokio::time::Instant::now();
        arm.stop().await.unwrap();
        let result = mover.await.unwrap();

        assert!(matches!(
            result,
            Err(DeviceError::MotionFailure {
                kind: MotionFaultKind::Interrupted,
                ..
            })
        ));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(arm.current_pose().await.unwrap(), RobotPose::zero());
    }

    #[tokio::test]
    async fn test_scripted_estop_after_move_keeps_target() {
        let arm = MockRobotArm::new("SampleArm", sim_clock()).with_emergency_stop_after_move(1);
        arm.connect().await.unwrap();

        arm.move_l(&pose(10.0, 0.0, 0.0), 1.0).await.unwrap();
        assert!(!arm.is_connected().await);
        arm.connect().await.unwrap();
        assert_eq!(arm.current_pose().await.unwrap(), pose(10.0, 0.0, 0.0));
        arm.move_l(&pose(20.0, 0.0, 0.0), 1.0).await.unwrap();
        assert!(arm.is_connected().await);
    }

    #[tokio::test]
    async fn test_scripted_estop_on_move() {
        let arm = MockRobotArm::new("SampleArm", sim_clock()).with_emergency_stop_on_move(2);
        arm.connect().await.unwrap();

        arm.move_l(&pose(10.0, 0.0, 0.0), 1.0).await.unwrap();
        assert_eq!(arm.move_l(&pose(20.0, 0.0, 0.0), 1.0).await, Err(DeviceError::NotConnected));
        assert!(!arm.is_connected().await);
    }

    #[tokio::test]
    async fn test_reachability_and_joint_solver() {
        let arm = MockRobotArm::new("SampleArm", sim_clock())
            .with_reachability(|target| {
                if target.position.z < 0.0 {
                    Err(DeviceError::motion(MotionFaultKind::LinearPathUnreachable, "below table"))
                } else {
                    Ok(())
                }
            })
            .with_joint_solver(|_| Some(JointAngles::new(vec![0.3; 6])));

        assert_eq!(arm.joint_solution(&pose(0.0, 0.0, 0.0)).await, Err(DeviceError::NotConnected));
        arm.connect().await.unwrap();

        let low = pose(0.0, 0.0, -10.0);
        assert!(matches!(
            arm.move_l(&low, 0.5).await,
            Err(DeviceError::MotionFailure { kind: MotionFaultKind::LinearPathUnreachable, .. })
        ));
        assert_eq!(
            arm.joint_solution(&low).await.unwrap(),
            Some(JointAngles::new(vec![0.3; 6]))
        );
    }

    #[tokio::test]
    async fn test_move_j_rejects_wrong_joint_count() {
        let arm = MockRobotArm::new("SourceArm", sim_clock());
        arm.connect().await.unwrap();
        assert!(matches!(
            arm.move_j(&JointAngles::zeros(7), 0.5).await,
            Err(DeviceError::InvalidParameter(_))
        ));
    }

    #[tokio::test]
    async fn test_integration_time_contract() {
        let spectrometer = MockSpectrometer::new("Spec", sim_clock());
        assert_eq!(spectrometer.set_integration_time(50.0).await, Err(DeviceError::NotConnected));
        spectrometer.connect().await.unwrap();

        assert!(matches!(
            spectrometer.set_integration_time(0.0).await,
            Err(DeviceError::InvalidParameter(_))
        ));
        assert!(matches!(
            spectrometer.set_integration_time(-5.0).await,
            Err(DeviceError::InvalidParameter(_))
        ));
        assert_eq!(spectrometer.integration_time().await.unwrap(), 100.0);

        spectrometer.set_integration_time(50.0).await.unwrap();
        assert_eq!(spectrometer.integration_time().await.unwrap(), 50.0);
    }

    #[tokio::test]
    async fn test_measure_blocks_for_integration_time() {
        let clock = sim_clock();
        let spectrometer = MockSpectrometer::new("Spec", clock.clone());
        spectrometer.connect().await.unwrap();
        let after_connect = clock.elapsed();
        assert_eq!(after_connect, Duration::from_millis(500));

        spectrometer.set_integration_time(200.0).await.unwrap();
        let spectrum = spectrometer.measure().await.unwrap();

        assert_eq!(clock.elapsed() - after_connect, Duration::from_millis(200));
        assert_eq!(spectrum.len(), 401);
        assert_eq!(spectrum.wavelengths()[0], 380.0);
        assert_eq!(spectrum.wavelengths()[400], 780.0);
        let (peak_wl, peak) = spectrum.peak().unwrap();
        assert_eq!(peak_wl, 550.0);
        approx::assert_relative_eq!(peak, 2.0, epsilon = 1e-12);
    }

    #[tokio::test]
    async fn test_spectrometer_fault_injection() {
        let spectrometer = MockSpectrometer::new("Spec", sim_clock())
            .fail_measurement(1)
            .disconnect_after(2);
        spectrometer.connect().await.unwrap();

        assert!(matches!(
            spectrometer.measure().await,
            Err(DeviceError::MeasurementFailure(_))
        ));
        assert!(spectrometer.measure().await.is_ok());
        assert!(!spectrometer.is_connected().await);
        assert_eq!(spectrometer.measure().await, Err(DeviceError::NotConnected));
    }

    #[tokio::test]
    async fn test_lamp_warm_up_and_state() {
        let clock = sim_clock();
        let lamp = MockLightSource::new("Lamp", clock.clone()).with_warm_up(Duration::from_secs(3));
        lamp.connect().await.unwrap();

        lamp.turn_on().await.unwrap();
        lamp.turn_on().await.unwrap();
        assert_eq!(clock.elapsed(), Duration::from_secs(3));
        assert!(lamp.state().await.unwrap().on);

        assert!(matches!(
            lamp.set_intensity(101.0).await,
            Err(DeviceError::InvalidParameter(_))
        ));
        lamp.disconnect().await;
        lamp.disconnect().await;
        assert_eq!(lamp.turn_off().await, Err(DeviceError::NotConnected));
    }

    #[tokio::test]
    async fn test_lamp_intensity_fault_injection() {
        let lamp = MockLightSource::new("Lamp", sim_clock()).fail_set_intensity(2);
        lamp.connect().await.unwrap();

        lamp.set_intensity(40.0).await.unwrap();
        assert!(matches!(
            lamp.set_intensity(60.0).await,
            Err(DeviceError::ConnectionFailed(_))
        ));
        assert_eq!(lamp.state().await.unwrap().intensity_percent, 40.0);
        lamp.set_intensity(60.0).await.unwrap();
    }
}
