//! Measurement recipe data model.
//!
//! A [`Recipe`] is the operator-authored description of one scan: project
//! metadata, acquisition settings, calibration switches, rig geometry and
//! the ordered list of [`MeasurementPoint`]s. Parsing recipes from files is
//! left to the caller (all types are `serde`-enabled). The sequencer only
//! requires that [`Recipe::validate`] passes.
//!
//! Angles in a recipe are always degrees. Zenith angles lie in `[0, 180]`,
//! azimuths in `[0, 360)`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::geometry::{self, ArmRole, AzimuthConvention};

/// Upper bound on the points one sweep may generate.
const MAX_SWEEP_POINTS: f64 = 100_000.0;

/// One angular configuration: light-source and sensor directions, degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeasurementPoint {
    /// Light-source zenith θi.
    pub theta_i: f64,
    /// Light-source azimuth φi.
    pub phi_i: f64,
    /// Sensor zenith θo.
    pub theta_o: f64,
    /// Sensor azimuth φo.
    pub phi_o: f64,
}

impl MeasurementPoint {
    /// Point from incidence and viewing angles, degrees.
    pub fn new(theta_i: f64, phi_i: f64, theta_o: f64, phi_o: f64) -> Self {
        Self {
            theta_i,
            phi_i,
            theta_o,
            phi_o,
        }
    }

    /// (zenith, azimuth) in degrees for the given arm.
    pub fn angles_for(&self, role: ArmRole) -> (f64, f64) {
        match role {
            ArmRole::LightSource => (self.theta_i, self.phi_i),
            ArmRole::Sensor => (self.theta_o, self.phi_o),
        }
    }

    /// Check angle ranges.
    pub fn validate(&self) -> Result<(), String> {
        for (name, zenith) in [("theta_i", self.theta_i), ("theta_o", self.theta_o)] {
            if !zenith.is_finite() || !(0.0..=180.0).contains(&zenith) {
                return Err(format!("{name} = {zenith} is outside [0, 180] degrees"));
            }
        }
        for (name, azimuth) in [("phi_i", self.phi_i), ("phi_o", self.phi_o)] {
            if !azimuth.is_finite() || !(0.0..360.0).contains(&azimuth) {
                return Err(format!("{name} = {azimuth} is outside [0, 360) degrees"));
            }
        }
        Ok(())
    }
}

/// Project metadata carried into the scan result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecipeMeta {
    /// Project the scan belongs to.
    pub project_name: String,
    /// Operator.
    #[serde(default)]
    pub user: String,
    /// Free-form notes.
    #[serde(default)]
    pub description: String,
}

/// Acquisition settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Where the external exporter should write results.
    pub output_dir: PathBuf,
    /// Spectrometer integration time, milliseconds.
    pub integration_time_ms: f64,
    /// Arm speed as a fraction of maximum, in (0, 1].
    pub arm_speed: f64,
    /// Lamp intensity applied before scanning, percent.
    #[serde(default)]
    pub light_intensity_percent: Option<f64>,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("data"),
            integration_time_ms: 100.0,
            arm_speed: 0.5,
            light_intensity_percent: None,
        }
    }
}

/// Dark-current and white-reference switches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationConfig {
    /// Take a lamp-off baseline before the scan.
    #[serde(default = "default_true")]
    pub do_dark_current: bool,
    /// Take a white-reference spectrum before the scan.
    #[serde(default = "default_true")]
    pub do_white_reference: bool,
    /// Fixed angle used only for the white-reference capture (usually 45/0).
    #[serde(default = "default_white_ref_angle")]
    pub white_ref_angle: MeasurementPoint,
}

impl CalibrationConfig {
    /// Both steps disabled.
    pub fn disabled() -> Self {
        Self {
            do_dark_current: false,
            do_white_reference: false,
            ..Self::default()
        }
    }

    /// True if at least one calibration step runs.
    pub fn any_enabled(&self) -> bool {
        self.do_dark_current || self.do_white_reference
    }
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            do_dark_current: true,
            do_white_reference: true,
            white_ref_angle: default_white_ref_angle(),
        }
    }
}

/// Rig geometry used to turn angles into arm poses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    /// Specimen surface height above the rig origin, mm. Positive values
    /// shift every pose along the surface normal.
    #[serde(default)]
    pub sample_height_offset: f64,
    /// Distance from the specimen centre to each arm's tool point, mm.
    #[serde(default = "default_standoff_radius")]
    pub standoff_radius_mm: f64,
    /// How the sensor arm's base frame relates to the specimen azimuth.
    #[serde(default)]
    pub sensor_arm_azimuth: AzimuthConvention,
}

impl Default for Geometry {
    fn default() -> Self {
        Self {
            sample_height_offset: 0.0,
            standoff_radius_mm: default_standoff_radius(),
            sensor_arm_azimuth: AzimuthConvention::default(),
        }
    }
}

/// A complete scan definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    /// Project metadata.
    pub meta: RecipeMeta,
    /// Acquisition settings.
    pub config: AcquisitionConfig,
    /// Calibration switches.
    #[serde(default)]
    pub calibration: CalibrationConfig,
    /// Rig geometry.
    #[serde(default)]
    pub geometry: Geometry,
    /// Points in acquisition order. Order is significant and never changed.
    pub points: Vec<MeasurementPoint>,
}

impl Recipe {
    /// Validates the recipe invariants required before a scan may start.
    pub fn validate(&self) -> Result<(), String> {
        if self.points.is_empty() {
            return Err("Recipe contains no measurement points.".to_string());
        }
        for (index, point) in self.points.iter().enumerate() {
            point
                .validate()
                .map_err(|e| format!("Point {index}: {e}"))?;
        }

        let config = &self.config;
        if !(config.integration_time_ms.is_finite() && config.integration_time_ms > 0.0) {
            return Err(format!(
                "Integration time must be positive, got {} ms",
                config.integration_time_ms
            ));
        }
        if !(config.arm_speed > 0.0 && config.arm_speed <= 1.0) {
            return Err(format!(
                "Arm speed must be in (0, 1], got {}",
                config.arm_speed
            ));
        }
        if let Some(percent) = config.light_intensity_percent {
            if !(0.0..=100.0).contains(&percent) {
                return Err(format!(
                    "Light intensity must be in [0, 100] %, got {percent}"
                ));
            }
        }

        if !(self.geometry.standoff_radius_mm.is_finite() && self.geometry.standoff_radius_mm > 0.0)
        {
            return Err(format!(
                "Standoff radius must be positive, got {} mm",
                self.geometry.standoff_radius_mm
            ));
        }
        if !self.geometry.sample_height_offset.is_finite() {
            return Err("Sample height offset must be finite".to_string());
        }

        if self.calibration.do_white_reference {
            let white = &self.calibration.white_ref_angle;
            white
                .validate()
                .map_err(|e| format!("White reference angle: {e}"))?;
            if !geometry::is_above_specimen(white.theta_i) || !geometry::is_above_specimen(white.theta_o)
            {
                return Err(format!(
                    "White reference angle ({}, {}) must keep both arms above the specimen plane",
                    white.theta_i, white.theta_o
                ));
            }
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_white_ref_angle() -> MeasurementPoint {
    MeasurementPoint::new(45.0, 0.0, 0.0, 0.0)
}

fn default_standoff_radius() -> f64 {
    500.0
}

/// A builder for constructing [`Recipe`] instances.
#[derive(Debug, Default)]
pub struct RecipeBuilder {
    meta: RecipeMeta,
    config: AcquisitionConfig,
    calibration: CalibrationConfig,
    geometry: Geometry,
    points: Vec<MeasurementPoint>,
}

impl RecipeBuilder {
    /// Builder with default settings and no points.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set [`RecipeMeta::project_name`].
    pub fn project_name(mut self, name: &str) -> Self {
        self.meta.project_name = name.to_string();
        self
    }

    /// Set [`RecipeMeta::user`].
    pub fn user(mut self, user: &str) -> Self {
        self.meta.user = user.to_string();
        self
    }

    /// Set [`RecipeMeta::description`].
    pub fn description(mut self, description: &str) -> Self {
        self.meta.description = description.to_string();
        self
    }

    /// Set [`AcquisitionConfig::output_dir`].
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    /// Set the spectrometer integration time, ms.
    pub fn integration_time_ms(mut self, ms: f64) -> Self {
        self.config.integration_time_ms = ms;
        self
    }

    /// Set the arm speed fraction.
    pub fn arm_speed(mut self, speed: f64) -> Self {
        self.config.arm_speed = speed;
        self
    }

    /// Set the lamp intensity used while scanning, percent.
    pub fn light_intensity(mut self, percent: f64) -> Self {
        self.config.light_intensity_percent = Some(percent);
        self
    }

    /// Replace the calibration switches.
    pub fn calibration(mut self, calibration: CalibrationConfig) -> Self {
        self.calibration = calibration;
        self
    }

    /// Replace the rig geometry.
    pub fn geometry(mut self, geometry: Geometry) -> Self {
        self.geometry = geometry;
        self
    }

    /// Set [`Geometry::sample_height_offset`], mm.
    pub fn sample_height_offset(mut self, offset_mm: f64) -> Self {
        self.geometry.sample_height_offset = offset_mm;
        self
    }

    /// Append one point.
    pub fn point(mut self, point: MeasurementPoint) -> Self {
        self.points.push(point);
        self
    }

    /// Append points in iteration order.
    pub fn points(mut self, points: impl IntoIterator<Item = MeasurementPoint>) -> Self {
        self.points.extend(points);
        self
    }

    /// Append an in-plane sweep: light fixed at `theta_i` (φi = 0°), sensor
    /// swept from `theta_o_start` to `theta_o_end` inclusive on the opposite
    /// side of the plane of incidence (φo = 180°).
    ///
    /// Adds nothing when the range is empty or not finite, the step is not
    /// positive, or the sweep would exceed 100 000 points.
    pub fn in_plane_sweep(
        mut self,
        theta_i: f64,
        theta_o_start: f64,
        theta_o_end: f64,
        step: f64,
    ) -> Self {
        let span = theta_o_end - theta_o_start;
        if !(step > 0.0 && span >= 0.0 && theta_o_start.is_finite()) {
            return self;
        }
        let count = (span / step + 1e-9).floor();
        if count.is_finite() && count < MAX_SWEEP_POINTS {
            for n in 0..=count as usize {
                let theta_o = theta_o_start + step * n as f64;
                self.points
                    .push(MeasurementPoint::new(theta_i, 0.0, theta_o, 180.0));
            }
        }
        self
    }

    /// Finish. The recipe is not validated here.
    pub fn build(self) -> Recipe {
        Recipe {
            meta: self.meta,
            config: self.config,
            calibration: self.calibration,
            geometry: self.geometry,
            points: self.points,
        }
    }
}
