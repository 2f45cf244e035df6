//! Process configuration using Figment.
//!
//! Configuration is loaded from:
//! 1. `config/gonio.toml` (base configuration)
//! 2. Environment variables prefixed with `BRDF_`, nested keys separated by `__`
//!
//! ```text
//! BRDF_APPLICATION__LOG_LEVEL=debug
//! BRDF_MOTION__POLICY=linear_only
//! BRDF_SIMULATION__ARM_SPEED_MM_PER_SEC=400
//! ```
//!
//! Every section has defaults, so an empty or missing file yields a valid
//! configuration.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{AppResult, GonioError};
use crate::motion::MotionPolicy;
use crate::recipe::Recipe;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/gonio.toml";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GonioConfig {
    /// `[application]` table.
    #[serde(default)]
    pub application: ApplicationConfig,
    /// `[motion]` table.
    #[serde(default)]
    pub motion: MotionConfig,
    /// `[simulation]` table.
    #[serde(default)]
    pub simulation: SimulationConfig,
}

/// Application settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Name shown in the startup log line.
    #[serde(default = "default_name")]
    pub name: String,
    /// trace, debug, info, warn or error
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
        }
    }
}

/// Motion settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MotionConfig {
    /// Fallback behaviour for unreachable linear moves.
    #[serde(default)]
    pub policy: MotionPolicy,
}

/// Parameters of the simulated rig.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Mock arm Cartesian speed at full speed fraction, mm/s.
    pub arm_speed_mm_per_sec: f64,
    /// Mock arm joint speed at full speed fraction, rad/s.
    pub joint_speed_rad_per_sec: f64,
    /// Arm and spectrometer connect time, ms.
    pub connect_delay_ms: u64,
    /// Lamp warm-up after switching on, ms.
    pub lamp_warm_up_ms: u64,
    /// First synthetic wavelength, nm.
    pub wavelength_start_nm: f64,
    /// Last synthetic wavelength, nm.
    pub wavelength_end_nm: f64,
    /// Synthetic wavelength spacing, nm.
    pub wavelength_step_nm: f64,
    /// Centre of the synthetic Gaussian peak, nm.
    pub peak_nm: f64,
    /// Standard deviation of the synthetic peak, nm.
    pub peak_width_nm: f64,
    /// Sleep on the wall clock instead of a simulated one.
    pub realtime: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            arm_speed_mm_per_sec: 250.0,
            joint_speed_rad_per_sec: 1.0,
            connect_delay_ms: 500,
            lamp_warm_up_ms: 0,
            wavelength_start_nm: 380.0,
            wavelength_end_nm: 780.0,
            wavelength_step_nm: 1.0,
            peak_nm: 550.0,
            peak_width_nm: 50.0,
            realtime: false,
        }
    }
}

fn default_name() -> String {
    "BRDF Goniometer".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl GonioConfig {
    /// Load configuration from [`DEFAULT_CONFIG_PATH`].
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// A missing file is not an error; defaults and environment overrides
    /// still apply.
    ///
    /// # Errors
    ///
    /// Returns [`GonioError::Config`] if the file or an override cannot be
    /// parsed, and [`GonioError::Configuration`] if validation fails.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config: Self = Figment::from(Serialized::defaults(GonioConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("BRDF_").split("__"))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Log level is valid (trace, debug, info, warn, error)
    /// - Simulated speeds and peak width are positive
    /// - Wavelength grid is ascending with a positive step
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(GonioError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let sim = &self.simulation;
        let positive = [
            ("arm_speed_mm_per_sec", sim.arm_speed_mm_per_sec),
            ("joint_speed_rad_per_sec", sim.joint_speed_rad_per_sec),
            ("wavelength_step_nm", sim.wavelength_step_nm),
            ("peak_width_nm", sim.peak_width_nm),
        ];
        for (key, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(GonioError::Configuration(format!(
                    "simulation.{key} must be positive, got {value}"
                )));
            }
        }

        if !(sim.wavelength_start_nm.is_finite()
            && sim.wavelength_end_nm.is_finite()
            && sim.wavelength_start_nm < sim.wavelength_end_nm)
        {
            return Err(GonioError::Configuration(format!(
                "Wavelength range {}..{} nm is not ascending",
                sim.wavelength_start_nm, sim.wavelength_end_nm
            )));
        }

        Ok(())
    }
}

/// Read a recipe from a TOML file.
///
/// The recipe is not validated here; the sequencer does that before a scan.
pub fn load_recipe<P: AsRef<Path>>(path: P) -> AppResult<Recipe> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(GonioError::Configuration(format!(
            "Recipe file not found: {}",
            path.display()
        )));
    }
    Ok(Figment::new().merge(Toml::file(path)).extract()?)
}
