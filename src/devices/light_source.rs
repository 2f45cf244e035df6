//! Light source capability.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::Device;
use crate::error::{DeviceError, DeviceResult};

/// Snapshot of a lamp's commanded state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LightState {
    /// Lamp switched on.
    pub on: bool,
    /// Output level in percent.
    pub intensity_percent: f64,
}

impl Default for LightState {
    fn default() -> Self {
        Self {
            on: false,
            intensity_percent: 100.0,
        }
    }
}

/// Lamp control.
#[async_trait]
pub trait LightSource: Device {
    /// Switch on. Returns once the output is stable.
    async fn turn_on(&self) -> DeviceResult<()>;

    /// Switch off.
    async fn turn_off(&self) -> DeviceResult<()>;

    /// Set output level. `percent` must be in `[0, 100]`.
    async fn set_intensity(&self, percent: f64) -> DeviceResult<()>;

    /// Last commanded state.
    async fn state(&self) -> DeviceResult<LightState>;

    /// Re-apply a previously captured state.
    async fn restore(&self, state: LightState) -> DeviceResult<()> {
        self.set_intensity(state.intensity_percent).await?;
        if state.on {
            self.turn_on().await
        } else {
            self.turn_off().await
        }
    }
}

/// Reject intensities outside `[0, 100]` %.
pub fn validate_intensity(percent: f64) -> DeviceResult<()> {
    if (0.0..=100.0).contains(&percent) {
        Ok(())
    } else {
        Err(DeviceError::InvalidParameter(format!(
            "intensity {percent}% is outside [0, 100]"
        )))
    }
}

#[derive(Debug, Default)]
struct ManualState {
    connected: bool,
    light: LightState,
}

/// Lamp switched by the operator.
///
/// Commands are accepted and logged as operator instructions. The reported
/// state is what the operator was asked to do.
#[derive(Debug)]
pub struct ManualLightSource {
    name: String,
    state: RwLock<ManualState>,
}

impl ManualLightSource {
    /// Disconnected until [`Device::connect`] is called.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: RwLock::new(ManualState::default()),
        }
    }
}

impl Default for ManualLightSource {
    fn default() -> Self {
        Self::new("ManualLight")
    }
}

#[async_trait]
impl Device for ManualLightSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> DeviceResult<()> {
        self.state.write().await.connected = true;
        info!(device = %self.name, "Manual light source ready");
        Ok(())
    }

    async fn disconnect(&self) {
        self.state.write().await.connected = false;
        info!(device = %self.name, "Manual light source released");
    }

    async fn is_connected(&self) -> bool {
        self.state.read().await.connected
    }
}

#[async_trait]
impl LightSource for ManualLightSource {
    async fn turn_on(&self) -> DeviceResult<()> {
        let mut state = self.state.write().await;
        if !state.connected {
            return Err(DeviceError::NotConnected);
        }
        warn!(device = %self.name, "Operator: switch the lamp ON");
        state.light.on = true;
        Ok(())
    }

    async fn turn_off(&self) -> DeviceResult<()> {
        let mut state = self.state.write().await;
        if !state.connected {
            return Err(DeviceError::NotConnected);
        }
        warn!(device = %self.name, "Operator: switch the lamp OFF");
        state.light.on = false;
        Ok(())
    }

    async fn set_intensity(&self, percent: f64) -> DeviceResult<()> {
        let mut state = self.state.write().await;
        if !state.connected {
            return Err(DeviceError::NotConnected);
        }
        validate_intensity(percent)?;
        if state.light.intensity_percent != percent {
            warn!(device = %self.name, percent, "Operator: set lamp intensity");
        }
        state.light.intensity_percent = percent;
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

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_manual_light_requires_connection() {
        let light = ManualLightSource::default();
        assert_eq!(light.turn_on().await, Err(DeviceError::NotConnected));
        assert_eq!(light.state().await, Err(DeviceError::NotConnected));

        light.connect().await.unwrap();
        light.turn_on().await.unwrap();
        assert!(light.state().await.unwrap().on);
    }

    #[tokio::test]
    async fn test_manual_light_intensity_bounds() {
        let light = ManualLightSource::default();
        light.connect().await.unwrap();

        light.set_intensity(40.0).await.unwrap();
        assert!(matches!(
            light.set_intensity(100.5).await,
            Err(DeviceError::InvalidParameter(_))
        ));
        assert!(matches!(
            light.set_intensity(-1.0).await,
            Err(DeviceError::InvalidParameter(_))
        ));
        // A rejected call leaves the previous value in place.
        assert_eq!(light.state().await.unwrap().intensity_percent, 40.0);
    }

    #[tokio::test]
    async fn test_restore_reapplies_state() {
        let light = ManualLightSource::default();
        light.connect().await.unwrap();
        light.set_intensity(70.0).await.unwrap();
        light.turn_on().await.unwrap();
        let before = light.state().await.unwrap();

        light.turn_off().await.unwrap();
        light.set_intensity(10.0).await.unwrap();
        light.restore(before).await.unwrap();

        assert_eq!(light.state().await.unwrap(), before);
    }
}
