//! Spectrometer capability.

use async_trait::async_trait;

use super::{Device, Spectrum};
use crate::error::{DeviceError, DeviceResult};

/// Spectral acquisition.
#[async_trait]
pub trait Spectrometer: Device {
    /// Set the integration time. `ms` must be positive.
    async fn set_integration_time(&self, ms: f64) -> DeviceResult<()>;

    /// Current integration time, ms.
    async fn integration_time(&self) -> DeviceResult<f64>;

    /// Acquire one spectrum. Blocks for roughly the integration time.
    async fn measure(&self) -> DeviceResult<Spectrum>;
}

/// Reject non-positive (or non-finite) integration times.
pub fn validate_integration_time(ms: f64) -> DeviceResult<()> {
    if ms.is_finite() && ms > 0.0 {
        Ok(())
    } else {
        Err(DeviceError::InvalidParameter(format!(
            "integration time must be positive, got {ms} ms"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integration_time_must_be_positive() {
        assert!(validate_integration_time(50.0).is_ok());
        assert!(matches!(
            validate_integration_time(0.0),
            Err(DeviceError::InvalidParameter(_))
        ));
        assert!(validate_integration_time(-5.0).is_err());
        assert!(validate_integration_time(f64::INFINITY).is_err());
    }
}
