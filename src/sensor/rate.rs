//! Pulse window to wheel speed
//!
//! ```text
//! RPM = (|pulses| / pulses_per_rev) * (60 / window_seconds)
//! ```
//! `pulses_per_rev` counts decoded pulses, so it already includes the encoding
//! multiplier. The result is a magnitude; direction comes from the pulse sign
//! or the commanded direction.

use crate::sensor::pulse_window::SamplingWindow;
use crate::sensor::quadrature::EncodingMode;
use crate::system::error::ConfigError;

/// Converts a pulse count over a window into RPM
pub fn estimate_rpm(pulses: i32, window_seconds: f32, pulses_per_rev: f32) -> Result<f32, ConfigError> {
    if !(window_seconds.is_finite() && window_seconds > 0.0) {
        return Err(ConfigError::Window);
    }
    if !(pulses_per_rev.is_finite() && pulses_per_rev > 0.0) {
        return Err(ConfigError::PulsesPerRev);
    }
    let revolutions = pulses.unsigned_abs() as f32 / pulses_per_rev;
    Ok(revolutions * (60.0 / window_seconds))
}

/// RPM estimator with its encoder constant validated once per session
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RateEstimator {
    pulses_per_rev: f32,
}

impl RateEstimator {
    /// `pulses_per_rev` is decoded counts per output revolution
    pub fn new(pulses_per_rev: f32) -> Result<Self, ConfigError> {
        if !(pulses_per_rev.is_finite() && pulses_per_rev > 0.0) {
            return Err(ConfigError::PulsesPerRev);
        }
        Ok(Self { pulses_per_rev })
    }

    /// Builds the estimator from physical encoder cycles per revolution
    pub fn from_cycles(cycles_per_rev: u32, mode: EncodingMode) -> Result<Self, ConfigError> {
        Self::new(cycles_per_rev as f32 * mode.multiplier() as f32)
    }

    pub fn pulses_per_rev(&self) -> f32 {
        self.pulses_per_rev
    }

    /// RPM over `window`
    pub fn estimate(&self, window: &SamplingWindow) -> Result<f32, ConfigError> {
        estimate_rpm(window.pulses, window.seconds, self.pulses_per_rev)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_scenario() {
        // (26 / 624) * (60 / 0.1)
        let rpm = estimate_rpm(26, 0.1, 624.0).unwrap();
        assert!((rpm - 25.0).abs() < 1e-3, "got {rpm}");

        // One revolution per 100 ms
        let rpm = estimate_rpm(624, 0.1, 624.0).unwrap();
        assert!((rpm - 600.0).abs() < 1e-2, "got {rpm}");
    }

    #[test]
    fn zero_pulses_is_zero_rpm() {
        assert_eq!(estimate_rpm(0, 0.1, 624.0), Ok(0.0));
        assert_eq!(estimate_rpm(0, 3.0, 1.0), Ok(0.0));
    }

    #[test]
    fn magnitude_ignores_direction() {
        assert_eq!(estimate_rpm(-26, 0.1, 624.0), estimate_rpm(26, 0.1, 624.0));
    }

    #[test]
    fn rejects_invalid_constants() {
        assert_eq!(estimate_rpm(10, 0.0, 624.0), Err(ConfigError::Window));
        assert_eq!(estimate_rpm(10, -1.0, 624.0), Err(ConfigError::Window));
        assert_eq!(estimate_rpm(10, 0.1, 0.0), Err(ConfigError::PulsesPerRev));
        assert_eq!(estimate_rpm(10, 0.1, -624.0), Err(ConfigError::PulsesPerRev));
        assert_eq!(RateEstimator::new(0.0), Err(ConfigError::PulsesPerRev));
    }

    #[test]
    fn from_cycles_folds_in_multiplier() {
        let estimator = RateEstimator::from_cycles(156, EncodingMode::X4).unwrap();
        assert_eq!(estimator.pulses_per_rev(), 624.0);

        let window = SamplingWindow { pulses: 26, seconds: 0.1 };
        let rpm = estimator.estimate(&window).unwrap();
        assert!((rpm - 25.0).abs() < 1e-3);

        assert_eq!(
            RateEstimator::from_cycles(0, EncodingMode::X2),
            Err(ConfigError::PulsesPerRev)
        );
    }
}
