//! Startup Configuration
//!
//! All constants the core needs, fixed for a session and validated once before
//! the control loop is built.
//!
//! # Defaults
//! - 624 decoded counts per wheel revolution, X4 decoding
//! - Potentiometers sampled at 10 Hz against a 3.3 V reference
//! - Motors updated every 20 ms, telemetry refreshed every 100 ms
//! - 10 kHz PWM carrier (cheap brushed motors behave better at low carrier
//!   frequencies)

use embassy_time::Duration;

use crate::motor::{MotorConfig, StopMode};
use crate::sensor::analog::AnalogSampler;
use crate::sensor::quadrature::{EncodingMode, QuadratureDecoder};
use crate::system::error::ConfigError;

/// How an operator input in 0.0..=1.0 becomes a signed motor command
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CommandMapping {
    /// Forward at duty = input
    Direct,
    /// Forward at duty = 1 - input, for potentiometers wired end to end
    Inverted,
    /// Mid-travel is stop, either end is full speed in that direction.
    /// Inputs within `deadband` of the center stop the motor.
    Centered { deadband: f32 },
}

impl CommandMapping {
    /// Maps an operator input to a signed command in -1.0..=1.0
    pub fn apply(self, input: f32) -> f32 {
        let input = if input.is_nan() { 0.0 } else { input.clamp(0.0, 1.0) };
        match self {
            CommandMapping::Direct => input,
            CommandMapping::Inverted => 1.0 - input,
            CommandMapping::Centered { deadband } => {
                let signed = 2.0 * input - 1.0;
                if libm::fabsf(signed) < deadband {
                    0.0
                } else {
                    signed
                }
            }
        }
    }
}

/// Session configuration
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    /// Decoded counts per output revolution in the configured encoding mode
    pub pulses_per_rev: f32,
    /// Quadrature decoding mode of both encoders
    pub encoding: EncodingMode,
    /// Potentiometer sampling frequency in Hz
    pub sampling_frequency_hz: f32,
    /// Analog reference voltage in volts
    pub vref: f32,
    /// Period of one control iteration (motor update)
    pub control_period: Duration,
    /// Period of the telemetry refresh and pulse window
    pub display_period: Duration,
    /// PWM carrier period of both motor outputs
    pub carrier_period: Duration,
    /// Operator input to command mapping
    pub mapping: CommandMapping,
    /// Left motor wiring and stop behaviour
    pub left_motor: MotorConfig,
    /// Right motor wiring and stop behaviour
    pub right_motor: MotorConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pulses_per_rev: 624.0,
            encoding: EncodingMode::X4,
            sampling_frequency_hz: 10.0,
            vref: 3.3,
            control_period: Duration::from_millis(20),
            display_period: Duration::from_millis(100),
            carrier_period: Duration::from_micros(100),
            mapping: CommandMapping::Direct,
            left_motor: MotorConfig {
                stop_mode: StopMode::Brake,
                reversed: false,
            },
            // Mounted mirrored, so forward on the chassis is reverse on the shaft
            right_motor: MotorConfig {
                stop_mode: StopMode::Brake,
                reversed: true,
            },
        }
    }
}

impl Config {
    /// Rejects any constant that would later divide by zero or program a
    /// meaningless output
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.pulses_per_rev.is_finite() && self.pulses_per_rev > 0.0) {
            return Err(ConfigError::PulsesPerRev);
        }
        if !(self.sampling_frequency_hz.is_finite() && self.sampling_frequency_hz > 0.0) {
            return Err(ConfigError::SamplingFrequency);
        }
        if !(self.vref.is_finite() && self.vref > 0.0) {
            return Err(ConfigError::ReferenceVoltage);
        }
        if self.control_period == Duration::from_ticks(0) {
            return Err(ConfigError::ControlPeriod);
        }
        if self.display_period == Duration::from_ticks(0) {
            return Err(ConfigError::DisplayPeriod);
        }
        if self.carrier_period == Duration::from_ticks(0) {
            return Err(ConfigError::CarrierPeriod);
        }
        if let CommandMapping::Centered { deadband } = self.mapping {
            if !(0.0..1.0).contains(&deadband) {
                return Err(ConfigError::Deadband);
            }
        }
        Ok(())
    }

    /// Potentiometer sampler for this configuration
    pub fn sampler(&self) -> AnalogSampler {
        AnalogSampler::new(self.vref, self.sampling_frequency_hz)
    }

    /// Encoder decoder for this configuration
    pub const fn decoder(&self) -> QuadratureDecoder {
        QuadratureDecoder::new(self.encoding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(Config::default().validate(), Ok(()));
    }

    #[test]
    fn rejects_non_positive_constants() {
        let base = Config::default();

        let config = Config { pulses_per_rev: 0.0, ..base };
        assert_eq!(config.validate(), Err(ConfigError::PulsesPerRev));

        let config = Config { pulses_per_rev: -624.0, ..base };
        assert_eq!(config.validate(), Err(ConfigError::PulsesPerRev));

        let config = Config { sampling_frequency_hz: 0.0, ..base };
        assert_eq!(config.validate(), Err(ConfigError::SamplingFrequency));

        let config = Config { vref: f32::NAN, ..base };
        assert_eq!(config.validate(), Err(ConfigError::ReferenceVoltage));

        let config = Config { display_period: Duration::from_ticks(0), ..base };
        assert_eq!(config.validate(), Err(ConfigError::DisplayPeriod));

        let config = Config { control_period: Duration::from_ticks(0), ..base };
        assert_eq!(config.validate(), Err(ConfigError::ControlPeriod));

        let config = Config { carrier_period: Duration::from_ticks(0), ..base };
        assert_eq!(config.validate(), Err(ConfigError::CarrierPeriod));
    }

    #[test]
    fn rejects_deadband_outside_unit_range() {
        let config = Config {
            mapping: CommandMapping::Centered { deadband: 1.0 },
            ..Config::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::Deadband));
    }

    #[test]
    fn mappings() {
        assert_eq!(CommandMapping::Direct.apply(0.25), 0.25);
        assert_eq!(CommandMapping::Inverted.apply(0.25), 0.75);
        assert_eq!(CommandMapping::Direct.apply(1.5), 1.0);
        assert_eq!(CommandMapping::Direct.apply(f32::NAN), 0.0);

        let centered = CommandMapping::Centered { deadband: 0.1 };
        assert_eq!(centered.apply(0.5), 0.0);
        assert_eq!(centered.apply(0.52), 0.0);
        assert_eq!(centered.apply(1.0), 1.0);
        assert_eq!(centered.apply(0.0), -1.0);
        assert!((centered.apply(0.75) - 0.5).abs() < 1e-6);
    }
}
