//! Error Taxonomy
//!
//! Three classes of failure, each with its own recovery policy:
//! - [`ConfigError`]: invalid constants. Rejected at construction so a bad
//!   value never reaches a division. Prevents the control loop from running.
//! - [`ReadFault`]: a single analog read failed. The last-known-good sample is
//!   kept and the loop continues.
//! - [`ActuatorError`]: a motor output could not be programmed. Treated as a
//!   fatal hardware fault; the control loop stops every actuator and halts.
//!
//! [`ControlError`] is what the control loop itself surfaces to the operator.

use embedded_hal::{digital, pwm};

use crate::control::ControlState;

/// Invalid configuration constant
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// Pulses per revolution must be positive and finite
    #[error("pulses per revolution must be positive")]
    PulsesPerRev,
    /// A sampling window must have a positive, finite length
    #[error("sampling window must be positive")]
    Window,
    /// The analog sampling frequency must be positive and finite
    #[error("sampling frequency must be positive")]
    SamplingFrequency,
    /// The control loop period must be non-zero
    #[error("control period must be non-zero")]
    ControlPeriod,
    /// The display refresh period must be non-zero
    #[error("display period must be non-zero")]
    DisplayPeriod,
    /// The PWM carrier period must be non-zero
    #[error("PWM carrier period must be non-zero")]
    CarrierPeriod,
    /// The analog reference voltage must be positive and finite
    #[error("reference voltage must be positive")]
    ReferenceVoltage,
    /// The centered-mapping deadband must lie in [0.0, 1.0)
    #[error("deadband must lie in [0, 1)")]
    Deadband,
    /// A decoder was built for a different encoding mode than configured
    #[error("decoder encoding mode does not match the configuration")]
    EncodingMode,
    /// A potentiometer sampler was built for a different reference voltage or
    /// sampling frequency than configured
    #[error("sampler settings do not match the configuration")]
    SamplerSettings,
}

/// Transient analog read failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReadFault {
    /// The input backend reported an error
    #[error("analog input read failed")]
    Backend,
    /// The backend returned NaN or infinity
    #[error("analog input returned a non-finite value")]
    NotFinite,
}

/// Motor output programming failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ActuatorError {
    /// Setting the duty cycle or carrier period failed
    #[error("PWM output fault: {0:?}")]
    Pwm(pwm::ErrorKind),
    /// Driving a direction line failed
    #[error("direction line fault: {0:?}")]
    Line(digital::ErrorKind),
}

impl ActuatorError {
    pub(crate) fn pwm<E: pwm::Error>(err: E) -> Self {
        Self::Pwm(err.kind())
    }

    pub(crate) fn line<E: digital::Error>(err: E) -> Self {
        Self::Line(err.kind())
    }
}

/// Failure surfaced by the control loop
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ControlError {
    /// Configuration rejected at construction
    #[error("configuration rejected: {0}")]
    Config(#[from] ConfigError),
    /// Fatal hardware fault, all actuators were stopped
    #[error("hardware fault: {0}")]
    Hardware(#[from] ActuatorError),
    /// Operation not allowed in the current state
    #[error("operation not allowed while {0:?}")]
    InvalidState(ControlState),
}
