//! Differential-drive sampling and actuation core
//!
//! Hardware-agnostic building blocks for a two-wheeled robot that reads
//! quadrature encoders, samples operator potentiometers in the background and
//! drives two brushed motors through PWM plus direction lines.
//!
//! # Data flow
//! ```text
//! pots ──► AnalogSampler (background, per cadence tick)
//!                │ latest sample (atomic cell)
//!                ▼
//!          ControlLoop ──► MotorActuator (direction + duty)
//!                ▲
//!                │ sample_and_reset once per display period
//! encoders ──► QuadratureDecoder ◄── track_edges (background)
//!                │
//!                ▼
//!          RateEstimator ──► Telemetry ──► Display
//! ```
//!
//! Everything that touches hardware goes through the capability traits in
//! [`system::hal`], so the same code runs against embassy-rp peripherals in the
//! firmware and against scripted doubles in host tests.
//!
//! # Features
//! - **`defmt`**: log through `defmt` and derive `defmt::Format` on public
//!   types. Without it, log output goes to the `log` facade.
//! - **`mock`**: exposes [`mock`], the scripted hardware doubles used by the
//!   tests. Pulls in `std`.

#![cfg_attr(not(any(test, feature = "mock")), no_std)]

// Must come first so the log macros are visible in every module below.
#[macro_use]
mod fmt;

pub mod control;
pub mod motor;
pub mod sensor;
pub mod system;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use control::telemetry::{Layout, Telemetry, WheelTelemetry};
pub use control::{ControlLoop, ControlState, Side, Wheel};
pub use motor::{Direction, MotorActuator, MotorCommand, MotorConfig, StopMode};
pub use sensor::analog::{AnalogSample, AnalogSampler};
pub use sensor::pulse_window::{PulseWindowSampler, SamplingWindow};
pub use sensor::quadrature::{track_edges, EncoderChannel, EncodingMode, QuadratureDecoder};
pub use sensor::rate::{estimate_rpm, RateEstimator};
pub use system::config::{CommandMapping, Config};
pub use system::error::{ActuatorError, ConfigError, ControlError, ReadFault};
pub use system::hal::{AnalogInput, Cadence, Display, Position, PwmOutput};
