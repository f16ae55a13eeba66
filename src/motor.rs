//! Motor Actuation
//!
//! Drives one brushed DC motor through an H-bridge with two direction lines
//! (IN1/IN2) and a PWM speed input.
//!
//! # Direction lines
//! | Direction | IN1  | IN2  |
//! |-----------|------|------|
//! | Forward   | high | low  |
//! | Reverse   | low  | high |
//! | Coast     | low  | low  |
//! | Brake     | high | high |
//!
//! A motor mounted mirrored on the chassis is configured `reversed`, which
//! swaps IN1 and IN2 for Forward/Reverse.
//!
//! # Reversing
//! The direction lines are only switched while the programmed duty is zero.
//! When a command reverses a spinning motor the actuator first programs duty
//! 0 ([`stop`](MotorActuator::stop)), then the new direction lines, then the
//! new duty. [`stop`](MotorActuator::stop) is never issued on its own after a
//! directional command.

use embassy_time::Duration;
use embedded_hal::digital::{OutputPin, PinState};
use embedded_hal::pwm::SetDutyCycle;

use crate::system::error::ActuatorError;
use crate::system::hal::PwmOutput;

/// Rotational direction of a motor command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    Forward,
    Reverse,
    /// Terminal stop state, lines set per [`StopMode`]
    Brake,
}

/// Effect of [`MotorActuator::brake`] on both direction lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StopMode {
    /// Both lines low, motor freewheels
    Coast,
    /// Both lines high, motor windings shorted
    Brake,
}

/// Wiring and stop behaviour of one motor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MotorConfig {
    pub stop_mode: StopMode,
    /// Swap IN1/IN2 for forward and reverse
    pub reversed: bool,
}

/// State last programmed into the motor outputs
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MotorCommand {
    pub direction: Direction,
    /// Duty cycle in 0.0..=1.0
    pub duty: f32,
    pub carrier_period: Duration,
}

/// Clamps a requested duty into 0.0..=1.0, NaN becomes 0.0
pub fn clamp_duty(duty: f32) -> f32 {
    if duty.is_nan() {
        0.0
    } else {
        duty.clamp(0.0, 1.0)
    }
}

/// One H-bridge motor channel
pub struct MotorActuator<P, A, B> {
    pwm: P,
    in1: A,
    in2: B,
    config: MotorConfig,
    command: MotorCommand,
}

impl<P, A, B> MotorActuator<P, A, B>
where
    P: PwmOutput,
    A: OutputPin,
    B: OutputPin,
{
    /// Takes ownership of the outputs, programs the carrier and leaves the
    /// motor in its configured stop state
    pub fn new(pwm: P, in1: A, in2: B, carrier_period: Duration, config: MotorConfig) -> Result<Self, ActuatorError> {
        let mut motor = Self {
            pwm,
            in1,
            in2,
            config,
            command: MotorCommand {
                direction: Direction::Brake,
                duty: 0.0,
                carrier_period,
            },
        };
        motor.pwm.set_period(carrier_period).map_err(ActuatorError::pwm)?;
        motor.brake()?;
        Ok(motor)
    }

    /// Last programmed state
    pub fn command(&self) -> MotorCommand {
        self.command
    }

    pub fn duty(&self) -> f32 {
        self.command.duty
    }

    pub fn direction(&self) -> Direction {
        self.command.direction
    }

    pub fn config(&self) -> MotorConfig {
        self.config
    }

    /// Programs a direction and duty
    ///
    /// The duty is clamped into 0.0..=1.0. Reversing a running motor passes
    /// through a zero-duty state before the new direction is applied.
    /// [`Direction::Brake`] ignores `duty` and behaves like [`brake`](Self::brake).
    pub fn set_command(&mut self, direction: Direction, duty: f32) -> Result<(), ActuatorError> {
        if direction == Direction::Brake {
            return self.brake();
        }

        let duty = clamp_duty(duty);
        if direction != self.command.direction {
            if self.command.duty > 0.0 {
                self.stop()?;
            }
            self.write_lines(direction)?;
            self.command.direction = direction;
        }
        self.write_duty(duty)
    }

    /// Programs a signed command in -1.0..=1.0
    ///
    /// Positive is forward, negative reverse, zero (or NaN) stops with the
    /// direction held.
    pub fn set_signed(&mut self, value: f32) -> Result<(), ActuatorError> {
        if value > 0.0 {
            self.set_command(Direction::Forward, value)
        } else if value < 0.0 {
            self.set_command(Direction::Reverse, -value)
        } else {
            self.stop()
        }
    }

    /// Forces duty to zero, direction lines unchanged
    ///
    /// Safe to call at any time and any number of times.
    pub fn stop(&mut self) -> Result<(), ActuatorError> {
        self.write_duty(0.0)
    }

    /// Forces duty to zero and puts both lines in the configured stop state
    pub fn brake(&mut self) -> Result<(), ActuatorError> {
        self.stop()?;
        self.write_lines(Direction::Brake)?;
        self.command.direction = Direction::Brake;
        Ok(())
    }

    /// Reprograms the carrier period and re-applies the current duty
    pub fn set_carrier_period(&mut self, period: Duration) -> Result<(), ActuatorError> {
        self.pwm.set_period(period).map_err(ActuatorError::pwm)?;
        self.command.carrier_period = period;
        self.write_duty(self.command.duty)
    }

    fn write_duty(&mut self, duty: f32) -> Result<(), ActuatorError> {
        let max = self.pwm.max_duty_cycle();
        let counts = libm::roundf(duty * f32::from(max)) as u16;
        self.pwm.set_duty_cycle(counts.min(max)).map_err(ActuatorError::pwm)?;
        self.command.duty = duty;
        Ok(())
    }

    fn write_lines(&mut self, direction: Direction) -> Result<(), ActuatorError> {
        let (in1, in2) = match (direction, self.config.reversed) {
            (Direction::Forward, false) | (Direction::Reverse, true) => (true, false),
            (Direction::Reverse, false) | (Direction::Forward, true) => (false, true),
            (Direction::Brake, _) => match self.config.stop_mode {
                StopMode::Coast => (false, false),
                StopMode::Brake => (true, true),
            },
        };
        // Release the line that goes low first so both never read as a
        // short-brake when switching between forward and reverse
        if in1 {
            self.in2.set_state(PinState::from(in2)).map_err(ActuatorError::line)?;
            self.in1.set_state(PinState::from(in1)).map_err(ActuatorError::line)?;
        } else {
            self.in1.set_state(PinState::from(in1)).map_err(ActuatorError::line)?;
            self.in2.set_state(PinState::from(in2)).map_err(ActuatorError::line)?;
        }
        Ok(())
    }
}
