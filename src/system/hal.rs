//! Hardware Capability Seams
//!
//! The core consumes a small capability set instead of concrete peripherals:
//! - Digital inputs with edge detection: [`embedded_hal::digital::InputPin`] +
//!   [`embedded_hal_async::digital::Wait`]
//! - Digital outputs for direction and enable lines:
//!   [`embedded_hal::digital::OutputPin`]
//! - Analog inputs with a normalized read: [`AnalogInput`]
//! - PWM outputs with settable duty and carrier period: [`PwmOutput`]
//! - A text display: [`Display`]
//! - A periodic tick source: [`Cadence`]
//!
//! Any backend implementing these (embassy-rp peripherals, scripted test
//! doubles) can drive the core.

use embassy_time::{Duration, Instant, Ticker};
use embedded_hal::pwm::SetDutyCycle;

/// Analog input returning a reading normalized to the ADC full scale
pub trait AnalogInput {
    /// Backend error type
    type Error;

    /// Performs one conversion and returns it normalized to 0.0..=1.0
    fn read_normalized(&mut self) -> Result<f32, Self::Error>;
}

impl<T: AnalogInput + ?Sized> AnalogInput for &mut T {
    type Error = T::Error;

    fn read_normalized(&mut self) -> Result<f32, Self::Error> {
        T::read_normalized(self)
    }
}

/// PWM channel whose carrier period can be reprogrammed
///
/// Duty is set through the embedded-hal [`SetDutyCycle`] methods. Changing
/// the period may change [`SetDutyCycle::max_duty_cycle`], so callers must
/// re-apply the duty afterwards.
pub trait PwmOutput: SetDutyCycle {
    /// Programs the carrier period
    fn set_period(&mut self, period: Duration) -> Result<(), Self::Error>;
}

/// Position on the display, in pixels from the top-left corner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Text display
///
/// One refresh is `clear`, any number of `text` calls, then `flush`.
pub trait Display {
    /// Backend error type
    type Error;

    /// Clears the frame
    fn clear(&mut self) -> Result<(), Self::Error>;

    /// Draws `text` with its top-left corner at `at`
    fn text(&mut self, at: Position, text: &str) -> Result<(), Self::Error>;

    /// Pushes the frame to the panel
    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Periodic tick source
///
/// Each call waits for the next deadline and returns the instant the tick was
/// observed. Deadlines are absolute, so a late iteration does not shift the
/// ones after it.
#[allow(async_fn_in_trait)]
pub trait Cadence {
    async fn next_tick(&mut self) -> Instant;
}

impl Cadence for Ticker {
    async fn next_tick(&mut self) -> Instant {
        self.next().await;
        Instant::now()
    }
}

impl<T: Cadence + ?Sized> Cadence for &mut T {
    async fn next_tick(&mut self) -> Instant {
        T::next_tick(self).await
    }
}
