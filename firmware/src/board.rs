//! Board Adapters
//!
//! Binds embassy-rp peripherals to the capability traits of the core:
//! - [`PotInput`]: one ADC channel of the shared ADC as an [`AnalogInput`]
//! - [`MotorPwm`]: channel A of a PWM slice as a [`PwmOutput`]
//! - [`Lcd`]: SSD1306 text rendering as a [`Display`]

use core::cell::RefCell;
use core::convert::Infallible;

use diffdrive::{AnalogInput, Display, Position, PwmOutput};
use display_interface::DisplayError;
use embassy_rp::adc::{self, Adc};
use embassy_rp::clocks;
use embassy_rp::i2c::{self, I2c};
use embassy_rp::peripherals::I2C0;
use embassy_rp::pwm::{self, Pwm};
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_time::Duration;
use embedded_graphics::{
    mono_font::{ascii::FONT_6X10, MonoTextStyle, MonoTextStyleBuilder},
    pixelcolor::BinaryColor,
    prelude::*,
    text::{Baseline, Text},
};
use embedded_hal::pwm::{ErrorType, SetDutyCycle};
use ssd1306::mode::BufferedGraphicsMode;
use ssd1306::prelude::*;
use ssd1306::{I2CDisplayInterface, Ssd1306};

/// Full-scale reading of the 12-bit ADC
const ADC_FULL_SCALE: f32 = 4095.0;

/// ADC shared by both potentiometers
///
/// Every conversion is a short blocking read inside the lock, nothing is held
/// across an await point.
pub type SharedAdc = Mutex<NoopRawMutex, RefCell<Adc<'static, adc::Blocking>>>;

/// One potentiometer on the shared ADC
pub struct PotInput<'a> {
    adc: &'a SharedAdc,
    channel: adc::Channel<'static>,
}

impl<'a> PotInput<'a> {
    pub fn new(adc: &'a SharedAdc, channel: adc::Channel<'static>) -> Self {
        Self { adc, channel }
    }
}

impl AnalogInput for PotInput<'_> {
    type Error = adc::Error;

    fn read_normalized(&mut self) -> Result<f32, adc::Error> {
        let channel = &mut self.channel;
        let raw = self.adc.lock(|adc| adc.borrow_mut().blocking_read(channel))?;
        Ok(f32::from(raw) / ADC_FULL_SCALE)
    }
}

/// Divider and top for a carrier `period` from a `clock_hz` system clock
///
/// Uses the smallest divider that keeps top within 16 bits.
fn carrier_timing(clock_hz: u32, period: Duration) -> (u8, u16) {
    let cycles = (u64::from(clock_hz) * period.as_micros() / 1_000_000).max(1);
    let divider = (cycles / 65_536 + 1).min(255) as u8;
    let top = (cycles / u64::from(divider)).saturating_sub(1).min(65_535) as u16;
    (divider, top)
}

/// PWM slice driving an H-bridge speed input from channel A
pub struct MotorPwm {
    pwm: Pwm<'static>,
    config: pwm::Config,
}

impl MotorPwm {
    /// Takes a slice already bound to its channel A pin
    pub fn new(pwm: Pwm<'static>) -> Self {
        Self {
            pwm,
            config: pwm::Config::default(),
        }
    }
}

impl ErrorType for MotorPwm {
    type Error = Infallible;
}

impl SetDutyCycle for MotorPwm {
    fn max_duty_cycle(&self) -> u16 {
        self.config.top
    }

    fn set_duty_cycle(&mut self, duty: u16) -> Result<(), Infallible> {
        self.config.compare_a = duty.min(self.config.top);
        self.pwm.set_config(&self.config);
        Ok(())
    }
}

impl PwmOutput for MotorPwm {
    fn set_period(&mut self, period: Duration) -> Result<(), Infallible> {
        let (divider, top) = carrier_timing(clocks::clk_sys_freq(), period);
        self.config.divider = divider.into();
        self.config.top = top;
        self.config.compare_a = self.config.compare_a.min(top);
        self.pwm.set_config(&self.config);
        defmt::debug!("PWM carrier {} us: divider {}, top {}", period.as_micros(), divider, top);
        Ok(())
    }
}

type Oled = Ssd1306<
    I2CInterface<I2c<'static, I2C0, i2c::Blocking>>,
    DisplaySize128x32,
    BufferedGraphicsMode<DisplaySize128x32>,
>;

/// 128x32 SSD1306 showing telemetry in a 6x10 font
pub struct Lcd {
    display: Oled,
    style: MonoTextStyle<'static, BinaryColor>,
}

impl Lcd {
    pub fn new(i2c: I2c<'static, I2C0, i2c::Blocking>) -> Self {
        let interface = I2CDisplayInterface::new(i2c);
        let display =
            Ssd1306::new(interface, DisplaySize128x32, DisplayRotation::Rotate0).into_buffered_graphics_mode();
        let style = MonoTextStyleBuilder::new()
            .font(&FONT_6X10)
            .text_color(BinaryColor::On)
            .build();
        Self { display, style }
    }

    /// Sends the panel its power-up sequence
    pub fn init(&mut self) -> Result<(), DisplayError> {
        self.display.init()
    }
}

impl Display for Lcd {
    type Error = DisplayError;

    fn clear(&mut self) -> Result<(), DisplayError> {
        self.display.clear_buffer();
        Ok(())
    }

    fn text(&mut self, at: Position, text: &str) -> Result<(), DisplayError> {
        Text::with_baseline(text, Point::new(at.x, at.y), self.style, Baseline::Top).draw(&mut self.display)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), DisplayError> {
        self.display.flush()
    }
}
