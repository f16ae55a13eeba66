//! Robot firmware entry point
//!
//! Builds the hardware adapters, then runs everything on the main task:
//! - encoder edge tracking for both wheels
//! - background potentiometer sampling for both wheels
//! - the control loop, until the stop button is pressed or a motor fault
//!
//! When the control loop returns, the background activities are dropped and
//! the motors are left stopped.

#![no_std]
#![no_main]

use core::cell::RefCell;

use defmt::{error, info, warn, Debug2Format};
use diffdrive::{track_edges, Config, ControlLoop, EncoderChannel, Wheel};
use embassy_executor::Spawner;
use embassy_futures::join::join4;
use embassy_futures::select::{select, Either};
use embassy_rp::adc::{self, Adc};
use embassy_rp::block::ImageDef;
use embassy_rp::gpio::{Input, Level, Output, Pull};
use embassy_rp::i2c::{self, I2c};
use embassy_rp::pwm::{self, Pwm};
use embassy_sync::blocking_mutex::Mutex;
use embassy_time::Ticker;
use {defmt_rtt as _, panic_probe as _};

use crate::board::{Lcd, MotorPwm, PotInput, SharedAdc};
use crate::resources::{
    AssignedResources, DisplayResources, EncoderResources, MotorResources, OperatorResources, PotResources,
};

/// Board adapters
mod board;
/// Pin assignment
mod resources;

/// Firmware image type for bootloader
#[link_section = ".start_block"]
#[used]
pub static IMAGE_DEF: ImageDef = ImageDef::secure_exe();

/// Firmware entry point
#[embassy_executor::main]
async fn main(_spawner: Spawner) {
    let p = embassy_rp::init(embassy_rp::config::Config::default());
    let r = split_resources!(p);
    let config = Config::default();

    // Shared between the background activities and the control loop
    let left_pot = config.sampler();
    let right_pot = config.sampler();
    let left_decoder = config.decoder();
    let right_decoder = config.decoder();

    let adc: SharedAdc = Mutex::new(RefCell::new(Adc::new_blocking(r.pots.adc, adc::Config::default())));
    let left_input = PotInput::new(&adc, adc::Channel::new_pin(r.pots.left_pin, Pull::None));
    let right_input = PotInput::new(&adc, adc::Channel::new_pin(r.pots.right_pin, Pull::None));

    let mut left_encoder = EncoderChannel::new(
        Input::new(r.encoders.left_a, Pull::Up),
        Input::new(r.encoders.left_b, Pull::Up),
    );
    let mut right_encoder = EncoderChannel::new(
        Input::new(r.encoders.right_a, Pull::Up),
        Input::new(r.encoders.right_b, Pull::Up),
    );

    let left = Wheel {
        sampler: &left_pot,
        decoder: &left_decoder,
        pwm: MotorPwm::new(Pwm::new_output_a(r.motors.left_slice, r.motors.left_pwm_pin, pwm::Config::default())),
        in1: Output::new(r.motors.left_in1_pin, Level::Low),
        in2: Output::new(r.motors.left_in2_pin, Level::Low),
    };
    let right = Wheel {
        sampler: &right_pot,
        decoder: &right_decoder,
        pwm: MotorPwm::new(Pwm::new_output_a(r.motors.right_slice, r.motors.right_pwm_pin, pwm::Config::default())),
        in1: Output::new(r.motors.right_in1_pin, Level::Low),
        in2: Output::new(r.motors.right_in2_pin, Level::Low),
    };
    let standby = Output::new(r.motors.standby_pin, Level::Low);

    let mut i2c_config = i2c::Config::default();
    i2c_config.frequency = 400_000;
    let mut display = Lcd::new(I2c::new_blocking(r.display.i2c, r.display.scl, r.display.sda, i2c_config));
    if let Err(e) = display.init() {
        // Telemetry is presentation only, keep driving without it
        warn!("Display init failed: {}", Debug2Format(&e));
    }

    let mut control = match ControlLoop::new(config, left, right, display, standby) {
        Ok(control) => control,
        Err(e) => {
            error!("Control loop not started: {}", e);
            return;
        }
    };

    let mut stop_button = Input::new(r.operator.stop_button, Pull::Up);
    let stop_requested = stop_button.wait_for_falling_edge();

    let background = join4(
        track_edges(&left_decoder, &mut left_encoder),
        track_edges(&right_decoder, &mut right_encoder),
        left_pot.run_every(left_input),
        right_pot.run_every(right_input),
    );

    info!("Starting control loop");
    match select(control.run(Ticker::every(config.control_period), stop_requested), background).await {
        Either::First(Ok(())) => info!("Stopped by operator"),
        Either::First(Err(e)) => error!("Control loop halted: {}", e),
        // Edge tracking and sampling never return
        Either::Second(_) => error!("Background activities ended"),
    }
}
