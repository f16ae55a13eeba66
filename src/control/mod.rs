//! Control Loop
//!
//! Ties the sensors and actuators of both wheels together:
//! - every control tick, each potentiometer sample is mapped to a motor command
//! - every display period, both pulse windows are closed, converted to RPM and
//!   reported on the display and the log
//!
//! # States
//! ```text
//! Idle --start--> Running --shutdown / fatal fault--> Stopped
//!   \____________________shutdown____________________/
//! ```
//! `Stopped` is terminal. On every path into it both motors are zeroed, put
//! in their stop state and the driver enable line is released.
//!
//! # Faults
//! - A bad configuration never produces a loop, see [`ControlLoop::new`].
//! - A motor output that cannot be programmed halts the loop.
//! - A pulse window that cannot be converted reports 0 RPM and the loop
//!   continues. So does a display that fails to refresh.

pub mod telemetry;

use core::future::Future;
use core::pin::pin;

use embassy_futures::select::{select, Either};
use embassy_time::Instant;
use embedded_hal::digital::OutputPin;

use crate::motor::{MotorActuator, MotorCommand, MotorConfig};
use crate::sensor::analog::AnalogSampler;
use crate::sensor::pulse_window::PulseWindowSampler;
use crate::sensor::quadrature::QuadratureDecoder;
use crate::sensor::rate::RateEstimator;
use crate::system::config::Config;
use crate::system::error::{ActuatorError, ConfigError, ControlError};
use crate::system::hal::{Cadence, Display, PwmOutput};

use self::telemetry::{Layout, SpeedFilter, Telemetry, WheelTelemetry};

/// Lifecycle of the control loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ControlState {
    /// Built, outputs safe, not yet driving
    Idle,
    /// Driving the motors
    Running,
    /// Halted for good
    Stopped,
}

/// Which side of the chassis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Side {
    Left,
    Right,
}

/// Hardware of one wheel as handed to [`ControlLoop::new`]
///
/// The sampler and decoder are shared with their background futures, the
/// motor outputs are owned by the loop.
pub struct Wheel<'a, P, A, B> {
    /// Operator potentiometer for this wheel
    pub sampler: &'a AnalogSampler,
    /// Encoder counter fed by `track_edges`
    pub decoder: &'a QuadratureDecoder,
    /// PWM speed input of the H-bridge
    pub pwm: P,
    pub in1: A,
    pub in2: B,
}

struct WheelState<'a, P, A, B> {
    sampler: &'a AnalogSampler,
    window: PulseWindowSampler<'a>,
    motor: MotorActuator<P, A, B>,
    filter: SpeedFilter,
    input: f32,
}

impl<'a, P, A, B> WheelState<'a, P, A, B>
where
    P: PwmOutput,
    A: OutputPin,
    B: OutputPin,
{
    fn new(wheel: Wheel<'a, P, A, B>, config: &Config, motor: MotorConfig) -> Result<Self, ActuatorError> {
        Ok(Self {
            sampler: wheel.sampler,
            window: PulseWindowSampler::new(wheel.decoder),
            motor: MotorActuator::new(wheel.pwm, wheel.in1, wheel.in2, config.carrier_period, motor)?,
            filter: SpeedFilter::new(),
            input: 0.0,
        })
    }

    fn actuate(&mut self, config: &Config) -> Result<(), ActuatorError> {
        self.input = self.sampler.latest_normalized();
        self.motor.set_signed(config.mapping.apply(self.input))
    }

    fn measure(&mut self, now: Instant, estimator: &RateEstimator) -> WheelTelemetry {
        let (pulses, rpm) = match self.window.close(now) {
            Ok(Some(window)) => match estimator.estimate(&window) {
                Ok(rpm) => (window.pulses, rpm),
                Err(e) => {
                    warn!("Speed estimate failed ({:?}), reporting 0 RPM", e);
                    (window.pulses, 0.0)
                }
            },
            Ok(None) => (0, 0.0),
            Err(e) => {
                warn!("Pulse window rejected ({:?}), reporting 0 RPM", e);
                (0, 0.0)
            }
        };

        WheelTelemetry {
            input: self.input,
            duty: self.motor.duty(),
            direction: self.motor.direction(),
            pulses,
            rpm,
            filtered_rpm: self.filter.update(rpm),
        }
    }

    /// Duty to zero, then the configured stop state. Both are attempted even
    /// if the first fails.
    fn halt(&mut self) -> Result<(), ActuatorError> {
        let stopped = self.motor.stop();
        let braked = self.motor.brake();
        stopped.and(braked)
    }
}

/// Two-wheel open-loop controller
pub struct ControlLoop<'a, P, A, B, D, E> {
    config: Config,
    state: ControlState,
    estimator: RateEstimator,
    layout: Layout,
    left: WheelState<'a, P, A, B>,
    right: WheelState<'a, P, A, B>,
    display: D,
    enable: E,
    last_report: Instant,
    telemetry: Option<Telemetry>,
}

impl<'a, P, A, B, D, E> ControlLoop<'a, P, A, B, D, E>
where
    P: PwmOutput,
    A: OutputPin,
    B: OutputPin,
    D: Display,
    E: OutputPin,
{
    /// Validates `config` and takes over both wheels
    ///
    /// The decoders and samplers of both wheels must have been built for
    /// `config`, e.g. through [`Config::decoder`] and [`Config::sampler`].
    ///
    /// Both motors are programmed with the configured carrier and left in
    /// their stop state; the enable line is held low until [`start`](Self::start).
    pub fn new(
        config: Config,
        left: Wheel<'a, P, A, B>,
        right: Wheel<'a, P, A, B>,
        display: D,
        mut enable: E,
    ) -> Result<Self, ControlError> {
        config.validate()?;
        if left.decoder.mode() != config.encoding || right.decoder.mode() != config.encoding {
            return Err(ConfigError::EncodingMode.into());
        }
        let configured = |sampler: &AnalogSampler| {
            sampler.vref() == config.vref && sampler.frequency_hz() == config.sampling_frequency_hz
        };
        if !configured(left.sampler) || !configured(right.sampler) {
            return Err(ConfigError::SamplerSettings.into());
        }
        let estimator = RateEstimator::new(config.pulses_per_rev)?;

        enable.set_low().map_err(ActuatorError::line)?;
        let left = WheelState::new(left, &config, config.left_motor)?;
        let right = WheelState::new(right, &config, config.right_motor)?;

        info!(
            "Control loop ready: {} pulses/rev, control every {} ms, report every {} ms",
            config.pulses_per_rev,
            config.control_period.as_millis(),
            config.display_period.as_millis()
        );

        Ok(Self {
            config,
            state: ControlState::Idle,
            estimator,
            layout: Layout::default(),
            left,
            right,
            display,
            enable,
            last_report: Instant::from_ticks(0),
            telemetry: None,
        })
    }

    /// Replaces the default display layout
    pub fn with_layout(mut self, layout: Layout) -> Self {
        self.layout = layout;
        self
    }

    pub fn state(&self) -> ControlState {
        self.state
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Most recent telemetry snapshot, `None` before the first report
    pub fn telemetry(&self) -> Option<Telemetry> {
        self.telemetry
    }

    /// Last state programmed into one motor
    pub fn motor_command(&self, side: Side) -> MotorCommand {
        match side {
            Side::Left => self.left.motor.command(),
            Side::Right => self.right.motor.command(),
        }
    }

    /// Enables the driver and opens both pulse windows at `now`
    pub fn start(&mut self, now: Instant) -> Result<(), ControlError> {
        if self.state != ControlState::Idle {
            return Err(ControlError::InvalidState(self.state));
        }
        if let Err(e) = self.enable.set_high() {
            return Err(self.halt(ActuatorError::line(e)));
        }
        self.left.window.open(now);
        self.right.window.open(now);
        self.last_report = now;
        self.state = ControlState::Running;
        info!("Control loop running");
        Ok(())
    }

    /// One control iteration at `now`
    ///
    /// A motor output fault stops everything and is returned as
    /// [`ControlError::Hardware`]; the loop is `Stopped` afterwards.
    pub fn step(&mut self, now: Instant) -> Result<(), ControlError> {
        if self.state != ControlState::Running {
            return Err(ControlError::InvalidState(self.state));
        }

        let actuated = self
            .left
            .actuate(&self.config)
            .and_then(|()| self.right.actuate(&self.config));
        if let Err(fault) = actuated {
            return Err(self.halt(fault));
        }

        let report_due = now
            .checked_duration_since(self.last_report)
            .is_some_and(|elapsed| elapsed >= self.config.display_period);
        if report_due {
            self.report(now);
        }
        Ok(())
    }

    fn report(&mut self, now: Instant) {
        let telemetry = Telemetry {
            at: now,
            left: self.left.measure(now, &self.estimator),
            right: self.right.measure(now, &self.estimator),
        };
        self.last_report = now;

        debug!(
            "L: in {} pulses {} rpm {} | R: in {} pulses {} rpm {}",
            telemetry.left.input,
            telemetry.left.pulses,
            telemetry.left.filtered_rpm,
            telemetry.right.input,
            telemetry.right.pulses,
            telemetry.right.filtered_rpm
        );
        if telemetry::render(&telemetry, &self.layout, &mut self.display).is_err() {
            warn!("Display refresh failed");
        }
        self.telemetry = Some(telemetry);
    }

    fn halt(&mut self, fault: ActuatorError) -> ControlError {
        error!("Motor output fault ({:?}), halting", fault);
        // The triggering fault is what gets reported
        let _ = self.shutdown();
        ControlError::Hardware(fault)
    }

    /// Zeroes and stops both motors, releases the enable line
    ///
    /// Every output is attempted even if an earlier one fails; the first
    /// failure is returned. Calling it again once `Stopped` does nothing.
    pub fn shutdown(&mut self) -> Result<(), ControlError> {
        if self.state == ControlState::Stopped {
            return Ok(());
        }
        self.state = ControlState::Stopped;

        let left = self.left.halt();
        let right = self.right.halt();
        let enable = self.enable.set_low().map_err(ActuatorError::line);
        info!("Control loop stopped");

        left.and(right).and(enable).map_err(ControlError::from)
    }

    /// Runs the loop on `cadence` until `shutdown` completes or a motor fault
    ///
    /// Starts on the first tick if still `Idle`. [`shutdown`](Self::shutdown)
    /// runs on every exit path, so both motors are at zero duty on return.
    pub async fn run<C, S>(&mut self, mut cadence: C, shutdown: S) -> Result<(), ControlError>
    where
        C: Cadence,
        S: Future<Output = ()>,
    {
        let mut shutdown = pin!(shutdown);

        let outcome = loop {
            let now = match select(cadence.next_tick(), shutdown.as_mut()).await {
                Either::First(now) => now,
                Either::Second(()) => {
                    info!("Shutdown requested");
                    break Ok(());
                }
            };

            let iteration = match self.state {
                ControlState::Idle => self.start(now).and_then(|()| self.step(now)),
                _ => self.step(now),
            };
            if let Err(e) = iteration {
                break Err(e);
            }
        };

        let stopped = self.shutdown();
        outcome.and(stopped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{
        block_on, Bench, BenchLine, BenchPwm, Level, RecordingDisplay, ScriptedAnalog, ScriptedCadence, CLOCKWISE,
    };
    use crate::motor::{Direction, StopMode};
    use crate::sensor::quadrature::EncodingMode;
    use crate::system::config::CommandMapping;
    use crate::system::error::ConfigError;
    use embassy_futures::yield_now;
    use embassy_time::Duration;
    use embedded_hal::pwm::ErrorKind;

    type TestLoop<'a> = ControlLoop<'a, BenchPwm, BenchLine, BenchLine, RecordingDisplay, Level>;

    struct Rig {
        left_input: AnalogSampler,
        right_input: AnalogSampler,
        left_decoder: QuadratureDecoder,
        right_decoder: QuadratureDecoder,
        left_bench: Bench,
        right_bench: Bench,
        display: RecordingDisplay,
        enable: Level,
    }

    impl Rig {
        fn new() -> Self {
            let config = Config::default();
            Self {
                left_input: config.sampler(),
                right_input: config.sampler(),
                left_decoder: config.decoder(),
                right_decoder: config.decoder(),
                left_bench: Bench::new(),
                right_bench: Bench::new(),
                display: RecordingDisplay::default(),
                enable: Level::default(),
            }
        }

        fn build(&self, config: Config) -> Result<TestLoop<'_>, ControlError> {
            let (pwm, in1, in2) = self.left_bench.parts();
            let left = Wheel {
                sampler: &self.left_input,
                decoder: &self.left_decoder,
                pwm,
                in1,
                in2,
            };
            let (pwm, in1, in2) = self.right_bench.parts();
            let right = Wheel {
                sampler: &self.right_input,
                decoder: &self.right_decoder,
                pwm,
                in1,
                in2,
            };
            ControlLoop::new(config, left, right, self.display.clone(), self.enable.clone())
        }

        fn set_inputs(&self, left: f32, right: f32) {
            self.left_input.sample(&mut ScriptedAnalog::new([Ok(left)])).unwrap();
            self.right_input.sample(&mut ScriptedAnalog::new([Ok(right)])).unwrap();
        }
    }

    fn spin(decoder: &QuadratureDecoder, clockwise_steps: usize) {
        for (a, b) in CLOCKWISE.into_iter().cycle().take(clockwise_steps) {
            decoder.on_edge(a, b);
        }
    }

    #[test]
    fn bad_configuration_never_builds() {
        let rig = Rig::new();
        let config = Config {
            pulses_per_rev: 0.0,
            ..Config::default()
        };
        assert!(matches!(
            rig.build(config),
            Err(ControlError::Config(ConfigError::PulsesPerRev))
        ));
    }

    #[test]
    fn decoder_mode_must_match_configuration() {
        let rig = Rig::new();
        let config = Config {
            encoding: EncodingMode::X2,
            ..Config::default()
        };
        assert!(matches!(
            rig.build(config),
            Err(ControlError::Config(ConfigError::EncodingMode))
        ));
    }

    #[test]
    fn samplers_must_match_configuration() {
        let rig = Rig::new();
        let faster = Config {
            sampling_frequency_hz: 50.0,
            ..Config::default()
        };
        assert!(matches!(
            rig.build(faster),
            Err(ControlError::Config(ConfigError::SamplerSettings))
        ));

        let five_volt = Config {
            vref: 5.0,
            ..Config::default()
        };
        assert!(matches!(
            rig.build(five_volt),
            Err(ControlError::Config(ConfigError::SamplerSettings))
        ));
    }

    #[test]
    fn new_leaves_outputs_safe() {
        let rig = Rig::new();
        let control = rig.build(Config::default()).unwrap();

        assert_eq!(control.state(), ControlState::Idle);
        assert!(!rig.enable.is_high());
        assert_eq!(rig.left_bench.last_duty(), Some(0));
        assert_eq!(rig.left_bench.lines(), (true, true));
        assert_eq!(control.motor_command(Side::Right).direction, Direction::Brake);
    }

    #[test]
    fn start_enables_driver_once() {
        let rig = Rig::new();
        let mut control = rig.build(Config::default()).unwrap();

        assert_eq!(
            control.step(Instant::from_millis(0)),
            Err(ControlError::InvalidState(ControlState::Idle))
        );

        control.start(Instant::from_millis(0)).unwrap();
        assert_eq!(control.state(), ControlState::Running);
        assert!(rig.enable.is_high());
        assert_eq!(
            control.start(Instant::from_millis(20)),
            Err(ControlError::InvalidState(ControlState::Running))
        );
    }

    #[test]
    fn step_maps_inputs_to_motor_commands() {
        let rig = Rig::new();
        let mut control = rig.build(Config::default()).unwrap();
        control.start(Instant::from_millis(0)).unwrap();
        rig.set_inputs(0.5, 0.25);

        control.step(Instant::from_millis(20)).unwrap();

        let left = control.motor_command(Side::Left);
        assert_eq!(left.direction, Direction::Forward);
        assert_eq!(left.duty, 0.5);
        assert_eq!(rig.left_bench.last_duty(), Some(500));
        assert_eq!(rig.left_bench.lines(), (true, false));

        // Right motor is mounted mirrored
        assert_eq!(rig.right_bench.last_duty(), Some(250));
        assert_eq!(rig.right_bench.lines(), (false, true));
    }

    #[test]
    fn centered_mapping_reverses_through_zero_duty() {
        let rig = Rig::new();
        let config = Config {
            mapping: CommandMapping::Centered { deadband: 0.05 },
            ..Config::default()
        };
        let mut control = rig.build(config).unwrap();
        control.start(Instant::from_millis(0)).unwrap();

        rig.set_inputs(1.0, 0.5);
        control.step(Instant::from_millis(20)).unwrap();
        assert_eq!(control.motor_command(Side::Left).direction, Direction::Forward);
        assert_eq!(control.motor_command(Side::Right).duty, 0.0);

        rig.left_bench.clear();
        rig.set_inputs(0.0, 0.5);
        control.step(Instant::from_millis(40)).unwrap();

        use crate::mock::Op;
        assert_eq!(
            rig.left_bench.ops(),
            vec![Op::Duty(0), Op::In1(false), Op::In2(true), Op::Duty(1000)]
        );
        assert_eq!(control.motor_command(Side::Left).direction, Direction::Reverse);
    }

    #[test]
    fn reports_speed_every_display_period() {
        let rig = Rig::new();
        let mut control = rig.build(Config::default()).unwrap();
        control.start(Instant::from_millis(0)).unwrap();
        rig.set_inputs(0.5, 0.5);

        spin(&rig.left_decoder, 26);
        control.step(Instant::from_millis(20)).unwrap();
        assert_eq!(control.telemetry(), None);

        control.step(Instant::from_millis(100)).unwrap();
        let telemetry = control.telemetry().unwrap();
        assert_eq!(telemetry.at, Instant::from_millis(100));
        assert_eq!(telemetry.left.pulses, 26);
        assert!((telemetry.left.rpm - 25.0).abs() < 1e-3);
        assert_eq!(telemetry.left.input, 0.5);
        assert_eq!(telemetry.right.pulses, 0);
        assert_eq!(telemetry.right.rpm, 0.0);

        let frames = rig.display.frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0][1].1, "L:   26");

        // The window restarted at the report
        control.step(Instant::from_millis(200)).unwrap();
        assert_eq!(control.telemetry().unwrap().left.pulses, 0);
        assert_eq!(rig.display.frames().len(), 2);
    }

    #[test]
    fn motor_fault_halts_everything() {
        let rig = Rig::new();
        let mut control = rig.build(Config::default()).unwrap();
        control.start(Instant::from_millis(0)).unwrap();
        rig.set_inputs(0.5, 0.5);
        control.step(Instant::from_millis(20)).unwrap();

        rig.left_bench.fail_pwm(true);
        assert_eq!(
            control.step(Instant::from_millis(40)),
            Err(ControlError::Hardware(ActuatorError::Pwm(ErrorKind::Other)))
        );

        assert_eq!(control.state(), ControlState::Stopped);
        assert!(!rig.enable.is_high());
        assert_eq!(rig.right_bench.last_duty(), Some(0));
        assert_eq!(
            control.step(Instant::from_millis(60)),
            Err(ControlError::InvalidState(ControlState::Stopped))
        );
    }

    #[test]
    fn shutdown_is_idempotent() {
        let rig = Rig::new();
        let mut control = rig.build(Config::default()).unwrap();
        control.start(Instant::from_millis(0)).unwrap();
        rig.set_inputs(0.8, 0.8);
        control.step(Instant::from_millis(20)).unwrap();

        control.shutdown().unwrap();
        assert_eq!(control.state(), ControlState::Stopped);
        assert_eq!(rig.left_bench.last_duty(), Some(0));
        assert_eq!(rig.right_bench.last_duty(), Some(0));
        assert_eq!(rig.left_bench.lines(), (true, true));
        assert!(!rig.enable.is_high());

        rig.left_bench.clear();
        control.shutdown().unwrap();
        assert!(rig.left_bench.ops().is_empty());
    }

    #[test]
    fn shutdown_honours_coast_mode() {
        let rig = Rig::new();
        let config = Config {
            left_motor: MotorConfig {
                stop_mode: StopMode::Coast,
                reversed: false,
            },
            ..Config::default()
        };
        let mut control = rig.build(config).unwrap();
        control.shutdown().unwrap();
        assert_eq!(rig.left_bench.lines(), (false, false));
        assert_eq!(rig.right_bench.lines(), (true, true));
    }

    #[test]
    fn run_stops_motors_when_shutdown_requested() {
        let rig = Rig::new();
        let mut control = rig.build(Config::default()).unwrap();
        rig.set_inputs(0.5, 0.5);

        let cadence = ScriptedCadence::every_millis(20, 10);
        let shutdown = async {
            for _ in 0..100 {
                yield_now().await;
            }
        };
        block_on(control.run(cadence, shutdown)).unwrap();

        assert_eq!(control.state(), ControlState::Stopped);
        assert_eq!(rig.left_bench.last_duty(), Some(0));
        assert_eq!(rig.right_bench.last_duty(), Some(0));
        assert!(!rig.enable.is_high());
        // Started at 20 ms, reported at 120 ms
        assert_eq!(rig.display.frames().len(), 1);
    }

    #[test]
    fn run_returns_hardware_fault() {
        let rig = Rig::new();
        let mut control = rig.build(Config::default()).unwrap();
        rig.set_inputs(0.5, 0.5);
        rig.right_bench.fail_lines(true);

        let cadence = ScriptedCadence::every_millis(20, 10);
        let outcome = block_on(control.run(cadence, core::future::pending::<()>()));

        assert!(matches!(outcome, Err(ControlError::Hardware(ActuatorError::Line(_)))));
        assert_eq!(control.state(), ControlState::Stopped);
        assert_eq!(rig.left_bench.last_duty(), Some(0));
    }

    #[test]
    fn run_after_stop_is_rejected() {
        let rig = Rig::new();
        let mut control = rig.build(Config::default()).unwrap();
        control.shutdown().unwrap();

        let cadence = ScriptedCadence::starting_at(Instant::from_millis(0), Duration::from_millis(20), 1);
        let outcome = block_on(control.run(cadence, core::future::pending::<()>()));
        assert_eq!(outcome, Err(ControlError::InvalidState(ControlState::Stopped)));
    }
}
