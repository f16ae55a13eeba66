//! Scripted hardware doubles for host tests
//!
//! Every double records or replays through shared handles, so a test keeps a
//! clone to inspect what the code under test did with the other one.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::convert::Infallible;
use std::rc::Rc;

use embassy_futures::yield_now;
use embassy_time::{Duration, Instant};
use embedded_hal::{digital, pwm};

use crate::motor::{MotorActuator, MotorConfig};
use crate::system::hal::{AnalogInput, Cadence, Display, Position, PwmOutput};

pub use embassy_futures::block_on;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockError;

impl digital::Error for MockError {
    fn kind(&self) -> digital::ErrorKind {
        digital::ErrorKind::Other
    }
}

impl pwm::Error for MockError {
    fn kind(&self) -> pwm::ErrorKind {
        pwm::ErrorKind::Other
    }
}

// --- Encoder -------------------------------------------------------------

/// One full clockwise quadrature cycle as (A, B) levels
pub const CLOCKWISE: [(bool, bool); 4] = [(true, false), (true, true), (false, true), (false, false)];

/// One full counter-clockwise quadrature cycle as (A, B) levels
pub const COUNTER_CLOCKWISE: [(bool, bool); 4] = [(false, true), (true, true), (true, false), (false, false)];

/// One scripted wake-up of an encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderStep {
    /// The channels move to (A, B)
    Edge(bool, bool),
    /// The edge arrives but reading channel A right after it fails
    ReadFault,
    /// Waiting for the edge fails
    WaitFault,
}

struct EncoderScript {
    levels: (bool, bool),
    fail_read: bool,
    steps: VecDeque<EncoderStep>,
}

/// Encoder whose channel A "fires" once per scripted step
///
/// When the script runs out the encoder goes quiet, as a wheel at rest
/// would. Channel B never fires; the decoder does not care which channel
/// woke it.
#[derive(Clone)]
pub struct ScriptedEncoder(Rc<RefCell<EncoderScript>>);

impl ScriptedEncoder {
    pub fn new(initial: (bool, bool), steps: impl IntoIterator<Item = EncoderStep>) -> Self {
        Self(Rc::new(RefCell::new(EncoderScript {
            levels: initial,
            fail_read: false,
            steps: steps.into_iter().collect(),
        })))
    }

    pub fn split(&self) -> (ScriptedPinA, ScriptedPinB) {
        (ScriptedPinA(self.0.clone()), ScriptedPinB(self.0.clone()))
    }

    /// Completes once every step was delivered and the consumer had one more
    /// turn to act on the last one
    pub async fn drained(&self) {
        while !self.0.borrow().steps.is_empty() {
            yield_now().await;
        }
        yield_now().await;
    }
}

pub struct ScriptedPinA(Rc<RefCell<EncoderScript>>);
pub struct ScriptedPinB(Rc<RefCell<EncoderScript>>);

impl digital::ErrorType for ScriptedPinA {
    type Error = MockError;
}

impl digital::ErrorType for ScriptedPinB {
    type Error = MockError;
}

impl ScriptedPinA {
    fn level(&mut self) -> Result<bool, MockError> {
        let mut script = self.0.borrow_mut();
        if core::mem::take(&mut script.fail_read) {
            return Err(MockError);
        }
        Ok(script.levels.0)
    }

    async fn advance(&mut self) -> Result<(), MockError> {
        yield_now().await;
        let step = self.0.borrow_mut().steps.pop_front();
        let Some(step) = step else {
            return core::future::pending().await;
        };
        let mut script = self.0.borrow_mut();
        match step {
            EncoderStep::Edge(a, b) => script.levels = (a, b),
            EncoderStep::ReadFault => script.fail_read = true,
            EncoderStep::WaitFault => return Err(MockError),
        }
        Ok(())
    }
}

impl digital::InputPin for ScriptedPinA {
    fn is_high(&mut self) -> Result<bool, MockError> {
        self.level()
    }

    fn is_low(&mut self) -> Result<bool, MockError> {
        self.level().map(|level| !level)
    }
}

impl digital::InputPin for ScriptedPinB {
    fn is_high(&mut self) -> Result<bool, MockError> {
        Ok(self.0.borrow().levels.1)
    }

    fn is_low(&mut self) -> Result<bool, MockError> {
        Ok(!self.0.borrow().levels.1)
    }
}

impl embedded_hal_async::digital::Wait for ScriptedPinA {
    async fn wait_for_high(&mut self) -> Result<(), MockError> {
        self.advance().await
    }

    async fn wait_for_low(&mut self) -> Result<(), MockError> {
        self.advance().await
    }

    async fn wait_for_rising_edge(&mut self) -> Result<(), MockError> {
        self.advance().await
    }

    async fn wait_for_falling_edge(&mut self) -> Result<(), MockError> {
        self.advance().await
    }

    async fn wait_for_any_edge(&mut self) -> Result<(), MockError> {
        self.advance().await
    }
}

impl embedded_hal_async::digital::Wait for ScriptedPinB {
    async fn wait_for_high(&mut self) -> Result<(), MockError> {
        core::future::pending().await
    }

    async fn wait_for_low(&mut self) -> Result<(), MockError> {
        core::future::pending().await
    }

    async fn wait_for_rising_edge(&mut self) -> Result<(), MockError> {
        core::future::pending().await
    }

    async fn wait_for_falling_edge(&mut self) -> Result<(), MockError> {
        core::future::pending().await
    }

    async fn wait_for_any_edge(&mut self) -> Result<(), MockError> {
        core::future::pending().await
    }
}

// --- Analog input --------------------------------------------------------

/// Returns scripted readings, then errors
pub struct ScriptedAnalog(VecDeque<Result<f32, ()>>);

impl ScriptedAnalog {
    pub fn new<const N: usize>(readings: [Result<f32, ()>; N]) -> Self {
        Self(readings.into_iter().collect())
    }
}

impl AnalogInput for ScriptedAnalog {
    type Error = ();

    fn read_normalized(&mut self) -> Result<f32, ()> {
        self.0.pop_front().unwrap_or(Err(()))
    }
}

// --- Cadence -------------------------------------------------------------

/// Emits `ticks` synthetic instants `period` apart, then never ticks again
pub struct ScriptedCadence {
    now: Instant,
    period: Duration,
    remaining: usize,
}

impl ScriptedCadence {
    pub fn every_millis(period_ms: u64, ticks: usize) -> Self {
        Self::starting_at(Instant::from_millis(0), Duration::from_millis(period_ms), ticks)
    }

    pub fn starting_at(start: Instant, period: Duration, ticks: usize) -> Self {
        Self {
            now: start,
            period,
            remaining: ticks,
        }
    }
}

impl Cadence for ScriptedCadence {
    async fn next_tick(&mut self) -> Instant {
        if self.remaining == 0 {
            core::future::pending::<()>().await;
        }
        self.remaining -= 1;
        self.now += self.period;
        yield_now().await;
        self.now
    }
}

// --- Motor outputs -------------------------------------------------------

/// One programming operation seen by the bench
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Period(Duration),
    Duty(u16),
    In1(bool),
    In2(bool),
}

#[derive(Default)]
struct BenchState {
    ops: Vec<Op>,
    max_duty: u16,
    in1: bool,
    in2: bool,
    fail_pwm: bool,
    fail_lines: bool,
}

/// Records everything programmed into one motor channel
///
/// Max duty is ten counts per microsecond of carrier period.
#[derive(Clone)]
pub struct Bench(Rc<RefCell<BenchState>>);

pub type BenchMotor = MotorActuator<BenchPwm, BenchLine, BenchLine>;

impl Default for Bench {
    fn default() -> Self {
        Self::new()
    }
}

impl Bench {
    pub fn new() -> Self {
        Self(Rc::new(RefCell::new(BenchState {
            max_duty: 1000,
            ..BenchState::default()
        })))
    }

    pub fn parts(&self) -> (BenchPwm, BenchLine, BenchLine) {
        (
            BenchPwm(self.0.clone()),
            BenchLine { bench: self.0.clone(), first: true },
            BenchLine { bench: self.0.clone(), first: false },
        )
    }

    pub fn motor(&self, config: MotorConfig) -> BenchMotor {
        let (pwm, in1, in2) = self.parts();
        MotorActuator::new(pwm, in1, in2, Duration::from_micros(100), config).unwrap()
    }

    pub fn ops(&self) -> Vec<Op> {
        self.0.borrow().ops.clone()
    }

    pub fn clear(&self) {
        self.0.borrow_mut().ops.clear();
    }

    pub fn last_duty(&self) -> Option<u16> {
        self.0.borrow().ops.iter().rev().find_map(|op| match op {
            Op::Duty(duty) => Some(*duty),
            _ => None,
        })
    }

    /// Current (IN1, IN2) levels
    pub fn lines(&self) -> (bool, bool) {
        let state = self.0.borrow();
        (state.in1, state.in2)
    }

    pub fn fail_pwm(&self, fail: bool) {
        self.0.borrow_mut().fail_pwm = fail;
    }

    pub fn fail_lines(&self, fail: bool) {
        self.0.borrow_mut().fail_lines = fail;
    }
}

pub struct BenchPwm(Rc<RefCell<BenchState>>);

impl pwm::ErrorType for BenchPwm {
    type Error = MockError;
}

impl pwm::SetDutyCycle for BenchPwm {
    fn max_duty_cycle(&self) -> u16 {
        self.0.borrow().max_duty
    }

    fn set_duty_cycle(&mut self, duty: u16) -> Result<(), MockError> {
        let mut state = self.0.borrow_mut();
        if state.fail_pwm {
            return Err(MockError);
        }
        state.ops.push(Op::Duty(duty));
        Ok(())
    }
}

impl PwmOutput for BenchPwm {
    fn set_period(&mut self, period: Duration) -> Result<(), MockError> {
        let mut state = self.0.borrow_mut();
        if state.fail_pwm {
            return Err(MockError);
        }
        state.max_duty = (period.as_micros() * 10) as u16;
        state.ops.push(Op::Period(period));
        Ok(())
    }
}

pub struct BenchLine {
    bench: Rc<RefCell<BenchState>>,
    first: bool,
}

impl digital::ErrorType for BenchLine {
    type Error = MockError;
}

impl digital::OutputPin for BenchLine {
    fn set_low(&mut self) -> Result<(), MockError> {
        self.set(false)
    }

    fn set_high(&mut self) -> Result<(), MockError> {
        self.set(true)
    }
}

impl BenchLine {
    fn set(&mut self, level: bool) -> Result<(), MockError> {
        let mut state = self.bench.borrow_mut();
        if state.fail_lines {
            return Err(MockError);
        }
        if self.first {
            state.in1 = level;
            state.ops.push(Op::In1(level));
        } else {
            state.in2 = level;
            state.ops.push(Op::In2(level));
        }
        Ok(())
    }
}

// --- Enable line ---------------------------------------------------------

/// Output pin that remembers its level
#[derive(Clone, Default)]
pub struct Level(Rc<Cell<bool>>);

impl Level {
    pub fn is_high(&self) -> bool {
        self.0.get()
    }
}

impl digital::ErrorType for Level {
    type Error = Infallible;
}

impl digital::OutputPin for Level {
    fn set_low(&mut self) -> Result<(), Infallible> {
        self.0.set(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        self.0.set(true);
        Ok(())
    }
}

// --- Display -------------------------------------------------------------

#[derive(Default)]
struct Screen {
    pending: Vec<(Position, String)>,
    frames: Vec<Vec<(Position, String)>>,
}

/// Display that keeps every flushed frame
#[derive(Clone, Default)]
pub struct RecordingDisplay(Rc<RefCell<Screen>>);

impl RecordingDisplay {
    pub fn frames(&self) -> Vec<Vec<(Position, String)>> {
        self.0.borrow().frames.clone()
    }
}

impl Display for RecordingDisplay {
    type Error = Infallible;

    fn clear(&mut self) -> Result<(), Infallible> {
        self.0.borrow_mut().pending.clear();
        Ok(())
    }

    fn text(&mut self, at: Position, text: &str) -> Result<(), Infallible> {
        self.0.borrow_mut().pending.push((at, text.to_string()));
        Ok(())
    }

    fn flush(&mut self) -> Result<(), Infallible> {
        let mut screen = self.0.borrow_mut();
        let frame = core::mem::take(&mut screen.pending);
        screen.frames.push(frame);
        Ok(())
    }
}
