//! Telemetry Snapshot and Display Layout
//!
//! One [`Telemetry`] is produced per display period. The raw RPM of each wheel
//! is kept alongside a moving-median filtered value; the display shows the
//! filtered one.
//!
//! # Screen
//! ```text
//! x=0       x=64
//! L:0.50    R:0.50     operator inputs
//! L:   26   R:  -26    pulses in the last window
//! L:25.0    R:25.0     filtered RPM
//! ```

use core::fmt::Write;

use embassy_time::Instant;
use heapless::String;
use moving_median::MovingMedian;

use crate::motor::Direction;
use crate::system::hal::{Display, Position};

/// Number of RPM samples the display median is taken over
pub const MEDIAN_WINDOW_SIZE: usize = 5;

/// Longest line rendered; longer text is truncated
const LINE_CAPACITY: usize = 16;

/// Moving median over the last [`MEDIAN_WINDOW_SIZE`] speed estimates
pub struct SpeedFilter {
    filter: MovingMedian<f32, MEDIAN_WINDOW_SIZE>,
}

impl SpeedFilter {
    pub fn new() -> Self {
        Self {
            filter: MovingMedian::new(),
        }
    }

    /// Adds a value and returns the median over the window
    pub fn update(&mut self, speed: f32) -> f32 {
        self.filter.add_value(speed);
        self.filter.median()
    }
}

impl Default for SpeedFilter {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-wheel part of a [`Telemetry`] snapshot
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct WheelTelemetry {
    /// Operator input in 0.0..=1.0
    pub input: f32,
    /// Duty cycle programmed into the motor
    pub duty: f32,
    pub direction: Direction,
    /// Signed pulses counted over the last window
    pub pulses: i32,
    /// Speed over the last window, 0.0 if it could not be estimated
    pub rpm: f32,
    /// Median of the recent `rpm` values
    pub filtered_rpm: f32,
}

/// Snapshot taken once per display period
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Telemetry {
    /// Instant the pulse windows were closed
    pub at: Instant,
    pub left: WheelTelemetry,
    pub right: WheelTelemetry,
}

/// Where each value lands on the display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Layout {
    pub left_input: Position,
    pub right_input: Position,
    pub left_pulses: Position,
    pub right_pulses: Position,
    pub left_rpm: Position,
    pub right_rpm: Position,
}

impl Default for Layout {
    fn default() -> Self {
        Self::columns(0, 64, 11)
    }
}

impl Layout {
    /// Three rows, `row_height` pixels apart, left and right wheel side by side
    pub const fn columns(left_x: i32, right_x: i32, row_height: i32) -> Self {
        Self {
            left_input: Position::new(left_x, 0),
            right_input: Position::new(right_x, 0),
            left_pulses: Position::new(left_x, row_height),
            right_pulses: Position::new(right_x, row_height),
            left_rpm: Position::new(left_x, 2 * row_height),
            right_rpm: Position::new(right_x, 2 * row_height),
        }
    }
}

/// Draws one full frame of `telemetry`
pub fn render<D: Display>(telemetry: &Telemetry, layout: &Layout, display: &mut D) -> Result<(), D::Error> {
    display.clear()?;
    draw_wheel(display, 'L', &telemetry.left, layout.left_input, layout.left_pulses, layout.left_rpm)?;
    draw_wheel(display, 'R', &telemetry.right, layout.right_input, layout.right_pulses, layout.right_rpm)?;
    display.flush()
}

fn draw_wheel<D: Display>(
    display: &mut D,
    tag: char,
    wheel: &WheelTelemetry,
    input_at: Position,
    pulses_at: Position,
    rpm_at: Position,
) -> Result<(), D::Error> {
    let mut line: String<LINE_CAPACITY> = String::new();

    let _ = write!(line, "{}:{:.2}", tag, wheel.input);
    display.text(input_at, &line)?;

    line.clear();
    let _ = write!(line, "{}:{:5}", tag, wheel.pulses);
    display.text(pulses_at, &line)?;

    line.clear();
    let _ = write!(line, "{}:{:.1}", tag, wheel.filtered_rpm);
    display.text(rpm_at, &line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::RecordingDisplay;

    fn wheel(input: f32, pulses: i32, rpm: f32) -> WheelTelemetry {
        WheelTelemetry {
            input,
            duty: input,
            direction: Direction::Forward,
            pulses,
            rpm,
            filtered_rpm: rpm,
        }
    }

    #[test]
    fn median_rejects_single_spike() {
        let mut filter = SpeedFilter::new();
        for speed in [100.0, 102.0, 101.0, 100.0] {
            filter.update(speed);
        }
        assert_eq!(filter.update(900.0), 101.0);
    }

    #[test]
    fn default_layout_has_two_columns_three_rows() {
        let layout = Layout::default();
        assert_eq!(layout.left_input, Position::new(0, 0));
        assert_eq!(layout.right_input, Position::new(64, 0));
        assert_eq!(layout.left_pulses, Position::new(0, 11));
        assert_eq!(layout.right_rpm, Position::new(64, 22));
    }

    #[test]
    fn renders_one_frame() {
        let telemetry = Telemetry {
            at: Instant::from_millis(100),
            left: wheel(0.5, 26, 250.0),
            right: wheel(0.25, -13, 125.0),
        };
        let mut display = RecordingDisplay::default();

        render(&telemetry, &Layout::default(), &mut display).unwrap();

        let frames = display.frames();
        assert_eq!(frames.len(), 1);
        let texts: Vec<(Position, &str)> = frames[0].iter().map(|(at, text)| (*at, text.as_str())).collect();
        assert_eq!(
            texts,
            vec![
                (Position::new(0, 0), "L:0.50"),
                (Position::new(0, 11), "L:   26"),
                (Position::new(0, 22), "L:250.0"),
                (Position::new(64, 0), "R:0.25"),
                (Position::new(64, 11), "R:  -13"),
                (Position::new(64, 22), "R:125.0"),
            ]
        );
    }
}
