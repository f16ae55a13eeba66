//! Pulse Sampling Windows
//!
//! Reads the pulse count accumulated over a window and restarts the count for
//! the next one. The read and the reset are a single atomic swap, so a pulse
//! decoded while the window closes is counted in exactly one window.

use embassy_time::Instant;

use crate::sensor::quadrature::QuadratureDecoder;
use crate::system::error::ConfigError;

/// Pulses counted over one closed window
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SamplingWindow {
    /// Signed pulse count, positive for clockwise
    pub pulses: i32,
    /// Window length in seconds, always positive
    pub seconds: f32,
}

/// Read-and-reset view over a [`QuadratureDecoder`]
pub struct PulseWindowSampler<'a> {
    decoder: &'a QuadratureDecoder,
    opened_at: Option<Instant>,
}

impl<'a> PulseWindowSampler<'a> {
    pub fn new(decoder: &'a QuadratureDecoder) -> Self {
        Self {
            decoder,
            opened_at: None,
        }
    }

    pub fn decoder(&self) -> &'a QuadratureDecoder {
        self.decoder
    }

    /// Closes a window of the given length and starts the next one
    ///
    /// A non-positive or non-finite length is rejected before the count is
    /// touched, so no pulses are lost. Calling more often than the intended
    /// window only produces smaller, noisier counts.
    pub fn sample_and_reset(&self, window_seconds: f32) -> Result<SamplingWindow, ConfigError> {
        if !(window_seconds.is_finite() && window_seconds > 0.0) {
            return Err(ConfigError::Window);
        }
        Ok(SamplingWindow {
            pulses: self.decoder.take(),
            seconds: window_seconds,
        })
    }

    /// Starts a window at `now`, discarding anything counted before
    pub fn open(&mut self, now: Instant) {
        self.decoder.take();
        self.opened_at = Some(now);
    }

    /// Closes the window opened last at `now` and opens the next one
    ///
    /// The window length is the measured time since the last boundary, so a
    /// late caller gets a longer window rather than an inflated rate.
    /// Returns `Ok(None)` if no window was open yet; that call opens one.
    pub fn close(&mut self, now: Instant) -> Result<Option<SamplingWindow>, ConfigError> {
        let Some(opened_at) = self.opened_at else {
            self.open(now);
            return Ok(None);
        };
        let elapsed = now.checked_duration_since(opened_at).ok_or(ConfigError::Window)?;
        let window = self.sample_and_reset(elapsed.as_micros() as f32 / 1_000_000.0)?;
        self.opened_at = Some(now);
        Ok(Some(window))
    }
}
