//! Background Analog Sampling
//!
//! Samples a potentiometer at a fixed rate, independent of the control loop,
//! and keeps the most recent reading available for non-blocking reads.
//!
//! # Concurrency
//! This is the one place where two activities touch the same data:
//! - the sampling future (producer) stores a new sample on every tick
//! - the control loop (consumer) reads the latest sample whenever it likes
//!
//! Each value is an `f32` bit pattern in its own `AtomicU32`. A sample is
//! never torn within one value, but the normalized and volts values may come
//! from adjacent ticks if a read straddles a store. Readers may see a value up
//! to one sampling period (plus one loop iteration) old.
//!
//! # Read faults
//! A failed or non-finite read keeps the last-known-good sample and is
//! counted; sampling continues on the next tick.

use core::sync::atomic::{AtomicU32, Ordering};

use embassy_time::{Duration, Ticker};

use crate::system::error::ReadFault;
use crate::system::hal::{AnalogInput, Cadence};

/// Frequency used when the requested one cannot produce a period
pub const FALLBACK_FREQUENCY_HZ: f32 = 1.0;

/// One analog reading
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AnalogSample {
    /// Reading normalized to 0.0..=1.0 of full scale
    pub normalized: f32,
    /// Reading scaled by the reference voltage
    pub volts: f32,
}

/// Single-writer, multi-reader f32 cell
struct SampleCell(AtomicU32);

impl SampleCell {
    const fn zero() -> Self {
        // 0.0f32 is the all-zero bit pattern
        Self(AtomicU32::new(0))
    }

    fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Acquire))
    }

    fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Release);
    }
}

/// Periodically sampled analog input
pub struct AnalogSampler {
    vref: f32,
    frequency_hz: f32,
    period: Duration,
    normalized: SampleCell,
    volts: SampleCell,
    samples: AtomicU32,
    faults: AtomicU32,
}

impl AnalogSampler {
    /// Creates a sampler for a `vref` volt input sampled at `frequency_hz`
    ///
    /// A frequency that is not a positive finite number is replaced by
    /// [`FALLBACK_FREQUENCY_HZ`].
    pub fn new(vref: f32, frequency_hz: f32) -> Self {
        let frequency_hz = if frequency_hz.is_finite() && frequency_hz > 0.0 {
            frequency_hz
        } else {
            warn!(
                "Sampling frequency {} Hz is invalid, using {} Hz",
                frequency_hz, FALLBACK_FREQUENCY_HZ
            );
            FALLBACK_FREQUENCY_HZ
        };
        // Round to the tick and never go below one microsecond
        let period_us = libm::roundf(1_000_000.0 / frequency_hz).max(1.0) as u64;

        Self {
            vref,
            frequency_hz,
            period: Duration::from_micros(period_us),
            normalized: SampleCell::zero(),
            volts: SampleCell::zero(),
            samples: AtomicU32::new(0),
            faults: AtomicU32::new(0),
        }
    }

    /// Effective sampling frequency after validation
    pub fn frequency_hz(&self) -> f32 {
        self.frequency_hz
    }

    /// Sampling period, `1 / frequency_hz`
    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn vref(&self) -> f32 {
        self.vref
    }

    /// Takes one reading from `input` and stores it
    ///
    /// Never suspends. On failure the stored sample is left untouched.
    pub fn sample<I: AnalogInput>(&self, input: &mut I) -> Result<AnalogSample, ReadFault> {
        let reading = match input.read_normalized() {
            Ok(reading) if reading.is_finite() => reading,
            Ok(_) => return Err(self.fault(ReadFault::NotFinite)),
            Err(_) => return Err(self.fault(ReadFault::Backend)),
        };

        let normalized = reading.clamp(0.0, 1.0);
        let volts = normalized * self.vref;
        self.normalized.store(normalized);
        self.volts.store(volts);
        self.samples.fetch_add(1, Ordering::Relaxed);

        Ok(AnalogSample { normalized, volts })
    }

    fn fault(&self, fault: ReadFault) -> ReadFault {
        self.faults.fetch_add(1, Ordering::Relaxed);
        fault
    }

    /// Most recent normalized reading, 0.0 before the first sample
    pub fn latest_normalized(&self) -> f32 {
        self.normalized.load()
    }

    /// Most recent reading in volts, 0.0 before the first sample
    pub fn latest_volts(&self) -> f32 {
        self.volts.load()
    }

    pub fn latest(&self) -> AnalogSample {
        AnalogSample {
            normalized: self.latest_normalized(),
            volts: self.latest_volts(),
        }
    }

    /// Successful samples stored so far
    pub fn samples_taken(&self) -> u32 {
        self.samples.load(Ordering::Relaxed)
    }

    /// Reads that failed and were skipped
    pub fn read_faults(&self) -> u32 {
        self.faults.load(Ordering::Relaxed)
    }

    /// Background sampling body on the sampler's own timer, forever
    ///
    /// Samples once immediately, then once every [`period`](Self::period).
    pub async fn run_every<I: AnalogInput>(&self, input: I) {
        self.run(input, Ticker::every(self.period)).await
    }

    /// Background sampling body: one sample per tick of `cadence`, forever
    ///
    /// Use [`run_every`](Self::run_every) unless the ticks come from
    /// somewhere else, such as a test clock.
    pub async fn run<I: AnalogInput, C: Cadence>(&self, mut input: I, mut cadence: C) {
        info!("Analog sampling started at {} Hz", self.frequency_hz);
        loop {
            if let Err(fault) = self.sample(&mut input) {
                warn!("Analog read failed ({:?}), keeping last sample", fault);
            }
            cadence.next_tick().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{block_on, ScriptedAnalog, ScriptedCadence};
    use embassy_futures::select::{select, Either};
    use embassy_futures::yield_now;
    use embassy_time::{Instant, Timer};

    #[test]
    fn non_positive_frequency_falls_back_to_one_hertz() {
        for fs in [0.0, -10.0, f32::NAN, f32::INFINITY] {
            let sampler = AnalogSampler::new(3.3, fs);
            assert_eq!(sampler.frequency_hz(), 1.0);
            assert_eq!(sampler.period(), Duration::from_secs(1));
        }
    }

    #[test]
    fn period_follows_frequency() {
        let sampler = AnalogSampler::new(3.3, 10.0);
        assert_eq!(sampler.period(), Duration::from_millis(100));

        let sampler = AnalogSampler::new(3.3, 3.0);
        assert_eq!(sampler.period(), Duration::from_micros(333_333));
    }

    #[test]
    fn latest_is_zero_before_first_tick() {
        let sampler = AnalogSampler::new(3.3, 10.0);
        assert_eq!(sampler.latest_normalized(), 0.0);
        assert_eq!(sampler.latest_volts(), 0.0);
        assert_eq!(sampler.samples_taken(), 0);
    }

    #[test]
    fn sample_stores_normalized_and_volts() {
        let sampler = AnalogSampler::new(3.3, 10.0);
        let mut input = ScriptedAnalog::new([Ok(0.5)]);

        let sample = sampler.sample(&mut input).unwrap();
        assert_eq!(sample.normalized, 0.5);
        assert!((sample.volts - 1.65).abs() < 1e-6);
        assert_eq!(sampler.latest(), sample);

        // Reads are non-destructive
        assert_eq!(sampler.latest_normalized(), 0.5);
        assert_eq!(sampler.latest_normalized(), 0.5);
    }

    #[test]
    fn failed_read_keeps_last_good_sample() {
        let sampler = AnalogSampler::new(3.3, 10.0);
        let mut input = ScriptedAnalog::new([Ok(0.25), Err(()), Ok(f32::NAN)]);

        sampler.sample(&mut input).unwrap();
        assert_eq!(sampler.sample(&mut input), Err(ReadFault::Backend));
        assert_eq!(sampler.sample(&mut input), Err(ReadFault::NotFinite));

        assert_eq!(sampler.latest_normalized(), 0.25);
        assert_eq!(sampler.samples_taken(), 1);
        assert_eq!(sampler.read_faults(), 2);
    }

    #[test]
    fn out_of_range_reading_is_clamped() {
        let sampler = AnalogSampler::new(2.0, 10.0);
        let mut input = ScriptedAnalog::new([Ok(1.2), Ok(-0.1)]);

        sampler.sample(&mut input).unwrap();
        assert_eq!(sampler.latest(), AnalogSample { normalized: 1.0, volts: 2.0 });
        sampler.sample(&mut input).unwrap();
        assert_eq!(sampler.latest(), AnalogSample { normalized: 0.0, volts: 0.0 });
    }

    #[test]
    fn run_samples_once_per_tick() {
        let sampler = AnalogSampler::new(3.3, 10.0);
        let input = ScriptedAnalog::new([Ok(0.1), Ok(0.2), Err(()), Ok(0.4)]);
        let cadence = ScriptedCadence::every_millis(100, 3);

        let outcome = block_on(select(sampler.run(input, cadence), async {
            for _ in 0..50 {
                yield_now().await;
            }
        }));

        assert!(matches!(outcome, Either::Second(())));
        // One sample up front plus one per tick
        assert_eq!(sampler.samples_taken(), 3);
        assert_eq!(sampler.read_faults(), 1);
        assert_eq!(sampler.latest_normalized(), 0.4);
    }

    #[test]
    fn run_every_ticks_at_the_sampling_period() {
        let sampler = AnalogSampler::new(3.3, 100.0);
        let input = ScriptedAnalog::new([Ok(0.3); 64]);

        let started = Instant::now();
        let outcome = block_on(select(sampler.run_every(input), Timer::after_millis(45)));
        let elapsed_ms = started.elapsed().as_millis();

        assert!(matches!(outcome, Either::Second(())));
        let taken = u64::from(sampler.samples_taken());
        // One up front, then at most one per elapsed 10 ms period
        assert!(taken >= 2, "only {} samples in {} ms", taken, elapsed_ms);
        assert!(taken <= elapsed_ms / 10 + 1, "{} samples in {} ms", taken, elapsed_ms);
        assert_eq!(sampler.latest_normalized(), 0.3);
    }
}
