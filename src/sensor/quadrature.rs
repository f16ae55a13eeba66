//! Quadrature Encoder Decoding
//!
//! Turns edges on the two encoder channels (A, B) into a signed pulse count.
//!
//! # Direction
//! Clockwise rotation (as wired) means channel A leads channel B:
//! ```text
//! A  _|‾‾‾|___|‾‾‾|__
//! B  ___|‾‾‾|___|‾‾‾|
//!    00 10 11 01 00     (A B)
//! ```
//! Clockwise increments the count, counter-clockwise decrements it.
//!
//! # Encoding modes
//! - X4: every valid transition on either channel counts, 4 counts per cycle
//! - X2: only transitions on channel A count, 2 counts per cycle; direction
//!   comes from the level of B
//!
//! # Read faults
//! A pin that fails to report its level or its next edge does not stop
//! tracking. The decoder keeps the last good channel state, the fault is
//! counted in [`QuadratureDecoder::read_faults`], and the next good edge is
//! decoded against that state.
//!
//! # Concurrency
//! The count lives in an atomic so edge decoding (an interrupt handler or a
//! background future) and window sampling never need a lock. Only one context
//! may call [`QuadratureDecoder::on_edge`]; any number may read or
//! [`take`](QuadratureDecoder::take) the count.

use core::sync::atomic::{AtomicI32, AtomicU32, AtomicU8, Ordering};

use embassy_futures::select::{select, Either};
use embassy_futures::yield_now;
use embedded_hal::digital::{Error as _, InputPin};
use embedded_hal_async::digital::Wait;

/// Counts per full quadrature cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EncodingMode {
    /// Both edges of channel A
    X2,
    /// Both edges of both channels
    X4,
}

impl EncodingMode {
    /// Counted transitions per physical encoder cycle
    pub const fn multiplier(self) -> u32 {
        match self {
            EncodingMode::X2 => 2,
            EncodingMode::X4 => 4,
        }
    }
}

/// Count change for a `(previous, current)` state pair, indexed by
/// `previous << 2 | current` with state = `A << 1 | B`.
/// Pairs where both channels changed are invalid and map to 0 here.
const X4_STEP: [i8; 16] = [
    0, -1, 1, 0, //
    1, 0, 0, -1, //
    -1, 0, 0, 1, //
    0, 1, -1, 0, //
];

const fn state(a: bool, b: bool) -> u8 {
    ((a as u8) << 1) | b as u8
}

/// Signed pulse counter fed by channel edges
pub struct QuadratureDecoder {
    mode: EncodingMode,
    count: AtomicI32,
    state: AtomicU8,
    invalid: AtomicU32,
    read_faults: AtomicU32,
}

impl QuadratureDecoder {
    /// Creates a decoder with a zero count and both channels assumed low
    pub const fn new(mode: EncodingMode) -> Self {
        Self {
            mode,
            count: AtomicI32::new(0),
            state: AtomicU8::new(0),
            invalid: AtomicU32::new(0),
            read_faults: AtomicU32::new(0),
        }
    }

    pub fn mode(&self) -> EncodingMode {
        self.mode
    }

    /// Records the current channel levels without counting
    ///
    /// Call once before the first edge so the first transition decodes
    /// against the real starting state.
    pub fn prime(&self, a: bool, b: bool) {
        self.state.store(state(a, b), Ordering::Relaxed);
    }

    /// Decodes one edge given the channel levels observed right after it
    pub fn on_edge(&self, a: bool, b: bool) {
        let current = state(a, b);
        let previous = self.state.swap(current, Ordering::Relaxed);
        let changed = previous ^ current;

        if changed == 0 {
            return;
        }
        if changed == 0b11 {
            // Both channels moved between two observed edges, so an edge was
            // missed and the direction is unknown.
            self.invalid.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let step = match self.mode {
            EncodingMode::X4 => X4_STEP[usize::from((previous << 2) | current)] as i32,
            EncodingMode::X2 => {
                if changed & 0b10 == 0 {
                    return;
                }
                if a != b {
                    1
                } else {
                    -1
                }
            }
        };
        self.count.fetch_add(step, Ordering::AcqRel);
    }

    /// Current accumulated count
    pub fn pulses(&self) -> i32 {
        self.count.load(Ordering::Acquire)
    }

    /// Zeroes the count, configuration is untouched
    pub fn reset(&self) {
        self.count.store(0, Ordering::Release);
    }

    /// Returns the count and zeroes it in one atomic step
    ///
    /// Edges decoded concurrently land either in the returned value or in the
    /// next one, never in neither.
    pub fn take(&self) -> i32 {
        self.count.swap(0, Ordering::AcqRel)
    }

    /// Transitions dropped because both channels changed at once
    pub fn invalid_transitions(&self) -> u32 {
        self.invalid.load(Ordering::Relaxed)
    }

    /// Pin reads that failed while tracking edges
    pub fn read_faults(&self) -> u32 {
        self.read_faults.load(Ordering::Relaxed)
    }

    fn record_read_fault(&self) -> u32 {
        self.read_faults.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// The two encoder inputs of one wheel
pub struct EncoderChannel<A, B> {
    a: A,
    b: B,
}

impl<A, B> EncoderChannel<A, B>
where
    A: InputPin,
    B: InputPin<Error = A::Error>,
{
    pub fn new(a: A, b: B) -> Self {
        Self { a, b }
    }

    /// Current levels of (A, B)
    pub fn levels(&mut self) -> Result<(bool, bool), A::Error> {
        Ok((self.a.is_high()?, self.b.is_high()?))
    }
}

/// Feeds `decoder` from the edges of `channel`, forever
///
/// This is the background half of the decoder: it only ever suspends while
/// waiting for the next edge, and the decoding itself never suspends. A pin
/// error is logged and counted, then tracking carries on from the last good
/// state. Drop the future to stop tracking.
pub async fn track_edges<A, B>(decoder: &QuadratureDecoder, channel: &mut EncoderChannel<A, B>)
where
    A: InputPin + Wait,
    B: InputPin<Error = A::Error> + Wait,
{
    loop {
        match channel.levels() {
            Ok((a, b)) => {
                decoder.prime(a, b);
                debug!("Encoder tracking started, A={} B={}", a, b);
                break;
            }
            Err(e) => {
                let faults = decoder.record_read_fault();
                warn!("Encoder levels unreadable ({:?}), {} faults so far", e.kind(), faults);
                yield_now().await;
            }
        }
    }

    loop {
        let edge = match select(channel.a.wait_for_any_edge(), channel.b.wait_for_any_edge()).await {
            Either::First(result) | Either::Second(result) => result,
        };
        match edge.and_then(|()| channel.levels()) {
            Ok((a, b)) => decoder.on_edge(a, b),
            Err(e) => {
                let faults = decoder.record_read_fault();
                warn!("Encoder read failed ({:?}), {} faults so far", e.kind(), faults);
                yield_now().await;
            }
        }
    }
}
