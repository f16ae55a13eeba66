//! Wheel and operator input sensing
//!
//! - [`quadrature`]: edge decoding into a signed pulse count
//! - [`pulse_window`]: read-and-reset of the count over a sampling window
//! - [`rate`]: pulse window to RPM
//! - [`analog`]: background potentiometer sampling
pub mod analog;
pub mod pulse_window;
pub mod quadrature;
pub mod rate;
