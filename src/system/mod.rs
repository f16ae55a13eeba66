//! Configuration, error taxonomy and hardware capability seams
pub mod config;
pub mod error;
pub mod hal;
