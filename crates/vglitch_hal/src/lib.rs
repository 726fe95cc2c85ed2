//! Pin-level I/O for the glitch controller.
//!
//! The controller only ever talks to named digital pins: one trigger input,
//! one glitch output, two indicator outputs and an optional bank of
//! threshold switches. Board wiring lives behind [`traits::IoBackend`].

pub mod config;
pub mod sim;
pub mod traits;
