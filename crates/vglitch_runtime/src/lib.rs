//! Glitch controller: `Idle -> Glitching -> Holdoff -> Idle`, one transition
//! per tick, plus the engine that feeds it samples and drives its pins.

pub mod controller;
pub mod counter;
pub mod engine;
pub mod error;
pub mod trigger;

pub use controller::{ControllerConfig, ControllerState, GlitchController, Indicator};
pub use engine::{ClockConfig, GlitchEngine};
pub use error::RuntimeError;
pub use trigger::{InputBankTrigger, RegisterTrigger, TriggerSample, TriggerSource};
