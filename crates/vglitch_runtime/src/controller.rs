//! The glitch state machine.
//!
//! ```text
//!   Idle --trigger--> Glitching --counter >= delay--> Holdoff --hold elapsed--> Idle
//! ```
//!
//! Every tick is two-phase: the next register set is computed from a frozen
//! copy of the current one and the sample taken at the start of the tick,
//! then committed in one assignment. Nothing computed during a tick is
//! visible to that same tick.

use crate::counter::Counter;
use crate::error::RuntimeError;
use crate::trigger::TriggerSample;

/// Debounce time after every glitch, in ticks.
pub const DEFAULT_HOLD_TICKS: u32 = 10_000_000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ControllerState {
    #[default]
    Idle,
    Glitching,
    Holdoff,
}

impl ControllerState {
    /// Encoding used in the `state` status register.
    pub fn code(self) -> u64 {
        match self {
            ControllerState::Idle => 0,
            ControllerState::Glitching => 1,
            ControllerState::Holdoff => 2,
        }
    }
}

/// Two-bit status code. Glitching has no code of its own and shows `Off`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Indicator {
    #[default]
    Off,
    Holdoff,
    Armed,
}

impl Indicator {
    pub fn bits(self) -> u8 {
        match self {
            Indicator::Off => 0b00,
            Indicator::Holdoff => 0b10,
            Indicator::Armed => 0b11,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outputs {
    /// `true` powers the target, `false` cuts it.
    pub glitch_output: bool,
    pub indicator: Indicator,
}

impl Default for Outputs {
    fn default() -> Self {
        Self {
            glitch_output: true,
            indicator: Indicator::Off,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerConfig {
    pub hold_ticks: u32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            hold_ticks: DEFAULT_HOLD_TICKS,
        }
    }
}

impl ControllerConfig {
    pub fn validate(self) -> Result<Self, RuntimeError> {
        if self.hold_ticks == 0 {
            return Err(RuntimeError::ZeroHoldTicks);
        }
        Ok(self)
    }
}

/// Everything the controller updates on a tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Registers {
    pub state: ControllerState,
    pub counter: Counter,
    pub outputs: Outputs,
    /// Completed glitches, wrapping.
    pub glitch_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: ControllerState,
    pub to: ControllerState,
}

#[derive(Debug, Clone)]
pub struct GlitchController {
    config: ControllerConfig,
    regs: Registers,
}

impl GlitchController {
    pub fn new(config: ControllerConfig) -> Result<Self, RuntimeError> {
        Ok(Self {
            config: config.validate()?,
            regs: Registers::default(),
        })
    }

    pub fn config(&self) -> ControllerConfig {
        self.config
    }

    pub fn registers(&self) -> Registers {
        self.regs
    }

    pub fn state(&self) -> ControllerState {
        self.regs.state
    }

    pub fn counter(&self) -> u32 {
        self.regs.counter.value()
    }

    pub fn outputs(&self) -> Outputs {
        self.regs.outputs
    }

    pub fn glitch_count(&self) -> u32 {
        self.regs.glitch_count
    }

    /// Next register set for `sample`, computed from the current one.
    pub fn next(&self, sample: TriggerSample) -> Registers {
        let cur = self.regs;
        let mut next = Registers {
            outputs: Outputs::default(),
            ..cur
        };
        match cur.state {
            ControllerState::Idle => {
                if sample.trigger {
                    next.counter = Counter::ZERO;
                    next.state = ControllerState::Glitching;
                } else {
                    next.outputs.indicator = Indicator::Armed;
                }
            }
            ControllerState::Glitching => {
                // read every tick: a delay rewritten mid-glitch applies right away
                if cur.counter.reached(sample.threshold) {
                    next.counter = Counter::ZERO;
                    next.state = ControllerState::Holdoff;
                    next.glitch_count = cur.glitch_count.wrapping_add(1);
                } else {
                    next.outputs.glitch_output = false;
                    next.counter = cur.counter.incremented();
                }
            }
            ControllerState::Holdoff => {
                if cur.counter.reached(u64::from(self.config.hold_ticks - 1)) {
                    next.counter = Counter::ZERO;
                    next.state = ControllerState::Idle;
                } else {
                    next.outputs.indicator = Indicator::Holdoff;
                    next.counter = cur.counter.incremented();
                }
            }
        }
        next
    }

    /// Advance one tick. Returns the state change, if any.
    pub fn tick(&mut self, sample: TriggerSample) -> Option<Transition> {
        let next = self.next(sample);
        let from = self.regs.state;
        self.regs = next;
        (from != next.state).then_some(Transition {
            from,
            to: next.state,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARM: TriggerSample = TriggerSample {
        trigger: true,
        threshold: 0,
    };

    fn with_delay(delay: u64) -> TriggerSample {
        TriggerSample {
            trigger: false,
            threshold: delay,
        }
    }

    fn controller(hold_ticks: u32) -> GlitchController {
        GlitchController::new(ControllerConfig { hold_ticks }).unwrap()
    }

    /// Ticks spent in `state` once it is entered, sampling `sample` each tick.
    fn dwell(c: &mut GlitchController, state: ControllerState, sample: TriggerSample) -> u64 {
        let mut ticks = 1;
        while c.tick(sample).is_none() {
            ticks += 1;
        }
        assert_ne!(c.state(), state);
        ticks
    }

    #[test]
    fn rejects_zero_hold() {
        assert!(matches!(
            GlitchController::new(ControllerConfig { hold_ticks: 0 }),
            Err(RuntimeError::ZeroHoldTicks)
        ));
    }

    #[test]
    fn idle_shows_armed_until_triggered() {
        let mut c = controller(4);
        assert_eq!(c.tick(with_delay(3)), None);
        assert_eq!(c.outputs().indicator, Indicator::Armed);
        assert!(c.outputs().glitch_output);

        let t = c.tick(ARM).unwrap();
        assert_eq!((t.from, t.to), (ControllerState::Idle, ControllerState::Glitching));
        // the transition tick assigns nothing and falls back to the defaults
        assert_eq!(c.outputs(), Outputs::default());
    }

    #[test]
    fn glitch_lasts_delay_plus_one_ticks() {
        for delay in [0u64, 1, 5, 100] {
            let mut c = controller(3);
            c.tick(ARM);
            assert_eq!(dwell(&mut c, ControllerState::Glitching, with_delay(delay)), delay + 1);
            assert_eq!(c.state(), ControllerState::Holdoff);
        }
    }

    #[test]
    fn power_is_cut_while_counting() {
        let mut c = controller(3);
        c.tick(ARM);
        let mut cut = 0;
        while c.state() == ControllerState::Glitching {
            c.tick(with_delay(4));
            if !c.outputs().glitch_output {
                cut += 1;
                assert_eq!(c.outputs().indicator, Indicator::Off);
            }
        }
        assert_eq!(cut, 4);
        assert!(c.outputs().glitch_output);
        assert_eq!(c.glitch_count(), 1);
    }

    #[test]
    fn holdoff_lasts_hold_ticks() {
        let mut c = controller(7);
        c.tick(ARM);
        c.tick(with_delay(0));
        assert_eq!(c.state(), ControllerState::Holdoff);
        assert_eq!(dwell(&mut c, ControllerState::Holdoff, ARM), 7);
        assert_eq!(c.state(), ControllerState::Idle);
    }

    #[test]
    fn holdoff_ignores_trigger_and_shows_code() {
        let mut c = controller(3);
        c.tick(ARM);
        c.tick(ARM);
        assert_eq!(c.state(), ControllerState::Holdoff);
        c.tick(ARM);
        assert_eq!(c.state(), ControllerState::Holdoff);
        assert_eq!(c.outputs().indicator.bits(), 0b10);
    }

    #[test]
    fn delay_rewrite_mid_glitch_applies_next_tick() {
        let mut c = controller(3);
        c.tick(ARM);
        for _ in 0..10 {
            c.tick(with_delay(1000));
        }
        assert_eq!(c.counter(), 10);
        // shorter than what has already elapsed: leave on this very tick
        assert!(c.tick(with_delay(4)).is_some());
        assert_eq!(c.state(), ControllerState::Holdoff);

        let mut c = controller(3);
        c.tick(ARM);
        for _ in 0..10 {
            c.tick(with_delay(1000));
        }
        // lengthened: the remaining duration follows the new value
        assert_eq!(dwell(&mut c, ControllerState::Glitching, with_delay(20)), 11);
    }

    #[test]
    fn default_hold_is_ten_million_ticks() {
        let mut c = GlitchController::new(ControllerConfig::default()).unwrap();
        c.tick(ARM);
        c.tick(with_delay(0));
        assert_eq!(dwell(&mut c, ControllerState::Holdoff, with_delay(0)), 10_000_000);
    }

    #[test]
    fn state_codes() {
        assert_eq!(ControllerState::Idle.code(), 0);
        assert_eq!(ControllerState::Glitching.code(), 1);
        assert_eq!(ControllerState::Holdoff.code(), 2);
        assert_eq!(Indicator::Armed.bits(), 0b11);
        assert_eq!(Indicator::Off.bits(), 0b00);
    }
}
