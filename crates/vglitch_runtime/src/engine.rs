use crate::controller::{ControllerState, GlitchController, Registers, Transition};
use crate::error::RuntimeError;
use crate::trigger::TriggerSource;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use vglitch_hal::config::PinMap;
use vglitch_hal::traits::IoBackend;
use vglitch_regs::layout::mask;
use vglitch_regs::{Direction, FieldId, RegisterFile, RegisterValues};

pub const DEFAULT_CLOCK_HZ: u64 = 100_000_000;

/// Pacing slice for [`GlitchEngine::run_realtime`].
const SLICE: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockConfig {
    pub hz: u64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            hz: DEFAULT_CLOCK_HZ,
        }
    }
}

impl ClockConfig {
    pub fn validate(self) -> Result<Self, RuntimeError> {
        if self.hz == 0 {
            return Err(RuntimeError::ZeroClock);
        }
        Ok(self)
    }

    pub fn ticks_per_slice(self) -> u64 {
        (self.hz / 1000).max(1)
    }

    pub fn ticks_to_duration(self, ticks: u64) -> Duration {
        Duration::from_nanos(ticks.saturating_mul(1_000_000_000) / self.hz.max(1))
    }
}

/// Copies controller status into whichever status registers the layout
/// declares, only when something changed.
pub struct StatusPublisher {
    file: Arc<RegisterFile>,
    indicator: Option<(FieldId, u64)>,
    glitch_output: Option<(FieldId, u64)>,
    state: Option<(FieldId, u64)>,
    glitch_count: Option<(FieldId, u64)>,
    last: Option<Registers>,
}

impl StatusPublisher {
    pub fn new(file: Arc<RegisterFile>) -> Self {
        let out_field = |name: &str| {
            file.layout()
                .field(name)
                .filter(|(id, _)| id.direction == Direction::Out)
                .map(|(id, spec)| (id, mask(spec.bits)))
        };
        Self {
            indicator: out_field("indicator"),
            glitch_output: out_field("glitch_output"),
            state: out_field("state"),
            glitch_count: out_field("glitch_count"),
            last: None,
            file,
        }
    }

    pub fn publish(&mut self, regs: &Registers) {
        let changed = self.last.is_none_or(|last| {
            last.outputs != regs.outputs
                || last.state != regs.state
                || last.glitch_count != regs.glitch_count
        });
        if !changed {
            return;
        }
        let mut values = RegisterValues::zeroed(self.file.layout(), Direction::Out);
        let fields = [
            (self.indicator, u64::from(regs.outputs.indicator.bits())),
            (self.glitch_output, u64::from(regs.outputs.glitch_output)),
            (self.state, regs.state.code()),
            (self.glitch_count, u64::from(regs.glitch_count)),
        ];
        for (field, value) in fields {
            if let Some((id, width_mask)) = field {
                values.set(id, value & width_mask);
            }
        }
        self.file.publish_outbound(values);
        self.last = Some(*regs);
    }
}

/// Runs the controller one tick at a time: sample inputs, step, drive pins.
pub struct GlitchEngine<H: IoBackend> {
    pub hal: H,
    pub controller: GlitchController,
    pub tick_count: u64,
    source: Box<dyn TriggerSource>,
    pins: PinMap,
    clock: ClockConfig,
    status: Option<StatusPublisher>,
}

impl<H: IoBackend> GlitchEngine<H> {
    pub fn new(
        hal: H,
        controller: GlitchController,
        source: Box<dyn TriggerSource>,
        pins: PinMap,
        clock: ClockConfig,
    ) -> Result<Self, RuntimeError> {
        Ok(Self {
            hal,
            controller,
            tick_count: 0,
            source,
            pins,
            clock: clock.validate()?,
            status: None,
        })
    }

    /// Mirror controller status into the outbound registers of `file`.
    pub fn with_status(mut self, file: Arc<RegisterFile>) -> Self {
        let mut status = StatusPublisher::new(file);
        status.publish(&self.controller.registers());
        self.status = Some(status);
        self
    }

    pub fn clock(&self) -> ClockConfig {
        self.clock
    }

    pub fn state(&self) -> ControllerState {
        self.controller.state()
    }

    pub fn step(&mut self) -> Option<Transition> {
        if let Err(e) = self.hal.refresh_inputs() {
            log::warn!("refresh_inputs failed at tick {}: {e}", self.tick_count);
        }
        let sample = self.source.sample(&self.hal);
        let transition = self.controller.tick(sample);
        if let Some(t) = transition {
            log::trace!("tick {}: {:?} -> {:?}", self.tick_count, t.from, t.to);
        }

        let outputs = self.controller.outputs();
        let code = outputs.indicator.bits();
        self.hal
            .write_digital_output(&self.pins.glitch_output, outputs.glitch_output);
        self.hal
            .write_digital_output(&self.pins.indicator[0], code & 0b10 != 0);
        self.hal
            .write_digital_output(&self.pins.indicator[1], code & 0b01 != 0);
        if let Err(e) = self.hal.flush_outputs() {
            log::warn!("flush_outputs failed at tick {}: {e}", self.tick_count);
        }

        if let Some(status) = self.status.as_mut() {
            status.publish(&self.controller.registers());
        }
        self.tick_count += 1;
        transition
    }

    pub fn run_ticks(&mut self, count: u64) {
        for _ in 0..count {
            self.step();
        }
    }

    /// Step until `done` holds after a tick, or `max` ticks have run.
    /// Returns the number of ticks taken.
    pub fn run_until<F>(&mut self, max: u64, mut done: F) -> Option<u64>
    where
        F: FnMut(&GlitchController) -> bool,
    {
        for n in 1..=max {
            self.step();
            if done(&self.controller) {
                return Some(n);
            }
        }
        None
    }

    /// Run against the wall clock in 1 ms slices until `stop` is set or
    /// `max_ticks` (0 = unbounded) have run. Returns ticks executed.
    pub fn run_realtime(&mut self, stop: &AtomicBool, max_ticks: u64) -> u64 {
        let per_slice = self.clock.ticks_per_slice();
        let start = self.tick_count;
        log::info!(
            "Engine running at {} Hz ({per_slice} ticks per slice)",
            self.clock.hz
        );
        while !stop.load(Ordering::Relaxed) {
            let t0 = Instant::now();
            let remaining = match max_ticks {
                0 => per_slice,
                max => per_slice.min(max - (self.tick_count - start)),
            };
            self.run_ticks(remaining);
            if max_ticks != 0 && self.tick_count - start >= max_ticks {
                break;
            }
            let elapsed = t0.elapsed();
            if elapsed < SLICE {
                std::thread::sleep(SLICE - elapsed);
            }
        }
        let ran = self.tick_count - start;
        log::info!("Engine stopped after {ran} ticks");
        ran
    }
}
