//! Where the controller gets its arm signal and glitch length from.
//!
//! Both providers hand the state machine the same two values, so the
//! controller never knows whether the host or a bank of switches is driving
//! it.

use crate::counter::COUNTER_BITS;
use crate::error::RuntimeError;
use vglitch_hal::traits::IoBackend;
use vglitch_regs::snapshot::SnapshotReader;
use vglitch_regs::{Direction, FieldId, RegisterFile, RegisterValues};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TriggerSample {
    /// Logical trigger, already corrected for the input's polarity.
    pub trigger: bool,
    /// Glitch length in ticks.
    pub threshold: u64,
}

pub trait TriggerSource: Send {
    /// Called exactly once at the start of every tick.
    fn sample(&mut self, io: &dyn IoBackend) -> TriggerSample;
}

/// Trigger and threshold taken from two inbound register fields.
pub struct RegisterTrigger {
    reader: SnapshotReader<RegisterValues>,
    trigger: FieldId,
    threshold: FieldId,
    active_low: bool,
}

impl RegisterTrigger {
    pub fn new(
        file: &RegisterFile,
        trigger_field: &str,
        threshold_field: &str,
        active_low: bool,
    ) -> Result<Self, RuntimeError> {
        let layout = file.layout();
        let lookup = |name: &str| -> Result<(FieldId, u32), RuntimeError> {
            let (id, spec) = layout
                .field(name)
                .ok_or_else(|| RuntimeError::UnknownField(name.to_string()))?;
            if id.direction != Direction::In {
                return Err(RuntimeError::NotInbound(name.to_string()));
            }
            Ok((id, spec.bits))
        };
        let (trigger, _) = lookup(trigger_field)?;
        let (threshold, bits) = lookup(threshold_field)?;
        if bits > COUNTER_BITS {
            log::warn!(
                "Threshold register '{threshold_field}' is {bits} bits wide but the tick counter \
                 has {COUNTER_BITS}; delays above {} ticks will never expire",
                u32::MAX
            );
        }
        Ok(Self {
            reader: file.inbound_reader(),
            trigger,
            threshold,
            active_low,
        })
    }
}

impl TriggerSource for RegisterTrigger {
    fn sample(&mut self, _io: &dyn IoBackend) -> TriggerSample {
        self.reader.refresh();
        let values = self.reader.get();
        let level = values.get(self.trigger) != 0;
        TriggerSample {
            trigger: level != self.active_low,
            threshold: values.get(self.threshold),
        }
    }
}

/// Trigger from a local input pin, threshold from a bank of switches read
/// most significant pin first.
pub struct InputBankTrigger {
    trigger_pin: String,
    threshold_pins: Vec<String>,
    active_low: bool,
}

impl InputBankTrigger {
    pub fn new(
        trigger_pin: impl Into<String>,
        threshold_pins: Vec<String>,
        active_low: bool,
    ) -> Result<Self, RuntimeError> {
        if threshold_pins.is_empty() {
            return Err(RuntimeError::EmptyThresholdBank);
        }
        if threshold_pins.len() > COUNTER_BITS as usize {
            log::warn!(
                "Threshold bank has {} pins but the tick counter has {COUNTER_BITS} bits",
                threshold_pins.len()
            );
        }
        Ok(Self {
            trigger_pin: trigger_pin.into(),
            threshold_pins,
            active_low,
        })
    }
}

impl TriggerSource for InputBankTrigger {
    fn sample(&mut self, io: &dyn IoBackend) -> TriggerSample {
        let level = io.read_digital_input(&self.trigger_pin);
        TriggerSample {
            trigger: level != self.active_low,
            threshold: io.read_input_bank(&self.threshold_pins),
        }
    }
}
