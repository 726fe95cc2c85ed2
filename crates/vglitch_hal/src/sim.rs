use crate::traits::{HalError, IoBackend};
use std::collections::HashMap;

/// In-memory pins. Inputs are set by the test or the CLI, outputs are
/// recorded together with the number of level changes seen on each pin.
pub struct SimBackend {
    inputs: HashMap<String, bool>,
    outputs: HashMap<String, bool>,
    edges: HashMap<String, u64>,
}

impl SimBackend {
    pub fn new() -> Self {
        Self {
            inputs: HashMap::new(),
            outputs: HashMap::new(),
            edges: HashMap::new(),
        }
    }

    pub fn set_input(&mut self, pin: &str, value: bool) {
        self.inputs.insert(pin.to_string(), value);
    }

    /// Drive a bank of pins from a word, first pin is the MSB.
    pub fn set_input_bank(&mut self, pins: &[String], value: u64) {
        let width = pins.len();
        for (i, pin) in pins.iter().enumerate() {
            let bit = width - 1 - i;
            let level = bit < 64 && (value >> bit) & 1 == 1;
            self.set_input(pin, level);
        }
    }

    pub fn get_output(&self, pin: &str) -> Option<bool> {
        self.outputs.get(pin).copied()
    }

    /// Number of level changes written to `pin` after its first write.
    pub fn edge_count(&self, pin: &str) -> u64 {
        self.edges.get(pin).copied().unwrap_or(0)
    }
}

impl Default for SimBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl IoBackend for SimBackend {
    fn read_digital_input(&self, pin: &str) -> bool {
        self.inputs.get(pin).copied().unwrap_or(false)
    }

    fn write_digital_output(&mut self, pin: &str, value: bool) {
        match self.outputs.get_mut(pin) {
            Some(level) => {
                if *level != value {
                    *level = value;
                    *self.edges.entry(pin.to_string()).or_insert(0) += 1;
                }
            }
            None => {
                self.outputs.insert(pin.to_string(), value);
            }
        }
    }

    fn refresh_inputs(&mut self) -> Result<(), HalError> {
        Ok(())
    }

    fn flush_outputs(&mut self) -> Result<(), HalError> {
        Ok(())
    }
}
