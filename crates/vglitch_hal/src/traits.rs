use thiserror::Error;

#[derive(Debug, Error)]
pub enum HalError {
    #[error("pin not found: {0}")]
    DeviceNotFound(String),
    #[error("communication error: {0}")]
    CommError(String),
    #[error("timeout")]
    Timeout,
}

/// Named digital pins sampled and driven once per tick.
///
/// `refresh_inputs` latches the input side, `flush_outputs` pushes whatever
/// was written since the previous flush. Reads between the two see the
/// latched values only.
pub trait IoBackend: Send {
    fn read_digital_input(&self, pin: &str) -> bool;
    fn write_digital_output(&mut self, pin: &str, value: bool);
    fn refresh_inputs(&mut self) -> Result<(), HalError>;
    fn flush_outputs(&mut self) -> Result<(), HalError>;

    /// Read an ordered bank of pins as an unsigned word, first pin is the MSB.
    fn read_input_bank(&self, pins: &[String]) -> u64 {
        pins.iter().fold(0u64, |acc, pin| {
            (acc << 1) | u64::from(self.read_digital_input(pin))
        })
    }
}

impl IoBackend for Box<dyn IoBackend> {
    fn read_digital_input(&self, pin: &str) -> bool {
        (**self).read_digital_input(pin)
    }
    fn write_digital_output(&mut self, pin: &str, value: bool) {
        (**self).write_digital_output(pin, value)
    }
    fn refresh_inputs(&mut self) -> Result<(), HalError> {
        (**self).refresh_inputs()
    }
    fn flush_outputs(&mut self) -> Result<(), HalError> {
        (**self).flush_outputs()
    }
    fn read_input_bank(&self, pins: &[String]) -> u64 {
        (**self).read_input_bank(pins)
    }
}
