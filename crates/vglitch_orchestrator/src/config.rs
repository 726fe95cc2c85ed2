//! TOML configuration for a controller instance.
//!
//! Every section is optional; an empty file describes the stock controller
//! on simulated pins with no serial port.

use crate::OrchestratorError;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use vglitch_hal::config::PinMap;
use vglitch_regs::backend::DEFAULT_BAUD_RATE;
use vglitch_regs::{BackendConfig, Direction, FieldSpec, Framing, RegisterLayout};
use vglitch_runtime::controller::DEFAULT_HOLD_TICKS;
use vglitch_runtime::engine::DEFAULT_CLOCK_HZ;
use vglitch_runtime::{ClockConfig, ControllerConfig};

/// Top-level config, deserialized from TOML.
#[derive(Debug, Default, Deserialize)]
pub struct GlitchConfig {
    #[serde(default)]
    pub io: IoSection,
    #[serde(default)]
    pub serial: SerialSection,
    #[serde(default)]
    pub clock: ClockSection,
    #[serde(default)]
    pub controller: ControllerSection,
    /// Register fields in declaration order. Empty selects the built-in
    /// glitch layout.
    #[serde(default)]
    pub registers: Vec<FieldSpec>,
    #[serde(default)]
    pub trigger: TriggerSection,
    #[serde(default)]
    pub pins: PinMap,
}

#[derive(Debug, Deserialize)]
pub struct IoSection {
    #[serde(rename = "type", default = "default_io_type")]
    pub io_type: String,
}

fn default_io_type() -> String {
    "sim".to_string()
}

impl Default for IoSection {
    fn default() -> Self {
        Self {
            io_type: default_io_type(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SerialSection {
    /// Device path. Without one the register file is only reachable from
    /// inside the process.
    pub port: Option<String>,
    pub baud_rate: u32,
    pub framing: Framing,
    /// Outbound push period for raw framing, 0 disables it.
    pub poll_interval_ms: u64,
    /// Explicit buffer widths, checked against the layout.
    pub in_width_bytes: Option<usize>,
    pub out_width_bytes: Option<usize>,
}

impl Default for SerialSection {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: DEFAULT_BAUD_RATE,
            framing: Framing::Raw,
            poll_interval_ms: 100,
            in_width_bytes: None,
            out_width_bytes: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ClockSection {
    #[serde(default = "default_clock_hz")]
    pub hz: u64,
}

fn default_clock_hz() -> u64 {
    DEFAULT_CLOCK_HZ
}

impl Default for ClockSection {
    fn default() -> Self {
        Self {
            hz: default_clock_hz(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    #[default]
    Registers,
    InputBank,
}

#[derive(Debug, Deserialize)]
pub struct ControllerSection {
    #[serde(default = "default_hold_ticks")]
    pub hold_ticks: u32,
    #[serde(default)]
    pub trigger: TriggerKind,
}

fn default_hold_ticks() -> u32 {
    DEFAULT_HOLD_TICKS
}

impl Default for ControllerSection {
    fn default() -> Self {
        Self {
            hold_ticks: default_hold_ticks(),
            trigger: TriggerKind::default(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct TriggerSection {
    #[serde(default)]
    pub registers: RegisterTriggerSection,
    #[serde(default)]
    pub input_bank: InputBankSection,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RegisterTriggerSection {
    pub trigger_field: String,
    pub threshold_field: String,
    pub active_low: bool,
}

impl Default for RegisterTriggerSection {
    fn default() -> Self {
        Self {
            trigger_field: "start_glitch".to_string(),
            threshold_field: "glitch_delay".to_string(),
            active_low: false,
        }
    }
}

/// Pins come from `[pins]`: `trigger` and `threshold_bank`.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct InputBankSection {
    pub active_low: bool,
}

impl Default for InputBankSection {
    fn default() -> Self {
        Self { active_low: true }
    }
}

/// Where the controller's pins live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoMode {
    Sim,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerPlan {
    Registers {
        trigger_field: String,
        threshold_field: String,
        active_low: bool,
    },
    InputBank {
        active_low: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkPlan {
    pub port: String,
    pub push_interval: Option<Duration>,
}

/// A checked, immutable configuration. Nothing in it changes after startup.
#[derive(Debug, Clone)]
pub struct Plan {
    pub io: IoMode,
    pub layout: Arc<RegisterLayout>,
    pub backend: BackendConfig,
    pub link: Option<LinkPlan>,
    pub controller: ControllerConfig,
    pub clock: ClockConfig,
    pub trigger: TriggerPlan,
    pub pins: PinMap,
}

impl Plan {
    /// Valid combinations that are unlikely to do what was meant.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if let (IoMode::Sim, TriggerPlan::InputBank { active_low }) = (self.io, &self.trigger) {
            let effect = if *active_low {
                "the trigger is always asserted with a zero threshold and the controller glitches continuously"
            } else {
                "the trigger never fires"
            };
            warnings.push(format!(
                "input_bank trigger on simulated pins: nothing drives {}, {effect}",
                self.pins.trigger
            ));
        }
        warnings
    }
}

impl GlitchConfig {
    /// Parse from TOML string.
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Parse from TOML file path.
    pub fn from_file(path: &str) -> Result<Self, OrchestratorError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| OrchestratorError::ConfigError(format!("{path}: {e}")))?;
        Self::from_toml(&content).map_err(|e| OrchestratorError::ConfigError(e.to_string()))
    }

    pub fn io_mode(&self) -> Result<IoMode, OrchestratorError> {
        match self.io.io_type.as_str() {
            "sim" => Ok(IoMode::Sim),
            other => Err(OrchestratorError::ConfigError(format!(
                "unknown io type: {other}"
            ))),
        }
    }

    pub fn layout(&self) -> Result<RegisterLayout, OrchestratorError> {
        if self.registers.is_empty() {
            return Ok(RegisterLayout::glitch_default());
        }
        Ok(RegisterLayout::new(self.registers.clone())?)
    }

    /// Validate every section and freeze the result.
    pub fn plan(&self) -> Result<Plan, OrchestratorError> {
        let io = self.io_mode()?;
        let layout = Arc::new(self.layout()?);

        let serial = &self.serial;
        let backend = BackendConfig::new(
            serial.baud_rate,
            serial
                .in_width_bytes
                .unwrap_or_else(|| layout.bytes(Direction::In)),
            serial
                .out_width_bytes
                .unwrap_or_else(|| layout.bytes(Direction::Out)),
        )
        .with_framing(serial.framing);
        let link = serial.port.as_ref().map(|port| LinkPlan {
            port: port.clone(),
            push_interval: (serial.poll_interval_ms > 0)
                .then(|| Duration::from_millis(serial.poll_interval_ms)),
        });

        let controller = ControllerConfig {
            hold_ticks: self.controller.hold_ticks,
        }
        .validate()?;
        let clock = ClockConfig { hz: self.clock.hz }.validate()?;

        let trigger = match self.controller.trigger {
            TriggerKind::Registers => {
                let t = &self.trigger.registers;
                TriggerPlan::Registers {
                    trigger_field: t.trigger_field.clone(),
                    threshold_field: t.threshold_field.clone(),
                    active_low: t.active_low,
                }
            }
            TriggerKind::InputBank => {
                if self.pins.threshold_bank.is_empty() {
                    return Err(OrchestratorError::ConfigError(
                        "input_bank trigger needs pins.threshold_bank".into(),
                    ));
                }
                TriggerPlan::InputBank {
                    active_low: self.trigger.input_bank.active_low,
                }
            }
        };

        Ok(Plan {
            io,
            layout,
            backend,
            link,
            controller,
            clock,
            trigger,
            pins: self.pins.clone(),
        })
    }
}
