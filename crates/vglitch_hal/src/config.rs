use serde::Deserialize;

/// Boundary contract between the controller and the board: which named pins
/// carry the glitch output, the 2-bit indicator and the local input bank.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PinMap {
    #[serde(default = "default_glitch_output")]
    pub glitch_output: String,
    /// Indicator pins, most significant bit first.
    #[serde(default = "default_indicator")]
    pub indicator: [String; 2],
    #[serde(default = "default_trigger_pin")]
    pub trigger: String,
    /// Threshold switches, most significant bit first.
    #[serde(default)]
    pub threshold_bank: Vec<String>,
}

fn default_glitch_output() -> String {
    "glitch".to_string()
}

fn default_indicator() -> [String; 2] {
    ["led1".to_string(), "led0".to_string()]
}

fn default_trigger_pin() -> String {
    "btn_arm".to_string()
}

impl Default for PinMap {
    fn default() -> Self {
        Self {
            glitch_output: default_glitch_output(),
            indicator: default_indicator(),
            trigger: default_trigger_pin(),
            threshold_bank: Vec::new(),
        }
    }
}

impl PinMap {
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_table_uses_defaults() {
        let pins = PinMap::from_toml("").unwrap();
        assert_eq!(pins, PinMap::default());
        assert_eq!(pins.indicator[0], "led1");
    }

    #[test]
    fn parses_threshold_bank() {
        let pins = PinMap::from_toml(
            r#"
glitch_output = "nmos_gate"
trigger = "key0"
threshold_bank = ["sw3", "sw2", "sw1", "sw0"]
"#,
        )
        .unwrap();
        assert_eq!(pins.glitch_output, "nmos_gate");
        assert_eq!(pins.trigger, "key0");
        assert_eq!(pins.threshold_bank.len(), 4);
    }
}
