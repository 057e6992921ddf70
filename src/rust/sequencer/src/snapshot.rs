// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use indexmap::IndexMap;
use sequencer_codec::{HoldPositions, HoldSlot, PatternRegister, Phase};
use serde::Serialize;

use crate::config::SequenceConfig;
use crate::line::Line;
use crate::mode::OperatingMode;
use crate::Result;

#[derive(Debug, Serialize)]
pub struct LineSnapshot<'a> {
    pub name: Line,
    pub sub_address: u8,
    pub static_value: bool,
    pub invert_hold: bool,
    pub phases: &'a [Phase],
    /// `None` while the line is not compiled.
    pub slots: Option<&'a PatternRegister>,
}

#[derive(Debug, Serialize)]
pub struct HoldSnapshot<'a> {
    pub enabled: bool,
    pub slots: &'a [HoldSlot],
    pub positions: HoldPositions,
    pub real_cycle_length: u32,
}

/// Serializable view of a configuration for external tooling.
#[derive(Debug, Serialize)]
pub struct ConfigSnapshot<'a> {
    pub mode: OperatingMode,
    pub signals_compiler: bool,
    pub cycle_length: u32,
    pub single_cap_mode: bool,
    pub int_time_extension: bool,
    pub parameters: IndexMap<&'static str, i32>,
    pub lines: Vec<LineSnapshot<'a>>,
    pub holds: HoldSnapshot<'a>,
}

impl<'a> ConfigSnapshot<'a> {
    pub fn new(config: &'a SequenceConfig) -> Self {
        let parameters = config
            .parameter_map()
            .into_iter()
            .map(|(name, value)| (name.as_str(), value))
            .collect();
        let lines = config
            .lines()
            .iter()
            .map(|(line, track)| LineSnapshot {
                name: line,
                sub_address: line.sub_address(),
                static_value: track.static_value,
                invert_hold: track.invert_hold,
                phases: track.phases(),
                slots: track.compiled(),
            })
            .collect();
        ConfigSnapshot {
            mode: config.mode(),
            signals_compiler: config.is_signals_compiler(),
            cycle_length: config.cycle_length(),
            single_cap_mode: config.single_cap_mode(),
            int_time_extension: config.int_time_extension(),
            parameters,
            lines,
            holds: HoldSnapshot {
                enabled: config.hold_enabled(),
                slots: config.holds(),
                positions: config.hold_positions(),
                real_cycle_length: config.real_cycle_length(),
            },
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl SequenceConfig {
    pub fn snapshot(&self) -> ConfigSnapshot<'_> {
        ConfigSnapshot::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_json() {
        let config = SequenceConfig::new().unwrap();
        let text = config.snapshot().to_json().unwrap();
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["mode"], "NORM");
        assert_eq!(json["cycle_length"], 50);
        assert_eq!(json["parameters"]["IntegrationLength"], 100);
        assert_eq!(json["lines"][2]["name"], "FCF_Res_B");
        assert_eq!(json["lines"][2]["phases"][0]["fast_cycles"], 73);
        assert_eq!(json["lines"][0]["slots"].as_array().unwrap().len(), 14);
        assert_eq!(json["holds"]["enabled"], false);
        assert_eq!(json["holds"]["slots"].as_array().unwrap().len(), 5);

        let ramp = text.find("\"RampLength\"").unwrap();
        let shift = text.find("\"RightShift\"").unwrap();
        assert!(ramp < shift);
    }
}
