// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Rule set used to derive the line waveforms.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperatingMode {
    #[default]
    #[serde(rename = "NORM")]
    Normal,
    #[serde(rename = "SINGLEINT")]
    SingleIntegration,
    #[serde(rename = "BUFFER")]
    Buffer,
    #[serde(rename = "RESET")]
    Reset,
    #[serde(rename = "MANUAL")]
    Manual,
    #[serde(rename = "EXTLATCH")]
    ExternalLatch,
    #[serde(rename = "DEPFET")]
    DepfetHold,
}

impl OperatingMode {
    pub const ALL: [OperatingMode; 7] = [
        OperatingMode::Normal,
        OperatingMode::SingleIntegration,
        OperatingMode::Buffer,
        OperatingMode::Reset,
        OperatingMode::Manual,
        OperatingMode::ExternalLatch,
        OperatingMode::DepfetHold,
    ];

    /// Integer code of the persisted description.
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: i64) -> Option<OperatingMode> {
        OperatingMode::ALL
            .into_iter()
            .find(|m| i64::from(m.code()) == code)
    }

    pub fn name(self) -> &'static str {
        match self {
            OperatingMode::Normal => "NORM",
            OperatingMode::SingleIntegration => "SINGLEINT",
            OperatingMode::Buffer => "BUFFER",
            OperatingMode::Reset => "RESET",
            OperatingMode::Manual => "MANUAL",
            OperatingMode::ExternalLatch => "EXTLATCH",
            OperatingMode::DepfetHold => "DEPFET",
        }
    }

    /// Modes without integration on the SwitchIn line.
    pub fn integration_disabled(self) -> bool {
        matches!(
            self,
            OperatingMode::Buffer | OperatingMode::Reset | OperatingMode::ExternalLatch
        )
    }
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for OperatingMode {
    type Err = Error;

    /// Accepts the canonical name or the integer code.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Ok(code) = s.parse::<i64>() {
            return OperatingMode::from_code(code)
                .ok_or_else(|| Error::InvalidParameter(format!("Unknown operating mode {code}")));
        }
        OperatingMode::ALL
            .into_iter()
            .find(|m| m.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::InvalidParameter(format!("Unknown operating mode '{s}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        for (code, mode) in OperatingMode::ALL.into_iter().enumerate() {
            assert_eq!(mode.code() as usize, code);
            assert_eq!(OperatingMode::from_code(code as i64), Some(mode));
        }
        assert_eq!(OperatingMode::from_code(7), None);
    }

    #[test]
    fn test_parse() {
        assert_eq!(
            "EXTLATCH".parse::<OperatingMode>().unwrap(),
            OperatingMode::ExternalLatch
        );
        assert_eq!("depfet".parse::<OperatingMode>().unwrap(), OperatingMode::DepfetHold);
        assert_eq!("3".parse::<OperatingMode>().unwrap(), OperatingMode::Reset);
        assert!("9".parse::<OperatingMode>().is_err());
        assert!("NORMAL".parse::<OperatingMode>().is_err());
        assert_eq!(OperatingMode::SingleIntegration.to_string(), "SINGLEINT");
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&OperatingMode::Buffer).unwrap();
        assert_eq!(json, "\"BUFFER\"");
    }
}
