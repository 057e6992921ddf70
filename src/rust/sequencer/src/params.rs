// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Named scalar parameters of the parametric operating modes.
//!
//! Lengths and offsets are given in fast clock cycles unless noted otherwise.
//! `CycleLength` and `SingleSHCapMode` are part of the name table but are
//! stored on the configuration itself, see [`crate::SequenceConfig`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParamName {
    RampLength,
    ResetLength,
    /// Slow cycles.
    ResetHoldLength,
    ResetIntegOffset,
    IntegrationLength,
    FlattopLength,
    /// Slow cycles.
    FlattopHoldLength,
    /// Slow cycles, 0 disables the explicit hold.
    HoldPos,
    /// Slow cycles.
    HoldLength,
    BackFlipAtReset,
    BackFlipToResetOffset,
    RampOffset,
    SingleCapLoadLength,
    SingleSHCapMode,
    /// Slow cycles.
    CycleLength,
    InjectRisingEdgeOffset,
    LastIntPhase,
    EmptyInjectCycles,
    RightShift,
    FtInjectOffset,
    FtFlipOffset,
}

impl ParamName {
    pub const ALL: [ParamName; 21] = [
        ParamName::RampLength,
        ParamName::ResetLength,
        ParamName::ResetHoldLength,
        ParamName::ResetIntegOffset,
        ParamName::IntegrationLength,
        ParamName::FlattopLength,
        ParamName::FlattopHoldLength,
        ParamName::HoldPos,
        ParamName::HoldLength,
        ParamName::BackFlipAtReset,
        ParamName::BackFlipToResetOffset,
        ParamName::RampOffset,
        ParamName::SingleCapLoadLength,
        ParamName::SingleSHCapMode,
        ParamName::CycleLength,
        ParamName::InjectRisingEdgeOffset,
        ParamName::LastIntPhase,
        ParamName::EmptyInjectCycles,
        ParamName::RightShift,
        ParamName::FtInjectOffset,
        ParamName::FtFlipOffset,
    ];

    /// Parameters of the `<cycleParameters>` element, in the written order.
    pub(crate) const PERSISTED: [ParamName; 19] = [
        ParamName::IntegrationLength,
        ParamName::ResetHoldLength,
        ParamName::FlattopLength,
        ParamName::RampLength,
        ParamName::SingleCapLoadLength,
        ParamName::FlattopHoldLength,
        ParamName::ResetIntegOffset,
        ParamName::RampOffset,
        ParamName::ResetLength,
        ParamName::BackFlipAtReset,
        ParamName::BackFlipToResetOffset,
        ParamName::InjectRisingEdgeOffset,
        ParamName::LastIntPhase,
        ParamName::EmptyInjectCycles,
        ParamName::RightShift,
        ParamName::FtFlipOffset,
        ParamName::FtInjectOffset,
        ParamName::HoldPos,
        ParamName::HoldLength,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ParamName::RampLength => "RampLength",
            ParamName::ResetLength => "ResetLength",
            ParamName::ResetHoldLength => "ResetHoldLength",
            ParamName::ResetIntegOffset => "ResetIntegOffset",
            ParamName::IntegrationLength => "IntegrationLength",
            ParamName::FlattopLength => "FlattopLength",
            ParamName::FlattopHoldLength => "FlattopHoldLength",
            ParamName::HoldPos => "HoldPos",
            ParamName::HoldLength => "HoldLength",
            ParamName::BackFlipAtReset => "BackFlipAtReset",
            ParamName::BackFlipToResetOffset => "BackFlipToResetOffset",
            ParamName::RampOffset => "RampOffset",
            ParamName::SingleCapLoadLength => "SingleCapLoadLength",
            ParamName::SingleSHCapMode => "SingleSHCapMode",
            ParamName::CycleLength => "CycleLength",
            ParamName::InjectRisingEdgeOffset => "InjectRisingEdgeOffset",
            ParamName::LastIntPhase => "LastIntPhase",
            ParamName::EmptyInjectCycles => "EmptyInjectCycles",
            ParamName::RightShift => "RightShift",
            ParamName::FtInjectOffset => "FtInjectOffset",
            ParamName::FtFlipOffset => "FtFlipOffset",
        }
    }

    /// Attribute name in the persisted description.
    pub fn attribute(self) -> &'static str {
        match self {
            ParamName::RampLength => "rampLength",
            ParamName::ResetLength => "resetLength",
            ParamName::ResetHoldLength => "resetHoldLength",
            ParamName::ResetIntegOffset => "resetIntegOffset",
            ParamName::IntegrationLength => "integrationLength",
            ParamName::FlattopLength => "flattopLength",
            ParamName::FlattopHoldLength => "flattopHoldLength",
            ParamName::HoldPos => "holdPos",
            ParamName::HoldLength => "holdLength",
            ParamName::BackFlipAtReset => "backFlipAtReset",
            ParamName::BackFlipToResetOffset => "backFlipToResetOffset",
            ParamName::RampOffset => "rampIntegOffset",
            ParamName::SingleCapLoadLength => "singleCapLoadLength",
            ParamName::SingleSHCapMode => "singleSHCapMode",
            ParamName::CycleLength => "cycleLength",
            ParamName::InjectRisingEdgeOffset => "injectRisingEdgeOffset",
            ParamName::LastIntPhase => "lastIntPhase",
            ParamName::EmptyInjectCycles => "emptyInjectCycles",
            ParamName::RightShift => "rightShift",
            ParamName::FtInjectOffset => "ftInjectOffset",
            ParamName::FtFlipOffset => "ftFlipOffset",
        }
    }

    pub fn default_value(self) -> i32 {
        match self {
            ParamName::RampLength => 250,
            ParamName::ResetLength => 21,
            ParamName::ResetHoldLength => 0,
            ParamName::ResetIntegOffset => 15,
            ParamName::IntegrationLength => 100,
            ParamName::FlattopLength => 20,
            ParamName::FlattopHoldLength => 0,
            ParamName::HoldPos => 0,
            ParamName::HoldLength => 0,
            ParamName::BackFlipAtReset => 0,
            ParamName::BackFlipToResetOffset => 0,
            ParamName::RampOffset => 20,
            ParamName::SingleCapLoadLength => 11,
            ParamName::SingleSHCapMode => 0,
            ParamName::CycleLength => 50,
            ParamName::InjectRisingEdgeOffset => 0,
            ParamName::LastIntPhase => 21,
            ParamName::EmptyInjectCycles => 3,
            ParamName::RightShift => 0,
            ParamName::FtInjectOffset => 7,
            ParamName::FtFlipOffset => 7,
        }
    }
}

impl fmt::Display for ParamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParamName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ParamName::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| Error::InvalidParameter(format!("Unknown sequencer parameter '{s}'")))
    }
}

/// Values of the named parameters stored per configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleParameters {
    pub ramp_length: i32,
    pub reset_length: i32,
    pub reset_hold_length: i32,
    pub reset_integ_offset: i32,
    pub integration_length: i32,
    pub flattop_length: i32,
    pub flattop_hold_length: i32,
    pub hold_pos: i32,
    pub hold_length: i32,
    pub back_flip_at_reset: i32,
    pub back_flip_to_reset_offset: i32,
    pub ramp_offset: i32,
    pub single_cap_load_length: i32,
    pub inject_rising_edge_offset: i32,
    pub last_int_phase: i32,
    pub empty_inject_cycles: i32,
    pub right_shift: i32,
    pub ft_inject_offset: i32,
    pub ft_flip_offset: i32,
}

impl Default for CycleParameters {
    fn default() -> Self {
        let mut params = CycleParameters {
            ramp_length: 0,
            reset_length: 0,
            reset_hold_length: 0,
            reset_integ_offset: 0,
            integration_length: 0,
            flattop_length: 0,
            flattop_hold_length: 0,
            hold_pos: 0,
            hold_length: 0,
            back_flip_at_reset: 0,
            back_flip_to_reset_offset: 0,
            ramp_offset: 0,
            single_cap_load_length: 0,
            inject_rising_edge_offset: 0,
            last_int_phase: 0,
            empty_inject_cycles: 0,
            right_shift: 0,
            ft_inject_offset: 0,
            ft_flip_offset: 0,
        };
        for name in ParamName::ALL {
            if let Some(value) = params.get_mut(name) {
                *value = name.default_value();
            }
        }
        params
    }
}

impl CycleParameters {
    /// Stored value, `None` for the configuration-level names.
    pub fn get(&self, name: ParamName) -> Option<i32> {
        let value = match name {
            ParamName::RampLength => self.ramp_length,
            ParamName::ResetLength => self.reset_length,
            ParamName::ResetHoldLength => self.reset_hold_length,
            ParamName::ResetIntegOffset => self.reset_integ_offset,
            ParamName::IntegrationLength => self.integration_length,
            ParamName::FlattopLength => self.flattop_length,
            ParamName::FlattopHoldLength => self.flattop_hold_length,
            ParamName::HoldPos => self.hold_pos,
            ParamName::HoldLength => self.hold_length,
            ParamName::BackFlipAtReset => self.back_flip_at_reset,
            ParamName::BackFlipToResetOffset => self.back_flip_to_reset_offset,
            ParamName::RampOffset => self.ramp_offset,
            ParamName::SingleCapLoadLength => self.single_cap_load_length,
            ParamName::InjectRisingEdgeOffset => self.inject_rising_edge_offset,
            ParamName::LastIntPhase => self.last_int_phase,
            ParamName::EmptyInjectCycles => self.empty_inject_cycles,
            ParamName::RightShift => self.right_shift,
            ParamName::FtInjectOffset => self.ft_inject_offset,
            ParamName::FtFlipOffset => self.ft_flip_offset,
            ParamName::SingleSHCapMode | ParamName::CycleLength => return None,
        };
        Some(value)
    }

    pub fn get_mut(&mut self, name: ParamName) -> Option<&mut i32> {
        let value = match name {
            ParamName::RampLength => &mut self.ramp_length,
            ParamName::ResetLength => &mut self.reset_length,
            ParamName::ResetHoldLength => &mut self.reset_hold_length,
            ParamName::ResetIntegOffset => &mut self.reset_integ_offset,
            ParamName::IntegrationLength => &mut self.integration_length,
            ParamName::FlattopLength => &mut self.flattop_length,
            ParamName::FlattopHoldLength => &mut self.flattop_hold_length,
            ParamName::HoldPos => &mut self.hold_pos,
            ParamName::HoldLength => &mut self.hold_length,
            ParamName::BackFlipAtReset => &mut self.back_flip_at_reset,
            ParamName::BackFlipToResetOffset => &mut self.back_flip_to_reset_offset,
            ParamName::RampOffset => &mut self.ramp_offset,
            ParamName::SingleCapLoadLength => &mut self.single_cap_load_length,
            ParamName::InjectRisingEdgeOffset => &mut self.inject_rising_edge_offset,
            ParamName::LastIntPhase => &mut self.last_int_phase,
            ParamName::EmptyInjectCycles => &mut self.empty_inject_cycles,
            ParamName::RightShift => &mut self.right_shift,
            ParamName::FtInjectOffset => &mut self.ft_inject_offset,
            ParamName::FtFlipOffset => &mut self.ft_flip_offset,
            ParamName::SingleSHCapMode | ParamName::CycleLength => return None,
        };
        Some(value)
    }
}
