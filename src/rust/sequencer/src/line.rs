// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::ops::{Index, IndexMut};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sequencer_codec::phase::{rotate, total_fast_cycles};
use sequencer_codec::{CompileError, PATTERN_WIDTH, PatternRegister, Phase, compile, merge_phases};

use crate::{Error, Result};

/// Analog front-end control line driven by the sequence generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Line {
    #[serde(rename = "ADC_RMP")]
    Ramp,
    #[serde(rename = "FCF_SwIn")]
    SwitchIn,
    /// Active low.
    #[serde(rename = "FCF_Res_B")]
    Reset,
    #[serde(rename = "FCF_Flip")]
    Flip,
    #[serde(rename = "ISubPulse")]
    Inject,
}

impl Line {
    pub const ALL: [Line; 5] = [
        Line::Ramp,
        Line::SwitchIn,
        Line::Reset,
        Line::Flip,
        Line::Inject,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Line::Ramp => "ADC_RMP",
            Line::SwitchIn => "FCF_SwIn",
            Line::Reset => "FCF_Res_B",
            Line::Flip => "FCF_Flip",
            Line::Inject => "ISubPulse",
        }
    }

    /// Register sub-address used by the programming layer.
    pub fn sub_address(self) -> u8 {
        match self {
            Line::Ramp => 0,
            Line::SwitchIn => 1,
            Line::Reset => 2,
            Line::Flip => 3,
            Line::Inject => 4,
        }
    }

    pub fn from_sub_address(address: u8) -> Option<Line> {
        Line::ALL.into_iter().find(|l| l.sub_address() == address)
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Line {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Line::ALL
            .into_iter()
            .find(|l| l.name() == s)
            .ok_or_else(|| Error::InvalidParameter(format!("Unknown line '{s}'")))
    }
}

/// Waveform and compiled register of one line.
///
/// Phases are stored merged. Any change of the phases drops the compiled
/// register until the line is compiled again.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Track {
    phases: Vec<Phase>,
    compiled: Option<PatternRegister>,
    pub static_value: bool,
    pub invert_hold: bool,
}

impl Track {
    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    pub fn set_phases(&mut self, phases: &[Phase]) {
        self.phases = merge_phases(phases);
        self.compiled = None;
    }

    /// Append a phase, merging it into the last one if the level matches.
    pub(crate) fn push_phase(&mut self, phase: Phase) {
        self.compiled = None;
        if phase.fast_cycles == 0 {
            return;
        }
        match self.phases.last_mut() {
            Some(last) if last.high == phase.high => last.fast_cycles += phase.fast_cycles,
            _ => self.phases.push(phase),
        }
    }

    /// Hold the line at one level for the whole cycle.
    pub fn set_static(&mut self, high: bool, cycle_length: u32) {
        self.set_phases(&[Phase::new(high, cycle_length * PATTERN_WIDTH)]);
    }

    pub(crate) fn set_register(&mut self, phases: Vec<Phase>, register: PatternRegister) {
        self.phases = phases;
        self.compiled = Some(register);
    }

    pub fn compile(&mut self, cycle_length: u32) -> Result<&PatternRegister, CompileError> {
        let register = compile(&self.phases, cycle_length)?;
        Ok(self.compiled.insert(register))
    }

    pub fn compiled(&self) -> Option<&PatternRegister> {
        self.compiled.as_ref()
    }

    pub fn is_compiled(&self) -> bool {
        self.compiled.is_some()
    }

    /// Delay the waveform by `shift` fast cycles; negative values advance it.
    pub(crate) fn rotate(&mut self, shift: i64) {
        let mut phases = std::mem::take(&mut self.phases);
        rotate(&mut phases, shift);
        self.set_phases(&phases);
    }

    pub(crate) fn invalidate(&mut self) {
        self.compiled = None;
    }

    pub fn fast_cycles(&self) -> u64 {
        total_fast_cycles(&self.phases)
    }

    pub(crate) fn phase(&self, index: usize) -> i32 {
        self.phases
            .get(index)
            .map_or(0, |p| p.fast_cycles as i32)
    }

    pub(crate) fn high_lengths(&self) -> impl Iterator<Item = i32> + '_ {
        self.phases
            .iter()
            .filter(|p| p.high)
            .map(|p| p.fast_cycles as i32)
    }

    pub(crate) fn low_lengths(&self) -> impl Iterator<Item = i32> + '_ {
        self.phases
            .iter()
            .filter(|p| !p.high)
            .map(|p| p.fast_cycles as i32)
    }
}

/// The five lines, indexed by [`Line`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Lines([Track; 5]);

impl Lines {
    pub fn iter(&self) -> impl Iterator<Item = (Line, &Track)> {
        Line::ALL.into_iter().zip(self.0.iter())
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (Line, &mut Track)> {
        Line::ALL.into_iter().zip(self.0.iter_mut())
    }

    pub(crate) fn phase_count(&self, line: Line) -> usize {
        self[line].phases.len()
    }
}

impl Index<Line> for Lines {
    type Output = Track;

    fn index(&self, line: Line) -> &Track {
        &self.0[line.index()]
    }
}

impl IndexMut<Line> for Lines {
    fn index_mut(&mut self, line: Line) -> &mut Track {
        &mut self.0[line.index()]
    }
}
