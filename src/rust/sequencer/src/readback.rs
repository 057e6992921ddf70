// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Timing parameters read back from the current line waveforms.
//!
//! Parametric modes answer timing queries from the stored parameters. In
//! manual mode the same quantities are measured on the phase lists, so
//! external tooling sees consistent values after hand edits.

use sequencer_codec::{HoldWindow, Phase};
use sequencer_log::{error, warn};

use crate::config::{ParameterOptions, SequenceConfig};
use crate::derive::latch_flip;
use crate::line::Line;
use crate::mode::OperatingMode;
use crate::params::{CycleParameters, ParamName};
use crate::{Error, Result};

/// Source of the timing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timing<'a> {
    Parametric(&'a CycleParameters),
    /// Derived from the phase lists.
    Manual,
}

/// Parameters that manual mode reads back from the lines.
const DERIVED: [ParamName; 8] = [
    ParamName::IntegrationLength,
    ParamName::FlattopLength,
    ParamName::FlattopHoldLength,
    ParamName::ResetLength,
    ParamName::ResetIntegOffset,
    ParamName::ResetHoldLength,
    ParamName::RampLength,
    ParamName::RampOffset,
];

fn len(phase: &Phase) -> i32 {
    phase.fast_cycles as i32
}

/// Hold window whose start lies strictly inside the fast cycle range.
fn hold_inside(windows: [HoldWindow; 2], start: i32, end: i32) -> i32 {
    windows
        .into_iter()
        .find(|w| {
            let position = w.position as i32 * 7;
            w.is_active() && start < position && position < end
        })
        .map_or(0, |w| w.length as i32)
}

impl SequenceConfig {
    pub fn timing(&self) -> Timing<'_> {
        match self.mode {
            OperatingMode::Manual => Timing::Manual,
            _ => Timing::Parametric(&self.params),
        }
    }

    /// Reset low time and its offset from the cycle start, in fast cycles.
    pub fn reset_time_and_offset(&self) -> (i32, i32) {
        if matches!(
            self.mode,
            OperatingMode::Buffer | OperatingMode::ExternalLatch
        ) {
            return (self.fast_cycle_length(), 0);
        }
        let (time, offset) = match self.lines[Line::Reset].phases() {
            [first, second] if first.high => (len(second), len(first)),
            [first, _] => (len(first), 0),
            [first, second, _] if first.high => (len(second), len(first)),
            [first, second, third] => (len(first) + len(third), len(first) + len(second)),
            _ => (14, 35),
        };
        if time < 14 {
            warn!("Reset time of {} fast cycles is shorter than 14", time);
        }
        (time, offset)
    }

    /// Rising edge of the ramp in fast cycles.
    pub fn ramp_position(&self) -> i32 {
        let phases = self.lines[Line::Ramp].phases();
        if phases.len() > 4 {
            return phases[..4].iter().map(len).sum();
        }
        match phases {
            [first, second, _] if first.high => len(first) + len(second),
            [first, _, _] | [first, _] => len(first),
            _ => 0,
        }
    }

    pub fn first_integ_offset(&self) -> i32 {
        let swin = &self.lines[Line::SwitchIn];
        if swin.phases().len() > 1 {
            swin.phase(0)
        } else {
            let (time, offset) = self.reset_time_and_offset();
            time + offset + 20
        }
    }

    /// Length of the first flip phase, the full cycle for a static flip.
    pub fn first_flip_phase(&self) -> i32 {
        let flip = &self.lines[Line::Flip];
        if flip.phases().len() > 1 {
            flip.phase(0)
        } else {
            self.fast_cycle_length()
        }
    }

    pub fn first_inject_length(&self) -> i32 {
        let inject = &self.lines[Line::Inject];
        if inject.phases().len() > 1 {
            inject.phase(0)
        } else {
            self.fast_cycle_length()
        }
    }

    pub fn ramp_length(&self) -> i32 {
        match self.timing() {
            Timing::Parametric(p) => p.ramp_length,
            Timing::Manual => self.lines[Line::Ramp].high_lengths().sum(),
        }
    }

    pub fn reset_length(&self) -> i32 {
        match self.timing() {
            Timing::Parametric(p) => p.reset_length,
            Timing::Manual => self.measured_reset_length(),
        }
    }

    fn measured_reset_length(&self) -> i32 {
        let mut lows = self.lines[Line::Reset].low_lengths();
        let first = lows.next().unwrap_or(0);
        if lows.next().is_some() {
            warn!("Reset line has more than one reset phase, using the first");
        }
        first
    }

    /// Integration time in fast cycles.
    ///
    /// Unless `no_hold` is set, the hold extension of the integration is
    /// included while it is active.
    pub fn integration_time(&self, no_hold: bool) -> i32 {
        match self.timing() {
            Timing::Parametric(p) => p.integration_length,
            Timing::Manual => self.measured_integration_time(no_hold),
        }
    }

    fn measured_integration_time(&self, no_hold: bool) -> i32 {
        let (count, total) = self.lines[Line::SwitchIn]
            .high_lengths()
            .fold((0, 0), |(count, total), l| (count + 1, total + l));
        let mut time = if count > 0 { total / count } else { 0 };
        if !no_hold && self.hold_enabled && self.int_time_extension {
            time += self.hold_integration_time();
        }
        time
    }

    /// Fast cycles added to the integration by the hold windows.
    pub fn hold_integration_time(&self) -> i32 {
        if !self.hold_enabled {
            return 0;
        }
        let positions = self.hold_positions();
        let first = positions.first.length as i32;
        let symmetric = self.mode == OperatingMode::SingleIntegration
            || positions.first.length == positions.second.length;
        let integrating = self.lines[Line::SwitchIn].high_lengths().next().is_some();
        if first > 0 && symmetric && integrating {
            first * 7
        } else {
            0
        }
    }

    pub fn reset_integ_offset(&self) -> i32 {
        match self.timing() {
            Timing::Parametric(p) => p.reset_integ_offset,
            Timing::Manual => self.measured_reset_integ_offset(),
        }
    }

    fn measured_reset_integ_offset(&self) -> i32 {
        let (time, offset) = self.reset_time_and_offset();
        self.first_integ_offset() - time - offset
    }

    pub fn flattop_length(&self) -> i32 {
        match self.timing() {
            Timing::Parametric(p) => p.flattop_length,
            Timing::Manual => self.measured_flattop_length(),
        }
    }

    fn measured_flattop_length(&self) -> i32 {
        if self.lines.phase_count(Line::SwitchIn) >= 4 {
            self.lines[Line::SwitchIn].phase(2)
        } else {
            35
        }
    }

    pub fn flattop_hold_length(&self) -> i32 {
        match self.timing() {
            Timing::Parametric(p) => p.flattop_hold_length,
            Timing::Manual => self.measured_flattop_hold_length(),
        }
    }

    fn measured_flattop_hold_length(&self) -> i32 {
        let flattop = self.measured_flattop_length();
        if flattop == 0 {
            return 0;
        }
        let start = self.first_integ_offset() + self.measured_integration_time(true);
        let positions = self.hold_positions();
        hold_inside(
            [positions.first, positions.second],
            start,
            start + flattop,
        )
    }

    pub fn reset_hold_length(&self) -> i32 {
        match self.timing() {
            Timing::Parametric(p) => p.reset_hold_length,
            Timing::Manual => self.measured_reset_hold_length(),
        }
    }

    fn measured_reset_hold_length(&self) -> i32 {
        let (time, offset) = self.reset_time_and_offset();
        if time == 0 {
            return 0;
        }
        let positions = self.hold_positions();
        hold_inside([positions.first, positions.second], offset, offset + time)
    }

    /// Distance from the end of the last integration to the ramp start,
    /// measured on the lines.
    pub fn ramp_integ_offset(&self) -> i32 {
        let c = self.fast_cycle_length();
        let first_integ_offset = self.first_integ_offset();
        let time = self.measured_integration_time(false);
        let integration_end = if self.mode == OperatingMode::SingleIntegration {
            first_integ_offset + time
        } else {
            first_integ_offset + self.measured_flattop_length() + 2 * time
        };
        let offset = self.ramp_position() - integration_end;
        if offset < 0 { offset + c } else { offset }
    }

    /// Whether the flip line has a single phase, or the mode ignores it.
    pub fn has_one_flip_phase(&self) -> bool {
        let count = self.lines.phase_count(Line::Flip);
        if count == 1 || matches!(self.mode, OperatingMode::Reset | OperatingMode::Buffer) {
            return true;
        }
        if count != 3 && self.mode != OperatingMode::ExternalLatch {
            warn!("Flip line has {} phases, expected 1 or 3", count);
        }
        false
    }

    /// Operating mode implied by the phase counts of the lines.
    pub fn infer_mode(&self) -> OperatingMode {
        let count = |line| self.lines.phase_count(line);
        let flip = count(Line::Flip);
        let swin = count(Line::SwitchIn);
        if flip == 3 || count(Line::Ramp) == 1 {
            return OperatingMode::Manual;
        }
        if count(Line::Reset) == 1 {
            return match flip {
                2 => OperatingMode::ExternalLatch,
                1 if swin == 1 => OperatingMode::Buffer,
                _ => OperatingMode::Manual,
            };
        }
        match flip {
            1 if swin == 1 => OperatingMode::Reset,
            1 if swin <= 3 => OperatingMode::SingleIntegration,
            1 => OperatingMode::Manual,
            _ if swin <= 3 => OperatingMode::SingleIntegration,
            _ => OperatingMode::Normal,
        }
    }

    /// Fill the stored parameters from the measured waveforms.
    pub fn init_parameters_from_lines(&mut self) {
        let values = DERIVED.map(|name| {
            let value = match name {
                ParamName::IntegrationLength => self.measured_integration_time(false),
                ParamName::FlattopLength => self.measured_flattop_length(),
                ParamName::FlattopHoldLength => self.measured_flattop_hold_length(),
                ParamName::ResetLength => self.measured_reset_length(),
                ParamName::ResetIntegOffset => self.measured_reset_integ_offset(),
                ParamName::ResetHoldLength => self.measured_reset_hold_length(),
                ParamName::RampLength => self.lines[Line::Ramp].high_lengths().sum(),
                _ => self.ramp_integ_offset(),
            };
            (name, value)
        });
        for (name, value) in values {
            self.store_parameter(name, value);
        }
    }

    /// Distance from the reset to the ramp, wrapped into the cycle.
    pub fn reset_to_ramp_diff(&self) -> i32 {
        let c = self.fast_cycle_length();
        let (time, offset) = self.reset_time_and_offset();
        let diff = offset - self.ramp_position();
        if diff < 0 && diff.abs() < time && self.mode != OperatingMode::Buffer {
            error!("Ramp rises during the reset, this is not a valid operating mode");
        }
        diff.rem_euclid(c)
    }

    pub(crate) fn adapt_flip_to_single_cap(&mut self) {
        let diff = self.reset_to_ramp_diff();
        self.params.back_flip_at_reset = 2;
        if self.params.back_flip_to_reset_offset >= diff {
            self.params.back_flip_to_reset_offset = (diff - 1).max(0);
        }
    }

    pub fn max_integration_time(&self) -> i32 {
        (self.lines[Line::Reset].phase(0) - 5) / 2 + self.integration_time(true) - 5
    }

    pub fn max_reset_wait(&self) -> i32 {
        let (time, offset) = self.reset_time_and_offset();
        let wait = self.fast_cycle_length()
            - 15
            - time
            - offset
            - self.flattop_length()
            - 2 * self.integration_time(true);
        if wait <= 0 {
            error!("No time left between reset and integration: {}", wait);
        }
        wait
    }

    pub fn max_flattop_length(&self) -> i32 {
        let ramp_offset = self.parameter(ParamName::RampOffset);
        self.fast_cycle_length()
            - 2 * self.integration_time(true)
            - self.reset_length()
            - self.reset_integ_offset()
            - ramp_offset
    }

    pub fn max_ramp_integ_offset(&self) -> i32 {
        self.fast_cycle_length() - self.ramp_length() - 1
    }

    pub fn max_reset_integ_offset(&self) -> i32 {
        self.first_integ_offset() - self.reset_length() - 2
    }

    pub fn max_back_flip_to_reset_offset(&self) -> i32 {
        let (_, offset) = self.reset_time_and_offset();
        let diff = self.reset_to_ramp_diff();
        (diff - 1).min(offset - 1).max(0)
    }

    /// Distance from the ramp start to the flip edge in external latch mode.
    pub fn ext_latch_slot(&self) -> i32 {
        if self.mode != OperatingMode::ExternalLatch {
            return 0;
        }
        let first_flip = self.first_flip_phase();
        if first_flip == self.fast_cycle_length() {
            return 0;
        }
        first_flip - self.ramp_position()
    }

    /// Move the flip edge to `slot` fast cycles after the ramp start.
    ///
    /// Only meaningful in external latch mode; ignored otherwise.
    pub fn set_ext_latch_slot(&mut self, slot: i32) -> Result<()> {
        if self.mode != OperatingMode::ExternalLatch {
            warn!("External latch slot is only used in {} mode", OperatingMode::ExternalLatch);
            return Ok(());
        }
        let low = i64::from(self.ramp_position() + slot);
        let phases = latch_flip(low, i64::from(self.fast_cycle_length()))?;
        self.set_phases(Line::Flip, &phases)?;
        self.ext_latch_slot = slot;
        Ok(())
    }

    /// Distance from the first flip edge to the first inject edge.
    pub fn inject_slot(&self) -> i32 {
        self.first_inject_length() - self.first_flip_phase()
    }

    pub fn set_inject_slot(&mut self, slot: i32) -> Result<()> {
        let low = i64::from(self.first_flip_phase() + slot);
        let phases = latch_flip(low, i64::from(self.fast_cycle_length()))?;
        self.set_phases(Line::Flip, &phases)
    }

    /// Set the integration length, bounded by [`SequenceConfig::max_integration_time`].
    pub fn set_integration_time(&mut self, time: i32) -> Result<()> {
        let max = self.max_integration_time();
        if time >= max {
            return Err(Error::InvalidParameter(format!(
                "Integration time {time} must be shorter than {max}"
            )));
        }
        self.set_parameter(
            ParamName::IntegrationLength,
            time,
            ParameterOptions::default(),
        )
    }
}
