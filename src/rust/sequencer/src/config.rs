// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use std::path::{Path, PathBuf};

use bitvec::prelude::*;
use indexmap::IndexMap;
use sequencer_codec::bits::{self, RegisterBits};
use sequencer_codec::hold::{self, HoldPositions, HoldRegister, HoldSlot, HoldWindow};
use sequencer_codec::track::sequence_length;
use sequencer_codec::{
    CompileError, HoldAllocationError, MAX_HOLD_SLOT_LENGTH, MIN_CYCLE_LENGTH, PATTERN_DEPTH,
    PatternRegister, PatternSlot, Phase, decompile,
};
use sequencer_log::{error, info, warn};

use crate::line::{Line, Lines, Track};
use crate::mode::OperatingMode;
use crate::params::{CycleParameters, ParamName};
use crate::readback::Timing;
use crate::settings::SequencerSettings;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParameterOptions {
    /// Derive and compile all lines after the change.
    pub regenerate: bool,
}

impl Default for ParameterOptions {
    fn default() -> Self {
        ParameterOptions { regenerate: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeOptions {
    /// Derive and compile all lines for the new mode.
    pub regenerate: bool,
}

impl Default for ModeOptions {
    fn default() -> Self {
        ModeOptions { regenerate: true }
    }
}

/// Complete sequencer state of one ASIC.
///
/// With `signals_compiler` set the lines are derived from the parameters
/// ([`SequenceConfig::generate`]); otherwise the current waveforms are refined
/// in place ([`SequenceConfig::adapt_tracks`]). In manual mode the phase lists
/// are authoritative and parameters are read back from them.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceConfig {
    pub(crate) cycle_length: u32,
    pub(crate) hold_enabled: bool,
    pub(crate) single_cap_mode: bool,
    pub(crate) int_time_extension: bool,
    pub(crate) mode: OperatingMode,
    pub(crate) signals_compiler: bool,
    pub(crate) params: CycleParameters,
    pub(crate) lines: Lines,
    pub(crate) holds: HoldRegister,
    pub(crate) ext_latch_slot: i32,
    pub(crate) good: bool,
    pub(crate) needs_rewrite: bool,
    pub(crate) path: Option<PathBuf>,
}

impl SequenceConfig {
    /// Default parameters in normal mode, generated and compiled.
    pub fn new() -> Result<Self> {
        SequenceConfig::with_settings(SequencerSettings::default())
    }

    pub fn with_settings(mut settings: SequencerSettings) -> Result<Self> {
        for change in settings.sanitize()? {
            warn!(
                "Setting {} changed from {} to {}: {}",
                change.field,
                change.original,
                change.sanitized,
                change.reason
            );
        }
        if settings.diagnostics {
            sequencer_log::init_logging(true);
        }
        let mut config = SequenceConfig::blank(settings.cycle_length)?;
        config.hold_enabled = settings.hold_enabled;
        config.int_time_extension = settings.int_time_extension;
        config.generate()?;
        config.good = true;
        Ok(config)
    }

    /// Configuration with default parameters and empty lines.
    pub(crate) fn blank(cycle_length: u32) -> Result<Self> {
        Ok(SequenceConfig {
            cycle_length,
            hold_enabled: false,
            single_cap_mode: false,
            int_time_extension: false,
            mode: OperatingMode::Normal,
            signals_compiler: true,
            params: CycleParameters::default(),
            lines: Lines::default(),
            holds: hold::zero_holds(cycle_length)?,
            ext_latch_slot: 10,
            good: false,
            needs_rewrite: false,
            path: None,
        })
    }

    pub fn cycle_length(&self) -> u32 {
        self.cycle_length
    }

    pub fn mode(&self) -> OperatingMode {
        self.mode
    }

    pub fn is_signals_compiler(&self) -> bool {
        self.signals_compiler
    }

    /// Select whether lines are derived from parameters or adapted in place.
    pub fn set_signals_compiler(&mut self, enabled: bool) {
        self.signals_compiler = enabled;
    }

    pub fn hold_enabled(&self) -> bool {
        self.hold_enabled
    }

    pub fn set_hold_enabled(&mut self, enabled: bool) {
        self.hold_enabled = enabled;
    }

    pub fn single_cap_mode(&self) -> bool {
        self.single_cap_mode
    }

    pub fn int_time_extension(&self) -> bool {
        self.int_time_extension
    }

    pub fn set_int_time_extension(&mut self, enabled: bool) {
        self.int_time_extension = enabled;
    }

    pub fn params(&self) -> &CycleParameters {
        &self.params
    }

    pub fn lines(&self) -> &Lines {
        &self.lines
    }

    pub fn line(&self, line: Line) -> &Track {
        &self.lines[line]
    }

    pub fn holds(&self) -> &HoldRegister {
        &self.holds
    }

    /// Whether the last load or generation produced a usable configuration.
    pub fn is_good(&self) -> bool {
        self.good
    }

    /// Whether the loaded description lacked fields and should be rewritten.
    pub fn needs_rewrite(&self) -> bool {
        self.needs_rewrite
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn set_parameter(
        &mut self,
        name: ParamName,
        value: i32,
        options: ParameterOptions,
    ) -> Result<()> {
        if value < 0 && name != ParamName::RightShift {
            return Err(Error::InvalidParameter(format!(
                "{name} must not be negative, got {value}"
            )));
        }
        info!("Setting sequencer parameter {} = {}", name, value);
        let snapshot = self.clone();
        match name {
            ParamName::CycleLength => self.set_cycle_length(value as u32)?,
            ParamName::SingleSHCapMode => self.set_single_cap_mode(value != 0),
            ParamName::BackFlipAtReset if value > 2 => {
                return Err(Error::InvalidParameter(format!(
                    "{name} must be 0, 1 or 2, got {value}"
                )));
            }
            ParamName::ResetHoldLength | ParamName::FlattopHoldLength => {
                self.params.hold_pos = 0;
                self.store_parameter(name, value);
            }
            _ => self.store_parameter(name, value),
        }
        if options.regenerate {
            if let Err(err) = self.generate() {
                error!("{} = {} rejected: {}", name, value, err);
                *self = snapshot;
                return Err(err);
            }
        }
        Ok(())
    }

    pub(crate) fn store_parameter(&mut self, name: ParamName, value: i32) {
        if let Some(slot) = self.params.get_mut(name) {
            *slot = value;
        }
    }

    /// Current value of a parameter.
    ///
    /// In manual mode the timing parameters are read back from the lines.
    pub fn parameter(&self, name: ParamName) -> i32 {
        match name {
            ParamName::CycleLength => self.cycle_length as i32,
            ParamName::SingleSHCapMode => i32::from(self.single_cap_mode),
            ParamName::RampLength => self.ramp_length(),
            ParamName::ResetLength => self.reset_length(),
            ParamName::ResetHoldLength => self.reset_hold_length(),
            ParamName::ResetIntegOffset => self.reset_integ_offset(),
            ParamName::IntegrationLength => self.integration_time(false),
            ParamName::FlattopLength => self.flattop_length(),
            ParamName::FlattopHoldLength => self.flattop_hold_length(),
            ParamName::RampOffset => match self.timing() {
                Timing::Parametric(params) => params.ramp_offset,
                Timing::Manual => self.ramp_integ_offset(),
            },
            _ => self.params.get(name).unwrap_or_default(),
        }
    }

    pub fn parameter_map(&self) -> IndexMap<ParamName, i32> {
        ParamName::ALL
            .into_iter()
            .map(|name| (name, self.parameter(name)))
            .collect()
    }

    /// Change the cycle length. All compiled registers become stale.
    pub fn set_cycle_length(&mut self, cycle_length: u32) -> Result<()> {
        if !(MIN_CYCLE_LENGTH..=MAX_HOLD_SLOT_LENGTH).contains(&cycle_length) {
            return Err(Error::InvalidParameter(format!(
                "Cycle length {cycle_length} outside of {MIN_CYCLE_LENGTH}..={MAX_HOLD_SLOT_LENGTH}"
            )));
        }
        info!("Setting cycle length to {}", cycle_length);
        self.cycle_length = cycle_length;
        for (_, track) in self.lines.iter_mut() {
            track.invalidate();
        }
        Ok(())
    }

    pub fn set_single_cap_mode(&mut self, enabled: bool) {
        self.single_cap_mode = enabled;
        if enabled {
            self.adapt_flip_to_single_cap();
        }
    }

    pub fn set_operating_mode(&mut self, mode: OperatingMode, options: ModeOptions) -> Result<()> {
        self.mode = mode;
        let fast_cycle_length = self.fast_cycle_length();
        match mode {
            OperatingMode::Normal | OperatingMode::SingleIntegration => {
                self.params.ramp_offset = 20;
                if self.params.reset_length == fast_cycle_length {
                    self.params.reset_length = 14;
                }
            }
            OperatingMode::Reset => {
                self.params.ramp_offset =
                    fast_cycle_length - (self.flattop_length() + 2 * self.integration_time(false));
            }
            OperatingMode::ExternalLatch => self.ext_latch_slot = 10,
            OperatingMode::Buffer | OperatingMode::Manual | OperatingMode::DepfetHold => {}
        }
        info!("{} mode enabled", mode);

        if !options.regenerate || mode == OperatingMode::Manual {
            return Ok(());
        }
        if self.signals_compiler {
            self.generate()
        } else {
            self.adapt_tracks()
        }
    }

    /// Compile every line.
    ///
    /// All lines are attempted; failures are logged and the first one is
    /// returned.
    pub fn compile_all(&mut self) -> Result<()> {
        let cycle_length = self.cycle_length;
        let mut first_error = None;
        for (line, track) in self.lines.iter_mut() {
            if let Err(source) = track.compile(cycle_length) {
                error!("Line {} failed to compile: {}", line, source);
                first_error.get_or_insert(Error::Compile { line, source });
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn is_compiled(&self) -> bool {
        self.lines.iter().all(|(_, track)| track.is_compiled())
    }

    /// Replace the waveform of one line and compile it.
    ///
    /// The new phases are kept even when they do not compile.
    pub fn set_phases(&mut self, line: Line, phases: &[Phase]) -> Result<()> {
        let cycle_length = self.cycle_length;
        let track = &mut self.lines[line];
        track.set_phases(phases);
        track
            .compile(cycle_length)
            .map(|_| ())
            .map_err(|source| Error::Compile { line, source })
    }

    /// Write a register image of `(pattern, repeat)` entries directly.
    ///
    /// The phase list of the line is replaced by the decompiled image.
    pub fn set_register(&mut self, line: Line, entries: &[(u32, u32)]) -> Result<()> {
        let compile_error = |source| Error::Compile { line, source };
        if entries.len() != PATTERN_DEPTH {
            return Err(compile_error(CompileError::DepthMismatch {
                slots: entries.len(),
            }));
        }
        let slots = entries
            .iter()
            .map(|&(pattern, repeat)| PatternSlot::new(pattern, repeat))
            .collect::<Result<Vec<_>, _>>()
            .map_err(compile_error)?;
        let register: PatternRegister = slots
            .try_into()
            .map_err(|_| compile_error(CompileError::DepthMismatch { slots: entries.len() }))?;
        let phases = decompile(&register);
        let length = sequence_length(&phases).map_err(compile_error)?;
        if length % u64::from(self.cycle_length) != 0 {
            return Err(compile_error(CompileError::NotCycleMultiple {
                sequence_length: length,
                cycle_length: self.cycle_length,
            }));
        }
        self.lines[line].set_register(phases, register);
        Ok(())
    }

    /// Install an externally constructed hold list.
    ///
    /// Lists with more or fewer than five entries are repaired first. A
    /// register out of sync with the cycle length is accepted with a warning.
    pub fn set_holds(&mut self, slots: &[HoldSlot]) -> Result<()> {
        let mut slots = slots.to_vec();
        if !hold::repair(&mut slots) {
            return Err(HoldAllocationError::DepthOverflow {
                entries: slots.len(),
            }
            .into());
        }
        hold::validate(&slots, self.cycle_length);
        self.holds = hold::to_register(&slots)?;
        Ok(())
    }

    pub fn set_hold_positions(&mut self, first: HoldWindow, second: HoldWindow) -> Result<()> {
        self.holds = hold::allocate(first, second, self.cycle_length)?;
        Ok(())
    }

    pub fn hold_positions(&self) -> HoldPositions {
        hold::find_hold_positions(&self.holds, self.cycle_length, self.hold_enabled)
    }

    pub fn holds_valid(&self) -> bool {
        hold::validate(&self.holds, self.cycle_length)
    }

    /// Cycle length in slow cycles including the held cycles.
    pub fn real_cycle_length(&self) -> u32 {
        if self.hold_enabled {
            self.cycle_length + hold::hold_cycles(&self.holds)
        } else {
            self.cycle_length
        }
    }

    pub fn track_bits(&self, line: Line) -> Result<RegisterBits> {
        self.lines[line]
            .compiled()
            .map(bits::track_bits)
            .ok_or(Error::NotCompiled(line))
    }

    pub fn hold_bits(&self) -> RegisterBits {
        bits::hold_bits(&self.holds, self.hold_enabled)
    }

    /// Static value bit of every line, in line order.
    pub fn static_values(&self) -> RegisterBits {
        self.lines.iter().map(|(_, t)| t.static_value).collect()
    }

    /// Inverted hold bit of every line, in line order.
    pub fn inverted_holds(&self) -> RegisterBits {
        self.lines.iter().map(|(_, t)| t.invert_hold).collect()
    }

    pub fn compare_track(&self, line: Line, readback: &BitSlice<u8, Lsb0>) -> Result<()> {
        let expected = self.track_bits(line)?;
        bits::compare(&expected, readback).map_err(|mismatch| {
            warn!("Read-back of line {} differs at bit {}", line, mismatch.index);
            Error::Mismatch(mismatch)
        })
    }

    pub fn compare_holds(&self, readback: &BitSlice<u8, Lsb0>) -> Result<()> {
        bits::compare(&self.hold_bits(), readback).map_err(|mismatch| {
            warn!("Read-back of the hold register differs at bit {}", mismatch.index);
            Error::Mismatch(mismatch)
        })
    }

    pub(crate) fn fast_cycle_length(&self) -> i32 {
        (self.cycle_length * sequencer_codec::PATTERN_WIDTH) as i32
    }
}
