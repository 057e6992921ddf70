// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Settings for constructing a sequencer configuration.

use sequencer_codec::{MAX_HOLD_SLOT_LENGTH, MIN_CYCLE_LENGTH};

use crate::Result;

#[derive(Debug, Clone)]
pub struct SanitizationChange {
    pub field: &'static str,
    pub original: String,
    pub sanitized: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequencerSettings {
    /// Slow clock cycles per readout cycle.
    pub cycle_length: u32,
    pub hold_enabled: bool,
    /// Extend the integration with the hold windows.
    pub int_time_extension: bool,
    /// Log register dumps while compiling.
    pub diagnostics: bool,
}

impl Default for SequencerSettings {
    fn default() -> Self {
        SequencerSettings {
            cycle_length: 50,
            hold_enabled: false,
            int_time_extension: false,
            diagnostics: false,
        }
    }
}

impl SequencerSettings {
    pub fn sanitize(&mut self) -> Result<Vec<SanitizationChange>> {
        let mut changes = vec![];
        let cycle_length = self
            .cycle_length
            .clamp(MIN_CYCLE_LENGTH, MAX_HOLD_SLOT_LENGTH);
        if cycle_length != self.cycle_length {
            changes.push(SanitizationChange {
                field: "cycle_length",
                original: self.cycle_length.to_string(),
                sanitized: cycle_length.to_string(),
                reason: format!(
                    "Outside of {MIN_CYCLE_LENGTH}..={MAX_HOLD_SLOT_LENGTH} slow cycles."
                ),
            });
            self.cycle_length = cycle_length;
        }
        if self.int_time_extension && !self.hold_enabled {
            changes.push(SanitizationChange {
                field: "int_time_extension",
                original: true.to_string(),
                sanitized: false.to_string(),
                reason: "Holds are disabled.".to_string(),
            });
            self.int_time_extension = false;
        }
        Ok(changes)
    }
}
