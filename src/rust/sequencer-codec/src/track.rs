// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Pattern register compiler for a single control line.
//!
//! The sequence generator replays a line from 14 slots. Each slot holds a
//! 7 bit pattern, one bit per fast clock cycle of a slow clock cycle, and a
//! 5 bit repeat count. A slot with repeat count `r` plays its pattern `r + 1`
//! times. The compiler turns a phase list into exactly 14 slots whose
//! repetitions add up to the sequence length.

use serde::{Deserialize, Serialize};
use sequencer_log::{diagnostic, warn};

use crate::phase::{Phase, merge_phases, total_fast_cycles};
use crate::{
    MAX_PHASES, MAX_REPEAT, MIN_CYCLE_LENGTH, PATTERN_DEPTH, PATTERN_MASK, PATTERN_WIDTH,
    REPEAT_WIDTH,
};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("Phase list spans {fast_cycles} fast cycles, which is not a multiple of 7")]
    NotFastCycleAligned { fast_cycles: u64 },

    #[error("Cycle length of {cycle_length} is shorter than the {MIN_CYCLE_LENGTH} pattern slots")]
    CycleTooShort { cycle_length: u32 },

    #[error(
        "Sequence length of {sequence_length} slow cycles is not a multiple of the cycle length {cycle_length}"
    )]
    NotCycleMultiple {
        sequence_length: u64,
        cycle_length: u32,
    },

    /// Compilation stops at the first slot beyond the register depth, so
    /// `slots` is at most `PATTERN_DEPTH + 1`.
    #[error("Phase list needs {slots} pattern slots, the register holds exactly {PATTERN_DEPTH}")]
    DepthMismatch { slots: usize },

    #[error("Repeat counts sum to {actual} slow cycles but the sequence is {expected} long")]
    LengthMismatch { expected: u64, actual: u64 },

    #[error("{field} value {value} does not fit into {bits} bits")]
    WidthOverflow {
        field: &'static str,
        value: u32,
        bits: u32,
    },
}

/// One entry of the pattern register.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PatternSlot {
    pattern: u8,
    repeat: u8,
}

pub type PatternRegister = [PatternSlot; PATTERN_DEPTH];

impl PatternSlot {
    /// Create a slot, rejecting values wider than the register fields.
    pub fn new(pattern: u32, repeat: u32) -> Result<Self, CompileError> {
        if pattern > u32::from(PATTERN_MASK) {
            return Err(CompileError::WidthOverflow {
                field: "pattern",
                value: pattern,
                bits: PATTERN_WIDTH,
            });
        }
        if repeat > u32::from(MAX_REPEAT) {
            return Err(CompileError::WidthOverflow {
                field: "repeat",
                value: repeat,
                bits: REPEAT_WIDTH,
            });
        }
        Ok(PatternSlot {
            pattern: pattern as u8,
            repeat: repeat as u8,
        })
    }

    pub fn pattern(&self) -> u8 {
        self.pattern
    }

    pub fn repeat(&self) -> u8 {
        self.repeat
    }

    /// Slow cycles covered by this slot.
    pub fn slow_cycles(&self) -> u64 {
        u64::from(self.repeat) + 1
    }

    /// The level of the slot if all its pattern bits are equal.
    pub fn uniform_level(&self) -> Option<bool> {
        match self.pattern {
            0 => Some(false),
            PATTERN_MASK => Some(true),
            _ => None,
        }
    }
}

/// Length of a phase list in slow cycles.
pub fn sequence_length(phases: &[Phase]) -> Result<u64, CompileError> {
    let fast_cycles = total_fast_cycles(phases);
    if fast_cycles % u64::from(PATTERN_WIDTH) != 0 {
        return Err(CompileError::NotFastCycleAligned { fast_cycles });
    }
    Ok(fast_cycles / u64::from(PATTERN_WIDTH))
}

/// Collects slots while rationing repeat counts.
///
/// `budget` is the number of slow cycles that can still be spent on repeats
/// without leaving later phases short of slots. It starts at the sequence
/// length minus the register depth, since every slot covers one slow cycle
/// even with a repeat count of zero.
struct SlotWriter {
    slots: Vec<PatternSlot>,
    budget: i64,
}

impl SlotWriter {
    fn new(sequence_length: u64) -> Self {
        SlotWriter {
            slots: Vec::with_capacity(PATTERN_DEPTH),
            budget: sequence_length as i64 - PATTERN_DEPTH as i64,
        }
    }

    fn push(&mut self, pattern: u8, repeat: i64) -> Result<(), CompileError> {
        if self.slots.len() == PATTERN_DEPTH {
            return Err(CompileError::DepthMismatch {
                slots: PATTERN_DEPTH + 1,
            });
        }
        // `repeat` never exceeds MAX_REPEAT here, see `push_aligned`.
        self.slots.push(PatternSlot::new(
            u32::from(pattern),
            repeat as u32,
        )?);
        self.budget -= repeat;
        Ok(())
    }

    /// Emit `repeat + 1` slow cycles of `pattern`.
    ///
    /// Requests that exceed the register width or the remaining budget are
    /// spread over several slots.
    fn push_aligned(&mut self, pattern: u8, mut repeat: i64) -> Result<(), CompileError> {
        let max_repeat = i64::from(MAX_REPEAT);
        if repeat <= max_repeat && repeat < self.budget {
            return self.push(pattern, repeat);
        }
        while repeat >= max_repeat && self.budget >= max_repeat {
            self.push(pattern, max_repeat)?;
            repeat -= max_repeat + 1;
        }
        while repeat >= 0 {
            let chunk = repeat.min(self.budget.max(0));
            self.push(pattern, chunk)?;
            repeat -= chunk + 1;
        }
        Ok(())
    }
}

/// Compile a phase list into the pattern register of one line.
///
/// # Arguments
///
/// * `phases` - The waveform; consecutive phases of equal level are merged first.
/// * `cycle_length` - Cycle length in slow cycles. The phase list may cover
///   several cycles, but always a whole number of them.
///
/// # Returns
///
/// Exactly 14 slots whose repeat counts (plus one each) sum to the sequence
/// length, or the first constraint that could not be met.
pub fn compile(phases: &[Phase], cycle_length: u32) -> Result<PatternRegister, CompileError> {
    let phases = merge_phases(phases);
    if phases.len() > MAX_PHASES {
        warn!(
            "Line has {} phases, more than the {} the register is laid out for",
            phases.len(),
            MAX_PHASES
        );
    }
    if cycle_length < MIN_CYCLE_LENGTH {
        return Err(CompileError::CycleTooShort { cycle_length });
    }
    let sequence_length = sequence_length(&phases)?;
    if sequence_length % u64::from(cycle_length) != 0 {
        return Err(CompileError::NotCycleMultiple {
            sequence_length,
            cycle_length,
        });
    }

    let width = PATTERN_WIDTH as i64;
    let mut writer = SlotWriter::new(sequence_length);
    // Fast cycles still missing from the pending slow cycle, filled from bit 6 down.
    let mut left_in_pending: i64 = 0;
    let mut pending: u8 = 0;

    for phase in &phases {
        let mut cycles = i64::from(phase.fast_cycles);
        if left_in_pending > cycles {
            left_in_pending -= cycles;
            if phase.high {
                pending |= (((1u32 << cycles) - 1) << left_in_pending) as u8;
            }
            continue;
        }
        if left_in_pending > 0 {
            if phase.high {
                pending |= ((1u32 << left_in_pending) - 1) as u8;
            }
            writer.push_aligned(pending, 0)?;
            cycles -= left_in_pending;
        }

        let level = if phase.high { PATTERN_MASK } else { 0 };
        let repeat = cycles / width - 1;
        if repeat >= 0 {
            writer.push_aligned(level, repeat)?;
        }

        let rest = cycles % width;
        if rest > 0 {
            left_in_pending = width - rest;
            pending = if phase.high {
                (((1u32 << rest) - 1) << left_in_pending) as u8
            } else {
                0
            };
        } else {
            left_in_pending = 0;
            pending = 0;
        }
    }

    let slots = writer.slots;
    for (i, slot) in slots.iter().enumerate() {
        diagnostic!(
            "Slot {}: pattern {:07b}, repeat {}",
            i,
            slot.pattern(),
            slot.repeat()
        );
    }
    let actual: u64 = slots.iter().map(PatternSlot::slow_cycles).sum();
    if actual != sequence_length {
        return Err(CompileError::LengthMismatch {
            expected: sequence_length,
            actual,
        });
    }
    let count = slots.len();
    slots
        .try_into()
        .map_err(|_| CompileError::DepthMismatch { slots: count })
}

/// Reconstruct the merged phase list from pattern slots.
pub fn decompile(slots: &[PatternSlot]) -> Vec<Phase> {
    let width = PATTERN_WIDTH;
    let mut phases = Vec::new();
    for slot in slots {
        match slot.uniform_level() {
            Some(high) => phases.push(Phase::new(high, slot.slow_cycles() as u32 * width)),
            None => {
                for _ in 0..slot.slow_cycles() {
                    for bit in (0..width).rev() {
                        phases.push(Phase::new(slot.pattern() & (1 << bit) != 0, 1));
                    }
                }
            }
        }
    }
    merge_phases(&phases)
}
