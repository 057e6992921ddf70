// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Register codec for the DSSC sequence generator.
//!
//! A control line is described as a cyclic list of [`Phase`]s in fast clock
//! cycles. The sequence generator stores each line as 14 run-length encoded
//! [`PatternSlot`]s and extends the analog sampling instant with a 5 entry
//! hold register ([`HoldSlot`]). This crate converts between those
//! representations and the serial bit images shifted into the ASIC.

pub mod bits;
pub mod hold;
pub mod phase;
pub mod track;

pub use bits::{BitMismatch, RegisterBits};
pub use hold::{HoldAllocationError, HoldPositions, HoldRegister, HoldSlot, HoldWindow};
pub use phase::{Phase, merge_phases};
pub use track::{CompileError, PatternRegister, PatternSlot, compile, decompile};

/// Fast clock cycles per slow clock cycle, equal to the pattern width in bits.
pub const PATTERN_WIDTH: u32 = 7;
/// Number of pattern slots per control line.
pub const PATTERN_DEPTH: usize = 14;
/// Width of the repeat counter of a pattern slot.
pub const REPEAT_WIDTH: u32 = 5;
pub const MAX_REPEAT: u8 = (1 << REPEAT_WIDTH) - 1;
/// All seven pattern bits set.
pub const PATTERN_MASK: u8 = (1 << PATTERN_WIDTH) - 1;
/// Phase count above which a line is unusual and worth a warning.
pub const MAX_PHASES: usize = 6;
/// Shortest cycle (in slow clock cycles) that can fill all pattern slots.
pub const MIN_CYCLE_LENGTH: u32 = PATTERN_DEPTH as u32;

pub const HOLD_DEPTH: usize = 5;
pub const HOLD_WIDTH: u32 = 14;
pub const MAX_HOLD_SLOT_LENGTH: u32 = (1 << HOLD_WIDTH) - 1;
/// Longest hold a single window contributes to one register entry.
pub const MAX_HOLD_PER_SLOT: u32 = 1 << (HOLD_WIDTH - 1);

pub const TRACK_BITS: usize = PATTERN_DEPTH * (PATTERN_WIDTH + REPEAT_WIDTH) as usize;
pub const HOLD_BITS: usize = HOLD_DEPTH * (HOLD_WIDTH + 1) as usize;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    HoldAllocation(#[from] HoldAllocationError),

    #[error("{0}")]
    InvalidBits(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
