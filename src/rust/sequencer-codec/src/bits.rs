// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Serial bit images of the pattern and hold registers.
//!
//! Registers are shifted in with the last entry first. Every field is written
//! least significant bit first.

use bitvec::prelude::*;

use crate::hold::{HoldRegister, HoldSlot};
use crate::track::{PatternRegister, PatternSlot};
use crate::{
    Error, HOLD_BITS, HOLD_DEPTH, HOLD_WIDTH, PATTERN_DEPTH, PATTERN_WIDTH, REPEAT_WIDTH, Result,
    TRACK_BITS,
};

pub type RegisterBits = BitVec<u8, Lsb0>;

const SLOT_BITS: usize = (PATTERN_WIDTH + REPEAT_WIDTH) as usize;
const HOLD_ENTRY_BITS: usize = HOLD_WIDTH as usize + 1;

/// First difference between a compiled register image and a read-back.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Register content differs at bit {index}: expected {expected}, read {actual}")]
pub struct BitMismatch {
    /// Index of the first differing bit, or the read-back length if it is too short.
    pub index: usize,
    pub expected: String,
    pub actual: String,
}

fn write_field(bits: &mut BitSlice<u8, Lsb0>, offset: usize, value: u32, width: usize) {
    for i in 0..width {
        bits.set(offset + i, value & (1 << i) != 0);
    }
}

fn read_field(bits: &BitSlice<u8, Lsb0>, offset: usize, width: usize) -> u32 {
    (0..width)
        .filter(|&i| bits[offset + i])
        .fold(0, |value, i| value | (1 << i))
}

/// 168 bit image of a compiled line.
pub fn track_bits(slots: &PatternRegister) -> RegisterBits {
    let mut bits = bitvec![u8, Lsb0; 0; TRACK_BITS];
    for (i, slot) in slots.iter().enumerate() {
        let offset = (PATTERN_DEPTH - 1 - i) * SLOT_BITS;
        write_field(&mut bits, offset, u32::from(slot.repeat()), REPEAT_WIDTH as usize);
        write_field(
            &mut bits,
            offset + REPEAT_WIDTH as usize,
            u32::from(slot.pattern()),
            PATTERN_WIDTH as usize,
        );
    }
    bits
}

pub fn decode_track_bits(bits: &BitSlice<u8, Lsb0>) -> Result<PatternRegister> {
    if bits.len() < TRACK_BITS {
        return Err(Error::InvalidBits(format!(
            "Track image has {} bits, expected {TRACK_BITS}",
            bits.len()
        )));
    }
    let mut slots = [PatternSlot::default(); PATTERN_DEPTH];
    for (i, slot) in slots.iter_mut().enumerate() {
        let offset = (PATTERN_DEPTH - 1 - i) * SLOT_BITS;
        let repeat = read_field(bits, offset, REPEAT_WIDTH as usize);
        let pattern = read_field(bits, offset + REPEAT_WIDTH as usize, PATTERN_WIDTH as usize);
        *slot = PatternSlot::new(pattern, repeat)?;
    }
    Ok(slots)
}

/// 75 bit image of the hold register, all zero while holds are disabled.
pub fn hold_bits(register: &HoldRegister, enabled: bool) -> RegisterBits {
    let mut bits = bitvec![u8, Lsb0; 0; HOLD_BITS];
    if !enabled {
        return bits;
    }
    for (i, slot) in register.iter().rev().enumerate() {
        let offset = i * HOLD_ENTRY_BITS;
        write_field(&mut bits, offset, slot.length() - 1, HOLD_WIDTH as usize);
        bits.set(offset + HOLD_WIDTH as usize, slot.is_hold());
    }
    bits
}

pub fn decode_hold_bits(bits: &BitSlice<u8, Lsb0>) -> Result<HoldRegister> {
    if bits.len() < HOLD_BITS {
        return Err(Error::InvalidBits(format!(
            "Hold image has {} bits, expected {HOLD_BITS}",
            bits.len()
        )));
    }
    let mut slots = Vec::with_capacity(HOLD_DEPTH);
    for i in (0..HOLD_DEPTH).rev() {
        let offset = i * HOLD_ENTRY_BITS;
        let length = read_field(bits, offset, HOLD_WIDTH as usize) + 1;
        slots.push(HoldSlot::new(length, bits[offset + HOLD_WIDTH as usize])?);
    }
    Ok(crate::hold::to_register(&slots)?)
}

pub fn to_bit_string(bits: &BitSlice<u8, Lsb0>) -> String {
    bits.iter().map(|b| if *b { '1' } else { '0' }).collect()
}

pub fn from_bit_string(text: &str) -> Result<RegisterBits> {
    text.chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| match c {
            '0' => Ok(false),
            '1' => Ok(true),
            other => Err(Error::InvalidBits(format!("Unexpected character '{other}'"))),
        })
        .collect()
}

/// Compare a compiled image against bits read back from the ASIC.
///
/// Read-back bits beyond the image length are ignored.
pub fn compare(
    expected: &BitSlice<u8, Lsb0>,
    readback: &BitSlice<u8, Lsb0>,
) -> std::result::Result<(), BitMismatch> {
    let mismatch = |index| BitMismatch {
        index,
        expected: to_bit_string(expected),
        actual: to_bit_string(readback),
    };
    if readback.len() < expected.len() {
        return Err(mismatch(readback.len()));
    }
    match expected.iter().zip(readback.iter()).position(|(a, b)| *a != *b) {
        Some(index) => Err(mismatch(index)),
        None => Ok(()),
    }
}
