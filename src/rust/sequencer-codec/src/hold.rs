// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Hold register allocation.
//!
//! The hold generator counts slow cycles through 5 register entries. While an
//! entry flagged as hold is active, the sequence generator stops and the
//! analog sampling instant is extended. The non-hold entries must cover whole
//! sequencer cycles, otherwise the hold drifts against the pattern registers.

use serde::{Deserialize, Serialize};
use sequencer_log::{diagnostic, error, info, warn};

use crate::{HOLD_DEPTH, MAX_HOLD_PER_SLOT, MAX_HOLD_SLOT_LENGTH};

/// Entries a single window may be chained over.
const MAX_CHAINED_SLOTS: u32 = 3;
/// Shortest non-hold run at the end of the register.
const MIN_TRAILING_GAP: u32 = 3;
const MIN_HOLD_LENGTH: u32 = 2;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum HoldAllocationError {
    #[error("Hold position {position} exceeds the maximum of {max}")]
    PositionOutOfRange { position: u32, max: u32 },

    #[error("Hold length {length} exceeds the maximum of {max}")]
    LengthOutOfRange { length: u32, max: u32 },

    #[error("Hold windows need {entries} register entries, the register holds exactly {HOLD_DEPTH}")]
    DepthOverflow { entries: usize },

    #[error("Invalid hold window: {0}")]
    InvalidWindow(String),
}

/// One entry of the hold register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HoldSlot {
    length: u16,
    hold: bool,
}

pub type HoldRegister = [HoldSlot; HOLD_DEPTH];

impl HoldSlot {
    pub fn new(length: u32, hold: bool) -> Result<Self, HoldAllocationError> {
        if length == 0 || length > MAX_HOLD_SLOT_LENGTH {
            return Err(HoldAllocationError::LengthOutOfRange {
                length,
                max: MAX_HOLD_SLOT_LENGTH,
            });
        }
        Ok(HoldSlot {
            length: length as u16,
            hold,
        })
    }

    pub fn gap(length: u32) -> Result<Self, HoldAllocationError> {
        HoldSlot::new(length, false)
    }

    pub fn length(&self) -> u32 {
        u32::from(self.length)
    }

    pub fn is_hold(&self) -> bool {
        self.hold
    }
}

/// A hold window in slow cycles.
///
/// A window with zero length is inactive. Read-back reports inactive windows
/// at `cycle_length + 1`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldWindow {
    pub position: u32,
    pub length: u32,
}

impl HoldWindow {
    pub const fn new(position: u32, length: u32) -> Self {
        HoldWindow { position, length }
    }

    pub const fn inactive(cycle_length: u32) -> Self {
        HoldWindow::new(cycle_length + 1, 0)
    }

    pub fn is_active(&self) -> bool {
        self.length > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldPositions {
    pub first: HoldWindow,
    pub second: HoldWindow,
}

fn push_gap(entries: &mut Vec<(u32, bool)>, length: u32) {
    if length > 0 {
        entries.push((length, false));
    }
}

/// Split a hold window into entries of at most `MAX_HOLD_PER_SLOT`.
fn push_hold(entries: &mut Vec<(u32, bool)>, mut length: u32) {
    for _ in 0..MAX_CHAINED_SLOTS {
        if length <= MAX_HOLD_PER_SLOT {
            entries.push((length, true));
            return;
        }
        entries.push((MAX_HOLD_PER_SLOT, true));
        length -= MAX_HOLD_PER_SLOT;
    }
}

fn check_length(length: u32) -> Result<u32, HoldAllocationError> {
    let max = MAX_CHAINED_SLOTS * MAX_HOLD_PER_SLOT;
    if length > max {
        return Err(HoldAllocationError::LengthOutOfRange { length, max });
    }
    if length < MIN_HOLD_LENGTH {
        info!(
            "Hold length must not be smaller than {}. Set to {}",
            MIN_HOLD_LENGTH,
            MIN_HOLD_LENGTH
        );
        return Ok(MIN_HOLD_LENGTH);
    }
    Ok(length)
}

/// Compute the hold register for one or two hold windows.
///
/// The second window is ignored when its length or position is zero. In the
/// single window case the register is padded with unit-length gaps. Windows
/// longer than one register entry are chained over up to three entries; if the
/// chained windows cannot be fitted into exactly five entries the allocation
/// fails with [`HoldAllocationError::DepthOverflow`].
pub fn allocate(
    first: HoldWindow,
    second: HoldWindow,
    cycle_length: u32,
) -> Result<HoldRegister, HoldAllocationError> {
    let max_position = cycle_length.saturating_sub(MIN_TRAILING_GAP);
    if first.position > max_position {
        return Err(HoldAllocationError::PositionOutOfRange {
            position: first.position,
            max: max_position,
        });
    }
    let first_length = check_length(first.length)?;
    let single = second.length == 0 || second.position == 0;
    if !single && second.length + first_length > 1000 && cycle_length % 2 == 1 {
        warn!("Using long holds, set cycle length to an even number to not run out of sync");
    }

    let mut entries = Vec::with_capacity(HOLD_DEPTH + 2);
    push_gap(&mut entries, first.position);
    push_hold(&mut entries, first_length);
    let remaining = cycle_length - first.position;

    if single {
        let padding = HOLD_DEPTH.saturating_sub(entries.len() + 1) as u32;
        if remaining <= padding {
            return Err(HoldAllocationError::InvalidWindow(format!(
                "cycle length {cycle_length} leaves no gap after the hold at {}",
                first.position
            )));
        }
        push_gap(&mut entries, remaining - padding);
        entries.extend(std::iter::repeat_n((1, false), padding as usize));
    } else {
        let second_length = check_length(second.length)?;
        if second.position <= first.position + 1 || second.position > cycle_length {
            return Err(HoldAllocationError::InvalidWindow(format!(
                "second hold at {} must lie between {} and {cycle_length}",
                second.position,
                first.position + 2
            )));
        }
        push_gap(&mut entries, second.position - first.position - 1);
        push_hold(&mut entries, second_length);
        push_gap(&mut entries, cycle_length - second.position + 1);
    }

    finish(entries)
}

fn finish(mut entries: Vec<(u32, bool)>) -> Result<HoldRegister, HoldAllocationError> {
    if !repair_entries(&mut entries) {
        return Err(HoldAllocationError::DepthOverflow {
            entries: entries.len(),
        });
    }
    let mut register = [HoldSlot {
        length: 1,
        hold: false,
    }; HOLD_DEPTH];
    for (slot, (length, hold)) in register.iter_mut().zip(entries) {
        *slot = HoldSlot::new(length, hold)?;
    }
    for (i, slot) in register.iter().enumerate() {
        diagnostic!(
            "Hold entry {}: length {}, hold {}",
            i,
            slot.length(),
            slot.is_hold()
        );
    }
    Ok(register)
}

fn repair_entries(entries: &mut Vec<(u32, bool)>) -> bool {
    while entries.len() < HOLD_DEPTH {
        let Some(idx) = entries
            .iter()
            .position(|(length, hold)| !*hold && *length > 4)
        else {
            break;
        };
        entries[idx].0 -= 2;
        entries.insert(idx, (2, false));
    }
    while entries.len() > HOLD_DEPTH {
        let Some(idx) = entries.windows(2).position(|pair| {
            pair[0].1 == pair[1].1 && pair[0].0 + pair[1].0 <= MAX_HOLD_SLOT_LENGTH
        }) else {
            break;
        };
        entries[idx].0 += entries[idx + 1].0;
        entries.remove(idx + 1);
    }
    entries.len() == HOLD_DEPTH
}

/// Bring an externally constructed hold list to exactly five entries.
///
/// Gaps longer than 4 slow cycles are split to grow the list, adjacent
/// entries with the same hold flag are merged to shrink it. Hold entries are
/// never split. Non-hold and hold
/// totals are preserved. Returns whether the list now has five entries.
pub fn repair(slots: &mut Vec<HoldSlot>) -> bool {
    if slots.len() == HOLD_DEPTH {
        return true;
    }
    let mut entries: Vec<(u32, bool)> = slots.iter().map(|s| (s.length(), s.hold)).collect();
    let repaired = repair_entries(&mut entries);
    // Splitting and merging keep every entry within 1..=MAX_HOLD_SLOT_LENGTH.
    *slots = entries
        .into_iter()
        .map(|(length, hold)| HoldSlot {
            length: length as u16,
            hold,
        })
        .collect();
    repaired
}

/// Convert a repaired list into a register.
pub fn to_register(slots: &[HoldSlot]) -> Result<HoldRegister, HoldAllocationError> {
    slots
        .try_into()
        .map_err(|_| HoldAllocationError::DepthOverflow {
            entries: slots.len(),
        })
}

/// Check the register against the cycle length.
///
/// Non-fatal: problems are logged and reported through the return value.
pub fn validate(slots: &[HoldSlot], cycle_length: u32) -> bool {
    let gap_total: u32 = slots
        .iter()
        .filter(|s| !s.hold)
        .map(HoldSlot::length)
        .sum();
    if cycle_length == 0 || gap_total % cycle_length != 0 {
        warn!(
            "Hold register not in sync with cycle length: non-hold total {} for cycle length {}",
            gap_total,
            cycle_length
        );
        return false;
    }
    let trailing_gap: u32 = slots
        .iter()
        .rev()
        .take_while(|s| !s.hold)
        .map(HoldSlot::length)
        .sum();
    if trailing_gap < MIN_TRAILING_GAP {
        error!(
            "Last non-hold run of the hold register is {} slow cycles, it must be at least {}",
            trailing_gap,
            MIN_TRAILING_GAP
        );
        return false;
    }
    true
}

/// Five non-hold entries splitting the cycle evenly.
pub fn zero_holds(cycle_length: u32) -> Result<HoldRegister, HoldAllocationError> {
    let mean = cycle_length / HOLD_DEPTH as u32;
    if mean == 0 {
        return Err(HoldAllocationError::InvalidWindow(format!(
            "cycle length {cycle_length} is shorter than the hold register"
        )));
    }
    let mut entries = vec![(mean, false); HOLD_DEPTH - 1];
    entries.push((cycle_length - mean * (HOLD_DEPTH as u32 - 1), false));
    finish(entries)
}

/// Locate the first two hold runs of the register.
///
/// Positions count non-hold slow cycles. The second position also counts one
/// cycle per entry of the first hold run, matching what [`allocate`] expects.
pub fn find_hold_positions(slots: &[HoldSlot], cycle_length: u32, enabled: bool) -> HoldPositions {
    let inactive = HoldWindow::inactive(cycle_length);
    if !enabled {
        return HoldPositions {
            first: inactive,
            second: inactive,
        };
    }
    let mut iter = slots.iter().peekable();
    let mut take_run = |hold: bool| -> (u32, usize) {
        let mut total = 0;
        let mut count = 0;
        while let Some(slot) = iter.next_if(|s| s.hold == hold) {
            total += slot.length();
            count += 1;
        }
        (total, count)
    };
    let (first_position, _) = take_run(false);
    let (first_length, first_entries) = take_run(true);
    let (second_gap, _) = take_run(false);
    let (second_length, _) = take_run(true);

    let first = if first_length > 0 {
        HoldWindow::new(first_position, first_length)
    } else {
        inactive
    };
    let second = if second_length > 0 {
        HoldWindow::new(
            first_position + first_entries as u32 + second_gap,
            second_length,
        )
    } else {
        inactive
    };
    HoldPositions { first, second }
}

/// Rotate the register right by `shift` non-hold slow cycles.
///
/// A hold run reaching the end of the register moves to the front together
/// with the gap that follows it, so hold runs stay contiguous.
pub fn shift_holds_right(
    slots: &[HoldSlot],
    shift: u32,
) -> Result<HoldRegister, HoldAllocationError> {
    let mut entries: Vec<(u32, bool)> = slots.iter().map(|s| (s.length(), s.hold)).collect();
    let gap_total: u32 = entries.iter().filter(|e| !e.1).map(|e| e.0).sum();
    if gap_total == 0 {
        return finish(entries);
    }
    let mut shift = shift % gap_total;
    while shift > 0 {
        let Some(&(length, hold)) = entries.last() else {
            break;
        };
        if hold {
            entries.pop();
            entries.insert(0, (length, hold));
            continue;
        }
        let current = shift.min(length);
        match entries.first_mut() {
            Some(front) if !front.1 && front.0 + current <= MAX_HOLD_SLOT_LENGTH => {
                front.0 += current
            }
            _ => entries.insert(0, (current, false)),
        }
        let last = entries.len() - 1;
        entries[last].0 -= current;
        if entries[last].0 == 0 {
            entries.pop();
        }
        shift -= current;
    }
    finish(entries)
}

/// Total held slow cycles.
pub fn hold_cycles(slots: &[HoldSlot]) -> u32 {
    slots.iter().filter(|s| s.hold).map(HoldSlot::length).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn gap_total(slots: &[HoldSlot]) -> u32 {
        slots.iter().filter(|s| !s.is_hold()).map(HoldSlot::length).sum()
    }

    fn entries(slots: &[HoldSlot]) -> Vec<(u32, bool)> {
        slots.iter().map(|s| (s.length(), s.is_hold())).collect()
    }

    #[test]
    fn test_single_window() {
        let register = allocate(HoldWindow::new(10, 50), HoldWindow::default(), 200).unwrap();
        assert_eq!(
            entries(&register),
            vec![(10, false), (50, true), (188, false), (1, false), (1, false)]
        );
        assert!(validate(&register, 200));
        assert_eq!(hold_cycles(&register), 50);
    }

    #[test]
    fn test_validate_non_hold_total() {
        let register = allocate(HoldWindow::new(10, 50), HoldWindow::default(), 150).unwrap();
        assert_eq!(gap_total(&register), 150);
        assert!(!validate(&register, 200));
        assert!(validate(&register, 150));
    }

    #[test]
    fn test_single_window_at_start() {
        let register = allocate(HoldWindow::new(0, 1), HoldWindow::default(), 50).unwrap();
        assert_eq!(
            entries(&register),
            vec![(2, true), (47, false), (1, false), (1, false), (1, false)]
        );
    }

    #[test]
    fn test_chained_single_window() {
        let register = allocate(HoldWindow::new(5, 20000), HoldWindow::default(), 100).unwrap();
        assert_eq!(
            entries(&register),
            vec![
                (5, false),
                (8192, true),
                (8192, true),
                (3616, true),
                (95, false)
            ]
        );
        assert_eq!(hold_cycles(&register), 20000);
    }

    #[test]
    fn test_two_windows() {
        let register = allocate(HoldWindow::new(4, 150), HoldWindow::new(30, 3000), 50).unwrap();
        assert_eq!(
            entries(&register),
            vec![(4, false), (150, true), (25, false), (3000, true), (21, false)]
        );
        let positions = find_hold_positions(&register, 50, true);
        assert_eq!(positions.first, HoldWindow::new(4, 150));
        assert_eq!(positions.second, HoldWindow::new(30, 3000));
    }

    #[test]
    fn test_two_windows_from_start_split_gap() {
        let register = allocate(HoldWindow::new(0, 10), HoldWindow::new(20, 10), 50).unwrap();
        assert_eq!(
            entries(&register),
            vec![(10, true), (2, false), (17, false), (10, true), (31, false)]
        );
        assert_eq!(gap_total(&register), 50);
        assert_eq!(hold_cycles(&register), 20);
    }

    #[test]
    fn test_repair_keeps_holds() {
        let mut slots = vec![
            HoldSlot::new(30, true).unwrap(),
            HoldSlot::new(3, false).unwrap(),
            HoldSlot::new(20, true).unwrap(),
            HoldSlot::new(9, false).unwrap(),
        ];
        assert!(repair(&mut slots));
        assert_eq!(
            entries(&slots),
            vec![(30, true), (3, false), (20, true), (2, false), (7, false)]
        );

        let mut slots = vec![
            HoldSlot::new(30, true).unwrap(),
            HoldSlot::new(3, false).unwrap(),
            HoldSlot::new(20, true).unwrap(),
            HoldSlot::new(4, false).unwrap(),
        ];
        assert!(!repair(&mut slots));
        assert_eq!(hold_cycles(&slots), 50);
        assert!(slots.iter().filter(|s| s.is_hold()).all(|s| s.length() >= 20));
    }

    #[test]
    fn test_two_long_windows_overflow() {
        assert_eq!(
            allocate(HoldWindow::new(4, 20000), HoldWindow::new(30, 20000), 50),
            Err(HoldAllocationError::DepthOverflow { entries: 7 })
        );
    }

    #[test]
    fn test_allocate_errors() {
        assert_eq!(
            allocate(HoldWindow::new(48, 10), HoldWindow::default(), 50),
            Err(HoldAllocationError::PositionOutOfRange {
                position: 48,
                max: 47
            })
        );
        assert_eq!(
            allocate(HoldWindow::new(1, 24577), HoldWindow::default(), 50),
            Err(HoldAllocationError::LengthOutOfRange {
                length: 24577,
                max: 24576
            })
        );
        assert!(matches!(
            allocate(HoldWindow::new(10, 10), HoldWindow::new(11, 10), 50),
            Err(HoldAllocationError::InvalidWindow(_))
        ));
    }

    #[test]
    fn test_repair_grows_and_shrinks() {
        let mut short = vec![
            HoldSlot::new(10, false).unwrap(),
            HoldSlot::new(3, true).unwrap(),
            HoldSlot::new(40, false).unwrap(),
            HoldSlot::new(3, false).unwrap(),
        ];
        assert!(repair(&mut short));
        assert_eq!(
            entries(&short),
            vec![(2, false), (8, false), (3, true), (40, false), (3, false)]
        );

        let mut long = vec![
            HoldSlot::new(10, false).unwrap(),
            HoldSlot::new(3, true).unwrap(),
            HoldSlot::new(4, true).unwrap(),
            HoldSlot::new(20, false).unwrap(),
            HoldSlot::new(17, false).unwrap(),
            HoldSlot::new(3, false).unwrap(),
        ];
        assert!(repair(&mut long));
        assert_eq!(long.len(), 5);
        assert_eq!(gap_total(&long), 50);
        assert_eq!(hold_cycles(&long), 7);
    }

    #[test]
    fn test_repair_impossible() {
        let mut slots = vec![HoldSlot::new(3, false).unwrap(), HoldSlot::new(2, true).unwrap()];
        assert!(!repair(&mut slots));
        assert!(to_register(&slots).is_err());
    }

    #[test]
    fn test_validate_trailing_gap() {
        let slots = [
            HoldSlot::new(40, false).unwrap(),
            HoldSlot::new(5, true).unwrap(),
            HoldSlot::new(4, false).unwrap(),
            HoldSlot::new(5, true).unwrap(),
            HoldSlot::new(6, false).unwrap(),
        ];
        assert!(validate(&slots, 50));
        let slots = [
            HoldSlot::new(40, false).unwrap(),
            HoldSlot::new(5, true).unwrap(),
            HoldSlot::new(8, false).unwrap(),
            HoldSlot::new(5, true).unwrap(),
            HoldSlot::new(2, false).unwrap(),
        ];
        assert!(!validate(&slots, 50));
    }

    #[test]
    fn test_zero_holds() {
        let register = zero_holds(53).unwrap();
        assert_eq!(
            entries(&register),
            vec![
                (10, false),
                (10, false),
                (10, false),
                (10, false),
                (13, false)
            ]
        );
        let positions = find_hold_positions(&register, 53, true);
        assert_eq!(positions.first, HoldWindow::inactive(53));
        assert!(!positions.second.is_active());
        assert!(zero_holds(4).is_err());
    }

    #[test]
    fn test_find_positions_disabled() {
        let register = allocate(HoldWindow::new(10, 50), HoldWindow::default(), 200).unwrap();
        let positions = find_hold_positions(&register, 200, false);
        assert_eq!(positions.first, HoldWindow::new(201, 0));
        assert_eq!(positions.second, HoldWindow::new(201, 0));
        let positions = find_hold_positions(&register, 200, true);
        assert_eq!(positions.first, HoldWindow::new(10, 50));
        assert!(!positions.second.is_active());
    }

    #[test]
    fn test_shift_holds_right() {
        let register = allocate(HoldWindow::new(10, 5), HoldWindow::new(21, 5), 25).unwrap();
        assert_eq!(
            entries(&register),
            vec![(10, false), (5, true), (10, false), (5, true), (5, false)]
        );
        let shifted = shift_holds_right(&register, 3).unwrap();
        assert_eq!(
            entries(&shifted),
            vec![(13, false), (5, true), (10, false), (5, true), (2, false)]
        );
        let shifted = shift_holds_right(&register, 7).unwrap();
        assert_eq!(
            entries(&shifted),
            vec![(2, false), (5, true), (15, false), (5, true), (8, false)]
        );
        assert_eq!(gap_total(&shifted), 25);
        assert_eq!(hold_cycles(&shifted), 10);
    }

    #[test]
    fn test_hold_slot_range() {
        assert!(HoldSlot::new(0, false).is_err());
        assert!(HoldSlot::new(MAX_HOLD_SLOT_LENGTH, true).is_ok());
        assert!(HoldSlot::new(MAX_HOLD_SLOT_LENGTH + 1, true).is_err());
    }

    proptest! {
        #[test]
        fn test_single_window_always_fits(
            cycle_length in 14u32..4000,
            position in 0u32..4000,
            length in 0u32..=24576,
        ) {
            let position = position % (cycle_length - 2);
            let register = allocate(
                HoldWindow::new(position, length),
                HoldWindow::default(),
                cycle_length,
            )
            .unwrap();
            prop_assert_eq!(gap_total(&register), cycle_length);
            prop_assert!(validate(&register, cycle_length));
        }

        #[test]
        fn test_two_windows_keep_cycle(
            cycle_length in 14u32..4000,
            first in 0u32..2000,
            second in 0u32..2000,
            first_length in 0u32..MAX_HOLD_PER_SLOT,
            second_length in 1u32..MAX_HOLD_PER_SLOT,
        ) {
            let first = first % (cycle_length / 2);
            let second = first + 2 + second % (cycle_length - first - 1);
            let register = allocate(
                HoldWindow::new(first, first_length),
                HoldWindow::new(second, second_length),
                cycle_length,
            )
            .unwrap();
            prop_assert_eq!(gap_total(&register), cycle_length);
            prop_assert_eq!(
                hold_cycles(&register),
                first_length.max(2) + second_length.max(2)
            );
        }
    }
}
