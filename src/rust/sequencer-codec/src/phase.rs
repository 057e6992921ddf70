// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};

/// One constant-level segment of a control line, measured in fast clock cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Phase {
    pub high: bool,
    pub fast_cycles: u32,
}

impl Phase {
    pub const fn new(high: bool, fast_cycles: u32) -> Self {
        Phase { high, fast_cycles }
    }

    pub const fn high(fast_cycles: u32) -> Self {
        Phase::new(true, fast_cycles)
    }

    pub const fn low(fast_cycles: u32) -> Self {
        Phase::new(false, fast_cycles)
    }
}

/// Combine consecutive phases of the same level and drop empty phases.
pub fn merge_phases(phases: &[Phase]) -> Vec<Phase> {
    let mut merged: Vec<Phase> = Vec::with_capacity(phases.len());
    for phase in phases.iter().filter(|p| p.fast_cycles > 0) {
        match merged.last_mut() {
            Some(last) if last.high == phase.high => last.fast_cycles += phase.fast_cycles,
            _ => merged.push(*phase),
        }
    }
    merged
}

pub fn total_fast_cycles(phases: &[Phase]) -> u64 {
    phases.iter().map(|p| u64::from(p.fast_cycles)).sum()
}

/// Rotate a cyclic phase list to the right.
///
/// The tail of the list wraps around to the front, so the waveform is delayed
/// by `shift` fast cycles while its total length stays the same. Lists with a
/// single phase are level over the whole cycle and stay untouched.
pub fn shift_right(phases: &mut Vec<Phase>, mut shift: u64) {
    if phases.len() <= 1 {
        return;
    }
    let total = total_fast_cycles(phases);
    if total == 0 {
        return;
    }
    shift %= total;
    while shift > 0 {
        let Some(back) = phases.last().copied() else {
            break;
        };
        let current = shift.min(u64::from(back.fast_cycles)) as u32;
        if phases[0].high == back.high {
            phases[0].fast_cycles += current;
        } else {
            phases.insert(0, Phase::new(back.high, current));
        }
        let last = phases.len() - 1;
        phases[last].fast_cycles -= current;
        if phases[last].fast_cycles == 0 {
            phases.pop();
        }
        shift -= u64::from(current);
    }
}

/// Rotate by a signed amount; negative values rotate to the left.
pub fn rotate(phases: &mut Vec<Phase>, shift: i64) {
    let total = total_fast_cycles(phases) as i64;
    if total == 0 {
        return;
    }
    shift_right(phases, shift.rem_euclid(total) as u64);
}

/// Expand phases into one level per fast cycle.
pub fn fast_cycle_levels(phases: &[Phase]) -> Vec<bool> {
    phases
        .iter()
        .flat_map(|p| std::iter::repeat_n(p.high, p.fast_cycles as usize))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_phases() {
        let phases = [
            Phase::low(3),
            Phase::low(4),
            Phase::high(0),
            Phase::low(2),
            Phase::high(5),
            Phase::high(1),
        ];
        assert_eq!(merge_phases(&phases), vec![Phase::low(9), Phase::high(6)]);
        assert!(merge_phases(&[]).is_empty());
        assert!(merge_phases(&[Phase::high(0)]).is_empty());
    }

    #[test]
    fn test_shift_right_wraps_tail() {
        let mut phases = vec![Phase::low(10), Phase::high(5), Phase::low(6)];
        shift_right(&mut phases, 8);
        // Low tail of 6 merges into the front, 2 cycles of the high phase follow it.
        assert_eq!(
            phases,
            vec![Phase::high(2), Phase::low(16), Phase::high(3)]
        );
        assert_eq!(total_fast_cycles(&phases), 21);
    }

    #[test]
    fn test_shift_preserves_waveform() {
        let original = vec![Phase::high(3), Phase::low(7), Phase::high(4)];
        let levels = fast_cycle_levels(&original);
        for shift in 0..30 {
            let mut shifted = original.clone();
            shift_right(&mut shifted, shift);
            let total = levels.len();
            let expected: Vec<bool> = (0..total)
                .map(|i| levels[(i + total - (shift as usize % total)) % total])
                .collect();
            assert_eq!(fast_cycle_levels(&shifted), expected, "shift {shift}");
        }
    }

    #[test]
    fn test_rotate_negative() {
        let mut phases = vec![Phase::high(3), Phase::low(11)];
        rotate(&mut phases, -3);
        assert_eq!(merge_phases(&phases), vec![Phase::low(11), Phase::high(3)]);
    }

    #[test]
    fn test_shift_single_phase_is_noop() {
        let mut phases = vec![Phase::high(70)];
        shift_right(&mut phases, 13);
        assert_eq!(phases, vec![Phase::high(70)]);
    }
}
