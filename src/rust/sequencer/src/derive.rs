// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Line derivation for the parametric operating modes.

use sequencer_codec::hold::{self, HoldRegister, HoldSlot};
use sequencer_codec::{PATTERN_WIDTH, Phase};
use sequencer_log::info;

use crate::config::SequenceConfig;
use crate::line::{Line, Lines};
use crate::mode::OperatingMode;
use crate::{Error, Result};

/// Phase length in fast cycles, failing on negative values.
pub(crate) fn length(value: i64, what: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| Error::Infeasible(format!("{what} would be {value} fast cycles")))
}

/// High window of `width` fast cycles starting at `position`.
///
/// A window running past the end of the cycle continues at its start.
pub(crate) fn window(position: i64, width: i64, total: i64, what: &str) -> Result<Vec<Phase>> {
    if total <= 0 || width > total {
        return Err(Error::Infeasible(format!(
            "{what} of {width} fast cycles does not fit into a cycle of {total}"
        )));
    }
    let position = position.rem_euclid(total);
    let end = position + width;
    if end > total {
        let wrapped = end - total;
        Ok(vec![
            Phase::high(length(wrapped, what)?),
            Phase::low(length(position - wrapped, what)?),
            Phase::high(length(width - wrapped, what)?),
        ])
    } else {
        Ok(vec![
            Phase::low(length(position, what)?),
            Phase::high(length(width, what)?),
            Phase::low(length(total - end, what)?),
        ])
    }
}

/// Flip waveform of the external latch mode: low until `low`, then high.
pub(crate) fn latch_flip(low: i64, total: i64) -> Result<Vec<Phase>> {
    Ok(vec![
        Phase::low(length(low, "flip low phase")?),
        Phase::high(length(total - low, "flip high phase")?),
    ])
}

/// Convert `(slow cycles, hold)` pairs into register entries.
fn hold_slots(entries: &[(i64, bool)]) -> Result<Vec<HoldSlot>> {
    entries
        .iter()
        .map(|&(cycles, hold)| {
            let cycles = u32::try_from(cycles).map_err(|_| {
                Error::Infeasible(format!("hold entry would be {cycles} slow cycles"))
            })?;
            Ok(HoldSlot::new(cycles, hold)?)
        })
        .collect()
}

struct Derived {
    lines: Lines,
    first_integ_offset: i64,
    reset_offset: i64,
    track_shift: i64,
}

impl SequenceConfig {
    /// Derive all lines and the hold register from the parameters and compile
    /// them.
    ///
    /// Nothing changes if the parameters imply negative phase or hold lengths.
    /// A line that fails to compile keeps its new phases without a compiled
    /// register, and the first such failure is returned.
    pub fn generate(&mut self) -> Result<()> {
        if self.mode == OperatingMode::Manual {
            info!("Manual mode, lines are not derived from parameters");
            return Ok(());
        }
        let mut derived = self.derive_lines()?;
        let holds = self.derive_holds(&derived)?;
        let right_shift = i64::from(self.params.right_shift);
        if right_shift != 0 {
            for (_, track) in derived.lines.iter_mut() {
                track.rotate(right_shift);
            }
        }

        self.lines = derived.lines;
        match holds {
            Some(register) => {
                self.hold_enabled = true;
                self.holds = register;
            }
            None => {
                self.hold_enabled = false;
                self.holds = hold::zero_holds(self.cycle_length)?;
            }
        }
        self.compile_all()
    }

    fn derive_lines(&self) -> Result<Derived> {
        let p = &self.params;
        let cycle = i64::from(self.cycle_length);
        let c = cycle * i64::from(PATTERN_WIDTH);
        let last = i64::from(p.last_int_phase);
        let integ = i64::from(p.integration_length);
        let flattop = i64::from(p.flattop_length);
        let ramp_length = i64::from(p.ramp_length);
        let reset_length = i64::from(p.reset_length);
        let reset_integ_offset = i64::from(p.reset_integ_offset);
        let load_length = i64::from(p.single_cap_load_length);
        let mut lines = self.lines.clone();

        let ramp = if self.single_cap_mode {
            vec![
                Phase::high(26),
                Phase::low(length(c - load_length - ramp_length, "ramp gap")?),
                Phase::high(10),
                Phase::low(length(load_length - 10, "capacitor load")?),
                Phase::high(length(ramp_length - 26, "ramp tail")?),
            ]
        } else {
            let (position, width) = match self.mode {
                OperatingMode::ExternalLatch => (cycle, ramp_length),
                OperatingMode::Buffer => (c - 20, (c - 10).min(250)),
                _ => (c - last + i64::from(p.ramp_offset), ramp_length),
            };
            window(position, width, c, "ramp")?
        };
        lines[Line::Ramp].set_phases(&ramp);

        let first_integ_offset = c - 2 * integ - flattop - last;
        if self.mode.integration_disabled() {
            lines[Line::SwitchIn].set_static(false, self.cycle_length);
        } else {
            let first = length(first_integ_offset, "first integration offset")?;
            let integ = length(integ, "integration")?;
            let first_integration = if self.mode == OperatingMode::SingleIntegration {
                Phase::low(integ)
            } else {
                Phase::high(integ)
            };
            lines[Line::SwitchIn].set_phases(&[
                Phase::low(first),
                first_integration,
                Phase::low(length(flattop, "flattop")?),
                Phase::high(integ),
                Phase::low(length(last, "last integration phase")?),
            ]);
        }

        let reset_offset = first_integ_offset - reset_length - reset_integ_offset;
        match self.mode {
            OperatingMode::Buffer | OperatingMode::ExternalLatch => {
                lines[Line::Reset].set_static(false, self.cycle_length);
            }
            _ => {
                lines[Line::Reset].set_phases(&[
                    Phase::high(length(reset_offset, "reset offset")?),
                    Phase::low(length(reset_length, "reset")?),
                    Phase::high(length(c - reset_offset - reset_length, "reset tail")?),
                ]);
            }
        }

        match self.mode {
            OperatingMode::Buffer | OperatingMode::Reset | OperatingMode::SingleIntegration => {
                lines[Line::Flip].set_static(true, self.cycle_length);
                lines[Line::Inject].set_static(true, self.cycle_length);
            }
            OperatingMode::ExternalLatch => {
                let low = cycle + i64::from(self.ext_latch_slot);
                lines[Line::Flip].set_phases(&latch_flip(low, c)?);
            }
            _ => {
                let back_flip = c - last - 2 * integ - flattop - reset_integ_offset - reset_length;
                let flip_high =
                    reset_length + reset_integ_offset + integ + i64::from(p.ft_flip_offset);
                lines[Line::Flip].set_phases(&[
                    Phase::low(length(back_flip, "back flip offset")?),
                    Phase::high(length(flip_high, "flip")?),
                    Phase::low(length(c - back_flip - flip_high, "flip tail")?),
                ]);

                let rising_edge = i64::from(p.inject_rising_edge_offset);
                let empty_cycles = i64::from(p.empty_inject_cycles);
                let inject_high =
                    c - last - integ - flattop - rising_edge + i64::from(p.ft_inject_offset);
                let mut inject = Vec::with_capacity(4);
                if rising_edge > 0 {
                    inject.push(Phase::low(length(rising_edge, "inject rising edge")?));
                }
                if empty_cycles > 0 {
                    inject.push(Phase::high(length(c * empty_cycles, "empty inject cycles")?));
                }
                inject.push(Phase::high(length(inject_high, "inject")?));
                inject.push(Phase::low(length(
                    c - rising_edge - inject_high,
                    "inject tail",
                )?));
                lines[Line::Inject].set_phases(&inject);
            }
        }

        let track_shift = if self.single_cap_mode {
            (c - load_length - (ramp_length - 28)) - (c - last)
        } else {
            0
        };
        if track_shift != 0 {
            for line in [Line::SwitchIn, Line::Reset, Line::Flip, Line::Inject] {
                lines[line].rotate(track_shift);
            }
        }

        Ok(Derived {
            lines,
            first_integ_offset,
            reset_offset,
            track_shift,
        })
    }

    /// Hold register implied by the hold parameters, `None` if holds are off.
    fn derive_holds(&self, derived: &Derived) -> Result<Option<HoldRegister>> {
        let p = &self.params;
        let cycle = i64::from(self.cycle_length);
        let hold_pos = i64::from(p.hold_pos);
        let reset_hold = i64::from(p.reset_hold_length);
        let flattop_hold = i64::from(p.flattop_hold_length);

        let entries = if hold_pos > 0 {
            if p.hold_length < 2 {
                info!("Hold length must not be smaller than 2. Set to 2");
            }
            let hold_length = i64::from(p.hold_length).max(2);
            vec![
                (hold_pos, false),
                (hold_length, true),
                (cycle - hold_pos - 2, false),
                (1, false),
                (1, false),
            ]
        } else if flattop_hold > 0 || reset_hold > 0 {
            let width = i64::from(PATTERN_WIDTH);
            let flip_window = i64::from(p.flattop_length) / width - 3;
            let fast_flattop =
                derived.first_integ_offset + i64::from(p.integration_length) + 2 * width;
            let mut flattop_offset = fast_flattop / width;
            if fast_flattop % width != 0 {
                flattop_offset += 1;
            }
            let mut entries = if reset_hold > 0 {
                let mut reset_offset = derived.reset_offset / width + 1;
                if (derived.reset_offset + derived.track_shift).rem_euclid(width) != 0 {
                    reset_offset += 1;
                }
                vec![
                    (reset_offset, false),
                    (reset_hold, true),
                    (flattop_offset - reset_offset + flip_window, false),
                ]
            } else {
                vec![
                    (flattop_offset, false),
                    (flattop_hold / 2, true),
                    (flip_window, false),
                ]
            };
            if flattop_hold > 0 {
                let second = if reset_hold > 0 {
                    flattop_hold
                } else {
                    flattop_hold / 2
                };
                entries.push((second, true));
                entries.push((cycle - flattop_offset - flip_window, false));
            } else {
                entries.push((1, false));
                entries.push((cycle - flattop_offset - 1 - flip_window, false));
            }
            entries
        } else {
            return Ok(None);
        };

        let mut register = hold::to_register(&hold_slots(&entries)?)?;
        if self.single_cap_mode {
            let shift = derived
                .track_shift
                .div_euclid(i64::from(PATTERN_WIDTH))
                .rem_euclid(cycle);
            register = hold::shift_holds_right(&register, shift as u32)?;
        }
        hold::validate(&register, self.cycle_length);
        Ok(Some(register))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ModeOptions, ParameterOptions};
    use crate::params::ParamName;
    use sequencer_codec::HoldWindow;

    fn phases(config: &SequenceConfig, line: Line) -> Vec<Phase> {
        config.line(line).phases().to_vec()
    }

    #[test]
    fn test_window() {
        assert_eq!(
            window(690, 40, 700, "ramp").unwrap(),
            vec![Phase::high(30), Phase::low(660), Phase::high(10)]
        );
        assert_eq!(
            window(-10, 20, 350, "ramp").unwrap(),
            vec![Phase::high(10), Phase::low(330), Phase::high(10)]
        );
        assert_eq!(
            window(100, 50, 350, "ramp").unwrap(),
            vec![Phase::low(100), Phase::high(50), Phase::low(200)]
        );
        assert!(window(0, 351, 350, "ramp").is_err());
    }

    #[test]
    fn test_default_lines() {
        let config = SequenceConfig::new().unwrap();
        assert_eq!(
            phases(&config, Line::Ramp),
            vec![Phase::high(249), Phase::low(100), Phase::high(1)]
        );
        assert_eq!(
            phases(&config, Line::SwitchIn),
            vec![
                Phase::low(109),
                Phase::high(100),
                Phase::low(20),
                Phase::high(100),
                Phase::low(21),
            ]
        );
        assert_eq!(
            phases(&config, Line::Reset),
            vec![Phase::high(73), Phase::low(21), Phase::high(256)]
        );
        assert_eq!(
            phases(&config, Line::Flip),
            vec![Phase::low(73), Phase::high(143), Phase::low(134)]
        );
        assert_eq!(
            phases(&config, Line::Inject),
            vec![Phase::high(1266), Phase::low(134)]
        );
        assert_eq!(config.holds(), &hold::zero_holds(50).unwrap());
    }

    #[test]
    fn test_infeasible_parameters_change_nothing() {
        let mut config = SequenceConfig::new().unwrap();
        let before = config.clone();
        let err = config
            .set_parameter(ParamName::IntegrationLength, 200, ParameterOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::Infeasible(_)));
        assert_eq!(config, before);
        assert_eq!(config.parameter(ParamName::IntegrationLength), 100);
    }

    #[test]
    fn test_buffer_mode() {
        let mut config = SequenceConfig::new().unwrap();
        config
            .set_operating_mode(OperatingMode::Buffer, ModeOptions::default())
            .unwrap();
        assert_eq!(
            phases(&config, Line::Ramp),
            vec![Phase::high(230), Phase::low(100), Phase::high(20)]
        );
        assert_eq!(phases(&config, Line::SwitchIn), vec![Phase::low(350)]);
        assert_eq!(phases(&config, Line::Reset), vec![Phase::low(350)]);
        assert_eq!(phases(&config, Line::Flip), vec![Phase::high(350)]);
        assert_eq!(phases(&config, Line::Inject), vec![Phase::high(350)]);
        assert!(config.is_compiled());
    }

    #[test]
    fn test_reset_mode() {
        let mut config = SequenceConfig::new().unwrap();
        config
            .set_operating_mode(OperatingMode::Reset, ModeOptions::default())
            .unwrap();
        assert_eq!(config.params().ramp_offset, 130);
        assert_eq!(
            phases(&config, Line::Ramp),
            vec![Phase::high(9), Phase::low(100), Phase::high(241)]
        );
        assert_eq!(
            phases(&config, Line::Reset),
            vec![Phase::high(73), Phase::low(21), Phase::high(256)]
        );
        assert_eq!(phases(&config, Line::Flip), vec![Phase::high(350)]);
        assert!(config.is_compiled());
    }

    #[test]
    fn test_external_latch_mode() {
        let mut config = SequenceConfig::new().unwrap();
        config
            .set_operating_mode(OperatingMode::ExternalLatch, ModeOptions::default())
            .unwrap();
        assert_eq!(
            phases(&config, Line::Ramp),
            vec![Phase::low(50), Phase::high(250), Phase::low(50)]
        );
        assert_eq!(
            phases(&config, Line::Flip),
            vec![Phase::low(60), Phase::high(290)]
        );
        assert_eq!(phases(&config, Line::SwitchIn), vec![Phase::low(350)]);
        assert!(config.is_compiled());
    }

    #[test]
    fn test_flattop_hold() {
        let mut config = SequenceConfig::new().unwrap();
        let options = ParameterOptions::default();
        config
            .set_parameter(ParamName::FlattopLength, 35, options)
            .unwrap();
        config
            .set_parameter(ParamName::FlattopHoldLength, 20, options)
            .unwrap();
        assert!(config.hold_enabled());
        let layout: Vec<(u32, bool)> = config
            .holds()
            .iter()
            .map(|s| (s.length(), s.is_hold()))
            .collect();
        assert_eq!(
            layout,
            vec![(30, false), (10, true), (2, false), (10, true), (18, false)]
        );
        assert!(config.holds_valid());
        assert_eq!(config.real_cycle_length(), 70);
        assert!(config.is_compiled());
    }

    #[test]
    fn test_explicit_hold_position() {
        let mut config = SequenceConfig::new().unwrap();
        let options = ParameterOptions { regenerate: false };
        config.set_parameter(ParamName::HoldPos, 10, options).unwrap();
        config
            .set_parameter(ParamName::HoldLength, 40, ParameterOptions::default())
            .unwrap();
        let positions = config.hold_positions();
        assert_eq!(positions.first, HoldWindow::new(10, 40));
        assert!(!positions.second.is_active());

        config
            .set_parameter(ParamName::HoldLength, 1, ParameterOptions::default())
            .unwrap();
        assert_eq!(config.hold_positions().first, HoldWindow::new(10, 2));
    }

    #[test]
    fn test_holds_disabled_without_hold_parameters() {
        let mut config = SequenceConfig::new().unwrap();
        let options = ParameterOptions::default();
        config.set_parameter(ParamName::HoldPos, 10, options).unwrap();
        assert!(config.hold_enabled());
        config.set_parameter(ParamName::HoldPos, 0, options).unwrap();
        assert!(!config.hold_enabled());
        assert!(config.hold_bits().not_any());
    }

    #[test]
    fn test_single_cap_mode() {
        let mut config = SequenceConfig::new().unwrap();
        config
            .set_parameter(ParamName::SingleSHCapMode, 1, ParameterOptions::default())
            .unwrap();
        assert_eq!(config.params().back_flip_at_reset, 2);
        assert_eq!(
            phases(&config, Line::Ramp),
            vec![
                Phase::high(26),
                Phase::low(89),
                Phase::high(10),
                Phase::low(1),
                Phase::high(224),
            ]
        );
        assert_eq!(
            phases(&config, Line::SwitchIn),
            vec![
                Phase::low(17),
                Phase::high(100),
                Phase::low(130),
                Phase::high(100),
                Phase::low(3),
            ]
        );
        assert_eq!(
            phases(&config, Line::Reset),
            vec![Phase::high(211), Phase::low(21), Phase::high(118)]
        );
        assert_eq!(
            phases(&config, Line::Inject),
            vec![Phase::high(1054), Phase::low(134), Phase::high(212)]
        );
        assert!(config.is_compiled());
    }

    #[test]
    fn test_right_shift() {
        let mut config = SequenceConfig::new().unwrap();
        config
            .set_parameter(ParamName::RightShift, 7, ParameterOptions::default())
            .unwrap();
        assert_eq!(
            phases(&config, Line::Reset),
            vec![Phase::high(80), Phase::low(21), Phase::high(249)]
        );
        config
            .set_parameter(ParamName::RightShift, -7, ParameterOptions::default())
            .unwrap();
        assert_eq!(
            phases(&config, Line::Reset),
            vec![Phase::high(66), Phase::low(21), Phase::high(263)]
        );
    }

    #[test]
    fn test_manual_mode_keeps_lines() {
        let mut config = SequenceConfig::new().unwrap();
        config
            .set_operating_mode(OperatingMode::Manual, ModeOptions::default())
            .unwrap();
        let before = config.lines().clone();
        config
            .set_parameter(ParamName::IntegrationLength, 50, ParameterOptions::default())
            .unwrap();
        assert_eq!(config.lines(), &before);
    }
}
