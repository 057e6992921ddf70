// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! In-place refinement of existing waveforms.
//!
//! Instead of deriving the lines from scratch, the current ramp and reset are
//! measured and the remaining lines are fitted around a requested integration
//! time. Holds are placed to extend the integration or, in DEPFET mode, around
//! the reset and the flip.

use sequencer_codec::hold::{self, HoldRegister};
use sequencer_codec::{HoldWindow, Phase};
use sequencer_log::{error, info, warn};

use crate::config::SequenceConfig;
use crate::derive::{length, window};
use crate::line::Line;
use crate::mode::OperatingMode;
use crate::{AIF, AIR, Error, Result};

const DEPFET_RESET_HOLD: u32 = 150;
const DEPFET_FLIP_HOLD: u32 = 3000;

fn slow(value: i64, what: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| Error::Infeasible(format!("{what} would be {value} slow cycles")))
}

impl SequenceConfig {
    /// Fit the lines to the integration time of the current parameters.
    pub fn adapt_tracks(&mut self) -> Result<()> {
        if self.mode == OperatingMode::Manual {
            return Err(Error::Infeasible(
                "lines are not adapted in manual mode".to_string(),
            ));
        }
        let int_time = self.integration_time(false);
        let mut time = if self.mode.integration_disabled() {
            0
        } else {
            self.integration_time(true)
        };
        if matches!(
            self.mode,
            OperatingMode::Normal | OperatingMode::SingleIntegration
        ) && time == 0
        {
            time = 20;
        }
        self.adapt_tracks_with(int_time, time)
    }

    /// Fit the lines to an integration of `time` fast cycles, extended by holds
    /// to `int_time` when the hold extension is active.
    ///
    /// On failure the configuration is left exactly as it was.
    pub fn adapt_tracks_with(&mut self, int_time: i32, time: i32) -> Result<()> {
        let snapshot = self.clone();
        let result = self.try_adapt(i64::from(int_time), i64::from(time));
        if let Err(err) = &result {
            error!("Adapting the lines failed: {}", err);
            *self = snapshot;
        }
        result
    }

    fn try_adapt(&mut self, int_time: i64, time: i64) -> Result<()> {
        let mode = self.mode;
        if mode == OperatingMode::Manual {
            return Err(Error::Infeasible(
                "lines are not adapted in manual mode".to_string(),
            ));
        }
        let cycle = i64::from(self.cycle_length);
        let c = i64::from(self.fast_cycle_length());
        let (reset_time, reset_offset) = self.reset_time_and_offset();
        let (reset_time, reset_offset) = (i64::from(reset_time), i64::from(reset_offset));
        let hold_extension = self.int_time_extension && self.hold_enabled && int_time >= 35;
        let depfet = !hold_extension && self.hold_enabled && mode == OperatingMode::DepfetHold;
        let disabled = mode.integration_disabled();
        let flattop = if disabled {
            0
        } else {
            i64::from(self.flattop_length())
        };
        let one_flip = self.has_one_flip_phase() && mode != OperatingMode::Normal;

        let narrow_flattop =
            flattop < 35 && !disabled && mode != OperatingMode::SingleIntegration && !one_flip;
        if hold_extension && narrow_flattop {
            return Err(Error::Infeasible(format!(
                "flattop of {flattop} fast cycles is too short for the hold extension, at least 35 are needed"
            )));
        }
        if depfet && narrow_flattop {
            error!(
                "Flattop of {} fast cycles is too short for holds around the flip",
                flattop
            );
        }

        let mut first_integ_offset = i64::from(self.first_integ_offset());
        if first_integ_offset <= reset_offset + reset_time {
            first_integ_offset = ((c - flattop - 2 * time - reset_offset - reset_time - 14) / 2)
                .min(57)
                + reset_offset
                + reset_time;
        }
        let last = if mode == OperatingMode::SingleIntegration {
            c - first_integ_offset - time
        } else {
            c - first_integ_offset - flattop - 2 * time
        };
        if (last < 14 && !disabled)
            || (depfet && flattop < 21 && mode != OperatingMode::SingleIntegration && !disabled)
        {
            return Err(Error::Infeasible(format!(
                "integration time {time} leaves {last} fast cycles after the last integration, try {}",
                time + (last - 14) / 2 - 1
            )));
        }

        let (ramp_position, ramp_length) = self.fit_ramp(c, last, reset_time, reset_offset);

        let flip_position = reset_offset;
        let flip_high = if mode == OperatingMode::SingleIntegration {
            let mut high = reset_offset + i64::from(self.params.reset_length);
            if !one_flip {
                high += 30;
            }
            if high + 15 > first_integ_offset {
                error!(
                    "Flip of {} fast cycles runs into the integration at {}",
                    high,
                    first_integ_offset
                );
            }
            high
        } else {
            i64::from(self.reset_integ_offset()) + time + reset_time + i64::from(AIF)
        };

        let holds: Option<HoldRegister> = if hold_extension {
            let mut first = first_integ_offset / 7 + 1;
            let mut second = cycle - last / 7 - 1;
            if mode == OperatingMode::SingleIntegration {
                first = second;
                second = 0;
            }
            let length = slow((int_time - time) / 7, "hold extension")?;
            Some(hold::allocate(
                HoldWindow::new(slow(first, "first hold position")?, length),
                HoldWindow::new(slow(second, "second hold position")?, length),
                self.cycle_length,
            )?)
        } else if self.int_time_extension {
            Some(hold::zero_holds(self.cycle_length)?)
        } else if depfet {
            let flip_end = if mode == OperatingMode::SingleIntegration && !one_flip {
                reset_offset + i64::from(self.params.reset_length)
            } else {
                flip_high + flip_position
            };
            Some(self.depfet_holds(reset_offset, flip_end)?)
        } else {
            None
        };

        let ramp = window(ramp_position, ramp_length, c, "ramp")?;
        self.lines[Line::Ramp].set_phases(&ramp);

        if disabled || time <= 0 {
            self.lines[Line::SwitchIn].set_static(false, self.cycle_length);
        } else {
            let first = Phase::low(length(first_integ_offset, "first integration offset")?);
            let integration = Phase::high(length(time, "integration")?);
            let phases = if mode == OperatingMode::SingleIntegration {
                vec![first, integration, Phase::low(length(last, "last integration phase")?)]
            } else {
                vec![
                    first,
                    integration,
                    Phase::low(length(flattop, "flattop")?),
                    integration,
                    Phase::low(length(last, "last integration phase")?),
                ]
            };
            self.lines[Line::SwitchIn].set_phases(&phases);
        }

        match mode {
            OperatingMode::Buffer | OperatingMode::ExternalLatch => {
                self.lines[Line::Reset].set_static(false, self.cycle_length);
            }
            _ => {
                self.lines[Line::Reset].set_phases(&[
                    Phase::high(length(reset_offset, "reset offset")?),
                    Phase::low(length(reset_time, "reset")?),
                    Phase::high(length(c - reset_offset - reset_time, "reset tail")?),
                ]);
            }
        }

        match mode {
            OperatingMode::Buffer | OperatingMode::Reset => {
                self.lines[Line::Flip].set_static(true, self.cycle_length);
            }
            OperatingMode::ExternalLatch => {}
            _ => {
                let flip = self.flip_phases(flip_position, flip_high, c)?;
                self.lines[Line::Flip].set_phases(&flip);
            }
        }

        self.lines[Line::Inject].set_static(false, self.cycle_length);

        if let Some(register) = holds {
            self.holds = register;
        }
        self.compile_all()?;

        if mode == OperatingMode::Normal {
            self.params.reset_length = reset_time as i32;
            self.params.integration_length = int_time as i32;
            self.params.ramp_length = ramp_length as i32;
        }
        info!(
            "Lines adapted to an integration time of {} fast cycles in {} mode",
            time,
            mode
        );
        Ok(())
    }

    /// Ramp start and width fitted behind the last integration.
    fn fit_ramp(&self, c: i64, last: i64, reset_time: i64, reset_offset: i64) -> (i64, i64) {
        let air = i64::from(AIR);
        let phases = self.lines[Line::Ramp].phases();
        let (mut first, mut low) = match phases {
            [rise, gap, _, ..] => (i64::from(rise.fast_cycles), i64::from(gap.fast_cycles)),
            _ => {
                warn!("Ramp line has {} phases, starting from the default ramp", phases.len());
                (i64::from(self.cycle_length / 2), 14)
            }
        };
        if self.mode == OperatingMode::Normal {
            first = first.max(100);
        }
        let mut second = c - first - low;

        match self.mode {
            OperatingMode::Reset => {
                if first < reset_offset + reset_time + 2 {
                    first = reset_offset + reset_time + 30;
                    second = c / 2;
                    low = c - first - second;
                }
            }
            OperatingMode::Buffer => {}
            _ => {
                if first + low != c - last + air {
                    second = last - air;
                    low = c - first - second;
                }
            }
        }
        if low <= 0 {
            low = 14;
            first = c - low - second;
        }

        match self.mode {
            OperatingMode::Reset => (first, low),
            OperatingMode::ExternalLatch => (i64::from(self.cycle_length), (c / 3).min(250)),
            OperatingMode::Buffer => (c - 20, (c - 10).min(250)),
            _ => (first + low, first + second),
        }
    }

    /// Flip waveform high for `high` fast cycles from `position`.
    ///
    /// `back_flip_at_reset` selects how the flip behaves before `position`:
    /// 0 keeps it high from the cycle start, 1 keeps it low, 2 raises it
    /// `back_flip_to_reset_offset` fast cycles early.
    fn flip_phases(&self, position: i64, high: i64, c: i64) -> Result<Vec<Phase>> {
        let end = position + high;
        let (start, width) = match self.params.back_flip_at_reset {
            0 => (0, end),
            1 => (position, high),
            _ => {
                let offset = i64::from(self.params.back_flip_to_reset_offset)
                    .min(position - 1)
                    .max(0);
                (position - offset, offset + high)
            }
        };
        if width >= c {
            return Ok(vec![Phase::high(length(c, "flip")?)]);
        }
        window(start, width, c, "flip")
    }

    /// Holds around the reset and after the flip for DEPFET readout.
    fn depfet_holds(&self, reset_offset: i64, flip_end: i64) -> Result<HoldRegister> {
        if reset_offset < 14 {
            return Err(Error::Infeasible(format!(
                "reset offset of {reset_offset} fast cycles leaves no room for a hold before the reset"
            )));
        }
        let current = self.hold_positions();
        let first = slow((reset_offset - 1) / 7 - 1, "reset hold position")?;
        let second = slow((flip_end + 1) / 7 + 2, "flip hold position")?;
        let first_length = if first == current.first.position {
            current.first.length
        } else {
            DEPFET_RESET_HOLD
        };
        let second_length = if second == current.second.position {
            current.second.length
        } else {
            DEPFET_FLIP_HOLD
        };
        Ok(hold::allocate(
            HoldWindow::new(first, first_length),
            HoldWindow::new(second, second_length),
            self.cycle_length,
        )?)
    }
}
