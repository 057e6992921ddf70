// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Persisted sequencer description.
//!
//! The description is a small XML dialect with one element per line:
//!
//! ```text
//! <!DOCTYPE Sequencer>
//! <Sequencer mode="signalsCompiler" cycleLength="50" holdGenEnabled="0" singleSHCapMode="0" opMode="0">
//! <cycleParameters integrationLength="100" ... holdLength="0"/>
//! <SequencerTrack signalName="ADC_RMP" invHold="0" statVal="0">
//! <Phase length="249" type="1"/>
//! ...
//! </SequencerTrack>
//! <HoldGenerator enabled="0">
//! <HoldCntsRegEntry length="10" hold="0"/>
//! ...
//! </HoldGenerator>
//! </Sequencer>
//! ```
//!
//! Descriptions in signals compiler mode are regenerated from the cycle
//! parameters; all others carry the phase lists of every line. Reading is
//! line based and tolerant of attributes that follow a closing `/>`.

use std::fs;
use std::path::Path;

use indexmap::IndexMap;
use sequencer_codec::hold::{self, HoldSlot};
use sequencer_codec::Phase;
use sequencer_log::{error, info, warn};

use crate::config::SequenceConfig;
use crate::line::Line;
use crate::mode::OperatingMode;
use crate::params::ParamName;
use crate::{Error, Result};

const SIGNALS_COMPILER: &str = "signalsCompiler";
const MANUAL: &str = "manual";
const DEFAULT_CYCLE_LENGTH: u32 = 50;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadOptions {
    /// Save the description again if it lacked cycle parameters.
    pub rewrite_missing_fields: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveOptions {
    /// Only write if the loaded description needs a rewrite.
    pub only_if_needed: bool,
}

/// Extract the `name="value"` pairs of one line.
fn attributes(line: &str) -> IndexMap<&str, &str> {
    let mut attrs = IndexMap::new();
    let mut rest = line;
    while let Some(eq) = rest.find("=\"") {
        let head = &rest[..eq];
        let name_start = head
            .rfind(|c: char| c.is_ascii_whitespace() || matches!(c, '<' | '>' | '/'))
            .map_or(0, |i| i + 1);
        let tail = &rest[eq + 2..];
        let Some(end) = tail.find('"') else {
            break;
        };
        let name = &head[name_start..];
        if !name.is_empty() {
            attrs.insert(name, &tail[..end]);
        }
        rest = &tail[end + 1..];
    }
    attrs
}

fn int(attrs: &IndexMap<&str, &str>, name: &str) -> Option<i64> {
    attrs.get(name).and_then(|v| v.trim().parse().ok())
}

fn flag(attrs: &IndexMap<&str, &str>, name: &str) -> bool {
    int(attrs, name).is_some_and(|v| v != 0)
}

fn required(attrs: &IndexMap<&str, &str>, element: &'static str, name: &str) -> Result<i64> {
    int(attrs, name).ok_or_else(|| Error::FieldMissing {
        element,
        field: name.to_string(),
    })
}

impl SequenceConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = SequenceConfig::blank(DEFAULT_CYCLE_LENGTH)?;
        config.load_from(path, LoadOptions::default())?;
        Ok(config)
    }

    pub fn from_document(text: &str) -> Result<Self> {
        let mut config = SequenceConfig::blank(DEFAULT_CYCLE_LENGTH)?;
        config.good = config.parse_document(text)?;
        Ok(config)
    }

    /// Replace the configuration with the description stored at `path`.
    ///
    /// Returns whether the description was read correctly, see
    /// [`SequenceConfig::is_good`]. If the file cannot be read or holds
    /// invalid values, the configuration keeps its lines and parameters and is
    /// marked not good.
    pub fn load_from(&mut self, path: impl AsRef<Path>, options: LoadOptions) -> Result<bool> {
        let path = path.as_ref();
        let int_time_extension = self.int_time_extension;
        let loaded = fs::read_to_string(path)
            .map_err(|source| Error::ConfigLoad {
                path: path.to_path_buf(),
                source,
            })
            .and_then(|text| {
                let mut loaded = SequenceConfig::blank(DEFAULT_CYCLE_LENGTH)?;
                loaded.int_time_extension = int_time_extension;
                loaded.good = loaded.parse_document(&text)?;
                Ok(loaded)
            });
        let mut loaded = match loaded {
            Ok(loaded) => loaded,
            Err(err) => {
                error!("Sequencer description {} not loaded: {}", path.display(), err);
                self.good = false;
                return Err(err);
            }
        };
        loaded.path = Some(path.to_path_buf());
        *self = loaded;
        if self.good {
            info!("Sequencer initialized from {}", path.display());
        } else {
            error!("Sequencer description {} could not be read correctly", path.display());
        }
        if self.needs_rewrite && options.rewrite_missing_fields {
            warn!("Updating {} with default values for missing fields", path.display());
            self.save(path, SaveOptions::default())?;
        }
        Ok(self.good)
    }

    fn parse_document(&mut self, text: &str) -> Result<bool> {
        self.signals_compiler = false;
        self.needs_rewrite = false;
        self.params.ramp_offset = 20;
        let mut manual = false;
        let mut good = true;
        let mut tracks_done = false;
        let mut current: Option<Line> = None;
        let mut op_mode = None;
        let mut holds: Vec<HoldSlot> = vec![];

        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let attrs = attributes(line);
            let read_tracks = !tracks_done && (!self.signals_compiler || manual);
            if line.contains("<Sequencer ") {
                let cycle_length = match self.field(&attrs, "Sequencer", "cycleLength") {
                    Some(value) => u32::try_from(value).map_err(|_| {
                        Error::InvalidParameter(format!("Cycle length {value}"))
                    })?,
                    None => DEFAULT_CYCLE_LENGTH,
                };
                self.set_cycle_length(cycle_length)?;
                self.hold_enabled = flag(&attrs, "holdGenEnabled");
                self.single_cap_mode = int(&attrs, "singleSHCapMode") == Some(1);
                match attrs.get("mode").copied() {
                    Some(SIGNALS_COMPILER) => self.signals_compiler = true,
                    Some(MANUAL) => manual = true,
                    _ => {}
                }
                op_mode = int(&attrs, "opMode").and_then(OperatingMode::from_code);
            } else if line.contains("<cycleParameters") {
                if self.signals_compiler {
                    self.read_cycle_parameters(&attrs);
                }
            } else if line.contains("<SequencerTrack") {
                if !read_tracks {
                    continue;
                }
                let name = attrs.get("signalName").copied().unwrap_or_default();
                match name.parse::<Line>() {
                    Ok(line) => {
                        let track = &mut self.lines[line];
                        track.invert_hold = flag(&attrs, "invHold");
                        track.static_value = flag(&attrs, "statVal");
                        track.set_phases(&[]);
                        current = Some(line);
                    }
                    Err(_) => {
                        error!("Line {} unknown, remaining lines are not read", name);
                        good = false;
                        tracks_done = true;
                        current = None;
                    }
                }
            } else if line.contains("<Phase") {
                if !read_tracks {
                    continue;
                }
                let Some(current) = current else {
                    warn!("Phase outside of a line ignored");
                    continue;
                };
                let high = self.field(&attrs, "Phase", "type") != Some(0);
                let Some(length) = self.field(&attrs, "Phase", "length") else {
                    continue;
                };
                let length = u32::try_from(length).map_err(|_| {
                    Error::InvalidParameter(format!("Phase length {length} on line {current}"))
                })?;
                self.lines[current].push_phase(Phase::new(high, length));
            } else if line.contains("<HoldGenerator") {
                self.hold_enabled = flag(&attrs, "enabled");
            } else if line.contains("<HoldCntsRegEntry") {
                let hold = flag(&attrs, "hold");
                let length = self.field(&attrs, "HoldCntsRegEntry", "length");
                match length
                    .and_then(|length| u32::try_from(length).ok())
                    .and_then(|length| HoldSlot::new(length, hold).ok())
                {
                    Some(slot) => holds.push(slot),
                    None => {
                        error!("Hold entry of length {:?} is invalid", length);
                        good = false;
                    }
                }
            }
        }

        if holds.is_empty() {
            self.holds = hold::zero_holds(self.cycle_length)?;
        } else if hold::repair(&mut holds) {
            self.holds = hold::to_register(&holds)?;
        } else {
            error!("Hold register with {} entries could not be repaired", holds.len());
            good = false;
        }

        let outcome = if self.signals_compiler {
            self.mode = op_mode.unwrap_or_default();
            self.generate()
        } else if !manual {
            self.mode = self.infer_mode();
            self.init_parameters_from_lines();
            self.compile_all()
        } else {
            self.mode = OperatingMode::Manual;
            self.compile_all()
        };
        if let Err(err) = outcome {
            error!("Sequencer description does not compile: {}", err);
            good = false;
        }
        if !self.holds_valid() {
            good = false;
        }
        Ok(good)
    }

    /// Value of a required attribute. A missing one is logged and flags the
    /// description for a rewrite.
    fn field(
        &mut self,
        attrs: &IndexMap<&str, &str>,
        element: &'static str,
        name: &str,
    ) -> Option<i64> {
        match required(attrs, element, name) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!("{}, using the default", err);
                self.needs_rewrite = true;
                None
            }
        }
    }

    fn read_cycle_parameters(&mut self, attrs: &IndexMap<&str, &str>) {
        for name in ParamName::PERSISTED {
            let value = int(attrs, name.attribute()).and_then(|v| i32::try_from(v).ok());
            match value {
                Some(value) if value >= 0 || name == ParamName::RightShift => {
                    self.store_parameter(name, value);
                }
                _ => {
                    warn!(
                        "Cycle parameter {} missing or invalid, using {}",
                        name.attribute(),
                        name.default_value()
                    );
                    self.store_parameter(name, name.default_value());
                    self.needs_rewrite = true;
                }
            }
        }
    }

    /// Render the description.
    pub fn to_document(&self) -> String {
        let gui_mode = if self.mode == OperatingMode::Manual {
            format!(" mode=\"{MANUAL}\"")
        } else if self.signals_compiler {
            format!(" mode=\"{SIGNALS_COMPILER}\"")
        } else {
            String::new()
        };
        let mut out = vec![
            "<!DOCTYPE Sequencer>".to_string(),
            format!(
                "<Sequencer{gui_mode} cycleLength=\"{}\" holdGenEnabled=\"{}\" singleSHCapMode=\"{}\" opMode=\"{}\">",
                self.cycle_length,
                u8::from(self.hold_enabled),
                u8::from(self.single_cap_mode),
                self.mode.code()
            ),
        ];
        let params: Vec<String> = ParamName::PERSISTED
            .iter()
            .map(|name| {
                format!(
                    "{}=\"{}\"",
                    name.attribute(),
                    self.params.get(*name).unwrap_or_default()
                )
            })
            .collect();
        out.push(format!("<cycleParameters {}/>", params.join(" ")));

        for (line, track) in self.lines.iter() {
            out.push(format!(
                "<SequencerTrack signalName=\"{}\" invHold=\"{}\" statVal=\"{}\">",
                line.name(),
                u8::from(track.invert_hold),
                u8::from(track.static_value)
            ));
            for phase in track.phases() {
                out.push(format!(
                    "<Phase length=\"{}\" type=\"{}\"/>",
                    phase.fast_cycles,
                    u8::from(phase.high)
                ));
            }
            out.push("</SequencerTrack>".to_string());
        }

        out.push(format!(
            "<HoldGenerator enabled=\"{}\">",
            u8::from(self.hold_enabled)
        ));
        for slot in &self.holds {
            out.push(format!(
                "<HoldCntsRegEntry length=\"{}\" hold=\"{}\"/>",
                slot.length(),
                u8::from(slot.is_hold())
            ));
        }
        out.push("</HoldGenerator>".to_string());
        out.push("</Sequencer>".to_string());

        let mut text = out.join("\n");
        text.push('\n');
        text
    }

    /// Write the description to `path`.
    ///
    /// Returns whether the file was written.
    pub fn save(&mut self, path: impl AsRef<Path>, options: SaveOptions) -> Result<bool> {
        if options.only_if_needed && !self.needs_rewrite {
            return Ok(false);
        }
        let path = path.as_ref();
        fs::write(path, self.to_document())?;
        self.needs_rewrite = false;
        self.path = Some(path.to_path_buf());
        info!("Sequencer saved to {}", path.display());
        Ok(true)
    }

    /// Rewrite the loaded description if it lacked fields.
    pub fn save_if_needed(&mut self) -> Result<bool> {
        match self.path.clone() {
            Some(path) => self.save(path, SaveOptions { only_if_needed: true }),
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use proptest::prelude::*;

    use super::*;
    use crate::config::{ModeOptions, ParameterOptions};

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("sequencer_{}_{}.xml", name, std::process::id()))
    }

    const LEGACY: &str = r#"<!DOCTYPE Sequencer>
<Sequencer mode="signalsCompiler" cycleLength="50" holdGenEnabled="0" singleSHCapMode="0" opMode="0">
<cycleParameters integrationLength="80" resetHoldLength="0" flattopLength="20" rampLength="250" singleCapLoadLength="11" flattopHoldLength="0" resetIntegOffset="15" rampIntegOffset="20" resetLength="21" backFlipAtReset="0" backFlipToResetOffset="0"/>injectRisingEdgeOffset="0"/>lastIntPhase="-1"/>emptyInjectCycles="3"/>rightShift="0"/>ftFlipOffset="7"/>ftInjectOffset="7"/>
</Sequencer>
"#;

    #[test]
    fn test_attributes() {
        let attrs = attributes(r#"<Phase length="14" type="1"/>"#);
        assert_eq!(attrs.get("length"), Some(&"14"));
        assert_eq!(attrs.get("type"), Some(&"1"));

        let attrs = attributes(r#"backFlipToResetOffset="0"/>injectRisingEdgeOffset="3"/>"#);
        assert_eq!(attrs.get("injectRisingEdgeOffset"), Some(&"3"));
        assert_eq!(attrs.len(), 2);
    }

    proptest! {
        #[test]
        fn test_attributes_after_close(
            first in "[a-zA-Z]{1,12}",
            second in "[a-zA-Z]{1,12}",
            a in 0u32..100_000,
            b in 0u32..100_000,
        ) {
            prop_assume!(first != second);
            let line = format!("<cycleParameters {first}=\"{a}\"/>{second}=\"{b}\"/>");
            let attrs = attributes(&line);
            let a = a.to_string();
            let b = b.to_string();
            prop_assert_eq!(attrs.get(first.as_str()), Some(&a.as_str()));
            prop_assert_eq!(attrs.get(second.as_str()), Some(&b.as_str()));
        }
    }

    #[test]
    fn test_legacy_description() {
        let config = SequenceConfig::from_document(LEGACY).unwrap();
        assert!(config.is_good());
        assert!(config.needs_rewrite());
        assert!(config.is_signals_compiler());
        assert_eq!(config.params().integration_length, 80);
        assert_eq!(config.params().inject_rising_edge_offset, 0);
        assert_eq!(config.params().last_int_phase, 21);
        assert_eq!(config.params().hold_pos, 0);
        assert!(config.is_compiled());
    }

    #[test]
    fn test_rewrite_missing_fields() {
        let path = temp_path("rewrite");
        fs::write(&path, LEGACY).unwrap();
        let mut config = SequenceConfig::new().unwrap();
        let good = config
            .load_from(
                &path,
                LoadOptions {
                    rewrite_missing_fields: true,
                },
            )
            .unwrap();
        assert!(good);
        assert!(!config.needs_rewrite());
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("lastIntPhase=\"21\""));
        assert!(text.contains("holdLength=\"0\""));
        assert!(!config.save_if_needed().unwrap());
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_signals_compiler_round_trip() {
        let mut config = SequenceConfig::new().unwrap();
        config
            .set_parameter(ParamName::IntegrationLength, 80, ParameterOptions::default())
            .unwrap();
        let path = temp_path("round_trip");
        assert!(config.save(&path, SaveOptions::default()).unwrap());

        let loaded = SequenceConfig::from_file(&path).unwrap();
        assert!(loaded.is_good());
        assert!(!loaded.needs_rewrite());
        assert_eq!(loaded.mode(), OperatingMode::Normal);
        assert_eq!(loaded.params(), config.params());
        assert_eq!(loaded.lines(), config.lines());
        assert_eq!(loaded.path(), Some(path.as_path()));
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_phase_description_infers_mode() {
        let mut config = SequenceConfig::new().unwrap();
        config
            .set_operating_mode(OperatingMode::Buffer, ModeOptions::default())
            .unwrap();
        config.set_signals_compiler(false);
        let text = config.to_document();
        assert!(!text.contains("mode=\""));

        let loaded = SequenceConfig::from_document(&text).unwrap();
        assert!(loaded.is_good());
        assert!(!loaded.is_signals_compiler());
        assert_eq!(loaded.mode(), OperatingMode::Buffer);
        assert_eq!(loaded.lines(), config.lines());
        assert_eq!(loaded.params().ramp_length, 250);
    }

    #[test]
    fn test_manual_description() {
        let mut config = SequenceConfig::new().unwrap();
        config
            .set_operating_mode(OperatingMode::Manual, ModeOptions::default())
            .unwrap();
        config.set_phases(Line::Flip, &[Phase::low(98), Phase::high(252)]).unwrap();
        let text = config.to_document();
        assert!(text.contains("mode=\"manual\""));

        let loaded = SequenceConfig::from_document(&text).unwrap();
        assert!(loaded.is_good());
        assert_eq!(loaded.mode(), OperatingMode::Manual);
        assert_eq!(
            loaded.line(Line::Flip).phases(),
            &[Phase::low(98), Phase::high(252)]
        );
        assert!(loaded.is_compiled());
    }

    fn buffer_description() -> String {
        let mut config = SequenceConfig::new().unwrap();
        config
            .set_operating_mode(OperatingMode::Buffer, ModeOptions::default())
            .unwrap();
        config.set_signals_compiler(false);
        config.to_document()
    }

    #[test]
    fn test_missing_phase_type() {
        // The first full-cycle low phase belongs to FCF_SwIn.
        let text = buffer_description().replacen(
            r#"<Phase length="350" type="0"/>"#,
            r#"<Phase length="350"/>"#,
            1,
        );
        let config = SequenceConfig::from_document(&text).unwrap();
        assert!(config.is_good());
        assert!(config.needs_rewrite());
        assert_eq!(config.mode(), OperatingMode::Buffer);
        assert_eq!(config.line(Line::SwitchIn).phases(), &[Phase::high(350)]);
        assert_eq!(config.line(Line::Reset).phases(), &[Phase::low(350)]);
    }

    #[test]
    fn test_missing_cycle_length() {
        let mut config = SequenceConfig::new().unwrap();
        config
            .set_parameter(ParamName::IntegrationLength, 80, ParameterOptions::default())
            .unwrap();
        let text = config.to_document().replace(r#" cycleLength="50""#, "");
        let loaded = SequenceConfig::from_document(&text).unwrap();
        assert!(loaded.is_good());
        assert!(loaded.needs_rewrite());
        assert_eq!(loaded.cycle_length(), 50);
        assert_eq!(loaded.lines(), config.lines());
    }

    #[test]
    fn test_failed_load_keeps_configuration() {
        let mut config = SequenceConfig::new().unwrap();
        let before = config.clone();
        let path = temp_path("invalid_cycle");
        let text = buffer_description().replace(r#"cycleLength="50""#, r#"cycleLength="8""#);
        fs::write(&path, text).unwrap();

        let err = config.load_from(&path, LoadOptions::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));
        assert!(!config.is_good());
        assert_eq!(config.cycle_length(), 50);
        assert_eq!(config.mode(), OperatingMode::Normal);
        assert_eq!(config.lines(), before.lines());
        assert!(config.is_compiled());
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_reload_replaces_configuration() {
        let mut config = SequenceConfig::new().unwrap();
        let path = temp_path("reload");
        fs::write(&path, buffer_description()).unwrap();
        assert!(config.load_from(&path, LoadOptions::default()).unwrap());
        assert!(config.is_good());
        assert_eq!(config.mode(), OperatingMode::Buffer);
        assert!(!config.is_signals_compiler());
        assert_eq!(config.path(), Some(path.as_path()));
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_unknown_line() {
        let text = r#"<Sequencer cycleLength="50" holdGenEnabled="0">
<SequencerTrack signalName="FCF_Unknown" invHold="0" statVal="0">
<Phase length="350" type="1"/>
</SequencerTrack>
</Sequencer>"#;
        let config = SequenceConfig::from_document(text).unwrap();
        assert!(!config.is_good());
    }

    #[test]
    fn test_unreadable_file() {
        let mut config = SequenceConfig::new().unwrap();
        let err = config
            .load_from(temp_path("does_not_exist"), LoadOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::ConfigLoad { .. }));
        assert!(!config.is_good());
        assert_eq!(config.path(), None);
    }
}
