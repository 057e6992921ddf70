// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Sequence generator configuration for the DSSC readout ASIC.
//!
//! A [`SequenceConfig`] owns the five control lines of the front-end, the hold
//! register and the named cycle parameters. In parametric operating modes the
//! line waveforms are derived from the parameters; in manual mode the phase
//! lists are edited directly and parameters are read back from them.

mod adapt;
pub mod config;
mod derive;
pub mod document;
pub mod line;
pub mod mode;
pub mod params;
pub mod readback;
pub mod settings;
pub mod snapshot;

use std::path::PathBuf;

use sequencer_codec::{BitMismatch, CompileError, HoldAllocationError};

pub use config::{ModeOptions, ParameterOptions, SequenceConfig};
pub use document::{LoadOptions, SaveOptions};
pub use line::{Line, Lines, Track};
pub use mode::OperatingMode;
pub use params::{CycleParameters, ParamName};
pub use readback::Timing;
pub use settings::{SanitizationChange, SequencerSettings};
pub use snapshot::ConfigSnapshot;

/// Margin between the end of the last integration and the ramp start.
pub const AIR: i32 = 5;
/// Margin between the flip and the end of the integration.
pub const AIF: i32 = 2;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Codec(#[from] sequencer_codec::Error),

    #[error("Line {line} failed to compile: {source}")]
    Compile {
        line: Line,
        #[source]
        source: CompileError,
    },

    #[error(transparent)]
    HoldAllocation(#[from] HoldAllocationError),

    #[error("Failed to read sequencer description {}: {source}", path.display())]
    ConfigLoad {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Element <{element}> is missing the '{field}' attribute")]
    FieldMissing { element: &'static str, field: String },

    #[error("Line {0} has not been compiled")]
    NotCompiled(Line),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Infeasible timing: {0}")]
    Infeasible(String),

    #[error(transparent)]
    Mismatch(#[from] BitMismatch),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
