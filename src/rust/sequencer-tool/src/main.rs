// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Inspect and edit persisted sequencer descriptions.
//!
//! ```bash
//! # Mode, parameters and phases
//! sequencer-tool show sequencer.xml
//!
//! # Register images of all lines and the hold generator
//! sequencer-tool bits sequencer.xml
//!
//! # Change a parameter and write the result elsewhere
//! sequencer-tool set sequencer.xml IntegrationLength 80 --output new.xml
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use sequencer::{Line, ParamName, ParameterOptions, SaveOptions, SequenceConfig};
use sequencer_codec::bits::{from_bit_string, to_bit_string};
use sequencer_log::{error, info};

#[derive(Parser)]
#[command(name = "sequencer-tool")]
#[command(version)]
#[command(about = "Compile and check DSSC sequencer descriptions")]
struct Cli {
    /// Log register dumps while compiling
    #[arg(long, global = true)]
    diagnostics: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print mode, parameters and phases
    Show { file: PathBuf },

    /// Print the register bit strings
    Bits {
        file: PathBuf,

        /// Only this line, e.g. FCF_Flip
        #[arg(short, long)]
        line: Option<Line>,
    },

    /// Print a JSON snapshot
    Json { file: PathBuf },

    /// Fail if a line does not compile or the holds are invalid
    Check { file: PathBuf },

    /// Compare bits read back from the ASIC against the compiled image
    Compare {
        file: PathBuf,

        /// Line the bits belong to, the hold generator if omitted
        #[arg(short, long)]
        line: Option<Line>,

        bits: String,
    },

    /// Set a parameter, regenerate and save
    Set {
        file: PathBuf,
        name: ParamName,

        #[arg(allow_negative_numbers = true)]
        value: i32,

        /// Write here instead of overwriting the input
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);
    sequencer_log::init_logging(cli.diagnostics);

    match cli.command {
        Commands::Show { file } => {
            let config = load(&file)?;
            println!("mode: {}", config.mode());
            println!("signals compiler: {}", config.is_signals_compiler());
            println!(
                "cycle length: {} (real {})",
                config.cycle_length(),
                config.real_cycle_length()
            );
            println!("parameters:");
            for (name, value) in config.parameter_map() {
                println!("  {name}: {value}");
            }
            println!("lines:");
            for (line, track) in config.lines().iter() {
                let phases: Vec<String> = track
                    .phases()
                    .iter()
                    .map(|p| format!("{}{}", if p.high { 'H' } else { 'L' }, p.fast_cycles))
                    .collect();
                println!("  {line}: {}", phases.join(" "));
            }
        }

        Commands::Bits { file, line } => {
            let config = load(&file)?;
            let lines = match line {
                Some(line) => vec![line],
                None => Line::ALL.to_vec(),
            };
            for line in lines {
                println!("{line}: {}", to_bit_string(&config.track_bits(line)?));
            }
            if line.is_none() {
                println!("holds: {}", to_bit_string(&config.hold_bits()));
            }
        }

        Commands::Json { file } => {
            let config = load(&file)?;
            println!("{}", config.snapshot().to_json()?);
        }

        Commands::Check { file } => {
            let config = load(&file)?;
            let mut ok = config.is_good();
            for (line, track) in config.lines().iter() {
                if !track.is_compiled() {
                    error!("Line {} is not compiled", line);
                    ok = false;
                }
            }
            if !config.holds_valid() {
                error!("Hold register does not match the cycle length");
                ok = false;
            }
            if !ok {
                println!("{}: FAILED", file.display());
                return Ok(ExitCode::FAILURE);
            }
            println!("{}: OK", file.display());
        }

        Commands::Compare { file, line, bits } => {
            let config = load(&file)?;
            let readback = from_bit_string(&bits)?;
            let outcome = match line {
                Some(line) => config.compare_track(line, &readback),
                None => config.compare_holds(&readback),
            };
            if let Err(err) = outcome {
                println!("{err}");
                return Ok(ExitCode::FAILURE);
            }
            println!("match");
        }

        Commands::Set {
            file,
            name,
            value,
            output,
        } => {
            let mut config = load(&file)?;
            config.set_parameter(name, value, ParameterOptions::default())?;
            let output = output.unwrap_or(file);
            config.save(&output, SaveOptions::default())?;
            info!("{} = {} written to {}", name, value, output.display());
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn load(path: &Path) -> Result<SequenceConfig> {
    SequenceConfig::from_file(path).with_context(|| format!("Failed to load {}", path.display()))
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .init();
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_set() {
        let cli = Cli::try_parse_from([
            "sequencer-tool",
            "--diagnostics",
            "set",
            "seq.xml",
            "RightShift",
            "-7",
            "--output",
            "out.xml",
        ])
        .unwrap();
        assert!(cli.diagnostics);
        match cli.command {
            Commands::Set {
                name,
                value,
                output,
                ..
            } => {
                assert_eq!(name, ParamName::RightShift);
                assert_eq!(value, -7);
                assert_eq!(output, Some(PathBuf::from("out.xml")));
            }
            _ => panic!("expected set"),
        }
    }

    #[test]
    fn test_parse_line() {
        let cli = Cli::try_parse_from(["sequencer-tool", "bits", "seq.xml", "-l", "FCF_Flip"])
            .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Bits {
                line: Some(Line::Flip),
                ..
            }
        ));
        assert!(Cli::try_parse_from(["sequencer-tool", "bits", "seq.xml", "-l", "Flip"]).is_err());
    }
}
