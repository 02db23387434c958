//! Command-line arguments
//!
//! Parsed by hand; the surface is small enough not to need a parser crate.

use std::path::PathBuf;
use thiserror::Error;

pub const HELP: &str = r#"Tripwire - trigger condition evaluation engine

USAGE:
    tripwire --definitions <PATH> [OPTIONS]

OPTIONS:
    --config <PATH>         Engine configuration (JSON). Defaults apply when omitted
    --definitions <PATH>    Signals and pools (JSON), re-read on every reload
    --trigger-log <PATH>    JSON-lines file trigger events are appended to
                            (default: triggers.jsonl)
    --help                  Print this help message

INPUT:
    Upstream records are read from stdin, one JSON object per line:
    {"type":"asset_context","symbol":"BTC","open_interest":1.2e9,"timestamp_ms":1700000000000}

ENVIRONMENT VARIABLES:
    RUST_LOG                Log level filter (default: info)

EXAMPLES:
    tripwire --definitions signals.json --trigger-log triggers.jsonl < feed.jsonl
"#;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ArgsError {
    #[error("{0} requires a path argument")]
    MissingValue(String),

    #[error("Unknown argument: {0}")]
    Unknown(String),

    #[error("--definitions is required")]
    MissingDefinitions,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliArgs {
    pub config: Option<PathBuf>,
    pub definitions: PathBuf,
    pub trigger_log: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Run(CliArgs),
    Help,
}

impl CliArgs {
    /// Parse arguments, excluding the program name
    pub fn parse<I, S>(args: I) -> Result<Command, ArgsError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut config = None;
        let mut definitions = None;
        let mut trigger_log = None;

        let mut args = args.into_iter().map(Into::into);
        while let Some(arg) = args.next() {
            let slot = match arg.as_str() {
                "--help" | "-h" => return Ok(Command::Help),
                "--config" | "-c" => &mut config,
                "--definitions" | "-d" => &mut definitions,
                "--trigger-log" | "-t" => &mut trigger_log,
                _ => return Err(ArgsError::Unknown(arg.clone())),
            };
            let value = args.next().ok_or_else(|| ArgsError::MissingValue(arg.clone()))?;
            *slot = Some(PathBuf::from(value));
        }

        Ok(Command::Run(CliArgs {
            config,
            definitions: definitions.ok_or(ArgsError::MissingDefinitions)?,
            trigger_log: trigger_log.unwrap_or_else(|| PathBuf::from("triggers.jsonl")),
        }))
    }
}
