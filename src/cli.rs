use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::types::{Limits, MAX_ARGS, MAX_COMMANDS};

#[derive(Debug, Clone, Parser)]
#[command(
	name = "scripter",
	version,
	about = "Run the command lines of a script file, with pipes, redirections and background jobs.",
	long_about = None
)]
pub struct CliArgs {
	/// Script to run. Its first line must start with `## Script de SSOO`.
	#[arg(value_name = "SCRIPT")]
	pub script: PathBuf,

	/// Logging level (error, warn, info, debug, trace).
	///
	/// If omitted, `SCRIPTER_LOG` or `warn` is used.
	#[arg(long, value_enum, value_name = "LEVEL")]
	pub log_level: Option<LogLevel>,

	/// Commands per line plus one.
	#[arg(long, value_name = "N", default_value_t = MAX_COMMANDS, value_parser = parse_limit)]
	pub max_commands: usize,

	/// Words per command plus one, redirections included.
	#[arg(long, value_name = "N", default_value_t = MAX_ARGS, value_parser = parse_limit)]
	pub max_args: usize,
}

impl CliArgs {
	pub fn limits(&self) -> Limits {
		Limits { max_commands: self.max_commands, max_args: self.max_args }
	}
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
	Error,
	Warn,
	Info,
	Debug,
	Trace,
}

fn parse_limit(s: &str) -> Result<usize, String> {
	let n: usize = s.parse().map_err(|e| format!("{}", e))?;
	if n < 2 {
		return Err("must be at least 2".to_string());
	}
	Ok(n)
}

pub fn parse() -> CliArgs {
	CliArgs::parse()
}
