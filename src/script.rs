//! Script driver: frames a script into lines, checks the header and feeds
//! every command line through the parser and the evaluator.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, error, info};

use crate::eval::{self, EvalResult};
use crate::exec::ExecError;
use crate::global;
use crate::parser::{self, ParseError};

pub const HEADER: &str = "## Script de SSOO";

#[derive(Debug, Error)]
pub enum ScriptError {
	#[error("cannot open script {}", .path.display())]
	Open { path: PathBuf, #[source] source: io::Error },
	#[error("I/O error")]
	Io(#[from] io::Error),
	#[error("invalid script format at line 1")]
	InvalidHeader,
	#[error("empty command line encountered at line {line}")]
	EmptyLine { line: usize },
	#[error("invalid command at line {line}")]
	Parse { line: usize, #[source] source: ParseError },
	#[error("cannot run line {line}")]
	Exec { line: usize, #[source] source: ExecError },
}

/// Numbered lines of a script, with line terminators and every `\r`
/// removed. A last line without a newline is still yielded. Lines are raw
/// bytes: arguments and paths need not be UTF-8.
pub struct Script<R> {
	reader: R,
	line_number: usize,
}

impl<R: BufRead> Script<R> {
	pub fn new(reader: R) -> Script<R> {
		Script { reader: reader, line_number: 0 }
	}
}

impl<R: BufRead> Iterator for Script<R> {
	type Item = io::Result<(usize, Vec<u8>)>;

	fn next(&mut self) -> Option<io::Result<(usize, Vec<u8>)>> {
		let mut buf: Vec<u8> = vec![];
		match self.reader.read_until(b'\n', &mut buf) {
			Ok(0) => None,
			Ok(_) => {
				if buf.last() == Some(&b'\n') {
					buf.pop();
				}
				buf.retain(|&b| b != b'\r');
				self.line_number += 1;
				Some(Ok((self.line_number, buf)))
			},
			Err(e) => Some(Err(e)),
		}
	}
}

#[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
pub struct ScriptSummary {
	/// Command lines launched, foreground or background.
	pub executed: usize,
	/// Foreground pipelines with at least one failed command.
	pub failed: usize,
	pub background: usize,
	/// Background jobs not yet finished when the script ended.
	pub still_running: usize,
}

fn reap_finished(state: &mut global::State) {
	for finished in state.job_set.reap() {
		info!(
			job = finished.id,
			command = %finished.job.text,
			status = ?finished.job.code(),
			elapsed_ms = finished.job.elapsed().as_millis() as u64,
			"background job finished"
		);
	}
}

fn run_line<W: Write>(line: &[u8], number: usize, state: &mut global::State, out: &mut W, summary: &mut ScriptSummary) -> Result<(), ScriptError> {
	let pipeline = parser::parse(line, &state.limits)
		.map_err(|e| ScriptError::Parse { line: number, source: e })?;
	debug!(line = number, commands = pipeline.commands.len(), background = pipeline.is_background, "parsed");

	let result = eval::eval(state, &pipeline)
		.map_err(|e| ScriptError::Exec { line: number, source: e })?;
	summary.executed += 1;
	match result {
		EvalResult::Done(job) => {
			if !job.success() {
				summary.failed += 1;
			}
		},
		EvalResult::Running { pid, .. } => {
			summary.background += 1;
			let what = if pipeline.commands.len() == 1 { "Command" } else { "Pipeline" };
			writeln!(out, "{} running in background, PID: {}", what, pid)?;
			out.flush()?;
		},
	}
	Ok(())
}

/// Runs a whole script. Background announcements go to `out`; the
/// commands themselves inherit the process's standard streams.
pub fn run<R: BufRead, W: Write>(reader: R, state: &mut global::State, out: &mut W) -> Result<ScriptSummary, ScriptError> {
	let mut summary = ScriptSummary::default();
	let mut saw_header = false;
	for line in Script::new(reader) {
		let (number, line) = line?;
		if number == 1 {
			if !line.starts_with(HEADER.as_bytes()) {
				return Err(ScriptError::InvalidHeader);
			}
			saw_header = true;
			continue;
		}
		reap_finished(state);
		if line.iter().all(u8::is_ascii_whitespace) {
			return Err(ScriptError::EmptyLine { line: number });
		}
		run_line(&line, number, state, out, &mut summary)?;
	}
	if !saw_header {
		return Err(ScriptError::InvalidHeader);
	}

	reap_finished(state);
	summary.still_running = state.job_set.len();
	for (id, job) in state.job_set.iter() {
		info!(job = id, command = %job.text, "left running in background");
	}
	Ok(summary)
}

pub fn run_script(path: &Path, state: &mut global::State) -> Result<ScriptSummary, ScriptError> {
	let file = File::open(path).map_err(|e| ScriptError::Open { path: path.to_owned(), source: e })?;
	let r = run(BufReader::new(file), state, &mut io::stdout());
	if let Err(ref e) = r {
		error!(script = %path.display(), error = %e, "script aborted");
	}
	r
}
