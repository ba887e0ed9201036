//! Prints the lines of a file that contain a string.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "mygrep", about = "Print the lines of FILE that contain NEEDLE.")]
struct Args {
	#[arg(value_name = "FILE")]
	file: PathBuf,
	#[arg(value_name = "NEEDLE")]
	needle: String,
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
	needle.is_empty() || haystack.windows(needle.len()).any(|w| w == needle)
}

fn search<W: Write>(path: &Path, needle: &str, out: &mut W) -> Result<bool> {
	let file = File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
	let mut reader = BufReader::new(file);
	let mut line: Vec<u8> = vec![];
	let mut found = false;
	loop {
		line.clear();
		let n = reader.read_until(b'\n', &mut line).with_context(|| format!("cannot read {}", path.display()))?;
		if n == 0 {
			break;
		}
		if contains(&line, needle.as_bytes()) {
			out.write_all(&line)?;
			found = true;
		}
	}
	Ok(found)
}

fn run<W: Write>(args: &Args, out: &mut W) -> Result<()> {
	if !search(&args.file, &args.needle, out)? {
		writeln!(out, "{} not found. ", args.needle)?;
	}
	out.flush()?;
	Ok(())
}

fn main() -> ExitCode {
	let args = Args::parse();
	let stdout = io::stdout();
	let mut out = stdout.lock();
	match run(&args, &mut out) {
		Ok(()) => ExitCode::SUCCESS,
		Err(e) => {
			eprintln!("mygrep: {:#}", e);
			ExitCode::FAILURE
		},
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	struct Full;

	impl Write for Full {
		fn write(&mut self, _: &[u8]) -> io::Result<usize> {
			Err(io::Error::new(io::ErrorKind::Other, "no space left"))
		}

		fn flush(&mut self) -> io::Result<()> {
			Ok(())
		}
	}

	#[test]
	fn substring_match() {
		assert!(contains(b"hello world\n", b"o w"));
		assert!(!contains(b"hello\n", b"world"));
		assert!(contains(b"anything", b""));
		assert!(!contains(b"ab", b"abc"));
	}

	#[test]
	fn search_prints_matching_lines() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		write!(file, "alpha\nbeta\nalphabet").unwrap();
		let mut out = Vec::new();
		assert!(search(file.path(), "alpha", &mut out).unwrap());
		assert_eq!(out, b"alpha\nalphabet");

		let mut out = Vec::new();
		assert!(!search(file.path(), "gamma", &mut out).unwrap());
		assert!(out.is_empty());
	}

	#[test]
	fn failed_report_is_an_error() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		write!(file, "alpha\n").unwrap();
		let args = Args { file: file.path().to_owned(), needle: "gamma".to_string() };
		assert!(run(&args, &mut Full).is_err());

		let mut out = Vec::new();
		run(&args, &mut out).unwrap();
		assert_eq!(out, b"gamma not found. \n");
	}
}
