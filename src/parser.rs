use std::ffi::{OsStr, OsString};
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;

use thiserror::Error;

use crate::types::*;

pub const WHITESPACE: &[u8] = b" \t\n\r";
pub const PIPE: &[u8] = b"|";
pub const BACKGROUND_MARKER: u8 = b'&';

#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
#[error("more than {capacity} tokens")]
pub struct CapacityExceeded {
	pub capacity: usize,
}

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ParseError {
	#[error("empty command line")]
	EmptyLine,
	#[error("empty command in pipeline segment {index}")]
	EmptyCommand { index: usize },
	#[error("too many commands in pipeline (at most {capacity})")]
	TooManyCommands { capacity: usize },
	#[error("too many arguments in pipeline segment {index} (at most {capacity})")]
	TooManyArguments { index: usize, capacity: usize },
}

type ParseResult<T> = Result<T, ParseError>;

/// Scans raw bytes; delimiters are ASCII, so multibyte text and invalid
/// UTF-8 pass through untouched.
struct Tokenizer<'a> {
	text: &'a [u8],
	i: usize,
	delimiters: &'a [u8],
}

impl<'a> Tokenizer<'a> {
	fn proceed_while<F>(&mut self, f: F) where F: Fn(u8) -> bool {
		while let Some(&c) = self.text.get(self.i) {
			if !f(c) { break; }
			self.i += 1;
		}
	}
}

impl<'a> Iterator for Tokenizer<'a> {
	type Item = &'a [u8];

	fn next(&mut self) -> Option<&'a [u8]> {
		let delimiters = self.delimiters;
		self.proceed_while(|c| delimiters.contains(&c));
		let orig = self.i;
		self.proceed_while(|c| !delimiters.contains(&c));
		if orig == self.i {
			None
		} else {
			Some(&self.text[orig .. self.i])
		}
	}
}

fn is_whitespace(c: &u8) -> bool {
	WHITESPACE.contains(c)
}

fn trim(text: &[u8]) -> &[u8] {
	let start = text.iter().position(|c| !is_whitespace(c)).unwrap_or(text.len());
	let end = text.iter().rposition(|c| !is_whitespace(c)).map_or(start, |i| i + 1);
	&text[start .. end]
}

/// Splits `text` at runs of `delimiters`, never yielding empty tokens.
/// At most `max_tokens - 1` tokens fit; more is an error rather than a
/// silent truncation.
pub fn tokenize<'a>(text: &'a [u8], delimiters: &'a [u8], max_tokens: usize) -> Result<Vec<&'a [u8]>, CapacityExceeded> {
	let capacity = max_tokens.saturating_sub(1);
	let mut tokens = Vec::new();
	for token in (Tokenizer { text: text, i: 0, delimiters: delimiters }) {
		if tokens.len() == capacity {
			return Err(CapacityExceeded { capacity: capacity });
		}
		tokens.push(token);
	}
	Ok(tokens)
}

/// Strips `<`, `>` and `!>` with their paths out of `tokens`. A later
/// operator of the same kind overrides an earlier one.
pub fn resolve_redirections<S: AsRef<[u8]>>(tokens: &[S]) -> (Vec<OsString>, Redirects) {
	let mut argv = Vec::with_capacity(tokens.len());
	let mut redirects = Redirects::default();
	let mut tokens = tokens.iter().map(|t| t.as_ref());
	while let Some(token) = tokens.next() {
		match RedirectType::from_operator(token) {
			Some(typ) => {
				let target = match tokens.next() {
					Some(path) => Target::File(PathBuf::from(OsStr::from_bytes(path))),
					None => Target::Missing,
				};
				*redirects.slot_mut(typ) = Some(target);
			},
			None => argv.push(OsStr::from_bytes(token).to_owned()),
		}
	}
	(argv, redirects)
}

/// Splits a line into trimmed pipeline segments and detects a trailing `&`.
/// Only a trailing marker counts; `&` anywhere else stays argument text.
pub fn parse_line<'a>(line: &'a [u8], limits: &Limits) -> ParseResult<RawPipeline<'a>> {
	let segments = tokenize(line, PIPE, limits.max_commands)
		.map_err(|e| ParseError::TooManyCommands { capacity: e.capacity })?;
	let mut segments: Vec<&'a [u8]> = segments.into_iter().map(trim).collect();
	if segments.iter().all(|s| s.is_empty()) {
		return Err(ParseError::EmptyLine);
	}

	let mut is_background = false;
	let last = segments.len() - 1;
	if let Some((&BACKGROUND_MARKER, stripped)) = segments[last].split_last() {
		segments[last] = trim(stripped);
		is_background = true;
	}
	Ok(RawPipeline { segments: segments, is_background: is_background })
}

pub fn parse_command(segment: &[u8], index: usize, limits: &Limits) -> ParseResult<Command> {
	let tokens = tokenize(segment, WHITESPACE, limits.max_args)
		.map_err(|e| ParseError::TooManyArguments { index: index, capacity: e.capacity })?;
	let (argv, redirects) = resolve_redirections(&tokens);
	if argv.is_empty() {
		return Err(ParseError::EmptyCommand { index: index });
	}
	Ok(Command { argv: argv, redirects: redirects })
}

/// Parses every segment of `line` up front so that a malformed segment is
/// reported before anything is spawned.
pub fn parse(line: &[u8], limits: &Limits) -> ParseResult<Pipeline> {
	let raw = parse_line(line, limits)?;
	let commands = raw.segments.iter()
		.enumerate()
		.map(|(i, segment)| parse_command(segment, i, limits))
		.collect::<ParseResult<Vec<Command>>>()?;
	Ok(Pipeline { commands: commands, is_background: raw.is_background })
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	fn file(path: &str) -> Option<Target> {
		Some(Target::File(PathBuf::from(path)))
	}

	fn segments<'a>(raw: &RawPipeline<'a>) -> Vec<&'a str> {
		raw.segments.iter().map(|s| std::str::from_utf8(s).unwrap()).collect()
	}

	#[test]
	fn tokenize_collapses_delimiter_runs() {
		let tokens = tokenize(b"  ls \t -l\n  /tmp ", WHITESPACE, MAX_ARGS).unwrap();
		assert_eq!(tokens, vec![&b"ls"[..], &b"-l"[..], &b"/tmp"[..]]);
	}

	#[test]
	fn tokenize_only_delimiters_yields_nothing() {
		assert!(tokenize(b" \t \n", WHITESPACE, MAX_ARGS).unwrap().is_empty());
		assert!(tokenize(b"|||", PIPE, MAX_COMMANDS).unwrap().is_empty());
		assert!(tokenize(b"", WHITESPACE, MAX_ARGS).unwrap().is_empty());
	}

	#[test]
	fn tokenize_reports_capacity() {
		assert_eq!(tokenize(b"a b c", WHITESPACE, 4).unwrap(), vec![&b"a"[..], &b"b"[..], &b"c"[..]]);
		assert_eq!(tokenize(b"a b c d", WHITESPACE, 4), Err(CapacityExceeded { capacity: 3 }));
	}

	#[test]
	fn tokenize_handles_multibyte_text() {
		let tokens = tokenize("écho  ñ|ü".as_bytes(), WHITESPACE, MAX_ARGS).unwrap();
		assert_eq!(tokens, vec!["écho".as_bytes(), "ñ|ü".as_bytes()]);
	}

	#[test]
	fn invalid_utf8_is_kept_verbatim() {
		let pipeline = parse(b"touch caf\xe9 > out\xff.txt", &Limits::default()).unwrap();
		let command = &pipeline.commands[0];
		assert_eq!(command.argv[1].as_bytes(), b"caf\xe9");
		assert_eq!(command.redirects.stdout, Some(Target::File(PathBuf::from(OsStr::from_bytes(b"out\xff.txt")))));
		assert_eq!(command.name(), "touch");
	}

	#[test]
	fn redirections_are_stripped_mid_line() {
		let (argv, redirects) = resolve_redirections(&["sort", "<", "in.txt", "-r", ">", "out.txt", "!>", "err.txt"]);
		assert_eq!(argv, vec!["sort", "-r"]);
		assert_eq!(redirects.stdin, file("in.txt"));
		assert_eq!(redirects.stdout, file("out.txt"));
		assert_eq!(redirects.stderr, file("err.txt"));
	}

	#[test]
	fn later_redirection_wins() {
		let (argv, redirects) = resolve_redirections(&["echo", ">", "a", "x", ">", "b"]);
		assert_eq!(argv, vec!["echo", "x"]);
		assert_eq!(redirects.stdout, file("b"));
		assert_eq!(redirects.stdin, None);
	}

	#[test]
	fn trailing_operator_binds_missing_target() {
		let (argv, redirects) = resolve_redirections(&["cat", "<"]);
		assert_eq!(argv, vec!["cat"]);
		assert_eq!(redirects.stdin, Some(Target::Missing));
	}

	#[test]
	fn glued_operator_is_an_argument() {
		let (argv, redirects) = resolve_redirections(&["echo", ">out"]);
		assert_eq!(argv, vec![">out"]);
		assert!(redirects.is_empty());
	}

	#[test]
	fn resolving_twice_is_a_no_op() {
		let (argv, _) = resolve_redirections(&["cat", "<", ">", "x", "!>"]);
		let bytes: Vec<&[u8]> = argv.iter().map(|a| a.as_bytes()).collect();
		let (again, redirects) = resolve_redirections(&bytes);
		assert_eq!(argv, again);
		assert!(redirects.is_empty());
	}

	#[test]
	fn trim_strips_only_whitespace() {
		assert_eq!(trim(b" \t a b \r\n"), b"a b");
		assert_eq!(trim(b"   "), b"");
		assert_eq!(trim(b"x"), b"x");
	}

	#[test]
	fn parse_line_splits_pipeline() {
		let raw = parse_line(b"echo hi | wc -l", &Limits::default()).unwrap();
		assert_eq!(segments(&raw), vec!["echo hi", "wc -l"]);
		assert!(!raw.is_background);
	}

	#[test]
	fn trailing_ampersand_sets_background() {
		let raw = parse_line(b"sleep 5 &", &Limits::default()).unwrap();
		assert_eq!(segments(&raw), vec!["sleep 5"]);
		assert!(raw.is_background);

		let raw = parse_line(b"yes | head -n 1&  ", &Limits::default()).unwrap();
		assert_eq!(segments(&raw), vec!["yes", "head -n 1"]);
		assert!(raw.is_background);
	}

	#[test]
	fn embedded_ampersand_is_literal() {
		let pipeline = parse(b"echo a&b", &Limits::default()).unwrap();
		assert!(!pipeline.is_background);
		assert_eq!(pipeline.commands[0].argv, vec!["echo", "a&b"]);

		let pipeline = parse(b"echo & | cat", &Limits::default()).unwrap();
		assert!(!pipeline.is_background);
		assert_eq!(pipeline.commands[0].argv, vec!["echo", "&"]);
	}

	#[test]
	fn empty_lines_are_rejected() {
		assert_eq!(parse_line(b"", &Limits::default()), Err(ParseError::EmptyLine));
		assert_eq!(parse_line(b"  \t", &Limits::default()), Err(ParseError::EmptyLine));
		assert_eq!(parse(b"&", &Limits::default()), Err(ParseError::EmptyCommand { index: 0 }));
		assert_eq!(parse(b"ls | | wc", &Limits::default()), Err(ParseError::EmptyCommand { index: 1 }));
		assert_eq!(parse(b"ls | < in.txt", &Limits::default()), Err(ParseError::EmptyCommand { index: 1 }));
	}

	#[test]
	fn limits_are_enforced() {
		let limits = Limits { max_commands: 3, max_args: 3 };
		assert_eq!(parse(b"a | b | c", &limits), Err(ParseError::TooManyCommands { capacity: 2 }));
		assert_eq!(parse(b"a | b x y", &limits), Err(ParseError::TooManyArguments { index: 1, capacity: 2 }));
		assert!(parse(b"a x | b y", &limits).is_ok());
	}

	#[test]
	fn parse_builds_commands() {
		let pipeline = parse(b"cat < in.txt | sort | uniq -c > out.txt !> err.txt &", &Limits::default()).unwrap();
		assert!(pipeline.is_background);
		assert_eq!(pipeline.commands.len(), 3);
		assert_eq!(pipeline.commands[0].argv, vec!["cat"]);
		assert_eq!(pipeline.commands[0].redirects.stdin, file("in.txt"));
		assert_eq!(pipeline.commands[1].argv, vec!["sort"]);
		assert!(pipeline.commands[1].redirects.is_empty());
		assert_eq!(pipeline.commands[2].argv, vec!["uniq", "-c"]);
		assert_eq!(pipeline.commands[2].redirects.stdout, file("out.txt"));
		assert_eq!(pipeline.commands[2].redirects.stderr, file("err.txt"));
	}

	proptest! {
		#[test]
		fn joined_segments_split_back(parts in prop::collection::vec("[a-z][a-z0-9 \t]{0,12}", 1..MAX_COMMANDS)) {
			let line = parts.join("|");
			let raw = parse_line(line.as_bytes(), &Limits::default()).unwrap();
			prop_assert!(!raw.is_background);
			prop_assert_eq!(raw.segments.len(), parts.len());
			for (got, want) in raw.segments.iter().zip(&parts) {
				prop_assert_eq!(*got, want.trim().as_bytes());
			}
		}
	}
}
