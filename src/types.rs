use std::borrow::Cow;
use std::ffi::OsString;
use std::path::PathBuf;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum RedirectType { Input, Output, Error }

impl RedirectType {
	pub fn from_operator(token: &[u8]) -> Option<RedirectType> {
		match token {
			b"<" => Some(RedirectType::Input),
			b">" => Some(RedirectType::Output),
			b"!>" => Some(RedirectType::Error),
			_ => None,
		}
	}

	pub fn operator(self) -> &'static str {
		match self {
			RedirectType::Input => "<",
			RedirectType::Output => ">",
			RedirectType::Error => "!>",
		}
	}
}

/// Where a redirection points. `Missing` is an operator that ended the
/// segment; the child reports it when it tries to open it.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Target {
	File(PathBuf),
	Missing,
}

#[derive(Debug, Default, PartialEq, Eq, Clone)]
pub struct Redirects {
	pub stdin: Option<Target>,
	pub stdout: Option<Target>,
	pub stderr: Option<Target>,
}

impl Redirects {
	pub fn slot_mut(&mut self, typ: RedirectType) -> &mut Option<Target> {
		match typ {
			RedirectType::Input => &mut self.stdin,
			RedirectType::Output => &mut self.stdout,
			RedirectType::Error => &mut self.stderr,
		}
	}

	pub fn is_empty(&self) -> bool {
		self.stdin.is_none() && self.stdout.is_none() && self.stderr.is_none()
	}
}

/// Arguments are kept as raw bytes from the script, not necessarily UTF-8.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Command {
	pub argv: Vec<OsString>,
	pub redirects: Redirects,
}

impl Command {
	pub fn name(&self) -> Cow<'_, str> {
		self.argv.first().map_or(Cow::Borrowed(""), |s| s.to_string_lossy())
	}
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Pipeline {
	pub commands: Vec<Command>,
	pub is_background: bool,
}

/// A line split on `|`, segments not yet tokenized.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct RawPipeline<'a> {
	pub segments: Vec<&'a [u8]>,
	pub is_background: bool,
}

pub const MAX_COMMANDS: usize = 10;
pub const MAX_ARGS: usize = 15;

/// Per-line capacity bounds. A bound of `n` admits `n - 1` items.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Limits {
	pub max_commands: usize,
	pub max_args: usize,
}

impl Default for Limits {
	fn default() -> Limits {
		Limits { max_commands: MAX_COMMANDS, max_args: MAX_ARGS }
	}
}
