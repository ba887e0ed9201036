//! Launching a single command.
//!
//! Everything that allocates (argv and path `CString`s) is prepared in the
//! parent. After `fork` the child only touches descriptors and then execs,
//! reporting failures through its exit status:
//!
//! * [`STATUS_REDIRECT_FAILED`] when a redirection target cannot be opened,
//! * [`STATUS_NOT_EXECUTABLE`] when `execvp` fails for any other reason,
//! * [`STATUS_NOT_FOUND`] when the program does not exist.

use std::ffi::{CStr, CString, NulError};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::RawFd;

use nix::errno::Errno;
use nix::fcntl::{self, FcntlArg, FdFlag, OFlag};
use nix::sys::signal::{self, SigHandler, Signal};
use nix::sys::stat::Mode;
use nix::unistd::{self, ForkResult, Pid};
use thiserror::Error;
use tracing::{debug, warn};

use crate::types::*;

pub const STATUS_REDIRECT_FAILED: i32 = 125;
pub const STATUS_NOT_EXECUTABLE: i32 = 126;
pub const STATUS_NOT_FOUND: i32 = 127;

#[derive(Debug, Error)]
pub enum ExecError {
	#[error("cannot create pipe")]
	Pipe(#[source] nix::Error),
	#[error("cannot fork `{command}`")]
	Fork { command: String, #[source] source: nix::Error },
	#[error("argument contains a nul byte")]
	Nul(#[from] NulError),
	#[error("empty command")]
	EmptyCommand,
}

/// Which open ends of a pipeline a command sits on. Redirections only
/// apply there: `<` on the first command, `>` and `!>` on the last.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Ends {
	pub first: bool,
	pub last: bool,
}

impl Ends {
	pub const BOTH: Ends = Ends { first: true, last: true };

	pub fn of(index: usize, len: usize) -> Ends {
		Ends { first: index == 0, last: index + 1 == len }
	}

	fn admits(self, typ: RedirectType) -> bool {
		match typ {
			RedirectType::Input => self.first,
			RedirectType::Output | RedirectType::Error => self.last,
		}
	}
}

#[derive(Debug)]
struct Redirection {
	typ: RedirectType,
	path: Option<CString>,
}

impl Redirection {
	fn stream(&self) -> RawFd {
		match self.typ {
			RedirectType::Input => libc::STDIN_FILENO,
			RedirectType::Output => libc::STDOUT_FILENO,
			RedirectType::Error => libc::STDERR_FILENO,
		}
	}

	fn flags(&self) -> OFlag {
		match self.typ {
			RedirectType::Input => OFlag::O_RDONLY,
			RedirectType::Output | RedirectType::Error => OFlag::O_WRONLY | OFlag::O_CREAT | OFlag::O_TRUNC,
		}
	}
}

/// A command ready to be exec'd in a freshly forked child.
#[derive(Debug)]
pub struct PreparedCommand {
	argv: Vec<CString>,
	redirections: Vec<Redirection>,
}

impl PreparedCommand {
	pub fn new(command: &Command, ends: Ends) -> Result<PreparedCommand, ExecError> {
		if command.argv.is_empty() {
			return Err(ExecError::EmptyCommand);
		}
		let argv = command.argv.iter()
			.map(|a| CString::new(a.as_bytes()))
			.collect::<Result<Vec<CString>, NulError>>()?;

		let slots = [
			(RedirectType::Input, &command.redirects.stdin),
			(RedirectType::Output, &command.redirects.stdout),
			(RedirectType::Error, &command.redirects.stderr),
		];
		let mut redirections = Vec::with_capacity(slots.len());
		for &(typ, target) in &slots {
			let target = match *target {
				Some(ref t) => t,
				None => continue,
			};
			if !ends.admits(typ) {
				warn!(command = %command.name(), operator = typ.operator(), "redirection ignored inside a pipeline");
				continue;
			}
			let path = match *target {
				Target::File(ref p) => Some(CString::new(p.as_os_str().as_bytes())?),
				Target::Missing => None,
			};
			redirections.push(Redirection { typ: typ, path: path });
		}
		Ok(PreparedCommand { argv: argv, redirections: redirections })
	}

	pub fn name(&self) -> String {
		self.argv[0].to_string_lossy().into_owned()
	}
}

/// Pipe descriptors a child takes over as its standard streams, plus every
/// pipe descriptor of the pipeline, all of which it closes before exec.
#[derive(Debug, Default)]
pub struct Wiring {
	pub stdin: Option<RawFd>,
	pub stdout: Option<RawFd>,
	pub close: Vec<RawFd>,
}

fn report(parts: &[&[u8]]) {
	for part in parts {
		unsafe {
			libc::write(libc::STDERR_FILENO, part.as_ptr() as *const libc::c_void, part.len());
		}
	}
}

fn exit(status: i32) -> ! {
	unsafe { libc::_exit(status) }
}

fn open_onto(path: &CStr, flags: OFlag, stream: RawFd) -> nix::Result<()> {
	let mode = Mode::S_IRUSR | Mode::S_IWUSR | Mode::S_IRGRP | Mode::S_IROTH;
	let fd = fcntl::open(path, flags, mode)?;
	if fd != stream {
		let r = unistd::dup2(fd, stream);
		let _ = unistd::close(fd);
		r?;
	}
	Ok(())
}

fn take_stream(fd: RawFd, stream: RawFd) -> nix::Result<()> {
	if fd == stream {
		// Already in place (the parent had `stream` closed); dup2 would keep
		// the pipe's FD_CLOEXEC.
		fcntl::fcntl(fd, FcntlArg::F_SETFD(FdFlag::empty()))?;
	} else {
		unistd::dup2(fd, stream)?;
	}
	Ok(())
}

fn install_wiring(wiring: &Wiring) -> nix::Result<()> {
	if let Some(fd) = wiring.stdin {
		take_stream(fd, libc::STDIN_FILENO)?;
	}
	if let Some(fd) = wiring.stdout {
		take_stream(fd, libc::STDOUT_FILENO)?;
	}
	// Pipe ends numbered 0-2 are now standard streams or still close on exec.
	for &fd in wiring.close.iter().filter(|&&fd| fd > libc::STDERR_FILENO) {
		let _ = unistd::close(fd);
	}
	Ok(())
}

/// Runs in the child right after `fork`. Never returns.
pub fn exec_command(command: &PreparedCommand, wiring: &Wiring) -> ! {
	let name = command.argv[0].as_bytes();

	// Ignored by the Rust runtime in the parent; programs expect the default.
	unsafe {
		let _ = signal::signal(Signal::SIGPIPE, SigHandler::SigDfl);
	}

	if let Err(e) = install_wiring(wiring) {
		report(&[b"scripter: ", name, b": pipe: ", e.desc().as_bytes(), b"\n"]);
		exit(STATUS_REDIRECT_FAILED);
	}

	// Every target is attempted so that output files are created even when
	// the input cannot be opened.
	let mut failed = false;
	for redirection in &command.redirections {
		match redirection.path {
			None => {
				report(&[b"scripter: ", name, b": missing file name after `", redirection.typ.operator().as_bytes(), b"`\n"]);
				failed = true;
			},
			Some(ref path) => if let Err(e) = open_onto(path, redirection.flags(), redirection.stream()) {
				report(&[b"scripter: ", path.as_bytes(), b": ", e.desc().as_bytes(), b"\n"]);
				failed = true;
			},
		}
	}
	if failed {
		exit(STATUS_REDIRECT_FAILED);
	}

	let e = match unistd::execvp(&command.argv[0], &command.argv) {
		Ok(never) => match never {},
		Err(e) => e,
	};
	report(&[b"scripter: ", name, b": ", e.desc().as_bytes(), b"\n"]);
	exit(if e == Errno::ENOENT { STATUS_NOT_FOUND } else { STATUS_NOT_EXECUTABLE })
}

/// Forks and execs `command` in the child. The parent only learns the pid,
/// or that no process could be created.
pub fn spawn(command: &PreparedCommand, wiring: &Wiring) -> Result<Pid, ExecError> {
	match unsafe { unistd::fork() } {
		Ok(ForkResult::Parent { child }) => {
			debug!(pid = %child, command = %command.name(), "spawned");
			Ok(child)
		},
		Ok(ForkResult::Child) => exec_command(command, wiring),
		Err(e) => Err(ExecError::Fork { command: command.name(), source: e }),
	}
}

/// Launches a lone command with its own redirections, inheriting whatever
/// it does not redirect.
pub fn launch(command: &Command) -> Result<Pid, ExecError> {
	let prepared = PreparedCommand::new(command, Ends::BOTH)?;
	spawn(&prepared, &Wiring::default())
}
