use std::os::unix::io::{AsRawFd, OwnedFd, RawFd};

use nix::unistd::{self, Pid};
use tracing::{debug, info, warn};

use crate::exec::{Ends, ExecError, PreparedCommand, Wiring};
use crate::global;
use crate::job::{Job, JobBuilder, JobId};
use crate::types::Pipeline;

#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd", target_os = "netbsd", target_os = "openbsd"))]
fn cloexec_pipe() -> nix::Result<(OwnedFd, OwnedFd)> {
	unistd::pipe2(nix::fcntl::OFlag::O_CLOEXEC)
}

#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd", target_os = "netbsd", target_os = "openbsd")))]
fn cloexec_pipe() -> nix::Result<(OwnedFd, OwnedFd)> {
	use nix::fcntl::{fcntl, FcntlArg, FdFlag};
	let (r, w) = unistd::pipe()?;
	fcntl(r.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;
	fcntl(w.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;
	Ok((r, w))
}

/// The `len - 1` pipes of a pipeline, as (read end, write end). Dropping
/// the set closes every descriptor once.
#[derive(Debug)]
struct PipeSet {
	pipes: Vec<(OwnedFd, OwnedFd)>,
}

impl PipeSet {
	fn new(count: usize) -> Result<PipeSet, ExecError> {
		let mut pipes = Vec::with_capacity(count);
		for _ in 0 .. count {
			pipes.push(cloexec_pipe().map_err(ExecError::Pipe)?);
		}
		Ok(PipeSet { pipes: pipes })
	}

	fn raw_fds(&self) -> Vec<RawFd> {
		self.pipes.iter().flat_map(|&(ref r, ref w)| vec![r.as_raw_fd(), w.as_raw_fd()]).collect()
	}

	/// Command `i` reads from pipe `i - 1` and writes to pipe `i`.
	fn wiring(&self, i: usize) -> Wiring {
		Wiring {
			stdin: if i > 0 { Some(self.pipes[i - 1].0.as_raw_fd()) } else { None },
			stdout: self.pipes.get(i).map(|p| p.1.as_raw_fd()),
			close: self.raw_fds(),
		}
	}
}

fn spawn_commands(prepared: &[PreparedCommand], job_builder: &mut JobBuilder) -> Result<(), ExecError> {
	let pipes = PipeSet::new(prepared.len() - 1)?;
	debug!(pipes = pipes.pipes.len(), "pipes created");
	for (i, command) in prepared.iter().enumerate() {
		let wiring = pipes.wiring(i);
		job_builder.push_fork(command, &wiring)?;
	}
	Ok(())
}

#[derive(Debug)]
pub enum EvalResult {
	/// A foreground pipeline ran to completion.
	Done(Job),
	/// A background pipeline was registered; `pid` is its last process.
	Running { id: JobId, pid: Pid },
}

/// Runs `pipeline`: every command is spawned left to right with its pipes
/// in place before the parent closes its copies. Either every command is
/// launched or none is left running.
pub fn eval(state: &mut global::State, pipeline: &Pipeline) -> Result<EvalResult, ExecError> {
	let commands = &pipeline.commands;
	if commands.is_empty() {
		return Err(ExecError::EmptyCommand);
	}

	let prepared = commands.iter()
		.enumerate()
		.map(|(i, c)| PreparedCommand::new(c, Ends::of(i, commands.len())))
		.collect::<Result<Vec<PreparedCommand>, ExecError>>()?;

	let mut job_builder = JobBuilder::new(pipeline);
	if let Err(e) = spawn_commands(&prepared, &mut job_builder) {
		if job_builder.is_empty() {
			warn!(error = %e, "pipeline launch failed before any command started");
		} else {
			warn!(error = %e, spawned = job_builder.len(), "pipeline launch failed, killing spawned commands");
		}
		job_builder.abort();
		return Err(e);
	}
	let mut job = job_builder.build();

	if pipeline.is_background {
		let pid = match job.last_pid() {
			Some(pid) => pid,
			None => return Err(ExecError::EmptyCommand),
		};
		let text = job.text.clone();
		let id = state.job_set.push(job);
		info!(job = id, %pid, command = %text, "running in background");
		Ok(EvalResult::Running { id: id, pid: pid })
	} else {
		job.wait();
		for pr in job.processes.iter().filter(|pr| !pr.status.success()) {
			warn!(segment = pr.index, pid = %pr.pid, command = %pr.command, status = %pr.status, "command failed");
		}
		Ok(EvalResult::Done(job))
	}
}
