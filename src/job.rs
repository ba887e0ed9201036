use std::fmt;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{self, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use tracing::{debug, warn};

use crate::exec::{self, ExecError, PreparedCommand, Wiring};
use crate::types::Pipeline;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Status {
	Running,
	Exited(i32),
	Signaled(Signal),
	/// The process could no longer be waited for.
	Lost,
}

impl Status {
	pub fn is_finished(self) -> bool {
		self != Status::Running
	}

	pub fn success(self) -> bool {
		self == Status::Exited(0)
	}

	/// Shell-style status code: the exit code, or 128 plus the signal.
	pub fn code(self) -> Option<i32> {
		match self {
			Status::Exited(code) => Some(code),
			Status::Signaled(sig) => Some(128 + sig as i32),
			Status::Running | Status::Lost => None,
		}
	}
}

impl From<WaitStatus> for Status {
	fn from(status: WaitStatus) -> Status {
		match status {
			WaitStatus::Exited(_, code) => Status::Exited(code),
			WaitStatus::Signaled(_, sig, _) => Status::Signaled(sig),
			_ => Status::Running,
		}
	}
}

impl fmt::Display for Status {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match *self {
			Status::Running => write!(f, "running"),
			Status::Exited(code) => write!(f, "exit {}", code),
			Status::Signaled(sig) => write!(f, "killed by {}", sig),
			Status::Lost => write!(f, "lost"),
		}
	}
}

fn wait_blocking(pid: Pid) -> Status {
	loop {
		match wait::waitpid(pid, None) {
			Ok(status) => {
				let status = Status::from(status);
				if status.is_finished() {
					return status;
				}
			},
			Err(Errno::EINTR) => continue,
			Err(e) => {
				warn!(%pid, error = %e, "waitpid failed");
				return Status::Lost;
			},
		}
	}
}

fn wait_nonblocking(pid: Pid) -> Status {
	loop {
		match wait::waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
			Ok(status) => return Status::from(status),
			Err(Errno::EINTR) => continue,
			Err(e) => {
				warn!(%pid, error = %e, "waitpid failed");
				return Status::Lost;
			},
		}
	}
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Process {
	pub pid: Pid,
	pub index: usize,
	pub command: String,
	pub status: Status,
}

#[derive(Debug)]
pub struct Job {
	pub text: String,
	pub processes: Vec<Process>,
	pub started: Instant,
}

impl Job {
	pub fn is_finished(&self) -> bool {
		self.processes.iter().all(|pr| pr.status.is_finished())
	}

	/// True only if every process exited with status 0.
	pub fn success(&self) -> bool {
		self.processes.iter().all(|pr| pr.status.success())
	}

	/// Status code of the last process of the pipeline.
	pub fn code(&self) -> Option<i32> {
		self.processes.last().and_then(|pr| pr.status.code())
	}

	pub fn last_pid(&self) -> Option<Pid> {
		self.processes.last().map(|pr| pr.pid)
	}

	pub fn elapsed(&self) -> Duration {
		self.started.elapsed()
	}

	/// Blocks until every process has terminated.
	pub fn wait(&mut self) {
		for pr in self.processes.iter_mut().filter(|pr| !pr.status.is_finished()) {
			pr.status = wait_blocking(pr.pid);
			debug!(pid = %pr.pid, command = %pr.command, status = %pr.status, "reaped");
		}
	}

	/// Collects whatever has terminated without blocking.
	pub fn poll(&mut self) -> bool {
		for pr in self.processes.iter_mut().filter(|pr| !pr.status.is_finished()) {
			pr.status = wait_nonblocking(pr.pid);
		}
		self.is_finished()
	}
}

fn describe(pipeline: &Pipeline) -> String {
	let segments: Vec<String> = pipeline.commands.iter()
		.map(|c| c.argv.iter().map(|a| a.to_string_lossy()).collect::<Vec<_>>().join(" "))
		.collect();
	let mut text = segments.join(" | ");
	if pipeline.is_background {
		text.push_str(" &");
	}
	text
}

#[derive(Debug)]
pub struct JobBuilder {
	imp: Job,
}

impl JobBuilder {
	pub fn new(pipeline: &Pipeline) -> JobBuilder {
		JobBuilder {
			imp: Job {
				text: describe(pipeline),
				processes: Vec::with_capacity(pipeline.commands.len()),
				started: Instant::now(),
			}
		}
	}

	pub fn push_fork(&mut self, command: &PreparedCommand, wiring: &Wiring) -> Result<Pid, ExecError> {
		let pid = exec::spawn(command, wiring)?;
		let index = self.imp.processes.len();
		self.imp.processes.push(Process { pid: pid, index: index, command: command.name(), status: Status::Running });
		Ok(pid)
	}

	pub fn len(&self) -> usize {
		self.imp.processes.len()
	}

	pub fn is_empty(&self) -> bool {
		self.imp.processes.is_empty()
	}

	/// Kills and reaps everything spawned so far.
	pub fn abort(mut self) {
		for pr in &self.imp.processes {
			if let Err(e) = signal::kill(pr.pid, Signal::SIGKILL) {
				warn!(pid = %pr.pid, error = %e, "cannot kill partially launched pipeline");
			}
		}
		self.imp.wait();
	}

	pub fn build(self) -> Job {
		self.imp
	}
}

pub type JobId = usize;

#[derive(Debug)]
pub struct FinishedJob {
	pub id: JobId,
	pub job: Job,
}

/// Background jobs that have not been reaped yet. Ids are 1-based and
/// reused once a job is gone.
#[derive(Debug, Default)]
pub struct JobSet {
	jobs: Vec<Option<Job>>,
}

impl JobSet {
	pub fn new() -> JobSet {
		JobSet { jobs: Vec::new() }
	}

	pub fn push(&mut self, job: Job) -> JobId {
		let jobs = &mut self.jobs;
		if let Some((i, space)) = jobs.iter_mut().enumerate().find(|&(_, ref o)| o.is_none()) {
			*space = Some(job);
			i + 1
		} else {
			jobs.push(Some(job));
			jobs.len()
		}
	}

	pub fn get(&self, id: JobId) -> Option<&Job> {
		id.checked_sub(1).and_then(|i| self.jobs.get(i)).and_then(|o| o.as_ref())
	}

	pub fn len(&self) -> usize {
		self.jobs.iter().filter(|o| o.is_some()).count()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn iter(&self) -> impl Iterator<Item = (JobId, &Job)> {
		self.jobs.iter().enumerate().filter_map(|(i, o)| o.as_ref().map(|job| (i + 1, job)))
	}

	/// Non-blocking reaping pass. Jobs whose processes have all terminated
	/// are removed and returned.
	pub fn reap(&mut self) -> Vec<FinishedJob> {
		let mut finished = Vec::new();
		for (i, slot) in self.jobs.iter_mut().enumerate() {
			let done = match *slot {
				Some(ref mut job) => job.poll(),
				None => false,
			};
			if done {
				if let Some(job) = slot.take() {
					finished.push(FinishedJob { id: i + 1, job: job });
				}
			}
		}
		let len = self.jobs.iter().rposition(|o| o.is_some()).map_or(0, |i| i + 1);
		self.jobs.truncate(len);
		finished
	}
}
