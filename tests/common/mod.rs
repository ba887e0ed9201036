#![allow(dead_code)]

use std::sync::Once;
use std::thread;
use std::time::{Duration, Instant};

use scripter::eval::{self, EvalResult};
use scripter::job::{FinishedJob, Job, JobSet};
use scripter::parser;
use scripter::types::{Limits, Pipeline};
use scripter::State;
use tracing_subscriber::{fmt, EnvFilter};

static INIT: Once = Once::new();

/// Captured tracing output for tests; `RUST_LOG=debug cargo test` to see more.
pub fn init_tracing() {
	INIT.call_once(|| {
		let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
		fmt()
			.with_env_filter(filter)
			.with_test_writer()
			.init();
	});
}

pub fn parse(line: &str) -> Pipeline {
	parser::parse(line.as_bytes(), &Limits::default()).unwrap()
}

/// Runs a foreground line and returns the finished job.
pub fn run(line: &str) -> Job {
	init_tracing();
	let mut state = State::default();
	match eval::eval(&mut state, &parse(line)).unwrap() {
		EvalResult::Done(job) => job,
		other => panic!("expected a foreground job, got {:?}", other),
	}
}

pub fn reap_all(set: &mut JobSet) -> Vec<FinishedJob> {
	let deadline = Instant::now() + Duration::from_secs(20);
	let mut finished = Vec::new();
	while !set.is_empty() {
		assert!(Instant::now() < deadline, "background jobs did not finish");
		finished.extend(set.reap());
		thread::sleep(Duration::from_millis(10));
	}
	finished
}
