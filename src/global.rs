use crate::job;
use crate::types::Limits;

#[derive(Debug, Default)]
pub struct State {
	pub limits: Limits,
	pub job_set: job::JobSet,
}

impl State {
	pub fn new(limits: Limits) -> State {
		let job_set = job::JobSet::new();
		State { limits: limits, job_set: job_set }
	}
}
