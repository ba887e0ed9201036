use tracing::info;

use scripter::{cli, logging, script, State};

fn main() {
	if let Err(err) = run_main() {
		eprintln!("scripter: {:#}", err);
		std::process::exit(1);
	}
}

fn run_main() -> anyhow::Result<()> {
	let args = cli::parse();
	logging::init_logging(args.log_level)?;
	let mut state = State::new(args.limits());
	let summary = script::run_script(&args.script, &mut state)?;
	info!(
		executed = summary.executed,
		failed = summary.failed,
		background = summary.background,
		still_running = summary.still_running,
		"script finished"
	);
	Ok(())
}
