//! Runs the command lines of a script file as processes: pipelines joined
//! with `|`, redirections with `<`, `>` and `!>`, and background pipelines
//! with a trailing `&`.

pub mod cli;
pub mod eval;
pub mod exec;
pub mod global;
pub mod job;
pub mod logging;
pub mod parser;
pub mod script;
pub mod types;

pub use global::State;
pub use script::{run_script, ScriptError, ScriptSummary};
