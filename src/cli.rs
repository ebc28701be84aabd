use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};
use uuid::Uuid;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "pyrunner",
    about = "Run, trace and test Python programs on a managed interpreter",
    version
)]
pub struct Cli {
    /// More log output (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log errors.
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run a program and show its output.
    Run(RunArgs),
    /// Record a line-by-line trace of a program.
    Trace(TraceArgs),
    /// Manage and run tests against a main program.
    Test(TestArgs),
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Program to run; `-` reads it from stdin.
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Source installed as the importable library module for this run.
    #[arg(long, value_name = "FILE")]
    pub library: Option<PathBuf>,

    /// Time budget in milliseconds (0 disables it). Defaults to PYRUNNER_TIMEOUT_MS.
    #[arg(long = "timeout-ms", value_name = "MS")]
    pub timeout_ms: Option<u64>,
}

#[derive(Args, Debug, Clone)]
pub struct TraceArgs {
    /// Program to trace; `-` reads it from stdin.
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    #[arg(long, value_name = "FILE")]
    pub library: Option<PathBuf>,

    /// Print the trace as JSON.
    #[arg(long)]
    pub json: bool,

    /// Maximum number of recorded steps. Defaults to PYRUNNER_MAX_TRACE_STEPS.
    #[arg(long = "max-steps", value_name = "N")]
    pub max_steps: Option<usize>,

    /// Time budget in milliseconds (0 disables it).
    #[arg(long = "timeout-ms", value_name = "MS")]
    pub timeout_ms: Option<u64>,
}

#[derive(Args, Debug, Clone)]
pub struct TestArgs {
    /// Whose tests to use. Defaults to PYRUNNER_OWNER.
    #[arg(long, global = true)]
    pub owner: Option<String>,

    #[command(subcommand)]
    pub command: TestCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum TestCommand {
    /// Add a test from a file containing a `def test_*` function.
    Add {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        /// Display name; defaults to the test function's name.
        #[arg(long)]
        name: Option<String>,
    },
    /// List saved tests with their last status.
    #[command(visible_alias = "ls")]
    List,
    /// Delete a test.
    #[command(visible_alias = "rm")]
    Remove { id: Uuid },
    /// Run saved tests against a main program.
    Run {
        /// Main program the tests exercise.
        #[arg(long, value_name = "FILE")]
        main: PathBuf,
        /// Run only the test with this id.
        #[arg(long, value_name = "ID")]
        only: Option<Uuid>,
        #[arg(long = "timeout-ms", value_name = "MS")]
        timeout_ms: Option<u64>,
    },
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    /// Default log filter for the chosen verbosity; `RUST_LOG` overrides it.
    pub fn log_filter(&self) -> &'static str {
        if self.quiet {
            return "error";
        }
        match self.verbose {
            0 => "warn",
            1 => "pyrunner=info,warn",
            2 => "pyrunner=debug,info",
            _ => "trace",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_test_run_with_owner() {
        let id = Uuid::new_v4();
        let cli = Cli::try_parse_from([
            "pyrunner",
            "test",
            "run",
            "--main",
            "main.py",
            "--only",
            &id.to_string(),
            "--owner",
            "alice",
        ])
        .unwrap();
        match cli.command {
            Command::Test(TestArgs {
                owner,
                command: TestCommand::Run { main, only, .. },
            }) => {
                assert_eq!(owner.as_deref(), Some("alice"));
                assert_eq!(main, PathBuf::from("main.py"));
                assert_eq!(only, Some(id));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn verbosity_maps_to_filter() {
        let cli = Cli::try_parse_from(["pyrunner", "-vv", "run", "a.py"]).unwrap();
        assert_eq!(cli.log_filter(), "pyrunner=debug,info");
        let cli = Cli::try_parse_from(["pyrunner", "run", "a.py", "-q"]).unwrap();
        assert_eq!(cli.log_filter(), "error");
        assert!(Cli::try_parse_from(["pyrunner", "-q", "-v", "run", "a.py"]).is_err());
    }
}
