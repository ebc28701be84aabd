mod cli;

use std::{
    fs,
    io::{self, Read},
    path::Path,
    process::ExitCode,
    sync::Arc,
    time::Duration,
};

use anyhow::{bail, Context, Result};
use cli::{Cli, Command, RunArgs, TestArgs, TestCommand, TraceArgs};
use pyrunner::{
    printer::TextPrinter, Config, Invoker, JsonFileStore, RuntimeManager, TestHarness, Tracer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_filter().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let cfg = Config::load();
    let runtime = Arc::new(RuntimeManager::new(cfg.runtime_config()));
    let printer = TextPrinter::default();

    let outcome = match args.command {
        Command::Run(a) => run(&cfg, &runtime, &printer, a).await,
        Command::Trace(a) => trace(&cfg, &runtime, &printer, a).await,
        Command::Test(a) => test(&cfg, &runtime, &printer, a).await,
    };
    runtime.shutdown().await;
    outcome
}

/// Read a program from `path`, or stdin for `-`.
fn read_source(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut buf = String::new();
        io::stdin().read_to_string(&mut buf)?;
        return Ok(buf);
    }
    fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

fn read_optional(path: Option<&Path>) -> Result<Option<String>> {
    path.map(read_source).transpose()
}

fn invoker(cfg: &Config, runtime: &Arc<RuntimeManager>, timeout_ms: Option<u64>) -> Invoker {
    let timeout = match timeout_ms {
        Some(0) => None,
        Some(ms) => Some(Duration::from_millis(ms)),
        None => cfg.timeout(),
    };
    Invoker::new(runtime.clone())
        .with_timeout(timeout)
        .with_library_module(cfg.library_module())
}

async fn start(runtime: &RuntimeManager) -> Result<()> {
    runtime
        .ensure_ready()
        .await
        .context("starting the Python runtime")?;
    Ok(())
}

async fn run(
    cfg: &Config,
    runtime: &Arc<RuntimeManager>,
    printer: &TextPrinter,
    args: RunArgs,
) -> Result<ExitCode> {
    let source = read_source(&args.file)?;
    let library = read_optional(args.library.as_deref())?;
    start(runtime).await?;

    let result = invoker(cfg, runtime, args.timeout_ms)
        .invoke(&source, library.as_deref())
        .await;
    printer.print(&printer.render_result(&result));
    Ok(if result.success { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

async fn trace(
    cfg: &Config,
    runtime: &Arc<RuntimeManager>,
    printer: &TextPrinter,
    args: TraceArgs,
) -> Result<ExitCode> {
    let source = read_source(&args.file)?;
    let library = read_optional(args.library.as_deref())?;
    start(runtime).await?;

    let tracer = Tracer::new(invoker(cfg, runtime, args.timeout_ms))
        .with_max_steps(args.max_steps.unwrap_or_else(|| cfg.max_trace_steps()));
    let trace = tracer.trace(&source, library.as_deref()).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&trace)?);
    } else {
        printer.print(&printer.render_trace(&trace));
    }
    Ok(if trace.success { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

async fn test(
    cfg: &Config,
    runtime: &Arc<RuntimeManager>,
    printer: &TextPrinter,
    args: TestArgs,
) -> Result<ExitCode> {
    let owner = args.owner.unwrap_or_else(|| cfg.owner());
    let timeout_ms = match &args.command {
        TestCommand::Run { timeout_ms, .. } => *timeout_ms,
        _ => None,
    };
    let store = JsonFileStore::from_config(cfg);
    let mut harness = TestHarness::open(invoker(cfg, runtime, timeout_ms), store, owner)?;

    match args.command {
        TestCommand::Add { file, name } => {
            let source = read_source(&file)?;
            let added = harness.add(source, name.as_deref());
            if added.function_name.is_none() {
                tracing::warn!("no `def test_*` function found in {}", file.display());
            }
            println!("{}  {}", added.id, added.display_name);
        }
        TestCommand::List => {
            if harness.tests().is_empty() {
                println!("No tests for {}", harness.owner());
            } else {
                printer.print(&printer.render_tests(harness.tests()));
            }
        }
        TestCommand::Remove { id } => {
            if harness.remove(id).is_none() {
                bail!("no test with id {}", id);
            }
        }
        TestCommand::Run { main, only, .. } => {
            let main_code = read_source(&main)?;
            start(runtime).await?;
            let passed = match only {
                Some(id) => {
                    let Some(test) = harness.run_test(id, &main_code).await else {
                        bail!("no test with id {}", id);
                    };
                    printer.print(&printer.render_test(test));
                    test.status == pyrunner::TestStatus::Passed
                }
                None => {
                    let summary = harness.run_all(&main_code).await;
                    for t in harness.tests() {
                        printer.print(&printer.render_test(t));
                    }
                    printer.print(&printer.render_summary(&summary));
                    summary.all_passed()
                }
            };
            return Ok(if passed { ExitCode::SUCCESS } else { ExitCode::FAILURE });
        }
    }
    Ok(ExitCode::SUCCESS)
}
