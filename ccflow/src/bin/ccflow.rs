//! ccflow command-line interface.
//!
//! ```bash
//! # Drive two units through every stage and link them
//! ccflow build main.c util.c --stage link -o app
//!
//! # Stop at assembly, four units at a time
//! ccflow build *.c --stage asm --jobs 4
//!
//! # Link with raw ld, asking the compiler driver where crt*.o live
//! ccflow build main.c -o app --runtime discover
//!
//! # Mirror a documentation site two levels deep
//! ccflow mirror https://example.org/docs/ --out site --depth 2 --accept html,css
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{info, warn};

use ccflow::cancellation::CancellationToken;
use ccflow::config::ToolchainConfig;
use ccflow::core::{Route, TargetStage};
use ccflow::errors::{CcflowError, UsageError, EXIT_STAGE_FAILURE};
use ccflow::events::LoggingEventSink;
use ccflow::link::{LinkOptions, RuntimeObjects};
use ccflow::mirror::MirrorRequest;
use ccflow::observability::{filter_directive, init_logging, LogFormat, LogLevel};
use ccflow::pipeline::{BuildRequest, PipelineOrchestrator};
use ccflow::runner::ProcessInvoker;

#[derive(Parser)]
#[command(
    name = "ccflow",
    version = env!("CARGO_PKG_VERSION"),
    about = "Drive C/C++ sources through preprocess, compile, assemble and link"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Explicit log level, overriding -v/-q
    #[arg(long = "log", value_enum, global = true)]
    log_level: Option<LogLevel>,

    /// Log line format
    #[arg(long, value_enum, default_value = "pretty", global = true)]
    log_format: LogFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// Build source files up to a stage
    Build(BuildArgs),
    /// Mirror a site with wget
    Mirror(MirrorArgs),
}

#[derive(Clone, Copy, ValueEnum)]
enum RuntimeMode {
    /// Let the compiler driver add runtime objects
    Driver,
    /// Use --start-object/--end-object as given
    Explicit,
    /// Ask the compiler driver for the runtime object paths
    Discover,
}

#[derive(Args)]
struct BuildArgs {
    /// Source files, in link order
    #[arg(required = true)]
    sources: Vec<PathBuf>,

    /// Final stage: preprocess, asm, object or link
    #[arg(long, default_value = "link")]
    stage: TargetStage,

    /// Executable to produce (required for --stage link)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Start no new stage after the first failure
    #[arg(long)]
    fail_fast: bool,

    /// Units processed concurrently
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Compile straight to objects instead of keeping .i and .s files
    #[arg(long)]
    direct: bool,

    /// Link statically
    #[arg(long = "static", conflicts_with = "dynamic_linker")]
    static_link: bool,

    /// Runtime loader embedded in dynamic executables
    #[arg(long)]
    dynamic_linker: Option<PathBuf>,

    /// Where runtime start/end objects come from
    #[arg(long, value_enum, default_value = "driver")]
    runtime: RuntimeMode,

    /// Runtime object placed before the unit objects (explicit mode)
    #[arg(long = "start-object")]
    start_objects: Vec<PathBuf>,

    /// Runtime object placed after the libraries (explicit mode)
    #[arg(long = "end-object")]
    end_objects: Vec<PathBuf>,

    /// Library to link
    #[arg(short = 'l')]
    libraries: Vec<String>,

    /// Library search directory
    #[arg(short = 'L')]
    search_dirs: Vec<PathBuf>,

    /// Extra flag for compiling stages
    #[arg(long = "cflag", allow_hyphen_values = true)]
    cflags: Vec<String>,

    /// Per-invocation timeout in seconds
    #[arg(long)]
    timeout: Option<f64>,

    /// Directory for intermediate artifacts
    #[arg(long)]
    out_dir: Option<PathBuf>,

    /// Toolchain configuration file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the build result as JSON
    #[arg(long)]
    report_json: Option<PathBuf>,
}

#[derive(Args)]
struct MirrorArgs {
    /// Start URL
    url: String,

    /// Output directory
    #[arg(long)]
    out: PathBuf,

    /// Recursion depth, 0 for unlimited
    #[arg(long, default_value_t = 1)]
    depth: u32,

    /// Accepted extensions, comma separated
    #[arg(long, value_delimiter = ',')]
    accept: Vec<String>,

    /// Per-invocation timeout in seconds
    #[arg(long)]
    timeout: Option<f64>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let directive = filter_directive(cli.verbose, cli.quiet, cli.log_level);
    if let Err(e) = init_logging(directive, cli.log_format) {
        eprintln!("warning: {e}");
    }

    let cancel = Arc::new(CancellationToken::new());
    spawn_interrupt_handler(cancel.clone());

    let result = match cli.command {
        Commands::Build(args) => run_build(args, cancel).await,
        Commands::Mirror(args) => run_mirror(args, cancel).await,
    };

    match result {
        Ok(code) => exit_code(code),
        Err(e) => {
            eprintln!("error: {e:#}");
            let code = e
                .downcast_ref::<CcflowError>()
                .map_or(EXIT_STAGE_FAILURE, CcflowError::exit_code);
            exit_code(code)
        }
    }
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

fn spawn_interrupt_handler(cancel: Arc<CancellationToken>) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Interrupt received, stopping build");
                cancel.cancel("interrupted by user");
            }
            Err(e) => warn!(error = %e, "Cannot listen for interrupts"),
        }
    });
}

async fn run_build(args: BuildArgs, cancel: Arc<CancellationToken>) -> anyhow::Result<i32> {
    let config = toolchain_config(&args)?;
    let request = build_request(&args)?;

    let orchestrator = PipelineOrchestrator::new(
        config,
        Arc::new(ProcessInvoker::new()),
        Arc::new(LoggingEventSink::new()),
        cancel,
    );
    let result = orchestrator.build(&request).await?;

    print!("{}", result.render());

    if let Some(path) = &args.report_json {
        let json = result.to_json().context("serializing build report")?;
        std::fs::write(path, json)
            .with_context(|| format!("writing build report to {}", path.display()))?;
        info!(path = %path.display(), "Wrote build report");
    }

    Ok(result.exit_code())
}

fn toolchain_config(args: &BuildArgs) -> Result<ToolchainConfig, CcflowError> {
    let mut config = ToolchainConfig::load(args.config.as_deref())?;
    if let Some(out_dir) = &args.out_dir {
        config = config.with_out_dir(out_dir);
    }
    if let Some(jobs) = args.jobs {
        config = config.with_jobs(jobs);
    }
    if let Some(timeout) = args.timeout {
        config = config.with_timeout(timeout);
    }
    for flag in &args.cflags {
        config = config.with_cflag(flag);
    }
    config.validate()?;
    Ok(config)
}

fn build_request(args: &BuildArgs) -> Result<BuildRequest, CcflowError> {
    let explicit_given = !args.start_objects.is_empty() || !args.end_objects.is_empty();
    let runtime = match args.runtime {
        RuntimeMode::Explicit => RuntimeObjects::Explicit {
            start: args.start_objects.clone(),
            end: args.end_objects.clone(),
        },
        _ if explicit_given => {
            return Err(UsageError::new(
                "--start-object and --end-object require --runtime explicit",
            )
            .into());
        }
        RuntimeMode::Driver => RuntimeObjects::Driver,
        RuntimeMode::Discover => RuntimeObjects::Discover,
    };

    let mut link = LinkOptions::new().with_runtime(runtime);
    if args.static_link {
        link = link.with_static();
    }
    if let Some(loader) = &args.dynamic_linker {
        link = link.with_dynamic_linker(loader);
    }
    for lib in &args.libraries {
        link = link.with_library(lib);
    }
    for dir in &args.search_dirs {
        link = link.with_search_dir(dir);
    }

    let mut request = BuildRequest::new(args.sources.clone(), args.stage).with_link_options(link);
    if let Some(output) = &args.output {
        request = request.with_output(output);
    }
    if args.direct {
        request = request.with_route(Route::Direct);
    }
    if args.fail_fast {
        request = request.fail_fast();
    }
    Ok(request)
}

async fn run_mirror(args: MirrorArgs, cancel: Arc<CancellationToken>) -> anyhow::Result<i32> {
    let request = MirrorRequest::new(args.url, args.out)
        .with_depth(args.depth)
        .with_accept(&args.accept);
    let timeout = args.timeout.map(mirror_timeout).transpose()?;

    let outcome = request
        .run(&ProcessInvoker::new(), timeout, &cancel)
        .await?;

    eprint!("{}", outcome.stderr);
    print!("{}", outcome.stdout);
    Ok(outcome.exit_code.unwrap_or(EXIT_STAGE_FAILURE))
}

fn mirror_timeout(seconds: f64) -> Result<std::time::Duration, CcflowError> {
    std::time::Duration::try_from_secs_f64(seconds)
        .ok()
        .filter(|d| !d.is_zero())
        .ok_or_else(|| {
            UsageError::new(format!("--timeout must be a positive number of seconds, got {seconds}"))
                .into()
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mirror_timeout_range() {
        assert_eq!(mirror_timeout(1.5).unwrap(), std::time::Duration::from_millis(1500));
        assert!(mirror_timeout(1e20).is_err());
        assert!(mirror_timeout(0.0).is_err());
        assert!(mirror_timeout(-3.0).is_err());
        assert!(mirror_timeout(f64::NAN).is_err());
    }

    #[test]
    fn test_cli_timeout_is_validated() {
        let cli = Cli::parse_from(["ccflow", "build", "a.c", "--timeout", "1e20"]);
        let Commands::Build(args) = cli.command else {
            panic!("expected build");
        };
        assert!(matches!(toolchain_config(&args), Err(CcflowError::Config(_))));
    }
}
