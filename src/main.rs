use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use coveralls_gather::cli::{self, ReportOptions};
use coveralls_gather::config::{self, GatherConfig};
use coveralls_gather::detect::Format;
use coveralls_gather::upload::DEFAULT_ENDPOINT;

/// coveralls-gather: turn gcov, llvm-cov or Cobertura coverage into a
/// Coveralls job.
#[derive(Parser)]
#[command(name = "coveralls-gather", version, about)]
struct Cli {
    /// Log debug details, including the report header.
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ReportArgs {
    /// Flag name for this job in a parallel build (default: built from the
    /// `-p` properties in BIN_DIR/report_answers.txt).
    #[arg(long)]
    flag_name: Option<String>,

    /// Mark the job as one of several parallel jobs.
    #[arg(long)]
    parallel: bool,

    /// Coveralls repository token.
    #[arg(long, env = "COVERALLS_REPO_TOKEN", hide_env_values = true)]
    repo_token: Option<String>,
}

impl ReportArgs {
    fn options(&self) -> ReportOptions {
        ReportOptions {
            flag_name: self.flag_name.clone(),
            parallel: self.parallel,
            repo_token: self.repo_token.clone(),
        }
    }
}

#[derive(Args)]
struct GatherArgs {
    /// Coverage backend; detected from `--gcov --version` when omitted.
    #[arg(long, value_enum)]
    backend: Option<Format>,

    /// Path to gcov or llvm-cov.
    #[arg(long, value_name = "PATH")]
    gcov: Option<PathBuf>,

    /// Path to llvm-profdata.
    #[arg(long, value_name = "PATH")]
    merge: Option<PathBuf>,

    /// Path to the git binary.
    #[arg(long, value_name = "PATH", default_value = "git")]
    git: PathBuf,

    /// Repository root.
    #[arg(long, value_name = "DIR", default_value = ".")]
    src_dir: PathBuf,

    /// Build directory holding .gcno/.gcda notes, or .profraw files and bin/.
    #[arg(long, value_name = "DIR")]
    bin_dir: PathBuf,

    /// Directory for intermediate artifacts (default: BIN_DIR/coveralls).
    #[arg(long, value_name = "DIR")]
    int_dir: Option<PathBuf>,

    /// Repository directories to report on, separated with ':'.
    #[arg(long, value_name = "DIR:DIR:...")]
    dirs: String,

    /// Glob of repository paths to leave out; may be repeated.
    #[arg(long = "ignore-files", value_name = "GLOB")]
    ignore_files: Vec<String>,

    /// Output JSON file.
    #[arg(long, value_name = "JSON")]
    out: PathBuf,

    /// Project target name, used to find llvm test executables.
    #[arg(long)]
    target: Option<String>,

    /// Worker threads (default: number of cores).
    #[arg(long)]
    jobs: Option<usize>,

    /// Seconds before a toolchain subprocess is killed.
    #[arg(long, value_name = "SECS", default_value_t = 300)]
    timeout: u64,

    /// Write a partial report (git hash and source files only) for a later
    /// `merge`.
    #[arg(long)]
    partial: bool,

    /// Upload the report after writing it.
    #[arg(long)]
    upload: bool,

    /// Coveralls jobs endpoint.
    #[arg(long, env = "COVERALLS_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    endpoint: String,

    #[command(flatten)]
    report: ReportArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Gather coverage artifacts into a Coveralls JSON report.
    Gather(GatherArgs),

    /// Merge several reports (partial or full) into one.
    Merge {
        /// Reports to merge.
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Output JSON file.
        #[arg(long, value_name = "JSON")]
        out: PathBuf,

        /// Repository root.
        #[arg(long, value_name = "DIR", default_value = ".")]
        src_dir: PathBuf,

        /// Path to the git binary.
        #[arg(long, value_name = "PATH", default_value = "git")]
        git: PathBuf,

        #[command(flatten)]
        report: ReportArgs,
    },

    /// Upload a written report.
    Upload {
        /// Report to upload.
        file: PathBuf,

        /// Coveralls jobs endpoint.
        #[arg(long, env = "COVERALLS_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
        endpoint: String,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.debug);

    match run(cli.command) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default))
        .format_timestamp(None)
        .format_target(false)
        .init();
}

/// `Ok(false)` when the command finished but the run must still fail.
fn run(command: Commands) -> Result<bool> {
    let cwd = std::env::current_dir().context("Failed to read the current directory")?;

    match command {
        Commands::Gather(args) => {
            let config = gather_config(&args, &cwd)?;
            let upload_to = args.upload.then_some(args.endpoint.as_str());
            let outcome = cli::cmd_gather(&config, &args.report.options(), upload_to)?;
            print!("{}", outcome.output);
            Ok(outcome.success)
        }
        Commands::Merge {
            inputs,
            out,
            src_dir,
            git,
            report,
        } => {
            let src_dir = config::absolutize(&src_dir, &cwd)?;
            let outcome = cli::cmd_merge(&inputs, &out, &src_dir, &git, &report.options())?;
            print!("{}", outcome.output);
            Ok(outcome.success)
        }
        Commands::Upload { file, endpoint } => {
            print!("{}", cli::cmd_upload(&file, &endpoint)?);
            Ok(true)
        }
    }
}

fn gather_config(args: &GatherArgs, cwd: &Path) -> Result<GatherConfig> {
    let timeout = Duration::from_secs(args.timeout);
    let format = cli::resolve_backend(args.backend, args.gcov.as_deref(), timeout)?;

    let src_dir = config::absolutize(&args.src_dir, cwd)?;
    let bin_dir = config::absolutize(&args.bin_dir, cwd)?;
    let int_dir = match &args.int_dir {
        Some(dir) => config::absolutize(dir, cwd)?,
        None => bin_dir.join("coveralls"),
    };

    let config = GatherConfig {
        format,
        tool: args.gcov.clone(),
        merge_tool: args.merge.clone(),
        git: args.git.clone(),
        src_dir,
        bin_dir,
        int_dir,
        include_dirs: config::split_dirs(&args.dirs),
        ignore: args.ignore_files.clone(),
        output: args.out.clone(),
        target: args.target.clone(),
        jobs: args.jobs,
        timeout,
        partial: args.partial,
    };
    config.validate()?;
    Ok(config)
}
