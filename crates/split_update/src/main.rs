//! `split-update`: run one large MySQL `UPDATE` as many small range
//! transactions.
//!
//! The binary only parses options, installs logging, and reports; the engine
//! lives in the `split_update` library.

use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use anyhow::{ensure, Context, Result};
use clap::{ArgAction, Parser};
use split_update::config::{
    expand_home, DEFAULT_CHARSET, DEFAULT_MAX_RETRIES, DEFAULT_OPTION_FILE, DEFAULT_PARALLEL,
    DEFAULT_PORT, DEFAULT_SPLIT_RANGE,
};
use split_update::error::GENERIC_EXIT_CODE;
use split_update::progress;
use split_update::report::{write_report, ReportMeta, RunReport, RunTally};
use split_update::{
    ConnectionConfig, RunOptions, Runner, SplitError, UpdateMode, UpdateOutcome, Verbosity,
};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

/// Split a large UPDATE into small transactions.
#[derive(Parser, Debug)]
#[command(
    name = "split-update",
    version,
    disable_help_flag = true,
    disable_version_flag = true,
    override_usage = "split-update [--defaults-file CONF | -h HOST -u USER -p PASSWD] -D DATABASE -e QUERY"
)]
struct Args {
    /// Database name.
    #[arg(short = 'D', long)]
    database: Option<String>,

    /// The UPDATE statement to run.
    #[arg(short = 'e', long)]
    execute: String,

    /// Server host; when absent, credentials are read from --defaults-file.
    #[arg(short = 'h', long, env = "MYSQL_HOST")]
    host: Option<String>,

    /// Server TCP port.
    #[arg(short = 'P', long, env = "MYSQL_TCP_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Server user.
    #[arg(short = 'u', long, env = "MYSQL_USER", default_value = "")]
    user: String,

    /// Server password.
    #[arg(short = 'p', long, env = "MYSQL_PWD", hide_env_values = true)]
    password: Option<String>,

    /// Connection character set.
    #[arg(long, default_value = DEFAULT_CHARSET)]
    default_character_set: String,

    /// MySQL option file used when no host is given.
    #[arg(long, default_value = DEFAULT_OPTION_FILE)]
    defaults_file: String,

    /// Maximum number of range transactions in flight.
    #[arg(long, default_value_t = DEFAULT_PARALLEL)]
    parallel: usize,

    /// Maximum number of retry passes over failed ranges.
    #[arg(long = "max-retry", default_value_t = DEFAULT_MAX_RETRIES)]
    max_retry: u32,

    /// Key-range width of each transaction.
    #[arg(long, default_value_t = DEFAULT_SPLIT_RANGE, allow_negative_numbers = true)]
    split: i64,

    /// Run ranges in random order.
    #[arg(long)]
    shuffle: bool,

    /// Plan and log statements without updating anything.
    #[arg(short = 'n', long = "dryrun")]
    dry_run: bool,

    /// Run the statement unsplit when it cannot be split. Use carefully on
    /// Galera clusters.
    #[arg(long)]
    fallback: bool,

    /// Write a JSON run report to this path.
    #[arg(long)]
    report: Option<PathBuf>,

    /// Print results and errors only.
    #[arg(long)]
    suppress: bool,

    /// Enable verbose output.
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Enable debug output.
    #[arg(long)]
    debug: bool,

    /// Enable debug-trace output, including every statement sent.
    #[arg(long)]
    trace: bool,

    /// Print help.
    #[arg(short = '?', long = "help", action = ArgAction::Help)]
    help: Option<bool>,

    /// Print version.
    #[arg(short = 'V', long = "version", action = ArgAction::Version)]
    version: Option<bool>,
}

impl Args {
    fn verbosity(&self) -> Verbosity {
        if self.suppress {
            Verbosity::Suppress
        } else if self.verbose {
            Verbosity::Verbose
        } else if self.debug {
            Verbosity::Debug
        } else if self.trace {
            Verbosity::Trace
        } else {
            Verbosity::Default
        }
    }

    fn run_options(&self) -> RunOptions {
        RunOptions {
            parallel: self.parallel,
            max_retries: self.max_retry,
            split_range: self.split,
            shuffle: self.shuffle,
            dry_run: self.dry_run,
            fallback: self.fallback,
        }
    }

    fn connection_config(&self) -> Result<ConnectionConfig> {
        let database = self.database.as_deref().unwrap_or_default();
        let config = match self.host.as_deref().filter(|host| !host.is_empty()) {
            Some(host) => ConnectionConfig::from_options(
                database,
                host,
                self.port,
                &self.user,
                self.password.as_deref(),
                Some(&self.default_character_set),
            ),
            None => ConnectionConfig::from_option_file(&expand_home(&self.defaults_file), database)?,
        };
        ensure!(!config.database.is_empty(), "database name is required (-D)");
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let verbosity = args.verbosity();
    init_tracing(verbosity);

    match run(args, verbosity).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %format!("{err:#}"), "split update failed");
            let code = err
                .downcast_ref::<SplitError>()
                .map(SplitError::exit_code)
                .unwrap_or(GENERIC_EXIT_CODE);
            ExitCode::from(code)
        }
    }
}

fn init_tracing(verbosity: Verbosity) {
    // Enable ANSI colors only when stdout is a terminal and NO_COLOR is unset.
    let ansi = std::io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none();
    tracing_subscriber::fmt()
        .with_target(false)
        .with_ansi(ansi)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(verbosity.filter_directive())),
        )
        .init();
}

async fn run(args: Args, verbosity: Verbosity) -> Result<()> {
    ensure!(!args.execute.trim().is_empty(), "statement is required (-e)");
    let options = args.run_options();
    options.validate()?;
    let config = args.connection_config()?;
    debug!(?config, ?options, "starting split update");

    let mut runner = Runner::connect(&config);
    runner.configure(&options)?;
    let runner = Arc::new(runner);
    if !runner.connected().await {
        runner.close().await;
        anyhow::bail!(
            "cannot connect to {}:{} as '{}'",
            config.host,
            config.port,
            config.user
        );
    }
    info!(database = %config.database, "connected");

    let started_at = SystemTime::now();
    let started = Instant::now();
    let task = tokio::spawn({
        let runner = runner.clone();
        let query = args.execute.clone();
        let options = options.clone();
        async move { runner.execute_update(&query, &options).await }
    });
    let joined = if verbosity.shows_progress() {
        progress::watch(&runner, task).await
    } else {
        task.await
    };
    let outcome: Result<UpdateOutcome> = match joined {
        Ok(outcome) => outcome.map_err(anyhow::Error::from),
        Err(err) => Err(anyhow::Error::new(err).context("update task aborted")),
    };

    let sessions = runner.session_results();
    let tally = RunTally::from_results(&sessions);
    debug!("{}", tally.sessions_line());
    println!("{}", tally.summary_line());

    let written = match &args.report {
        Some(path) => {
            let report = RunReport {
                meta: ReportMeta::new(
                    &config.database,
                    &args.execute,
                    &options,
                    started_at,
                    started.elapsed(),
                ),
                mode: outcome.as_ref().ok().map(|done| mode_name(done.mode).to_string()),
                retries: outcome.as_ref().map(|done| done.retries).unwrap_or_default(),
                sessions,
                tally,
                exit_code: match &outcome {
                    Ok(_) => 0,
                    Err(err) => err
                        .downcast_ref::<SplitError>()
                        .map(SplitError::exit_code)
                        .unwrap_or(GENERIC_EXIT_CODE),
                },
                error: outcome.as_ref().err().map(|err| format!("{err:#}")),
            };
            write_report(path, &report).context("write run report")
        }
        None => Ok(()),
    };

    runner.close().await;
    outcome?;
    written
}

fn mode_name(mode: UpdateMode) -> &'static str {
    match mode {
        UpdateMode::Split => "split",
        UpdateMode::Fallback => "fallback",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mysql_style_short_flags_parse() {
        let args = Args::try_parse_from([
            "split-update",
            "-D",
            "app",
            "-e",
            "UPDATE users SET status = 1",
            "-h",
            "db.internal",
            "-P",
            "3307",
            "-u",
            "operator",
            "-n",
            "--split",
            "5000",
            "--parallel",
            "4",
        ])
        .expect("parse args");

        assert_eq!(args.host.as_deref(), Some("db.internal"));
        assert_eq!(args.port, 3307);
        let options = args.run_options();
        assert!(options.dry_run);
        assert_eq!(options.split_range, 5_000);
        assert_eq!(options.parallel, 4);
        assert_eq!(options.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(args.verbosity(), Verbosity::Default);

        let config = args.connection_config().expect("explicit connection");
        assert_eq!(config.database, "app");
        assert_eq!(config.charset, DEFAULT_CHARSET);
    }

    #[test]
    fn suppress_wins_over_other_verbosity_flags() {
        let args = Args::try_parse_from([
            "split-update",
            "-e",
            "UPDATE t SET x = 1",
            "--trace",
            "--suppress",
        ])
        .expect("parse args");
        assert_eq!(args.verbosity(), Verbosity::Suppress);
        assert!(!args.verbosity().shows_progress());
    }

    #[test]
    fn question_mark_requests_help() {
        let err = Args::try_parse_from(["split-update", "-?"]).expect_err("help exits");
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }
}
