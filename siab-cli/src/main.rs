//! siab - single-host platform installer
//!
//! Installs and removes the platform through the idempotent step pipeline.
//! Progress goes to stdout, logs go to stderr.

use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use siab::collab::Collaborators;
use siab::config::{apply_pairs, ConfigLoader, SiabConfig};
use siab::errors::SiabError;
use siab::events::LoggingEventSink;
use siab::orchestrator::{ExitStatus, InstallOptions, Orchestrator, UninstallOptions, UninstallReport};
use siab::pipeline::CancellationToken;
use siab::progress::ProgressReporter;
use siab::safety::SSH_CONNECTION_VAR;
use siab::teardown::{ConfirmationPolicy, TerminalConfirmer};
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

/// siab - single-host platform installer
#[derive(Parser, Debug)]
#[command(name = "siab")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Environment-style configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// State directory for status artifacts, logs and backups
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    /// Raise log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Human, global = true)]
    log_format: LogFormat,

    /// Append-only progress output, even on a terminal
    #[arg(long, global = true)]
    plain: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Human,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Install the platform, skipping whatever is already in place
    Install(InstallArgs),

    /// Remove the platform
    Uninstall(UninstallArgs),
}

#[derive(Args, Debug, Default)]
struct InstallArgs {
    /// Platform domain
    #[arg(long)]
    domain: Option<String>,

    /// Lower sizing minimums and use a single storage replica
    #[arg(long)]
    single_node: bool,

    /// Leave out metrics and dashboards
    #[arg(long)]
    skip_monitoring: bool,

    /// Leave out block storage
    #[arg(long)]
    skip_storage: bool,

    /// Leave out object storage
    #[arg(long)]
    skip_object_storage: bool,

    /// Leave out the vulnerability scanner
    #[arg(long)]
    skip_security_scanning: bool,

    /// Leave out the policy engine
    #[arg(long)]
    skip_policy: bool,

    /// Do not check host resources first
    #[arg(long)]
    skip_preflight: bool,
}

#[derive(Args, Debug, Default)]
struct UninstallArgs {
    /// Confirm without prompting
    #[arg(long)]
    yes: bool,

    /// Back up configuration and credentials first
    #[arg(long)]
    snapshot: bool,

    /// Keep the data directory
    #[arg(long)]
    keep_data: bool,
}

impl Cli {
    /// Flag overrides as `SIAB_*` pairs, so they pass the same validation
    /// as the file and the environment.
    fn overrides(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        let mut set = |key: &str, value: String| pairs.push((format!("SIAB_{key}"), value));

        if let Some(dir) = &self.state_dir {
            set("STATE_DIR", dir.display().to_string());
        }
        if let Commands::Install(args) = &self.command {
            if let Some(domain) = &args.domain {
                set("DOMAIN", domain.clone());
            }
            for (flag, key) in [
                (args.single_node, "SINGLE_NODE"),
                (args.skip_monitoring, "SKIP_MONITORING"),
                (args.skip_storage, "SKIP_STORAGE"),
                (args.skip_object_storage, "SKIP_OBJECT_STORAGE"),
                (args.skip_security_scanning, "SKIP_SECURITY_SCANNING"),
                (args.skip_policy, "SKIP_POLICY"),
            ] {
                if flag {
                    set(key, "true".to_string());
                }
            }
        }
        pairs
    }

    fn load_config(&self) -> Result<SiabConfig, SiabError> {
        let loader = match &self.config {
            Some(path) => ConfigLoader::new().with_file(path),
            None => ConfigLoader::new(),
        };
        let mut config = loader.load()?;
        apply_pairs(&mut config, self.overrides())?;
        Ok(config)
    }
}

fn init_logging(verbose: u8, format: LogFormat) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    match format {
        LogFormat::Human => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn print_uninstall_report(report: &UninstallReport) {
    if let Some(snapshot) = &report.snapshot {
        println!(
            "snapshot: {} ({} copied, {} skipped, {} errors)",
            snapshot.dir.display(),
            snapshot.copied.len(),
            snapshot.skipped.len(),
            snapshot.errors.len()
        );
        for error in &snapshot.errors {
            println!("  snapshot error: {error}");
        }
    }
    match &report.residuals {
        Some(residuals) if residuals.is_clean() => println!("residual check: clean"),
        Some(residuals) => {
            println!("residual check: {} leftover(s), not removed", residuals.findings.len());
            for residual in &residuals.findings {
                println!("  {}: {}", residual.kind, residual.detail);
            }
            for unchecked in &residuals.unchecked {
                println!("  not checked: {unchecked}");
            }
        }
        None => println!("residual check: skipped (interrupted); re-run uninstall to finish"),
    }
}

fn run(cli: &Cli) -> Result<ExitStatus> {
    let config = cli.load_config()?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    let token = Arc::new(CancellationToken::new());
    let on_signal = token.clone();
    runtime.spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; stopping after the current step is abandoned");
            on_signal.cancel("interrupted by operator");
        }
    });

    let collab = Collaborators::system(config.timeouts.ready());
    let orchestrator = Orchestrator::new(config, collab)
        .with_event_sink(Arc::new(LoggingEventSink::default()))
        .with_observer(Arc::new(ProgressReporter::stdout(cli.plain)))
        .with_cancellation(token)
        .with_ssh_connection(std::env::var(SSH_CONNECTION_VAR).ok());

    match &cli.command {
        Commands::Install(args) => {
            let options = InstallOptions {
                skip_preflight: args.skip_preflight,
            };
            let result = runtime.block_on(orchestrator.install(options))?;
            Ok(ExitStatus::from_result(&result))
        }
        Commands::Uninstall(args) => {
            let options = UninstallOptions {
                confirmation: ConfirmationPolicy {
                    assume_yes: args.yes,
                    interactive: std::io::stdin().is_terminal(),
                },
                snapshot: args.snapshot,
                keep_data: args.keep_data,
            };
            let report = runtime.block_on(orchestrator.uninstall(options, &TerminalConfirmer))?;
            print_uninstall_report(&report);
            Ok(report.exit_status())
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_format);

    match run(&cli) {
        Ok(status) => ExitCode::from(status.code()),
        Err(e) => {
            error!("{e:#}");
            eprintln!("error: {e:#}");
            let status = e
                .downcast_ref::<SiabError>()
                .map_or(ExitStatus::Usage, ExitStatus::from_error);
            ExitCode::from(status.code())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_install_flags_become_overrides() {
        let cli = Cli::try_parse_from([
            "siab",
            "--state-dir",
            "/tmp/siab",
            "install",
            "--domain",
            "lab.example.com",
            "--skip-monitoring",
            "--single-node",
        ])
        .unwrap();

        let pairs = cli.overrides();
        assert_eq!(
            pairs,
            vec![
                ("SIAB_STATE_DIR".to_string(), "/tmp/siab".to_string()),
                ("SIAB_DOMAIN".to_string(), "lab.example.com".to_string()),
                ("SIAB_SINGLE_NODE".to_string(), "true".to_string()),
                ("SIAB_SKIP_MONITORING".to_string(), "true".to_string()),
            ]
        );
    }

    #[test]
    fn test_uninstall_flags() {
        let cli = Cli::try_parse_from(["siab", "uninstall", "--yes", "--keep-data", "--plain"]).unwrap();
        assert!(cli.plain);
        let Commands::Uninstall(args) = &cli.command else {
            panic!("expected uninstall");
        };
        assert!(args.yes && args.keep_data && !args.snapshot);
        assert!(cli.overrides().is_empty());
    }

    #[test]
    fn test_flag_overrides_pass_validation() {
        let cli = Cli::try_parse_from(["siab", "install", "--domain", "bad domain"]).unwrap();
        let mut config = SiabConfig::default();
        assert!(apply_pairs(&mut config, cli.overrides()).is_err());
    }
}
