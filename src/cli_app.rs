//! Top-level CLI definition and dispatch.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, CommandFactory, Parser, Subcommand};
use colored::Colorize;
use tracing::warn;

use crate::core::clock::SystemClock;
use crate::core::config::{ConfigStore, StartTime};
use crate::core::errors::{Result, WakeError};
use crate::daemon::confirmation::{ConfirmationSignals, write_sentinel};
use crate::daemon::loop_main::{Monitor, MonitorOptions, MonitorOutcome};
use crate::daemon::signals::SignalBridge;
use crate::daemon::surface::TrayMenu;
use crate::logger::jsonl::{AuditEvent, AuditLog};
use crate::platform::notify::{DesktopNotifier, LogNotifier, NotificationPresenter};
use crate::platform::shutdown::{DryRunShutdown, ShutdownAction, SystemShutdown};

/// Powers the machine off when nobody confirms they are awake.
#[derive(Parser)]
#[command(name = "wakecheck", version, about)]
pub struct Cli {
    /// Configuration file (default: platform config dir).
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
    /// Log at debug level.
    #[arg(short, long, global = true)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands.
#[derive(Subcommand)]
pub enum Command {
    /// Run the wake check in the foreground until stopped or shut down.
    Run(RunArgs),
    /// Confirm you are awake by writing the sentinel file.
    Confirm,
    /// Show or edit configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Generate a shell completion script.
    Completions {
        /// Target shell.
        shell: clap_complete::Shell,
    },
}

/// Options for `wakecheck run`.
#[derive(Args)]
pub struct RunArgs {
    /// Start at this HH:MM instead of the configured time.
    #[arg(long, value_name = "HH:MM")]
    pub start_at: Option<StartTime>,
    /// Skip the start-time wait.
    #[arg(long, conflicts_with = "start_at")]
    pub now: bool,
    /// Log the shutdown instead of powering off.
    #[arg(long)]
    pub dry_run: bool,
    /// Log notifications instead of showing them on the desktop.
    #[arg(long)]
    pub headless: bool,
}

/// `wakecheck config` subcommands.
#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Print the effective configuration.
    Show {
        /// Emit JSON instead of TOML.
        #[arg(long)]
        json: bool,
    },
    /// Update configuration fields and save.
    Set(SetArgs),
    /// Print the configuration file path.
    Path,
}

/// Fields accepted by `wakecheck config set`.
#[derive(Args)]
pub struct SetArgs {
    /// Start time, HH:MM (24h).
    #[arg(long, value_name = "HH:MM")]
    pub start_time: Option<StartTime>,
    /// Seconds to wait for a confirmation.
    #[arg(long, value_name = "SECS")]
    pub duration: Option<u64>,
    /// Seconds between confirmed checks.
    #[arg(long, value_name = "SECS")]
    pub interval: Option<u64>,
    /// Loopback listener port.
    #[arg(long)]
    pub port: Option<u16>,
    /// Grace delay handed to the shutdown command, in seconds.
    #[arg(long, value_name = "SECS")]
    pub grace: Option<u64>,
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<()> {
    let store = cli
        .config
        .as_ref()
        .map_or_else(ConfigStore::default_location, ConfigStore::new);

    match &cli.command {
        Command::Run(args) => run_monitor(&store, args),
        Command::Confirm => confirm(&store),
        Command::Config(cmd) => config_command(&store, cmd),
        Command::Completions { shell } => {
            clap_complete::generate(*shell, &mut Cli::command(), "wakecheck", &mut io::stdout());
            Ok(())
        }
    }
}

fn run_monitor(store: &ConfigStore, args: &RunArgs) -> Result<()> {
    let config = store.load();
    let signals = Arc::new(ConfirmationSignals::with_sentinel(
        store.sentinel_file(&config),
    ));
    let audit = AuditLog::open(store.audit_log(&config)).unwrap_or_else(|err| {
        warn!(code = err.code(), "{err}; audit log disabled");
        AuditLog::disabled()
    });

    let _bridge = SignalBridge::install(TrayMenu::new(Arc::clone(&signals)))
        .map_err(|err| warn!(code = err.code(), "{err}; only the notification can stop a phase"))
        .ok();

    let presenter: Box<dyn NotificationPresenter> = if args.headless {
        Box::new(LogNotifier)
    } else {
        Box::new(DesktopNotifier::new(Arc::clone(&signals)))
    };
    let shutdown: Box<dyn ShutdownAction> = if args.dry_run {
        Box::new(DryRunShutdown)
    } else {
        Box::new(SystemShutdown::new(config.shutdown_grace()))
    };

    let report = Monitor::new(
        config,
        signals,
        Arc::new(SystemClock::new()),
        presenter,
        shutdown,
    )
    .with_audit_log(Arc::new(audit))
    .with_options(MonitorOptions {
        start_at: args.start_at,
        start_now: args.now,
    })
    .run();

    let outcome = match report.outcome {
        MonitorOutcome::Stopped => "stopped".green(),
        MonitorOutcome::ShutdownInvoked => "shutdown requested".yellow().bold(),
        MonitorOutcome::ShutdownFailed => "shutdown failed".red().bold(),
    };
    println!(
        "{outcome} after {} cycle(s), {} confirmation(s)",
        report.cycles,
        report.confirmations.len()
    );

    if report.outcome == MonitorOutcome::ShutdownFailed {
        return Err(WakeError::ShutdownFailed {
            details: "the shutdown command did not succeed; see log".to_string(),
        });
    }
    Ok(())
}

fn confirm(store: &ConfigStore) -> Result<()> {
    let config = store.load();
    let sentinel = store.sentinel_file(&config);
    write_sentinel(&sentinel)?;
    match AuditLog::open(store.audit_log(&config)) {
        Ok(log) => log.record(AuditEvent::HelperConfirmed {
            sentinel: sentinel.clone(),
        }),
        Err(err) => warn!(code = err.code(), "{err}; confirmation not audited"),
    }
    println!("{} wrote {}", "confirmed:".green(), sentinel.display());
    Ok(())
}

fn config_command(store: &ConfigStore, cmd: &ConfigCommand) -> Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            let config = store.load();
            if *json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                println!("{}", format!("# {}", store.path().display()).dimmed());
                print!("{}", toml::to_string_pretty(&config)?);
            }
        }
        ConfigCommand::Set(args) => {
            let mut config = store.load();
            if let Some(start_time) = args.start_time {
                config.start_time = start_time;
            }
            if let Some(duration) = args.duration {
                config.notification_duration = duration;
            }
            if let Some(interval) = args.interval {
                config.notification_interval = interval;
            }
            if let Some(port) = args.port {
                config.listener_port = port;
            }
            if let Some(grace) = args.grace {
                config.shutdown_grace_secs = grace;
            }
            config.validate()?;
            store.save(&config)?;
            println!("{} {}", "saved".green(), store.path().display());
        }
        ConfigCommand::Path => println!("{}", store.path().display()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_flags_parse() {
        let cli = Cli::try_parse_from(["wakecheck", "run", "--start-at", "23:15", "--dry-run"])
            .expect("valid args");
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.start_at, StartTime::new(23, 15));
        assert!(args.dry_run);
        assert!(!args.now);
    }

    #[test]
    fn now_conflicts_with_start_at() {
        assert!(
            Cli::try_parse_from(["wakecheck", "run", "--now", "--start-at", "01:00"]).is_err()
        );
    }

    #[test]
    fn bad_start_time_is_rejected_at_parse() {
        assert!(Cli::try_parse_from(["wakecheck", "config", "set", "--start-time", "7pm"]).is_err());
    }
}
