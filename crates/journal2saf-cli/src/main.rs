use std::path::{Path, PathBuf};

use chrono::Local;
use clap::{builder::ArgAction, Parser, Subcommand};
use console::{style, Emoji};
use errors::CliErrors;
use journal2saf::{
  config::Config,
  mail,
  tasks::{run_tasks, Task},
  Report,
};
use tracing::{debug, info, trace};
use tracing_appender::rolling;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub mod errors;

static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "");
static SCROLL: Emoji<'_, '_> = Emoji("📜 ", "");
static MAIL: Emoji<'_, '_> = Emoji("📧 ", "");
static WARNING: Emoji<'_, '_> = Emoji("⚠️  ", "");
static SUCCESS: Emoji<'_, '_> = Emoji("✨ ", "");

#[derive(Parser)]
#[command(author, version, about = "Harvest OJS/OMP publications into DSpace SAF packages")]
struct Cli {
  /// Verbose mode (-v, -vv, -vvv)
  #[arg(
        short,
        long,
        action = ArgAction::Count,
        global = true,
        help = "Increase logging verbosity"
    )]
  verbose: u8,

  /// Configuration file, defaults to the user config directory
  #[arg(long, short, global = true)]
  config: Option<PathBuf>,

  /// Additionally write logs to daily rotated files in this directory
  #[arg(long, global = true)]
  log_dir: Option<PathBuf>,

  /// Only harvest these journals (by urlPath)
  #[arg(long, global = true, num_args = 1..)]
  allow: Vec<String>,

  /// Never harvest these journals (by urlPath)
  #[arg(long, global = true, num_args = 1..)]
  deny: Vec<String>,

  /// Mail the report when the run is over
  #[arg(long, global = true)]
  email: bool,

  /// Print the report as JSON
  #[arg(long, global = true)]
  json: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Write an example configuration file
  Init {
    /// Overwrite an existing configuration without asking
    #[arg(long)]
    force: bool,
  },
  /// Harvest the journal server, write SAF items and zip them
  Export,
  /// Upload the zips to the repository host
  Copy,
  /// Run the DSpace importer for zips on the repository host
  Import,
  /// Fetch DOI files from the repository host
  RetrieveDoi,
  /// Write retrieved DOIs back to the journal server
  WriteDoi,
  /// Export and copy, optionally followed by import and DOI handling
  Run {
    /// Import the copied zips into DSpace
    #[arg(long)]
    import: bool,
    /// Retrieve DOIs and write them back
    #[arg(long)]
    doi: bool,
  },
}

impl Commands {
  /// Pipeline tasks run by this command.
  fn tasks(&self) -> Vec<Task> {
    match self {
      Commands::Init { .. } => Vec::new(),
      Commands::Export => vec![Task::Export],
      Commands::Copy => vec![Task::Copy],
      Commands::Import => vec![Task::Import],
      Commands::RetrieveDoi => vec![Task::RetrieveDoi],
      Commands::WriteDoi => vec![Task::WriteDoi],
      Commands::Run { import, doi } => {
        let mut tasks = vec![Task::Export, Task::Copy];
        if *import {
          tasks.push(Task::Import);
        }
        if *doi {
          tasks.extend([Task::RetrieveDoi, Task::WriteDoi]);
        }
        tasks
      },
    }
  }
}

/// Setup logging with the specified verbosity level, optionally mirrored to rolling files.
fn setup_logging(verbosity: u8, log_dir: Option<&Path>) -> Result<(), CliErrors> {
  let filter = match verbosity {
    0 => "warn",
    1 => "info",
    2 => "debug",
    _ => "trace",
  };

  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

  let file_layer = match log_dir {
    Some(dir) => {
      let file_appender = rolling::RollingFileAppender::builder()
        .rotation(rolling::Rotation::DAILY)
        .filename_prefix("journal2saf")
        .filename_suffix("log")
        .build(dir)?;
      Some(fmt::layer().with_writer(file_appender).with_ansi(false).with_target(true))
    },
    None => None,
  };

  tracing_subscriber::registry()
    .with(filter)
    .with(
      fmt::layer()
        .with_writer(std::io::stderr)
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_target(true),
    )
    .with(file_layer)
    .init();
  Ok(())
}

/// Writes the example configuration, asking before an existing file is replaced.
fn init(path: &Path, force: bool) -> Result<(), CliErrors> {
  if path.exists() && !force {
    println!(
      "{} Configuration already exists at: {}",
      style(WARNING).yellow(),
      style(path.display()).yellow()
    );
    let confirm = dialoguer::Confirm::new()
      .with_prompt("Do you want to replace it with the example configuration?")
      .default(false)
      .interact()?;
    if !confirm {
      println!("{} Keeping existing configuration", style("ℹ").blue());
      return Ok(());
    }
  }

  trace!("writing example configuration to {}", path.display());
  Config::write_example(path)?;
  println!(
    "{} Example configuration written to: {}",
    style(SUCCESS).green(),
    style(path.display()).yellow()
  );
  println!("   Edit the [general] and [export] sections before the first run.");
  Ok(())
}

/// Prints the report grouped by key.
fn print_report(report: &Report) {
  if report.is_empty() {
    println!("{} Nothing to report", style(SCROLL).cyan());
    return;
  }
  println!("{} Report:", style(SCROLL).cyan());
  for (key, values) in report.iter() {
    let is_error = key.contains("ERROR") || key.to_lowercase().starts_with("error");
    let key = if is_error { style(key).red().bold() } else { style(key).green().bold() };
    println!("{key}:");
    for value in values {
      println!("  - {}", style(value).white());
    }
  }
}

#[tokio::main]
async fn main() -> Result<(), CliErrors> {
  let cli = Cli::parse();
  setup_logging(cli.verbose, cli.log_dir.as_deref())?;

  let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
  debug!("Using configuration at: {}", config_path.display());

  if let Commands::Init { force } = cli.command {
    return init(&config_path, force);
  }

  if !config_path.exists() {
    println!(
      "{} No configuration found at: {}",
      style(WARNING).yellow(),
      style(config_path.display()).yellow()
    );
    println!("   Create one with {}", style("journal2saf init").cyan());
    return Err(CliErrors::MissingConfig(config_path));
  }
  let mut config = Config::load(&config_path)?;
  if !cli.allow.is_empty() {
    config = config.with_allow(cli.allow.clone());
  }
  if !cli.deny.is_empty() {
    config = config.with_deny(cli.deny.clone());
  }

  let tasks = cli.command.tasks();
  let started = Local::now();
  println!(
    "{} Running {} against {}",
    style(ROCKET).cyan(),
    style(tasks.iter().map(Task::to_string).collect::<Vec<_>>().join(", ")).yellow(),
    style(&config.general.journal_server).yellow()
  );

  let report = run_tasks(&config, &tasks).await?;
  if cli.json {
    println!("{}", report.to_json()?);
  } else {
    print_report(&report);
  }

  if cli.email || config.email.as_ref().is_some_and(|email| email.enabled) {
    let email = config.email()?;
    mail::send_report(email, &report).await?;
    println!("{} Report mailed to {}", style(MAIL).cyan(), style(&email.receiver).yellow());
  }

  let elapsed = Local::now() - started;
  info!("Duration: {}s", elapsed.num_milliseconds() as f64 / 1000.0);

  if report.has_errors() {
    return Err(CliErrors::Failed);
  }
  println!("{} Done", style(SUCCESS).green());
  Ok(())
}
