//! syscheck - diagnostics console for system-inspection commands
//!
//! Browse the catalogue, run an entry with streaming output, and review the
//! logbook. The inner command's exit code is reported in the result record;
//! the process's own exit code is 0 when a result was produced, 2 on a
//! validation refusal, and 1 on a launch failure.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

use syscheck::catalog::{Catalog, CommandKind};
use syscheck::dispatch::{DispatchError, Dispatcher};
use syscheck::elevation::is_elevated;
use syscheck::logbook::Logbook;
use syscheck::runner::{ExecutionResult, Runner};
use syscheck::settings::Settings;

/// Entries whose natural runtime dwarfs the default timeout; they get at
/// least this much regardless of the configured value.
const LONG_RUNNING: &[&str] = &["System file check", "Disk check", "Component store repair"];
const LONG_RUNNING_FLOOR_SECS: u64 = 1800;

/// Log levels
#[derive(Debug, Clone, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_filter_directive(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Parser, Debug)]
#[clap(
    name = "syscheck",
    about = "Diagnostics console for browsing and running system-inspection commands",
    version
)]
struct Cli {
    #[clap(subcommand)]
    command: Command,

    /// Set log level
    #[clap(long, default_value = "warn", global = true)]
    log_level: LogLevel,

    /// Load the catalogue from a YAML file instead of the built-in one
    #[clap(long, global = true)]
    catalog: Option<PathBuf>,

    /// Directory for run logs (default: ./logs)
    #[clap(long, global = true)]
    logs_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List catalogue entries
    List {
        /// Case-insensitive filter over names and descriptions
        #[clap(long, default_value = "")]
        filter: String,

        /// Show favorites only
        #[clap(long)]
        favorites: bool,

        /// Display results in a compact table format
        #[clap(short, long, conflicts_with = "json")]
        table: bool,

        /// Output results as JSON
        #[clap(long)]
        json: bool,
    },

    /// Show one catalogue entry in full
    Show {
        /// Entry name
        name: String,
    },

    /// Run a catalogue entry, streaming its output
    Run {
        /// Entry name
        name: String,

        /// Parameter value for parameterized entries
        #[clap(long)]
        input: Option<String>,

        /// Timeout in seconds (default: the persisted setting)
        #[clap(long)]
        timeout: Option<u64>,

        /// Print the final result as JSON instead of streaming text
        #[clap(long)]
        json: bool,

        /// Also write captured stdout to a file
        #[clap(long)]
        output: Option<PathBuf>,
    },

    /// Print today's run log
    Log,

    /// Manage favorite entries
    Favorite {
        #[clap(subcommand)]
        command: FavoriteCommand,
    },
}

#[derive(Subcommand, Debug)]
enum FavoriteCommand {
    /// Mark an entry as favorite
    Add { name: String },
    /// Remove an entry from favorites
    Remove { name: String },
    /// List favorite entries
    List,
}

fn initialize_tracing(log_level: &LogLevel) {
    let filter = EnvFilter::new(log_level.to_filter_directive());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn load_catalog(path: Option<&PathBuf>) -> Result<Catalog> {
    match path {
        Some(path) => Catalog::load(path).await,
        None => Catalog::embedded(),
    }
}

async fn load_settings() -> (Settings, Option<PathBuf>) {
    let Some(path) = Settings::default_path() else {
        debug!("No config directory available, using default settings");
        return (Settings::default(), None);
    };
    match Settings::load(&path).await {
        Ok(settings) => (settings, Some(path)),
        Err(e) => {
            error!("Failed to load settings: {:#}", e);
            (Settings::default(), Some(path))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    initialize_tracing(&cli.log_level);

    let catalog = load_catalog(cli.catalog.as_ref()).await?;
    let logs_dir = cli.logs_dir.clone().unwrap_or_else(|| PathBuf::from("logs"));

    match cli.command {
        Command::List {
            filter,
            favorites,
            table,
            json,
        } => list_command(&catalog, &filter, favorites, table, json).await,
        Command::Show { name } => show_command(&catalog, &name),
        Command::Run {
            name,
            input,
            timeout,
            json,
            output,
        } => run_command(catalog, logs_dir, name, input, timeout, json, output).await,
        Command::Log => log_command(logs_dir).await,
        Command::Favorite { command } => favorite_command(&catalog, command).await,
    }
}

#[derive(Tabled)]
struct ListRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Description")]
    description: String,
    #[tabled(rename = "Kind")]
    kind: &'static str,
    #[tabled(rename = "Admin")]
    admin: &'static str,
}

async fn list_command(
    catalog: &Catalog,
    filter: &str,
    favorites_only: bool,
    table: bool,
    json: bool,
) -> Result<()> {
    let (settings, _) = load_settings().await;
    let favorites = favorites_only.then_some(&settings.favorites);
    let entries = catalog.filter(filter, favorites);

    if json {
        let items: Vec<_> = entries
            .iter()
            .map(|(name, entry)| {
                serde_json::json!({
                    "name": name,
                    "description": entry.description,
                    "parameterized": entry.is_parameterized(),
                    "requires_admin": entry.requires_admin,
                    "favorite": settings.favorites.contains(*name),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("No matching entries.");
        return Ok(());
    }

    if table {
        let rows: Vec<ListRow> = entries
            .iter()
            .map(|(name, entry)| ListRow {
                name: (*name).clone(),
                description: entry.description.clone(),
                kind: if entry.is_parameterized() {
                    "parameterized"
                } else {
                    "literal"
                },
                admin: if entry.requires_admin { "yes" } else { "-" },
            })
            .collect();

        let table = Table::new(&rows)
            .with(Style::rounded())
            .with(Modify::new(Rows::first()).with(Alignment::center()))
            .to_string();
        println!("Found {} entries\n", entries.len());
        println!("{table}");
        return Ok(());
    }

    for (name, entry) in entries {
        let mut flags = Vec::new();
        if settings.favorites.contains(name) {
            flags.push("★");
        }
        if entry.requires_admin {
            flags.push("admin");
        }
        if entry.is_parameterized() {
            flags.push("parameterized");
        }
        let flags = if flags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", flags.join(", "))
        };
        println!("{name}{flags}");
        println!("    {}", entry.description);
    }
    Ok(())
}

fn show_command(catalog: &Catalog, name: &str) -> Result<()> {
    let Some(entry) = catalog.get(name) else {
        eprintln!("Error: unknown command '{name}'");
        std::process::exit(2);
    };

    println!("Name:        {name}");
    println!("Description: {}", entry.description);
    match &entry.kind {
        CommandKind::Literal { command } => println!("Command:     {command}"),
        CommandKind::Parameterized {
            template,
            input_prompt,
            input_pattern,
            input_example,
        } => {
            println!("Template:    {template}");
            println!("Prompt:      {input_prompt}");
            if let Some(pattern) = input_pattern {
                println!("Pattern:     {pattern}");
            }
            if let Some(example) = input_example {
                println!("Example:     {example}");
            }
        }
    }
    if entry.requires_admin {
        println!("Requires:    elevated privileges");
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_command(
    catalog: Catalog,
    logs_dir: PathBuf,
    name: String,
    input: Option<String>,
    timeout: Option<u64>,
    json: bool,
    output: Option<PathBuf>,
) -> Result<()> {
    let (mut settings, settings_path) = load_settings().await;

    let mut timeout_secs = timeout.unwrap_or(settings.timeout_seconds).max(1);
    if LONG_RUNNING.contains(&name.as_str()) {
        timeout_secs = timeout_secs.max(LONG_RUNNING_FLOOR_SECS);
    }

    let dispatcher = Dispatcher::new(
        catalog,
        is_elevated(),
        Duration::from_secs(settings.timeout_seconds.max(1)),
    );
    let request = match dispatcher.resolve(
        &name,
        input.as_deref(),
        Some(Duration::from_secs(timeout_secs)),
    ) {
        Ok(request) => request,
        Err(e) => {
            eprintln!("Error: {e}");
            if matches!(e, DispatchError::ElevationRequired(_)) {
                eprintln!("Restart syscheck from an elevated shell to run this entry.");
            }
            std::process::exit(2);
        }
    };

    let runner = Runner::default();
    let mut handle = match runner.spawn(request) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Error: could not start the command: {e}");
            std::process::exit(1);
        }
    };

    // Ctrl-C converges on the same cancellation lever the GUI's cancel
    // button used: kill the child, then report the prefixed result.
    let cancel = handle.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Cancelling...");
            cancel.cancel();
        }
    });

    while let Some(chunk) = handle.chunks.recv().await {
        if json {
            continue;
        }
        if chunk.is_error_stream {
            eprint!("{}", chunk.text);
        } else {
            print!("{}", chunk.text);
        }
    }

    let result = handle.wait().await?;

    let logbook = Logbook::new(logs_dir);
    if let Err(e) = logbook.append(&name, &result).await {
        error!("Failed to write the run log: {:#}", e);
    }

    if let Some(path) = output {
        save_output(&path, &result)?;
        if let Some(settings_path) = settings_path {
            settings.last_save_dir = path.parent().map(|p| p.to_path_buf());
            if let Err(e) = settings.save(&settings_path).await {
                error!("Failed to persist settings: {:#}", e);
            }
        }
        eprintln!("Saved output to {}", path.display());
    }

    report_result(&name, &result, json)?;
    Ok(())
}

fn save_output(path: &std::path::Path, result: &ExecutionResult) -> Result<()> {
    let mut file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create output file {path:?}"))?;
    file.write_all(result.stdout.as_bytes())
        .with_context(|| format!("Failed to write output file {path:?}"))?;
    Ok(())
}

fn report_result(name: &str, result: &ExecutionResult, json: bool) -> Result<()> {
    if json {
        let report = serde_json::json!({
            "command": name,
            "stdout": result.stdout,
            "stderr": result.stderr,
            "return_code": result.return_code,
            "timed_out": result.timed_out,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if result.timed_out {
        eprintln!("\n{name}: {}", result.stderr);
    } else if result.success() {
        eprintln!("\n{name}: completed successfully");
    } else {
        if !result.stderr.is_empty() {
            eprintln!("\n{}", result.stderr);
        }
        eprintln!("{name}: failed (code {})", result.return_code);
    }
    Ok(())
}

async fn log_command(logs_dir: PathBuf) -> Result<()> {
    let logbook = Logbook::new(logs_dir);
    match logbook.read_today().await? {
        Some(content) => print!("{content}"),
        None => println!(
            "No log for today yet (looked in {:?}). Run a command first.",
            logbook.dir()
        ),
    }
    Ok(())
}

async fn favorite_command(catalog: &Catalog, command: FavoriteCommand) -> Result<()> {
    let (mut settings, settings_path) = load_settings().await;
    let Some(settings_path) = settings_path else {
        eprintln!("Error: no config directory available to store favorites");
        std::process::exit(1);
    };

    match command {
        FavoriteCommand::Add { name } => {
            if catalog.get(&name).is_none() {
                eprintln!("Error: unknown command '{name}'");
                std::process::exit(2);
            }
            if settings.favorites.insert(name.clone()) {
                settings.save(&settings_path).await?;
                println!("Added '{name}' to favorites");
            } else {
                println!("'{name}' is already a favorite");
            }
        }
        FavoriteCommand::Remove { name } => {
            if settings.favorites.remove(&name) {
                settings.save(&settings_path).await?;
                println!("Removed '{name}' from favorites");
            } else {
                println!("'{name}' was not a favorite");
            }
        }
        FavoriteCommand::List => {
            if settings.favorites.is_empty() {
                println!("No favorites yet. Add one with: syscheck favorite add <name>");
            } else {
                for name in &settings.favorites {
                    println!("{name}");
                }
            }
        }
    }
    Ok(())
}
