/// Version injected at compile time via ARMCTL_VERSION env var (set by CI/CD),
/// or "dev" for local builds.
pub const VERSION: &str = match option_env!("ARMCTL_VERSION") {
    Some(v) => v,
    None => "dev",
};

use anyhow::{bail, Context, Result};
use armctl::azure::client::ArmClient;
use armctl::config::ProviderConfig;
use armctl::manifest::Manifest;
use armctl::plan::{self, Engine, Workspace};
use armctl::resource::{get_all_data_source_keys, get_all_resource_keys, get_data_source, get_resource, StateStore};
use armctl::resource_id::ResourceId;
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Declarative lifecycle management for Azure Resource Manager resources
#[derive(Parser, Debug)]
#[command(name = "armctl", version, about, long_about = None)]
struct Args {
    /// Provider configuration file (defaults to <config dir>/armctl/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// State file (defaults to <config dir>/armctl/state.json)
    #[arg(long, global = true)]
    state: Option<PathBuf>,

    /// Subscription to manage, overrides configuration and ARM_SUBSCRIPTION_ID
    #[arg(long, global = true)]
    subscription: Option<String>,

    /// Log level for debugging
    #[arg(long, value_enum, default_value = "off", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resource ID utilities
    Id {
        #[command(subcommand)]
        command: IdCommand,
    },
    /// List supported resource types, or show the schema of one
    Resources {
        /// Resource type to describe, e.g. azurerm_subnet
        resource_type: Option<String>,
    },
    /// Show what apply would change
    Plan {
        /// Manifest file
        #[arg(short, long)]
        file: PathBuf,
        /// Skip re-reading stored objects first
        #[arg(long)]
        no_refresh: bool,
    },
    /// Create, update, replace and delete objects to match the manifest
    Apply {
        #[arg(short, long)]
        file: PathBuf,
        #[arg(long)]
        no_refresh: bool,
        /// Do not ask for confirmation
        #[arg(long)]
        auto_approve: bool,
    },
    /// Re-read every stored object and update state
    Refresh,
    /// Delete every object in state, newest first
    Destroy {
        #[arg(long)]
        auto_approve: bool,
    },
    /// Adopt an existing object into state
    Import {
        address: String,
        resource_type: String,
        id: String,
    },
    /// Print state with sensitive values masked
    Show,
}

#[derive(Subcommand, Debug)]
enum IdCommand {
    /// Parse an ARM resource ID and print its parts
    Parse {
        id: String,
        /// Also check the ID against a resource type's expected format
        #[arg(long = "type")]
        resource_type: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }
}

fn setup_logging(level: LogLevel) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let tracing_level = level.to_tracing_level()?;

    let log_path = get_log_path();

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
    {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Cannot open log file {}: {}", log_path.display(), e);
            return None;
        },
    };

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(tracing_level.as_str())),
        )
        .with_writer(non_blocking.with_max_level(tracing_level))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("armctl {} started with log level: {:?}", VERSION, level);
    tracing::info!("Log file: {:?}", log_path);

    Some(guard)
}

fn get_log_path() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("armctl").join("armctl.log");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".armctl").join("armctl.log");
    }
    PathBuf::from("armctl.log")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let _log_guard = setup_logging(args.log_level);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("Interrupted, stopping after the current request...");
                cancel.cancel();
            }
        });
    }

    let result = run(&args, &cancel).await;
    if let Err(err) = &result {
        tracing::error!("{:#}", err);
    }
    result
}

async fn run(args: &Args, cancel: &CancellationToken) -> Result<()> {
    match &args.command {
        Command::Id {
            command: IdCommand::Parse { id, resource_type },
        } => parse_id(id, resource_type.as_deref()),
        Command::Resources { resource_type } => list_resources(resource_type.as_deref()),
        Command::Show => {
            let state = StateStore::load(&state_path(args)?)?;
            println!("{}", serde_json::to_string_pretty(&plan::show(&state))?);
            Ok(())
        },
        command => {
            let config = provider_config(args)?;
            let client = ArmClient::from_config(&config).context("Failed to initialise the ARM client")?;
            tracing::info!("Using subscription {} at {}", client.subscription_id, client.endpoint);

            let engine = Engine::new(&client, cancel, config.max_concurrency());
            let mut workspace = Workspace::load(state_path(args)?).context("Failed to load state")?;
            execute(command, &engine, &mut workspace).await
        },
    }
}

async fn execute(command: &Command, engine: &Engine<'_>, workspace: &mut Workspace) -> Result<()> {
    match command {
        Command::Plan { file, no_refresh } => {
            let manifest = load_manifest(file)?;
            if !no_refresh {
                engine.refresh(workspace).await.context("Refresh failed")?;
            }
            let plan = engine.plan(&manifest, &workspace.state).await?;
            println!("{plan}");
        },
        Command::Apply {
            file,
            no_refresh,
            auto_approve,
        } => {
            let manifest = load_manifest(file)?;
            if !no_refresh {
                engine.refresh(workspace).await.context("Refresh failed")?;
            }
            let plan = engine.plan(&manifest, &workspace.state).await?;
            println!("{plan}");

            if !plan.has_changes() {
                return Ok(());
            }
            if !auto_approve && !confirm("Apply these changes?")? {
                bail!("Apply cancelled");
            }

            engine.apply(&manifest, &plan, workspace).await.context("Apply failed")?;
            println!("Apply complete.");
        },
        Command::Refresh => {
            engine.refresh(workspace).await.context("Refresh failed")?;
            println!("{} objects in state.", workspace.state.resources.len());
        },
        Command::Destroy { auto_approve } => {
            if workspace.state.is_empty() {
                println!("Nothing to destroy.");
                return Ok(());
            }
            for address in workspace.state.addresses().iter().rev() {
                println!("{address}: delete");
            }
            if !auto_approve && !confirm("Delete all of these?")? {
                bail!("Destroy cancelled");
            }

            let count = engine.destroy(workspace).await.context("Destroy failed")?;
            println!("Destroyed {count} objects.");
        },
        Command::Import {
            address,
            resource_type,
            id,
        } => {
            let state = engine
                .import(workspace, address, resource_type, id)
                .await
                .with_context(|| format!("Failed to import {id}"))?;
            println!("Imported {} as {}.", state.id, address);
        },
        Command::Id { .. } | Command::Resources { .. } | Command::Show => {},
    }
    Ok(())
}

fn provider_config(args: &Args) -> Result<ProviderConfig> {
    let mut config = match &args.config {
        Some(path) => ProviderConfig::load_from(path)?,
        None => ProviderConfig::load()?,
    };
    config.apply_env()?;
    if let Some(subscription) = &args.subscription {
        config.subscription_id = Some(subscription.clone());
    }
    config.validate().context("Invalid provider configuration")?;
    Ok(config)
}

fn state_path(args: &Args) -> Result<PathBuf> {
    match &args.state {
        Some(path) => Ok(path.clone()),
        None => StateStore::default_path().context("Cannot determine the config directory; pass --state"),
    }
}

fn load_manifest(path: &Path) -> Result<Manifest> {
    Manifest::load(path).with_context(|| format!("Failed to load {}", path.display()))
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{prompt} Only 'yes' will be accepted: ");
    io::stdout().flush()?;

    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(answer.trim() == "yes")
}

fn parse_id(input: &str, resource_type: Option<&str>) -> Result<()> {
    let id = match resource_type {
        Some(name) => {
            let resource = get_resource(name).with_context(|| format!("Unknown resource type {name:?}"))?;
            resource.id_format().parse(input)?
        },
        None => ResourceId::parse(input)?,
    };

    let segments: Vec<_> = id
        .segments()
        .iter()
        .map(|s| json!({ "type": s.kind, "name": s.name }))
        .collect();

    let parsed = json!({
        "id": id.to_string(),
        "subscription_id": id.subscription_id(),
        "resource_group": id.resource_group(),
        "provider": id.provider(),
        "resource_type": id.resource_type(),
        "name": id.name(),
        "segments": segments,
    });
    println!("{}", serde_json::to_string_pretty(&parsed)?);
    Ok(())
}

fn list_resources(resource_type: Option<&str>) -> Result<()> {
    let Some(name) = resource_type else {
        println!("Resources:");
        for key in get_all_resource_keys() {
            println!("  {key}");
        }
        println!("Data sources:");
        for key in get_all_data_source_keys() {
            println!("  {key}");
        }
        return Ok(());
    };

    let (display_name, schema) = match (get_resource(name), get_data_source(name)) {
        (Some(r), _) => (r.display_name(), r.schema()),
        (None, Some(d)) => (d.display_name(), d.schema()),
        (None, None) => bail!("Unknown resource type {name:?}"),
    };

    println!("{display_name} ({name}), schema version {}", schema.version);
    if let Some(resource) = get_resource(name) {
        println!("ID format: {}", resource.id_format().example);
        let t = resource.default_timeouts();
        println!(
            "Timeouts: create {:?}, read {:?}, update {:?}, delete {:?}",
            t.create, t.read, t.update, t.delete
        );
    }

    for attr in schema.attributes {
        let mut flags = Vec::new();
        if attr.required {
            flags.push("required");
        } else if attr.optional {
            flags.push("optional");
        }
        if attr.computed {
            flags.push("computed");
        }
        if attr.force_new {
            flags.push("force new");
        }
        if attr.sensitive {
            flags.push("sensitive");
        }
        println!("  {:<32} {:<8} {}", attr.name, attr.kind.describe(), flags.join(", "));
    }
    Ok(())
}
