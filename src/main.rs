//! Gatehouse daemon entry point.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info};

use gatehouse::{logging, MessageBus, ModuleManager, Settings};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "gatehouse", version, about = "Modular access-control platform")]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "gatehouse.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the platform until interrupted (the default).
    Run,
    /// Load and validate the configuration, then exit.
    Check,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let settings = Settings::load_from(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    settings.validate()?;
    logging::init(&settings.application)?;

    if matches!(cli.command, Some(Command::Check)) {
        info!(config = %cli.config.display(), "configuration is valid");
        return Ok(());
    }

    info!(
        application = %settings.application.name,
        modules = settings.modules.len(),
        "starting platform"
    );

    let bus = MessageBus::new(&settings.bus);
    let mut manager = ModuleManager::with_builtin_modules(bus);
    for dir in &settings.search_paths {
        manager.add_search_path(dir.clone());
    }

    let mut load_failures = 0usize;
    for definition in settings.enabled_modules() {
        if let Err(err) = manager.load_module(definition.clone()) {
            error!(module = %definition.name, %err, "failed to load module");
            load_failures += 1;
        }
    }
    if load_failures > 0 {
        anyhow::bail!("{load_failures} module(s) failed to load");
    }

    manager.init_modules()?;
    info!("platform running, press ctrl-c to stop");

    wait_for_shutdown()?;

    info!("shutting down");
    manager.stop_modules();
    Ok(())
}

/// Blocks the main thread until ctrl-c.
fn wait_for_shutdown() -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building signal runtime")?;
    runtime
        .block_on(tokio::signal::ctrl_c())
        .context("waiting for shutdown signal")?;
    Ok(())
}
