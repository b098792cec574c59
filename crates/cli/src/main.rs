use std::{path::PathBuf, sync::Arc};

use {
    antares_config::AntaresConfig,
    antares_framework::{
        Bot, Discovery, ModuleCatalog, ModuleRegistry, Transport, internal,
    },
    antares_telegram::TelegramTransport,
    clap::{Parser, Subcommand},
    tracing::{info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "antares", about = "Antares: a modular Telegram bot")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file (defaults to antares.{toml,yaml,json} in ./ or ~/.config/antares/).
    #[arg(long, global = true, env = "ANTARES_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to Telegram and serve updates (default when no subcommand is provided).
    Run,
    /// Print the modules that would be loaded, in lifecycle order.
    Modules,
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<AntaresConfig> {
    match &cli.config {
        Some(path) => antares_config::load_config(path),
        None => antares_config::discover_and_load(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Missing .env is fine.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_telemetry(&cli);

    let config = load_config(&cli)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(config).await,
        Commands::Modules => list_modules(&config),
    }
}

async fn run(config: AntaresConfig) -> anyhow::Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "antares starting");

    let transport = Arc::new(TelegramTransport::new(&config.telegram, config.owner_id)?);
    if config.owner_id.is_none() {
        warn!("owner_id is not configured; owner-only commands will be refused");
    }

    let bot = Bot::new(
        config,
        ModuleCatalog::new(),
        Arc::clone(&transport) as Arc<dyn Transport>,
    );
    bot.start().await?;

    let cancel = antares_telegram::start_polling(transport, bot.dispatcher().clone()).await?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("interrupt received, shutting down");
        },
        () = cancel.cancelled() => {
            warn!("polling ended, shutting down");
        },
    }
    cancel.cancel();

    let failed = bot.shutdown().await;
    if failed > 0 {
        anyhow::bail!("{failed} module(s) failed to stop");
    }
    Ok(())
}

fn list_modules(config: &AntaresConfig) -> anyhow::Result<()> {
    let discovery = Discovery::from_config(
        internal::catalog(),
        internal::UNITS.iter().copied(),
        &config.modules,
    );
    let registry = ModuleRegistry::new(discovery);
    registry.load_all()?;

    for descriptor in registry.enabled_modules() {
        println!(
            "{:>4}  {:<24} {}",
            descriptor.priority(),
            descriptor.name(),
            descriptor.module_type().type_name()
        );
    }
    Ok(())
}
