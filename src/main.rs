use clap::Parser;
use messages_proxy::providers::ProviderPreset;
use messages_proxy::{build_router, AppState, ProxyConfig, SharedLogger};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "messages-proxy",
    about = "Serve the Anthropic Messages API on top of any OpenAI-compatible provider",
    version
)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config and PROXY_PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Host to bind (overrides config and PROXY_HOST)
    #[arg(long)]
    host: Option<String>,

    /// Provider preset name, e.g. groq or openrouter (sets the base URL)
    #[arg(long)]
    provider: Option<String>,

    /// Upstream model id (overrides config and MODEL_NAME)
    #[arg(short, long)]
    model: Option<String>,

    /// Append request events as JSON lines to this file
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Verbose logging
    #[arg(long)]
    debug: bool,

    /// Print config search paths and exit
    #[arg(long)]
    show_config_paths: bool,

    /// Print provider presets and exit
    #[arg(long)]
    list_providers: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.show_config_paths {
        println!("Config search paths:");
        println!("  1. messages-proxy.toml (current directory)");
        println!("  2. $XDG_CONFIG_HOME/messages-proxy/config.toml");
        println!("     ~/.config/messages-proxy/config.toml");
        println!("  3. ~/.messages-proxy.toml");
        println!("Environment variables override file values; flags override both.");
        return Ok(());
    }

    if cli.list_providers {
        for preset in ProviderPreset::all() {
            println!("  {:<12} {}", preset.name, preset.base_url);
        }
        return Ok(());
    }

    let mut config = ProxyConfig::find_and_load(cli.config.as_deref())?;
    config.apply_env(|key| std::env::var(key).ok())?;

    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(model) = cli.model {
        config.provider.model = model;
    }
    if let Some(ref provider) = cli.provider {
        match ProviderPreset::from_name(provider) {
            Some(preset) => {
                config.provider.name = Some(preset.name.to_string());
                config.provider.base_url = preset.base_url.to_string();
            }
            None => anyhow::bail!("Unknown provider preset '{provider}'"),
        }
    }
    config.debug |= cli.debug;

    let default_filter = if config.debug {
        "messages_proxy=debug,tower_http=debug"
    } else {
        "messages_proxy=info,tower_http=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    config.validate()?;

    let logger = SharedLogger::new(cli.log_file.as_deref())?;

    info!("messages-proxy v{}", env!("CARGO_PKG_VERSION"));
    info!("  Provider:    {}", config.provider_name());
    info!("  Base URL:    {}", config.provider.base_url);
    info!("  Model:       {}", config.provider.model);
    info!("  Max tokens:  {}", config.provider.max_output_tokens);
    info!("  Models:      {} mapped", config.models.len());
    if let Some(ref path) = cli.log_file {
        info!("  Log file:    {}", path.display());
    }

    let bind_addr = config.listen_addr();
    let port = config.port;
    let state = Arc::new(AppState::new(config, logger)?);

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}", bind_addr);
    info!("  To use with Claude Code:");
    info!("    ANTHROPIC_BASE_URL=http://localhost:{} claude", port);

    axum::serve(listener, app).await?;

    Ok(())
}
