use clap::Parser;
use reyestr_config::AppConfig;
use reyestr_dispatch::app::{connect_cache, connect_store, Application};
use reyestr_dispatch::shutdown::ShutdownManager;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const EXIT_CONFIG_ERROR: i32 = 1;
const EXIT_STORE_UNREACHABLE: i32 = 2;
const EXIT_CACHE_UNREACHABLE: i32 = 3;

#[derive(Parser, Debug)]
#[command(
    name = "reyestr-dispatch",
    about = "Distributed task dispatcher and document-registration service",
    version
)]
struct Cli {
    /// Path to a TOML configuration file. Without it the default
    /// locations are probed and the environment still applies.
    #[arg(long)]
    config: Option<String>,

    /// Override the API bind host.
    #[arg(long)]
    host: Option<String>,

    /// Override the API bind port.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let mut config = match AppConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "configuration error");
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    };
    if let Some(host) = cli.host {
        config.api.host = host;
    }
    if let Some(port) = cli.port {
        config.api.port = port;
    }

    if let Err(err) = config.validate() {
        error!(error = %err, "configuration validation failed");
        std::process::exit(EXIT_CONFIG_ERROR);
    }

    let pool = match connect_store(&config).await {
        Ok(pool) => pool,
        Err(err) => {
            error!(error = %err, "store unreachable at startup");
            std::process::exit(EXIT_STORE_UNREACHABLE);
        }
    };

    let cache = match connect_cache(&config).await {
        Ok(cache) => cache,
        Err(err) => {
            error!(error = %err, "cache required but unreachable at startup");
            std::process::exit(EXIT_CACHE_UNREACHABLE);
        }
    };

    let app = match Application::new(config, cache, pool).await {
        Ok(app) => app,
        Err(err) => {
            error!(error = %err, "failed to assemble application");
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    };

    let shutdown = ShutdownManager::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown.listen_for_signals().await;
        }
    });

    info!("dispatcher starting");
    if let Err(err) = app.run(&shutdown).await {
        error!(error = %err, "dispatcher terminated with error");
        std::process::exit(1);
    }
}
