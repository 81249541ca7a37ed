use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use portero::config::{Config, ConfigError};
use portero::core::builder::{LoginRequest, NumericField};
use portero::store::{ConnectionStore, FileConnectionStore, MemoryConnectionStore};
use portero::transport::client::RespConnector;
use portero::AdminService;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "portero")]
#[command(about = "Connection registry and database probe for Redis deployments")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(author = "Portero Team")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the admin HTTP service
    Run {
        /// Path to configuration file
        #[arg(short, long, default_value = "config/dev.toml")]
        config: PathBuf,
        /// Keep saved connections in memory only
        #[arg(long)]
        ephemeral: bool,
    },
    /// Generate example configuration files
    Config {
        /// Configuration profile (local or server)
        #[arg(short, long)]
        profile: String,
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Validate configuration file
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Report which databases of a server hold keys
    Probe {
        /// Optional configuration file for timeouts
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// standalone, sentinel or cluster
        #[arg(long, default_value = "standalone")]
        server_type: String,
        /// Host name or Unix socket path
        #[arg(long)]
        hostname: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        password: Option<String>,
        /// Comma separated host:port list for sentinel deployments
        #[arg(long)]
        sentinels: Option<String>,
        #[arg(long)]
        sentinel_name: Option<String>,
        /// Comma separated host:port list for cluster deployments
        #[arg(long)]
        clusters: Option<String>,
        /// Connect to the server over TLS
        #[arg(long)]
        tls: bool,
    },
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, ephemeral } => {
            run_portero(config, ephemeral).await?;
        }
        Commands::Config { profile, output } => {
            generate_config(profile, output)?;
        }
        Commands::Validate { config } => {
            validate_config(config)?;
        }
        Commands::Probe {
            config,
            server_type,
            hostname,
            port,
            username,
            password,
            sentinels,
            sentinel_name,
            clusters,
            tls,
        } => {
            let request = LoginRequest {
                server_type: Some(server_type),
                hostname,
                port: port.map(|p| NumericField::from(u32::from(p))),
                username,
                password,
                sentinels,
                sentinel_name,
                clusters,
                redis_tls: tls.then(|| "yes".to_string()),
                ..Default::default()
            };
            probe_server(config, request).await?;
        }
        Commands::Version => {
            show_version();
        }
    }

    Ok(())
}

async fn run_portero(config_path: PathBuf, ephemeral: bool) -> Result<()> {
    let config = Config::load_from_file(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    init_logging(&config)?;

    info!("Starting portero v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded from: {:?}", config_path);

    if ephemeral {
        info!("Saved connections are kept in memory only");
        serve(config, Arc::new(MemoryConnectionStore::new())).await
    } else {
        info!("Saved connections file: {}", config.store.connections_file);
        let store = FileConnectionStore::new(&config.store.connections_file);
        serve(config, Arc::new(store)).await
    }
}

async fn serve<S: ConnectionStore>(config: Config, store: Arc<S>) -> Result<()> {
    let connector = Arc::new(RespConnector::new(
        config.connect_timeout(),
        config.command_timeout(),
    ));
    let service = Arc::new(AdminService::new(connector, store, config.service_options()));

    if let Err(e) = service.restore_saved_connections().await {
        warn!("Could not restore saved connections: {}", e);
    }

    let router = portero::api::build_router(Arc::clone(&service));
    let listener = tokio::net::TcpListener::bind(&config.server.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.listen_addr))?;
    info!("Listening on: {}", config.server.listen_addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Cannot listen for shutdown signal: {}", e);
            }
        })
        .await
        .context("HTTP server failed")?;

    info!("Shutting down, closing live connections");
    service.shutdown().await;
    Ok(())
}

async fn probe_server(config_path: Option<PathBuf>, request: LoginRequest) -> Result<()> {
    let config = match config_path {
        Some(path) => Config::load_from_file(&path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => Config::default(),
    };
    init_logging(&config)?;

    let connector = Arc::new(RespConnector::new(
        config.connect_timeout(),
        config.command_timeout(),
    ));
    let service = AdminService::new(
        connector,
        Arc::new(MemoryConnectionStore::new()),
        config.service_options(),
    );

    let response = service.detect_databases(&request).await;
    println!("{}", serde_json::to_string_pretty(&response)?);

    if !response.is_ok() {
        anyhow::bail!("probe failed");
    }
    Ok(())
}

fn generate_config(profile: String, output: PathBuf) -> Result<()> {
    println!("Generating {} configuration file: {:?}", profile, output);

    Config::create_example_config(&output, &profile).context("Failed to generate config")?;

    println!("Configuration file generated successfully!");
    println!("Edit the file to match your environment and run:");
    println!("  portero run --config {:?}", output);

    Ok(())
}

fn validate_config(config_path: PathBuf) -> Result<()> {
    println!("Validating configuration file: {:?}", config_path);

    match Config::load_from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration file is valid");
            println!("  Listen address: {}", config.server.listen_addr);
            println!(
                "  Timeouts: connect {} ms, command {} ms",
                config.transport.connect_timeout_ms, config.transport.command_timeout_ms
            );
            println!(
                "  Default database ceiling: {}",
                config.probe.default_database_ceiling
            );
            println!("  Saved connections: {}", config.store.connections_file);
        }
        Err(e) => {
            eprintln!("✗ Configuration file validation failed:");
            match &e {
                ConfigError::IoError(msg) => eprintln!("  File error: {}", msg),
                ConfigError::ParseError(msg) => eprintln!("  Parse error: {}", msg),
                ConfigError::ValidationError(msg) => eprintln!("  Validation error: {}", msg),
                ConfigError::SerializeError(msg) => eprintln!("  Serialization error: {}", msg),
            }
            return Err(e.into());
        }
    }

    Ok(())
}

fn show_version() {
    println!("portero v{}", env!("CARGO_PKG_VERSION"));
    println!("Connection registry and database probe for Redis deployments");
    println!();
    println!("Target: {}", std::env::consts::ARCH);
    println!();
    println!("Features:");
    println!("  • Standalone, Unix socket, sentinel and cluster topologies");
    println!("  • TLS with custom CA, client certificates and SNI override");
    println!("  • One live connection per server, database and user");
    println!("  • Keyspace and database ceiling discovery");
}

fn init_logging(config: &Config) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .context("Invalid log filter")?;

    let registry = tracing_subscriber::registry().with(filter);
    match config.logging.format.as_str() {
        "json" => registry.with(tracing_subscriber::fmt::layer().json()).try_init(),
        _ => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    }
    .context("Logging already initialized")?;

    info!("Logging initialized at level: {}", config.logging.level);
    Ok(())
}
