use std::{path::Path, sync::Arc};

use apihub::{
    adapters::{HttpClientAdapter, HttpHandler},
    config::{
        ApiDefinitionValidator, ServerConfig, ServerConfigValidator,
        loader::{load_config, load_definitions, load_privates, load_registry},
    },
    core::ApiExecutor,
    tracing_setup,
};
use clap::{Parser, Subcommand};
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use tokio::{net::TcpListener, signal};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    /// Configuration file (TOML, YAML or JSON). `APIHUB_*` variables override it.
    #[clap(short, long, global = true)]
    config: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate the configuration and every API definition
    Validate,
    /// Start the gateway server (default)
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;

    match args.command.unwrap_or(Commands::Serve) {
        Commands::Validate => validate_command(&config),
        Commands::Serve => serve(config).await,
    }
}

async fn serve(config: ServerConfig) -> Result<()> {
    tracing_setup::init_tracing(&config.log)
        .map_err(|e| eyre!("Failed to initialize tracing: {}", e))?;

    let provider = rustls::crypto::aws_lc_rs::default_provider();
    if let Err(e) = rustls::crypto::CryptoProvider::install_default(provider) {
        tracing::warn!(
            "CryptoProvider::install_default for aws-lc-rs reported an error: {:?}. \
            The application will proceed with the already installed provider.",
            e
        );
    }

    ServerConfigValidator::validate(&config).wrap_err("Invalid server configuration")?;

    let registry = load_registry(&config).wrap_err("Failed to load API definitions")?;
    let http_client = Arc::new(HttpClientAdapter::new(config.request_timeout()?)?);
    let executor = Arc::new(ApiExecutor::new(Arc::new(registry), http_client));
    let app = Arc::new(HttpHandler::new(executor)).router(config.bucket_enabled);

    let listener = TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.listen_addr))?;
    tracing::info!(
        "apihub listening on {} (buckets {})",
        config.listen_addr,
        if config.bucket_enabled { "enabled" } else { "disabled" }
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .wrap_err("Server error")?;

    tracing::info!("Graceful shutdown completed");
    Ok(())
}

async fn shutdown_signal() {
    tokio::select! {
        _ = signal::ctrl_c() => {
            tracing::info!("Received SIGINT (Ctrl+C), initiating graceful shutdown...");
        }
        _ = wait_for_sigterm() => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}

#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{SignalKind, signal};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::warn!("Failed to register SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await;
}

fn validate_command(config: &ServerConfig) -> Result<()> {
    println!("🔍 Validating apihub configuration");

    if let Err(e) = ServerConfigValidator::validate(config) {
        eprintln!("❌ Configuration validation failed:");
        eprintln!("{e}");
        return Err(eyre!("Invalid server configuration"));
    }
    println!("✅ Server configuration: OK");

    let definitions = load_definitions(Path::new(&config.api_def_path))?;
    let privates = load_privates(Path::new(&config.private_def_path))?;

    let mut failures = 0;
    for definition in &definitions {
        if let Err(e) = ApiDefinitionValidator::validate(definition) {
            failures += 1;
            eprintln!("❌ API '{}':", definition.id);
            eprintln!("   {e}");
        }
    }

    println!();
    println!("📋 Configuration Summary:");
    println!("   • Listen Address: {}", config.listen_addr);
    println!("   • API definitions: {}", definitions.len());
    println!("   • Private stores: {}", privates.len());
    println!("   • Buckets: {}", config.bucket_enabled);
    println!("   • Request timeout: {}", config.request_timeout);

    if failures > 0 {
        return Err(eyre!("{failures} API definition(s) failed validation"));
    }
    println!();
    println!("🎉 Configuration is valid and ready to use!");
    Ok(())
}
