use anyhow::Result;
use chrono::Utc;
use fortify_storage::FortifyStore;
use rand::Rng;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tracing_subscriber::EnvFilter;

use fortify_server::admin_seed;
use fortify_server::app;
use fortify_server::config::ServerConfig;
use fortify_server::state::AppState;
use fortify_server::template_seed;

#[allow(clippy::print_stderr)]
fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  fortify-server [config.toml]                          Start the server");
    eprintln!("  fortify-server init-admin <config.toml>               Create the default admin account");
    eprintln!("  fortify-server init-templates <config.toml> <seed.json>  Load compliance templates from a seed file");
}

#[tokio::main]
async fn main() -> Result<()> {
    fortify_common::id::init(1, 1);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("fortify=info".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(|s| s.as_str()) {
        Some("init-admin") => {
            let config_path = args.get(2).ok_or_else(|| {
                print_usage();
                anyhow::anyhow!("init-admin requires <config.toml> argument")
            })?;
            run_init_admin(config_path).await
        }
        Some("init-templates") => {
            let config_path = args.get(2).ok_or_else(|| {
                print_usage();
                anyhow::anyhow!("init-templates requires <config.toml> and <seed.json> arguments")
            })?;
            let seed_path = args.get(3).ok_or_else(|| {
                print_usage();
                anyhow::anyhow!("init-templates requires <seed.json> argument")
            })?;
            run_init_templates(config_path, seed_path).await
        }
        Some("--help" | "-h") => {
            print_usage();
            Ok(())
        }
        _ => {
            let config_path = args
                .get(1)
                .map(|s| s.as_str())
                .unwrap_or("config/server.toml");
            run_server(config_path).await
        }
    }
}

async fn open_store(config: &ServerConfig) -> Result<FortifyStore> {
    let db_url = config.database.connection_url();
    FortifyStore::new(&db_url, Path::new(&config.database.data_dir)).await
}

async fn run_init_admin(config_path: &str) -> Result<()> {
    let config = ServerConfig::load(config_path)?;
    let store = open_store(&config).await?;
    match admin_seed::ensure_default_admin(&store, &config.auth).await? {
        Some(id) => tracing::info!(id = %id, "init-admin completed"),
        None => tracing::info!("init-admin found an existing administrator"),
    }
    Ok(())
}

async fn run_init_templates(config_path: &str, seed_path: &str) -> Result<()> {
    let config = ServerConfig::load(config_path)?;
    let store = open_store(&config).await?;
    let summary = template_seed::seed_templates_from_file(&store, seed_path).await?;
    tracing::info!(
        created = summary.created,
        skipped = summary.skipped,
        invalid = summary.invalid,
        "init-templates completed"
    );
    Ok(())
}

fn random_secret() -> String {
    let bytes: [u8; 32] = rand::thread_rng().gen();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

async fn run_server(config_path: &str) -> Result<()> {
    let config = ServerConfig::load(config_path)?;

    tracing::info!(
        http_port = config.http_port,
        data_dir = %config.database.data_dir,
        db = %config.database.redacted_url(),
        "fortify-server starting"
    );

    let store = Arc::new(open_store(&config).await?);

    if let Err(e) = admin_seed::ensure_default_admin(&store, &config.auth).await {
        tracing::error!(error = %e, "Failed to initialize default admin account");
    }

    let jwt_secret = match &config.auth.jwt_secret {
        Some(secret) => Arc::new(secret.clone()),
        None => {
            tracing::warn!("No jwt_secret configured. A random secret was generated and will change on restart. Set [auth].jwt_secret in config for production use.");
            Arc::new(random_secret())
        }
    };

    let state = AppState {
        store,
        start_time: Utc::now(),
        jwt_secret,
        token_expire_secs: config.auth.token_expire_secs,
        config: Arc::new(config.clone()),
    };

    let http_addr: SocketAddr = format!("0.0.0.0:{}", config.http_port).parse()?;
    let app = app::build_http_app(state);
    let listener = tokio::net::TcpListener::bind(http_addr).await?;
    tracing::info!(http = %http_addr, "Server started");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        signal::ctrl_c().await.ok();
        tracing::info!("Shutting down gracefully");
    })
    .await?;

    tracing::info!("Server stopped");
    Ok(())
}
