use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use clap::Parser;
use sharegate::{AppState, build_app, config::AppConfig, db::DbPool, observability};
use tokio_util::task::TaskTracker;

const DEFAULT_CONFIG_FILE: &str = "sharegate.toml";

/// CLI arguments for sharegate
#[derive(Parser, Debug)]
#[command(version, about = "Usage tracking for shared chat accounts", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to config file (defaults to ./sharegate.toml if it exists,
    /// otherwise a built-in SQLite configuration)
    #[arg(short, long, global = true)]
    config: Option<String>,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Start the server (default)
    Serve,
    /// Run database migrations and exit
    ///
    /// Useful for init containers or CI/CD pipelines.
    Migrate,
    /// Create an admin user and print a fresh access token
    CreateAdmin {
        /// Login name of the new user
        #[arg(long)]
        username: String,
        /// Display name (defaults to the username)
        #[arg(long)]
        name: Option<String>,
    },
    /// Export the OpenAPI specification (JSON format)
    Openapi {
        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<String>,
    },
}

/// Configuration used when no config file is found.
fn default_config_toml() -> &'static str {
    r#"# sharegate configuration
# Generated automatically for local development

[server]
host = "127.0.0.1"
port = 8080

[database]
type = "sqlite"
path = "sharegate.db"

[observability.logging]
level = "info"
format = "compact"
"#
}

/// Load the explicit config file, else `./sharegate.toml`, else the
/// built-in default. Exits the process on error.
fn load_config(explicit_path: Option<&str>) -> (AppConfig, Option<PathBuf>) {
    let path = match explicit_path {
        Some(p) => Some(PathBuf::from(p)),
        None => Some(PathBuf::from(DEFAULT_CONFIG_FILE)).filter(|p| p.exists()),
    };

    let result = match &path {
        Some(p) => AppConfig::from_file(p),
        None => AppConfig::from_str(default_config_toml()),
    };

    match result {
        Ok(config) => (config, path),
        Err(e) => {
            let source = path
                .as_deref()
                .map(Path::display)
                .map(|d| d.to_string())
                .unwrap_or_else(|| "built-in defaults".to_string());
            eprintln!("Failed to load config from {}: {}", source, e);
            std::process::exit(1);
        }
    }
}

fn init_tracing(config: &AppConfig) {
    if let Err(e) = observability::init_tracing(&config.observability) {
        eprintln!("Failed to initialize tracing: {}", e);
        std::process::exit(1);
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    match args.command {
        Some(Command::Openapi { output }) => {
            #[cfg(feature = "utoipa")]
            run_openapi_export(output);
            #[cfg(not(feature = "utoipa"))]
            {
                let _ = output;
                eprintln!("Error: OpenAPI export requires the 'utoipa' feature to be enabled");
                std::process::exit(1);
            }
        }
        Some(Command::Migrate) => {
            run_migrate(args.config.as_deref()).await;
        }
        Some(Command::CreateAdmin { username, name }) => {
            run_create_admin(args.config.as_deref(), username, name).await;
        }
        Some(Command::Serve) | None => {
            run_server(args.config.as_deref()).await;
        }
    }
}

/// Export OpenAPI specification to file or stdout (JSON format)
#[cfg(feature = "utoipa")]
fn run_openapi_export(output: Option<String>) {
    let spec = sharegate::openapi::ApiDoc::build();
    let content = match serde_json::to_string_pretty(&spec) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: Failed to serialize OpenAPI spec: {}", e);
            std::process::exit(1);
        }
    };

    match output {
        Some(path) => {
            if let Err(e) = std::fs::write(&path, &content) {
                eprintln!("Error: Failed to write to {}: {}", path, e);
                std::process::exit(1);
            }
            eprintln!("OpenAPI spec written to {}", path);
        }
        None => {
            println!("{}", content);
        }
    }
}

async fn run_server(explicit_config_path: Option<&str>) {
    let (config, config_path) = load_config(explicit_config_path);
    init_tracing(&config);

    if let Err(e) = observability::metrics::init_metrics(&config.observability.metrics) {
        tracing::warn!(error = %e, "Failed to initialize metrics: {e}");
    }

    match &config_path {
        Some(path) => tracing::info!(config_file = %path.display(), "Starting sharegate"),
        None => tracing::info!("Starting sharegate with built-in configuration"),
    }

    if !config.auth.restrict_instance_usage {
        tracing::debug!("Instance aggregates are readable by every authenticated user");
    }

    let state = match AppState::new(config.clone()).await {
        Ok(state) => state,
        Err(e) => {
            tracing::error!(error = %e, "Failed to initialize application state");
            std::process::exit(1);
        }
    };

    let task_tracker = state.task_tracker.clone();
    let app = build_app(&config, state);

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(address = %bind_addr, error = %e, "Failed to bind to address");
            std::process::exit(1);
        }
    };

    tracing::info!("Server listening on http://{}", bind_addr);

    // Graceful shutdown: wait for SIGINT/SIGTERM, then wait for background writes
    let shutdown_timeout = Duration::from_secs(config.server.shutdown_timeout_secs);
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(task_tracker, shutdown_timeout))
        .await
    {
        tracing::error!(error = %e, "Server error");
        std::process::exit(1);
    }
}

async fn shutdown_signal(task_tracker: TaskTracker, timeout: Duration) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, waiting for background tasks to complete...");

    // Close the task tracker to prevent new tasks from being spawned
    task_tracker.close();

    match tokio::time::timeout(timeout, task_tracker.wait()).await {
        Ok(()) => tracing::info!("All background tasks completed"),
        Err(_) => {
            tracing::warn!("Timeout waiting for background tasks, some may not have completed")
        }
    }

    tracing::info!("Shutdown complete");
}

/// Connect to the configured database, exiting if there is none.
async fn connect(config: &AppConfig) -> DbPool {
    if config.database.is_none() {
        eprintln!("Error: Database is not configured.");
        std::process::exit(1);
    }

    match DbPool::from_config(&config.database).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!(error = %e, "Failed to connect to database");
            eprintln!("Error: Failed to connect to database: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run_migrate(explicit_config_path: Option<&str>) {
    let (config, _) = load_config(explicit_config_path);
    init_tracing(&config);

    tracing::info!("Running database migrations");

    let pool = connect(&config).await;
    match pool.run_migrations().await {
        Ok(()) => {
            tracing::info!("Database migrations completed successfully");
        }
        Err(e) => {
            tracing::error!(error = %e, "Database migrations failed");
            eprintln!("Error: Database migrations failed: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run_create_admin(explicit_config_path: Option<&str>, username: String, name: Option<String>) {
    let (config, _) = load_config(explicit_config_path);
    init_tracing(&config);

    let pool = connect(&config).await;
    if config.database.run_migrations()
        && let Err(e) = pool.run_migrations().await
    {
        eprintln!("Error: Database migrations failed: {}", e);
        std::process::exit(1);
    }

    let services =
        sharegate::services::Services::new(std::sync::Arc::new(pool), config.ingestion.clone());
    let name = name.unwrap_or_else(|| username.clone());

    match services.users.create_admin(&username, &name).await {
        Ok((user, created)) => {
            eprintln!("Created admin '{}' ({})", user.username, user.id);
            eprintln!("Access token (shown once):");
            println!("{}", created.token);
        }
        Err(e) => {
            eprintln!("Error: Failed to create admin: {}", e);
            std::process::exit(1);
        }
    }
}
