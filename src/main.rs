//! Cachembed -- caching reverse proxy for OpenAI-compatible embedding APIs.
//!
//! This is the application entry point. It wires together all modules:
//!   - Command and flag parsing
//!   - Configuration loading
//!   - Store opening (SQLite or PostgreSQL, by DSN)
//!   - Schema migration
//!   - The HTTP proxy with graceful shutdown
//!   - The one-shot GC run

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::signal;
use tracing_subscriber::EnvFilter;

use cachembed::AppState;
use cachembed::api;
use cachembed::config::Config;
use cachembed::gc::{self, GcOptions};
use cachembed::store::{self, CacheStore, Dialect};
use cachembed::upstream::UpstreamClient;

// ---------------------------------------------------------------------------
// CLI argument parsing (minimal, no clap dependency)
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum Command {
    Serve { migrate: bool },
    Migrate,
    Gc(GcOptions),
    Version,
    Help,
}

#[derive(Debug)]
struct CliArgs {
    command: Command,
    config_path: PathBuf,
}

fn parse_args(args: &[String]) -> Result<CliArgs, String> {
    let mut command_name: Option<String> = None;
    let mut config_path = PathBuf::from("cachembed.toml");

    // GC flags, collected regardless of command and validated afterwards.
    let mut before: Option<Duration> = None;
    let mut start_id: Option<i64> = None;
    let mut end_id: Option<i64> = None;
    let mut batch: Option<i64> = None;
    let mut sleep: Option<u64> = None;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let path = iter.next().ok_or("--config requires a path argument")?;
                config_path = PathBuf::from(path);
            }
            "--before" => {
                let value = iter.next().ok_or("--before requires a duration argument")?;
                before = Some(gc::parse_duration(value)?);
            }
            "--start-id" => {
                let value = iter.next().ok_or("--start-id requires an integer argument")?;
                start_id = Some(parse_int("--start-id", value)?);
            }
            "--end-id" => {
                let value = iter.next().ok_or("--end-id requires an integer argument")?;
                end_id = Some(parse_int("--end-id", value)?);
            }
            "--batch" => {
                let value = iter.next().ok_or("--batch requires an integer argument")?;
                let parsed = parse_int("--batch", value)?;
                if parsed <= 0 {
                    return Err(format!("--batch must be positive, got {parsed}"));
                }
                batch = Some(parsed);
            }
            "--sleep" => {
                let value = iter.next().ok_or("--sleep requires a seconds argument")?;
                sleep = Some(
                    value
                        .parse()
                        .map_err(|_| format!("--sleep expects whole seconds, got {value:?}"))?,
                );
            }
            "--help" | "-h" => {
                return Ok(CliArgs {
                    command: Command::Help,
                    config_path,
                });
            }
            "--version" | "-V" => {
                return Ok(CliArgs {
                    command: Command::Version,
                    config_path,
                });
            }
            other if other.starts_with('-') => {
                return Err(format!("unknown flag: {other}"));
            }
            other => {
                if command_name.is_some() {
                    return Err(format!("unexpected argument: {other}"));
                }
                command_name = Some(other.to_string());
            }
        }
    }

    let command = match command_name.as_deref() {
        Some("serve") => Command::Serve { migrate: false },
        Some("migrate-and-serve") => Command::Serve { migrate: true },
        Some("migrate") => Command::Migrate,
        Some("version") => Command::Version,
        Some("gc") => {
            let mut opts =
                GcOptions::new(before.ok_or("gc requires --before <duration> (e.g. --before 30d)")?);
            if let Some(id) = start_id {
                opts.start_id = id;
            }
            opts.end_id = end_id;
            if let Some(b) = batch {
                opts.batch_size = b;
            }
            if let Some(s) = sleep {
                opts.sleep = Duration::from_secs(s);
            }
            Command::Gc(opts)
        }
        Some(other) => return Err(format!("unknown command: {other}")),
        None => return Err("missing command".to_string()),
    };

    // GC flags are meaningless elsewhere; reject rather than ignore.
    if !matches!(command, Command::Gc(_))
        && (before.is_some()
            || start_id.is_some()
            || end_id.is_some()
            || batch.is_some()
            || sleep.is_some())
    {
        return Err("--before/--start-id/--end-id/--batch/--sleep apply to gc only".to_string());
    }

    Ok(CliArgs {
        command,
        config_path,
    })
}

fn parse_int(flag: &str, value: &str) -> Result<i64, String> {
    value
        .parse()
        .map_err(|_| format!("{flag} expects an integer, got {value:?}"))
}

fn print_usage() {
    println!(
        "\
cachembed {version} -- caching reverse proxy for embedding APIs

USAGE:
    cachembed <COMMAND> [OPTIONS]

COMMANDS:
    serve               Run the proxy server
    migrate             Create the schema if absent, then exit
    migrate-and-serve   Run migrations, then the proxy server
    gc                  Delete stale cache entries, then exit
    version             Print version information

OPTIONS:
    -c, --config <PATH>    Path to configuration file [default: cachembed.toml]
    -h, --help             Print this help message
    -V, --version          Print version information

GC OPTIONS:
    --before <DURATION>    Delete entries last accessed longer ago than this
                           (Nh, Nm, Ns, or Nd). Required.
    --start-id <ID>        First row id to consider [default: 1]
    --end-id <ID>          Row id bound, exclusive [default: max id + 1]
    --batch <N>            Id-range covered per delete batch [default: 1000]
    --sleep <SECONDS>      Pause between batches [default: 0]

ENVIRONMENT:
    RUST_LOG               Override log level (e.g. RUST_LOG=debug)
    CACHEMBED_CONFIG       Alternative to --config flag
    CACHEMBED_*            Override individual settings (HOST, PORT,
                           UPSTREAM_URL, ALLOWED_MODELS, API_KEY_PATTERN,
                           DSN, LOG_LEVEL, LOG_JSON)
",
        version = env!("CARGO_PKG_VERSION")
    );
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Parse CLI arguments
    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = match parse_args(&args) {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("Error: {e}");
            eprintln!("Run with --help for usage information.");
            std::process::exit(2);
        }
    };

    match cli.command {
        Command::Help => {
            print_usage();
            return Ok(());
        }
        Command::Version => {
            println!("cachembed {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        _ => {}
    }

    // Allow CACHEMBED_CONFIG env var as alternative to --config flag
    let config_path = std::env::var("CACHEMBED_CONFIG")
        .map(PathBuf::from)
        .unwrap_or(cli.config_path);

    // 2. Load configuration
    let config = Config::load(&config_path)?;

    // 3. Initialize tracing/logging
    init_tracing(&config);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        "Starting cachembed"
    );

    // 4. Open the store
    let dialect = Dialect::of(&config.database.dsn);
    let store = store::open(&config.database.dsn).await?;
    tracing::info!(dialect = dialect.as_str(), "Store opened");

    // 5. Run the selected command
    match cli.command {
        Command::Migrate => {
            store.migrate().await?;
            tracing::info!("Migration complete");
        }
        Command::Gc(opts) => {
            let deleted = gc::run(store.as_ref(), &opts).await?;
            tracing::info!(deleted, "GC complete");
        }
        Command::Serve { migrate } => {
            if migrate {
                store.migrate().await?;
                tracing::info!("Migration complete");
            }
            serve(config, store).await?;
        }
        Command::Version | Command::Help => unreachable!(),
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Server assembly
// ---------------------------------------------------------------------------

async fn serve(config: Config, store: Arc<dyn CacheStore>) -> anyhow::Result<()> {
    let key_pattern = config.key_pattern()?;
    let upstream = Arc::new(UpstreamClient::new(config.upstream.url.clone()));
    tracing::info!(
        upstream = %upstream.url(),
        models = ?config.upstream.allowed_models,
        "Upstream configured"
    );

    let listen_addr = config.listen_addr();
    let state = AppState {
        config: Arc::new(config),
        store,
        upstream,
        key_pattern,
    };
    let app = api::build_router(state);

    let listener = TcpListener::bind(&listen_addr).await?;
    tracing::info!(addr = %listen_addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down gracefully");
    Ok(())
}

// ---------------------------------------------------------------------------
// Tracing initialization
// ---------------------------------------------------------------------------

/// Set up the tracing subscriber based on configuration.
fn init_tracing(config: &Config) {
    // RUST_LOG env var takes precedence over config file
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &config.logging.level;
        EnvFilter::new(format!("cachembed={level},tower_http={level},warn"))
    });

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false);

    if config.logging.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

// ---------------------------------------------------------------------------
// Graceful shutdown
// ---------------------------------------------------------------------------

/// Wait for a shutdown signal (SIGTERM or SIGINT / Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl+C)");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
