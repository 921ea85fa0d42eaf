use clap::{Parser, Subcommand};
use settler::adapters::{LedgerApi, LedgerClient, PostgresStore, RegulatorClient};
use settler::config::{AppConfig, LoggingConfig};
use settler::error::Result;
use settler::services::{RecordingFailureHandler, TransferMonitor, WebhookDispatcher};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "settler", version, about = "Transfer settlement reconciliation and regulator notification daemon")]
struct Cli {
    /// Configuration directory
    #[arg(long, default_value = "config")]
    config_dir: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run both passes on their configured intervals (default)
    Run,
    /// Run a single reconciliation pass and exit
    MonitorOnce,
    /// Run a single dispatch pass and exit
    DispatchOnce,
    /// Apply database migrations and exit
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load_from(&cli.config_dir)?;
    if let Err(errors) = config.validate() {
        for e in &errors {
            eprintln!("config error: {}", e);
        }
        std::process::exit(1);
    }

    init_logging(&config.logging);

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_daemon(&config).await,
        Commands::MonitorOnce => {
            let app = App::build(&config).await?;
            app.monitor.run_pass().await;
            Ok(())
        }
        Commands::DispatchOnce => {
            let app = App::build(&config).await?;
            app.dispatcher.process_pass().await;
            Ok(())
        }
        Commands::Migrate => {
            let store =
                PostgresStore::new(&config.database.url, config.database.max_connections).await?;
            store.migrate().await
        }
    }
}

struct App {
    monitor: Arc<TransferMonitor>,
    dispatcher: Arc<WebhookDispatcher>,
}

impl App {
    async fn build(config: &AppConfig) -> Result<Self> {
        let store = Arc::new(
            PostgresStore::new(&config.database.url, config.database.max_connections).await?,
        );
        store.migrate().await?;

        let ledger = Arc::new(LedgerClient::new(&config.ledger)?);
        if let Err(e) = ledger.health_check().await {
            error!("ledger provider health check failed: {}", e);
        }

        let sink = Arc::new(RegulatorClient::new(&config.regulator)?);
        if !sink.is_configured() {
            info!("no regulator webhook URL configured, deliveries will be no-op successes");
        }

        let dispatcher = Arc::new(WebhookDispatcher::new(
            store.clone(),
            sink,
            config.dispatcher.clone(),
            &config.regulator,
        ));

        let failure_handler = Arc::new(RecordingFailureHandler::new(
            store.clone(),
            dispatcher.clone(),
        ));

        let monitor = Arc::new(TransferMonitor::new(
            store,
            ledger,
            failure_handler,
            dispatcher.clone(),
            config.monitor.clone(),
        ));

        Ok(Self {
            monitor,
            dispatcher,
        })
    }
}

async fn run_daemon(config: &AppConfig) -> Result<()> {
    let app = App::build(config).await?;

    // Correctness requires at most one in-flight pass per kind at a time.
    // Within this process the interval loops guarantee that; across
    // processes it is a deployment invariant (run a single instance).
    app.monitor.clone().start();
    app.dispatcher.clone().start();

    info!("settler running, press Ctrl-C to stop");
    signal::ctrl_c().await?;

    info!("shutdown signal received");
    app.monitor.stop();
    app.dispatcher.stop();

    Ok(())
}

fn init_logging(config: &LoggingConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::Layer;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},sqlx=warn", config.level)));

    // Optional daily-rotating file output.
    //
    // `tracing_appender::rolling::daily` panics (and with panic=abort in
    // release, aborts) if it can't create the initial log file, so
    // writability is preflighted before handing it the directory.
    let file_layer = config.dir.as_deref().and_then(|log_dir| {
        if std::fs::create_dir_all(log_dir).is_err() {
            eprintln!("Warning: could not create log directory {}, file logging disabled", log_dir);
            return None;
        }
        let test_path = std::path::Path::new(log_dir).join(".settler_write_test");
        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&test_path)
        {
            Ok(_) => {
                let _ = std::fs::remove_file(&test_path);

                let file_appender = tracing_appender::rolling::daily(log_dir, "settler.log");
                let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

                // Keep the guard alive for the lifetime of the process
                Box::leak(Box::new(guard));

                Some(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_target(true),
                )
            }
            Err(e) => {
                eprintln!(
                    "Warning: could not write to log directory {} ({}), file logging disabled",
                    log_dir, e
                );
                None
            }
        }
    });

    if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().boxed())
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().boxed())
            .with(file_layer)
            .init();
    }
}
