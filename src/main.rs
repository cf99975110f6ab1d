use anyhow::{Context, Result};
use clap::Parser;
use mpd_scrobbler::config::{Config, TitleSplit};
use mpd_scrobbler::delivery::{DeliveryPipeline, Dispatcher};
use mpd_scrobbler::player::mpd::MpdConnector;
use mpd_scrobbler::player::supervisor::Supervisor;
use mpd_scrobbler::player::{Connector, PlayerConnection};
use mpd_scrobbler::queue::QueueStore;
use mpd_scrobbler::scrobbler::{Scrobbler, Service};
use mpd_scrobbler::tracker::Tracker;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

/// Events buffered between the tracker and the dispatcher
const EVENT_BUFFER: usize = 64;

/// Scrobbles what MPD plays
#[derive(Parser, Debug)]
#[command(name = "mpd-scrobbler", version, about)]
struct Cli {
    /// Path to the config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to the retry queue database
    #[arg(long)]
    db: Option<PathBuf>,

    /// MPD host
    #[arg(long)]
    host: Option<String>,

    /// MPD port
    #[arg(long)]
    port: Option<u16>,

    /// MPD password
    #[arg(long)]
    password: Option<String>,

    /// Don't report track durations
    #[arg(long)]
    no_duration: bool,

    /// Seconds after which a track is scrobbled
    #[arg(long)]
    submit_time: Option<u64>,

    /// Percentage of a track after which it is scrobbled
    #[arg(long)]
    submit_percentage: Option<u64>,

    /// Minimum length in seconds of a scrobbled track
    #[arg(long)]
    submit_min_duration: Option<u64>,

    /// Extract the artist from "Artist - Title" titles
    #[arg(long, value_enum)]
    title_split: Option<TitleSplit>,

    /// Log debug output
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// Command line flags win over the config file
    fn apply(&self, config: &mut Config) {
        if let Some(db) = &self.db {
            config.database = Some(db.clone());
        }
        if let Some(host) = &self.host {
            config.player.host = host.clone();
        }
        if let Some(port) = self.port {
            config.player.port = port;
        }
        if let Some(password) = &self.password {
            config.player.password = password.clone();
        }
        if self.no_duration {
            config.send_duration = false;
        }
        if let Some(time) = self.submit_time {
            config.submit_time = time;
        }
        if let Some(percentage) = self.submit_percentage {
            config.submit_percentage = percentage;
        }
        if let Some(min_duration) = self.submit_min_duration {
            config.submit_min_duration = min_duration;
        }
        if let Some(title_split) = self.title_split {
            config.title_split = title_split;
        }
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let write_style = if atty::is(atty::Stream::Stderr) {
        env_logger::WriteStyle::Auto
    } else {
        env_logger::WriteStyle::Never
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .write_style(write_style)
        .init();
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => log::info!("Caught Ctrl+C, shutting down"),
        _ = terminate => log::info!("Caught SIGTERM, shutting down"),
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => Config::default_path()?,
    };
    let mut config = Config::load(&config_path)?;
    cli.apply(&mut config);
    config.validate()?;

    let db_path = config.database_path()?;
    let store = QueueStore::open(&db_path)
        .with_context(|| format!("Failed to open retry queue at {:?}", db_path))?;

    let connector = MpdConnector::new(config.player.address(), config.player.password());
    let connection = connector
        .connect()
        .await
        .with_context(|| format!("Failed to connect to MPD at {}", connector.address()))?;
    log::info!("Connected to MPD at {}", connector.address());
    let connection = Arc::new(Mutex::new(connection));

    let pipelines: Vec<_> = Service::from_config(&config)?
        .into_iter()
        .map(|service| {
            let queue = store.queue(service.name());
            DeliveryPipeline::new(service, queue)
        })
        .collect();
    log::info!("Scrobbling to {} service(s)", pipelines.len());
    let dispatcher = Dispatcher::spawn(pipelines, config.send_duration);

    let shutdown = CancellationToken::new();
    let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
    let tracker = Tracker::new(
        Arc::clone(&connection),
        config.submit_policy(),
        config.title_split,
        config.poll_interval(),
        events_tx,
    );
    let supervisor = Supervisor::new(connector, Arc::clone(&connection));

    let tracker = tokio::spawn(tracker.run(shutdown.clone()));
    let supervisor = tokio::spawn(supervisor.run(shutdown.clone()));
    let dispatcher = tokio::spawn(dispatcher.run(events_rx));

    shutdown_signal().await;
    shutdown.cancel();

    // The tracker hands over its last events, then the dispatcher lets every service finish
    let tasks = [
        ("tracker", tracker),
        ("supervisor", supervisor),
        ("dispatcher", dispatcher),
    ];
    for (name, task) in tasks {
        if let Err(e) = task.await {
            log::error!("The {} task failed: {}", name, e);
        }
    }

    if let Err(e) = connection.lock().await.close().await {
        log::debug!("Closing the MPD connection failed: {:#}", e);
    }
    store.close().context("Failed to close the retry queue")?;

    log::info!("Bye");
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli).await {
        log::error!("{:#}", e);
        std::process::exit(1);
    }
}
