use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use courier_core::{
    ClusterIdGenerator, IdError, IdGenerator, InMemoryCounterStore, RandomIdGenerator,
};
use courier_node::persistence::{load_snapshot_or_default, save_snapshot_to_path};
use courier_node::{
    AckCorrelator, CachingEndpointAddressRepository, ChannelPublisher, InMemoryLedger,
    LayeredEndpointAddressRepository, ReliableReceiver, ReliableSender,
    StaticEndpointAddressRepository, TransportReplyDispatcher,
};
use courier_transport::HttpTransport;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::flag;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

mod config;
mod http_server;
mod logger;

use crate::config::GatewayConfig;
use crate::http_server::{DeliveryHistory, GatewayState};
use crate::logger::{AdminLoggerLayer, LogBuffer};

const LOG_BUFFER_ENTRIES: usize = 1_000;
const SHUTDOWN_POLL: Duration = Duration::from_millis(200);
const ID_COUNTER_KEY: &str = "courier.message-id";

#[derive(Debug, Default)]
pub struct MetricsState {
    pub inbound_total: AtomicU64,
    pub inbound_faults: AtomicU64,
    pub inbound_malformed: AtomicU64,
    pub replies_correlated: AtomicU64,
    pub replies_uncorrelated: AtomicU64,
    pub acks_sent: AtomicU64,
    pub failures_notified: AtomicU64,
    pub published: AtomicU64,
    pub sends_ok: AtomicU64,
    pub sends_failed: AtomicU64,
}

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(long, short)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gateway (default)
    Run,
    /// Print sequence identifiers from a fresh block allocator
    Ids {
        #[arg(long, default_value_t = 10)]
        count: usize,
        /// Start the counter above this value
        #[arg(long)]
        seed: Option<i64>,
    },
}

#[tokio::main]
async fn main() {
    let log_buffer = Arc::new(LogBuffer::new(LOG_BUFFER_ENTRIES));
    let filter = EnvFilter::try_from_env("COURIER_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(AdminLoggerLayer {
            buffer: Arc::clone(&log_buffer),
        })
        .init();

    let cli = Cli::parse();

    let config = match GatewayConfig::new(cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!("failed to load config: {err}");
            std::process::exit(1);
        }
    };

    match cli.command {
        Some(Commands::Ids { count, seed }) => match sequence_ids(count, seed).await {
            Ok(ids) => ids.iter().for_each(|id| println!("{id}")),
            Err(err) => {
                error!("id generation failed: {err}");
                std::process::exit(1);
            }
        },
        Some(Commands::Run) | None => run(config, log_buffer).await,
    }
}

async fn sequence_ids(count: usize, seed: Option<i64>) -> Result<Vec<String>, IdError> {
    let generator = ClusterIdGenerator::new(Arc::new(InMemoryCounterStore::new()), ID_COUNTER_KEY);
    if let Some(seed) = seed {
        generator.init(seed).await?;
    }
    let mut ids = Vec::with_capacity(count);
    for _ in 0..count {
        ids.push(generator.generate_id().await?);
    }
    Ok(ids)
}

async fn run(config: GatewayConfig, log_buffer: Arc<LogBuffer>) {
    let delivery = config.delivery();

    let shutdown = Arc::new(AtomicBool::new(false));
    let _ = flag::register(SIGTERM, Arc::clone(&shutdown));
    let _ = flag::register(SIGINT, Arc::clone(&shutdown));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let transport = match HttpTransport::new(config.http_timeout) {
        Ok(transport) => Arc::new(transport),
        Err(err) => {
            error!("transport setup failed: {err}");
            std::process::exit(1);
        }
    };

    let snapshot = match load_snapshot_or_default(&config.ledger_path) {
        Ok(snapshot) => snapshot,
        Err(err) => {
            warn!(
                "ledger snapshot unreadable at {}: {err}; starting empty",
                config.ledger_path.display()
            );
            Default::default()
        }
    };
    let ledger = Arc::new(InMemoryLedger::from_snapshot(
        delivery.ledger_retention,
        &snapshot,
    ));
    info!(
        delivered = ledger.delivered_count(),
        path = %config.ledger_path.display(),
        "delivery ledger restored"
    );

    let correlator = AckCorrelator::new();
    let sender = Arc::new(ReliableSender::new(
        transport.clone(),
        correlator.clone(),
        delivery.retry_policy(),
        shutdown_rx.clone(),
    ));

    let metrics = Arc::new(MetricsState::default());
    let deliveries = Arc::new(DeliveryHistory::new(config.delivery_history));
    let (publisher, mut published) = ChannelPublisher::new(delivery.publish_buffer);
    {
        let metrics = Arc::clone(&metrics);
        let deliveries = Arc::clone(&deliveries);
        tokio::spawn(async move {
            while let Some(payload) = published.recv().await {
                metrics.published.fetch_add(1, Ordering::Relaxed);
                info!(
                    message_id = %payload.message_id,
                    from = %payload.from_party,
                    parts = payload.parts.len(),
                    "payload delivered to application"
                );
                deliveries.record(&payload);
            }
        });
    }

    let receiver = Arc::new(ReliableReceiver::new(
        ledger.clone(),
        Arc::new(publisher),
        Arc::new(TransportReplyDispatcher::new(
            sender.clone(),
            config.reply_routes(),
        )),
        correlator,
    ));

    let static_addresses = StaticEndpointAddressRepository::new(config.addresses.clone());
    info!(count = static_addresses.len(), "static endpoint addresses loaded");
    let layered = LayeredEndpointAddressRepository::new(vec![Arc::new(static_addresses)]);
    let addresses = Arc::new(CachingEndpointAddressRepository::new(
        Arc::new(layered),
        delivery.address_cache_capacity,
        delivery.cache_address_misses,
    ));

    let state = GatewayState {
        metrics: Arc::clone(&metrics),
        receiver,
        sender,
        transport,
        ledger: ledger.clone(),
        addresses,
        ids: Arc::new(RandomIdGenerator),
        party_id: config.party_id.clone(),
        deliveries,
        log_buffer,
    };
    let router = http_server::build_router(state);
    let bind_addr: SocketAddr = match format!("{}:{}", config.bind, config.port).parse() {
        Ok(addr) => addr,
        Err(err) => {
            error!("invalid bind address {}:{}: {err}", config.bind, config.port);
            std::process::exit(1);
        }
    };
    let listener = match tokio::net::TcpListener::bind(bind_addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!("http server bind failed on {bind_addr}: {err}");
            std::process::exit(1);
        }
    };
    info!(%bind_addr, party = %config.party_id, "courier gateway listening");
    let mut server_shutdown = shutdown_rx.clone();
    let server = tokio::spawn(async move {
        let stop = async move {
            let _ = server_shutdown.wait_for(|stop| *stop).await;
        };
        if let Err(err) = axum::serve(listener, router)
            .with_graceful_shutdown(stop)
            .await
        {
            error!("http server error: {err}");
        }
    });

    let mut last_snapshot = Instant::now();
    loop {
        if shutdown.load(Ordering::Relaxed) {
            info!("shutdown requested");
            let _ = shutdown_tx.send(true);
            if let Err(err) = save_snapshot_to_path(&config.ledger_path, &ledger.snapshot()) {
                error!("snapshot failed on shutdown: {err}");
            }
            break;
        }

        if last_snapshot.elapsed() >= config.snapshot_interval {
            if let Err(err) = save_snapshot_to_path(&config.ledger_path, &ledger.snapshot()) {
                error!("snapshot failed: {err}");
            }
            last_snapshot = Instant::now();
        }

        tokio::time::sleep(SHUTDOWN_POLL).await;
    }

    if let Err(err) = server.await {
        error!("http server task failed: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::{sequence_ids, Cli, Commands};

    #[test]
    fn test_cli_parsing() {
        use clap::Parser;

        let cli = Cli::try_parse_from(["courier-gateway"]).unwrap();
        assert!(cli.command.is_none());
        assert!(cli.config.is_none());

        let cli = Cli::try_parse_from(["courier-gateway", "--config", "gw.toml", "run"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Run)));
        assert_eq!(cli.config, Some(std::path::PathBuf::from("gw.toml")));

        let cli = Cli::try_parse_from(["courier-gateway", "ids", "--count", "3", "--seed", "42"])
            .unwrap();
        match cli.command {
            Some(Commands::Ids { count, seed }) => {
                assert_eq!(count, 3);
                assert_eq!(seed, Some(42));
            }
            _ => panic!("expected Ids command"),
        }

        let cli = Cli::try_parse_from(["courier-gateway", "ids"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Ids {
                count: 10,
                seed: None
            })
        ));
    }

    #[tokio::test]
    async fn sequence_ids_honor_the_seed() {
        let unseeded = sequence_ids(3, None).await.unwrap();
        assert_eq!(unseeded, ["00000001", "00000002", "00000003"]);

        let seeded = sequence_ids(2, Some(25_000)).await.unwrap();
        assert_eq!(seeded, ["00030001", "00030002"]);

        assert!(sequence_ids(1, Some(0)).await.is_err());
    }
}
