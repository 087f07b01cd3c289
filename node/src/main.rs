// Copyright (c) 2026 Hyvote Contributors. MIT License.
// See LICENSE for details.

//! # Votifier Node
//!
//! Entry point for the `votifier-node` binary. Parses CLI arguments,
//! initializes logging and metrics, loads the RSA key pair, opens the vote
//! store and serves the HTTP endpoints and the raw Votifier socket.
//!
//! Subcommands:
//!
//! - `run`     start the receiver
//! - `init`    generate and persist the key pair
//! - `pubkey`  print the public key PEM
//! - `version` print build version information

mod api;
mod cli;
mod events;
mod logging;
mod metrics;

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::signal;

use votifier_protocol::config::SHUTDOWN_GRACE_PERIOD;
use votifier_protocol::storage::CleanupScheduler;
use votifier_protocol::{
    open_store, Dispatcher, KeyStore, SocketServer, SocketServerConfig, VoteProcessor,
};

use cli::{Commands, VotifierCli};
use events::{EventPublisher, EVENT_CHANNEL_CAPACITY};
use logging::LogFormat;
use metrics::NodeMetrics;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = VotifierCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Init(args) => init_keys(args),
        Commands::Pubkey(args) => print_public_key(args),
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Start the receiver and block until Ctrl+C or SIGTERM.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(logging::default_directives(args.debug), args.log_format);

    if !args.http_enabled && !args.socket_enabled {
        bail!("both the HTTP endpoints and the socket are disabled; nothing to serve");
    }

    let key_dir = args.dirs.key_dir();
    tracing::info!(
        data_dir = %args.dirs.data_dir.display(),
        key_dir = %key_dir.display(),
        http_port = args.http_port,
        socket_port = args.socket_port,
        "starting votifier-node"
    );

    // --- Keys ---
    let mut keys = KeyStore::new();
    let generated = keys
        .load_or_generate(&key_dir)
        .with_context(|| format!("failed to load RSA key pair from {}", key_dir.display()))?;
    if generated {
        tracing::info!(key_dir = %key_dir.display(), "generated new RSA key pair");
    }

    // --- Tokens ---
    let tokens = args.token_table().context("invalid service token")?;
    if tokens.is_empty() && args.modern_enabled {
        tracing::warn!("no service tokens configured; V2 votes will be rejected");
    } else {
        tracing::info!(services = ?tokens.services(), "service tokens loaded");
    }

    let toggles = args.toggles();
    let processor = VoteProcessor::new(Arc::new(keys), Arc::new(tokens), toggles);

    // --- Vote store ---
    let storage = args.storage_config();
    let store = open_store(&storage)
        .with_context(|| format!("failed to open vote store at {}", storage.path.display()))?;

    // --- Metrics ---
    let node_metrics = Arc::new(NodeMetrics::new().context("failed to register metrics")?);

    // --- Dispatch ---
    let publisher = EventPublisher::new(EVENT_CHANNEL_CAPACITY);
    let event_logger = events::spawn_event_logger(publisher.subscribe());
    let dispatcher = Dispatcher::new(Arc::clone(&store)).with_listener(Arc::new(publisher));

    // --- Expiry sweep ---
    let sweep_metrics = Arc::clone(&node_metrics);
    let cleanup = CleanupScheduler::from_hours(
        Arc::clone(&store),
        storage.ttl_hours,
        storage.cleanup_interval_hours,
    )
    .on_sweep(Arc::new(move |removed| {
        sweep_metrics.cleanup_removed_total.inc_by(removed as u64);
    }))
    .spawn();

    // --- Socket server ---
    let socket = if args.socket_enabled {
        let config = SocketServerConfig {
            bind: SocketAddr::from((Ipv4Addr::UNSPECIFIED, args.socket_port)),
            debug: args.debug,
            ..SocketServerConfig::default()
        };
        let server = SocketServer::bind(config, processor.clone(), dispatcher.clone())
            .await
            .with_context(|| format!("failed to bind socket on port {}", args.socket_port))?
            .with_observer(node_metrics.clone());
        Some(server.spawn().context("failed to start socket server")?)
    } else {
        tracing::info!("socket server disabled");
        None
    };

    // --- HTTP server ---
    let http = if args.http_enabled {
        let router = api::create_router(api::AppState {
            processor,
            dispatcher,
            metrics: Arc::clone(&node_metrics),
            test_endpoint: args.enable_test_endpoint,
        });
        let http_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, args.http_port));
        let listener = tokio::net::TcpListener::bind(http_addr)
            .await
            .with_context(|| format!("failed to bind HTTP listener on {http_addr}"))?;
        let server = api::spawn_server(listener, router).context("failed to start HTTP server")?;
        tracing::info!(addr = %server.local_addr(), "HTTP server listening");
        if args.enable_test_endpoint {
            tracing::warn!("test vote endpoint is enabled");
        }
        Some(server)
    } else {
        tracing::info!("HTTP server disabled");
        None
    };

    shutdown_signal().await;
    tracing::info!("shutdown signal received, draining connections");

    // Both servers drain concurrently, each bounded by the grace period.
    let stop_socket = async {
        if let Some(socket) = socket {
            socket.stop().await;
        }
    };
    let stop_http = async {
        if let Some(http) = http {
            http.stop(SHUTDOWN_GRACE_PERIOD).await;
        }
    };
    tokio::join!(stop_socket, stop_http);
    cleanup.stop().await;
    event_logger.abort();

    if let Err(e) = store.close() {
        tracing::error!(error = %e, "failed to close vote store");
    }
    tracing::info!("votifier-node stopped");
    Ok(())
}

/// Generate and persist the key pair unless one exists.
fn init_keys(args: cli::InitArgs) -> Result<()> {
    logging::init_logging("votifier_node=info,votifier_protocol=info", LogFormat::Pretty);

    let key_dir = args.dirs.key_dir();
    if KeyStore::exists(&key_dir) && !args.force {
        println!("Key pair already exists in {}", key_dir.display());
        println!("Pass --force to replace it.");
        return Ok(());
    }

    let mut keys = KeyStore::new();
    keys.generate().context("failed to generate RSA key pair")?;
    keys.save(&key_dir)
        .with_context(|| format!("failed to save key pair to {}", key_dir.display()))?;

    println!("Key pair written to {}", key_dir.display());
    println!();
    print!("{}", keys.public_key_pem()?);
    Ok(())
}

/// Print the stored public key, for pasting into a voting site.
fn print_public_key(args: cli::KeyDirArgs) -> Result<()> {
    let key_dir = args.key_dir();
    let mut keys = KeyStore::new();
    keys.load(&key_dir).with_context(|| {
        format!(
            "no key pair in {}; run `votifier-node init` first",
            key_dir.display()
        )
    })?;
    print!("{}", keys.public_key_pem()?);
    Ok(())
}

fn print_version() {
    println!("votifier-node {}", env!("CARGO_PKG_VERSION"));
    println!("rustc         {}", rustc_version());
}

fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM, whichever comes first. If a handler
/// cannot be installed, that signal is never delivered.
///
/// On non-Unix platforms, only Ctrl+C is supported.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
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
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
