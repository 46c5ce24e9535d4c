mod config;
mod console;
mod realm;
mod scheduler;

use std::sync::Arc;

use config::ServerConfig;
use realm::Realm;
use scheduler::{Scheduler, Timings};
use tokio::io::AsyncBufReadExt;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    let config = match ServerConfig::load("server.toml") {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load server.toml: {e}");
            std::process::exit(1);
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!("GT-RS Server v{} starting", env!("CARGO_PKG_VERSION"));
    info!(
        "Storage: {:?} at {}",
        config.storage.backend, config.storage.path
    );
    info!(
        "Growth: +{} every {}ms",
        config.growth.progress_per_tick, config.growth.tick_interval_ms
    );
    info!("Session TTL: {}s", config.session_ttl().as_secs());

    let realm = match Realm::open(&config) {
        Ok(r) => Arc::new(r),
        Err(e) => {
            error!("Failed to open realm: {e}");
            std::process::exit(1);
        }
    };
    info!(
        "Loaded {} world(s), {} account(s), {} session(s)",
        realm.registry.world_count(),
        realm.accounts.len(),
        realm.sessions.len()
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);

    // Handle Ctrl+C
    let shutdown_tx_ctrlc = shutdown_tx.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutdown signal received");
        let _ = shutdown_tx_ctrlc.send(true);
    });

    let timings = Timings {
        tick_interval: config.tick_interval(),
        progress_per_tick: config.growth.progress_per_tick,
        lock_sweep_interval: config.lock_sweep_interval(),
        session_sweep_interval: config.session_sweep_interval(),
    };
    let scheduler = Scheduler::new(realm.clone(), timings, shutdown_rx.clone());
    scheduler.start_all();
    info!("Started {} growth task(s)", scheduler.running_growth_tasks());
    let maintenance = scheduler.spawn_maintenance();

    // Console REPL: read lines from stdin
    let (console_tx, mut console_rx) = tokio::sync::mpsc::channel::<String>(32);
    tokio::spawn(async move {
        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        let mut lines = stdin.lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim().to_string();
            if !line.is_empty() && console_tx.send(line).await.is_err() {
                break;
            }
        }
    });

    let mut shutdown_rx_console = shutdown_rx;
    loop {
        tokio::select! {
            Some(line) = console_rx.recv() => {
                let reply = console::execute(&realm, &line);
                for message in &reply.messages {
                    if reply.success {
                        info!("{message}");
                    } else {
                        warn!("{message}");
                    }
                }
                if let Some(world_id) = reply.created_world {
                    scheduler.ensure_growth(world_id);
                }
                if reply.should_stop {
                    let _ = shutdown_tx.send(true);
                }
            }
            _ = shutdown_rx_console.changed() => {
                if *shutdown_rx_console.borrow() {
                    break;
                }
            }
        }
    }

    info!("Stopping background tasks...");
    scheduler.join().await;
    let _ = maintenance.await;

    if let Err(e) = realm.store.flush() {
        error!("Failed to flush store: {e}");
    }
    info!("Server shut down.");
}
