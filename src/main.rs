// ABOUTME: nowplaying client binary
// ABOUTME: Plays one live session from a server, optionally polling playback status alongside

use clap::Parser;
use nowplaying::backend::HttpBackend;
use nowplaying::cli::ClientArgs;
use nowplaying::edit::{OperationLock, StatusPoller};
use nowplaying::protocol::WsConnector;
use nowplaying::session::{StreamCoordinator, StreamEvent};
use nowplaying::transport::{HttpStreamSink, UnavailablePeerFactory};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "nowplaying")]
#[command(author, version, about = "Live audio session client", long_about = None)]
struct Args {
    #[command(flatten)]
    client: ClientArgs,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();
    args.client.init_tracing();

    let config = args.client.build_config();
    args.client.log_startup_info(&config);

    let backend = Arc::new(HttpBackend::new(&config));
    let coordinator = Arc::new(StreamCoordinator::new(
        config.clone(),
        backend.clone(),
        Arc::new(WsConnector),
        Arc::new(UnavailablePeerFactory),
        Arc::new(HttpStreamSink::new()),
    ));

    // Status polling shares the operation lock with any local edits
    let lock = Arc::new(OperationLock::new());
    let watchdog = lock.spawn_watchdog(config.lock_watchdog_interval, config.lock_max_hold);
    let poll_task = if args.client.poll_status {
        let poller = Arc::new(StatusPoller::new(
            backend.clone(),
            Arc::clone(&lock),
            config.poll_interval,
        ));
        let mut status = poller.subscribe();
        let task = Arc::clone(&poller).spawn();
        tokio::spawn(async move {
            while status.changed().await.is_ok() {
                if let Some(status) = status.borrow_and_update().clone() {
                    tracing::info!(
                        "Now playing: {} ({:.0}s, {} listeners)",
                        status.title.as_deref().unwrap_or("unknown"),
                        status.position_secs,
                        status.listeners
                    );
                }
            }
        });
        Some(task)
    } else {
        None
    };

    // Spawn a task to periodically report transport counters
    let report_task = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(10));
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(session) = coordinator.session() else {
                    continue;
                };
                let stats = coordinator.stats();
                tracing::info!(
                    "Transport {}: {} bytes, {} packets, {} live tasks",
                    session.kind.as_str(),
                    stats.bytes_received,
                    stats.packets_received,
                    coordinator.live_tasks()
                );
            }
        })
    };

    let mut events = coordinator.subscribe();
    coordinator.start_session(args.client.format).await;
    tracing::info!("Press Ctrl+C to stop");

    let mut failed = false;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Stopping");
                break;
            }
            event = events.recv() => match event {
                Some(StreamEvent::Error(e)) => {
                    tracing::error!("Stream failed: {}", e);
                    failed = true;
                    break;
                }
                Some(StreamEvent::Ended) | None => {
                    tracing::info!("Stream ended");
                    break;
                }
                Some(event) => tracing::info!("Stream: {:?}", event),
            },
        }
    }

    coordinator.stop().await;
    report_task.abort();
    watchdog.abort();
    if let Some(task) = poll_task {
        task.abort();
    }

    if failed {
        return Err("stream failed".into());
    }
    Ok(())
}
