//! Process lifecycle: startup ordering and the drain sequence.
//!
//! `start` checks the bus, starts the relay, then binds the listener. The
//! returned [`RunningServer`] owns every long-lived resource and tears them
//! down in a fixed order on [`RunningServer::shutdown`].

use crate::bus::MessageBus;
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::routes;
use crate::state::AppState;
use crate::websocket::relay::{self, RelayHandle};
use crate::websocket::ConnectionRegistry;
use actix_cors::Cors;
use actix_web::dev::ServerHandle;
use actix_web::{web, App, HttpServer};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Starting,
    Running,
    Draining,
    Stopped,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LifecycleState::Starting => "starting",
            LifecycleState::Running => "running",
            LifecycleState::Draining => "draining",
            LifecycleState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

pub struct RunningServer {
    config: Arc<Config>,
    registry: ConnectionRegistry,
    bus: Arc<dyn MessageBus>,
    relay: RelayHandle,
    server_handle: ServerHandle,
    server_task: Option<JoinHandle<std::io::Result<()>>>,
    addrs: Vec<SocketAddr>,
    state: watch::Sender<LifecycleState>,
}

fn transition(state: &watch::Sender<LifecycleState>, next: LifecycleState) {
    let previous = state.send_replace(next);
    info!(from = %previous, to = %next, "lifecycle transition");
}

/// Bring the service up. Any failure aborts startup and releases what was
/// already started.
pub async fn start(config: Config, bus: Arc<dyn MessageBus>) -> AppResult<RunningServer> {
    let (state, _) = watch::channel(LifecycleState::Starting);
    info!(state = %LifecycleState::Starting, "lifecycle transition");

    let config = Arc::new(config);
    let registry = ConnectionRegistry::new();

    bus.ping().await.map_err(|e| {
        error!(error = %e, "message bus unreachable");
        AppError::BusUnavailable(e.to_string())
    })?;

    let relay = relay::start(bus.clone(), registry.clone(), &config.chat_channel).await?;

    let app_state = AppState {
        registry: registry.clone(),
        bus: bus.clone(),
        config: config.clone(),
    };

    let bound = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(TracingLogger::default())
            .wrap(Cors::permissive())
            .configure(routes::configure)
    })
    .workers(config.http_workers)
    .shutdown_timeout(config.shutdown_timeout_secs)
    .disable_signals()
    .bind(config.bind_addr());

    let bound = match bound {
        Ok(bound) => bound,
        Err(e) => {
            error!(addr = %config.bind_addr(), error = %e, "failed to bind listener");
            if let Err(e) = bus.unsubscribe(&config.chat_channel).await {
                warn!(error = %e, "failed to cancel relay subscription");
            }
            relay.wait(config.shutdown_timeout()).await;
            return Err(AppError::StartServer(e.to_string()));
        }
    };

    let addrs = bound.addrs();
    let server = bound.run();
    let server_handle = server.handle();
    let server_task = actix_rt::spawn(server);

    info!(addrs = ?addrs, topic = %config.chat_channel, "chat relay listening");
    transition(&state, LifecycleState::Running);

    Ok(RunningServer {
        config,
        registry,
        bus,
        relay,
        server_handle,
        server_task: Some(server_task),
        addrs,
        state,
    })
}

impl RunningServer {
    pub fn addrs(&self) -> &[SocketAddr] {
        &self.addrs
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Watch the lifecycle state. The receiver keeps working after the
    /// server is consumed by `shutdown`.
    pub fn state(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Serve until SIGINT/SIGTERM, then drain.
    ///
    /// If the listener exits on its own the service drains anyway and the
    /// error is returned.
    pub async fn run_until_signal(mut self) -> AppResult<()> {
        let server_exit = match self.server_task.as_mut() {
            Some(task) => tokio::select! {
                _ = shutdown_signal() => None,
                result = task => Some(result),
            },
            None => None,
        };

        let outcome = match server_exit {
            None => {
                info!("shutdown signal received");
                Ok(())
            }
            Some(result) => {
                self.server_task = None;
                let reason = match result {
                    Ok(Ok(())) => "listener stopped unexpectedly".to_string(),
                    Ok(Err(e)) => e.to_string(),
                    Err(e) => e.to_string(),
                };
                error!(error = %reason, "http server exited");
                Err(AppError::StartServer(reason))
            }
        };

        self.shutdown().await;
        outcome
    }

    /// Drain and stop. Every step runs even when an earlier one fails.
    pub async fn shutdown(self) -> LifecycleState {
        let RunningServer {
            config,
            registry,
            bus,
            relay,
            server_handle,
            server_task,
            addrs: _,
            state,
        } = self;

        transition(&state, LifecycleState::Draining);
        let deadline = Instant::now() + config.shutdown_timeout();
        let remaining = || deadline.saturating_duration_since(Instant::now());

        // a. stop accepting
        server_handle.pause().await;
        info!("listener paused");

        // b. close every live connection
        let closed = registry.close_all();
        info!(closed, "closed all connections");

        // c. stop the relay
        if let Err(e) = bus.unsubscribe(relay.topic()).await {
            warn!(topic = %relay.topic(), error = %e, "failed to unsubscribe from chat channel");
        }
        match relay.wait(remaining()).await {
            Some(stats) => info!(
                received = stats.received,
                malformed = stats.malformed,
                delivered = stats.delivered,
                failed = stats.failed,
                "broadcast relay drained"
            ),
            None => warn!("broadcast relay did not drain cleanly"),
        }

        // d. stop the listener
        if tokio::time::timeout(remaining(), server_handle.stop(true))
            .await
            .is_err()
        {
            warn!("graceful stop exceeded deadline, forcing");
            server_handle.stop(false).await;
        }
        if let Some(task) = server_task {
            match tokio::time::timeout(remaining().max(Duration::from_secs(1)), task).await {
                Ok(Ok(Ok(()))) => info!("http server stopped"),
                Ok(Ok(Err(e))) => warn!(error = %e, "http server stopped with error"),
                Ok(Err(e)) => warn!(error = %e, "http server task failed"),
                Err(_) => warn!("http server task did not finish"),
            }
        }

        // e. release the bus
        drop(bus);
        info!("bus resources released");

        transition(&state, LifecycleState::Stopped);
        LifecycleState::Stopped
    }
}

/// Resolves on Ctrl+C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = terminate.recv() => {},
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!(error = %e, "failed to listen for Ctrl+C");
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
        }
    }
}
