//! Server lifecycle
//!
//! [`MetroServer::bind`] claims the listening socket up front so a busy port
//! fails at startup. [`MetroServer::run`] then drives the sampler, the event
//! push and the accept loop until the shutdown future resolves, and tears
//! them down in order: sampler, provider, listener, connections.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use metro_clock::TempoClockProvider;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::commands::CommandHandler;
use crate::config::MetroConfig;
use crate::connection::ConnectionManager;
use crate::hub::{BroadcastHub, push_on_events};
use crate::sampler::ClockSampler;

/// Server errors
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Result type alias
pub type ServerResult<T> = Result<T, ServerError>;

/// The Metrolink broadcast server
pub struct MetroServer {
    config: MetroConfig,
    listener: TcpListener,
    local_addr: SocketAddr,
    provider: Arc<dyn TempoClockProvider>,
    hub: Arc<BroadcastHub>,
    sampler: Arc<ClockSampler>,
    handler: Arc<CommandHandler>,
}

impl MetroServer {
    /// Bind the listener and wire the components around `provider`.
    pub async fn bind(
        config: MetroConfig,
        provider: Arc<dyn TempoClockProvider>,
    ) -> ServerResult<Self> {
        let listener = TcpListener::bind(config.listen_addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: config.listen_addr,
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let hub = Arc::new(BroadcastHub::new());
        let sampler = Arc::new(ClockSampler::new(
            Arc::clone(&provider),
            config.include_debug,
        ));
        let handler = Arc::new(CommandHandler::new(Arc::clone(&provider)));

        Ok(Self {
            config,
            listener,
            local_addr,
            provider,
            hub,
            sampler,
            handler,
        })
    }

    /// Address actually bound (resolves port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn hub(&self) -> Arc<BroadcastHub> {
        Arc::clone(&self.hub)
    }

    pub fn sampler(&self) -> Arc<ClockSampler> {
        Arc::clone(&self.sampler)
    }

    /// Serve until `shutdown` resolves, then stop everything in order.
    pub async fn run<F>(self, shutdown: F) -> ServerResult<()>
    where
        F: Future<Output = ()>,
    {
        let Self {
            config,
            listener,
            local_addr,
            provider,
            hub,
            sampler,
            handler,
        } = self;

        // Prime the hub so the first client gets a snapshot on connect.
        sampler.sample_and_broadcast(&hub);

        let (sampler_stop, _) = broadcast::channel::<()>(1);
        let (conn_stop, _) = broadcast::channel::<()>(1);

        let sampler_task = tokio::spawn(Arc::clone(&sampler).run(
            Arc::clone(&hub),
            config.tick_interval,
            config.status_log_interval,
            sampler_stop.subscribe(),
        ));
        let events_task = tokio::spawn(push_on_events(
            Arc::clone(&hub),
            Arc::clone(&sampler),
            provider.subscribe(),
            sampler_stop.subscribe(),
        ));

        let manager = Arc::new(ConnectionManager::new(
            Arc::clone(&hub),
            handler,
            config.connection.clone(),
            conn_stop.clone(),
        ));
        let accept_task = tokio::spawn(manager.run(listener, conn_stop.subscribe()));

        log::info!(
            "[Server] Listening on ws://{} ({} clock, quantum {}, {:?} ticks)",
            local_addr,
            provider.name(),
            provider.quantum(),
            config.tick_interval
        );

        shutdown.await;
        log::info!("[Server] Shutting down");

        let _ = sampler_stop.send(());
        sampler_task.await?;
        events_task.await?;

        provider.disable();

        let _ = conn_stop.send(());
        accept_task.await?;

        log::info!("[Server] Stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MetroConfigFile;
    use metro_clock::ManualClock;
    use metro_core::Quantum;

    fn local_config() -> MetroConfig {
        MetroConfigFile {
            listen_addr: "127.0.0.1:0".into(),
            ..Default::default()
        }
        .validate()
        .unwrap()
    }

    #[tokio::test]
    async fn test_bind_resolves_port() {
        let clock = Arc::new(ManualClock::new(Quantum::FOUR));
        let server = MetroServer::bind(local_config(), clock).await.unwrap();
        assert_ne!(server.local_addr().port(), 0);
    }

    #[tokio::test]
    async fn test_bind_conflict_is_error() {
        let clock = Arc::new(ManualClock::new(Quantum::FOUR));
        let first = MetroServer::bind(local_config(), clock.clone()).await.unwrap();

        let mut config = local_config();
        config.listen_addr = first.local_addr();
        let second = MetroServer::bind(config, clock).await;
        assert!(matches!(second, Err(ServerError::Bind { .. })));
    }

    #[tokio::test]
    async fn test_run_primes_hub_and_stops() {
        let clock = Arc::new(ManualClock::new(Quantum::FOUR));
        clock.set_raw_beat(8.0);
        let server = MetroServer::bind(local_config(), clock).await.unwrap();
        let hub = server.hub();

        server.run(async {}).await.unwrap();

        let latest = hub.latest().unwrap();
        assert!(latest.as_str().contains(r#""position":"3.1""#));
        assert!(latest.as_str().contains(r#""is_downbeat":true"#));
    }
}
