//! Worker server: dispatcher, worker pool, health and liveness
//!
//! The dispatcher pulls deliveries from a [`Broker`], answers health checks
//! inline and pushes removal jobs into the [`WorkerPool`]. It stops on a
//! shutdown signal, when the broker closes, or when the pool terminates,
//! and always drains the pool before returning.

pub mod broker;
pub mod marker;
pub mod pool;
pub mod protocol;
pub mod state;

pub use broker::{Broker, BrokerClient, ChannelBroker, Delivery, Replier, TcpBroker, TcpClient};
pub use marker::{MarkerDir, ProcessingMarker};
pub use pool::WorkerPool;
pub use protocol::{Command, RequestFrame, ResponseFrame};
pub use state::{HealthState, JobOutcome, WorkerPoolState};

use crate::config::ServerConfig;
use crate::error::{BgRemovalError, Result};
use crate::extractor::ExtractorFactory;
use crate::processor::RemovalResponse;
use std::future::Future;
use std::sync::Arc;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

/// Why [`Server::serve`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGINT, SIGTERM or the caller's shutdown future
    Signal,
    /// The broker has no more deliveries
    BrokerClosed,
    /// The pool terminated: breaker tripped or a worker failed to start
    Unhealthy,
}

impl ShutdownReason {
    /// Process exit status: non-zero only when the pool is unhealthy
    #[must_use]
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Signal | Self::BrokerClosed => 0,
            Self::Unhealthy => 1,
        }
    }
}

/// Dispatcher in front of a [`WorkerPool`]
#[derive(Debug)]
pub struct Server {
    pool: WorkerPool,
}

impl Server {
    /// Spawn the pool; must be called within a Tokio runtime
    pub fn start(config: &ServerConfig, factory: Arc<dyn ExtractorFactory>) -> Result<Self> {
        Ok(Self {
            pool: WorkerPool::spawn(config, factory)?,
        })
    }

    #[must_use]
    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Dispatch deliveries until `shutdown` resolves, the broker closes or the pool terminates
    ///
    /// In-flight and queued jobs are finished and answered before this returns,
    /// and the broker has flushed their responses.
    pub async fn serve<B, F>(self, mut broker: B, shutdown: F) -> Result<ShutdownReason>
    where
        B: Broker,
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);
        let mut health = self.pool.subscribe();
        let replies = TaskTracker::new();

        let reason = loop {
            tokio::select! {
                () = &mut shutdown => break ShutdownReason::Signal,
                () = async {
                    let _ = health.wait_for(|state| *state == HealthState::Terminated).await;
                } => {
                    break ShutdownReason::Unhealthy;
                },
                delivery = broker.recv() => match delivery {
                    Some(delivery) => self.dispatch(delivery, &replies).await,
                    None => break ShutdownReason::BrokerClosed,
                },
            }
        };

        log::info!("🛑 Shutting down ({reason:?}), draining in-flight jobs");
        let state = self.pool.shutdown().await;
        replies.close();
        replies.wait().await;
        broker.close().await;
        let state = state?;
        if reason == ShutdownReason::Unhealthy {
            log::error!(
                "❌ Exiting unhealthy after {} consecutive failures",
                state.consecutive_failures()
            );
        }
        Ok(reason)
    }

    async fn dispatch(&self, delivery: Delivery, replies: &TaskTracker) {
        let (frame, replier) = delivery.into_parts();
        let api = self.pool.api();
        match frame.command {
            Command::Health => replier.respond(self.pool.health_response()),
            Command::Removebg => {
                let (correlation_id, request) = match frame.into_request() {
                    Ok(parts) => parts,
                    Err(e) => return replier.respond(RemovalResponse::from_error(&e, api)),
                };
                let span = tracing::info_span!("dispatch", correlation_id = %correlation_id);
                match self.pool.submit(correlation_id, request).instrument(span.clone()).await {
                    Ok(pending) => {
                        replies.spawn(
                            async move {
                                let response = pending.await.unwrap_or_else(|_| {
                                    RemovalResponse::from_error(
                                        &BgRemovalError::internal("worker dropped the job"),
                                        api,
                                    )
                                });
                                replier.respond(response);
                            }
                            .instrument(span),
                        );
                    },
                    Err(e) => replier.respond(RemovalResponse::from_error(&e, api)),
                }
            },
        }
    }
}

/// Resolves on Ctrl-C, or SIGTERM on Unix
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::warn!("⚠️ Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            },
            Err(e) => {
                log::warn!("⚠️ Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(ShutdownReason::Signal.exit_code(), 0);
        assert_eq!(ShutdownReason::BrokerClosed.exit_code(), 0);
        assert_eq!(ShutdownReason::Unhealthy.exit_code(), 1);
    }
}
