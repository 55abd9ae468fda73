//! Message brokers feeding the dispatcher
//!
//! A [`Broker`] yields request frames together with a way to answer them.
//! [`ChannelBroker`] is the in-process transport; [`TcpBroker`] speaks the
//! framed MessagePack protocol over TCP and answers health checks itself,
//! so they never wait behind queued work.

use super::protocol::{decode_frame, encode_frame, frame_codec, salvage_correlation_id, Command, RequestFrame, ResponseFrame};
use super::state::HealthState;
use crate::error::{BgRemovalError, Result};
use crate::processor::RemovalResponse;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// One inbound request and its reply slot
#[derive(Debug)]
pub struct Delivery {
    frame: RequestFrame,
    reply: oneshot::Sender<ResponseFrame>,
}

impl Delivery {
    /// Wrap `frame`; the receiver resolves with the response frame
    #[must_use]
    pub fn new(frame: RequestFrame) -> (Self, oneshot::Receiver<ResponseFrame>) {
        let (reply, response) = oneshot::channel();
        (Self { frame, reply }, response)
    }

    #[must_use]
    pub fn frame(&self) -> &RequestFrame {
        &self.frame
    }

    /// Split into the frame and a handle that answers it later
    #[must_use]
    pub fn into_parts(self) -> (RequestFrame, Replier) {
        let replier = Replier {
            correlation_id: self.frame.correlation_id.clone(),
            reply: self.reply,
        };
        (self.frame, replier)
    }
}

/// Answers one delivery
#[derive(Debug)]
pub struct Replier {
    correlation_id: String,
    reply: oneshot::Sender<ResponseFrame>,
}

impl Replier {
    pub fn respond(self, response: RemovalResponse) {
        let frame = ResponseFrame {
            correlation_id: self.correlation_id,
            response,
        };
        if self.reply.send(frame).is_err() {
            log::debug!("Dropping response, the requester is gone");
        }
    }
}

/// Source of request frames
#[async_trait]
pub trait Broker: Send {
    /// Next delivery; `None` once the transport is closed for good
    async fn recv(&mut self) -> Option<Delivery>;

    /// Stop taking requests and flush every response handed out so far
    ///
    /// Deliveries not yet received are dropped unanswered.
    async fn close(&mut self) {}
}

/// In-process broker backed by a bounded channel
#[derive(Debug)]
pub struct ChannelBroker {
    deliveries: mpsc::Receiver<Delivery>,
}

/// Sending half of a [`ChannelBroker`]
#[derive(Debug, Clone)]
pub struct BrokerClient {
    deliveries: mpsc::Sender<Delivery>,
}

impl ChannelBroker {
    #[must_use]
    pub fn new(capacity: usize) -> (Self, BrokerClient) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { deliveries: rx }, BrokerClient { deliveries: tx })
    }
}

#[async_trait]
impl Broker for ChannelBroker {
    async fn recv(&mut self) -> Option<Delivery> {
        self.deliveries.recv().await
    }

    async fn close(&mut self) {
        self.deliveries.close();
        while self.deliveries.try_recv().is_ok() {}
    }
}

impl BrokerClient {
    /// Hand a frame to the broker without waiting for the answer
    pub async fn send(&self, frame: RequestFrame) -> Result<oneshot::Receiver<ResponseFrame>> {
        let (delivery, response) = Delivery::new(frame);
        self.deliveries
            .send(delivery)
            .await
            .map_err(|_| BgRemovalError::protocol("broker is closed"))?;
        Ok(response)
    }

    /// Send a frame and wait for its response
    pub async fn call(&self, frame: RequestFrame) -> Result<ResponseFrame> {
        self.send(frame)
            .await?
            .await
            .map_err(|_| BgRemovalError::protocol("request dropped without a response"))
    }
}

/// TCP listener speaking length-delimited MessagePack frames
#[derive(Debug)]
pub struct TcpBroker {
    deliveries: mpsc::Receiver<Delivery>,
    local_addr: SocketAddr,
    accept: tokio::task::JoinHandle<()>,
    connections: TaskTracker,
    stop: CancellationToken,
}

impl TcpBroker {
    /// Listen on `addr`; health checks are answered from `health` directly
    pub async fn bind(addr: SocketAddr, health: watch::Receiver<HealthState>, api: &'static str) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (tx, rx) = mpsc::channel(1);
        let connections = TaskTracker::new();
        let stop = CancellationToken::new();
        log::info!("🚀 Listening on {local_addr}");

        let accept = tokio::spawn({
            let connections = connections.clone();
            let stop = stop.clone();
            async move {
                loop {
                    let accepted = tokio::select! {
                        () = stop.cancelled() => break,
                        accepted = listener.accept() => accepted,
                    };
                    match accepted {
                        Ok((stream, peer)) => {
                            log::debug!("Connection from {peer}");
                            let stop = stop.clone();
                            connections.spawn(serve_connection(stream, tx.clone(), health.clone(), api, stop));
                        },
                        Err(e) => log::warn!("⚠️ Accept failed: {e}"),
                    }
                }
            }
        });

        Ok(Self {
            deliveries: rx,
            local_addr,
            accept,
            connections,
            stop,
        })
    }

    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Drop for TcpBroker {
    fn drop(&mut self) {
        self.stop.cancel();
        self.accept.abort();
    }
}

#[async_trait]
impl Broker for TcpBroker {
    async fn recv(&mut self) -> Option<Delivery> {
        self.deliveries.recv().await
    }

    /// Stop reading from every connection and wait until their writers drain
    async fn close(&mut self) {
        self.stop.cancel();
        self.deliveries.close();
        while self.deliveries.try_recv().is_ok() {}
        if !self.accept.is_finished() {
            if let Err(e) = (&mut self.accept).await {
                log::warn!("⚠️ Accept loop failed: {e}");
            }
        }
        self.connections.close();
        self.connections.wait().await;
        log::debug!("All connections flushed");
    }
}

async fn serve_connection(
    stream: TcpStream,
    deliveries: mpsc::Sender<Delivery>,
    health: watch::Receiver<HealthState>,
    api: &'static str,
    stop: CancellationToken,
) {
    let (mut sink, mut frames) = Framed::new(stream, frame_codec()).split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ResponseFrame>();

    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            let bytes = match encode_frame(&frame) {
                Ok(bytes) => bytes,
                Err(e) => {
                    log::error!("❌ Failed to encode response {}: {e}", frame.correlation_id);
                    continue;
                },
            };
            if let Err(e) = sink.send(bytes).await {
                log::debug!("Connection closed while writing: {e}");
                break;
            }
        }
    });

    loop {
        let item = tokio::select! {
            () = stop.cancelled() => break,
            item = frames.next() => match item {
                Some(item) => item,
                None => break,
            },
        };
        let bytes = match item {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("⚠️ Dropping connection after a bad frame: {e}");
                break;
            },
        };

        let frame: RequestFrame = match decode_frame(&bytes) {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("⚠️ Undecodable request: {e}");
                if let Some(correlation_id) = salvage_correlation_id(&bytes) {
                    let error = BgRemovalError::invalid_request(e.to_string());
                    let _ = out_tx.send(ResponseFrame {
                        correlation_id,
                        response: RemovalResponse::from_error(&error, api),
                    });
                }
                continue;
            },
        };

        if frame.command == Command::Health {
            let ready = *health.borrow() == HealthState::Ready;
            let _ = out_tx.send(ResponseFrame {
                correlation_id: frame.correlation_id,
                response: RemovalResponse::health(ready, api),
            });
            continue;
        }

        let (delivery, response) = Delivery::new(frame);
        if deliveries.send(delivery).await.is_err() {
            break;
        }
        let out = out_tx.clone();
        tokio::spawn(async move {
            if let Ok(frame) = response.await {
                let _ = out.send(frame);
            }
        });
    }

    drop(out_tx);
    let _ = writer.await;
}

/// Client side of the TCP protocol
#[derive(Debug)]
pub struct TcpClient {
    framed: Framed<TcpStream, tokio_util::codec::LengthDelimitedCodec>,
}

impl TcpClient {
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self {
            framed: Framed::new(stream, frame_codec()),
        })
    }

    pub async fn send(&mut self, frame: &RequestFrame) -> Result<()> {
        let bytes = encode_frame(frame)?;
        self.framed
            .send(bytes)
            .await
            .map_err(|e| BgRemovalError::protocol(format!("failed to send frame: {e}")))
    }

    /// Next response frame, in completion order
    pub async fn recv(&mut self) -> Result<ResponseFrame> {
        let bytes = self
            .framed
            .next()
            .await
            .ok_or_else(|| BgRemovalError::protocol("connection closed"))?
            .map_err(|e| BgRemovalError::protocol(format!("failed to read frame: {e}")))?;
        decode_frame(&bytes)
    }

    /// Send one frame and wait for the next response
    pub async fn call(&mut self, frame: &RequestFrame) -> Result<ResponseFrame> {
        self.send(frame).await?;
        self.recv().await
    }
}
