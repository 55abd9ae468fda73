//! Framed MessagePack transport over TCP, end to end

mod common;

use bgremove_worker::server::protocol::{decode_frame, encode_frame, frame_codec, ResponseFrame};
use bgremove_worker::server::{RequestFrame, Server, ShutdownReason, TcpBroker, TcpClient};
use bgremove_worker::{Category, MockExtractor, MockMode, RemovalRequest, ResponseStatus};
use common::{png, scene, server_config};
use futures::{SinkExt, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::bytes::Bytes;
use tokio_util::codec::Framed;

struct Running {
    addr: std::net::SocketAddr,
    stop: tokio::sync::oneshot::Sender<()>,
    serving: tokio::task::JoinHandle<bgremove_worker::Result<ShutdownReason>>,
    _markers: tempfile::TempDir,
}

async fn start(mode: MockMode) -> Running {
    start_with(MockExtractor::new(mode)).await
}

async fn start_with(mock: MockExtractor) -> Running {
    let (config, markers) = server_config(2, 10);
    let server = Server::start(&config, Arc::new(mock)).unwrap();
    let broker = TcpBroker::bind(
        "127.0.0.1:0".parse().unwrap(),
        server.pool().subscribe(),
        server.pool().api(),
    )
    .await
    .unwrap();
    let addr = broker.local_addr();
    server.pool().ready().await.unwrap();

    let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
    let serving = tokio::spawn(server.serve(broker, async {
        let _ = stopped.await;
    }));
    Running {
        addr,
        stop,
        serving,
        _markers: markers,
    }
}

fn request(width: u32) -> RemovalRequest {
    RemovalRequest {
        category: Some(Category::Product),
        ..RemovalRequest::new(png(&scene(width, 80, (20, 20, 30, 30))))
    }
}

#[tokio::test]
async fn test_health_and_removal_over_tcp() {
    let running = start(MockMode::ConstantAlpha(128)).await;
    let mut client = TcpClient::connect(running.addr).await.unwrap();

    let health = client.call(&RequestFrame::health()).await.unwrap();
    assert_eq!(health.response.status, ResponseStatus::Ok);
    assert_eq!(health.response.api, "mock");

    let frame = RequestFrame::removebg(request(120));
    let response = client.call(&frame).await.unwrap();
    assert_eq!(response.correlation_id, frame.correlation_id);
    assert!(response.response.is_ok());
    assert_eq!(response.response.version, "1.0");
    assert_eq!(response.response.format.as_deref(), Some("png"));
    let image = image::load_from_memory(response.response.data.as_deref().unwrap()).unwrap();
    assert_eq!((image.width(), image.height()), (120, 80));

    running.stop.send(()).unwrap();
    assert_eq!(running.serving.await.unwrap().unwrap(), ShutdownReason::Signal);
}

#[tokio::test]
async fn test_pipelined_requests_are_matched_by_correlation_id() {
    let running = start(MockMode::BackgroundKey).await;
    let mut client = TcpClient::connect(running.addr).await.unwrap();

    let frames: Vec<RequestFrame> = [100, 140, 180].into_iter().map(|w| RequestFrame::removebg(request(w))).collect();
    for frame in &frames {
        client.send(frame).await.unwrap();
    }

    let mut expected: HashSet<String> = frames.iter().map(|f| f.correlation_id.clone()).collect();
    for _ in 0..frames.len() {
        let response = client.recv().await.unwrap();
        assert!(response.response.is_ok());
        assert!(expected.remove(&response.correlation_id));
    }
    assert!(expected.is_empty());

    running.stop.send(()).unwrap();
    running.serving.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_malformed_frame_gets_an_error_reply() {
    #[derive(serde::Serialize)]
    struct Broken {
        correlation_id: &'static str,
        command: &'static str,
    }

    let running = start(MockMode::ConstantAlpha(255)).await;
    let stream = tokio::net::TcpStream::connect(running.addr).await.unwrap();
    let mut framed = Framed::new(stream, frame_codec());

    let bytes = rmp_serde::to_vec_named(&Broken {
        correlation_id: "broken-1",
        command: "explode",
    })
    .unwrap();
    framed.send(Bytes::from(bytes)).await.unwrap();

    let reply = framed.next().await.unwrap().unwrap();
    let frame: ResponseFrame = decode_frame(&reply).unwrap();
    assert_eq!(frame.correlation_id, "broken-1");
    assert_eq!(frame.response.status, ResponseStatus::Error);
    assert_eq!(frame.response.description, "invalid_parameters");

    // The connection stays usable after a bad frame
    framed.send(encode_frame(&RequestFrame::health()).unwrap()).await.unwrap();
    let reply = framed.next().await.unwrap().unwrap();
    let frame: ResponseFrame = decode_frame(&reply).unwrap();
    assert!(frame.response.is_ok());

    running.stop.send(()).unwrap();
    running.serving.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_responses_are_flushed_before_shutdown_completes() {
    let mock = MockExtractor::new(MockMode::ConstantAlpha(255));
    let running = start_with(mock.clone()).await;
    let mut client = TcpClient::connect(running.addr).await.unwrap();

    let frames: Vec<RequestFrame> = [100, 120, 140, 160].into_iter().map(|w| RequestFrame::removebg(request(w))).collect();
    for frame in &frames {
        client.send(frame).await.unwrap();
    }
    for _ in 0..500 {
        if !mock.call_history().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    running.stop.send(()).unwrap();
    assert_eq!(running.serving.await.unwrap().unwrap(), ShutdownReason::Signal);

    // Whatever reached the pool is answered; the connection then closes
    let mut answered = 0;
    while let Ok(response) = client.recv().await {
        assert!(response.response.is_ok());
        assert!(frames.iter().any(|f| f.correlation_id == response.correlation_id));
        answered += 1;
    }
    assert!(answered >= 1);
}
