//! End-to-end relay tests
//!
//! Runs the real axum router against a mock SAUC upstream and drives it with
//! a tokio-tungstenite client.

mod mock_upstream;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tempfile::TempDir;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use mock_upstream::{AfterFinal, spawn_mock_upstream};
use sauc_gateway::core::sauc::{
    Compression, FLAG_FINAL_PACKET, Frame, MessageType, Serialization, build_frame,
};
use sauc_gateway::{ServerConfig, routes, state::AppState};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const STEP: Duration = Duration::from_secs(5);

fn test_config(upstream: Option<&str>, recording_dir: Option<PathBuf>) -> ServerConfig {
    let mut config = ServerConfig::default();
    config.host = "127.0.0.1".to_string();
    config.port = 0;
    if let Some(endpoint) = upstream {
        config.upstream.endpoint = Some(endpoint.to_string());
        config.upstream.app_key = Some("app-key".to_string());
        config.upstream.access_key = Some("access-key".to_string());
        config.upstream.resource_id = Some("volc.bigasr.sauc.duration".to_string());
    }
    config.recording.dir = recording_dir;
    config.recording.completion_timeout_seconds = 5;
    config.convert.enabled = false;
    config.convert.workers = 1;
    config
}

async fn spawn_gateway(config: ServerConfig) -> (SocketAddr, Arc<AppState>) {
    let state = AppState::new(config).await.unwrap();
    let app = routes::api::create_api_router()
        .merge(routes::relay::create_relay_router())
        .with_state(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, state)
}

async fn connect(addr: SocketAddr, user: Option<&'static str>) -> Result<Client, WsError> {
    let mut request = format!("ws://{addr}/ws").into_client_request().unwrap();
    if let Some(user) = user {
        request
            .headers_mut()
            .insert("x-user-id", HeaderValue::from_static(user));
    }
    connect_async(request).await.map(|(client, _)| client)
}

fn audio(payload: &[u8], flags: u8) -> Message {
    Message::Binary(build_frame(
        MessageType::AudioOnlyClientRequest,
        Serialization::None,
        Compression::None,
        flags,
        payload,
    ))
}

fn full_client_request() -> Message {
    let payload = serde_json::json!({
        "user": { "uid": "user-1" },
        "audio": { "format": "pcm", "rate": 16000, "bits": 16, "channel": 1 },
    })
    .to_string();
    Message::Binary(build_frame(
        MessageType::FullClientRequest,
        Serialization::Json,
        Compression::None,
        0,
        payload.as_bytes(),
    ))
}

fn client_ack() -> Message {
    Message::Binary(build_frame(
        MessageType::ClientAck,
        Serialization::None,
        Compression::None,
        0,
        &[],
    ))
}

async fn next_message(client: &mut Client) -> Option<Message> {
    timeout(STEP, client.next())
        .await
        .expect("timed out waiting for the gateway")
        .and_then(|result| result.ok())
}

/// Read until task-complete; returns its JSON and whether the server's
/// final result was seen before it.
async fn read_until_task_complete(client: &mut Client) -> (serde_json::Value, bool) {
    let mut saw_server_final = false;
    loop {
        match next_message(client).await {
            Some(Message::Binary(data)) => {
                let frame = Frame::parse(&data).unwrap();
                match frame.message_type {
                    MessageType::FullServerResponse => {
                        if frame.is_server_final() {
                            saw_server_final = true;
                        }
                    }
                    MessageType::TaskComplete => {
                        assert_eq!(frame.serialization, Serialization::Json);
                        assert_eq!(frame.flags, 0);
                        let json = serde_json::from_slice(&frame.payload).unwrap();
                        return (json, saw_server_final);
                    }
                    other => panic!("unexpected frame type {other:?}"),
                }
            }
            Some(Message::Close(frame)) => panic!("closed before task-complete: {frame:?}"),
            Some(_) => {}
            None => panic!("connection ended before task-complete"),
        }
    }
}

/// Read until the gateway closes; returns how many task-complete frames
/// arrived meanwhile.
async fn read_until_closed(client: &mut Client) -> usize {
    let mut task_completes = 0;
    loop {
        match next_message(client).await {
            Some(Message::Binary(data)) => {
                if Frame::parse(&data).unwrap().message_type == MessageType::TaskComplete {
                    task_completes += 1;
                }
            }
            Some(Message::Close(_)) | None => return task_completes,
            Some(_) => {}
        }
    }
}

async fn stream_session_audio(client: &mut Client) {
    client.send(full_client_request()).await.unwrap();
    client.send(audio(&[1u8; 10], 0)).await.unwrap();
    client.send(audio(&[2u8; 20], 0)).await.unwrap();
    client.send(audio(&[3u8; 30], 0)).await.unwrap();
    // carries audio that must not be recorded
    client.send(audio(&[4u8; 6], FLAG_FINAL_PACKET)).await.unwrap();
}

#[tokio::test]
async fn test_session_records_until_client_final_and_completes_on_ack() {
    let recordings = TempDir::new().unwrap();
    let (endpoint, upstream) = spawn_mock_upstream(AfterFinal::StayOpen).await;
    let (addr, _state) = spawn_gateway(test_config(
        Some(&endpoint),
        Some(recordings.path().to_path_buf()),
    ))
    .await;

    let mut client = connect(addr, Some("user-1")).await.unwrap();
    stream_session_audio(&mut client).await;

    let (task_complete, saw_server_final) = read_until_task_complete(&mut client).await;
    assert!(saw_server_final, "task-complete must follow the server final");
    assert_eq!(task_complete["status"], "completed");
    assert_eq!(task_complete["taskId"], task_complete["connectId"]);

    let file_path = PathBuf::from(task_complete["filePath"].as_str().unwrap());
    assert!(file_path.starts_with(recordings.path()));
    assert_eq!(file_path.extension().unwrap(), "wav");

    let reader = hound::WavReader::open(&file_path).unwrap();
    let spec = reader.spec();
    assert_eq!(spec.channels, 1);
    assert_eq!(spec.sample_rate, 16000);
    assert_eq!(spec.bits_per_sample, 16);
    // 60 bytes of 16-bit mono audio
    assert_eq!(reader.duration(), 30);
    assert_eq!(
        task_complete["fileSize"].as_u64().unwrap(),
        std::fs::metadata(&file_path).unwrap().len()
    );

    // the session stays open until the client acknowledges
    client.send(client_ack()).await.unwrap();
    assert_eq!(read_until_closed(&mut client).await, 0);

    // everything but the ack reached the upstream
    assert_eq!(
        *upstream.received_bytes.lock(),
        full_client_request_len() + 10 + 20 + 30 + 6
    );
    // no archival sink configured: the recording stays on disk
    assert!(file_path.exists());

    let handshakes = upstream.handshakes.lock();
    assert_eq!(handshakes.len(), 1);
    let header = |name: &str| {
        handshakes[0]
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.clone())
    };
    assert_eq!(header("x-api-app-key").as_deref(), Some("app-key"));
    assert_eq!(header("x-api-access-key").as_deref(), Some("access-key"));
    assert_eq!(
        header("x-api-resource-id").as_deref(),
        Some("volc.bigasr.sauc.duration")
    );
    assert_eq!(
        header("x-api-connect-id").as_deref(),
        task_complete["connectId"].as_str()
    );
}

fn full_client_request_len() -> usize {
    match full_client_request() {
        Message::Binary(data) => Frame::parse(&data).unwrap().payload.len(),
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn test_upstream_closing_after_final_still_delivers_task_complete() {
    let (endpoint, _upstream) = spawn_mock_upstream(AfterFinal::Close).await;
    let (addr, _state) = spawn_gateway(test_config(Some(&endpoint), None)).await;

    let mut client = connect(addr, Some("user-1")).await.unwrap();
    stream_session_audio(&mut client).await;

    let (task_complete, saw_server_final) = read_until_task_complete(&mut client).await;
    assert!(saw_server_final);
    assert_eq!(task_complete["status"], "empty");
    assert!(task_complete.get("filePath").is_none());

    client.send(client_ack()).await.unwrap();
    assert_eq!(read_until_closed(&mut client).await, 0);
}

#[tokio::test]
async fn test_session_closes_when_client_never_acks() {
    let (endpoint, _upstream) = spawn_mock_upstream(AfterFinal::StayOpen).await;
    let mut config = test_config(Some(&endpoint), None);
    config.recording.completion_timeout_seconds = 1;
    let (addr, _state) = spawn_gateway(config).await;

    let mut client = connect(addr, Some("user-1")).await.unwrap();
    stream_session_audio(&mut client).await;
    read_until_task_complete(&mut client).await;

    // no ack: the gateway gives up after the completion timeout
    assert_eq!(read_until_closed(&mut client).await, 0);
}

/// Samples in the WAV named by a task-complete payload
fn recorded_samples(task_complete: &serde_json::Value) -> u32 {
    let path = task_complete["filePath"].as_str().unwrap();
    hound::WavReader::open(path).unwrap().duration()
}

#[tokio::test]
async fn test_unparseable_frame_stops_recording_but_is_relayed() {
    let recordings = TempDir::new().unwrap();
    let (endpoint, upstream) = spawn_mock_upstream(AfterFinal::StayOpen).await;
    let (addr, _state) = spawn_gateway(test_config(
        Some(&endpoint),
        Some(recordings.path().to_path_buf()),
    ))
    .await;

    let mut client = connect(addr, Some("user-1")).await.unwrap();
    client.send(full_client_request()).await.unwrap();
    client.send(audio(&[1u8; 10], 0)).await.unwrap();
    client
        .send(Message::Binary(vec![0xde, 0xad, 0xbe].into()))
        .await
        .unwrap();
    client.send(audio(&[2u8; 20], 0)).await.unwrap();
    client.send(audio(&[3u8; 6], FLAG_FINAL_PACKET)).await.unwrap();

    let (task_complete, _) = read_until_task_complete(&mut client).await;
    assert_eq!(task_complete["status"], "completed");
    // only the audio before the bad frame was recorded
    assert_eq!(recorded_samples(&task_complete), 5);

    client.send(client_ack()).await.unwrap();
    assert_eq!(read_until_closed(&mut client).await, 0);

    assert_eq!(*upstream.received_frames.lock(), 5);
    assert_eq!(
        *upstream.received_bytes.lock(),
        full_client_request_len() + 10 + 20 + 6
    );
}

#[tokio::test]
async fn test_json_audio_frame_stops_recording_but_is_relayed() {
    let recordings = TempDir::new().unwrap();
    let (endpoint, upstream) = spawn_mock_upstream(AfterFinal::StayOpen).await;
    let (addr, _state) = spawn_gateway(test_config(
        Some(&endpoint),
        Some(recordings.path().to_path_buf()),
    ))
    .await;

    let mut client = connect(addr, Some("user-1")).await.unwrap();
    client.send(full_client_request()).await.unwrap();
    client.send(audio(&[1u8; 10], 0)).await.unwrap();
    client
        .send(Message::Binary(build_frame(
            MessageType::AudioOnlyClientRequest,
            Serialization::Json,
            Compression::None,
            0,
            b"{\"audio\":1}",
        )))
        .await
        .unwrap();
    client.send(audio(&[2u8; 20], 0)).await.unwrap();
    client.send(audio(&[3u8; 6], FLAG_FINAL_PACKET)).await.unwrap();

    let (task_complete, _) = read_until_task_complete(&mut client).await;
    assert_eq!(recorded_samples(&task_complete), 5);

    client.send(client_ack()).await.unwrap();
    assert_eq!(read_until_closed(&mut client).await, 0);
    assert_eq!(*upstream.received_frames.lock(), 5);
}

/// Stand-in ffmpeg that takes longer than the ack timeout, then copies its
/// input to the output path.
#[cfg(unix)]
fn slow_ffmpeg(dir: &std::path::Path) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let script = dir.join("slow-ffmpeg");
    std::fs::write(
        &script,
        "#!/bin/sh\n\
         sleep 2\n\
         while [ \"$#\" -gt 1 ]; do\n\
         if [ \"$1\" = \"-i\" ]; then input=\"$2\"; fi\n\
         shift\n\
         done\n\
         cp \"$input\" \"$1\"\n",
    )
    .unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
    script
}

#[cfg(unix)]
#[tokio::test]
async fn test_slow_conversion_still_delivers_task_complete() {
    let recordings = TempDir::new().unwrap();
    let tools = TempDir::new().unwrap();
    let (endpoint, _upstream) = spawn_mock_upstream(AfterFinal::StayOpen).await;

    let mut config = test_config(Some(&endpoint), Some(recordings.path().to_path_buf()));
    config.recording.completion_timeout_seconds = 1;
    config.convert.enabled = true;
    config.convert.format = "ogg".to_string();
    config.convert.bitrate = None;
    config.convert.ffmpeg_path = Some(slow_ffmpeg(tools.path()));
    let (addr, _state) = spawn_gateway(config).await;

    let mut client = connect(addr, Some("user-1")).await.unwrap();
    stream_session_audio(&mut client).await;

    // conversion outlasts the ack timeout; the deadline only starts now
    let (task_complete, saw_server_final) = read_until_task_complete(&mut client).await;
    assert!(saw_server_final);
    assert_eq!(task_complete["status"], "completed");
    let file_path = PathBuf::from(task_complete["filePath"].as_str().unwrap());
    assert_eq!(file_path.extension().unwrap(), "ogg");
    assert!(file_path.exists());

    // no ack: closed once the timeout runs from delivery
    assert_eq!(read_until_closed(&mut client).await, 0);
}

#[tokio::test]
async fn test_missing_user_id_is_rejected_before_upgrade() {
    let (endpoint, upstream) = spawn_mock_upstream(AfterFinal::StayOpen).await;
    let (addr, _state) = spawn_gateway(test_config(Some(&endpoint), None)).await;

    match connect(addr, None).await {
        Err(WsError::Http(response)) => {
            assert_eq!(response.status(), 401);
            if let Some(body) = response.body().as_deref().filter(|b| !b.is_empty()) {
                let json: serde_json::Value = serde_json::from_slice(body).unwrap();
                assert_eq!(json["code"], 401);
                assert_eq!(json["message"], "userID is required");
            }
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("upgrade without X-User-ID must fail"),
    }
    assert!(upstream.handshakes.lock().is_empty());
}

#[tokio::test]
async fn test_unconfigured_upstream_closes_with_policy_violation() {
    let (addr, _state) = spawn_gateway(test_config(None, None)).await;

    let mut client = connect(addr, Some("user-1")).await.unwrap();
    match next_message(&mut client).await {
        Some(Message::Close(Some(frame))) => {
            assert_eq!(u16::from(frame.code), 1008);
            assert_eq!(frame.reason.as_str(), "server configuration error");
        }
        other => panic!("expected a close frame, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unreachable_upstream_closes_with_try_again_later() {
    // bind then drop to get a port nobody listens on
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let endpoint = format!("ws://127.0.0.1:{port}/sauc");
    let (addr, _state) = spawn_gateway(test_config(Some(&endpoint), None)).await;

    let mut client = connect(addr, Some("user-1")).await.unwrap();
    match next_message(&mut client).await {
        Some(Message::Close(Some(frame))) => {
            assert_eq!(u16::from(frame.code), 1013);
            assert_eq!(frame.reason.as_str(), "upstream unavailable");
        }
        other => panic!("expected a close frame, got {other:?}"),
    }
}

#[tokio::test]
async fn test_health_check() {
    let (addr, _state) = spawn_gateway(test_config(None, None)).await;
    let response = reqwest::get(format!("http://{addr}/")).await.unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "OK");
}
