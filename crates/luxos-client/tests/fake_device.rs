//! Drives the client against a fake miner that speaks both the framed socket
//! protocol and the HTTP endpoint.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use luxos_client::{ClientConfig, Disposition, MinerClient, ProtocolError, Verification};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

#[derive(Default)]
struct DeviceState {
    session: Option<String>,
    atm_enabled: bool,
    boards: Vec<bool>,
    log: Vec<String>,
    http_status: Option<u16>,
}

/// A miner with three boards (0 and 1 enabled) that issues `TOK1` on login.
#[derive(Clone)]
struct FakeDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl FakeDevice {
    fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(DeviceState {
                atm_enabled: true,
                boards: vec![true, true, false],
                ..DeviceState::default()
            })),
        }
    }

    fn log(&self) -> Vec<String> {
        self.state.lock().log.clone()
    }

    fn respond(&self, command: &str, parameter: &str) -> Value {
        let mut state = self.state.lock();
        state.log.push(if parameter.is_empty() {
            command.to_string()
        } else {
            format!("{command} {parameter}")
        });

        let fields: Vec<&str> = parameter.split(',').collect();
        let authorized = state.session.as_deref() == fields.first().copied();
        match command {
            "session" => json!({
                "STATUS": [{"STATUS": "S", "Msg": "Session"}],
                "SESSION": [{"SessionID": state.session.clone().unwrap_or_default()}],
            }),
            "logon" if parameter == "root,root" => {
                state.session = Some("TOK1".into());
                json!({
                    "STATUS": [{"STATUS": "S", "Msg": "Logon"}],
                    "SESSION": [{"SessionID": "TOK1"}],
                })
            }
            "logon" => status("E", "Invalid credentials"),
            "version" => json!({
                "STATUS": [{"STATUS": "S", "Msg": "LUXminer"}],
                "VERSION": [{"LUXminer": "2024.5.1", "API": "3.7"}],
            }),
            "devs" => {
                let devs: Vec<Value> = state
                    .boards
                    .iter()
                    .enumerate()
                    .map(|(index, enabled)| {
                        json!({"ASC": index, "Enabled": if *enabled { "Y" } else { "N" }, "Status": "Alive"})
                    })
                    .collect();
                json!({"STATUS": [{"STATUS": "S", "Msg": "devs"}], "DEVS": devs})
            }
            "profiles" => json!({
                "STATUS": [{"STATUS": "S", "Msg": "Profiles"}],
                "PROFILES": [
                    {"Profile Name": "default", "Frequency": 460, "Watts": 3000},
                    {"Profile Name": "310MHz", "Frequency": 310, "Watts": 2400},
                ],
            }),
            _ if !authorized => status("E", "Invalid session_id"),
            "curtail" => status("S", &format!("Curtail {}", fields.get(1).unwrap_or(&""))),
            "atmset" => {
                state.atm_enabled = fields.get(1) == Some(&"enabled=true");
                status("S", "ATM configuration updated")
            }
            "enableboard" | "disableboard" => {
                let index: usize = fields.get(1).and_then(|i| i.parse().ok()).unwrap_or(usize::MAX);
                match state.boards.get_mut(index) {
                    Some(board) => {
                        *board = command == "enableboard";
                        status("S", "Board updated")
                    }
                    None => status("E", "Invalid board index"),
                }
            }
            "profileset" => status("S", "Profile set"),
            _ => status("E", "Invalid command"),
        }
    }

    async fn serve_socket(&self) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let device = self.clone();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                let device = device.clone();
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 4096];
                    let read = stream.read(&mut buf).await.unwrap_or(0);
                    let request: Value = match serde_json::from_slice(&buf[..read]) {
                        Ok(value) => value,
                        Err(_) => return,
                    };
                    let reply = device.respond(
                        request["command"].as_str().unwrap_or_default(),
                        request["parameter"].as_str().unwrap_or_default(),
                    );
                    let mut frame = reply.to_string().into_bytes();
                    frame.push(0);
                    let _ = stream.write_all(&frame).await;
                });
            }
        });
        port
    }

    async fn serve_http(&self) -> u16 {
        async fn api(State(device): State<FakeDevice>, Json(body): Json<Value>) -> Response {
            if let Some(code) = device.state.lock().http_status {
                let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                return (status, "unavailable").into_response();
            }
            let reply = device.respond(
                body["command"].as_str().unwrap_or_default(),
                body["parameter"].as_str().unwrap_or_default(),
            );
            Json(reply).into_response()
        }

        let router = Router::new().route("/api", post(api)).with_state(self.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        port
    }
}

fn status(code: &str, msg: &str) -> Value {
    json!({"STATUS": [{"STATUS": code, "Msg": msg}]})
}

/// A port nothing listens on.
async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

fn client(socket_port: u16, http_port: u16) -> MinerClient {
    let config = ClientConfig::new("127.0.0.1", "root", "root")
        .with_ports(socket_port, http_port)
        .with_timeout(Duration::from_secs(2))
        .with_board_delays(Duration::from_millis(10), Duration::from_millis(10));
    MinerClient::new(config).unwrap()
}

#[tokio::test]
async fn pause_queries_session_logs_in_then_curtails() {
    let device = FakeDevice::new();
    let socket = device.serve_socket().await;
    let client = client(socket, closed_port().await);

    let outcome = client.pause_mining().await.unwrap();
    assert_eq!(outcome.disposition, Disposition::Applied);
    assert_eq!(
        device.log(),
        vec!["session", "logon root,root", "curtail TOK1,sleep"]
    );
    client.close().await;
}

#[tokio::test]
async fn http_carries_commands_when_socket_is_refused() {
    let device = FakeDevice::new();
    let http = device.serve_http().await;
    let client = client(closed_port().await, http);

    assert!(client.test_connection().await);
    client.resume_mining().await.unwrap();
    assert_eq!(
        device.log(),
        vec!["version", "session", "logon root,root", "curtail TOK1,wakeup"]
    );
}

#[tokio::test]
async fn both_channels_down_names_both_failures() {
    let device = FakeDevice::new();
    device.state.lock().http_status = Some(503);
    let http = device.serve_http().await;
    let client = client(closed_port().await, http);

    let err = client.get_stats().await.unwrap_err();
    let text = err.to_string();
    assert!(matches!(err, ProtocolError::Unreachable { .. }));
    assert!(text.contains("socket: connection refused"), "{text}");
    assert!(text.contains("http: http status 503"), "{text}");
    assert!(!client.test_connection().await);
}

#[tokio::test]
async fn board_change_is_verified_and_autotuner_restored() {
    let device = FakeDevice::new();
    let socket = device.serve_socket().await;
    let client = client(socket, closed_port().await);

    let change = client.enable_board(2).await.unwrap();
    assert_eq!(change.verification, Verification::Confirmed);
    assert!(device.state.lock().atm_enabled);
    assert_eq!(
        device.log(),
        vec![
            "session",
            "logon root,root",
            "atmset TOK1,enabled=false",
            "enableboard TOK1,2",
            "devs",
            "atmset TOK1,enabled=true",
        ]
    );

    let boards = client.boards().await.unwrap();
    assert!(boards.iter().all(|board| board.enabled == Some(true)));
}

#[tokio::test]
async fn bad_board_index_fails_but_restores_autotuner() {
    let device = FakeDevice::new();
    let socket = device.serve_socket().await;
    let client = client(socket, closed_port().await);

    let err = client.disable_board(7).await.unwrap_err();
    assert_eq!(err.device_message(), Some("Invalid board index"));
    assert!(device.state.lock().atm_enabled);
}

#[tokio::test]
async fn device_side_session_loss_is_recovered() {
    let device = FakeDevice::new();
    let socket = device.serve_socket().await;
    let client = client(socket, closed_port().await);

    client.pause_mining().await.unwrap();
    // Device drops the session, e.g. after a reboot.
    device.state.lock().session = None;
    client.apply_profile("310MHz").await.unwrap();

    let log = device.log();
    assert_eq!(
        &log[3..],
        [
            "profileset TOK1,310MHz",
            "session",
            "logon root,root",
            "profileset TOK1,310MHz",
        ]
    );
}

#[tokio::test]
async fn profiles_come_from_device_catalog() {
    let device = FakeDevice::new();
    let socket = device.serve_socket().await;
    let client = client(socket, closed_port().await);

    assert_eq!(client.list_profiles().await, vec!["default", "310MHz"]);
    let catalog = client.profile_catalog().await.unwrap();
    assert_eq!(catalog[1].watts, Some(2400.0));
}
