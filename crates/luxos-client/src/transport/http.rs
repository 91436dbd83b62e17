use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, StatusCode};
use tracing::debug;
use url::Url;

use super::{Channel, ChannelKind, Request, TransportError};

const MAX_ERROR_BODY: usize = 256;

/// The firmware's HTTP control endpoint. Only `200 OK` counts as a delivered response.
#[derive(Debug)]
pub struct HttpChannel {
    endpoint: Url,
    timeout: Duration,
    client: RwLock<Option<Client>>,
}

impl HttpChannel {
    pub fn new(endpoint: Url, timeout: Duration) -> Self {
        Self {
            endpoint,
            timeout,
            client: RwLock::new(None),
        }
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn client(&self) -> Result<Client, TransportError> {
        if let Some(client) = self.client.read().as_ref() {
            return Ok(client.clone());
        }
        let mut guard = self.client.write();
        if let Some(client) = guard.as_ref() {
            return Ok(client.clone());
        }
        let client = Client::builder()
            .timeout(self.timeout)
            .connect_timeout(self.timeout)
            .build()
            .map_err(|err| TransportError::Http(err.to_string()))?;
        *guard = Some(client.clone());
        Ok(client)
    }

    fn request_error(&self, err: reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout(self.timeout)
        } else if err.is_connect() {
            TransportError::Connect(format!("{}: {err}", self.endpoint))
        } else {
            TransportError::Http(err.to_string())
        }
    }
}

#[async_trait]
impl Channel for HttpChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Http
    }

    async fn send(&self, request: &Request) -> Result<String, TransportError> {
        debug!(
            target: "luxos::transport",
            channel = "http",
            endpoint = %self.endpoint,
            command = %request.command,
            "posting command"
        );
        let response = self
            .client()?
            .post(self.endpoint.clone())
            .json(request)
            .send()
            .await
            .map_err(|err| self.request_error(err))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| self.request_error(err))?;
        if status != StatusCode::OK {
            let mut body = body;
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }

    fn close(&self) {
        self.client.write().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode as AxumStatus, routing::post, Json, Router};
    use serde_json::{json, Value};

    async fn spawn_router(router: Router) -> Url {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        Url::parse(&format!("http://{addr}/api")).unwrap()
    }

    #[tokio::test]
    async fn posts_command_body() {
        let router = Router::new().route(
            "/api",
            post(|Json(body): Json<Value>| async move {
                Json(json!({
                    "STATUS": [{"STATUS": "S", "Msg": "echo"}],
                    "ECHO": [body],
                }))
            }),
        );
        let channel = HttpChannel::new(spawn_router(router).await, Duration::from_secs(2));
        let body = channel
            .send(&Request::new("profileget", "default"))
            .await
            .unwrap();
        let value: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value["ECHO"][0]["command"], "profileget");
        assert_eq!(value["ECHO"][0]["parameter"], "default");
    }

    #[tokio::test]
    async fn non_200_is_a_channel_failure() {
        let router = Router::new().route(
            "/api",
            post(|| async { (AxumStatus::SERVICE_UNAVAILABLE, "warming up") }),
        );
        let channel = HttpChannel::new(spawn_router(router).await, Duration::from_secs(2));
        let err = channel.send(&Request::new("devs", "")).await.unwrap_err();
        match err {
            TransportError::Status { status, body } => {
                assert_eq!(status, 503);
                assert_eq!(body, "warming up");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn close_is_repeatable_and_client_rebuilds() {
        let router = Router::new().route("/api", post(|| async { "{}" }));
        let channel = HttpChannel::new(spawn_router(router).await, Duration::from_secs(2));
        channel.close();
        channel.close();
        assert_eq!(channel.send(&Request::new("version", "")).await.unwrap(), "{}");
    }
}
