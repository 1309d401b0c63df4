//! Talking-head streaming API client
//!
//! Endpoints live under `/talks/streams`. Every request carries the static
//! credential as HTTP Basic auth and the configured timeout.

use std::time::Duration;

use alter_core::StreamingConfig;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{ConnectFailure, Result, StreamError, TalkFailure};
use crate::session::StreamIds;

/// SDP offer or answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: String,
    pub sdp: String,
}

impl SessionDescription {
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: "answer".to_string(),
            sdp: sdp.into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum UrlList {
    One(String),
    Many(Vec<String>),
}

/// TURN/STUN server handed out by the streaming service
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct IceServer {
    #[serde(deserialize_with = "deserialize_urls")]
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

fn deserialize_urls<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match UrlList::deserialize(deserializer)? {
        UrlList::One(url) => vec![url],
        UrlList::Many(urls) => urls,
    })
}

/// Local ICE candidate to push to the remote side
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
}

/// Result of stream creation
#[derive(Debug, Clone, PartialEq)]
pub struct CreatedStream {
    pub ids: StreamIds,
    pub offer: SessionDescription,
    pub ice_servers: Vec<IceServer>,
}

#[derive(Debug, Deserialize)]
struct CreateStreamResponse {
    id: String,
    session_id: String,
    offer: SessionDescription,
    #[serde(default)]
    ice_servers: Vec<IceServer>,
}

/// Remote stream lifecycle
#[async_trait]
pub trait StreamingApi: Send + Sync {
    async fn create_stream(&self, source_url: &str, voice_id: &str) -> Result<CreatedStream>;

    async fn submit_sdp(&self, ids: &StreamIds, answer: &SessionDescription) -> Result<()>;

    async fn submit_ice(&self, ids: &StreamIds, candidate: &IceCandidate) -> Result<()>;

    /// One talk attempt; failures come back as [`StreamError::Talk`]
    async fn talk(&self, ids: &StreamIds, audio_url: &str, source_url: &str) -> Result<()>;

    async fn delete_stream(&self, ids: &StreamIds) -> Result<()>;
}

/// Retry schedule for talk submission
#[derive(Debug, Clone, Copy)]
pub struct TalkRetry {
    pub attempts: u32,
    pub backoff: Duration,
}

impl TalkRetry {
    pub fn from_config(config: &StreamingConfig) -> Self {
        Self {
            attempts: config.talk_attempts.max(1),
            backoff: config.talk_backoff(),
        }
    }
}

/// Submit a talk, retrying only 400s that mean "stream not ready yet"
pub async fn talk_with_retry(
    api: &dyn StreamingApi,
    ids: &StreamIds,
    audio_url: &str,
    source_url: &str,
    retry: TalkRetry,
) -> Result<()> {
    let mut attempt = 1;
    loop {
        match api.talk(ids, audio_url, source_url).await {
            Ok(()) => return Ok(()),
            Err(StreamError::Talk {
                failure: TalkFailure::BadRequest,
                retryable: true,
                detail,
            }) if attempt < retry.attempts => {
                warn!(
                    stream_id = %ids.stream_id,
                    "Talk attempt {}/{} rejected as not ready: {}",
                    attempt, retry.attempts, detail
                );
                attempt += 1;
                tokio::time::sleep(retry.backoff).await;
            }
            Err(StreamError::Talk {
                failure, detail, ..
            }) => {
                warn!(stream_id = %ids.stream_id, "Talk failed after {} attempt(s): {}", attempt, detail);
                return Err(StreamError::Talk {
                    failure,
                    retryable: false,
                    detail,
                });
            }
            Err(e) => return Err(e),
        }
    }
}

/// A 400 whose body reads as a malformed request rather than readiness
pub fn is_malformed_request(body: &str) -> bool {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        let kind = value.get("kind").and_then(|k| k.as_str()).unwrap_or("");
        if kind.ends_with("ValidationError") {
            return true;
        }
        let description = value
            .get("description")
            .and_then(|d| d.as_str())
            .unwrap_or("");
        return description.to_ascii_lowercase().contains("validation");
    }
    false
}

/// A create-stream 4xx that blames the source image
fn names_source_image(body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    ["source_url", "image", "face"]
        .iter()
        .any(|needle| lower.contains(needle))
}

fn transport_failure(e: &reqwest::Error) -> ConnectFailure {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        ConnectFailure::Network
    } else {
        ConnectFailure::Protocol
    }
}

/// HTTP implementation of [`StreamingApi`]
#[derive(Clone)]
pub struct StreamingClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl StreamingClient {
    pub fn new(config: &StreamingConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(StreamError::Core(alter_core::Error::Config(
                "streaming.api_key is empty".to_string(),
            )));
        }
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(alter_core::Error::Http)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match self.api_key.split_once(':') {
            Some((user, password)) => request.basic_auth(user, Some(password)),
            // Already encoded
            None => request.header(
                reqwest::header::AUTHORIZATION,
                format!("Basic {}", self.api_key),
            ),
        }
    }

    fn stream_url(&self, stream_id: &str) -> String {
        format!("{}/talks/streams/{}", self.base_url, stream_id)
    }

    /// Shared handling for signaling calls made while connecting
    async fn signaling(&self, what: &str, request: RequestBuilder) -> Result<()> {
        let response = request.send().await.map_err(|e| {
            StreamError::connection(transport_failure(&e), format!("{}: {}", what, e))
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("{} failed: {} - {}", what, status, body);
            return Err(StreamError::connection(
                ConnectFailure::Protocol,
                format!("{}: {} - {}", what, status, body),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl StreamingApi for StreamingClient {
    async fn create_stream(&self, source_url: &str, voice_id: &str) -> Result<CreatedStream> {
        let url = format!("{}/talks/streams", self.base_url);
        let body = serde_json::json!({
            "source_url": source_url,
            "voice_id": voice_id,
        });

        debug!("Creating stream for {}", source_url);

        let response = self
            .authorized(self.client.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                StreamError::connection(transport_failure(&e), format!("create stream: {}", e))
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| {
            StreamError::connection(transport_failure(&e), format!("create stream: {}", e))
        })?;

        if !status.is_success() {
            warn!("Create stream failed: {} - {}", status, text);
            let cause = if status.is_client_error() && names_source_image(&text) {
                ConnectFailure::AvatarRejected
            } else {
                ConnectFailure::Protocol
            };
            return Err(StreamError::connection(
                cause,
                format!("create stream: {} - {}", status, text),
            ));
        }

        let parsed: CreateStreamResponse = serde_json::from_str(&text).map_err(|e| {
            StreamError::connection(
                ConnectFailure::Protocol,
                format!("malformed create-stream response: {}", e),
            )
        })?;

        info!(stream_id = %parsed.id, "Stream created");
        Ok(CreatedStream {
            ids: StreamIds {
                stream_id: parsed.id,
                session_id: parsed.session_id,
            },
            offer: parsed.offer,
            ice_servers: parsed.ice_servers,
        })
    }

    async fn submit_sdp(&self, ids: &StreamIds, answer: &SessionDescription) -> Result<()> {
        let url = format!("{}/sdp", self.stream_url(&ids.stream_id));
        let body = serde_json::json!({
            "answer": answer,
            "session_id": ids.session_id,
        });
        self.signaling("submit sdp", self.authorized(self.client.post(&url)).json(&body))
            .await
    }

    async fn submit_ice(&self, ids: &StreamIds, candidate: &IceCandidate) -> Result<()> {
        let url = format!("{}/ice", self.stream_url(&ids.stream_id));
        let body = serde_json::json!({
            "candidate": candidate.candidate,
            "sdpMid": candidate.sdp_mid,
            "sdpMLineIndex": candidate.sdp_mline_index,
            "session_id": ids.session_id,
        });
        self.signaling("submit ice", self.authorized(self.client.post(&url)).json(&body))
            .await
    }

    async fn talk(&self, ids: &StreamIds, audio_url: &str, source_url: &str) -> Result<()> {
        let url = self.stream_url(&ids.stream_id);
        let body = serde_json::json!({
            "script": {
                "type": "audio",
                "audio_url": audio_url,
            },
            "config": { "stitch": true },
            "source_url": source_url,
            "session_id": ids.session_id,
        });

        let response = self
            .authorized(self.client.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(|e| StreamError::Talk {
                failure: TalkFailure::Other,
                retryable: false,
                detail: e.to_string(),
            })?;

        let status = response.status();
        if status.is_success() {
            debug!(stream_id = %ids.stream_id, "Talk accepted");
            return Ok(());
        }

        let text = response.text().await.unwrap_or_default();
        let retryable = status == StatusCode::BAD_REQUEST && !is_malformed_request(&text);
        Err(StreamError::Talk {
            failure: TalkFailure::from_status(status.as_u16()),
            retryable,
            detail: format!("{} - {}", status, text),
        })
    }

    async fn delete_stream(&self, ids: &StreamIds) -> Result<()> {
        let url = self.stream_url(&ids.stream_id);
        let body = serde_json::json!({ "session_id": ids.session_id });
        self.signaling("delete stream", self.authorized(self.client.delete(&url)).json(&body))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> StreamingClient {
        StreamingClient::new(&StreamingConfig {
            api_key: "user:pass".to_string(),
            base_url: server.uri(),
            ..Default::default()
        })
        .unwrap()
    }

    fn ids() -> StreamIds {
        StreamIds {
            stream_id: "strm_1".to_string(),
            session_id: "sess_1".to_string(),
        }
    }

    fn fast_retry() -> TalkRetry {
        TalkRetry {
            attempts: 3,
            backoff: Duration::from_millis(10),
        }
    }

    #[test]
    fn test_malformed_request_detection() {
        assert!(is_malformed_request(
            r#"{"kind":"ValidationError","description":"script is required"}"#
        ));
        assert!(is_malformed_request(
            r#"{"kind":"BadRequestError","description":"Validation failed for audio_url"}"#
        ));
        assert!(!is_malformed_request(
            r#"{"kind":"BadRequestError","description":"stream not ready"}"#
        ));
        assert!(!is_malformed_request("not json"));
    }

    #[test]
    fn test_ice_server_urls_accept_string_or_list() {
        let servers: Vec<IceServer> = serde_json::from_str(
            r#"[{"urls":"stun:one"},{"urls":["turn:a","turn:b"],"username":"u","credential":"c"}]"#,
        )
        .unwrap();
        assert_eq!(servers[0].urls, vec!["stun:one"]);
        assert_eq!(servers[1].urls.len(), 2);
        assert_eq!(servers[1].username.as_deref(), Some("u"));
    }

    #[test]
    fn test_empty_key_is_config_error() {
        let result = StreamingClient::new(&StreamingConfig::default());
        assert!(matches!(
            result,
            Err(StreamError::Core(alter_core::Error::Config(_)))
        ));
    }

    #[tokio::test]
    async fn test_create_stream() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/talks/streams"))
            // base64("user:pass")
            .and(header("authorization", "Basic dXNlcjpwYXNz"))
            .and(body_partial_json(serde_json::json!({"source_url": "https://img/a.png"})))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "id": "strm_1",
                "session_id": "sess_1",
                "offer": {"type": "offer", "sdp": "v=0"},
                "ice_servers": [{"urls": ["turn:relay"], "username": "u", "credential": "c"}]
            })))
            .mount(&server)
            .await;

        let created = client(&server)
            .create_stream("https://img/a.png", "voice")
            .await
            .unwrap();
        assert_eq!(created.ids, ids());
        assert_eq!(created.offer.sdp, "v=0");
        assert_eq!(created.ice_servers[0].urls, vec!["turn:relay"]);
    }

    #[tokio::test]
    async fn test_create_stream_rejected_image() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/talks/streams"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "kind": "InvalidImageUrlError",
                "description": "source_url is not a valid image"
            })))
            .mount(&server)
            .await;

        let err = client(&server)
            .create_stream("https://img/bad.png", "voice")
            .await
            .unwrap_err();
        assert_eq!(err.connect_failure(), ConnectFailure::AvatarRejected);
    }

    #[tokio::test]
    async fn test_create_stream_server_error_is_protocol() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/talks/streams"))
            .respond_with(ResponseTemplate::new(503).set_body_string("image service down"))
            .mount(&server)
            .await;

        let err = client(&server)
            .create_stream("https://img/a.png", "voice")
            .await
            .unwrap_err();
        assert_eq!(err.connect_failure(), ConnectFailure::Protocol);
    }

    #[tokio::test]
    async fn test_create_stream_unreachable_is_network() {
        let client = StreamingClient::new(&StreamingConfig {
            api_key: "user:pass".to_string(),
            base_url: "http://127.0.0.1:1".to_string(),
            ..Default::default()
        })
        .unwrap();

        let err = client.create_stream("https://img/a.png", "voice").await.unwrap_err();
        assert_eq!(err.connect_failure(), ConnectFailure::Network);
    }

    #[tokio::test]
    async fn test_submit_sdp_and_ice() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/talks/streams/strm_1/sdp"))
            .and(body_partial_json(serde_json::json!({
                "answer": {"type": "answer", "sdp": "v=0"},
                "session_id": "sess_1"
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/talks/streams/strm_1/ice"))
            .and(body_partial_json(serde_json::json!({
                "candidate": "candidate:1",
                "sdpMid": "0",
                "sdpMLineIndex": 0,
                "session_id": "sess_1"
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server);
        client
            .submit_sdp(&ids(), &SessionDescription::answer("v=0"))
            .await
            .unwrap();
        client
            .submit_ice(
                &ids(),
                &IceCandidate {
                    candidate: "candidate:1".to_string(),
                    sdp_mid: Some("0".to_string()),
                    sdp_mline_index: Some(0),
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn talk_retries_three_times_on_400() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/talks/streams/strm_1"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "kind": "BadRequestError",
                "description": "stream not ready"
            })))
            .expect(3)
            .mount(&server)
            .await;

        let client = client(&server);
        let err = talk_with_retry(&client, &ids(), "https://a/x.mp3", "https://img/a.png", fast_retry())
            .await
            .unwrap_err();

        match err {
            StreamError::Talk {
                failure, retryable, ..
            } => {
                assert_eq!(failure, TalkFailure::BadRequest);
                assert!(!retryable);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_talk_validation_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/talks/streams/strm_1"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "kind": "ValidationError",
                "description": "audio_url must be a URL"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let err = talk_with_retry(&client(&server), &ids(), "nope", "https://img/a.png", fast_retry())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StreamError::Talk {
                failure: TalkFailure::BadRequest,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_talk_other_statuses_are_not_retried() {
        for (status, expected) in [
            (402, TalkFailure::PaymentRequired),
            (404, TalkFailure::NotFound),
            (500, TalkFailure::Other),
        ] {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .and(path("/talks/streams/strm_1"))
                .respond_with(ResponseTemplate::new(status))
                .expect(1)
                .mount(&server)
                .await;

            let err = talk_with_retry(&client(&server), &ids(), "https://a/x.mp3", "https://img/a.png", fast_retry())
                .await
                .unwrap_err();
            match err {
                StreamError::Talk { failure, .. } => assert_eq!(failure, expected),
                other => panic!("unexpected error: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_talk_succeeds_after_not_ready() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/talks/streams/strm_1"))
            .respond_with(ResponseTemplate::new(400).set_body_string("not ready"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/talks/streams/strm_1"))
            .and(body_partial_json(serde_json::json!({
                "script": {"type": "audio", "audio_url": "https://a/x.mp3"},
                "session_id": "sess_1"
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        talk_with_retry(&client(&server), &ids(), "https://a/x.mp3", "https://img/a.png", fast_retry())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_delete_stream() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/talks/streams/strm_1"))
            .and(body_partial_json(serde_json::json!({"session_id": "sess_1"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        client(&server).delete_stream(&ids()).await.unwrap();
    }
}
