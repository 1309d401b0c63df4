//! File upload client
//!
//! Audio and avatar images must be reachable by the streaming service, so
//! they are pushed to an upload endpoint that answers with a public URL.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::UploadConfig;
use crate::error::{Error, Result};

/// Stores bytes somewhere public
#[async_trait]
pub trait FileUploader: Send + Sync {
    /// Upload and return the public URL
    async fn upload(&self, data: Vec<u8>, file_name: &str, content_type: &str) -> Result<String>;

    /// Whether a URL is already served by our own storage
    fn is_hosted(&self, url: &str) -> bool;

    /// Download an external file and upload it again
    async fn rehost_url(&self, url: &str) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    url: String,
}

/// Multipart upload over HTTP
pub struct HttpUploader {
    client: Client,
    config: UploadConfig,
}

impl HttpUploader {
    pub fn new(config: UploadConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(Error::Http)?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl FileUploader for HttpUploader {
    async fn upload(&self, data: Vec<u8>, file_name: &str, content_type: &str) -> Result<String> {
        let size = data.len();
        let part = reqwest::multipart::Part::bytes(data)
            .file_name(file_name.to_string())
            .mime_str(content_type)
            .map_err(|e| Error::Upload(format!("invalid content type {}: {}", content_type, e)))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let mut request = self.client.post(&self.config.endpoint).multipart(form);
        if let Some(token) = &self.config.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Upload failed: {} - {}", status, body);
            return Err(Error::Upload(format!("status {}", status)));
        }

        let parsed: UploadResponse = response
            .json()
            .await
            .map_err(|e| Error::Upload(format!("malformed upload response: {}", e)))?;
        info!("Uploaded {} ({} bytes)", file_name, size);
        Ok(parsed.url)
    }

    fn is_hosted(&self, url: &str) -> bool {
        let base = self.config.public_base_url.trim();
        !base.is_empty() && url.starts_with(base)
    }

    async fn rehost_url(&self, url: &str) -> Result<String> {
        debug!("Re-hosting {}", url);
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Upload(format!("download of {} failed: {}", url, status)));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<mime::Mime>().ok())
            .map(|m| m.essence_str().to_string())
            .unwrap_or_else(|| guess_content_type(url).to_string());
        let data = response.bytes().await?.to_vec();

        self.upload(data, &file_name_for(url, &content_type), &content_type)
            .await
    }
}

/// Content type from a file name or URL extension
pub fn guess_content_type(name: &str) -> &'static str {
    let path = name.split(['?', '#']).next().unwrap_or(name);
    let ext = path.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        _ => "application/octet-stream",
    }
}

fn file_name_for(url: &str, content_type: &str) -> String {
    let ext = match content_type {
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "audio/mpeg" => "mp3",
        _ => "bin",
    };
    let stem = url
        .split(['?', '#'])
        .next()
        .and_then(|p| p.rsplit('/').next())
        .and_then(|last| last.split('.').next())
        .filter(|s| !s.is_empty())
        .unwrap_or("file");
    format!("{}.{}", stem, ext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn uploader(server: &MockServer) -> HttpUploader {
        HttpUploader::new(UploadConfig {
            endpoint: format!("{}/api/upload", server.uri()),
            public_base_url: "https://cdn.example.com/u/".to_string(),
            token: Some("secret".to_string()),
        })
        .unwrap()
    }

    #[test]
    fn test_guess_content_type() {
        assert_eq!(guess_content_type("face.PNG"), "image/png");
        assert_eq!(guess_content_type("https://x/y/face.jpeg?v=2"), "image/jpeg");
        assert_eq!(guess_content_type("speech.mp3"), "audio/mpeg");
        assert_eq!(guess_content_type("noext"), "application/octet-stream");
    }

    #[test]
    fn test_file_name_for() {
        assert_eq!(file_name_for("https://x/a/face.png?x=1", "image/png"), "face.png");
        assert_eq!(file_name_for("https://x/", "image/jpeg"), "file.jpg");
    }

    #[tokio::test]
    async fn test_is_hosted_uses_prefix() {
        let server = MockServer::start().await;
        let uploader = uploader(&server);
        assert!(uploader.is_hosted("https://cdn.example.com/u/abc.png"));
        assert!(!uploader.is_hosted("https://elsewhere.example.com/abc.png"));
    }

    #[tokio::test]
    async fn test_upload_returns_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/upload"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "url": "https://cdn.example.com/u/speech.mp3"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let url = uploader(&server)
            .upload(vec![1, 2, 3], "speech.mp3", "audio/mpeg")
            .await
            .unwrap();
        assert_eq!(url, "https://cdn.example.com/u/speech.mp3");
    }

    #[tokio::test]
    async fn test_upload_failure_is_upload_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/upload"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let result = uploader(&server).upload(vec![0], "a.png", "image/png").await;
        assert!(matches!(result, Err(Error::Upload(_))));
    }

    #[tokio::test]
    async fn test_rehost_downloads_then_uploads() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/images/face.png"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/png")
                    .set_body_bytes(vec![137, 80, 78, 71]),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/upload"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "url": "https://cdn.example.com/u/face.png"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let url = uploader(&server)
            .rehost_url(&format!("{}/images/face.png", server.uri()))
            .await
            .unwrap();
        assert_eq!(url, "https://cdn.example.com/u/face.png");
    }
}
