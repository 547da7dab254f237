use crate::api::models::{
    AudiobookEntry, ByteRange, ChapterList, ConversionStatus, ConvertRequest, ConvertResponse,
    UploadResponse, VoiceSelection,
};
use crate::api::path::filename_path;
use crate::api::ConverterApi;
use crate::config::Config;
use crate::upload::UploadProgressReporter;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Size of the pieces an upload body is streamed in. Progress advances once per piece.
const UPLOAD_PIECE_BYTES: usize = 64 * 1024;

const USER_AGENT: &str = concat!("narrator/", env!("CARGO_PKG_VERSION"));

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Server error {status}: {detail}")]
    Server { status: u16, detail: String },
    #[error("Server refused to delete {filename}: {detail}")]
    Delete { filename: String, detail: String },
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl ApiError {
    /// Transport-level failure (unreachable, timeout, connection reset)
    pub fn is_network(&self) -> bool {
        matches!(self, ApiError::Network(_))
    }
}

/// FastAPI wraps error messages as `{"detail": "..."}`
#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: serde_json::Value,
}

/// HTTP client for the conversion backend
#[derive(Clone, Debug)]
pub struct ConverterClient {
    client: Client,
    base_url: String,
}

impl ConverterClient {
    /// Create a client for `base_url`. Every request fails fast after `timeout`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, ApiError> {
        Self::new(&config.api_url, config.request_timeout)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn json_body<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Turn a non-2xx response into its detail message
async fn error_detail(response: Response) -> (StatusCode, String) {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();

    let detail = match serde_json::from_str::<ErrorBody>(&text) {
        Ok(ErrorBody {
            detail: serde_json::Value::String(detail),
        }) => detail,
        Ok(ErrorBody { detail }) => detail.to_string(),
        Err(_) if !text.trim().is_empty() => text,
        Err(_) => status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_string(),
    };

    (status, detail)
}

async fn server_error(response: Response) -> ApiError {
    let (status, detail) = error_detail(response).await;
    warn!("✗ Backend returned {}: {}", status, detail);
    ApiError::Server {
        status: status.as_u16(),
        detail,
    }
}

#[async_trait::async_trait]
impl ConverterApi for ConverterClient {
    async fn library(&self) -> Result<Vec<AudiobookEntry>, ApiError> {
        let response = self.client.get(self.url("/library")).send().await?;

        if !response.status().is_success() {
            return Err(server_error(response).await);
        }

        let entries: Vec<AudiobookEntry> = Self::json_body(response).await?;
        debug!("Library lists {} audiobook(s)", entries.len());
        Ok(entries)
    }

    async fn upload(
        &self,
        file_name: &str,
        data: Bytes,
        progress: Arc<UploadProgressReporter>,
    ) -> Result<String, ApiError> {
        if file_name.is_empty() {
            return Err(ApiError::InvalidInput(
                "Upload needs a file name".to_string(),
            ));
        }

        let total = data.len() as u64;
        let pieces: Vec<Bytes> = (0..data.len())
            .step_by(UPLOAD_PIECE_BYTES)
            .map(|start| data.slice(start..(start + UPLOAD_PIECE_BYTES).min(data.len())))
            .collect();

        let body = futures::stream::iter(pieces).map(move |piece| {
            progress.advance(piece.len() as u64);
            Ok::<_, std::io::Error>(piece)
        });

        let part = Part::stream_with_length(Body::wrap_stream(body), total)
            .file_name(file_name.to_string());
        let form = Form::new().part("file", part);

        let response = self
            .client
            .post(self.url("/upload"))
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(server_error(response).await);
        }

        let uploaded: UploadResponse = Self::json_body(response).await?;
        Ok(uploaded.filename)
    }

    async fn convert(
        &self,
        filename: &str,
        voices: &VoiceSelection,
    ) -> Result<ConvertResponse, ApiError> {
        let response = self
            .client
            .post(self.url("/convert"))
            .json(&ConvertRequest { filename, voices })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(server_error(response).await);
        }

        // An empty ack is valid
        let bytes = response.bytes().await?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(ConvertResponse::default());
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn conversion_status(&self, filename: &str) -> Result<ConversionStatus, ApiError> {
        let response = self
            .client
            .get(self.url(&filename_path("/conversion-status", filename)))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(ConversionStatus::not_found(filename));
        }
        if !response.status().is_success() {
            return Err(server_error(response).await);
        }

        let mut status: ConversionStatus = Self::json_body(response).await?;
        if status.filename.is_empty() {
            status.filename = filename.to_string();
        }
        Ok(status)
    }

    async fn delete_audiobook(&self, filename: &str) -> Result<(), ApiError> {
        let response = self
            .client
            .delete(self.url(&filename_path("/audiobook", filename)))
            .send()
            .await?;

        if !response.status().is_success() {
            let (status, detail) = error_detail(response).await;
            warn!("✗ Delete of {} refused ({}): {}", filename, status, detail);
            return Err(ApiError::Delete {
                filename: filename.to_string(),
                detail,
            });
        }

        Ok(())
    }

    async fn chapters(&self, filename: &str) -> Result<ChapterList, ApiError> {
        let response = self
            .client
            .get(self.url(&filename_path("/chapters", filename)))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(ChapterList::default());
        }
        if !response.status().is_success() {
            return Err(server_error(response).await);
        }

        Self::json_body(response).await
    }

    async fn preview(&self, filename: &str, voices: &VoiceSelection) -> Result<Bytes, ApiError> {
        let response = self
            .client
            .post(self.url("/preview"))
            .json(&ConvertRequest { filename, voices })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(server_error(response).await);
        }

        Ok(response.bytes().await?)
    }

    fn audio_url(&self, filename: &str) -> String {
        self.url(&filename_path("/audio", filename))
    }

    async fn fetch_audio(
        &self,
        filename: &str,
        range: Option<ByteRange>,
    ) -> Result<Bytes, ApiError> {
        let mut request = self.client.get(self.audio_url(filename));
        if let Some(range) = range {
            request = request.header(reqwest::header::RANGE, range.header_value());
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(server_error(response).await);
        }

        Ok(response.bytes().await?)
    }
}
