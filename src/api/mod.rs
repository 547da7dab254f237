// # Backend API
//
// Typed access to the conversion service's HTTP surface.
//
// - `ConverterApi`: the trait every caller depends on (mocked in tests)
// - `ConverterClient`: reqwest implementation
// - `models`: wire types shared by both
// - `path`: percent-encoding of filename path segments

pub mod client;
pub mod models;
pub mod path;

pub use client::{ApiError, ConverterClient};
pub use models::{
    AudiobookEntry, ByteRange, Chapter, ChapterList, ConversionStatus, ConvertResponse,
    EntryStatus, JobStatus, VoiceSelection,
};

use crate::upload::UploadProgressReporter;
use bytes::Bytes;
use std::sync::Arc;

/// Operations the conversion backend offers (allows mocking for tests)
#[async_trait::async_trait]
pub trait ConverterApi: Send + Sync {
    /// Full snapshot of the library
    async fn library(&self) -> Result<Vec<AudiobookEntry>, ApiError>;

    /// Upload a source document, reporting bytes handed to the transport.
    /// Returns the filename the backend stored it under.
    async fn upload(
        &self,
        file_name: &str,
        data: Bytes,
        progress: Arc<UploadProgressReporter>,
    ) -> Result<String, ApiError>;

    /// Start an asynchronous conversion job
    async fn convert(
        &self,
        filename: &str,
        voices: &VoiceSelection,
    ) -> Result<ConvertResponse, ApiError>;

    /// Current job status. An unknown job is reported as `not_found`, never as an error.
    async fn conversion_status(&self, filename: &str) -> Result<ConversionStatus, ApiError>;

    /// Remove a stored audiobook
    async fn delete_audiobook(&self, filename: &str) -> Result<(), ApiError>;

    /// Chapter boundaries. An audiobook without detected chapters yields an empty list.
    async fn chapters(&self, filename: &str) -> Result<ChapterList, ApiError>;

    /// Short voice sample for a document, not persisted by the backend
    async fn preview(&self, filename: &str, voices: &VoiceSelection) -> Result<Bytes, ApiError>;

    /// Streaming URL of an audiobook, for players that issue their own range requests
    fn audio_url(&self, filename: &str) -> String;

    /// Audio bytes, optionally a byte range of them
    async fn fetch_audio(&self, filename: &str, range: Option<ByteRange>)
        -> Result<Bytes, ApiError>;
}
