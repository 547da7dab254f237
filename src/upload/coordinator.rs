use crate::api::{ApiError, ConverterApi, VoiceSelection};
use crate::events::Subscribers;
use crate::library::LibraryStore;
use crate::monitor::MonitorHandle;
use crate::upload::progress::{UploadProgress, UploadProgressReporter};
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc as tokio_mpsc;
use tracing::{error, info};

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Not a file path: {0:?}")]
    InvalidPath(PathBuf),
    #[error("Upload failed: {0}")]
    Upload(#[source] ApiError),
    #[error("Conversion could not be started: {0}")]
    Convert(#[source] ApiError),
}

/// What a successful upload produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    /// Name the backend stored the document under
    pub uploaded: String,
    /// Key the conversion job is tracked by
    pub job: String,
}

/// Sends documents to the backend and starts their conversion
#[derive(Clone)]
pub struct UploadCoordinator {
    api: Arc<dyn ConverterApi>,
    store: LibraryStore,
    monitor: MonitorHandle,
    events: Subscribers<UploadProgress>,
}

impl UploadCoordinator {
    pub fn new(api: Arc<dyn ConverterApi>, store: LibraryStore, monitor: MonitorHandle) -> Self {
        Self {
            api,
            store,
            monitor,
            events: Subscribers::new(),
        }
    }

    /// Subscribe to progress of every upload
    pub fn subscribe(&self) -> tokio_mpsc::UnboundedReceiver<UploadProgress> {
        self.events.subscribe_all()
    }

    /// Read a document from disk, upload it and start its conversion
    pub async fn upload_file(
        &self,
        path: &Path,
        voices: &VoiceSelection,
    ) -> Result<UploadOutcome, UploadError> {
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| UploadError::InvalidPath(path.to_path_buf()))?
            .to_string();

        let data = tokio::fs::read(path)
            .await
            .map_err(|source| UploadError::Io {
                path: path.to_path_buf(),
                source,
            })?;

        self.upload_bytes(&file_name, Bytes::from(data), voices)
            .await
    }

    /// Upload a document and start its conversion.
    ///
    /// Nothing is recorded in the library unless both steps succeed.
    pub async fn upload_bytes(
        &self,
        file_name: &str,
        data: Bytes,
        voices: &VoiceSelection,
    ) -> Result<UploadOutcome, UploadError> {
        let total_bytes = data.len() as u64;
        info!("Uploading {} ({} bytes)", file_name, total_bytes);

        self.events.publish(UploadProgress::Started {
            filename: file_name.to_string(),
            total_bytes,
        });

        let reporter = Arc::new(UploadProgressReporter::new(
            file_name.to_string(),
            total_bytes,
            self.events.clone(),
        ));

        let uploaded = match self.api.upload(file_name, data, reporter.clone()).await {
            Ok(uploaded) => uploaded,
            Err(e) => {
                error!("Upload of {} failed: {}", file_name, e);
                self.fail(file_name, &e);
                return Err(UploadError::Upload(e));
            }
        };
        reporter.finish();

        self.events.publish(UploadProgress::Uploaded {
            filename: file_name.to_string(),
            stored_as: uploaded.clone(),
        });

        let response = match self.api.convert(&uploaded, voices).await {
            Ok(response) => response,
            Err(e) => {
                error!("Starting conversion of {} failed: {}", uploaded, e);
                self.fail(file_name, &e);
                return Err(UploadError::Convert(e));
            }
        };

        let job = response.output_filename.unwrap_or_else(|| uploaded.clone());
        self.store.begin_conversion(&job).await;
        self.monitor.watch(&job);

        info!("Conversion of {} started as {}", uploaded, job);
        self.events.publish(UploadProgress::ConversionStarted {
            filename: file_name.to_string(),
            job: job.clone(),
        });

        Ok(UploadOutcome { uploaded, job })
    }

    fn fail(&self, file_name: &str, error: &ApiError) {
        self.events.publish(UploadProgress::Failed {
            filename: file_name.to_string(),
            error: error.to_string(),
        });
    }
}
