use crate::events::{FilenameEvent, Subscribers};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use tracing::trace;

/// Progress updates while a document is uploaded and handed off for conversion
#[derive(Debug, Clone, PartialEq)]
pub enum UploadProgress {
    Started {
        filename: String,
        total_bytes: u64,
    },
    Progress {
        filename: String,
        percent: u8,
    },
    Uploaded {
        filename: String,
        stored_as: String,
    },
    ConversionStarted {
        filename: String,
        job: String,
    },
    Failed {
        filename: String,
        error: String,
    },
}

impl FilenameEvent for UploadProgress {
    fn filename(&self) -> &str {
        match self {
            UploadProgress::Started { filename, .. }
            | UploadProgress::Progress { filename, .. }
            | UploadProgress::Uploaded { filename, .. }
            | UploadProgress::ConversionStarted { filename, .. }
            | UploadProgress::Failed { filename, .. } => filename,
        }
    }
}

/// Turns byte counts reported by the transport into percent events.
///
/// Percentages only ever go up and each value is published at most once.
pub struct UploadProgressReporter {
    filename: String,
    total_bytes: u64,
    sent_bytes: AtomicU64,
    percent: AtomicU8,
    events: Subscribers<UploadProgress>,
}

impl UploadProgressReporter {
    pub fn new(filename: String, total_bytes: u64, events: Subscribers<UploadProgress>) -> Self {
        Self {
            filename,
            total_bytes,
            sent_bytes: AtomicU64::new(0),
            percent: AtomicU8::new(0),
            events,
        }
    }

    /// Record that `bytes` more were handed to the transport
    pub fn advance(&self, bytes: u64) {
        let sent = self.sent_bytes.fetch_add(bytes, Ordering::SeqCst) + bytes;
        self.publish(calculate_percent(sent, self.total_bytes));
    }

    /// The server accepted the upload, whatever the transport reported
    pub fn finish(&self) {
        self.publish(100);
    }

    pub fn percent(&self) -> u8 {
        self.percent.load(Ordering::SeqCst)
    }

    fn publish(&self, percent: u8) {
        let previous = self.percent.fetch_max(percent, Ordering::SeqCst);
        if percent > previous {
            trace!("Upload of {}: {}%", self.filename, percent);
            self.events.publish(UploadProgress::Progress {
                filename: self.filename.clone(),
                percent,
            });
        }
    }
}

/// Calculate progress percentage
fn calculate_percent(sent: u64, total: u64) -> u8 {
    if total == 0 {
        100
    } else {
        ((sent as f64 / total as f64) * 100.0).min(100.0) as u8
    }
}
