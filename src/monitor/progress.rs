use crate::api::ConversionStatus;
use crate::events::FilenameEvent;

/// Conversion progress updates published by the monitor
#[derive(Debug, Clone, PartialEq)]
pub enum ConversionProgress {
    /// Polling began for this filename
    Started { filename: String },
    /// A status response was applied to the library
    Status { status: ConversionStatus },
    /// A status fetch failed; the previous status still stands
    PollFailed { filename: String, error: String },
    /// A terminal status ended polling
    Finished { status: ConversionStatus },
    /// Polling stopped before a terminal status (deleted, stopped or torn down)
    Cancelled { filename: String },
}

impl FilenameEvent for ConversionProgress {
    fn filename(&self) -> &str {
        match self {
            ConversionProgress::Started { filename }
            | ConversionProgress::PollFailed { filename, .. }
            | ConversionProgress::Cancelled { filename } => filename,
            ConversionProgress::Status { status } | ConversionProgress::Finished { status } => {
                &status.filename
            }
        }
    }
}
