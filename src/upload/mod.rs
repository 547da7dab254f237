mod coordinator;
mod progress;

pub use coordinator::{UploadCoordinator, UploadError, UploadOutcome};
pub use progress::{UploadProgress, UploadProgressReporter};
