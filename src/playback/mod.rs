mod chapters;
mod engine;
mod format;

pub use chapters::{chapter_index_at, normalize_chapters};
pub use engine::{AudioOutput, PlaybackError, PlaybackPositionEngine, PlaybackState};
pub use format::{format_optional_time, format_time};
