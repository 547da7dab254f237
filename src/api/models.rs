use serde::{Deserialize, Deserializer, Serialize};

/// Library-level status of an audiobook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Converting,
    /// The backend only lists finished files, so a missing status means completed
    #[default]
    Completed,
}

/// One audiobook known to the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudiobookEntry {
    pub filename: String,
    #[serde(default)]
    pub status: EntryStatus,
}

impl AudiobookEntry {
    pub fn converting(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            status: EntryStatus::Converting,
        }
    }

    pub fn completed(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            status: EntryStatus::Completed,
        }
    }
}

/// Job state as reported by `/conversion-status/{filename}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    NotFound,
    /// The backend reports freshly created jobs as `starting`
    #[serde(alias = "starting")]
    Queued,
    Converting,
    Completed,
    Error,
}

impl JobStatus {
    /// Nothing more to learn by polling once one of these is seen
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::NotFound | JobStatus::Error
        )
    }
}

/// Snapshot of a conversion job. Fetched fresh on every poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionStatus {
    #[serde(default)]
    pub filename: String,
    pub status: JobStatus,
    #[serde(default, deserialize_with = "deserialize_percent")]
    pub progress: u8,
    #[serde(default)]
    pub current_chunk: u32,
    #[serde(default)]
    pub total_chunks: u32,
    #[serde(default)]
    pub message: String,
}

impl ConversionStatus {
    pub fn not_found(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            status: JobStatus::NotFound,
            progress: 0,
            current_chunk: 0,
            total_chunks: 0,
            message: String::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Progress is documented as 0-100 but arrives as an arbitrary JSON number;
/// absent or null reads as 0, anything above 100 is clamped.
fn deserialize_percent<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<f64> = Option::deserialize(deserializer)?;
    Ok(match value {
        Some(v) if v.is_finite() => v.clamp(0.0, 100.0) as u8,
        _ => 0,
    })
}

/// A chapter boundary inside the synthesized audio
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub title: String,
    /// Seconds from the start of the audio
    pub timestamp: f64,
}

/// Body of `/chapters/{filename}`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChapterList {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub chapters: Vec<Chapter>,
}

pub const DEFAULT_NARRATOR_VOICE: &str = "en-US-GuyNeural";
pub const DEFAULT_DIALOGUE_VOICE: &str = "en-US-JennyNeural";
pub const DEFAULT_EMPHASIS_VOICE: &str = "en-US-DavisNeural";

/// Voices used for narration. Identifiers are opaque and only the backend validates them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum VoiceSelection {
    Cast {
        #[serde(rename = "narrator_voice_id")]
        narrator: String,
        #[serde(rename = "dialogue_voice_id")]
        dialogue: String,
        #[serde(rename = "emphasis_voice_id")]
        emphasis: String,
    },
    Single {
        #[serde(rename = "voice_id")]
        voice: String,
    },
}

impl Default for VoiceSelection {
    fn default() -> Self {
        VoiceSelection::Cast {
            narrator: DEFAULT_NARRATOR_VOICE.to_string(),
            dialogue: DEFAULT_DIALOGUE_VOICE.to_string(),
            emphasis: DEFAULT_EMPHASIS_VOICE.to_string(),
        }
    }
}

/// Body of `/convert` and `/preview`
#[derive(Debug, Clone, Serialize)]
pub struct ConvertRequest<'a> {
    pub filename: &'a str,
    #[serde(flatten)]
    pub voices: &'a VoiceSelection,
}

/// Body returned by `/upload`
#[derive(Debug, Clone, Deserialize)]
pub struct UploadResponse {
    pub filename: String,
}

/// Body returned by `/convert`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConvertResponse {
    /// Name the finished audiobook will be stored under, when it differs from the upload
    #[serde(default)]
    pub output_filename: Option<String>,
}

/// Inclusive byte range for `/audio` requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    /// Open-ended when `None`
    pub end: Option<u64>,
}

impl ByteRange {
    pub fn from(start: u64) -> Self {
        Self { start, end: None }
    }

    pub fn header_value(&self) -> String {
        match self.end {
            Some(end) => format!("bytes={}-{}", self.start, end),
            None => format!("bytes={}-", self.start),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_header() {
        assert_eq!(ByteRange::from(1024).header_value(), "bytes=1024-");
        let range = ByteRange {
            start: 0,
            end: Some(499),
        };
        assert_eq!(range.header_value(), "bytes=0-499");
    }

    #[test]
    fn test_library_entry_without_status_is_completed() {
        let entries: Vec<AudiobookEntry> = serde_json::from_str(
            r#"[{"filename": "book.mp3", "path": "audiobooks/book.mp3"},
                {"filename": "other.mp3", "status": "converting"}]"#,
        )
        .unwrap();

        assert_eq!(entries[0], AudiobookEntry::completed("book.mp3"));
        assert_eq!(entries[1], AudiobookEntry::converting("other.mp3"));
    }

    #[test]
    fn test_status_defaults_missing_fields() {
        let status: ConversionStatus =
            serde_json::from_str(r#"{"status": "not_found", "progress": 0}"#).unwrap();

        assert_eq!(status.status, JobStatus::NotFound);
        assert_eq!(status.current_chunk, 0);
        assert_eq!(status.total_chunks, 0);
        assert!(status.message.is_empty());
        assert!(status.filename.is_empty());
    }

    #[test]
    fn test_starting_reads_as_queued() {
        let status: ConversionStatus = serde_json::from_str(
            r#"{"status": "starting", "progress": 0, "total_chunks": 0,
                "current_chunk": 0, "message": "Initializing conversion..."}"#,
        )
        .unwrap();

        assert_eq!(status.status, JobStatus::Queued);
        assert!(!status.is_terminal());
    }

    #[test]
    fn test_progress_is_clamped() {
        let status: ConversionStatus =
            serde_json::from_str(r#"{"status": "converting", "progress": 140.5}"#).unwrap();
        assert_eq!(status.progress, 100);

        let status: ConversionStatus =
            serde_json::from_str(r#"{"status": "converting", "progress": null}"#).unwrap();
        assert_eq!(status.progress, 0);
    }

    #[test]
    fn test_voice_selection_wire_format() {
        let cast = VoiceSelection::default();
        let body = serde_json::to_value(ConvertRequest {
            filename: "book.pdf",
            voices: &cast,
        })
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "filename": "book.pdf",
                "narrator_voice_id": "en-US-GuyNeural",
                "dialogue_voice_id": "en-US-JennyNeural",
                "emphasis_voice_id": "en-US-DavisNeural",
            })
        );

        let single = VoiceSelection::Single {
            voice: "ZQe5CZNOzWyzPSCn5a3c".to_string(),
        };
        let body = serde_json::to_value(ConvertRequest {
            filename: "book.pdf",
            voices: &single,
        })
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({"filename": "book.pdf", "voice_id": "ZQe5CZNOzWyzPSCn5a3c"})
        );
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::NotFound.is_terminal());
        assert!(JobStatus::Error.is_terminal());
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Converting.is_terminal());
    }
}
