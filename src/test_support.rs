// Test support utilities for both unit and integration tests

use crate::api::{
    ApiError, AudiobookEntry, ByteRange, ChapterList, ConversionStatus, ConvertResponse,
    ConverterApi, EntryStatus, JobStatus, VoiceSelection,
};
use crate::playback::{AudioOutput, PlaybackError};
use crate::upload::UploadProgressReporter;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Build a status reply
pub fn status(filename: &str, status: JobStatus, progress: u8) -> ConversionStatus {
    ConversionStatus {
        filename: filename.to_string(),
        status,
        progress,
        current_chunk: 0,
        total_chunks: 0,
        message: String::new(),
    }
}

/// A call the mock backend received
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    Library,
    Upload { file_name: String, bytes: usize },
    Convert { filename: String, voices: VoiceSelection },
    Status { filename: String, at: Instant },
    Delete { filename: String },
    Chapters { filename: String },
    Preview { filename: String },
    FetchAudio { filename: String, range: Option<ByteRange> },
}

enum StatusReply {
    Status(ConversionStatus),
    Failure,
}

#[derive(Default)]
struct MockState {
    library: Vec<AudiobookEntry>,
    /// Front is answered next; the last reply repeats
    statuses: HashMap<String, VecDeque<StatusReply>>,
    status_delays: HashMap<String, Duration>,
    chapters: HashMap<String, ChapterList>,
    convert_outputs: HashMap<String, String>,
    audio: HashMap<String, Bytes>,
    calls: Vec<MockCall>,
    refuse_delete: bool,
    fail_library: bool,
    fail_upload: bool,
    fail_convert: bool,
}

/// In-memory conversion backend
///
/// Behaves like the real service where tests rely on it: a started
/// conversion shows up in the library as converting, and a `completed`
/// status reply marks it completed there.
#[derive(Default)]
pub struct MockBackend {
    state: Mutex<MockState>,
}

fn server_error(detail: &str) -> ApiError {
    ApiError::Server {
        status: 503,
        detail: detail.to_string(),
    }
}

impl MockBackend {
    #[allow(unused)] // Used in tests
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_library(&self, entries: Vec<AudiobookEntry>) {
        self.state.lock().unwrap().library = entries;
    }

    pub fn library_entries(&self) -> Vec<AudiobookEntry> {
        self.state.lock().unwrap().library.clone()
    }

    /// Queue a status reply for `filename`
    pub fn push_status(&self, filename: &str, status: ConversionStatus) {
        self.state
            .lock()
            .unwrap()
            .statuses
            .entry(filename.to_string())
            .or_default()
            .push_back(StatusReply::Status(status));
    }

    /// Queue a failed status fetch for `filename`
    pub fn push_status_failure(&self, filename: &str) {
        self.state
            .lock()
            .unwrap()
            .statuses
            .entry(filename.to_string())
            .or_default()
            .push_back(StatusReply::Failure);
    }

    /// Answer status requests for `filename` only after `delay`
    pub fn set_status_delay(&self, filename: &str, delay: Duration) {
        self.state
            .lock()
            .unwrap()
            .status_delays
            .insert(filename.to_string(), delay);
    }

    pub fn set_chapters(&self, filename: &str, chapters: ChapterList) {
        self.state
            .lock()
            .unwrap()
            .chapters
            .insert(filename.to_string(), chapters);
    }

    /// Make `/convert` of `filename` report `output` as its output filename
    pub fn set_convert_output(&self, filename: &str, output: &str) {
        self.state
            .lock()
            .unwrap()
            .convert_outputs
            .insert(filename.to_string(), output.to_string());
    }

    pub fn set_audio(&self, filename: &str, data: Bytes) {
        self.state
            .lock()
            .unwrap()
            .audio
            .insert(filename.to_string(), data);
    }

    pub fn refuse_delete(&self, refuse: bool) {
        self.state.lock().unwrap().refuse_delete = refuse;
    }

    pub fn fail_library(&self, fail: bool) {
        self.state.lock().unwrap().fail_library = fail;
    }

    pub fn fail_upload(&self, fail: bool) {
        self.state.lock().unwrap().fail_upload = fail;
    }

    pub fn fail_convert(&self, fail: bool) {
        self.state.lock().unwrap().fail_convert = fail;
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// When each status request for `filename` arrived
    pub fn status_calls(&self, filename: &str) -> Vec<Instant> {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter_map(|call| match call {
                MockCall::Status { filename: f, at } if f == filename => Some(*at),
                _ => None,
            })
            .collect()
    }

    pub fn status_call_count(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|call| matches!(call, MockCall::Status { .. }))
            .count()
    }

    fn record(&self, call: MockCall) {
        self.state.lock().unwrap().calls.push(call);
    }

    fn next_status(&self, filename: &str) -> Result<ConversionStatus, ApiError> {
        let mut state = self.state.lock().unwrap();

        let reply = match state.statuses.get_mut(filename) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().map(|reply| match reply {
                StatusReply::Status(status) => StatusReply::Status(status.clone()),
                StatusReply::Failure => StatusReply::Failure,
            }),
            None => None,
        };

        match reply {
            Some(StatusReply::Status(status)) => {
                if status.status == JobStatus::Completed {
                    if let Some(entry) = state.library.iter_mut().find(|e| e.filename == filename)
                    {
                        entry.status = EntryStatus::Completed;
                    }
                }
                Ok(status)
            }
            Some(StatusReply::Failure) => Err(server_error("status unavailable")),
            None => Ok(ConversionStatus::not_found(filename)),
        }
    }
}

#[async_trait::async_trait]
impl ConverterApi for MockBackend {
    async fn library(&self) -> Result<Vec<AudiobookEntry>, ApiError> {
        self.record(MockCall::Library);
        let state = self.state.lock().unwrap();
        if state.fail_library {
            return Err(server_error("library unavailable"));
        }
        Ok(state.library.clone())
    }

    async fn upload(
        &self,
        file_name: &str,
        data: Bytes,
        progress: Arc<UploadProgressReporter>,
    ) -> Result<String, ApiError> {
        self.record(MockCall::Upload {
            file_name: file_name.to_string(),
            bytes: data.len(),
        });
        if self.state.lock().unwrap().fail_upload {
            return Err(server_error("upload rejected"));
        }

        // Report in a few pieces, the way a streamed body would
        let piece = (data.len() / 4).max(1);
        for chunk in data.chunks(piece) {
            progress.advance(chunk.len() as u64);
        }
        Ok(file_name.to_string())
    }

    async fn convert(
        &self,
        filename: &str,
        voices: &VoiceSelection,
    ) -> Result<ConvertResponse, ApiError> {
        self.record(MockCall::Convert {
            filename: filename.to_string(),
            voices: voices.clone(),
        });

        let mut state = self.state.lock().unwrap();
        if state.fail_convert {
            return Err(server_error("converter busy"));
        }

        let output = state.convert_outputs.get(filename).cloned();
        let job = output.clone().unwrap_or_else(|| filename.to_string());
        state.library.retain(|e| e.filename != job);
        state.library.push(AudiobookEntry::converting(job));

        Ok(ConvertResponse {
            output_filename: output,
        })
    }

    async fn conversion_status(&self, filename: &str) -> Result<ConversionStatus, ApiError> {
        self.record(MockCall::Status {
            filename: filename.to_string(),
            at: Instant::now(),
        });

        let delay = self.state.lock().unwrap().status_delays.get(filename).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.next_status(filename)
    }

    async fn delete_audiobook(&self, filename: &str) -> Result<(), ApiError> {
        self.record(MockCall::Delete {
            filename: filename.to_string(),
        });

        let mut state = self.state.lock().unwrap();
        if state.refuse_delete {
            return Err(ApiError::Delete {
                filename: filename.to_string(),
                detail: "File is in use".to_string(),
            });
        }
        state.library.retain(|e| e.filename != filename);
        Ok(())
    }

    async fn chapters(&self, filename: &str) -> Result<ChapterList, ApiError> {
        self.record(MockCall::Chapters {
            filename: filename.to_string(),
        });
        Ok(self
            .state
            .lock()
            .unwrap()
            .chapters
            .get(filename)
            .cloned()
            .unwrap_or_default())
    }

    async fn preview(&self, filename: &str, _voices: &VoiceSelection) -> Result<Bytes, ApiError> {
        self.record(MockCall::Preview {
            filename: filename.to_string(),
        });
        Ok(Bytes::from_static(b"ID3preview"))
    }

    fn audio_url(&self, filename: &str) -> String {
        format!("mock://audio/{}", filename)
    }

    async fn fetch_audio(
        &self,
        filename: &str,
        range: Option<ByteRange>,
    ) -> Result<Bytes, ApiError> {
        self.record(MockCall::FetchAudio {
            filename: filename.to_string(),
            range,
        });

        let data = self
            .state
            .lock()
            .unwrap()
            .audio
            .get(filename)
            .cloned()
            .ok_or_else(|| ApiError::Server {
                status: 404,
                detail: "Audio file not found".to_string(),
            })?;

        Ok(match range {
            Some(range) => {
                let len = data.len() as u64;
                let start = range.start.min(len) as usize;
                let end = range.end.map_or(len, |end| (end + 1).min(len)) as usize;
                data.slice(start..end.max(start))
            }
            None => data,
        })
    }
}

/// A call made on [`RecordingOutput`]
#[derive(Debug, Clone, PartialEq)]
pub enum OutputCall {
    Play,
    Pause,
    Seek(f64),
    Stop,
}

#[derive(Default)]
struct RecordingState {
    calls: Vec<OutputCall>,
    fail_next: Option<String>,
}

/// Audio output that records what it is asked to do
///
/// Clones share their record, so a test can keep one while the engine owns another.
#[derive(Clone, Default)]
pub struct RecordingOutput {
    state: Arc<Mutex<RecordingState>>,
}

impl RecordingOutput {
    #[allow(unused)] // Used in tests
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<OutputCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Make the next play, pause or seek fail with `message`
    pub fn fail_next(&self, message: &str) {
        self.state.lock().unwrap().fail_next = Some(message.to_string());
    }

    fn call(&self, call: OutputCall) -> Result<(), PlaybackError> {
        let mut state = self.state.lock().unwrap();
        if let Some(message) = state.fail_next.take() {
            return Err(PlaybackError::Output(message));
        }
        state.calls.push(call);
        Ok(())
    }
}

impl AudioOutput for RecordingOutput {
    fn play(&mut self) -> Result<(), PlaybackError> {
        self.call(OutputCall::Play)
    }

    fn pause(&mut self) -> Result<(), PlaybackError> {
        self.call(OutputCall::Pause)
    }

    fn seek(&mut self, position: f64) -> Result<(), PlaybackError> {
        self.call(OutputCall::Seek(position))
    }

    fn stop(&mut self) {
        self.state.lock().unwrap().calls.push(OutputCall::Stop);
    }
}
