use crate::api::Chapter;
use crate::playback::chapters::{chapter_index_at, normalize_chapters};
use crate::playback::format::{format_optional_time, format_time};
use thiserror::Error;
use tracing::{debug, warn};

/// Title shown when no chapter applies
const FALLBACK_TITLE: &str = "Audiobook";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlaybackError {
    #[error("Audio output error: {0}")]
    Output(String),
    #[error("Invalid position: {0}")]
    InvalidPosition(f64),
    #[error("Chapter {index} out of range ({count} chapters)")]
    ChapterOutOfRange { index: usize, count: usize },
    #[error("Duration not known yet")]
    DurationUnknown,
}

/// The device or element that actually renders audio
pub trait AudioOutput: Send {
    fn play(&mut self) -> Result<(), PlaybackError>;
    fn pause(&mut self) -> Result<(), PlaybackError>;
    /// Move the read position to `position` seconds
    fn seek(&mut self, position: f64) -> Result<(), PlaybackError>;
    fn stop(&mut self);
}

/// Current playback state
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackState {
    /// Seconds from the start
    pub current_time: f64,
    /// `None` until the audio's length is known
    pub duration: Option<f64>,
    pub current_chapter_index: usize,
    pub is_playing: bool,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            current_time: 0.0,
            duration: None,
            current_chapter_index: 0,
            is_playing: false,
        }
    }
}

/// Owns the playback clock of one audiobook and maps it onto chapters
///
/// Every seek is clamped into `[0, duration]`. Output failures stop playback
/// and leave `current_time` where it was.
pub struct PlaybackPositionEngine {
    filename: String,
    title: Option<String>,
    chapters: Vec<Chapter>,
    state: PlaybackState,
    output: Box<dyn AudioOutput>,
}

impl PlaybackPositionEngine {
    pub fn new(filename: String, chapters: Vec<Chapter>, output: Box<dyn AudioOutput>) -> Self {
        Self {
            filename,
            title: None,
            chapters: normalize_chapters(chapters),
            state: PlaybackState::default(),
            output,
        }
    }

    pub fn with_title(mut self, title: Option<String>) -> Self {
        self.title = title;
        self
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Book title as reported alongside the chapters, else the filename
    pub fn title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.filename)
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn chapters(&self) -> &[Chapter] {
        &self.chapters
    }

    /// Chapter navigation only makes sense with at least one chapter
    pub fn has_chapters(&self) -> bool {
        !self.chapters.is_empty()
    }

    pub fn current_chapter(&self) -> Option<&Chapter> {
        self.chapters.get(self.state.current_chapter_index)
    }

    pub fn current_chapter_title(&self) -> &str {
        self.current_chapter()
            .map(|chapter| chapter.title.as_str())
            .unwrap_or(FALLBACK_TITLE)
    }

    /// Share of the track already played, 0 while the duration is unknown
    pub fn progress_fraction(&self) -> f64 {
        match self.state.duration {
            Some(duration) => (self.state.current_time / duration).clamp(0.0, 1.0),
            None => 0.0,
        }
    }

    pub fn elapsed_label(&self) -> String {
        format_time(self.state.current_time)
    }

    pub fn duration_label(&self) -> String {
        format_optional_time(self.state.duration)
    }

    /// The audio's metadata arrived. Zero, negative and non-finite lengths count as unknown.
    ///
    /// A position past the new end is pulled back to it.
    pub fn on_duration_known(&mut self, duration: f64) {
        self.state.duration = (duration.is_finite() && duration > 0.0).then_some(duration);
        self.state.current_time = self.clamp_time(self.state.current_time);
        self.update_chapter();
        debug!(
            "Duration of {}: {}",
            self.filename,
            format_optional_time(self.state.duration)
        );
    }

    /// Playback clock tick. Returns the new chapter index when it changed.
    pub fn on_time_tick(&mut self, time: f64) -> Option<usize> {
        if !time.is_finite() {
            return None;
        }

        self.state.current_time = self.clamp_time(time);
        self.update_chapter()
    }

    /// Jump to `time` seconds and resume playback
    pub fn seek_absolute(&mut self, time: f64) -> Result<(), PlaybackError> {
        self.seek(time)?;
        self.resume()
    }

    /// Move by `delta` seconds, e.g. the ±30s skip buttons. Play/pause state is kept.
    pub fn seek_relative(&mut self, delta: f64) -> Result<(), PlaybackError> {
        if !delta.is_finite() {
            return Err(PlaybackError::InvalidPosition(delta));
        }
        self.seek(self.state.current_time + delta)
    }

    pub fn seek_to_chapter(&mut self, index: usize) -> Result<(), PlaybackError> {
        let timestamp = self
            .chapters
            .get(index)
            .map(|chapter| chapter.timestamp)
            .ok_or(PlaybackError::ChapterOutOfRange {
                index,
                count: self.chapters.len(),
            })?;

        self.seek_absolute(timestamp)
    }

    /// Seek to a share of the track, as a click on the progress bar does
    pub fn seek_fraction(&mut self, fraction: f64) -> Result<(), PlaybackError> {
        let duration = self.state.duration.ok_or(PlaybackError::DurationUnknown)?;
        if !fraction.is_finite() {
            return Err(PlaybackError::InvalidPosition(fraction));
        }
        self.seek(fraction.clamp(0.0, 1.0) * duration)
    }

    /// Start playback from the current position
    pub fn play(&mut self) -> Result<(), PlaybackError> {
        self.resume()
    }

    /// Flip between playing and paused. Playing at the end of the track does not rewind.
    pub fn toggle(&mut self) -> Result<bool, PlaybackError> {
        if self.state.is_playing {
            if let Err(e) = self.output.pause() {
                return Err(self.fail(e));
            }
            self.state.is_playing = false;
        } else {
            self.resume()?;
        }
        Ok(self.state.is_playing)
    }

    /// The output reached the end of the audio
    pub fn on_ended(&mut self) {
        self.state.is_playing = false;
    }

    /// The output failed on its own, e.g. a decode error mid-stream
    pub fn on_error(&mut self, error: PlaybackError) {
        self.fail(error);
    }

    pub fn stop(&mut self) {
        self.output.stop();
        self.state.is_playing = false;
    }

    fn seek(&mut self, time: f64) -> Result<(), PlaybackError> {
        if !time.is_finite() {
            return Err(PlaybackError::InvalidPosition(time));
        }

        let target = self.clamp_time(time);
        if let Err(e) = self.output.seek(target) {
            return Err(self.fail(e));
        }

        self.state.current_time = target;
        self.update_chapter();
        Ok(())
    }

    fn resume(&mut self) -> Result<(), PlaybackError> {
        if let Err(e) = self.output.play() {
            return Err(self.fail(e));
        }
        self.state.is_playing = true;
        Ok(())
    }

    fn fail(&mut self, error: PlaybackError) -> PlaybackError {
        warn!("Playback of {} failed: {}", self.filename, error);
        self.state.is_playing = false;
        error
    }

    fn clamp_time(&self, time: f64) -> f64 {
        let time = time.max(0.0);
        match self.state.duration {
            Some(duration) => time.min(duration),
            None => time,
        }
    }

    fn update_chapter(&mut self) -> Option<usize> {
        let index = chapter_index_at(&self.chapters, self.state.current_time);
        if index == self.state.current_chapter_index {
            return None;
        }
        self.state.current_chapter_index = index;
        Some(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{OutputCall, RecordingOutput};

    fn two_chapters() -> Vec<Chapter> {
        vec![
            Chapter {
                title: "Ch1".to_string(),
                timestamp: 0.0,
            },
            Chapter {
                title: "Ch2".to_string(),
                timestamp: 120.0,
            },
        ]
    }

    fn engine_with(chapters: Vec<Chapter>, duration: f64) -> (PlaybackPositionEngine, RecordingOutput) {
        let output = RecordingOutput::new();
        let mut engine =
            PlaybackPositionEngine::new("book.mp3".to_string(), chapters, Box::new(output.clone()));
        engine.on_duration_known(duration);
        (engine, output)
    }

    #[test]
    fn test_tick_tracks_chapter_boundaries() {
        let (mut engine, _output) = engine_with(two_chapters(), 600.0);

        assert_eq!(engine.on_time_tick(119.0), None);
        assert_eq!(engine.state().current_chapter_index, 0);
        assert_eq!(engine.current_chapter_title(), "Ch1");

        assert_eq!(engine.on_time_tick(120.0), Some(1));
        assert_eq!(engine.current_chapter_title(), "Ch2");

        assert_eq!(engine.on_time_tick(30.0), Some(0));
    }

    #[test]
    fn test_seeks_stay_within_track() {
        let (mut engine, _output) = engine_with(two_chapters(), 600.0);

        let deltas = [-1e9, -30.0, -0.5, 0.0, 0.5, 30.0, 599.0, 601.0, 1e12];
        for start in [0.0, 1.0, 300.0, 599.5, 600.0] {
            for delta in deltas {
                engine.seek_absolute(start).unwrap();
                engine.seek_relative(delta).unwrap();
                let time = engine.state().current_time;
                assert!(
                    (0.0..=600.0).contains(&time),
                    "start {} delta {} gave {}",
                    start,
                    delta,
                    time
                );
            }
        }

        engine.seek_absolute(-50.0).unwrap();
        assert_eq!(engine.state().current_time, 0.0);
        engine.seek_absolute(10_000.0).unwrap();
        assert_eq!(engine.state().current_time, 600.0);
    }

    #[test]
    fn test_seek_absolute_resumes_but_skip_keeps_pause() {
        let (mut engine, output) = engine_with(two_chapters(), 600.0);

        engine.seek_relative(30.0).unwrap();
        assert!(!engine.state().is_playing);

        engine.seek_absolute(200.0).unwrap();
        assert!(engine.state().is_playing);
        assert_eq!(engine.state().current_chapter_index, 1);
        assert_eq!(
            output.calls(),
            vec![OutputCall::Seek(30.0), OutputCall::Seek(200.0), OutputCall::Play]
        );
    }

    #[test]
    fn test_seek_to_chapter() {
        let (mut engine, _output) = engine_with(two_chapters(), 600.0);

        engine.seek_to_chapter(1).unwrap();
        assert_eq!(engine.state().current_time, 120.0);
        assert_eq!(engine.state().current_chapter_index, 1);
        assert!(engine.state().is_playing);

        let err = engine.seek_to_chapter(2).unwrap_err();
        assert_eq!(err, PlaybackError::ChapterOutOfRange { index: 2, count: 2 });
        assert_eq!(engine.state().current_time, 120.0);
    }

    #[test]
    fn test_toggle_at_end_does_not_rewind() {
        let (mut engine, _output) = engine_with(two_chapters(), 600.0);

        engine.seek_absolute(600.0).unwrap();
        engine.on_ended();
        assert!(!engine.state().is_playing);

        assert!(engine.toggle().unwrap());
        assert_eq!(engine.state().current_time, 600.0);
        assert!(!engine.toggle().unwrap());
    }

    #[test]
    fn test_output_failure_pauses_and_keeps_time() {
        let (mut engine, output) = engine_with(two_chapters(), 600.0);
        engine.seek_absolute(50.0).unwrap();

        output.fail_next("decoder gave up");
        let err = engine.seek_absolute(300.0).unwrap_err();

        assert_eq!(err, PlaybackError::Output("decoder gave up".to_string()));
        assert!(!engine.state().is_playing);
        assert_eq!(engine.state().current_time, 50.0);

        engine.play().unwrap();
        engine.on_error(PlaybackError::Output("stream reset".to_string()));
        assert!(!engine.state().is_playing);
        assert_eq!(engine.state().current_time, 50.0);
    }

    #[test]
    fn test_non_finite_input_is_rejected() {
        let (mut engine, _output) = engine_with(two_chapters(), 600.0);
        engine.seek_absolute(42.0).unwrap();

        assert!(engine.seek_absolute(f64::NAN).is_err());
        assert!(engine.seek_relative(f64::INFINITY).is_err());
        assert_eq!(engine.on_time_tick(f64::NAN), None);
        assert_eq!(engine.state().current_time, 42.0);
    }

    #[test]
    fn test_unknown_duration() {
        let (mut engine, _output) = engine_with(Vec::new(), f64::NAN);

        assert_eq!(engine.state().duration, None);
        assert_eq!(engine.duration_label(), "0:00");
        assert_eq!(engine.progress_fraction(), 0.0);
        assert_eq!(engine.seek_fraction(0.5), Err(PlaybackError::DurationUnknown));

        engine.seek_relative(-30.0).unwrap();
        assert_eq!(engine.state().current_time, 0.0);

        assert!(!engine.has_chapters());
        engine.on_time_tick(75.0);
        assert_eq!(engine.state().current_chapter_index, 0);
        assert_eq!(engine.current_chapter_title(), "Audiobook");
        assert_eq!(engine.elapsed_label(), "1:15");
    }

    #[test]
    fn test_seek_fraction() {
        let (mut engine, _output) = engine_with(two_chapters(), 600.0);

        engine.seek_fraction(0.25).unwrap();
        assert_eq!(engine.state().current_time, 150.0);
        assert_eq!(engine.progress_fraction(), 0.25);

        engine.seek_fraction(3.0).unwrap();
        assert_eq!(engine.state().current_time, 600.0);
    }

    #[test]
    fn test_shorter_duration_pulls_position_back() {
        let (mut engine, output) = engine_with(two_chapters(), f64::NAN);
        engine.on_time_tick(500.0);
        assert_eq!(engine.state().current_chapter_index, 1);

        engine.on_duration_known(90.0);
        assert_eq!(engine.state().current_time, 90.0);
        assert_eq!(engine.state().current_chapter_index, 0);
        assert_eq!(engine.progress_fraction(), 1.0);
        assert!(output.calls().is_empty());

        // A longer duration leaves the position alone
        engine.on_duration_known(600.0);
        assert_eq!(engine.state().current_time, 90.0);
    }

    #[test]
    fn test_title_falls_back_to_filename() {
        let (engine, _output) = engine_with(two_chapters(), 600.0);
        assert_eq!(engine.title(), "book.mp3");

        let engine = engine.with_title(Some("A Tale".to_string()));
        assert_eq!(engine.title(), "A Tale");
    }
}
