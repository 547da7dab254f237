// # Session
//
// Wires the backend client, library store, conversion monitor, upload
// coordinator and player together for one user session, and tracks which
// view is showing. User-initiated failures end up in `Notifications`.

use crate::api::{ApiError, AudiobookEntry, ConverterApi, ConverterClient, VoiceSelection};
use crate::config::Config;
use crate::library::{LibraryError, LibraryStore};
use crate::monitor::{ConversionMonitor, MonitorHandle};
use crate::notifications::Notifications;
use crate::playback::{AudioOutput, PlaybackError, PlaybackPositionEngine};
use crate::upload::{UploadCoordinator, UploadError, UploadOutcome};
use bytes::Bytes;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{info, warn};

/// What the user is looking at
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum View {
    Library,
    Player { filename: String },
}

pub struct Session {
    config: Config,
    api: Arc<dyn ConverterApi>,
    store: LibraryStore,
    monitor: MonitorHandle,
    uploads: UploadCoordinator,
    notifications: Notifications,
    view: View,
    player: Option<PlaybackPositionEngine>,
    library_refresh: Option<JoinHandle<()>>,
}

impl Session {
    /// Connect to the backend named in `config` and load the library
    pub async fn connect(config: Config) -> Result<Self, ApiError> {
        let client = ConverterClient::from_config(&config)?;
        Ok(Self::init(config, Arc::new(client)).await)
    }

    /// Start the session's services on the current runtime and load the library.
    ///
    /// The library is reloaded every `config.library_refresh_interval` until
    /// the session is disposed.
    pub async fn init(config: Config, api: Arc<dyn ConverterApi>) -> Self {
        let store = LibraryStore::new(api.clone());
        let monitor = ConversionMonitor::start(
            api.clone(),
            store.clone(),
            config.poll_interval,
            tokio::runtime::Handle::current(),
        );
        let uploads = UploadCoordinator::new(api.clone(), store.clone(), monitor.clone());

        store.refresh().await;
        let library_refresh = spawn_library_refresh(store.clone(), config.library_refresh_interval);

        Self {
            config,
            api,
            store,
            monitor,
            uploads,
            notifications: Notifications::new(),
            view: View::Library,
            player: None,
            library_refresh: Some(library_refresh),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &LibraryStore {
        &self.store
    }

    pub fn monitor(&self) -> &MonitorHandle {
        &self.monitor
    }

    pub fn uploads(&self) -> &UploadCoordinator {
        &self.uploads
    }

    pub fn notifications(&self) -> &Notifications {
        &self.notifications
    }

    pub fn view(&self) -> &View {
        &self.view
    }

    pub fn player(&self) -> Option<&PlaybackPositionEngine> {
        self.player.as_ref()
    }

    pub fn player_mut(&mut self) -> Option<&mut PlaybackPositionEngine> {
        self.player.as_mut()
    }

    pub async fn refresh(&self) -> Vec<AudiobookEntry> {
        self.store.refresh().await
    }

    pub async fn library(&self) -> Vec<AudiobookEntry> {
        self.store.snapshot().await
    }

    pub async fn upload_file(
        &self,
        path: &Path,
        voices: &VoiceSelection,
    ) -> Result<UploadOutcome, UploadError> {
        let result = self.uploads.upload_file(path, voices).await;
        if let Err(e) = &result {
            self.notifications.push(e.to_string());
        }
        result
    }

    pub async fn upload_bytes(
        &self,
        file_name: &str,
        data: Bytes,
        voices: &VoiceSelection,
    ) -> Result<UploadOutcome, UploadError> {
        let result = self.uploads.upload_bytes(file_name, data, voices).await;
        if let Err(e) = &result {
            self.notifications.push(e.to_string());
        }
        result
    }

    /// Voice sample for an uploaded document
    pub async fn preview(&self, filename: &str, voices: &VoiceSelection) -> Result<Bytes, ApiError> {
        let result = self.api.preview(filename, voices).await;
        if let Err(e) = &result {
            warn!("Preview of {} failed: {}", filename, e);
            self.notifications
                .push(format!("Preview of {} failed: {}", filename, e));
        }
        result
    }

    /// Delete an audiobook. Deleting the open one stops playback and returns to the library.
    pub async fn delete(&mut self, filename: &str) -> Result<(), LibraryError> {
        if let Err(e) = self.store.delete(filename).await {
            self.notifications.push(e.to_string());
            return Err(e);
        }

        if self.playing(filename) {
            info!("Deleted the open audiobook {}, closing player", filename);
            self.close_player();
        }
        Ok(())
    }

    /// URL a player streams `filename` from
    pub fn audio_url(&self, filename: &str) -> String {
        self.api.audio_url(filename)
    }

    /// Open the player on `filename` and start playback.
    ///
    /// Chapters that cannot be fetched leave the player without chapter
    /// navigation. A failing output still opens the player, paused, and
    /// reports the error.
    pub async fn open(
        &mut self,
        filename: &str,
        output: Box<dyn AudioOutput>,
    ) -> Result<(), PlaybackError> {
        let chapters = match self.api.chapters(filename).await {
            Ok(list) => list,
            Err(e) => {
                warn!("Could not load chapters of {}: {}", filename, e);
                Default::default()
            }
        };

        if let Some(mut previous) = self.player.take() {
            previous.stop();
        }

        let mut engine =
            PlaybackPositionEngine::new(filename.to_string(), chapters.chapters, output)
                .with_title(chapters.title);
        let started = engine.play();

        info!(
            "Opened {} with {} chapter(s)",
            filename,
            engine.chapters().len()
        );
        self.player = Some(engine);
        self.view = View::Player {
            filename: filename.to_string(),
        };
        started
    }

    pub fn close_player(&mut self) {
        if let Some(mut engine) = self.player.take() {
            engine.stop();
        }
        self.view = View::Library;
    }

    pub fn skip_forward(&mut self) -> Result<(), PlaybackError> {
        let step = self.config.skip_seconds;
        match self.player.as_mut() {
            Some(engine) => engine.seek_relative(step),
            None => Ok(()),
        }
    }

    pub fn skip_back(&mut self) -> Result<(), PlaybackError> {
        let step = self.config.skip_seconds;
        match self.player.as_mut() {
            Some(engine) => engine.seek_relative(-step),
            None => Ok(()),
        }
    }

    /// Follow a conversion started elsewhere, e.g. by an earlier session
    pub async fn watch_conversion(&self, filename: &str) {
        if !self.store.contains(filename).await {
            self.store.begin_conversion(filename).await;
        }
        self.monitor.watch(filename);
    }

    /// Stop playback, the library refresh and every poll. Nothing of this
    /// session runs afterwards.
    pub async fn dispose(mut self) {
        self.close_player();
        if let Some(task) = self.library_refresh.take() {
            task.abort();
            let _ = task.await;
        }
        self.monitor.shutdown().await;
        info!("Session closed");
    }

    fn playing(&self, filename: &str) -> bool {
        self.player
            .as_ref()
            .is_some_and(|engine| engine.filename() == filename)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(task) = self.library_refresh.take() {
            task.abort();
        }
    }
}

/// Reload the library every `every`, starting one interval from now
fn spawn_library_refresh(store: LibraryStore, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            store.refresh().await;
        }
    })
}
