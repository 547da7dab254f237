use crate::api::{ApiError, AudiobookEntry, ConversionStatus, ConverterApi, EntryStatus, JobStatus};
use crate::events::{FilenameEvent, Subscribers};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc as tokio_mpsc, RwLock};
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("Failed to delete {filename}: {source}")]
    Delete {
        filename: String,
        #[source]
        source: ApiError,
    },
}

/// Changes to the library, in the order they were made
#[derive(Debug, Clone, PartialEq)]
pub enum LibraryEvent {
    Added { entry: AudiobookEntry },
    Updated { entry: AudiobookEntry },
    StatusApplied { status: ConversionStatus },
    Removed { filename: String },
}

impl FilenameEvent for LibraryEvent {
    fn filename(&self) -> &str {
        match self {
            LibraryEvent::Added { entry } | LibraryEvent::Updated { entry } => &entry.filename,
            LibraryEvent::StatusApplied { status } => &status.filename,
            LibraryEvent::Removed { filename } => filename,
        }
    }
}

/// Outcome of offering a polled status to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusUpdate {
    Applied,
    /// An answer to a request older than the last applied one
    Stale,
    /// The filename is no longer in the library
    Unknown,
}

struct TrackedStatus {
    sequence: u64,
    status: ConversionStatus,
}

#[derive(Default)]
struct LibraryState {
    /// In backend order
    entries: Vec<AudiobookEntry>,
    statuses: HashMap<String, TrackedStatus>,
    /// Last request sequence number handed out per filename
    issued: HashMap<String, u64>,
    /// Conversions started from this client that the backend may not list yet
    pending: HashSet<String>,
    /// The last refresh failed; entries are kept but only pending ones are shown
    unavailable: bool,
}

impl LibraryState {
    fn position(&self, filename: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.filename == filename)
    }

    fn visible(&self) -> Vec<AudiobookEntry> {
        if !self.unavailable {
            return self.entries.clone();
        }
        self.entries
            .iter()
            .filter(|e| self.pending.contains(&e.filename))
            .cloned()
            .collect()
    }

    fn forget(&mut self, filename: &str) {
        self.statuses.remove(filename);
        self.issued.remove(filename);
        self.pending.remove(filename);
    }
}

/// In-memory cache of the audiobook library and of per-job conversion status
///
/// The store is the only writer of both. Readers get snapshots; changes are
/// published to subscribers as [`LibraryEvent`]s.
#[derive(Clone)]
pub struct LibraryStore {
    api: Arc<dyn ConverterApi>,
    state: Arc<RwLock<LibraryState>>,
    events: Subscribers<LibraryEvent>,
}

impl LibraryStore {
    pub fn new(api: Arc<dyn ConverterApi>) -> Self {
        Self {
            api,
            state: Arc::new(RwLock::new(LibraryState::default())),
            events: Subscribers::new(),
        }
    }

    pub fn subscribe(&self) -> tokio_mpsc::UnboundedReceiver<LibraryEvent> {
        self.events.subscribe_all()
    }

    pub fn subscribe_filename(
        &self,
        filename: String,
    ) -> tokio_mpsc::UnboundedReceiver<LibraryEvent> {
        self.events.subscribe_filename(filename)
    }

    /// Replace the cached list with the backend's.
    ///
    /// A transport or server failure is logged and shows an empty library.
    /// The known entries, their statuses and sequence numbers stay in place
    /// and no `Removed` is published, so running polls carry on until the
    /// next successful refresh. Conversions started from this client and not
    /// yet finished are shown either way, since the backend only lists them
    /// once they exist on disk.
    pub async fn refresh(&self) -> Vec<AudiobookEntry> {
        let fetched = match self.api.library().await {
            Ok(entries) => entries,
            Err(e) => {
                error!("Error fetching library: {}", e);
                let mut state = self.state.write().await;
                state.unavailable = true;
                return state.visible();
            }
        };

        let mut state = self.state.write().await;
        state.unavailable = false;

        let mut next: Vec<AudiobookEntry> = Vec::with_capacity(fetched.len());
        for entry in fetched {
            // The backend keys by filename; keep the first of any duplicates
            if next.iter().any(|e| e.filename == entry.filename) {
                warn!("Library listed {} twice, ignoring repeat", entry.filename);
                continue;
            }
            next.push(entry);
        }

        for filename in state.pending.clone() {
            match next.iter().position(|e| e.filename == filename) {
                Some(_) => {
                    state.pending.remove(&filename);
                }
                None => {
                    if let Some(pos) = state.position(&filename) {
                        next.push(state.entries[pos].clone());
                    }
                }
            }
        }

        let previous = std::mem::take(&mut state.entries);

        for old in &previous {
            if !next.iter().any(|e| e.filename == old.filename) {
                state.forget(&old.filename);
                self.events.publish(LibraryEvent::Removed {
                    filename: old.filename.clone(),
                });
            }
        }

        for entry in &next {
            match previous.iter().find(|e| e.filename == entry.filename) {
                None => self.events.publish(LibraryEvent::Added {
                    entry: entry.clone(),
                }),
                Some(old) if old.status != entry.status => {
                    self.events.publish(LibraryEvent::Updated {
                        entry: entry.clone(),
                    })
                }
                Some(_) => {}
            }
        }

        debug!("Library refreshed: {} audiobook(s)", next.len());
        state.entries = next.clone();
        next
    }

    /// Ask the backend to delete an audiobook.
    ///
    /// On failure the entry stays where it was and the error is returned for
    /// the caller to surface.
    pub async fn delete(&self, filename: &str) -> Result<(), LibraryError> {
        if let Err(source) = self.api.delete_audiobook(filename).await {
            error!("Error deleting audiobook {}: {}", filename, source);
            return Err(LibraryError::Delete {
                filename: filename.to_string(),
                source,
            });
        }

        let mut state = self.state.write().await;
        state.forget(filename);
        if let Some(pos) = state.position(filename) {
            state.entries.remove(pos);
            self.events.publish(LibraryEvent::Removed {
                filename: filename.to_string(),
            });
        }

        info!("Deleted audiobook {}", filename);
        Ok(())
    }

    /// Record that a conversion was just started for `filename`
    pub async fn begin_conversion(&self, filename: &str) {
        let mut state = self.state.write().await;
        // A new run starts its progress from scratch
        state.statuses.remove(filename);
        state.pending.insert(filename.to_string());

        let entry = AudiobookEntry::converting(filename);
        match state.position(filename) {
            Some(pos) => {
                if state.entries[pos].status != EntryStatus::Converting {
                    state.entries[pos].status = EntryStatus::Converting;
                    self.events.publish(LibraryEvent::Updated { entry });
                }
            }
            None => {
                state.entries.push(entry.clone());
                self.events.publish(LibraryEvent::Added { entry });
            }
        }
    }

    /// Hand out the sequence number for the next status request of `filename`
    pub async fn issue_sequence(&self, filename: &str) -> u64 {
        let mut state = self.state.write().await;
        let counter = state.issued.entry(filename.to_string()).or_insert(0);
        *counter += 1;
        *counter
    }

    /// Offer the answer to status request `sequence`.
    ///
    /// Answers older than the last applied one are dropped, and while a run
    /// stays `converting` the recorded progress never goes backwards.
    pub async fn apply_status(&self, sequence: u64, mut status: ConversionStatus) -> StatusUpdate {
        let mut state = self.state.write().await;

        let Some(pos) = state.position(&status.filename) else {
            debug!(
                "Dropping status for {}: no longer in library",
                status.filename
            );
            return StatusUpdate::Unknown;
        };

        if let Some(previous) = state.statuses.get(&status.filename) {
            if sequence <= previous.sequence {
                debug!(
                    "Dropping stale status #{} for {} (applied #{})",
                    sequence, status.filename, previous.sequence
                );
                return StatusUpdate::Stale;
            }

            if previous.status.status == JobStatus::Converting
                && status.status == JobStatus::Converting
                && status.progress < previous.status.progress
            {
                debug!(
                    "Progress for {} went back from {}% to {}%, keeping {}%",
                    status.filename,
                    previous.status.progress,
                    status.progress,
                    previous.status.progress
                );
                status.progress = previous.status.progress;
            }
        }

        if status.is_terminal() {
            state.pending.remove(&status.filename);
        }

        if status.status == JobStatus::Completed
            && state.entries[pos].status != EntryStatus::Completed
        {
            state.entries[pos].status = EntryStatus::Completed;
            self.events.publish(LibraryEvent::Updated {
                entry: state.entries[pos].clone(),
            });
        }

        state.statuses.insert(
            status.filename.clone(),
            TrackedStatus {
                sequence,
                status: status.clone(),
            },
        );
        self.events.publish(LibraryEvent::StatusApplied { status });

        StatusUpdate::Applied
    }

    /// The library as it should be shown
    pub async fn snapshot(&self) -> Vec<AudiobookEntry> {
        self.state.read().await.visible()
    }

    pub async fn entry(&self, filename: &str) -> Option<AudiobookEntry> {
        let state = self.state.read().await;
        state.position(filename).map(|pos| state.entries[pos].clone())
    }

    /// Whether `filename` is tracked, including entries hidden by a failed refresh
    pub async fn contains(&self, filename: &str) -> bool {
        self.state.read().await.position(filename).is_some()
    }

    /// Last applied conversion status for `filename`
    pub async fn status(&self, filename: &str) -> Option<ConversionStatus> {
        self.state
            .read()
            .await
            .statuses
            .get(filename)
            .map(|tracked| tracked.status.clone())
    }
}
