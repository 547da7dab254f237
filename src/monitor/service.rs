use crate::api::{ConversionStatus, ConverterApi, EntryStatus};
use crate::events::Subscribers;
use crate::library::{LibraryEvent, LibraryStore, StatusUpdate};
use crate::monitor::progress::ConversionProgress;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc as tokio_mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Where a filename stands in the monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Idle,
    Polling,
    /// A terminal status was seen; not polled again until watched explicitly
    Terminal,
}

/// Commands sent to the monitor
enum MonitorCommand {
    Watch {
        filename: String,
        /// Also restart filenames that already reached a terminal status
        restart: bool,
    },
    Stop {
        filename: String,
    },
    State {
        filename: String,
        reply: oneshot::Sender<MonitorState>,
    },
    Polling {
        reply: oneshot::Sender<Vec<String>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// How a poll task ended on its own
enum PollOutcome {
    Terminal(ConversionStatus),
    /// The filename left the library mid-flight
    Dropped,
}

struct PollFinished {
    filename: String,
    generation: u64,
    outcome: PollOutcome,
}

struct PollTask {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Everything a poll task needs, cloned per task
#[derive(Clone)]
struct PollContext {
    api: Arc<dyn ConverterApi>,
    store: LibraryStore,
    progress: Subscribers<ConversionProgress>,
    poll_interval: Duration,
    done_tx: tokio_mpsc::UnboundedSender<PollFinished>,
}

/// Handle for watching conversions and subscribing to their progress
///
/// The monitor shuts down, aborting every poll, once all handles are dropped.
#[derive(Clone)]
pub struct MonitorHandle {
    command_tx: tokio_mpsc::UnboundedSender<MonitorCommand>,
    progress: Subscribers<ConversionProgress>,
}

impl MonitorHandle {
    /// Poll `filename` until its conversion reaches a terminal status.
    /// Restarts filenames that finished earlier, e.g. after a new convert.
    pub fn watch(&self, filename: &str) {
        let _ = self.command_tx.send(MonitorCommand::Watch {
            filename: filename.to_string(),
            restart: true,
        });
    }

    /// Stop polling `filename` without waiting for a terminal status
    pub fn stop(&self, filename: &str) {
        let _ = self.command_tx.send(MonitorCommand::Stop {
            filename: filename.to_string(),
        });
    }

    pub async fn state(&self, filename: &str) -> MonitorState {
        let (reply, rx) = oneshot::channel();
        let command = MonitorCommand::State {
            filename: filename.to_string(),
            reply,
        };
        if self.command_tx.send(command).is_err() {
            return MonitorState::Idle;
        }
        rx.await.unwrap_or(MonitorState::Idle)
    }

    /// Filenames currently polled, sorted
    pub async fn polling(&self) -> Vec<String> {
        let (reply, rx) = oneshot::channel();
        if self
            .command_tx
            .send(MonitorCommand::Polling { reply })
            .is_err()
        {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    pub fn subscribe_all(&self) -> tokio_mpsc::UnboundedReceiver<ConversionProgress> {
        self.progress.subscribe_all()
    }

    pub fn subscribe_filename(
        &self,
        filename: String,
    ) -> tokio_mpsc::UnboundedReceiver<ConversionProgress> {
        self.progress.subscribe_filename(filename)
    }

    /// Abort every poll and stop the monitor. Returns once no poll task is left running.
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self
            .command_tx
            .send(MonitorCommand::Shutdown { reply })
            .is_ok()
        {
            let _ = rx.await;
        }
    }
}

/// Polls conversion status for every watched filename
///
/// Each filename gets its own task, so a slow backend answer for one never
/// delays another. Within a task the next fetch is only issued once the
/// previous one returned.
pub struct ConversionMonitor {
    context: PollContext,
    runtime_handle: tokio::runtime::Handle,
    tasks: HashMap<String, PollTask>,
    terminal: HashSet<String>,
    next_generation: u64,
    command_rx: tokio_mpsc::UnboundedReceiver<MonitorCommand>,
    done_rx: tokio_mpsc::UnboundedReceiver<PollFinished>,
    library_rx: tokio_mpsc::UnboundedReceiver<LibraryEvent>,
}

impl ConversionMonitor {
    /// Start the monitor on the given runtime, returning a handle to control it
    pub fn start(
        api: Arc<dyn ConverterApi>,
        store: LibraryStore,
        poll_interval: Duration,
        runtime_handle: tokio::runtime::Handle,
    ) -> MonitorHandle {
        let (command_tx, command_rx) = tokio_mpsc::unbounded_channel();
        let (done_tx, done_rx) = tokio_mpsc::unbounded_channel();
        let progress = Subscribers::new();

        // Subscribe before anything can be added so no entry is missed
        let library_rx = store.subscribe();

        let monitor = ConversionMonitor {
            context: PollContext {
                api,
                store,
                progress: progress.clone(),
                poll_interval,
                done_tx,
            },
            runtime_handle: runtime_handle.clone(),
            tasks: HashMap::new(),
            terminal: HashSet::new(),
            next_generation: 1,
            command_rx,
            done_rx,
            library_rx,
        };

        runtime_handle.spawn(monitor.run());

        MonitorHandle {
            command_tx,
            progress,
        }
    }

    async fn run(mut self) {
        info!(
            "ConversionMonitor: started, polling every {:?}",
            self.context.poll_interval
        );

        loop {
            tokio::select! {
                command = self.command_rx.recv() => match command {
                    Some(MonitorCommand::Shutdown { reply }) => {
                        self.abort_all().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        self.abort_all().await;
                        break;
                    }
                },
                Some(finished) = self.done_rx.recv() => self.handle_finished(finished),
                Some(event) = self.library_rx.recv() => self.handle_library_event(event),
            }
        }

        info!("ConversionMonitor: stopped");
    }

    fn handle_command(&mut self, command: MonitorCommand) {
        match command {
            MonitorCommand::Watch { filename, restart } => self.watch(filename, restart),
            MonitorCommand::Stop { filename } => {
                self.cancel(&filename);
            }
            MonitorCommand::State { filename, reply } => {
                let _ = reply.send(self.state_of(&filename));
            }
            MonitorCommand::Polling { reply } => {
                let mut filenames: Vec<String> = self.tasks.keys().cloned().collect();
                filenames.sort();
                let _ = reply.send(filenames);
            }
            // Handled by the run loop
            MonitorCommand::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    fn handle_library_event(&mut self, event: LibraryEvent) {
        match event {
            LibraryEvent::Added { entry } | LibraryEvent::Updated { entry }
                if entry.status == EntryStatus::Converting =>
            {
                self.watch(entry.filename, false);
            }
            LibraryEvent::Removed { filename } => {
                self.terminal.remove(&filename);
                if self.cancel(&filename) {
                    debug!("Stopped polling {}: removed from library", filename);
                }
            }
            _ => {}
        }
    }

    fn handle_finished(&mut self, finished: PollFinished) {
        let current = self
            .tasks
            .get(&finished.filename)
            .is_some_and(|task| task.generation == finished.generation);
        if !current {
            // A task that was cancelled or replaced already
            return;
        }

        self.tasks.remove(&finished.filename);
        match finished.outcome {
            PollOutcome::Terminal(status) => {
                info!(
                    "✓ Conversion of {} finished: {:?}",
                    status.filename, status.status
                );
                self.terminal.insert(finished.filename);
                self.context
                    .progress
                    .publish(ConversionProgress::Finished { status });
            }
            PollOutcome::Dropped => {
                self.context.progress.publish(ConversionProgress::Cancelled {
                    filename: finished.filename,
                });
            }
        }
    }

    fn state_of(&self, filename: &str) -> MonitorState {
        if self.tasks.contains_key(filename) {
            MonitorState::Polling
        } else if self.terminal.contains(filename) {
            MonitorState::Terminal
        } else {
            MonitorState::Idle
        }
    }

    fn watch(&mut self, filename: String, restart: bool) {
        match self.state_of(&filename) {
            MonitorState::Polling => return,
            MonitorState::Terminal if !restart => {
                debug!("Not restarting {}: already finished", filename);
                return;
            }
            _ => {}
        }

        self.terminal.remove(&filename);

        let generation = self.next_generation;
        self.next_generation += 1;

        info!("Polling conversion status of {}", filename);
        self.context.progress.publish(ConversionProgress::Started {
            filename: filename.clone(),
        });

        let handle = self.runtime_handle.spawn(poll_until_terminal(
            self.context.clone(),
            filename.clone(),
            generation,
        ));
        self.tasks.insert(filename, PollTask { generation, handle });
    }

    /// Abort the poll task of `filename`, returning whether one was running
    fn cancel(&mut self, filename: &str) -> bool {
        let Some(task) = self.tasks.remove(filename) else {
            return false;
        };
        task.handle.abort();
        self.context.progress.publish(ConversionProgress::Cancelled {
            filename: filename.to_string(),
        });
        true
    }

    async fn abort_all(&mut self) {
        for (filename, task) in self.tasks.drain() {
            task.handle.abort();
            // Wait for the abort so no tick of it can run after shutdown returns
            let _ = task.handle.await;
            self.context
                .progress
                .publish(ConversionProgress::Cancelled { filename });
        }
    }
}

/// Poll one filename until a terminal status, fetching right away and then once per interval
async fn poll_until_terminal(context: PollContext, filename: String, generation: u64) {
    let mut ticker = tokio::time::interval(context.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let sequence = context.store.issue_sequence(&filename).await;
        let mut status = match context.api.conversion_status(&filename).await {
            Ok(status) => status,
            Err(e) => {
                warn!("✗ Status poll #{} for {} failed: {}", sequence, filename, e);
                context.progress.publish(ConversionProgress::PollFailed {
                    filename: filename.clone(),
                    error: e.to_string(),
                });
                continue;
            }
        };
        // Keyed by what was asked for, whatever the body says
        status.filename = filename.clone();

        match context.store.apply_status(sequence, status.clone()).await {
            StatusUpdate::Applied => {
                let applied = context.store.status(&filename).await.unwrap_or(status);
                debug!(
                    "Status of {}: {:?} {}% ({}/{})",
                    filename,
                    applied.status,
                    applied.progress,
                    applied.current_chunk,
                    applied.total_chunks
                );
                context.progress.publish(ConversionProgress::Status {
                    status: applied.clone(),
                });

                if applied.is_terminal() {
                    let _ = context.done_tx.send(PollFinished {
                        filename,
                        generation,
                        outcome: PollOutcome::Terminal(applied),
                    });
                    return;
                }
            }
            StatusUpdate::Stale => {}
            StatusUpdate::Unknown => {
                let _ = context.done_tx.send(PollFinished {
                    filename,
                    generation,
                    outcome: PollOutcome::Dropped,
                });
                return;
            }
        }
    }
}
