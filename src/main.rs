use clap::{Parser, Subcommand};
use narrator::api::models::{
    DEFAULT_DIALOGUE_VOICE, DEFAULT_EMPHASIS_VOICE, DEFAULT_NARRATOR_VOICE,
};
use narrator::api::{
    ByteRange, ConversionStatus, ConverterApi, ConverterClient, JobStatus, VoiceSelection,
};
use narrator::config::Config;
use narrator::monitor::ConversionProgress;
use narrator::playback::format_time;
use narrator::upload::UploadProgress;
use narrator::Session;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc as tokio_mpsc;
use tracing::{error, info};

/// narrator: upload e-books for conversion and manage the resulting audiobooks.
#[derive(Parser)]
#[command(name = "narrator", version)]
struct Args {
    /// Backend base URL (overrides AUDIOBOOK_API_URL).
    #[arg(long, global = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the audiobook library.
    Library,
    /// Upload a document, start its conversion and follow it to the end.
    Upload {
        path: PathBuf,
        #[command(flatten)]
        voices: VoiceArgs,
        /// Return as soon as the conversion has started.
        #[arg(long)]
        no_wait: bool,
    },
    /// Print the current conversion status of a job.
    Status { filename: String },
    /// Follow a running conversion until it finishes.
    Watch { filename: String },
    /// Print the chapters of an audiobook.
    Chapters { filename: String },
    /// Delete an audiobook.
    Delete { filename: String },
    /// Save a short voice sample for an uploaded document.
    Preview {
        filename: String,
        #[command(flatten)]
        voices: VoiceArgs,
        #[arg(long, short)]
        out: PathBuf,
    },
    /// Download an audiobook, optionally resuming from a byte offset.
    Download {
        filename: String,
        #[arg(long, short)]
        out: PathBuf,
        /// First byte to fetch. `out` must already hold exactly this many bytes.
        #[arg(long)]
        from: Option<u64>,
    },
}

#[derive(clap::Args)]
struct VoiceArgs {
    /// Use a single voice for all text instead of a cast.
    #[arg(long, conflicts_with_all = ["narrator", "dialogue", "emphasis"])]
    voice: Option<String>,
    #[arg(long)]
    narrator: Option<String>,
    #[arg(long)]
    dialogue: Option<String>,
    #[arg(long)]
    emphasis: Option<String>,
}

impl VoiceArgs {
    fn selection(&self) -> VoiceSelection {
        if let Some(voice) = &self.voice {
            return VoiceSelection::Single {
                voice: voice.clone(),
            };
        }

        VoiceSelection::Cast {
            narrator: voice_or(&self.narrator, DEFAULT_NARRATOR_VOICE),
            dialogue: voice_or(&self.dialogue, DEFAULT_DIALOGUE_VOICE),
            emphasis: voice_or(&self.emphasis, DEFAULT_EMPHASIS_VOICE),
        }
    }
}

fn voice_or(voice: &Option<String>, default: &str) -> String {
    voice.clone().unwrap_or_else(|| default.to_string())
}

fn configure_logging() {
    use tracing_subscriber::prelude::*;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn,narrator=info"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn print_status(status: &ConversionStatus) {
    println!(
        "{}: {:?} {}% ({}/{} chunks) {}",
        status.filename,
        status.status,
        status.progress,
        status.current_chunk,
        status.total_chunks,
        status.message
    );
}

/// Print progress of `job` until its polling ends. Returns whether it completed.
async fn follow(
    mut progress: tokio_mpsc::UnboundedReceiver<ConversionProgress>,
    job: &str,
) -> bool {
    while let Some(event) = progress.recv().await {
        match event {
            ConversionProgress::Status { status } if status.filename == job => {
                print_status(&status)
            }
            ConversionProgress::PollFailed { filename, error } if filename == job => {
                eprintln!("{}: status unavailable ({}), retrying", filename, error)
            }
            ConversionProgress::Finished { status } if status.filename == job => {
                return status.status == JobStatus::Completed;
            }
            ConversionProgress::Cancelled { filename } if filename == job => return false,
            _ => {}
        }
    }
    false
}

#[tokio::main]
async fn main() {
    configure_logging();
    let args = Args::parse();

    let mut config = Config::load().unwrap_or_else(|e| {
        error!("Invalid configuration: {e}");
        std::process::exit(2);
    });
    if let Some(api_url) = args.api_url {
        config.api_url = api_url;
    }

    info!("Using backend at {}", config.api_url);

    if let Err(e) = run(args.command, config).await {
        error!("{e}");
        std::process::exit(1);
    }
}

async fn run(command: Command, config: Config) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Library => {
            let session = Session::connect(config).await?;
            for entry in session.library().await {
                println!("{:<11} {}", format!("{:?}", entry.status), entry.filename);
            }
            session.dispose().await;
        }
        Command::Upload {
            path,
            voices,
            no_wait,
        } => {
            let session = Session::connect(config).await?;
            let progress = session.monitor().subscribe_all();
            let mut uploads = session.uploads().subscribe();
            tokio::spawn(async move {
                while let Some(event) = uploads.recv().await {
                    if let UploadProgress::Progress { filename, percent } = event {
                        eprint!("\r{}: {}% uploaded", filename, percent);
                    }
                }
            });

            let outcome = session.upload_file(&path, &voices.selection()).await?;
            eprintln!();
            println!("Converting {} as {}", outcome.uploaded, outcome.job);

            let completed = no_wait || follow(progress, &outcome.job).await;
            session.dispose().await;
            if !completed {
                return Err(format!("Conversion of {} did not complete", outcome.job).into());
            }
        }
        Command::Status { filename } => {
            let client = ConverterClient::from_config(&config)?;
            print_status(&client.conversion_status(&filename).await?);
        }
        Command::Watch { filename } => {
            let session = Session::connect(config).await?;
            let progress = session.monitor().subscribe_filename(filename.clone());
            session.watch_conversion(&filename).await;
            let completed = follow(progress, &filename).await;
            session.dispose().await;
            if !completed {
                return Err(format!("Conversion of {} did not complete", filename).into());
            }
        }
        Command::Chapters { filename } => {
            let client = ConverterClient::from_config(&config)?;
            let list = client.chapters(&filename).await?;
            if let Some(title) = list.title {
                println!("{}", title);
            }
            if list.chapters.is_empty() {
                println!("(no chapters)");
            }
            for (i, chapter) in list.chapters.iter().enumerate() {
                println!(
                    "{:>3}  {:>8}  {}",
                    i + 1,
                    format_time(chapter.timestamp),
                    chapter.title
                );
            }
        }
        Command::Delete { filename } => {
            let mut session = Session::connect(config).await?;
            let result = session.delete(&filename).await;
            session.dispose().await;
            result?;
            println!("Deleted {}", filename);
        }
        Command::Preview {
            filename,
            voices,
            out,
        } => {
            let client = ConverterClient::from_config(&config)?;
            let audio = client.preview(&filename, &voices.selection()).await?;
            tokio::fs::write(&out, &audio).await?;
            println!("Wrote {} bytes to {}", audio.len(), out.display());
        }
        Command::Download { filename, out, from } => {
            let client = ConverterClient::from_config(&config)?;
            let resumed = match from {
                Some(offset) => Some(open_for_resume(&out, offset).await?),
                None => None,
            };
            let audio = client
                .fetch_audio(&filename, from.map(ByteRange::from))
                .await?;

            match resumed {
                Some(mut file) => {
                    use tokio::io::AsyncWriteExt;
                    file.write_all(&audio).await?;
                    file.flush().await?;
                }
                None => tokio::fs::write(&out, &audio).await?,
            }
            println!("Wrote {} bytes to {}", audio.len(), out.display());
        }
    }
    Ok(())
}

/// Open `out` for writing from byte `offset`. The file must hold exactly the
/// first `offset` bytes, so a resumed download lines up with what is there.
async fn open_for_resume(
    out: &Path,
    offset: u64,
) -> Result<tokio::fs::File, Box<dyn std::error::Error>> {
    use tokio::io::AsyncSeekExt;

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(out)
        .await?;
    let len = file.metadata().await?.len();
    if len != offset {
        return Err(format!(
            "{} holds {} bytes, cannot resume from byte {}",
            out.display(),
            len,
            offset
        )
        .into());
    }
    file.seek(std::io::SeekFrom::Start(offset)).await?;
    Ok(file)
}
