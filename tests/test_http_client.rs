mod support;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Multipart, Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use bytes::Bytes;
use serde_json::{json, Value};

use crate::support::tracing_init;
use narrator::api::{
    ApiError, AudiobookEntry, ByteRange, ConverterApi, ConverterClient, EntryStatus, JobStatus,
    VoiceSelection,
};
use narrator::events::Subscribers;
use narrator::upload::{UploadProgress, UploadProgressReporter};

const AUDIO: &[u8] = b"0123456789";

#[derive(Default)]
struct Recorded {
    status_filenames: Vec<String>,
    uploads: Vec<(String, usize)>,
    convert_bodies: Vec<Value>,
    deleted: Vec<String>,
}

type Shared = Arc<Mutex<Recorded>>;

async fn library() -> Json<Value> {
    Json(json!([
        {"filename": "a.mp3", "status": "completed"},
        {"filename": "b.mp3", "status": "converting"},
        {"filename": "legacy.mp3"}
    ]))
}

async fn upload(State(state): State<Shared>, mut multipart: Multipart) -> Response {
    while let Some(field) = multipart.next_field().await.unwrap() {
        if field.name() != Some("file") {
            continue;
        }
        let name = field.file_name().unwrap().to_string();
        let data = field.bytes().await.unwrap();
        state.lock().unwrap().uploads.push((name.clone(), data.len()));
        return Json(json!({ "filename": name })).into_response();
    }
    (StatusCode::BAD_REQUEST, Json(json!({"detail": "No file"}))).into_response()
}

async fn convert(State(state): State<Shared>, Json(body): Json<Value>) -> Response {
    let filename = body["filename"].as_str().unwrap_or_default().to_string();
    state.lock().unwrap().convert_bodies.push(body);
    match filename.as_str() {
        "book.pdf" => Json(json!({"status": "started", "output_filename": "book.mp3"}))
            .into_response(),
        "busy.pdf" => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"detail": "Converter busy"})),
        )
            .into_response(),
        _ => StatusCode::OK.into_response(),
    }
}

async fn preview(Json(body): Json<Value>) -> Response {
    if body["filename"] == "book.pdf" {
        ([(header::CONTENT_TYPE, "audio/mpeg")], "ID3sample").into_response()
    } else {
        (StatusCode::NOT_FOUND, "no such document").into_response()
    }
}

async fn conversion_status(State(state): State<Shared>, Path(filename): Path<String>) -> Response {
    state
        .lock()
        .unwrap()
        .status_filenames
        .push(filename.clone());

    match filename.as_str() {
        "missing.mp3" => {
            (StatusCode::NOT_FOUND, Json(json!({"detail": "Not found"}))).into_response()
        }
        "broken.mp3" => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"detail": "Converter crashed"})),
        )
            .into_response(),
        "new.mp3" => Json(json!({"status": "starting", "progress": null})).into_response(),
        _ => Json(json!({
            "filename": filename,
            "status": "converting",
            "progress": 42.7,
            "current_chunk": 3,
            "total_chunks": 7,
            "message": "Converting chunk 3 of 7"
        }))
        .into_response(),
    }
}

async fn delete_audiobook(State(state): State<Shared>, Path(filename): Path<String>) -> Response {
    if filename == "locked.mp3" {
        return (
            StatusCode::CONFLICT,
            Json(json!({"detail": "File is in use"})),
        )
            .into_response();
    }
    state.lock().unwrap().deleted.push(filename);
    Json(json!({"message": "Deleted"})).into_response()
}

async fn chapters(Path(filename): Path<String>) -> Response {
    if filename != "tale.mp3" {
        return (StatusCode::NOT_FOUND, Json(json!({"detail": "Not found"}))).into_response();
    }
    Json(json!({
        "title": "A Tale",
        "chapters": [
            {"title": "Opening", "timestamp": 0.0},
            {"title": "Middle", "timestamp": 120.5}
        ]
    }))
    .into_response()
}

async fn audio(headers: HeaderMap) -> Response {
    let start = headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("bytes="))
        .and_then(|value| value.trim_end_matches('-').parse::<usize>().ok());

    match start {
        Some(start) => (StatusCode::PARTIAL_CONTENT, AUDIO[start..].to_vec()).into_response(),
        None => AUDIO.to_vec().into_response(),
    }
}

/// Serve a stand-in backend on a random local port
async fn spawn_backend() -> (ConverterClient, Shared) {
    tracing_init();
    let state = Shared::default();

    let app = Router::new()
        .route("/library", get(library))
        .route("/upload", post(upload))
        .route("/convert", post(convert))
        .route("/preview", post(preview))
        .route("/conversion-status/:filename", get(conversion_status))
        .route("/audiobook/:filename", delete(delete_audiobook))
        .route("/chapters/:filename", get(chapters))
        .route("/audio/:filename", get(audio))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });

    let client = ConverterClient::new(&format!("http://{}/", addr), Duration::from_secs(5)).unwrap();
    (client, state)
}

#[tokio::test]
async fn test_library_entries_default_to_completed() {
    let (client, _state) = spawn_backend().await;

    let entries = client.library().await.unwrap();
    assert_eq!(
        entries,
        vec![
            AudiobookEntry::completed("a.mp3"),
            AudiobookEntry::converting("b.mp3"),
            AudiobookEntry {
                filename: "legacy.mp3".to_string(),
                status: EntryStatus::Completed
            },
        ]
    );
}

#[tokio::test]
async fn test_filenames_round_trip_through_paths() {
    let (client, state) = spawn_backend().await;
    let names = [
        "my book.mp3",
        "Война и мир.mp3",
        "a&b#c?d.mp3",
        "100% + more.mp3",
        "café ☕.mp3",
    ];

    for name in names {
        let status = client.conversion_status(name).await.unwrap();
        assert_eq!(status.filename, name);
        assert_eq!(status.status, JobStatus::Converting);
    }

    assert_eq!(state.lock().unwrap().status_filenames, names);
}

#[tokio::test]
async fn test_status_body_is_parsed() {
    let (client, _state) = spawn_backend().await;

    let status = client.conversion_status("book.mp3").await.unwrap();
    assert_eq!(status.progress, 42);
    assert_eq!(status.current_chunk, 3);
    assert_eq!(status.total_chunks, 7);
    assert_eq!(status.message, "Converting chunk 3 of 7");

    // Fresh jobs report `starting` and no progress yet
    let status = client.conversion_status("new.mp3").await.unwrap();
    assert_eq!(status.filename, "new.mp3");
    assert_eq!(status.status, JobStatus::Queued);
    assert_eq!(status.progress, 0);
}

#[tokio::test]
async fn test_unknown_job_is_not_found_status() {
    let (client, _state) = spawn_backend().await;

    let status = client.conversion_status("missing.mp3").await.unwrap();
    assert_eq!(status.status, JobStatus::NotFound);
    assert!(status.is_terminal());
}

#[tokio::test]
async fn test_server_error_detail_is_unwrapped() {
    let (client, _state) = spawn_backend().await;

    match client.conversion_status("broken.mp3").await {
        Err(ApiError::Server { status, detail }) => {
            assert_eq!(status, 500);
            assert_eq!(detail, "Converter crashed");
        }
        other => panic!("Expected server error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_upload_streams_file_and_reports_progress() {
    let (client, state) = spawn_backend().await;
    let events = Subscribers::new();
    let mut progress = events.subscribe_all();

    let data = Bytes::from(vec![7u8; 300 * 1024]);
    let reporter = Arc::new(UploadProgressReporter::new(
        "big book.pdf".to_string(),
        data.len() as u64,
        events,
    ));

    let stored = client
        .upload("big book.pdf", data, reporter.clone())
        .await
        .unwrap();

    assert_eq!(stored, "big book.pdf");
    assert_eq!(
        state.lock().unwrap().uploads,
        vec![("big book.pdf".to_string(), 300 * 1024)]
    );
    assert_eq!(reporter.percent(), 100);

    let mut percents = Vec::new();
    while let Ok(UploadProgress::Progress { percent, .. }) = progress.try_recv() {
        percents.push(percent);
    }
    assert!(percents.len() > 1);
    assert_eq!(percents.last(), Some(&100));
}

#[tokio::test]
async fn test_convert_request_body() {
    let (client, state) = spawn_backend().await;

    let ack = client
        .convert("book.pdf", &VoiceSelection::default())
        .await
        .unwrap();
    assert_eq!(ack.output_filename.as_deref(), Some("book.mp3"));

    let ack = client
        .convert(
            "notes.txt",
            &VoiceSelection::Single {
                voice: "en-US-AriaNeural".to_string(),
            },
        )
        .await
        .unwrap();
    assert_eq!(ack.output_filename, None);

    let bodies = state.lock().unwrap().convert_bodies.clone();
    assert_eq!(
        bodies[0],
        json!({
            "filename": "book.pdf",
            "narrator_voice_id": "en-US-GuyNeural",
            "dialogue_voice_id": "en-US-JennyNeural",
            "emphasis_voice_id": "en-US-DavisNeural"
        })
    );
    assert_eq!(
        bodies[1],
        json!({"filename": "notes.txt", "voice_id": "en-US-AriaNeural"})
    );

    let err = client
        .convert("busy.pdf", &VoiceSelection::default())
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Server error 503: Converter busy");
}

#[tokio::test]
async fn test_delete_refusal_is_delete_error() {
    let (client, state) = spawn_backend().await;

    client.delete_audiobook("old book.mp3").await.unwrap();
    assert_eq!(state.lock().unwrap().deleted, vec!["old book.mp3"]);

    match client.delete_audiobook("locked.mp3").await {
        Err(ApiError::Delete { filename, detail }) => {
            assert_eq!(filename, "locked.mp3");
            assert_eq!(detail, "File is in use");
        }
        other => panic!("Expected delete error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_chapters() {
    let (client, _state) = spawn_backend().await;

    let list = client.chapters("tale.mp3").await.unwrap();
    assert_eq!(list.title.as_deref(), Some("A Tale"));
    assert_eq!(list.chapters.len(), 2);
    assert_eq!(list.chapters[1].timestamp, 120.5);

    let list = client.chapters("unknown.mp3").await.unwrap();
    assert!(list.chapters.is_empty());
    assert_eq!(list.title, None);
}

#[tokio::test]
async fn test_audio_and_preview_bytes() {
    let (client, _state) = spawn_backend().await;

    let all = client.fetch_audio("tale.mp3", None).await.unwrap();
    assert_eq!(&all[..], AUDIO);

    let tail = client
        .fetch_audio("tale.mp3", Some(ByteRange::from(4)))
        .await
        .unwrap();
    assert_eq!(&tail[..], b"456789");

    let sample = client
        .preview("book.pdf", &VoiceSelection::default())
        .await
        .unwrap();
    assert_eq!(&sample[..], b"ID3sample");

    let err = client
        .preview("nothing.pdf", &VoiceSelection::default())
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Server error 404: no such document");
}

#[tokio::test]
async fn test_unreachable_backend_is_network_error() {
    tracing_init();
    let client = ConverterClient::new("http://127.0.0.1:1", Duration::from_secs(2)).unwrap();

    let err = client.library().await.unwrap_err();
    assert!(err.is_network());
}
