use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use ticket_scanner_lib::commands::{self, AppState};
use ticket_scanner_lib::config::OcrConfig;
use ticket_scanner_lib::ocr::OcrClient;
use ticket_scanner_lib::{
    cancel_pair, CancelSignal, MemoryStorage, TicketStore, UploadCoordinator, UploadError,
    UploadOutcome,
};

const PNG_BYTES: &[u8] = &[
    0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 13, b'I', b'H', b'D', b'R',
];

#[derive(Clone)]
struct Reply {
    status: StatusCode,
    body: String,
    delay: Duration,
}

#[derive(Default)]
struct Seen {
    requests: Vec<(HashMap<String, String>, HeaderMap, Bytes)>,
}

struct MockState {
    reply: Reply,
    seen: Mutex<Seen>,
}

async fn spawn_mock_server(reply: Reply) -> (String, Arc<MockState>) {
    async fn handler(
        State(state): State<Arc<MockState>>,
        Query(params): Query<HashMap<String, String>>,
        headers: HeaderMap,
        body: Bytes,
    ) -> impl IntoResponse {
        state
            .seen
            .lock()
            .unwrap()
            .requests
            .push((params, headers, body));
        tokio::time::sleep(state.reply.delay).await;
        (
            state.reply.status,
            [("content-type", "application/json")],
            state.reply.body.clone(),
        )
    }

    let state = Arc::new(MockState {
        reply,
        seen: Mutex::new(Seen::default()),
    });
    let app = Router::new()
        .route("/api/ocr", post(handler))
        .with_state(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), state)
}

fn ok_json(body: Value) -> Reply {
    Reply {
        status: StatusCode::OK,
        body: body.to_string(),
        delay: Duration::ZERO,
    }
}

fn status(status: StatusCode, body: &str) -> Reply {
    Reply {
        status,
        body: body.to_string(),
        delay: Duration::ZERO,
    }
}

fn coordinator(base_url: &str) -> UploadCoordinator {
    UploadCoordinator::new(OcrClient::new(OcrConfig::with_base_url(base_url)).unwrap())
}

fn image_file(dir: &tempfile::TempDir, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

#[tokio::test]
async fn sparse_response_becomes_a_stored_ticket() {
    let (url, mock) = spawn_mock_server(ok_json(json!({
        "fecha": null,
        "monto": null,
        "monto_raw": null,
        "merchant": "Farmacia Central",
        "texto": "FARMACIA CENTRAL\nTOTAL 4.250,00",
        "texto_lines": ["FARMACIA CENTRAL", "TOTAL 4.250,00"],
        "tokens": [{ "text": "TOTAL", "conf": 0.93, "left": 10, "top": 220, "width": 64, "height": 18 }],
        "monto_debug": ["no parse", { "chosen": "4.250,00", "parsed": null }],
        "category": "health",
        "category_debug": { "matched": ["farmacia"] }
    })))
    .await;
    let dir = tempfile::tempdir().unwrap();
    let path = image_file(&dir, "receipt.png", PNG_BYTES);
    let mut store = TicketStore::open(MemoryStorage::new());

    let outcome = coordinator(&url)
        .upload_path(&mut store, &path, true, &mut CancelSignal::never())
        .await
        .unwrap();

    let ticket = match outcome {
        UploadOutcome::Created(t) => t,
        UploadOutcome::Cancelled => panic!("not cancelled"),
    };
    assert_eq!(store.tickets().to_vec(), vec![ticket.clone()]);
    assert_eq!(ticket.data.amount, 0.0);
    assert_eq!(ticket.data.amount_raw, "");
    assert!(!ticket.data.date.is_empty());
    assert_eq!(ticket.data.merchant, "Farmacia Central");
    assert_eq!(ticket.data.category.as_deref(), Some("health"));
    assert!(ticket.data.image_url.starts_with("file://"));
    assert!(ticket.data.image_url.ends_with("receipt.png"));
    assert_eq!(ticket.data.tokens.as_ref().unwrap()[0].bbox, [10.0, 220.0, 64.0, 18.0]);
    let debug = ticket.data.amount_debug.as_ref().unwrap();
    assert_eq!(debug[0], "no parse");
    assert!(debug[1].contains("4.250,00"));

    let seen = mock.seen.lock().unwrap();
    assert_eq!(seen.requests.len(), 1);
    let (params, headers, body) = &seen.requests[0];
    assert_eq!(params.get("debug_tokens").map(String::as_str), Some("true"));
    assert_eq!(headers.get("accept").unwrap(), "application/json");
    assert!(headers
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("multipart/form-data"));
    let body = String::from_utf8_lossy(body).to_lowercase();
    assert!(body.contains("name=\"file\""));
    assert!(body.contains("filename=\"receipt.png\""));
    assert!(body.contains("content-type: image/png"));
}

#[tokio::test]
async fn without_debug_flag_no_query_is_sent() {
    let (url, mock) = spawn_mock_server(ok_json(json!({ "texto": "", "texto_lines": [] }))).await;
    let dir = tempfile::tempdir().unwrap();
    let path = image_file(&dir, "r.png", PNG_BYTES);
    let mut store = TicketStore::open(MemoryStorage::new());
    coordinator(&url)
        .upload_path(&mut store, &path, false, &mut CancelSignal::never())
        .await
        .unwrap();
    assert!(mock.seen.lock().unwrap().requests[0].0.is_empty());
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn protocol_errors_leave_the_store_untouched() {
    let cases = [
        (status(StatusCode::PAYLOAD_TOO_LARGE, ""), Some(413), "The file is too large. Maximum 10MB."),
        (
            status(StatusCode::BAD_REQUEST, r#"{"detail":"unsupported"}"#),
            Some(400),
            "Invalid file format. Use JPG or PNG.",
        ),
        (
            status(StatusCode::INTERNAL_SERVER_ERROR, r#"{"message":"tesseract crashed"}"#),
            Some(500),
            "Server error (500): tesseract crashed",
        ),
        (
            status(StatusCode::BAD_GATEWAY, "upstream down"),
            Some(502),
            "Server error (502): upstream down",
        ),
    ];
    for (reply, expected_status, expected_message) in cases {
        let (url, _mock) = spawn_mock_server(reply).await;
        let dir = tempfile::tempdir().unwrap();
        let path = image_file(&dir, "r.png", PNG_BYTES);
        let storage = MemoryStorage::new();
        let mut store = TicketStore::open(&storage);
        store.create(Default::default());
        let before = store.snapshot().clone();

        let err = coordinator(&url)
            .upload_path(&mut store, &path, false, &mut CancelSignal::never())
            .await
            .unwrap_err();
        assert_eq!(err.status(), expected_status);
        assert_eq!(err.to_string(), expected_message);
        assert_eq!(store.snapshot(), &before);
    }
}

#[tokio::test]
async fn unreadable_success_body_is_an_error() {
    let (url, _mock) = spawn_mock_server(status(StatusCode::OK, "<html>oops</html>")).await;
    let dir = tempfile::tempdir().unwrap();
    let path = image_file(&dir, "r.png", PNG_BYTES);
    let mut store = TicketStore::open(MemoryStorage::new());
    let err = coordinator(&url)
        .upload_path(&mut store, &path, false, &mut CancelSignal::never())
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::InvalidResponse(_)));
    assert!(store.is_empty());
}

#[tokio::test]
async fn unreachable_server_is_a_transport_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let dir = tempfile::tempdir().unwrap();
    let path = image_file(&dir, "r.png", PNG_BYTES);
    let mut store = TicketStore::open(MemoryStorage::new());
    let err = coordinator(&format!("http://{}", addr))
        .upload_path(&mut store, &path, false, &mut CancelSignal::never())
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::Transport(_)));
    assert_eq!(
        err.to_string(),
        "Could not reach the server. Check that the backend is running."
    );
    assert!(store.is_empty());
}

#[tokio::test]
async fn non_image_is_rejected_without_contacting_the_server() {
    let (url, mock) = spawn_mock_server(ok_json(json!({ "texto": "x", "texto_lines": [] }))).await;
    let dir = tempfile::tempdir().unwrap();
    let path = image_file(&dir, "invoice.pdf", b"%PDF-1.7\n%%EOF");
    let mut store = TicketStore::open(MemoryStorage::new());
    let err = coordinator(&url)
        .upload_path(&mut store, &path, false, &mut CancelSignal::never())
        .await
        .unwrap_err();
    assert!(err.is_validation());
    assert!(mock.seen.lock().unwrap().requests.is_empty());
    assert!(store.is_empty());
}

#[tokio::test]
async fn cancelled_upload_discards_the_result() {
    let mut reply = ok_json(json!({ "texto": "late", "texto_lines": ["late"] }));
    reply.delay = Duration::from_secs(5);
    let (url, _mock) = spawn_mock_server(reply).await;
    let dir = tempfile::tempdir().unwrap();
    let path = image_file(&dir, "r.png", PNG_BYTES);
    let mut store = TicketStore::open(MemoryStorage::new());

    let (handle, mut signal) = cancel_pair();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.cancel();
    });
    let outcome = coordinator(&url)
        .upload_path(&mut store, &path, false, &mut signal)
        .await
        .unwrap();
    assert_eq!(outcome, UploadOutcome::Cancelled);
    assert!(store.is_empty());
}

#[tokio::test]
async fn upload_command_reports_human_readable_errors() {
    let (url, _mock) = spawn_mock_server(status(StatusCode::PAYLOAD_TOO_LARGE, "")).await;
    let state = AppState::new(MemoryStorage::new(), OcrConfig::with_base_url(&url)).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = image_file(&dir, "r.png", PNG_BYTES);

    let err = commands::upload_ticket(
        &state,
        path.to_str().unwrap(),
        false,
        &mut CancelSignal::never(),
    )
    .await
    .unwrap_err();
    assert_eq!(err, "The file is too large. Maximum 10MB.");
    assert_eq!(commands::get_status(&state).await.tickets, 0);
}

#[tokio::test]
async fn upload_command_stores_ticket() {
    let (url, _mock) = spawn_mock_server(ok_json(json!({
        "fecha": "02/04/2024",
        "monto": 1999.9,
        "monto_raw": "1.999,90",
        "merchant": "Librería",
        "texto": "...",
        "texto_lines": []
    })))
    .await;
    let state = AppState::new(MemoryStorage::new(), OcrConfig::with_base_url(&url)).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = image_file(&dir, "r.jpg", &[0xFF, 0xD8, 0xFF, 0xE0, 0, 0x10]);

    let ticket = commands::upload_ticket(&state, path.to_str().unwrap(), false, &mut CancelSignal::never())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ticket.data.date, "2024-04-02");
    assert_eq!(ticket.data.amount, 1999.9);
    let summary = commands::get_summary(&state).await;
    assert_eq!(summary.count, 1);
    assert_eq!(summary.by_merchant[0].merchant, "Librería");
}

#[tokio::test]
async fn store_stays_readable_while_an_upload_is_in_flight() {
    let mut reply = ok_json(json!({ "merchant": "Lento", "texto": "", "texto_lines": [] }));
    reply.delay = Duration::from_secs(2);
    let (url, _mock) = spawn_mock_server(reply).await;
    let state = AppState::new(MemoryStorage::new(), OcrConfig::with_base_url(&url)).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = image_file(&dir, "r.png", PNG_BYTES);
    let path = path.to_str().unwrap().to_string();

    let mut signal = CancelSignal::never();
    let (uploaded, read_during_upload) = tokio::join!(
        commands::upload_ticket(&state, &path, false, &mut signal),
        async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            tokio::time::timeout(Duration::from_millis(500), commands::get_tickets(&state, true)).await
        }
    );

    let seen = read_during_upload.expect("read blocked by the pending upload");
    assert!(seen.is_empty());
    assert_eq!(uploaded.unwrap().unwrap().data.merchant, "Lento");
    assert_eq!(commands::get_tickets(&state, true).await.len(), 1);
}
