use crate::aggregate::{self, Summary};
use crate::config::OcrConfig;
use crate::db::SnapshotStorage;
use crate::ocr::OcrClient;
use crate::store::TicketStore;
use crate::types::{Ticket, TicketPatch};
use crate::upload::{CancelSignal, UploadCoordinator};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::sync::Mutex;

/// Shared application state: the single ticket store and the upload path.
pub struct AppState<S> {
    pub store: Mutex<TicketStore<S>>,
    pub uploader: UploadCoordinator,
}

impl<S: SnapshotStorage> AppState<S> {
    pub fn new(storage: S, config: OcrConfig) -> Result<Self, String> {
        let client = OcrClient::new(config).map_err(|e| e.to_string())?;
        Ok(AppState {
            store: Mutex::new(TicketStore::open(storage)),
            uploader: UploadCoordinator::new(client),
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub ocr_endpoint: String,
    pub tickets: usize,
    pub visible_tickets: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_category: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTicketPayload {
    pub id: String,
    pub patch: TicketPatch,
}

pub async fn get_status<S: SnapshotStorage>(state: &AppState<S>) -> StatusReport {
    let store = state.store.lock().await;
    StatusReport {
        ocr_endpoint: state.uploader.client().config().endpoint(false),
        tickets: store.len(),
        visible_tickets: store.visible_tickets().len(),
        filter_category: store.filter_category().map(String::from),
    }
}

/// Upload an image and store the resulting ticket. `Ok(None)` means the
/// upload was cancelled and nothing was stored. The store stays available
/// to other calls while the request is in flight.
pub async fn upload_ticket<S: SnapshotStorage>(
    state: &AppState<S>,
    file_path: &str,
    debug_tokens: bool,
    cancel: &mut CancelSignal,
) -> Result<Option<Ticket>, String> {
    let data = state
        .uploader
        .fetch_path(Path::new(file_path), debug_tokens, cancel)
        .await
        .map_err(|e| e.to_string())?;
    match data {
        Some(data) => Ok(Some(state.store.lock().await.create(data))),
        None => Ok(None),
    }
}

/// Tickets newest first; `all` ignores the active filter.
pub async fn get_tickets<S: SnapshotStorage>(state: &AppState<S>, all: bool) -> Vec<Ticket> {
    let store = state.store.lock().await;
    if all {
        store.tickets().to_vec()
    } else {
        store.visible_tickets().into_iter().cloned().collect()
    }
}

pub async fn get_ticket<S: SnapshotStorage>(state: &AppState<S>, id: &str) -> Result<Ticket, String> {
    let store = state.store.lock().await;
    store
        .get(id)
        .cloned()
        .ok_or_else(|| format!("Ticket not found: {}", id))
}

/// Apply a partial edit. Returns the edited ticket, or `None` if `id` is unknown.
pub async fn update_ticket<S: SnapshotStorage>(
    state: &AppState<S>,
    payload: UpdateTicketPayload,
) -> Option<Ticket> {
    let mut store = state.store.lock().await;
    if store.update(&payload.id, payload.patch) {
        store.get(&payload.id).cloned()
    } else {
        None
    }
}

pub async fn remove_ticket<S: SnapshotStorage>(state: &AppState<S>, id: &str) -> Option<Ticket> {
    state.store.lock().await.remove(id)
}

pub async fn clear_tickets<S: SnapshotStorage>(state: &AppState<S>) {
    state.store.lock().await.clear();
}

pub async fn set_filter_category<S: SnapshotStorage>(state: &AppState<S>, category: Option<String>) {
    state.store.lock().await.set_filter(category);
}

/// Select the `index`-th category group of the current summary as the filter.
/// Picking the uncategorized group shows everything again.
pub async fn select_category_group<S: SnapshotStorage>(
    state: &AppState<S>,
    index: usize,
) -> Result<Option<String>, String> {
    let mut store = state.store.lock().await;
    let groups = aggregate::by_category(store.visible_tickets());
    let group = groups
        .get(index)
        .ok_or_else(|| format!("No category group #{} (have {})", index, groups.len()))?;
    let filter = group.key.as_filter();
    store.set_filter(filter.clone());
    Ok(filter)
}

/// Totals and groupings over the tickets passing the active filter.
pub async fn get_summary<S: SnapshotStorage>(state: &AppState<S>) -> Summary {
    let store = state.store.lock().await;
    aggregate::summarize(store.visible_tickets())
}
