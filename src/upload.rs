use crate::db::SnapshotStorage;
use crate::error::UploadError;
use crate::normalize::normalize_response;
use crate::ocr::{ImageUpload, OcrClient};
use crate::store::TicketStore;
use crate::types::{Ticket, TicketData};
use std::path::Path;
use tokio::sync::watch;
use tracing::info;

/// Requests cancellation of an in-flight upload.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Observed by the upload. Fires once the paired handle cancels.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    /// A signal nobody can fire.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        CancelSignal { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves when cancelled; never resolves if the handle was dropped
    /// without cancelling.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelSignal { rx })
}

#[derive(Debug, Clone, PartialEq)]
pub enum UploadOutcome {
    Created(Ticket),
    /// Cancelled before the response arrived; the store was not touched.
    Cancelled,
}

/// Drives one upload: send, normalize, then create in the store.
///
/// The network phase (`fetch*`) never sees the store, so callers sharing the
/// store only need it for the final `create`. A failed or cancelled upload
/// leaves the store exactly as it was.
pub struct UploadCoordinator {
    client: OcrClient,
}

impl UploadCoordinator {
    pub fn new(client: OcrClient) -> Self {
        UploadCoordinator { client }
    }

    pub fn client(&self) -> &OcrClient {
        &self.client
    }

    /// Validate the file at `path`, upload it and normalize the response.
    /// `Ok(None)` means the upload was cancelled.
    pub async fn fetch_path(
        &self,
        path: &Path,
        debug_tokens: bool,
        cancel: &mut CancelSignal,
    ) -> Result<Option<TicketData>, UploadError> {
        let image = ImageUpload::from_path(path, self.client.config())?;
        let image_url = ImageUpload::local_url(path);
        self.fetch(&image, image_url, debug_tokens, cancel).await
    }

    pub async fn fetch(
        &self,
        image: &ImageUpload,
        image_url: String,
        debug_tokens: bool,
        cancel: &mut CancelSignal,
    ) -> Result<Option<TicketData>, UploadError> {
        if cancel.is_cancelled() {
            return Ok(None);
        }
        let raw = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(name = %image.file_name, "upload cancelled, result discarded");
                return Ok(None);
            }
            result = self.client.upload(image, debug_tokens) => result?,
        };
        let mut data = normalize_response(raw);
        data.image_url = image_url;
        Ok(Some(data))
    }

    /// `fetch_path`, then create the ticket in `store`.
    pub async fn upload_path<S: SnapshotStorage>(
        &self,
        store: &mut TicketStore<S>,
        path: &Path,
        debug_tokens: bool,
        cancel: &mut CancelSignal,
    ) -> Result<UploadOutcome, UploadError> {
        let data = self.fetch_path(path, debug_tokens, cancel).await?;
        Ok(create_from(store, data))
    }

    pub async fn upload<S: SnapshotStorage>(
        &self,
        store: &mut TicketStore<S>,
        image: &ImageUpload,
        image_url: String,
        debug_tokens: bool,
        cancel: &mut CancelSignal,
    ) -> Result<UploadOutcome, UploadError> {
        let data = self.fetch(image, image_url, debug_tokens, cancel).await?;
        Ok(create_from(store, data))
    }
}

fn create_from<S: SnapshotStorage>(store: &mut TicketStore<S>, data: Option<TicketData>) -> UploadOutcome {
    match data {
        Some(data) => UploadOutcome::Created(store.create(data)),
        None => UploadOutcome::Cancelled,
    }
}
