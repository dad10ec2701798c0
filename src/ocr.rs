use crate::config::OcrConfig;
use crate::error::UploadError;
use crate::types::RawResponse;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

const MAX_SERVER_MESSAGE_CHARS: usize = 500;

/// Image bytes ready to send, with the MIME type detected from its header.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub file_name: String,
    pub mime: &'static str,
    pub bytes: Vec<u8>,
}

impl ImageUpload {
    /// Validate in-memory bytes as an image. Nothing is sent on failure.
    pub fn from_bytes(
        file_name: &str,
        bytes: Vec<u8>,
        max_bytes: u64,
        max_mb: u64,
    ) -> Result<Self, UploadError> {
        let mime = detect_image_mime(&bytes).ok_or_else(|| UploadError::NotAnImage {
            file_name: file_name.to_string(),
        })?;
        if bytes.len() as u64 > max_bytes {
            return Err(UploadError::TooLargeLocal {
                size: bytes.len() as u64,
                max_mb,
            });
        }
        Ok(ImageUpload {
            file_name: file_name.to_string(),
            mime,
            bytes,
        })
    }

    pub fn from_path(path: &Path, config: &OcrConfig) -> Result<Self, UploadError> {
        let bytes = fs::read(path).map_err(UploadError::Read)?;
        let file_name = path
            .file_name()
            .and_then(|o| o.to_str())
            .unwrap_or("ticket")
            .to_string();
        Self::from_bytes(&file_name, bytes, config.max_upload_bytes, config.max_upload_mb())
    }

    /// `file://` reference to a local image, for the ticket's `imageUrl`.
    pub fn local_url(path: &Path) -> String {
        let absolute = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        format!("file://{}", absolute.display())
    }
}

/// MIME type from the file's magic bytes, `None` if it is not an image.
pub fn detect_image_mime(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
        Some("image/png")
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        Some("image/gif")
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some("image/webp")
    } else if bytes.starts_with(b"BM") && bytes.len() >= 14 {
        Some("image/bmp")
    } else if bytes.starts_with(b"II*\0") || bytes.starts_with(b"MM\0*") {
        Some("image/tiff")
    } else {
        None
    }
}

/// HTTP client for the OCR service.
#[derive(Clone)]
pub struct OcrClient {
    client: Client,
    config: OcrConfig,
}

impl OcrClient {
    pub fn new(config: OcrConfig) -> Result<Self, UploadError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(UploadError::Transport)?;
        Ok(OcrClient { client, config })
    }

    pub fn config(&self) -> &OcrConfig {
        &self.config
    }

    /// POST the image as multipart and parse the OCR payload.
    pub async fn upload(
        &self,
        image: &ImageUpload,
        debug_tokens: bool,
    ) -> Result<RawResponse, UploadError> {
        let url = self.config.endpoint(debug_tokens);
        info!(
            url = %url,
            field = %self.config.file_field,
            name = %image.file_name,
            size = image.bytes.len(),
            mime = image.mime,
            "uploading ticket image"
        );

        let part = Part::bytes(image.bytes.clone())
            .file_name(image.file_name.clone())
            .mime_str(image.mime)
            .map_err(UploadError::Transport)?;
        let form = Form::new().part(self.config.file_field.clone(), part);

        let response = self
            .client
            .post(&url)
            .header(reqwest::header::ACCEPT, "application/json")
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "OCR request failed before a response");
                UploadError::Transport(e)
            })?;

        let status = response.status();
        let body = response.text().await.map_err(UploadError::Transport)?;
        if !status.is_success() {
            let err = error_for_status(status.as_u16(), &body, self.config.max_upload_mb());
            warn!(
                status = status.as_u16(),
                server_message = err.server_message().unwrap_or(""),
                "OCR service rejected upload"
            );
            return Err(err);
        }

        debug!(bytes = body.len(), "OCR response received");
        serde_json::from_str::<RawResponse>(&body)
            .map_err(|e| UploadError::InvalidResponse(e.to_string()))
    }
}

/// Map a non-2xx response to the error taxonomy.
pub(crate) fn error_for_status(status: u16, body: &str, max_mb: u64) -> UploadError {
    let server_message = extract_server_message(body);
    match status {
        413 => UploadError::FileTooLarge {
            max_mb,
            server_message,
        },
        400 => UploadError::InvalidFormat { server_message },
        _ => UploadError::Server {
            status,
            server_message,
        },
    }
}

/// Best-effort message from an error body: `message`, `error` or `detail`
/// of a JSON object, the whole JSON otherwise, or trimmed plain text.
pub(crate) fn extract_server_message(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    let message = match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(json) => ["message", "error", "detail"]
            .iter()
            .find_map(|key| json.get(*key).and_then(|v| v.as_str()).map(String::from))
            .unwrap_or_else(|| json.to_string()),
        Err(_) => trimmed.to_string(),
    };
    Some(truncate_chars(&message, MAX_SERVER_MESSAGE_CHARS))
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}
