use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_DIR: &str = "ticket-scanner";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: &str = "8000";
const DEFAULT_FIELD: &str = "file";
const DEFAULT_TIMEOUT_SECS: u64 = 120;
const DEFAULT_MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;

/// Where and how to reach the OCR service.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrConfig {
    /// Base URL without trailing slash, e.g. `http://127.0.0.1:8000`.
    pub base_url: String,
    /// Multipart field carrying the image.
    pub file_field: String,
    pub timeout: Duration,
    pub max_upload_bytes: u64,
}

impl Default for OcrConfig {
    fn default() -> Self {
        OcrConfig {
            base_url: format!("http://{}:{}", DEFAULT_HOST, DEFAULT_PORT),
            file_field: DEFAULT_FIELD.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

impl OcrConfig {
    pub fn with_base_url(base_url: &str) -> Self {
        OcrConfig {
            base_url: base_url.trim_end_matches('/').to_string(),
            ..Default::default()
        }
    }

    /// Read from the process environment after loading `.env` files.
    pub fn from_env() -> Self {
        load_env();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let base_url = match get("TICKETS_API_URL") {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => {
                let host = get("TICKETS_BACKEND_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string());
                let port = get("TICKETS_BACKEND_PORT").unwrap_or_else(|| DEFAULT_PORT.to_string());
                format!("http://{}:{}", host, port)
            }
        };
        let timeout_secs = get("TICKETS_TIMEOUT_SECS")
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        let max_upload_bytes = get("TICKETS_MAX_UPLOAD_BYTES")
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES);

        OcrConfig {
            base_url,
            file_field: get("TICKETS_UPLOAD_FIELD").unwrap_or_else(|| DEFAULT_FIELD.to_string()),
            timeout: Duration::from_secs(timeout_secs),
            max_upload_bytes,
        }
    }

    /// Upload endpoint, with the token debug flag when requested.
    pub fn endpoint(&self, debug_tokens: bool) -> String {
        let mut url = format!("{}/api/ocr", self.base_url);
        if debug_tokens {
            url.push_str("?debug_tokens=true");
        }
        url
    }

    pub fn max_upload_mb(&self) -> u64 {
        (self.max_upload_bytes / (1024 * 1024)).max(1)
    }
}

/// Per-user data directory, e.g. `~/.local/share/ticket-scanner`.
pub fn app_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

/// SQLite file for persisted tickets: `TICKETS_DB_PATH` or the app data dir.
pub fn db_path() -> PathBuf {
    load_env();
    match std::env::var("TICKETS_DB_PATH") {
        Ok(p) if !p.trim().is_empty() => PathBuf::from(p.trim()),
        _ => app_data_dir().join("tickets.db"),
    }
}

/// Load `.env` from the working directory, then from the app data dir.
/// Variables already set win.
pub fn load_env() {
    let _ = dotenvy::dotenv();
    let env_path = app_data_dir().join(".env");
    if Path::new(&env_path).exists() {
        let _ = dotenvy::from_path(&env_path);
    }
}
