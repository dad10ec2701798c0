use thiserror::Error;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("could not prepare storage location: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage lock poisoned")]
    Poisoned,
}

/// Failures of the upload path. `Display` is the message shown to the user;
/// status and server text stay available for logging.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Please select a valid image file (JPG or PNG).")]
    NotAnImage { file_name: String },
    #[error("The file is too large. Maximum {max_mb}MB.")]
    TooLargeLocal { size: u64, max_mb: u64 },
    #[error("Could not read file: {0}")]
    Read(#[source] std::io::Error),
    #[error("Could not reach the server. Check that the backend is running.")]
    Transport(#[source] reqwest::Error),
    #[error("The file is too large. Maximum {max_mb}MB.")]
    FileTooLarge {
        max_mb: u64,
        server_message: Option<String>,
    },
    #[error("Invalid file format. Use JPG or PNG.")]
    InvalidFormat { server_message: Option<String> },
    #[error("{}", server_error_message(*status, server_message.as_deref()))]
    Server {
        status: u16,
        server_message: Option<String>,
    },
    #[error("The server returned an unreadable response: {0}")]
    InvalidResponse(String),
}

fn server_error_message(status: u16, server_message: Option<&str>) -> String {
    match server_message {
        Some(msg) => format!("Server error ({}): {}", status, msg),
        None => format!("Server error ({}).", status),
    }
}

impl UploadError {
    /// HTTP status of a protocol error.
    pub fn status(&self) -> Option<u16> {
        match self {
            UploadError::FileTooLarge { .. } => Some(413),
            UploadError::InvalidFormat { .. } => Some(400),
            UploadError::Server { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Best-effort message extracted from the server's error body.
    pub fn server_message(&self) -> Option<&str> {
        match self {
            UploadError::FileTooLarge { server_message, .. }
            | UploadError::InvalidFormat { server_message }
            | UploadError::Server { server_message, .. } => server_message.as_deref(),
            _ => None,
        }
    }

    /// Rejected before any network call was made.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            UploadError::NotAnImage { .. } | UploadError::TooLargeLocal { .. } | UploadError::Read(_)
        )
    }
}
