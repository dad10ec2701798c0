pub mod aggregate;
pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod normalize;
pub mod ocr;
pub mod store;
pub mod types;
pub mod upload;

pub use aggregate::{CategoryKey, CategoryTotal, MerchantTotal, Summary};
pub use db::{Db, MemoryStorage, SnapshotStorage};
pub use error::{StorageError, UploadError};
pub use normalize::{normalize_response, normalize_response_at, UNCATEGORIZED_LABEL};
pub use store::{TicketStore, STORAGE_KEY};
pub use types::{CategoryDebug, KeywordMatch, RawResponse, Snapshot, Ticket, TicketData, TicketPatch, Token};
pub use upload::{cancel_pair, CancelHandle, CancelSignal, UploadCoordinator, UploadOutcome};
