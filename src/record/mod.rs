mod error;
mod sqlite;
mod store;
mod types;

pub use error::{RecordError, RecordResult};
pub use sqlite::SqliteRecordStore;
pub use store::{InstallRecordStore, MemoryRecordStore};
pub use types::{InstallRecord, InstallationStatus, RecordUpdate};
