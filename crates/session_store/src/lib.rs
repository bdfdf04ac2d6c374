//! JSONL transcript persistence.
//!
//! A session file lives under `<cwd>/.agent/sessions/` and holds one header
//! line followed by parent-linked entries, one conversation turn each.

mod error;
mod listing;
mod paths;
mod replay;
mod schema;
mod store;

pub use error::SessionStoreError;
pub use listing::SessionSummary;
pub use paths::{session_file_name, session_root};
pub use schema::{EntryRecordType, SessionEntry, SessionEntryKind, SessionHeader, SessionRecordType, SESSION_VERSION};
pub use store::SessionStore;
