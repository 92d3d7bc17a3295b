//! Bundled storage backends.

mod sqlite;

pub use sqlite::{SqliteStore, StoredRow};
