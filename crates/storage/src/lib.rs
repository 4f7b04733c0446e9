pub mod sqlite;

pub use sqlite::{DbPool, SqliteStore};
