//! SQLite persistence for secrets and extended-credential metadata.

pub mod schema;

pub use schema::Database;
