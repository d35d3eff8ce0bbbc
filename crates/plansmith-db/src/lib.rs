//! PostgreSQL persistence for plansmith sessions.

pub mod config;
pub mod pool;
pub mod store;

pub use config::DbConfig;
pub use store::PgSessionStore;
