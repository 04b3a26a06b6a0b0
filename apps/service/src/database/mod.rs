/// Persistence layer
///
/// The engine only talks to the [`Store`] trait; [`LibsqlStore`] is the
/// embedded LibSQL implementation the service binary runs with.

pub mod repository;
pub mod migrations;
pub mod models;

pub use repository::{LibsqlStore, Store};

use anyhow::Result;

/// Initialize database with schema
pub async fn initialize_database(conn: &libsql::Connection) -> Result<()> {
    migrations::run_migrations(conn).await
}
