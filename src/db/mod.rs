mod from_row;
mod schema;
pub mod queries;

pub use from_row::{FromRow, query_all, query_one};
pub use schema::init_db;

use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::buyer::PaymentsApi;
use crate::config::Config;
use crate::jwt::TokenKeys;
use crate::notify::Notifier;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Application state shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub config: Arc<Config>,
    /// Keys for issuing request tokens and verifying processor notices
    pub keys: Arc<TokenKeys>,
    /// Processor buyer/transaction lookup
    pub payments: Arc<dyn PaymentsApi>,
    /// Outbound notification sink (receipts, refund status mail)
    pub notifier: Arc<dyn Notifier>,
}

/// Connections enforce foreign keys and wait on a locked database instead of
/// failing, so concurrent postbacks serialize on SQLite's write lock.
pub fn create_pool(database_path: &str) -> Result<DbPool, r2d2::Error> {
    let manager = SqliteConnectionManager::file(database_path).with_init(|conn| {
        conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")
    });
    Pool::builder().max_size(10).build(manager)
}
