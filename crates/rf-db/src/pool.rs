//! r2d2 pool over SQLite. Every pool comes back migrated.

use std::sync::atomic::{AtomicU64, Ordering};

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rf_core::{Error, Result};

use crate::migrations;

pub type DbPool = Pool<SqliteConnectionManager>;
pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// Pragmas applied to each file-backed connection. WAL lets workers read
/// the queue while another connection holds the write lock.
const FILE_PRAGMAS: &str = "PRAGMA foreign_keys = ON;
     PRAGMA journal_mode = WAL;
     PRAGMA synchronous = NORMAL;
     PRAGMA busy_timeout = 5000;";

const FILE_POOL_SIZE: u32 = 8;
const MEMORY_POOL_SIZE: u32 = 4;

/// Open (or create) the job store at `db_path`.
pub fn init_pool(db_path: &str) -> Result<DbPool> {
    let manager =
        SqliteConnectionManager::file(db_path).with_init(|c| c.execute_batch(FILE_PRAGMAS));
    migrated(manager, FILE_POOL_SIZE)
}

/// A private in-memory store.
///
/// Each call gets its own shared-cache database name, so connections in one
/// pool see the same tables while separate pools stay isolated.
pub fn init_memory_pool() -> Result<DbPool> {
    static NEXT: AtomicU64 = AtomicU64::new(0);
    let uri = format!(
        "file:reelforge_mem_{}?mode=memory&cache=shared",
        NEXT.fetch_add(1, Ordering::Relaxed)
    );
    let manager = SqliteConnectionManager::file(uri)
        .with_init(|c| c.execute_batch("PRAGMA foreign_keys = ON;"));
    migrated(manager, MEMORY_POOL_SIZE)
}

fn migrated(manager: SqliteConnectionManager, size: u32) -> Result<DbPool> {
    let pool = Pool::builder()
        .max_size(size)
        .build(manager)
        .map_err(|e| Error::database(format!("cannot build connection pool: {e}")))?;
    migrations::run_migrations(&*get_conn(&pool)?)?;
    Ok(pool)
}

pub fn get_conn(pool: &DbPool) -> Result<PooledConnection> {
    pool.get()
        .map_err(|e| Error::database(format!("no database connection available: {e}")))
}
