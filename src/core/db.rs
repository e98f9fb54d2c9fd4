//! SQLite connection helpers and the per-path lock map backing every
//! derived index (metadata, relation, session).
//!
//! # Locking model
//!
//! Each index file gets its own `Mutex<()>`, looked up by path in a
//! process-wide map. This mirrors the "no single global lock" requirement:
//! two stores never block each other, but operations against the *same*
//! index file are serialized. Locks never span I/O beyond the SQLite call
//! itself.

use crate::core::error::PortError;
use rusqlite::Connection;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

/// Open a SQLite connection with Port 42's standard pragmas.
///
/// Enables WAL mode for concurrent readers, a 5-second busy timeout for
/// lock contention, and foreign key enforcement.
pub fn db_connect(db_path: &Path) -> Result<Connection, PortError> {
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))?;
    conn.execute("PRAGMA foreign_keys=ON;", [])?;
    Ok(conn)
}

fn lock_map() -> &'static Mutex<HashMap<PathBuf, Arc<Mutex<()>>>> {
    static LOCKS: OnceLock<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> = OnceLock::new();
    LOCKS.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Returns the lock guarding `db_path`, creating it on first use.
pub fn get_db_lock(db_path: &Path) -> Arc<Mutex<()>> {
    let mut map = lock_map().lock().unwrap_or_else(|e| e.into_inner());
    map.entry(db_path.to_path_buf())
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .clone()
}

/// Run `f` with a connection to `db_path`, serialized against any other
/// caller touching the same file.
pub fn with_conn<F, R>(db_path: &Path, f: F) -> Result<R, PortError>
where
    F: FnOnce(&Connection) -> Result<R, PortError>,
{
    let lock = get_db_lock(db_path);
    let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
    let conn = db_connect(db_path)?;
    f(&conn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_db_connect_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("nested").join("test.db");
        let conn = db_connect(&db_path).unwrap();
        conn.execute("CREATE TABLE t (id INTEGER)", []).unwrap();
        assert!(db_path.exists());
    }

    #[test]
    fn test_get_db_lock_same_path_same_lock() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("same.db");
        let a = get_db_lock(&db_path);
        let b = get_db_lock(&db_path);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_with_conn_runs_closure() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("wc.db");
        let result = with_conn(&db_path, |conn| {
            conn.execute("CREATE TABLE t (id INTEGER)", [])?;
            Ok(42)
        })
        .unwrap();
        assert_eq!(result, 42);
    }
}
