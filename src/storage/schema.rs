//! Schema and pragma setup for the persistence table.

use rusqlite::Connection;
use std::time::Duration;

/// Table holding one JSON-array batch per row.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS persistence (
    id   INTEGER PRIMARY KEY AUTOINCREMENT,
    json TEXT NOT NULL
);
"#;

/// Apply durability and locking pragmas to a connection.
///
/// WAL lets a fetcher's open transaction coexist with plain readers;
/// `synchronous=FULL` makes a committed batch survive power loss.
pub fn apply_pragmas(conn: &Connection, busy_timeout: Duration) -> rusqlite::Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "FULL")?;
    conn.busy_timeout(busy_timeout)?;
    Ok(())
}

/// Create the persistence table if it does not exist.
pub fn initialize_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA)
}

/// Number of batches currently stored.
pub fn count_batches(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM persistence", [], |row| row.get(0))
}

/// Delete rows whose payload carries no records.
///
/// Such rows only appear when empty flushes are written as heartbeats.
pub fn purge_empty_batches(conn: &Connection) -> rusqlite::Result<usize> {
    conn.execute("DELETE FROM persistence WHERE json IN ('', '[]')", [])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let conn = memory();
        initialize_schema(&conn).unwrap();
        assert_eq!(count_batches(&conn).unwrap(), 0);
    }

    #[test]
    fn test_ids_are_assigned() {
        let conn = memory();
        conn.execute("INSERT INTO persistence(json) VALUES ('[1]')", [])
            .unwrap();
        conn.execute("INSERT INTO persistence(json) VALUES ('[2]')", [])
            .unwrap();

        let ids: Vec<i64> = conn
            .prepare("SELECT id FROM persistence ORDER BY id")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_purge_empty_batches() {
        let conn = memory();
        conn.execute_batch(
            "INSERT INTO persistence(json) VALUES ('[]');
             INSERT INTO persistence(json) VALUES ('[\"a\"]');
             INSERT INTO persistence(json) VALUES ('');",
        )
        .unwrap();

        assert_eq!(purge_empty_batches(&conn).unwrap(), 2);
        assert_eq!(count_batches(&conn).unwrap(), 1);
    }
}
