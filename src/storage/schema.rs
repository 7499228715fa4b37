use duckdb::Connection;

/// SQL statement to create the sent emails table.
///
/// One row per recipient of a sent message. `timestamp_ms` is epoch
/// milliseconds, which is the unit `fromDate` / `toDate` are compared against.
pub const CREATE_SENT_EMAILS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS sent_emails (
    owner_email      VARCHAR NOT NULL,
    recipient        VARCHAR NOT NULL,
    recipient_domain VARCHAR,
    timestamp_ms     BIGINT NOT NULL
)
";

/// Initialize the database schema.
pub fn init_schema(conn: &Connection) -> Result<(), duckdb::Error> {
    conn.execute_batch(CREATE_SENT_EMAILS_TABLE)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_schema() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        let mut stmt = conn.prepare("SELECT COUNT(*) FROM sent_emails").unwrap();
        let count: i64 = stmt.query_row([], |row| row.get(0)).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_init_schema_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap(); // Should not error
    }

    #[test]
    fn test_schema_columns() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        conn.execute(
            "INSERT INTO sent_emails (owner_email, recipient, recipient_domain, timestamp_ms)
             VALUES (?, ?, ?, ?)",
            duckdb::params!["me@example.com", "Alice <alice@corp.io>", "corp.io", 1_700_000_000_000_i64],
        )
        .unwrap();

        // Domain is nullable for recipients without a parseable address
        conn.execute(
            "INSERT INTO sent_emails (owner_email, recipient, recipient_domain, timestamp_ms)
             VALUES (?, ?, NULL, ?)",
            duckdb::params!["me@example.com", "undisclosed-recipients:;", 1_700_000_000_000_i64],
        )
        .unwrap();

        let mut stmt = conn.prepare("SELECT COUNT(*) FROM sent_emails").unwrap();
        let count: i64 = stmt.query_row([], |row| row.get(0)).unwrap();
        assert_eq!(count, 2);
    }
}
