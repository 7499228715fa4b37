use crate::address;
use duckdb::Connection;
use parking_lot::Mutex;
use std::sync::Arc;

/// A sent email ready to be recorded for one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEmail {
    pub owner_email: String,
    pub recipient: String,
    pub timestamp_ms: i64,
}

/// DuckDB-backed store of sent emails, the source the recipient
/// aggregates are computed from.
#[derive(Clone)]
pub struct AnalyticsStore {
    conn: Arc<Mutex<Connection>>,
}

impl AnalyticsStore {
    pub const fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// Returns a reference to the DuckDB connection.
    pub const fn conn(&self) -> &Arc<Mutex<Connection>> {
        &self.conn
    }

    /// Open a fresh connection to the same database.
    ///
    /// Each query gets its own connection so concurrent aggregates are not
    /// serialized on the shared mutex.
    pub fn connect(&self) -> Result<Connection, duckdb::Error> {
        self.conn.lock().try_clone()
    }

    /// Insert sent emails in a single transaction. Returns the number of rows written.
    pub fn record_sent(&self, emails: &[SentEmail]) -> Result<usize, duckdb::Error> {
        if emails.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO sent_emails (owner_email, recipient, recipient_domain, timestamp_ms)
                 VALUES (?, ?, ?, ?)",
            )?;
            for email in emails {
                let domain = address::parse_domain(&email.recipient);
                stmt.execute(duckdb::params![
                    email.owner_email,
                    email.recipient,
                    domain,
                    email.timestamp_ms
                ])?;
            }
        }
        tx.commit()?;

        Ok(emails.len())
    }
}
