use crate::address::UNKNOWN_DOMAIN;
use crate::source::{RecipientScope, SentToRow};
use duckdb::types::Value;
use duckdb::Connection;

/// Grouping column for the recipient aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipientDimension {
    Address,
    Domain,
}

impl RecipientDimension {
    /// Grouping expression. Recipients without a parseable domain share the
    /// same bucket the in-process tally uses.
    fn group_expr(self) -> String {
        match self {
            Self::Address => "recipient".to_string(),
            Self::Domain => format!("COALESCE(recipient_domain, '{UNKNOWN_DOMAIN}')"),
        }
    }
}

/// Top recipients the owner sent to, most frequent first.
pub fn query_most_sent_to(
    conn: &Connection,
    scope: &RecipientScope,
) -> Result<Vec<SentToRow>, duckdb::Error> {
    query_top(conn, scope, RecipientDimension::Address)
}

/// Top recipient domains the owner sent to, most frequent first.
pub fn query_domains_most_sent_to(
    conn: &Connection,
    scope: &RecipientScope,
) -> Result<Vec<SentToRow>, duckdb::Error> {
    query_top(conn, scope, RecipientDimension::Domain)
}

/// Ranked count of sent emails grouped by `dimension`.
///
/// Ties are broken by name so the ranking is deterministic. Recipients
/// without a parseable domain are counted under [`UNKNOWN_DOMAIN`].
pub fn query_top(
    conn: &Connection,
    scope: &RecipientScope,
    dimension: RecipientDimension,
) -> Result<Vec<SentToRow>, duckdb::Error> {
    let expr = dimension.group_expr();

    let mut filters = vec!["owner_email = ?"];
    let mut params: Vec<Value> = vec![Value::Text(scope.owner_email.clone())];
    if let Some(from) = scope.from_date {
        filters.push("timestamp_ms >= ?");
        params.push(Value::BigInt(from));
    }
    if let Some(to) = scope.to_date {
        filters.push("timestamp_ms <= ?");
        params.push(Value::BigInt(to));
    }
    params.push(Value::BigInt(
        i64::try_from(scope.limit).unwrap_or(i64::MAX),
    ));

    // Grouping expression comes from a fixed enum, so interpolating it is safe
    let sql = format!(
        "SELECT {expr} AS name, COUNT(*) AS total
         FROM sent_emails
         WHERE {}
         GROUP BY name
         ORDER BY total DESC, name ASC
         LIMIT ?",
        filters.join(" AND ")
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(duckdb::params_from_iter(params.iter()), |row| {
            Ok(SentToRow {
                to: row.get(0)?,
                count: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    tracing::debug!(
        owner = %scope.owner_email,
        period = %scope.period,
        dimension = ?dimension,
        rows = rows.len(),
        "Recipient aggregate query"
    );

    Ok(rows)
}
