use sqlx::SqliteConnection;

use taller_core::numbering::{self, DocumentKind};

use super::RepositoryError;

fn table_for(kind: DocumentKind) -> &'static str {
    match kind {
        DocumentKind::Service => "service",
        DocumentKind::Quote => "quote",
        DocumentKind::WorkOrder => "work_order",
    }
}

/// Allocates the next document number for `kind` in `year`.
///
/// Must run inside the transaction that inserts the numbered row. The `UNIQUE` constraint
/// on `number` turns a lost race into [`RepositoryError::UniqueViolation`].
pub async fn next_number(
    conn: &mut SqliteConnection,
    kind: DocumentKind,
    year: i32,
) -> Result<String, RepositoryError> {
    let prefix = kind.pattern_prefix(year);
    let sql = format!("SELECT number FROM {} WHERE number LIKE ? || '%'", table_for(kind));
    let existing: Vec<String> =
        sqlx::query_scalar(&sql).bind(&prefix).fetch_all(&mut *conn).await?;

    Ok(numbering::next_number(kind, year, existing.iter().map(String::as_str)))
}
