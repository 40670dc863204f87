use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::SqliteConnection;

use taller_core::domain::quote::{PriceVariant, QuoteId};
use taller_core::domain::token::{ApprovalToken, ApprovalTokenId, TokenAction, TokenGrant};

use super::{
    code_column, column, format_timestamp, optional_code_column, optional_timestamp_column,
    timestamp_column, RepositoryError,
};

const TOKEN_COLUMNS: &str =
    "id, token, quote_id, action, variant, expires_at, used, used_at, used_ip, created_at";

fn row_to_token(row: &SqliteRow) -> Result<ApprovalToken, RepositoryError> {
    Ok(ApprovalToken {
        id: ApprovalTokenId(column(row, "id")?),
        token: column(row, "token")?,
        quote_id: QuoteId(column(row, "quote_id")?),
        action: code_column(row, "action", TokenAction::parse)?,
        variant: optional_code_column(row, "variant", PriceVariant::parse)?,
        expires_at: timestamp_column(row, "expires_at")?,
        used: column(row, "used")?,
        used_at: optional_timestamp_column(row, "used_at")?,
        used_ip: column(row, "used_ip")?,
        created_at: timestamp_column(row, "created_at")?,
    })
}

pub async fn insert(
    conn: &mut SqliteConnection,
    grant: &TokenGrant,
) -> Result<ApprovalToken, RepositoryError> {
    let id = sqlx::query(
        "INSERT INTO approval_token (token, quote_id, action, variant, expires_at, used, created_at)
         VALUES (?, ?, ?, ?, ?, 0, ?)",
    )
    .bind(&grant.token)
    .bind(grant.quote_id.0)
    .bind(grant.action.as_str())
    .bind(grant.variant.map(|variant| variant.as_str()))
    .bind(format_timestamp(grant.expires_at))
    .bind(format_timestamp(grant.created_at))
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    Ok(ApprovalToken {
        id: ApprovalTokenId(id),
        token: grant.token.clone(),
        quote_id: grant.quote_id,
        action: grant.action,
        variant: grant.variant,
        expires_at: grant.expires_at,
        used: false,
        used_at: None,
        used_ip: None,
        created_at: grant.created_at,
    })
}

pub async fn find_by_value(
    conn: &mut SqliteConnection,
    token: &str,
) -> Result<Option<ApprovalToken>, RepositoryError> {
    let sql = format!("SELECT {TOKEN_COLUMNS} FROM approval_token WHERE token = ?");
    let row = sqlx::query(&sql).bind(token).fetch_optional(&mut *conn).await?;
    row.as_ref().map(row_to_token).transpose()
}

pub async fn for_quote(
    conn: &mut SqliteConnection,
    quote_id: QuoteId,
) -> Result<Vec<ApprovalToken>, RepositoryError> {
    let sql = format!("SELECT {TOKEN_COLUMNS} FROM approval_token WHERE quote_id = ? ORDER BY id");
    let rows = sqlx::query(&sql).bind(quote_id.0).fetch_all(&mut *conn).await?;
    rows.iter().map(row_to_token).collect()
}

/// Marks the token used if nobody else did first. Returns false when it was already used
/// or does not exist.
pub async fn consume(
    conn: &mut SqliteConnection,
    token: &str,
    at: DateTime<Utc>,
    ip: Option<&str>,
) -> Result<bool, RepositoryError> {
    let affected = sqlx::query(
        "UPDATE approval_token SET used = 1, used_at = ?, used_ip = ?
         WHERE token = ? AND used = 0",
    )
    .bind(format_timestamp(at))
    .bind(ip)
    .bind(token)
    .execute(&mut *conn)
    .await?
    .rows_affected();
    Ok(affected == 1)
}

/// Hard-deletes the unused tokens of a quote. Used tokens stay as proof of the decision.
pub async fn delete_unused_for_quote(
    conn: &mut SqliteConnection,
    quote_id: QuoteId,
) -> Result<u64, RepositoryError> {
    let deleted = sqlx::query("DELETE FROM approval_token WHERE quote_id = ? AND used = 0")
        .bind(quote_id.0)
        .execute(&mut *conn)
        .await?
        .rows_affected();
    Ok(deleted)
}

/// Deletes unused tokens whose deadline passed before `now`.
pub async fn purge_expired(
    conn: &mut SqliteConnection,
    now: DateTime<Utc>,
) -> Result<u64, RepositoryError> {
    let deleted = sqlx::query("DELETE FROM approval_token WHERE used = 0 AND expires_at < ?")
        .bind(format_timestamp(now))
        .execute(&mut *conn)
        .await?
        .rows_affected();
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use taller_core::domain::quote::{PriceVariant, QuoteId, QuoteStatus};
    use taller_core::domain::token::{generate_token_value, TokenAction, TokenGrant};

    use super::{consume, delete_unused_for_quote, find_by_value, for_quote, insert, purge_expired};
    use crate::repositories::quote::tests::stored_quote;
    use crate::repositories::test_support;

    fn grant(quote_id: QuoteId, expires_in: Duration) -> TokenGrant {
        let now = Utc::now();
        TokenGrant {
            token: generate_token_value(),
            quote_id,
            action: TokenAction::Approve,
            variant: Some(PriceVariant::Original),
            expires_at: now + expires_in,
            created_at: now,
        }
    }

    #[tokio::test]
    async fn consume_is_single_use() {
        let pool = test_support::pool().await;
        let mut conn = pool.acquire().await.expect("acquire");
        let (_, quote_id) = stored_quote(&mut conn, "PRE25-00001", QuoteStatus::Sent).await;
        let token = insert(&mut conn, &grant(quote_id, Duration::days(1))).await.expect("insert");

        assert!(consume(&mut conn, &token.token, Utc::now(), Some("10.0.0.1")).await.expect("use"));
        assert!(!consume(&mut conn, &token.token, Utc::now(), None).await.expect("reuse"));
        assert!(!consume(&mut conn, "missing", Utc::now(), None).await.expect("unknown"));

        let stored = find_by_value(&mut conn, &token.token).await.expect("find").expect("exists");
        assert!(stored.used);
        assert_eq!(stored.used_ip.as_deref(), Some("10.0.0.1"));
        assert_eq!(stored.variant, Some(PriceVariant::Original));
    }

    #[tokio::test]
    async fn invalidation_and_purge_keep_used_tokens() {
        let pool = test_support::pool().await;
        let mut conn = pool.acquire().await.expect("acquire");
        let (_, quote_id) = stored_quote(&mut conn, "PRE25-00001", QuoteStatus::Sent).await;

        let used = insert(&mut conn, &grant(quote_id, -Duration::days(2))).await.expect("insert");
        consume(&mut conn, &used.token, Utc::now(), None).await.expect("use");
        insert(&mut conn, &grant(quote_id, -Duration::days(1))).await.expect("expired");
        let live = insert(&mut conn, &grant(quote_id, Duration::days(1))).await.expect("live");

        assert_eq!(purge_expired(&mut conn, Utc::now()).await.expect("purge"), 1);
        let remaining = for_quote(&mut conn, quote_id).await.expect("list");
        assert_eq!(remaining.len(), 2);

        assert_eq!(delete_unused_for_quote(&mut conn, quote_id).await.expect("invalidate"), 1);
        assert!(find_by_value(&mut conn, &live.token).await.expect("find").is_none());
        assert!(find_by_value(&mut conn, &used.token).await.expect("find").is_some());
    }
}
