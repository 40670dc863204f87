use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::SqliteConnection;

use taller_core::domain::quote::{
    ConfirmationChannel, LineDraft, PriceVariant, Quote, QuoteId, QuoteLine, QuoteLineId,
    QuoteStatus,
};
use taller_core::domain::service::ServiceId;

use super::{
    code_column, column, decimal_column, format_date, format_timestamp, optional_code_column,
    optional_date_column, optional_decimal_column, optional_timestamp_column, quantity_column,
    timestamp_column, RepositoryError,
};

const QUOTE_COLUMNS: &str = "id, number, service_id, employee_id, diagnosis, parts_original,
    parts_alternative, labor, total_original, total_alternative, show_original,
    show_alternative, confirmed_variant, confirmation_channel, confirmed_at, status,
    created_at, requested_on, agreed_on, expires_on";

fn row_to_quote(row: &SqliteRow) -> Result<Quote, RepositoryError> {
    Ok(Quote {
        id: QuoteId(column(row, "id")?),
        number: column(row, "number")?,
        service_id: ServiceId(column(row, "service_id")?),
        employee_id: column(row, "employee_id")?,
        diagnosis: column(row, "diagnosis")?,
        lines: Vec::new(),
        parts_original: decimal_column(row, "parts_original")?,
        parts_alternative: optional_decimal_column(row, "parts_alternative")?,
        labor: decimal_column(row, "labor")?,
        total_original: decimal_column(row, "total_original")?,
        total_alternative: optional_decimal_column(row, "total_alternative")?,
        show_original: column(row, "show_original")?,
        show_alternative: column(row, "show_alternative")?,
        confirmed_variant: optional_code_column(row, "confirmed_variant", PriceVariant::parse)?,
        confirmation_channel: optional_code_column(
            row,
            "confirmation_channel",
            ConfirmationChannel::parse,
        )?,
        confirmed_at: optional_timestamp_column(row, "confirmed_at")?,
        status: code_column(row, "status", QuoteStatus::parse)?,
        created_at: timestamp_column(row, "created_at")?,
        requested_on: optional_date_column(row, "requested_on")?,
        agreed_on: optional_date_column(row, "agreed_on")?,
        expires_on: optional_date_column(row, "expires_on")?,
    })
}

fn row_to_line(row: &SqliteRow) -> Result<QuoteLine, RepositoryError> {
    Ok(QuoteLine {
        id: QuoteLineId(column(row, "id")?),
        quote_id: QuoteId(column(row, "quote_id")?),
        description: column(row, "description")?,
        quantity: quantity_column(row, "quantity")?,
        original_price: decimal_column(row, "original_price")?,
        alternative_price: optional_decimal_column(row, "alternative_price")?,
    })
}

async fn load_lines(
    conn: &mut SqliteConnection,
    quote_id: QuoteId,
) -> Result<Vec<QuoteLine>, RepositoryError> {
    let rows = sqlx::query(
        "SELECT id, quote_id, description, quantity, original_price, alternative_price
         FROM quote_line WHERE quote_id = ? ORDER BY id",
    )
    .bind(quote_id.0)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(row_to_line).collect()
}

/// Stores the quote header and returns its id. Lines are added separately.
pub async fn insert(conn: &mut SqliteConnection, quote: &Quote) -> Result<QuoteId, RepositoryError> {
    let id = sqlx::query(
        "INSERT INTO quote (number, service_id, employee_id, diagnosis, parts_original,
                            parts_alternative, labor, total_original, total_alternative,
                            show_original, show_alternative, status, created_at,
                            requested_on, agreed_on, expires_on)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&quote.number)
    .bind(quote.service_id.0)
    .bind(quote.employee_id)
    .bind(&quote.diagnosis)
    .bind(quote.parts_original.to_string())
    .bind(quote.parts_alternative.map(|amount| amount.to_string()))
    .bind(quote.labor.to_string())
    .bind(quote.total_original.to_string())
    .bind(quote.total_alternative.map(|amount| amount.to_string()))
    .bind(quote.show_original)
    .bind(quote.show_alternative)
    .bind(quote.status.as_str())
    .bind(format_timestamp(quote.created_at))
    .bind(quote.requested_on.map(format_date))
    .bind(quote.agreed_on.map(format_date))
    .bind(quote.expires_on.map(format_date))
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    Ok(QuoteId(id))
}

/// Loads a quote together with its lines.
pub async fn find(conn: &mut SqliteConnection, id: QuoteId) -> Result<Option<Quote>, RepositoryError> {
    let sql = format!("SELECT {QUOTE_COLUMNS} FROM quote WHERE id = ?");
    let row = sqlx::query(&sql).bind(id.0).fetch_optional(&mut *conn).await?;
    let Some(row) = row else {
        return Ok(None);
    };

    let mut quote = row_to_quote(&row)?;
    quote.lines = load_lines(conn, quote.id).await?;
    Ok(Some(quote))
}

pub async fn for_service(
    conn: &mut SqliteConnection,
    service_id: ServiceId,
) -> Result<Vec<Quote>, RepositoryError> {
    let sql = format!("SELECT {QUOTE_COLUMNS} FROM quote WHERE service_id = ? ORDER BY id");
    let rows = sqlx::query(&sql).bind(service_id.0).fetch_all(&mut *conn).await?;

    let mut quotes = rows.iter().map(row_to_quote).collect::<Result<Vec<_>, _>>()?;
    for quote in &mut quotes {
        quote.lines = load_lines(conn, quote.id).await?;
    }
    Ok(quotes)
}

/// Quotes of `service_id` other than `excluding` that have not been decided yet.
pub async fn count_open_for_service(
    conn: &mut SqliteConnection,
    service_id: ServiceId,
    excluding: QuoteId,
) -> Result<i64, RepositoryError> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM quote
         WHERE service_id = ? AND id <> ? AND status NOT IN (?, ?)",
    )
    .bind(service_id.0)
    .bind(excluding.0)
    .bind(QuoteStatus::Approved.as_str())
    .bind(QuoteStatus::Rejected.as_str())
    .fetch_one(&mut *conn)
    .await?;
    Ok(count)
}

pub async fn insert_line(
    conn: &mut SqliteConnection,
    quote_id: QuoteId,
    draft: &LineDraft,
) -> Result<QuoteLineId, RepositoryError> {
    let id = sqlx::query(
        "INSERT INTO quote_line (quote_id, description, quantity, original_price, alternative_price)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(quote_id.0)
    .bind(&draft.description)
    .bind(i64::from(draft.quantity))
    .bind(draft.original_price.to_string())
    .bind(draft.alternative_price.map(|price| price.to_string()))
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    Ok(QuoteLineId(id))
}

/// Returns false when no line `line_id` belongs to `quote_id`.
pub async fn update_line(
    conn: &mut SqliteConnection,
    quote_id: QuoteId,
    line_id: QuoteLineId,
    draft: &LineDraft,
) -> Result<bool, RepositoryError> {
    let affected = sqlx::query(
        "UPDATE quote_line
         SET description = ?, quantity = ?, original_price = ?, alternative_price = ?
         WHERE id = ? AND quote_id = ?",
    )
    .bind(&draft.description)
    .bind(i64::from(draft.quantity))
    .bind(draft.original_price.to_string())
    .bind(draft.alternative_price.map(|price| price.to_string()))
    .bind(line_id.0)
    .bind(quote_id.0)
    .execute(&mut *conn)
    .await?
    .rows_affected();
    Ok(affected == 1)
}

pub async fn delete_line(
    conn: &mut SqliteConnection,
    quote_id: QuoteId,
    line_id: QuoteLineId,
) -> Result<bool, RepositoryError> {
    let affected = sqlx::query("DELETE FROM quote_line WHERE id = ? AND quote_id = ?")
        .bind(line_id.0)
        .bind(quote_id.0)
        .execute(&mut *conn)
        .await?
        .rows_affected();
    Ok(affected == 1)
}

/// Persists the editable header fields and the derived amounts.
pub async fn save_content(conn: &mut SqliteConnection, quote: &Quote) -> Result<(), RepositoryError> {
    sqlx::query(
        "UPDATE quote
         SET diagnosis = ?, parts_original = ?, parts_alternative = ?, labor = ?,
             total_original = ?, total_alternative = ?, show_original = ?,
             show_alternative = ?, requested_on = ?, expires_on = ?
         WHERE id = ?",
    )
    .bind(&quote.diagnosis)
    .bind(quote.parts_original.to_string())
    .bind(quote.parts_alternative.map(|amount| amount.to_string()))
    .bind(quote.labor.to_string())
    .bind(quote.total_original.to_string())
    .bind(quote.total_alternative.map(|amount| amount.to_string()))
    .bind(quote.show_original)
    .bind(quote.show_alternative)
    .bind(quote.requested_on.map(format_date))
    .bind(quote.expires_on.map(format_date))
    .bind(quote.id.0)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn transition(
    conn: &mut SqliteConnection,
    id: QuoteId,
    from: QuoteStatus,
    to: QuoteStatus,
) -> Result<(), RepositoryError> {
    let affected = sqlx::query("UPDATE quote SET status = ? WHERE id = ? AND status = ?")
        .bind(to.as_str())
        .bind(id.0)
        .bind(from.as_str())
        .execute(&mut *conn)
        .await?
        .rows_affected();

    if affected == 0 {
        return Err(RepositoryError::StaleState { entity: "quote", id: id.0, expected: from.as_str() });
    }
    Ok(())
}

/// The client's answer to a sent quote.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecisionRecord {
    pub to: QuoteStatus,
    pub variant: Option<PriceVariant>,
    pub channel: ConfirmationChannel,
    pub confirmed_at: DateTime<Utc>,
    pub agreed_on: NaiveDate,
}

/// Compare-and-set from `from` to the decided status, recording how it was confirmed.
pub async fn record_decision(
    conn: &mut SqliteConnection,
    id: QuoteId,
    from: QuoteStatus,
    decision: &DecisionRecord,
) -> Result<(), RepositoryError> {
    let affected = sqlx::query(
        "UPDATE quote
         SET status = ?, confirmed_variant = ?, confirmation_channel = ?, confirmed_at = ?,
             agreed_on = ?
         WHERE id = ? AND status = ?",
    )
    .bind(decision.to.as_str())
    .bind(decision.variant.map(|variant| variant.as_str()))
    .bind(decision.channel.as_str())
    .bind(format_timestamp(decision.confirmed_at))
    .bind(format_date(decision.agreed_on))
    .bind(id.0)
    .bind(from.as_str())
    .execute(&mut *conn)
    .await?
    .rows_affected();

    if affected == 0 {
        return Err(RepositoryError::StaleState { entity: "quote", id: id.0, expected: from.as_str() });
    }
    Ok(())
}
