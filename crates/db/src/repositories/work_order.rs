use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::SqliteConnection;

use taller_core::domain::part::PartId;
use taller_core::domain::quote::QuoteId;
use taller_core::domain::service::ServiceId;
use taller_core::domain::work_order::{
    WorkOrder, WorkOrderId, WorkOrderLine, WorkOrderLineId, WorkOrderStatus,
};

use super::{
    code_column, column, decimal_column, format_timestamp, optional_timestamp_column,
    quantity_column, timestamp_column, RepositoryError,
};

const WORK_ORDER_COLUMNS: &str = "id, number, service_id, quote_id, employee_id, parts_total,
    extras_total, extras_notes, no_cost, status, created_at, started_at, finished_at";

fn row_to_work_order(row: &SqliteRow) -> Result<WorkOrder, RepositoryError> {
    let quote_id: Option<i64> = column(row, "quote_id")?;

    Ok(WorkOrder {
        id: WorkOrderId(column(row, "id")?),
        number: column(row, "number")?,
        service_id: ServiceId(column(row, "service_id")?),
        quote_id: quote_id.map(QuoteId),
        employee_id: column(row, "employee_id")?,
        parts_total: decimal_column(row, "parts_total")?,
        extras_total: decimal_column(row, "extras_total")?,
        extras_notes: column(row, "extras_notes")?,
        no_cost: column(row, "no_cost")?,
        status: code_column(row, "status", WorkOrderStatus::parse)?,
        created_at: timestamp_column(row, "created_at")?,
        started_at: optional_timestamp_column(row, "started_at")?,
        finished_at: optional_timestamp_column(row, "finished_at")?,
        lines: Vec::new(),
    })
}

fn row_to_line(row: &SqliteRow) -> Result<WorkOrderLine, RepositoryError> {
    Ok(WorkOrderLine {
        id: WorkOrderLineId(column(row, "id")?),
        work_order_id: WorkOrderId(column(row, "work_order_id")?),
        part_id: PartId(column(row, "part_id")?),
        quantity: quantity_column(row, "quantity")?,
        comment: column(row, "comment")?,
    })
}

async fn load_lines(
    conn: &mut SqliteConnection,
    work_order_id: WorkOrderId,
) -> Result<Vec<WorkOrderLine>, RepositoryError> {
    let rows = sqlx::query(
        "SELECT id, work_order_id, part_id, quantity, comment
         FROM work_order_line WHERE work_order_id = ? ORDER BY id",
    )
    .bind(work_order_id.0)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(row_to_line).collect()
}

async fn find_where(
    conn: &mut SqliteConnection,
    predicate: &str,
    value: i64,
) -> Result<Option<WorkOrder>, RepositoryError> {
    let sql = format!("SELECT {WORK_ORDER_COLUMNS} FROM work_order WHERE {predicate} = ?");
    let row = sqlx::query(&sql).bind(value).fetch_optional(&mut *conn).await?;
    let Some(row) = row else {
        return Ok(None);
    };

    let mut order = row_to_work_order(&row)?;
    order.lines = load_lines(conn, order.id).await?;
    Ok(Some(order))
}

/// Stores a new work order. At most one order may reference a given quote; a second one
/// fails with [`RepositoryError::UniqueViolation`].
pub async fn insert(
    conn: &mut SqliteConnection,
    order: &WorkOrder,
) -> Result<WorkOrderId, RepositoryError> {
    let id = sqlx::query(
        "INSERT INTO work_order (number, service_id, quote_id, employee_id, parts_total,
                                 extras_total, extras_notes, no_cost, status, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&order.number)
    .bind(order.service_id.0)
    .bind(order.quote_id.map(|id| id.0))
    .bind(order.employee_id)
    .bind(order.parts_total.to_string())
    .bind(order.extras_total.to_string())
    .bind(&order.extras_notes)
    .bind(order.no_cost)
    .bind(order.status.as_str())
    .bind(format_timestamp(order.created_at))
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    Ok(WorkOrderId(id))
}

pub async fn find(
    conn: &mut SqliteConnection,
    id: WorkOrderId,
) -> Result<Option<WorkOrder>, RepositoryError> {
    find_where(conn, "id", id.0).await
}

pub async fn find_by_quote(
    conn: &mut SqliteConnection,
    quote_id: QuoteId,
) -> Result<Option<WorkOrder>, RepositoryError> {
    find_where(conn, "quote_id", quote_id.0).await
}

pub async fn for_service(
    conn: &mut SqliteConnection,
    service_id: ServiceId,
) -> Result<Vec<WorkOrder>, RepositoryError> {
    let sql = format!("SELECT {WORK_ORDER_COLUMNS} FROM work_order WHERE service_id = ? ORDER BY id");
    let rows = sqlx::query(&sql).bind(service_id.0).fetch_all(&mut *conn).await?;

    let mut orders = rows.iter().map(row_to_work_order).collect::<Result<Vec<_>, _>>()?;
    for order in &mut orders {
        order.lines = load_lines(conn, order.id).await?;
    }
    Ok(orders)
}

/// Compare-and-set status change, stamping `started_at` or `finished_at` on entry.
pub async fn transition(
    conn: &mut SqliteConnection,
    id: WorkOrderId,
    from: WorkOrderStatus,
    to: WorkOrderStatus,
    at: DateTime<Utc>,
) -> Result<(), RepositoryError> {
    let stamp = format_timestamp(at);
    let started_at = (to == WorkOrderStatus::InProgress).then(|| stamp.clone());
    let finished_at = (to == WorkOrderStatus::Finished).then_some(stamp);

    let affected = sqlx::query(
        "UPDATE work_order
         SET status = ?, started_at = COALESCE(?, started_at),
             finished_at = COALESCE(?, finished_at)
         WHERE id = ? AND status = ?",
    )
    .bind(to.as_str())
    .bind(started_at)
    .bind(finished_at)
    .bind(id.0)
    .bind(from.as_str())
    .execute(&mut *conn)
    .await?
    .rows_affected();

    if affected == 0 {
        return Err(RepositoryError::StaleState {
            entity: "work_order",
            id: id.0,
            expected: from.as_str(),
        });
    }
    Ok(())
}

pub async fn insert_line(
    conn: &mut SqliteConnection,
    work_order_id: WorkOrderId,
    part_id: PartId,
    quantity: u32,
    comment: Option<&str>,
) -> Result<WorkOrderLineId, RepositoryError> {
    let id = sqlx::query(
        "INSERT INTO work_order_line (work_order_id, part_id, quantity, comment)
         VALUES (?, ?, ?, ?)",
    )
    .bind(work_order_id.0)
    .bind(part_id.0)
    .bind(i64::from(quantity))
    .bind(comment)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    Ok(WorkOrderLineId(id))
}

pub async fn update_extras(
    conn: &mut SqliteConnection,
    id: WorkOrderId,
    extras_total: Decimal,
    extras_notes: Option<&str>,
) -> Result<(), RepositoryError> {
    sqlx::query("UPDATE work_order SET extras_total = ?, extras_notes = ? WHERE id = ?")
        .bind(extras_total.to_string())
        .bind(extras_notes)
        .bind(id.0)
        .execute(&mut *conn)
        .await?;
    Ok(())
}
