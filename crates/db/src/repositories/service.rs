use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::SqliteConnection;

use taller_core::domain::service::{
    IntakeType, Service, ServiceId, ServiceStatus, WarrantyEvaluation,
};

use super::{
    code_column, column, date_column, format_date, format_timestamp, optional_date_column,
    optional_decimal_column, optional_timestamp_column, timestamp_column, RepositoryError,
};

const SERVICE_COLUMNS: &str = "id, number, client_id, equipment_id, received_by, intake_type,
    problem_description, intake_signature, conformity_signature, is_warranty,
    original_service_id, warranty_in_window, warranty_conditions_met, warranty_evaluated_by,
    warranty_notes, warranty_evaluated_at, visit_fee, visit_fee_paid, status, created_at,
    received_on, expected_return_on, actual_return_at, active";

fn row_to_service(row: &SqliteRow) -> Result<Service, RepositoryError> {
    let original_service_id: Option<i64> = column(row, "original_service_id")?;

    Ok(Service {
        id: ServiceId(column(row, "id")?),
        number: column(row, "number")?,
        client_id: column(row, "client_id")?,
        equipment_id: column(row, "equipment_id")?,
        received_by: column(row, "received_by")?,
        intake_type: code_column(row, "intake_type", IntakeType::parse)?,
        problem_description: column(row, "problem_description")?,
        intake_signature: column(row, "intake_signature")?,
        conformity_signature: column(row, "conformity_signature")?,
        is_warranty: column(row, "is_warranty")?,
        original_service_id: original_service_id.map(ServiceId),
        warranty: WarrantyEvaluation {
            in_window: column(row, "warranty_in_window")?,
            conditions_met: column(row, "warranty_conditions_met")?,
            evaluated_by: column(row, "warranty_evaluated_by")?,
            notes: column(row, "warranty_notes")?,
            evaluated_at: optional_timestamp_column(row, "warranty_evaluated_at")?,
        },
        visit_fee: optional_decimal_column(row, "visit_fee")?,
        visit_fee_paid: column(row, "visit_fee_paid")?,
        status: code_column(row, "status", ServiceStatus::parse)?,
        created_at: timestamp_column(row, "created_at")?,
        received_on: date_column(row, "received_on")?,
        expected_return_on: optional_date_column(row, "expected_return_on")?,
        actual_return_at: optional_timestamp_column(row, "actual_return_at")?,
        active: column(row, "active")?,
    })
}

/// Stores a new service and returns its id. `service.id` is ignored.
pub async fn insert(
    conn: &mut SqliteConnection,
    service: &Service,
) -> Result<ServiceId, RepositoryError> {
    let id = sqlx::query(
        "INSERT INTO service (number, client_id, equipment_id, received_by, intake_type,
                              problem_description, intake_signature, conformity_signature,
                              is_warranty, original_service_id, visit_fee, visit_fee_paid,
                              status, created_at, received_on, expected_return_on, active)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&service.number)
    .bind(service.client_id)
    .bind(service.equipment_id)
    .bind(service.received_by)
    .bind(service.intake_type.as_str())
    .bind(&service.problem_description)
    .bind(&service.intake_signature)
    .bind(&service.conformity_signature)
    .bind(service.is_warranty)
    .bind(service.original_service_id.map(|id| id.0))
    .bind(service.visit_fee.map(|fee| fee.to_string()))
    .bind(service.visit_fee_paid)
    .bind(service.status.as_str())
    .bind(format_timestamp(service.created_at))
    .bind(format_date(service.received_on))
    .bind(service.expected_return_on.map(format_date))
    .bind(service.active)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    Ok(ServiceId(id))
}

pub async fn find(
    conn: &mut SqliteConnection,
    id: ServiceId,
) -> Result<Option<Service>, RepositoryError> {
    let sql = format!("SELECT {SERVICE_COLUMNS} FROM service WHERE id = ?");
    let row = sqlx::query(&sql).bind(id.0).fetch_optional(&mut *conn).await?;
    row.as_ref().map(row_to_service).transpose()
}

pub async fn list(
    conn: &mut SqliteConnection,
    status: Option<ServiceStatus>,
    active: Option<bool>,
) -> Result<Vec<Service>, RepositoryError> {
    let sql = format!(
        "SELECT {SERVICE_COLUMNS} FROM service
         WHERE (?1 IS NULL OR status = ?1) AND (?2 IS NULL OR active = ?2)
         ORDER BY created_at DESC, id DESC"
    );
    let rows = sqlx::query(&sql)
        .bind(status.map(|status| status.as_str()))
        .bind(active)
        .fetch_all(&mut *conn)
        .await?;

    rows.iter().map(row_to_service).collect()
}

/// Rewrites the staff-editable intake fields. Identity, number and status are untouched.
pub async fn update_details(
    conn: &mut SqliteConnection,
    service: &Service,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "UPDATE service
         SET problem_description = ?, intake_signature = ?, conformity_signature = ?,
             visit_fee = ?, visit_fee_paid = ?, expected_return_on = ?
         WHERE id = ?",
    )
    .bind(&service.problem_description)
    .bind(&service.intake_signature)
    .bind(&service.conformity_signature)
    .bind(service.visit_fee.map(|fee| fee.to_string()))
    .bind(service.visit_fee_paid)
    .bind(service.expected_return_on.map(format_date))
    .bind(service.id.0)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Compare-and-set status change. Entering `TERMINADO` also stamps the real return date.
pub async fn transition(
    conn: &mut SqliteConnection,
    id: ServiceId,
    from: ServiceStatus,
    to: ServiceStatus,
    at: DateTime<Utc>,
) -> Result<(), RepositoryError> {
    let returned_at = (to == ServiceStatus::Finished).then(|| format_timestamp(at));
    let affected = sqlx::query(
        "UPDATE service
         SET status = ?, actual_return_at = COALESCE(?, actual_return_at)
         WHERE id = ? AND status = ?",
    )
    .bind(to.as_str())
    .bind(returned_at)
    .bind(id.0)
    .bind(from.as_str())
    .execute(&mut *conn)
    .await?
    .rows_affected();

    if affected == 0 {
        return Err(RepositoryError::StaleState {
            entity: "service",
            id: id.0,
            expected: from.as_str(),
        });
    }
    Ok(())
}

pub async fn record_warranty_evaluation(
    conn: &mut SqliteConnection,
    id: ServiceId,
    evaluation: &WarrantyEvaluation,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "UPDATE service
         SET warranty_in_window = ?, warranty_conditions_met = ?, warranty_evaluated_by = ?,
             warranty_notes = ?, warranty_evaluated_at = ?
         WHERE id = ?",
    )
    .bind(evaluation.in_window)
    .bind(evaluation.conditions_met)
    .bind(evaluation.evaluated_by)
    .bind(&evaluation.notes)
    .bind(evaluation.evaluated_at.map(format_timestamp))
    .bind(id.0)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Soft delete. Returns false when the service was already inactive or does not exist.
pub async fn deactivate(conn: &mut SqliteConnection, id: ServiceId) -> Result<bool, RepositoryError> {
    let affected = sqlx::query("UPDATE service SET active = 0 WHERE id = ? AND active = 1")
        .bind(id.0)
        .execute(&mut *conn)
        .await?
        .rows_affected();
    Ok(affected == 1)
}

#[cfg(test)]
pub(crate) mod tests {
    use chrono::{NaiveDate, Utc};
    use rust_decimal::Decimal;
    use sqlx::SqliteConnection;

    use taller_core::domain::service::{
        IntakeType, Service, ServiceId, ServiceStatus, WarrantyEvaluation,
    };

    use super::{deactivate, find, insert, list, record_warranty_evaluation, transition};
    use crate::repositories::{test_support, RepositoryError};

    pub(crate) fn draft(number: &str) -> Service {
        Service {
            id: ServiceId(0),
            number: number.to_owned(),
            client_id: 11,
            equipment_id: 22,
            received_by: 3,
            intake_type: IntakeType::Counter,
            problem_description: Some("pantalla rota".to_owned()),
            intake_signature: None,
            conformity_signature: None,
            is_warranty: false,
            original_service_id: None,
            warranty: WarrantyEvaluation::default(),
            visit_fee: Some(Decimal::new(2_500, 2)),
            visit_fee_paid: false,
            status: ServiceStatus::Received,
            created_at: Utc::now(),
            received_on: NaiveDate::from_ymd_opt(2025, 4, 1).expect("date"),
            expected_return_on: None,
            actual_return_at: None,
            active: true,
        }
    }

    pub(crate) async fn stored(conn: &mut SqliteConnection, number: &str) -> ServiceId {
        insert(conn, &draft(number)).await.expect("insert service")
    }

    #[tokio::test]
    async fn insert_then_find_round_trips_every_field() {
        let pool = test_support::pool().await;
        let mut conn = pool.acquire().await.expect("acquire");
        let service = draft("SRV25-00001");

        let id = insert(&mut conn, &service).await.expect("insert");
        let found = find(&mut conn, id).await.expect("find").expect("exists");

        assert_eq!(found.id, id);
        assert_eq!(found.number, "SRV25-00001");
        assert_eq!(found.visit_fee, Some(Decimal::new(2_500, 2)));
        assert_eq!(found.status, ServiceStatus::Received);
        assert_eq!(found.received_on, service.received_on);
        assert!(found.active);
    }

    #[tokio::test]
    async fn transition_is_compare_and_set() {
        let pool = test_support::pool().await;
        let mut conn = pool.acquire().await.expect("acquire");
        let id = stored(&mut conn, "SRV25-00001").await;
        let now = Utc::now();

        transition(&mut conn, id, ServiceStatus::Received, ServiceStatus::Quoted, now)
            .await
            .expect("first transition wins");
        let stale = transition(&mut conn, id, ServiceStatus::Received, ServiceStatus::Quoted, now)
            .await
            .expect_err("second transition loses");

        assert!(matches!(stale, RepositoryError::StaleState { entity: "service", .. }));
    }

    #[tokio::test]
    async fn finishing_stamps_the_return_date() {
        let pool = test_support::pool().await;
        let mut conn = pool.acquire().await.expect("acquire");
        let mut service = draft("SRV25-00001");
        service.status = ServiceStatus::InRepair;
        let id = insert(&mut conn, &service).await.expect("insert");
        let now = Utc::now();

        transition(&mut conn, id, ServiceStatus::InRepair, ServiceStatus::Finished, now)
            .await
            .expect("finish");

        let found = find(&mut conn, id).await.expect("find").expect("exists");
        assert_eq!(found.status, ServiceStatus::Finished);
        assert!(found.actual_return_at.is_some());
    }

    #[tokio::test]
    async fn warranty_flag_requires_original_reference() {
        let pool = test_support::pool().await;
        let mut conn = pool.acquire().await.expect("acquire");
        let mut orphan = draft("SRV25-00002");
        orphan.is_warranty = true;

        assert!(insert(&mut conn, &orphan).await.is_err());
    }

    #[tokio::test]
    async fn list_filters_and_soft_delete() {
        let pool = test_support::pool().await;
        let mut conn = pool.acquire().await.expect("acquire");
        let first = stored(&mut conn, "SRV25-00001").await;
        let _second = stored(&mut conn, "SRV25-00002").await;

        assert!(deactivate(&mut conn, first).await.expect("deactivate"));
        assert!(!deactivate(&mut conn, first).await.expect("already inactive"));

        let active = list(&mut conn, None, Some(true)).await.expect("list");
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].number, "SRV25-00002");

        let received = list(&mut conn, Some(ServiceStatus::Received), None).await.expect("list");
        assert_eq!(received.len(), 2);
        let quoted = list(&mut conn, Some(ServiceStatus::Quoted), None).await.expect("list");
        assert!(quoted.is_empty());
    }

    #[tokio::test]
    async fn warranty_evaluation_is_persisted() {
        let pool = test_support::pool().await;
        let mut conn = pool.acquire().await.expect("acquire");
        let id = stored(&mut conn, "SRV25-00001").await;
        let evaluation = WarrantyEvaluation {
            in_window: Some(true),
            conditions_met: Some(false),
            evaluated_by: Some(7),
            notes: Some("golpe visible".to_owned()),
            evaluated_at: Some(Utc::now()),
        };

        record_warranty_evaluation(&mut conn, id, &evaluation).await.expect("record");

        let found = find(&mut conn, id).await.expect("find").expect("exists");
        assert_eq!(found.warranty.conditions_met, Some(false));
        assert_eq!(found.warranty.notes.as_deref(), Some("golpe visible"));
    }
}
