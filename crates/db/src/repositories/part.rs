use sqlx::sqlite::SqliteRow;
use sqlx::SqliteConnection;

use taller_core::domain::part::{Part, PartId};

use super::{column, RepositoryError};

fn row_to_part(row: &SqliteRow) -> Result<Part, RepositoryError> {
    Ok(Part {
        id: PartId(column(row, "id")?),
        code: column(row, "code")?,
        description: column(row, "description")?,
        active: column(row, "active")?,
    })
}

pub async fn insert(
    conn: &mut SqliteConnection,
    code: &str,
    description: &str,
) -> Result<Part, RepositoryError> {
    let id = sqlx::query("INSERT INTO part (code, description, active) VALUES (?, ?, 1)")
        .bind(code)
        .bind(description)
        .execute(&mut *conn)
        .await?
        .last_insert_rowid();

    Ok(Part { id: PartId(id), code: code.to_owned(), description: description.to_owned(), active: true })
}

pub async fn find(conn: &mut SqliteConnection, id: PartId) -> Result<Option<Part>, RepositoryError> {
    let row = sqlx::query("SELECT id, code, description, active FROM part WHERE id = ?")
        .bind(id.0)
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(row_to_part).transpose()
}

#[cfg(test)]
mod tests {
    use taller_core::domain::part::PartId;

    use super::{find, insert};
    use crate::repositories::{test_support, RepositoryError};

    #[tokio::test]
    async fn parts_are_found_by_id_and_codes_are_unique() {
        let pool = test_support::pool().await;
        let mut conn = pool.acquire().await.expect("acquire");

        let part = insert(&mut conn, "BAT-01", "Bateria 3000mAh").await.expect("insert");
        let found = find(&mut conn, part.id).await.expect("find").expect("exists");
        assert_eq!(found, part);
        assert!(find(&mut conn, PartId(999)).await.expect("find").is_none());

        let duplicate = insert(&mut conn, "BAT-01", "otra").await.expect_err("duplicate code");
        assert!(matches!(duplicate, RepositoryError::UniqueViolation(_)));
    }
}
