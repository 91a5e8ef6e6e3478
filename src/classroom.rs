use chrono::Utc;
use sqlx::{Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

use crate::models::{Classroom, User};

/// Creates the tutor's classroom if it does not exist yet.
///
/// This is the explicit replacement for the original's write-triggered ORM
/// middleware: call it wherever a tutor comes into existence (admin create,
/// role change, registration approval). Idempotent via the UNIQUE(tutor_id)
/// constraint.
pub async fn ensure_classroom_for_tutor(
    tx: &mut Transaction<'_, Sqlite>,
    tutor: &User,
) -> Result<(), sqlx::Error> {
    let display = tutor.first_name.as_deref().unwrap_or(&tutor.username);
    sqlx::query(
        r#"INSERT INTO classrooms (id, name, description, tutor_id, created_at)
           VALUES (?, ?, ?, ?, ?)
           ON CONFLICT(tutor_id) DO NOTHING"#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(format!("{display}'s Classroom"))
    .bind(format!("{display} and their students"))
    .bind(&tutor.id)
    .bind(Utc::now())
    .execute(tx.as_mut())
    .await?;
    Ok(())
}

pub async fn for_tutor(
    pool: &SqlitePool,
    tutor_id: &str,
) -> Result<Option<Classroom>, sqlx::Error> {
    sqlx::query_as::<_, Classroom>("SELECT * FROM classrooms WHERE tutor_id = ?")
        .bind(tutor_id)
        .fetch_optional(pool)
        .await
}
