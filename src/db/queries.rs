use chrono::NaiveDateTime;
use sqlx::{Sqlite, SqlitePool, Transaction};

use crate::models::record::ProcessingRecord;

/// Insert an OCR record inside the caller's transaction. Returns the new row id.
pub async fn insert_record(
    tx: &mut Transaction<'_, Sqlite>,
    time: NaiveDateTime,
    path: &str,
    text: &str,
) -> Result<i64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO ocr_records (time, path, text)
        VALUES (?, ?, ?)
        "#,
    )
    .bind(time)
    .bind(path)
    .bind(text)
    .execute(&mut **tx)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Records whose text contains `needle` (case-sensitive), oldest first.
///
/// Surrounding whitespace in `needle` is ignored; a blank needle matches nothing.
pub async fn search_records(
    pool: &SqlitePool,
    needle: &str,
    limit: i64,
) -> Result<Vec<ProcessingRecord>, sqlx::Error> {
    let needle = needle.trim();
    if needle.is_empty() {
        return Ok(Vec::new());
    }

    sqlx::query_as::<_, ProcessingRecord>(
        r#"
        SELECT id, time, path, text
        FROM ocr_records
        WHERE instr(text, ?) > 0
        ORDER BY id ASC
        LIMIT ?
        "#,
    )
    .bind(needle)
    .bind(limit)
    .fetch_all(pool)
    .await
}

/// Total number of stored records
pub async fn count_records(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM ocr_records")
        .fetch_one(pool)
        .await
}
