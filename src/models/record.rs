use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// A persisted OCR result.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ProcessingRecord {
    pub id: i64,
    /// Modification time of the source image, local time.
    pub time: NaiveDateTime,
    /// Where the compressed copy was written.
    pub path: String,
    pub text: String,
}
