//! Database row types — these map directly to SQLite rows.
//! Distinct from carepass-types models to keep the DB layer independent.

pub struct AccountRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub bale_chat_id: Option<String>,
    pub created_at: String,
}

/// A hospitals row exactly as stored. `values[i]` belongs to
/// `HOSPITAL_COLUMNS[i]`.
pub struct RecordRow {
    pub values: Vec<Option<String>>,
}
