use crate::models::{AccountRow, RecordRow};
use crate::Database;
use anyhow::{Result, anyhow};
use carepass_types::models::{DISPLAY_KEY, HOSPITAL_COLUMNS};
use rusqlite::{Connection, ToSql};

impl Database {
    // -- Accounts --

    pub fn create_account(
        &self,
        id: &str,
        username: &str,
        password_hash: &str,
        bale_chat_id: Option<&str>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, password, bale_chat_id) VALUES (?1, ?2, ?3, ?4)",
                (id, username, password_hash, bale_chat_id),
            )?;
            Ok(())
        })
    }

    pub fn get_account_by_username(&self, username: &str) -> Result<Option<AccountRow>> {
        self.with_conn(|conn| query_account(conn, "username", username))
    }

    pub fn get_account_by_id(&self, id: &str) -> Result<Option<AccountRow>> {
        self.with_conn(|conn| query_account(conn, "id", id))
    }

    // -- Hospitals --

    /// Insert one hospitals row. `values` must line up with `HOSPITAL_COLUMNS`
    /// and is written as given; encrypting it is the caller's job.
    pub fn insert_record(&self, values: &[Option<String>]) -> Result<()> {
        if values.len() != HOSPITAL_COLUMNS.len() {
            return Err(anyhow!(
                "Expected {} hospital values, got {}",
                HOSPITAL_COLUMNS.len(),
                values.len()
            ));
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> =
                (1..=values.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "INSERT INTO hospitals ({}) VALUES ({})",
                HOSPITAL_COLUMNS.join(", "),
                placeholders.join(", ")
            );
            let params: Vec<&dyn ToSql> = values.iter().map(|v| v as &dyn ToSql).collect();
            conn.execute(&sql, params.as_slice())?;
            Ok(())
        })
    }

    /// Number of hospitals rows, optionally restricted to names containing
    /// `term` (case-sensitive).
    pub fn count_records(&self, term: Option<&str>) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = match term {
                Some(term) => conn.query_row(
                    &format!("SELECT COUNT(*) FROM hospitals WHERE instr({}, ?1) > 0", DISPLAY_KEY),
                    [term],
                    |row| row.get(0),
                )?,
                None => conn.query_row("SELECT COUNT(*) FROM hospitals", [], |row| row.get(0))?,
            };
            Ok(count as u64)
        })
    }

    /// A slice of hospitals rows in storage order, optionally restricted to
    /// names containing `term` (case-sensitive).
    pub fn fetch_records(&self, term: Option<&str>, limit: u32, offset: u64) -> Result<Vec<RecordRow>> {
        self.with_conn(|conn| query_records(conn, term, limit, offset))
    }

    /// Up to `limit` hospitals rows with a rowid above `after_rowid`, in rowid
    /// order, each paired with its rowid. Start from 0 to walk the table.
    pub fn fetch_records_after(&self, after_rowid: i64, limit: u32) -> Result<Vec<(i64, RecordRow)>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT rowid, {} FROM hospitals WHERE rowid > ?1 ORDER BY rowid LIMIT ?2",
                HOSPITAL_COLUMNS.join(", ")
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map((after_rowid, limit as i64), |row| {
                    let rowid: i64 = row.get(0)?;
                    let values = (1..=HOSPITAL_COLUMNS.len())
                        .map(|i| row.get::<_, Option<String>>(i))
                        .collect::<rusqlite::Result<Vec<_>>>()?;
                    Ok((rowid, RecordRow { values }))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Overwrite whole hospitals rows by rowid, all in one transaction.
    pub fn update_records(&self, rows: &[(i64, RecordRow)]) -> Result<()> {
        if let Some((rowid, row)) = rows.iter().find(|(_, r)| r.values.len() != HOSPITAL_COLUMNS.len()) {
            return Err(anyhow!(
                "Row {}: expected {} hospital values, got {}",
                rowid,
                HOSPITAL_COLUMNS.len(),
                row.values.len()
            ));
        }

        self.with_conn(|conn| {
            let assignments: Vec<String> = HOSPITAL_COLUMNS
                .iter()
                .enumerate()
                .map(|(i, column)| format!("{} = ?{}", column, i + 1))
                .collect();
            let sql = format!(
                "UPDATE hospitals SET {} WHERE rowid = ?{}",
                assignments.join(", "),
                HOSPITAL_COLUMNS.len() + 1
            );

            let tx = conn.unchecked_transaction()?;
            {
                let mut stmt = tx.prepare(&sql)?;
                for (rowid, row) in rows {
                    let mut params: Vec<&dyn ToSql> =
                        row.values.iter().map(|v| v as &dyn ToSql).collect();
                    params.push(rowid);
                    stmt.execute(params.as_slice())?;
                }
            }
            tx.commit()?;
            Ok(())
        })
    }
}

fn query_account(conn: &Connection, column: &str, value: &str) -> Result<Option<AccountRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT id, username, password, bale_chat_id, created_at FROM users WHERE {} = ?1",
        column
    ))?;

    let row = stmt
        .query_row([value], |row| {
            Ok(AccountRow {
                id: row.get(0)?,
                username: row.get(1)?,
                password: row.get(2)?,
                bale_chat_id: row.get(3)?,
                created_at: row.get(4)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn query_records(conn: &Connection, term: Option<&str>, limit: u32, offset: u64) -> Result<Vec<RecordRow>> {
    let columns = HOSPITAL_COLUMNS.join(", ");
    let limit = limit as i64;
    let offset = offset as i64;

    let (sql, params): (String, Vec<&dyn ToSql>) = match &term {
        Some(term) => (
            format!(
                "SELECT {} FROM hospitals WHERE instr({}, ?1) > 0 ORDER BY rowid LIMIT ?2 OFFSET ?3",
                columns, DISPLAY_KEY
            ),
            vec![term as &dyn ToSql, &limit, &offset],
        ),
        None => (
            format!("SELECT {} FROM hospitals ORDER BY rowid LIMIT ?1 OFFSET ?2", columns),
            vec![&limit as &dyn ToSql, &offset],
        ),
    };

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params.as_slice(), |row| {
            let values = (0..HOSPITAL_COLUMNS.len())
                .map(|i| row.get::<_, Option<String>>(i))
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(RecordRow { values })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
