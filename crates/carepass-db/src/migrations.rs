use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id            TEXT PRIMARY KEY,
            username      TEXT NOT NULL UNIQUE,
            password      TEXT NOT NULL,
            bale_chat_id  TEXT,
            created_at    TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Every column except Facility_Name holds an encrypted token.
        -- Rows are read back in rowid order.
        CREATE TABLE IF NOT EXISTS hospitals (
            Facility_Name                    TEXT,
            Facility_City                    TEXT,
            Facility_State                   TEXT,
            Facility_Type                    TEXT,
            Rating_Overall                   TEXT,
            Rating_Mortality                 TEXT,
            Rating_Safety                    TEXT,
            Rating_Readmission               TEXT,
            Rating_Experience                TEXT,
            Rating_Effectiveness             TEXT,
            Rating_Timeliness                TEXT,
            Rating_Imaging                   TEXT,
            Procedure_Heart_Attack_Cost      TEXT,
            Procedure_Heart_Attack_Quality   TEXT,
            Procedure_Heart_Attack_Value     TEXT,
            Procedure_Heart_Failure_Cost     TEXT,
            Procedure_Heart_Failure_Quality  TEXT,
            Procedure_Heart_Failure_Value    TEXT,
            Procedure_Pneumonia_Cost         TEXT,
            Procedure_Pneumonia_Quality      TEXT,
            Procedure_Pneumonia_Value        TEXT,
            Procedure_Hip_Knee_Cost          TEXT,
            Procedure_Hip_Knee_Quality       TEXT,
            Procedure_Hip_Knee_Value         TEXT
        );
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
