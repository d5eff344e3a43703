use anyhow::Result;
use tracing::info;

use carepass_crypto::FieldCipher;
use carepass_db::Database;
use carepass_types::models::{DISPLAY_KEY, HOSPITAL_COLUMNS};

/// Rows read and written per transaction.
const BATCH_SIZE: u32 = 500;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EncryptReport {
    pub rows_scanned: u64,
    pub rows_updated: u64,
    pub fields_encrypted: u64,
}

/// Encrypt, in place, every non-null hospitals value outside the display key
/// that does not already decrypt under `cipher`. Rows are walked in rowid
/// order. Values that already decrypt are left alone, so running this again
/// changes nothing.
pub fn encrypt_plaintext_records(db: &Database, cipher: &FieldCipher) -> Result<EncryptReport> {
    let mut report = EncryptReport::default();
    let mut after_rowid = 0;

    loop {
        let mut batch = db.fetch_records_after(after_rowid, BATCH_SIZE)?;
        let Some((last_rowid, _)) = batch.last() else {
            break;
        };
        after_rowid = *last_rowid;
        report.rows_scanned += batch.len() as u64;

        let mut changed = Vec::new();
        for (rowid, mut row) in batch.drain(..) {
            let mut encrypted = 0;
            for (column, value) in HOSPITAL_COLUMNS.iter().zip(row.values.iter_mut()) {
                let Some(plain) = value.as_deref() else {
                    continue;
                };
                if *column == DISPLAY_KEY || cipher.decrypt_field(plain).is_ok() {
                    continue;
                }
                *value = Some(cipher.encrypt_field(plain)?);
                encrypted += 1;
            }
            if encrypted > 0 {
                report.fields_encrypted += encrypted;
                changed.push((rowid, row));
            }
        }

        if !changed.is_empty() {
            db.update_records(&changed)?;
            report.rows_updated += changed.len() as u64;
        }
        info!(
            "Encrypted rows up to rowid {} ({} rows updated so far)",
            after_rowid, report.rows_updated
        );
    }

    Ok(report)
}
