use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    Extension, Json,
    extract::{Query, State},
    response::IntoResponse,
};
use tracing::error;

use carepass_crypto::FieldCipher;
use carepass_db::Database;
use carepass_db::models::RecordRow;
use carepass_types::api::{DashboardQuery, DashboardResponse, SearchQuery, SearchResponse};
use carepass_types::models::{DISPLAY_KEY, HOSPITAL_COLUMNS, HospitalRecord, RecordPage};

use crate::auth::AppState;
use crate::error::ApiError;
use crate::session::AuthContext;

/// Records per dashboard / search page.
pub const PAGE_SIZE: u32 = 50;

/// Reads pages of hospital records and decrypts every column except the
/// display key.
#[derive(Clone)]
pub struct RecordReader {
    db: Arc<Database>,
    cipher: FieldCipher,
}

pub fn total_pages(total: u64, page_size: u32) -> u64 {
    total.div_ceil(page_size.max(1) as u64)
}

impl RecordReader {
    pub fn new(db: Arc<Database>, cipher: FieldCipher) -> Self {
        Self { db, cipher }
    }

    /// Page `page` (1-based; 0 is treated as 1) of the whole table.
    pub fn list_page(&self, page: u32, page_size: u32) -> Result<RecordPage> {
        self.fetch_page(None, page, page_size)
    }

    /// Like [`RecordReader::list_page`], restricted to records whose name
    /// contains `term`. A blank term lists everything.
    pub fn search_page(&self, term: &str, page: u32, page_size: u32) -> Result<RecordPage> {
        let term = term.trim();
        if term.is_empty() {
            return self.list_page(page, page_size);
        }
        self.fetch_page(Some(term), page, page_size)
    }

    fn fetch_page(&self, term: Option<&str>, page: u32, page_size: u32) -> Result<RecordPage> {
        let page = page.max(1);
        let page_size = page_size.max(1);
        let offset = (page as u64 - 1) * page_size as u64;

        let total_count = self.db.count_records(term)?;
        let rows = self.db.fetch_records(term, page_size, offset)?;

        let records = rows
            .into_iter()
            .enumerate()
            .map(|(i, row)| self.decrypt_row(row, offset + i as u64 + 1))
            .collect();

        Ok(RecordPage {
            records,
            page,
            page_size,
            total_count,
            total_pages: total_pages(total_count, page_size),
        })
    }

    fn decrypt_row(&self, row: RecordRow, global_index: u64) -> HospitalRecord {
        let fields: BTreeMap<String, Option<String>> = HOSPITAL_COLUMNS
            .iter()
            .zip(row.values)
            .map(|(column, value)| {
                let value = match value {
                    Some(v) if *column != DISPLAY_KEY => Some(self.cipher.decrypt_or_original(&v)),
                    other => other,
                };
                (column.to_string(), value)
            })
            .collect();

        HospitalRecord { global_index, fields }
    }
}

// -- Handlers --

/// GET /dashboard?page=N
pub async fn dashboard(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Query(query): Query<DashboardQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let reader = state.reader.clone();
    let page = tokio::task::spawn_blocking(move || reader.list_page(query.page, PAGE_SIZE))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal(e.into())
        })??;

    Ok(Json(DashboardResponse {
        hospitals: page.records,
        current_page: page.page,
        per_page: page.page_size,
        total_count: page.total_count,
        total_pages: page.total_pages,
        session_remaining_secs: ctx.session_remaining_secs,
    }))
}

/// GET /api/search?q=term&page=N
pub async fn search(
    State(state): State<AppState>,
    Extension(_ctx): Extension<AuthContext>,
    Query(query): Query<SearchQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let reader = state.reader.clone();
    let page = tokio::task::spawn_blocking(move || reader.search_page(&query.q, query.page, PAGE_SIZE))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal(e.into())
        })??;

    Ok(Json(SearchResponse {
        success: true,
        hospitals: page.records,
        total_count: page.total_count,
        current_page: page.page,
        total_pages: page.total_pages,
    }))
}
