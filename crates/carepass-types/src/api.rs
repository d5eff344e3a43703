use serde::{Deserialize, Serialize};

use crate::models::HospitalRecord;

// -- Auth --

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    #[serde(default)]
    pub code: String,
}

/// Generic `{success, message}` body used by login, resend and every error.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StatusResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self { success: true, message: Some(message.into()) }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self { success: false, message: Some(message.into()) }
    }

    pub fn bare_ok() -> Self {
        Self { success: true, message: None }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub success: bool,
    pub redirect: String,
}

// -- Records --

#[derive(Debug, Deserialize)]
pub struct DashboardQuery {
    #[serde(default = "default_page")]
    pub page: u32,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
    #[serde(default = "default_page")]
    pub page: u32,
}

fn default_page() -> u32 {
    1
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DashboardResponse {
    pub hospitals: Vec<HospitalRecord>,
    pub current_page: u32,
    pub per_page: u32,
    pub total_count: u64,
    pub total_pages: u64,
    pub session_remaining_secs: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResponse {
    pub success: bool,
    pub hospitals: Vec<HospitalRecord>,
    pub total_count: u64,
    pub current_page: u32,
    pub total_pages: u64,
}
