use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};

use carepass_crypto::keys::key_from_base64;

/// Field keys that MUST NOT be used.
const PLACEHOLDER_KEYS: &[&str] = &["change-me", "change-me-to-a-base64-key"];

pub const DEFAULT_BALE_API_URL: &str = "https://tapi.bale.ai";

/// Runtime configuration, read from `CAREPASS_*` environment variables.
/// Not `Debug`: it holds the field key.
#[derive(Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub field_key: [u8; 32],
    pub bale_token: Option<String>,
    pub bale_api_url: String,
    pub secure_cookie: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Build from any variable source; `from_env` passes the process
    /// environment.
    pub fn from_vars<F>(var: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = var("CAREPASS_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = var("CAREPASS_PORT")
            .unwrap_or_else(|| "5000".into())
            .parse()
            .context("CAREPASS_PORT is not a valid port")?;
        let db_path: PathBuf = var("CAREPASS_DB_PATH")
            .unwrap_or_else(|| "carepass.db".into())
            .into();

        let raw_key = var("CAREPASS_FIELD_KEY").unwrap_or_default();
        if raw_key.trim().is_empty() || PLACEHOLDER_KEYS.contains(&raw_key.trim()) {
            return Err(anyhow!("CAREPASS_FIELD_KEY is unset or still a placeholder"));
        }
        let field_key =
            key_from_base64(&raw_key).context("CAREPASS_FIELD_KEY must be 32 bytes of base64")?;

        let bale_token = var("CAREPASS_BALE_TOKEN").filter(|t| !t.trim().is_empty());
        let bale_api_url =
            var("CAREPASS_BALE_API_URL").unwrap_or_else(|| DEFAULT_BALE_API_URL.into());
        let secure_cookie = var("CAREPASS_SECURE_COOKIE")
            .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Ok(Self {
            host,
            port,
            db_path,
            field_key,
            bale_token,
            bale_api_url,
            secure_cookie,
        })
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}
