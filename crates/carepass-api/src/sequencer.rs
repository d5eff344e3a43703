use std::sync::Arc;

use argon2::{Argon2, PasswordHash, PasswordVerifier};
use chrono::{DateTime, Utc};
use rand::Rng;
use tracing::{info, warn};
use uuid::Uuid;

use carepass_db::Database;
use carepass_db::models::AccountRow;

use crate::delivery::CodeDelivery;
use crate::error::ApiError;
use crate::session::{AuthContext, SessionState};

/// Drives a session through login, code confirmation and expiry.
///
/// Every operation takes the caller's [`SessionState`] explicitly along with
/// the current time; persisting the state afterwards is up to the caller.
pub struct AuthSequencer {
    db: Arc<Database>,
    delivery: Arc<dyn CodeDelivery>,
}

/// Uniform six-digit code, 100000..=999999.
pub fn generate_code() -> String {
    rand::rng().random_range(100_000..=999_999u32).to_string()
}

impl AuthSequencer {
    pub fn new(db: Arc<Database>, delivery: Arc<dyn CodeDelivery>) -> Self {
        Self { db, delivery }
    }

    pub fn login(
        &self,
        session: &mut SessionState,
        username: &str,
        password: &str,
        now: DateTime<Utc>,
    ) -> Result<(), ApiError> {
        let Some(account) = self.db.get_account_by_username(username)? else {
            warn!("Login failed: unknown user '{}'", username);
            return Err(ApiError::InvalidCredentials);
        };

        let parsed_hash = PasswordHash::new(&account.password)
            .map_err(|e| anyhow::anyhow!("Stored hash for '{}' unreadable: {}", username, e))?;

        if Argon2::default()
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_err()
        {
            warn!("Login failed: bad password for '{}'", username);
            return Err(ApiError::InvalidCredentials);
        }

        let account_id: Uuid = account
            .id
            .parse()
            .map_err(|e| anyhow::anyhow!("Corrupt account id '{}': {}", account.id, e))?;

        let code = generate_code();
        session.begin_challenge(account_id, code.clone(), now);

        self.dispatch(
            &account,
            format!("Your verification code: {}\nThis code is valid for 2 minutes.", code),
        );
        info!("Code issued for '{}'", account.username);
        Ok(())
    }

    pub fn verify(
        &self,
        session: &mut SessionState,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<(), ApiError> {
        session.confirm_code(code, now)?;
        if let Some(account_id) = session.account_id {
            info!("Account {} authenticated", account_id);
        }
        Ok(())
    }

    pub fn resend(&self, session: &mut SessionState, now: DateTime<Utc>) -> Result<(), ApiError> {
        let account_id = session.account_id.ok_or(ApiError::NotPending)?;

        let account = self
            .db
            .get_account_by_id(&account_id.to_string())?
            .ok_or(ApiError::AccountNotFound)?;

        let code = generate_code();
        session.reissue_code(code.clone(), now)?;

        self.dispatch(
            &account,
            format!("Your new code: {}\nThis code is valid for 2 minutes.", code),
        );
        info!("Code re-issued for '{}'", account.username);
        Ok(())
    }

    pub fn require_authenticated(
        &self,
        session: &mut SessionState,
        now: DateTime<Utc>,
    ) -> Result<AuthContext, ApiError> {
        session.check_authenticated(now)
    }

    pub fn logout(&self, session: &mut SessionState) {
        session.clear();
    }

    fn dispatch(&self, account: &AccountRow, text: String) {
        match account.bale_chat_id.as_deref() {
            Some(chat_id) if !chat_id.is_empty() => self.delivery.deliver(chat_id, text),
            _ => warn!("Account '{}' has no chat id, code not delivered", account.username),
        }
    }
}
