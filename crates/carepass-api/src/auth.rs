use std::sync::Arc;

use axum::{Json, extract::State, response::IntoResponse};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::Utc;
use uuid::Uuid;

use carepass_crypto::FieldCipher;
use carepass_db::Database;
use carepass_types::api::{LoginRequest, StatusResponse, VerifyRequest, VerifyResponse};

use crate::delivery::CodeDelivery;
use crate::error::ApiError;
use crate::records::RecordReader;
use crate::sequencer::AuthSequencer;
use crate::session::{SessionState, SessionStore};

pub const SESSION_COOKIE: &str = "carepass_session";

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub sessions: SessionStore,
    pub sequencer: AuthSequencer,
    pub reader: RecordReader,
    pub secure_cookie: bool,
}

impl AppStateInner {
    pub fn new(
        db: Arc<Database>,
        cipher: FieldCipher,
        delivery: Arc<dyn CodeDelivery>,
        secure_cookie: bool,
    ) -> AppState {
        Arc::new(Self {
            sessions: SessionStore::new(),
            sequencer: AuthSequencer::new(db.clone(), delivery),
            reader: RecordReader::new(db, cipher),
            secure_cookie,
        })
    }
}

pub fn session_id(jar: &CookieJar) -> Option<String> {
    jar.get(SESSION_COOKIE).map(|c| c.value().to_string())
}

/// Fresh random session id with its cookie added to the jar.
fn issue_session_id(jar: CookieJar, secure: bool) -> (String, CookieJar) {
    let id = Uuid::new_v4().to_string();
    let cookie = Cookie::build((SESSION_COOKIE, id.clone()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .build();
    (id, jar.add(cookie))
}

/// POST /api/login
///
/// A successful login always starts under a newly issued session id; whatever
/// id the client sent is discarded.
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mut session = SessionState::default();
    state
        .sequencer
        .login(&mut session, &req.username, &req.password, Utc::now())?;

    if let Some(old) = session_id(&jar) {
        state.sessions.remove(&old).await;
    }
    let (sid, jar) = issue_session_id(jar, state.secure_cookie);
    state.sessions.insert(&sid, session).await;

    Ok((jar, Json(StatusResponse::ok("Verification code sent"))))
}

/// POST /api/verify
///
/// The session moves to another new id once it is authenticated.
pub async fn verify(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<VerifyRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let sid = session_id(&jar).ok_or(ApiError::CodeExpired)?;
    let now = Utc::now();

    state
        .sessions
        .update(&sid, |session| state.sequencer.verify(session, &req.code, now))
        .await?;

    let (new_sid, jar) = issue_session_id(jar, state.secure_cookie);
    if !state.sessions.rename(&sid, &new_sid).await {
        // Logged out between confirming and rotating.
        return Err(ApiError::Unauthenticated);
    }

    Ok((
        jar,
        Json(VerifyResponse {
            success: true,
            redirect: "/dashboard".into(),
        }),
    ))
}

/// POST /api/resend
pub async fn resend(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<impl IntoResponse, ApiError> {
    let sid = session_id(&jar).ok_or(ApiError::NotPending)?;
    let now = Utc::now();

    state
        .sessions
        .update(&sid, |session| state.sequencer.resend(session, now))
        .await?;

    Ok(Json(StatusResponse::ok("A new code has been sent")))
}

/// POST /logout
pub async fn logout(State(state): State<AppState>, jar: CookieJar) -> impl IntoResponse {
    if let Some(sid) = session_id(&jar) {
        state
            .sessions
            .update(&sid, |session| state.sequencer.logout(session))
            .await;
    }

    let jar = jar.remove(Cookie::build(SESSION_COOKIE).path("/"));
    (jar, Json(StatusResponse::bare_ok()))
}
