use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use chrono::Utc;

use crate::auth::{AppState, session_id};
use crate::error::ApiError;

/// Let the request through only for a session authenticated within the
/// last five minutes. An elapsed session is wiped before the 401 goes out.
/// Handlers receive the caller as an `Extension<AuthContext>`.
pub async fn require_session(
    State(state): State<AppState>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let sid = session_id(&jar).ok_or(ApiError::Unauthenticated)?;
    let now = Utc::now();
    let ctx = state
        .sessions
        .update(&sid, |session| state.sequencer.require_authenticated(session, now))
        .await?;

    req.extensions_mut().insert(ctx);
    Ok(next.run(req).await)
}
