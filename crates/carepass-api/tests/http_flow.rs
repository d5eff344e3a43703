//! Drives the full router: login, code confirmation, the protected
//! dashboard and search, expiry and logout.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use argon2::password_hash::{SaltString, rand_core::OsRng};
use argon2::{Argon2, PasswordHasher};
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use chrono::{TimeDelta, Utc};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

use carepass_api::auth::{AppState, AppStateInner, SESSION_COOKIE};
use carepass_api::delivery::{BaleBot, CodeDelivery};
use carepass_api::router;
use carepass_api::session::{AuthStage, MAX_CODE_ATTEMPTS};
use carepass_crypto::FieldCipher;
use carepass_crypto::keys::generate_field_key;
use carepass_db::Database;
use carepass_types::models::{DISPLAY_KEY, HOSPITAL_COLUMNS};

/// Keeps delivered messages instead of sending them.
#[derive(Default)]
struct Outbox {
    sent: Mutex<Vec<(String, String)>>,
}

impl Outbox {
    fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    fn last_code(&self) -> Option<String> {
        let sent = self.sent();
        let (_, text) = sent.last()?;
        text.split(|c: char| !c.is_ascii_digit())
            .find(|word| word.len() == 6)
            .map(str::to_string)
    }
}

impl CodeDelivery for Outbox {
    fn deliver(&self, chat_id: &str, text: String) {
        self.sent.lock().unwrap().push((chat_id.to_string(), text));
    }
}

struct Harness {
    app: Router,
    state: AppState,
    outbox: Arc<Outbox>,
}

struct Reply {
    status: StatusCode,
    cookie: Option<String>,
    body: Value,
}

fn harness(hospitals: &[String]) -> Harness {
    let outbox = Arc::new(Outbox::default());
    harness_with(hospitals, outbox.clone(), outbox)
}

fn harness_with(hospitals: &[String], outbox: Arc<Outbox>, delivery: Arc<dyn CodeDelivery>) -> Harness {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let cipher = FieldCipher::new(&generate_field_key());

    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(b"correct horse", &salt)
        .unwrap()
        .to_string();
    db.create_account(&Uuid::new_v4().to_string(), "alice", &hash, Some("5550001"))
        .unwrap();

    for (i, name) in hospitals.iter().enumerate() {
        let values: Vec<Option<String>> = HOSPITAL_COLUMNS
            .iter()
            .map(|column| {
                if *column == DISPLAY_KEY {
                    Some(name.clone())
                } else {
                    Some(cipher.encrypt_field(&format!("{}", i % 5 + 1)).unwrap())
                }
            })
            .collect();
        db.insert_record(&values).unwrap();
    }

    let state = AppStateInner::new(db, cipher, delivery, false);
    Harness {
        app: router(state.clone()),
        state,
        outbox,
    }
}

fn hospital_names() -> Vec<String> {
    (0..120)
        .map(|i| {
            if i % 10 == 0 {
                format!("General Hospital {}", i)
            } else {
                format!("Community Clinic {}", i)
            }
        })
        .collect()
}

async fn send(h: &Harness, method: &str, uri: &str, cookie: Option<&str>, body: Option<Value>) -> Reply {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = h.app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(str::to_string);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

    Reply { status, cookie, body }
}

/// Log in and return the session cookie plus the delivered code.
async fn login(h: &Harness) -> (String, String) {
    let reply = send(
        h,
        "POST",
        "/api/login",
        None,
        Some(json!({ "username": "alice", "password": "correct horse" })),
    )
    .await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["success"], true);

    let cookie = reply.cookie.expect("login sets the session cookie");
    assert!(cookie.starts_with(SESSION_COOKIE));
    (cookie, h.outbox.last_code().expect("code delivered"))
}

/// Log in, confirm the code, and return the cookie issued on confirmation.
async fn authenticated(h: &Harness) -> String {
    let (cookie, code) = login(h).await;
    let reply = send(h, "POST", "/api/verify", Some(&cookie), Some(json!({ "code": code }))).await;
    assert_eq!(reply.status, StatusCode::OK);
    let confirmed = reply.cookie.expect("verify issues a new session cookie");
    assert_ne!(confirmed, cookie);
    confirmed
}

fn sid(cookie: &str) -> &str {
    cookie.split_once('=').map(|(_, v)| v).unwrap()
}

#[tokio::test]
async fn full_login_and_dashboard_flow() {
    let h = harness(&hospital_names());
    let (cookie, code) = login(&h).await;
    assert_eq!(h.outbox.sent()[0].0, "5550001");

    let wrong = if code == "999999" { "100000" } else { "999999" };
    let reply = send(&h, "POST", "/api/verify", Some(&cookie), Some(json!({ "code": wrong }))).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.body["success"], false);

    let reply = send(&h, "POST", "/api/verify", Some(&cookie), Some(json!({ "code": code }))).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body, json!({ "success": true, "redirect": "/dashboard" }));
    let confirmed = reply.cookie.unwrap();

    let reply = send(&h, "GET", "/dashboard", Some(&cookie), None).await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);

    let reply = send(&h, "GET", "/dashboard?page=2", Some(&confirmed), None).await;
    assert_eq!(reply.status, StatusCode::OK);
    let hospitals = reply.body["hospitals"].as_array().unwrap();
    assert_eq!(hospitals.len(), 50);
    assert_eq!(hospitals[0]["global_index"], 51);
    assert_eq!(hospitals[0]["Facility_Name"], "General Hospital 50");
    assert_eq!(hospitals[0]["Rating_Overall"], "1");
    assert_eq!(reply.body["total_count"], 120);
    assert_eq!(reply.body["total_pages"], 3);
    assert_eq!(reply.body["current_page"], 2);
    let remaining = reply.body["session_remaining_secs"].as_i64().unwrap();
    assert!((295..=300).contains(&remaining));
}

#[tokio::test]
async fn search_returns_matching_page() {
    let h = harness(&hospital_names());
    let cookie = authenticated(&h).await;

    let reply = send(&h, "GET", "/api/search?q=General&page=1", Some(&cookie), None).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["success"], true);
    assert_eq!(reply.body["total_count"], 12);
    assert_eq!(reply.body["total_pages"], 1);
    let hospitals = reply.body["hospitals"].as_array().unwrap();
    assert_eq!(hospitals.len(), 12);
    assert!(hospitals.iter().all(|h| h["Facility_Name"].as_str().unwrap().contains("General")));
    assert_eq!(hospitals[11]["global_index"], 12);

    let blank = send(&h, "GET", "/api/search?q=&page=1", Some(&cookie), None).await;
    assert_eq!(blank.body["total_count"], 120);
    assert_eq!(blank.body["hospitals"].as_array().unwrap().len(), 50);
}

#[tokio::test]
async fn bad_credentials_are_401() {
    let h = harness(&[]);
    let reply = send(
        &h,
        "POST",
        "/api/login",
        None,
        Some(json!({ "username": "alice", "password": "nope" })),
    )
    .await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.body["success"], false);
    assert_eq!(reply.body["message"], "Invalid username or password");
    assert!(h.outbox.sent().is_empty());
}

#[tokio::test]
async fn protected_routes_need_a_confirmed_session() {
    let h = harness(&hospital_names());

    let reply = send(&h, "GET", "/dashboard", None, None).await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);

    let (cookie, _code) = login(&h).await;
    let reply = send(&h, "GET", "/api/search?q=General", Some(&cookie), None).await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.body["success"], false);
}

#[tokio::test]
async fn elapsed_session_is_cleared() {
    let h = harness(&hospital_names());
    let cookie = authenticated(&h).await;

    h.state
        .sessions
        .update(sid(&cookie), |s| s.login_at = Some(Utc::now() - TimeDelta::seconds(301)))
        .await;

    let reply = send(&h, "GET", "/dashboard", Some(&cookie), None).await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.body["message"], "Session expired, please log in again");
    assert!(h.state.sessions.load(sid(&cookie)).await.is_empty());
}

#[tokio::test]
async fn expired_code_is_rejected() {
    let h = harness(&[]);
    let (cookie, code) = login(&h).await;

    h.state
        .sessions
        .update(sid(&cookie), |s| s.code_expires_at = Some(Utc::now() - TimeDelta::seconds(1)))
        .await;

    let reply = send(&h, "POST", "/api/verify", Some(&cookie), Some(json!({ "code": code }))).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.body["message"], "The verification code has expired");
}

#[tokio::test]
async fn verify_without_session_is_rejected() {
    let h = harness(&[]);
    let reply = send(&h, "POST", "/api/verify", None, Some(json!({ "code": "123456" }))).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.body["success"], false);
}

#[tokio::test]
async fn resend_issues_a_new_code() {
    let h = harness(&[]);

    let reply = send(&h, "POST", "/api/resend", None, None).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);

    let (cookie, _first) = login(&h).await;
    let reply = send(&h, "POST", "/api/resend", Some(&cookie), None).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["success"], true);
    assert_eq!(h.outbox.sent().len(), 2);

    let second = h.outbox.last_code().unwrap();
    let reply = send(&h, "POST", "/api/verify", Some(&cookie), Some(json!({ "code": second }))).await;
    assert_eq!(reply.status, StatusCode::OK);
}

#[tokio::test]
async fn resend_for_deleted_account_is_404() {
    let h = harness(&[]);
    let (cookie, _code) = login(&h).await;

    h.state
        .sessions
        .update(sid(&cookie), |s| s.account_id = Some(Uuid::new_v4()))
        .await;

    let reply = send(&h, "POST", "/api/resend", Some(&cookie), None).await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn logout_ends_the_session() {
    let h = harness(&hospital_names());
    let cookie = authenticated(&h).await;

    let reply = send(&h, "POST", "/logout", Some(&cookie), None).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body, json!({ "success": true }));

    let reply = send(&h, "GET", "/dashboard", Some(&cookie), None).await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);

    let reply = send(&h, "POST", "/logout", None, None).await;
    assert_eq!(reply.status, StatusCode::OK);
}

#[tokio::test]
async fn planted_session_id_is_never_authenticated() {
    let h = harness(&hospital_names());
    let planted = format!("{}=attacker-chosen-id", SESSION_COOKIE);

    let reply = send(
        &h,
        "POST",
        "/api/login",
        Some(&planted),
        Some(json!({ "username": "alice", "password": "correct horse" })),
    )
    .await;
    assert_eq!(reply.status, StatusCode::OK);
    let issued = reply.cookie.expect("login issues its own session id");
    assert_ne!(issued, planted);
    assert!(h.state.sessions.load("attacker-chosen-id").await.is_empty());

    let code = h.outbox.last_code().unwrap();
    let reply = send(&h, "POST", "/api/verify", Some(&planted), Some(json!({ "code": code }))).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);

    let reply = send(&h, "POST", "/api/verify", Some(&issued), Some(json!({ "code": code }))).await;
    assert_eq!(reply.status, StatusCode::OK);
    let confirmed = reply.cookie.expect("verify rotates the session id");
    assert_ne!(confirmed, issued);

    for stale in [&planted, &issued] {
        let reply = send(&h, "GET", "/dashboard", Some(stale), None).await;
        assert_eq!(reply.status, StatusCode::UNAUTHORIZED, "{}", stale);
    }
    let reply = send(&h, "GET", "/dashboard", Some(&confirmed), None).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(h.state.sessions.len().await, 1);
}

#[tokio::test]
async fn relogin_drops_the_previous_session() {
    let h = harness(&[]);
    let first = authenticated(&h).await;

    let reply = send(
        &h,
        "POST",
        "/api/login",
        Some(&first),
        Some(json!({ "username": "alice", "password": "correct horse" })),
    )
    .await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_ne!(reply.cookie.unwrap(), first);
    assert!(h.state.sessions.load(sid(&first)).await.is_empty());
}

#[tokio::test]
async fn failed_login_keeps_the_existing_session() {
    let h = harness(&[]);
    let cookie = authenticated(&h).await;

    let reply = send(
        &h,
        "POST",
        "/api/login",
        Some(&cookie),
        Some(json!({ "username": "alice", "password": "nope" })),
    )
    .await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert!(reply.cookie.is_none());

    let reply = send(&h, "GET", "/dashboard", Some(&cookie), None).await;
    assert_eq!(reply.status, StatusCode::OK);
}

#[tokio::test]
async fn login_answers_while_delivery_hangs() {
    // A bot endpoint that accepts the connection and never replies.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let stalled = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
        drop(socket);
    });

    let bot = Arc::new(BaleBot::new(format!("http://{}", addr), "token"));
    let h = harness_with(&[], Arc::new(Outbox::default()), bot);

    let reply = tokio::time::timeout(
        Duration::from_secs(2),
        send(
            &h,
            "POST",
            "/api/login",
            None,
            Some(json!({ "username": "alice", "password": "correct horse" })),
        ),
    )
    .await
    .expect("login waited on code delivery");
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["success"], true);

    let cookie = reply.cookie.unwrap();
    let session = h.state.sessions.load(sid(&cookie)).await;
    assert_eq!(session.stage(), AuthStage::CodePending);
    let code = session.pending_code.unwrap();
    assert_eq!(code.len(), 6);

    let reply = send(&h, "POST", "/api/verify", Some(&cookie), Some(json!({ "code": code }))).await;
    assert_eq!(reply.status, StatusCode::OK);

    stalled.abort();
}

#[tokio::test]
async fn code_is_withdrawn_after_repeated_misses() {
    let h = harness(&[]);
    let (cookie, code) = login(&h).await;
    let wrong = if code == "999999" { "100000" } else { "999999" };

    for _ in 0..MAX_CODE_ATTEMPTS {
        let reply = send(&h, "POST", "/api/verify", Some(&cookie), Some(json!({ "code": wrong }))).await;
        assert_eq!(reply.status, StatusCode::BAD_REQUEST);
        assert_eq!(reply.body["message"], "The verification code is incorrect");
    }

    let reply = send(&h, "POST", "/api/verify", Some(&cookie), Some(json!({ "code": code }))).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.body["message"], "The verification code has expired");

    let reply = send(&h, "POST", "/api/resend", Some(&cookie), None).await;
    assert_eq!(reply.status, StatusCode::OK);
    let fresh = h.outbox.last_code().unwrap();
    let reply = send(&h, "POST", "/api/verify", Some(&cookie), Some(json!({ "code": fresh }))).await;
    assert_eq!(reply.status, StatusCode::OK);
}

#[tokio::test]
async fn health_is_public() {
    let h = harness(&[]);
    let reply = send(&h, "GET", "/health", None, None).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["status"], "ok");
}
