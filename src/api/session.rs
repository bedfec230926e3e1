use axum::extract::Request;
use axum::http::{header, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use tracing::debug;
use uuid::Uuid;

pub const SESSION_COOKIE: &str = "imgtasks_session";

/// Browser session the request belongs to. Inserted by [`session_middleware`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

/// Resolves the session cookie, issuing a fresh one when it is missing or malformed.
pub async fn session_middleware(mut request: Request, next: Next) -> Response {
    let existing = extract_session_cookie(&request);
    let issued = existing.is_none();
    let session = existing.unwrap_or_else(|| Uuid::new_v4().simple().to_string());
    request
        .extensions_mut()
        .insert(SessionId(session.clone()));

    let mut response = next.run(request).await;
    if issued {
        debug!(session = %session, "issued session cookie");
        let cookie = format!("{SESSION_COOKIE}={session}; Path=/; HttpOnly; SameSite=Lax");
        if let Ok(value) = HeaderValue::from_str(cookie.as_str()) {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
    }
    response
}

fn extract_session_cookie(request: &Request) -> Option<String> {
    request
        .headers()
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| is_valid_session_id(value))
}

fn is_valid_session_id(value: &str) -> bool {
    !value.is_empty() && value.len() <= 64 && value.bytes().all(|b| b.is_ascii_alphanumeric())
}
