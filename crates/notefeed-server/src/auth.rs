use axum::{
    Json,
    extract::{Request, State},
    http::{HeaderMap, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use jsonwebtoken::{DecodingKey, Validation, decode};
use tracing::{debug, info};

use notefeed_core::Session;
use notefeed_types::api::Claims;

use crate::routes::{AppState, status_for};

/// Validate the bearer token and turn its claims into a feed session.
pub fn bearer_session(headers: &HeaderMap, secret: &str) -> Result<Session, StatusCode> {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| {
        debug!("Rejected bearer token: {}", e);
        StatusCode::UNAUTHORIZED
    })?;

    let claims = token_data.claims;
    Ok(Session::signed_in(claims.sub).with_elevated_privilege(claims.superadmin))
}

/// Reject requests without a valid bearer token and hand the caller's
/// session to the handler.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let session = bearer_session(req.headers(), &state.jwt_secret)?;
    req.extensions_mut().insert(session);
    Ok(next.run(req).await)
}

/// POST /session: the feed follows the token's user from now on.
pub async fn sign_in(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, StatusCode> {
    let session = bearer_session(&headers, &state.jwt_secret)?;
    info!(user = ?session.current_user(), "Signing in");
    let response = state.feed.sign_in(session).await.map_err(status_for)?;
    Ok(Json(response))
}

/// DELETE /session: back to anonymous. Only the signed-in user may do this.
pub async fn sign_out(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, StatusCode> {
    let caller = bearer_session(&headers, &state.jwt_secret)?;
    info!(user = ?caller.current_user(), "Signing out");
    let response = state.feed.sign_out(caller).await.map_err(status_for)?;
    Ok(Json(response))
}

#[cfg(test)]
pub(crate) fn issue_token(secret: &str, sub: &str, superadmin: bool) -> String {
    use jsonwebtoken::{EncodingKey, Header, encode};

    // 2100-01-01
    const FAR_FUTURE: usize = 4_102_444_800;
    let claims = Claims {
        sub: sub.into(),
        email: Some(format!("{sub}@example.com")),
        superadmin,
        exp: FAR_FUTURE,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const SECRET: &str = "test-secret";

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn valid_token_becomes_session() {
        let session =
            bearer_session(&headers(&format!("Bearer {}", issue_token(SECRET, "u1", false))), SECRET)
                .unwrap();
        assert_eq!(session, Session::signed_in("u1"));

        let admin =
            bearer_session(&headers(&format!("Bearer {}", issue_token(SECRET, "root", true))), SECRET)
                .unwrap();
        assert!(admin.has_elevated_privilege());
    }

    #[test]
    fn missing_or_foreign_tokens_are_unauthorized() {
        assert_eq!(
            bearer_session(&HeaderMap::new(), SECRET),
            Err(StatusCode::UNAUTHORIZED)
        );
        assert_eq!(
            bearer_session(&headers(&issue_token(SECRET, "u1", false)), SECRET),
            Err(StatusCode::UNAUTHORIZED)
        );
        assert_eq!(
            bearer_session(
                &headers(&format!("Bearer {}", issue_token("other", "u1", false))),
                SECRET
            ),
            Err(StatusCode::UNAUTHORIZED)
        );
    }
}
