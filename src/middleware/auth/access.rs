//! Bearer 抽出 + 形式チェック → UserAssertion を extensions に入れる
//!
//! ここでは署名検証をしない。assertion の署名・失効は OBO 交換時に identity
//! provider 側が検証する（ゲートウェイは provider の鍵を持たない）。
//! このミドルウェアがやるのは:
//! - `Authorization: Bearer <jwt>` の抽出（無ければ 401）
//! - JWT として構造が成立しているかの事前フィルタ
//! - audience が設定されていれば aud / exp (leeway 付き) の事前チェック
//! - 通過したら `UserAssertion` を request extensions に格納

use axum::{
    Router,
    body::Body,
    extract::State,
    http::{Request, header},
    middleware::{self, Next},
    response::Response,
};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;

use crate::error::AppError;
use crate::services::exchange::UserAssertion;
use crate::state::AppState;

/// Unsigned claims we pre-filter on. Kept minimal: the provider is the
/// authority on everything else.
#[derive(Debug, Deserialize)]
struct AssertionClaims {
    // `aud` can be a string or an array of strings.
    #[serde(default)]
    aud: serde_json::Value,
    #[serde(default)]
    exp: Option<u64>,
}

pub fn apply(router: Router<AppState>, state: AppState) -> Router<AppState> {
    // axum 0.8 の from_fn は State extractor を受け取れないため、`from_fn_with_state` で明示的に state を渡す
    router.layer(middleware::from_fn_with_state(state, access_middleware))
}

async fn access_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let auth = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::Unauthorized)?;

    let token = auth.strip_prefix("Bearer ").ok_or(AppError::Unauthorized)?;

    if token.is_empty() {
        return Err(AppError::Unauthorized);
    }

    if let Err(reason) = prefilter(
        token,
        state.config.auth_audience.as_deref(),
        state.config.auth_exp_leeway_seconds,
    ) {
        tracing::warn!(reason, "bearer token failed pre-filter");
        return Err(AppError::Unauthorized);
    }

    // Owned copy first: `token` borrows from `req.headers()`, and the borrow
    // must end before `extensions_mut()` takes `req` mutably.
    let assertion = UserAssertion::new(token);

    // middleware → handler への受け渡し
    req.extensions_mut().insert(assertion);

    Ok(next.run(req).await)
}

/// Cheap rejection of obviously wrong tokens before a provider round-trip
/// gets spent on them. Signature is NOT checked here.
fn prefilter(token: &str, audience: Option<&str>, leeway_seconds: u64) -> Result<(), &'static str> {
    // Header must parse as a JWT header (alg present, valid JSON).
    jsonwebtoken::decode_header(token).map_err(|_| "malformed JWT header")?;

    let payload_b64 = token.split('.').nth(1).ok_or("not a three-part JWT")?;
    let payload = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|_| "payload is not base64url")?;
    let claims: AssertionClaims =
        serde_json::from_slice(&payload).map_err(|_| "payload is not a JSON claim set")?;

    let now = chrono::Utc::now().timestamp();
    match claims.exp {
        Some(exp) => {
            if (exp as i64).saturating_add(leeway_seconds as i64) < now {
                return Err("token is expired");
            }
        }
        None => return Err("missing exp claim"),
    }

    if let Some(audience) = audience {
        let matches = match &claims.aud {
            serde_json::Value::String(s) => s == audience,
            serde_json::Value::Array(arr) => arr.iter().any(|v| v.as_str() == Some(audience)),
            _ => false,
        };
        if !matches {
            return Err("audience mismatch");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header};
    use serde_json::json;

    fn token(claims: serde_json::Value) -> String {
        jsonwebtoken::encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"test-only"),
        )
        .unwrap()
    }

    fn future_exp() -> i64 {
        chrono::Utc::now().timestamp() + 600
    }

    #[test]
    fn accepts_well_formed_token_without_audience_check() {
        let t = token(json!({ "sub": "alice", "exp": future_exp() }));

        assert!(prefilter(&t, None, 60).is_ok());
    }

    #[test]
    fn rejects_garbage() {
        assert!(prefilter("not-a-jwt", None, 60).is_err());
        assert!(prefilter("a.b", None, 60).is_err());
    }

    #[test]
    fn rejects_expired_token_beyond_leeway() {
        let t = token(json!({ "sub": "alice", "exp": chrono::Utc::now().timestamp() - 120 }));

        assert!(prefilter(&t, None, 60).is_err());
        assert!(prefilter(&t, None, 600).is_ok());
    }

    #[test]
    fn rejects_missing_exp() {
        let t = token(json!({ "sub": "alice" }));

        assert!(prefilter(&t, None, 60).is_err());
    }

    #[test]
    fn audience_check_accepts_string_and_array_forms() {
        let s = token(json!({ "aud": "api://gw", "exp": future_exp() }));
        let a = token(json!({ "aud": ["other", "api://gw"], "exp": future_exp() }));
        let wrong = token(json!({ "aud": "api://other", "exp": future_exp() }));

        assert!(prefilter(&s, Some("api://gw"), 60).is_ok());
        assert!(prefilter(&a, Some("api://gw"), 60).is_ok());
        assert!(prefilter(&wrong, Some("api://gw"), 60).is_err());
    }
}
