// Bearer-token authentication
//
// A deployment configured with a signing key requires every request
// (other than discovery) to carry a valid bearer JWT. An absent token is
// a distinct error code from an invalid one, so clients can tell "this
// server requires a token" apart from "your token is wrong".

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

/// Auth configuration shared with the middleware
#[derive(Clone, Default)]
pub struct AuthConfig {
    /// HMAC signing key; `None` disables auth entirely
    pub token_key: Option<String>,
}

impl AuthConfig {
    pub fn from_env() -> Self {
        Self {
            token_key: std::env::var("ROCKETSHIP_TOKEN_KEY").ok(),
        }
    }

    pub fn required(&self) -> bool {
        self.token_key.is_some()
    }
}

/// Claims carried by an engine token
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject (caller identity)
    #[serde(default)]
    pub sub: Option<String>,
    /// Expiry, seconds since epoch
    pub exp: u64,
}

/// Error body returned on auth failures
#[derive(Debug, Serialize)]
struct AuthErrorBody {
    code: &'static str,
    message: String,
}

fn auth_error(code: &'static str, message: impl Into<String>) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(AuthErrorBody {
            code,
            message: message.into(),
        }),
    )
        .into_response()
}

/// Validate a bearer token against the signing key
pub fn validate_token(key: &str, token: &str) -> Result<TokenClaims, jsonwebtoken::errors::Error> {
    let data = decode::<TokenClaims>(
        token,
        &DecodingKey::from_secret(key.as_bytes()),
        &Validation::default(),
    )?;
    Ok(data.claims)
}

/// Middleware enforcing bearer auth when a key is configured
pub async fn require_bearer(
    State(config): State<AuthConfig>,
    request: Request,
    next: Next,
) -> Response {
    let Some(key) = &config.token_key else {
        return next.run(request).await;
    };

    let header = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let Some(header) = header else {
        return auth_error(
            "token_required",
            "this engine requires a token; pass Authorization: Bearer <token>",
        );
    };

    let Some(token) = header.strip_prefix("Bearer ") else {
        return auth_error("unauthenticated", "malformed Authorization header");
    };

    match validate_token(key, token) {
        Ok(_claims) => next.run(request).await,
        Err(e) => auth_error("unauthenticated", format!("invalid token: {}", e)),
    }
}
