// Copyright (c) Voicelink, all rights reserved.
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::metrics::errors as error_metrics;

/// Header for Bearer token authentication
pub const AUTHORIZATION_HEADER: &str = "authorization";

// ============================================================================
// AuthError - Structured authentication error type
// ============================================================================

/// Authentication error variants with structured JSON responses
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthErrorCode {
    ExpiredToken,
    MissingCredentials,
    TokenInvalid,
}

impl std::fmt::Display for AuthErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ExpiredToken => write!(f, "expired_token"),
            Self::MissingCredentials => write!(f, "missing_credentials"),
            Self::TokenInvalid => write!(f, "token_invalid"),
        }
    }
}

/// Structured authentication error with JSON response body
#[derive(Debug, Clone, Serialize)]
pub struct AuthError {
    pub error: &'static str,
    pub code: AuthErrorCode,
    pub message: String,
    pub hint: &'static str,
}

impl AuthError {
    /// Token has expired
    pub fn expired_token() -> Self {
        Self {
            error: "unauthorized",
            code: AuthErrorCode::ExpiredToken,
            message: "Token has expired".to_string(),
            hint: "Re-authenticate to obtain a new token",
        }
    }

    /// No authentication credentials provided
    pub fn missing_credentials() -> Self {
        Self {
            error: "unauthorized",
            code: AuthErrorCode::MissingCredentials,
            message: "No authentication credentials provided".to_string(),
            hint: "Provide an Authorization Bearer token or a ?token query param",
        }
    }

    /// Token validation failed (signature, format, etc.)
    pub fn token_invalid(reason: &str) -> Self {
        Self {
            error: "unauthorized",
            code: AuthErrorCode::TokenInvalid,
            message: format!("Token validation failed: {reason}"),
            hint: "Ensure the token is properly signed and not corrupted",
        }
    }

    /// Get the error code as a string for metrics labels
    pub fn error_type(&self) -> &'static str {
        match self.code {
            AuthErrorCode::ExpiredToken => "expired_token",
            AuthErrorCode::MissingCredentials => "missing_credentials",
            AuthErrorCode::TokenInvalid => "token_invalid",
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        error_metrics::record_auth_error(self.error_type());
        (StatusCode::UNAUTHORIZED, Json(self)).into_response()
    }
}

/// JWT claims carried by voicelink tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: String,
    /// Device id for callers that are not signed in as a user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    pub iat: i64,
    pub exp: i64,
}

/// Authentication configuration
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    /// JWT secret (from VOICELINK_AUTH_SECRET env var)
    pub secret: Option<String>,
}

impl AuthConfig {
    /// Load authentication configuration from environment
    pub fn from_env() -> Self {
        Self { secret: std::env::var("VOICELINK_AUTH_SECRET").ok() }
    }

    /// Log authentication configuration (call after tracing is initialized)
    pub fn log_config(&self) {
        if self.secret.is_some() {
            tracing::info!("JWT validation enabled (VOICELINK_AUTH_SECRET is set)");
        } else {
            tracing::warn!("No authentication configured (VOICELINK_AUTH_SECRET not set)");
        }
    }
}

/// Extract Bearer token from Authorization header
fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Validate a voicelink JWT token
fn validate_jwt(config: &AuthConfig, token: &str) -> Result<Claims, AuthError> {
    let secret = config.secret.as_deref().ok_or_else(|| {
        tracing::warn!("JWT validation attempted but VOICELINK_AUTH_SECRET not configured");
        AuthError::token_invalid("VOICELINK_AUTH_SECRET not configured")
    })?;

    let key = DecodingKey::from_secret(secret.as_bytes());
    let mut validation = Validation::new(Algorithm::HS256);
    // Tokens carry no aud/iss claims.
    validation.validate_aud = false;

    match decode::<Claims>(token, &key, &validation) {
        Ok(token_data) => {
            let claims = token_data.claims;
            tracing::debug!(user_id = %claims.sub, "JWT validated successfully");
            Ok(claims)
        }
        Err(e) => {
            if matches!(e.kind(), jsonwebtoken::errors::ErrorKind::ExpiredSignature) {
                tracing::debug!("JWT expired");
                return Err(AuthError::expired_token());
            }
            tracing::debug!(error = %e, "JWT validation failed");
            Err(AuthError::token_invalid(&e.to_string()))
        }
    }
}

/// Check authentication:
/// 1. Bearer token (Authorization header with JWT)
/// 2. JWT token via query parameter (?token=...) - browser WebSocket clients
///    cannot set headers
///
/// Returns the validated claims, or an [`AuthError`] with a structured JSON
/// body.
pub fn check(
    config: &AuthConfig,
    headers: &HeaderMap,
    query_token: Option<&str>,
) -> Result<Claims, AuthError> {
    if let Some(token) = extract_bearer_token(headers) {
        return match validate_jwt(config, token) {
            Ok(claims) => Ok(claims),
            Err(e) => {
                // Expired tokens are expected behavior, not a security event.
                if matches!(e.code, AuthErrorCode::ExpiredToken) {
                    tracing::debug!(error_type = %e.code, "Authentication failed: JWT expired");
                } else {
                    tracing::warn!(error_type = %e.code, "Authentication failed: JWT validation error");
                }
                Err(e)
            }
        };
    }

    if let Some(token) = query_token {
        return match validate_jwt(config, token) {
            Ok(claims) => {
                tracing::debug!("Authenticated via query token parameter");
                Ok(claims)
            }
            Err(e) => {
                if matches!(e.code, AuthErrorCode::ExpiredToken) {
                    tracing::debug!(error_type = %e.code, "Authentication failed: query token expired");
                } else {
                    tracing::warn!(error_type = %e.code, "Authentication failed: query token validation error");
                }
                Err(e)
            }
        };
    }

    tracing::warn!("Authentication failed: no credentials provided");
    Err(AuthError::missing_credentials())
}


#[cfg(test)]
mod tests {
    use super::test_support::mint_token;
    use super::*;

    fn test_config() -> AuthConfig {
        AuthConfig { secret: Some("test-secret".to_string()) }
    }

    #[test]
    fn extracts_bearer_token() {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION_HEADER,
            "Bearer eyJhbGciOiJIUzI1NiIsInR5cCI6IkpXVCJ9.test".parse().unwrap(),
        );
        assert_eq!(
            extract_bearer_token(&headers),
            Some("eyJhbGciOiJIUzI1NiIsInR5cCI6IkpXVCJ9.test")
        );
    }

    #[test]
    fn missing_credentials_is_an_error() {
        let headers = HeaderMap::new();
        let err = check(&test_config(), &headers, None).unwrap_err();
        assert!(matches!(err.code, AuthErrorCode::MissingCredentials));
        assert_eq!(err.error, "unauthorized");
    }

    #[test]
    fn valid_bearer_token_roundtrips() {
        let token = mint_token("test-secret", "user-42", 3600);
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION_HEADER, format!("Bearer {token}").parse().unwrap());
        let claims = check(&test_config(), &headers, None).unwrap();
        assert_eq!(claims.sub, "user-42");
    }

    #[test]
    fn query_token_is_accepted_without_a_header() {
        let token = mint_token("test-secret", "user-7", 3600);
        let headers = HeaderMap::new();
        let claims = check(&test_config(), &headers, Some(&token)).unwrap();
        assert_eq!(claims.sub, "user-7");
    }

    #[test]
    fn expired_token_is_reported_as_expired() {
        // Past the default validation leeway.
        let token = mint_token("test-secret", "user-42", -3600);
        let headers = HeaderMap::new();
        let err = check(&test_config(), &headers, Some(&token)).unwrap_err();
        assert!(matches!(err.code, AuthErrorCode::ExpiredToken));
    }

    #[test]
    fn wrong_secret_is_invalid() {
        let token = mint_token("other-secret", "user-42", 3600);
        let headers = HeaderMap::new();
        let err = check(&test_config(), &headers, Some(&token)).unwrap_err();
        assert!(matches!(err.code, AuthErrorCode::TokenInvalid));
    }

    #[test]
    fn missing_secret_rejects_tokens() {
        let token = mint_token("test-secret", "user-42", 3600);
        let headers = HeaderMap::new();
        let err = check(&AuthConfig { secret: None }, &headers, Some(&token)).unwrap_err();
        assert!(matches!(err.code, AuthErrorCode::TokenInvalid));
    }
}
