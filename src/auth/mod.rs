//! API-Key Authentication
//!
//! Every authenticated request carries a bearer credential in the
//! `Authorization` header; the user row is looked up by its unique
//! `api_key`. Admin routes are additionally gated on `role = ADMIN`.

use axum::{
    body::Body,
    extract::State,
    http::{header, Request},
    middleware::Next,
    response::Response,
};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::ExchangeError;
use crate::models::UserRole;
use crate::AppState;

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub role: UserRole,
}

/// Accepted header forms: `TOKEN <key>`, `Bearer <key>`, or the raw key.
pub fn extract_api_key(header: &str) -> Option<&str> {
    let value = header.trim();
    if value.is_empty() {
        return None;
    }
    let mut parts = value.splitn(2, char::is_whitespace);
    match (parts.next(), parts.next()) {
        (Some(scheme), Some(key))
            if scheme.eq_ignore_ascii_case("token") || scheme.eq_ignore_ascii_case("bearer") =>
        {
            let key = key.trim();
            (!key.is_empty()).then_some(key)
        }
        (Some(raw), None) => Some(raw),
        _ => None,
    }
}

pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ExchangeError> {
    let header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or(ExchangeError::Unauthenticated)?;

    let api_key = extract_api_key(header).ok_or(ExchangeError::Unauthenticated)?;

    let user: Option<(Uuid, UserRole)> =
        sqlx::query_as("SELECT id, role FROM users WHERE api_key = $1")
            .bind(api_key)
            .fetch_optional(&state.db.pool)
            .await?;

    let auth_user = match user {
        Some((id, role)) => AuthUser { id, role },
        None => {
            // Lazy admin creation is an explicit opt-in; the normal path
            // is the startup bootstrap below.
            if state.config.admin_auto_create
                && state.config.admin_api_key.as_deref() == Some(api_key)
            {
                let id =
                    ensure_admin(&state.db.pool, &state.config.admin_name, api_key).await?;
                AuthUser {
                    id,
                    role: UserRole::Admin,
                }
            } else {
                return Err(ExchangeError::Unauthenticated);
            }
        }
    };

    request.extensions_mut().insert(auth_user);
    Ok(next.run(request).await)
}

/// Layered inside `auth_middleware` on admin routes; reads the
/// already-resolved user from request extensions.
pub async fn require_admin(request: Request<Body>, next: Next) -> Result<Response, ExchangeError> {
    let user = request
        .extensions()
        .get::<AuthUser>()
        .ok_or(ExchangeError::Unauthenticated)?;
    if user.role != UserRole::Admin {
        return Err(ExchangeError::Forbidden);
    }
    Ok(next.run(request).await)
}

/// One-shot idempotent bootstrap, run before the listener starts: if an
/// admin api key is configured, make sure a user with that key exists
/// and holds the ADMIN role.
pub async fn bootstrap_admin(pool: &PgPool, config: &AppConfig) -> Result<(), ExchangeError> {
    let Some(api_key) = config.admin_api_key.as_deref() else {
        return Ok(());
    };
    let id = ensure_admin(pool, &config.admin_name, api_key).await?;
    tracing::info!("admin user ready: {}", id);
    Ok(())
}

async fn ensure_admin(pool: &PgPool, name: &str, api_key: &str) -> Result<Uuid, ExchangeError> {
    let (id,): (Uuid,) = sqlx::query_as(
        r#"
        INSERT INTO users (id, name, role, api_key)
        VALUES ($1, $2, 'ADMIN', $3)
        ON CONFLICT (api_key) DO UPDATE SET role = 'ADMIN'
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .bind(api_key)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_token_scheme() {
        assert_eq!(extract_api_key("TOKEN key-abc"), Some("key-abc"));
        assert_eq!(extract_api_key("token key-abc"), Some("key-abc"));
        assert_eq!(
            extract_api_key("TOKEN key with spaces"),
            Some("key with spaces")
        );
    }

    #[test]
    fn test_extract_bearer_scheme() {
        assert_eq!(extract_api_key("Bearer key-abc"), Some("key-abc"));
        assert_eq!(extract_api_key("bearer key-abc"), Some("key-abc"));
    }

    #[test]
    fn test_extract_raw_key() {
        assert_eq!(extract_api_key("key-abc"), Some("key-abc"));
        assert_eq!(extract_api_key("  key-abc  "), Some("key-abc"));
    }

    #[test]
    fn test_extract_rejects_garbage() {
        assert_eq!(extract_api_key(""), None);
        assert_eq!(extract_api_key("   "), None);
        assert_eq!(extract_api_key("Basic key-abc"), None);
    }
}
