use actix_web::{web, HttpRequest, HttpResponse};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::core::errors::ApiError;
use crate::core::helpers::{bearer_token, now};
use crate::models::models::{Session, User};
use crate::users::{find_by_username, touch_last_seen, IdentityLookup};
use crate::AppState;

pub async fn create_session(pool: &SqlitePool, user_id: i64) -> anyhow::Result<String> {
    let token = Uuid::new_v4().to_string();
    sqlx::query("INSERT INTO session (token, user_id, created_at) VALUES (?1, ?2, ?3)")
        .bind(&token)
        .bind(user_id)
        .bind(now())
        .execute(pool)
        .await?;
    Ok(token)
}

pub async fn find_session(pool: &SqlitePool, token: &str) -> anyhow::Result<Option<Session>> {
    let session = sqlx::query_as::<_, Session>(
        "SELECT token, user_id, created_at FROM session WHERE token = ?1",
    )
    .bind(token)
    .fetch_optional(pool)
    .await?;
    Ok(session)
}

pub async fn delete_session(pool: &SqlitePool, token: &str) -> anyhow::Result<()> {
    sqlx::query("DELETE FROM session WHERE token = ?1")
        .bind(token)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn delete_user_sessions(pool: &SqlitePool, user_id: i64) -> anyhow::Result<u64> {
    let result = sqlx::query("DELETE FROM session WHERE user_id = ?1")
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// Rebuilds the user behind the request's bearer token, refreshing their
/// last-seen time. Expired sessions are removed.
pub async fn validate_token(state: &AppState, req: &HttpRequest) -> Option<User> {
    let token = bearer_token(req)?;
    let session = find_session(&state.db, token).await.ok()??;

    // Check if token is expired
    let age_hours = (now() - session.created_at).num_hours();
    if age_hours > state.config.session_expiration_hours {
        if let Err(e) = delete_session(&state.db, token).await {
            log::warn!("failed to drop expired session: {}", e);
        }
        return None;
    }

    // Check if user still exists
    let mut user = state.db.resolve(session.user_id).await.ok()??;

    match touch_last_seen(&state.db, user.id).await {
        Ok(()) => user.last_seen = Some(now()),
        Err(e) => log::warn!("failed to update last_seen for {}: {}", user.id, e),
    }
    Some(user)
}

// === HTTP Handlers ===

pub async fn login_user(
    state: web::Data<AppState>,
    body: web::Bytes,
) -> Result<HttpResponse, ApiError> {
    let creds: serde_json::Value = serde_json::from_slice(&body)?;
    let username = creds["username"].as_str().unwrap_or_default().trim();
    let password = creds["password"].as_str().unwrap_or_default();

    let user = match find_by_username(&state.db, username).await? {
        Some(user) if user.check_password(password) => user,
        _ => {
            log::info!("failed login for {:?}", username);
            return Err(ApiError::Unauthorized);
        }
    };

    let token = create_session(&state.db, user.id).await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "token": token,
        "user_id": user.id
    })))
}

pub async fn logout_user(
    state: web::Data<AppState>,
    req: HttpRequest,
) -> Result<HttpResponse, ApiError> {
    let token = bearer_token(&req).ok_or(ApiError::Unauthorized)?;
    delete_session(&state.db, token).await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": "Logged out successfully"
    })))
}
