//! Password reset tokens.
//!
//! Tokens are HS256 JWTs carrying `{"reset_password": <user id>, "exp": <unix
//! seconds>}`. Nothing is stored server side, so a token stays valid until it
//! expires even after it has been used.

use actix_web::{web, HttpResponse};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::auth::delete_user_sessions;
use crate::config::MIN_PASSWORD_LENGTH;
use crate::core::errors::ApiError;
use crate::email::send_password_reset_email;
use crate::models::models::User;
use crate::users::{find_by_email, save_password, IdentityLookup};
use crate::AppState;

#[derive(Debug, Serialize, Deserialize)]
struct ResetClaims {
    reset_password: i64,
    exp: u64,
}

pub fn issue_reset_password_token(user_id: i64, secret: &str, ttl_secs: i64) -> anyhow::Result<String> {
    let exp = (chrono::Utc::now().timestamp() + ttl_secs).max(0) as u64;
    let claims = ResetClaims {
        reset_password: user_id,
        exp,
    };

    let token = encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;
    Ok(token)
}

/// Returns the user the token was issued for, or `None` for any bad,
/// expired or foreign token and for users that no longer exist.
pub async fn verify_reset_password_token<L>(lookup: &L, secret: &str, token: &str) -> Option<User>
where
    L: IdentityLookup + ?Sized,
{
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;

    let data = match decode::<ResetClaims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation) {
        Ok(data) => data,
        Err(e) => {
            log::debug!("rejected reset token: {}", e);
            return None;
        }
    };

    // The library only rejects `exp < now`; a token is already dead at `exp`.
    if data.claims.exp as i64 <= chrono::Utc::now().timestamp() {
        log::debug!("rejected reset token: expired");
        return None;
    }

    match lookup.resolve(data.claims.reset_password).await {
        Ok(user) => user,
        Err(e) => {
            log::warn!("reset token lookup failed: {}", e);
            None
        }
    }
}

// === HTTP Handlers ===

/// Always answers the same way so the response does not reveal whether the
/// address is registered.
pub async fn reset_password_request(
    state: web::Data<AppState>,
    body: web::Bytes,
) -> Result<HttpResponse, ApiError> {
    let value: serde_json::Value = serde_json::from_slice(&body)?;
    let email = value["email"].as_str().unwrap_or_default().trim();

    if email.is_empty() {
        return Err(ApiError::BadRequest("Email is required".to_string()));
    }

    if let Some(user) = find_by_email(&state.db, email).await? {
        send_password_reset_email(&state.mailer, &state.config, &user)?;
    }

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": "Check your email for the instructions to reset your password"
    })))
}

pub async fn reset_password(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Bytes,
) -> Result<HttpResponse, ApiError> {
    let token = path.into_inner();
    let mut user = verify_reset_password_token(&state.db, &state.config.secret_key, &token)
        .await
        .ok_or_else(|| ApiError::BadRequest("Invalid or expired token".to_string()))?;

    let value: serde_json::Value = serde_json::from_slice(&body)?;
    let password = value["password"].as_str().unwrap_or_default();
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(ApiError::BadRequest(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }

    user.set_password(password)?;
    save_password(&state.db, &user).await?;
    delete_user_sessions(&state.db, user.id).await?;
    log::info!("password reset for user {}", user.id);

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": "Your password has been reset"
    })))
}
