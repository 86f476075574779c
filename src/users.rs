use actix_web::{web, HttpRequest, HttpResponse};
use async_trait::async_trait;
use md5::{Digest, Md5};
use sqlx::SqlitePool;

use crate::auth::{create_session, delete_user_sessions, validate_token};
use crate::config::*;
use crate::core::errors::ApiError;
use crate::core::helpers::{hash_password, is_valid_email, now, sanitize_text, verify_password};
use crate::core::query_params;
use crate::follow::{count_followers, count_followings, get_edges};
use crate::models::models::User;
use crate::posts::{posts_json, user_posts_page};
use crate::AppState;

impl User {
    /// Replaces the stored hash with a fresh salted hash of `password`.
    pub fn set_password(&mut self, password: &str) -> anyhow::Result<()> {
        self.password_hash = Some(hash_password(password)?);
        Ok(())
    }

    /// A user without a stored hash never matches.
    pub fn check_password(&self, password: &str) -> bool {
        match &self.password_hash {
            Some(hash) => verify_password(password, hash),
            None => false,
        }
    }

    pub fn avatar(&self, size: u32) -> String {
        let mut hasher = Md5::new();
        hasher.update(self.email.trim().to_lowercase().as_bytes());
        format!(
            "https://www.gravatar.com/avatar/{:x}?d=identicon&s={}",
            hasher.finalize(),
            size
        )
    }
}

/// Resolves a stored identity back into a user, e.g. when rebuilding a
/// session or redeeming a reset token.
#[async_trait]
pub trait IdentityLookup: Send + Sync {
    async fn resolve(&self, id: i64) -> anyhow::Result<Option<User>>;
}

#[async_trait]
impl IdentityLookup for SqlitePool {
    async fn resolve(&self, id: i64) -> anyhow::Result<Option<User>> {
        find_by_id(self, id).await
    }
}

const USER_COLUMNS: &str = "id, username, email, password_hash, about_me, last_seen";

pub async fn create_user(
    pool: &SqlitePool,
    username: &str,
    email: &str,
    password: &str,
) -> anyhow::Result<User> {
    let mut user = User {
        id: 0,
        username: username.to_string(),
        email: email.to_string(),
        password_hash: None,
        about_me: None,
        last_seen: Some(now()),
    };
    user.set_password(password)?;

    user.id = sqlx::query(
        "INSERT INTO user (username, email, password_hash, last_seen) VALUES (?1, ?2, ?3, ?4)",
    )
    .bind(&user.username)
    .bind(&user.email)
    .bind(&user.password_hash)
    .bind(user.last_seen)
    .execute(pool)
    .await?
    .last_insert_rowid();

    log::info!("created user {} ({})", user.username, user.id);
    Ok(user)
}

pub async fn find_by_id(pool: &SqlitePool, id: i64) -> anyhow::Result<Option<User>> {
    let user = sqlx::query_as::<_, User>(&format!("SELECT {} FROM user WHERE id = ?1", USER_COLUMNS))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(user)
}

pub async fn find_by_username(pool: &SqlitePool, username: &str) -> anyhow::Result<Option<User>> {
    let user = sqlx::query_as::<_, User>(&format!(
        "SELECT {} FROM user WHERE username = ?1",
        USER_COLUMNS
    ))
    .bind(username)
    .fetch_optional(pool)
    .await?;
    Ok(user)
}

pub async fn find_by_email(pool: &SqlitePool, email: &str) -> anyhow::Result<Option<User>> {
    let user = sqlx::query_as::<_, User>(&format!(
        "SELECT {} FROM user WHERE lower(email) = lower(?1)",
        USER_COLUMNS
    ))
    .bind(email.trim())
    .fetch_optional(pool)
    .await?;
    Ok(user)
}

pub async fn save_password(pool: &SqlitePool, user: &User) -> anyhow::Result<()> {
    sqlx::query("UPDATE user SET password_hash = ?1 WHERE id = ?2")
        .bind(&user.password_hash)
        .bind(user.id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn save_profile(pool: &SqlitePool, user: &User) -> anyhow::Result<()> {
    sqlx::query("UPDATE user SET username = ?1, about_me = ?2 WHERE id = ?3")
        .bind(&user.username)
        .bind(&user.about_me)
        .bind(user.id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn touch_last_seen(pool: &SqlitePool, user_id: i64) -> anyhow::Result<()> {
    sqlx::query("UPDATE user SET last_seen = ?1 WHERE id = ?2")
        .bind(now())
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Removes the user; posts, follow edges and sessions go with it.
pub async fn delete_user(pool: &SqlitePool, user_id: i64) -> anyhow::Result<bool> {
    let result = sqlx::query("DELETE FROM user WHERE id = ?1")
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

// === HTTP Handlers ===

fn build_user_json(user: &User) -> serde_json::Value {
    serde_json::json!({
        "id": user.id,
        "username": user.username,
        "about_me": user.about_me.as_deref().unwrap_or_default(),
        "last_seen": user.last_seen,
        "avatar": user.avatar(AVATAR_SIZE),
    })
}

fn build_own_user_json(user: &User) -> serde_json::Value {
    let mut value = build_user_json(user);
    value["email"] = serde_json::Value::String(user.email.clone());
    value
}

fn validate_username(username: &str) -> Result<(), ApiError> {
    if username.is_empty() {
        return Err(ApiError::BadRequest("Username is required".to_string()));
    }
    let len = username.chars().count();
    if !(MIN_USERNAME_LENGTH..=MAX_USERNAME_LENGTH).contains(&len) {
        return Err(ApiError::BadRequest(format!(
            "Username must be {}-{} characters",
            MIN_USERNAME_LENGTH, MAX_USERNAME_LENGTH
        )));
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<(), ApiError> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(ApiError::BadRequest(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }
    Ok(())
}

pub async fn register_user(
    state: web::Data<AppState>,
    body: web::Bytes,
) -> Result<HttpResponse, ApiError> {
    let value: serde_json::Value = serde_json::from_slice(&body)?;
    let username = sanitize_text(value["username"].as_str().unwrap_or_default().trim());
    let email = value["email"].as_str().unwrap_or_default().trim();
    let password = value["password"].as_str().unwrap_or_default();

    validate_username(&username)?;
    if email.is_empty() || email.len() > MAX_EMAIL_LENGTH || !is_valid_email(email) {
        return Err(ApiError::BadRequest("A valid email is required".to_string()));
    }
    validate_password(password)?;

    if find_by_username(&state.db, &username).await?.is_some() {
        return Err(ApiError::Conflict("Username exists".to_string()));
    }
    if find_by_email(&state.db, email).await?.is_some() {
        return Err(ApiError::Conflict("Email already registered".to_string()));
    }

    let user = create_user(&state.db, &username, email, password).await?;

    Ok(HttpResponse::Created().json(build_own_user_json(&user)))
}

pub async fn get_profile(
    state: web::Data<AppState>,
    req: HttpRequest,
) -> Result<HttpResponse, ApiError> {
    let user = match validate_token(&state, &req).await {
        Some(user) => user,
        None => return Err(ApiError::Unauthorized),
    };

    let following_ids: Vec<i64> = get_edges(&state.db, user.id)
        .await?
        .into_iter()
        .map(|edge| edge.followed_id)
        .collect();

    let mut response_data = build_own_user_json(&user);
    response_data["following_ids"] = following_ids.into();

    Ok(HttpResponse::Ok().json(response_data))
}

pub async fn update_profile(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Bytes,
) -> Result<HttpResponse, ApiError> {
    let mut user = match validate_token(&state, &req).await {
        Some(user) => user,
        None => return Err(ApiError::Unauthorized),
    };

    let value: serde_json::Value = serde_json::from_slice(&body)?;

    if let Some(username) = value["username"].as_str() {
        let username = sanitize_text(username.trim());
        validate_username(&username)?;
        if username != user.username {
            if find_by_username(&state.db, &username).await?.is_some() {
                return Err(ApiError::Conflict("Username exists".to_string()));
            }
            user.username = username;
        }
    }

    if let Some(about_me) = value["about_me"].as_str() {
        if about_me.chars().count() > MAX_ABOUT_ME_LENGTH {
            return Err(ApiError::BadRequest(format!(
                "About me too long (max {} chars)",
                MAX_ABOUT_ME_LENGTH
            )));
        }
        let sanitized = sanitize_text(about_me.trim());
        user.about_me = if sanitized.is_empty() { None } else { Some(sanitized) };
    }

    let mut password_changed = false;
    if let Some(new_password) = value["new_password"].as_str() {
        validate_password(new_password)?;

        let old_password = value["old_password"]
            .as_str()
            .ok_or_else(|| ApiError::BadRequest("Current password required".to_string()))?;
        if !user.check_password(old_password) {
            return Err(ApiError::Unauthorized);
        }

        user.set_password(new_password)?;
        password_changed = true;
    }

    save_profile(&state.db, &user).await?;

    let mut response_data = build_own_user_json(&user);
    if password_changed {
        save_password(&state.db, &user).await?;

        // Old sessions die with the old password
        delete_user_sessions(&state.db, user.id).await?;
        let token = create_session(&state.db, user.id).await?;
        response_data["token"] = serde_json::Value::String(token);
    }

    Ok(HttpResponse::Ok().json(response_data))
}

pub async fn get_user_details(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let username = path.into_inner();
    let user = find_by_username(&state.db, &username)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    let page = query_params::page(req.query_string());
    let posts = user_posts_page(&state.db, user.id, page, state.config.posts_per_page).await?;

    let mut response_data = build_user_json(&user);
    response_data["followers"] = count_followers(&state.db, user.id).await?.into();
    response_data["following"] = count_followings(&state.db, user.id).await?.into();
    response_data["page"] = page.into();
    response_data["posts"] = posts_json(&state.db, &posts).await?;

    Ok(HttpResponse::Ok().json(response_data))
}
