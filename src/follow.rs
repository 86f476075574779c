use actix_web::{web, HttpRequest, HttpResponse};
use sqlx::SqlitePool;

use crate::auth::validate_token;
use crate::core::errors::ApiError;
use crate::models::models::{FollowEdge, User};
use crate::users::find_by_username;
use crate::AppState;

pub async fn is_following(pool: &SqlitePool, follower_id: i64, followed_id: i64) -> anyhow::Result<bool> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM followers WHERE follower_id = ?1 AND followed_id = ?2",
    )
    .bind(follower_id)
    .bind(followed_id)
    .fetch_one(pool)
    .await?;
    Ok(count > 0)
}

/// Adds the edge unless it already exists. The composite primary key makes
/// this safe against concurrent duplicate requests.
pub async fn follow_user(pool: &SqlitePool, follower_id: i64, followed_id: i64) -> anyhow::Result<()> {
    let result = sqlx::query("INSERT OR IGNORE INTO followers (follower_id, followed_id) VALUES (?1, ?2)")
        .bind(follower_id)
        .bind(followed_id)
        .execute(pool)
        .await?;

    if result.rows_affected() > 0 {
        log::debug!("user {} now follows {}", follower_id, followed_id);
    }
    Ok(())
}

pub async fn unfollow_user(pool: &SqlitePool, follower_id: i64, followed_id: i64) -> anyhow::Result<()> {
    sqlx::query("DELETE FROM followers WHERE follower_id = ?1 AND followed_id = ?2")
        .bind(follower_id)
        .bind(followed_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Outgoing edges of `user_id`.
pub async fn get_edges(pool: &SqlitePool, user_id: i64) -> anyhow::Result<Vec<FollowEdge>> {
    let edges = sqlx::query_as::<_, FollowEdge>(
        "SELECT follower_id, followed_id FROM followers WHERE follower_id = ?1 ORDER BY followed_id",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(edges)
}

pub async fn get_followings(pool: &SqlitePool, user_id: i64) -> anyhow::Result<Vec<User>> {
    let users = sqlx::query_as::<_, User>(
        "SELECT u.id, u.username, u.email, u.password_hash, u.about_me, u.last_seen \
         FROM user u JOIN followers f ON f.followed_id = u.id \
         WHERE f.follower_id = ?1 ORDER BY u.username",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(users)
}

pub async fn get_followers(pool: &SqlitePool, user_id: i64) -> anyhow::Result<Vec<User>> {
    let users = sqlx::query_as::<_, User>(
        "SELECT u.id, u.username, u.email, u.password_hash, u.about_me, u.last_seen \
         FROM user u JOIN followers f ON f.follower_id = u.id \
         WHERE f.followed_id = ?1 ORDER BY u.username",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(users)
}

pub async fn count_followings(pool: &SqlitePool, user_id: i64) -> anyhow::Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM followers WHERE follower_id = ?1")
        .bind(user_id)
        .fetch_one(pool)
        .await?;
    Ok(count)
}

pub async fn count_followers(pool: &SqlitePool, user_id: i64) -> anyhow::Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM followers WHERE followed_id = ?1")
        .bind(user_id)
        .fetch_one(pool)
        .await?;
    Ok(count)
}

// === HTTP Handlers ===

async fn target_user(pool: &SqlitePool, username: &str) -> Result<User, ApiError> {
    if username.is_empty() {
        return Err(ApiError::BadRequest("Username required".to_string()));
    }
    find_by_username(pool, username)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))
}

pub async fn handle_follow(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let user = match validate_token(&state, &req).await {
        Some(user) => user,
        None => return Err(ApiError::Unauthorized),
    };

    let target = target_user(&state.db, &path).await?;
    if target.id == user.id {
        return Err(ApiError::BadRequest("You cannot follow yourself".to_string()));
    }

    follow_user(&state.db, user.id, target.id).await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({"status": "followed", "username": target.username})))
}

pub async fn handle_unfollow(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let user = match validate_token(&state, &req).await {
        Some(user) => user,
        None => return Err(ApiError::Unauthorized),
    };

    let target = target_user(&state.db, &path).await?;
    if target.id == user.id {
        return Err(ApiError::BadRequest("You cannot unfollow yourself".to_string()));
    }

    unfollow_user(&state.db, user.id, target.id).await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({"status": "unfollowed", "username": target.username})))
}

fn usernames(users: &[User]) -> Vec<&str> {
    users.iter().map(|u| u.username.as_str()).collect()
}

pub async fn get_followings_list(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let user = target_user(&state.db, &path).await?;
    let followings = get_followings(&state.db, user.id).await?;

    Ok(HttpResponse::Ok().json(usernames(&followings)))
}

pub async fn get_followers_list(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let user = target_user(&state.db, &path).await?;
    let followers = get_followers(&state.db, user.id).await?;

    Ok(HttpResponse::Ok().json(usernames(&followers)))
}
