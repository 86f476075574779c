use std::collections::HashMap;

use actix_web::{web, HttpRequest, HttpResponse};
use chrono::NaiveDateTime;
use sqlx::SqlitePool;

use crate::auth::validate_token;
use crate::config::*;
use crate::core::errors::ApiError;
use crate::core::helpers::{now, sanitize_text};
use crate::core::query_params;
use crate::models::models::{Post, User};
use crate::users::find_by_id;
use crate::AppState;

pub async fn create_post(pool: &SqlitePool, user_id: i64, body: &str) -> anyhow::Result<Post> {
    create_post_at(pool, user_id, body, now()).await
}

pub async fn create_post_at(
    pool: &SqlitePool,
    user_id: i64,
    body: &str,
    timestamp: NaiveDateTime,
) -> anyhow::Result<Post> {
    let id = sqlx::query("INSERT INTO post (body, timestamp, user_id) VALUES (?1, ?2, ?3)")
        .bind(body)
        .bind(timestamp)
        .bind(user_id)
        .execute(pool)
        .await?
        .last_insert_rowid();

    Ok(Post {
        id,
        body: body.to_string(),
        timestamp,
        user_id,
    })
}

// Posts by followed users joined through the edge table, unioned with the
// user's own posts. UNION drops rows reachable through both paths.
const FOLLOWED_POSTS_QUERY: &str = "\
    SELECT p.id, p.body, p.timestamp, p.user_id FROM post p \
    JOIN followers f ON f.followed_id = p.user_id \
    WHERE f.follower_id = ?1 \
    UNION \
    SELECT p.id, p.body, p.timestamp, p.user_id FROM post p \
    WHERE p.user_id = ?1 \
    ORDER BY timestamp DESC, id DESC \
    LIMIT ?2 OFFSET ?3";

async fn fetch_followed_posts(
    pool: &SqlitePool,
    user_id: i64,
    limit: i64,
    offset: i64,
) -> anyhow::Result<Vec<Post>> {
    let posts = sqlx::query_as::<_, Post>(FOLLOWED_POSTS_QUERY)
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;
    Ok(posts)
}

/// The user's feed: own posts plus posts of everyone they follow, newest
/// first.
pub async fn followed_posts(pool: &SqlitePool, user_id: i64) -> anyhow::Result<Vec<Post>> {
    // LIMIT -1 is SQLite for "no limit"
    fetch_followed_posts(pool, user_id, -1, 0).await
}

pub async fn followed_posts_page(
    pool: &SqlitePool,
    user_id: i64,
    page: usize,
    per_page: usize,
) -> anyhow::Result<Vec<Post>> {
    let (limit, offset) = page_bounds(page, per_page);
    fetch_followed_posts(pool, user_id, limit, offset).await
}

pub async fn user_posts_page(
    pool: &SqlitePool,
    user_id: i64,
    page: usize,
    per_page: usize,
) -> anyhow::Result<Vec<Post>> {
    let (limit, offset) = page_bounds(page, per_page);
    let posts = sqlx::query_as::<_, Post>(
        "SELECT id, body, timestamp, user_id FROM post WHERE user_id = ?1 \
         ORDER BY timestamp DESC, id DESC LIMIT ?2 OFFSET ?3",
    )
    .bind(user_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;
    Ok(posts)
}

pub async fn all_posts_page(pool: &SqlitePool, page: usize, per_page: usize) -> anyhow::Result<Vec<Post>> {
    let (limit, offset) = page_bounds(page, per_page);
    let posts = sqlx::query_as::<_, Post>(
        "SELECT id, body, timestamp, user_id FROM post \
         ORDER BY timestamp DESC, id DESC LIMIT ?1 OFFSET ?2",
    )
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;
    Ok(posts)
}

fn page_bounds(page: usize, per_page: usize) -> (i64, i64) {
    let per_page = per_page.max(1) as i64;
    let page = page.max(1) as i64;
    (per_page, (page - 1) * per_page)
}

/// Posts as JSON, each carrying its author's name and avatar thumbnail.
pub async fn posts_json(pool: &SqlitePool, posts: &[Post]) -> anyhow::Result<serde_json::Value> {
    let mut authors: HashMap<i64, Option<User>> = HashMap::new();
    let mut out = Vec::with_capacity(posts.len());

    for post in posts {
        if !authors.contains_key(&post.user_id) {
            let author = find_by_id(pool, post.user_id).await?;
            authors.insert(post.user_id, author);
        }
        let author = authors.get(&post.user_id).and_then(|a| a.as_ref());

        out.push(serde_json::json!({
            "id": post.id,
            "body": post.body,
            "timestamp": post.timestamp,
            "user_id": post.user_id,
            "author": author.map(|a| a.username.as_str()),
            "avatar": author.map(|a| a.avatar(AVATAR_THUMB_SIZE)),
        }));
    }

    Ok(serde_json::Value::Array(out))
}

// === HTTP Handlers ===

pub async fn submit_post(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Bytes,
) -> Result<HttpResponse, ApiError> {
    let user = match validate_token(&state, &req).await {
        Some(user) => user,
        None => return Err(ApiError::Unauthorized),
    };

    let value: serde_json::Value = serde_json::from_slice(&body)?;
    let content = sanitize_text(value["body"].as_str().unwrap_or_default().trim());

    if content.is_empty() || content.chars().count() > MAX_POST_LENGTH {
        return Err(ApiError::BadRequest(format!(
            "Post must be 1-{} characters",
            MAX_POST_LENGTH
        )));
    }

    let post = create_post(&state.db, user.id, &content).await?;
    log::info!("user {} posted {}", user.id, post.id);

    Ok(HttpResponse::Created().json(&post))
}

pub async fn get_feed(
    state: web::Data<AppState>,
    req: HttpRequest,
) -> Result<HttpResponse, ApiError> {
    let user = match validate_token(&state, &req).await {
        Some(user) => user,
        None => return Err(ApiError::Unauthorized),
    };

    let page = query_params::page(req.query_string());
    let posts = followed_posts_page(&state.db, user.id, page, state.config.posts_per_page).await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "page": page,
        "posts": posts_json(&state.db, &posts).await?,
    })))
}

pub async fn list_posts(
    state: web::Data<AppState>,
    req: HttpRequest,
) -> Result<HttpResponse, ApiError> {
    let page = query_params::page(req.query_string());
    let posts = all_posts_page(&state.db, page, state.config.posts_per_page).await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "page": page,
        "posts": posts_json(&state.db, &posts).await?,
    })))
}

#[cfg(test)]
mod tests {
    use super::page_bounds;

    #[test]
    fn test_page_bounds() {
        assert_eq!(page_bounds(1, 25), (25, 0));
        assert_eq!(page_bounds(3, 10), (10, 20));
        assert_eq!(page_bounds(0, 0), (1, 0));
    }
}
