use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Serialize, Deserialize, Clone, Debug, FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing, default)]
    pub password_hash: Option<String>,
    pub about_me: Option<String>,
    pub last_seen: Option<NaiveDateTime>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, FromRow)]
pub struct Post {
    pub id: i64,
    pub body: String,
    pub timestamp: NaiveDateTime,
    pub user_id: i64,
}

#[derive(Serialize, Deserialize, Clone, Debug, FromRow)]
pub struct Session {
    pub token: String,
    pub user_id: i64,
    pub created_at: NaiveDateTime,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, FromRow)]
pub struct FollowEdge {
    pub follower_id: i64,
    pub followed_id: i64,
}
