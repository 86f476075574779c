use std::sync::Arc;

use actix_web::web;
use sqlx::SqlitePool;

pub mod auth;
pub mod config;
pub mod core;
pub mod email;
pub mod follow;
pub mod models;
pub mod posts;
pub mod reset;
pub mod templates;
pub mod users;

use crate::config::Config;
use crate::email::Mailer;

/// Shared by every request handler.
pub struct AppState {
    pub db: SqlitePool,
    pub config: Arc<Config>,
    pub mailer: Mailer,
}

impl AppState {
    pub fn new(db: SqlitePool, config: Config, mailer: Mailer) -> Self {
        AppState {
            db,
            config: Arc::new(config),
            mailer,
        }
    }
}

/// Registers every route. The caller supplies `web::Data<AppState>`.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/users", web::post().to(users::register_user))
        .route("/users/{username}", web::get().to(users::get_user_details))
        .route("/login", web::post().to(auth::login_user))
        .route("/logout", web::post().to(auth::logout_user))
        .route("/profile", web::get().to(users::get_profile))
        .route("/profile", web::put().to(users::update_profile))
        .route("/posts", web::post().to(posts::submit_post))
        .route("/feed", web::get().to(posts::get_feed))
        .route("/explore", web::get().to(posts::list_posts))
        .route("/follow/{username}", web::post().to(follow::handle_follow))
        .route("/unfollow/{username}", web::post().to(follow::handle_unfollow))
        .route("/followings/{username}", web::get().to(follow::get_followings_list))
        .route("/followers/{username}", web::get().to(follow::get_followers_list))
        .route("/reset_password_request", web::post().to(reset::reset_password_request))
        .route("/reset_password/{token}", web::post().to(reset::reset_password));
}
