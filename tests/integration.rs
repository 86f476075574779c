use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::Duration;

use actix_web::{test, web, App};
use serde_json::json;

use microblog::config::Config;
use microblog::core::db;
use microblog::email::{CapturingTransport, Mailer, Message};
use microblog::AppState;

const RESET_PREFIX: &str = "http://localhost:8080/reset_password/";

async fn state() -> (web::Data<AppState>, Receiver<Message>) {
    let pool = db::connect("sqlite::memory:").await.expect("in-memory database");
    let config = Config {
        secret_key: "integration-secret".to_string(),
        posts_per_page: 10,
        ..Config::default()
    };
    let (transport, outbox) = CapturingTransport::new();
    let mailer = Mailer::new(config.mail.clone(), Arc::new(transport));
    (web::Data::new(AppState::new(pool, config, mailer)), outbox)
}

macro_rules! app {
    ($state:expr) => {
        test::init_service(App::new().app_data($state.clone()).configure(microblog::configure)).await
    };
}

macro_rules! call {
    ($app:expr, $req:expr) => {{
        let resp = test::call_service(&$app, $req.to_request()).await;
        let status = resp.status().as_u16();
        let body: serde_json::Value = test::read_body_json(resp).await;
        (status, body)
    }};
}

macro_rules! register {
    ($app:expr, $name:expr, $password:expr) => {{
        let (status, body) = call!(
            $app,
            test::TestRequest::post().uri("/users").set_json(json!({
                "username": $name,
                "email": format!("{}@example.com", $name),
                "password": $password
            }))
        );
        assert_eq!(status, 201, "register {}: {:?}", $name, body);
        body
    }};
}

macro_rules! login {
    ($app:expr, $name:expr, $password:expr) => {{
        let (status, body) = call!(
            $app,
            test::TestRequest::post()
                .uri("/login")
                .set_json(json!({"username": $name, "password": $password}))
        );
        assert_eq!(status, 200, "login {}: {:?}", $name, body);
        body["token"].as_str().expect("token").to_string()
    }};
}

fn bearer(token: &str) -> (&'static str, String) {
    ("Authorization", format!("Bearer {}", token))
}

fn bodies(feed: &serde_json::Value) -> Vec<String> {
    feed["posts"]
        .as_array()
        .expect("posts array")
        .iter()
        .map(|p| p["body"].as_str().unwrap_or_default().to_string())
        .collect()
}

#[actix_web::test]
async fn test_full_user_flow() {
    let (state, _outbox) = state().await;
    let app = app!(state);

    // 1. Register
    let user = register!(app, "flow_user", "test");
    assert!(user.get("id").is_some(), "User ID missing in create response: {:?}", user);
    assert!(user.get("password_hash").is_none());
    assert_eq!(user["email"], "flow_user@example.com");

    // 2. Login
    let token = login!(app, "flow_user", "test");

    // 3. Create post
    let (status, post) = call!(
        app,
        test::TestRequest::post()
            .uri("/posts")
            .insert_header(bearer(&token))
            .set_json(json!({"body": "Test post from integration test!"}))
    );
    assert_eq!(status, 201);
    assert_eq!(post["body"], "Test post from integration test!");
    assert_eq!(post["user_id"], user["id"]);

    // 4. Own post shows up in the feed
    let (status, feed) = call!(app, test::TestRequest::get().uri("/feed").insert_header(bearer(&token)));
    assert_eq!(status, 200);
    assert_eq!(bodies(&feed), vec!["Test post from integration test!"]);
    assert_eq!(feed["posts"][0]["author"], "flow_user");

    // 5. Profile
    let (status, profile) = call!(app, test::TestRequest::get().uri("/profile").insert_header(bearer(&token)));
    assert_eq!(status, 200);
    assert_eq!(profile["username"], "flow_user");
    assert_eq!(profile["following_ids"], json!([]));
    assert!(profile["avatar"].as_str().unwrap().starts_with("https://www.gravatar.com/avatar/"));

    // 6. Logout ends the session
    let (status, _) = call!(app, test::TestRequest::post().uri("/logout").insert_header(bearer(&token)));
    assert_eq!(status, 200);
    let (status, _) = call!(app, test::TestRequest::get().uri("/profile").insert_header(bearer(&token)));
    assert_eq!(status, 401);
}

#[actix_web::test]
async fn test_register_validation() {
    let (state, _outbox) = state().await;
    let app = app!(state);

    let (status, _) = call!(
        app,
        test::TestRequest::post()
            .uri("/users")
            .set_json(json!({"username": "nomail", "password": "secret"}))
    );
    assert_eq!(status, 400);

    let (status, _) = call!(
        app,
        test::TestRequest::post()
            .uri("/users")
            .set_json(json!({"username": "ab", "email": "ab@example.com", "password": "secret"}))
    );
    assert_eq!(status, 400);

    let (status, _) = call!(
        app,
        test::TestRequest::post()
            .uri("/users")
            .set_json(json!({"username": "shortpw", "email": "shortpw@example.com", "password": "x"}))
    );
    assert_eq!(status, 400);

    register!(app, "taken", "secret");
    let (status, body) = call!(
        app,
        test::TestRequest::post()
            .uri("/users")
            .set_json(json!({"username": "taken", "email": "other@example.com", "password": "secret"}))
    );
    assert_eq!(status, 409);
    assert_eq!(body["error"], "Username exists");

    let (status, _) = call!(
        app,
        test::TestRequest::post()
            .uri("/users")
            .set_json(json!({"username": "other", "email": "TAKEN@example.com", "password": "secret"}))
    );
    assert_eq!(status, 409);
}

#[actix_web::test]
async fn test_create_post_validation() {
    let (state, _outbox) = state().await;
    let app = app!(state);
    register!(app, "poster", "test");
    let token = login!(app, "poster", "test");

    // Try empty content
    let (status, _) = call!(
        app,
        test::TestRequest::post()
            .uri("/posts")
            .insert_header(bearer(&token))
            .set_json(json!({"body": ""}))
    );
    assert_eq!(status, 400);

    // Try content > 140 chars
    let (status, _) = call!(
        app,
        test::TestRequest::post()
            .uri("/posts")
            .insert_header(bearer(&token))
            .set_json(json!({"body": "a".repeat(141)}))
    );
    assert_eq!(status, 400);

    // Markup is stripped
    let (status, post) = call!(
        app,
        test::TestRequest::post()
            .uri("/posts")
            .insert_header(bearer(&token))
            .set_json(json!({"body": "<script>alert(1)</script>plain"}))
    );
    assert_eq!(status, 201);
    assert_eq!(post["body"], "plain");
}

#[actix_web::test]
async fn test_login_invalid_credentials() {
    let (state, _outbox) = state().await;
    let app = app!(state);
    register!(app, "real_user", "rightpass");

    let (status, _) = call!(
        app,
        test::TestRequest::post()
            .uri("/login")
            .set_json(json!({"username": "nonexistent_user", "password": "wrongpass"}))
    );
    assert_eq!(status, 401);

    let (status, _) = call!(
        app,
        test::TestRequest::post()
            .uri("/login")
            .set_json(json!({"username": "real_user", "password": "wrongpass"}))
    );
    assert_eq!(status, 401);
}

#[actix_web::test]
async fn test_create_post_requires_auth() {
    let (state, _outbox) = state().await;
    let app = app!(state);

    let (status, body) = call!(
        app,
        test::TestRequest::post()
            .uri("/posts")
            .set_json(json!({"body": "Test post without auth"}))
    );
    assert_eq!(status, 401);
    assert_eq!(body["error"], "Unauthorized");

    let (status, _) = call!(
        app,
        test::TestRequest::post()
            .uri("/posts")
            .insert_header(bearer("not-a-session"))
            .set_json(json!({"body": "Test post with a bogus token"}))
    );
    assert_eq!(status, 401);
}

#[actix_web::test]
async fn test_follow_and_feed() {
    let (state, _outbox) = state().await;
    let app = app!(state);

    register!(app, "alice", "alice");
    register!(app, "bob", "bob");
    let alice = login!(app, "alice", "alice");
    let bob = login!(app, "bob", "bob");

    let (status, _) = call!(
        app,
        test::TestRequest::post()
            .uri("/posts")
            .insert_header(bearer(&bob))
            .set_json(json!({"body": "hello"}))
    );
    assert_eq!(status, 201);

    // Not following yet: alice sees nothing
    let (_, feed) = call!(app, test::TestRequest::get().uri("/feed").insert_header(bearer(&alice)));
    assert!(bodies(&feed).is_empty());

    let (status, _) = call!(app, test::TestRequest::post().uri("/follow/bob").insert_header(bearer(&alice)));
    assert_eq!(status, 200);
    // Following again is harmless
    let (status, _) = call!(app, test::TestRequest::post().uri("/follow/bob").insert_header(bearer(&alice)));
    assert_eq!(status, 200);

    let (status, _) = call!(
        app,
        test::TestRequest::post()
            .uri("/posts")
            .insert_header(bearer(&alice))
            .set_json(json!({"body": "hi"}))
    );
    assert_eq!(status, 201);

    let (_, feed) = call!(app, test::TestRequest::get().uri("/feed").insert_header(bearer(&alice)));
    assert_eq!(bodies(&feed), vec!["hi", "hello"]);

    let (_, followers) = call!(app, test::TestRequest::get().uri("/followers/bob"));
    assert_eq!(followers, json!(["alice"]));
    let (_, followings) = call!(app, test::TestRequest::get().uri("/followings/alice"));
    assert_eq!(followings, json!(["bob"]));

    let (_, details) = call!(app, test::TestRequest::get().uri("/users/bob"));
    assert_eq!(details["followers"], 1);
    assert_eq!(details["following"], 0);
    assert_eq!(bodies(&details), vec!["hello"]);
    assert!(details.get("email").is_none());

    // One edge despite the double follow
    let (status, profile) = call!(app, test::TestRequest::get().uri("/profile").insert_header(bearer(&alice)));
    assert_eq!(status, 200);
    assert_eq!(profile["following_ids"], json!([details["id"]]));

    // Edge cases
    let (status, _) = call!(app, test::TestRequest::post().uri("/follow/alice").insert_header(bearer(&alice)));
    assert_eq!(status, 400);
    let (status, _) = call!(app, test::TestRequest::post().uri("/follow/nobody").insert_header(bearer(&alice)));
    assert_eq!(status, 404);
    let (status, _) = call!(app, test::TestRequest::post().uri("/follow/bob"));
    assert_eq!(status, 401);

    let (status, _) = call!(app, test::TestRequest::post().uri("/unfollow/bob").insert_header(bearer(&alice)));
    assert_eq!(status, 200);
    let (_, feed) = call!(app, test::TestRequest::get().uri("/feed").insert_header(bearer(&alice)));
    assert_eq!(bodies(&feed), vec!["hi"]);

    // Explore shows everything regardless of follows
    let (status, explore) = call!(app, test::TestRequest::get().uri("/explore"));
    assert_eq!(status, 200);
    assert_eq!(bodies(&explore), vec!["hi", "hello"]);
    let (_, page2) = call!(app, test::TestRequest::get().uri("/explore?page=2"));
    assert!(bodies(&page2).is_empty());
}

#[actix_web::test]
async fn test_update_profile() {
    let (state, _outbox) = state().await;
    let app = app!(state);
    register!(app, "susan", "cat");
    let token = login!(app, "susan", "cat");

    let (status, profile) = call!(
        app,
        test::TestRequest::put()
            .uri("/profile")
            .insert_header(bearer(&token))
            .set_json(json!({"about_me": "<i>I like cats</i>"}))
    );
    assert_eq!(status, 200);
    assert_eq!(profile["about_me"], "I like cats");

    let (status, _) = call!(
        app,
        test::TestRequest::put()
            .uri("/profile")
            .insert_header(bearer(&token))
            .set_json(json!({"about_me": "x".repeat(141)}))
    );
    assert_eq!(status, 400);

    // Wrong current password
    let (status, _) = call!(
        app,
        test::TestRequest::put()
            .uri("/profile")
            .insert_header(bearer(&token))
            .set_json(json!({"new_password": "dog", "old_password": "wrong"}))
    );
    assert_eq!(status, 401);

    let (status, changed) = call!(
        app,
        test::TestRequest::put()
            .uri("/profile")
            .insert_header(bearer(&token))
            .set_json(json!({"new_password": "dog", "old_password": "cat"}))
    );
    assert_eq!(status, 200);
    let new_token = changed["token"].as_str().expect("fresh token").to_string();

    // The old session is gone, the new one works
    let (status, _) = call!(app, test::TestRequest::get().uri("/profile").insert_header(bearer(&token)));
    assert_eq!(status, 401);
    let (status, _) = call!(app, test::TestRequest::get().uri("/profile").insert_header(bearer(&new_token)));
    assert_eq!(status, 200);
    login!(app, "susan", "dog");
}

fn reset_token_from(message: &Message) -> String {
    message
        .text_body
        .lines()
        .find_map(|line| line.strip_prefix(RESET_PREFIX))
        .expect("reset link in mail")
        .to_string()
}

#[actix_web::test]
async fn test_password_reset_flow() {
    let (state, outbox) = state().await;
    let app = app!(state);
    register!(app, "susan", "cat");
    let old_session = login!(app, "susan", "cat");

    // Unknown address: same answer, no mail
    let (status, _) = call!(
        app,
        test::TestRequest::post()
            .uri("/reset_password_request")
            .set_json(json!({"email": "nobody@example.com"}))
    );
    assert_eq!(status, 200);
    assert!(outbox.recv_timeout(Duration::from_millis(300)).is_err());

    let (status, _) = call!(
        app,
        test::TestRequest::post()
            .uri("/reset_password_request")
            .set_json(json!({"email": "susan@example.com"}))
    );
    assert_eq!(status, 200);

    let message = outbox.recv_timeout(Duration::from_secs(5)).expect("reset mail");
    assert_eq!(message.recipients, vec!["susan@example.com".to_string()]);
    let token = reset_token_from(&message);

    let (status, _) = call!(
        app,
        test::TestRequest::post()
            .uri("/reset_password/garbage")
            .set_json(json!({"password": "dog"}))
    );
    assert_eq!(status, 400);

    let (status, _) = call!(
        app,
        test::TestRequest::post()
            .uri(&format!("/reset_password/{}", token))
            .set_json(json!({"password": "dog"}))
    );
    assert_eq!(status, 200);

    login!(app, "susan", "dog");
    let (status, _) = call!(
        app,
        test::TestRequest::post()
            .uri("/login")
            .set_json(json!({"username": "susan", "password": "cat"}))
    );
    assert_eq!(status, 401);

    let (status, _) = call!(app, test::TestRequest::get().uri("/profile").insert_header(bearer(&old_session)));
    assert_eq!(status, 401);
}
