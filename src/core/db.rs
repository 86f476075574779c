use std::str::FromStr;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::core::helpers::now;
use crate::follow::follow_user;
use crate::posts::create_post_at;
use crate::users::{create_user, find_by_username};

/// Opens the database and brings the schema up to date.
pub async fn connect(database_url: &str) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true);

    // Every connection to an in-memory database sees its own empty schema,
    // so keep exactly one alive for the lifetime of the pool.
    let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");
    let pool_options = if in_memory {
        SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
    } else {
        SqlitePoolOptions::new().max_connections(8)
    };

    let pool = pool_options.connect_with(options).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    log::info!("database ready at {}", database_url);
    Ok(pool)
}

struct SeedUser {
    username: &'static str,
    about_me: &'static str,
    posts: &'static [&'static str],
}

const SEED_USERS: &[SeedUser] = &[
    SeedUser {
        username: "test",
        about_me: "Test user bio",
        posts: &["This is my first post!"],
    },
    SeedUser {
        username: "alice",
        about_me: "Hello, I'm Alice!",
        posts: &[
            "Welcome to my microblog! Excited to share thoughts here.",
            "Just finished an amazing project. Feeling productive today!",
        ],
    },
    SeedUser {
        username: "bob",
        about_me: "Bob's corner of the internet",
        posts: &["Hey everyone! Just joined, looking forward to connecting with you all."],
    },
];

/// Seeds a few demo accounts (password = username) and has `test` follow
/// `bob`. Safe to call repeatedly.
pub async fn init_test_data(pool: &SqlitePool) -> anyhow::Result<()> {
    let base = now() - ChronoDuration::hours(1);
    let mut offset = 0i64;

    for seed in SEED_USERS {
        if find_by_username(pool, seed.username).await?.is_some() {
            continue;
        }

        let email = format!("{}@example.com", seed.username);
        let user = create_user(pool, seed.username, &email, seed.username).await?;
        sqlx::query("UPDATE user SET about_me = ?1 WHERE id = ?2")
            .bind(seed.about_me)
            .bind(user.id)
            .execute(pool)
            .await?;

        for body in seed.posts {
            offset += 1;
            create_post_at(pool, user.id, body, base + ChronoDuration::minutes(offset)).await?;
        }
        log::info!("seeded user {}", seed.username);
    }

    let test = find_by_username(pool, "test").await?;
    let bob = find_by_username(pool, "bob").await?;
    if let (Some(test), Some(bob)) = (test, bob) {
        follow_user(pool, test.id, bob.id).await?;
    }

    Ok(())
}
