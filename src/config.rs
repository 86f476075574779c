// Validation limits, mirrored by the column widths in migrations/.
pub const MIN_USERNAME_LENGTH: usize = 3;
pub const MAX_USERNAME_LENGTH: usize = 64;
pub const MAX_EMAIL_LENGTH: usize = 120;
pub const MIN_PASSWORD_LENGTH: usize = 3;
pub const MAX_POST_LENGTH: usize = 140;
pub const MAX_ABOUT_ME_LENGTH: usize = 140;

pub const AVATAR_SIZE: u32 = 128;
pub const AVATAR_THUMB_SIZE: u32 = 36;

const DEFAULT_SECRET_KEY: &str = "you-will-never-guess";

/// Settings the mail transport needs. Cloned into the background send so it
/// never depends on request state.
#[derive(Clone, Debug, Default)]
pub struct MailConfig {
    pub server: Option<String>,
    pub port: u16,
    pub use_tls: bool,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Process-wide configuration, read once at start-up.
#[derive(Clone, Debug)]
pub struct Config {
    pub secret_key: String,
    pub database_url: String,
    pub bind_address: String,
    pub base_url: String,
    pub posts_per_page: usize,
    pub session_expiration_hours: i64,
    pub reset_token_ttl_secs: i64,
    pub seed_test_data: bool,
    pub admins: Vec<String>,
    pub mail: MailConfig,
}

impl Config {
    pub fn from_env() -> Self {
        let secret_key = env_string("SECRET_KEY").unwrap_or_else(|| {
            log::warn!("SECRET_KEY is not set, falling back to the development key");
            DEFAULT_SECRET_KEY.to_string()
        });

        let admins = env_string("ADMINS")
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|list| !list.is_empty())
            .unwrap_or_else(|| vec!["admin@example.com".to_string()]);

        Config {
            secret_key,
            database_url: env_string("DATABASE_URL")
                .unwrap_or_else(|| "sqlite://microblog.db".to_string()),
            bind_address: env_string("MICROBLOG_BIND").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            base_url: env_string("MICROBLOG_BASE_URL")
                .unwrap_or_else(|| "http://localhost:8080".to_string()),
            posts_per_page: env_parse("POSTS_PER_PAGE").unwrap_or(25usize).max(1),
            session_expiration_hours: env_parse("MICROBLOG_SESSION_EXPIRATION_HOURS").unwrap_or(24),
            reset_token_ttl_secs: env_parse("MICROBLOG_RESET_TOKEN_TTL_SECS").unwrap_or(600),
            seed_test_data: env_bool("MICROBLOG_SEED_TEST_DATA"),
            admins,
            mail: MailConfig {
                server: env_string("MAIL_SERVER"),
                port: env_parse("MAIL_PORT").unwrap_or(25),
                use_tls: env_bool("MAIL_USE_TLS"),
                username: env_string("MAIL_USERNAME"),
                password: env_string("MAIL_PASSWORD"),
            },
        }
    }

    /// Address outgoing mail is sent from.
    pub fn mail_sender(&self) -> &str {
        self.admins
            .first()
            .map(|s| s.as_str())
            .unwrap_or("admin@example.com")
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            secret_key: DEFAULT_SECRET_KEY.to_string(),
            database_url: "sqlite::memory:".to_string(),
            bind_address: "127.0.0.1:8080".to_string(),
            base_url: "http://localhost:8080".to_string(),
            posts_per_page: 25,
            session_expiration_hours: 24,
            reset_token_ttl_secs: 600,
            seed_test_data: false,
            admins: vec!["admin@example.com".to_string()],
            mail: MailConfig::default(),
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}

fn env_bool(key: &str) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}
