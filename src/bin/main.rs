use std::sync::Arc;

use actix_web::{middleware, web, App, HttpResponse, HttpServer};

use microblog::config::Config;
use microblog::core::db;
use microblog::email::{LogTransport, Mailer};
use microblog::AppState;

async fn not_found() -> HttpResponse {
    HttpResponse::NotFound().json(serde_json::json!({"error": "No route found"}))
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::from_env();
    let pool = db::connect(&config.database_url).await?;

    if config.seed_test_data {
        db::init_test_data(&pool).await?;
    }

    let bind_address = config.bind_address.clone();
    let mailer = Mailer::new(config.mail.clone(), Arc::new(LogTransport));
    let state = web::Data::new(AppState::new(pool, config, mailer));

    log::info!("Server listening on http://{}", bind_address);

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(middleware::Logger::default())
            .configure(microblog::configure)
            .default_service(web::route().to(not_found))
    })
    .bind(&bind_address)?
    .run()
    .await?;

    Ok(())
}
