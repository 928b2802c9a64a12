use std::env;
use std::sync::Arc;

use commerce_service::config::Settings;
use commerce_service::payment::StripeClient;
use commerce_service::{build_server, create_pool, run_migrations, sweeper};
use dotenvy::dotenv;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port: u16 = env::var("PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse()
        .expect("PORT must be a valid number");

    let settings = Settings::from_env();
    let pool = create_pool(&database_url);
    run_migrations(&pool);

    let stripe_secret = settings.stripe_secret_key.clone().unwrap_or_else(|| {
        log::warn!("STRIPE_SECRET_KEY not set; payment attempts will be declined upstream");
        String::new()
    });
    let processor = Arc::new(StripeClient::new(stripe_secret));

    sweeper::spawn(pool.clone(), settings.sweep_interval);

    log::info!("Starting server at http://{}:{}", host, port);

    build_server(pool, settings, processor, &host, port)?.await
}
