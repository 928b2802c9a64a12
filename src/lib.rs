pub mod application;
pub mod config;
pub mod db;
pub mod domain;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod payment;
pub mod schema;
pub mod stock;

#[cfg(test)]
pub mod testutil;

use std::sync::Arc;

use actix_web::{middleware::Logger, web, App, HttpServer};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use application::cart_service::CartService;
use application::checkout::CheckoutService;
use application::settlement::SettlementService;
use config::Settings;
use domain::ports::PaymentProcessor;

pub use application::sweeper;
pub use db::{create_pool, DbPool};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Run any pending Diesel migrations against the pool's database.
pub fn run_migrations(pool: &DbPool) {
    let mut conn = pool.get().expect("Failed to get DB connection for migrations");
    conn.run_pending_migrations(MIGRATIONS)
        .expect("Failed to run database migrations");
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::cart::add_item,
        handlers::cart::remove_item,
        handlers::cart::view_cart,
        handlers::checkout::create_order,
        handlers::checkout::checkout_summary,
        handlers::orders::get_history,
        handlers::orders::get_order,
        handlers::webhook::stripe_webhook,
    ),
    tags(
        (name = "cart", description = "Cart and stock reservation"),
        (name = "checkout", description = "Checkout and payment"),
        (name = "orders", description = "Order history"),
        (name = "webhooks", description = "Payment processor callbacks"),
    )
)]
struct ApiDoc;

/// Build and return an actix-web `Server` bound to `host:port`.
///
/// The caller is responsible for `.await`-ing (or `tokio::spawn`-ing) the
/// returned server, and for spawning the expiry sweeper separately.
pub fn build_server(
    pool: DbPool,
    settings: Settings,
    processor: Arc<dyn PaymentProcessor>,
    host: &str,
    port: u16,
) -> std::io::Result<actix_web::dev::Server> {
    let cart_service = web::Data::new(CartService::new(
        pool.clone(),
        settings.cart_expiry_chrono(),
    ));
    let checkout_service = web::Data::new(CheckoutService::new(
        pool.clone(),
        processor,
        settings.currency.clone(),
    ));
    let settlement_service = web::Data::new(SettlementService::new(pool.clone()));
    let settings = web::Data::new(settings);
    let pool = web::Data::new(pool);

    Ok(HttpServer::new(move || {
        App::new()
            .app_data(pool.clone())
            .app_data(settings.clone())
            .app_data(cart_service.clone())
            .app_data(checkout_service.clone())
            .app_data(settlement_service.clone())
            .wrap(Logger::default())
            .service(
                web::scope("/cart")
                    .route("", web::get().to(handlers::cart::view_cart))
                    .route("/items", web::post().to(handlers::cart::add_item))
                    .route("/items/{id}", web::delete().to(handlers::cart::remove_item)),
            )
            .route("/checkout", web::post().to(handlers::checkout::create_order))
            .route(
                "/checkout/summary",
                web::get().to(handlers::checkout::checkout_summary),
            )
            .service(
                web::scope("/orders")
                    .route("", web::get().to(handlers::orders::get_history))
                    .route("/{id}", web::get().to(handlers::orders::get_order)),
            )
            .route(
                "/webhooks/stripe",
                web::post().to(handlers::webhook::stripe_webhook),
            )
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-docs/openapi.json", ApiDoc::openapi()),
            )
    })
    .bind((host.to_string(), port))?
    .run())
}
