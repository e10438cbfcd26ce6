mod coupons;
mod db;
mod error;
mod events;
mod idempotency;
mod loyalty;

use axum::{
    routing::{get, post},
    Router,
};
use sqlx::PgPool;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use coupons::{
    handlers, CampaignRepository, Coupon, CouponRepository, CouponService, CouponStatus,
    DiscountType, IssueCouponRequest, RedeemCouponRequest, RedemptionResult, RedemptionService,
    TemplateRepository,
};
use events::EventRepository;
use idempotency::IdempotencyRepository;
use loyalty::{ClientRepository, ClientSummary, Gender, LevelRepository, LoyaltyService};

/// OpenAPI documentation structure
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::issue_coupon_handler,
        handlers::redeem_coupon_handler,
        handlers::get_coupon_handler,
    ),
    components(
        schemas(
            Coupon,
            CouponStatus,
            DiscountType,
            Gender,
            IssueCouponRequest,
            RedeemCouponRequest,
            RedemptionResult,
            ClientSummary,
            error::ErrorResponse,
        )
    ),
    tags(
        (name = "coupons", description = "Coupon issuance and redemption endpoints")
    ),
    info(
        title = "Loyalty Coupon API",
        version = "1.0.0",
        description = "Coupon issuance and redemption engine for the loyalty program"
    )
)]
struct ApiDoc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub coupon_repo: CouponRepository,
    pub coupon_service: CouponService,
    pub redemption_service: RedemptionService,
}

/// Creates and configures the application router
/// Wires up repositories and services, maps endpoints and adds CORS
pub fn create_router(db: PgPool) -> Router {
    use tower_http::cors::{Any, CorsLayer};

    let coupon_repo = CouponRepository::new(db.clone());
    let template_repo = TemplateRepository::new(db.clone());
    let campaign_repo = CampaignRepository::new(db.clone());
    let client_repo = ClientRepository::new(db.clone());
    let level_repo = LevelRepository::new(db.clone());
    let event_repo = EventRepository::new();
    let idempotency_repo = IdempotencyRepository::new(db.clone());
    let loyalty_service = LoyaltyService::new(client_repo.clone());

    let coupon_service = CouponService::new(
        db.clone(),
        coupon_repo.clone(),
        template_repo.clone(),
        campaign_repo,
        client_repo.clone(),
        level_repo.clone(),
        event_repo.clone(),
    );
    let redemption_service = RedemptionService::new(
        db.clone(),
        coupon_repo.clone(),
        template_repo,
        client_repo,
        level_repo,
        loyalty_service,
        event_repo,
        idempotency_repo,
    );

    let state = AppState {
        db,
        coupon_repo,
        coupon_service,
        redemption_service,
    };

    // Configure CORS to allow all origins, methods, and headers
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Swagger UI
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        // API routes
        .route("/api/coupons/issue", post(handlers::issue_coupon_handler))
        .route("/api/coupons/redeem", post(handlers::redeem_coupon_handler))
        .route("/api/coupons/:code", get(handlers::get_coupon_handler))
        .layer(cors)
        .with_state(state)
}

#[tokio::main]
async fn main() {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    tracing::info!("Loyalty Coupon API - Starting...");

    // Get configuration from environment variables
    let database_url =
        std::env::var("DATABASE_URL").expect("DATABASE_URL must be set in environment");
    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port = std::env::var("PORT").unwrap_or_else(|_| "8080".to_string());

    // Create database connection pool
    tracing::info!("Connecting to database...");
    let db_pool = db::create_pool(&database_url)
        .await
        .expect("Failed to create database pool");

    // Run SQLx migrations on startup
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Migrations completed successfully");

    // Create the application router
    let app = create_router(db_pool);

    // Start the Axum server
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Loyalty Coupon API is running on http://{}", addr);
    tracing::info!("Swagger UI available at http://{}/swagger-ui", addr);

    axum::serve(listener, app)
        .await
        .expect("Server error");
}
