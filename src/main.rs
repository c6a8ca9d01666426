use dotenvy::dotenv;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use dashmap::DashMap;
use governor::{Quota, RateLimiter, clock::DefaultClock, state::keyed::DefaultKeyedStateStore};
use nonzero_ext::nonzero;
use tower_http::cors::{CorsLayer, AllowOrigin};
use tower_http::trace::{TraceLayer, DefaultMakeSpan, DefaultOnResponse};
use tracing::Level;
use std::sync::Arc;
use uuid::Uuid;
mod handlers {
    pub mod payment_handlers;
}
mod api {
    pub mod verifier;
}
mod models {
    pub mod plan_models;
    pub mod payment_models;
}
mod payment {
    pub mod form;
    pub mod verification;
}
mod utils {
    pub mod data_uri;
}
mod jobs {
    pub mod session_reaper;
}
mod config;
use api::verifier::{OpenRouterVerifier, PaymentVerifier};
use config::AppConfig;
use handlers::payment_handlers::{self, FormSession};

async fn health_check() -> &'static str {
    "OK"
}

pub struct AppState {
    config: AppConfig,
    verifier: Arc<dyn PaymentVerifier>,
    forms: DashMap<Uuid, Arc<FormSession>>,
    verify_limiter: RateLimiter<Uuid, DefaultKeyedStateStore<Uuid>, DefaultClock>,
}

impl AppState {
    pub fn new(config: AppConfig, verifier: Arc<dyn PaymentVerifier>) -> Self {
        Self {
            config,
            verifier,
            forms: DashMap::new(),
            // Each attempt is a paid model call
            verify_limiter: RateLimiter::keyed(Quota::per_minute(nonzero!(5u32))),
        }
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let payment_routes = Router::new()
        .route("/api/payment/plans", get(payment_handlers::list_plans))
        .route("/api/payment/forms", post(payment_handlers::create_form))
        .route(
            "/api/payment/forms/{id}",
            get(payment_handlers::get_form).delete(payment_handlers::delete_form),
        )
        .route("/api/payment/forms/{id}/plan", post(payment_handlers::select_plan))
        .route("/api/payment/forms/{id}/code", post(payment_handlers::update_transaction_code))
        .route(
            "/api/payment/forms/{id}/screenshot",
            post(payment_handlers::upload_screenshot)
                .layer(DefaultBodyLimit::max(state.config.max_upload_bytes)),
        )
        .route("/api/payment/forms/{id}/verify", post(payment_handlers::verify_payment));

    Router::new()
        .route("/api/health", get(health_check))
        .merge(payment_routes)
        .with_state(state)
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,payproof=debug,openai_api_rs=warn"));
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let _sentry_guard = std::env::var("SENTRY_DSN").ok().map(|dsn| {
        sentry::init((dsn, sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        }))
    });
    init_tracing();

    config::validate_env()?;
    let config = AppConfig::from_env()?;
    let verifier: Arc<dyn PaymentVerifier> = Arc::new(OpenRouterVerifier::new(
        config.openrouter_endpoint.clone(),
        config.verification_model.clone(),
    ));
    tracing::info!(
        environment = %config.environment,
        model = %config.verification_model,
        "Payment verification configured"
    );

    let cors = CorsLayer::new()
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::OPTIONS,
            axum::http::Method::DELETE,
        ])
        .allow_origin(AllowOrigin::exact(config.frontend_url.parse()?))
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::ACCEPT,
            axum::http::header::ORIGIN,
        ]);

    let port = config.port;
    let state = Arc::new(AppState::new(config, verifier));
    let state_for_reaper = state.clone();
    tokio::spawn(async move {
        jobs::session_reaper::start_session_reaper(state_for_reaper).await;
    });
    let app = build_router(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO))
        )
        .layer(cors);

    use tokio::net::TcpListener;
    tracing::info!("Starting server on port {}", port);
    let listener = TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::verifier::MockPaymentVerifier;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_check_responds_ok() {
        let config = AppConfig::from_lookup(|_| None).unwrap();
        let state = Arc::new(AppState::new(config, Arc::new(MockPaymentVerifier::new())));
        let response = build_router(state)
            .oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
