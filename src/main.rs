use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tower_http::{services::ServeDir, trace::TraceLayer}; // static files + request spans

use slotbook::api::HttpBackend;
use slotbook::app::{AppState, local_offset, router};
use slotbook::session::SessionContext;
use slotbook::{config, telemetry};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let settings = config::load()?;
    telemetry::init(&settings.log_filter, settings.log_json)?;

    let session = SessionContext::new();
    let backend = HttpBackend::new(&settings.api_url, settings.request_timeout(), session.clone())?
        .with_token(settings.api_token);

    let state = AppState::new(
        Arc::new(backend),
        session,
        settings.calendar,
        settings.discount.engine(),
        local_offset(),
    );

    let app = Router::new()
        .nest("/api", router(state))
        .nest_service("/", ServeDir::new(&settings.static_dir))
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = settings.bind_addr.parse()?;

    tracing::info!(%addr, backend = %settings.api_url, "server running");
    tracing::info!("static files: http://{addr}/");
    tracing::info!("API base:     http://{addr}/api");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
