//! Pantry Gateway: entitlement-gated recipe assistant endpoints in front of a
//! chat-completions backend.

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use pantry_core::{GatewayConfig, GatewayContext};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match GatewayConfig::load() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("[PANTRY SYSTEM] {}", e);
            return ExitCode::FAILURE;
        }
    };

    let ctx = match GatewayContext::from_config(&config) {
        Ok(ctx) => Arc::new(ctx),
        Err(e) => {
            tracing::error!("[PANTRY SYSTEM] {}", e);
            return ExitCode::FAILURE;
        }
    };

    let listener = match tokio::net::TcpListener::bind(&config.bind_addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("[PANTRY SYSTEM] cannot bind {}: {}", config.bind_addr, e);
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(
        "[PANTRY SYSTEM] gateway {} listening on {} (templates: {})",
        pantry_core::version(),
        config.bind_addr,
        config.template_dir
    );

    let app = pantry_gateway::router(ctx, config.max_image_bytes);
    if let Err(e) = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    {
        tracing::error!("[PANTRY SYSTEM] server stopped: {}", e);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
