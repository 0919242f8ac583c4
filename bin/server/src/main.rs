use siwa_auth::AppleStrategy;
use siwa_server::{AppState, config::ServerConfig, router, users::UserDirectory};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let config = ServerConfig::from_env().expect("failed to load configuration");
    let apple = config
        .apple
        .with_loaded_private_key()
        .expect("failed to load Apple private key");
    tracing::info!(client_id = apple.client_id(), "Loaded configuration");

    let users = UserDirectory::new(config.reject_unverified_real_users);
    let strategy =
        AppleStrategy::new(apple, users.clone()).expect("failed to build Apple strategy");

    let state = Arc::new(AppState {
        strategy,
        users,
        cookies: config.cookies,
        public_url: config.public_url,
    });

    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .expect("failed to bind to address");

    tracing::info!("listening on http://{}", config.bind_address);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
    }
    tracing::info!("shutting down");
}
