use chat_relay::{
    build_router,
    config::Args,
    rate_limit::{RateLimiter, cleanup_task},
    state::AppState,
    upstream::OpenAiProvider,
};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // parse cli arguments, .env in the working directory feeds the env fallbacks
    let args = Args::load_from(Path::new(".env"), std::env::args_os()).unwrap_or_else(|e| e.exit());

    let filter = if args.verbose {
        "chat_relay=debug,tower_http=debug"
    } else {
        "chat_relay=info,tower_http=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_target(true)
        .init();

    let rate_limiter = Arc::new(RateLimiter::new(args.rate_limit, args.rate_window()));
    let provider = OpenAiProvider::new(
        reqwest::Client::new(),
        &args.openai_base_url,
        args.openai_api_key.clone(),
    );

    // creating shared state
    let state = Arc::new(AppState {
        provider: Arc::new(provider),
        model: args.model.clone(),
        rate_limiter: Arc::clone(&rate_limiter),
        trust_proxy: args.trust_proxy,
    });

    // evict expired rate windows in the background
    tokio::spawn(cleanup_task(rate_limiter, args.cleanup_interval()));

    let app = build_router(state, &args.allowed_origins);

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!(addr = %addr, "Server running");
    info!(upstream = %args.openai_base_url, model = %args.model, "Forwarding completions");
    info!(
        limit = args.rate_limit,
        window_secs = args.rate_window,
        "Rate limit per client"
    );
    info!(origins = ?args.allowed_origins, "CORS allow-list");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
