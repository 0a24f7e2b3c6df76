use std::net::SocketAddr;

use tracing_subscriber::EnvFilter;

use storyfill_server::config::ServerConfig;
use storyfill_server::{build_app, spawn_rate_limit_cleanup, spawn_room_sweeper};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = ServerConfig::load();
    config.validate();
    let listen_addr = config.listen_addr.clone();

    let (app, state) = build_app(config);

    spawn_room_sweeper(state.clone());
    spawn_rate_limit_cleanup(state.clone());

    let listener = match tokio::net::TcpListener::bind(&listen_addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("Failed to bind to {listen_addr}: {e}");
            std::process::exit(1);
        },
    };

    tracing::info!("StoryFill server listening on {listen_addr}");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("Server error");
}
