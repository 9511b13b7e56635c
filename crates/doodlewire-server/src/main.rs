use clap::Parser;
use doodlewire_server::{ServerConfig, ServerError};

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "doodlewire_server=info,tower_http=info".into()),
        )
        .init();

    let config = ServerConfig::parse();
    doodlewire_server::serve(config).await
}
