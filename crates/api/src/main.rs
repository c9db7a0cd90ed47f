use walletd_api::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    walletd_observability::init(&config.tracing);

    let services = walletd_api::app::services::build_services(&config).await?;
    let app = walletd_api::app::build_app(services);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
