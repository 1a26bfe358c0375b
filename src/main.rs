use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use voxlink::backend::{BackendApi, BackendClient};
use voxlink::core::vad::{SileroModel, assets};
use voxlink::{AppState, Gateway, GatewayConfig, Metrics};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = GatewayConfig::load()?;
    config.validate()?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_lowercase()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(
        backend_url = config.backend_url,
        rest_port = config.sip_rest_api_port,
        "Starting voxlink"
    );

    let config = Arc::new(config);
    let metrics = Arc::new(Metrics::new());
    let backend = Arc::new(BackendClient::new(&config)?);

    // Startup probe; an unreachable backend aborts before SIP comes up.
    let capabilities = backend.capabilities().await?;
    info!(capabilities = %capabilities, "Backend capabilities received");

    assets::ensure_model(&config.vad_model_path, &config.vad_model_url).await?;
    let vad_model = Arc::new(SileroModel::load(
        &config.vad_model_path,
        config.vad_sampling_rate,
    )?);
    info!(path = %config.vad_model_path.display(), "VAD model loaded");

    let gateway = Gateway::new(Arc::clone(&config), backend, metrics, vad_model);
    // The SIP stack binding registers itself here; until then the control
    // plane answers 503 for outbound call requests.

    voxlink::server::serve(AppState::new(Arc::clone(&gateway))).await?;

    gateway.registry().clear();
    info!("voxlink stopped");
    Ok(())
}
