//! Stand-alone gateway binary.
//!
//! Usage: `voxgate [CONFIG]`. Without an argument the default config path is
//! used if it exists, otherwise built-in defaults. Devices, roles and
//! provider configs come from the `[directory]` section of the config.

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use voxgate::dialogue::{NoopDialogue, TrackingVoiceActivity};
use voxgate::directory::InMemoryDirectory;
use voxgate::playback::ChunkedFileEncoder;
use voxgate::providers::NoopProviders;
use voxgate::{Gateway, GatewayConfig, GatewayServices};

fn load_config() -> anyhow::Result<GatewayConfig> {
    let explicit = std::env::args_os().nth(1).map(PathBuf::from);
    let path = explicit
        .clone()
        .unwrap_or_else(GatewayConfig::default_config_path);
    if explicit.is_some() || path.exists() {
        GatewayConfig::from_file(&path)
            .map_err(|e| anyhow::anyhow!("failed to load {}: {e}", path.display()))
    } else {
        Ok(GatewayConfig::default())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config()?;
    let _log_guard = voxgate::logging::init_logging(&config.logging)?;

    let directory = Arc::new(InMemoryDirectory::from_seed(&config.directory));
    let services = GatewayServices {
        devices: directory.clone(),
        roles: directory.clone(),
        configs: directory,
        stt: Arc::new(NoopProviders),
        tts: Arc::new(NoopProviders),
        chat_models: Arc::new(NoopProviders),
        iot: Arc::new(NoopDialogue),
        vad: Arc::new(TrackingVoiceActivity::new()),
        audio: Arc::new(NoopDialogue),
        dialogue: Arc::new(NoopDialogue),
        music: Arc::new(NoopDialogue),
        encoder: Arc::new(ChunkedFileEncoder::default()),
    };
    let gateway = Gateway::new(config, services)?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown requested");
        }
        signal.cancel();
    });

    tracing::info!("voxgate starting");
    gateway.serve(shutdown).await.map_err(|e| {
        tracing::error!(error = %e, "voxgate exited with error");
        anyhow::anyhow!("voxgate failed: {e}")
    })?;
    tracing::info!("voxgate shut down cleanly");
    Ok(())
}
