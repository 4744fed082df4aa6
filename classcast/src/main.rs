mod server;

use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use classcast_api::AppState;
use classcast_core::{
    logging,
    models::InstanceId,
    store::{RedisStore, RoomStore},
    Config,
};
use classcast_sfu::{engine::mediasoup::MediasoupEngine, SfuConfig, SfuManager};

use server::ClasscastServer;

/// Generate a unique identity for this process instance
fn generate_instance_id() -> String {
    use std::net::UdpSocket;

    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    // Routable local address, if any
    let local_ip = UdpSocket::bind("0.0.0.0:0")
        .and_then(|s| s.connect("8.8.8.8:80").map(|()| s))
        .and_then(|s| s.local_addr())
        .map_or_else(|_| "0.0.0.0".to_string(), |addr| addr.ip().to_string());

    let suffix = nanoid::nanoid!(6);

    format!("{hostname}_{local_ip}-{suffix}")
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load configuration (file given via CLASSCAST_CONFIG, env overrides)
    let config_file = std::env::var("CLASSCAST_CONFIG").ok();
    let config = Config::load(config_file.as_deref())?;

    // 2. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("Classcast server starting...");
    info!("HTTP address: {}", config.http_address());

    let instance_id = InstanceId::from(generate_instance_id());
    info!(instance_id = %instance_id, "Generated instance identity");

    // 3. Connect to Redis (verified with a PING)
    let store: Arc<dyn RoomStore> =
        Arc::new(RedisStore::connect(&config.redis, &config.room).await?);
    info!("Connected to Redis");

    // 4. Initialize media workers
    let sfu_config = SfuConfig::from_media_config(&config.media);
    let engine = MediasoupEngine::new(&sfu_config);
    let sfu = SfuManager::new(&engine, sfu_config).await?;
    info!(workers = sfu.worker_count(), "Media workers initialized");

    // 5. Fleet provisioning requires a cloud provider implementation wired
    //    by the deployment; without one, rooms are hosted by this instance.
    let fleet = None;
    info!("Fleet provisioning disabled; rooms are hosted by this instance");

    let config = Arc::new(config);
    let state = AppState::new(
        instance_id,
        Arc::clone(&config),
        store,
        sfu,
        fleet,
    );

    // 6. Serve until shutdown
    ClasscastServer::new(config, state).start().await
}
