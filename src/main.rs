use std::sync::Arc;

use lazywake_proxy::config_loader::{ProxyConfig, DEFAULT_CONFIG_PATH};
use lazywake_proxy::lifecycle::{LifecycleController, LifecycleTimings};
use lazywake_proxy::logger;
use lazywake_proxy::management::HttpManagementApi;
use lazywake_proxy::monitor::IdleMonitor;
use lazywake_proxy::proxy::{ProxyContext, TcpProxy};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logger::init_logger();

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("LAZYWAKE_CONFIG").ok())
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = match ProxyConfig::load(&config_path) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            log::error!("Failed to load {}: {}", config_path, e);
            return Err(e.into());
        }
    };

    let api = Arc::new(HttpManagementApi::new(&config)?);
    let lifecycle = Arc::new(LifecycleController::new(
        api,
        LifecycleTimings::from(config.as_ref()),
    ));
    let ctx = Arc::new(ProxyContext {
        config: config.clone(),
        lifecycle: lifecycle.clone(),
    });

    let proxy = TcpProxy::bind(ctx).await?;
    println!("//////////////////////////////////////////////////");
    println!("// Wake proxy started on {}", config.bind_addr());
    println!("// Backend expected on {}", config.backend_addr());
    println!("//////////////////////////////////////////////////");

    tokio::spawn(IdleMonitor::new(lifecycle, config.idle_timeout_minutes).run());

    log::info!("TCP Proxy started successfully.");
    proxy.serve().await;
    Ok(())
}
