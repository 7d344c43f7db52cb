pub mod catalog;
pub mod epg;
pub mod error;
pub mod gateway;
pub mod identity;
pub mod playlist;
pub mod resolver;
pub mod routes;
pub mod scheduler;
pub mod session;
pub mod settings;
pub mod types;
pub mod upstream;
pub mod xmltv;

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use catalog::CatalogBuilder;
use epg::EpgEngine;
use error::PlutoError;
use gateway::Gateway;
use identity::IdentityPool;
use resolver::StreamResolver;
use routes::{build_router, ApiState};
use scheduler::Scheduler;
use session::SessionCache;
use settings::SettingsStore;
use types::ServerInfo;
use upstream::UpstreamClient;

const CATALOG_MEMO_TTL: Duration = Duration::from_secs(10 * 60);

pub struct AppState {
    pub server_info: ServerInfo,
    pub api_state: ApiState,
    pub scheduler: Arc<Scheduler>,
}

impl AppState {
    /// Wires every component from `config`. `port` is the port actually bound,
    /// which can differ from the configured one.
    pub async fn new(config: &AppConfig, port: u16) -> Result<Self, PlutoError> {
        let settings = Arc::new(SettingsStore::load(config.data_dir.clone()));
        let snapshot = settings.get_settings().await;

        let pool = Arc::new(IdentityPool::new(snapshot.credentials, snapshot.devices));
        let upstream = Arc::new(UpstreamClient::new(config.endpoints.clone())?);
        let sessions = Arc::new(SessionCache::new());
        let gateway = Arc::new(Gateway::new(upstream, sessions, pool));

        let resolver = Arc::new(StreamResolver::new(gateway.clone()));
        let catalog = Arc::new(CatalogBuilder::new(gateway.clone()));
        let engine = Arc::new(EpgEngine::new(
            gateway.clone(),
            catalog.clone(),
            config.output_dir.clone(),
        ));
        let scheduler = Arc::new(Scheduler::new(engine, settings.clone(), config.epg_interval));

        let ip = get_local_ipv4();
        let server_info = ServerInfo {
            url: format!("http://{ip}:{port}"),
            ip,
            port,
        };

        let api_state = ApiState {
            gateway,
            resolver,
            catalog,
            settings,
            scheduler: scheduler.handle(),
            output_dir: config.output_dir.clone(),
            catalogs: Cache::builder()
                .max_capacity(16)
                .time_to_live(CATALOG_MEMO_TTL)
                .build(),
            server_info: server_info.clone(),
        };

        Ok(Self {
            server_info,
            api_state,
            scheduler,
        })
    }
}

fn get_local_ipv4() -> String {
    local_ip_address::local_ip()
        .ok()
        .and_then(|ip| match ip {
            std::net::IpAddr::V4(v4) => Some(v4.to_string()),
            _ => None,
        })
        .unwrap_or_else(|| "127.0.0.1".to_string())
}

/// Binds the requested port, or any free port when it is taken.
pub async fn bind_listener(port: u16) -> std::io::Result<TcpListener> {
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    match TcpListener::bind(addr).await {
        Ok(listener) => Ok(listener),
        Err(e) => {
            warn!("port {port} unavailable ({e}), falling back to a free port");
            TcpListener::bind(std::net::SocketAddr::from(([0, 0, 0, 0], 0))).await
        }
    }
}

pub async fn start_server(state: Arc<AppState>, listener: TcpListener, shutdown: CancellationToken) {
    let router = build_router(state.api_state.clone());
    match listener.local_addr() {
        Ok(addr) => info!("http server listening on {addr} ({})", state.server_info.url),
        Err(e) => warn!("listening on unknown address: {e}"),
    }

    let serve = axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await });
    if let Err(e) = serve.await {
        error!("server error: {e}");
    }
}
