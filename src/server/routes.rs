use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use moka::future::Cache;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use super::{
    catalog::CatalogBuilder,
    error::PlutoError,
    gateway::Gateway,
    playlist::{self, render_playlist, ChannelIdFormat},
    resolver::StreamResolver,
    scheduler::SchedulerHandle,
    settings::SettingsStore,
    types::{Channel, Credential, FeedLink, Region, ServerInfo},
};

pub const DEFAULT_PROVIDER: &str = "pluto";

static EPG_FILE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^epg-[a-z_]+\.xml(\.gz)?$").expect("static regex"));

// ── Application state shared across all routes ─────────────────────────────────

#[derive(Clone)]
pub struct ApiState {
    pub gateway: Arc<Gateway>,
    pub resolver: Arc<StreamResolver>,
    pub catalog: Arc<CatalogBuilder>,
    pub settings: Arc<SettingsStore>,
    pub scheduler: SchedulerHandle,
    pub output_dir: PathBuf,
    /// Recently built catalogs per region, so playlist refreshes don't
    /// re-walk every upstream listing.
    pub catalogs: Cache<Region, Arc<Vec<Channel>>>,
    pub server_info: ServerInfo,
}

// ── Error helpers ─────────────────────────────────────────────────────────────

fn internal(msg: impl std::fmt::Display) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": msg.to_string() })),
    )
        .into_response()
}

fn bad_request(msg: impl std::fmt::Display) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "error": msg.to_string() })),
    )
        .into_response()
}

fn not_found(msg: impl std::fmt::Display) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": msg.to_string() })),
    )
        .into_response()
}

fn request_host(headers: &HeaderMap, info: &ServerInfo) -> String {
    headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| format!("{}:{}", info.ip, info.port))
}

fn parse_region(raw: &str) -> Result<Region, Response> {
    raw.parse::<Region>().map_err(bad_request)
}

// ── Query / body structs ──────────────────────────────────────────────────────

#[derive(Deserialize)]
struct PlaylistQuery {
    channel_id_format: Option<String>,
}

#[derive(Deserialize)]
struct SettingsPatch {
    regions: Option<Vec<String>>,
    credentials: Option<Vec<Credential>>,
}

/// Settings as shown to clients. Passwords never leave the server.
#[derive(Serialize)]
struct SettingsView {
    regions: Vec<Region>,
    accounts: Vec<String>,
    devices: usize,
}

async fn settings_view(store: &SettingsStore) -> SettingsView {
    let settings = store.get_settings().await;
    SettingsView {
        regions: settings.regions,
        accounts: settings.credentials.into_iter().map(|c| c.username).collect(),
        devices: settings.devices.len(),
    }
}

// ── Route handlers ────────────────────────────────────────────────────────────

async fn handle_index(State(state): State<ApiState>, headers: HeaderMap) -> Response {
    let host = request_host(&headers, &state.server_info);
    let feeds: Vec<FeedLink> = state
        .settings
        .active_regions()
        .await
        .into_iter()
        .flat_map(|region| {
            [
                FeedLink {
                    title: format!("{region} playlist"),
                    url: format!("http://{host}/{DEFAULT_PROVIDER}/{region}/playlist.m3u"),
                },
                FeedLink {
                    title: format!("{region} guide"),
                    url: format!("http://{host}/{DEFAULT_PROVIDER}/epg/{region}/epg-{region}.xml"),
                },
            ]
        })
        .collect();

    Json(serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "server": state.server_info,
        "feeds": feeds,
    }))
    .into_response()
}

async fn handle_playlist(
    Path((provider, region)): Path<(String, String)>,
    Query(q): Query<PlaylistQuery>,
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Response {
    let region = match parse_region(&region) {
        Ok(region) => region,
        Err(resp) => return resp,
    };
    info!(%region, "playlist requested");

    let catalog = Arc::clone(&state.catalog);
    let channels = state
        .catalogs
        .try_get_with(region, async move {
            let channels = catalog.build_for(region).await?;
            if channels.is_empty() {
                return Err(PlutoError::UpstreamUnavailable(format!("no channels for {region}")));
            }
            Ok::<_, PlutoError>(Arc::new(channels))
        })
        .await;

    match channels {
        Ok(channels) => {
            let host = request_host(&headers, &state.server_info);
            let format = ChannelIdFormat::from_query(q.channel_id_format.as_deref());
            let body = render_playlist(&channels, &host, &provider, region, format);
            ([(header::CONTENT_TYPE, playlist::CONTENT_TYPE)], body).into_response()
        }
        Err(e) => {
            warn!(%region, "playlist unavailable: {e}");
            internal(format!("Error loading channels: {e}"))
        }
    }
}

async fn handle_watch(
    Path((_provider, region, id)): Path<(String, String, String)>,
    State(state): State<ApiState>,
) -> Response {
    let region = match parse_region(&region) {
        Ok(region) => region,
        Err(resp) => return resp,
    };
    if id.trim().is_empty() {
        return bad_request("Missing channel id");
    }

    match state.resolver.resolve_stream_url(&id, region).await {
        Ok(url) => {
            info!(channel_id = %id, %region, "stream requested");
            (StatusCode::FOUND, [(header::LOCATION, url.to_string())]).into_response()
        }
        Err(e) => internal(e),
    }
}

async fn handle_epg_file(
    Path((_provider, _region, filename)): Path<(String, String, String)>,
    State(state): State<ApiState>,
) -> Response {
    let plain = !filename.is_empty()
        && !filename.starts_with('.')
        && filename
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
    if !plain {
        return bad_request("Invalid file name");
    }
    // Only guide artifacts are served; settings share the directory.
    if !EPG_FILE_NAME.is_match(&filename) {
        return not_found("EPG file not found.");
    }

    let content_type = if filename.ends_with(".gz") {
        "application/gzip"
    } else {
        "application/xml"
    };

    match tokio::fs::read(state.output_dir.join(&filename)).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, content_type)], bytes).into_response(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => not_found("EPG file not found."),
        Err(e) => internal(e),
    }
}

async fn handle_get_settings(State(state): State<ApiState>) -> impl IntoResponse {
    Json(settings_view(&state.settings).await)
}

async fn handle_update_settings(
    State(state): State<ApiState>,
    Json(patch): Json<SettingsPatch>,
) -> Response {
    let regions = match patch.regions {
        Some(raw) => match raw.iter().map(|r| r.parse::<Region>()).collect::<Result<Vec<_>, _>>() {
            Ok(regions) => Some(regions),
            Err(e) => return bad_request(e),
        },
        None => None,
    };

    let change = state.settings.update(regions, patch.credentials).await;

    if change.credentials_changed {
        info!(
            accounts = change.settings.credentials.len(),
            "credentials changed, dropping cached sessions"
        );
        state.gateway.pool().set_accounts(change.settings.credentials.clone());
        state.gateway.sessions().invalidate_all();
        state.catalogs.invalidate_all();
    }
    if change.regions_changed {
        let selected: Vec<&str> = change.settings.regions.iter().map(Region::as_str).collect();
        info!("active regions updated: {}", selected.join(", "));
    }
    if change.credentials_changed || change.regions_changed {
        state.scheduler.run_now();
    }

    Json(settings_view(&state.settings).await).into_response()
}

async fn handle_refresh(State(state): State<ApiState>) -> Response {
    state.scheduler.run_now();
    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "status": "scheduled" })),
    )
        .into_response()
}

// ── Router factory ────────────────────────────────────────────────────────────

pub fn build_router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api = Router::new()
        .route("/settings", get(handle_get_settings).post(handle_update_settings))
        .route("/epg/refresh", post(handle_refresh))
        .with_state(state.clone());

    Router::new()
        .route("/", get(handle_index))
        // Feeds
        .route("/:provider/:region/playlist.m3u", get(handle_playlist))
        .route("/:provider/:region/watch/:id", get(handle_watch))
        .route("/:provider/epg/:region/:filename", get(handle_epg_file))
        .with_state(state)
        .nest("/api", api)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
}
