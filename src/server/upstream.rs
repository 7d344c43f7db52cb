use std::time::Duration;

use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use tracing::{debug, warn};

use super::error::PlutoError;
use super::types::{Credential, Region};

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36";
const APP_VERSION: &str = "9.19.0-7a6c115631d945c4f7327de3e03b7c474b692657";
const DEVICE_VERSION: &str = "145.0.0";

/// Base URLs of the three upstream services. Overridable for tests.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub boot_url: String,
    pub channels_url: String,
    pub stitcher_url: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            boot_url: "https://boot.pluto.tv".to_string(),
            channels_url: "https://service-channels.clusters.pluto.tv".to_string(),
            stitcher_url: "https://cfd-v4-service-channel-stitcher-use1-1.prd.pluto.tv".to_string(),
        }
    }
}

/// Web-client identification sent on boot requests, also used to synthesize
/// stitcher parameters when the upstream leaves them out.
pub fn device_query(device_id: &str) -> Vec<(&'static str, String)> {
    vec![
        ("appName", "web".to_string()),
        ("appVersion", APP_VERSION.to_string()),
        ("deviceVersion", DEVICE_VERSION.to_string()),
        ("deviceModel", "web".to_string()),
        ("deviceMake", "chrome".to_string()),
        ("deviceType", "web".to_string()),
        ("clientID", device_id.to_string()),
        ("clientModelNumber", "1.0.0".to_string()),
        ("serverSideAds", "false".to_string()),
        ("drmCapabilities", "widevine:L3".to_string()),
    ]
}

// ── Upstream client ────────────────────────────────────────────────────────────

/// Thin transport over the Pluto HTTP API. Every call is a fresh request;
/// session reuse lives in `SessionCache`.
pub struct UpstreamClient {
    client: Client,
    endpoints: Endpoints,
}

impl UpstreamClient {
    pub fn new(endpoints: Endpoints) -> Result<Self, PlutoError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| PlutoError::UpstreamUnavailable(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, endpoints })
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    fn with_region_headers(&self, request: RequestBuilder, region: Region) -> RequestBuilder {
        let request = request
            .header("origin", "https://pluto.tv")
            .header("referer", "https://pluto.tv/");
        match region.forwarded_for() {
            Some(ip) => request.header("X-Forwarded-For", ip),
            None => request,
        }
    }

    /// Boots a session for one (account, device) identity in `region`.
    pub async fn authenticate(
        &self,
        region: Region,
        credential: &Credential,
        device_id: &str,
    ) -> Result<Value, PlutoError> {
        let mut query = device_query(device_id);
        if credential.is_complete() {
            query.push(("username", credential.username.clone()));
            query.push(("password", credential.password.clone()));
        }

        let url = format!("{}/v4/start", self.endpoints.boot_url);
        let request = self.with_region_headers(self.client.get(&url).query(&query), region);
        let payload = send_json(request).await.inspect_err(|e| {
            warn!(%region, anonymous = !credential.is_complete(), "boot request failed: {e}");
        })?;

        debug!(%region, "new session token issued");
        Ok(payload)
    }

    /// Authenticated GET against a channel-service resource such as
    /// `/v2/guide/channels`.
    pub async fn fetch_resource(
        &self,
        region: Region,
        token: &str,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<Value, PlutoError> {
        let url = format!("{}{}", self.endpoints.channels_url, path);
        let request = self
            .client
            .get(&url)
            .query(params)
            .bearer_auth(token);
        send_json(self.with_region_headers(request, region)).await
    }
}

async fn send_json(request: RequestBuilder) -> Result<Value, PlutoError> {
    let resp = request.send().await.map_err(PlutoError::from_transport)?;

    if !resp.status().is_success() {
        return Err(PlutoError::UpstreamUnavailable(format!(
            "HTTP {} from {}",
            resp.status(),
            resp.url().path()
        )));
    }

    let body = resp.bytes().await.map_err(PlutoError::from_transport)?;
    serde_json::from_slice::<Value>(&body)
        .map_err(|e| PlutoError::UpstreamMalformed(format!("JSON parse error: {e}")))
}
