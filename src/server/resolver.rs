use std::sync::Arc;

use reqwest::Url;
use tracing::{debug, warn};
use uuid::Uuid;

use super::error::PlutoError;
use super::gateway::Gateway;
use super::identity::pin;
use super::session::CachedSession;
use super::types::Region;
use super::upstream::device_query;

/// Account and device slots a channel is pinned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamPin {
    pub account_slot: usize,
    pub device_slot: usize,
}

/// Every channel maps to one fixed identity, so a reconnect (e.g. after an ad
/// break) comes back as the same account on the same device.
pub fn pin_channel(channel_id: &str, device_pool_size: usize) -> StreamPin {
    let slot = pin(channel_id, device_pool_size);
    StreamPin {
        account_slot: slot,
        device_slot: slot,
    }
}

pub struct StreamResolver {
    gateway: Arc<Gateway>,
}

impl StreamResolver {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self { gateway }
    }

    pub fn pin_for(&self, channel_id: &str) -> StreamPin {
        pin_channel(channel_id, self.gateway.pool().device_count())
    }

    /// Playback URL for `channel_id`, signed with the channel's pinned session.
    pub async fn resolve_stream_url(&self, channel_id: &str, region: Region) -> Result<Url, PlutoError> {
        let region = region.identity_region();
        let stream_pin = self.pin_for(channel_id);
        let session = self
            .gateway
            .session(region, stream_pin.account_slot, stream_pin.device_slot)
            .await?;
        let device = self.gateway.pool().device_for_slot(stream_pin.device_slot);

        let url = build_stream_url(
            &self.gateway.upstream().endpoints().stitcher_url,
            channel_id,
            &session,
            device,
            &Uuid::new_v4().to_string(),
        )
        .inspect_err(|e| warn!(channel_id, %region, "stream resolution failed: {e}"))?;

        debug!(
            channel_id,
            %region,
            account_slot = stream_pin.account_slot,
            device_slot = stream_pin.device_slot,
            "stream resolved"
        );
        Ok(url)
    }
}

fn build_stream_url(
    stitcher_url: &str,
    channel_id: &str,
    session: &CachedSession,
    device_id: &str,
    sid: &str,
) -> Result<Url, PlutoError> {
    let token = session.token().ok_or(PlutoError::MissingSessionToken)?;

    let mut url = Url::parse(&format!(
        "{}/v2/stitch/hls/channel/{}/master.m3u8",
        stitcher_url.trim_end_matches('/'),
        urlencoding::encode(channel_id)
    ))
    .map_err(|e| PlutoError::UpstreamMalformed(format!("invalid stitcher URL: {e}")))?;

    let mut params: Vec<(String, String)> = match session.stitcher_params() {
        Some(raw) => {
            url.set_query(Some(raw.trim_start_matches('?')));
            url.query_pairs().into_owned().collect()
        }
        None => device_query(device_id)
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect(),
    };

    set_param(&mut params, "deviceId", device_id);
    set_param(&mut params, "sid", sid);
    set_param(&mut params, "jwt", token);
    set_param(&mut params, "masterJWTPassthrough", "true");
    set_param(&mut params, "includeExtendedEvents", "true");

    url.query_pairs_mut().clear().extend_pairs(params.iter());
    Ok(url)
}

/// Replaces every occurrence of `key` with a single `key=value`.
fn set_param(params: &mut Vec<(String, String)>, key: &str, value: &str) {
    params.retain(|(k, _)| k != key);
    params.push((key.to_string(), value.to_string()));
}
