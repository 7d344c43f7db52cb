use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::{info, warn};

use super::error::PlutoError;
use super::gateway::Gateway;
use super::types::{aggregate_offset, Channel, Region};

pub const DEFAULT_GROUP: &str = "Uncategorized";
const LOGO_IMAGE_TYPE: &str = "colorLogoPNG";

// ── Upstream listing shapes ────────────────────────────────────────────────────

/// Treats an explicit `null` like a missing field.
fn null_as_default<'de, D, T>(de: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(de)?.unwrap_or_default())
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawChannel {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub slug: String,
    #[serde(default)]
    pub tmsid: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub number: Option<i64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub images: Vec<RawImage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawImage {
    #[serde(rename = "type", default, deserialize_with = "null_as_default")]
    pub kind: String,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawCategory {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "channelIDs", default, deserialize_with = "null_as_default")]
    pub channel_ids: Vec<String>,
}

fn data_array(body: Value, what: &str) -> Result<Vec<Value>, PlutoError> {
    let data = match body {
        Value::Object(mut map) => map.remove("data"),
        _ => None,
    };
    match data {
        Some(Value::Array(items)) => Ok(items),
        _ => Err(PlutoError::UpstreamMalformed(format!("{what} response has no data array"))),
    }
}

/// Converts each listing entry on its own; entries that don't fit are
/// logged and dropped so the rest of the listing survives.
fn parse_entries<T: DeserializeOwned>(items: Vec<Value>, what: &str) -> Vec<T> {
    items
        .into_iter()
        .enumerate()
        .filter_map(|(index, item)| {
            serde_json::from_value(item)
                .inspect_err(|e| warn!("skipping {what} entry {index}: {e}"))
                .ok()
        })
        .collect()
}

pub fn parse_channels(body: Value) -> Result<Vec<RawChannel>, PlutoError> {
    let channels: Vec<RawChannel> = parse_entries(data_array(body, "channels")?, "channels");
    Ok(channels
        .into_iter()
        .filter(|ch| {
            let usable = !ch.id.trim().is_empty();
            if !usable {
                warn!(name = %ch.name, "skipping channel without an id");
            }
            usable
        })
        .collect())
}

pub fn parse_categories(body: Value) -> Result<Vec<RawCategory>, PlutoError> {
    Ok(parse_entries(data_array(body, "categories")?, "categories"))
}

fn listed_number(raw: Option<i64>) -> u32 {
    raw.map(|n| u32::try_from(n.max(0)).unwrap_or(u32::MAX)).unwrap_or(0)
}

// ── Numbering ──────────────────────────────────────────────────────────────────

/// Claims `proposed`, or the next free number above it.
fn claim_number(taken: &mut HashSet<u32>, proposed: u32) -> u32 {
    let mut number = proposed;
    while !taken.insert(number) {
        number = number.wrapping_add(1);
    }
    number
}

/// Channel id → category name. A channel listed under several categories
/// ends up in the last one.
pub fn category_map(categories: &[RawCategory]) -> HashMap<&str, &str> {
    let mut map = HashMap::new();
    for category in categories {
        let Some(name) = category.name.as_deref() else {
            continue;
        };
        for id in &category.channel_ids {
            map.insert(id.as_str(), name);
        }
    }
    map
}

/// Turns one region's raw listing into numbered channels, sorted by number.
pub fn assemble_catalog(region: Region, raw: Vec<RawChannel>, categories: &[RawCategory]) -> Vec<Channel> {
    let groups = category_map(categories);
    let mut taken = HashSet::new();

    let mut channels: Vec<Channel> = raw
        .into_iter()
        .map(|ch| {
            let number = claim_number(&mut taken, listed_number(ch.number));
            let logo = ch
                .images
                .iter()
                .find(|img| img.kind == LOGO_IMAGE_TYPE)
                .and_then(|img| img.url.clone());
            let group = groups
                .get(ch.id.as_str())
                .map(|g| g.to_string())
                .unwrap_or_else(|| DEFAULT_GROUP.to_string());
            Channel {
                group,
                country_code: region.as_str().to_string(),
                number,
                logo,
                id: ch.id,
                name: ch.name,
                slug: ch.slug,
                tms_id: ch.tmsid,
                summary: ch.summary,
            }
        })
        .collect();

    channels.sort_by_key(|c| c.number);
    channels
}

/// Merges per-region catalogs (given in iteration order) into one listing
/// with unique ids and unique numbers.
pub fn merge_catalogs(per_region: Vec<Vec<Channel>>) -> Vec<Channel> {
    let mut seen_ids = HashSet::new();
    let mut taken = HashSet::new();
    let mut merged = Vec::new();

    for mut channel in per_region.into_iter().flatten() {
        if !seen_ids.insert(channel.id.clone()) {
            continue;
        }
        let offset = aggregate_offset(&channel.country_code);
        let mut number = channel.number;
        if number < offset {
            number += offset;
        }
        channel.number = claim_number(&mut taken, number);
        merged.push(channel);
    }

    merged.sort_by_key(|c| c.number);
    merged
}

// ── Builder ────────────────────────────────────────────────────────────────────

pub struct CatalogBuilder {
    gateway: Arc<Gateway>,
}

impl CatalogBuilder {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self { gateway }
    }

    /// Catalog for `region`; the synthetic `All` region is the aggregate.
    pub async fn build_for(&self, region: Region) -> Result<Vec<Channel>, PlutoError> {
        match region {
            Region::All => Ok(self.build_aggregate_catalog().await),
            concrete => self.build_catalog(concrete).await,
        }
    }

    pub async fn build_catalog(&self, region: Region) -> Result<Vec<Channel>, PlutoError> {
        let region = region.identity_region();
        // Boot first so both listings share one session instead of racing for it.
        self.gateway.session(region, 0, 0).await?;

        let channel_params = [
            ("channelIds", String::new()),
            ("offset", "0".to_string()),
            ("limit", "1000".to_string()),
            ("sort", "number:asc".to_string()),
        ];
        let (channels, categories) = futures::future::join(
            self.gateway.fetch_guide(region, "/v2/guide/channels", &channel_params),
            self.gateway.fetch_guide(region, "/v2/guide/categories", &[]),
        )
        .await;

        let raw = parse_channels(channels?)?;
        let categories = match categories.and_then(parse_categories) {
            Ok(categories) => categories,
            Err(e) => {
                warn!(%region, "category listing unavailable, grouping everything as {DEFAULT_GROUP}: {e}");
                Vec::new()
            }
        };

        let catalog = assemble_catalog(region, raw, &categories);
        info!(%region, channels = catalog.len(), "catalog built");
        Ok(catalog)
    }

    pub async fn build_aggregate_catalog(&self) -> Vec<Channel> {
        let mut per_region = Vec::with_capacity(Region::SUPPORTED.len());
        for region in Region::SUPPORTED {
            match self.build_catalog(region).await {
                Ok(channels) => per_region.push(channels),
                Err(e) => warn!(%region, "skipping region in aggregate catalog: {e}"),
            }
        }
        let merged = merge_catalogs(per_region);
        info!(channels = merged.len(), "aggregate catalog built");
        merged
    }
}
