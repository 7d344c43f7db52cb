use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::PlutoError;

// ── Regions ────────────────────────────────────────────────────────────────────

/// A Pluto content catalog. `All` is the synthetic merge of every concrete region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Region {
    All,
    Local,
    UsEast,
    UsWest,
    Ca,
    Uk,
    Fr,
    De,
}

impl Region {
    /// Concrete regions in aggregate iteration order.
    pub const SUPPORTED: [Region; 7] = [
        Region::Local,
        Region::UsEast,
        Region::UsWest,
        Region::Ca,
        Region::Uk,
        Region::Fr,
        Region::De,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Region::All => "all",
            Region::Local => "local",
            Region::UsEast => "us_east",
            Region::UsWest => "us_west",
            Region::Ca => "ca",
            Region::Uk => "uk",
            Region::Fr => "fr",
            Region::De => "de",
        }
    }

    /// Address sent as `X-Forwarded-For` so the upstream serves this region's
    /// catalog. `Local` (and `All`) use the caller's real network path.
    pub fn forwarded_for(&self) -> Option<&'static str> {
        match self {
            Region::All | Region::Local => None,
            Region::Uk => Some("178.238.11.6"),
            Region::Ca => Some("192.206.151.131"),
            Region::Fr => Some("193.169.64.141"),
            Region::De => Some("81.173.176.155"),
            Region::UsEast => Some("108.82.206.181"),
            Region::UsWest => Some("76.81.9.69"),
        }
    }

    /// Region whose identity is used for upstream calls made on behalf of this one.
    pub fn identity_region(&self) -> Region {
        match self {
            Region::All => Region::Local,
            other => *other,
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Region {
    type Err = PlutoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "all" => Ok(Region::All),
            "local" => Ok(Region::Local),
            "us_east" => Ok(Region::UsEast),
            "us_west" => Ok(Region::UsWest),
            "ca" => Ok(Region::Ca),
            "uk" => Ok(Region::Uk),
            "fr" => Ok(Region::Fr),
            "de" => Ok(Region::De),
            other => Err(PlutoError::UnknownRegion(other.to_string())),
        }
    }
}

/// Numbering offset applied to a channel in the aggregate listing, keyed by
/// the country code of the region it was first seen in.
pub fn aggregate_offset(country_code: &str) -> u32 {
    match country_code.to_lowercase().as_str() {
        "ca" => 6000,
        "uk" => 7000,
        "fr" => 8000,
        "de" => 9000,
        _ => 0,
    }
}

// ── Identities ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

impl Credential {
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Only credentials with both halves filled in are sent upstream.
    pub fn is_complete(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }
}

// ── Catalog ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub name: String,
    pub slug: String,
    #[serde(rename = "tmsId", skip_serializing_if = "Option::is_none")]
    pub tms_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub group: String,
    #[serde(rename = "countryCode")]
    pub country_code: String,
    pub number: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo: Option<String>,
}

// ── Server info ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedLink {
    pub title: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub ip: String,
    pub port: u16,
    pub url: String,
}

// ── Persistence ────────────────────────────────────────────────────────────────

/// Root of the persisted settings file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedSettings {
    #[serde(default)]
    pub credentials: Vec<Credential>,
    #[serde(default = "default_regions")]
    pub regions: Vec<Region>,
    #[serde(default)]
    pub devices: Vec<String>,
}

fn default_regions() -> Vec<Region> {
    vec![Region::All, Region::Local]
}

impl Default for PersistedSettings {
    fn default() -> Self {
        Self {
            credentials: Vec::new(),
            regions: default_regions(),
            devices: Vec::new(),
        }
    }
}
