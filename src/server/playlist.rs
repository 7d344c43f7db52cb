use std::fmt::Write;

use super::types::{Channel, Region};

pub const CONTENT_TYPE: &str = "audio/x-mpegurl";

/// How the `channel-id` attribute is spelled, chosen by the
/// `channel_id_format` query parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelIdFormat {
    /// `{provider}-{id}`
    Id,
    /// `{slug}`
    SlugOnly,
    /// `{provider}-{slug}`
    #[default]
    ProviderSlug,
}

impl ChannelIdFormat {
    pub fn from_query(raw: Option<&str>) -> Self {
        match raw.map(|s| s.to_ascii_lowercase()).as_deref() {
            Some("id") => Self::Id,
            Some("slug_only") => Self::SlugOnly,
            _ => Self::ProviderSlug,
        }
    }

    fn channel_id(self, provider: &str, channel: &Channel) -> String {
        match self {
            Self::Id => format!("{provider}-{}", channel.id),
            Self::SlugOnly => channel.slug.clone(),
            Self::ProviderSlug => format!("{provider}-{}", channel.slug),
        }
    }
}

/// Attribute values are quoted, so quotes and control characters are dropped.
fn attr_value(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_control() && *c != '"')
        .collect()
}

pub fn watch_url(host: &str, provider: &str, region: Region, channel_id: &str) -> String {
    format!(
        "http://{host}/{provider}/{region}/watch/{}",
        urlencoding::encode(channel_id)
    )
}

/// Renders `channels` as an M3U playlist whose entries point back at this
/// server's watch route on `host`.
pub fn render_playlist(
    channels: &[Channel],
    host: &str,
    provider: &str,
    region: Region,
    format: ChannelIdFormat,
) -> String {
    let mut out = String::from("#EXTM3U\n\n");

    for channel in channels {
        let _ = write!(
            out,
            "#EXTINF:-1 channel-id=\"{}\" tvg-id=\"{}\" tvg-chno=\"{}\"",
            attr_value(&format.channel_id(provider, channel)),
            attr_value(&channel.id),
            channel.number
        );
        if !channel.group.is_empty() {
            let _ = write!(out, " group-title=\"{}\"", attr_value(&channel.group));
        }
        if let Some(logo) = channel.logo.as_deref().filter(|l| !l.is_empty()) {
            let logo = attr_value(logo);
            let _ = write!(out, " tvg-logo=\"{logo}\" tvc-guide-art=\"{logo}\"");
        }
        if let Some(tms_id) = channel.tms_id.as_deref().filter(|t| !t.is_empty()) {
            let _ = write!(out, " tvg-name=\"{}\"", attr_value(tms_id));
        }
        if !channel.name.is_empty() {
            let _ = write!(out, " tvc-guide-title=\"{}\"", attr_value(&channel.name));
        }
        if let Some(summary) = channel.summary.as_deref().map(attr_value).filter(|s| !s.is_empty()) {
            let _ = write!(out, " tvc-guide-description=\"{summary}\"");
        }
        let _ = write!(
            out,
            ",{}\n{}\n\n",
            channel.name,
            watch_url(host, provider, region, &channel.id)
        );
    }

    out
}
