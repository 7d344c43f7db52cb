use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use super::error::PlutoError;
use super::types::Region;

pub const GENERATOR_NAME: &str = "PlutoChannels.rs";

// ── Document model ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelDef {
    pub id: String,
    pub display_name: String,
    pub icon: Option<String>,
}

/// One normalized guide entry. Times are already in XMLTV wire format.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgrammeEntry {
    pub channel_id: String,
    pub title: String,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub start: String,
    pub stop: String,
    pub live: bool,
    pub onscreen: Option<String>,
    pub episode_id: Option<String>,
    pub original_air_date: Option<String>,
    pub date: Option<String>,
    pub series_id: Option<String>,
    pub sub_title: Option<String>,
    pub categories: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ScheduleDocument {
    pub region: Region,
    pub generated_at: DateTime<Utc>,
    pub channels: Vec<ChannelDef>,
    pub programmes: Vec<ProgrammeEntry>,
}

// ── Serialization ──────────────────────────────────────────────────────────────

struct XmlOut {
    writer: Writer<Vec<u8>>,
}

impl XmlOut {
    fn emit(&mut self, event: Event<'_>) -> Result<(), PlutoError> {
        self.writer
            .write_event(event)
            .map_err(|e| PlutoError::Serialization(e.to_string()))
    }

    fn text_element(&mut self, name: &str, attrs: &[(&str, &str)], text: &str) -> Result<(), PlutoError> {
        let mut start = BytesStart::new(name);
        for attr in attrs {
            start.push_attribute(*attr);
        }
        self.emit(Event::Start(start))?;
        self.emit(Event::Text(BytesText::new(text)))?;
        self.emit(Event::End(BytesEnd::new(name)))
    }

    fn empty_element(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<(), PlutoError> {
        let mut start = BytesStart::new(name);
        for attr in attrs {
            start.push_attribute(*attr);
        }
        self.emit(Event::Empty(start))
    }
}

impl ScheduleDocument {
    /// Serializes to XMLTV: declaration, doctype, channels, then programmes in
    /// the order they were fetched.
    pub fn to_xml(&self) -> Result<Vec<u8>, PlutoError> {
        let mut out = XmlOut {
            writer: Writer::new_with_indent(Vec::new(), b' ', 2),
        };

        out.emit(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), Some("yes"))))?;
        out.emit(Event::DocType(BytesText::from_escaped(r#"tv SYSTEM "xmltv.dtd""#)))?;

        let generated_ts = self.generated_at.timestamp().to_string();
        let mut tv = BytesStart::new("tv");
        tv.push_attribute(("generator-info-name", GENERATOR_NAME));
        tv.push_attribute(("generated-ts", generated_ts.as_str()));
        out.emit(Event::Start(tv))?;

        for channel in &self.channels {
            let mut start = BytesStart::new("channel");
            start.push_attribute(("id", channel.id.as_str()));
            out.emit(Event::Start(start))?;
            out.text_element("display-name", &[], &channel.display_name)?;
            if let Some(icon) = &channel.icon {
                out.empty_element("icon", &[("src", icon.as_str())])?;
            }
            out.emit(Event::End(BytesEnd::new("channel")))?;
        }

        for programme in &self.programmes {
            write_programme(&mut out, programme)?;
        }

        out.emit(Event::End(BytesEnd::new("tv")))?;
        Ok(out.writer.into_inner())
    }
}

fn write_programme(out: &mut XmlOut, p: &ProgrammeEntry) -> Result<(), PlutoError> {
    let mut start = BytesStart::new("programme");
    start.push_attribute(("channel", p.channel_id.as_str()));
    start.push_attribute(("start", p.start.as_str()));
    start.push_attribute(("stop", p.stop.as_str()));
    out.emit(Event::Start(start))?;

    out.text_element("title", &[], &p.title)?;
    if let Some(desc) = &p.description {
        out.text_element("desc", &[], desc)?;
    }
    if let Some(icon) = &p.icon {
        out.empty_element("icon", &[("src", icon.as_str())])?;
    }
    if p.live {
        out.empty_element("live", &[])?;
    }
    if let Some(label) = &p.onscreen {
        out.text_element("episode-num", &[("system", "onscreen")], label)?;
    }
    if let Some(id) = &p.episode_id {
        out.text_element("episode-num", &[("system", "pluto")], id)?;
    }
    if let Some(aired) = &p.original_air_date {
        out.text_element("episode-num", &[("system", "original-air-date")], aired)?;
    }
    if let Some(date) = &p.date {
        out.text_element("date", &[], date)?;
    }
    if let Some(series_id) = &p.series_id {
        out.text_element("series-id", &[("system", "pluto")], series_id)?;
    }
    if let Some(sub_title) = &p.sub_title {
        out.text_element("sub-title", &[], sub_title)?;
    }
    for category in &p.categories {
        out.text_element("category", &[], category)?;
    }

    out.emit(Event::End(BytesEnd::new("programme")))
}

pub fn gzip(bytes: &[u8]) -> Result<Vec<u8>, PlutoError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(bytes)
        .and_then(|_| encoder.finish())
        .map_err(|e| PlutoError::Serialization(format!("gzip: {e}")))
}

// ── Artifacts ──────────────────────────────────────────────────────────────────

/// Where one region's guide lives on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleArtifacts {
    pub xml_path: PathBuf,
    pub gz_path: PathBuf,
}

impl ScheduleArtifacts {
    pub fn for_region(dir: &Path, region: Region) -> Self {
        Self {
            xml_path: dir.join(format!("epg-{region}.xml")),
            gz_path: dir.join(format!("epg-{region}.xml.gz")),
        }
    }
}

/// Writes next to the destination and renames over it, so readers never see
/// a half-written file.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), PlutoError> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| PlutoError::Persistence(format!("{}: not a file path", path.display())))?;
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));

    if let Err(e) = tokio::fs::write(&tmp, bytes).await {
        return Err(PlutoError::Persistence(format!("{}: {e}", tmp.display())));
    }
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(PlutoError::Persistence(format!("{}: {e}", path.display())));
    }
    Ok(())
}
