use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, Timelike, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::catalog::CatalogBuilder;
use super::error::PlutoError;
use super::gateway::Gateway;
use super::types::{Channel, Region};
use super::xmltv::{gzip, write_atomic, ChannelDef, ProgrammeEntry, ScheduleArtifacts, ScheduleDocument};

pub const BATCH_SIZE: usize = 100;
pub const WINDOW_COUNT: usize = 3;
pub const WINDOW_SPACING_HOURS: i64 = 12;
pub const WINDOW_DURATION_MINUTES: u32 = 720;

static CONTROL_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\x00-\x08\x0b\x0c\x0e-\x1f]").expect("static regex"));

/// Canonical category and the upstream genre strings folded into it.
const GENRE_SYNONYMS: &[(&str, &[&str])] = &[
    ("Animated", &["Family Animation", "Cartoons"]),
    ("Educational", &["Education & Guidance", "Instructional & Educational"]),
    ("News", &["News and Information", "General News", "News + Opinion"]),
    ("Action", &["Action & Adventure", "Martial Arts", "Crime Action", "Action Thrillers"]),
    ("Reality", &["Reality", "Reality Drama", "Courtroom Reality"]),
    ("Documentary", &["Documentaries", "Science and Nature Documentaries", "Crime Documentaries"]),
    ("Comedy", &["Cult Comedies", "Stand-Up", "Family Comedies", "Sketch Comedies"]),
    ("Drama", &["Classic Dramas", "Family Drama", "Romantic Drama", "Crime Drama"]),
    ("Children", &["Kids", "Children & Family", "Cartoons"]),
];

// ── Field normalization ────────────────────────────────────────────────────────

/// Removes characters XML 1.0 cannot carry.
pub fn strip_control(input: &str) -> String {
    CONTROL_CHARS.replace_all(input, "").into_owned()
}

fn parse_upstream_time(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Upstream ISO timestamp → `YYYYMMDDhhmmss +0000`; empty when unparseable.
pub fn format_xmltv_time(raw: Option<&str>) -> String {
    raw.and_then(parse_upstream_time)
        .map(|dt| dt.format("%Y%m%d%H%M%S +0000").to_string())
        .unwrap_or_default()
}

fn is_film(kind: &str) -> bool {
    matches!(kind, "film" | "movie")
}

/// `SxxEyy` label. Live broadcasts need both numbers (their "Season 1,
/// Episode 0" is noise); films never get one.
pub fn onscreen_label(kind: &str, season: i64, episode: i64) -> Option<String> {
    let wanted = if kind == "live" {
        season > 0 && episode > 0
    } else {
        !is_film(kind) && (season > 0 || episode > 0)
    };
    wanted.then(|| format!("S{season:02}E{episode:02}"))
}

/// Original air date, and the `date` element derived from it, unless it is
/// the 1970 epoch placeholder the upstream uses for "unknown".
pub fn air_dates(raw: &str) -> Option<(String, String)> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let parsed = parse_upstream_time(raw)?;
    (parsed.year() > 1970)
        .then(|| (raw.to_string(), parsed.format("%Y%m%d").to_string()))
}

/// Maps genre and sub-genre through the synonym table; unknown strings pass
/// through as their own category. `Series`/`Movie` follow the content type.
pub fn map_categories(genre: Option<&str>, sub_genre: Option<&str>, kind: &str) -> Vec<String> {
    let mut categories: Vec<String> = Vec::new();
    let mut push = |category: &str| {
        if !categories.iter().any(|c| c == category) {
            categories.push(category.to_string());
        }
    };

    for input in [genre, sub_genre].into_iter().flatten().filter(|s| !s.is_empty()) {
        let mut matched = false;
        for &(canonical, synonyms) in GENRE_SYNONYMS {
            if synonyms.iter().any(|s| s.eq_ignore_ascii_case(input)) {
                push(canonical);
                matched = true;
            }
        }
        if !matched {
            let cleaned = strip_control(input);
            if !cleaned.is_empty() {
                push(&cleaned);
            }
        }
    }

    if kind == "tv" {
        push("Series");
    } else if is_film(kind) {
        push("Movie");
    }
    categories
}

fn non_empty(value: &Value) -> Option<String> {
    value.as_str().map(strip_control).filter(|s| !s.is_empty())
}

/// Builds one guide entry from an upstream timeline object.
pub fn programme_from_timeline(channel_id: &str, timeline: &Value) -> ProgrammeEntry {
    let episode = &timeline["episode"];
    let series = &episode["series"];

    let title = strip_control(timeline["title"].as_str().unwrap_or(""));
    let kind = series["type"].as_str().unwrap_or("");
    let season = episode["season"].as_i64().unwrap_or(0);
    let number = episode["number"].as_i64().unwrap_or(0);

    let (original_air_date, date) = match air_dates(episode["clip"]["originalReleaseDate"].as_str().unwrap_or("")) {
        Some((aired, date)) => (Some(aired), Some(date)),
        None => (None, None),
    };

    let sub_title = episode["name"]
        .as_str()
        .filter(|name| !name.is_empty() && !name.eq_ignore_ascii_case(&title))
        .map(strip_control);

    ProgrammeEntry {
        channel_id: strip_control(channel_id),
        description: Some(strip_control(episode["description"].as_str().unwrap_or("")))
            .filter(|d| !d.is_empty()),
        icon: non_empty(&series["tile"]["path"]),
        start: format_xmltv_time(timeline["start"].as_str()),
        stop: format_xmltv_time(timeline["stop"].as_str()),
        live: kind == "live",
        onscreen: onscreen_label(kind, season, number),
        episode_id: non_empty(&episode["_id"]),
        original_air_date,
        date,
        series_id: non_empty(&series["_id"]),
        sub_title,
        categories: map_categories(episode["genre"].as_str(), episode["subGenre"].as_str(), kind),
        title,
    }
}

/// Start of each fetch window: the current UTC hour, then every 12 hours.
pub fn window_starts(now: DateTime<Utc>) -> Vec<DateTime<Utc>> {
    let hour = now
        .with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now);
    (0..WINDOW_COUNT as i64)
        .map(|i| hour + Duration::hours(i * WINDOW_SPACING_HOURS))
        .collect()
}

fn channel_def(channel: &Channel) -> ChannelDef {
    ChannelDef {
        id: strip_control(&channel.id),
        display_name: strip_control(&channel.name),
        icon: channel.logo.as_deref().map(strip_control).filter(|l| !l.is_empty()),
    }
}

// ── Engine ─────────────────────────────────────────────────────────────────────

pub struct EpgEngine {
    gateway: Arc<Gateway>,
    catalog: Arc<CatalogBuilder>,
    output_dir: PathBuf,
}

impl EpgEngine {
    pub fn new(gateway: Arc<Gateway>, catalog: Arc<CatalogBuilder>, output_dir: PathBuf) -> Self {
        Self {
            gateway,
            catalog,
            output_dir,
        }
    }

    pub fn output_dir(&self) -> &std::path::Path {
        &self.output_dir
    }

    pub async fn generate_schedule(
        &self,
        region: Region,
        cancel: &CancellationToken,
    ) -> Result<Option<ScheduleDocument>, PlutoError> {
        self.generate_schedule_at(region, Utc::now(), cancel).await
    }

    /// Builds the in-memory guide for `region` with windows anchored at `now`.
    /// `Ok(None)` means the region has no channels.
    pub async fn generate_schedule_at(
        &self,
        region: Region,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<Option<ScheduleDocument>, PlutoError> {
        let channels = self.catalog.build_for(region).await?;
        if channels.is_empty() {
            info!(%region, "no channels, skipping guide");
            return Ok(None);
        }

        let timeline_region = region.identity_region();
        let channel_defs: Vec<ChannelDef> = channels.iter().map(channel_def).collect();
        let batches: Vec<String> = channels
            .chunks(BATCH_SIZE)
            .map(|chunk| chunk.iter().map(|c| c.id.as_str()).collect::<Vec<_>>().join(","))
            .collect();

        let mut programmes = Vec::new();
        for window in window_starts(now) {
            let start = window.format("%Y-%m-%dT%H:00:00.000Z").to_string();
            for (index, batch) in batches.iter().enumerate() {
                if cancel.is_cancelled() {
                    info!(%region, "guide generation cancelled");
                    return Err(PlutoError::Cancelled);
                }
                let params = [
                    ("start", start.clone()),
                    ("channelIds", batch.clone()),
                    ("duration", WINDOW_DURATION_MINUTES.to_string()),
                ];
                let body = match self
                    .gateway
                    .fetch_guide(timeline_region, "/v2/guide/timelines", &params)
                    .await
                {
                    Ok(body) => body,
                    Err(e) => {
                        warn!(%region, window = %start, batch = index, "timeline batch skipped: {e}");
                        continue;
                    }
                };

                let before = programmes.len();
                collect_programmes(&body, &mut programmes);
                debug!(
                    %region,
                    window = %start,
                    batch = index,
                    programmes = programmes.len() - before,
                    "timeline batch fetched"
                );
            }
        }

        info!(
            %region,
            channels = channel_defs.len(),
            programmes = programmes.len(),
            "guide assembled"
        );
        Ok(Some(ScheduleDocument {
            region,
            generated_at: Utc::now(),
            channels: channel_defs,
            programmes,
        }))
    }

    /// Builds, serializes and writes both guide files for `region`. Nothing
    /// is written unless the whole build succeeded.
    pub async fn run_region(
        &self,
        region: Region,
        cancel: &CancellationToken,
    ) -> Result<Option<ScheduleArtifacts>, PlutoError> {
        let Some(document) = self.generate_schedule(region, cancel).await? else {
            return Ok(None);
        };
        self.write_document(&document).await.map(Some)
    }

    pub async fn write_document(&self, document: &ScheduleDocument) -> Result<ScheduleArtifacts, PlutoError> {
        let xml = document.to_xml()?;
        let compressed = gzip(&xml)?;

        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| PlutoError::Persistence(format!("{}: {e}", self.output_dir.display())))?;

        let artifacts = ScheduleArtifacts::for_region(&self.output_dir, document.region);
        write_atomic(&artifacts.xml_path, &xml).await?;
        write_atomic(&artifacts.gz_path, &compressed).await?;

        info!(
            region = %document.region,
            path = %artifacts.xml_path.display(),
            bytes = xml.len(),
            "guide written"
        );
        Ok(artifacts)
    }
}

fn collect_programmes(body: &Value, out: &mut Vec<ProgrammeEntry>) {
    let Some(entries) = body["data"].as_array() else {
        return;
    };
    for entry in entries {
        let Some(timelines) = entry["timelines"].as_array() else {
            continue;
        };
        let channel_id = entry["channelId"].as_str().unwrap_or("");
        out.extend(
            timelines
                .iter()
                .map(|timeline| programme_from_timeline(channel_id, timeline)),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn timeline(kind: &str, season: i64, number: i64, released: &str) -> Value {
        json!({
            "title": "Morning\u{0007} Show",
            "start": "2024-03-01T10:00:00.000Z",
            "stop": "2024-03-01T11:30:00.000Z",
            "episode": {
                "_id": "ep1",
                "name": "Pilot",
                "description": "Line\u{0001}one",
                "season": season,
                "number": number,
                "genre": "News and Information",
                "subGenre": "Talk",
                "clip": { "originalReleaseDate": released },
                "series": { "_id": "s1", "type": kind, "tile": { "path": "https://img/tile.jpg" } }
            }
        })
    }

    #[test]
    fn control_characters_are_stripped() {
        assert_eq!(strip_control("a\u{0}b\u{0b}c\td\ne"), "abc\td\ne");
    }

    #[test]
    fn times_use_xmltv_format() {
        assert_eq!(
            format_xmltv_time(Some("2024-03-01T10:00:00.000Z")),
            "20240301100000 +0000"
        );
        assert_eq!(
            format_xmltv_time(Some("2024-03-01T12:00:00+02:00")),
            "20240301100000 +0000"
        );
        assert_eq!(format_xmltv_time(Some("not a time")), "");
        assert_eq!(format_xmltv_time(None), "");
    }

    #[test]
    fn live_zero_episode_has_no_onscreen_label() {
        assert_eq!(onscreen_label("live", 0, 0), None);
        assert_eq!(onscreen_label("live", 1, 0), None);
        assert_eq!(onscreen_label("live", 2, 5).as_deref(), Some("S02E05"));
    }

    #[test]
    fn films_never_get_onscreen_label() {
        assert_eq!(onscreen_label("movie", 3, 4), None);
        assert_eq!(onscreen_label("film", 0, 0), None);
        assert_eq!(onscreen_label("film", 1, 1), None);
    }

    #[test]
    fn series_label_when_either_number_positive() {
        assert_eq!(onscreen_label("tv", 0, 7).as_deref(), Some("S00E07"));
        assert_eq!(onscreen_label("tv", 12, 0).as_deref(), Some("S12E00"));
        assert_eq!(onscreen_label("tv", 0, 0), None);
    }

    #[test]
    fn epoch_placeholder_dates_are_dropped() {
        assert_eq!(air_dates("1970-01-01T00:00:00.000Z"), None);
        assert_eq!(air_dates("1969-12-31T23:59:59Z"), None);
        assert_eq!(air_dates(""), None);
        assert_eq!(
            air_dates("2020-06-15T00:00:00.000Z"),
            Some(("2020-06-15T00:00:00.000Z".to_string(), "20200615".to_string()))
        );
        assert_eq!(
            air_dates("2020-06-15"),
            Some(("2020-06-15".to_string(), "20200615".to_string()))
        );
    }

    #[test]
    fn genres_fold_through_synonyms() {
        assert_eq!(
            map_categories(Some("news and information"), Some("Talk"), "tv"),
            vec!["News", "Talk", "Series"]
        );
        assert_eq!(
            map_categories(Some("Cartoons"), None, "film"),
            vec!["Animated", "Children", "Movie"]
        );
        assert_eq!(map_categories(Some(""), None, "live"), Vec::<String>::new());
        assert_eq!(map_categories(Some("Reality"), Some("Reality Drama"), ""), vec!["Reality"]);
    }

    #[test]
    fn control_characters_never_reach_categories_or_ids() {
        let mut t = timeline("tv", 1, 2, "2020-01-02T00:00:00Z");
        t["episode"]["genre"] = json!("Sci\u{0002}Fi");
        t["episode"]["subGenre"] = json!("\u{001b}");
        t["episode"]["_id"] = json!("ep\u{0000}1");
        t["episode"]["series"]["_id"] = json!("s\u{0008}1");
        t["episode"]["series"]["tile"]["path"] = json!("https://img/\u{000c}tile.jpg");

        let p = programme_from_timeline("c\u{0001}1", &t);
        assert_eq!(p.categories, vec!["SciFi", "Series"]);
        assert_eq!(p.channel_id, "c1");
        assert_eq!(p.episode_id.as_deref(), Some("ep1"));
        assert_eq!(p.series_id.as_deref(), Some("s1"));
        assert_eq!(p.icon.as_deref(), Some("https://img/tile.jpg"));
    }

    #[test]
    fn timeline_entry_is_normalized() {
        let p = programme_from_timeline("c1", &timeline("tv", 1, 2, "2020-01-02T00:00:00Z"));
        assert_eq!(p.channel_id, "c1");
        assert_eq!(p.title, "Morning Show");
        assert_eq!(p.description.as_deref(), Some("Lineone"));
        assert_eq!(p.start, "20240301100000 +0000");
        assert_eq!(p.stop, "20240301113000 +0000");
        assert_eq!(p.onscreen.as_deref(), Some("S01E02"));
        assert_eq!(p.episode_id.as_deref(), Some("ep1"));
        assert_eq!(p.series_id.as_deref(), Some("s1"));
        assert_eq!(p.icon.as_deref(), Some("https://img/tile.jpg"));
        assert_eq!(p.sub_title.as_deref(), Some("Pilot"));
        assert_eq!(p.date.as_deref(), Some("20200102"));
        assert!(!p.live);
        assert_eq!(p.categories, vec!["News", "Talk", "Series"]);
    }

    #[test]
    fn live_entry_is_flagged_and_unlabelled() {
        let p = programme_from_timeline("c1", &timeline("live", 0, 0, "1970-01-01T00:00:00Z"));
        assert!(p.live);
        assert_eq!(p.onscreen, None);
        assert_eq!(p.original_air_date, None);
        assert_eq!(p.date, None);
    }

    #[test]
    fn sub_title_matching_title_is_omitted() {
        let mut t = timeline("tv", 1, 1, "");
        t["episode"]["name"] = json!("MORNING SHOW");
        t["title"] = json!("Morning Show");
        assert_eq!(programme_from_timeline("c", &t).sub_title, None);
    }

    #[test]
    fn windows_start_on_the_hour_twelve_hours_apart() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 10, 47, 13).unwrap();
        let starts = window_starts(now);
        assert_eq!(starts.len(), WINDOW_COUNT);
        assert_eq!(starts[0], Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap());
        assert_eq!(starts[1], Utc.with_ymd_and_hms(2024, 3, 1, 22, 0, 0).unwrap());
        assert_eq!(starts[2], Utc.with_ymd_and_hms(2024, 3, 2, 10, 0, 0).unwrap());
    }

    #[test]
    fn timelines_without_array_are_ignored() {
        let mut out = Vec::new();
        collect_programmes(&json!({ "data": [{ "channelId": "a" }] }), &mut out);
        collect_programmes(&json!({}), &mut out);
        assert!(out.is_empty());
    }
}
