//! Facebook "Download Your Information" exports (JSON format).
//!
//! Export layouts change between revisions (`friends.json` vs
//! `friends_v2`, posts at the top level or under `status_updates_v2`), so
//! every JSON file is classified by its structure first. The path is only
//! consulted to decide whether an unrecognised file deserves an error.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, info};

use super::base::{AdapterOutput, AdapterSettings, AdapterUtils, SourceAdapter};
use crate::normalize::dates::{create_valid_date, create_valid_day, from_epoch_seconds, ValidDate};
use crate::parser::exif::extract_image_metadata;
use crate::types::{
    CanonicalEvent, ContentType, DateSource, EventMetadata, Layer, Location, SourceFile, SourceKind,
};

static FILENAME_DATE_TIME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?:^|[^0-9])((?:19|20)\d{2})[-_.]?(\d{2})[-_.]?(\d{2})",
        r"[-_ T]+(\d{2})[-_.:]?(\d{2})[-_.:]?(\d{2})(?:[^0-9]|$)",
    ))
    .expect("valid filename timestamp pattern")
});

static FILENAME_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|[^0-9])((?:19|20)\d{2})[-_.]?(\d{2})[-_.]?(\d{2})(?:[^0-9]|$)")
        .expect("valid filename date pattern")
});

/// Recognised JSON payloads, in the order they are tested.
#[derive(Debug)]
enum FacebookRecords<'a> {
    EventResponses(Vec<(&'static str, &'a Value)>),
    HostedEvents(&'a [Value]),
    Friends(&'a [Value]),
    Album { name: Option<String>, photos: &'a [Value] },
    Posts(&'a [Value]),
    Unknown,
}

fn array_field<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a [Value]> {
    keys.iter()
        .find_map(|k| value.get(*k).and_then(Value::as_array))
        .map(Vec::as_slice)
}

fn looks_like_post(item: &Value) -> bool {
    item.get("timestamp").is_some()
        && ["data", "attachments", "title"]
            .iter()
            .any(|key| item.get(*key).is_some())
}

fn looks_like_friend(item: &Value) -> bool {
    item.get("name").map(Value::is_string).unwrap_or(false)
        && item.get("timestamp").map(Value::is_number).unwrap_or(false)
        && item.get("data").is_none()
}

fn sniff(value: &Value) -> FacebookRecords<'_> {
    if let Some(responses) = value
        .get("event_responses_v2")
        .or_else(|| value.get("event_responses"))
    {
        let mut out = Vec::new();
        for (key, response) in [
            ("events_joined", "joined"),
            ("events_interested", "interested"),
            ("events_declined", "declined"),
            ("events_invited", "invited"),
        ] {
            if let Some(items) = responses.get(key).and_then(Value::as_array) {
                out.extend(items.iter().map(|item| (response, item)));
            }
        }
        return FacebookRecords::EventResponses(out);
    }
    if let Some(events) = array_field(value, &["your_events_v2", "your_events"]) {
        return FacebookRecords::HostedEvents(events);
    }
    if let Some(friends) = array_field(value, &["friends_v2", "friends"]) {
        return FacebookRecords::Friends(friends);
    }
    if let Some(photos) = array_field(value, &["photos"]) {
        return FacebookRecords::Album {
            name: AdapterUtils::json_str(value, "name"),
            photos,
        };
    }
    if let Some(posts) = array_field(value, &["status_updates_v2", "status_updates"]) {
        return FacebookRecords::Posts(posts);
    }
    // Bare arrays: any well-formed record decides the kind; the rest are
    // validated one by one.
    if let Some(items) = value.as_array() {
        if items.iter().any(looks_like_post) {
            return FacebookRecords::Posts(items);
        }
        if items.iter().any(looks_like_friend) {
            return FacebookRecords::Friends(items);
        }
    }
    FacebookRecords::Unknown
}

/// Date encoded in a media file name, e.g. `IMG_20190714_183000.jpg` or
/// `photos/2019-07-14 18.30.00.jpg`.
pub fn date_from_path(path: &str) -> Option<ValidDate> {
    let name = path.rsplit('/').next().unwrap_or(path);
    for candidate in [name, path] {
        if let Some(caps) = FILENAME_DATE_TIME.captures(candidate) {
            let parsed = create_valid_date(
                caps[1].parse().ok()?,
                caps[2].parse().ok()?,
                caps[3].parse().ok()?,
                caps[4].parse().ok()?,
                caps[5].parse().ok()?,
                caps[6].parse().ok()?,
            );
            if parsed.is_some() {
                return parsed;
            }
        }
        if let Some(caps) = FILENAME_DATE.captures(candidate) {
            let parsed = create_valid_day(
                caps[1].parse().ok()?,
                caps[2].parse().ok()?,
                caps[3].parse().ok()?,
            );
            if parsed.is_some() {
                return parsed;
            }
        }
    }
    None
}

/// What an album listing says about one of its photos.
#[derive(Debug, Clone)]
struct AlbumEntry {
    album: Option<String>,
    title: Option<String>,
    created: Option<ValidDate>,
}

pub struct FacebookAdapter {
    settings: AdapterSettings,
}

impl FacebookAdapter {
    pub fn new(settings: AdapterSettings) -> Self {
        Self { settings }
    }

    fn place(value: &Value) -> Option<Location> {
        let place = value.get("place")?;
        let coordinate = place.get("coordinate")?;
        Location::new(
            AdapterUtils::json_f64(coordinate, "latitude")?,
            AdapterUtils::json_f64(coordinate, "longitude")?,
            AdapterUtils::json_str(place, "name"),
        )
    }

    fn import_posts(&self, file: &SourceFile, posts: &[Value], out: &mut AdapterOutput) {
        for post in posts {
            let text = post
                .get("data")
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|d| AdapterUtils::json_str(d, "post"))
                        .collect::<Vec<_>>()
                        .join("\n")
                })
                .filter(|t| !t.is_empty());

            let mut attachments = Vec::new();
            let mut location = None;
            for attachment in post
                .get("attachments")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
            {
                for data in attachment.get("data").and_then(Value::as_array).into_iter().flatten() {
                    let media = data.get("media").and_then(|m| AdapterUtils::json_str(m, "uri"));
                    let link = data
                        .get("external_context")
                        .and_then(|c| AdapterUtils::json_str(c, "url"));
                    attachments.extend(media.into_iter().chain(link));
                    if location.is_none() {
                        location = Self::place(data);
                    }
                }
            }

            let headline = AdapterUtils::json_str(post, "title");
            let title = text
                .as_deref()
                .and_then(AdapterUtils::title_from_text)
                .or_else(|| headline.clone())
                .or_else(|| (!attachments.is_empty()).then(|| "Shared a post".to_string()))
                .unwrap_or_default();
            let description = text.clone().filter(|t| t.trim() != title);

            let classify_text =
                AdapterUtils::join_present(&[text.as_deref(), headline.as_deref()], " ")
                    .unwrap_or_default();
            let layer = self
                .settings
                .classifier
                .classify(&classify_text, location.is_some())
                .layer;
            let timestamp = AdapterUtils::json_i64(post, "timestamp");

            let candidate = CanonicalEvent::builder(SourceKind::Facebook, layer, "post")
                .title(title.clone())
                .description(description)
                .start(timestamp.and_then(from_epoch_seconds))
                .location(location)
                .source_id(AdapterUtils::stable_id(
                    SourceKind::Facebook,
                    "post",
                    &[timestamp.unwrap_or_default().to_string().as_str(), title.as_str()],
                ))
                .metadata(EventMetadata::SocialPost {
                    attachments,
                    response: None,
                });
            out.push_candidate(file, candidate, || AdapterUtils::raw_json(post));
        }
    }

    fn import_friends(&self, file: &SourceFile, friends: &[Value], out: &mut AdapterOutput) {
        for friend in friends {
            let name = AdapterUtils::json_str(friend, "name");
            let timestamp = AdapterUtils::json_i64(friend, "timestamp");
            let title = name
                .as_deref()
                .map(|n| format!("Became friends with {n}"))
                .unwrap_or_default();
            let timestamp_key = timestamp.unwrap_or_default().to_string();
            let candidate =
                CanonicalEvent::builder(SourceKind::Facebook, Layer::Relationships, "friendship")
                    .title(title)
                    .start(timestamp.and_then(from_epoch_seconds))
                    .source_id(AdapterUtils::stable_id(
                        SourceKind::Facebook,
                        "friend",
                        &[name.as_deref().unwrap_or(""), timestamp_key.as_str()],
                    ));
            out.push_candidate(file, candidate, || AdapterUtils::raw_json(friend));
        }
    }

    fn import_event(
        &self,
        file: &SourceFile,
        event: &Value,
        response: Option<&str>,
        out: &mut AdapterOutput,
    ) {
        let name = AdapterUtils::json_str(event, "name").unwrap_or_default();
        let description = AdapterUtils::json_str(event, "description");
        let location = Self::place(event);
        let place_name = event.get("place").and_then(|p| AdapterUtils::json_str(p, "name"));

        let text = AdapterUtils::join_present(
            &[Some(name.as_str()), description.as_deref(), place_name.as_deref()],
            " ",
        )
        .unwrap_or_default();
        let layer = self
            .settings
            .classifier
            .classify_or(&text, location.is_some() || place_name.is_some(), Layer::Relationships)
            .layer;

        let start = AdapterUtils::json_i64(event, "start_timestamp");
        let end = AdapterUtils::json_i64(event, "end_timestamp").filter(|t| *t > 0);
        let event_type = match response {
            Some(r) => format!("event_{r}"),
            None => "event_hosted".to_string(),
        };

        let candidate = CanonicalEvent::builder(SourceKind::Facebook, layer, event_type)
            .title(name.clone())
            .description(description)
            .start(start.and_then(from_epoch_seconds))
            .end(end.and_then(from_epoch_seconds))
            .location(location)
            .source_id(AdapterUtils::stable_id(
                SourceKind::Facebook,
                "event",
                &[name.as_str(), start.unwrap_or_default().to_string().as_str()],
            ))
            .metadata(EventMetadata::SocialPost {
                attachments: Vec::new(),
                response: response.map(str::to_string),
            });
        out.push_candidate(file, candidate, || AdapterUtils::raw_json(event));
    }

    fn index_album(
        name: Option<String>,
        photos: &[Value],
        index: &mut BTreeMap<String, AlbumEntry>,
    ) {
        for photo in photos {
            let Some(uri) = AdapterUtils::json_str(photo, "uri") else {
                continue;
            };
            index.insert(
                media_key(&uri),
                AlbumEntry {
                    album: name.clone(),
                    title: AdapterUtils::json_str(photo, "title"),
                    created: AdapterUtils::json_i64(photo, "creation_timestamp")
                        .and_then(from_epoch_seconds),
                },
            );
        }
    }

    /// The album record whose URI and the file path agree on whole path
    /// components. The longest URI wins; the ordered index breaks ties.
    fn album_entry<'a>(
        file: &SourceFile,
        index: &'a BTreeMap<String, AlbumEntry>,
    ) -> Option<&'a AlbumEntry> {
        let path = media_key(&file.path);
        index
            .iter()
            .filter(|(uri, _)| {
                is_component_suffix(&path, uri) || is_component_suffix(uri, &path)
            })
            .max_by_key(|(uri, _)| uri.len())
            .map(|(_, entry)| entry)
    }

    /// Media files: date from the path, then EXIF (images only), then the
    /// album listing. Files without any date are ignored, not reported.
    fn import_media(
        &self,
        file: &SourceFile,
        albums: &BTreeMap<String, AlbumEntry>,
        out: &mut AdapterOutput,
    ) {
        let album = Self::album_entry(file, albums);
        let exif = match file.content_type {
            ContentType::Image => extract_image_metadata(&file.bytes),
            // No embedded-metadata reader exists for video containers.
            _ => None,
        };

        let (date, date_source) = if let Some(date) = date_from_path(&file.path) {
            (date, DateSource::FileName)
        } else if let Some(date) = exif.as_ref().and_then(|m| m.best_date()) {
            (date, DateSource::EmbeddedMetadata)
        } else if let Some(date) = album.and_then(|a| a.created) {
            (date, DateSource::ExportRecord)
        } else {
            debug!("facebook: no date for media {}", file.path);
            out.ignored += 1;
            return;
        };

        let kind = if file.content_type == ContentType::Video { "video" } else { "photo" };
        let album_name = album.and_then(|a| a.album.clone());
        let title = album
            .and_then(|a| a.title.clone())
            .or_else(|| album_name.as_ref().map(|n| format!("{} in {n}", capitalize(kind))))
            .unwrap_or_else(|| format!("{}: {}", capitalize(kind), file.file_name()));

        let candidate = CanonicalEvent::builder(SourceKind::Facebook, Layer::Media, kind)
            .title(AdapterUtils::truncate_chars(&title, crate::constants::SYNTHESIZED_TITLE_CHARS))
            .start(Some(date))
            .location(exif.as_ref().and_then(|m| m.location()))
            .source_id(AdapterUtils::stable_id(
                SourceKind::Facebook,
                kind,
                &[file.normalized_path().as_str()],
            ))
            .metadata(EventMetadata::SocialMedia {
                file_path: file.path.clone(),
                album: album_name,
                camera: exif.as_ref().and_then(|m| m.camera()),
                date_source,
            });
        out.push_candidate(file, candidate, || file.path.clone());
    }
}

fn media_key(path: &str) -> String {
    path.replace('\\', "/").trim_start_matches('/').to_ascii_lowercase()
}

/// `suffix` ends `path` at a `/` boundary (or equals it).
fn is_component_suffix(path: &str, suffix: &str) -> bool {
    path.strip_suffix(suffix)
        .map(|rest| rest.is_empty() || rest.ends_with('/'))
        .unwrap_or(false)
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

impl Default for FacebookAdapter {
    fn default() -> Self {
        Self::new(AdapterSettings::default())
    }
}

impl SourceAdapter for FacebookAdapter {
    fn source(&self) -> SourceKind {
        SourceKind::Facebook
    }

    fn name(&self) -> &'static str {
        "Facebook"
    }

    fn accepts(&self, path: &str) -> bool {
        matches!(
            ContentType::from_path(path),
            ContentType::Json | ContentType::Image | ContentType::Video
        )
    }

    fn import(&self, files: &[SourceFile]) -> AdapterOutput {
        let mut out = AdapterOutput::default();
        let mut parsed: Vec<(&SourceFile, Value)> = Vec::new();
        let mut media: Vec<&SourceFile> = Vec::new();

        for file in files {
            match file.content_type {
                ContentType::Json => match AdapterUtils::parse_json(file) {
                    Ok(value) => parsed.push((file, value)),
                    Err(e) => out.error(file, e),
                },
                ContentType::Image | ContentType::Video => media.push(file),
                _ => out.ignored += 1,
            }
        }

        // Album listings first so media files can borrow their names and dates.
        let mut albums = BTreeMap::new();
        for (_, value) in &parsed {
            if let FacebookRecords::Album { name, photos } = sniff(value) {
                Self::index_album(name, photos, &mut albums);
            }
        }

        for (file, value) in &parsed {
            let before = out.events.len();
            match sniff(value) {
                FacebookRecords::EventResponses(items) => {
                    for (response, item) in items {
                        self.import_event(file, item, Some(response), &mut out);
                    }
                }
                FacebookRecords::HostedEvents(items) => {
                    for item in items {
                        self.import_event(file, item, None, &mut out);
                    }
                }
                FacebookRecords::Friends(items) => self.import_friends(file, items, &mut out),
                FacebookRecords::Posts(items) => self.import_posts(file, items, &mut out),
                FacebookRecords::Album { .. } => {}
                FacebookRecords::Unknown => {
                    let path = file.normalized_path();
                    if ["posts", "friends", "events"].iter().any(|hint| path.contains(hint)) {
                        out.error(file, "unrecognised structure for a Facebook export file");
                    } else {
                        debug!("facebook: ignoring {}", file.path);
                        out.ignored += 1;
                    }
                    continue;
                }
            }
            out.processed_files += 1;
            info!("facebook: {} -> {} events", file.path, out.events.len() - before);
        }

        for file in media {
            out.processed_files += 1;
            self.import_media(file, &albums, &mut out);
        }
        out
    }
}
