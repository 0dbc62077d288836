use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::{MAX_DESCRIPTION_CHARS, MAX_EVENT_TYPE_CHARS, MAX_TITLE_CHARS};
use crate::normalize::dates::ValidDate;

/// The seven life categories every event is filed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layer {
    Economics,
    Education,
    Work,
    Health,
    Relationships,
    Travel,
    Media,
}

impl Layer {
    pub const ALL: [Layer; 7] = [
        Layer::Economics,
        Layer::Education,
        Layer::Work,
        Layer::Health,
        Layer::Relationships,
        Layer::Travel,
        Layer::Media,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Layer::Economics => "economics",
            Layer::Education => "education",
            Layer::Work => "work",
            Layer::Health => "health",
            Layer::Relationships => "relationships",
            Layer::Travel => "travel",
            Layer::Media => "media",
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Layer {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Layer::ALL
            .into_iter()
            .find(|layer| layer.as_str() == wanted)
            .ok_or_else(|| format!("unknown layer '{s}'"))
    }
}

/// Which adapter produced an event. Doubles as the caller's declared input kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Social-network export (posts, friends, events, media).
    Facebook,
    /// Professional-network export (positions, education, connections).
    #[serde(rename = "linkedin")]
    LinkedIn,
    /// Cloud-takeout export (notes, location history, calendar).
    GoogleTakeout,
    /// Standalone calendar files.
    Ical,
    /// Standalone delimited text files.
    Csv,
}

impl SourceKind {
    pub const ALL: [SourceKind; 5] = [
        SourceKind::Facebook,
        SourceKind::LinkedIn,
        SourceKind::GoogleTakeout,
        SourceKind::Ical,
        SourceKind::Csv,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Facebook => "facebook",
            SourceKind::LinkedIn => "linkedin",
            SourceKind::GoogleTakeout => "google_takeout",
            SourceKind::Ical => "ical",
            SourceKind::Csv => "csv",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "facebook" | "social" => Ok(SourceKind::Facebook),
            "linkedin" | "professional" => Ok(SourceKind::LinkedIn),
            "google_takeout" | "google-takeout" | "takeout" => Ok(SourceKind::GoogleTakeout),
            "ical" | "ics" | "calendar" => Ok(SourceKind::Ical),
            "csv" | "tabular" => Ok(SourceKind::Csv),
            other => Err(other.to_string()),
        }
    }
}

/// Coarse content type inferred from a file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Json,
    Csv,
    Calendar,
    Image,
    Video,
    Html,
    Archive,
    Text,
    Other,
}

impl ContentType {
    pub fn from_path(path: &str) -> Self {
        let ext = path
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "json" => ContentType::Json,
            "csv" | "tsv" => ContentType::Csv,
            "ics" | "ical" | "ifb" => ContentType::Calendar,
            "jpg" | "jpeg" | "png" | "gif" | "heic" | "heif" | "webp" | "tif" | "tiff" => {
                ContentType::Image
            }
            "mp4" | "mov" | "m4v" | "avi" | "mkv" | "3gp" | "webm" => ContentType::Video,
            "html" | "htm" => ContentType::Html,
            "zip" => ContentType::Archive,
            "txt" | "md" => ContentType::Text,
            _ => ContentType::Other,
        }
    }

    pub fn is_media(&self) -> bool {
        matches!(self, ContentType::Image | ContentType::Video)
    }
}

/// One file handed to an adapter, either read from disk or pulled out of an archive.
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Path inside the archive, or the file name for loose files.
    pub path: String,
    pub content_type: ContentType,
    pub bytes: Vec<u8>,
}

impl SourceFile {
    pub fn new(path: impl Into<String>, bytes: Vec<u8>) -> Self {
        let path = path.into();
        Self {
            content_type: ContentType::from_path(&path),
            path,
            bytes,
        }
    }

    /// Lower-cased path with forward slashes, for path heuristics.
    pub fn normalized_path(&self) -> String {
        self.path.replace('\\', "/").to_ascii_lowercase()
    }

    pub fn file_name(&self) -> &str {
        self.path
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(self.path.as_str())
    }

    pub fn text(&self) -> String {
        let bytes = self.bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(self.bytes.as_slice());
        String::from_utf8_lossy(bytes).into_owned()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Location {
    /// `None` unless both coordinates are finite and in range.
    pub fn new(latitude: f64, longitude: f64, name: Option<String>) -> Option<Self> {
        let valid = latitude.is_finite()
            && longitude.is_finite()
            && (-90.0..=90.0).contains(&latitude)
            && (-180.0..=180.0).contains(&longitude);
        valid.then(|| Self {
            latitude,
            longitude,
            name: name.filter(|n| !n.trim().is_empty()),
        })
    }

    /// Google exports coordinates as integers scaled by 1e7.
    pub fn from_e7(latitude_e7: i64, longitude_e7: i64, name: Option<String>) -> Option<Self> {
        Self::new(latitude_e7 as f64 / 1e7, longitude_e7 as f64 / 1e7, name)
    }
}

/// How the date of a media file was determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateSource {
    FileName,
    EmbeddedMetadata,
    ExportRecord,
}

/// Source-specific provenance attached to an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventMetadata {
    SocialPost {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        attachments: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        response: Option<String>,
    },
    SocialMedia {
        file_path: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        album: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        camera: Option<String>,
        date_source: DateSource,
    },
    ProfessionalRecord {
        record_type: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        organization: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        role: Option<String>,
    },
    LocationVisit {
        #[serde(skip_serializing_if = "Option::is_none")]
        place_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        address: Option<String>,
        point_count: usize,
    },
    Calendar {
        #[serde(skip_serializing_if = "Option::is_none")]
        uid: Option<String>,
        all_day: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        recurrence_rule: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        organizer: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        attendees: Vec<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        categories: Vec<String>,
    },
    Note {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        labels: Vec<String>,
        pinned: bool,
        archived: bool,
    },
    Tabular {
        line: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        category: Option<String>,
    },
    /// Provenance-only fields nothing downstream interprets.
    Provenance(BTreeMap<String, String>),
}

/// The pipeline's single output unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalEvent {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub start_date: ValidDate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<ValidDate>,
    pub layer: Layer,
    pub event_type: String,
    pub source: SourceKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<EventMetadata>,
}

impl CanonicalEvent {
    pub fn builder(
        source: SourceKind,
        layer: Layer,
        event_type: impl Into<String>,
    ) -> EventBuilder {
        EventBuilder::new(source, layer, event_type)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventValidationError {
    #[error("event title is empty")]
    EmptyTitle,
    #[error("event title is {0} characters, limit is {max}", max = MAX_TITLE_CHARS)]
    TitleTooLong(usize),
    #[error("event description is {0} characters, limit is {max}", max = MAX_DESCRIPTION_CHARS)]
    DescriptionTooLong(usize),
    #[error("event type is empty or longer than {max} characters", max = MAX_EVENT_TYPE_CHARS)]
    InvalidEventType,
    #[error("event has no valid start date")]
    MissingStartDate,
}

/// Accumulates candidate fields; [`EventBuilder::build`] is the gate that
/// turns a candidate into a [`CanonicalEvent`] or rejects it.
#[derive(Debug, Clone)]
pub struct EventBuilder {
    source: SourceKind,
    layer: Layer,
    event_type: String,
    title: Option<String>,
    description: Option<String>,
    start_date: Option<ValidDate>,
    end_date: Option<ValidDate>,
    source_id: Option<String>,
    location: Option<Location>,
    metadata: Option<EventMetadata>,
}

impl EventBuilder {
    pub fn new(source: SourceKind, layer: Layer, event_type: impl Into<String>) -> Self {
        Self {
            source,
            layer,
            event_type: event_type.into(),
            title: None,
            description: None,
            start_date: None,
            end_date: None,
            source_id: None,
            location: None,
            metadata: None,
        }
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Blank descriptions are dropped.
    pub fn description(mut self, description: Option<String>) -> Self {
        self.description = description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
        self
    }

    pub fn start(mut self, date: Option<ValidDate>) -> Self {
        self.start_date = date;
        self
    }

    pub fn end(mut self, date: Option<ValidDate>) -> Self {
        self.end_date = date;
        self
    }

    pub fn source_id(mut self, id: impl Into<String>) -> Self {
        self.source_id = Some(id.into());
        self
    }

    pub fn location(mut self, location: Option<Location>) -> Self {
        self.location = location;
        self
    }

    pub fn metadata(mut self, metadata: EventMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn build(self) -> Result<CanonicalEvent, EventValidationError> {
        let title = self.title.map(|t| t.trim().to_string()).unwrap_or_default();
        if title.is_empty() {
            return Err(EventValidationError::EmptyTitle);
        }
        let title_chars = title.chars().count();
        if title_chars > MAX_TITLE_CHARS {
            return Err(EventValidationError::TitleTooLong(title_chars));
        }
        if let Some(description) = &self.description {
            let chars = description.chars().count();
            if chars > MAX_DESCRIPTION_CHARS {
                return Err(EventValidationError::DescriptionTooLong(chars));
            }
        }
        let event_type_chars = self.event_type.chars().count();
        if event_type_chars == 0 || event_type_chars > MAX_EVENT_TYPE_CHARS {
            return Err(EventValidationError::InvalidEventType);
        }
        let start_date = self.start_date.ok_or(EventValidationError::MissingStartDate)?;

        Ok(CanonicalEvent {
            title,
            description: self.description,
            start_date,
            end_date: self.end_date,
            layer: self.layer,
            event_type: self.event_type,
            source: self.source,
            source_id: self.source_id,
            location: self.location,
            metadata: self.metadata,
        })
    }
}

/// A non-fatal problem recorded during an import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportError {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_data: Option<String>,
}

impl ImportError {
    pub fn new(file_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            file_name: Some(file_name.into()),
            message: message.into(),
            raw_data: None,
        }
    }

    pub fn general(message: impl Into<String>) -> Self {
        Self {
            file_name: None,
            message: message.into(),
            raw_data: None,
        }
    }

    /// Attach the offending input, cut to a size that stays readable in a review screen.
    pub fn with_raw(mut self, raw: impl Into<String>) -> Self {
        let raw: String = raw.into();
        self.raw_data = Some(raw.chars().take(500).collect());
        self
    }
}

impl fmt::Display for ImportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.file_name {
            Some(name) => write!(f, "{}: {}", name, self.message),
            None => f.write_str(&self.message),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportStats {
    pub total_files: usize,
    pub processed_files: usize,
    pub total_events: usize,
    pub events_by_layer: BTreeMap<Layer, usize>,
    /// Recorded errors plus unsupported files that were silently ignored.
    pub skipped: usize,
}

/// Everything one import run produced. Read-only once returned.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportResult {
    pub events: Vec<CanonicalEvent>,
    pub errors: Vec<ImportError>,
    pub stats: ImportStats,
}
