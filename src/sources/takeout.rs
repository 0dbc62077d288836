//! Google Takeout exports: Keep notes, Location History and Calendar.
//!
//! Takeout file names differ between export variants and languages, so JSON
//! payloads are classified by structure. `.ics` members go through the
//! calendar parser.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde_json::Value;
use tracing::{debug, info};

use super::base::{AdapterOutput, AdapterSettings, AdapterUtils, RecordBudget, SourceAdapter};
use super::ics::{calendar_candidate, describe_entry};
use crate::constants::{
    MAX_TAKEOUT_CALENDAR_ENTRIES, MAX_TAKEOUT_LOCATION_POINTS, MAX_TAKEOUT_NOTES, MAX_TITLE_CHARS,
};
use crate::normalize::dates::{from_epoch_micros, from_epoch_millis, ValidDate};
use crate::parser::calendar::parse_calendar;
use crate::types::{
    CanonicalEvent, ContentType, EventMetadata, Layer, Location, SourceFile, SourceKind,
};

#[derive(Debug)]
enum TakeoutRecords<'a> {
    SemanticLocations(&'a [Value]),
    RawLocations(&'a [Value]),
    Calendar(&'a [Value]),
    Note(&'a Value),
    Unknown,
}

/// Ordered structural predicates; the first match wins.
fn sniff(value: &Value) -> TakeoutRecords<'_> {
    if let Some(objects) = value.get("timelineObjects").and_then(Value::as_array) {
        return TakeoutRecords::SemanticLocations(objects);
    }
    if let Some(points) = value.get("locations").and_then(Value::as_array) {
        return TakeoutRecords::RawLocations(points);
    }
    if let Some(items) = value.get("items").and_then(Value::as_array) {
        let calendar_like = items.is_empty()
            || items
                .iter()
                .any(|item| item.get("start").map(Value::is_object).unwrap_or(false));
        if calendar_like {
            return TakeoutRecords::Calendar(items);
        }
    }
    let has_note_body = value.get("textContent").is_some() || value.get("listContent").is_some();
    let has_usec_timestamp = value.get("userEditedTimestampUsec").is_some()
        || value.get("createdTimestampUsec").is_some();
    if has_note_body && has_usec_timestamp {
        return TakeoutRecords::Note(value);
    }
    TakeoutRecords::Unknown
}

/// Per-run caps, shared by every file in one import.
struct Budgets {
    points: RecordBudget,
    calendar: RecordBudget,
    notes: RecordBudget,
}

impl Budgets {
    fn new() -> Self {
        Self {
            points: RecordBudget::new("location history", MAX_TAKEOUT_LOCATION_POINTS),
            calendar: RecordBudget::new("calendar", MAX_TAKEOUT_CALENDAR_ENTRIES),
            notes: RecordBudget::new("notes", MAX_TAKEOUT_NOTES),
        }
    }
}

/// Location points of one day.
#[derive(Debug)]
struct DayTrace {
    first: ValidDate,
    last: ValidDate,
    location: Option<Location>,
    points: usize,
}

pub struct TakeoutAdapter {
    settings: AdapterSettings,
}

impl TakeoutAdapter {
    pub fn new(settings: AdapterSettings) -> Self {
        Self { settings }
    }

    /// Millisecond or ISO timestamps, depending on the export vintage.
    fn point_time(&self, value: &Value, ms_key: &str, iso_key: &str) -> Option<ValidDate> {
        AdapterUtils::json_i64(value, ms_key)
            .and_then(from_epoch_millis)
            .or_else(|| {
                value
                    .get(iso_key)
                    .and_then(Value::as_str)
                    .and_then(|s| self.settings.dates.parse(s))
            })
    }

    fn e7_location(value: &Value, name: Option<String>) -> Option<Location> {
        Location::from_e7(
            AdapterUtils::json_i64(value, "latitudeE7")?,
            AdapterUtils::json_i64(value, "longitudeE7")?,
            name,
        )
    }

    fn import_raw_locations(
        &self,
        file: &SourceFile,
        points: &[Value],
        budgets: &mut Budgets,
        out: &mut AdapterOutput,
    ) {
        let mut days: BTreeMap<NaiveDate, DayTrace> = BTreeMap::new();
        for point in points {
            if !budgets.points.take() {
                continue;
            }
            let Some(time) = self.point_time(point, "timestampMs", "timestamp") else {
                out.error_with_raw(
                    file,
                    "location point without a valid timestamp",
                    AdapterUtils::raw_json(point),
                );
                continue;
            };
            let location = Self::e7_location(point, None);
            let trace = days.entry(time.date()).or_insert(DayTrace {
                first: time,
                last: time,
                location: location.clone(),
                points: 0,
            });
            trace.points += 1;
            trace.first = trace.first.min(time);
            trace.last = trace.last.max(time);
            if trace.location.is_none() {
                trace.location = location;
            }
        }

        for (day, trace) in days {
            let candidate = CanonicalEvent::builder(
                SourceKind::GoogleTakeout,
                Layer::Travel,
                "location_history",
            )
                .title(format!("Location history: {} points", trace.points))
                .start(Some(trace.first))
                .end((trace.last > trace.first).then_some(trace.last))
                .location(trace.location)
                .source_id(AdapterUtils::stable_id(
                    SourceKind::GoogleTakeout,
                    "location_day",
                    &[day.to_string().as_str()],
                ))
                .metadata(EventMetadata::LocationVisit {
                    place_id: None,
                    address: None,
                    point_count: trace.points,
                });
            out.push_candidate(file, candidate, || day.to_string());
        }
    }

    fn import_semantic(
        &self,
        file: &SourceFile,
        objects: &[Value],
        budgets: &mut Budgets,
        out: &mut AdapterOutput,
    ) {
        for object in objects {
            // Activity segments (travel between places) are not events of their own.
            let Some(visit) = object.get("placeVisit") else {
                continue;
            };
            if !budgets.points.take() {
                continue;
            }
            let place = visit.get("location").unwrap_or(&Value::Null);
            let name = AdapterUtils::json_str(place, "name");
            let address = AdapterUtils::json_str(place, "address");
            let place_id = AdapterUtils::json_str(place, "placeId");
            let duration = visit.get("duration").unwrap_or(&Value::Null);
            let start = self.point_time(duration, "startTimestampMs", "startTimestamp");
            let end = self.point_time(duration, "endTimestampMs", "endTimestamp");
            let location = Self::e7_location(place, name.clone());

            let label = name.clone().or_else(|| address.clone()).unwrap_or_default();
            let classification = self.settings.classifier.classify_or(
                &AdapterUtils::join_present(&[name.as_deref(), address.as_deref()], " ")
                    .unwrap_or_default(),
                true,
                Layer::Travel,
            );
            let start_key = start.map(|d| d.to_string()).unwrap_or_default();

            let candidate = CanonicalEvent::builder(
                SourceKind::GoogleTakeout,
                classification.layer,
                "place_visit",
            )
                .title(if label.is_empty() { label.clone() } else { format!("Visited {label}") })
                .description(address.clone().filter(|a| Some(a) != name.as_ref()))
                .start(start)
                .end(end)
                .location(location)
                .source_id(AdapterUtils::stable_id(
                    SourceKind::GoogleTakeout,
                    "place_visit",
                    &[place_id.as_deref().unwrap_or(label.as_str()), start_key.as_str()],
                ))
                .metadata(EventMetadata::LocationVisit {
                    place_id,
                    address,
                    point_count: 1,
                });
            out.push_candidate(file, candidate, || AdapterUtils::raw_json(visit));
        }
    }

    fn calendar_json_date(&self, value: Option<&Value>) -> (Option<ValidDate>, bool) {
        let Some(value) = value else {
            return (None, false);
        };
        if let Some(date_time) = value.get("dateTime").and_then(Value::as_str) {
            return (self.settings.dates.parse(date_time), false);
        }
        let date = value
            .get("date")
            .and_then(Value::as_str)
            .and_then(|d| self.settings.dates.parse(d));
        (date, date.is_some())
    }

    fn import_calendar_json(
        &self,
        file: &SourceFile,
        items: &[Value],
        budgets: &mut Budgets,
        out: &mut AdapterOutput,
    ) {
        for item in items {
            let status = AdapterUtils::json_str(item, "status");
            if status.as_deref().map(|s| s.eq_ignore_ascii_case("cancelled")).unwrap_or(false) {
                continue;
            }
            if !budgets.calendar.take() {
                continue;
            }
            let summary = AdapterUtils::json_str(item, "summary");
            let description = AdapterUtils::json_str(item, "description");
            let location = AdapterUtils::json_str(item, "location");
            let (start, all_day) = self.calendar_json_date(item.get("start"));
            let (end, _) = self.calendar_json_date(item.get("end"));

            let text = AdapterUtils::join_present(
                &[summary.as_deref(), description.as_deref(), location.as_deref()],
                " ",
            )
            .unwrap_or_default();
            let layer = self.settings.classifier.classify(&text, location.is_some()).layer;
            let id = AdapterUtils::json_str(item, "id")
                .or_else(|| AdapterUtils::json_str(item, "iCalUID"));

            let title = summary
                .as_deref()
                .and_then(AdapterUtils::title_from_text)
                .unwrap_or_default();
            let attendees = item
                .get("attendees")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .filter_map(|a| {
                    AdapterUtils::json_str(a, "displayName")
                        .or_else(|| AdapterUtils::json_str(a, "email"))
                })
                .collect();

            let mut candidate =
                CanonicalEvent::builder(SourceKind::GoogleTakeout, layer, "calendar_event")
                    .title(title)
                    .description(description)
                    .start(start)
                    .end(end)
                    .metadata(EventMetadata::Calendar {
                        uid: id.clone(),
                        all_day,
                        recurrence_rule: item
                            .get("recurrence")
                            .and_then(Value::as_array)
                            .and_then(|r| r.first())
                            .and_then(Value::as_str)
                            .map(str::to_string),
                        status,
                        organizer: item
                            .get("organizer")
                            .and_then(|o| AdapterUtils::json_str(o, "email")),
                        attendees,
                        categories: Vec::new(),
                    });
            if let Some(id) = &id {
                candidate = candidate.source_id(AdapterUtils::stable_id(
                    SourceKind::GoogleTakeout,
                    "calendar",
                    &[id.as_str()],
                ));
            }
            out.push_candidate(file, candidate, || AdapterUtils::raw_json(item));
        }
    }

    fn import_ics(&self, file: &SourceFile, budgets: &mut Budgets, out: &mut AdapterOutput) {
        let parsed = parse_calendar(&file.text());
        for warning in parsed.warnings {
            out.error(file, warning);
        }
        for entry in &parsed.entries {
            if !budgets.calendar.take() {
                continue;
            }
            let candidate = calendar_candidate(entry, SourceKind::GoogleTakeout, &self.settings);
            out.push_candidate(file, candidate, || describe_entry(entry));
        }
    }

    fn import_note(
        &self,
        file: &SourceFile,
        note: &Value,
        budgets: &mut Budgets,
        out: &mut AdapterOutput,
    ) {
        if note.get("isTrashed").and_then(Value::as_bool).unwrap_or(false) {
            debug!("takeout: skipping trashed note {}", file.path);
            return;
        }
        if !budgets.notes.take() {
            return;
        }

        let body = AdapterUtils::json_str(note, "textContent").or_else(|| {
            let items: Vec<String> = note
                .get("listContent")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .filter_map(|item| {
                    let text = AdapterUtils::json_str(item, "text")?;
                    let checked = item.get("isChecked").and_then(Value::as_bool).unwrap_or(false);
                    Some(format!("[{}] {text}", if checked { "x" } else { " " }))
                })
                .collect();
            (!items.is_empty()).then(|| items.join("\n"))
        });
        let heading = AdapterUtils::json_str(note, "title");
        let title = heading
            .clone()
            .or_else(|| body.as_deref().and_then(AdapterUtils::title_from_text))
            .unwrap_or_default();

        let labels: Vec<String> = note
            .get("labels")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|l| AdapterUtils::json_str(l, "name"))
            .collect();
        let text = AdapterUtils::join_present(&[heading.as_deref(), body.as_deref()], " ")
            .unwrap_or_default();
        let layer = self.settings.classifier.classify(&text, false).layer;

        let created =
            AdapterUtils::json_i64(note, "createdTimestampUsec").and_then(from_epoch_micros);
        let edited =
            AdapterUtils::json_i64(note, "userEditedTimestampUsec").and_then(from_epoch_micros);

        let candidate = CanonicalEvent::builder(SourceKind::GoogleTakeout, layer, "note")
            .title(AdapterUtils::truncate_chars(&title, MAX_TITLE_CHARS))
            .description(body)
            .start(created.or(edited))
            .source_id(AdapterUtils::stable_id(
                SourceKind::GoogleTakeout,
                "note",
                &[file.normalized_path().as_str()],
            ))
            .metadata(EventMetadata::Note {
                labels,
                pinned: note.get("isPinned").and_then(Value::as_bool).unwrap_or(false),
                archived: note.get("isArchived").and_then(Value::as_bool).unwrap_or(false),
            });
        out.push_candidate(file, candidate, || AdapterUtils::raw_json(note));
    }
}

impl Default for TakeoutAdapter {
    fn default() -> Self {
        Self::new(AdapterSettings::default())
    }
}

impl SourceAdapter for TakeoutAdapter {
    fn source(&self) -> SourceKind {
        SourceKind::GoogleTakeout
    }

    fn name(&self) -> &'static str {
        "Google Takeout"
    }

    fn accepts(&self, path: &str) -> bool {
        matches!(
            ContentType::from_path(path),
            ContentType::Json | ContentType::Calendar
        )
    }

    fn import(&self, files: &[SourceFile]) -> AdapterOutput {
        let mut out = AdapterOutput::default();
        let mut budgets = Budgets::new();

        for file in files {
            let before = out.events.len();
            match file.content_type {
                ContentType::Calendar => self.import_ics(file, &mut budgets, &mut out),
                ContentType::Json => {
                    let value = match AdapterUtils::parse_json(file) {
                        Ok(value) => value,
                        Err(e) => {
                            out.error(file, e);
                            continue;
                        }
                    };
                    match sniff(&value) {
                        TakeoutRecords::SemanticLocations(objects) => {
                            self.import_semantic(file, objects, &mut budgets, &mut out)
                        }
                        TakeoutRecords::RawLocations(points) => {
                            self.import_raw_locations(file, points, &mut budgets, &mut out)
                        }
                        TakeoutRecords::Calendar(items) => {
                            self.import_calendar_json(file, items, &mut budgets, &mut out)
                        }
                        TakeoutRecords::Note(note) => {
                            self.import_note(file, note, &mut budgets, &mut out)
                        }
                        TakeoutRecords::Unknown => {
                            debug!("takeout: ignoring {}", file.path);
                            out.ignored += 1;
                            continue;
                        }
                    }
                }
                _ => {
                    out.ignored += 1;
                    continue;
                }
            }
            out.processed_files += 1;
            info!("takeout: {} -> {} events", file.path, out.events.len() - before);
        }

        for budget in [&budgets.points, &budgets.calendar, &budgets.notes] {
            if let Some(warning) = budget.warning() {
                out.errors.push(warning);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn json_file(path: &str, value: Value) -> SourceFile {
        SourceFile::new(path, serde_json::to_vec(&value).unwrap())
    }

    #[test]
    fn test_raw_locations_aggregate_per_day() {
        let records = json!({"locations": [
            {"latitudeE7": 525_200_000, "longitudeE7": 134_050_000, "timestampMs": "1577872800000"},
            {"latitudeE7": 525_210_000, "longitudeE7": 134_060_000, "timestampMs": "1577880000000"},
            {"latitudeE7": 481_370_000, "longitudeE7": 115_750_000, "timestamp": "2020-01-03T09:00:00Z"},
            {"latitudeE7": 1, "longitudeE7": 1}
        ]});
        let out = TakeoutAdapter::default()
            .import(&[json_file("Takeout/Location History/Records.json", records)]);
        assert_eq!(out.events.len(), 2);
        assert_eq!(out.errors.len(), 1);
        let first = &out.events[0];
        assert_eq!(first.title, "Location history: 2 points");
        assert_eq!(first.layer, Layer::Travel);
        assert!(first.end_date.is_some());
        assert!((first.location.as_ref().unwrap().latitude - 52.52).abs() < 1e-9);
        assert!(out.events[1].end_date.is_none());
    }

    #[test]
    fn test_semantic_place_visits() {
        let semantic = json!({"timelineObjects": [
            {"activitySegment": {"duration": {"startTimestamp": "2021-05-01T08:00:00Z"}}},
            {"placeVisit": {
                "location": {"latitudeE7": 487_000_000, "longitudeE7": 23_000_000, "name": "Louvre", "address": "Rue de Rivoli, Paris", "placeId": "abc"},
                "duration": {"startTimestamp": "2021-05-01T10:00:00Z", "endTimestamp": "2021-05-01T13:30:00Z"}
            }}
        ]});
        let out = TakeoutAdapter::default()
            .import(&[json_file("Semantic/2021_MAY.json", semantic)]);
        assert_eq!(out.events.len(), 1);
        let visit = &out.events[0];
        assert_eq!(visit.title, "Visited Louvre");
        assert_eq!(visit.layer, Layer::Travel);
        assert_eq!(visit.description.as_deref(), Some("Rue de Rivoli, Paris"));
        assert_eq!(visit.end_date.map(|d| d.hour()), Some(13));
    }

    #[test]
    fn test_keep_notes_by_shape() {
        let note = json!({
            "title": "",
            "textContent": "Dentist checkup\nbring the referral letter",
            "userEditedTimestampUsec": 1_600_000_000_000_000i64,
            "isTrashed": false,
            "isPinned": true,
            "labels": [{"name": "todo"}]
        });
        let trashed = json!({"title": "old", "textContent": "x", "createdTimestampUsec": 1_600_000_000_000_000i64, "isTrashed": true});
        let out = TakeoutAdapter::default().import(&[
            json_file("Keep/a.json", note),
            json_file("Keep/b.json", trashed),
        ]);
        assert_eq!(out.events.len(), 1);
        let event = &out.events[0];
        assert_eq!(event.title, "Dentist checkup");
        assert_eq!(event.layer, Layer::Health);
        assert!(matches!(
            &event.metadata,
            Some(EventMetadata::Note { pinned: true, labels, .. }) if labels == &vec!["todo".to_string()]
        ));
    }

    #[test]
    fn test_calendar_json_and_ics_members() {
        let calendar = json!({"items": [
            {"id": "e1", "summary": "Flight to Rome", "start": {"dateTime": "2022-07-01T06:00:00+02:00"}, "end": {"dateTime": "2022-07-01T08:00:00+02:00"}},
            {"id": "e2", "summary": "Cancelled thing", "status": "cancelled", "start": {"date": "2022-07-02"}},
            {"id": "e3", "summary": "Company offsite", "start": {"date": "2022-07-03"}}
        ]});
        let ics = SourceFile::new(
            "Takeout/Calendar/Personal.ics",
            b"BEGIN:VCALENDAR\nBEGIN:VEVENT\nSUMMARY:Yoga at the gym\nDTSTART:20220704T180000\nEND:VEVENT\nEND:VCALENDAR\n".to_vec(),
        );
        let out = TakeoutAdapter::default()
            .import(&[json_file("Calendar/events.json", calendar), ics]);
        assert!(out.errors.is_empty(), "{:?}", out.errors);
        assert_eq!(out.events.len(), 3);
        assert_eq!(out.events[0].start_date.to_string(), "2022-07-01T04:00:00");
        assert_eq!(out.events[0].layer, Layer::Travel);
        assert!(matches!(
            out.events[1].metadata,
            Some(EventMetadata::Calendar { all_day: true, .. })
        ));
        assert_eq!(out.events[1].layer, Layer::Work);
        assert_eq!(out.events[2].layer, Layer::Health);
    }

    #[test]
    fn test_note_cap_reports_truncation() {
        let files: Vec<SourceFile> = (0..MAX_TAKEOUT_NOTES + 3)
            .map(|i| {
                json_file(
                    &format!("Keep/{i}.json"),
                    json!({"title": format!("Note {i}"), "textContent": "x", "createdTimestampUsec": 1_600_000_000_000_000i64}),
                )
            })
            .collect();
        let out = TakeoutAdapter::default().import(&files);
        assert_eq!(out.events.len(), MAX_TAKEOUT_NOTES);
        assert_eq!(out.errors.len(), 1);
        assert!(out.errors[0].message.starts_with("notes truncated"));
    }

    #[test]
    fn test_location_point_cap_spans_files() {
        let base_ms: i64 = 1_577_872_800_000;
        let points: Vec<Value> = (0..MAX_TAKEOUT_LOCATION_POINTS as i64 + 2)
            .map(|i| {
                json!({
                    "latitudeE7": 525_200_000,
                    "longitudeE7": 134_050_000,
                    "timestampMs": (base_ms + i).to_string()
                })
            })
            .collect();
        let semantic = json!({"timelineObjects": [{"placeVisit": {
            "location": {"name": "Louvre"},
            "duration": {"startTimestamp": "2021-05-01T10:00:00Z"}
        }}]});
        let out = TakeoutAdapter::default().import(&[
            json_file("Location History/Records.json", json!({ "locations": points })),
            json_file("Semantic/2021_MAY.json", semantic),
        ]);

        assert_eq!(out.events.len(), 1);
        assert_eq!(
            out.events[0].title,
            format!("Location history: {MAX_TAKEOUT_LOCATION_POINTS} points")
        );
        assert_eq!(out.errors.len(), 1);
        assert_eq!(
            out.errors[0].message,
            format!(
                "location history truncated: processed {max} of {} records (limit {max})",
                MAX_TAKEOUT_LOCATION_POINTS + 3,
                max = MAX_TAKEOUT_LOCATION_POINTS
            )
        );
        assert!(out.errors[0].file_name.is_none());
    }

    #[test]
    fn test_calendar_cap_covers_json_and_ics() {
        let mut items: Vec<Value> = (0..MAX_TAKEOUT_CALENDAR_ENTRIES)
            .map(|i| json!({"id": format!("e{i}"), "summary": format!("Standup {i}"), "start": {"date": "2022-07-03"}}))
            .collect();
        items.push(json!({"id": "gone", "summary": "Dropped", "status": "cancelled", "start": {"date": "2022-07-04"}}));
        let ics = SourceFile::new(
            "Calendar/Extra.ics",
            b"BEGIN:VCALENDAR\nBEGIN:VEVENT\nSUMMARY:Late one\nDTSTART:20220705\nEND:VEVENT\n\
BEGIN:VEVENT\nSUMMARY:Later one\nDTSTART:20220706\nEND:VEVENT\nEND:VCALENDAR\n"
                .to_vec(),
        );
        let out = TakeoutAdapter::default().import(&[
            json_file("Calendar/events.json", json!({ "items": items })),
            ics,
        ]);

        // Cancelled items do not count against the cap.
        assert_eq!(out.events.len(), MAX_TAKEOUT_CALENDAR_ENTRIES);
        assert!(out.events.iter().all(|e| e.title.starts_with("Standup")));
        assert_eq!(out.errors.len(), 1);
        assert!(out.errors[0].message.starts_with("calendar truncated"));
        assert!(out.errors[0]
            .message
            .contains(&format!("of {} records", MAX_TAKEOUT_CALENDAR_ENTRIES + 2)));
    }

    #[test]
    fn test_unknown_json_is_ignored() {
        let out = TakeoutAdapter::default()
            .import(&[json_file("Takeout/archive_browser.json", json!({"foo": []}))]);
        assert!(out.events.is_empty());
        assert_eq!(out.ignored, 1);
    }
}
