use tracing::{debug, info};

use super::base::{AdapterOutput, AdapterSettings, AdapterUtils, SourceAdapter};
use crate::parser::calendar::{parse_calendar, CalendarEntry};
use crate::types::{
    CanonicalEvent, ContentType, EventBuilder, EventMetadata, SourceFile, SourceKind,
};

/// Imports standalone `.ics` calendar files.
pub struct IcsAdapter {
    settings: AdapterSettings,
}

impl IcsAdapter {
    pub fn new(settings: AdapterSettings) -> Self {
        Self { settings }
    }
}

impl Default for IcsAdapter {
    fn default() -> Self {
        Self::new(AdapterSettings::default())
    }
}

/// Candidate event for one calendar entry. Shared with the takeout adapter,
/// which finds calendars inside its exports.
pub(crate) fn calendar_candidate(
    entry: &CalendarEntry,
    source: SourceKind,
    settings: &AdapterSettings,
) -> EventBuilder {
    let classification = entry.infer_layer(&settings.classifier);
    let title = entry
        .summary
        .as_deref()
        .and_then(AdapterUtils::title_from_text)
        .unwrap_or_default();

    let mut builder = CanonicalEvent::builder(source, classification.layer, "calendar_event")
        .title(title)
        .description(entry.description.clone())
        .start(entry.start)
        .end(entry.end)
        .location(entry.to_location())
        .metadata(EventMetadata::Calendar {
            uid: entry.uid.clone(),
            all_day: entry.all_day,
            recurrence_rule: entry.recurrence_rule.clone(),
            status: entry.status.clone(),
            organizer: entry.organizer.clone(),
            attendees: entry.attendees.clone(),
            categories: entry.categories.clone(),
        });
    if let Some(uid) = &entry.uid {
        // Recurring series share a UID; the start keeps instances apart.
        let start = entry.start.map(|d| d.to_string()).unwrap_or_default();
        builder = builder.source_id(AdapterUtils::stable_id(
            source,
            "calendar",
            &[uid.as_str(), start.as_str()],
        ));
    }
    builder
}

pub(crate) fn describe_entry(entry: &CalendarEntry) -> String {
    format!(
        "SUMMARY={} DTSTART={}",
        entry.summary.as_deref().unwrap_or(""),
        entry.start.map(|d| d.to_string()).unwrap_or_default()
    )
}

impl SourceAdapter for IcsAdapter {
    fn source(&self) -> SourceKind {
        SourceKind::Ical
    }

    fn name(&self) -> &'static str {
        "Calendar (iCalendar)"
    }

    fn accepts(&self, path: &str) -> bool {
        ContentType::from_path(path) == ContentType::Calendar
    }

    fn import(&self, files: &[SourceFile]) -> AdapterOutput {
        let mut out = AdapterOutput::default();
        for file in files {
            let looks_like_calendar = file.content_type == ContentType::Calendar
                || file.text().starts_with("BEGIN:VCALENDAR");
            if !looks_like_calendar {
                debug!("ical: ignoring {}", file.path);
                out.ignored += 1;
                continue;
            }
            out.processed_files += 1;

            let parsed = parse_calendar(&file.text());
            for warning in parsed.warnings {
                out.error(file, warning);
            }
            let before = out.events.len();
            for entry in &parsed.entries {
                let candidate = calendar_candidate(entry, SourceKind::Ical, &self.settings);
                out.push_candidate(file, candidate, || describe_entry(entry));
            }
            info!(
                "ical: {} -> {} events ({} cancelled entries dropped)",
                file.path,
                out.events.len() - before,
                parsed.cancelled
            );
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Layer;

    fn ics(body: &str) -> SourceFile {
        SourceFile::new(
            "calendar.ics",
            format!("BEGIN:VCALENDAR\r\n{body}END:VCALENDAR\r\n").into_bytes(),
        )
    }

    #[test]
    fn test_entries_become_events() {
        let file = ics(
            "BEGIN:VEVENT\r\nUID:1\r\nSUMMARY:Job interview at Acme\r\n\
DTSTART:20220301T100000Z\r\nEND:VEVENT\r\n",
        );
        let out = IcsAdapter::default().import(&[file]);
        assert!(out.errors.is_empty());
        assert_eq!(out.events.len(), 1);
        let event = &out.events[0];
        assert_eq!(event.layer, Layer::Work);
        assert_eq!(event.source, SourceKind::Ical);
        assert!(event.source_id.as_deref().unwrap().starts_with("ical:calendar:"));
        assert!(matches!(event.metadata, Some(EventMetadata::Calendar { all_day: false, .. })));
    }

    #[test]
    fn test_entry_without_start_is_a_record_error() {
        let file = ics(
            "BEGIN:VEVENT\r\nSUMMARY:Undated\r\nDTSTART:garbage\r\nEND:VEVENT\r\n\
BEGIN:VEVENT\r\nSUMMARY:Dated\r\nDTSTART:20200101\r\nEND:VEVENT\r\n",
        );
        let out = IcsAdapter::default().import(&[file]);
        assert_eq!(out.events.len(), 1);
        assert_eq!(out.errors.len(), 1);
        assert!(out.errors[0].raw_data.as_deref().unwrap().contains("Undated"));
    }

    #[test]
    fn test_cancelled_entries_are_excluded() {
        let file =
            ics("BEGIN:VEVENT\r\nSUMMARY:Gone\r\nSTATUS:CANCELLED\r\nDTSTART:20200101\r\nEND:VEVENT\r\n");
        let out = IcsAdapter::default().import(&[file]);
        assert!(out.events.is_empty());
        assert!(out.errors.is_empty());
        assert_eq!(out.processed_files, 1);
    }

    #[test]
    fn test_non_calendar_files_are_ignored() {
        let out = IcsAdapter::default().import(&[SourceFile::new("notes.txt", b"hello".to_vec())]);
        assert_eq!(out.ignored, 1);
        assert_eq!(out.processed_files, 0);
    }
}
