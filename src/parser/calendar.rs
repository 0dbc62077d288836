//! iCalendar (RFC 5545 subset) reader producing flat calendar entries.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::constants::{
    MAX_CALENDAR_ENTRIES, MAX_CALENDAR_LINE_LENGTH, MAX_CALENDAR_PROPERTY_LENGTH,
};
use crate::normalize::classifier::{Classification, LayerClassifier};
use crate::normalize::dates::{create_valid_date, create_valid_day, ValidDate};
use crate::types::Location;

static ICAL_DATE_TIME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{4})(\d{2})(\d{2})(?:T(\d{2})(\d{2})(\d{2})?(Z)?)?$")
        .expect("valid iCalendar date pattern")
});

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CalendarEntry {
    pub uid: Option<String>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub geo: Option<(f64, f64)>,
    pub start: Option<ValidDate>,
    pub end: Option<ValidDate>,
    pub all_day: bool,
    pub recurrence_rule: Option<String>,
    pub categories: Vec<String>,
    pub status: Option<String>,
    pub organizer: Option<String>,
    pub attendees: Vec<String>,
}

impl CalendarEntry {
    pub fn is_cancelled(&self) -> bool {
        self.status
            .as_deref()
            .map(|s| s.eq_ignore_ascii_case("CANCELLED"))
            .unwrap_or(false)
    }

    pub fn has_location(&self) -> bool {
        self.geo.is_some() || self.location.is_some()
    }

    /// GEO coordinates when present, named after LOCATION.
    pub fn to_location(&self) -> Option<Location> {
        let (lat, lon) = self.geo?;
        Location::new(lat, lon, self.location.clone())
    }

    /// Summary, description and location joined for keyword scoring.
    pub fn classify_text(&self) -> String {
        [&self.summary, &self.description, &self.location]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn infer_layer(&self, classifier: &LayerClassifier) -> Classification {
        classifier.classify(&self.classify_text(), self.has_location())
    }
}

#[derive(Debug, Clone, Default)]
pub struct CalendarParse {
    pub entries: Vec<CalendarEntry>,
    /// Cap violations. The file is still parsed.
    pub warnings: Vec<String>,
    pub cancelled: usize,
}

#[derive(Debug)]
struct Property {
    name: String,
    params: HashMap<String, String>,
    value: String,
}

/// Join continuation lines (leading space or tab) onto the previous line,
/// dropping over-long physical lines together with their continuations.
/// Each logical line keeps the physical line number it started on.
fn unfold_checked(text: &str, warnings: &mut Vec<String>) -> Vec<(usize, String)> {
    let mut out: Vec<(usize, String)> = Vec::new();
    let mut skipping = false;
    for (index, raw) in text.split('\n').enumerate() {
        let line = raw.strip_suffix('\r').unwrap_or(raw);
        let continuation = line.strip_prefix(' ').or_else(|| line.strip_prefix('\t'));
        if continuation.is_some() && skipping {
            continue;
        }
        if line.chars().count() > MAX_CALENDAR_LINE_LENGTH {
            warnings.push(format!(
                "line {} exceeds {} characters and was skipped",
                index + 1,
                MAX_CALENDAR_LINE_LENGTH
            ));
            skipping = true;
            continue;
        }
        skipping = false;
        match (continuation, out.last_mut()) {
            (Some(rest), Some((_, previous))) => previous.push_str(rest),
            _ => out.push((index + 1, line.to_string())),
        }
    }
    out.retain(|(_, l)| !l.trim().is_empty());
    out
}

/// Reverse RFC 5545 TEXT escaping.
pub fn unescape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') | Some('N') => out.push('\n'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// Split on commas that are not backslash-escaped, unescaping each part.
fn split_list(value: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut escaped = false;
    for c in value.chars() {
        if escaped {
            current.push('\\');
            current.push(c);
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == ',' {
            parts.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    parts.push(current);
    parts
        .iter()
        .map(|p| unescape_text(p).trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

fn parse_property(line: &str) -> Option<Property> {
    let mut in_quotes = false;
    let mut colon = None;
    for (i, c) in line.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ':' if !in_quotes => {
                colon = Some(i);
                break;
            }
            _ => {}
        }
    }
    let colon = colon?;
    let (head, value) = (&line[..colon], &line[colon + 1..]);

    let mut segments = Vec::new();
    let mut current = String::new();
    in_quotes = false;
    for c in head.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            ';' if !in_quotes => segments.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    segments.push(current);

    let mut segments = segments.into_iter();
    let name = segments.next()?.trim().to_uppercase();
    if name.is_empty() {
        return None;
    }
    let params = segments
        .filter_map(|segment| {
            let (key, val) = segment.split_once('=')?;
            Some((key.trim().to_uppercase(), val.trim().to_string()))
        })
        .collect();

    Some(Property {
        name,
        params,
        value: value.to_string(),
    })
}

/// DATE or DATE-TIME. UTC (`Z`) and floating/TZID times are both kept as
/// wall-clock values; no zone database is consulted.
pub fn parse_ical_date(value: &str, params: &HashMap<String, String>) -> Option<(ValidDate, bool)> {
    let value = value.trim();
    let caps = ICAL_DATE_TIME.captures(value)?;
    let year = caps[1].parse().ok()?;
    let month = caps[2].parse().ok()?;
    let day = caps[3].parse().ok()?;

    let date_only = params
        .get("VALUE")
        .map(|v| v.eq_ignore_ascii_case("DATE"))
        .unwrap_or(false)
        || caps.get(4).is_none();
    if date_only {
        return create_valid_day(year, month, day).map(|d| (d, true));
    }

    let hour = caps.get(4)?.as_str().parse().ok()?;
    let minute = caps.get(5)?.as_str().parse().ok()?;
    let second = caps.get(6).map_or(Some(0), |s| s.as_str().parse().ok())?;
    create_valid_date(year, month, day, hour, minute, second).map(|d| (d, false))
}

fn person(property: &Property) -> Option<String> {
    let cn = property
        .params
        .get("CN")
        .map(|cn| cn.trim().to_string())
        .filter(|cn| !cn.is_empty());
    cn.or_else(|| {
        let value = property.value.trim();
        let stripped = match value.get(..7) {
            Some(scheme) if scheme.eq_ignore_ascii_case("mailto:") => &value[7..],
            _ => value,
        };
        (!stripped.is_empty()).then(|| stripped.to_string())
    })
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn apply_property(entry: &mut CalendarEntry, property: Property) {
    match property.name.as_str() {
        "UID" => entry.uid = non_empty(property.value),
        "SUMMARY" => entry.summary = non_empty(unescape_text(&property.value)),
        "DESCRIPTION" => entry.description = non_empty(unescape_text(&property.value)),
        "LOCATION" => entry.location = non_empty(unescape_text(&property.value)),
        "GEO" => {
            entry.geo = property.value.split_once(';').and_then(|(lat, lon)| {
                Some((lat.trim().parse().ok()?, lon.trim().parse().ok()?))
            })
        }
        "DTSTART" => {
            if let Some((date, all_day)) = parse_ical_date(&property.value, &property.params) {
                entry.start = Some(date);
                entry.all_day = all_day;
            } else {
                debug!("unparseable DTSTART {:?}", property.value);
            }
        }
        "DTEND" => entry.end = parse_ical_date(&property.value, &property.params).map(|(d, _)| d),
        "RRULE" => entry.recurrence_rule = non_empty(property.value),
        "CATEGORIES" => entry.categories.extend(split_list(&property.value)),
        "STATUS" => entry.status = non_empty(property.value.to_uppercase()),
        "ORGANIZER" => entry.organizer = person(&property),
        "ATTENDEE" => entry.attendees.extend(person(&property)),
        _ => {}
    }
}

/// Parse calendar text. Never fails: cap violations become warnings and
/// cancelled entries are counted, not returned.
pub fn parse_calendar(text: &str) -> CalendarParse {
    let mut result = CalendarParse::default();
    let mut stack: Vec<String> = Vec::new();
    let mut current: Option<CalendarEntry> = None;
    let mut entry_cap_hit = false;

    for (line_number, line) in unfold_checked(text, &mut result.warnings) {
        let Some(mut property) = parse_property(&line) else {
            continue;
        };

        match property.name.as_str() {
            "BEGIN" => {
                let component = property.value.trim().to_uppercase();
                if component == "VEVENT" && stack.last().map(String::as_str) != Some("VEVENT") {
                    let seen = result.entries.len() + result.cancelled;
                    if seen >= MAX_CALENDAR_ENTRIES {
                        if !entry_cap_hit {
                            entry_cap_hit = true;
                            result.warnings.push(format!(
                                "more than {} calendar entries; the rest were ignored",
                                MAX_CALENDAR_ENTRIES
                            ));
                        }
                    } else {
                        current = Some(CalendarEntry::default());
                    }
                }
                stack.push(component);
            }
            "END" => {
                let component = property.value.trim().to_uppercase();
                if let Some(position) = stack.iter().rposition(|c| *c == component) {
                    stack.truncate(position);
                }
                if component == "VEVENT" {
                    if let Some(entry) = current.take() {
                        if entry.is_cancelled() {
                            result.cancelled += 1;
                        } else {
                            result.entries.push(entry);
                        }
                    }
                }
            }
            _ => {
                // Properties of nested components (VALARM) stay with them.
                if stack.last().map(String::as_str) != Some("VEVENT") {
                    continue;
                }
                let Some(entry) = current.as_mut() else {
                    continue;
                };
                if property.value.chars().count() > MAX_CALENDAR_PROPERTY_LENGTH {
                    result.warnings.push(format!(
                        "{} value on line {} truncated to {} characters",
                        property.name, line_number, MAX_CALENDAR_PROPERTY_LENGTH
                    ));
                    property.value = property
                        .value
                        .chars()
                        .take(MAX_CALENDAR_PROPERTY_LENGTH)
                        .collect();
                }
                apply_property(entry, property);
            }
        }
    }

    if current.is_some() {
        result
            .warnings
            .push("calendar ended inside an unterminated event".to_string());
    }
    if !result.warnings.is_empty() {
        warn!("calendar parsed with {} warnings", result.warnings.len());
    }
    debug!(
        "calendar parsed: {} entries, {} cancelled",
        result.entries.len(),
        result.cancelled
    );
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Layer;

    const SAMPLE: &str = "BEGIN:VCALENDAR\r\n\
VERSION:2.0\r\n\
BEGIN:VEVENT\r\n\
UID:abc-123@example.com\r\n\
SUMMARY:Flight to Lisbon\\, then hotel\r\n\
DESCRIPTION:Pack passport\\nand charger\r\n\
LOCATION:Lisbon Airport\r\n\
GEO:38.7742;-9.1342\r\n\
DTSTART:20230601T083000Z\r\n\
DTEND:20230601T120000Z\r\n\
CATEGORIES:Travel,Work\\,ish\r\n\
ORGANIZER;CN=\"Ada Lovelace\":mailto:ada@example.com\r\n\
ATTENDEE:MAILTO:bob@example.com\r\n\
BEGIN:VALARM\r\n\
DESCRIPTION:Reminder\r\n\
END:VALARM\r\n\
END:VEVENT\r\n\
BEGIN:VEVENT\r\n\
SUMMARY:Dentist check\r\n\
\x20up\r\n\
DTSTART;VALUE=DATE:20230715\r\n\
RRULE:FREQ=YEARLY\r\n\
END:VEVENT\r\n\
BEGIN:VEVENT\r\n\
SUMMARY:Cancelled standup\r\n\
STATUS:CANCELLED\r\n\
DTSTART:20230702T090000\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";

    #[test]
    fn test_parse_sample_calendar() {
        let parsed = parse_calendar(SAMPLE);
        assert!(parsed.warnings.is_empty());
        assert_eq!(parsed.entries.len(), 2);
        assert_eq!(parsed.cancelled, 1);

        let flight = &parsed.entries[0];
        assert_eq!(flight.uid.as_deref(), Some("abc-123@example.com"));
        assert_eq!(flight.summary.as_deref(), Some("Flight to Lisbon, then hotel"));
        assert_eq!(flight.description.as_deref(), Some("Pack passport\nand charger"));
        assert_eq!(flight.geo, Some((38.7742, -9.1342)));
        assert_eq!(flight.categories, vec!["Travel", "Work,ish"]);
        assert_eq!(flight.organizer.as_deref(), Some("Ada Lovelace"));
        assert_eq!(flight.attendees, vec!["bob@example.com"]);
        assert!(!flight.all_day);
        let start = flight.start.unwrap();
        assert_eq!(
            (start.year(), start.month(), start.day(), start.hour(), start.minute()),
            (2023, 6, 1, 8, 30)
        );

        let dentist = &parsed.entries[1];
        assert_eq!(dentist.summary.as_deref(), Some("Dentist checkup"));
        assert!(dentist.all_day);
        assert_eq!(dentist.recurrence_rule.as_deref(), Some("FREQ=YEARLY"));
        assert!(dentist.description.is_none());
    }

    #[test]
    fn test_cancelled_entry_is_excluded() {
        let parsed = parse_calendar(SAMPLE);
        assert!(parsed
            .entries
            .iter()
            .all(|e| e.summary.as_deref() != Some("Cancelled standup")));
    }

    #[test]
    fn test_layer_inference_with_location_bias() {
        let parsed = parse_calendar(SAMPLE);
        let classifier = LayerClassifier::default();
        assert_eq!(parsed.entries[0].infer_layer(&classifier).layer, Layer::Travel);
        assert_eq!(parsed.entries[1].infer_layer(&classifier).layer, Layer::Health);

        let located = CalendarEntry {
            summary: Some("Lunch".into()),
            location: Some("Somewhere".into()),
            ..CalendarEntry::default()
        };
        assert_eq!(located.infer_layer(&classifier).layer, Layer::Travel);
    }

    #[test]
    fn test_date_forms() {
        let none = HashMap::new();
        let (d, all_day) = parse_ical_date("20240229", &none).unwrap();
        assert!(all_day);
        assert_eq!((d.year(), d.month(), d.day()), (2024, 2, 29));
        assert!(parse_ical_date("20230229", &none).is_none());

        let (d, all_day) = parse_ical_date("20240101T2359", &none).unwrap();
        assert!(!all_day);
        assert_eq!((d.hour(), d.minute(), d.second()), (23, 59, 0));

        let mut params = HashMap::new();
        params.insert("TZID".to_string(), "Europe/Berlin".to_string());
        let (d, _) = parse_ical_date("20240101T101500", &params).unwrap();
        assert_eq!(d.hour(), 10);

        assert!(parse_ical_date("not a date", &none).is_none());
    }

    #[test]
    fn test_caps_produce_warnings_not_failures() {
        let long_summary = "x".repeat(MAX_CALENDAR_LINE_LENGTH + 1);
        let text = format!(
            "BEGIN:VEVENT\nSUMMARY:{long_summary}\nDTSTART:20200101\nEND:VEVENT\n"
        );
        let parsed = parse_calendar(&text);
        assert_eq!(parsed.entries.len(), 1);
        assert_eq!(parsed.warnings.len(), 1);
        assert!(parsed.entries[0].summary.is_none());

        let folded = "y".repeat(9_000);
        let mut text = format!("BEGIN:VEVENT\nDTSTART:20200101\nDESCRIPTION:{folded}");
        for _ in 0..6 {
            text.push_str(&format!("\n {folded}"));
        }
        text.push_str("\nEND:VEVENT\n");
        let parsed = parse_calendar(&text);
        assert_eq!(parsed.warnings.len(), 1);
        let description = parsed.entries[0].description.as_deref().unwrap();
        assert_eq!(description.chars().count(), MAX_CALENDAR_PROPERTY_LENGTH);

        let mut many = String::new();
        for _ in 0..=MAX_CALENDAR_ENTRIES {
            many.push_str("BEGIN:VEVENT\nSUMMARY:a\nDTSTART:20200101\nEND:VEVENT\n");
        }
        let parsed = parse_calendar(&many);
        assert_eq!(parsed.entries.len(), MAX_CALENDAR_ENTRIES);
        assert_eq!(parsed.warnings.len(), 1);
    }

    #[test]
    fn test_dropped_line_takes_its_continuations_along() {
        let long_description = "z".repeat(MAX_CALENDAR_LINE_LENGTH + 1);
        let text = format!(
            "BEGIN:VEVENT\r\nSUMMARY:Lunch\r\nDESCRIPTION:{long_description}\r\n\
\x20 tail of description\r\nDTSTART:20200101\r\nEND:VEVENT\r\n"
        );
        let parsed = parse_calendar(&text);
        assert_eq!(parsed.entries.len(), 1);
        assert_eq!(parsed.entries[0].summary.as_deref(), Some("Lunch"));
        assert!(parsed.entries[0].description.is_none());
        assert!(parsed.entries[0].start.is_some());
        assert_eq!(parsed.warnings.len(), 1);
        assert!(parsed.warnings[0].contains(&MAX_CALENDAR_LINE_LENGTH.to_string()));
    }

    #[test]
    fn test_unfold_and_unescape() {
        let lines: Vec<String> = unfold_checked("A:one\r\n two\r\n\tthree\r\nB:x", &mut Vec::new())
            .into_iter()
            .map(|(_, line)| line)
            .collect();
        assert_eq!(lines, vec!["A:onetwothree".to_string(), "B:x".to_string()]);
        assert_eq!(unescape_text(r"a\;b\,c\\d\Ne"), "a;b,c\\d\ne");
    }
}
