use tracing::{debug, info, warn};

use super::base::{AdapterOutput, AdapterSettings, AdapterUtils, SourceAdapter};
use crate::parser::tabular::{Row, Table, TabularParser};
use crate::types::{
    CanonicalEvent, ContentType, EventBuilder, EventMetadata, Layer, SourceFile, SourceKind,
};

/// The LinkedIn export tables this adapter understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordType {
    Position,
    Education,
    Connection,
    Certification,
}

impl RecordType {
    fn from_file_name(name: &str) -> Option<Self> {
        let name = name.to_ascii_lowercase();
        let stem = name.strip_suffix(".csv").unwrap_or(&name);
        match stem {
            "positions" => Some(RecordType::Position),
            "education" => Some(RecordType::Education),
            "connections" => Some(RecordType::Connection),
            "certifications" => Some(RecordType::Certification),
            _ => None,
        }
    }

    /// Fallback when the file was renamed: recognise the table by its columns.
    fn from_headers(headers: &[String]) -> Option<Self> {
        let has = |name: &str| headers.iter().any(|h| h.eq_ignore_ascii_case(name));
        if has("Company Name") && has("Title") {
            Some(RecordType::Position)
        } else if has("School Name") {
            Some(RecordType::Education)
        } else if has("First Name") && has("Connected On") {
            Some(RecordType::Connection)
        } else if has("Authority") {
            Some(RecordType::Certification)
        } else {
            None
        }
    }

    fn layer(self) -> Layer {
        match self {
            RecordType::Position => Layer::Work,
            RecordType::Education | RecordType::Certification => Layer::Education,
            RecordType::Connection => Layer::Relationships,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            RecordType::Position => "position",
            RecordType::Education => "education",
            RecordType::Connection => "connection",
            RecordType::Certification => "certification",
        }
    }
}

/// Imports the CSV tables of a LinkedIn data export.
pub struct LinkedInAdapter {
    settings: AdapterSettings,
}

impl LinkedInAdapter {
    pub fn new(settings: AdapterSettings) -> Self {
        Self { settings }
    }

    fn date(&self, row: &Row, column: &str) -> Option<crate::normalize::ValidDate> {
        row.get(column).and_then(|v| self.settings.dates.parse(v))
    }

    fn candidate(&self, record_type: RecordType, row: &Row) -> EventBuilder {
        let builder = CanonicalEvent::builder(
            SourceKind::LinkedIn,
            record_type.layer(),
            record_type.as_str(),
        );
        let cell = |column: &str| row.get(column).unwrap_or("");
        match record_type {
            RecordType::Position => {
                let role = row.get("Title");
                let company = row.get("Company Name");
                let title = match (role, company) {
                    (Some(role), Some(company)) => format!("{role} at {company}"),
                    (Some(role), None) => role.to_string(),
                    (None, Some(company)) => format!("Joined {company}"),
                    (None, None) => String::new(),
                };
                builder
                    .title(title)
                    .description(row.get("Description").map(str::to_string))
                    .start(self.date(row, "Started On"))
                    .end(self.date(row, "Finished On"))
                    .source_id(AdapterUtils::stable_id(
                        SourceKind::LinkedIn,
                        "position",
                        &[company.unwrap_or(""), role.unwrap_or(""), cell("Started On")],
                    ))
                    .metadata(EventMetadata::ProfessionalRecord {
                        record_type: "position".into(),
                        organization: company.map(str::to_string),
                        role: role.map(str::to_string),
                    })
            }
            RecordType::Education => {
                let school = row.get("School Name");
                let degree = row.get("Degree Name");
                let title = match (degree, school) {
                    (Some(degree), Some(school)) => format!("{degree} at {school}"),
                    (None, Some(school)) => format!("Studied at {school}"),
                    (Some(degree), None) => degree.to_string(),
                    (None, None) => String::new(),
                };
                let description =
                    AdapterUtils::join_present(&[row.get("Notes"), row.get("Activities")], "\n");
                builder
                    .title(title)
                    .description(description)
                    .start(self.date(row, "Start Date"))
                    .end(self.date(row, "End Date"))
                    .source_id(AdapterUtils::stable_id(
                        SourceKind::LinkedIn,
                        "education",
                        &[school.unwrap_or(""), degree.unwrap_or(""), cell("Start Date")],
                    ))
                    .metadata(EventMetadata::ProfessionalRecord {
                        record_type: "education".into(),
                        organization: school.map(str::to_string),
                        role: degree.map(str::to_string),
                    })
            }
            RecordType::Connection => {
                let name =
                    AdapterUtils::join_present(&[row.get("First Name"), row.get("Last Name")], " ");
                let company = row.get("Company");
                let position = row.get("Position");
                let description = match (position, company) {
                    (Some(p), Some(c)) => Some(format!("{p} at {c}")),
                    (p, c) => p.or(c).map(str::to_string),
                };
                builder
                    .title(
                        name.as_deref()
                            .map(|n| format!("Connected with {n}"))
                            .unwrap_or_default(),
                    )
                    .description(description)
                    .start(self.date(row, "Connected On"))
                    .source_id(AdapterUtils::stable_id(
                        SourceKind::LinkedIn,
                        "connection",
                        &[name.as_deref().unwrap_or(""), cell("URL"), cell("Connected On")],
                    ))
                    .metadata(EventMetadata::ProfessionalRecord {
                        record_type: "connection".into(),
                        organization: company.map(str::to_string),
                        role: position.map(str::to_string),
                    })
            }
            RecordType::Certification => {
                let name = row.get("Name");
                let authority = row.get("Authority");
                let title = match (name, authority) {
                    (Some(n), Some(a)) => format!("{n} ({a})"),
                    (Some(n), None) => n.to_string(),
                    (None, _) => String::new(),
                };
                builder
                    .title(title)
                    .description(row.get("Url").map(str::to_string))
                    .start(self.date(row, "Started On"))
                    .end(self.date(row, "Finished On"))
                    .source_id(AdapterUtils::stable_id(
                        SourceKind::LinkedIn,
                        "certification",
                        &[name.unwrap_or(""), authority.unwrap_or(""), cell("License Number")],
                    ))
                    .metadata(EventMetadata::ProfessionalRecord {
                        record_type: "certification".into(),
                        organization: authority.map(str::to_string),
                        role: None,
                    })
            }
        }
    }

    /// Parse and identify the table. Connections exports start with a notes
    /// preamble, so a second pass anchors on their header row.
    fn load_table(&self, file: &SourceFile) -> Result<Option<(RecordType, Table)>, String> {
        let text = file.text();
        let by_name = RecordType::from_file_name(file.file_name());

        let parser = match by_name {
            Some(RecordType::Connection) => TabularParser::new().with_header_marker("First Name"),
            _ => TabularParser::new(),
        };
        let table = parser.parse(&text).map_err(|e| e.to_string())?;
        if let Some(kind) = by_name.or_else(|| RecordType::from_headers(&table.headers)) {
            return Ok(Some((kind, table)));
        }

        match TabularParser::new().with_header_marker("First Name").parse(&text) {
            Ok(table) => Ok(RecordType::from_headers(&table.headers).map(|kind| (kind, table))),
            Err(_) => Ok(None),
        }
    }
}

impl Default for LinkedInAdapter {
    fn default() -> Self {
        Self::new(AdapterSettings::default())
    }
}

impl SourceAdapter for LinkedInAdapter {
    fn source(&self) -> SourceKind {
        SourceKind::LinkedIn
    }

    fn name(&self) -> &'static str {
        "LinkedIn"
    }

    fn accepts(&self, path: &str) -> bool {
        ContentType::from_path(path) == ContentType::Csv
    }

    fn import(&self, files: &[SourceFile]) -> AdapterOutput {
        let mut out = AdapterOutput::default();
        for file in files {
            if file.content_type != ContentType::Csv {
                out.ignored += 1;
                continue;
            }
            let (record_type, table) = match self.load_table(file) {
                Ok(Some(found)) => found,
                Ok(None) => {
                    debug!("linkedin: {} is not a supported table", file.path);
                    out.ignored += 1;
                    continue;
                }
                Err(e) => {
                    warn!("linkedin: {} rejected: {}", file.path, e);
                    out.error(file, e);
                    continue;
                }
            };
            out.processed_files += 1;

            let before = out.events.len();
            for row in &table.rows {
                out.push_candidate(file, self.candidate(record_type, row), || {
                    format!("line {}: {}", row.line, row.raw())
                });
            }
            info!(
                "linkedin: {} ({}) -> {} events",
                file.path,
                record_type.as_str(),
                out.events.len() - before
            );
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str, text: &str) -> SourceFile {
        SourceFile::new(name, text.as_bytes().to_vec())
    }

    #[test]
    fn test_positions_become_work_events() {
        let out = LinkedInAdapter::default().import(&[file(
            "Positions.csv",
            "Company Name,Title,Description,Location,Started On,Finished On\nAcme,Engineer,Built things,Berlin,Jan 2020,Mar 2022\n",
        )]);
        assert!(out.errors.is_empty(), "{:?}", out.errors);
        let event = &out.events[0];
        assert_eq!(event.title, "Engineer at Acme");
        assert_eq!(event.layer, Layer::Work);
        assert_eq!(event.event_type, "position");
        assert_eq!((event.start_date.year(), event.start_date.month()), (2020, 1));
        assert_eq!(event.end_date.map(|d| d.month()), Some(3));
    }

    #[test]
    fn test_connections_with_preamble() {
        let text = "Notes:\n\"When exporting your connection data, you may notice that some of the email addresses are missing.\"\n\nFirst Name,Last Name,URL,Email Address,Company,Position,Connected On\nAda,Lovelace,https://example.com/ada,,Analytical Engines,Programmer,01 Jan 2020\n";
        let out = LinkedInAdapter::default().import(&[file("Connections.csv", text)]);
        assert!(out.errors.is_empty(), "{:?}", out.errors);
        assert_eq!(out.events.len(), 1);
        let event = &out.events[0];
        assert_eq!(event.title, "Connected with Ada Lovelace");
        assert_eq!(event.layer, Layer::Relationships);
        assert_eq!(event.description.as_deref(), Some("Programmer at Analytical Engines"));
    }

    #[test]
    fn test_renamed_files_are_recognised_by_headers() {
        let education = file(
            "export-part-3.csv",
            "School Name,Start Date,End Date,Notes,Degree Name,Activities\nMIT,2012,2016,,BSc Computer Science,Chess club\n",
        );
        let connections = file(
            "contacts.csv",
            "Notes:\nsomething\n\nFirst Name,Last Name,Connected On\nGrace,Hopper,15 Mar 2019\n",
        );
        let out = LinkedInAdapter::default().import(&[education, connections]);
        assert!(out.errors.is_empty(), "{:?}", out.errors);
        assert_eq!(out.events.len(), 2);
        assert_eq!(out.events[0].title, "BSc Computer Science at MIT");
        assert_eq!(out.events[0].layer, Layer::Education);
        assert_eq!(out.events[1].layer, Layer::Relationships);
    }

    #[test]
    fn test_certifications_and_unknown_tables() {
        let certs = file(
            "Certifications.csv",
            "Name,Url,Authority,Started On,Finished On,License Number\nAWS Solutions Architect,,Amazon,Jun 2021,,ABC\n",
        );
        let other = file("Messages.csv", "FROM,TO,DATE,CONTENT\na,b,2020-01-01,hi\n");
        let out = LinkedInAdapter::default().import(&[certs, other]);
        assert_eq!(out.events.len(), 1);
        assert_eq!(out.events[0].title, "AWS Solutions Architect (Amazon)");
        assert_eq!(out.events[0].layer, Layer::Education);
        assert_eq!(out.ignored, 1);
    }

    #[test]
    fn test_bad_dates_are_row_errors() {
        let out = LinkedInAdapter::default().import(&[file(
            "Positions.csv",
            "Company Name,Title,Started On\nAcme,Engineer,someday\nInitech,Analyst,Feb 2019\n",
        )]);
        assert_eq!(out.events.len(), 1);
        assert_eq!(out.errors.len(), 1);
        assert_eq!(out.errors[0].file_name.as_deref(), Some("Positions.csv"));
    }
}
