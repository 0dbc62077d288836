use std::str::FromStr;

use tracing::{info, warn};

use super::base::{AdapterOutput, AdapterSettings, SourceAdapter};
use crate::parser::tabular::{ColumnMapping, Row, TabularParser};
use crate::types::{
    CanonicalEvent, ContentType, EventBuilder, EventMetadata, Layer, SourceFile, SourceKind,
};

const DEFAULT_EVENT_TYPE: &str = "custom";

/// Imports generic spreadsheets with a title and a date column.
pub struct CsvAdapter {
    settings: AdapterSettings,
}

impl CsvAdapter {
    pub fn new(settings: AdapterSettings) -> Self {
        Self { settings }
    }

    fn candidate(&self, row: &Row, mapping: &ColumnMapping) -> EventBuilder {
        let title = row.get(&mapping.title).unwrap_or_default();
        let description = mapping.description.as_deref().and_then(|c| row.get(c));
        let location = mapping.location.as_deref().and_then(|c| row.get(c));
        let category = mapping.category.as_deref().and_then(|c| row.get(c));

        // A category cell naming a layer wins over keyword scoring.
        let layer = category
            .and_then(|c| Layer::from_str(c).ok())
            .unwrap_or_else(|| {
                let text = [Some(title), description, category]
                    .into_iter()
                    .flatten()
                    .collect::<Vec<_>>()
                    .join(" ");
                self.settings.classifier.classify(&text, location.is_some()).layer
            });

        let event_type = mapping
            .event_type
            .as_deref()
            .and_then(|c| row.get(c))
            .unwrap_or(DEFAULT_EVENT_TYPE);
        let start = row
            .get(&mapping.start_date)
            .and_then(|v| self.settings.dates.parse(v));
        let end = mapping
            .end_date
            .as_deref()
            .and_then(|c| row.get(c))
            .and_then(|v| self.settings.dates.parse(v));

        CanonicalEvent::builder(SourceKind::Csv, layer, event_type)
            .title(title)
            .description(description.map(str::to_string))
            .start(start)
            .end(end)
            .metadata(EventMetadata::Tabular {
                line: row.line,
                category: category.map(str::to_string),
            })
    }
}

impl Default for CsvAdapter {
    fn default() -> Self {
        Self::new(AdapterSettings::default())
    }
}

impl SourceAdapter for CsvAdapter {
    fn source(&self) -> SourceKind {
        SourceKind::Csv
    }

    fn name(&self) -> &'static str {
        "Spreadsheet (CSV)"
    }

    fn accepts(&self, path: &str) -> bool {
        ContentType::from_path(path) == ContentType::Csv
    }

    fn import(&self, files: &[SourceFile]) -> AdapterOutput {
        let mut out = AdapterOutput::default();
        for file in files {
            if !matches!(file.content_type, ContentType::Csv | ContentType::Text) {
                out.ignored += 1;
                continue;
            }

            let table = match TabularParser::new().parse(&file.text()) {
                Ok(table) => table,
                Err(e) => {
                    warn!("csv: {} rejected: {}", file.path, e);
                    out.error(file, e.to_string());
                    continue;
                }
            };
            let mapping = match ColumnMapping::detect(&table.headers) {
                Ok(mapping) => mapping,
                Err(e) => {
                    warn!("csv: {} skipped: {}", file.path, e);
                    out.error(file, e.to_string());
                    continue;
                }
            };
            out.processed_files += 1;

            let before = out.events.len();
            for row in &table.rows {
                out.push_candidate(file, self.candidate(row, &mapping), || {
                    format!("line {}: {}", row.line, row.raw())
                });
            }
            info!(
                "csv: {} -> {} events from {} rows",
                file.path,
                out.events.len() - before,
                table.rows.len()
            );
        }
        out
    }
}
