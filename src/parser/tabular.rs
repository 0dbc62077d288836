//! Delimited-text (CSV/TSV) parsing with structural caps and header auto-mapping.

use thiserror::Error;
use tracing::debug;

use crate::constants::{
    MAX_TABULAR_CELL_LENGTH, MAX_TABULAR_COLUMNS, MAX_TABULAR_LINE_LENGTH, MAX_TABULAR_ROWS,
};

const CANDIDATE_DELIMITERS: [char; 3] = [',', ';', '\t'];
const DELIMITER_SAMPLE_LINES: usize = 5;

/// Whole-file failures. Every variant carries the physical position it was found at.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TabularError {
    #[error("line {line} exceeds {max} characters", max = MAX_TABULAR_LINE_LENGTH)]
    LineTooLong { line: usize },

    #[error("line {line}, column {column}: more than {max} columns", max = MAX_TABULAR_COLUMNS)]
    TooManyColumns { line: usize, column: usize },

    #[error("line {line}: more than {max} rows", max = MAX_TABULAR_ROWS)]
    TooManyRows { line: usize },

    #[error(
        "line {line}, column {column}: cell exceeds {max} characters",
        max = MAX_TABULAR_CELL_LENGTH
    )]
    CellTooLong { line: usize, column: usize },

    #[error("line {line}, column {column}: quoted field is never closed")]
    UnterminatedQuote { line: usize, column: usize },

    #[error("no header row found")]
    MissingHeader,
}

impl TabularError {
    /// `(line, column)`, 1-based. Column is 0 when only the line is known.
    pub fn position(&self) -> Option<(usize, usize)> {
        match *self {
            TabularError::LineTooLong { line } | TabularError::TooManyRows { line } => {
                Some((line, 0))
            }
            TabularError::TooManyColumns { line, column }
            | TabularError::CellTooLong { line, column }
            | TabularError::UnterminatedQuote { line, column } => Some((line, column)),
            TabularError::MissingHeader => None,
        }
    }
}

/// One logical record and the physical line it started on.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Record {
    line: usize,
    fields: Vec<String>,
}

impl Record {
    fn is_blank(&self) -> bool {
        self.fields.len() == 1 && self.fields[0].trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub line: usize,
    cells: Vec<(String, String)>,
}

impl Row {
    /// Trimmed value of a column, `None` when absent or blank.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.cells
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value.trim())
            .filter(|value| !value.is_empty())
    }

    pub fn cells(&self) -> impl Iterator<Item = (&str, &str)> {
        self.cells.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.iter().all(|(_, v)| v.trim().is_empty())
    }

    /// Cells rendered back as `key=value` pairs for error reports.
    pub fn raw(&self) -> String {
        self.cells
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Row>,
    pub delimiter: char,
}

#[derive(Debug, Clone, Default)]
pub struct TabularParser {
    delimiter: Option<char>,
    header_marker: Option<String>,
}

impl TabularParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = Some(delimiter);
        self
    }

    /// Treat the first record containing this cell (case-insensitive) as the
    /// header, discarding anything above it.
    pub fn with_header_marker(mut self, marker: impl Into<String>) -> Self {
        self.header_marker = Some(marker.into().to_lowercase());
        self
    }

    pub fn parse(&self, text: &str) -> Result<Table, TabularError> {
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        let delimiter = self.delimiter.unwrap_or_else(|| detect_delimiter(text));
        let records = split_records(text, delimiter)?;

        let mut records = records.into_iter().filter(|r| !r.is_blank());
        let header = match &self.header_marker {
            Some(marker) => records.find(|r| {
                r.fields
                    .iter()
                    .any(|f| f.trim().to_lowercase() == *marker)
            }),
            None => records.next(),
        }
        .ok_or(TabularError::MissingHeader)?;

        let headers = disambiguate_headers(&header.fields);
        let rows: Vec<Row> = records
            .map(|record| {
                if record.fields.len() > headers.len() {
                    debug!(
                        "line {} has {} cells for {} headers, extra cells dropped",
                        record.line,
                        record.fields.len(),
                        headers.len()
                    );
                }
                let mut fields = record.fields.into_iter();
                let cells = headers
                    .iter()
                    .map(|h| (h.clone(), fields.next().unwrap_or_default()))
                    .collect();
                Row {
                    line: record.line,
                    cells,
                }
            })
            .collect();

        debug!(
            "parsed {} rows x {} columns (delimiter {:?})",
            rows.len(),
            headers.len(),
            delimiter
        );
        Ok(Table {
            headers,
            rows,
            delimiter,
        })
    }
}

/// Pick the candidate that appears most often outside quotes in the first lines.
fn detect_delimiter(text: &str) -> char {
    let sample = text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .take(DELIMITER_SAMPLE_LINES);

    let mut counts = [0usize; CANDIDATE_DELIMITERS.len()];
    for line in sample {
        let mut in_quotes = false;
        for c in line.chars() {
            if c == '"' {
                in_quotes = !in_quotes;
            } else if !in_quotes {
                if let Some(i) = CANDIDATE_DELIMITERS.iter().position(|&d| d == c) {
                    counts[i] += 1;
                }
            }
        }
    }

    let mut best = 0;
    for i in 1..counts.len() {
        if counts[i] > counts[best] {
            best = i;
        }
    }
    CANDIDATE_DELIMITERS[best]
}

fn split_records(text: &str, delimiter: char) -> Result<Vec<Record>, TabularError> {
    let mut records = Vec::new();
    let mut fields: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut field_chars = 0usize;
    let mut in_quotes = false;
    let mut quote_opened = (0, 0);

    let mut line = 1usize;
    let mut column = 0usize;
    let mut record_line = 1usize;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        let newline = c == '\n' || (c == '\r' && chars.peek() != Some(&'\n'));
        if c == '\r' && !newline {
            // First half of CRLF.
            continue;
        }
        if !newline {
            column += 1;
            if column > MAX_TABULAR_LINE_LENGTH {
                return Err(TabularError::LineTooLong { line });
            }
        }

        if in_quotes {
            if newline {
                field.push('\n');
                field_chars += 1;
                line += 1;
                column = 0;
            } else if c == '"' {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    column += 1;
                    field.push('"');
                    field_chars += 1;
                } else {
                    in_quotes = false;
                }
            } else {
                field.push(c);
                field_chars += 1;
            }
        } else if newline {
            push_field(&mut fields, &mut field, &mut field_chars, line, column)?;
            push_record(&mut records, std::mem::take(&mut fields), record_line, line)?;
            line += 1;
            column = 0;
            record_line = line;
        } else if c == delimiter {
            push_field(&mut fields, &mut field, &mut field_chars, line, column)?;
        } else if c == '"' && field.trim().is_empty() {
            field.clear();
            field_chars = 0;
            in_quotes = true;
            quote_opened = (line, column);
        } else {
            field.push(c);
            field_chars += 1;
        }

        if field_chars > MAX_TABULAR_CELL_LENGTH {
            return Err(TabularError::CellTooLong {
                line,
                column: fields.len() + 1,
            });
        }
    }

    if in_quotes {
        return Err(TabularError::UnterminatedQuote {
            line: quote_opened.0,
            column: quote_opened.1,
        });
    }
    if !field.is_empty() || !fields.is_empty() {
        push_field(&mut fields, &mut field, &mut field_chars, line, column)?;
        push_record(&mut records, fields, record_line, line)?;
    }
    Ok(records)
}

fn push_field(
    fields: &mut Vec<String>,
    field: &mut String,
    field_chars: &mut usize,
    line: usize,
    column: usize,
) -> Result<(), TabularError> {
    if fields.len() >= MAX_TABULAR_COLUMNS {
        return Err(TabularError::TooManyColumns { line, column });
    }
    fields.push(std::mem::take(field));
    *field_chars = 0;
    Ok(())
}

fn push_record(
    records: &mut Vec<Record>,
    fields: Vec<String>,
    record_line: usize,
    line: usize,
) -> Result<(), TabularError> {
    let record = Record {
        line: record_line,
        fields,
    };
    if record.is_blank() {
        return Ok(());
    }
    // One extra record for the header.
    if records.len() > MAX_TABULAR_ROWS {
        return Err(TabularError::TooManyRows { line });
    }
    records.push(record);
    Ok(())
}

/// Trim header names, name empty ones by position and suffix repeats.
fn disambiguate_headers(raw: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(raw.len());
    for (index, name) in raw.iter().enumerate() {
        let base = match name.trim() {
            "" => format!("column_{}", index + 1),
            trimmed => trimmed.to_string(),
        };
        let mut candidate = base.clone();
        let mut n = 2;
        while out.contains(&candidate) {
            candidate = format!("{base}_{n}");
            n += 1;
        }
        out.push(candidate);
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MappingError {
    #[error("no title column found in headers [{0}]")]
    MissingTitle(String),

    #[error("no date column found in headers [{0}]")]
    MissingStartDate(String),
}

const TITLE_SYNONYMS: &[&str] = &[
    "title", "name", "event", "event name", "summary", "subject", "what", "headline",
];
const START_SYNONYMS: &[&str] = &[
    "date", "start", "start date", "start time", "when", "begin", "datetime", "timestamp", "day",
];
const END_SYNONYMS: &[&str] = &["end", "end date", "end time", "until", "finish", "to"];
const DESCRIPTION_SYNONYMS: &[&str] =
    &["description", "details", "notes", "note", "body", "content", "comment"];
const CATEGORY_SYNONYMS: &[&str] = &["category", "layer", "area", "life area"];
const EVENT_TYPE_SYNONYMS: &[&str] = &["event type", "type", "kind", "subtype"];
const LOCATION_SYNONYMS: &[&str] = &["location", "place", "where", "address", "venue"];

/// Which header carries which event field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMapping {
    pub title: String,
    pub start_date: String,
    pub end_date: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub event_type: Option<String>,
    pub location: Option<String>,
}

fn normalize_header(header: &str) -> String {
    header
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

impl ColumnMapping {
    pub fn detect(headers: &[String]) -> Result<Self, MappingError> {
        let normalized: Vec<String> = headers.iter().map(|h| normalize_header(h)).collect();
        let mut taken = vec![false; headers.len()];

        let mut pick = |synonyms: &[&str], fuzzy: bool| -> Option<String> {
            let exact = synonyms.iter().find_map(|syn| {
                normalized
                    .iter()
                    .enumerate()
                    .find(|(i, h)| !taken[*i] && h == syn)
                    .map(|(i, _)| i)
            });
            let found = exact.or_else(|| {
                if !fuzzy {
                    return None;
                }
                synonyms.iter().find_map(|syn| {
                    normalized
                        .iter()
                        .enumerate()
                        .find(|(i, h)| !taken[*i] && h.split(' ').any(|word| word == *syn))
                        .map(|(i, _)| i)
                })
            })?;
            taken[found] = true;
            Some(headers[found].clone())
        };

        let listing = || headers.join(", ");

        let title =
            pick(TITLE_SYNONYMS, true).ok_or_else(|| MappingError::MissingTitle(listing()))?;
        let end_date = pick(END_SYNONYMS, false);
        let start_date =
            pick(START_SYNONYMS, true).ok_or_else(|| MappingError::MissingStartDate(listing()))?;
        let description = pick(DESCRIPTION_SYNONYMS, true);
        let category = pick(CATEGORY_SYNONYMS, false);
        let event_type = pick(EVENT_TYPE_SYNONYMS, false);
        let location = pick(LOCATION_SYNONYMS, true);

        Ok(Self {
            title,
            start_date,
            end_date,
            description,
            category,
            event_type,
            location,
        })
    }
}
