//! Format readers shared by the source adapters.

pub mod calendar;
pub mod exif;
pub mod tabular;

pub use calendar::{parse_calendar, CalendarEntry, CalendarParse};
pub use exif::{extract_image_metadata, ImageMetadata};
pub use tabular::{ColumnMapping, MappingError, Row, Table, TabularError, TabularParser};
