// Base trait and utilities for source adapters
pub mod base;

// Individual adapter implementations
pub mod csv;
pub mod facebook;
pub mod ics;
pub mod linkedin;
pub mod takeout;

pub use base::{AdapterOutput, AdapterSettings, AdapterUtils, RecordBudget, SourceAdapter};
pub use csv::CsvAdapter;
pub use facebook::FacebookAdapter;
pub use ics::IcsAdapter;
pub use linkedin::LinkedInAdapter;
pub use takeout::TakeoutAdapter;

use crate::types::SourceKind;

/// Build the adapter for a declared source kind.
pub fn adapter_for(kind: SourceKind, settings: AdapterSettings) -> Box<dyn SourceAdapter> {
    match kind {
        SourceKind::Facebook => Box::new(FacebookAdapter::new(settings)),
        SourceKind::LinkedIn => Box::new(LinkedInAdapter::new(settings)),
        SourceKind::GoogleTakeout => Box::new(TakeoutAdapter::new(settings)),
        SourceKind::Ical => Box::new(IcsAdapter::new(settings)),
        SourceKind::Csv => Box::new(CsvAdapter::new(settings)),
    }
}
