/// Safety limits applied while importing untrusted export files.
/// These are part of the import contract and are deliberately not configurable.

// Whole-file limits
pub const MAX_FILE_SIZE_BYTES: u64 = 500 * 1024 * 1024;

// Archive limits
pub const MAX_ARCHIVE_MEMBERS: usize = 50_000;
pub const MAX_MEMBER_UNCOMPRESSED_BYTES: u64 = 200 * 1024 * 1024;
pub const MAX_ARCHIVE_UNCOMPRESSED_BYTES: u64 = 2 * 1024 * 1024 * 1024;
pub const MAX_ARCHIVE_NESTING: usize = 1;

// Binary image metadata limits
pub const MAX_IFD_ENTRIES: usize = 500;
pub const MAX_EXIF_STRING_CHARS: usize = 10_000;
pub const MAX_EXIF_ARRAY_ELEMENTS: usize = 1_000;
pub const MAX_EXIF_ARRAY_BYTES: usize = 1_000_000;
pub const MIN_EXIF_YEAR: i32 = 1970;

// Tabular limits
pub const MAX_TABULAR_LINE_LENGTH: usize = 100_000;
pub const MAX_TABULAR_COLUMNS: usize = 200;
pub const MAX_TABULAR_ROWS: usize = 100_000;
pub const MAX_TABULAR_CELL_LENGTH: usize = 10_000;

// Calendar limits
pub const MAX_CALENDAR_ENTRIES: usize = 10_000;
pub const MAX_CALENDAR_LINE_LENGTH: usize = 10_000;
pub const MAX_CALENDAR_PROPERTY_LENGTH: usize = 50_000;

// Cloud export per-run limits
pub const MAX_TAKEOUT_LOCATION_POINTS: usize = 50_000;
pub const MAX_TAKEOUT_CALENDAR_ENTRIES: usize = 10_000;
pub const MAX_TAKEOUT_NOTES: usize = 10_000;

// Canonical event field limits
pub const MAX_TITLE_CHARS: usize = 500;
pub const MAX_DESCRIPTION_CHARS: usize = 10_000;
pub const MAX_EVENT_TYPE_CHARS: usize = 100;
pub const MIN_EVENT_YEAR: i32 = 1900;
pub const MAX_EVENT_YEAR: i32 = 2100;

// Titles synthesized from free text are cut to this many characters
pub const SYNTHESIZED_TITLE_CHARS: usize = 100;

/// Bonus added to the travel layer score when the text comes with a location.
pub const TRAVEL_LOCATION_BONUS: usize = 2;
