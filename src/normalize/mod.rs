//! Normalization primitives shared by every source adapter: the date
//! validation gate and the keyword-based layer classifier.

pub mod classifier;
pub mod dates;

pub use classifier::{classify, Classification, ClassifyOptions, LayerClassifier};
pub use dates::{create_valid_date, create_valid_day, parse_date, DateNormalizer, ValidDate};
