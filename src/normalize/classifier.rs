use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};

use crate::constants::TRAVEL_LOCATION_BONUS;
use crate::types::Layer;

/// Layers in ascending priority. On equal scores the earlier layer wins.
pub const LAYER_PRIORITY: [Layer; 7] = [
    Layer::Media,
    Layer::Economics,
    Layer::Education,
    Layer::Relationships,
    Layer::Health,
    Layer::Work,
    Layer::Travel,
];

const ECONOMICS_KEYWORDS: &[&str] = &[
    "bank", "budget", "salary", "paycheck", "mortgage", "loan", "debt", "invest", "investment",
    "stock", "stocks", "savings", "tax", "taxes", "rent", "bought", "purchase", "sold", "bitcoin",
    "crypto", "insurance", "pension", "retirement fund", "credit card", "bonus", "inheritance",
    "house closing", "down payment", "refund", "raise",
];

const EDUCATION_KEYWORDS: &[&str] = &[
    "school", "university", "college", "graduation", "graduated", "degree", "diploma", "course",
    "class", "exam", "exams", "lecture", "thesis", "dissertation", "semester", "bachelor",
    "master", "masters", "phd", "certificate", "certification", "bootcamp", "tutor", "homework",
    "study", "studying", "scholarship", "enrolled", "kindergarten", "workshop",
];

const WORK_KEYWORDS: &[&str] = &[
    "work", "job", "new job", "career", "office", "meeting", "promotion", "promoted", "hired",
    "interview", "manager", "colleague", "colleagues", "coworker", "project", "deadline",
    "client", "conference", "startup", "company", "employer", "internship", "intern", "resigned",
    "fired", "laid off", "standup", "offsite", "onboarding", "contract",
];

const HEALTH_KEYWORDS: &[&str] = &[
    "doctor", "hospital", "clinic", "dentist", "surgery", "therapy", "therapist", "gym",
    "workout", "run", "running", "marathon", "yoga", "diet", "sick", "flu", "covid", "vaccine",
    "vaccination", "checkup", "physio", "injury", "diagnosis", "medication", "pregnant",
    "pregnancy", "birth", "meditation", "fitness", "blood test",
];

const RELATIONSHIPS_KEYWORDS: &[&str] = &[
    "friend", "friends", "family", "wedding", "married", "engaged", "engagement", "girlfriend",
    "boyfriend", "wife", "husband", "partner", "date night", "anniversary", "birthday", "party",
    "mom", "dad", "mother", "father", "sister", "brother", "grandma", "grandpa", "baby",
    "reunion", "divorce", "funeral", "dinner with", "became friends",
];

const TRAVEL_KEYWORDS: &[&str] = &[
    "trip", "travel", "traveling", "travelling", "vacation", "holiday", "flight", "airport",
    "hotel", "hostel", "airbnb", "beach", "road trip", "visited", "visiting", "abroad",
    "passport", "cruise", "backpacking", "sightseeing", "tour", "journey", "train station",
    "landed", "boarding", "itinerary", "camping", "hiking", "roadtrip", "getaway",
];

const MEDIA_KEYWORDS: &[&str] = &[
    "photo", "photos", "video", "videos", "album", "movie", "film", "music", "song", "concert",
    "podcast", "book", "reading", "playlist", "netflix", "youtube", "selfie", "picture",
    "pictures", "camera", "instagram", "blog", "article", "episode", "series", "gallery",
    "livestream", "stream", "game", "gaming",
];

fn keywords_for(layer: Layer) -> &'static [&'static str] {
    match layer {
        Layer::Economics => ECONOMICS_KEYWORDS,
        Layer::Education => EDUCATION_KEYWORDS,
        Layer::Work => WORK_KEYWORDS,
        Layer::Health => HEALTH_KEYWORDS,
        Layer::Relationships => RELATIONSHIPS_KEYWORDS,
        Layer::Travel => TRAVEL_KEYWORDS,
        Layer::Media => MEDIA_KEYWORDS,
    }
}

struct CompiledKeyword {
    keyword: &'static str,
    pattern: Regex,
}

static KEYWORD_TABLE: Lazy<Vec<(Layer, Vec<CompiledKeyword>)>> = Lazy::new(|| {
    LAYER_PRIORITY
        .iter()
        .map(|&layer| {
            let compiled = keywords_for(layer)
                .iter()
                .map(|&keyword| CompiledKeyword {
                    keyword,
                    pattern: Regex::new(&format!(r"\b{}\b", regex::escape(keyword)))
                        .expect("keyword patterns are escaped literals"),
                })
                .collect();
            (layer, compiled)
        })
        .collect()
});

#[derive(Debug, Clone, Copy)]
pub struct ClassifyOptions {
    /// The text came with coordinates or a place name.
    pub has_location: bool,
    /// Best scores below this fall back to `default_layer`.
    pub min_score: usize,
    pub default_layer: Layer,
}

impl Default for ClassifyOptions {
    fn default() -> Self {
        Self {
            has_location: false,
            min_score: 1,
            default_layer: Layer::Media,
        }
    }
}

impl ClassifyOptions {
    pub fn with_location(mut self, has_location: bool) -> Self {
        self.has_location = has_location;
        self
    }

    pub fn with_default(mut self, layer: Layer) -> Self {
        self.default_layer = layer;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub layer: Layer,
    pub score: usize,
    pub matched_keywords: Vec<String>,
}

/// Lower-case the text and strip diacritics so "Café" matches "cafe".
pub fn fold_text(text: &str) -> String {
    text.nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase()
}

/// Assign a life layer to free text by counting distinct keyword hits.
pub fn classify(text: &str, options: &ClassifyOptions) -> Classification {
    let folded = fold_text(text);

    let mut best_layer = options.default_layer;
    let mut best_score = 0usize;
    let mut best_matches: Vec<String> = Vec::new();

    for (layer, keywords) in KEYWORD_TABLE.iter() {
        let matches: BTreeSet<&str> = keywords
            .iter()
            .filter(|k| k.pattern.is_match(&folded))
            .map(|k| k.keyword)
            .collect();

        let mut score = matches.len();
        if *layer == Layer::Travel && options.has_location {
            score += TRAVEL_LOCATION_BONUS;
        }

        // Strictly greater: equal scores keep the earlier layer.
        if score > best_score {
            best_layer = *layer;
            best_score = score;
            best_matches = matches.into_iter().map(str::to_string).collect();
        }
    }

    if best_score < options.min_score.max(1) {
        return Classification {
            layer: options.default_layer,
            score: 0,
            matched_keywords: Vec::new(),
        };
    }

    Classification {
        layer: best_layer,
        score: best_score,
        matched_keywords: best_matches,
    }
}

/// Classifier bound to the configured minimum score and fallback layer.
#[derive(Debug, Clone, Copy)]
pub struct LayerClassifier {
    min_score: usize,
    default_layer: Layer,
}

impl Default for LayerClassifier {
    fn default() -> Self {
        Self::new(1, Layer::Media)
    }
}

impl LayerClassifier {
    pub fn new(min_score: usize, default_layer: Layer) -> Self {
        Self {
            min_score,
            default_layer,
        }
    }

    pub fn options(&self) -> ClassifyOptions {
        ClassifyOptions {
            has_location: false,
            min_score: self.min_score,
            default_layer: self.default_layer,
        }
    }

    pub fn classify(&self, text: &str, has_location: bool) -> Classification {
        classify(text, &self.options().with_location(has_location))
    }

    pub fn classify_or(&self, text: &str, has_location: bool, fallback: Layer) -> Classification {
        classify(
            text,
            &self.options().with_location(has_location).with_default(fallback),
        )
    }
}
