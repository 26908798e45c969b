//! Garment category classification by ordered keyword rules.
//!
//! The rule table is checked group by group in the fixed order
//! `UpperBody → LowerBody → FullBody`; the first group with any
//! case-insensitive substring hit wins. A description mentioning both a
//! jacket and a dress therefore resolves to `UpperBody`. Downstream
//! consumers rely on this tie-break, so it is kept as is.

use serde::Serialize;

use crate::types::Category;

const UPPER_BODY_KEYWORDS: &[&str] = &[
    "shirt", "t-shirt", "tee", "blouse", "top", "sweater", "hoodie", "jacket",
];

const LOWER_BODY_KEYWORDS: &[&str] = &["pants", "jeans", "shorts", "skirt", "trousers"];

const FULL_BODY_KEYWORDS: &[&str] = &["dress", "gown", "jumpsuit", "outfit", "suit"];

/// Ordered rule table. Order is the tie-break policy.
pub const CATEGORY_RULES: &[(Category, &[&str])] = &[
    (Category::UpperBody, UPPER_BODY_KEYWORDS),
    (Category::LowerBody, LOWER_BODY_KEYWORDS),
    (Category::FullBody, FULL_BODY_KEYWORDS),
];

/// Category used when nothing matches.
pub const DEFAULT_CATEGORY: Category = Category::UpperBody;

/// How a session's category was decided.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CategorySource {
    /// Carried by the selected catalog item.
    Hint,
    /// Keyword rule hit.
    Keyword(&'static str),
    /// No rule matched.
    Default,
}

/// Stateless, deterministic classifier over [`CATEGORY_RULES`].
#[derive(Clone, Copy, Debug, Default)]
pub struct CategoryClassifier;

impl CategoryClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Total: never fails, falls back to [`DEFAULT_CATEGORY`].
    pub fn classify(&self, text: &str) -> Category {
        self.first_match(text)
            .map(|(category, _)| category)
            .unwrap_or(DEFAULT_CATEGORY)
    }

    /// The winning rule and the keyword that triggered it.
    pub fn first_match(&self, text: &str) -> Option<(Category, &'static str)> {
        let lowered = text.to_lowercase();
        CATEGORY_RULES.iter().find_map(|(category, keywords)| {
            keywords
                .iter()
                .find(|kw| lowered.contains(*kw))
                .map(|kw| (*category, *kw))
        })
    }

    /// Resolve a session's category: an explicit hint wins, otherwise the
    /// description is classified.
    pub fn resolve(
        &self,
        hint: Option<Category>,
        description: Option<&str>,
    ) -> (Category, CategorySource) {
        if let Some(category) = hint {
            return (category, CategorySource::Hint);
        }
        match description.and_then(|d| self.first_match(d)) {
            Some((category, keyword)) => (category, CategorySource::Keyword(keyword)),
            None => (DEFAULT_CATEGORY, CategorySource::Default),
        }
    }
}
