use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use typebleed_core::{Codepoint, TypeBleedConfig};

const CURRENCY_SIGNS: &str = "€£¥₿$";

/// Two-letter country codes whose IBANs are common enough to flag.
const IBAN_COUNTRIES: [&str; 8] = ["FI", "DE", "GB", "FR", "NL", "SE", "ES", "IT"];

/// Heuristic content hints derived from a captured set alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectedPattern {
    /// A currency sign together with digits.
    CurrencyAmount,
    /// Both cases present: proper nouns or sentences.
    MixedCase,
    /// The letters of a country code together with digits.
    IbanPrefix,
    /// `@` was rendered.
    EmailAddress,
}

/// Breakdown of a captured character set by class.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CharacterProfile {
    pub total_unique: usize,
    pub uppercase: String,
    pub lowercase: String,
    pub digits: String,
    /// Neither alphanumeric nor space.
    pub special: String,
    pub patterns: Vec<DetectedPattern>,
    /// Country codes whose letters were all captured, when digits were too.
    pub iban_countries: Vec<String>,
}

impl CharacterProfile {
    pub fn of(captured: &BTreeSet<Codepoint>) -> Self {
        let chars: BTreeSet<char> = captured.iter().filter_map(|cp| cp.to_char()).collect();
        let pick = |keep: fn(&char) -> bool| -> String { chars.iter().copied().filter(keep).collect() };

        let uppercase = pick(|c| c.is_uppercase());
        let lowercase = pick(|c| c.is_lowercase());
        let digits = pick(|c| c.is_ascii_digit());
        let special = pick(|c| !c.is_alphanumeric() && *c != ' ');

        let has_digits = !digits.is_empty();
        let iban_countries: Vec<String> = if has_digits {
            IBAN_COUNTRIES
                .iter()
                .filter(|code| code.chars().all(|c| chars.contains(&c)))
                .map(|code| code.to_string())
                .collect()
        } else {
            Vec::new()
        };

        let mut patterns = Vec::new();
        if has_digits && CURRENCY_SIGNS.chars().any(|c| chars.contains(&c)) {
            patterns.push(DetectedPattern::CurrencyAmount);
        }
        if !uppercase.is_empty() && !lowercase.is_empty() {
            patterns.push(DetectedPattern::MixedCase);
        }
        if !iban_countries.is_empty() {
            patterns.push(DetectedPattern::IbanPrefix);
        }
        if chars.contains(&'@') {
            patterns.push(DetectedPattern::EmailAddress);
        }

        Self {
            total_unique: captured.len(),
            uppercase,
            lowercase,
            digits,
            special,
            patterns,
            iban_countries,
        }
    }
}

/// Named word lists used to guess which words a page may contain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lexicon {
    categories: BTreeMap<String, Vec<String>>,
}

impl Default for Lexicon {
    fn default() -> Self {
        let builtin: [(&str, &[&str]); 2] = [
            (
                "banking",
                &[
                    "account", "balance", "transfer", "payment", "salary", "credit", "debit",
                    "card", "savings", "iban", "transaction", "amount", "total", "euro",
                    "statement", "deposit", "interest", "loan", "mortgage", "fee", "refund",
                    "pending", "password", "login", "session",
                ],
            ),
            (
                "common",
                &[
                    "the", "and", "that", "have", "for", "not", "with", "you", "this", "from",
                    "they", "will", "your", "there", "what", "about", "which", "when", "time",
                    "people", "year", "other", "than", "then", "only", "after", "first", "new",
                ],
            ),
        ];
        Self::new(
            builtin
                .iter()
                .map(|(name, words)| {
                    (name.to_string(), words.iter().map(|w| w.to_string()).collect())
                })
                .collect(),
        )
    }
}

impl Lexicon {
    pub fn new(categories: BTreeMap<String, Vec<String>>) -> Self {
        Self { categories }
    }

    /// The configured word lists, or the built-in ones when none are set.
    pub fn from_config(config: &TypeBleedConfig) -> Self {
        if config.lexicon.is_empty() {
            Self::default()
        } else {
            Self::new(config.lexicon.clone())
        }
    }

    pub fn is_empty(&self) -> bool {
        self.categories.values().all(Vec::is_empty)
    }

    /// Words spellable from the captured set, case-insensitively, per
    /// category: longest first, then alphabetical. Categories with no hit
    /// are omitted.
    pub fn infer(&self, captured: &BTreeSet<Codepoint>) -> BTreeMap<String, Vec<String>> {
        let available: BTreeSet<char> = captured
            .iter()
            .filter_map(|cp| cp.to_char())
            .flat_map(char::to_lowercase)
            .collect();

        self.categories
            .iter()
            .filter_map(|(category, words)| {
                let mut hits: Vec<String> = words
                    .iter()
                    .filter(|w| !w.is_empty())
                    .filter(|w| w.chars().flat_map(char::to_lowercase).all(|c| available.contains(&c)))
                    .cloned()
                    .collect();
                hits.sort_by(|a, b| {
                    b.chars().count().cmp(&a.chars().count()).then_with(|| a.cmp(b))
                });
                hits.dedup();
                (!hits.is_empty()).then(|| (category.clone(), hits))
            })
            .collect()
    }
}

