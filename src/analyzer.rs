//! Lexical field analysis of extracted card text.
//!
//! Pure functions, no async. Patterns are compiled once when the analyzer is
//! built and the lookup tables are read-only, so one `FieldAnalyzer` is shared
//! by every scan.

use anyhow::{Context, Result};
use regex::Regex;
use tracing::debug;

use crate::config::{FieldPatterns, LookupTables, ScoringWeights};
use crate::schema::{clamp_confidence, FieldAnalysis};

/// Terms shorter than this only match whole words.
const MIN_SUBSTRING_TERM_LEN: usize = 3;

/// Pre-compiled patterns plus the dictionaries they are used with.
#[derive(Debug)]
pub struct FieldAnalyzer {
    hp: Regex,
    card_number: Regex,
    tables: LookupTables,
    weights: ScoringWeights,
    /// Folded stop words plus every type synonym.
    stop_words: Vec<String>,
}

impl FieldAnalyzer {
    pub fn new(patterns: &FieldPatterns, tables: LookupTables, weights: ScoringWeights) -> Result<Self> {
        let hp = Regex::new(&patterns.hp)
            .with_context(|| format!("Invalid hp pattern: {}", patterns.hp))?;
        let card_number = Regex::new(&patterns.card_number)
            .with_context(|| format!("Invalid card number pattern: {}", patterns.card_number))?;

        let mut stop_words: Vec<String> = tables
            .stop_words
            .iter()
            .chain(tables.type_synonyms.iter().map(|t| &t.word))
            .map(|w| normalize_name(w))
            .collect();
        stop_words.sort();
        stop_words.dedup();

        debug!(
            "FieldAnalyzer ready: {} stop words, {} acronyms, {} keyword sets",
            stop_words.len(),
            tables.series_acronyms.len(),
            tables.series_keywords.len()
        );

        Ok(Self {
            hp,
            card_number,
            tables,
            weights,
            stop_words,
        })
    }

    /// Parse card text into fields. Never fails; unmatched fields stay unset.
    pub fn analyze(&self, text: &str) -> FieldAnalysis {
        let w = &self.weights;
        let mut analysis = FieldAnalysis::empty(w.analysis_base);
        let mut confidence = w.analysis_base;
        let lower = text.to_lowercase();

        if let Some(name) = self.extract_name(text) {
            analysis.pokemon_name = Some(name);
            confidence += w.name_bonus;
        }

        if let Some(hp) = first_capture(&self.hp, text).and_then(|v| v.parse::<u32>().ok()) {
            analysis.hp = Some(hp);
            confidence += w.hp_bonus;
        }

        if let Some(number) = first_capture(&self.card_number, text) {
            analysis.card_number = Some(number);
            confidence += w.number_bonus;
        }

        if let Some(synonym) = self
            .tables
            .type_synonyms
            .iter()
            .find(|t| contains_word(&lower, &t.word.to_lowercase()))
        {
            analysis.card_type = Some(synonym.card_type);
            confidence += w.type_bonus;
        }

        if let Some(entry) = self
            .tables
            .series_acronyms
            .iter()
            .find(|a| contains_term(&lower, &a.acronym.to_lowercase()))
        {
            analysis.detected_acronym = Some(entry.acronym.clone());
            analysis.detected_series = Some(entry.series.clone());
            confidence += w.acronym_bonus;
        }

        for entry in &self.tables.series_keywords {
            if entry
                .keywords
                .iter()
                .any(|k| contains_term(&lower, &k.to_lowercase()))
            {
                if analysis.detected_series.is_none() {
                    analysis.detected_series = Some(entry.series.clone());
                }
                confidence += w.keyword_bonus;
            }
        }

        for rule in &self.tables.series_overrides {
            if rule
                .triggers
                .iter()
                .any(|t| contains_term(&lower, &t.to_lowercase()))
            {
                analysis.detected_series = Some(rule.series.clone());
                analysis.detected_acronym = Some(rule.acronym.clone());
                confidence += w.special_case_bonus;
            }
        }

        analysis.rarity = self.detect_rarity(&lower);
        analysis.confidence = clamp_confidence(confidence);

        debug!(
            name = ?analysis.pokemon_name,
            hp = ?analysis.hp,
            number = ?analysis.card_number,
            series = ?analysis.detected_series,
            confidence = analysis.confidence,
            "Field analysis complete"
        );

        analysis
    }

    /// First meaningful token of the first non-empty line.
    fn extract_name(&self, text: &str) -> Option<String> {
        let first_line = text.lines().map(str::trim).find(|l| !l.is_empty())?;

        first_line
            .split_whitespace()
            .map(|token| token.trim_matches(|c: char| !c.is_alphanumeric()))
            .find(|token| {
                token.chars().count() >= MIN_SUBSTRING_TERM_LEN
                    && token.chars().any(char::is_alphabetic)
                    && !self.is_stop_word(token)
            })
            .map(str::to_string)
    }

    fn is_stop_word(&self, token: &str) -> bool {
        self.stop_words.binary_search(&normalize_name(token)).is_ok()
    }

    /// Highest-priority rarity keyword present in the text.
    fn detect_rarity(&self, lower: &str) -> Option<String> {
        self.tables
            .rarities
            .iter()
            .filter(|r| contains_term(lower, &r.keyword.to_lowercase()))
            .fold(None::<&crate::config::RarityKeyword>, |best, r| match best {
                Some(b) if b.priority >= r.priority => Some(b),
                _ => Some(r),
            })
            .map(|r| r.keyword.clone())
    }
}

/// Lowercase, fold French accents, drop everything but ASCII alphanumerics.
pub fn normalize_name(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| match c {
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'à' | 'â' | 'ä' => 'a',
            'î' | 'ï' => 'i',
            'ô' | 'ö' => 'o',
            'ù' | 'û' | 'ü' => 'u',
            'ç' => 'c',
            other => other,
        })
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

fn first_capture(regex: &Regex, text: &str) -> Option<String> {
    let cap = regex.captures(text)?;
    cap.get(1)
        .or_else(|| cap.get(0))
        .map(|m| m.as_str().to_string())
        .filter(|v| !v.is_empty())
}

/// Substring match for terms of three characters or more, whole-word otherwise.
/// Both sides are expected in lowercase.
fn contains_term(haystack: &str, term: &str) -> bool {
    if term.chars().count() < MIN_SUBSTRING_TERM_LEN {
        contains_word(haystack, term)
    } else {
        !term.is_empty() && haystack.contains(term)
    }
}

/// True when `term` occurs delimited by non-alphanumeric characters.
fn contains_word(haystack: &str, term: &str) -> bool {
    if term.is_empty() {
        return false;
    }
    haystack.match_indices(term).any(|(start, _)| {
        let end = start + term.len();
        let before = haystack[..start].chars().next_back();
        let after = haystack[end..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}
