//! Scanner configuration: lookup tables, field patterns and scoring weights.
//!
//! Loaded once at startup from `configs/scanner.json` (or `SCANNER_CONFIG`) and
//! shared read-only behind an `Arc`. Every section carries `#[serde(default)]`
//! so a file may override only the values it cares about.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::schema::CardType;

const DEFAULT_CONFIG_PATH: &str = "configs/scanner.json";

/// Top-level scanner configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    pub weights: ScoringWeights,
    pub tables: LookupTables,
    pub patterns: FieldPatterns,
    pub search: SearchSettings,
    pub vision: VisionSettings,
}

impl ScannerConfig {
    /// Load from the path in `SCANNER_CONFIG`, or `configs/scanner.json`.
    ///
    /// A missing file is not an error: the built-in defaults apply.
    pub fn from_env() -> Result<Self> {
        let path = std::env::var("SCANNER_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let path = Path::new(&path);

        if !path.exists() {
            info!("No scanner config at {:?}, using built-in defaults", path);
            return Ok(Self::default());
        }

        Self::load(path)
    }

    /// Load a config file. Fields absent from the file keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scanner config: {:?}", path))?;

        let config: ScannerConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse scanner config: {:?}", path))?;

        info!(
            "Loaded scanner config from {:?} ({} acronyms, {} series keyword sets, {} type synonyms)",
            path,
            config.tables.series_acronyms.len(),
            config.tables.series_keywords.len(),
            config.tables.type_synonyms.len()
        );
        Ok(config)
    }
}

/// Empirical tuning values. None of these are invariants; recalibrate freely.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    /// Confidence of a field analysis before any field is recognised.
    pub analysis_base: f64,
    pub name_bonus: f64,
    pub hp_bonus: f64,
    pub number_bonus: f64,
    pub type_bonus: f64,
    pub acronym_bonus: f64,
    pub keyword_bonus: f64,
    pub special_case_bonus: f64,

    /// Base confidence of a candidate found by name.
    pub name_match_base: f64,
    /// Base confidence of a candidate found by card number alone.
    pub number_match_base: f64,
    /// Flat confidence of a candidate surfaced by a series probe.
    pub series_probe_base: f64,
    pub candidate_number_bonus: f64,
    pub candidate_type_bonus: f64,
    pub candidate_series_bonus: f64,
    pub candidate_hp_bonus: f64,
    pub hp_tolerance: u32,

    /// Boost applied when the illustration agrees with the text.
    pub illustration_bonus: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            analysis_base: 0.5,
            name_bonus: 0.2,
            hp_bonus: 0.1,
            number_bonus: 0.2,
            type_bonus: 0.1,
            acronym_bonus: 0.15,
            keyword_bonus: 0.1,
            special_case_bonus: 0.2,
            name_match_base: 0.6,
            number_match_base: 0.5,
            series_probe_base: 0.4,
            candidate_number_bonus: 0.2,
            candidate_type_bonus: 0.1,
            candidate_series_bonus: 0.15,
            candidate_hp_bonus: 0.1,
            hp_tolerance: 10,
            illustration_bonus: 0.2,
        }
    }
}

/// A set-code acronym and the series it designates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesAcronym {
    pub acronym: String,
    pub series: String,
}

/// Logo or series-name fragments that point at a series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesKeywords {
    pub series: String,
    pub keywords: Vec<String>,
}

/// A word (French or English) naming an element type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeSynonym {
    pub word: String,
    pub card_type: CardType,
}

/// Forces a series when any trigger appears; for series acronyms cannot disambiguate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesOverride {
    pub triggers: Vec<String>,
    pub series: String,
    pub acronym: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RarityKeyword {
    pub keyword: String,
    pub priority: f64,
}

/// Bilingual dictionaries used by the field analyzer. Order matters: the first
/// hit wins for acronyms and types.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LookupTables {
    pub stop_words: Vec<String>,
    pub type_synonyms: Vec<TypeSynonym>,
    pub series_acronyms: Vec<SeriesAcronym>,
    pub series_keywords: Vec<SeriesKeywords>,
    pub series_overrides: Vec<SeriesOverride>,
    pub rarities: Vec<RarityKeyword>,
}

impl Default for LookupTables {
    fn default() -> Self {
        use CardType::*;

        let type_synonyms = [
            ("feu", Fire),
            ("fire", Fire),
            ("eau", Water),
            ("water", Water),
            ("plante", Grass),
            ("grass", Grass),
            ("électrik", Lightning),
            ("electrik", Lightning),
            ("electric", Lightning),
            ("lightning", Lightning),
            ("psy", Psychic),
            ("psychic", Psychic),
            ("combat", Fighting),
            ("fighting", Fighting),
            ("poison", Psychic),
            ("sol", Fighting),
            ("ground", Fighting),
            ("roche", Fighting),
            ("rock", Fighting),
            ("vol", Colorless),
            ("flying", Colorless),
            ("insecte", Grass),
            ("bug", Grass),
            ("spectre", Psychic),
            ("ghost", Psychic),
            ("dragon", Dragon),
            ("ténèbres", Darkness),
            ("obscurité", Darkness),
            ("dark", Darkness),
            ("darkness", Darkness),
            ("acier", Metal),
            ("steel", Metal),
            ("metal", Metal),
            ("fée", Fairy),
            ("fairy", Fairy),
            ("incolore", Colorless),
            ("colorless", Colorless),
        ]
        .into_iter()
        .map(|(word, card_type)| TypeSynonym {
            word: word.to_string(),
            card_type,
        })
        .collect();

        // Specific set codes come before their family prefix so "swsh10" is
        // not reported as "swsh1" or "swsh".
        let series_acronyms = [
            ("swsh13", "Crown Zenith"),
            ("swsh12", "Silver Tempest"),
            ("swsh11", "Lost Origin"),
            ("swsh10", "Astral Radiance"),
            ("swsh9", "Brilliant Stars"),
            ("swsh8", "Fusion Strike"),
            ("swsh7", "Evolving Skies"),
            ("swsh6", "Chilling Reign"),
            ("swsh5", "Battle Styles"),
            ("swsh4", "Vivid Voltage"),
            ("swsh3", "Darkness Ablaze"),
            ("swsh2", "Rebel Clash"),
            ("swsh1", "Sword & Shield"),
            ("sv5", "Temporal Forces"),
            ("sv4", "Paradox Rift"),
            ("sv3", "Obsidian Flames"),
            ("sv2", "Paldea Evolved"),
            ("sv1", "Scarlet & Violet"),
            ("mew", "151"),
            ("swsh", "Sword & Shield"),
            ("hgss", "HeartGold & SoulSilver"),
            ("sv", "Scarlet & Violet"),
            ("sm", "Sun & Moon"),
            ("xy", "XY"),
            ("bw", "Black & White"),
            ("pl", "Platinum"),
            ("dp", "Diamond & Pearl"),
            ("celebrations", "Celebrations"),
            ("shining fates", "Shining Fates"),
            ("hidden fates", "Hidden Fates"),
            ("champions path", "Champion's Path"),
            ("evolutions", "Evolutions"),
            ("generations", "Generations"),
        ]
        .into_iter()
        .map(|(acronym, series)| SeriesAcronym {
            acronym: acronym.to_string(),
            series: series.to_string(),
        })
        .collect();

        let series_keywords = [
            ("Sword & Shield", &["sword", "shield", "épée", "bouclier", "swsh"][..]),
            ("Sun & Moon", &["sun", "moon", "soleil", "lune", "sm"][..]),
            ("XY", &["xy", "x", "y"][..]),
            ("Black & White", &["black", "white", "noir", "blanc", "bw"][..]),
            ("Diamond & Pearl", &["diamond", "pearl", "diamant", "perle", "dp"][..]),
            ("Scarlet & Violet", &["scarlet", "violet", "écarlate", "sv"][..]),
            ("Legends Arceus", &["legends", "arceus", "légendes"][..]),
            ("Brilliant Diamond", &["brilliant", "diamond", "diamant", "étincelant"][..]),
            ("Shining Pearl", &["shining", "pearl", "perle", "scintillante"][..]),
        ]
        .into_iter()
        .map(|(series, keywords)| SeriesKeywords {
            series: series.to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
        })
        .collect();

        let rarities = [
            ("common", 0.1),
            ("commune", 0.1),
            ("uncommon", 0.2),
            ("peu commune", 0.2),
            ("rare", 0.3),
            ("ultra rare", 0.8),
            ("secret rare", 0.9),
            ("rainbow rare", 0.95),
            ("gold", 0.9),
            ("prism", 0.85),
            ("gx", 0.7),
            ("ex", 0.6),
            ("v", 0.7),
            ("vmax", 0.8),
            ("vstar", 0.85),
        ]
        .into_iter()
        .map(|(keyword, priority)| RarityKeyword {
            keyword: keyword.to_string(),
            priority,
        })
        .collect();

        Self {
            stop_words: ["hp", "basic", "base", "stage", "pokemon", "pokémon"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            type_synonyms,
            series_acronyms,
            series_keywords,
            series_overrides: vec![SeriesOverride {
                triggers: vec!["151".to_string(), "mew".to_string()],
                series: "151".to_string(),
                acronym: "mew".to_string(),
            }],
            rarities,
        }
    }
}

/// Regex patterns for numeric fields. Each must have one capture group.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldPatterns {
    pub hp: String,
    pub card_number: String,
}

impl Default for FieldPatterns {
    fn default() -> Self {
        Self {
            hp: r"(?i)\bhp\s*(\d{1,3})".to_string(),
            card_number: r"(\d{1,3}/\d{2,3})".to_string(),
        }
    }
}

/// Catalog search limits and the series-probe fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    pub name_search_limit: usize,
    pub number_search_limit: usize,
    pub probe_limit: usize,
    /// Maximum number of probe searches in flight at once.
    pub probe_concurrency: usize,
    /// The series fallback runs only while the pool is smaller than this.
    pub fallback_min_pool: usize,
    pub probe_subjects: Vec<String>,
    /// Maximum candidates kept before and after fusion.
    pub result_cap: usize,
    pub request_timeout_secs: u64,
    /// Upper bound on any single collaborator call inside a scan.
    pub collaborator_timeout_secs: u64,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            name_search_limit: 50,
            number_search_limit: 20,
            probe_limit: 5,
            probe_concurrency: 3,
            fallback_min_pool: 5,
            probe_subjects: ["charizard", "pikachu", "mewtwo", "lugia", "ho-oh"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            result_cap: 20,
            request_timeout_secs: 30,
            collaborator_timeout_secs: 60,
        }
    }
}

impl SearchSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn collaborator_timeout(&self) -> Duration {
        Duration::from_secs(self.collaborator_timeout_secs)
    }
}

/// Filename fragment the palette analyzer maps to a subject.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectHint {
    pub fragment: String,
    pub subject: String,
    pub confidence: f64,
    #[serde(default)]
    pub features: Vec<String>,
}

/// Filename fragment mapped to a canned transcript for the demo extractor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptHint {
    pub fragment: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionSettings {
    pub subject_hints: Vec<SubjectHint>,
    /// Confidence reported when no subject is recognised.
    pub unknown_subject_confidence: f64,
    /// Share of sampled pixels a hue needs to be reported as a colour tag.
    pub min_color_share: f64,
    pub max_color_tags: usize,
    pub transcript_hints: Vec<TranscriptHint>,
    pub fallback_transcript: String,
}

impl Default for VisionSettings {
    fn default() -> Self {
        let hint = |fragment: &str, confidence: f64, features: &[&str]| SubjectHint {
            fragment: fragment.to_string(),
            subject: fragment.to_string(),
            confidence,
            features: features.iter().map(|f| f.to_string()).collect(),
        };
        let transcript = |fragment: &str, text: &str| TranscriptHint {
            fragment: fragment.to_string(),
            text: text.to_string(),
        };

        Self {
            subject_hints: vec![
                hint("pikachu", 0.9, &["tail", "cheeks", "ears"]),
                hint("charizard", 0.85, &["wings", "flame", "horns"]),
            ],
            unknown_subject_confidence: 0.3,
            min_color_share: 0.1,
            max_color_tags: 3,
            transcript_hints: vec![
                transcript(
                    "pikachu",
                    "Pikachu HP 60 Basic Pokémon Lightning 25th Anniversary Collection 001/025",
                ),
                transcript(
                    "charizard",
                    "Charizard HP 150 Stage 2 Fire Burning Energy 004/102 Base Set",
                ),
                transcript(
                    "mewtwo",
                    "Mewtwo HP 130 Psychic Basic Pokémon sv151 055/165",
                ),
            ],
            fallback_transcript: "Pokémon Card HP 80 Lightning Type 045/185 Scarlet Violet".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_tuning_values() {
        let config = ScannerConfig::default();
        assert_eq!(config.weights.analysis_base, 0.5);
        assert_eq!(config.weights.name_match_base, 0.6);
        assert_eq!(config.search.result_cap, 20);
        assert_eq!(config.search.probe_subjects.len(), 5);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "weights": {{ "illustration_bonus": 0.3 }}, "search": {{ "result_cap": 10 }} }}"#
        )
        .unwrap();

        let config = ScannerConfig::load(file.path()).unwrap();
        assert_eq!(config.weights.illustration_bonus, 0.3);
        assert_eq!(config.weights.name_bonus, 0.2);
        assert_eq!(config.search.result_cap, 10);
        assert_eq!(config.search.name_search_limit, 50);
        assert!(!config.tables.type_synonyms.is_empty());
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(ScannerConfig::load(file.path()).is_err());
    }

    #[test]
    fn test_type_synonyms_deserialize_lowercase() {
        let json = r#"{ "word": "blitz", "card_type": "lightning" }"#;
        let synonym: TypeSynonym = serde_json::from_str(json).unwrap();
        assert_eq!(synonym.card_type, CardType::Lightning);
    }
}
