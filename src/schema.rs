//! Scan request, evidence and result types.
//!
//! Everything here is created fresh per scan and serialized straight into the
//! HTTP response; nothing is persisted.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An uploaded card photo.
#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub filename: String,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

impl ScanRequest {
    pub fn new(filename: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            content_type: None,
            data,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// Energy types as the catalog spells them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CardType {
    Fire,
    Water,
    Grass,
    Lightning,
    Psychic,
    Fighting,
    Darkness,
    Metal,
    Fairy,
    Dragon,
    Colorless,
}

impl CardType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fire => "fire",
            Self::Water => "water",
            Self::Grass => "grass",
            Self::Lightning => "lightning",
            Self::Psychic => "psychic",
            Self::Fighting => "fighting",
            Self::Darkness => "darkness",
            Self::Metal => "metal",
            Self::Fairy => "fairy",
            Self::Dragon => "dragon",
            Self::Colorless => "colorless",
        }
    }
}

impl fmt::Display for CardType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured fields recovered from the card text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldAnalysis {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pokemon_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hp: Option<u32>,
    /// Verbatim `NNN/MMM` as printed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub card_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub card_type: Option<CardType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detected_series: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detected_acronym: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rarity: Option<String>,
    pub confidence: f64,
}

impl FieldAnalysis {
    /// An analysis with no recognised field.
    pub fn empty(base_confidence: f64) -> Self {
        Self {
            pokemon_name: None,
            hp: None,
            card_number: None,
            card_type: None,
            detected_series: None,
            detected_acronym: None,
            rarity: None,
            confidence: clamp_confidence(base_confidence),
        }
    }
}

/// Set metadata attached to a catalog record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardSet {
    pub id: String,
    pub name: String,
    pub series: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u32>,
}

/// A card as returned by the catalog collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogRecord {
    pub id: String,
    pub name: String,
    pub number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub set: Option<CardSet>,
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hp: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rarity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

/// Which signal contributed to a candidate's confidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvidenceTag {
    Name,
    Number,
    Type,
    Series,
    Illustration,
}

/// How a candidate entered the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateOrigin {
    NameSearch,
    NumberSearch,
    SeriesProbe,
}

/// A catalog record proposed as a match, with its score.
#[derive(Debug, Clone, Serialize)]
pub struct CandidateCard {
    #[serde(flatten)]
    pub record: CatalogRecord,
    pub confidence: f64,
    pub matched_by: Vec<EvidenceTag>,
    pub origin: CandidateOrigin,
    pub analysis: FieldAnalysis,
}

impl CandidateCard {
    pub fn id(&self) -> &str {
        &self.record.id
    }

    pub fn has_tag(&self, tag: EvidenceTag) -> bool {
        self.matched_by.contains(&tag)
    }

    /// Record a tag once; `matched_by` behaves as an insertion-ordered set.
    pub fn add_tag(&mut self, tag: EvidenceTag) {
        if !self.has_tag(tag) {
            self.matched_by.push(tag);
        }
    }

    pub fn boost(&mut self, bonus: f64) {
        self.confidence = clamp_confidence(self.confidence + bonus);
    }
}

/// What the illustration suggests, independent of the text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualAnalysis {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detected_subject: Option<String>,
    pub confidence: f64,
    pub color_tags: Vec<String>,
    pub feature_tags: Vec<String>,
}

impl VisualAnalysis {
    /// No visual evidence at all.
    pub fn neutral() -> Self {
        Self {
            detected_subject: None,
            confidence: 0.0,
            color_tags: Vec::new(),
            feature_tags: Vec::new(),
        }
    }
}

/// Deduplicated, confidence-ordered, capped candidates.
pub type RankedResult = Vec<CandidateCard>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Completed,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    TextExtraction,
    CatalogSearch,
    VisualAnalysis,
}

/// A stage that fell back to neutral evidence.
#[derive(Debug, Clone, Serialize)]
pub struct DegradedStage {
    pub stage: Stage,
    pub message: String,
}

/// Outcome of one scan.
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub scan_id: String,
    pub filename: String,
    pub image_digest: String,
    pub status: ScanStatus,
    pub analysis: FieldAnalysis,
    pub visual: VisualAnalysis,
    pub candidates: RankedResult,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub degraded: Vec<DegradedStage>,
}

/// Keep a confidence within `[0, 1]`.
pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> CatalogRecord {
        CatalogRecord {
            id: id.to_string(),
            name: "Pikachu".to_string(),
            number: "25".to_string(),
            set: None,
            types: vec!["Lightning".to_string()],
            hp: Some(60),
            rarity: None,
            image_url: None,
        }
    }

    #[test]
    fn test_clamp_confidence() {
        assert_eq!(clamp_confidence(1.35), 1.0);
        assert_eq!(clamp_confidence(-0.2), 0.0);
        assert_eq!(clamp_confidence(f64::NAN), 0.0);
        assert_eq!(clamp_confidence(0.65), 0.65);
    }

    #[test]
    fn test_tags_behave_as_set() {
        let mut card = CandidateCard {
            record: record("base1-58"),
            confidence: 0.9,
            matched_by: vec![EvidenceTag::Name],
            origin: CandidateOrigin::NameSearch,
            analysis: FieldAnalysis::empty(0.5),
        };
        card.add_tag(EvidenceTag::Illustration);
        card.add_tag(EvidenceTag::Illustration);
        card.add_tag(EvidenceTag::Name);
        assert_eq!(card.matched_by, vec![EvidenceTag::Name, EvidenceTag::Illustration]);

        card.boost(0.2);
        assert_eq!(card.confidence, 1.0);
    }

    #[test]
    fn test_candidate_serializes_flat() {
        let card = CandidateCard {
            record: record("base1-58"),
            confidence: 0.8,
            matched_by: vec![EvidenceTag::Name, EvidenceTag::Number],
            origin: CandidateOrigin::NameSearch,
            analysis: FieldAnalysis::empty(0.5),
        };
        let json = serde_json::to_value(&card).unwrap();
        assert_eq!(json["id"], "base1-58");
        assert_eq!(json["matched_by"], serde_json::json!(["name", "number"]));
        assert_eq!(json["origin"], "name_search");
    }
}
