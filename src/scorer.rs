//! Per-candidate confidence from a catalog record and the field analysis.

use crate::config::ScoringWeights;
use crate::schema::{
    clamp_confidence, CandidateCard, CandidateOrigin, CatalogRecord, EvidenceTag, FieldAnalysis,
};

/// Scores catalog records against what the text said.
#[derive(Debug, Clone)]
pub struct CandidateScorer {
    weights: ScoringWeights,
}

impl CandidateScorer {
    pub fn new(weights: ScoringWeights) -> Self {
        Self { weights }
    }

    /// Build a candidate. Series-probe candidates get a flat score; the others
    /// start from their origin's base and collect each bonus at most once.
    pub fn score(&self, record: CatalogRecord, fields: &FieldAnalysis, origin: CandidateOrigin) -> CandidateCard {
        let w = &self.weights;

        let (base, tag) = match origin {
            CandidateOrigin::NameSearch => (w.name_match_base, EvidenceTag::Name),
            CandidateOrigin::NumberSearch => (w.number_match_base, EvidenceTag::Number),
            CandidateOrigin::SeriesProbe => (w.series_probe_base, EvidenceTag::Series),
        };

        let mut card = CandidateCard {
            record,
            confidence: clamp_confidence(base),
            matched_by: vec![tag],
            origin,
            analysis: fields.clone(),
        };

        if origin == CandidateOrigin::SeriesProbe {
            return card;
        }

        if !card.has_tag(EvidenceTag::Number) && number_matches(&card.record, fields) {
            card.boost(w.candidate_number_bonus);
            card.add_tag(EvidenceTag::Number);
        }

        if let Some(card_type) = fields.card_type {
            if card
                .record
                .types
                .iter()
                .any(|t| t.eq_ignore_ascii_case(card_type.as_str()))
            {
                card.boost(w.candidate_type_bonus);
                card.add_tag(EvidenceTag::Type);
            }
        }

        if fields
            .detected_series
            .as_deref()
            .is_some_and(|series| in_series(&card.record, series))
        {
            card.boost(w.candidate_series_bonus);
            card.add_tag(EvidenceTag::Series);
        }

        if let (Some(extracted), Some(hp)) = (fields.hp, card.record.hp) {
            if extracted.abs_diff(hp) <= w.hp_tolerance {
                card.boost(w.candidate_hp_bonus);
            }
        }

        card
    }
}

/// `"<number>/<set total>"` contains the printed number, or the printed number
/// contains the record's number.
fn number_matches(record: &CatalogRecord, fields: &FieldAnalysis) -> bool {
    let Some(extracted) = fields.card_number.as_deref() else {
        return false;
    };
    if record.number.is_empty() {
        return false;
    }

    let total = record
        .set
        .as_ref()
        .and_then(|s| s.total)
        .map(|t| t.to_string())
        .unwrap_or_default();
    let composite = format!("{}/{}", record.number, total);

    composite.contains(extracted) || extracted.contains(record.number.as_str())
}

/// Case-insensitive: set series or set name contains the detected series.
pub fn in_series(record: &CatalogRecord, series: &str) -> bool {
    let series = series.to_lowercase();
    record.set.as_ref().is_some_and(|set| {
        set.series.to_lowercase().contains(&series) || set.name.to_lowercase().contains(&series)
    })
}
