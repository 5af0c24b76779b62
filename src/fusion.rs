//! Evidence fusion and ranking.
//!
//! Merges the illustration verdict into the text-based candidate scores, then
//! deduplicates by catalog id, orders by confidence and applies the cap.

use std::cmp::Ordering;
use std::collections::HashSet;
use tracing::debug;

use crate::schema::{CandidateCard, EvidenceTag, RankedResult, VisualAnalysis};

/// Fusion knobs, lifted out of `ScannerConfig`.
#[derive(Debug, Clone, Copy)]
pub struct FusionSettings {
    pub illustration_bonus: f64,
    pub result_cap: usize,
}

/// Combine text candidates with the visual verdict and rank them.
///
/// With both an extracted name and a visual subject, the boost applies only
/// when the two agree (equal, or one contains the other). With only a visual
/// subject, candidates named after it are boosted.
pub fn fuse(
    mut candidates: Vec<CandidateCard>,
    visual: &VisualAnalysis,
    extracted_name: Option<&str>,
    settings: FusionSettings,
) -> RankedResult {
    if let Some(terms) = boost_terms(visual, extracted_name) {
        let mut boosted = 0usize;
        for card in candidates.iter_mut() {
            let name = card.record.name.to_lowercase();
            if terms.iter().any(|t| name.contains(t.as_str())) {
                card.boost(settings.illustration_bonus);
                card.add_tag(EvidenceTag::Illustration);
                boosted += 1;
            }
        }
        debug!(terms = ?terms, boosted, "Illustration boost applied");
    }

    let mut ranked = dedupe_by_id(candidates);
    rank_by_confidence(&mut ranked);
    ranked.truncate(settings.result_cap);
    ranked
}

/// Lowercased names a candidate must contain to receive the illustration
/// boost, or `None` when the visual evidence does not support a boost.
fn boost_terms(visual: &VisualAnalysis, extracted_name: Option<&str>) -> Option<Vec<String>> {
    let subject = visual
        .detected_subject
        .as_deref()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())?;

    match extracted_name.map(|n| n.trim().to_lowercase()).filter(|n| !n.is_empty()) {
        Some(name) => {
            let agree = subject == name || subject.contains(&name) || name.contains(&subject);
            agree.then(|| vec![subject, name])
        }
        None => Some(vec![subject]),
    }
}

/// First occurrence of each catalog id wins, with its score as it stands.
pub fn dedupe_by_id(candidates: Vec<CandidateCard>) -> Vec<CandidateCard> {
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|c| seen.insert(c.id().to_string()))
        .collect()
}

/// Stable sort, highest confidence first; ties keep insertion order.
pub fn rank_by_confidence(candidates: &mut [CandidateCard]) {
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{CandidateOrigin, CatalogRecord, FieldAnalysis};

    const SETTINGS: FusionSettings = FusionSettings {
        illustration_bonus: 0.2,
        result_cap: 20,
    };

    fn candidate(id: &str, name: &str, confidence: f64) -> CandidateCard {
        CandidateCard {
            record: CatalogRecord {
                id: id.to_string(),
                name: name.to_string(),
                number: "1".to_string(),
                set: None,
                types: Vec::new(),
                hp: None,
                rarity: None,
                image_url: None,
            },
            confidence,
            matched_by: vec![EvidenceTag::Name],
            origin: CandidateOrigin::NameSearch,
            analysis: FieldAnalysis::empty(0.5),
        }
    }

    fn visual(subject: Option<&str>) -> VisualAnalysis {
        VisualAnalysis {
            detected_subject: subject.map(str::to_string),
            confidence: 0.85,
            color_tags: Vec::new(),
            feature_tags: Vec::new(),
        }
    }

    fn ids(result: &RankedResult) -> Vec<&str> {
        result.iter().map(|c| c.id()).collect()
    }

    #[test]
    fn test_visual_only_boosts_matching_names() {
        let candidates = vec![
            candidate("a", "Pikachu", 0.6),
            candidate("b", "Charizard", 0.6),
            candidate("c", "Charizard ex", 0.5),
        ];
        let result = fuse(candidates, &visual(Some("charizard")), None, SETTINGS);

        assert_eq!(ids(&result), vec!["b", "c", "a"]);
        assert!((result[0].confidence - 0.8).abs() < 1e-9);
        assert!(result[0].has_tag(EvidenceTag::Illustration));
        assert!(result[1].has_tag(EvidenceTag::Illustration));
        assert_eq!(result[2].confidence, 0.6);
        assert!(!result[2].has_tag(EvidenceTag::Illustration));
    }

    #[test]
    fn test_agreeing_name_boosts() {
        let candidates = vec![candidate("a", "Pikachu V", 0.9), candidate("b", "Raichu", 0.7)];
        let result = fuse(candidates, &visual(Some("pikachu")), Some("Pikachu"), SETTINGS);

        assert_eq!(result[0].confidence, 1.0);
        assert!(result[0].has_tag(EvidenceTag::Illustration));
        assert!(!result[1].has_tag(EvidenceTag::Illustration));
    }

    #[test]
    fn test_disagreeing_name_blocks_boost() {
        let candidates = vec![candidate("a", "Pikachu", 0.6), candidate("b", "Charizard", 0.6)];
        let result = fuse(candidates, &visual(Some("charizard")), Some("Pikachu"), SETTINGS);

        assert!(result.iter().all(|c| c.confidence == 0.6));
        assert!(result.iter().all(|c| !c.has_tag(EvidenceTag::Illustration)));
        assert_eq!(ids(&result), vec!["a", "b"]);
    }

    #[test]
    fn test_no_subject_no_boost() {
        let candidates = vec![candidate("a", "Pikachu", 0.6)];
        let result = fuse(candidates, &VisualAnalysis::neutral(), Some("Pikachu"), SETTINGS);
        assert_eq!(result[0].confidence, 0.6);
    }

    #[test]
    fn test_illustration_tag_added_once() {
        let mut card = candidate("a", "Pikachu", 0.5);
        card.matched_by.push(EvidenceTag::Illustration);
        let result = fuse(vec![card], &visual(Some("pikachu")), None, SETTINGS);
        assert_eq!(result[0].matched_by, vec![EvidenceTag::Name, EvidenceTag::Illustration]);
    }

    #[test]
    fn test_first_duplicate_wins_not_max() {
        let candidates = vec![
            candidate("a", "Pikachu", 0.4),
            candidate("b", "Raichu", 0.5),
            candidate("a", "Pikachu", 0.9),
        ];
        let result = fuse(candidates, &VisualAnalysis::neutral(), None, SETTINGS);

        assert_eq!(ids(&result), vec!["b", "a"]);
        assert_eq!(result[1].confidence, 0.4);
    }

    #[test]
    fn test_cap_and_stable_order() {
        let candidates: Vec<CandidateCard> = (0..35)
            .map(|i| candidate(&format!("card-{i}"), "Pikachu", 0.6))
            .collect();
        let result = fuse(candidates, &VisualAnalysis::neutral(), None, SETTINGS);

        assert_eq!(result.len(), 20);
        let expected: Vec<String> = (0..20).map(|i| format!("card-{i}")).collect();
        assert_eq!(ids(&result), expected.iter().map(String::as_str).collect::<Vec<_>>());
    }

    #[test]
    fn test_order_non_increasing_and_ids_unique() {
        let candidates = vec![
            candidate("a", "Mew", 0.4),
            candidate("b", "Mewtwo", 0.9),
            candidate("c", "Mew ex", 0.6),
            candidate("b", "Mewtwo", 0.1),
            candidate("d", "Lugia", 0.75),
        ];
        let result = fuse(candidates, &visual(Some("mew")), Some("mew"), SETTINGS);

        assert!(result.windows(2).all(|w| w[0].confidence >= w[1].confidence));
        let unique: HashSet<&str> = result.iter().map(|c| c.id()).collect();
        assert_eq!(unique.len(), result.len());
        assert!(result.iter().all(|c| (0.0..=1.0).contains(&c.confidence)));
    }
}
