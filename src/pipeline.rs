//! Card identification pipeline orchestrator.
//!
//! Stages run in order: text extraction → field analysis → candidate search →
//! visual analysis → fusion. A failing or panicking collaborator degrades its
//! stage to neutral evidence. Cancellation, or a panic in the orchestrator
//! itself, aborts the scan, which then reports zero candidates. `scan` itself
//! never fails.

use futures::FutureExt;
use sha2::{Digest, Sha256};
use std::any::Any;
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::analyzer::FieldAnalyzer;
use crate::catalog::CatalogSearch;
use crate::config::ScannerConfig;
use crate::error::ScanError;
use crate::fusion::{fuse, FusionSettings};
use crate::ocr::TextExtractor;
use crate::schema::{
    DegradedStage, FieldAnalysis, RankedResult, ScanReport, ScanRequest, ScanStatus, Stage,
    VisualAnalysis,
};
use crate::scorer::CandidateScorer;
use crate::search::CandidateSearch;
use crate::vision::VisualAnalyzer;

/// Race a collaborator call against cancellation and a timeout.
///
/// The outer `Err` means the scan was cancelled. The inner `Err` carries the
/// collaborator's failure, panic or timeout as a message for the degraded list.
pub(crate) async fn call_collaborator<T, E, F>(
    cancel: &CancellationToken,
    timeout: Duration,
    call: F,
) -> Result<Result<T, String>, ScanError>
where
    F: Future<Output = Result<T, E>>,
    E: Display,
{
    let guarded = AssertUnwindSafe(call).catch_unwind();
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ScanError::Cancelled),
        result = tokio::time::timeout(timeout, guarded) => Ok(match result {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(e))) => Err(e.to_string()),
            Ok(Err(panic)) => Err(panic_message(panic)),
            Err(_) => Err(format!("timed out after {:?}", timeout)),
        }),
    }
}

/// Pipeline orchestrator. Stateless across scans; share it behind an `Arc`.
pub struct CardScanner {
    extractor: Arc<dyn TextExtractor>,
    vision: Arc<dyn VisualAnalyzer>,
    analyzer: FieldAnalyzer,
    search: CandidateSearch,
    fusion: FusionSettings,
    base_confidence: f64,
    collaborator_timeout: Duration,
}

impl CardScanner {
    pub fn new(
        config: &ScannerConfig,
        extractor: Arc<dyn TextExtractor>,
        catalog: Arc<dyn CatalogSearch>,
        vision: Arc<dyn VisualAnalyzer>,
    ) -> anyhow::Result<Self> {
        let analyzer = FieldAnalyzer::new(&config.patterns, config.tables.clone(), config.weights.clone())?;
        let search = CandidateSearch::new(
            catalog,
            CandidateScorer::new(config.weights.clone()),
            config.search.clone(),
        );

        info!(
            "CardScanner ready: extractor={}, vision={}",
            extractor.name(),
            vision.name()
        );

        Ok(Self {
            extractor,
            vision,
            analyzer,
            search,
            fusion: FusionSettings {
                illustration_bonus: config.weights.illustration_bonus,
                result_cap: config.search.result_cap,
            },
            base_confidence: config.weights.analysis_base,
            collaborator_timeout: config.search.collaborator_timeout(),
        })
    }

    /// Identify the card in `request`. Always returns a report; failures show
    /// up as a non-`completed` status, `degraded` entries and fewer candidates.
    pub async fn scan(&self, request: &ScanRequest, cancel: &CancellationToken) -> ScanReport {
        let mut report = ScanReport {
            scan_id: Uuid::new_v4().to_string(),
            filename: request.filename.clone(),
            image_digest: {
                let mut hasher = Sha256::new();
                hasher.update(&request.data);
                format!("{:x}", hasher.finalize())
            },
            status: ScanStatus::Completed,
            analysis: FieldAnalysis::empty(self.base_confidence),
            visual: VisualAnalysis::neutral(),
            candidates: Vec::new(),
            degraded: Vec::new(),
        };

        info!(
            "Starting scan {} for {} ({} bytes)",
            report.scan_id,
            request.filename,
            request.data.len()
        );

        let outcome = AssertUnwindSafe(self.run_stages(request, cancel, &mut report))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(ScanError::Internal(panic_message(panic))));

        match outcome {
            Ok(candidates) => {
                report.candidates = candidates;
                info!(
                    "Scan {} complete: {} candidates, top={:?}, {} degraded stages",
                    report.scan_id,
                    report.candidates.len(),
                    report.candidates.first().map(|c| (&c.record.name, c.confidence)),
                    report.degraded.len()
                );
            }
            Err(ScanError::Cancelled) => {
                info!("Scan {} cancelled by caller", report.scan_id);
                report.status = ScanStatus::Cancelled;
                report.candidates.clear();
            }
            Err(e) => {
                error!("Scan {} failed: {}", report.scan_id, e);
                report.status = ScanStatus::Failed;
                report.candidates.clear();
            }
        }

        report
    }

    async fn run_stages(
        &self,
        request: &ScanRequest,
        cancel: &CancellationToken,
        report: &mut ScanReport,
    ) -> Result<RankedResult, ScanError> {
        // 1. Text extraction
        let text = match call_collaborator(cancel, self.collaborator_timeout, self.extractor.extract_text(request)).await? {
            Ok(text) => text,
            Err(e) => {
                warn!("Text extraction via {} failed: {}", self.extractor.name(), e);
                report.degraded.push(DegradedStage {
                    stage: Stage::TextExtraction,
                    message: e,
                });
                String::new()
            }
        };
        debug!("Extracted {} chars of text", text.len());

        // 2. Field analysis
        let analysis = self.analyzer.analyze(&text);
        report.analysis = analysis.clone();

        // 3. Candidate search and scoring
        let outcome = self.search.collect(&analysis, cancel).await?;
        report
            .degraded
            .extend(outcome.failures.into_iter().map(|message| DegradedStage {
                stage: Stage::CatalogSearch,
                message,
            }));

        // 4. Visual analysis
        let visual = match call_collaborator(cancel, self.collaborator_timeout, self.vision.analyze_image(request)).await? {
            Ok(visual) => visual,
            Err(e) => {
                warn!("Visual analysis via {} failed: {}", self.vision.name(), e);
                report.degraded.push(DegradedStage {
                    stage: Stage::VisualAnalysis,
                    message: e,
                });
                VisualAnalysis::neutral()
            }
        };
        report.visual = visual.clone();

        // 5. Fusion and ranking
        Ok(fuse(
            outcome.candidates,
            &visual,
            analysis.pokemon_name.as_deref(),
            self.fusion,
        ))
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panic: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panic: {}", s)
    } else {
        "panic with non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CatalogSearchError, ExtractionError, VisualAnalysisError};
    use crate::schema::{CardSet, CatalogRecord, EvidenceTag};

    enum TextBehaviour {
        Text(&'static str),
        Fail,
        Panic,
        Hang,
    }

    struct StubExtractor(TextBehaviour);

    #[async_trait::async_trait]
    impl TextExtractor for StubExtractor {
        fn name(&self) -> &str {
            "stub"
        }

        async fn extract_text(&self, _request: &ScanRequest) -> Result<String, ExtractionError> {
            match &self.0 {
                TextBehaviour::Text(t) => Ok(t.to_string()),
                TextBehaviour::Fail => Err(ExtractionError::Request("ocr backend down".to_string())),
                TextBehaviour::Panic => panic!("extractor bug"),
                TextBehaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(String::new())
                }
            }
        }
    }

    /// Returns the same records for every query; `None` simulates an outage.
    struct StubCatalog(Option<Vec<CatalogRecord>>);

    #[async_trait::async_trait]
    impl CatalogSearch for StubCatalog {
        fn name(&self) -> &str {
            "stub"
        }

        async fn search(&self, _query: &str, _limit: usize) -> Result<Vec<CatalogRecord>, CatalogSearchError> {
            self.0.clone().ok_or(CatalogSearchError::Status {
                status: 503,
                body: "maintenance".to_string(),
            })
        }

        async fn search_by_number(&self, _n: &str, _limit: usize) -> Result<Vec<CatalogRecord>, CatalogSearchError> {
            self.search("", 0).await
        }
    }

    /// Fixed subject; `None` subject with `fail` simulates a decode failure.
    struct StubVision {
        subject: Option<&'static str>,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl VisualAnalyzer for StubVision {
        fn name(&self) -> &str {
            "stub"
        }

        async fn analyze_image(&self, _request: &ScanRequest) -> Result<VisualAnalysis, VisualAnalysisError> {
            if self.fail {
                let err = image::load_from_memory(b"junk").err().unwrap();
                return Err(VisualAnalysisError::Decode(err));
            }
            Ok(VisualAnalysis {
                detected_subject: self.subject.map(str::to_string),
                confidence: 0.85,
                color_tags: vec!["orange".to_string()],
                feature_tags: Vec::new(),
            })
        }
    }

    struct PanickingVision;

    #[async_trait::async_trait]
    impl VisualAnalyzer for PanickingVision {
        fn name(&self) -> &str {
            "panicking"
        }

        async fn analyze_image(&self, _request: &ScanRequest) -> Result<VisualAnalysis, VisualAnalysisError> {
            panic!("palette bug")
        }
    }

    fn record(id: &str, name: &str, number: &str, total: u32, types: &[&str], hp: u32) -> CatalogRecord {
        CatalogRecord {
            id: id.to_string(),
            name: name.to_string(),
            number: number.to_string(),
            set: Some(CardSet {
                id: "set".to_string(),
                name: "Celebrations".to_string(),
                series: "Sword & Shield".to_string(),
                total: Some(total),
            }),
            types: types.iter().map(|t| t.to_string()).collect(),
            hp: Some(hp),
            rarity: None,
            image_url: None,
        }
    }

    fn scanner(text: TextBehaviour, catalog: Option<Vec<CatalogRecord>>, vision: StubVision) -> CardScanner {
        scanner_with(ScannerConfig::default(), text, catalog, vision)
    }

    fn scanner_with(
        config: ScannerConfig,
        text: TextBehaviour,
        catalog: Option<Vec<CatalogRecord>>,
        vision: StubVision,
    ) -> CardScanner {
        CardScanner::new(
            &config,
            Arc::new(StubExtractor(text)),
            Arc::new(StubCatalog(catalog)),
            Arc::new(vision),
        )
        .unwrap()
    }

    fn no_subject() -> StubVision {
        StubVision { subject: None, fail: false }
    }

    fn request() -> ScanRequest {
        ScanRequest::new("card.jpg", vec![1, 2, 3])
    }

    #[tokio::test]
    async fn test_pikachu_scan_scores_number_match() {
        let scanner = scanner(
            TextBehaviour::Text("Pikachu HP 60 Basic Pokemon Lightning Set 001/025"),
            Some(vec![
                record("cel25-5", "Pikachu", "005", 25, &["Lightning"], 60),
                record("cel25-1", "Pikachu", "001", 25, &["Colorless"], 120),
            ]),
            no_subject(),
        );

        let report = scanner.scan(&request(), &CancellationToken::new()).await;

        assert_eq!(report.status, ScanStatus::Completed);
        assert_eq!(report.analysis.pokemon_name.as_deref(), Some("Pikachu"));
        assert_eq!(report.analysis.hp, Some(60));
        assert_eq!(report.analysis.card_number.as_deref(), Some("001/025"));

        let matched = report.candidates.iter().find(|c| c.id() == "cel25-1").unwrap();
        assert!(matched.confidence >= 0.8 - 1e-9);
        assert!(matched.has_tag(EvidenceTag::Number));
        assert!(report.degraded.is_empty());
        assert_eq!(report.image_digest.len(), 64);
    }

    #[tokio::test]
    async fn test_catalog_outage_yields_empty_result() {
        let scanner = scanner(
            TextBehaviour::Text("Charizard HP 150 Stage 2 Fire 004/102"),
            None,
            StubVision { subject: Some("charizard"), fail: false },
        );

        let report = scanner.scan(&request(), &CancellationToken::new()).await;

        assert_eq!(report.status, ScanStatus::Completed);
        assert!(report.candidates.is_empty());
        assert!(report.degraded.iter().any(|d| d.stage == Stage::CatalogSearch));
    }

    #[tokio::test]
    async fn test_visual_subject_without_text_name() {
        let scanner = scanner(
            TextBehaviour::Text("004/102"),
            Some(vec![
                record("base1-2", "Blastoise", "2", 102, &["Water"], 100),
                record("base1-4", "Charizard", "4", 102, &["Fire"], 120),
            ]),
            StubVision { subject: Some("charizard"), fail: false },
        );

        let report = scanner.scan(&request(), &CancellationToken::new()).await;

        assert_eq!(report.analysis.pokemon_name, None);
        let charizard = report.candidates.iter().find(|c| c.id() == "base1-4").unwrap();
        let blastoise = report.candidates.iter().find(|c| c.id() == "base1-2").unwrap();
        assert!(charizard.has_tag(EvidenceTag::Illustration));
        assert!(!blastoise.has_tag(EvidenceTag::Illustration));
        assert!((charizard.confidence - blastoise.confidence - 0.2).abs() < 1e-9);
        assert_eq!(report.candidates[0].id(), "base1-4");
    }

    #[tokio::test]
    async fn test_failed_extraction_degrades_to_empty_text() {
        let scanner = scanner(
            TextBehaviour::Fail,
            Some(vec![record("a", "Pikachu", "1", 25, &[], 60)]),
            no_subject(),
        );

        let report = scanner.scan(&request(), &CancellationToken::new()).await;

        assert_eq!(report.status, ScanStatus::Completed);
        assert_eq!(report.analysis, FieldAnalysis::empty(0.5));
        assert!(report.candidates.is_empty());
        assert_eq!(report.degraded.len(), 1);
        assert_eq!(report.degraded[0].stage, Stage::TextExtraction);
    }

    #[tokio::test]
    async fn test_failed_visual_analysis_is_neutral() {
        let scanner = scanner(
            TextBehaviour::Text("Pikachu HP 60"),
            Some(vec![record("a", "Pikachu", "1", 25, &[], 60)]),
            StubVision { subject: None, fail: true },
        );

        let report = scanner.scan(&request(), &CancellationToken::new()).await;

        assert_eq!(report.visual, VisualAnalysis::neutral());
        assert_eq!(report.candidates.len(), 1);
        assert!(report.degraded.iter().any(|d| d.stage == Stage::VisualAnalysis));
    }

    #[tokio::test]
    async fn test_cancelled_scan_is_empty() {
        let scanner = scanner(
            TextBehaviour::Text("Pikachu HP 60"),
            Some(vec![record("a", "Pikachu", "1", 25, &[], 60)]),
            no_subject(),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = scanner.scan(&request(), &cancel).await;

        assert_eq!(report.status, ScanStatus::Cancelled);
        assert!(report.candidates.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_during_hanging_extraction() {
        let scanner = scanner(TextBehaviour::Hang, Some(Vec::new()), no_subject());
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let report = scanner.scan(&request(), &cancel).await;
        assert_eq!(report.status, ScanStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_collaborator_timeout_degrades_stage() {
        let mut config = ScannerConfig::default();
        config.search.collaborator_timeout_secs = 1;
        let scanner = scanner_with(config, TextBehaviour::Hang, Some(Vec::new()), no_subject());

        let report = scanner.scan(&request(), &CancellationToken::new()).await;

        assert_eq!(report.status, ScanStatus::Completed);
        assert_eq!(report.degraded[0].stage, Stage::TextExtraction);
        assert!(report.degraded[0].message.contains("timed out"));
    }

    #[tokio::test]
    async fn test_extractor_panic_degrades_text_stage() {
        let scanner = scanner(TextBehaviour::Panic, Some(Vec::new()), no_subject());

        let report = scanner.scan(&request(), &CancellationToken::new()).await;

        assert_eq!(report.status, ScanStatus::Completed);
        assert!(report.candidates.is_empty());
        assert_eq!(report.degraded[0].stage, Stage::TextExtraction);
        assert!(report.degraded[0].message.contains("extractor bug"));
    }

    #[tokio::test]
    async fn test_vision_panic_keeps_text_candidates() {
        let config = ScannerConfig::default();
        let scanner = CardScanner::new(
            &config,
            Arc::new(StubExtractor(TextBehaviour::Text("Pikachu HP 60"))),
            Arc::new(StubCatalog(Some(vec![record("a", "Pikachu", "1", 25, &[], 60)]))),
            Arc::new(PanickingVision),
        )
        .unwrap();

        let report = scanner.scan(&request(), &CancellationToken::new()).await;

        assert_eq!(report.status, ScanStatus::Completed);
        assert_eq!(report.candidates.len(), 1);
        assert_eq!(report.visual, VisualAnalysis::neutral());
        assert_eq!(report.degraded.len(), 1);
        assert_eq!(report.degraded[0].stage, Stage::VisualAnalysis);
        assert!(report.degraded[0].message.contains("palette bug"));
    }

    /// Same bound axum puts on a handler future, over any borrow lifetime.
    fn scan_future<'a>(
        scanner: &'a CardScanner,
        request: &'a ScanRequest,
        cancel: &'a CancellationToken,
    ) -> impl Future<Output = ScanReport> + Send + 'a {
        scanner.scan(request, cancel)
    }

    #[tokio::test]
    async fn test_scan_future_is_send() {
        let scanner = scanner(TextBehaviour::Text("Pikachu HP 60"), Some(Vec::new()), no_subject());
        let request = request();
        let cancel = CancellationToken::new();

        let report = tokio::spawn({
            let scanner = Arc::new(scanner);
            async move { scan_future(&scanner, &request, &cancel).await }
        })
        .await
        .unwrap();
        assert_eq!(report.status, ScanStatus::Completed);
    }

    #[tokio::test]
    async fn test_confidences_within_bounds() {
        let records: Vec<CatalogRecord> = (0..30)
            .map(|i| record(&format!("p{i}"), "Pikachu", "001", 25, &["Lightning"], 60))
            .collect();
        let scanner = scanner(
            TextBehaviour::Text("Pikachu HP 60 Lightning 001/025 Celebrations"),
            Some(records),
            StubVision { subject: Some("pikachu"), fail: false },
        );

        let report = scanner.scan(&request(), &CancellationToken::new()).await;

        assert_eq!(report.candidates.len(), 20);
        assert!(report
            .candidates
            .iter()
            .all(|c| (0.0..=1.0).contains(&c.confidence)));
        assert!(report.candidates.iter().all(|c| c.has_tag(EvidenceTag::Illustration)));
    }
}
