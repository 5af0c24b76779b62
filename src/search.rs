//! Candidate search: name lookup, number lookup and the series-probe fallback.

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::catalog::CatalogSearch;
use crate::config::SearchSettings;
use crate::error::ScanError;
use crate::fusion::rank_by_confidence;
use crate::pipeline::call_collaborator;
use crate::schema::{CandidateCard, CandidateOrigin, FieldAnalysis};
use crate::scorer::{in_series, CandidateScorer};

/// Scored candidates plus the catalog calls that failed along the way.
#[derive(Debug, Default)]
pub struct SearchOutcome {
    pub candidates: Vec<CandidateCard>,
    pub failures: Vec<String>,
}

/// Turns a field analysis into a capped, scored candidate pool.
pub struct CandidateSearch {
    catalog: Arc<dyn CatalogSearch>,
    scorer: CandidateScorer,
    settings: SearchSettings,
}

impl CandidateSearch {
    pub fn new(catalog: Arc<dyn CatalogSearch>, scorer: CandidateScorer, settings: SearchSettings) -> Self {
        Self {
            catalog,
            scorer,
            settings,
        }
    }

    /// Gather candidates for the extracted fields.
    ///
    /// A failed catalog call counts as zero records. Only cancellation is an
    /// error.
    pub async fn collect(&self, fields: &FieldAnalysis, cancel: &CancellationToken) -> Result<SearchOutcome, ScanError> {
        let s = &self.settings;
        let timeout = s.collaborator_timeout();
        let mut outcome = SearchOutcome::default();

        if let Some(name) = fields.pokemon_name.as_deref() {
            debug!("Searching {} by name: {}", self.catalog.name(), name);
            match call_collaborator(cancel, timeout, self.catalog.search(name, s.name_search_limit)).await? {
                Ok(records) => outcome.candidates.extend(
                    records
                        .into_iter()
                        .map(|r| self.scorer.score(r, fields, CandidateOrigin::NameSearch)),
                ),
                Err(e) => {
                    warn!("Name search for \"{}\" failed: {}", name, e);
                    outcome.failures.push(format!("name search \"{}\": {}", name, e));
                }
            }
        } else if let Some(number) = fields.card_number.as_deref() {
            debug!("Searching {} by number: {}", self.catalog.name(), number);
            match call_collaborator(cancel, timeout, self.catalog.search_by_number(number, s.number_search_limit)).await? {
                Ok(records) => outcome.candidates.extend(
                    records
                        .into_iter()
                        .map(|r| self.scorer.score(r, fields, CandidateOrigin::NumberSearch)),
                ),
                Err(e) => {
                    warn!("Number search for {} failed: {}", number, e);
                    outcome.failures.push(format!("number search {}: {}", number, e));
                }
            }
        }

        if let Some(series) = fields.detected_series.as_deref() {
            if outcome.candidates.len() < s.fallback_min_pool {
                self.probe_series(series, fields, cancel, &mut outcome).await?;
            }
        }

        rank_by_confidence(&mut outcome.candidates);
        outcome.candidates.truncate(s.result_cap);

        info!(
            "Candidate search: {} candidates, {} failed catalog calls",
            outcome.candidates.len(),
            outcome.failures.len()
        );
        Ok(outcome)
    }

    /// Probe well-known subjects to surface cards from the detected series.
    /// Probes run concurrently up to `probe_concurrency`; their results are
    /// appended in probe-list order. Once the pool reaches the cap no further
    /// probe is issued.
    async fn probe_series(
        &self,
        series: &str,
        fields: &FieldAnalysis,
        cancel: &CancellationToken,
        outcome: &mut SearchOutcome,
    ) -> Result<(), ScanError> {
        let s = &self.settings;
        if outcome.candidates.len() >= s.result_cap {
            return Ok(());
        }
        debug!("Series fallback for \"{}\" with {} probes", series, s.probe_subjects.len());

        // Each probe owns its handles so the stream holds no borrows of `self`.
        let probes: Vec<_> = s
            .probe_subjects
            .iter()
            .map(|subject| {
                let catalog = Arc::clone(&self.catalog);
                let cancel = cancel.clone();
                let subject = subject.clone();
                let (limit, timeout) = (s.probe_limit, s.collaborator_timeout());
                async move {
                    let result = call_collaborator(&cancel, timeout, catalog.search(&subject, limit)).await;
                    (subject, result)
                }
            })
            .collect();

        let mut results = stream::iter(probes).buffered(s.probe_concurrency.max(1));

        while let Some((subject, result)) = results.next().await {
            match result? {
                Ok(records) => {
                    for record in records.into_iter().filter(|r| in_series(r, series)) {
                        if outcome.candidates.len() >= s.result_cap {
                            break;
                        }
                        outcome
                            .candidates
                            .push(self.scorer.score(record, fields, CandidateOrigin::SeriesProbe));
                    }
                }
                Err(e) => {
                    warn!("Series probe \"{}\" failed: {}", subject, e);
                    outcome.failures.push(format!("series probe \"{}\": {}", subject, e));
                }
            }

            if outcome.candidates.len() >= s.result_cap {
                debug!("Candidate pool full after probe \"{}\"", subject);
                break;
            }
        }

        Ok(())
    }
}
