//! Demo extractor: canned transcripts keyed by filename fragment.

use super::TextExtractor;
use crate::config::TranscriptHint;
use crate::error::ExtractionError;
use crate::schema::ScanRequest;
use tracing::debug;

pub struct FilenameHintExtractor {
    hints: Vec<TranscriptHint>,
    fallback: String,
}

impl FilenameHintExtractor {
    pub fn new(hints: Vec<TranscriptHint>, fallback: String) -> Self {
        Self { hints, fallback }
    }
}

#[async_trait::async_trait]
impl TextExtractor for FilenameHintExtractor {
    fn name(&self) -> &str {
        "filename_hint"
    }

    async fn extract_text(&self, request: &ScanRequest) -> Result<String, ExtractionError> {
        let filename = request.filename.to_lowercase();

        let text = self
            .hints
            .iter()
            .find(|h| filename.contains(&h.fragment.to_lowercase()))
            .map(|h| h.text.clone())
            .unwrap_or_else(|| self.fallback.clone());

        debug!("FilenameHintExtractor: {} -> {} chars", request.filename, text.len());
        Ok(text)
    }
}
