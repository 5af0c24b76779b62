//! Pluggable text extraction.
//!
//! Defines the [`TextExtractor`] trait so the demo transcript stand-in can be
//! swapped for a real OCR or vision backend without touching scoring.

pub mod filename_hint;
pub mod vision_llm;

use crate::error::ExtractionError;
use crate::schema::ScanRequest;

/// Async trait implemented by each text extraction backend.
#[async_trait::async_trait]
pub trait TextExtractor: Send + Sync {
    fn name(&self) -> &str;
    async fn extract_text(&self, request: &ScanRequest) -> Result<String, ExtractionError>;
}

/// Known extractor identifiers, selected with `TEXT_EXTRACTOR`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextExtractorKind {
    FilenameHint,
    VisionLlm,
}

impl TextExtractorKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "filename_hint" => Some(Self::FilenameHint),
            "vision_llm" => Some(Self::VisionLlm),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kind() {
        assert_eq!(TextExtractorKind::parse("vision_llm"), Some(TextExtractorKind::VisionLlm));
        assert_eq!(TextExtractorKind::parse("filename_hint"), Some(TextExtractorKind::FilenameHint));
        assert_eq!(TextExtractorKind::parse("tesseract"), None);
    }
}
