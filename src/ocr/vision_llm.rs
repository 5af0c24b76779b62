//! Vision-LLM transcription through OpenRouter.

use super::TextExtractor;
use crate::error::ExtractionError;
use crate::openrouter::{Message, OpenRouterClient};
use crate::schema::ScanRequest;
use tracing::info;

const TRANSCRIBE_PROMPT: &str = "You transcribe trading card photos. Output only the text printed on \
the card, top to bottom, one line per printed line. Start with the card name line. Do not add \
commentary, translations or markdown.";

pub struct VisionLlmExtractor {
    client: OpenRouterClient,
}

impl VisionLlmExtractor {
    pub fn new(client: OpenRouterClient) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl TextExtractor for VisionLlmExtractor {
    fn name(&self) -> &str {
        "vision_llm"
    }

    async fn extract_text(&self, request: &ScanRequest) -> Result<String, ExtractionError> {
        let mime = image_mime(request);
        info!(
            "VisionLlmExtractor: transcribing {} ({} bytes, {}) with {}",
            request.filename,
            request.data.len(),
            mime,
            self.client.model()
        );

        let messages = vec![
            Message::system(TRANSCRIBE_PROMPT),
            Message::user_with_image("Transcribe this card.", &request.data, mime),
        ];

        let text = self
            .client
            .chat(messages)
            .await
            .map_err(|e| ExtractionError::Request(e.to_string()))?;

        let text = strip_code_fence(&text);
        if text.is_empty() {
            return Err(ExtractionError::EmptyResponse);
        }
        Ok(text.to_string())
    }
}

/// Declared content type, else a guess from the file extension.
fn image_mime(request: &ScanRequest) -> &str {
    if let Some(ct) = request.content_type.as_deref().filter(|ct| ct.starts_with("image/")) {
        return ct;
    }

    let lower = request.filename.to_lowercase();
    match lower.rsplit('.').next() {
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => "image/jpeg",
    }
}

/// Models sometimes wrap the transcript in a ``` fence despite the prompt.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.split_once('\n').map(|(_, rest)| rest).unwrap_or("");
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_mime() {
        let req = ScanRequest::new("card.PNG", vec![]);
        assert_eq!(image_mime(&req), "image/png");

        let req = ScanRequest::new("card", vec![]).with_content_type("image/webp");
        assert_eq!(image_mime(&req), "image/webp");

        let req = ScanRequest::new("card.heic", vec![]).with_content_type("application/octet-stream");
        assert_eq!(image_mime(&req), "image/jpeg");
    }

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("  Pikachu HP 60 \n"), "Pikachu HP 60");
        assert_eq!(strip_code_fence("```text\nPikachu\nHP 60\n```"), "Pikachu\nHP 60");
        assert_eq!(strip_code_fence("```\n```"), "");
    }
}
