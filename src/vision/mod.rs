//! Visual evidence from the card illustration.
//!
//! Advisory only: the orchestrator turns any error from a [`VisualAnalyzer`]
//! into [`VisualAnalysis::neutral`](crate::schema::VisualAnalysis::neutral).

pub mod palette;

use crate::error::VisualAnalysisError;
use crate::schema::{ScanRequest, VisualAnalysis};

/// Async trait implemented by each visual analysis backend.
#[async_trait::async_trait]
pub trait VisualAnalyzer: Send + Sync {
    fn name(&self) -> &str;
    async fn analyze_image(&self, request: &ScanRequest) -> Result<VisualAnalysis, VisualAnalysisError>;
}
