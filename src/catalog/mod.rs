//! Card catalog collaborator.
//!
//! The pipeline only needs keyword and number lookups; storage and ranking
//! inside the catalog are its own business.

pub mod pokemon_tcg;

use crate::error::CatalogSearchError;
use crate::schema::CatalogRecord;

/// Async trait implemented by each catalog backend.
#[async_trait::async_trait]
pub trait CatalogSearch: Send + Sync {
    fn name(&self) -> &str;

    /// Look up cards by name or keyword.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<CatalogRecord>, CatalogSearchError>;

    /// Look up cards by printed number (`"025/102"`). Backends without number
    /// lookup return nothing.
    async fn search_by_number(
        &self,
        _card_number: &str,
        _limit: usize,
    ) -> Result<Vec<CatalogRecord>, CatalogSearchError> {
        Ok(Vec::new())
    }
}
