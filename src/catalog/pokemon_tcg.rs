//! Pokémon TCG API catalog backend.

use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

use super::CatalogSearch;
use crate::error::CatalogSearchError;
use crate::schema::{CardSet, CatalogRecord};

const DEFAULT_API_URL: &str = "https://api.pokemontcg.io/v2";

/// Catalog client for the public Pokémon TCG API.
#[derive(Clone)]
pub struct PokemonTcgClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl PokemonTcgClient {
    /// Build from `POKEMON_TCG_API_URL` and the optional `POKEMON_TCG_API_KEY`.
    pub fn from_env(timeout: Duration) -> anyhow::Result<Self> {
        let base_url =
            std::env::var("POKEMON_TCG_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());
        let api_key = std::env::var("POKEMON_TCG_API_KEY").ok().filter(|k| !k.is_empty());

        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    async fn query_cards(&self, q: &str, limit: usize) -> Result<Vec<ApiCard>, CatalogSearchError> {
        debug!("PokemonTcgClient: q={} pageSize={}", q, limit);

        let mut request = self
            .client
            .get(format!("{}/cards", self.base_url))
            .query(&[("q", q.to_string()), ("pageSize", limit.to_string())]);

        if let Some(key) = &self.api_key {
            request = request.header("X-Api-Key", key);
        }

        let response = request.send().await.map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CatalogSearchError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let page: CardsPage = response.json().await.map_err(classify)?;
        Ok(page.data)
    }
}

#[async_trait::async_trait]
impl CatalogSearch for PokemonTcgClient {
    fn name(&self) -> &str {
        "pokemon_tcg"
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<CatalogRecord>, CatalogSearchError> {
        let query = sanitize_query(query);
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }

        // Exact first so "pidgeot" does not pull in every "pidgeotto".
        let mut cards = self.query_cards(&format!("name:\"{}\"", query), limit).await?;

        // Wildcards are rejected by the API when the name contains a space.
        if cards.is_empty() && !query.contains(' ') {
            let wildcard = self.query_cards(&format!("name:{}*", query), limit).await?;
            cards = filter_wildcard_matches(wildcard, query);
        }

        info!("PokemonTcgClient: {} cards for \"{}\"", cards.len(), query);
        Ok(cards.into_iter().map(ApiCard::into_record).collect())
    }

    async fn search_by_number(
        &self,
        card_number: &str,
        limit: usize,
    ) -> Result<Vec<CatalogRecord>, CatalogSearchError> {
        let mut parts = card_number.split('/');
        let number = match parts.next().map(|n| n.trim_start_matches('0')) {
            Some("") => "0",
            Some(n) => n,
            None => return Ok(Vec::new()),
        };
        let printed_total = parts.next().and_then(|t| t.parse::<u32>().ok());

        let cards = self.query_cards(&format!("number:{}", number), limit).await?;

        let records: Vec<CatalogRecord> = cards
            .into_iter()
            .map(ApiCard::into_record)
            .filter(|r| match (printed_total, r.set.as_ref().and_then(|s| s.total)) {
                (Some(expected), Some(total)) => expected == total,
                _ => true,
            })
            .collect();

        info!("PokemonTcgClient: {} cards for number {}", records.len(), card_number);
        Ok(records)
    }
}

/// Drop characters the API's Lucene syntax would interpret inside a quoted
/// or wildcard name term.
fn sanitize_query(query: &str) -> String {
    query
        .chars()
        .filter(|c| !matches!(c, '"' | '\\' | '*' | '?' | ':' | '(' | ')' | '[' | ']' | '{' | '}'))
        .collect()
}

fn classify(e: reqwest::Error) -> CatalogSearchError {
    if e.is_timeout() {
        CatalogSearchError::Timeout
    } else {
        CatalogSearchError::Transport(e)
    }
}

/// Keep exact name matches if any; otherwise names containing the query as a
/// whole word ("mew" matches "Mew ex" and "Shining Mew" but not "Mewtwo").
fn filter_wildcard_matches(cards: Vec<ApiCard>, query: &str) -> Vec<ApiCard> {
    let query = query.to_lowercase();

    let (exact, rest): (Vec<ApiCard>, Vec<ApiCard>) = cards
        .into_iter()
        .partition(|c| c.name.to_lowercase() == query);

    if !exact.is_empty() {
        return exact;
    }

    rest.into_iter()
        .filter(|c| contains_as_word(&c.name.to_lowercase(), &query))
        .collect()
}

fn contains_as_word(name: &str, query: &str) -> bool {
    const AFTER: &[char] = &[' ', '-', '(', '.'];
    const BEFORE: &[char] = &[' ', '-'];

    name.match_indices(query).any(|(start, _)| {
        let end = start + query.len();
        let before_ok = start == 0 || name[..start].ends_with(BEFORE);
        let after_ok = end == name.len() || name[end..].starts_with(AFTER);
        before_ok && after_ok
    })
}

// ── Pokémon TCG API response types ──────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CardsPage {
    #[serde(default)]
    data: Vec<ApiCard>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiCard {
    id: String,
    name: String,
    #[serde(default)]
    number: String,
    #[serde(default)]
    hp: Option<String>,
    #[serde(default)]
    types: Vec<String>,
    #[serde(default)]
    rarity: Option<String>,
    #[serde(default)]
    set: Option<ApiSet>,
    #[serde(default)]
    images: Option<ApiImages>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiSet {
    id: String,
    name: String,
    #[serde(default)]
    series: String,
    #[serde(default)]
    printed_total: Option<u32>,
    #[serde(default)]
    total: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ApiImages {
    #[serde(default)]
    small: Option<String>,
    #[serde(default)]
    large: Option<String>,
}

impl ApiCard {
    fn into_record(self) -> CatalogRecord {
        CatalogRecord {
            id: self.id,
            name: self.name,
            number: self.number,
            set: self.set.map(|s| CardSet {
                id: s.id,
                name: s.name,
                series: s.series,
                total: s.printed_total.or(s.total),
            }),
            types: self.types,
            hp: self.hp.and_then(|hp| hp.trim().parse().ok()),
            rarity: self.rarity,
            image_url: self.images.and_then(|i| i.large.or(i.small)),
        }
    }
}
