//! Query resolution.
//!
//! Scores are summed per document across query terms, fuzzy expansion adds
//! near-miss terms at half weight, filters match metadata fields exactly,
//! and pagination happens after sorting. The fuzzy candidate set comes from
//! a vocabulary snapshot cached for a short TTL so a query never pays for a
//! full `posting:*` enumeration twice in a row.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, warn};

use mailvane_protocol::defaults;
use mailvane_protocol::payload::Language;

use crate::error::Result;
use crate::store::{split_member, IndexStore, IndexedDocument};
use crate::tokenize::tokenize;

/// Maximum edit distance for fuzzy term expansion.
const FUZZY_MAX_DISTANCE: usize = 2;
/// Weight applied to scores contributed by fuzzy-matched terms.
const FUZZY_WEIGHT: f64 = 0.5;
const HIGHLIGHT_CHARS: usize = 200;

#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub from: usize,
    pub size: usize,
    /// Exact-match metadata filters; every entry must match.
    pub filters: HashMap<String, Value>,
    pub highlight: bool,
    pub fuzzy: bool,
    pub language: Language,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            from: 0,
            size: 10,
            filters: HashMap::new(),
            highlight: false,
            fuzzy: false,
            language: Language::En,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub doc_id: String,
    pub doc_type: String,
    pub score: f64,
    pub document: IndexedDocument,
    pub highlight: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SearchResults {
    pub hits: Vec<SearchHit>,
    /// Matches after filtering, before pagination.
    pub total: usize,
}

struct VocabSnapshot {
    terms: Vec<String>,
    fetched_at: Instant,
}

pub struct QueryEngine {
    store: IndexStore,
    vocab_cache: tokio::sync::Mutex<Option<VocabSnapshot>>,
    vocab_ttl: Duration,
}

impl QueryEngine {
    pub fn new(store: IndexStore) -> Self {
        Self {
            store,
            vocab_cache: tokio::sync::Mutex::new(None),
            vocab_ttl: Duration::from_secs(defaults::VOCAB_CACHE_TTL_SECS),
        }
    }

    pub async fn search(&self, query: &str, options: &SearchOptions) -> Result<SearchResults> {
        let tokens = tokenize(query, options.language);
        if tokens.is_empty() {
            return Ok(SearchResults::default());
        }

        // Exact postings.
        let mut scores: HashMap<String, f64> = HashMap::new();
        for token in &tokens {
            for (member, score) in self.store.postings(token).await? {
                *scores.entry(member).or_insert(0.0) += score;
            }
        }

        // Fuzzy expansion at half weight.
        if options.fuzzy {
            for term in self.fuzzy_terms(&tokens).await? {
                for (member, score) in self.store.postings(&term).await? {
                    *scores.entry(member).or_insert(0.0) += score * FUZZY_WEIGHT;
                }
            }
        }

        // Filter on metadata. A missing or unreadable metadata record drops
        // the document.
        let mut matched: Vec<(String, f64)> = Vec::with_capacity(scores.len());
        for (member, score) in scores {
            if self.passes_filters(&member, &options.filters).await? {
                matched.push((member, score));
            }
        }
        matched.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        let total = matched.len();

        let mut hits = Vec::new();
        for (member, score) in matched.into_iter().skip(options.from).take(options.size) {
            let Some((doc_type, id)) = split_member(&member) else {
                warn!("Skipping malformed posting member {}", member);
                continue;
            };
            let Some(document) = self.store.get_document(doc_type, id).await? else {
                warn!("Scored document {} has no body; skipping", member);
                continue;
            };
            let highlight = options
                .highlight
                .then(|| snippet(&document.content, HIGHLIGHT_CHARS));
            hits.push(SearchHit {
                doc_id: id.to_string(),
                doc_type: doc_type.to_string(),
                score,
                document,
                highlight,
            });
        }

        debug!(
            "Query [{}] matched {} docs ({} returned)",
            query,
            total,
            hits.len()
        );
        Ok(SearchResults { hits, total })
    }

    async fn passes_filters(
        &self,
        member: &str,
        filters: &HashMap<String, Value>,
    ) -> Result<bool> {
        if filters.is_empty() {
            return Ok(true);
        }
        let Some((doc_type, id)) = split_member(member) else {
            warn!("Skipping malformed posting member {}", member);
            return Ok(false);
        };
        let Some(raw) = self.store.get_meta_raw(doc_type, id).await? else {
            return Ok(false);
        };
        let meta: HashMap<String, Value> = match serde_json::from_str(&raw) {
            Ok(meta) => meta,
            Err(e) => {
                warn!("Malformed metadata for {}; dropping from results: {}", member, e);
                return Ok(false);
            }
        };
        Ok(filters
            .iter()
            .all(|(key, expected)| meta.get(key) == Some(expected)))
    }

    /// Vocabulary terms within edit distance of any query token, excluding
    /// the tokens themselves.
    async fn fuzzy_terms(&self, tokens: &[String]) -> Result<Vec<String>> {
        let vocabulary = self.vocabulary_cached().await?;
        Ok(vocabulary
            .into_iter()
            .filter(|term| {
                tokens.iter().any(|token| {
                    term != token && levenshtein(term, token) <= FUZZY_MAX_DISTANCE
                })
            })
            .collect())
    }

    async fn vocabulary_cached(&self) -> Result<Vec<String>> {
        let mut cache = self.vocab_cache.lock().await;
        if let Some(snapshot) = cache.as_ref() {
            if snapshot.fetched_at.elapsed() < self.vocab_ttl {
                return Ok(snapshot.terms.clone());
            }
        }
        let terms = self.store.vocabulary().await?;
        *cache = Some(VocabSnapshot {
            terms: terms.clone(),
            fetched_at: Instant::now(),
        });
        Ok(terms)
    }
}

/// Truncated content snippet for highlighting.
fn snippet(content: &str, max_chars: usize) -> String {
    if content.chars().count() <= max_chars {
        return content.to_string();
    }
    let truncated: String = content.chars().take(max_chars).collect();
    format!("{}...", truncated)
}

/// Edit distance, two-row dynamic programming.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution
                .min(previous[j + 1] + 1)
                .min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}
