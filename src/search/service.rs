//! High-level search entry points over the document store.

use serde::de::DeserializeOwned;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::HistoryConfig;
use crate::error::Result;
use crate::model::{Conversation, Message};
use crate::search::cache::SearchCache;
use crate::search::query::{QueryBuilder, SearchQuery};
use crate::store::{Collection, DocumentStore, QueryPage, StoreQuery};

const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE_MS: u64 = 50;

/// One page of typed search results.
#[derive(Debug, Clone)]
pub struct SearchResult<T> {
    pub items: Vec<T>,
    /// Total matches across all pages, when the store can provide it cheaply.
    /// This gateway cannot, so it stays `None` rather than a guess.
    pub total_count: Option<u64>,
    /// Cursor for the next page; `None` on the last page.
    pub continuation: Option<String>,
    pub has_more: bool,
    pub search_time_ms: u64,
}

impl<T> SearchResult<T> {
    fn empty() -> Self {
        Self {
            items: Vec::new(),
            total_count: None,
            continuation: None,
            has_more: false,
            search_time_ms: 0,
        }
    }
}

/// Both collections searched with the same request. Each leg degrades to an
/// empty page independently; one failing search never hides the other's
/// results.
#[derive(Debug, Clone)]
pub struct CombinedSearchResult {
    pub conversations: SearchResult<Conversation>,
    pub messages: SearchResult<Message>,
    /// Slower of the two legs; they run concurrently.
    pub combined_time_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FacetValue {
    pub id: String,
    pub name: String,
}

/// Distinct filter values currently present in one tenant's conversations,
/// for populating filter pickers.
#[derive(Debug, Clone, Default)]
pub struct SearchFacets {
    pub categories: Vec<FacetValue>,
    pub participants: Vec<FacetValue>,
    pub tags: Vec<String>,
}

/// Cached, retrying search facade. Cheap to share across tasks.
pub struct SearchService<S> {
    store: Arc<S>,
    builder: QueryBuilder,
    conversation_cache: SearchCache<SearchResult<Conversation>>,
    message_cache: SearchCache<SearchResult<Message>>,
    default_page_size: usize,
    max_page_size: usize,
}

impl<S: DocumentStore> SearchService<S> {
    pub fn new(store: Arc<S>, cfg: &HistoryConfig) -> Self {
        let ttl = Duration::from_secs(cfg.cache_ttl_secs);
        Self {
            store,
            builder: QueryBuilder::new(cfg),
            conversation_cache: SearchCache::new(ttl, cfg.cache_max_entries),
            message_cache: SearchCache::new(ttl, cfg.cache_max_entries),
            default_page_size: cfg.default_page_size,
            max_page_size: cfg.max_page_size,
        }
    }

    pub async fn search_conversations(
        &self,
        query: &SearchQuery,
    ) -> Result<SearchResult<Conversation>> {
        self.run(query, Collection::Conversations, &self.conversation_cache)
            .await
    }

    pub async fn search_messages(&self, query: &SearchQuery) -> Result<SearchResult<Message>> {
        self.run(query, Collection::Messages, &self.message_cache)
            .await
    }

    /// Search conversations and messages concurrently with one request. A
    /// failed leg is logged and reported as empty rather than failing the
    /// whole call.
    pub async fn search_combined(&self, query: &SearchQuery) -> CombinedSearchResult {
        let (conversations, messages) = tokio::join!(
            self.search_conversations(query),
            self.search_messages(query),
        );
        let conversations = conversations.unwrap_or_else(|e| {
            warn!(error = %e, "conversation leg of combined search failed");
            SearchResult::empty()
        });
        let messages = messages.unwrap_or_else(|e| {
            warn!(error = %e, "message leg of combined search failed");
            SearchResult::empty()
        });
        CombinedSearchResult {
            combined_time_ms: conversations.search_time_ms.max(messages.search_time_ms),
            conversations,
            messages,
        }
    }

    /// Typeahead suggestions: distinct conversation titles containing
    /// `partial`, most recently active first. Partials shorter than two
    /// characters produce nothing; lookup failures degrade to an empty list.
    pub async fn search_suggestions(
        &self,
        tenant_id: &str,
        partial: &str,
        limit: usize,
    ) -> Vec<String> {
        let partial = partial.trim();
        if tenant_id.trim().is_empty() || partial.chars().count() < 2 {
            return Vec::new();
        }
        let limit = if limit == 0 { self.default_page_size } else { limit };
        let built = self.builder.build_title_suggestions(tenant_id, partial);
        let page = match self
            .store
            .execute(Collection::Conversations, &built, limit, None)
            .await
        {
            Ok(page) => page,
            Err(e) => {
                warn!(error = %e, "suggestion lookup failed");
                return Vec::new();
            }
        };

        let mut titles: Vec<String> = Vec::new();
        for item in &page.items {
            if let Some(title) = item.get("title").and_then(serde_json::Value::as_str) {
                if !title.is_empty() && !titles.iter().any(|t| t == title) {
                    titles.push(title.to_string());
                }
            }
        }
        titles.truncate(limit);
        titles
    }

    /// Distinct categories, participants, and tags across one tenant's
    /// conversations (archived included), each list sorted by display value.
    /// Failures degrade to empty facets.
    pub async fn search_facets(&self, tenant_id: &str) -> SearchFacets {
        if tenant_id.trim().is_empty() {
            return SearchFacets::default();
        }
        let built = self.builder.build_tenant_scan(tenant_id);

        let mut categories: HashMap<String, String> = HashMap::new();
        let mut participants: HashMap<String, String> = HashMap::new();
        let mut tags: BTreeSet<String> = BTreeSet::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = match self
                .store
                .execute(Collection::Conversations, &built, 100, cursor.as_deref())
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    warn!(error = %e, "facet scan failed");
                    return SearchFacets::default();
                }
            };
            for item in page.items {
                let conv: Conversation = match serde_json::from_value(item) {
                    Ok(conv) => conv,
                    Err(e) => {
                        warn!(error = %e, "skipping malformed conversation in facet scan");
                        continue;
                    }
                };
                for cat in conv.categories {
                    categories.entry(cat.category_id).or_insert(cat.category_name);
                }
                for p in conv.participants {
                    participants.entry(p.user_id).or_insert(p.display_name);
                }
                tags.extend(conv.tags);
            }
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        let mut facets = SearchFacets {
            categories: categories
                .into_iter()
                .map(|(id, name)| FacetValue { id, name })
                .collect(),
            participants: participants
                .into_iter()
                .map(|(id, name)| FacetValue { id, name })
                .collect(),
            tags: tags.into_iter().collect(),
        };
        facets.categories.sort_by(|a, b| a.name.cmp(&b.name));
        facets.participants.sort_by(|a, b| a.name.cmp(&b.name));
        facets
    }

    pub fn clear_caches(&self) {
        self.conversation_cache.clear();
        self.message_cache.clear();
    }

    async fn run<T>(
        &self,
        query: &SearchQuery,
        collection: Collection,
        cache: &SearchCache<SearchResult<T>>,
    ) -> Result<SearchResult<T>>
    where
        T: DeserializeOwned + Clone,
    {
        let mut query = query.clone();
        query.page_size = self.clamp_page_size(query.page_size);

        let key = SearchCache::<SearchResult<T>>::key(collection, &query);
        if let Some(hit) = cache.get(key) {
            debug!(collection = collection.name(), key, "search cache hit");
            return Ok(hit);
        }

        let built = self.builder.build(&query, collection)?;
        let started = Instant::now();
        let page = self
            .execute_with_retry(collection, &built, query.page_size, query.continuation.as_deref())
            .await?;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let mut items = Vec::with_capacity(page.items.len());
        for raw in page.items {
            items.push(serde_json::from_value(raw)?);
        }

        let result = SearchResult {
            items,
            total_count: None,
            has_more: page.next_cursor.is_some(),
            continuation: page.next_cursor,
            search_time_ms: elapsed_ms,
        };
        debug!(
            collection = collection.name(),
            hits = result.items.len(),
            has_more = result.has_more,
            elapsed_ms,
            "search executed"
        );
        cache.put(key, result.clone());
        Ok(result)
    }

    async fn execute_with_retry(
        &self,
        collection: Collection,
        built: &StoreQuery,
        page_size: usize,
        cursor: Option<&str>,
    ) -> Result<QueryPage> {
        let mut attempt = 1;
        loop {
            match self.store.execute(collection, built, page_size, cursor).await {
                Ok(page) => return Ok(page),
                Err(e) if e.is_retryable() && attempt < MAX_ATTEMPTS => {
                    let delay = Duration::from_millis(BACKOFF_BASE_MS * u64::from(attempt));
                    warn!(
                        collection = collection.name(),
                        attempt,
                        error = %e,
                        "transient store failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn clamp_page_size(&self, requested: usize) -> usize {
        if requested == 0 {
            self.default_page_size
        } else {
            requested.min(self.max_page_size)
        }
    }
}

impl<S> std::fmt::Debug for SearchService<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchService")
            .field("default_page_size", &self.default_page_size)
            .field("max_page_size", &self.max_page_size)
            .finish_non_exhaustive()
    }
}
