//! Search layer facade.
//!
//! - **[`query`]**: typed search queries and the parameterized SQL builder.
//! - **[`cache`]**: bounded TTL cache for result pages.
//! - **[`service`]**: the cached, retrying search entry points.

pub mod cache;
pub mod query;
pub mod service;

pub use cache::SearchCache;
pub use query::{QueryBuilder, SearchQuery, SortField, SortOrder};
pub use service::{CombinedSearchResult, FacetValue, SearchFacets, SearchResult, SearchService};
